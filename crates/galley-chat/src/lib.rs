//! Conversation engine substrate: transport seam, durable FSM storage,
//! single-window helpers, and the dispatch middleware.
//!
//! Workflow handlers live in `galley-flows`; this crate owns the contracts
//! they all share. Scheduling model: one event loop, many conversations;
//! isolation comes from the FSM key (user id) and the transport's per-key
//! serial dispatch, never from per-user threads.

pub mod fsm;
pub mod middleware;
pub mod transport;
pub mod window;

pub use fsm::{FsmStorage, TrackedMessages};
pub use middleware::{
    navigation_reset, CallbackGuard, CooldownDecision, CooldownLedger, PermissionRules,
    RoleResolver, ThrottledAction,
};
pub use transport::{
    ChatId, ChatTransport, InlineButton, Markup, MessageId, Update, UpdateKind, UserId,
};
pub use window::{consume_input, show_busy, show_header, show_menu, show_prompt, HOURGLASS};

/// Global cancel command, available from any state.
pub const CANCEL_COMMAND: &str = "/cancel";
