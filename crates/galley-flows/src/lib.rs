//! Workflow use-cases: authorisation, write-off authoring and admin
//! approval, outgoing invoices and templates, product requests, the
//! nightly negative-consumable transfer, stop-list maintenance with
//! pinned-message hash gates, OCR intake, and the scheduled jobs.
//!
//! The dispatcher in [`service`] is the single entry point for chat
//! updates; the scheduled entry points live in [`jobs`] and
//! [`transfer`]; webhook-driven paths enter through [`stoplist`].

pub mod approval;
pub mod auth;
pub mod invoice;
pub mod jobs;
pub mod menu;
pub mod ocr;
pub mod request;
pub mod roles;
pub mod service;
pub mod stoplist;
pub mod syncops;
pub mod transfer;
pub mod writeoff;

pub use ocr::{OcrDocument, OcrExtractor, OcrItem, OcrResult};
pub use roles::AdminDirectory;
pub use service::{handle_update, FlowDeps, UserCtx};
pub use stoplist::{ResyncThrottle, StoplistDebouncer, DEBOUNCE_WINDOW};
