//! Pooled HTTP clients for the three upstreams, with retry, backoff,
//! concurrency caps, and token caching.
//!
//! The clients differ only in configuration and wire format; all of them
//! speak the shared [`ApiError`] taxonomy so callers never inspect raw
//! transport errors. `ApiError::is_transient` is the single retryability
//! predicate in the system.

pub mod api;
pub mod cloud;
pub mod error;
pub mod finance;
pub mod pos;
pub mod retry;
pub mod token;
pub mod xml;

pub use api::{FinanceApi, PosApi};
pub use cloud::{webhook_secret_matches, CloudClient, TokenSource};
pub use error::{ApiError, ApiResult, ErrorKind};
pub use finance::FinanceClient;
pub use pos::PosClient;
pub use retry::{retry_with_backoff, FINANCE_429_BACKOFF, POS_GET_BACKOFF};
pub use token::TokenCache;
pub use xml::{parse_document, XmlNode};
