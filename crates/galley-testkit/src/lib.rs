//! In-process fakes for scenario tests: chat transport, POS and finance
//! upstreams, spreadsheet, OCR. No network, no database.

pub mod fake_chat;
pub mod fake_ocr;
pub mod fake_pos;
pub mod fake_sheet;

pub use fake_chat::{ChatOp, FakeChat};
pub use fake_ocr::FakeOcr;
pub use fake_pos::{FakeFinance, FakePos};
pub use fake_sheet::FakeSheet;
