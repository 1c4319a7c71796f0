//! Client-side document sync for an agent that edits spreadsheets.
//!
//! A document is uploaded once, then edited remotely through chat
//! instructions. After every acknowledged edit the local preview is
//! reconciled against the server copy, falling back to the last good bytes
//! when the server copy cannot be fetched.

pub mod api;
pub mod config;
pub mod excel;
pub mod session;
pub mod sync;

#[cfg(test)]
mod test_support;

pub use api::{ApiClient, ApiError, ChatMessage, ChatRole};
pub use config::{ClientConfig, ConfigError};
pub use excel::{
    decode_document, CellValue, DecodeFailure, Sheet, SheetDecoder, SheetSet, XlsxDecoder,
};
pub use session::{DocumentSession, InstructionReport, SessionError};
pub use sync::{
    should_fetch, spawn_driver, CanonicalFilename, DocumentFetcher, FileHandle, HttpDocumentFetcher,
    PreviewReconciler, SyncEvent, SyncHandle, SyncKey, SyncOutcome, SyncSnapshot, SyncState,
    TransportFailure,
};
