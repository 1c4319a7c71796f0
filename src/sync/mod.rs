//! Keeps the local preview in step with the server copy of a document.
//!
//! This module provides:
//! - The staleness policy deciding when local bytes must be refreshed
//! - The fetch-and-fallback pipeline
//! - The preview reconciler state machine and its event-driven driver

pub mod types;
pub mod policy;
pub mod fetch;
pub mod reconciler;
pub mod driver;

// Re-export commonly used types and functions
pub use types::*;
pub use policy::{format_converted, should_fetch, LEGACY_EXTENSION, MODERN_EXTENSION};
pub use fetch::{
    resolve_bytes, BytesSource, DocumentFetcher, FetchedDocument, HttpDocumentFetcher,
    ResolvedBytes,
};
pub use reconciler::{Pass, PassResult, PreviewReconciler, DEFAULT_FETCH_TIMEOUT};
pub use driver::{spawn_driver, DriverError, SyncEvent, SyncHandle};
