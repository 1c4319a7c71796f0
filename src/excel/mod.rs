//! Spreadsheet model and decoding.
//!
//! This module provides:
//! - The decoded sheet model handed to the presentation layer
//! - The `SheetDecoder` seam and its calamine-backed .xlsx implementation
//! - Classification of decode results into the failure taxonomy

pub mod types;
pub mod decoder;

// Re-export commonly used types and functions
pub use types::*;
pub use decoder::{decode_document, decode_xlsx, SheetDecoder, XlsxDecoder};
