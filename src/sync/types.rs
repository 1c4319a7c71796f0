use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::excel::{DecodeFailure, SheetSet};

/// MIME type of the open XML workbook container
pub const XLSX_MIME_TYPE: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// MIME type of the legacy binary workbook container
pub const XLS_MIME_TYPE: &str = "application/vnd.ms-excel";

/// In-memory document bytes plus the metadata the reconciler needs.
///
/// Never mutated; a refresh builds a new handle.
#[derive(Debug, Clone, PartialEq)]
pub struct FileHandle {
    name: String,
    mime_type: String,
    bytes: Bytes,
    checksum: String,
}

impl FileHandle {
    pub fn new(name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        let name = name.into();
        let mime_type = mime_type_for(&name).to_string();
        Self::with_mime_type(name, mime_type, bytes)
    }

    pub fn with_mime_type(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        let bytes = bytes.into();
        FileHandle {
            name: name.into(),
            mime_type: mime_type.into(),
            checksum: compute_checksum(&bytes),
            bytes,
        }
    }

    /// Read a document from disk
    pub async fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(FileHandle::new(name, bytes))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn bytes(&self) -> Bytes {
        self.bytes.clone()
    }

    pub fn byte_length(&self) -> usize {
        self.bytes.len()
    }

    /// SHA-256 of the bytes, lowercase hex
    pub fn checksum(&self) -> &str {
        &self.checksum
    }
}

/// Guess the spreadsheet MIME type from a filename
pub fn mime_type_for(name: &str) -> &'static str {
    let lower = name.to_lowercase();
    if lower.ends_with(".xlsx") {
        XLSX_MIME_TYPE
    } else if lower.ends_with(".xls") {
        XLS_MIME_TYPE
    } else {
        "application/octet-stream"
    }
}

/// Compute SHA-256 checksum of in-memory bytes
pub fn compute_checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Counts acknowledged edit instructions in the current document session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RevisionCounter(u64);

impl RevisionCounter {
    pub fn new() -> Self {
        RevisionCounter(0)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// Record one acknowledged edit and return the new revision
    pub fn acknowledge_edit(&mut self) -> u64 {
        self.0 += 1;
        self.0
    }

    /// Start a new document session
    pub fn reset(&mut self) {
        self.0 = 0;
    }
}

/// The filename as the document store knows it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalFilename(String);

impl CanonicalFilename {
    pub fn new(name: impl Into<String>) -> Self {
        CanonicalFilename(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalFilename {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CanonicalFilename {
    fn from(s: &str) -> Self {
        CanonicalFilename(s.to_string())
    }
}

impl From<String> for CanonicalFilename {
    fn from(s: String) -> Self {
        CanonicalFilename(s)
    }
}

/// Identifies what a reconciliation pass is reconciling against.
///
/// `document` changes on every upload, so two sessions over the same
/// filename never share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncKey {
    pub document: u64,
    pub filename: CanonicalFilename,
    pub revision: u64,
}

impl fmt::Display for SyncKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "doc#{}:{}@v{}", self.document, self.filename, self.revision)
    }
}

/// Failure to obtain document bytes from the fetch service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum TransportFailure {
    #[error("request failed: {0}")]
    Request(String),
    #[error("server responded with status {0}")]
    Status(u16),
    #[error("server returned an empty document")]
    EmptyBody,
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),
}

/// Lifecycle of the preview for the current document session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    Loading,
    Ready,
    Error,
}

/// Result of one reconciliation pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// No pass has completed for the current key
    Pending,
    Ready { sheets: SheetSet },
    /// The server copy could not be loaded.
    ///
    /// With `fallback_used`, `sheets` holds the previous version decoded from
    /// the last known-good bytes; otherwise `sheets` is empty.
    FetchFailed {
        reason: TransportFailure,
        fallback_used: bool,
        sheets: SheetSet,
    },
    /// The resolved bytes could not be decoded.
    ///
    /// When those bytes were standing in for a failed fetch, `transport`
    /// holds the fetch failure and `fallback_used` is set.
    DecodeFailed {
        reason: DecodeFailure,
        fallback_used: bool,
        transport: Option<TransportFailure>,
    },
}

static NO_SHEETS: SheetSet = SheetSet::empty();

impl SyncOutcome {
    /// Sheets to display, or the empty sentinel
    pub fn sheets(&self) -> &SheetSet {
        match self {
            SyncOutcome::Ready { sheets } | SyncOutcome::FetchFailed { sheets, .. } => sheets,
            SyncOutcome::Pending | SyncOutcome::DecodeFailed { .. } => &NO_SHEETS,
        }
    }

    pub fn fallback_used(&self) -> bool {
        matches!(
            self,
            SyncOutcome::FetchFailed { fallback_used: true, .. }
                | SyncOutcome::DecodeFailed { fallback_used: true, .. }
        )
    }

    /// State the reconciler settles in after this outcome
    pub fn settled_state(&self) -> SyncState {
        match self {
            SyncOutcome::Pending => SyncState::Loading,
            SyncOutcome::Ready { .. } => SyncState::Ready,
            SyncOutcome::FetchFailed { fallback_used: true, .. } => SyncState::Ready,
            SyncOutcome::FetchFailed { .. } | SyncOutcome::DecodeFailed { .. } => SyncState::Error,
        }
    }

    /// Message for the user, if the outcome needs one
    pub fn user_message(&self) -> Option<String> {
        match self {
            SyncOutcome::Pending | SyncOutcome::Ready { .. } => None,
            SyncOutcome::FetchFailed { reason, fallback_used: true, .. } => Some(format!(
                "Showing previous version: the latest edit could not be loaded ({}).",
                reason
            )),
            SyncOutcome::FetchFailed { reason, .. } => {
                Some(format!("The document could not be loaded: {}.", reason))
            }
            SyncOutcome::DecodeFailed { reason, transport: Some(transport), .. } => Some(format!(
                "The latest copy could not be fetched ({}) and the previous copy could not be \
                 read either. {}",
                transport,
                reason.remediation()
            )),
            SyncOutcome::DecodeFailed { reason, .. } => Some(reason.remediation().to_string()),
        }
    }
}

/// What the presentation layer observes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSnapshot {
    pub state: SyncState,
    pub key: Option<SyncKey>,
    pub outcome: SyncOutcome,
}

impl SyncSnapshot {
    pub fn idle() -> Self {
        SyncSnapshot {
            state: SyncState::Idle,
            key: None,
            outcome: SyncOutcome::Pending,
        }
    }

    pub fn sheets(&self) -> &SheetSet {
        self.outcome.sheets()
    }
}

impl Default for SyncSnapshot {
    fn default() -> Self {
        Self::idle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revision_counter_increments_by_one() {
        let mut counter = RevisionCounter::new();
        assert_eq!(counter.value(), 0);
        assert_eq!(counter.acknowledge_edit(), 1);
        assert_eq!(counter.acknowledge_edit(), 2);
        counter.reset();
        assert_eq!(counter.value(), 0);
    }

    #[test]
    fn test_file_handle_metadata() {
        let handle = FileHandle::new("Report.XLSX", vec![1u8, 2, 3]);
        assert_eq!(handle.mime_type(), XLSX_MIME_TYPE);
        assert_eq!(handle.byte_length(), 3);
        assert_eq!(handle.checksum(), compute_checksum(&[1, 2, 3]));
        assert_eq!(handle.checksum().len(), 64);

        assert_eq!(mime_type_for("old.xls"), XLS_MIME_TYPE);
        assert_eq!(mime_type_for("notes.txt"), "application/octet-stream");
    }

    #[test]
    fn test_outcome_states_and_messages() {
        assert_eq!(SyncOutcome::Pending.settled_state(), SyncState::Loading);
        assert!(SyncOutcome::Pending.user_message().is_none());

        let advisory = SyncOutcome::FetchFailed {
            reason: TransportFailure::EmptyBody,
            fallback_used: true,
            sheets: SheetSet::empty(),
        };
        assert!(advisory.fallback_used());
        assert_eq!(advisory.settled_state(), SyncState::Ready);
        assert!(advisory.user_message().unwrap().starts_with("Showing previous version"));

        let hard = SyncOutcome::FetchFailed {
            reason: TransportFailure::Status(404),
            fallback_used: false,
            sheets: SheetSet::empty(),
        };
        assert_eq!(hard.settled_state(), SyncState::Error);

        let decode = SyncOutcome::DecodeFailed {
            reason: DecodeFailure::UnsupportedFormat("no sheets".to_string()),
            fallback_used: false,
            transport: None,
        };
        assert_eq!(decode.settled_state(), SyncState::Error);
        assert!(decode.sheets().is_empty());
        assert!(!decode.fallback_used());
        assert!(decode.user_message().unwrap().contains(".xlsx"));
    }

    #[test]
    fn test_decode_failure_on_fallback_names_the_fetch_failure() {
        let outcome = SyncOutcome::DecodeFailed {
            reason: DecodeFailure::UnsupportedFormat("no sheets".to_string()),
            fallback_used: true,
            transport: Some(TransportFailure::Status(503)),
        };

        assert!(outcome.fallback_used());
        assert_eq!(outcome.settled_state(), SyncState::Error);
        let message = outcome.user_message().unwrap();
        assert!(message.contains("status 503"), "{}", message);
        assert!(message.contains(".xlsx"), "{}", message);
    }

    #[test]
    fn test_sync_key_display() {
        let key = SyncKey {
            document: 3,
            filename: "report.xlsx".into(),
            revision: 2,
        };
        assert_eq!(key.to_string(), "doc#3:report.xlsx@v2");
    }
}
