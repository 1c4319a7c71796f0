use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::fetch::{resolve_bytes, BytesSource, DocumentFetcher};
use super::types::*;
use crate::excel::{decode_document, SheetDecoder, SheetSet};

/// Default ceiling on a single document fetch
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// The document the reconciler is currently keyed on
#[derive(Debug, Clone)]
struct DocumentState {
    document: u64,
    filename: CanonicalFilename,
    revision: u64,
    /// Last known-good bytes, used for the local path and as fallback
    local: Option<FileHandle>,
}

impl DocumentState {
    fn key(&self) -> SyncKey {
        SyncKey {
            document: self.document,
            filename: self.filename.clone(),
            revision: self.revision,
        }
    }
}

/// Owns the file handle and the displayed sheets of one document session.
///
/// Every pass is a full replace: entering `Loading` drops the previous
/// sheets, and a finished pass is committed only while its key is still the
/// desired one.
pub struct PreviewReconciler<F, D> {
    fetcher: Arc<F>,
    decoder: Arc<D>,
    fetch_timeout: Duration,
    next_document: u64,
    current: Option<DocumentState>,
    snapshot_tx: watch::Sender<SyncSnapshot>,
}

impl<F, D> PreviewReconciler<F, D>
where
    F: DocumentFetcher,
    D: SheetDecoder,
{
    pub fn new(fetcher: F, decoder: D) -> Self {
        let (snapshot_tx, _) = watch::channel(SyncSnapshot::idle());
        Self {
            fetcher: Arc::new(fetcher),
            decoder: Arc::new(decoder),
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            next_document: 1,
            current: None,
            snapshot_tx,
        }
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Observe every state transition
    pub fn subscribe(&self) -> watch::Receiver<SyncSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn snapshot(&self) -> SyncSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    pub fn state(&self) -> SyncState {
        self.snapshot_tx.borrow().state
    }

    /// The key a committed pass must match
    pub fn desired_key(&self) -> Option<SyncKey> {
        self.current.as_ref().map(DocumentState::key)
    }

    /// Bytes that would be used as fallback right now
    pub fn local_file(&self) -> Option<&FileHandle> {
        self.current.as_ref().and_then(|c| c.local.as_ref())
    }

    /// Start a new document session at revision 0
    pub fn load(&mut self, local: Option<FileHandle>, filename: CanonicalFilename) -> SyncKey {
        let document = self.next_document;
        self.next_document += 1;

        let state = DocumentState {
            document,
            filename,
            revision: 0,
            local,
        };
        let key = state.key();
        info!(%key, "document session started");
        self.current = Some(state);
        key
    }

    /// Returns false when there is no document or the name is unchanged
    pub fn set_filename(&mut self, filename: CanonicalFilename) -> bool {
        match self.current.as_mut() {
            Some(current) if current.filename != filename => {
                debug!(from = %current.filename, to = %filename, "canonical filename changed");
                current.filename = filename;
                true
            }
            _ => false,
        }
    }

    /// Move to `revision`; lower or equal revisions are ignored
    pub fn set_revision(&mut self, revision: u64) -> bool {
        match self.current.as_mut() {
            Some(current) if revision > current.revision => {
                current.revision = revision;
                true
            }
            Some(current) => {
                if revision < current.revision {
                    warn!(
                        current = current.revision,
                        requested = revision,
                        "ignoring revision rollback"
                    );
                }
                false
            }
            None => false,
        }
    }

    /// Tear down to `Idle` with no sheets
    pub fn close(&mut self) {
        if let Some(current) = self.current.take() {
            info!(key = %current.key(), "document session closed");
        }
        self.snapshot_tx.send_replace(SyncSnapshot::idle());
    }

    /// Enter `Loading` for the desired key and hand back the work to run.
    ///
    /// Returns `None` when no document is loaded.
    pub fn begin_pass(&mut self) -> Option<Pass<F, D>> {
        let current = self.current.as_ref()?;
        let key = current.key();
        debug!(%key, "reconciliation pass started");

        self.snapshot_tx.send_replace(SyncSnapshot {
            state: SyncState::Loading,
            key: Some(key.clone()),
            outcome: SyncOutcome::Pending,
        });

        Some(Pass {
            key,
            local: current.local.clone(),
            fetcher: self.fetcher.clone(),
            decoder: self.decoder.clone(),
            fetch_timeout: self.fetch_timeout,
        })
    }

    /// Publish a finished pass unless its key has been superseded.
    ///
    /// Returns whether the result was committed.
    pub fn commit(&mut self, result: PassResult) -> bool {
        let Some(current) = self.current.as_mut() else {
            debug!(key = %result.key, "discarding pass for closed document");
            return false;
        };

        let desired = current.key();
        if result.key != desired {
            debug!(key = %result.key, %desired, "discarding stale pass");
            return false;
        }

        if let Some(handle) = result.replacement {
            current.local = Some(handle);
        }

        let state = result.outcome.settled_state();
        match &result.outcome {
            SyncOutcome::Ready { sheets } => {
                info!(key = %result.key, sheet_count = sheets.len(), "preview ready")
            }
            SyncOutcome::FetchFailed { reason, fallback_used, .. } => {
                warn!(key = %result.key, error = %reason, fallback_used, "preview fetch failed")
            }
            SyncOutcome::DecodeFailed { reason, fallback_used, transport } => warn!(
                key = %result.key,
                reason = reason.reason(),
                error = %reason,
                fallback_used,
                transport = ?transport,
                "preview decode failed"
            ),
            SyncOutcome::Pending => {}
        }

        self.snapshot_tx.send_replace(SyncSnapshot {
            state,
            key: Some(result.key),
            outcome: result.outcome,
        });
        true
    }

    /// Run one full pass for the desired key and return the visible snapshot
    pub async fn reconcile(&mut self) -> SyncSnapshot {
        if let Some(pass) = self.begin_pass() {
            let result = pass.run().await;
            self.commit(result);
        }
        self.snapshot()
    }
}

/// One in-flight reconciliation pass.
///
/// Holds everything it needs, so it can run on another task while the
/// reconciler keeps accepting key changes.
pub struct Pass<F, D> {
    key: SyncKey,
    local: Option<FileHandle>,
    fetcher: Arc<F>,
    decoder: Arc<D>,
    fetch_timeout: Duration,
}

impl<F, D> Pass<F, D>
where
    F: DocumentFetcher,
    D: SheetDecoder,
{
    pub fn key(&self) -> &SyncKey {
        &self.key
    }

    pub async fn run(self) -> PassResult {
        let resolved = match resolve_bytes(
            self.fetcher.as_ref(),
            self.local.as_ref(),
            &self.key,
            self.fetch_timeout,
        )
        .await
        {
            Ok(resolved) => resolved,
            Err(reason) => {
                return PassResult {
                    key: self.key,
                    outcome: SyncOutcome::FetchFailed {
                        reason,
                        fallback_used: false,
                        sheets: SheetSet::empty(),
                    },
                    replacement: None,
                }
            }
        };

        debug!(
            key = %self.key,
            source = resolved.source.tag(),
            byte_len = resolved.handle.byte_length(),
            checksum = resolved.handle.checksum(),
            "bytes resolved"
        );

        let (outcome, replacement) =
            match decode_document(self.decoder.as_ref(), resolved.handle.bytes()).await {
                Ok(sheets) => match resolved.source {
                    BytesSource::Fetched => (SyncOutcome::Ready { sheets }, Some(resolved.handle)),
                    BytesSource::Local | BytesSource::Fallback { advisory: false, .. } => {
                        (SyncOutcome::Ready { sheets }, None)
                    }
                    BytesSource::Fallback { failure, advisory: true } => (
                        SyncOutcome::FetchFailed {
                            reason: failure,
                            fallback_used: true,
                            sheets,
                        },
                        None,
                    ),
                },
                Err(reason) => {
                    let transport = match resolved.source {
                        BytesSource::Fallback { failure, .. } => Some(failure),
                        BytesSource::Local | BytesSource::Fetched => None,
                    };
                    let outcome = SyncOutcome::DecodeFailed {
                        reason,
                        fallback_used: transport.is_some(),
                        transport,
                    };
                    (outcome, None)
                }
            };

        PassResult {
            key: self.key,
            outcome,
            replacement,
        }
    }
}

/// What a finished pass wants to commit
#[derive(Debug, Clone)]
pub struct PassResult {
    pub key: SyncKey,
    pub outcome: SyncOutcome,
    /// Freshly fetched bytes that decoded cleanly
    pub replacement: Option<FileHandle>,
}
