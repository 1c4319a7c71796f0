use std::path::Path;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::api::{ApiClient, ApiError, ChatMessage};
use crate::config::{ClientConfig, ConfigError};
use crate::excel::{SheetDecoder, XlsxDecoder};
use crate::sync::{
    CanonicalFilename, DocumentFetcher, FileHandle, HttpDocumentFetcher, PreviewReconciler,
    RevisionCounter, SyncSnapshot,
};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("no document is open")]
    NoDocument,
    #[error("failed to read {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
}

/// What came back from one edit instruction
#[derive(Debug, Clone)]
pub struct InstructionReport {
    pub response: String,
    pub revision: u64,
    pub snapshot: SyncSnapshot,
}

/// State of one document being edited through the agent.
///
/// Owns the revision counter and the preview reconciler; the presentation
/// layer reads from it instead of sharing mutable state.
pub struct DocumentSession<F = HttpDocumentFetcher, D = XlsxDecoder> {
    api: ApiClient,
    session_id: String,
    reconciler: PreviewReconciler<F, D>,
    revision: RevisionCounter,
    filename: Option<CanonicalFilename>,
    preview_html: String,
    transcript: Vec<ChatMessage>,
}

impl DocumentSession {
    /// Session talking HTTP to the configured backend
    pub fn from_config(config: &ClientConfig) -> Result<Self, SessionError> {
        let base_url = config.base_url()?;
        let api = ApiClient::new(base_url.clone(), config.request_timeout())?;
        let fetcher =
            HttpDocumentFetcher::new(base_url, config.fetch_timeout()).map_err(ApiError::from)?;
        let reconciler =
            PreviewReconciler::new(fetcher, XlsxDecoder).with_fetch_timeout(config.fetch_timeout());

        Ok(Self::new(api, config.session_id.clone(), reconciler))
    }
}

impl<F, D> DocumentSession<F, D>
where
    F: DocumentFetcher,
    D: SheetDecoder,
{
    pub fn new(
        api: ApiClient,
        session_id: impl Into<String>,
        reconciler: PreviewReconciler<F, D>,
    ) -> Self {
        Self {
            api,
            session_id: session_id.into(),
            reconciler,
            revision: RevisionCounter::new(),
            filename: None,
            preview_html: String::new(),
            transcript: Vec::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn filename(&self) -> Option<&CanonicalFilename> {
        self.filename.as_ref()
    }

    pub fn revision(&self) -> u64 {
        self.revision.value()
    }

    /// Server-rendered HTML preview
    pub fn preview_html(&self) -> &str {
        &self.preview_html
    }

    pub fn transcript(&self) -> &[ChatMessage] {
        &self.transcript
    }

    pub fn snapshot(&self) -> SyncSnapshot {
        self.reconciler.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncSnapshot> {
        self.reconciler.subscribe()
    }

    /// Upload the file at `path` and start a new document session
    pub async fn open(&mut self, path: impl AsRef<Path>) -> Result<SyncSnapshot, SessionError> {
        let path = path.as_ref();
        let file = FileHandle::from_path(path).await.map_err(|source| SessionError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.open_file(file).await
    }

    pub async fn open_file(&mut self, file: FileHandle) -> Result<SyncSnapshot, SessionError> {
        let upload = self.api.upload(&file).await?;
        let filename = CanonicalFilename::new(upload.filename);

        self.revision.reset();
        self.preview_html = upload.preview;
        self.transcript = vec![ChatMessage::assistant(format!(
            "I've loaded {}. How can I help you edit it?",
            filename
        ))];
        self.filename = Some(filename.clone());

        self.reconciler.load(Some(file), filename);
        Ok(self.reconciler.reconcile().await)
    }

    /// Ask the agent to edit the open document, then refresh the preview.
    ///
    /// The revision only advances when the service acknowledges the edit.
    pub async fn send_instruction(
        &mut self,
        message: &str,
    ) -> Result<InstructionReport, SessionError> {
        let filename = self.filename.clone().ok_or(SessionError::NoDocument)?;
        self.transcript.push(ChatMessage::user(message));

        let chat = match self
            .api
            .send_message(message, &self.session_id, Some(filename.as_str()))
            .await
        {
            Ok(chat) => chat,
            Err(e) => {
                warn!(error = %e, "edit instruction failed");
                self.transcript.push(ChatMessage::assistant("Error processing request."));
                return Err(e.into());
            }
        };

        self.transcript.push(ChatMessage::assistant(chat.response.clone()));
        if let Some(preview) = chat.preview {
            self.preview_html = preview;
        }

        let revision = self.revision.acknowledge_edit();
        info!(%filename, revision, "edit acknowledged");
        self.reconciler.set_revision(revision);
        let snapshot = self.reconciler.reconcile().await;

        Ok(InstructionReport {
            response: chat.response,
            revision,
            snapshot,
        })
    }

    /// Re-run reconciliation with the current key
    pub async fn reload(&mut self) -> SyncSnapshot {
        self.reconciler.reconcile().await
    }

    /// Close the document and tear the preview down
    pub fn close(&mut self) {
        self.reconciler.close();
        self.revision.reset();
        self.filename = None;
        self.preview_html.clear();
        self.transcript.clear();
    }
}
