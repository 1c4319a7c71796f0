use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Url;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::policy::should_fetch;
use super::types::*;

/// Raw response from the document fetch service, before validation
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

/// Reads the current bytes of a named document.
///
/// `revision` is only a cache-busting token; the service always answers
/// with its current copy.
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch(
        &self,
        filename: &CanonicalFilename,
        revision: u64,
    ) -> Result<FetchedDocument, TransportFailure>;
}

/// `GET /files/{filename}?v={revision}` over HTTP
#[derive(Debug, Clone)]
pub struct HttpDocumentFetcher {
    client: reqwest::Client,
    base_url: Url,
    timeout: Duration,
}

impl HttpDocumentFetcher {
    pub fn new(base_url: Url, timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    pub fn document_url(
        &self,
        filename: &CanonicalFilename,
        revision: u64,
    ) -> Result<Url, TransportFailure> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| {
                    TransportFailure::Request(format!("invalid base URL: {}", self.base_url))
                })?;
            segments.pop_if_empty().push("files").push(filename.as_str());
        }
        url.query_pairs_mut().append_pair("v", &revision.to_string());
        Ok(url)
    }
}

#[async_trait]
impl DocumentFetcher for HttpDocumentFetcher {
    async fn fetch(
        &self,
        filename: &CanonicalFilename,
        revision: u64,
    ) -> Result<FetchedDocument, TransportFailure> {
        let url = self.document_url(filename, revision)?;
        debug!(%url, "fetching document");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let body = response.bytes().await.map_err(|e| self.transport_error(e))?;

        Ok(FetchedDocument {
            status,
            content_type,
            body,
        })
    }
}

impl HttpDocumentFetcher {
    fn transport_error(&self, e: reqwest::Error) -> TransportFailure {
        if e.is_timeout() {
            TransportFailure::Timeout(self.timeout)
        } else {
            TransportFailure::Request(e.to_string())
        }
    }
}

/// Where the bytes of a pass came from
#[derive(Debug, Clone, PartialEq)]
pub enum BytesSource {
    /// The local copy is current, no request was made
    Local,
    Fetched,
    /// The fetch failed and the last known-good bytes stand in.
    ///
    /// `advisory` is set when an edit was expected to have landed, so the
    /// user must be told they are looking at the pre-edit version.
    Fallback {
        failure: TransportFailure,
        advisory: bool,
    },
}

impl BytesSource {
    pub fn tag(&self) -> &'static str {
        match self {
            BytesSource::Local => "used-local",
            BytesSource::Fetched => "fetched",
            BytesSource::Fallback { .. } => "fallback",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedBytes {
    pub handle: FileHandle,
    pub source: BytesSource,
}

/// Pick the bytes to decode for `key`.
///
/// Fetches only when the staleness policy asks for it (or nothing is held
/// locally). A failed fetch is never retried; it falls back to `local` when
/// there is one and is returned as an error otherwise.
pub async fn resolve_bytes<F>(
    fetcher: &F,
    local: Option<&FileHandle>,
    key: &SyncKey,
    fetch_timeout: Duration,
) -> Result<ResolvedBytes, TransportFailure>
where
    F: DocumentFetcher + ?Sized,
{
    if let Some(local) = local {
        if !should_fetch(local.name(), key.filename.as_str(), key.revision) {
            debug!(%key, file = local.name(), "local copy is current");
            return Ok(ResolvedBytes {
                handle: local.clone(),
                source: BytesSource::Local,
            });
        }
    }

    let failure = match fetch_validated(fetcher, key, fetch_timeout).await {
        Ok(handle) => {
            info!(
                %key,
                byte_len = handle.byte_length(),
                checksum = handle.checksum(),
                "fetched document"
            );
            return Ok(ResolvedBytes {
                handle,
                source: BytesSource::Fetched,
            });
        }
        Err(failure) => failure,
    };

    let Some(local) = local else {
        warn!(%key, error = %failure, "fetch failed with no local copy to fall back to");
        return Err(failure);
    };

    let advisory = key.revision > 0;
    if advisory {
        warn!(%key, error = %failure, "fetch after edit failed, showing previous version");
    } else {
        debug!(%key, error = %failure, "fetch of converted document failed, using local copy");
    }

    Ok(ResolvedBytes {
        handle: local.clone(),
        source: BytesSource::Fallback { failure, advisory },
    })
}

async fn fetch_validated<F>(
    fetcher: &F,
    key: &SyncKey,
    fetch_timeout: Duration,
) -> Result<FileHandle, TransportFailure>
where
    F: DocumentFetcher + ?Sized,
{
    let document = tokio::time::timeout(fetch_timeout, fetcher.fetch(&key.filename, key.revision))
        .await
        .map_err(|_| TransportFailure::Timeout(fetch_timeout))??;

    if !(200..300).contains(&document.status) {
        return Err(TransportFailure::Status(document.status));
    }
    if document.body.is_empty() {
        return Err(TransportFailure::EmptyBody);
    }

    let mime_type = document
        .content_type
        .unwrap_or_else(|| mime_type_for(key.filename.as_str()).to_string());

    Ok(FileHandle::with_mime_type(
        key.filename.as_str(),
        mime_type,
        document.body,
    ))
}
