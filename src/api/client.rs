use reqwest::multipart::{Form, Part};
use reqwest::{Response, Url};
use std::time::Duration;
use tracing::{debug, info};

use super::types::*;
use crate::sync::FileHandle;

/// Client for the upload and chat endpoints
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: Url,
}

impl ApiClient {
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, ApiError> {
        if base_url.cannot_be_a_base() {
            return Err(ApiError::InvalidUrl(base_url.to_string()));
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }

    fn endpoint(&self, segment: &str) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .push(segment);
        Ok(url)
    }

    /// Check that the backend answers on `GET /`
    pub async fn health(&self) -> Result<bool, ApiError> {
        let response = self.client.get(self.base_url.clone()).send().await?;
        Ok(response.status().is_success())
    }

    /// Upload a document as multipart form field `file`
    pub async fn upload(&self, file: &FileHandle) -> Result<UploadResponse, ApiError> {
        let part = Part::bytes(file.bytes().to_vec())
            .file_name(file.name().to_string())
            .mime_str(file.mime_type())?;
        let form = Form::new().part("file", part);

        debug!(file = file.name(), byte_len = file.byte_length(), "uploading document");
        let response = self
            .client
            .post(self.endpoint("upload")?)
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let (status, body) = failure_parts(response).await;
            return Err(ApiError::UploadFailed { status, body });
        }

        let upload: UploadResponse = response.json().await?;
        info!(file = file.name(), canonical = %upload.filename, "document uploaded");
        Ok(upload)
    }

    /// Send an edit instruction for `filename` to the agent
    pub async fn send_message(
        &self,
        message: &str,
        session_id: &str,
        filename: Option<&str>,
    ) -> Result<ChatResponse, ApiError> {
        let request = ChatRequest {
            message: message.to_string(),
            session_id: session_id.to_string(),
            filename: filename.map(|f| f.to_string()),
        };

        let response = self
            .client
            .post(self.endpoint("chat")?)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let (status, body) = failure_parts(response).await;
            return Err(ApiError::ChatFailed { status, body });
        }

        let mut chat: ChatResponse = response.json().await?;
        // The server sends an empty string when there is nothing to preview
        chat.preview = chat.preview.filter(|p| !p.is_empty());
        Ok(chat)
    }
}

async fn failure_parts(response: Response) -> (u16, String) {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    (status, body)
}
