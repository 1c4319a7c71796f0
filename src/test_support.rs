//! Fakes shared by the unit tests.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Url;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::excel::{CellValue, ColumnInfo, DecoderError, Sheet, SheetDecoder};
use crate::sync::{
    CanonicalFilename, DocumentFetcher, FetchedDocument, TransportFailure, XLSX_MIME_TYPE,
};

#[derive(Default)]
struct Script {
    responses: HashMap<u64, Result<FetchedDocument, TransportFailure>>,
    delays: HashMap<u64, Duration>,
    calls: Vec<(String, u64)>,
}

/// Fetcher answering from a per-revision script
#[derive(Clone, Default)]
pub struct ScriptedFetcher {
    script: Arc<Mutex<Script>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, revision: u64, status: u16, body: &str) -> Self {
        self.set_response(revision, status, body.as_bytes().to_vec());
        self
    }

    pub fn respond_bytes(self, revision: u64, status: u16, body: Vec<u8>) -> Self {
        self.set_response(revision, status, body);
        self
    }

    pub fn fail(self, revision: u64, failure: TransportFailure) -> Self {
        self.script.lock().unwrap().responses.insert(revision, Err(failure));
        self
    }

    pub fn delay(self, revision: u64, delay: Duration) -> Self {
        self.script.lock().unwrap().delays.insert(revision, delay);
        self
    }

    pub fn set_response(&self, revision: u64, status: u16, body: Vec<u8>) {
        self.script.lock().unwrap().responses.insert(
            revision,
            Ok(FetchedDocument {
                status,
                content_type: Some(XLSX_MIME_TYPE.to_string()),
                body: Bytes::from(body),
            }),
        );
    }

    pub fn calls(&self) -> Vec<(String, u64)> {
        self.script.lock().unwrap().calls.clone()
    }
}

#[async_trait]
impl DocumentFetcher for ScriptedFetcher {
    async fn fetch(
        &self,
        filename: &CanonicalFilename,
        revision: u64,
    ) -> Result<FetchedDocument, TransportFailure> {
        let (response, delay) = {
            let mut script = self.script.lock().unwrap();
            script.calls.push((filename.to_string(), revision));
            (
                script.responses.get(&revision).cloned(),
                script.delays.get(&revision).copied(),
            )
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        response.unwrap_or_else(|| Err(TransportFailure::Request("connection refused".to_string())))
    }
}

/// Decoder reading bytes as a comma-separated list of sheet names.
///
/// Empty input yields no sheets; input starting with `!` aborts with the
/// remainder as the diagnostic.
#[derive(Clone, Copy, Default)]
pub struct StubDecoder;

#[async_trait]
impl SheetDecoder for StubDecoder {
    async fn decode(&self, bytes: Bytes) -> Result<Vec<Sheet>, DecoderError> {
        let text = String::from_utf8_lossy(&bytes).into_owned();
        if let Some(diagnostic) = text.strip_prefix('!') {
            return Err(DecoderError::new(diagnostic));
        }

        Ok(text
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .enumerate()
            .map(|(index, name)| stub_sheet(index as u32, name))
            .collect())
    }
}

pub fn stub_sheet(index: u32, name: &str) -> Sheet {
    Sheet {
        name: name.to_string(),
        index,
        rows: vec![vec![CellValue::String(name.to_string())]],
        columns: vec![ColumnInfo {
            index: 0,
            name: "A".to_string(),
            header: Some(name.to_string()),
            data_type: Some("string".to_string()),
        }],
    }
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub request_line: String,
    pub head: String,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Throwaway HTTP/1.1 server replying with canned responses in order.
///
/// The last response repeats once the list runs out.
pub struct TestServer {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl TestServer {
    pub fn url(&self) -> Url {
        Url::parse(&format!("http://{}/", self.addr)).unwrap()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_lines(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.request_line).collect()
    }
}

pub async fn serve(responses: Vec<(u16, Vec<u8>)>) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));

    let recorded = requests.clone();
    tokio::spawn(async move {
        let mut served = 0usize;
        while let Ok((stream, _)) = listener.accept().await {
            let (status, body) = responses[served.min(responses.len() - 1)].clone();
            served += 1;
            handle_connection(stream, status, &body, &recorded).await;
        }
    });

    TestServer { addr, requests }
}

async fn handle_connection(
    mut stream: TcpStream,
    status: u16,
    body: &[u8],
    recorded: &Mutex<Vec<RecordedRequest>>,
) -> Option<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let head_end = loop {
        if let Some(pos) = find(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let lower = head.to_lowercase();
    let content_length = lower
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok());
    let chunked = lower.contains("transfer-encoding: chunked");

    loop {
        let body_len = buf.len() - head_end;
        let complete = match content_length {
            Some(len) => body_len >= len,
            None if chunked => buf.ends_with(b"0\r\n\r\n"),
            None => true,
        };
        if complete {
            break;
        }
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    // Record before replying so the client never observes a response first
    recorded.lock().unwrap().push(RecordedRequest {
        request_line: head.lines().next().unwrap_or_default().to_string(),
        head: head.clone(),
        body: buf[head_end..].to_vec(),
    });

    let content_type = if body.starts_with(b"{") {
        "application/json"
    } else {
        XLSX_MIME_TYPE
    };
    let response_head = format!(
        "HTTP/1.1 {} Canned\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        content_type,
        body.len()
    );
    stream.write_all(response_head.as_bytes()).await.ok()?;
    stream.write_all(body).await.ok()?;
    stream.shutdown().await.ok()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
