//! Incremental HTTP bodies.
//!
//! The request runs on its own thread and runtime. Body chunks cross a
//! bounded channel into a blocking [`Read`], so the record parsers pull the
//! body as they go and at most [`CHUNK_BUFFER`] chunks wait in memory.

use futures::StreamExt;
use std::io::{self, Read};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::thread;
use std::time::Duration;
use tokio::sync::oneshot;

use crate::dsl::Auth;
use crate::error::{SourceError, SourceResult};

/// Chunks buffered between the fetch thread and the reader.
pub const CHUNK_BUFFER: usize = 16;

type Chunk = Result<Vec<u8>, String>;

/// Blocking reader over a response body streamed by a fetch thread.
pub struct BodyReader {
    chunks: Receiver<Chunk>,
    current: Vec<u8>,
    offset: usize,
}

impl BodyReader {
    fn new(chunks: Receiver<Chunk>) -> Self {
        Self {
            chunks,
            current: Vec::new(),
            offset: 0,
        }
    }
}

impl Read for BodyReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.offset >= self.current.len() {
            match self.chunks.recv() {
                Ok(Ok(chunk)) => {
                    self.current = chunk;
                    self.offset = 0;
                }
                Ok(Err(message)) => return Err(io::Error::new(io::ErrorKind::Other, message)),
                // Sender dropped: end of body
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.current.len() - self.offset);
        buf[..n].copy_from_slice(&self.current[self.offset..self.offset + n]);
        self.offset += n;
        Ok(n)
    }
}

fn fetch_error(url: &str, message: String) -> SourceError {
    SourceError::Fetch {
        uri: url.to_string(),
        message,
    }
}

/// Send a GET request and return a reader over its body.
///
/// Connection errors and non-success statuses fail here; errors later in the
/// body surface as read errors.
pub async fn open_body(url: &str, auth: Option<&Auth>, timeout: Duration) -> SourceResult<BodyReader> {
    let (ready_tx, ready_rx) = oneshot::channel();
    let (chunk_tx, chunk_rx) = sync_channel(CHUNK_BUFFER);

    let fetch_url = url.to_string();
    let fetch_auth = auth.cloned();
    thread::Builder::new()
        .name("stepflow-fetch".into())
        .spawn(move || stream_body(&fetch_url, fetch_auth.as_ref(), timeout, ready_tx, chunk_tx))
        .map_err(|e| fetch_error(url, e.to_string()))?;

    match ready_rx.await {
        Ok(Ok(())) => Ok(BodyReader::new(chunk_rx)),
        Ok(Err(message)) => Err(fetch_error(url, message)),
        Err(_) => Err(fetch_error(url, "fetch thread stopped".into())),
    }
}

fn stream_body(
    url: &str,
    auth: Option<&Auth>,
    timeout: Duration,
    ready: oneshot::Sender<Result<(), String>>,
    chunks: SyncSender<Chunk>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            let _ = ready.send(Err(e.to_string()));
            return;
        }
    };

    runtime.block_on(async move {
        let response = match send(url, auth, timeout).await {
            Ok(response) => response,
            Err(message) => {
                let _ = ready.send(Err(message));
                return;
            }
        };
        if ready.send(Ok(())).is_err() {
            return;
        }

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map(|bytes| bytes.to_vec()).map_err(|e| e.to_string());
            let failed = chunk.is_err();
            // A dropped reader stops the download
            if chunks.send(chunk).is_err() || failed {
                break;
            }
        }
    });
}

async fn send(url: &str, auth: Option<&Auth>, timeout: Duration) -> Result<reqwest::Response, String> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| e.to_string())?;

    let mut request = client.get(url);
    request = match auth {
        Some(Auth::Bearer { token }) => request.bearer_auth(token),
        Some(Auth::Basic { username, password }) => request.basic_auth(username, password.as_ref()),
        Some(Auth::Header { name, value }) => request.header(name.as_str(), value.as_str()),
        None => request,
    };

    let response = request.send().await.map_err(|e| e.to_string())?;
    let status = response.status();
    if !status.is_success() {
        return Err(format!("HTTP {}", status));
    }
    Ok(response)
}
