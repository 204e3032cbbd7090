//! Network edges: the request/response exchange and the push stream.

use futures_util::future::{self, BoxFuture};
use futures_util::stream::{self, BoxStream};
use futures_util::{FutureExt, StreamExt};
use std::time::Duration;

use crate::error::LiveError;
use crate::live::protocol::{WireRequest, WireResponse};

/// Stream of raw push messages (the `data` of each server-sent event).
pub type MessageStream = BoxStream<'static, Result<String, LiveError>>;

/// Stateless request/response exchange addressed by URL.
pub trait Transport: Send + Sync {
    fn post<'a>(
        &'a self,
        url: &'a str,
        request: &'a WireRequest,
    ) -> BoxFuture<'a, Result<WireResponse, LiveError>>;
}

/// Source of a one-way server-to-client message stream.
pub trait EventSource: Send + Sync {
    fn connect<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<MessageStream, LiveError>>;
}

/// Parse a response body. Bodies that are not JSON or lack `html` are malformed.
pub fn parse_response(body: &str) -> Result<WireResponse, LiveError> {
    serde_json::from_str(body).map_err(|e| LiveError::malformed(e.to_string()))
}

/// [`Transport`] over HTTP with `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, LiveError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(300))
            .tcp_keepalive(Duration::from_secs(60))
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn post_json(&self, url: &str, request: &WireRequest) -> Result<WireResponse, LiveError> {
        let response = self
            .client
            .post(url)
            .header("Accept", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| LiveError::transport(format!("POST {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LiveError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| LiveError::transport(format!("Failed to read response: {}", e)))?;
        parse_response(&body)
    }
}

impl Transport for HttpTransport {
    fn post<'a>(
        &'a self,
        url: &'a str,
        request: &'a WireRequest,
    ) -> BoxFuture<'a, Result<WireResponse, LiveError>> {
        self.post_json(url, request).boxed()
    }
}

/// Incremental decoder for `text/event-stream` bodies.
#[derive(Debug, Default)]
pub struct SseDecoder {
    /// Bytes of the line not yet terminated; may end inside a character.
    pending: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    /// Feed a chunk and return the messages it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut messages = Vec::new();
        self.pending.extend_from_slice(chunk);

        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let raw = String::from_utf8_lossy(&raw);
            let line = raw.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if !self.data.is_empty() {
                    messages.push(self.data.join("\n"));
                    self.data.clear();
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }
            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            if field == "data" {
                self.data.push(value.to_string());
            }
        }

        messages
    }
}

/// [`EventSource`] reading server-sent events with `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpEventSource {
    client: reqwest::Client,
}

impl HttpEventSource {
    pub fn new() -> Result<Self, LiveError> {
        let client = reqwest::Client::builder()
            .tcp_keepalive(Duration::from_secs(60))
            .build()?;
        Ok(Self { client })
    }

    async fn open(&self, url: &str) -> Result<MessageStream, LiveError> {
        let response = self
            .client
            .get(url)
            .header("Accept", "text/event-stream")
            .header("Cache-Control", "no-cache")
            .send()
            .await
            .map_err(|e| LiveError::PushChannel(format!("GET {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(LiveError::PushChannel(format!(
                "HTTP {} from {}",
                response.status().as_u16(),
                url
            )));
        }

        let messages = response
            .bytes_stream()
            .scan(SseDecoder::default(), |decoder, chunk| {
                let batch: Vec<Result<String, LiveError>> = match chunk {
                    Ok(bytes) => decoder.feed(&bytes).into_iter().map(Ok).collect(),
                    Err(e) => vec![Err(LiveError::PushChannel(e.to_string()))],
                };
                future::ready(Some(stream::iter(batch)))
            })
            .flatten();

        Ok(messages.boxed())
    }
}

impl EventSource for HttpEventSource {
    fn connect<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<MessageStream, LiveError>> {
        self.open(url).boxed()
    }
}
