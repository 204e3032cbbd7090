//! In-process transports for tests.

use futures_util::future::{self, BoxFuture};
use futures_util::stream;
use futures_util::{FutureExt, StreamExt};
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::time::Instant;

use crate::error::LiveError;
use crate::live::protocol::{WireRequest, WireResponse};
use crate::live::transport::{EventSource, MessageStream, Transport};

type Responder = Box<dyn Fn(&str, &WireRequest) -> Result<WireResponse, LiveError> + Send + Sync>;

/// Records every request and answers with a closure.
pub struct ScriptedTransport {
    requests: Mutex<Vec<(String, WireRequest)>>,
    respond: Responder,
}

impl ScriptedTransport {
    pub fn new(
        respond: impl Fn(&str, &WireRequest) -> Result<WireResponse, LiveError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            respond: Box::new(respond),
        }
    }

    pub fn requests(&self) -> Vec<(String, WireRequest)> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests whose URL ends with `/<component>`.
    pub fn requests_to(&self, component: &str) -> Vec<WireRequest> {
        let suffix = format!("/{}", component);
        self.requests()
            .into_iter()
            .filter(|(url, _)| url.ends_with(&suffix))
            .map(|(_, request)| request)
            .collect()
    }
}

impl Transport for ScriptedTransport {
    fn post<'a>(
        &'a self,
        url: &'a str,
        request: &'a WireRequest,
    ) -> BoxFuture<'a, Result<WireResponse, LiveError>> {
        self.requests
            .lock()
            .unwrap()
            .push((url.to_string(), request.clone()));
        future::ready((self.respond)(url, request)).boxed()
    }
}

/// Outcome of one scripted connect.
pub enum Connect {
    Fail,
    /// Deliver the messages, then stay open.
    Open(Vec<String>),
    /// Deliver the messages, then error.
    OpenThenFail(Vec<String>),
}

/// Plays back connects in order; fails once the script runs out.
pub struct ScriptedEventSource {
    script: Mutex<VecDeque<Connect>>,
    attempts: Mutex<Vec<Instant>>,
}

impl ScriptedEventSource {
    pub fn new(script: Vec<Connect>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            attempts: Mutex::new(Vec::new()),
        }
    }

    pub fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().clone()
    }
}

impl EventSource for ScriptedEventSource {
    fn connect<'a>(&'a self, _url: &'a str) -> BoxFuture<'a, Result<MessageStream, LiveError>> {
        self.attempts.lock().unwrap().push(Instant::now());
        let next = self.script.lock().unwrap().pop_front();
        let result: Result<MessageStream, LiveError> = match next {
            None | Some(Connect::Fail) => Err(LiveError::PushChannel("connection refused".to_string())),
            Some(Connect::Open(messages)) => Ok(stream::iter(messages.into_iter().map(Ok))
                .chain(stream::pending())
                .boxed()),
            Some(Connect::OpenThenFail(messages)) => Ok(stream::iter(messages.into_iter().map(Ok))
                .chain(stream::once(future::ready(Err(LiveError::PushChannel(
                    "stream reset".to_string(),
                )))))
                .boxed()),
        };
        future::ready(result).boxed()
    }
}
