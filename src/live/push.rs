//! Server push stream with bounded reconnect.

use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::LiveConfig;
use crate::error::LiveError;
use crate::live::protocol::{LiveEvent, PushMessage};
use crate::live::transport::EventSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushState {
    Connecting,
    Open,
    Error,
    Reconnecting,
    /// Gave up (or was never opened). Only an explicit reopen leaves this state.
    Closed,
}

/// Linear backoff: attempt `n` waits `base_delay * n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    pub fn from_config(config: &LiveConfig) -> Self {
        Self {
            base_delay: config.push_reconnect_delay(),
            max_attempts: config.push_max_reconnects,
        }
    }

    /// Delay before reconnect `attempt` (1-based), or `None` past the bound.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        Some(self.base_delay * attempt)
    }
}

/// Parse one push message into an event.
pub fn parse_message(raw: &str) -> Result<LiveEvent, LiveError> {
    let message: PushMessage = serde_json::from_str(raw)?;
    Ok(message.into())
}

/// One push connection. [`PushChannel::run`] drives it until it closes.
pub struct PushChannel {
    source: Arc<dyn EventSource>,
    url: String,
    policy: ReconnectPolicy,
    state: watch::Sender<PushState>,
}

impl PushChannel {
    pub fn new(
        source: Arc<dyn EventSource>,
        url: impl Into<String>,
        policy: ReconnectPolicy,
    ) -> (Self, watch::Receiver<PushState>) {
        let (state, receiver) = watch::channel(PushState::Connecting);
        let channel = Self {
            source,
            url: url.into(),
            policy,
            state,
        };
        (channel, receiver)
    }

    fn set_state(&self, state: PushState) {
        debug!(url = %self.url, ?state, "push channel state");
        self.state.send_replace(state);
    }

    /// Connect, forward events into `sink` and reconnect on failure until the
    /// attempts run out or `sink` is closed.
    pub async fn run(self, sink: async_channel::Sender<LiveEvent>) {
        let mut attempts: u32 = 0;

        loop {
            self.set_state(PushState::Connecting);
            match self.source.connect(&self.url).await {
                Ok(mut messages) => {
                    self.set_state(PushState::Open);
                    info!(url = %self.url, "push channel open");
                    attempts = 0;

                    while let Some(message) = messages.next().await {
                        let raw = match message {
                            Ok(raw) => raw,
                            Err(e) => {
                                warn!(url = %self.url, "push channel error: {}", e);
                                break;
                            }
                        };
                        match parse_message(&raw) {
                            Ok(event) => {
                                if sink.send(event).await.is_err() {
                                    self.set_state(PushState::Closed);
                                    return;
                                }
                            }
                            Err(e) => debug!("ignoring push message: {}", e),
                        }
                    }
                }
                Err(e) => warn!(url = %self.url, "push channel error: {}", e),
            }

            self.set_state(PushState::Error);
            attempts += 1;
            let Some(delay) = self.policy.delay_for(attempts) else {
                warn!(
                    url = %self.url,
                    "push channel closed after {} reconnect attempts; reload the page to retry",
                    self.policy.max_attempts
                );
                self.set_state(PushState::Closed);
                return;
            };
            self.set_state(PushState::Reconnecting);
            debug!(attempt = attempts, ?delay, "scheduling push reconnect");
            tokio::time::sleep(delay).await;
        }
    }
}

/// A running push channel and the task forwarding its events.
pub struct PushHandle {
    state: watch::Receiver<PushState>,
    tasks: Vec<JoinHandle<()>>,
}

impl PushHandle {
    pub fn new(state: watch::Receiver<PushState>, tasks: Vec<JoinHandle<()>>) -> Self {
        Self { state, tasks }
    }

    pub fn state(&self) -> PushState {
        *self.state.borrow()
    }

    pub fn close(self) {
        for task in self.tasks {
            task.abort();
        }
    }
}
