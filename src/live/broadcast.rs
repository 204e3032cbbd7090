//! Fan-out of emitted events to subscribed components.

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tracing::{debug, warn};

use crate::live::component::{ComponentId, ComponentRegistry};
use crate::live::protocol::{LiveEvent, RequestPayload, UPDATE_URL_EVENT};
use crate::live::runtime::LiveRuntime;

/// Components subscribed to `event`, in mount order, never the source.
pub fn subscribers(registry: &ComponentRegistry, event: &str, source: Option<&str>) -> Vec<ComponentId> {
    registry
        .iter()
        .filter(|c| Some(c.id.as_str()) != source && c.subscribes_to(event))
        .map(|c| c.id.clone())
        .collect()
}

impl LiveRuntime {
    /// Deliver `events` (in order) to every subscriber other than `source`,
    /// then broadcast whatever those components emit in turn.
    pub fn broadcast(&self, events: Vec<LiveEvent>, source: Option<String>) -> BoxFuture<'_, ()> {
        self.broadcast_at(events, source, 0)
    }

    fn broadcast_at(
        &self,
        events: Vec<LiveEvent>,
        source: Option<String>,
        depth: usize,
    ) -> BoxFuture<'_, ()> {
        async move {
            if events.is_empty() {
                return;
            }
            if depth > self.config().max_broadcast_depth {
                warn!(
                    depth,
                    source = source.as_deref().unwrap_or("push"),
                    "broadcast depth exceeded; dropping {} event(s)",
                    events.len()
                );
                return;
            }

            for event in events {
                if event.name == UPDATE_URL_EVENT {
                    match event.url() {
                        Some(url) => self.with_page(|page| page.navigate(url)),
                        None => debug!("update-url event without a url"),
                    }
                    continue;
                }

                let targets =
                    self.with_page(|page| subscribers(&page.components, &event.name, source.as_deref()));
                debug!(event = %event.name, ?targets, depth, "broadcasting");

                for target in targets {
                    let outcome = self.send(&target, RequestPayload::Event(event.clone())).await;
                    match outcome {
                        Ok(induced) => {
                            self.broadcast_at(induced, Some(target), depth + 1).await;
                        }
                        Err(e) => debug!(component = %target, "event delivery failed: {}", e),
                    }
                }
            }
        }
        .boxed()
    }
}
