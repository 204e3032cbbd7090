//! The runtime instance: owns the page, timers and push channel, and routes
//! user signals to requests.

use serde_json::Value as JsonValue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::LiveConfig;
use crate::dom::NodeId;
use crate::error::LiveError;
use crate::live::binding::{
    collect_modal_fields, key_matches, ActionCall, Binding, BindingResolver, REFRESH_ACTION,
    SET_ACTION,
};
use crate::live::client;
use crate::live::component::{ComponentId, ScanReport};
use crate::live::page::Page;
use crate::live::protocol::{LiveEvent, RequestPayload};
use crate::live::push::{PushChannel, PushHandle, PushState, ReconnectPolicy};
use crate::live::scheduler::{decide, ControlKind, Decision, ModelKey, ModelSignal, UpdateScheduler};
use crate::live::snapshot::{NavigationSignals, SnapshotManager};
use crate::live::storage::{MemoryStorage, StorageBackend};
use crate::live::transport::{EventSource, HttpEventSource, HttpTransport, Transport};

/// A user interaction, addressed to the node it happened on.
#[derive(Debug, Clone, PartialEq)]
pub enum UiSignal {
    Click(NodeId),
    /// The control's value was edited to `value`.
    Input { node: NodeId, value: String },
    /// The control's value was committed.
    Change(NodeId),
    Focus(NodeId),
    Blur(NodeId),
    KeyDown { node: NodeId, key: String },
    Submit(NodeId),
}

struct Inner {
    config: LiveConfig,
    transport: Arc<dyn Transport>,
    event_source: Option<Arc<dyn EventSource>>,
    snapshots: SnapshotManager,
    page: Mutex<Page>,
    scheduler: Mutex<UpdateScheduler>,
    push: Mutex<Option<PushHandle>>,
    running: AtomicBool,
}

/// Cheap to clone; clones share one runtime.
#[derive(Clone)]
pub struct LiveRuntime {
    inner: Arc<Inner>,
}

/// Wires a [`LiveRuntime`] to its transports and storage.
pub struct RuntimeBuilder {
    config: LiveConfig,
    transport: Option<Arc<dyn Transport>>,
    event_source: Option<Arc<dyn EventSource>>,
    session_storage: Option<Arc<dyn StorageBackend>>,
}

impl RuntimeBuilder {
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn event_source(mut self, source: Arc<dyn EventSource>) -> Self {
        self.event_source = Some(source);
        self
    }

    pub fn session_storage(mut self, storage: Arc<dyn StorageBackend>) -> Self {
        self.session_storage = Some(storage);
        self
    }

    /// Missing transports default to HTTP; storage defaults to memory.
    pub fn build(self) -> Result<LiveRuntime, LiveError> {
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(self.config.request_timeout())?),
        };
        let event_source = match self.event_source {
            Some(source) => Some(source),
            None if self.config.disable_sse => None,
            None => Some(Arc::new(HttpEventSource::new()?) as Arc<dyn EventSource>),
        };
        let storage = self
            .session_storage
            .unwrap_or_else(|| Arc::new(MemoryStorage::new()));
        let resolver = BindingResolver::new(self.config.model_debounce());

        Ok(LiveRuntime {
            inner: Arc::new(Inner {
                config: self.config,
                transport,
                event_source,
                snapshots: SnapshotManager::new(storage),
                page: Mutex::new(Page::new(resolver)),
                scheduler: Mutex::new(UpdateScheduler::new()),
                push: Mutex::new(None),
                running: AtomicBool::new(false),
            }),
        })
    }
}

impl LiveRuntime {
    pub fn builder(config: LiveConfig) -> RuntimeBuilder {
        RuntimeBuilder {
            config,
            transport: None,
            event_source: None,
            session_storage: None,
        }
    }

    /// Runtime speaking HTTP to `config.endpoint`.
    pub fn http(config: LiveConfig) -> Result<Self, LiveError> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &LiveConfig {
        &self.inner.config
    }

    pub fn snapshots(&self) -> &SnapshotManager {
        &self.inner.snapshots
    }

    fn page(&self) -> MutexGuard<'_, Page> {
        self.inner.page.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn scheduler(&self) -> MutexGuard<'_, UpdateScheduler> {
        self.inner.scheduler.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `f` with the page locked. Do not call back into the runtime from `f`.
    pub fn with_page<R>(&self, f: impl FnOnce(&mut Page) -> R) -> R {
        f(&mut self.page())
    }

    /// Replace the page with `markup` served at `url`.
    pub fn load(&self, url: &str, markup: &str) -> ScanReport {
        self.scheduler().cancel_all();
        let report = self.with_page(|page| page.load(url, markup));
        info!(url, components = report.mounted.len(), "page loaded");
        report
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Start handling signals and open the push channel unless disabled.
    /// Outside a Tokio runtime the push channel is not opened.
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let report = self.with_page(|page| {
            let root = page.document.root();
            page.reattach(root)
        });
        debug!(mounted = report.mounted.len(), "runtime started");
        if !self.inner.config.disable_sse {
            self.open_push();
        }
    }

    /// Cancel timers, close the push channel and ignore further signals.
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.scheduler().cancel_all();
        self.close_push();
        debug!("runtime stopped");
    }

    pub fn push_state(&self) -> Option<PushState> {
        self.push_slot().as_ref().map(|handle| handle.state())
    }

    /// Close any push channel and connect a fresh one.
    pub fn reopen_push(&self) {
        self.close_push();
        self.open_push();
    }

    fn push_slot(&self) -> MutexGuard<'_, Option<PushHandle>> {
        self.inner.push.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn open_push(&self) {
        let Some(source) = self.inner.event_source.clone() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            error!("push channel needs a Tokio runtime; not opened");
            return;
        };
        let url = self.inner.config.push_url();
        let policy = ReconnectPolicy::from_config(&self.inner.config);
        let (channel, state) = PushChannel::new(source, url, policy);
        let (sender, receiver) = async_channel::unbounded::<LiveEvent>();

        let channel_task = handle.spawn(channel.run(sender));
        // Weak so a dropped runtime is not kept alive by its own push task.
        let runtime: Weak<Inner> = Arc::downgrade(&self.inner);
        let forward_task = handle.spawn(async move {
            while let Ok(event) = receiver.recv().await {
                let Some(inner) = runtime.upgrade() else {
                    break;
                };
                LiveRuntime { inner }.broadcast(vec![event], None).await;
            }
        });

        *self.push_slot() = Some(PushHandle::new(state, vec![channel_task, forward_task]));
    }

    fn close_push(&self) {
        if let Some(handle) = self.push_slot().take() {
            handle.close();
        }
    }

    /// Send `payload` to a component and reconcile it with the response.
    /// Returns the events the response carried.
    pub async fn send(
        &self,
        component_id: &str,
        payload: RequestPayload,
    ) -> Result<Vec<LiveEvent>, LiveError> {
        let (request, seq) =
            self.with_page(|page| client::begin_request(page, component_id, payload))?;
        let url = self.inner.config.component_url(component_id);
        debug!(component = %component_id, seq, "sending request");

        let result = self.inner.transport.post(&url, &request).await;

        let applied = self.with_page(|page| {
            let outcome =
                result.and_then(|response| client::apply_response(page, component_id, seq, response));
            client::finish_request(page, component_id);
            outcome
        })?;
        self.forget(&applied.report.unmounted);
        Ok(applied.events)
    }

    /// Drop pending timers and dirty flags of components that left the page.
    fn forget(&self, unmounted: &[ComponentId]) {
        if unmounted.is_empty() {
            return;
        }
        let mut scheduler = self.scheduler();
        for id in unmounted {
            scheduler.cancel_component(id);
        }
        debug!(?unmounted, "components unmounted");
    }

    /// [`send`](Self::send), then broadcast what came back. Failures are logged.
    pub async fn request(&self, component_id: &str, payload: RequestPayload) {
        match self.send(component_id, payload).await {
            Ok(events) => {
                self.broadcast(events, Some(component_id.to_string()))
                    .await
            }
            Err(e @ LiveError::MalformedResponse(_)) => {
                error!(component = %component_id, "{}", e)
            }
            Err(e) => warn!(component = %component_id, "request failed: {}", e),
        }
    }

    /// Route a user signal. Ignored while the runtime is stopped.
    pub async fn dispatch(&self, signal: UiSignal) {
        if !self.is_running() {
            debug!(?signal, "runtime stopped; signal ignored");
            return;
        }
        match signal {
            UiSignal::Click(node) => self.on_click(node).await,
            UiSignal::Input { node, value } => {
                self.with_page(|page| page.document.set_value(node, &value));
                self.on_model_signal(node, ModelSignal::Input).await;
            }
            UiSignal::Change(node) => {
                self.on_model_signal(node, ModelSignal::Change).await;
                self.on_listener(node, "change", None).await;
            }
            UiSignal::Focus(node) => self.with_page(|page| page.document.focus(node)),
            UiSignal::Blur(node) => {
                self.on_model_signal(node, ModelSignal::Blur).await;
                self.with_page(|page| {
                    if page.document.focused() == Some(node) {
                        page.document.blur();
                    }
                });
            }
            UiSignal::KeyDown { node, key } => self.on_listener(node, "keydown", Some(&key)).await,
            UiSignal::Submit(node) => self.on_listener(node, "submit", None).await,
        }
    }

    pub async fn click(&self, node: NodeId) {
        self.dispatch(UiSignal::Click(node)).await
    }

    pub async fn input(&self, node: NodeId, value: &str) {
        self.dispatch(UiSignal::Input {
            node,
            value: value.to_string(),
        })
        .await
    }

    pub async fn change(&self, node: NodeId) {
        self.dispatch(UiSignal::Change(node)).await
    }

    pub async fn blur(&self, node: NodeId) {
        self.dispatch(UiSignal::Blur(node)).await
    }

    pub async fn keydown(&self, node: NodeId, key: &str) {
        self.dispatch(UiSignal::KeyDown {
            node,
            key: key.to_string(),
        })
        .await
    }

    pub async fn submit(&self, node: NodeId) {
        self.dispatch(UiSignal::Submit(node)).await
    }

    async fn on_click(&self, node: NodeId) {
        let target = self.with_page(|page| {
            let (bound, call) = page.nearest(node, |b| match b {
                Binding::Action(call) => Some(call.clone()),
                _ => None,
            })?;
            action_target(page, bound, call)
        });
        if let Some((component, payload)) = target {
            self.request(&component, payload).await;
        }
    }

    async fn on_listener(&self, node: NodeId, event: &str, key: Option<&str>) {
        let target = self.with_page(|page| {
            let (bound, call) = page.nearest(node, |b| match b {
                Binding::EventListener {
                    event: bound_event,
                    key: filter,
                    action,
                } if bound_event == event && key.map_or(true, |k| key_matches(filter.as_deref(), k)) => {
                    Some(action.clone())
                }
                _ => None,
            })?;
            action_target(page, bound, call)
        });
        if let Some((component, payload)) = target {
            self.request(&component, payload).await;
        }
    }

    async fn on_model_signal(&self, node: NodeId, signal: ModelSignal) {
        let plan = self.with_page(|page| {
            let binding = page.model_binding(node)?;
            let component = page.owner(node)?;
            let kind = ControlKind::of(page.document.tag(node), page.document.attr(node, "type"));
            let value = page.model_value(node);
            Some((binding, component, kind, value))
        });
        let Some((binding, component, kind, value)) = plan else {
            return;
        };

        let key: ModelKey = (component.clone(), binding.property.clone());
        let decision = {
            let scheduler = self.scheduler();
            decide(&binding, kind, signal, scheduler.is_dirty(&key))
        };
        debug!(component = %component, property = %binding.property, ?signal, ?decision, "model signal");

        match decision {
            Decision::Ignore => {}
            Decision::MarkDirty => {
                self.scheduler().mark_dirty(key);
            }
            Decision::Send => {
                self.scheduler().mark_clean(&key);
                self.request(&component, RequestPayload::model(binding.property, value))
                    .await;
            }
            Decision::SendBundle => {
                self.scheduler().clear_dirty(&component);
                let models = self.with_page(|page| page.model_values(&component));
                self.request(&component, RequestPayload::Models(models)).await;
            }
            Decision::Debounce(delay) => self.schedule_debounce(key, value, delay),
        }
    }

    fn schedule_debounce(&self, key: ModelKey, value: JsonValue, delay: Duration) {
        let runtime = self.clone();
        let timer_key = key.clone();
        self.scheduler().schedule(key, value, move |generation| {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                runtime.fire_debounce(timer_key, generation);
            })
        });
    }

    fn fire_debounce(&self, key: ModelKey, generation: u64) {
        let Some(value) = self.scheduler().fire(&key, generation) else {
            return;
        };
        // Own task: aborting a superseded timer must not cut a request short.
        let runtime = self.clone();
        tokio::spawn(async move {
            let (component, property) = key;
            runtime
                .request(&component, RequestPayload::model(property, value))
                .await;
        });
    }

    /// Save every component's markup for the current URL.
    pub fn teardown(&self) -> bool {
        if self.inner.config.disable_snapshot {
            return false;
        }
        let (url, markup) = self.with_page(|page| (page.url().to_string(), page.component_markup()));
        self.inner.snapshots.save(&url, markup);
        true
    }

    /// Reconcile components against the snapshot for the current URL when
    /// the page was reached through history. Returns how many were restored.
    pub fn restore(&self, signals: &NavigationSignals) -> usize {
        if self.inner.config.disable_snapshot {
            return 0;
        }
        let url = self.with_page(|page| page.url().to_string());
        let Some(snapshot) = self.inner.snapshots.restorable(&url, signals) else {
            return 0;
        };

        let (restored, unmounted) = self.with_page(|page| {
            let mut restored = 0;
            let mut unmounted = Vec::new();
            for id in page.components.ids() {
                let Some(markup) = snapshot.components.get(&id) else {
                    continue;
                };
                let Some(root) = page.components.get(&id).map(|c| c.root) else {
                    continue;
                };
                match client::reconcile(page, root, markup) {
                    Ok((_, report)) => {
                        restored += 1;
                        unmounted.extend(report.unmounted);
                    }
                    Err(e) => warn!(component = %id, "snapshot restore failed: {}", e),
                }
            }
            (restored, unmounted)
        });
        self.forget(&unmounted);
        info!(url = %url, restored, "snapshot restored");
        restored
    }
}

/// Owning component and request payload for an action bound on `bound`.
fn action_target(page: &Page, bound: NodeId, call: ActionCall) -> Option<(String, RequestPayload)> {
    let component = page.owner(bound)?;
    let modal = call
        .collect_modal
        .then(|| collect_modal_fields(&page.document, bound));
    let payload = action_payload(call, modal)?;
    Some((component, payload))
}

/// Map an action call onto a request. `$refresh` and `$set` are handled
/// client-side.
pub fn action_payload(
    call: ActionCall,
    modal: Option<serde_json::Map<String, JsonValue>>,
) -> Option<RequestPayload> {
    match call.method.as_str() {
        REFRESH_ACTION => Some(RequestPayload::Refresh),
        SET_ACTION => {
            let payload = client::set_payload(&call.args);
            if payload.is_none() {
                debug!(args = ?call.args, "$set needs a property name");
            }
            payload
        }
        _ => {
            let mut args = call.args;
            if let Some(fields) = modal {
                args.push(JsonValue::Object(fields));
            }
            Some(RequestPayload::action(call.method, args))
        }
    }
}
