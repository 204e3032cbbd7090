//! When model changes are sent: per-binding timing rules plus debounce timers.

use ahash::{AHashMap, AHashSet};
use serde_json::Value as JsonValue;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::live::binding::{ModelBinding, ModelMode};

/// User interaction relevant to model bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelSignal {
    /// The value changed while typing.
    Input,
    /// The value was committed.
    Change,
    Blur,
}

/// Controls with discrete values are sent as soon as they change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    Text,
    Discrete,
}

impl ControlKind {
    pub fn of(tag: Option<&str>, input_type: Option<&str>) -> Self {
        match (tag, input_type) {
            (Some("select"), _) => Self::Discrete,
            (Some("input"), Some(t)) if t.eq_ignore_ascii_case("checkbox") || t.eq_ignore_ascii_case("radio") => {
                Self::Discrete
            }
            _ => Self::Text,
        }
    }
}

/// What to do with one signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Ignore,
    /// Remember the property changed; send later.
    MarkDirty,
    /// Send this property now.
    Send,
    /// Send every model value of the component now.
    SendBundle,
    /// (Re)start the debounce timer.
    Debounce(Duration),
}

/// The timing table. `dirty` is whether the property changed since it was
/// last sent.
pub fn decide(binding: &ModelBinding, control: ControlKind, signal: ModelSignal, dirty: bool) -> Decision {
    if control == ControlKind::Discrete {
        return match signal {
            ModelSignal::Change => Decision::Send,
            _ => Decision::Ignore,
        };
    }

    match (binding.mode, signal) {
        (ModelMode::Live | ModelMode::Debounce, ModelSignal::Input) => {
            Decision::Debounce(binding.debounce.unwrap_or_default())
        }
        (ModelMode::Live | ModelMode::Debounce, _) => Decision::Ignore,
        (ModelMode::Lazy | ModelMode::Blur, ModelSignal::Input) => Decision::MarkDirty,
        (ModelMode::Lazy, _) if dirty => Decision::Send,
        (ModelMode::Blur, ModelSignal::Blur) if dirty => Decision::SendBundle,
        _ => Decision::Ignore,
    }
}

/// (component id, property).
pub type ModelKey = (String, String);

struct Pending {
    generation: u64,
    value: JsonValue,
    timer: JoinHandle<()>,
}

/// Debounce timers and dirty flags.
#[derive(Default)]
pub struct UpdateScheduler {
    pending: AHashMap<ModelKey, Pending>,
    dirty: AHashSet<ModelKey>,
    generation: u64,
}

impl UpdateScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace any pending update for `key`. `start_timer` receives the new
    /// generation and must return the timer task.
    pub fn schedule(
        &mut self,
        key: ModelKey,
        value: JsonValue,
        start_timer: impl FnOnce(u64) -> JoinHandle<()>,
    ) {
        self.generation += 1;
        let generation = self.generation;
        if let Some(previous) = self.pending.remove(&key) {
            previous.timer.abort();
        }
        let timer = start_timer(generation);
        self.pending.insert(
            key,
            Pending {
                generation,
                value,
                timer,
            },
        );
    }

    /// Claim the value of a fired timer. `None` if it was superseded.
    pub fn fire(&mut self, key: &ModelKey, generation: u64) -> Option<JsonValue> {
        match self.pending.get(key) {
            Some(pending) if pending.generation == generation => {
                self.pending.remove(key).map(|p| p.value)
            }
            _ => None,
        }
    }

    pub fn is_pending(&self, key: &ModelKey) -> bool {
        self.pending.contains_key(key)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn mark_dirty(&mut self, key: ModelKey) {
        self.dirty.insert(key);
    }

    pub fn is_dirty(&self, key: &ModelKey) -> bool {
        self.dirty.contains(key)
    }

    pub fn mark_clean(&mut self, key: &ModelKey) {
        self.dirty.remove(key);
    }

    /// Clear the dirty flags of a component's properties.
    pub fn clear_dirty(&mut self, component: &str) {
        self.dirty.retain(|(c, _)| c != component);
    }

    pub fn cancel_component(&mut self, component: &str) {
        self.pending.retain(|(c, _), pending| {
            if c == component {
                pending.timer.abort();
                false
            } else {
                true
            }
        });
        self.clear_dirty(component);
    }

    pub fn cancel_all(&mut self) {
        for (_, pending) in self.pending.drain() {
            pending.timer.abort();
        }
        self.dirty.clear();
    }
}
