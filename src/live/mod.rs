//! Live components: server-rendered fragments kept in sync with the backend.
//!
//! [`LiveRuntime`] owns a [`Page`] and turns user signals into component
//! requests. Responses are reconciled into the tree with [`morph`], emitted
//! events fan out through the broadcaster and server push feeds the same path.

pub mod binding;
pub mod broadcast;
pub mod client;
pub mod component;
pub mod morph;
pub mod page;
pub mod protocol;
pub mod push;
pub mod runtime;
pub mod scheduler;
pub mod snapshot;
pub mod storage;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use binding::{ActionCall, Binding, BindingResolver, ModelBinding, ModelMode};
pub use component::{ComponentId, ComponentRegistry, LiveComponent};
pub use morph::{morph, morph_with_stats, MorphStats};
pub use page::Page;
pub use protocol::{LiveEvent, RequestPayload, WireRequest, WireResponse};
pub use push::{PushChannel, PushState, ReconnectPolicy};
pub use runtime::{LiveRuntime, RuntimeBuilder, UiSignal};
pub use snapshot::{NavigationSignals, NavigationType, Snapshot, SnapshotManager};
pub use storage::{FileStorage, LocalStore, MemoryStorage, StorageBackend};
pub use transport::{EventSource, HttpEventSource, HttpTransport, Transport};
