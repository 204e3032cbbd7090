//! Soli Live: client runtime for server-rendered live components.
//!
//! This is the library root that exports all modules.
//!
//! - [`dom`]: arena tree, markup parser and serializer
//! - [`live`]: bindings, reconciliation, requests, broadcast, snapshots and push

pub mod config;
pub mod dom;
pub mod error;
pub mod live;
pub mod logging;

pub use config::LiveConfig;
pub use error::{BindingParseError, LiveError, LiveResult};
pub use live::{LiveRuntime, UiSignal};
