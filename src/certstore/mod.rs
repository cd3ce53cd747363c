//! # Certificate Registry
//!
//! Durable, watched store of issued certificates. Records live as JSON files
//! in one directory; the registry mirrors them in memory and announces every
//! change on a bounded event stream.

pub mod registry;
pub mod store;
pub mod watcher;

pub use registry::{CertificateRegistry, RegistryEvent};
pub use store::RecordStore;
pub use watcher::RegistryWatcher;
