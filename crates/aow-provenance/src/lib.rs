//! aow-provenance: `TraceStore` and `CheckpointStore` collaborator
//! implementations (§4.3, §6).

pub mod checkpoint_store;
pub mod trace_store;

pub use checkpoint_store::InMemoryCheckpointStore;
pub use trace_store::{FileTraceStore, InMemoryTraceStore};
