//! Shared Context Core (§4.7): a CRDT-replicated labeled graph that
//! multiple workflow participants mutate concurrently.

pub mod crdt;
pub mod shared_context;

pub use crdt::{ClockOrder, GCounter, LwwMap, LwwRegister, OrSet, PnCounter, VectorClock};
pub use shared_context::{
    AccessEntry, AccessLevel, Change, ChangeType, ConflictRecord, ConflictResolution,
    ConflictStatus, Edge, Node, Presence, PresenceState, SharedContext, TargetType, Visibility,
};
