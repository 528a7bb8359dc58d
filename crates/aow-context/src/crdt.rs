//! CRDT primitives the shared context graph composes from (§4.7). Each type
//! is a small, independently testable convergent data structure; `SharedContext`
//! uses `VectorClock` for causal comparison and leaves the others available
//! for node/edge `data` fields that want one.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Per-replica logical clock. Componentwise comparison drives conflict
/// detection in `SharedContext::apply_remote_change`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorClock(pub HashMap<String, u64>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockOrder {
    Equal,
    Dominates,
    Dominated,
    Concurrent,
}

impl VectorClock {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    pub fn get(&self, replica_id: &str) -> u64 {
        *self.0.get(replica_id).unwrap_or(&0)
    }

    /// Strictly increases this replica's own component; used before
    /// appending a local `Change`.
    pub fn increment(&mut self, replica_id: &str) -> u64 {
        let entry = self.0.entry(replica_id.to_string()).or_insert(0);
        *entry += 1;
        *entry
    }

    /// `self` dominates `other` iff componentwise `self >= other` with at
    /// least one strict `>`.
    pub fn compare(&self, other: &VectorClock) -> ClockOrder {
        let mut self_ahead = false;
        let mut other_ahead = false;

        let mut keys: Vec<&String> = self.0.keys().chain(other.0.keys()).collect();
        keys.sort();
        keys.dedup();

        for key in keys {
            let a = self.get(key);
            let b = other.get(key);
            if a > b {
                self_ahead = true;
            } else if b > a {
                other_ahead = true;
            }
        }

        match (self_ahead, other_ahead) {
            (false, false) => ClockOrder::Equal,
            (true, false) => ClockOrder::Dominates,
            (false, true) => ClockOrder::Dominated,
            (true, true) => ClockOrder::Concurrent,
        }
    }

    /// Componentwise max, applied after any conflict resolution (§4.7).
    pub fn merge(&mut self, other: &VectorClock) {
        for (replica_id, value) in &other.0 {
            let entry = self.0.entry(replica_id.clone()).or_insert(0);
            if *value > *entry {
                *entry = *value;
            }
        }
    }
}

/// `(value, ts, replicaId)`; `set` only accepts `ts >= current`, matching
/// the source's quirk of letting equal timestamps overwrite so that
/// sequential same-millisecond operations from one replica still apply
/// (§9 Open Question).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LwwRegister<T: Clone> {
    value: T,
    ts: i64,
    replica_id: String,
}

impl<T: Clone> LwwRegister<T> {
    pub fn new(value: T, ts: i64, replica_id: impl Into<String>) -> Self {
        Self { value, ts, replica_id: replica_id.into() }
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn ts(&self) -> i64 {
        self.ts
    }

    pub fn replica_id(&self) -> &str {
        &self.replica_id
    }

    /// Returns `false` without mutating when `ts < self.ts`.
    pub fn set(&mut self, value: T, ts: i64, replica_id: impl Into<String>) -> bool {
        if ts < self.ts {
            return false;
        }
        self.value = value;
        self.ts = ts;
        self.replica_id = replica_id.into();
        true
    }

    /// Merge picks the register with the greater `(ts, replicaId)`.
    pub fn merge(&mut self, other: &LwwRegister<T>) {
        if (other.ts, other.replica_id.as_str()) > (self.ts, self.replica_id.as_str()) {
            self.value = other.value.clone();
            self.ts = other.ts;
            self.replica_id = other.replica_id.clone();
        }
    }
}

/// Per-replica monotone counts; value is the sum, merge is componentwise max.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GCounter(HashMap<String, u64>);

impl GCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&mut self, replica_id: &str, amount: u64) {
        let entry = self.0.entry(replica_id.to_string()).or_insert(0);
        *entry += amount;
    }

    pub fn value(&self) -> u64 {
        self.0.values().sum()
    }

    pub fn merge(&mut self, other: &GCounter) {
        for (replica_id, count) in &other.0 {
            let entry = self.0.entry(replica_id.clone()).or_insert(0);
            if *count > *entry {
                *entry = *count;
            }
        }
    }
}

/// A pair of `GCounter`s; value is `P - N`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PnCounter {
    positive: GCounter,
    negative: GCounter,
}

impl PnCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&mut self, replica_id: &str, amount: u64) {
        self.positive.increment(replica_id, amount);
    }

    pub fn decrement(&mut self, replica_id: &str, amount: u64) {
        self.negative.increment(replica_id, amount);
    }

    pub fn value(&self) -> i64 {
        self.positive.value() as i64 - self.negative.value() as i64
    }

    pub fn merge(&mut self, other: &PnCounter) {
        self.positive.merge(&other.positive);
        self.negative.merge(&other.negative);
    }
}

/// Each `add` tags the element with a unique `(replicaId, uuid)`; `remove`
/// marks matching tags deleted; merge unions tags, preserving deletions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrSet<T: Clone + Eq + std::hash::Hash> {
    tags: HashMap<(String, uuid::Uuid), (T, bool)>,
}

impl<T: Clone + Eq + std::hash::Hash> OrSet<T> {
    pub fn new() -> Self {
        Self { tags: HashMap::new() }
    }

    pub fn add(&mut self, value: T, replica_id: &str, tag: uuid::Uuid) {
        self.tags.insert((replica_id.to_string(), tag), (value, false));
    }

    /// Marks every live tag currently carrying `value` as deleted.
    pub fn remove(&mut self, value: &T) {
        for (stored, deleted) in self.tags.values_mut() {
            if stored == value {
                *deleted = true;
            }
        }
    }

    pub fn contains(&self, value: &T) -> bool {
        self.tags.values().any(|(v, deleted)| v == value && !*deleted)
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.tags.values().filter(|(_, deleted)| !*deleted).map(|(v, _)| v)
    }

    pub fn merge(&mut self, other: &OrSet<T>) {
        for (tag, (value, deleted)) in &other.tags {
            match self.tags.get_mut(tag) {
                Some((_, existing_deleted)) => *existing_deleted = *existing_deleted || *deleted,
                None => {
                    self.tags.insert(tag.clone(), (value.clone(), *deleted));
                }
            }
        }
    }
}

/// Per-key `LWWRegister` of `(value, deleted)`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LwwMap<T: Clone> {
    entries: HashMap<String, LwwRegister<(T, bool)>>,
}

impl<T: Clone> LwwMap<T> {
    pub fn new() -> Self {
        Self { entries: HashMap::new() }
    }

    pub fn set(&mut self, key: &str, value: T, ts: i64, replica_id: &str) {
        match self.entries.get_mut(key) {
            Some(reg) => {
                reg.set((value, false), ts, replica_id);
            }
            None => {
                self.entries.insert(key.to_string(), LwwRegister::new((value, false), ts, replica_id));
            }
        }
    }

    pub fn delete(&mut self, key: &str, ts: i64, replica_id: &str) {
        if let Some(reg) = self.entries.get_mut(key) {
            let existing = reg.get().0.clone();
            reg.set((existing, true), ts, replica_id);
        }
    }

    pub fn get(&self, key: &str) -> Option<&T> {
        self.entries.get(key).and_then(|reg| {
            let (value, deleted) = reg.get();
            if *deleted {
                None
            } else {
                Some(value)
            }
        })
    }

    pub fn merge(&mut self, other: &LwwMap<T>) {
        for (key, reg) in &other.entries {
            match self.entries.get_mut(key) {
                Some(existing) => existing.merge(reg),
                None => {
                    self.entries.insert(key.clone(), reg.clone());
                }
            }
        }
    }
}
