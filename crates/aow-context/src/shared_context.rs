//! `SharedContext`: a CRDT-replicated labeled graph (§4.7). One in-process
//! replica's view of the graph, its access list, change log, and conflicts;
//! multiple replicas converge by exchanging `Change`s through
//! `apply_remote_change`.

use std::collections::HashMap;

use aow_core::{AowError, AowResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::crdt::{ClockOrder, VectorClock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    Read,
    Write,
    Admin,
    Owner,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessEntry {
    pub broker_id: String,
    pub level: AccessLevel,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl AccessEntry {
    fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|exp| exp > now).unwrap_or(true)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub node_type: String,
    pub data: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: String,
    pub version: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub edge_type: String,
    pub data: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: String,
    pub version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Add,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    Node,
    Edge,
    Metadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Change {
    pub id: Uuid,
    pub context_id: Uuid,
    pub replica_id: String,
    pub broker_id: String,
    pub change_type: ChangeType,
    pub target_type: TargetType,
    pub target_id: Uuid,
    #[serde(default)]
    pub previous_value: Option<Value>,
    #[serde(default)]
    pub new_value: Option<Value>,
    pub timestamp: DateTime<Utc>,
    pub vector_clock: VectorClock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    LastWriteWins,
    AutoMerge,
    FirstWriteWins,
    Manual,
    Custom,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    ManualPending,
    Resolved,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub id: Uuid,
    pub target_id: Uuid,
    pub local_change: Change,
    pub remote_change: Change,
    pub status: ConflictStatus,
    pub winner_change_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceState {
    Active,
    Idle,
    Away,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Connections,
    Close,
    Private,
    Invisible,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Presence {
    pub broker_id: String,
    pub state: PresenceState,
    #[serde(default)]
    pub cursor: Option<Value>,
    #[serde(default)]
    pub selection: Option<Value>,
    #[serde(default)]
    pub viewport_bounds: Option<Value>,
    pub last_activity: DateTime<Utc>,
    #[serde(default = "default_visibility")]
    pub visibility: Visibility,
}

fn default_visibility() -> Visibility {
    Visibility::Public
}

const CHANGE_LOG_CAPACITY: usize = 1000;

/// One replica's materialized view of the graph plus its bookkeeping.
pub struct SharedContext {
    pub id: Uuid,
    pub owner_broker_id: String,
    pub replica_id: String,
    pub version: u64,
    pub vector_clock: VectorClock,
    pub access_list: Vec<AccessEntry>,
    pub public: bool,
    pub nodes: HashMap<Uuid, Node>,
    pub edges: HashMap<Uuid, Edge>,
    pub metadata: Value,
    pub change_log: Vec<Change>,
    pub conflicts: Vec<ConflictRecord>,
    pub sync_strategy: String,
    pub conflict_resolution: ConflictResolution,
    pub deleted: bool,
    presence: HashMap<String, Presence>,
}

impl SharedContext {
    pub fn new(owner_broker_id: impl Into<String>, replica_id: impl Into<String>) -> Self {
        let owner_broker_id = owner_broker_id.into();
        Self {
            id: Uuid::new_v4(),
            owner_broker_id: owner_broker_id.clone(),
            replica_id: replica_id.into(),
            version: 0,
            vector_clock: VectorClock::new(),
            access_list: vec![AccessEntry {
                broker_id: owner_broker_id,
                level: AccessLevel::Owner,
                expires_at: None,
            }],
            public: false,
            nodes: HashMap::new(),
            edges: HashMap::new(),
            metadata: Value::Object(Default::default()),
            change_log: Vec::new(),
            conflicts: Vec::new(),
            sync_strategy: "broadcast".to_string(),
            conflict_resolution: ConflictResolution::LastWriteWins,
            deleted: false,
            presence: HashMap::new(),
        }
    }

    /// Highest access level `broker_id` currently holds, `public` implying
    /// an implicit floor of `Read`.
    pub fn access_level(&self, broker_id: &str, now: DateTime<Utc>) -> Option<AccessLevel> {
        let explicit = self
            .access_list
            .iter()
            .filter(|e| e.broker_id == broker_id && e.is_active(now))
            .map(|e| e.level)
            .max();
        match (explicit, self.public) {
            (Some(level), _) => Some(level),
            (None, true) => Some(AccessLevel::Read),
            (None, false) => None,
        }
    }

    fn require_level(&self, broker_id: &str, required: AccessLevel, now: DateTime<Utc>) -> AowResult<()> {
        if self.deleted {
            return Err(AowError::context("context has been deleted"));
        }
        match self.access_level(broker_id, now) {
            Some(level) if level >= required => Ok(()),
            _ => Err(AowError::context(format!(
                "broker '{}' lacks required access level {:?}",
                broker_id, required
            ))),
        }
    }

    /// Adds a node locally: increments this replica's vector-clock
    /// component, appends a bounded `Change`, and returns it for the
    /// caller's emitter to broadcast.
    pub fn add_node(
        &mut self,
        broker_id: &str,
        node_type: &str,
        data: Value,
        now: DateTime<Utc>,
    ) -> AowResult<Change> {
        self.require_level(broker_id, AccessLevel::Write, now)?;

        let node_id = Uuid::new_v4();
        let node = Node {
            id: node_id,
            node_type: node_type.to_string(),
            data: data.clone(),
            created_at: now,
            updated_at: now,
            created_by: broker_id.to_string(),
            version: 1,
        };
        self.nodes.insert(node_id, node);
        self.version += 1;

        let clock = self.bump_clock();
        let change = Change {
            id: Uuid::new_v4(),
            context_id: self.id,
            replica_id: self.replica_id.clone(),
            broker_id: broker_id.to_string(),
            change_type: ChangeType::Add,
            target_type: TargetType::Node,
            target_id: node_id,
            previous_value: None,
            new_value: Some(data),
            timestamp: now,
            vector_clock: clock,
        };
        self.push_change(change.clone());
        Ok(change)
    }

    pub fn update_node(
        &mut self,
        broker_id: &str,
        node_id: Uuid,
        data: Value,
        now: DateTime<Utc>,
    ) -> AowResult<Change> {
        self.require_level(broker_id, AccessLevel::Write, now)?;
        let previous = {
            let node = self
                .nodes
                .get_mut(&node_id)
                .ok_or_else(|| AowError::context(format!("node '{}' not found", node_id)))?;
            let previous = node.data.clone();
            node.data = data.clone();
            node.updated_at = now;
            node.version += 1;
            previous
        };
        self.version += 1;

        let clock = self.bump_clock();
        let change = Change {
            id: Uuid::new_v4(),
            context_id: self.id,
            replica_id: self.replica_id.clone(),
            broker_id: broker_id.to_string(),
            change_type: ChangeType::Update,
            target_type: TargetType::Node,
            target_id: node_id,
            previous_value: Some(previous),
            new_value: Some(data),
            timestamp: now,
            vector_clock: clock,
        };
        self.push_change(change.clone());
        Ok(change)
    }

    /// Deletes a node locally (spec.md:273 round-trip property:
    /// `deleteNode(ctx, n.id); getNodes(ctx).notContains(n)`).
    pub fn delete_node(&mut self, broker_id: &str, node_id: Uuid, now: DateTime<Utc>) -> AowResult<Change> {
        self.require_level(broker_id, AccessLevel::Write, now)?;
        let node = self
            .nodes
            .remove(&node_id)
            .ok_or_else(|| AowError::context(format!("node '{}' not found", node_id)))?;
        self.version += 1;

        let clock = self.bump_clock();
        let change = Change {
            id: Uuid::new_v4(),
            context_id: self.id,
            replica_id: self.replica_id.clone(),
            broker_id: broker_id.to_string(),
            change_type: ChangeType::Delete,
            target_type: TargetType::Node,
            target_id: node_id,
            previous_value: Some(node.data),
            new_value: None,
            timestamp: now,
            vector_clock: clock,
        };
        self.push_change(change.clone());
        Ok(change)
    }

    pub fn add_edge(
        &mut self,
        broker_id: &str,
        edge_type: &str,
        data: Value,
        now: DateTime<Utc>,
    ) -> AowResult<Change> {
        self.require_level(broker_id, AccessLevel::Write, now)?;

        let edge_id = Uuid::new_v4();
        let edge = Edge {
            id: edge_id,
            edge_type: edge_type.to_string(),
            data: data.clone(),
            created_at: now,
            updated_at: now,
            created_by: broker_id.to_string(),
            version: 1,
        };
        self.edges.insert(edge_id, edge);
        self.version += 1;

        let clock = self.bump_clock();
        let change = Change {
            id: Uuid::new_v4(),
            context_id: self.id,
            replica_id: self.replica_id.clone(),
            broker_id: broker_id.to_string(),
            change_type: ChangeType::Add,
            target_type: TargetType::Edge,
            target_id: edge_id,
            previous_value: None,
            new_value: Some(data),
            timestamp: now,
            vector_clock: clock,
        };
        self.push_change(change.clone());
        Ok(change)
    }

    pub fn delete_edge(&mut self, broker_id: &str, edge_id: Uuid, now: DateTime<Utc>) -> AowResult<Change> {
        self.require_level(broker_id, AccessLevel::Write, now)?;
        let edge = self
            .edges
            .remove(&edge_id)
            .ok_or_else(|| AowError::context(format!("edge '{}' not found", edge_id)))?;
        self.version += 1;

        let clock = self.bump_clock();
        let change = Change {
            id: Uuid::new_v4(),
            context_id: self.id,
            replica_id: self.replica_id.clone(),
            broker_id: broker_id.to_string(),
            change_type: ChangeType::Delete,
            target_type: TargetType::Edge,
            target_id: edge_id,
            previous_value: Some(edge.data),
            new_value: None,
            timestamp: now,
            vector_clock: clock,
        };
        self.push_change(change.clone());
        Ok(change)
    }

    fn bump_clock(&mut self) -> VectorClock {
        self.vector_clock.increment(&self.replica_id);
        self.vector_clock.clone()
    }

    fn push_change(&mut self, change: Change) {
        self.change_log.push(change);
        if self.change_log.len() > CHANGE_LOG_CAPACITY {
            let excess = self.change_log.len() - CHANGE_LOG_CAPACITY;
            self.change_log.drain(0..excess);
        }
    }

    /// Applies a remote `Change`, detecting conflicts per §4.7: obsolete
    /// changes (dominated by local state) are dropped, dominating changes
    /// apply directly, concurrent changes create a `ConflictRecord` and are
    /// resolved per `self.conflict_resolution`.
    pub fn apply_remote_change(&mut self, remote: Change) -> AowResult<()> {
        match self.vector_clock.compare(&remote.vector_clock) {
            ClockOrder::Dominates | ClockOrder::Equal => {
                // Local state already reflects this change or is ahead of it.
            }
            ClockOrder::Dominated => {
                self.apply_change_value(&remote)?;
                self.push_change(remote.clone());
            }
            ClockOrder::Concurrent => {
                self.resolve_conflict(remote.clone())?;
            }
        }
        self.vector_clock.merge(&remote.vector_clock);
        Ok(())
    }

    fn resolve_conflict(&mut self, remote: Change) -> AowResult<()> {
        let local_change = self
            .change_log
            .iter()
            .rev()
            .find(|c| c.target_id == remote.target_id)
            .cloned();

        let Some(local_change) = local_change else {
            self.apply_change_value(&remote)?;
            self.push_change(remote);
            return Ok(());
        };

        let mut record = ConflictRecord {
            id: Uuid::new_v4(),
            target_id: remote.target_id,
            local_change: local_change.clone(),
            remote_change: remote.clone(),
            status: ConflictStatus::Resolved,
            winner_change_id: None,
        };

        match self.conflict_resolution {
            ConflictResolution::LastWriteWins => {
                let remote_wins = (remote.timestamp, remote.replica_id.as_str())
                    > (local_change.timestamp, local_change.replica_id.as_str());
                if remote_wins {
                    self.apply_change_value(&remote)?;
                    self.push_change(remote.clone());
                    record.winner_change_id = Some(remote.id);
                } else {
                    record.winner_change_id = Some(local_change.id);
                }
            }
            ConflictResolution::FirstWriteWins => {
                let remote_wins = remote.timestamp < local_change.timestamp;
                if remote_wins {
                    self.apply_change_value(&remote)?;
                    self.push_change(remote.clone());
                    record.winner_change_id = Some(remote.id);
                } else {
                    record.winner_change_id = Some(local_change.id);
                }
            }
            ConflictResolution::AutoMerge => {
                self.apply_change_value(&remote)?;
                self.push_change(remote.clone());
                record.winner_change_id = None;
            }
            ConflictResolution::Manual | ConflictResolution::Custom => {
                record.status = ConflictStatus::ManualPending;
            }
        }

        self.conflicts.push(record);
        Ok(())
    }

    fn apply_change_value(&mut self, change: &Change) -> AowResult<()> {
        match (change.target_type, change.change_type) {
            (TargetType::Node, ChangeType::Add) | (TargetType::Node, ChangeType::Update) => {
                if let Some(value) = &change.new_value {
                    let entry = self.nodes.entry(change.target_id).or_insert_with(|| Node {
                        id: change.target_id,
                        node_type: "unknown".to_string(),
                        data: Value::Null,
                        created_at: change.timestamp,
                        updated_at: change.timestamp,
                        created_by: change.broker_id.clone(),
                        version: 0,
                    });
                    entry.data = value.clone();
                    entry.updated_at = change.timestamp;
                    entry.version += 1;
                }
            }
            (TargetType::Node, ChangeType::Delete) => {
                self.nodes.remove(&change.target_id);
            }
            (TargetType::Edge, ChangeType::Add) | (TargetType::Edge, ChangeType::Update) => {
                if let Some(value) = &change.new_value {
                    let entry = self.edges.entry(change.target_id).or_insert_with(|| Edge {
                        id: change.target_id,
                        edge_type: "unknown".to_string(),
                        data: Value::Null,
                        created_at: change.timestamp,
                        updated_at: change.timestamp,
                        created_by: change.broker_id.clone(),
                        version: 0,
                    });
                    entry.data = value.clone();
                    entry.updated_at = change.timestamp;
                    entry.version += 1;
                }
            }
            (TargetType::Edge, ChangeType::Delete) => {
                self.edges.remove(&change.target_id);
            }
            (TargetType::Metadata, _) => {
                if let Some(value) = &change.new_value {
                    self.metadata = value.clone();
                }
            }
        }
        Ok(())
    }

    /// Resolves a `manual_pending` conflict by recording the declared winner.
    pub fn resolve_manual(&mut self, conflict_id: Uuid, winner_change_id: Uuid) -> AowResult<()> {
        let record = self
            .conflicts
            .iter_mut()
            .find(|c| c.id == conflict_id)
            .ok_or_else(|| AowError::context(format!("conflict '{}' not found", conflict_id)))?;
        if record.status != ConflictStatus::ManualPending {
            return Err(AowError::context("conflict already resolved"));
        }
        record.status = ConflictStatus::Resolved;
        record.winner_change_id = Some(winner_change_id);
        Ok(())
    }

    /// Grants or raises `target_broker_id`'s access level (spec.md:158:
    /// "ACL changes need ≥ admin").
    pub fn grant_access(
        &mut self,
        broker_id: &str,
        target_broker_id: &str,
        level: AccessLevel,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> AowResult<()> {
        self.require_level(broker_id, AccessLevel::Admin, now)?;
        self.access_list.retain(|e| e.broker_id != target_broker_id);
        self.access_list.push(AccessEntry { broker_id: target_broker_id.to_string(), level, expires_at });
        Ok(())
    }

    /// Revokes all of `target_broker_id`'s explicit access (spec.md:158).
    pub fn revoke_access(&mut self, broker_id: &str, target_broker_id: &str, now: DateTime<Utc>) -> AowResult<()> {
        self.require_level(broker_id, AccessLevel::Admin, now)?;
        self.access_list.retain(|e| e.broker_id != target_broker_id);
        Ok(())
    }

    /// Tombstones the context (spec.md:158: "deletion of the context needs
    /// owner"). Clears graph state; further mutations fail via
    /// `require_level`'s deleted-context guard.
    pub fn delete_context(&mut self, broker_id: &str, now: DateTime<Utc>) -> AowResult<()> {
        self.require_level(broker_id, AccessLevel::Owner, now)?;
        self.nodes.clear();
        self.edges.clear();
        self.metadata = Value::Object(Default::default());
        self.deleted = true;
        Ok(())
    }

    pub fn set_presence(&mut self, presence: Presence) {
        self.presence.insert(presence.broker_id.clone(), presence);
    }

    /// Presence entries visible to `viewer_broker_id`, per the per-entry
    /// visibility filter (§4.7). `has_connection`/`viewer_level` let the
    /// caller supply the relationship/access facts the filter needs.
    pub fn visible_presence(
        &self,
        viewer_broker_id: &str,
        has_connection: impl Fn(&str) -> bool,
        viewer_level: Option<AccessLevel>,
    ) -> Vec<&Presence> {
        self.presence
            .values()
            .filter(|p| {
                if p.broker_id == viewer_broker_id {
                    return true;
                }
                match p.visibility {
                    Visibility::Invisible => false,
                    Visibility::Public => true,
                    Visibility::Connections => has_connection(&p.broker_id),
                    Visibility::Close => matches!(viewer_level, Some(AccessLevel::Admin) | Some(AccessLevel::Owner)),
                    Visibility::Private => false,
                }
            })
            .collect()
    }
}
