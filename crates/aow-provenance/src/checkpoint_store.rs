//! `CheckpointStore` implementation (§4.6 checkpointing, §6 interface).

use std::collections::HashMap;

use async_trait::async_trait;
use aow_core::{AowResult, Checkpoint, CheckpointStore};
use parking_lot::RwLock;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: RwLock<HashMap<Uuid, Checkpoint>>,
    by_workflow: RwLock<HashMap<Uuid, Vec<Uuid>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn create(&self, checkpoint: Checkpoint) -> AowResult<Checkpoint> {
        let id = checkpoint.id;
        let workflow_id = checkpoint.workflow_id;
        self.checkpoints.write().insert(id, checkpoint.clone());
        self.by_workflow.write().entry(workflow_id).or_default().push(id);
        Ok(checkpoint)
    }

    async fn resume(&self, id: Uuid) -> AowResult<Option<Checkpoint>> {
        Ok(self.checkpoints.read().get(&id).cloned())
    }

    async fn prune_keep_latest(&self, workflow_id: Uuid, n: usize) -> AowResult<()> {
        let mut by_workflow = self.by_workflow.write();
        let Some(ids) = by_workflow.get_mut(&workflow_id) else {
            return Ok(());
        };
        if ids.len() <= n {
            return Ok(());
        }
        let mut checkpoints = self.checkpoints.write();
        let cutoff = ids.len() - n;
        for stale_id in ids.drain(..cutoff) {
            checkpoints.remove(&stale_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aow_core::AgentState;
    use chrono::Utc;
    use serde_json::Value;

    fn checkpoint(workflow_id: Uuid) -> Checkpoint {
        let agent_state = AgentState::default();
        let snapshot = Value::Null;
        Checkpoint {
            id: Uuid::new_v4(),
            workflow_id,
            timestamp: Utc::now(),
            context_snapshot: snapshot.clone(),
            content_hash: Checkpoint::compute_hash(workflow_id, &agent_state, &snapshot),
            agent_state,
            supersedes: None,
        }
    }

    #[tokio::test]
    async fn create_and_resume_round_trip() {
        let store = InMemoryCheckpointStore::new();
        let workflow_id = Uuid::new_v4();
        let cp = checkpoint(workflow_id);
        let id = cp.id;
        store.create(cp).await.unwrap();

        let resumed = store.resume(id).await.unwrap().unwrap();
        assert_eq!(resumed.id, id);
    }

    #[tokio::test]
    async fn prune_keeps_only_latest_n() {
        let store = InMemoryCheckpointStore::new();
        let workflow_id = Uuid::new_v4();
        let mut ids = Vec::new();
        for _ in 0..5 {
            let cp = checkpoint(workflow_id);
            ids.push(cp.id);
            store.create(cp).await.unwrap();
        }

        store.prune_keep_latest(workflow_id, 2).await.unwrap();

        assert!(store.resume(ids[0]).await.unwrap().is_none());
        assert!(store.resume(ids[1]).await.unwrap().is_none());
        assert!(store.resume(ids[3]).await.unwrap().is_some());
        assert!(store.resume(ids[4]).await.unwrap().is_some());
    }
}
