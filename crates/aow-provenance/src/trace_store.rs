//! `TraceStore` implementations (§4.3). Append-only: `store` fails with an
//! idempotent rejection (not an overwrite) if a trace with that id already
//! exists. `FileTraceStore` follows the teacher's file-backed-backend shape
//! (in-memory index + a durable on-disk append), persisting the full log as
//! newline-delimited JSON so append stays O(1) instead of rewriting the
//! whole file per trace.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use aow_core::{AowError, AowResult, Trace, TraceQuery, TraceStore};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

fn matches(trace: &Trace, query: &TraceQuery) -> bool {
    if let Some(did) = &query.agent_did {
        if trace.agent_did() != did {
            return false;
        }
    }
    if let Some(action_type) = &query.action_type {
        if trace.action_type() != action_type {
            return false;
        }
    }
    if let Some(from) = query.from_time {
        if trace.started_at < from {
            return false;
        }
    }
    if let Some(to) = query.to_time {
        if trace.started_at > to {
            return false;
        }
    }
    true
}

fn apply_paging(mut traces: Vec<Trace>, query: &TraceQuery) -> Vec<Trace> {
    traces.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    let offset = query.offset.unwrap_or(0);
    let traces: Vec<Trace> = traces.into_iter().skip(offset).collect();
    match query.limit {
        Some(limit) => traces.into_iter().take(limit).collect(),
        None => traces,
    }
}

/// Ephemeral, process-local provenance store.
#[derive(Debug, Default)]
pub struct InMemoryTraceStore {
    traces: RwLock<HashMap<Uuid, Trace>>,
}

impl InMemoryTraceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.traces.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TraceStore for InMemoryTraceStore {
    async fn store(&self, trace: Trace) -> AowResult<()> {
        let mut traces = self.traces.write();
        if traces.contains_key(&trace.id) {
            return Err(AowError::provenance(format!(
                "trace '{}' already exists",
                trace.id
            )));
        }
        traces.insert(trace.id, trace);
        Ok(())
    }

    async fn query(&self, query: TraceQuery) -> AowResult<Vec<Trace>> {
        let traces = self.traces.read();
        let matched: Vec<Trace> = traces.values().filter(|t| matches(t, &query)).cloned().collect();
        Ok(apply_paging(matched, &query))
    }

    async fn get_by_id(&self, id: Uuid) -> AowResult<Option<Trace>> {
        Ok(self.traces.read().get(&id).cloned())
    }
}

/// Persistent provenance store: an in-memory index backed by an
/// append-only newline-delimited-JSON log file, mirroring the
/// load-on-open/persist-on-write shape of the workspace's file-backed
/// memory backend.
pub struct FileTraceStore {
    path: PathBuf,
    index: Arc<RwLock<HashMap<Uuid, Trace>>>,
}

impl FileTraceStore {
    pub async fn open(path: impl Into<PathBuf>) -> AowResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                AowError::provenance(format!("failed to create trace directory: {}", e))
            })?;
        }

        let index = if path.exists() {
            Self::load(&path).await?
        } else {
            HashMap::new()
        };

        Ok(Self { path, index: Arc::new(RwLock::new(index)) })
    }

    async fn load(path: &Path) -> AowResult<HashMap<Uuid, Trace>> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| AowError::provenance(format!("failed to read trace log {}: {}", path.display(), e)))?;

        let mut index = HashMap::new();
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let trace: Trace = serde_json::from_str(line).map_err(|e| {
                AowError::provenance(format!("failed to parse trace log entry: {}", e))
            })?;
            index.insert(trace.id, trace);
        }
        Ok(index)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn append(&self, trace: &Trace) -> AowResult<()> {
        let line = serde_json::to_string(trace)
            .map_err(|e| AowError::provenance(format!("failed to serialize trace: {}", e)))?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| AowError::provenance(format!("failed to open trace log: {}", e)))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| AowError::provenance(format!("failed to append trace: {}", e)))?;
        file.write_all(b"\n")
            .await
            .map_err(|e| AowError::provenance(format!("failed to append trace: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl TraceStore for FileTraceStore {
    async fn store(&self, trace: Trace) -> AowResult<()> {
        {
            let index = self.index.read();
            if index.contains_key(&trace.id) {
                return Err(AowError::provenance(format!(
                    "trace '{}' already exists",
                    trace.id
                )));
            }
        }
        self.append(&trace).await?;
        self.index.write().insert(trace.id, trace);
        Ok(())
    }

    async fn query(&self, query: TraceQuery) -> AowResult<Vec<Trace>> {
        let matched: Vec<Trace> = self
            .index
            .read()
            .values()
            .filter(|t| matches(t, &query))
            .cloned()
            .collect();
        Ok(apply_paging(matched, &query))
    }

    async fn get_by_id(&self, id: Uuid) -> AowResult<Option<Trace>> {
        Ok(self.index.read().get(&id).cloned())
    }
}
