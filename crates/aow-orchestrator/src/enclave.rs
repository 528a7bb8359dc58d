//! `NullEnclaveService` (§6): the no-op `EnclaveService` used when no
//! repository is configured, per "the core proceeds without enclaves".

use async_trait::async_trait;
use aow_core::{AowResult, Enclave, EnclaveService};
use chrono::Utc;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct NullEnclaveService;

#[async_trait]
impl EnclaveService for NullEnclaveService {
    async fn create(&self, agent_did: &str, scope: Option<&str>, ttl_seconds: u64) -> AowResult<Enclave> {
        Ok(Enclave {
            id: Uuid::new_v4(),
            agent_did: agent_did.to_string(),
            scope: scope.map(|s| s.to_string()),
            expires_at: Utc::now() + chrono::Duration::seconds(ttl_seconds as i64),
        })
    }

    async fn seal(&self, _id: Uuid) -> AowResult<()> {
        Ok(())
    }

    async fn cleanup_expired(&self) -> AowResult<usize> {
        Ok(0)
    }
}
