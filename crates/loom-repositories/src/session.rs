use std::collections::HashMap;

use loom_domain::session::{MigrationState, Session};
use loom_domain::Result;
use parking_lot::RwLock;
use uuid::Uuid;

/// Get by id, get by `(tenant, channel, channel_user_id)`, save, status
/// filter (§6).
#[async_trait::async_trait]
pub trait SessionRepository: Send + Sync {
    async fn get(&self, tenant_id: Uuid, session_id: Uuid) -> Result<Option<Session>>;
    async fn get_by_channel_identity(
        &self,
        tenant_id: Uuid,
        agent_id: Uuid,
        channel: &str,
        channel_user_id: &str,
    ) -> Result<Option<Session>>;
    async fn save(&self, session: Session) -> Result<()>;
    async fn list_by_migration_state(&self, tenant_id: Uuid, state: MigrationState) -> Result<Vec<Session>>;
}

#[derive(Default)]
pub struct InMemorySessionRepository {
    by_id: RwLock<HashMap<Uuid, Session>>,
}

impl InMemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn get(&self, tenant_id: Uuid, session_id: Uuid) -> Result<Option<Session>> {
        Ok(self
            .by_id
            .read()
            .get(&session_id)
            .filter(|s| s.tenant_id == tenant_id && s.deleted_at.is_none())
            .cloned())
    }

    async fn get_by_channel_identity(
        &self,
        tenant_id: Uuid,
        agent_id: Uuid,
        channel: &str,
        channel_user_id: &str,
    ) -> Result<Option<Session>> {
        Ok(self
            .by_id
            .read()
            .values()
            .find(|s| {
                s.tenant_id == tenant_id
                    && s.agent_id == agent_id
                    && s.channel == channel
                    && s.channel_user_id == channel_user_id
                    && s.deleted_at.is_none()
            })
            .cloned())
    }

    async fn save(&self, session: Session) -> Result<()> {
        self.by_id.write().insert(session.id, session);
        Ok(())
    }

    async fn list_by_migration_state(&self, tenant_id: Uuid, state: MigrationState) -> Result<Vec<Session>> {
        Ok(self
            .by_id
            .read()
            .values()
            .filter(|s| s.tenant_id == tenant_id && s.migration_state == state && s.deleted_at.is_none())
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn session(tenant_id: Uuid, agent_id: Uuid, channel: &str, channel_user_id: &str) -> Session {
        Session {
            id: Uuid::new_v4(),
            tenant_id,
            agent_id,
            channel: channel.into(),
            channel_user_id: channel_user_id.into(),
            active_scenario_id: None,
            active_step_id: None,
            active_scenario_version: None,
            variables: HashMap::new(),
            turn_count: 0,
            step_history: vec![],
            scenario_checksum: None,
            pending_migration: None,
            migration_state: MigrationState::Synced,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[tokio::test]
    async fn resolve_by_channel_identity_round_trips() {
        let repo = InMemorySessionRepository::new();
        let tenant = Uuid::new_v4();
        let agent = Uuid::new_v4();
        let s = session(tenant, agent, "webchat", "u1");
        let id = s.id;
        repo.save(s).await.unwrap();

        let found = repo
            .get_by_channel_identity(tenant, agent, "webchat", "u1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, id);
    }

    #[tokio::test]
    async fn different_tenant_does_not_leak_session() {
        let repo = InMemorySessionRepository::new();
        let tenant_a = Uuid::new_v4();
        let tenant_b = Uuid::new_v4();
        let agent = Uuid::new_v4();
        repo.save(session(tenant_a, agent, "webchat", "u1")).await.unwrap();

        let found = repo
            .get_by_channel_identity(tenant_b, agent, "webchat", "u1")
            .await
            .unwrap();
        assert!(found.is_none());
    }
}
