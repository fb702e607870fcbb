use chrono::{DateTime, Utc};
use loom_domain::audit::{AuditEvent, TurnRecord};
use loom_domain::Result;
use parking_lot::RwLock;
use uuid::Uuid;

/// Append-only store for `TurnRecord` and `AuditEvent` (§3, §8 property
/// 10: records are never updated or deleted once written).
#[async_trait::async_trait]
pub trait AuditRepository: Send + Sync {
    async fn append_turn_record(&self, record: TurnRecord) -> Result<()>;
    async fn append_audit_event(&self, event: AuditEvent) -> Result<()>;

    async fn list_turn_records(&self, tenant_id: Uuid, session_id: Uuid, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<TurnRecord>>;
    async fn list_audit_events(&self, tenant_id: Uuid, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<AuditEvent>>;
}

#[derive(Default)]
pub struct InMemoryAuditRepository {
    turn_records: RwLock<Vec<TurnRecord>>,
    audit_events: RwLock<Vec<AuditEvent>>,
}

impl InMemoryAuditRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl AuditRepository for InMemoryAuditRepository {
    async fn append_turn_record(&self, record: TurnRecord) -> Result<()> {
        self.turn_records.write().push(record);
        Ok(())
    }

    async fn append_audit_event(&self, event: AuditEvent) -> Result<()> {
        self.audit_events.write().push(event);
        Ok(())
    }

    async fn list_turn_records(&self, tenant_id: Uuid, session_id: Uuid, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<TurnRecord>> {
        Ok(self
            .turn_records
            .read()
            .iter()
            .filter(|r| r.tenant_id == tenant_id && r.session_id == session_id && r.created_at >= from && r.created_at <= to)
            .cloned()
            .collect())
    }

    async fn list_audit_events(&self, tenant_id: Uuid, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<AuditEvent>> {
        Ok(self
            .audit_events
            .read()
            .iter()
            .filter(|e| e.tenant_id == tenant_id && e.created_at >= from && e.created_at <= to)
            .cloned()
            .collect())
    }
}
