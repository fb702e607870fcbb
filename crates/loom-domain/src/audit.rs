use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Immutable once written — no code path may update or delete a
/// `TurnRecord` (§3, §8 property 10). The type carries no setters beyond
/// construction to make that structurally hard to violate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub session_id: Uuid,
    pub turn_number: u64,
    pub user_message: String,
    pub response: String,
    pub matched_rule_ids: Vec<Uuid>,
    pub tools_called: Vec<String>,
    pub tokens_used: Option<u32>,
    pub latency_ms: u64,
    pub created_at: DateTime<Utc>,
}

/// Immutable, append-only audit log entry (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
