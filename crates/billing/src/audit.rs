//! Reconciliation audit trail
//!
//! One entry per executed reconciliation: who triggered it, which
//! subscription it converged on, the discrepancies that were detected, and
//! the actions actually performed. No-op reconciliations write nothing.

use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

/// Persisted audit record
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ReconciliationAudit {
    pub id: Uuid,
    /// Operator or system identity that triggered the reconciliation
    pub actor_id: Uuid,
    pub user_email: String,
    pub subscription_id: Option<String>,
    /// Discrepancy codes as detected, in evaluation order
    pub discrepancies: Vec<String>,
    /// Human-readable actions performed, in execution order
    pub actions: Vec<String>,
    pub created_at: OffsetDateTime,
}

/// Values for a new audit entry
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub actor_id: Uuid,
    pub user_email: String,
    pub subscription_id: Option<String>,
    pub discrepancies: Vec<String>,
    pub actions: Vec<String>,
}
