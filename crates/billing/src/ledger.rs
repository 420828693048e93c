//! Webhook event ledger and claim coordinator
//!
//! Guarantees at-most-once processing of webhook events across any number of
//! concurrent, stateless server instances. Every transition is enforced by an
//! atomic storage primitive (conditional insert or conditional update); the
//! ledger itself holds no locks and no state between calls.
//!
//! State machine per event ID:
//!
//! ```text
//! absent ----------------------> processing   (conditional insert)
//! completed -------------------> rejected     (DuplicateEvent, carries completed_at)
//! failed ----------------------> processing   (reclaim, retry_count += 1)
//! processing (fresh claim) ----> rejected     (DuplicateEvent)
//! processing (stale claim) ----> processing   (reclaim, retry_count += 1)
//! ```

use std::sync::Arc;

use serde::Serialize;
use time::{Duration, OffsetDateTime};

use crate::error::{BillingError, BillingResult};
use crate::store::BillingStore;

/// How long a `processing` claim is presumed live. Older claims belong to a
/// crashed worker and may be reclaimed. Short enough to recover promptly,
/// long enough to exceed any plausible in-flight processing latency.
pub const STALE_CLAIM_WINDOW: Duration = Duration::minutes(5);

/// Processing status of a webhook event record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Processing,
    Completed,
    Failed,
}

impl EventStatus {
    /// Stable string code stored in the database
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Processing => "processing",
            EventStatus::Completed => "completed",
            EventStatus::Failed => "failed",
        }
    }

    /// Parse a stored code
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "processing" => Some(EventStatus::Processing),
            "completed" => Some(EventStatus::Completed),
            "failed" => Some(EventStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Durable record of one webhook event ID. At most one row per event ID.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookEventRecord {
    /// External event ID, globally unique per source system
    pub event_id: String,
    pub event_type: String,
    pub status: EventStatus,
    /// Incremented on every reclaim
    pub retry_count: i32,
    /// Most recent claim time; the staleness window is measured from here
    pub claimed_at: OffsetDateTime,
    pub completed_at: Option<OffsetDateTime>,
    pub failed_at: Option<OffsetDateTime>,
    pub error_message: Option<String>,
}

/// Claim coordinator over the durable event ledger
pub struct EventLedger {
    store: Arc<dyn BillingStore>,
}

impl EventLedger {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    /// Claim exclusive processing rights for one webhook event.
    ///
    /// Returns `Ok(())` when this caller holds the claim. Returns
    /// `BillingError::DuplicateEvent` when the event was already processed,
    /// is being processed elsewhere, or this caller lost an insert race.
    /// Duplicate is control flow, not a failure: the caller acknowledges the
    /// webhook without re-running side effects.
    pub async fn claim(&self, event_id: &str, event_type: &str) -> BillingResult<()> {
        let now = OffsetDateTime::now_utc();

        if self.store.insert_event(event_id, event_type, now).await? {
            tracing::info!(
                event_id = %event_id,
                event_type = %event_type,
                "Claimed webhook event"
            );
            return Ok(());
        }

        // Conflict: a record already exists. Inspect it to decide between
        // duplicate rejection and reclaim.
        let record = match self.store.find_event(event_id).await? {
            Some(record) => record,
            // Deleted between insert and lookup (retention cleanup race);
            // the caller lost either way.
            None => {
                return Err(BillingError::DuplicateEvent {
                    event_id: event_id.to_string(),
                    completed_at: None,
                })
            }
        };

        match record.status {
            EventStatus::Completed => {
                tracing::info!(
                    event_id = %event_id,
                    completed_at = ?record.completed_at,
                    "Duplicate webhook event, already processed"
                );
                Err(BillingError::DuplicateEvent {
                    event_id: event_id.to_string(),
                    completed_at: record.completed_at,
                })
            }
            EventStatus::Processing if now - record.claimed_at < STALE_CLAIM_WINDOW => {
                tracing::info!(
                    event_id = %event_id,
                    claimed_at = %record.claimed_at,
                    "Duplicate webhook event, in flight on another instance"
                );
                Err(BillingError::DuplicateEvent {
                    event_id: event_id.to_string(),
                    completed_at: None,
                })
            }
            // Failed records are always retryable; stale processing records
            // belong to a presumed-dead worker. Both go through the same
            // conditional update so a racing claim cannot double-win.
            EventStatus::Failed | EventStatus::Processing => {
                let stale_before = now - STALE_CLAIM_WINDOW;
                if self.store.reclaim_event(event_id, stale_before, now).await? {
                    tracing::info!(
                        event_id = %event_id,
                        prior_status = %record.status,
                        retry_count = record.retry_count + 1,
                        "Reclaimed webhook event"
                    );
                    Ok(())
                } else {
                    Err(BillingError::DuplicateEvent {
                        event_id: event_id.to_string(),
                        completed_at: None,
                    })
                }
            }
        }
    }

    /// Mark an event as successfully processed.
    /// Call only after all side effects have succeeded.
    pub async fn complete(&self, event_id: &str) -> BillingResult<()> {
        self.store
            .complete_event(event_id, OffsetDateTime::now_utc())
            .await?;
        tracing::info!(event_id = %event_id, "Completed webhook event");
        Ok(())
    }

    /// Mark an event as failed, enabling a later claim retry
    pub async fn fail(&self, event_id: &str, message: &str) -> BillingResult<()> {
        self.store
            .fail_event(event_id, message, OffsetDateTime::now_utc())
            .await?;
        tracing::warn!(event_id = %event_id, error = %message, "Webhook event failed");
        Ok(())
    }

    /// Read-only lookup for diagnostics; never mutates state
    pub async fn check(&self, event_id: &str) -> BillingResult<Option<WebhookEventRecord>> {
        self.store.find_event(event_id).await
    }

    /// Delete records whose last activity predates the retention cutoff,
    /// regardless of status. Returns the number removed.
    pub async fn cleanup(&self, older_than_days: u32) -> BillingResult<u64> {
        let cutoff = OffsetDateTime::now_utc() - Duration::days(i64::from(older_than_days));
        let removed = self.store.delete_events_before(cutoff).await?;
        tracing::info!(
            removed = removed,
            older_than_days = older_than_days,
            "Cleaned up old webhook event records"
        );
        Ok(removed)
    }
}
