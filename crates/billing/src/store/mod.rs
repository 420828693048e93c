//! Storage layer
//!
//! `BillingStore` is the single storage seam for the core: the event-ledger
//! primitives, the membership records the reconciliation executor writes, and
//! the reconciliation audit trail. Correctness under concurrency rests on the
//! conditional insert/update primitives here, not on in-process locking.
//!
//! `PostgresStore` is the production implementation; `MemoryStore` mirrors
//! its conditional semantics for tests and local development.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use async_trait::async_trait;
use memberly_shared::PlanType;
use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::audit::{NewAuditEntry, ReconciliationAudit};
use crate::error::BillingResult;
use crate::ledger::WebhookEventRecord;

/// Internal user row
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct UserRecord {
    pub id: Uuid,
    pub email: String,
    pub stripe_customer_id: Option<String>,
    pub created_at: OffsetDateTime,
}

/// Membership row. One per user (UNIQUE user_id); status and plan are stored
/// as the same string codes the snapshots compare.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MembershipRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub subscription_id: Option<String>,
    pub status: String,
    pub plan_type: String,
    pub start_date: OffsetDateTime,
    pub end_date: OffsetDateTime,
    pub auto_renew: bool,
    pub updated_at: OffsetDateTime,
}

/// Membership card row. The membership number is assigned once at creation
/// and never regenerated.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CardRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub membership_number: String,
    pub status: String,
    pub plan_type: String,
    pub valid_from: OffsetDateTime,
    pub valid_until: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Values for a membership create-or-update
#[derive(Debug, Clone)]
pub struct MembershipUpsert {
    pub user_id: Uuid,
    pub subscription_id: Option<String>,
    pub status: String,
    pub plan_type: PlanType,
    pub start_date: OffsetDateTime,
    pub end_date: OffsetDateTime,
    pub auto_renew: bool,
}

/// Values for a card create-or-update.
///
/// `membership_number` is only applied on insert; an update against an
/// existing card preserves the number already on the row.
#[derive(Debug, Clone)]
pub struct CardUpsert {
    pub user_id: Uuid,
    pub membership_number: String,
    pub status: String,
    pub plan_type: PlanType,
    pub valid_from: OffsetDateTime,
    pub valid_until: OffsetDateTime,
}

/// Atomic storage primitives consumed by the billing core
#[async_trait]
pub trait BillingStore: Send + Sync {
    // --- Event ledger primitives -----------------------------------------

    /// Conditionally insert a new `processing` event record.
    /// Returns false when a record for this event ID already exists
    /// (the caller lost the claim race).
    async fn insert_event(
        &self,
        event_id: &str,
        event_type: &str,
        claimed_at: OffsetDateTime,
    ) -> BillingResult<bool>;

    async fn find_event(&self, event_id: &str) -> BillingResult<Option<WebhookEventRecord>>;

    /// Conditionally re-take a failed or stale-processing record:
    /// increments `retry_count`, resets `claimed_at`, clears the failure
    /// fields. Matches only rows that are `failed`, or `processing` with
    /// `claimed_at < stale_before`. Returns false when no row matched.
    async fn reclaim_event(
        &self,
        event_id: &str,
        stale_before: OffsetDateTime,
        claimed_at: OffsetDateTime,
    ) -> BillingResult<bool>;

    async fn complete_event(
        &self,
        event_id: &str,
        completed_at: OffsetDateTime,
    ) -> BillingResult<()>;

    async fn fail_event(
        &self,
        event_id: &str,
        message: &str,
        failed_at: OffsetDateTime,
    ) -> BillingResult<()>;

    /// Delete event records whose last activity predates `cutoff`,
    /// regardless of status. Returns the number of rows removed.
    async fn delete_events_before(&self, cutoff: OffsetDateTime) -> BillingResult<u64>;

    // --- Membership records ----------------------------------------------

    async fn find_user_by_email(&self, email: &str) -> BillingResult<Option<UserRecord>>;

    /// Create the user if absent; otherwise update the Stripe customer link
    /// when a new one is supplied. Keyed on email.
    async fn upsert_user(
        &self,
        email: &str,
        stripe_customer_id: Option<&str>,
    ) -> BillingResult<UserRecord>;

    /// The user's current membership row, whatever its status. Status drift
    /// stays visible to the discrepancy detector instead of being filtered
    /// away here.
    async fn find_active_membership(&self, user_id: Uuid)
        -> BillingResult<Option<MembershipRecord>>;

    async fn upsert_membership(&self, membership: MembershipUpsert)
        -> BillingResult<MembershipRecord>;

    async fn find_membership_card(&self, user_id: Uuid) -> BillingResult<Option<CardRecord>>;

    async fn upsert_card(&self, card: CardUpsert) -> BillingResult<CardRecord>;

    /// Draw the next value from the membership-number sequence.
    /// Consumed only when a card is created.
    async fn next_card_number(&self) -> BillingResult<i64>;

    // --- Reconciliation audit --------------------------------------------

    async fn append_audit_entry(&self, entry: NewAuditEntry) -> BillingResult<Uuid>;

    async fn recent_audit_entries(&self, limit: i64) -> BillingResult<Vec<ReconciliationAudit>>;
}
