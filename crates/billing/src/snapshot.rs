//! Point-in-time snapshots of the two billing truths
//!
//! Immutable value objects assembled fresh per reconciliation call and never
//! persisted. `StripeSnapshot` is the payment processor's view of a member;
//! `InternalSnapshot` is the local database's view.

use memberly_shared::PlanType;
use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::store::{CardRecord, MembershipRecord};

/// External truth: the processor's customer + selected subscription.
/// Exists only when both the customer and a subscription were found.
#[derive(Debug, Clone, Serialize)]
pub struct StripeSnapshot {
    pub customer_id: String,
    pub customer_email: Option<String>,
    pub subscription_id: String,
    /// Processor's free-text status string
    pub subscription_status: String,
    pub price_id: Option<String>,
    /// Resolved through the configured price catalog
    pub plan_type: PlanType,
    pub current_period_start: OffsetDateTime,
    pub current_period_end: OffsetDateTime,
    pub cancel_at_period_end: bool,
}

/// Internal truth: the local user with optional membership and card views
#[derive(Debug, Clone, Serialize)]
pub struct InternalSnapshot {
    pub user_id: Uuid,
    pub user_email: String,
    pub membership: Option<MembershipView>,
    pub card: Option<CardView>,
}

/// Normalized membership sub-record
#[derive(Debug, Clone, Serialize)]
pub struct MembershipView {
    pub id: Uuid,
    pub subscription_id: Option<String>,
    pub status: String,
    pub plan_type: PlanType,
    pub start_date: OffsetDateTime,
    pub end_date: OffsetDateTime,
    pub auto_renew: bool,
}

impl From<MembershipRecord> for MembershipView {
    fn from(record: MembershipRecord) -> Self {
        Self {
            id: record.id,
            subscription_id: record.subscription_id,
            status: record.status,
            plan_type: PlanType::from_code(&record.plan_type),
            start_date: record.start_date,
            end_date: record.end_date,
            auto_renew: record.auto_renew,
        }
    }
}

/// Normalized card sub-record
#[derive(Debug, Clone, Serialize)]
pub struct CardView {
    pub membership_number: String,
    pub status: String,
    pub plan_type: PlanType,
    pub valid_from: OffsetDateTime,
    pub valid_until: OffsetDateTime,
}

impl From<CardRecord> for CardView {
    fn from(record: CardRecord) -> Self {
        Self {
            membership_number: record.membership_number,
            status: record.status,
            plan_type: PlanType::from_code(&record.plan_type),
            valid_from: record.valid_from,
            valid_until: record.valid_until,
        }
    }
}
