// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Memberly Billing Core
//!
//! Keeps membership records convergent with the payment processor.
//!
//! ## Features
//!
//! - **Event Ledger**: durable record of every webhook event ID ever seen,
//!   with atomic claim/complete/fail transitions and retention cleanup
//! - **Claim Coordinator**: at-most-once webhook processing across any
//!   number of stateless instances, enforced at the storage layer
//! - **Snapshots**: normalized external (Stripe) and internal views of one
//!   member's billing state
//! - **Discrepancy Detection**: pure, ordered comparison of the two views
//! - **Reconciliation**: idempotent plan + execution converging internal
//!   user, membership, and card records onto the processor, with an audit
//!   trail

pub mod audit;
pub mod client;
pub mod config;
pub mod discrepancy;
pub mod error;
pub mod ledger;
pub mod plan;
pub mod reconcile;
pub mod snapshot;
pub mod store;

#[cfg(test)]
mod edge_case_tests;

// Audit
pub use audit::{NewAuditEntry, ReconciliationAudit};

// Client
pub use client::{CustomerRef, PaymentProvider, StripeClient, StripeConfig, SubscriptionView};

// Config
pub use config::{BillingConfig, PriceCatalog};

// Discrepancy
pub use discrepancy::{detect, Discrepancy, DATE_TOLERANCE_MS};

// Error
pub use error::{BillingError, BillingResult};

// Ledger
pub use ledger::{EventLedger, EventStatus, WebhookEventRecord, STALE_CLAIM_WINDOW};

// Plan
pub use plan::plan;

// Reconcile
pub use reconcile::{ReconciliationOutcome, ReconciliationReport, ReconciliationService};

// Snapshot
pub use snapshot::{CardView, InternalSnapshot, MembershipView, StripeSnapshot};

// Store
pub use store::{
    BillingStore, CardRecord, CardUpsert, MembershipRecord, MembershipUpsert, MemoryStore,
    PostgresStore, UserRecord,
};

use std::sync::Arc;

use sqlx::PgPool;

/// Main billing service combining the claim coordinator and reconciliation
pub struct BillingService {
    pub events: EventLedger,
    pub reconciliation: ReconciliationService,
}

impl BillingService {
    /// Create a billing service from environment variables
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        let stripe = StripeClient::from_env()?;
        let config = BillingConfig::from_env()?;
        Ok(Self::new(config, stripe, pool))
    }

    /// Create a billing service with explicit config over Postgres
    pub fn new(config: BillingConfig, stripe: StripeClient, pool: PgPool) -> Self {
        let store: Arc<dyn BillingStore> = Arc::new(PostgresStore::new(pool));
        Self::with_store(config, Arc::new(stripe), store)
    }

    /// Create a billing service over arbitrary store/provider implementations
    pub fn with_store(
        config: BillingConfig,
        payments: Arc<dyn PaymentProvider>,
        store: Arc<dyn BillingStore>,
    ) -> Self {
        Self {
            events: EventLedger::new(store.clone()),
            reconciliation: ReconciliationService::new(config, payments, store),
        }
    }
}
