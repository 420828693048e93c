//! Billing error types

use thiserror::Error;
use time::OffsetDateTime;

/// Closed error set for the billing core.
///
/// `DuplicateEvent` is not a failure: it is the steady-state outcome of
/// at-least-once webhook delivery. Callers acknowledge the event and move on;
/// the enclosing endpoint maps it to a success acknowledgment so the sender
/// stops redelivering.
#[derive(Debug, Error)]
pub enum BillingError {
    /// The event was already claimed, completed, or is being processed by
    /// another instance. Carries the completion time when the event already
    /// finished successfully.
    #[error("duplicate webhook event: {event_id}")]
    DuplicateEvent {
        event_id: String,
        completed_at: Option<OffsetDateTime>,
    },

    /// Storage layer failure (connection, query, constraint)
    #[error("storage error: {0}")]
    Storage(String),

    /// The payment processor sent data missing mandatory fields.
    /// Never silently defaulted: defaulting would corrupt reconciliation.
    #[error("malformed upstream data: {0}")]
    MalformedUpstream(String),

    /// Payment provider API call failed
    #[error("stripe api error: {0}")]
    StripeApi(String),

    /// Missing or invalid configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl BillingError {
    /// True for the duplicate-claim outcome, which callers treat as a
    /// successful acknowledgment rather than an error.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, BillingError::DuplicateEvent { .. })
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(e: sqlx::Error) -> Self {
        BillingError::Storage(e.to_string())
    }
}

impl From<stripe::StripeError> for BillingError {
    fn from(e: stripe::StripeError) -> Self {
        BillingError::StripeApi(e.to_string())
    }
}

/// Result type for billing operations
pub type BillingResult<T> = Result<T, BillingError>;
