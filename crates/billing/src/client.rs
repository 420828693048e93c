//! Payment provider access
//!
//! The core talks to the payment processor through the `PaymentProvider`
//! trait so reconciliation is fully exercisable against scripted fakes.
//! `StripeClient` is the production implementation over async-stripe.

use async_trait::async_trait;
use serde::Serialize;
use stripe::{Customer, ListCustomers, ListSubscriptions, Subscription};
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};

/// Stripe API configuration
#[derive(Clone)]
pub struct StripeConfig {
    pub secret_key: String,
}

impl StripeConfig {
    /// Load Stripe configuration from environment variables
    pub fn from_env() -> BillingResult<Self> {
        let secret_key = std::env::var("STRIPE_SECRET_KEY")
            .map_err(|_| BillingError::Config("STRIPE_SECRET_KEY must be set".to_string()))?;
        Ok(Self { secret_key })
    }
}

/// Normalized customer reference returned by a provider lookup
#[derive(Debug, Clone, Serialize)]
pub struct CustomerRef {
    pub id: String,
    pub email: Option<String>,
}

/// Normalized view of one subscription as the provider reports it.
///
/// Period bounds are optional here because the wire value may be absent or
/// out of range; the snapshot builder treats missing bounds on the selected
/// subscription as malformed upstream data.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionView {
    pub id: String,
    /// Provider's free-text status string (`active`, `past_due`, ...)
    pub status: String,
    pub price_id: Option<String>,
    pub period_start: Option<OffsetDateTime>,
    pub period_end: Option<OffsetDateTime>,
    pub cancel_at_period_end: bool,
}

/// Read interface onto the payment processor
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Look up a customer by email; `None` when the processor has no record
    async fn customer_by_email(&self, email: &str) -> BillingResult<Option<CustomerRef>>;

    /// List all subscriptions for a customer, any status
    async fn subscriptions_for(&self, customer_id: &str) -> BillingResult<Vec<SubscriptionView>>;
}

/// Stripe client wrapper
#[derive(Clone)]
pub struct StripeClient {
    client: stripe::Client,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Self {
        Self {
            client: stripe::Client::new(config.secret_key),
        }
    }

    /// Create a client from environment variables
    pub fn from_env() -> BillingResult<Self> {
        Ok(Self::new(StripeConfig::from_env()?))
    }

    /// Access the underlying Stripe client
    pub fn inner(&self) -> &stripe::Client {
        &self.client
    }
}

#[async_trait]
impl PaymentProvider for StripeClient {
    async fn customer_by_email(&self, email: &str) -> BillingResult<Option<CustomerRef>> {
        let mut params = ListCustomers::new();
        params.email = Some(email);
        params.limit = Some(1);

        let customers = Customer::list(self.inner(), &params).await?;

        Ok(customers.data.into_iter().next().map(|customer| CustomerRef {
            id: customer.id.to_string(),
            email: customer.email,
        }))
    }

    async fn subscriptions_for(&self, customer_id: &str) -> BillingResult<Vec<SubscriptionView>> {
        let mut params = ListSubscriptions::new();
        params.customer = Some(customer_id.parse().map_err(|e| {
            BillingError::StripeApi(format!("invalid customer id {}: {}", customer_id, e))
        })?);

        let subscriptions = Subscription::list(self.inner(), &params).await?;

        Ok(subscriptions
            .data
            .into_iter()
            .map(subscription_view)
            .collect())
    }
}

/// Normalize one Stripe subscription into the provider-agnostic view
fn subscription_view(sub: Subscription) -> SubscriptionView {
    let price_id = sub
        .items
        .data
        .first()
        .and_then(|item| item.price.as_ref())
        .map(|price| price.id.to_string());

    SubscriptionView {
        id: sub.id.to_string(),
        status: sub.status.to_string(),
        price_id,
        period_start: OffsetDateTime::from_unix_timestamp(sub.current_period_start).ok(),
        period_end: OffsetDateTime::from_unix_timestamp(sub.current_period_end).ok(),
        cancel_at_period_end: sub.cancel_at_period_end,
    }
}
