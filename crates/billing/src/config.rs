//! Billing configuration
//!
//! Explicit config structs passed into constructors. Binaries are the only
//! place environment variables are read; library code receives these structs
//! so tests never mutate the environment.

use std::collections::HashMap;

use memberly_shared::PlanType;

use crate::error::{BillingError, BillingResult};

/// Default event-ledger retention when `EVENT_RETENTION_DAYS` is unset
const DEFAULT_EVENT_RETENTION_DAYS: u32 = 30;

/// Maps the payment processor's price IDs to membership plans.
///
/// Unmapped price IDs resolve to `PlanType::Unknown` so catalog gaps surface
/// as visible plan mismatches during reconciliation instead of silently
/// landing members on a paid plan.
#[derive(Debug, Clone, Default)]
pub struct PriceCatalog {
    plans: HashMap<String, PlanType>,
}

impl PriceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration of one price ID
    pub fn with_price(mut self, price_id: impl Into<String>, plan: PlanType) -> Self {
        self.plans.insert(price_id.into(), plan);
        self
    }

    /// Resolve a subscription's price ID to a plan
    pub fn plan_for_price(&self, price_id: Option<&str>) -> PlanType {
        price_id
            .and_then(|id| self.plans.get(id).copied())
            .unwrap_or(PlanType::Unknown)
    }

    /// Load the catalog from `STRIPE_PRICE_*` environment variables.
    /// Unset variables simply leave that plan out of the catalog.
    pub fn from_env() -> Self {
        let mut catalog = Self::new();
        let vars = [
            ("STRIPE_PRICE_STANDARD", PlanType::Standard),
            ("STRIPE_PRICE_PREMIUM", PlanType::Premium),
            ("STRIPE_PRICE_FAMILY", PlanType::Family),
        ];
        for (var, plan) in vars {
            if let Ok(price_id) = std::env::var(var) {
                if !price_id.is_empty() {
                    catalog = catalog.with_price(price_id, plan);
                }
            }
        }
        catalog
    }
}

/// Top-level billing core configuration
#[derive(Debug, Clone)]
pub struct BillingConfig {
    pub price_catalog: PriceCatalog,
    /// Webhook event records older than this are eligible for cleanup
    pub event_retention_days: u32,
}

impl BillingConfig {
    pub fn new(price_catalog: PriceCatalog) -> Self {
        Self {
            price_catalog,
            event_retention_days: DEFAULT_EVENT_RETENTION_DAYS,
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> BillingResult<Self> {
        let event_retention_days = match std::env::var("EVENT_RETENTION_DAYS") {
            Ok(raw) => raw.parse::<u32>().map_err(|_| {
                BillingError::Config(format!("EVENT_RETENTION_DAYS is not a number: {}", raw))
            })?,
            Err(_) => DEFAULT_EVENT_RETENTION_DAYS,
        };

        Ok(Self {
            price_catalog: PriceCatalog::from_env(),
            event_retention_days,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapped_price_resolves_to_plan() {
        let catalog = PriceCatalog::new()
            .with_price("price_std", PlanType::Standard)
            .with_price("price_fam", PlanType::Family);

        assert_eq!(catalog.plan_for_price(Some("price_std")), PlanType::Standard);
        assert_eq!(catalog.plan_for_price(Some("price_fam")), PlanType::Family);
    }

    #[test]
    fn unmapped_or_missing_price_is_unknown() {
        let catalog = PriceCatalog::new().with_price("price_std", PlanType::Standard);

        assert_eq!(catalog.plan_for_price(Some("price_other")), PlanType::Unknown);
        assert_eq!(catalog.plan_for_price(None), PlanType::Unknown);
    }
}
