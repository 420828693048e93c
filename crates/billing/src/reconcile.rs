//! Two-source reconciliation
//!
//! Builds a fresh report comparing the payment processor's view of a member
//! with the local records, then converges the local records onto the
//! processor. Every write is an idempotent create-or-update, so a partial
//! failure is repaired by simply running reconciliation again; there is no
//! distributed transaction.

use std::sync::Arc;

use memberly_shared::format_membership_number;
use serde::Serialize;
use uuid::Uuid;

use crate::client::{PaymentProvider, SubscriptionView};
use crate::config::BillingConfig;
use crate::discrepancy::{detect, Discrepancy};
use crate::error::{BillingError, BillingResult};
use crate::plan::plan;
use crate::snapshot::{CardView, InternalSnapshot, MembershipView, StripeSnapshot};
use crate::store::{BillingStore, CardUpsert, MembershipUpsert};
use crate::audit::NewAuditEntry;

/// Read-only reconciliation report for one member identity.
/// Produced fresh on every call; never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationReport {
    pub email: String,
    pub external: Option<StripeSnapshot>,
    pub internal: Option<InternalSnapshot>,
    pub discrepancies: Vec<Discrepancy>,
    pub can_reconcile: bool,
    pub actions: Vec<String>,
}

/// Structured result of a reconciliation run.
/// `reconciled == false` is a normal outcome, not an error.
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationOutcome {
    pub email: String,
    pub can_reconcile: bool,
    pub reconciled: bool,
    pub discrepancies: Vec<Discrepancy>,
    pub actions_performed: Vec<String>,
    pub message: String,
}

/// Snapshot builder + discrepancy detection + plan execution
pub struct ReconciliationService {
    config: BillingConfig,
    payments: Arc<dyn PaymentProvider>,
    store: Arc<dyn BillingStore>,
}

impl ReconciliationService {
    pub fn new(
        config: BillingConfig,
        payments: Arc<dyn PaymentProvider>,
        store: Arc<dyn BillingStore>,
    ) -> Self {
        Self {
            config,
            payments,
            store,
        }
    }

    /// Build the reconciliation report for one member identity.
    ///
    /// Fetches external truth (customer, then subscriptions, applying the
    /// active-or-past_due tie-break) and internal truth (user, membership,
    /// card), detects discrepancies, and attaches the action plan.
    pub async fn build_report(&self, email: &str) -> BillingResult<ReconciliationReport> {
        let customer = self.payments.customer_by_email(email).await?;

        let mut customer_found = false;
        let mut external = None;
        if let Some(customer) = customer {
            customer_found = true;
            let subscriptions = self.payments.subscriptions_for(&customer.id).await?;
            if let Some(subscription) = select_subscription(&subscriptions) {
                external = Some(self.external_snapshot(&customer.id, customer.email, subscription)?);
            }
        }

        let internal = match self.store.find_user_by_email(email).await? {
            Some(user) => {
                let membership = self
                    .store
                    .find_active_membership(user.id)
                    .await?
                    .map(MembershipView::from);
                let card = self
                    .store
                    .find_membership_card(user.id)
                    .await?
                    .map(CardView::from);
                Some(InternalSnapshot {
                    user_id: user.id,
                    user_email: user.email,
                    membership,
                    card,
                })
            }
            None => None,
        };

        // A customer without any subscription is its own category: there is
        // a processor record, just nothing to converge onto.
        let discrepancies = if customer_found && external.is_none() {
            vec![Discrepancy::NoExternalSubscription]
        } else {
            detect(external.as_ref(), internal.as_ref())
        };

        let can_reconcile =
            external.is_some() && !discrepancies.contains(&Discrepancy::NoDiscrepancy);
        let actions = plan(&discrepancies, external.as_ref(), internal.as_ref());

        Ok(ReconciliationReport {
            email: email.to_string(),
            external,
            internal,
            discrepancies,
            can_reconcile,
            actions,
        })
    }

    /// Reconcile one member's internal records onto the processor's truth.
    ///
    /// Re-derives the report rather than trusting a caller-supplied one, so
    /// the plan executed is always fresh. When there is nothing actionable
    /// the call returns a structured no-op outcome and writes nothing, not
    /// even an audit entry.
    pub async fn reconcile(
        &self,
        email: &str,
        actor_id: Uuid,
    ) -> BillingResult<ReconciliationOutcome> {
        let report = self.build_report(email).await?;

        let external = match report.external.clone() {
            Some(external) => external,
            None => {
                tracing::info!(email = %email, "Reconciliation skipped, no external truth");
                return Ok(ReconciliationOutcome {
                    email: report.email,
                    can_reconcile: false,
                    reconciled: false,
                    discrepancies: report.discrepancies,
                    actions_performed: Vec::new(),
                    message: "No external subscription found; nothing to reconcile against"
                        .to_string(),
                });
            }
        };

        if !report.can_reconcile {
            tracing::info!(email = %email, "Reconciliation skipped, records already convergent");
            return Ok(ReconciliationOutcome {
                email: report.email,
                can_reconcile: false,
                reconciled: false,
                discrepancies: report.discrepancies,
                actions_performed: Vec::new(),
                message: "Records already convergent; nothing to reconcile".to_string(),
            });
        }

        let mut performed = Vec::new();

        // Step 1: ensure the internal user exists.
        let user_id = match report.internal.as_ref() {
            Some(internal) => internal.user_id,
            None => {
                let user = self
                    .store
                    .upsert_user(email, Some(&external.customer_id))
                    .await?;
                performed.push(format!(
                    "Created internal user {} linked to customer {}",
                    email, external.customer_id
                ));
                user.id
            }
        };

        // Step 2: converge the membership onto the external subscription.
        let had_membership = report
            .internal
            .as_ref()
            .and_then(|i| i.membership.as_ref())
            .is_some();
        let membership = self
            .store
            .upsert_membership(MembershipUpsert {
                user_id,
                subscription_id: Some(external.subscription_id.clone()),
                status: external.subscription_status.clone(),
                plan_type: external.plan_type,
                start_date: external.current_period_start,
                end_date: external.current_period_end,
                auto_renew: !external.cancel_at_period_end,
            })
            .await?;
        performed.push(if had_membership {
            format!(
                "Updated membership to subscription {} (status {}, plan {}, ends {})",
                external.subscription_id,
                external.subscription_status,
                external.plan_type,
                external.current_period_end
            )
        } else {
            format!(
                "Created membership from subscription {} (status {}, plan {})",
                external.subscription_id, external.subscription_status, external.plan_type
            )
        });

        // Step 3: converge the card. A fresh membership number is drawn only
        // when no card exists; an existing card keeps its number.
        let existing_number = report
            .internal
            .as_ref()
            .and_then(|i| i.card.as_ref())
            .map(|card| card.membership_number.clone());
        let (membership_number, issuing) = match existing_number {
            Some(number) => (number, false),
            None => {
                let seq = self.store.next_card_number().await?;
                (format_membership_number(seq), true)
            }
        };
        let card = self
            .store
            .upsert_card(CardUpsert {
                user_id,
                membership_number,
                status: membership.status.clone(),
                plan_type: external.plan_type,
                valid_from: external.current_period_start,
                valid_until: external.current_period_end,
            })
            .await?;
        performed.push(if issuing {
            format!("Issued membership card {}", card.membership_number)
        } else {
            format!(
                "Updated card {} to match the membership",
                card.membership_number
            )
        });

        // Step 4: audit what actually happened.
        let discrepancy_codes: Vec<String> = report
            .discrepancies
            .iter()
            .map(|d| d.as_str().to_string())
            .collect();
        let audit_id = self
            .store
            .append_audit_entry(NewAuditEntry {
                actor_id,
                user_email: email.to_string(),
                subscription_id: Some(external.subscription_id.clone()),
                discrepancies: discrepancy_codes,
                actions: performed.clone(),
            })
            .await?;

        tracing::info!(
            email = %email,
            actor_id = %actor_id,
            audit_id = %audit_id,
            subscription_id = %external.subscription_id,
            actions = performed.len(),
            "Reconciled membership records"
        );

        let message = format!(
            "Reconciled {} against subscription {}",
            email, external.subscription_id
        );
        Ok(ReconciliationOutcome {
            email: report.email,
            can_reconcile: true,
            reconciled: true,
            discrepancies: report.discrepancies,
            actions_performed: performed,
            message,
        })
    }

    /// Most recent reconciliation audit entries, newest first
    pub async fn recent_audits(
        &self,
        limit: i64,
    ) -> BillingResult<Vec<crate::audit::ReconciliationAudit>> {
        self.store.recent_audit_entries(limit).await
    }

    /// Normalize the selected subscription into the external snapshot.
    /// Missing period bounds are malformed upstream data, never defaulted.
    fn external_snapshot(
        &self,
        customer_id: &str,
        customer_email: Option<String>,
        subscription: &SubscriptionView,
    ) -> BillingResult<StripeSnapshot> {
        let current_period_start = subscription.period_start.ok_or_else(|| {
            BillingError::MalformedUpstream(format!(
                "subscription {} missing current_period_start",
                subscription.id
            ))
        })?;
        let current_period_end = subscription.period_end.ok_or_else(|| {
            BillingError::MalformedUpstream(format!(
                "subscription {} missing current_period_end",
                subscription.id
            ))
        })?;

        Ok(StripeSnapshot {
            customer_id: customer_id.to_string(),
            customer_email,
            subscription_id: subscription.id.clone(),
            subscription_status: subscription.status.clone(),
            price_id: subscription.price_id.clone(),
            plan_type: self
                .config
                .price_catalog
                .plan_for_price(subscription.price_id.as_deref()),
            current_period_start,
            current_period_end,
            cancel_at_period_end: subscription.cancel_at_period_end,
        })
    }
}

/// Tie-break when a customer has multiple subscriptions: first with status
/// `active` or `past_due`, else the first subscription. Preserved literally
/// from the upstream business rule.
fn select_subscription(subscriptions: &[SubscriptionView]) -> Option<&SubscriptionView> {
    subscriptions
        .iter()
        .find(|s| s.status == "active" || s.status == "past_due")
        .or_else(|| subscriptions.first())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(id: &str, status: &str) -> SubscriptionView {
        let now = time::OffsetDateTime::now_utc();
        SubscriptionView {
            id: id.to_string(),
            status: status.to_string(),
            price_id: Some("price_std".to_string()),
            period_start: Some(now),
            period_end: Some(now + time::Duration::days(30)),
            cancel_at_period_end: false,
        }
    }

    #[test]
    fn prefers_active_or_past_due_subscription() {
        let subs = vec![sub("sub_a", "canceled"), sub("sub_b", "past_due"), sub("sub_c", "active")];
        assert_eq!(select_subscription(&subs).map(|s| s.id.as_str()), Some("sub_b"));
    }

    #[test]
    fn falls_back_to_first_subscription() {
        let subs = vec![sub("sub_a", "canceled"), sub("sub_b", "incomplete")];
        assert_eq!(select_subscription(&subs).map(|s| s.id.as_str()), Some("sub_a"));
        assert!(select_subscription(&[]).is_none());
    }
}
