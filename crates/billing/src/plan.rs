//! Reconciliation planner
//!
//! Maps a discrepancy list to human-readable action descriptions, in
//! detector order. Pure: the planner never mutates state, it only describes
//! what the executor will do.

use crate::discrepancy::Discrepancy;
use crate::snapshot::{InternalSnapshot, StripeSnapshot};

/// Describe the intended action for each detected discrepancy.
///
/// With no external snapshot there is nothing to converge onto, so a single
/// "no action possible" message is returned regardless of other flags.
pub fn plan(
    discrepancies: &[Discrepancy],
    external: Option<&StripeSnapshot>,
    internal: Option<&InternalSnapshot>,
) -> Vec<String> {
    let Some(external) = external else {
        return vec![
            "No external customer or subscription found; no reconciliation action possible"
                .to_string(),
        ];
    };

    if matches!(discrepancies, [Discrepancy::NoDiscrepancy]) {
        return vec!["Records are in sync; no action required".to_string()];
    }

    let membership = internal.and_then(|i| i.membership.as_ref());
    let mut actions = Vec::new();

    for discrepancy in discrepancies {
        match discrepancy {
            Discrepancy::MissingInternalUser => actions.push(format!(
                "Create internal user for {} linked to customer {}",
                external
                    .customer_email
                    .as_deref()
                    .unwrap_or("<unknown email>"),
                external.customer_id
            )),
            Discrepancy::MissingInternalMembership => actions.push(format!(
                "Create membership from subscription {} (status {}, plan {})",
                external.subscription_id, external.subscription_status, external.plan_type
            )),
            Discrepancy::StatusMismatch => actions.push(format!(
                "Update membership status: {} -> {}",
                membership.map(|m| m.status.as_str()).unwrap_or("none"),
                external.subscription_status
            )),
            Discrepancy::PlanMismatch => actions.push(format!(
                "Update membership plan: {} -> {}",
                membership
                    .map(|m| m.plan_type.as_str())
                    .unwrap_or("none"),
                external.plan_type
            )),
            Discrepancy::DateMismatch => actions.push(format!(
                "Update membership end date: {} -> {}",
                membership
                    .map(|m| m.end_date.to_string())
                    .unwrap_or_else(|| "none".to_string()),
                external.current_period_end
            )),
            Discrepancy::MissingInternalCard => actions.push(format!(
                "Issue membership card for plan {}",
                external.plan_type
            )),
            Discrepancy::CardStatusMismatch => actions.push(
                "Update card status and plan to match the membership".to_string(),
            ),
            Discrepancy::CardDatesMismatch => actions.push(
                "Update card validity dates to match the membership end date".to_string(),
            ),
            // The external-absence flags were handled by the early return;
            // NoDiscrepancy never co-occurs with other flags.
            Discrepancy::NoExternalCustomer
            | Discrepancy::NoExternalSubscription
            | Discrepancy::NoDiscrepancy => {}
        }
    }

    actions
}
