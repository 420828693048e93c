//! Discrepancy detection between the two billing truths
//!
//! `detect` is pure and deterministic: the same pair of snapshots always
//! produces the same flags in the same order. It is the unit the
//! reconciliation tests lean on hardest.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::snapshot::{InternalSnapshot, StripeSnapshot};

/// End dates from the two systems may disagree by clock/timezone rounding.
/// Differences within one day are noise, not drift.
pub const DATE_TOLERANCE_MS: i128 = 86_400_000;

/// One categorized form of divergence between the snapshots.
///
/// Values are independent flags, not a single status; a report may carry
/// several at once. `NoDiscrepancy` appears only when the set would
/// otherwise be empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Discrepancy {
    NoExternalCustomer,
    NoExternalSubscription,
    MissingInternalUser,
    MissingInternalMembership,
    StatusMismatch,
    PlanMismatch,
    DateMismatch,
    MissingInternalCard,
    CardStatusMismatch,
    CardDatesMismatch,
    NoDiscrepancy,
}

impl Discrepancy {
    /// Stable code used in audit entries and reports
    pub fn as_str(&self) -> &'static str {
        match self {
            Discrepancy::NoExternalCustomer => "NO_EXTERNAL_CUSTOMER",
            Discrepancy::NoExternalSubscription => "NO_EXTERNAL_SUBSCRIPTION",
            Discrepancy::MissingInternalUser => "MISSING_INTERNAL_USER",
            Discrepancy::MissingInternalMembership => "MISSING_INTERNAL_MEMBERSHIP",
            Discrepancy::StatusMismatch => "STATUS_MISMATCH",
            Discrepancy::PlanMismatch => "PLAN_MISMATCH",
            Discrepancy::DateMismatch => "DATE_MISMATCH",
            Discrepancy::MissingInternalCard => "MISSING_INTERNAL_CARD",
            Discrepancy::CardStatusMismatch => "CARD_STATUS_MISMATCH",
            Discrepancy::CardDatesMismatch => "CARD_DATES_MISMATCH",
            Discrepancy::NoDiscrepancy => "NO_DISCREPANCY",
        }
    }
}

impl std::fmt::Display for Discrepancy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn within_tolerance(a: OffsetDateTime, b: OffsetDateTime) -> bool {
    (a - b).whole_milliseconds().abs() <= DATE_TOLERANCE_MS
}

/// Compare the two snapshots and return the ordered discrepancy list.
///
/// Evaluation order and short-circuits:
/// 1. No external snapshot: `NO_EXTERNAL_CUSTOMER` only.
/// 2. No internal snapshot: the three `MISSING_INTERNAL_*` flags.
/// 3. Otherwise accumulate membership checks, then card checks.
/// 4. Empty set becomes `[NO_DISCREPANCY]`.
pub fn detect(
    external: Option<&StripeSnapshot>,
    internal: Option<&InternalSnapshot>,
) -> Vec<Discrepancy> {
    let Some(external) = external else {
        return vec![Discrepancy::NoExternalCustomer];
    };
    let Some(internal) = internal else {
        return vec![
            Discrepancy::MissingInternalUser,
            Discrepancy::MissingInternalMembership,
            Discrepancy::MissingInternalCard,
        ];
    };

    let mut found = Vec::new();

    match internal.membership.as_ref() {
        None => found.push(Discrepancy::MissingInternalMembership),
        Some(membership) => {
            if membership.status != external.subscription_status {
                found.push(Discrepancy::StatusMismatch);
            }
            if membership.plan_type != external.plan_type {
                found.push(Discrepancy::PlanMismatch);
            }
            if !within_tolerance(membership.end_date, external.current_period_end) {
                found.push(Discrepancy::DateMismatch);
            }
        }
    }

    match internal.card.as_ref() {
        None => found.push(Discrepancy::MissingInternalCard),
        // Card checks compare against the membership, so they only apply
        // when both records exist.
        Some(card) => {
            if let Some(membership) = internal.membership.as_ref() {
                if card.status != membership.status || card.plan_type != membership.plan_type {
                    found.push(Discrepancy::CardStatusMismatch);
                }
                if !within_tolerance(card.valid_until, membership.end_date) {
                    found.push(Discrepancy::CardDatesMismatch);
                }
            }
        }
    }

    if found.is_empty() {
        found.push(Discrepancy::NoDiscrepancy);
    }
    found
}
