//! Core membership domain types

use serde::{Deserialize, Serialize};

/// Membership plan resolved from the payment processor's price ID.
///
/// `Unknown` marks a price ID with no catalog entry. It is a real, visible
/// value rather than a fallback to a paid plan, so catalog gaps surface as
/// plan mismatches during reconciliation instead of corrupting records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanType {
    Standard,
    Premium,
    Family,
    Unknown,
}

impl PlanType {
    /// Stable string code stored in the database
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanType::Standard => "standard",
            PlanType::Premium => "premium",
            PlanType::Family => "family",
            PlanType::Unknown => "unknown",
        }
    }

    /// Parse a stored code; anything unrecognized maps to `Unknown`
    pub fn from_code(code: &str) -> Self {
        match code {
            "standard" => PlanType::Standard,
            "premium" => PlanType::Premium,
            "family" => PlanType::Family,
            _ => PlanType::Unknown,
        }
    }
}

impl std::fmt::Display for PlanType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Format a card's human-facing membership number from its sequence value.
///
/// Numbers are assigned once at card creation and never regenerated.
pub fn format_membership_number(seq: i64) -> String {
    format!("MBR-{:08}", seq)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_codes_round_trip() {
        for plan in [PlanType::Standard, PlanType::Premium, PlanType::Family] {
            assert_eq!(PlanType::from_code(plan.as_str()), plan);
        }
    }

    #[test]
    fn unrecognized_code_is_unknown() {
        assert_eq!(PlanType::from_code("price_123"), PlanType::Unknown);
        assert_eq!(PlanType::from_code(""), PlanType::Unknown);
    }

    #[test]
    fn membership_numbers_are_zero_padded() {
        assert_eq!(format_membership_number(42), "MBR-00000042");
        assert_eq!(format_membership_number(12_345_678), "MBR-12345678");
    }
}
