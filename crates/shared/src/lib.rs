//! Shared domain types for the Memberly workspace
//!
//! Kept dependency-light so every crate can use these types without pulling
//! in storage or payment machinery.

pub mod types;

pub use types::{format_membership_number, PlanType};
