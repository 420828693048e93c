// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for the Billing Core
//!
//! Tests critical boundary conditions and race conditions in:
//! - Claim coordination (concurrent claims, staleness window, retries)
//! - Discrepancy detection (date tolerance boundaries)
//! - Reconciliation (idempotence, membership-number preservation)

use std::sync::Arc;

use async_trait::async_trait;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use memberly_shared::PlanType;

use crate::client::{CustomerRef, PaymentProvider, SubscriptionView};
use crate::config::{BillingConfig, PriceCatalog};
use crate::error::{BillingError, BillingResult};
use crate::reconcile::ReconciliationService;
use crate::store::MemoryStore;

/// Scripted payment provider. Subscriptions sit behind a lock so tests can
/// change the external truth between reconciliation runs.
struct ScriptedProvider {
    customer: Option<CustomerRef>,
    subscriptions: std::sync::Mutex<Vec<SubscriptionView>>,
}

impl ScriptedProvider {
    fn new(customer: Option<CustomerRef>, subscriptions: Vec<SubscriptionView>) -> Self {
        Self {
            customer,
            subscriptions: std::sync::Mutex::new(subscriptions),
        }
    }

    fn set_subscriptions(&self, subscriptions: Vec<SubscriptionView>) {
        *self.subscriptions.lock().unwrap() = subscriptions;
    }
}

#[async_trait]
impl PaymentProvider for ScriptedProvider {
    async fn customer_by_email(&self, _email: &str) -> BillingResult<Option<CustomerRef>> {
        Ok(self.customer.clone())
    }

    async fn subscriptions_for(&self, _customer_id: &str) -> BillingResult<Vec<SubscriptionView>> {
        Ok(self.subscriptions.lock().unwrap().clone())
    }
}

fn customer() -> CustomerRef {
    CustomerRef {
        id: "cus_1".to_string(),
        email: Some("member@example.com".to_string()),
    }
}

fn subscription(status: &str, period_end: OffsetDateTime) -> SubscriptionView {
    SubscriptionView {
        id: "sub_1".to_string(),
        status: status.to_string(),
        price_id: Some("price_std".to_string()),
        period_start: Some(period_end - Duration::days(30)),
        period_end: Some(period_end),
        cancel_at_period_end: false,
    }
}

fn config() -> BillingConfig {
    BillingConfig::new(PriceCatalog::new().with_price("price_std", PlanType::Standard))
}

fn reconciliation(
    provider: Arc<ScriptedProvider>,
    store: Arc<MemoryStore>,
) -> ReconciliationService {
    ReconciliationService::new(config(), provider, store)
}

mod claim_tests {
    use super::*;
    use crate::ledger::{EventLedger, EventStatus};

    // =========================================================================
    // N concurrent claims on one event ID: exactly one winner
    // =========================================================================
    #[tokio::test]
    async fn concurrent_claims_have_exactly_one_winner() {
        use tokio::sync::Barrier;

        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(EventLedger::new(store));
        let barrier = Arc::new(Barrier::new(10));
        let mut handles = vec![];

        for _ in 0..10 {
            let ledger = Arc::clone(&ledger);
            let barrier = Arc::clone(&barrier);
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                ledger.claim("evt_race", "checkout.completed").await
            }));
        }

        let mut winners = 0;
        let mut duplicates = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => winners += 1,
                Err(e) if e.is_duplicate() => duplicates += 1,
                Err(other) => panic!("unexpected error: {:?}", other),
            }
        }

        assert_eq!(winners, 1, "exactly one claim must win");
        assert_eq!(duplicates, 9, "all other claims must see DuplicateEvent");
    }

    // =========================================================================
    // Staleness boundary: 4m59s-old claim is live, 5m01s-old is reclaimable
    // =========================================================================
    #[tokio::test]
    async fn fresh_processing_claim_within_window_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let ledger = EventLedger::new(store.clone());

        ledger.claim("evt_fresh", "invoice.paid").await.unwrap();
        store
            .backdate_event(
                "evt_fresh",
                OffsetDateTime::now_utc() - Duration::minutes(4) - Duration::seconds(59),
            )
            .await;

        let err = ledger.claim("evt_fresh", "invoice.paid").await.unwrap_err();
        assert!(err.is_duplicate());
    }

    #[tokio::test]
    async fn stale_processing_claim_past_window_is_reclaimed() {
        let store = Arc::new(MemoryStore::new());
        let ledger = EventLedger::new(store.clone());

        ledger.claim("evt_stale", "invoice.paid").await.unwrap();
        store
            .backdate_event(
                "evt_stale",
                OffsetDateTime::now_utc() - Duration::minutes(5) - Duration::seconds(1),
            )
            .await;

        ledger.claim("evt_stale", "invoice.paid").await.unwrap();

        let record = ledger.check("evt_stale").await.unwrap().unwrap();
        assert_eq!(record.status, EventStatus::Processing);
        assert_eq!(record.retry_count, 1);
    }

    // =========================================================================
    // Failed events: retry_count grows by exactly 1 per reclaim
    // =========================================================================
    #[tokio::test]
    async fn retry_count_increments_once_per_reclaim() {
        let store = Arc::new(MemoryStore::new());
        let ledger = EventLedger::new(store);

        ledger.claim("evt_retry", "invoice.paid").await.unwrap();
        for expected in 1..=3 {
            ledger.fail("evt_retry", "transient failure").await.unwrap();
            ledger.claim("evt_retry", "invoice.paid").await.unwrap();

            let record = ledger.check("evt_retry").await.unwrap().unwrap();
            assert_eq!(record.retry_count, expected);
        }
    }

    // =========================================================================
    // Completed events stay completed: duplicate carries the completion time
    // =========================================================================
    #[tokio::test]
    async fn completed_event_rejects_even_when_old() {
        let store = Arc::new(MemoryStore::new());
        let ledger = EventLedger::new(store.clone());

        ledger.claim("evt_done", "checkout.completed").await.unwrap();
        ledger.complete("evt_done").await.unwrap();
        // Well past the staleness window; completion still wins.
        store
            .backdate_event("evt_done", OffsetDateTime::now_utc() - Duration::hours(2))
            .await;

        match ledger.claim("evt_done", "checkout.completed").await.unwrap_err() {
            BillingError::DuplicateEvent { completed_at, .. } => {
                assert!(completed_at.is_some());
            }
            other => panic!("expected DuplicateEvent, got {:?}", other),
        }
    }
}

mod detector_tests {
    use super::*;
    use crate::discrepancy::{detect, Discrepancy};
    use crate::snapshot::{InternalSnapshot, MembershipView, StripeSnapshot};

    fn snapshots(
        membership_end: OffsetDateTime,
        external_end: OffsetDateTime,
    ) -> (StripeSnapshot, InternalSnapshot) {
        let external = StripeSnapshot {
            customer_id: "cus_1".to_string(),
            customer_email: Some("member@example.com".to_string()),
            subscription_id: "sub_1".to_string(),
            subscription_status: "active".to_string(),
            price_id: Some("price_std".to_string()),
            plan_type: PlanType::Standard,
            current_period_start: external_end - Duration::days(30),
            current_period_end: external_end,
            cancel_at_period_end: false,
        };
        let internal = InternalSnapshot {
            user_id: Uuid::new_v4(),
            user_email: "member@example.com".to_string(),
            membership: Some(MembershipView {
                id: Uuid::new_v4(),
                subscription_id: Some("sub_1".to_string()),
                status: "active".to_string(),
                plan_type: PlanType::Standard,
                start_date: membership_end - Duration::days(30),
                end_date: membership_end,
                auto_renew: true,
            }),
            card: None,
        };
        (external, internal)
    }

    // =========================================================================
    // Date tolerance: 23h59m apart is aligned, 24h00m01s apart is drift
    // =========================================================================
    #[test]
    fn dates_just_inside_tolerance_do_not_flag() {
        let end = OffsetDateTime::now_utc() + Duration::days(20);
        let (external, internal) =
            snapshots(end + Duration::hours(23) + Duration::minutes(59), end);

        let found = detect(Some(&external), Some(&internal));
        assert!(!found.contains(&Discrepancy::DateMismatch), "got {:?}", found);
    }

    #[test]
    fn dates_just_past_tolerance_flag_mismatch() {
        let end = OffsetDateTime::now_utc() + Duration::days(20);
        let (external, internal) =
            snapshots(end + Duration::hours(24) + Duration::seconds(1), end);

        let found = detect(Some(&external), Some(&internal));
        assert!(found.contains(&Discrepancy::DateMismatch), "got {:?}", found);
    }
}

mod reconcile_tests {
    use super::*;
    use crate::discrepancy::Discrepancy;
    use crate::store::{BillingStore, CardUpsert, MembershipUpsert};

    // =========================================================================
    // Missing internal records: one run creates user, membership, and card
    // =========================================================================
    #[tokio::test]
    async fn reconcile_creates_all_internal_records() {
        let end = OffsetDateTime::now_utc() + Duration::days(20);
        let provider = Arc::new(ScriptedProvider::new(
            Some(customer()),
            vec![subscription("active", end)],
        ));
        let store = Arc::new(MemoryStore::new());
        let service = reconciliation(provider, store.clone());
        let actor = Uuid::new_v4();

        let outcome = service.reconcile("member@example.com", actor).await.unwrap();
        assert!(outcome.reconciled);
        assert_eq!(
            outcome.discrepancies,
            vec![
                Discrepancy::MissingInternalUser,
                Discrepancy::MissingInternalMembership,
                Discrepancy::MissingInternalCard,
            ]
        );
        assert_eq!(outcome.actions_performed.len(), 3);

        let user = store
            .find_user_by_email("member@example.com")
            .await
            .unwrap()
            .expect("user created");
        assert_eq!(user.stripe_customer_id.as_deref(), Some("cus_1"));

        let membership = store
            .find_active_membership(user.id)
            .await
            .unwrap()
            .expect("membership created");
        assert_eq!(membership.status, "active");
        assert_eq!(membership.plan_type, "standard");
        assert!(membership.auto_renew);

        let card = store
            .find_membership_card(user.id)
            .await
            .unwrap()
            .expect("card created");
        assert_eq!(card.membership_number, "MBR-00000001");

        let audits = store.recent_audit_entries(10).await.unwrap();
        assert_eq!(audits.len(), 1);
        assert_eq!(audits[0].actor_id, actor);
        assert_eq!(audits[0].subscription_id.as_deref(), Some("sub_1"));
    }

    // =========================================================================
    // Idempotence: a second run on an aligned identity writes nothing
    // =========================================================================
    #[tokio::test]
    async fn second_run_on_aligned_identity_is_a_no_op() {
        let end = OffsetDateTime::now_utc() + Duration::days(20);
        let provider = Arc::new(ScriptedProvider::new(
            Some(customer()),
            vec![subscription("active", end)],
        ));
        let store = Arc::new(MemoryStore::new());
        let service = reconciliation(provider, store.clone());

        service
            .reconcile("member@example.com", Uuid::new_v4())
            .await
            .unwrap();
        let second = service
            .reconcile("member@example.com", Uuid::new_v4())
            .await
            .unwrap();

        assert!(!second.can_reconcile);
        assert!(!second.reconciled);
        assert_eq!(second.discrepancies, vec![Discrepancy::NoDiscrepancy]);
        assert!(second.actions_performed.is_empty());

        // No second audit entry: no-op runs write nothing.
        let audits = store.recent_audit_entries(10).await.unwrap();
        assert_eq!(audits.len(), 1);
    }

    // =========================================================================
    // Convergence after drift preserves the membership number
    // =========================================================================
    #[tokio::test]
    async fn convergence_after_drift_keeps_the_card_number() {
        let end = OffsetDateTime::now_utc() + Duration::days(20);
        let provider = Arc::new(ScriptedProvider::new(
            Some(customer()),
            vec![subscription("active", end)],
        ));
        let store = Arc::new(MemoryStore::new());
        let service = reconciliation(provider.clone(), store.clone());

        service
            .reconcile("member@example.com", Uuid::new_v4())
            .await
            .unwrap();

        // External truth moves on: the subscription lapses into past_due.
        provider.set_subscriptions(vec![subscription("past_due", end)]);

        let outcome = service
            .reconcile("member@example.com", Uuid::new_v4())
            .await
            .unwrap();
        assert!(outcome.reconciled);

        let user = store
            .find_user_by_email("member@example.com")
            .await
            .unwrap()
            .unwrap();
        let membership = store.find_active_membership(user.id).await.unwrap().unwrap();
        assert_eq!(membership.status, "past_due");

        let card = store.find_membership_card(user.id).await.unwrap().unwrap();
        assert_eq!(card.membership_number, "MBR-00000001", "number never regenerated");
        assert_eq!(card.status, "past_due");
    }

    // =========================================================================
    // Status drift scenario: exactly one discrepancy, one named action
    // =========================================================================
    #[tokio::test]
    async fn past_due_drift_reports_single_status_action() {
        let end = OffsetDateTime::now_utc() + Duration::days(20);
        let provider = Arc::new(ScriptedProvider::new(
            Some(customer()),
            vec![subscription("past_due", end)],
        ));
        let store = Arc::new(MemoryStore::new());

        // Seed aligned internal records, except the status.
        let user = store
            .upsert_user("member@example.com", Some("cus_1"))
            .await
            .unwrap();
        store
            .upsert_membership(MembershipUpsert {
                user_id: user.id,
                subscription_id: Some("sub_1".to_string()),
                status: "active".to_string(),
                plan_type: PlanType::Standard,
                start_date: end - Duration::days(30),
                end_date: end,
                auto_renew: true,
            })
            .await
            .unwrap();
        store
            .upsert_card(CardUpsert {
                user_id: user.id,
                membership_number: "MBR-00000001".to_string(),
                status: "active".to_string(),
                plan_type: PlanType::Standard,
                valid_from: end - Duration::days(30),
                valid_until: end,
            })
            .await
            .unwrap();

        let service = reconciliation(provider, store);
        let report = service.build_report("member@example.com").await.unwrap();

        assert_eq!(report.discrepancies, vec![Discrepancy::StatusMismatch]);
        assert_eq!(
            report.actions,
            vec!["Update membership status: active -> past_due"]
        );
        assert!(report.can_reconcile);
    }

    // =========================================================================
    // Negative outcomes: no customer / no subscription / malformed data
    // =========================================================================
    #[tokio::test]
    async fn missing_customer_is_a_structured_no_op() {
        let provider = Arc::new(ScriptedProvider::new(None, vec![]));
        let store = Arc::new(MemoryStore::new());
        let service = reconciliation(provider, store.clone());

        let outcome = service
            .reconcile("member@example.com", Uuid::new_v4())
            .await
            .unwrap();
        assert!(!outcome.can_reconcile);
        assert!(!outcome.reconciled);
        assert_eq!(outcome.discrepancies, vec![Discrepancy::NoExternalCustomer]);

        assert!(store
            .find_user_by_email("member@example.com")
            .await
            .unwrap()
            .is_none());
        assert!(store.recent_audit_entries(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn customer_without_subscriptions_reports_that_alone() {
        let provider = Arc::new(ScriptedProvider::new(Some(customer()), vec![]));
        let store = Arc::new(MemoryStore::new());
        let service = reconciliation(provider, store);

        let report = service.build_report("member@example.com").await.unwrap();
        assert!(report.external.is_none());
        assert_eq!(
            report.discrepancies,
            vec![Discrepancy::NoExternalSubscription]
        );
        assert!(!report.can_reconcile);
    }

    #[tokio::test]
    async fn missing_period_dates_are_a_hard_error() {
        let end = OffsetDateTime::now_utc() + Duration::days(20);
        let mut sub = subscription("active", end);
        sub.period_end = None;
        let provider = Arc::new(ScriptedProvider::new(Some(customer()), vec![sub]));
        let store = Arc::new(MemoryStore::new());
        let service = reconciliation(provider, store);

        let err = service.build_report("member@example.com").await.unwrap_err();
        assert!(
            matches!(err, BillingError::MalformedUpstream(_)),
            "got {:?}",
            err
        );
    }
}
