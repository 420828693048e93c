//! In-memory implementation of `BillingStore`
//!
//! Mirrors the Postgres store's conditional semantics: every primitive takes
//! the single state lock for its whole check-and-write, so a conditional
//! insert or update is exactly as atomic as its SQL counterpart. Used by
//! tests and local development; never by production deployments.

use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::audit::{NewAuditEntry, ReconciliationAudit};
use crate::error::BillingResult;
use crate::ledger::{EventStatus, WebhookEventRecord};

use super::{BillingStore, CardRecord, CardUpsert, MembershipRecord, MembershipUpsert, UserRecord};

#[derive(Default)]
struct MemoryState {
    events: HashMap<String, WebhookEventRecord>,
    users: HashMap<Uuid, UserRecord>,
    memberships: HashMap<Uuid, MembershipRecord>,
    cards: HashMap<Uuid, CardRecord>,
    audits: Vec<ReconciliationAudit>,
    card_seq: i64,
}

/// In-memory store with the same conditional semantics as Postgres
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
impl MemoryStore {
    /// Rewrite an event's timestamps for staleness/retention tests
    pub(crate) async fn backdate_event(&self, event_id: &str, to: OffsetDateTime) {
        let mut state = self.state.lock().await;
        if let Some(record) = state.events.get_mut(event_id) {
            record.claimed_at = to;
            if record.completed_at.is_some() {
                record.completed_at = Some(to);
            }
            if record.failed_at.is_some() {
                record.failed_at = Some(to);
            }
        }
    }
}

#[async_trait]
impl BillingStore for MemoryStore {
    async fn insert_event(
        &self,
        event_id: &str,
        event_type: &str,
        claimed_at: OffsetDateTime,
    ) -> BillingResult<bool> {
        let mut state = self.state.lock().await;
        if state.events.contains_key(event_id) {
            return Ok(false);
        }
        state.events.insert(
            event_id.to_string(),
            WebhookEventRecord {
                event_id: event_id.to_string(),
                event_type: event_type.to_string(),
                status: EventStatus::Processing,
                retry_count: 0,
                claimed_at,
                completed_at: None,
                failed_at: None,
                error_message: None,
            },
        );
        Ok(true)
    }

    async fn find_event(&self, event_id: &str) -> BillingResult<Option<WebhookEventRecord>> {
        let state = self.state.lock().await;
        Ok(state.events.get(event_id).cloned())
    }

    async fn reclaim_event(
        &self,
        event_id: &str,
        stale_before: OffsetDateTime,
        claimed_at: OffsetDateTime,
    ) -> BillingResult<bool> {
        let mut state = self.state.lock().await;
        let Some(record) = state.events.get_mut(event_id) else {
            return Ok(false);
        };

        let reclaimable = match record.status {
            EventStatus::Failed => true,
            EventStatus::Processing => record.claimed_at < stale_before,
            EventStatus::Completed => false,
        };
        if !reclaimable {
            return Ok(false);
        }

        record.status = EventStatus::Processing;
        record.retry_count += 1;
        record.claimed_at = claimed_at;
        record.failed_at = None;
        record.error_message = None;
        Ok(true)
    }

    async fn complete_event(
        &self,
        event_id: &str,
        completed_at: OffsetDateTime,
    ) -> BillingResult<()> {
        let mut state = self.state.lock().await;
        if let Some(record) = state.events.get_mut(event_id) {
            record.status = EventStatus::Completed;
            record.completed_at = Some(completed_at);
        }
        Ok(())
    }

    async fn fail_event(
        &self,
        event_id: &str,
        message: &str,
        failed_at: OffsetDateTime,
    ) -> BillingResult<()> {
        let mut state = self.state.lock().await;
        if let Some(record) = state.events.get_mut(event_id) {
            record.status = EventStatus::Failed;
            record.failed_at = Some(failed_at);
            record.error_message = Some(message.to_string());
        }
        Ok(())
    }

    async fn delete_events_before(&self, cutoff: OffsetDateTime) -> BillingResult<u64> {
        let mut state = self.state.lock().await;
        let before = state.events.len();
        state.events.retain(|_, record| {
            let last_activity = record
                .completed_at
                .or(record.failed_at)
                .unwrap_or(record.claimed_at);
            last_activity >= cutoff
        });
        Ok((before - state.events.len()) as u64)
    }

    async fn find_user_by_email(&self, email: &str) -> BillingResult<Option<UserRecord>> {
        let state = self.state.lock().await;
        Ok(state.users.values().find(|u| u.email == email).cloned())
    }

    async fn upsert_user(
        &self,
        email: &str,
        stripe_customer_id: Option<&str>,
    ) -> BillingResult<UserRecord> {
        let mut state = self.state.lock().await;
        if let Some(user) = state.users.values_mut().find(|u| u.email == email) {
            if let Some(customer_id) = stripe_customer_id {
                user.stripe_customer_id = Some(customer_id.to_string());
            }
            return Ok(user.clone());
        }

        let user = UserRecord {
            id: Uuid::new_v4(),
            email: email.to_string(),
            stripe_customer_id: stripe_customer_id.map(str::to_string),
            created_at: OffsetDateTime::now_utc(),
        };
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_active_membership(
        &self,
        user_id: Uuid,
    ) -> BillingResult<Option<MembershipRecord>> {
        let state = self.state.lock().await;
        Ok(state.memberships.get(&user_id).cloned())
    }

    async fn upsert_membership(
        &self,
        membership: MembershipUpsert,
    ) -> BillingResult<MembershipRecord> {
        let mut state = self.state.lock().await;
        let now = OffsetDateTime::now_utc();
        let id = state
            .memberships
            .get(&membership.user_id)
            .map(|existing| existing.id)
            .unwrap_or_else(Uuid::new_v4);

        let record = MembershipRecord {
            id,
            user_id: membership.user_id,
            subscription_id: membership.subscription_id,
            status: membership.status,
            plan_type: membership.plan_type.as_str().to_string(),
            start_date: membership.start_date,
            end_date: membership.end_date,
            auto_renew: membership.auto_renew,
            updated_at: now,
        };
        state.memberships.insert(membership.user_id, record.clone());
        Ok(record)
    }

    async fn find_membership_card(&self, user_id: Uuid) -> BillingResult<Option<CardRecord>> {
        let state = self.state.lock().await;
        Ok(state.cards.get(&user_id).cloned())
    }

    async fn upsert_card(&self, card: CardUpsert) -> BillingResult<CardRecord> {
        let mut state = self.state.lock().await;
        let now = OffsetDateTime::now_utc();

        // An existing card keeps its id and membership number.
        let (id, membership_number) = match state.cards.get(&card.user_id) {
            Some(existing) => (existing.id, existing.membership_number.clone()),
            None => (Uuid::new_v4(), card.membership_number),
        };

        let record = CardRecord {
            id,
            user_id: card.user_id,
            membership_number,
            status: card.status,
            plan_type: card.plan_type.as_str().to_string(),
            valid_from: card.valid_from,
            valid_until: card.valid_until,
            updated_at: now,
        };
        state.cards.insert(card.user_id, record.clone());
        Ok(record)
    }

    async fn next_card_number(&self) -> BillingResult<i64> {
        let mut state = self.state.lock().await;
        state.card_seq += 1;
        Ok(state.card_seq)
    }

    async fn append_audit_entry(&self, entry: NewAuditEntry) -> BillingResult<Uuid> {
        let mut state = self.state.lock().await;
        let audit = ReconciliationAudit {
            id: Uuid::new_v4(),
            actor_id: entry.actor_id,
            user_email: entry.user_email,
            subscription_id: entry.subscription_id,
            discrepancies: entry.discrepancies,
            actions: entry.actions,
            created_at: OffsetDateTime::now_utc(),
        };
        let id = audit.id;
        state.audits.push(audit);
        Ok(id)
    }

    async fn recent_audit_entries(&self, limit: i64) -> BillingResult<Vec<ReconciliationAudit>> {
        let state = self.state.lock().await;
        Ok(state
            .audits
            .iter()
            .rev()
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}
