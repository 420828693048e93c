//! Postgres implementation of `BillingStore`
//!
//! Every conditional primitive is a single statement so atomicity comes from
//! the database, never from application-side locking. Row counts report
//! whether a conditional insert/update took effect.

use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::audit::{NewAuditEntry, ReconciliationAudit};
use crate::error::{BillingError, BillingResult};
use crate::ledger::{EventStatus, WebhookEventRecord};

use super::{BillingStore, CardRecord, CardUpsert, MembershipRecord, MembershipUpsert, UserRecord};

/// Production store over a Postgres pool
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run the embedded schema migrations
    pub async fn migrate(&self) -> BillingResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| BillingError::Storage(e.to_string()))?;
        Ok(())
    }
}

/// Raw event row; status decoded separately so an unexpected code surfaces
/// as a storage error instead of a silent misread.
#[derive(sqlx::FromRow)]
struct EventRow {
    event_id: String,
    event_type: String,
    status: String,
    retry_count: i32,
    claimed_at: OffsetDateTime,
    completed_at: Option<OffsetDateTime>,
    failed_at: Option<OffsetDateTime>,
    error_message: Option<String>,
}

impl EventRow {
    fn into_record(self) -> BillingResult<WebhookEventRecord> {
        let status = EventStatus::from_code(&self.status).ok_or_else(|| {
            BillingError::Storage(format!(
                "unknown event status '{}' for event {}",
                self.status, self.event_id
            ))
        })?;
        Ok(WebhookEventRecord {
            event_id: self.event_id,
            event_type: self.event_type,
            status,
            retry_count: self.retry_count,
            claimed_at: self.claimed_at,
            completed_at: self.completed_at,
            failed_at: self.failed_at,
            error_message: self.error_message,
        })
    }
}

#[async_trait]
impl BillingStore for PostgresStore {
    async fn insert_event(
        &self,
        event_id: &str,
        event_type: &str,
        claimed_at: OffsetDateTime,
    ) -> BillingResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO webhook_events (event_id, event_type, status, retry_count, claimed_at)
            VALUES ($1, $2, 'processing', 0, $3)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(event_id)
        .bind(event_type)
        .bind(claimed_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_event(&self, event_id: &str) -> BillingResult<Option<WebhookEventRecord>> {
        let row: Option<EventRow> = sqlx::query_as(
            r#"
            SELECT event_id, event_type, status, retry_count,
                   claimed_at, completed_at, failed_at, error_message
            FROM webhook_events
            WHERE event_id = $1
            "#,
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(EventRow::into_record).transpose()
    }

    async fn reclaim_event(
        &self,
        event_id: &str,
        stale_before: OffsetDateTime,
        claimed_at: OffsetDateTime,
    ) -> BillingResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_events
            SET status = 'processing',
                retry_count = retry_count + 1,
                claimed_at = $3,
                failed_at = NULL,
                error_message = NULL
            WHERE event_id = $1
              AND (status = 'failed'
                   OR (status = 'processing' AND claimed_at < $2))
            "#,
        )
        .bind(event_id)
        .bind(stale_before)
        .bind(claimed_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn complete_event(
        &self,
        event_id: &str,
        completed_at: OffsetDateTime,
    ) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE webhook_events
            SET status = 'completed', completed_at = $2
            WHERE event_id = $1
            "#,
        )
        .bind(event_id)
        .bind(completed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fail_event(
        &self,
        event_id: &str,
        message: &str,
        failed_at: OffsetDateTime,
    ) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE webhook_events
            SET status = 'failed', failed_at = $3, error_message = $2
            WHERE event_id = $1
            "#,
        )
        .bind(event_id)
        .bind(message)
        .bind(failed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_events_before(&self, cutoff: OffsetDateTime) -> BillingResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM webhook_events
            WHERE COALESCE(completed_at, failed_at, claimed_at) < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn find_user_by_email(&self, email: &str) -> BillingResult<Option<UserRecord>> {
        let user = sqlx::query_as::<_, UserRecord>(
            r#"
            SELECT id, email, stripe_customer_id, created_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn upsert_user(
        &self,
        email: &str,
        stripe_customer_id: Option<&str>,
    ) -> BillingResult<UserRecord> {
        let user = sqlx::query_as::<_, UserRecord>(
            r#"
            INSERT INTO users (email, stripe_customer_id)
            VALUES ($1, $2)
            ON CONFLICT (email) DO UPDATE SET
                stripe_customer_id = COALESCE(EXCLUDED.stripe_customer_id, users.stripe_customer_id)
            RETURNING id, email, stripe_customer_id, created_at
            "#,
        )
        .bind(email)
        .bind(stripe_customer_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(user)
    }

    async fn find_active_membership(
        &self,
        user_id: Uuid,
    ) -> BillingResult<Option<MembershipRecord>> {
        let membership = sqlx::query_as::<_, MembershipRecord>(
            r#"
            SELECT id, user_id, subscription_id, status, plan_type,
                   start_date, end_date, auto_renew, updated_at
            FROM memberships
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(membership)
    }

    async fn upsert_membership(
        &self,
        membership: MembershipUpsert,
    ) -> BillingResult<MembershipRecord> {
        let record = sqlx::query_as::<_, MembershipRecord>(
            r#"
            INSERT INTO memberships
                (user_id, subscription_id, status, plan_type, start_date, end_date, auto_renew)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (user_id) DO UPDATE SET
                subscription_id = EXCLUDED.subscription_id,
                status = EXCLUDED.status,
                plan_type = EXCLUDED.plan_type,
                start_date = EXCLUDED.start_date,
                end_date = EXCLUDED.end_date,
                auto_renew = EXCLUDED.auto_renew,
                updated_at = NOW()
            RETURNING id, user_id, subscription_id, status, plan_type,
                      start_date, end_date, auto_renew, updated_at
            "#,
        )
        .bind(membership.user_id)
        .bind(&membership.subscription_id)
        .bind(&membership.status)
        .bind(membership.plan_type.as_str())
        .bind(membership.start_date)
        .bind(membership.end_date)
        .bind(membership.auto_renew)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    async fn find_membership_card(&self, user_id: Uuid) -> BillingResult<Option<CardRecord>> {
        let card = sqlx::query_as::<_, CardRecord>(
            r#"
            SELECT id, user_id, membership_number, status, plan_type,
                   valid_from, valid_until, updated_at
            FROM membership_cards
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(card)
    }

    async fn upsert_card(&self, card: CardUpsert) -> BillingResult<CardRecord> {
        // membership_number is deliberately absent from the update set:
        // an existing card keeps its number.
        let record = sqlx::query_as::<_, CardRecord>(
            r#"
            INSERT INTO membership_cards
                (user_id, membership_number, status, plan_type, valid_from, valid_until)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id) DO UPDATE SET
                status = EXCLUDED.status,
                plan_type = EXCLUDED.plan_type,
                valid_from = EXCLUDED.valid_from,
                valid_until = EXCLUDED.valid_until,
                updated_at = NOW()
            RETURNING id, user_id, membership_number, status, plan_type,
                      valid_from, valid_until, updated_at
            "#,
        )
        .bind(card.user_id)
        .bind(&card.membership_number)
        .bind(&card.status)
        .bind(card.plan_type.as_str())
        .bind(card.valid_from)
        .bind(card.valid_until)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    async fn next_card_number(&self) -> BillingResult<i64> {
        let row: (i64,) = sqlx::query_as("SELECT nextval('membership_number_seq')")
            .fetch_one(&self.pool)
            .await?;

        Ok(row.0)
    }

    async fn append_audit_entry(&self, entry: NewAuditEntry) -> BillingResult<Uuid> {
        let row: (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO reconciliation_audit
                (actor_id, user_email, subscription_id, discrepancies, actions)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(entry.actor_id)
        .bind(&entry.user_email)
        .bind(&entry.subscription_id)
        .bind(&entry.discrepancies)
        .bind(&entry.actions)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    async fn recent_audit_entries(&self, limit: i64) -> BillingResult<Vec<ReconciliationAudit>> {
        let entries = sqlx::query_as::<_, ReconciliationAudit>(
            r#"
            SELECT id, actor_id, user_email, subscription_id,
                   discrepancies, actions, created_at
            FROM reconciliation_audit
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }
}
