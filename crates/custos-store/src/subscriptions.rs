use chrono::{DateTime, Duration, Utc};
use custos_core::{AccountId, CustosError, Result, Subscription, SubscriptionId, SubscriptionStatus};
use rusqlite::{OptionalExtension, Row, params};
use tracing::debug;

use crate::store::{Store, col_parse, col_ts, col_ts_opt, col_uuid, store_err, ts, ts_opt};

const SUBSCRIPTION_COLUMNS: &str = "id, account_id, plan, status, payee, renewal_cost_usd, \
     payment_value, expires_at, auto_renewal_enabled, last_renewal_tx, renewal_failed_at, \
     renewal_attempts, created_at, updated_at";

fn subscription_from_row(row: &Row<'_>) -> rusqlite::Result<Subscription> {
    Ok(Subscription {
        id: col_uuid(row, 0)?,
        account_id: col_uuid(row, 1)?,
        plan: row.get(2)?,
        status: col_parse(row, 3)?,
        payee: col_parse(row, 4)?,
        renewal_cost_usd: row.get(5)?,
        payment_value: col_parse(row, 6)?,
        expires_at: col_ts(row, 7)?,
        auto_renewal_enabled: row.get(8)?,
        last_renewal_tx: row.get(9)?,
        renewal_failed_at: col_ts_opt(row, 10)?,
        renewal_attempts: row.get(11)?,
        created_at: col_ts(row, 12)?,
        updated_at: col_ts(row, 13)?,
    })
}

impl Store {
    pub fn insert_subscription(&self, sub: &Subscription) -> Result<()> {
        let db = self.db();
        db.execute(
            &format!(
                "INSERT INTO subscriptions ({SUBSCRIPTION_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
            ),
            params![
                sub.id.to_string(),
                sub.account_id.to_string(),
                sub.plan,
                sub.status.as_str(),
                sub.payee.as_str(),
                sub.renewal_cost_usd,
                sub.payment_value.to_string(),
                ts(sub.expires_at),
                sub.auto_renewal_enabled,
                sub.last_renewal_tx,
                ts_opt(sub.renewal_failed_at),
                sub.renewal_attempts,
                ts(sub.created_at),
                ts(sub.updated_at),
            ],
        )
        .map_err(store_err)?;
        Ok(())
    }

    pub fn get_subscription(&self, id: SubscriptionId) -> Result<Option<Subscription>> {
        let db = self.db();
        db.query_row(
            &format!("SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE id = ?1"),
            params![id.to_string()],
            subscription_from_row,
        )
        .optional()
        .map_err(store_err)
    }

    pub fn require_subscription(&self, id: SubscriptionId) -> Result<Subscription> {
        self.get_subscription(id)?
            .ok_or(CustosError::SubscriptionNotFound(id))
    }

    pub fn subscriptions_for_account(&self, account_id: AccountId) -> Result<Vec<Subscription>> {
        let db = self.db();
        let mut stmt = db
            .prepare(&format!(
                "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE account_id = ?1
                 ORDER BY created_at"
            ))
            .map_err(store_err)?;
        let rows = stmt
            .query_map(params![account_id.to_string()], subscription_from_row)
            .map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    /// Subscriptions with auto-renewal on, still active, and expired at or before `now`.
    pub fn due_subscriptions(&self, now: DateTime<Utc>) -> Result<Vec<Subscription>> {
        let db = self.db();
        let mut stmt = db
            .prepare(&format!(
                "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions
                 WHERE auto_renewal_enabled = 1 AND status = ?1 AND expires_at <= ?2
                 ORDER BY expires_at"
            ))
            .map_err(store_err)?;
        let rows = stmt
            .query_map(
                params![SubscriptionStatus::Active.as_str(), ts(now)],
                subscription_from_row,
            )
            .map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    /// Flip the owner's auto-renewal opt-in. Nothing else on the row changes.
    pub fn set_subscription_auto_renewal(
        &self,
        id: SubscriptionId,
        enabled: bool,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let db = self.db();
        let rows = db
            .execute(
                "UPDATE subscriptions SET auto_renewal_enabled = ?2, updated_at = ?3 WHERE id = ?1",
                params![id.to_string(), enabled, ts(now)],
            )
            .map_err(store_err)?;
        if rows == 0 {
            return Err(CustosError::SubscriptionNotFound(id));
        }
        Ok(())
    }

    /// Record a paid renewal: new expiry and tx, backoff cleared. Only an active row is
    /// touched, and the opt-in flag is never written. Returns whether a row changed.
    pub fn record_renewal_success(&self, sub: &Subscription) -> Result<bool> {
        let db = self.db();
        let rows = db
            .execute(
                "UPDATE subscriptions SET expires_at = ?2, last_renewal_tx = ?3,
                     renewal_failed_at = NULL, renewal_attempts = 0, updated_at = ?4
                 WHERE id = ?1 AND status = ?5",
                params![
                    sub.id.to_string(),
                    ts(sub.expires_at),
                    sub.last_renewal_tx,
                    ts(sub.updated_at),
                    SubscriptionStatus::Active.as_str(),
                ],
            )
            .map_err(store_err)?;
        Ok(rows == 1)
    }

    /// Record a failed attempt for backoff. A row the owner opted out of (or that is no
    /// longer active) is left alone. Returns whether a row changed.
    pub fn record_renewal_failure(&self, sub: &Subscription) -> Result<bool> {
        let db = self.db();
        let rows = db
            .execute(
                "UPDATE subscriptions SET renewal_failed_at = ?2, renewal_attempts = ?3,
                     updated_at = ?4
                 WHERE id = ?1 AND auto_renewal_enabled = 1 AND status = ?5",
                params![
                    sub.id.to_string(),
                    ts_opt(sub.renewal_failed_at),
                    sub.renewal_attempts,
                    ts(sub.updated_at),
                    SubscriptionStatus::Active.as_str(),
                ],
            )
            .map_err(store_err)?;
        Ok(rows == 1)
    }

    /// Move an active subscription to `expired` and switch auto-renewal off.
    /// Returns whether a row changed.
    pub fn expire_subscription(&self, sub: &Subscription) -> Result<bool> {
        let db = self.db();
        let rows = db
            .execute(
                "UPDATE subscriptions SET status = ?2, auto_renewal_enabled = 0,
                     renewal_failed_at = ?3, renewal_attempts = ?4, updated_at = ?5
                 WHERE id = ?1 AND status = ?6",
                params![
                    sub.id.to_string(),
                    SubscriptionStatus::Expired.as_str(),
                    ts_opt(sub.renewal_failed_at),
                    sub.renewal_attempts,
                    ts(sub.updated_at),
                    SubscriptionStatus::Active.as_str(),
                ],
            )
            .map_err(store_err)?;
        Ok(rows == 1)
    }

    /// Turn auto-renewal off for every subscription of the account. Returns the ids changed.
    pub fn disable_auto_renewal(
        &self,
        account_id: AccountId,
        now: DateTime<Utc>,
    ) -> Result<Vec<SubscriptionId>> {
        let mut db = self.db();
        let tx = db.transaction().map_err(store_err)?;
        let ids = {
            let mut stmt = tx
                .prepare(
                    "SELECT id FROM subscriptions WHERE account_id = ?1 AND auto_renewal_enabled = 1",
                )
                .map_err(store_err)?;
            let rows = stmt
                .query_map(params![account_id.to_string()], |row| col_uuid(row, 0))
                .map_err(store_err)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)?
        };
        tx.execute(
            "UPDATE subscriptions SET auto_renewal_enabled = 0, updated_at = ?2
             WHERE account_id = ?1 AND auto_renewal_enabled = 1",
            params![account_id.to_string(), ts(now)],
        )
        .map_err(store_err)?;
        tx.commit().map_err(store_err)?;
        Ok(ids)
    }

    // ── Claim lease ────────────────────────────────────────────

    /// Try to claim a subscription for renewal. Succeeds if it is unclaimed, its lease has
    /// lapsed, or `holder` already holds it.
    pub fn try_claim_subscription(
        &self,
        id: SubscriptionId,
        holder: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<bool> {
        let db = self.db();
        let rows = db
            .execute(
                "UPDATE subscriptions SET claimed_by = ?2, claim_expires_at = ?3
                 WHERE id = ?1
                   AND (claimed_by IS NULL OR claim_expires_at <= ?4 OR claimed_by = ?2)",
                params![id.to_string(), holder, ts(now + lease), ts(now)],
            )
            .map_err(store_err)?;
        let claimed = rows == 1;
        debug!(subscription_id = %id, holder, claimed, "renewal claim");
        Ok(claimed)
    }

    /// Release a claim held by `holder`. Someone else's claim is left untouched.
    pub fn release_subscription_claim(&self, id: SubscriptionId, holder: &str) -> Result<()> {
        let db = self.db();
        db.execute(
            "UPDATE subscriptions SET claimed_by = NULL, claim_expires_at = NULL
             WHERE id = ?1 AND claimed_by = ?2",
            params![id.to_string(), holder],
        )
        .map_err(store_err)?;
        Ok(())
    }

    /// Current claim holder, if the lease has not lapsed at `now`.
    pub fn subscription_claim(
        &self,
        id: SubscriptionId,
        now: DateTime<Utc>,
    ) -> Result<Option<String>> {
        let db = self.db();
        let claim: Option<(Option<String>, Option<String>)> = db
            .query_row(
                "SELECT claimed_by, claim_expires_at FROM subscriptions WHERE id = ?1",
                params![id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(store_err)?;
        Ok(match claim {
            Some((Some(holder), Some(until))) if until > ts(now) => Some(holder),
            _ => None,
        })
    }
}
