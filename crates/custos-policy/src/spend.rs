use chrono::{DateTime, NaiveDate, Utc};
use custos_core::AccountId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Executed mutating value per account, bucketed by UTC day.
#[derive(Debug, Clone, Default)]
pub struct SpendTracker {
    state: Arc<RwLock<HashMap<AccountId, DailySpend>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailySpend {
    /// UTC day the running total belongs to.
    pub day: NaiveDate,
    /// USD executed on `day`.
    pub spent_usd: f64,
    /// USD executed since tracking started.
    pub total_usd: f64,
}

impl SpendTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an executed action's value.
    pub fn record(&self, account_id: AccountId, usd: f64, at: DateTime<Utc>) {
        let day = at.date_naive();
        let mut state = self.state.write();
        let entry = state.entry(account_id).or_insert(DailySpend {
            day,
            spent_usd: 0.0,
            total_usd: 0.0,
        });
        if entry.day != day {
            entry.day = day;
            entry.spent_usd = 0.0;
        }
        entry.spent_usd += usd;
        entry.total_usd += usd;
        debug!(%account_id, spent_today = entry.spent_usd, "spend recorded");
    }

    /// USD executed by the account on the UTC day containing `now`.
    pub fn spent_today(&self, account_id: AccountId, now: DateTime<Utc>) -> f64 {
        self.state
            .read()
            .get(&account_id)
            .filter(|s| s.day == now.date_naive())
            .map(|s| s.spent_usd)
            .unwrap_or(0.0)
    }

    /// Replace an account's running total, e.g. from persisted actions at startup.
    pub fn seed(&self, account_id: AccountId, day: NaiveDate, spent_usd: f64) {
        self.state.write().insert(
            account_id,
            DailySpend {
                day,
                spent_usd,
                total_usd: spent_usd,
            },
        );
    }

    /// Get the current state for one account.
    pub fn snapshot(&self, account_id: AccountId) -> Option<DailySpend> {
        self.state.read().get(&account_id).copied()
    }
}
