use chrono::{DateTime, Utc};
use custos_core::{
    AccountId, Action, ActionId, ActionState, ActionType, CustosError, Result, SubscriptionId,
};
use rusqlite::{OptionalExtension, Row, params};

use crate::store::{
    Store, col_json, col_parse, col_parse_opt, col_ts, col_ts_opt, col_uuid, col_uuid_opt,
    store_err, ts, ts_opt,
};

const ACTION_COLUMNS: &str = "id, account_id, subscription_id, origin, action_type, details, \
     value_usd, state, confirmation_required, confirmed, confirmed_at, executed, executed_at, \
     tx_hash, failure_kind, error, created_at, updated_at";

fn action_from_row(row: &Row<'_>) -> rusqlite::Result<Action> {
    Ok(Action {
        id: col_uuid(row, 0)?,
        account_id: col_uuid(row, 1)?,
        subscription_id: col_uuid_opt(row, 2)?,
        origin: col_parse(row, 3)?,
        action_type: col_parse(row, 4)?,
        details: col_json(row, 5)?,
        value_usd: row.get(6)?,
        state: col_parse(row, 7)?,
        confirmation_required: row.get(8)?,
        confirmed: row.get(9)?,
        confirmed_at: col_ts_opt(row, 10)?,
        executed: row.get(11)?,
        executed_at: col_ts_opt(row, 12)?,
        tx_hash: row.get(13)?,
        failure: col_parse_opt(row, 14)?,
        error: row.get(15)?,
        created_at: col_ts(row, 16)?,
        updated_at: col_ts(row, 17)?,
    })
}

impl Store {
    pub fn insert_action(&self, action: &Action) -> Result<()> {
        let details = serde_json::to_string(&action.details)?;
        let db = self.db();
        db.execute(
            &format!(
                "INSERT INTO actions ({ACTION_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)"
            ),
            params![
                action.id.to_string(),
                action.account_id.to_string(),
                action.subscription_id.map(|s| s.to_string()),
                action.origin.as_str(),
                action.action_type.as_str(),
                details,
                action.value_usd,
                action.state.as_str(),
                action.confirmation_required,
                action.confirmed,
                ts_opt(action.confirmed_at),
                action.executed,
                ts_opt(action.executed_at),
                action.tx_hash,
                action.failure.map(|f| f.as_str()),
                action.error,
                ts(action.created_at),
                ts(action.updated_at),
            ],
        )
        .map_err(store_err)?;
        Ok(())
    }

    /// Persist the workflow-owned fields of `action`, but only if the stored row is still
    /// in `expected`. Returns false when another writer moved it first.
    ///
    /// `confirmation_required` and `details` are fixed at proposal time and never rewritten.
    pub fn transition_action(&self, action: &Action, expected: ActionState) -> Result<bool> {
        let db = self.db();
        let rows = db
            .execute(
                "UPDATE actions SET state = ?3, confirmed = ?4, confirmed_at = ?5, executed = ?6,
                     executed_at = ?7, tx_hash = ?8, failure_kind = ?9, error = ?10, updated_at = ?11
                 WHERE id = ?1 AND state = ?2",
                params![
                    action.id.to_string(),
                    expected.as_str(),
                    action.state.as_str(),
                    action.confirmed,
                    ts_opt(action.confirmed_at),
                    action.executed,
                    ts_opt(action.executed_at),
                    action.tx_hash,
                    action.failure.map(|f| f.as_str()),
                    action.error,
                    ts(action.updated_at),
                ],
            )
            .map_err(store_err)?;
        Ok(rows == 1)
    }

    pub fn get_action(&self, id: ActionId) -> Result<Option<Action>> {
        let db = self.db();
        db.query_row(
            &format!("SELECT {ACTION_COLUMNS} FROM actions WHERE id = ?1"),
            params![id.to_string()],
            action_from_row,
        )
        .optional()
        .map_err(store_err)
    }

    pub fn require_action(&self, id: ActionId) -> Result<Action> {
        self.get_action(id)?.ok_or(CustosError::ActionNotFound(id))
    }

    /// Most recent actions for an account, newest first.
    pub fn actions_for_account(&self, account_id: AccountId, limit: usize) -> Result<Vec<Action>> {
        let db = self.db();
        let mut stmt = db
            .prepare(&format!(
                "SELECT {ACTION_COLUMNS} FROM actions WHERE account_id = ?1
                 ORDER BY created_at DESC, rowid DESC LIMIT ?2"
            ))
            .map_err(store_err)?;
        let rows = stmt
            .query_map(params![account_id.to_string(), limit as i64], action_from_row)
            .map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    /// Actions synthesized for a subscription, oldest first.
    pub fn actions_for_subscription(&self, subscription_id: SubscriptionId) -> Result<Vec<Action>> {
        let db = self.db();
        let mut stmt = db
            .prepare(&format!(
                "SELECT {ACTION_COLUMNS} FROM actions WHERE subscription_id = ?1
                 ORDER BY created_at, rowid"
            ))
            .map_err(store_err)?;
        let rows = stmt
            .query_map(params![subscription_id.to_string()], action_from_row)
            .map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    /// Every action, across accounts, currently in `state`.
    pub fn actions_in_state(&self, state: ActionState) -> Result<Vec<Action>> {
        let db = self.db();
        let mut stmt = db
            .prepare(&format!(
                "SELECT {ACTION_COLUMNS} FROM actions WHERE state = ?1 ORDER BY created_at, rowid"
            ))
            .map_err(store_err)?;
        let rows = stmt
            .query_map(params![state.as_str()], action_from_row)
            .map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    /// Count of an account's actions currently in `state`.
    pub fn count_actions_in_state(&self, account_id: AccountId, state: ActionState) -> Result<i64> {
        let db = self.db();
        db.query_row(
            "SELECT COUNT(*) FROM actions WHERE account_id = ?1 AND state = ?2",
            params![account_id.to_string(), state.as_str()],
            |row| row.get(0),
        )
        .map_err(store_err)
    }

    /// Total USD of mutating actions the account executed at or after `since`.
    pub fn executed_value_since(&self, account_id: AccountId, since: DateTime<Utc>) -> Result<f64> {
        let read_only = [ActionType::Analyze.as_str(), ActionType::Report.as_str()];
        let db = self.db();
        db.query_row(
            "SELECT COALESCE(SUM(value_usd), 0.0) FROM actions
             WHERE account_id = ?1 AND executed = 1 AND executed_at >= ?2
               AND action_type NOT IN (?3, ?4)",
            params![account_id.to_string(), ts(since), read_only[0], read_only[1]],
            |row| row.get(0),
        )
        .map_err(store_err)
    }
}
