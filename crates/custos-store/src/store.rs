use chrono::{DateTime, SecondsFormat, Utc};
use custos_core::{CustosError, Result};
use parking_lot::Mutex;
use rusqlite::{Connection, Row};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Handle to the custos SQLite database. Cheap to clone; all clones share one connection.
#[derive(Clone)]
pub struct Store {
    db: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open or create the database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        info!(?path, "opening store");

        let conn = Connection::open(path).map_err(store_err)?;

        // WAL for concurrent readers (the CLI may inspect a running server's db)
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;")
            .map_err(store_err)?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                vault TEXT NOT NULL,
                owner TEXT NOT NULL,
                agent TEXT,
                mode TEXT NOT NULL,
                paused INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS session_credentials (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id TEXT NOT NULL REFERENCES accounts(id),
                address TEXT NOT NULL,
                created_at TEXT NOT NULL,
                expires_at TEXT,
                revoked INTEGER NOT NULL DEFAULT 0,
                revoked_at TEXT
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_credentials_live
                ON session_credentials(account_id) WHERE revoked = 0;

            CREATE TABLE IF NOT EXISTS actions (
                id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL REFERENCES accounts(id),
                subscription_id TEXT,
                origin TEXT NOT NULL,
                action_type TEXT NOT NULL,
                details TEXT NOT NULL,
                value_usd REAL NOT NULL,
                state TEXT NOT NULL,
                confirmation_required INTEGER NOT NULL,
                confirmed INTEGER NOT NULL DEFAULT 0,
                confirmed_at TEXT,
                executed INTEGER NOT NULL DEFAULT 0,
                executed_at TEXT,
                tx_hash TEXT,
                failure_kind TEXT,
                error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_actions_account ON actions(account_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_actions_subscription ON actions(subscription_id);

            CREATE TABLE IF NOT EXISTS subscriptions (
                id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL REFERENCES accounts(id),
                plan TEXT NOT NULL,
                status TEXT NOT NULL,
                payee TEXT NOT NULL,
                renewal_cost_usd REAL NOT NULL,
                payment_value TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                auto_renewal_enabled INTEGER NOT NULL DEFAULT 0,
                last_renewal_tx TEXT,
                renewal_failed_at TEXT,
                renewal_attempts INTEGER NOT NULL DEFAULT 0,
                claimed_by TEXT,
                claim_expires_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_subscriptions_due
                ON subscriptions(auto_renewal_enabled, status, expires_at);

            CREATE TABLE IF NOT EXISTS audit_log (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                account_id TEXT,
                action_id TEXT,
                event_type TEXT NOT NULL,
                details TEXT NOT NULL,
                prev_hash TEXT NOT NULL,
                hash TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_audit_account ON audit_log(account_id, seq);
            CREATE INDEX IF NOT EXISTS idx_audit_action ON audit_log(action_id, seq);
            ",
        )
        .map_err(store_err)?;

        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for tests).
    pub fn open_in_memory() -> Result<Self> {
        Self::open(Path::new(":memory:"))
    }

    /// Get a reference to the raw database connection (for advanced queries).
    pub fn db(&self) -> parking_lot::MutexGuard<'_, Connection> {
        self.db.lock()
    }
}

// ── Column helpers ─────────────────────────────────────────────

pub(crate) fn store_err(e: rusqlite::Error) -> CustosError {
    CustosError::Store(e.to_string())
}

/// Fixed-width RFC 3339, so stored timestamps compare correctly as text.
pub(crate) fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn ts_opt(at: Option<DateTime<Utc>>) -> Option<String> {
    at.map(ts)
}

fn conversion<T, E>(idx: usize, r: std::result::Result<T, E>) -> rusqlite::Result<T>
where
    E: std::error::Error + Send + Sync + 'static,
{
    r.map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub(crate) fn col_uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    conversion(idx, Uuid::parse_str(&raw))
}

pub(crate) fn col_uuid_opt(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| conversion(idx, Uuid::parse_str(&s))).transpose()
}

pub(crate) fn col_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    let parsed = conversion(idx, DateTime::parse_from_rfc3339(&raw))?;
    Ok(parsed.with_timezone(&Utc))
}

pub(crate) fn col_ts_opt(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        conversion(idx, DateTime::parse_from_rfc3339(&s)).map(|dt| dt.with_timezone(&Utc))
    })
    .transpose()
}

pub(crate) fn col_parse<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    conversion(idx, raw.parse::<T>())
}

pub(crate) fn col_parse_opt<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| conversion(idx, s.parse::<T>())).transpose()
}

pub(crate) fn col_json<T: serde::de::DeserializeOwned>(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    conversion(idx, serde_json::from_str(&raw))
}
