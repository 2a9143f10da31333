use chrono::{DateTime, Utc};
use custos_core::{AccountId, ActionId, CustosError, Result};
use rusqlite::{OptionalExtension, Row, params_from_iter};
use serde::{Deserialize, Serialize};
use std::io::Write;
use tracing::{debug, warn};

use crate::store::{Store, col_json, col_ts, col_uuid_opt, store_err, ts};

/// `prev_hash` of the first entry.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// An audit record before it is sealed into the chain.
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub account_id: Option<AccountId>,
    pub action_id: Option<ActionId>,
    pub event_type: String,
    pub details: serde_json::Value,
}

impl NewAuditEntry {
    pub fn new(event_type: impl Into<String>, details: serde_json::Value) -> Self {
        Self {
            account_id: None,
            action_id: None,
            event_type: event_type.into(),
            details,
        }
    }

    pub fn account(mut self, account_id: AccountId) -> Self {
        self.account_id = Some(account_id);
        self
    }

    pub fn action(mut self, action_id: ActionId) -> Self {
        self.action_id = Some(action_id);
        self
    }
}

/// A sealed, hash-chained audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub seq: i64,
    pub timestamp: DateTime<Utc>,
    pub account_id: Option<AccountId>,
    pub action_id: Option<ActionId>,
    pub event_type: String,
    pub details: serde_json::Value,
    pub prev_hash: String,
    pub hash: String,
}

#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub account_id: Option<AccountId>,
    pub action_id: Option<ActionId>,
    /// Keep only the newest `limit` matches (still returned oldest first).
    pub limit: Option<usize>,
}

impl AuditFilter {
    pub fn account(account_id: AccountId) -> Self {
        Self {
            account_id: Some(account_id),
            ..Self::default()
        }
    }

    pub fn action(action_id: ActionId) -> Self {
        Self {
            action_id: Some(action_id),
            ..Self::default()
        }
    }
}

const AUDIT_COLUMNS: &str =
    "seq, timestamp, account_id, action_id, event_type, details, prev_hash, hash";

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<AuditEntry> {
    Ok(AuditEntry {
        seq: row.get(0)?,
        timestamp: col_ts(row, 1)?,
        account_id: col_uuid_opt(row, 2)?,
        action_id: col_uuid_opt(row, 3)?,
        event_type: row.get(4)?,
        details: col_json(row, 5)?,
        prev_hash: row.get(6)?,
        hash: row.get(7)?,
    })
}

fn chain_hash(
    prev_hash: &str,
    timestamp: &str,
    account_id: Option<&str>,
    action_id: Option<&str>,
    event_type: &str,
    details: &str,
) -> String {
    let mut hasher = blake3::Hasher::new();
    for part in [
        prev_hash,
        timestamp,
        account_id.unwrap_or(""),
        action_id.unwrap_or(""),
        event_type,
        details,
    ] {
        hasher.update(part.as_bytes());
        hasher.update(b"\x1f");
    }
    hasher.finalize().to_hex().to_string()
}

impl Store {
    /// Append an entry, chaining it to the current head.
    pub fn append_audit(&self, entry: NewAuditEntry, at: DateTime<Utc>) -> Result<AuditEntry> {
        let details = serde_json::to_string(&entry.details)?;
        let timestamp = ts(at);
        let account = entry.account_id.map(|id| id.to_string());
        let action = entry.action_id.map(|id| id.to_string());

        let mut db = self.db();
        let tx = db.transaction().map_err(store_err)?;
        let prev_hash: String = tx
            .query_row("SELECT hash FROM audit_log ORDER BY seq DESC LIMIT 1", [], |row| {
                row.get(0)
            })
            .optional()
            .map_err(store_err)?
            .unwrap_or_else(|| GENESIS_HASH.to_string());

        let hash = chain_hash(
            &prev_hash,
            &timestamp,
            account.as_deref(),
            action.as_deref(),
            &entry.event_type,
            &details,
        );
        tx.execute(
            "INSERT INTO audit_log (timestamp, account_id, action_id, event_type, details, prev_hash, hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![timestamp, account, action, entry.event_type, details, prev_hash, hash],
        )
        .map_err(store_err)?;
        let seq = tx.last_insert_rowid();
        tx.commit().map_err(store_err)?;

        debug!(seq, event_type = %entry.event_type, "audit entry appended");
        Ok(AuditEntry {
            seq,
            timestamp: at,
            account_id: entry.account_id,
            action_id: entry.action_id,
            event_type: entry.event_type,
            details: entry.details,
            prev_hash,
            hash,
        })
    }

    /// Entries matching `filter`, oldest first.
    pub fn audit_entries(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
        let mut clauses = Vec::new();
        let mut args: Vec<String> = Vec::new();
        if let Some(account) = filter.account_id {
            args.push(account.to_string());
            clauses.push(format!("account_id = ?{}", args.len()));
        }
        if let Some(action) = filter.action_id {
            args.push(action.to_string());
            clauses.push(format!("action_id = ?{}", args.len()));
        }
        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let limit = filter
            .limit
            .map(|n| format!("LIMIT {n}"))
            .unwrap_or_default();
        let sql = format!(
            "SELECT * FROM (SELECT {AUDIT_COLUMNS} FROM audit_log {where_clause}
             ORDER BY seq DESC {limit}) ORDER BY seq ASC"
        );

        let db = self.db();
        let mut stmt = db.prepare(&sql).map_err(store_err)?;
        let rows = stmt
            .query_map(params_from_iter(args.iter()), entry_from_row)
            .map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    /// Walk the whole chain and recompute every hash. Returns the number of entries checked.
    pub fn verify_audit_chain(&self) -> Result<i64> {
        let db = self.db();
        let mut stmt = db
            .prepare(
                "SELECT seq, timestamp, account_id, action_id, event_type, details, prev_hash, hash
                 FROM audit_log ORDER BY seq ASC",
            )
            .map_err(store_err)?;
        let mut rows = stmt.query([]).map_err(store_err)?;

        let mut expected_prev = GENESIS_HASH.to_string();
        let mut checked = 0i64;
        while let Some(row) = rows.next().map_err(store_err)? {
            let seq: i64 = row.get(0).map_err(store_err)?;
            let timestamp: String = row.get(1).map_err(store_err)?;
            let account: Option<String> = row.get(2).map_err(store_err)?;
            let action: Option<String> = row.get(3).map_err(store_err)?;
            let event_type: String = row.get(4).map_err(store_err)?;
            let details: String = row.get(5).map_err(store_err)?;
            let prev_hash: String = row.get(6).map_err(store_err)?;
            let hash: String = row.get(7).map_err(store_err)?;

            if prev_hash != expected_prev {
                warn!(seq, "audit chain link mismatch");
                return Err(CustosError::AuditChainBroken {
                    seq,
                    reason: "prev_hash does not match the preceding entry".into(),
                });
            }
            let recomputed = chain_hash(
                &prev_hash,
                &timestamp,
                account.as_deref(),
                action.as_deref(),
                &event_type,
                &details,
            );
            if recomputed != hash {
                warn!(seq, "audit entry hash mismatch");
                return Err(CustosError::AuditChainBroken {
                    seq,
                    reason: "entry contents do not match its hash".into(),
                });
            }
            expected_prev = hash;
            checked += 1;
        }
        Ok(checked)
    }

    /// Write matching entries as one JSON object per line. Returns the number written.
    pub fn export_audit_jsonl<W: Write>(&self, filter: &AuditFilter, mut out: W) -> Result<usize> {
        let entries = self.audit_entries(filter)?;
        for entry in &entries {
            serde_json::to_writer(&mut out, entry)?;
            out.write_all(b"\n")?;
        }
        out.flush()?;
        Ok(entries.len())
    }
}
