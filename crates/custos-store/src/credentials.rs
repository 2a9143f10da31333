use chrono::{DateTime, Utc};
use custos_core::{AccountId, CustosError, Result, SessionCredential};
use rusqlite::{OptionalExtension, Row, params};
use tracing::debug;

use crate::store::{Store, col_parse, col_ts, col_ts_opt, col_uuid, store_err, ts, ts_opt};

const CREDENTIAL_COLUMNS: &str = "account_id, address, created_at, expires_at, revoked, revoked_at";

fn credential_from_row(row: &Row<'_>) -> rusqlite::Result<SessionCredential> {
    Ok(SessionCredential {
        account_id: col_uuid(row, 0)?,
        address: col_parse(row, 1)?,
        created_at: col_ts(row, 2)?,
        expires_at: col_ts_opt(row, 3)?,
        revoked: row.get(4)?,
        revoked_at: col_ts_opt(row, 5)?,
    })
}

impl Store {
    /// The account's unrevoked credential, if any. It may still be past its expiry.
    pub fn live_credential(&self, account_id: AccountId) -> Result<Option<SessionCredential>> {
        let db = self.db();
        db.query_row(
            &format!(
                "SELECT {CREDENTIAL_COLUMNS} FROM session_credentials
                 WHERE account_id = ?1 AND revoked = 0"
            ),
            params![account_id.to_string()],
            credential_from_row,
        )
        .optional()
        .map_err(store_err)
    }

    /// The most recently created credential, revoked or not.
    pub fn latest_credential(&self, account_id: AccountId) -> Result<Option<SessionCredential>> {
        let db = self.db();
        db.query_row(
            &format!(
                "SELECT {CREDENTIAL_COLUMNS} FROM session_credentials
                 WHERE account_id = ?1 ORDER BY id DESC LIMIT 1"
            ),
            params![account_id.to_string()],
            credential_from_row,
        )
        .optional()
        .map_err(store_err)
    }

    /// Every credential ever issued to the account, oldest first.
    pub fn credential_history(&self, account_id: AccountId) -> Result<Vec<SessionCredential>> {
        let db = self.db();
        let mut stmt = db
            .prepare(&format!(
                "SELECT {CREDENTIAL_COLUMNS} FROM session_credentials
                 WHERE account_id = ?1 ORDER BY id"
            ))
            .map_err(store_err)?;
        let rows = stmt
            .query_map(params![account_id.to_string()], credential_from_row)
            .map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    /// Insert `credential` as the account's live credential.
    ///
    /// Fails with `AlreadyActive` if a credential valid at `now` exists. An unrevoked but
    /// expired credential is revoked in the same transaction and returned as superseded.
    pub fn insert_credential_if_vacant(
        &self,
        credential: &SessionCredential,
        now: DateTime<Utc>,
    ) -> Result<Option<SessionCredential>> {
        let mut db = self.db();
        let tx = db.transaction().map_err(store_err)?;
        let account = credential.account_id.to_string();

        let existing = tx
            .query_row(
                &format!(
                    "SELECT {CREDENTIAL_COLUMNS} FROM session_credentials
                     WHERE account_id = ?1 AND revoked = 0"
                ),
                params![account],
                credential_from_row,
            )
            .optional()
            .map_err(store_err)?;

        let superseded = match existing {
            Some(live) if live.is_valid(now) => {
                return Err(CustosError::AlreadyActive {
                    account_id: credential.account_id,
                });
            }
            Some(mut stale) => {
                tx.execute(
                    "UPDATE session_credentials SET revoked = 1, revoked_at = ?2
                     WHERE account_id = ?1 AND revoked = 0",
                    params![account, ts(now)],
                )
                .map_err(store_err)?;
                stale.revoked = true;
                stale.revoked_at = Some(now);
                debug!(account_id = %credential.account_id, "superseded expired credential");
                Some(stale)
            }
            None => None,
        };

        tx.execute(
            "INSERT INTO session_credentials (account_id, address, created_at, expires_at, revoked, revoked_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                account,
                credential.address.as_str(),
                ts(credential.created_at),
                ts_opt(credential.expires_at),
                credential.revoked,
                ts_opt(credential.revoked_at),
            ],
        )
        .map_err(store_err)?;
        tx.commit().map_err(store_err)?;
        Ok(superseded)
    }

    /// Compare-and-swap `revoked` false -> true. Returns the credential that was revoked,
    /// or `None` if nothing was live.
    pub fn revoke_credential(
        &self,
        account_id: AccountId,
        now: DateTime<Utc>,
    ) -> Result<Option<SessionCredential>> {
        let mut db = self.db();
        let tx = db.transaction().map_err(store_err)?;
        let account = account_id.to_string();

        let live = tx
            .query_row(
                &format!(
                    "SELECT {CREDENTIAL_COLUMNS} FROM session_credentials
                     WHERE account_id = ?1 AND revoked = 0"
                ),
                params![account],
                credential_from_row,
            )
            .optional()
            .map_err(store_err)?;

        let Some(mut credential) = live else {
            return Ok(None);
        };

        let rows = tx
            .execute(
                "UPDATE session_credentials SET revoked = 1, revoked_at = ?2
                 WHERE account_id = ?1 AND revoked = 0",
                params![account, ts(now)],
            )
            .map_err(store_err)?;
        tx.commit().map_err(store_err)?;

        if rows == 0 {
            return Ok(None);
        }
        credential.revoked = true;
        credential.revoked_at = Some(now);
        Ok(Some(credential))
    }
}
