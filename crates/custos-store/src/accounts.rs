use custos_core::{AccountId, CustosError, Result, VaultAccount};
use rusqlite::{OptionalExtension, Row, params};

use crate::store::{Store, col_parse, col_parse_opt, col_ts, col_uuid, store_err, ts};

const ACCOUNT_COLUMNS: &str = "id, vault, owner, agent, mode, paused, created_at, updated_at";

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<VaultAccount> {
    Ok(VaultAccount {
        id: col_uuid(row, 0)?,
        vault: col_parse(row, 1)?,
        owner: col_parse(row, 2)?,
        agent: col_parse_opt(row, 3)?,
        mode: col_parse(row, 4)?,
        paused: row.get(5)?,
        created_at: col_ts(row, 6)?,
        updated_at: col_ts(row, 7)?,
    })
}

impl Store {
    pub fn insert_account(&self, account: &VaultAccount) -> Result<()> {
        let db = self.db();
        db.execute(
            "INSERT INTO accounts (id, vault, owner, agent, mode, paused, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                account.id.to_string(),
                account.vault.as_str(),
                account.owner.as_str(),
                account.agent.as_ref().map(|a| a.as_str()),
                account.mode.as_str(),
                account.paused,
                ts(account.created_at),
                ts(account.updated_at),
            ],
        )
        .map_err(store_err)?;
        Ok(())
    }

    pub fn get_account(&self, id: AccountId) -> Result<Option<VaultAccount>> {
        let db = self.db();
        db.query_row(
            &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?1"),
            params![id.to_string()],
            account_from_row,
        )
        .optional()
        .map_err(store_err)
    }

    /// Like [`Store::get_account`], but a missing account is an error.
    pub fn require_account(&self, id: AccountId) -> Result<VaultAccount> {
        self.get_account(id)?.ok_or(CustosError::AccountNotFound(id))
    }

    pub fn list_accounts(&self) -> Result<Vec<VaultAccount>> {
        let db = self.db();
        let mut stmt = db
            .prepare(&format!("SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY created_at"))
            .map_err(store_err)?;
        let rows = stmt.query_map([], account_from_row).map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    /// Write the mutable fields (agent, mode, paused). Owner and vault never change.
    pub fn update_account(&self, account: &VaultAccount) -> Result<()> {
        let db = self.db();
        let rows = db
            .execute(
                "UPDATE accounts SET agent = ?2, mode = ?3, paused = ?4, updated_at = ?5 WHERE id = ?1",
                params![
                    account.id.to_string(),
                    account.agent.as_ref().map(|a| a.as_str()),
                    account.mode.as_str(),
                    account.paused,
                    ts(account.updated_at),
                ],
            )
            .map_err(store_err)?;
        if rows == 0 {
            return Err(CustosError::AccountNotFound(account.id));
        }
        Ok(())
    }
}
