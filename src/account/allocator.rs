//! Quota allocation across an owner's accounts.
//!
//! Allocation is all-or-nothing: either every grant is committed or no
//! counter moves. The planning step is greedy, filling the account with
//! the most room first so large files spread over as few accounts as
//! possible.

use sqlx::SqliteConnection;
use tracing::{debug, info};

use super::types::{Account, Grant};
use crate::db::{to_db_size, DbPool};
use crate::{Result, StowageError};

/// Remaining capacity summed over `accounts`, saturating at `u64::MAX`.
pub fn total_remaining(accounts: &[Account]) -> u64 {
    accounts
        .iter()
        .map(Account::remaining)
        .fold(0u64, u64::saturating_add)
}

/// Split `required` bytes over `accounts`.
///
/// Accounts are visited by remaining capacity, largest first, ties broken
/// by lower ID.
pub fn plan_grants(accounts: &[Account], required: u64) -> Result<Vec<Grant>> {
    let available = total_remaining(accounts);
    if available < required {
        return Err(StowageError::QuotaExceeded {
            required,
            available,
        });
    }

    let mut ordered: Vec<&Account> = accounts.iter().filter(|a| a.remaining() > 0).collect();
    ordered.sort_by(|a, b| b.remaining().cmp(&a.remaining()).then(a.id.cmp(&b.id)));

    let mut left = required;
    let mut grants = Vec::new();
    for account in ordered {
        if left == 0 {
            break;
        }
        let bytes = account.remaining().min(left);
        grants.push(Grant {
            account_id: account.id,
            bytes,
        });
        left -= bytes;
    }

    Ok(grants)
}

/// Reserves and releases quota.
pub struct QuotaAllocator<'a> {
    pool: &'a DbPool,
}

impl<'a> QuotaAllocator<'a> {
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Reserve `required` bytes in a transaction of its own.
    ///
    /// The grants are not tied to any item; hand them back with
    /// [`QuotaAllocator::release`].
    pub async fn allocate(&self, owner_id: i64, required: u64) -> Result<Vec<Grant>> {
        let mut tx = self.pool.begin().await?;
        let grants = Self::allocate_in(&mut tx, owner_id, required).await?;
        tx.commit().await?;
        Ok(grants)
    }

    /// Return grants obtained from [`QuotaAllocator::allocate`].
    pub async fn release(&self, grants: &[Grant]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut released = 0;
        for grant in grants {
            let result = sqlx::query(
                "UPDATE accounts SET used_bytes = used_bytes - ?
                 WHERE id = ? AND used_bytes >= ?",
            )
            .bind(to_db_size(grant.bytes))
            .bind(grant.account_id)
            .bind(to_db_size(grant.bytes))
            .execute(&mut *tx)
            .await
            .map_err(|e| StowageError::Database(e.to_string()))?;

            if result.rows_affected() == 1 {
                released += grant.bytes;
            }
        }
        tx.commit().await?;
        Ok(released)
    }

    /// Reserve `required` bytes inside the caller's transaction.
    ///
    /// Fails with `QuotaExceeded` without touching any counter when the
    /// owner's accounts cannot cover the request together.
    pub async fn allocate_in(
        conn: &mut SqliteConnection,
        owner_id: i64,
        required: u64,
    ) -> Result<Vec<Grant>> {
        // Writing first takes the database write lock, so the capacities
        // read below cannot change before the grants are applied.
        sqlx::query("UPDATE accounts SET used_bytes = used_bytes WHERE owner_id = ?")
            .bind(owner_id)
            .execute(&mut *conn)
            .await
            .map_err(|e| StowageError::Database(e.to_string()))?;

        if required == 0 {
            return Ok(Vec::new());
        }

        let accounts = sqlx::query_as::<_, Account>(
            "SELECT id, owner_id, name, capacity_bytes, used_bytes, created_at
             FROM accounts WHERE owner_id = ? ORDER BY id",
        )
        .bind(owner_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| StowageError::Database(e.to_string()))?;

        let grants = plan_grants(&accounts, required)?;

        for grant in &grants {
            let result = sqlx::query(
                "UPDATE accounts SET used_bytes = used_bytes + ?
                 WHERE id = ? AND used_bytes + ? <= capacity_bytes",
            )
            .bind(to_db_size(grant.bytes))
            .bind(grant.account_id)
            .bind(to_db_size(grant.bytes))
            .execute(&mut *conn)
            .await
            .map_err(|e| StowageError::Database(e.to_string()))?;

            if result.rows_affected() != 1 {
                let available = accounts.iter().map(Account::remaining).sum();
                return Err(StowageError::QuotaExceeded {
                    required,
                    available,
                });
            }
        }

        debug!(owner_id, required, grants = grants.len(), "Allocated quota");
        Ok(grants)
    }

    /// Record grants as held by an item.
    pub async fn attach_in(conn: &mut SqliteConnection, item_id: i64, grants: &[Grant]) -> Result<()> {
        for grant in grants {
            sqlx::query(
                "INSERT INTO allocations (item_id, account_id, bytes) VALUES (?, ?, ?)
                 ON CONFLICT (item_id, account_id) DO UPDATE SET bytes = bytes + excluded.bytes",
            )
            .bind(item_id)
            .bind(grant.account_id)
            .bind(to_db_size(grant.bytes))
            .execute(&mut *conn)
            .await
            .map_err(|e| StowageError::Database(e.to_string()))?;
        }
        Ok(())
    }

    /// Give back everything an item holds. Returns the bytes released.
    pub async fn release_in(conn: &mut SqliteConnection, item_id: i64) -> Result<u64> {
        sqlx::query(
            "UPDATE accounts
             SET used_bytes = used_bytes - COALESCE(
                 (SELECT bytes FROM allocations
                  WHERE allocations.item_id = ? AND allocations.account_id = accounts.id), 0)
             WHERE id IN (SELECT account_id FROM allocations WHERE item_id = ?)",
        )
        .bind(item_id)
        .bind(item_id)
        .execute(&mut *conn)
        .await
        .map_err(|e| StowageError::Database(e.to_string()))?;

        let released: i64 =
            sqlx::query_scalar("SELECT COALESCE(SUM(bytes), 0) FROM allocations WHERE item_id = ?")
                .bind(item_id)
                .fetch_one(&mut *conn)
                .await
                .map_err(|e| StowageError::Database(e.to_string()))?;

        sqlx::query("DELETE FROM allocations WHERE item_id = ?")
            .bind(item_id)
            .execute(&mut *conn)
            .await
            .map_err(|e| StowageError::Database(e.to_string()))?;

        if released > 0 {
            info!(item_id, released, "Released quota");
        }
        Ok(released.max(0) as u64)
    }
}
