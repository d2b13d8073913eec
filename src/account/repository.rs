//! Account persistence.

use tracing::{info, warn};

use super::allocator;
use super::types::{Account, Grant};
use crate::config::AccountSeed;
use crate::datetime::now_string;
use crate::db::{to_db_size, DbPool};
use crate::{Result, StowageError};

/// Repository for account operations.
pub struct AccountRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> AccountRepository<'a> {
    /// Create a new AccountRepository with the given database pool reference.
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Create an account.
    pub async fn create(&self, owner_id: i64, name: &str, capacity_bytes: u64) -> Result<Account> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO accounts (owner_id, name, capacity_bytes, used_bytes, created_at)
             VALUES (?, ?, ?, 0, ?)
             RETURNING id",
        )
        .bind(owner_id)
        .bind(name)
        .bind(to_db_size(capacity_bytes))
        .bind(now_string())
        .fetch_one(self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                StowageError::Validation(format!("account '{name}' already exists"))
            }
            _ => StowageError::Database(e.to_string()),
        })?;

        self.get_by_id(id)
            .await?
            .ok_or_else(|| StowageError::NotFound("account".to_string()))
    }

    /// Get an account by ID.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(
            "SELECT id, owner_id, name, capacity_bytes, used_bytes, created_at
             FROM accounts WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await
        .map_err(|e| StowageError::Database(e.to_string()))?;

        Ok(account)
    }

    /// List an owner's accounts.
    pub async fn list_by_owner(&self, owner_id: i64) -> Result<Vec<Account>> {
        let accounts = sqlx::query_as::<_, Account>(
            "SELECT id, owner_id, name, capacity_bytes, used_bytes, created_at
             FROM accounts WHERE owner_id = ? ORDER BY id",
        )
        .bind(owner_id)
        .fetch_all(self.pool)
        .await
        .map_err(|e| StowageError::Database(e.to_string()))?;

        Ok(accounts)
    }

    /// Bytes still available across all of an owner's accounts.
    pub async fn total_remaining(&self, owner_id: i64) -> Result<u64> {
        let accounts = self.list_by_owner(owner_id).await?;
        Ok(allocator::total_remaining(&accounts))
    }

    /// Grants currently held by an item.
    pub async fn grants_for(&self, item_id: i64) -> Result<Vec<Grant>> {
        let rows: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT account_id, bytes FROM allocations WHERE item_id = ? ORDER BY account_id",
        )
        .bind(item_id)
        .fetch_all(self.pool)
        .await
        .map_err(|e| StowageError::Database(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|(account_id, bytes)| Grant {
                account_id,
                bytes: bytes.max(0) as u64,
            })
            .collect())
    }

    /// Create or resize accounts from configuration.
    ///
    /// Capacity is never lowered below what is already in use.
    pub async fn seed(&self, seeds: &[AccountSeed]) -> Result<usize> {
        for seed in seeds {
            sqlx::query(
                "INSERT INTO accounts (owner_id, name, capacity_bytes, used_bytes, created_at)
                 VALUES (?, ?, ?, 0, ?)
                 ON CONFLICT (owner_id, name)
                 DO UPDATE SET capacity_bytes = MAX(excluded.capacity_bytes, accounts.used_bytes)",
            )
            .bind(seed.owner_id)
            .bind(&seed.name)
            .bind(to_db_size(seed.capacity_bytes))
            .bind(now_string())
            .execute(self.pool)
            .await
            .map_err(|e| StowageError::Database(e.to_string()))?;

            let accounts = self.list_by_owner(seed.owner_id).await?;
            if let Some(account) = accounts.iter().find(|a| a.name == seed.name) {
                if account.capacity_bytes != to_db_size(seed.capacity_bytes) {
                    warn!(
                        owner_id = seed.owner_id,
                        account = %seed.name,
                        used_bytes = account.used_bytes,
                        "Configured capacity is below usage; keeping {} bytes",
                        account.capacity_bytes
                    );
                }
            }
        }

        info!("Seeded {} storage account(s)", seeds.len());
        Ok(seeds.len())
    }
}
