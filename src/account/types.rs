//! Account types.

/// A storage account with a fixed capacity.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Account {
    /// Unique account ID.
    pub id: i64,
    /// Owner the account belongs to.
    pub owner_id: i64,
    /// Account name, unique per owner.
    pub name: String,
    /// Capacity in bytes.
    pub capacity_bytes: i64,
    /// Bytes currently reserved by items.
    pub used_bytes: i64,
    /// When the account was created.
    pub created_at: String,
}

impl Account {
    /// Bytes still available.
    pub fn remaining(&self) -> u64 {
        u64::try_from(self.capacity_bytes - self.used_bytes).unwrap_or(0)
    }
}

/// Bytes reserved on one account for one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grant {
    pub account_id: i64,
    pub bytes: u64,
}
