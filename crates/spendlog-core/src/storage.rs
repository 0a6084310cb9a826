use std::collections::BTreeMap;

use rust_decimal::Decimal;

use crate::models::{
    read::{Expense, ExpenseId, UserRecord},
    write::{ExpenseError, NewExpense, NewUser},
    Category, YearMonth,
};

use thiserror::Error;

/// Owner used when the service runs single-tenant.
pub const DEFAULT_OWNER: &str = "default";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{0}")]
    Other(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invalid stored data: {0}")]
    InvalidData(String),
    #[error("invalid expense: {0}")]
    Validation(#[from] ExpenseError),
}

/// Owner-scoped persistence for expenses, budgets, settings and users.
///
/// Every data operation takes the owner explicitly; a backend never returns or
/// touches rows of another owner. Saves are upserts keyed by (owner, key).
pub trait StorageBackend: Send + Sync {
    /// Creates missing tables. Must be safe to call on every start.
    fn initialize(&self) -> Result<(), StorageError>;

    fn add_expense(&self, owner: &str, expense: &NewExpense) -> Result<ExpenseId, StorageError>;
    /// Expenses dated within `month`, most recent first.
    fn monthly_expenses(&self, owner: &str, month: YearMonth) -> Result<Vec<Expense>, StorageError>;
    /// Returns whether a row was removed.
    fn delete_expense(&self, owner: &str, id: ExpenseId) -> Result<bool, StorageError>;
    /// Months with at least one expense, most recent first.
    fn distinct_months(&self, owner: &str) -> Result<Vec<YearMonth>, StorageError>;

    /// Saved limits only; categories without a row are absent.
    fn category_budgets(&self, owner: &str) -> Result<BTreeMap<Category, Decimal>, StorageError>;
    fn save_category_budget(&self, owner: &str, category: Category, limit: Decimal) -> Result<(), StorageError>;

    fn load_setting(&self, owner: &str, key: &str) -> Result<Option<String>, StorageError>;
    fn save_setting(&self, owner: &str, key: &str, value: &str) -> Result<(), StorageError>;

    /// Fails with `StorageError::Conflict` when the username or email is taken.
    fn add_user(&self, user: &NewUser) -> Result<(), StorageError>;
    fn list_users(&self) -> Result<Vec<UserRecord>, StorageError>;
}
