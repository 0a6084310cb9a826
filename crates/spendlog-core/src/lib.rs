//! Core types and traits for spendlog storage backends.
//!
//! This crate provides the `StorageBackend` trait and the expense data model,
//! so that engines can live next to each other behind a single interface.

pub mod models;
pub mod storage;

// Re-export key types at crate root for convenience
pub use models::{format_date, parse_date, Category, MonthlyExpenses, YearMonth, YearMonthError};
pub use models::read::{Expense, ExpenseId, UserRecord};
pub use models::write::{ExpenseError, NewExpense, NewUser};
pub use storage::{StorageBackend, StorageError, DEFAULT_OWNER};
