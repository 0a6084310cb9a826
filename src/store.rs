//! User-facing persistence contract.
//!
//! `ExpenseStore` wraps any `StorageBackend` and absorbs its errors: every
//! operation returns a success flag, a message, or a neutral default, and logs
//! the underlying failure. Callers decide whether to show it.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, PoisonError, RwLock},
};

use rust_decimal::Decimal;
use serde::Serialize;

use spendlog_core::{Category, ExpenseId, MonthlyExpenses, NewExpense, NewUser, UserRecord, YearMonth};

use crate::{
    password,
    storage::{StorageBackend, StorageError},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outcome {
    pub success: bool,
    pub message: String,
}

impl Outcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

#[derive(Clone)]
pub struct ExpenseStore {
    backend: Arc<dyn StorageBackend>,
    /// Per-owner count of expense writes. Readers that memoize months compare
    /// it to decide whether their copy is still current.
    generations: Arc<RwLock<HashMap<String, u64>>>,
}

fn record_failure(op: &'static str, e: &StorageError) {
    metrics::increment_counter!("spendlog_storage_failures_total", "op" => op);
    tracing::warn!(op, error = %e, "Storage operation failed");
}

impl ExpenseStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            generations: Arc::default(),
        }
    }

    /// Changes whenever an expense of `owner` is added or deleted through
    /// any clone of this store.
    pub fn generation(&self, owner: &str) -> u64 {
        let generations = self.generations.read().unwrap_or_else(PoisonError::into_inner);
        generations.get(owner).copied().unwrap_or(0)
    }

    fn bump_generation(&self, owner: &str) {
        let mut generations = self.generations.write().unwrap_or_else(PoisonError::into_inner);
        *generations.entry(owner.to_string()).or_insert(0) += 1;
    }

    pub fn initialize(&self) -> bool {
        match self.backend.initialize() {
            Ok(()) => true,
            Err(e) => {
                record_failure("initialize", &e);
                false
            }
        }
    }

    pub fn add_expense(&self, owner: &str, expense: &NewExpense) -> Outcome {
        match self.backend.add_expense(owner, expense) {
            Ok(id) => {
                self.bump_generation(owner);
                metrics::increment_counter!("spendlog_expenses_added_total");
                tracing::info!(owner, id, "Expense added");
                Outcome::ok(format!(
                    "Expense '{}' of {} added.",
                    expense.description, expense.amount
                ))
            }
            Err(StorageError::Validation(e)) => Outcome::failed(format!("Invalid expense: {}", e)),
            Err(e) => {
                record_failure("add_expense", &e);
                Outcome::failed("Could not add the expense. Please try again.")
            }
        }
    }

    pub fn monthly_expenses(&self, owner: &str, month: YearMonth) -> MonthlyExpenses {
        match self.backend.monthly_expenses(owner, month) {
            Ok(expenses) => MonthlyExpenses::from_expenses(expenses),
            Err(e) => {
                record_failure("monthly_expenses", &e);
                MonthlyExpenses::default()
            }
        }
    }

    pub fn delete_expense(&self, owner: &str, id: ExpenseId) -> bool {
        match self.backend.delete_expense(owner, id) {
            Ok(true) => {
                self.bump_generation(owner);
                metrics::increment_counter!("spendlog_expenses_deleted_total");
                tracing::info!(owner, id, "Expense deleted");
                true
            }
            Ok(false) => false,
            Err(e) => {
                record_failure("delete_expense", &e);
                false
            }
        }
    }

    pub fn distinct_months(&self, owner: &str) -> Vec<YearMonth> {
        self.backend.distinct_months(owner).unwrap_or_else(|e| {
            record_failure("distinct_months", &e);
            Vec::new()
        })
    }

    /// Limits for every requested category; unsaved ones are zero.
    pub fn load_category_budgets(&self, owner: &str, categories: &[Category]) -> BTreeMap<Category, Decimal> {
        let saved = self.backend.category_budgets(owner).unwrap_or_else(|e| {
            record_failure("load_category_budgets", &e);
            BTreeMap::new()
        });
        categories
            .iter()
            .map(|c| (*c, saved.get(c).copied().unwrap_or(Decimal::ZERO)))
            .collect()
    }

    /// Each entry is written on its own; one failure does not undo the rest.
    pub fn save_category_budgets(&self, owner: &str, budgets: &BTreeMap<Category, Decimal>) -> bool {
        let mut all_saved = true;
        for (category, limit) in budgets {
            if *limit < Decimal::ZERO {
                tracing::warn!(owner, %category, %limit, "Negative budget rejected");
                all_saved = false;
                continue;
            }
            if let Err(e) = self.backend.save_category_budget(owner, *category, *limit) {
                record_failure("save_category_budgets", &e);
                all_saved = false;
            }
        }
        all_saved
    }

    pub fn load_setting(&self, owner: &str, key: &str, default: &str) -> String {
        match self.backend.load_setting(owner, key) {
            Ok(Some(value)) => value,
            Ok(None) => default.to_string(),
            Err(e) => {
                record_failure("load_setting", &e);
                default.to_string()
            }
        }
    }

    pub fn save_setting(&self, owner: &str, key: &str, value: &str) -> bool {
        if value.trim().is_empty() {
            return false;
        }
        match self.backend.save_setting(owner, key, value.trim()) {
            Ok(()) => true,
            Err(e) => {
                record_failure("save_setting", &e);
                false
            }
        }
    }

    pub fn add_user(&self, username: &str, display_name: &str, email: &str, password: &str) -> Outcome {
        let username = username.trim();
        let email = email.trim();
        if username.is_empty() || email.is_empty() || password.is_empty() {
            return Outcome::failed("Username, email and password are required.");
        }

        let password_hash = match password::hash_password(password) {
            Ok(h) => h,
            Err(e) => {
                tracing::warn!(error = %e, "Password hashing failed");
                return Outcome::failed("Registration failed. Please try again.");
            }
        };

        let user = NewUser {
            username: username.to_string(),
            display_name: display_name.trim().to_string(),
            email: email.to_string(),
            password_hash,
        };

        match self.backend.add_user(&user) {
            Ok(()) => {
                tracing::info!(username, "User registered");
                Outcome::ok(format!("User '{}' registered.", username))
            }
            Err(StorageError::Conflict(_)) => {
                Outcome::failed("Registration failed: the username or email may already exist.")
            }
            Err(e) => {
                record_failure("add_user", &e);
                Outcome::failed("Registration failed. Please try again.")
            }
        }
    }

    pub fn fetch_all_users(&self) -> Vec<UserRecord> {
        self.backend.list_users().unwrap_or_else(|e| {
            record_failure("fetch_all_users", &e);
            Vec::new()
        })
    }

    pub fn verify_credentials(&self, username: &str, password: &str) -> Option<UserRecord> {
        self.fetch_all_users()
            .into_iter()
            .find(|u| u.username == username)
            .filter(|u| password::verify_password(password, &u.password_hash))
    }
}
