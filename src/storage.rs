use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc, RwLock, RwLockReadGuard, RwLockWriteGuard,
    },
};

use rust_decimal::Decimal;

use spendlog_core::{Category, Expense, ExpenseId, NewExpense, NewUser, UserRecord, YearMonth};

use crate::{
    config::{StorageConfig, StorageEngine},
    postgres_storage::PostgresStorage,
    sqlite_storage::SqliteStorage,
};

pub use spendlog_core::storage::{StorageBackend, StorageError, DEFAULT_OWNER};

#[derive(Clone, Default)]
struct OwnerData {
    expenses: BTreeMap<ExpenseId, Expense>,
    budgets: BTreeMap<Category, Decimal>,
    settings: BTreeMap<String, String>,
}

/// Process-local backend. Nothing survives a restart.
pub struct InMemoryStorage {
    owners: RwLock<BTreeMap<Arc<str>, OwnerData>>,
    users: RwLock<BTreeMap<String, UserRecord>>,
    id_counter: AtomicI64,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            owners: RwLock::new(BTreeMap::new()),
            users: RwLock::new(BTreeMap::new()),
            id_counter: AtomicI64::new(1),
        }
    }

    fn next_id(&self) -> ExpenseId {
        self.id_counter.fetch_add(1, Ordering::SeqCst)
    }

    fn read_owners(&self) -> Result<RwLockReadGuard<'_, BTreeMap<Arc<str>, OwnerData>>, StorageError> {
        self.owners
            .read()
            .map_err(|_| StorageError::Other("storage lock poisoned".to_string()))
    }

    fn write_owners(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<Arc<str>, OwnerData>>, StorageError> {
        self.owners
            .write()
            .map_err(|_| StorageError::Other("storage lock poisoned".to_string()))
    }
}

impl StorageBackend for InMemoryStorage {
    fn initialize(&self) -> Result<(), StorageError> {
        Ok(())
    }

    fn add_expense(&self, owner: &str, expense: &NewExpense) -> Result<ExpenseId, StorageError> {
        expense.validate()?;
        let id = self.next_id();
        let record = Expense {
            id,
            owner: owner.to_string(),
            description: expense.description.clone(),
            amount: expense.amount,
            category: expense.category,
            date: expense.effective_date(),
            payer: expense.payer.clone(),
            split_person1: expense.split_person1,
            split_person2: expense.split_person2,
        };

        let mut owners = self.write_owners()?;
        owners
            .entry(Arc::from(owner))
            .or_default()
            .expenses
            .insert(id, record);
        tracing::debug!(owner, id, "Expense stored in memory");
        Ok(id)
    }

    fn monthly_expenses(&self, owner: &str, month: YearMonth) -> Result<Vec<Expense>, StorageError> {
        let owners = self.read_owners()?;
        let mut result: Vec<Expense> = match owners.get(owner) {
            Some(data) => data
                .expenses
                .values()
                .filter(|e| month.contains(e.date))
                .cloned()
                .collect(),
            None => Vec::new(),
        };
        result.sort_by(|a, b| b.date.cmp(&a.date).then(b.id.cmp(&a.id)));
        Ok(result)
    }

    fn delete_expense(&self, owner: &str, id: ExpenseId) -> Result<bool, StorageError> {
        let mut owners = self.write_owners()?;
        Ok(owners
            .get_mut(owner)
            .map(|data| data.expenses.remove(&id).is_some())
            .unwrap_or(false))
    }

    fn distinct_months(&self, owner: &str) -> Result<Vec<YearMonth>, StorageError> {
        let owners = self.read_owners()?;
        let months: BTreeSet<YearMonth> = match owners.get(owner) {
            Some(data) => data.expenses.values().map(|e| YearMonth::of(e.date)).collect(),
            None => BTreeSet::new(),
        };
        Ok(months.into_iter().rev().collect())
    }

    fn category_budgets(&self, owner: &str) -> Result<BTreeMap<Category, Decimal>, StorageError> {
        let owners = self.read_owners()?;
        Ok(owners.get(owner).map(|d| d.budgets.clone()).unwrap_or_default())
    }

    fn save_category_budget(&self, owner: &str, category: Category, limit: Decimal) -> Result<(), StorageError> {
        let mut owners = self.write_owners()?;
        owners
            .entry(Arc::from(owner))
            .or_default()
            .budgets
            .insert(category, limit);
        Ok(())
    }

    fn load_setting(&self, owner: &str, key: &str) -> Result<Option<String>, StorageError> {
        let owners = self.read_owners()?;
        Ok(owners.get(owner).and_then(|d| d.settings.get(key).cloned()))
    }

    fn save_setting(&self, owner: &str, key: &str, value: &str) -> Result<(), StorageError> {
        let mut owners = self.write_owners()?;
        owners
            .entry(Arc::from(owner))
            .or_default()
            .settings
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn add_user(&self, user: &NewUser) -> Result<(), StorageError> {
        let mut users = self
            .users
            .write()
            .map_err(|_| StorageError::Other("storage lock poisoned".to_string()))?;
        if users.contains_key(&user.username) || users.values().any(|u| u.email == user.email) {
            return Err(StorageError::Conflict("username or email".to_string()));
        }
        users.insert(
            user.username.clone(),
            UserRecord {
                username: user.username.clone(),
                display_name: user.display_name.clone(),
                email: user.email.clone(),
                password_hash: user.password_hash.clone(),
            },
        );
        Ok(())
    }

    fn list_users(&self) -> Result<Vec<UserRecord>, StorageError> {
        let users = self
            .users
            .read()
            .map_err(|_| StorageError::Other("storage lock poisoned".to_string()))?;
        Ok(users.values().cloned().collect())
    }
}

/// Opens the backend named by `storage.engine`. SQL engines create their
/// schema on open.
pub fn open_storage(config: &StorageConfig) -> Result<Arc<dyn StorageBackend>, StorageError> {
    let backend: Arc<dyn StorageBackend> = match config.engine {
        StorageEngine::Memory => Arc::new(InMemoryStorage::new()),
        StorageEngine::Sqlite => Arc::new(SqliteStorage::new(&config.path)?),
        StorageEngine::Postgres => {
            let url = config.url.as_deref().ok_or_else(|| {
                StorageError::Other("storage.url is required for the postgres engine".to_string())
            })?;
            Arc::new(PostgresStorage::new(url)?)
        }
    };
    tracing::info!(engine = ?config.engine, "Storage ready");
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use time::macros::date;

    #[test]
    fn test_memory_orders_by_date_then_id() {
        let storage = InMemoryStorage::new();
        let d1 = date!(2024 - 03 - 01);
        let d2 = date!(2024 - 03 - 15);
        let a = storage
            .add_expense("u1", &NewExpense::new("a", dec!(1), Category::Other).on(d1))
            .unwrap();
        let b = storage
            .add_expense("u1", &NewExpense::new("b", dec!(2), Category::Other).on(d2))
            .unwrap();
        let c = storage
            .add_expense("u1", &NewExpense::new("c", dec!(3), Category::Other).on(d2))
            .unwrap();

        let ids: Vec<ExpenseId> = storage
            .monthly_expenses("u1", YearMonth::of(d1))
            .unwrap()
            .iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec![c, b, a]);
    }

    #[test]
    fn test_memory_rejects_invalid_expense() {
        let storage = InMemoryStorage::new();
        let result = storage.add_expense("u1", &NewExpense::new("x", dec!(0), Category::Other));
        assert!(matches!(result, Err(StorageError::Validation(_))));
        assert!(storage.distinct_months("u1").unwrap().is_empty());
    }

    #[test]
    fn test_memory_unknown_owner_reads_empty() {
        let storage = InMemoryStorage::new();
        assert!(storage.monthly_expenses("ghost", YearMonth::current()).unwrap().is_empty());
        assert!(storage.category_budgets("ghost").unwrap().is_empty());
        assert_eq!(storage.load_setting("ghost", "app_mode").unwrap(), None);
        assert!(!storage.delete_expense("ghost", 1).unwrap());
    }

    #[test]
    fn test_open_storage_by_engine() {
        let memory = StorageConfig {
            engine: StorageEngine::Memory,
            ..StorageConfig::default()
        };
        assert!(open_storage(&memory).is_ok());

        let sqlite = StorageConfig {
            engine: StorageEngine::Sqlite,
            path: ":memory:".to_string(),
            url: None,
        };
        let backend = open_storage(&sqlite).unwrap();
        assert!(backend.list_users().unwrap().is_empty());

        let postgres = StorageConfig {
            engine: StorageEngine::Postgres,
            url: None,
            ..StorageConfig::default()
        };
        assert!(matches!(open_storage(&postgres), Err(StorageError::Other(_))));
    }
}
