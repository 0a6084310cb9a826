use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard},
};

use postgres::{error::SqlState, Client, NoTls};
use rust_decimal::Decimal;

use spendlog_core::{format_date, Category, Expense, ExpenseId, NewExpense, NewUser, UserRecord, YearMonth};

use crate::{
    sql::{decode_category, decode_decimal, decode_month, Dialect, RawExpense, Statements},
    storage::{StorageBackend, StorageError},
};

/// PostgreSQL backend. Serves both self-managed clusters and hosted cloud
/// instances; only the connection string differs.
pub struct PostgresStorage {
    client: Mutex<Client>,
    statements: Statements,
}

impl PostgresStorage {
    pub fn new(connection_string: &str) -> Result<Self, StorageError> {
        let client = Client::connect(connection_string, NoTls)
            .map_err(|e| StorageError::Other(format!("PostgreSQL connection failed: {}", e)))?;

        let storage = Self {
            client: Mutex::new(client),
            statements: Statements::for_dialect(Dialect::Postgres),
        };
        storage.initialize()?;
        Ok(storage)
    }

    fn client(&self) -> Result<MutexGuard<'_, Client>, StorageError> {
        self.client
            .lock()
            .map_err(|_| StorageError::Other("postgres client lock poisoned".to_string()))
    }
}

fn pg_err(e: postgres::Error) -> StorageError {
    match e.code() {
        Some(code) if *code == SqlState::UNIQUE_VIOLATION => StorageError::Conflict(e.to_string()),
        _ => StorageError::Other(e.to_string()),
    }
}

impl StorageBackend for PostgresStorage {
    fn initialize(&self) -> Result<(), StorageError> {
        let mut client = self.client()?;
        client
            .batch_execute(&self.statements.schema)
            .map_err(pg_err)?;
        tracing::debug!("PostgreSQL schema ready");
        Ok(())
    }

    fn add_expense(&self, owner: &str, expense: &NewExpense) -> Result<ExpenseId, StorageError> {
        expense.validate()?;
        let amount = expense.amount.to_string();
        let date = format_date(expense.effective_date());
        let split1 = expense.split_person1.map(|s| s.to_string());
        let split2 = expense.split_person2.map(|s| s.to_string());

        let mut client = self.client()?;
        let row = client
            .query_one(
                &self.statements.insert_expense,
                &[
                    &owner,
                    &expense.description,
                    &amount,
                    &expense.category.label(),
                    &date,
                    &expense.payer,
                    &split1,
                    &split2,
                ],
            )
            .map_err(pg_err)?;
        let id: i64 = row.get(0);
        tracing::debug!(owner, id, "PostgreSQL expense inserted");
        Ok(id)
    }

    fn monthly_expenses(&self, owner: &str, month: YearMonth) -> Result<Vec<Expense>, StorageError> {
        let month = month.to_string();
        let mut client = self.client()?;
        let rows = client
            .query(&self.statements.monthly_expenses, &[&owner, &month])
            .map_err(pg_err)?;

        rows.iter()
            .map(|row| {
                Expense::try_from(RawExpense {
                    id: row.get(0),
                    owner: row.get(1),
                    description: row.get(2),
                    amount: row.get(3),
                    category: row.get(4),
                    date: row.get(5),
                    payer: row.get(6),
                    split_person1: row.get(7),
                    split_person2: row.get(8),
                })
            })
            .collect()
    }

    fn delete_expense(&self, owner: &str, id: ExpenseId) -> Result<bool, StorageError> {
        let mut client = self.client()?;
        let removed = client
            .execute(&self.statements.delete_expense, &[&owner, &id])
            .map_err(pg_err)?;
        Ok(removed > 0)
    }

    fn distinct_months(&self, owner: &str) -> Result<Vec<YearMonth>, StorageError> {
        let mut client = self.client()?;
        let rows = client
            .query(&self.statements.distinct_months, &[&owner])
            .map_err(pg_err)?;
        rows.iter()
            .map(|row| decode_month(&row.get::<_, String>(0)))
            .collect()
    }

    fn category_budgets(&self, owner: &str) -> Result<BTreeMap<Category, Decimal>, StorageError> {
        let mut client = self.client()?;
        let rows = client
            .query(&self.statements.select_budgets, &[&owner])
            .map_err(pg_err)?;

        let mut result = BTreeMap::new();
        for row in rows {
            let category: String = row.get(0);
            let limit: String = row.get(1);
            result.insert(decode_category(&category)?, decode_decimal(&limit)?);
        }
        Ok(result)
    }

    fn save_category_budget(&self, owner: &str, category: Category, limit: Decimal) -> Result<(), StorageError> {
        let limit = limit.to_string();
        let mut client = self.client()?;
        client
            .execute(&self.statements.upsert_budget, &[&owner, &category.label(), &limit])
            .map_err(pg_err)?;
        Ok(())
    }

    fn load_setting(&self, owner: &str, key: &str) -> Result<Option<String>, StorageError> {
        let mut client = self.client()?;
        let row = client
            .query_opt(&self.statements.select_setting, &[&owner, &key])
            .map_err(pg_err)?;
        Ok(row.map(|r| r.get(0)))
    }

    fn save_setting(&self, owner: &str, key: &str, value: &str) -> Result<(), StorageError> {
        let mut client = self.client()?;
        client
            .execute(&self.statements.upsert_setting, &[&owner, &key, &value])
            .map_err(pg_err)?;
        Ok(())
    }

    fn add_user(&self, user: &NewUser) -> Result<(), StorageError> {
        let mut client = self.client()?;
        client
            .execute(
                &self.statements.insert_user,
                &[&user.username, &user.display_name, &user.email, &user.password_hash],
            )
            .map_err(pg_err)?;
        Ok(())
    }

    fn list_users(&self) -> Result<Vec<UserRecord>, StorageError> {
        let mut client = self.client()?;
        let rows = client
            .query(&self.statements.select_users, &[])
            .map_err(pg_err)?;
        Ok(rows
            .iter()
            .map(|row| UserRecord {
                username: row.get(0),
                display_name: row.get(1),
                email: row.get(2),
                password_hash: row.get(3),
            })
            .collect())
    }
}
