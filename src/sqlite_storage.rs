use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard},
};

use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use rust_decimal::Decimal;

use spendlog_core::{format_date, Category, Expense, ExpenseId, NewExpense, NewUser, UserRecord, YearMonth};

use crate::{
    sql::{decode_category, decode_decimal, decode_month, Dialect, RawExpense, Statements},
    storage::{StorageBackend, StorageError},
};

/// Embedded file database. `":memory:"` opens a private in-memory database.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
    statements: Statements,
}

impl SqliteStorage {
    pub fn new(path: &str) -> Result<Self, StorageError> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open(path)
        }
        .map_err(sqlite_err)?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(sqlite_err)?;

        let storage = Self {
            conn: Mutex::new(conn),
            statements: Statements::for_dialect(Dialect::Sqlite),
        };
        storage.initialize()?;
        Ok(storage)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Other("sqlite connection lock poisoned".to_string()))
    }
}

fn sqlite_err(e: rusqlite::Error) -> StorageError {
    match &e {
        rusqlite::Error::SqliteFailure(f, _) if f.code == ErrorCode::ConstraintViolation => {
            StorageError::Conflict(e.to_string())
        }
        _ => StorageError::Other(e.to_string()),
    }
}

impl StorageBackend for SqliteStorage {
    fn initialize(&self) -> Result<(), StorageError> {
        let conn = self.conn()?;
        conn.execute_batch(&self.statements.schema)
            .map_err(sqlite_err)?;
        tracing::debug!("SQLite schema ready");
        Ok(())
    }

    fn add_expense(&self, owner: &str, expense: &NewExpense) -> Result<ExpenseId, StorageError> {
        expense.validate()?;
        let conn = self.conn()?;
        let id: i64 = conn
            .query_row(
                &self.statements.insert_expense,
                params![
                    owner,
                    expense.description,
                    expense.amount.to_string(),
                    expense.category.label(),
                    format_date(expense.effective_date()),
                    expense.payer,
                    expense.split_person1.map(|s| s.to_string()),
                    expense.split_person2.map(|s| s.to_string()),
                ],
                |row| row.get(0),
            )
            .map_err(sqlite_err)?;
        tracing::debug!(owner, id, "SQLite expense inserted");
        Ok(id)
    }

    fn monthly_expenses(&self, owner: &str, month: YearMonth) -> Result<Vec<Expense>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&self.statements.monthly_expenses)
            .map_err(sqlite_err)?;

        let rows = stmt
            .query_map(params![owner, month.to_string()], |row| {
                Ok(RawExpense {
                    id: row.get(0)?,
                    owner: row.get(1)?,
                    description: row.get(2)?,
                    amount: row.get(3)?,
                    category: row.get(4)?,
                    date: row.get(5)?,
                    payer: row.get(6)?,
                    split_person1: row.get(7)?,
                    split_person2: row.get(8)?,
                })
            })
            .map_err(sqlite_err)?;

        let mut result = Vec::new();
        for row in rows {
            result.push(Expense::try_from(row.map_err(sqlite_err)?)?);
        }
        Ok(result)
    }

    fn delete_expense(&self, owner: &str, id: ExpenseId) -> Result<bool, StorageError> {
        let conn = self.conn()?;
        let removed = conn
            .execute(&self.statements.delete_expense, params![owner, id])
            .map_err(sqlite_err)?;
        Ok(removed > 0)
    }

    fn distinct_months(&self, owner: &str) -> Result<Vec<YearMonth>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&self.statements.distinct_months)
            .map_err(sqlite_err)?;
        let rows = stmt
            .query_map(params![owner], |row| row.get::<_, String>(0))
            .map_err(sqlite_err)?;

        let mut result = Vec::new();
        for row in rows {
            result.push(decode_month(&row.map_err(sqlite_err)?)?);
        }
        Ok(result)
    }

    fn category_budgets(&self, owner: &str) -> Result<BTreeMap<Category, Decimal>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&self.statements.select_budgets)
            .map_err(sqlite_err)?;
        let rows = stmt
            .query_map(params![owner], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(sqlite_err)?;

        let mut result = BTreeMap::new();
        for row in rows {
            let (category, limit) = row.map_err(sqlite_err)?;
            result.insert(decode_category(&category)?, decode_decimal(&limit)?);
        }
        Ok(result)
    }

    fn save_category_budget(&self, owner: &str, category: Category, limit: Decimal) -> Result<(), StorageError> {
        let conn = self.conn()?;
        conn.execute(
            &self.statements.upsert_budget,
            params![owner, category.label(), limit.to_string()],
        )
        .map_err(sqlite_err)?;
        Ok(())
    }

    fn load_setting(&self, owner: &str, key: &str) -> Result<Option<String>, StorageError> {
        let conn = self.conn()?;
        conn.query_row(&self.statements.select_setting, params![owner, key], |row| row.get(0))
            .optional()
            .map_err(sqlite_err)
    }

    fn save_setting(&self, owner: &str, key: &str, value: &str) -> Result<(), StorageError> {
        let conn = self.conn()?;
        conn.execute(&self.statements.upsert_setting, params![owner, key, value])
            .map_err(sqlite_err)?;
        Ok(())
    }

    fn add_user(&self, user: &NewUser) -> Result<(), StorageError> {
        let conn = self.conn()?;
        conn.execute(
            &self.statements.insert_user,
            params![user.username, user.display_name, user.email, user.password_hash],
        )
        .map_err(sqlite_err)?;
        Ok(())
    }

    fn list_users(&self) -> Result<Vec<UserRecord>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&self.statements.select_users)
            .map_err(sqlite_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(UserRecord {
                    username: row.get(0)?,
                    display_name: row.get(1)?,
                    email: row.get(2)?,
                    password_hash: row.get(3)?,
                })
            })
            .map_err(sqlite_err)?;

        rows.collect::<Result<Vec<_>, _>>().map_err(sqlite_err)
    }
}
