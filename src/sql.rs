//! SQL text for each engine, built in one place.
//!
//! Both SQL engines share the same table shapes and the same
//! `INSERT ... ON CONFLICT ... DO UPDATE` upsert; they differ in placeholder
//! syntax and in how the expense id is generated. Every statement binds user
//! data through placeholders.

use std::str::FromStr;

use rust_decimal::Decimal;
use spendlog_core::{parse_date, Category, Expense, StorageError, YearMonth};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
}

impl Dialect {
    fn placeholder(&self, n: usize) -> String {
        match self {
            Dialect::Sqlite => format!("?{}", n),
            Dialect::Postgres => format!("${}", n),
        }
    }

    fn placeholders(&self, count: usize) -> String {
        (1..=count)
            .map(|n| self.placeholder(n))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn id_column(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "id INTEGER PRIMARY KEY AUTOINCREMENT",
            Dialect::Postgres => "id BIGSERIAL PRIMARY KEY",
        }
    }

    pub fn schema(&self) -> String {
        format!(
            "
            CREATE TABLE IF NOT EXISTS expenses (
                {id},
                owner TEXT NOT NULL,
                description TEXT NOT NULL,
                amount TEXT NOT NULL,
                category TEXT NOT NULL,
                date TEXT NOT NULL,
                payer TEXT,
                split_person1 TEXT,
                split_person2 TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_expenses_owner_date
                ON expenses(owner, date);

            CREATE TABLE IF NOT EXISTS category_budgets (
                owner TEXT NOT NULL,
                category TEXT NOT NULL,
                budget_limit TEXT NOT NULL,
                PRIMARY KEY (owner, category)
            );

            CREATE TABLE IF NOT EXISTS settings (
                owner TEXT NOT NULL,
                setting_key TEXT NOT NULL,
                setting_value TEXT NOT NULL,
                PRIMARY KEY (owner, setting_key)
            );

            CREATE TABLE IF NOT EXISTS users (
                username TEXT PRIMARY KEY,
                display_name TEXT NOT NULL,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL
            );
            ",
            id = self.id_column()
        )
    }

    /// `INSERT ... ON CONFLICT (keys) DO UPDATE SET value = excluded.value`.
    pub fn upsert(&self, table: &str, key_columns: &[&str], value_column: &str) -> String {
        let mut columns: Vec<&str> = key_columns.to_vec();
        columns.push(value_column);
        format!(
            "INSERT INTO {table} ({cols}) VALUES ({params}) ON CONFLICT ({keys}) DO UPDATE SET {value} = excluded.{value}",
            table = table,
            cols = columns.join(", "),
            params = self.placeholders(columns.len()),
            keys = key_columns.join(", "),
            value = value_column,
        )
    }
}

/// Prepared statement text for one engine.
#[derive(Debug, Clone)]
pub struct Statements {
    pub schema: String,
    pub insert_expense: String,
    pub monthly_expenses: String,
    pub delete_expense: String,
    pub distinct_months: String,
    pub select_budgets: String,
    pub upsert_budget: String,
    pub select_setting: String,
    pub upsert_setting: String,
    pub insert_user: String,
    pub select_users: String,
}

impl Statements {
    pub fn for_dialect(dialect: Dialect) -> Self {
        let p = |n| dialect.placeholder(n);
        Self {
            schema: dialect.schema(),
            insert_expense: format!(
                "INSERT INTO expenses (owner, description, amount, category, date, payer, split_person1, split_person2) VALUES ({}) RETURNING id",
                dialect.placeholders(8)
            ),
            monthly_expenses: format!(
                "SELECT id, owner, description, amount, category, date, payer, split_person1, split_person2
                 FROM expenses
                 WHERE owner = {} AND substr(date, 1, 7) = {}
                 ORDER BY date DESC, id DESC",
                p(1),
                p(2)
            ),
            delete_expense: format!("DELETE FROM expenses WHERE owner = {} AND id = {}", p(1), p(2)),
            distinct_months: format!(
                "SELECT DISTINCT substr(date, 1, 7) AS month FROM expenses WHERE owner = {} ORDER BY month DESC",
                p(1)
            ),
            select_budgets: format!(
                "SELECT category, budget_limit FROM category_budgets WHERE owner = {}",
                p(1)
            ),
            upsert_budget: dialect.upsert("category_budgets", &["owner", "category"], "budget_limit"),
            select_setting: format!(
                "SELECT setting_value FROM settings WHERE owner = {} AND setting_key = {}",
                p(1),
                p(2)
            ),
            upsert_setting: dialect.upsert("settings", &["owner", "setting_key"], "setting_value"),
            insert_user: format!(
                "INSERT INTO users (username, display_name, email, password_hash) VALUES ({})",
                dialect.placeholders(4)
            ),
            select_users: "SELECT username, display_name, email, password_hash FROM users ORDER BY username".to_string(),
        }
    }
}

/// An `expenses` row as the engines return it, before decoding.
pub struct RawExpense {
    pub id: i64,
    pub owner: String,
    pub description: String,
    pub amount: String,
    pub category: String,
    pub date: String,
    pub payer: Option<String>,
    pub split_person1: Option<String>,
    pub split_person2: Option<String>,
}

impl TryFrom<RawExpense> for Expense {
    type Error = StorageError;

    fn try_from(raw: RawExpense) -> Result<Self, Self::Error> {
        Ok(Expense {
            id: raw.id,
            owner: raw.owner,
            description: raw.description,
            amount: decode_decimal(&raw.amount)?,
            category: decode_category(&raw.category)?,
            date: parse_date(&raw.date)
                .map_err(|e| StorageError::InvalidData(format!("date '{}': {}", raw.date, e)))?,
            payer: raw.payer,
            split_person1: raw.split_person1.as_deref().map(decode_decimal).transpose()?,
            split_person2: raw.split_person2.as_deref().map(decode_decimal).transpose()?,
        })
    }
}

pub fn decode_decimal(s: &str) -> Result<Decimal, StorageError> {
    Decimal::from_str(s).map_err(|e| StorageError::InvalidData(format!("decimal '{}': {}", s, e)))
}

pub fn decode_category(s: &str) -> Result<Category, StorageError> {
    Category::from_label(s).ok_or_else(|| StorageError::InvalidData(format!("category '{}'", s)))
}

pub fn decode_month(s: &str) -> Result<YearMonth, StorageError> {
    s.parse::<YearMonth>()
        .map_err(|e| StorageError::InvalidData(format!("month '{}': {}", s, e)))
}
