use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::Date;

use super::Category;

pub type ExpenseId = i64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expense {
    pub id: ExpenseId,
    pub owner: String,
    pub description: String,
    pub amount: Decimal,
    pub category: Category,
    pub date: Date,
    pub payer: Option<String>,
    pub split_person1: Option<Decimal>,
    pub split_person2: Option<Decimal>,
}

/// Stored account. `password_hash` is an argon2 PHC string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub username: String,
    pub display_name: String,
    pub email: String,
    pub password_hash: String,
}
