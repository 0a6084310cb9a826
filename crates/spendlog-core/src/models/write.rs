use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::Date;

use super::Category;

const FULL_SHARE: Decimal = Decimal::ONE_HUNDRED;

#[derive(Debug, Error, PartialEq)]
pub enum ExpenseError {
    #[error("description must not be empty")]
    EmptyDescription,
    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(Decimal),
    #[error("split share must be between 0 and 100, got {0}")]
    ShareOutOfRange(Decimal),
    #[error("split shares must sum to 100, got {0} + {1}")]
    SharesDoNotSumTo100(Decimal, Decimal),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewExpense {
    pub description: String,
    pub amount: Decimal,
    pub category: Category,
    #[serde(default)]
    pub date: Option<Date>,
    #[serde(default)]
    pub payer: Option<String>,
    #[serde(default)]
    pub split_person1: Option<Decimal>,
    #[serde(default)]
    pub split_person2: Option<Decimal>,
}

impl NewExpense {
    pub fn new(description: impl Into<String>, amount: Decimal, category: Category) -> Self {
        Self {
            description: description.into(),
            amount,
            category,
            date: None,
            payer: None,
            split_person1: None,
            split_person2: None,
        }
    }

    pub fn on(mut self, date: Date) -> Self {
        self.date = Some(date);
        self
    }

    pub fn paid_by(mut self, payer: impl Into<String>) -> Self {
        self.payer = Some(payer.into());
        self
    }

    pub fn split(mut self, person1: Decimal, person2: Decimal) -> Self {
        self.split_person1 = Some(person1);
        self.split_person2 = Some(person2);
        self
    }

    /// The date to persist: the explicit one, or today (UTC).
    pub fn effective_date(&self) -> Date {
        self.date
            .unwrap_or_else(|| time::OffsetDateTime::now_utc().date())
    }

    pub fn validate(&self) -> Result<(), ExpenseError> {
        if self.description.trim().is_empty() {
            return Err(ExpenseError::EmptyDescription);
        }
        if self.amount <= Decimal::ZERO {
            return Err(ExpenseError::NonPositiveAmount(self.amount));
        }
        for share in [self.split_person1, self.split_person2].into_iter().flatten() {
            if share < Decimal::ZERO || share > FULL_SHARE {
                return Err(ExpenseError::ShareOutOfRange(share));
            }
        }
        if let (Some(s1), Some(s2)) = (self.split_person1, self.split_person2) {
            if s1 + s2 != FULL_SHARE {
                return Err(ExpenseError::SharesDoNotSumTo100(s1, s2));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub username: String,
    pub display_name: String,
    pub email: String,
    pub password_hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn accepts_plain_expense() {
        let e = NewExpense::new("lunch", dec!(25.50), Category::Groceries);
        assert_eq!(e.validate(), Ok(()));
    }

    #[test]
    fn rejects_zero_and_negative_amounts() {
        let zero = NewExpense::new("lunch", Decimal::ZERO, Category::Other);
        assert_eq!(zero.validate(), Err(ExpenseError::NonPositiveAmount(Decimal::ZERO)));
        let neg = NewExpense::new("refund", dec!(-3), Category::Other);
        assert!(neg.validate().is_err());
    }

    #[test]
    fn rejects_blank_description() {
        let e = NewExpense::new("   ", dec!(1), Category::Other);
        assert_eq!(e.validate(), Err(ExpenseError::EmptyDescription));
    }

    #[test]
    fn shares_must_sum_to_one_hundred() {
        let ok = NewExpense::new("rent", dec!(1000), Category::Housing).split(dec!(60), dec!(40));
        assert_eq!(ok.validate(), Ok(()));

        let bad = NewExpense::new("rent", dec!(1000), Category::Housing).split(dec!(60), dec!(50));
        assert_eq!(bad.validate(), Err(ExpenseError::SharesDoNotSumTo100(dec!(60), dec!(50))));
    }

    #[test]
    fn single_share_must_be_a_percentage() {
        let mut e = NewExpense::new("gas", dec!(80), Category::Car);
        e.split_person1 = Some(dec!(120));
        assert_eq!(e.validate(), Err(ExpenseError::ShareOutOfRange(dec!(120))));
    }

    #[test]
    fn explicit_date_wins_over_today() {
        let d = time::macros::date!(2020 - 02 - 02);
        let e = NewExpense::new("book", dec!(30), Category::Education).on(d);
        assert_eq!(e.effective_date(), d);
    }
}
