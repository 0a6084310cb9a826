use std::{fmt::Display, str::FromStr};

use prettytable::{row, Table};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use time::{macros::format_description, Date};

pub mod read;
pub mod write;

use read::Expense;

/// Fixed set of spending categories. Persisted and exchanged by label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "Diversão")]
    Leisure,
    #[serde(rename = "Moradia")]
    Housing,
    #[serde(rename = "Carro")]
    Car,
    #[serde(rename = "Supermercado")]
    Groceries,
    #[serde(rename = "Saúde")]
    Health,
    #[serde(rename = "Contas")]
    Bills,
    #[serde(rename = "Educação")]
    Education,
    #[serde(rename = "Outros")]
    Other,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Category::Leisure,
        Category::Housing,
        Category::Car,
        Category::Groceries,
        Category::Health,
        Category::Bills,
        Category::Education,
        Category::Other,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Category::Leisure => "Diversão",
            Category::Housing => "Moradia",
            Category::Car => "Carro",
            Category::Groceries => "Supermercado",
            Category::Health => "Saúde",
            Category::Bills => "Contas",
            Category::Education => "Educação",
            Category::Other => "Outros",
        }
    }

    /// Case-insensitive lookup by label, ignoring surrounding whitespace.
    pub fn from_label(label: &str) -> Option<Category> {
        let label = label.trim();
        Category::ALL
            .into_iter()
            .find(|c| c.label().to_lowercase() == label.to_lowercase())
    }
}

impl Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::from_label(s).ok_or_else(|| format!("unknown category: {}", s))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum YearMonthError {
    #[error("expected YYYY-MM, got '{0}'")]
    Format(String),
    #[error("month out of range: {0}")]
    Month(u8),
}

/// A calendar month, rendered as `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct YearMonth {
    year: i32,
    month: u8,
}

impl YearMonth {
    pub fn new(year: i32, month: u8) -> Result<Self, YearMonthError> {
        if !(1..=12).contains(&month) {
            return Err(YearMonthError::Month(month));
        }
        Ok(Self { year, month })
    }

    pub fn of(date: Date) -> Self {
        Self {
            year: date.year(),
            month: date.month() as u8,
        }
    }

    pub fn current() -> Self {
        Self::of(time::OffsetDateTime::now_utc().date())
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u8 {
        self.month
    }

    pub fn contains(&self, date: Date) -> bool {
        Self::of(date) == *self
    }
}

impl Display for YearMonth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for YearMonth {
    type Err = YearMonthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || YearMonthError::Format(s.to_string());
        let (year, month) = s.split_once('-').ok_or_else(bad)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(bad());
        }
        let year = year.parse::<i32>().map_err(|_| bad())?;
        let month = month.parse::<u8>().map_err(|_| bad())?;
        YearMonth::new(year, month)
    }
}

impl Serialize for YearMonth {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for YearMonth {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

pub fn format_date(d: Date) -> String {
    format!("{:04}-{:02}-{:02}", d.year(), d.month() as u8, d.day())
}

pub fn parse_date(s: &str) -> Result<Date, time::error::Parse> {
    Date::parse(s, format_description!("[year]-[month]-[day]"))
}

/// Expenses of one month, most recent first, with their summed amount.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MonthlyExpenses {
    pub expenses: Vec<Expense>,
    pub total: Decimal,
}

impl MonthlyExpenses {
    pub fn from_expenses(expenses: Vec<Expense>) -> Self {
        let total = expenses.iter().map(|e| e.amount).sum();
        Self { expenses, total }
    }

    pub fn is_empty(&self) -> bool {
        self.expenses.is_empty()
    }
}

impl Display for MonthlyExpenses {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut table = Table::new();
        table.add_row(row!["Id", "Date", "Description", "Category", "Amount", "Payer"]);
        table.add_empty_row();

        for e in &self.expenses {
            table.add_row(row![
                e.id,
                format_date(e.date),
                e.description,
                e.category,
                e.amount,
                e.payer.as_deref().unwrap_or("")
            ]);
        }
        table.add_empty_row();
        table.add_row(row!["", "", "Total", "", self.total, ""]);

        write!(f, "\n{}\n", table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use time::macros::date;

    #[test]
    fn year_month_round_trips_through_text() {
        let ym: YearMonth = "2024-03".parse().unwrap();
        assert_eq!(ym.year(), 2024);
        assert_eq!(ym.month(), 3);
        assert_eq!(ym.to_string(), "2024-03");
    }

    #[test]
    fn year_month_rejects_malformed_input() {
        assert!("2024-3".parse::<YearMonth>().is_err());
        assert!("2024/03".parse::<YearMonth>().is_err());
        assert_eq!("2024-13".parse::<YearMonth>(), Err(YearMonthError::Month(13)));
        assert!("".parse::<YearMonth>().is_err());
    }

    #[test]
    fn year_month_contains_only_its_own_days() {
        let ym = YearMonth::new(2024, 2).unwrap();
        assert!(ym.contains(date!(2024 - 02 - 01)));
        assert!(ym.contains(date!(2024 - 02 - 29)));
        assert!(!ym.contains(date!(2024 - 03 - 01)));
        assert!(!ym.contains(date!(2023 - 02 - 15)));
    }

    #[test]
    fn year_months_order_chronologically() {
        let mut months = vec![
            YearMonth::new(2023, 12).unwrap(),
            YearMonth::new(2024, 1).unwrap(),
            YearMonth::new(2023, 2).unwrap(),
        ];
        months.sort();
        let rendered: Vec<String> = months.iter().map(|m| m.to_string()).collect();
        assert_eq!(rendered, vec!["2023-02", "2023-12", "2024-01"]);
    }

    #[test]
    fn category_labels_parse_case_insensitively() {
        assert_eq!(Category::from_label("supermercado"), Some(Category::Groceries));
        assert_eq!(Category::from_label(" Saúde "), Some(Category::Health));
        assert_eq!(Category::from_label("Groceries"), None);
        for c in Category::ALL {
            assert_eq!(c.label().parse::<Category>(), Ok(c));
        }
    }

    #[test]
    fn category_serializes_as_label() {
        let json = serde_json::to_string(&Category::Education).unwrap();
        assert_eq!(json, "\"Educação\"");
        let back: Category = serde_json::from_str("\"Carro\"").unwrap();
        assert_eq!(back, Category::Car);
    }

    #[test]
    fn dates_use_iso_calendar_format() {
        let d = date!(2023 - 01 - 05);
        assert_eq!(format_date(d), "2023-01-05");
        assert_eq!(parse_date("2023-01-05").unwrap(), d);
        assert!(parse_date("05/01/2023").is_err());
    }

    #[test]
    fn monthly_total_is_sum_of_amounts() {
        let mk = |id, amount| Expense {
            id,
            owner: "u1".to_string(),
            description: "x".to_string(),
            amount,
            category: Category::Other,
            date: date!(2024 - 05 - 01),
            payer: None,
            split_person1: None,
            split_person2: None,
        };
        let monthly = MonthlyExpenses::from_expenses(vec![mk(1, dec!(10.10)), mk(2, dec!(0.20))]);
        assert_eq!(monthly.total, dec!(10.30));
        assert!(MonthlyExpenses::from_expenses(vec![]).total.is_zero());

        let rendered = monthly.to_string();
        assert!(rendered.contains("2024-05-01"));
        assert!(rendered.contains("10.30"));
    }
}
