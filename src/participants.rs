//! Who pays: usage mode, participant names and the per-person breakdown of
//! a month's spending.

use std::{fmt, str::FromStr};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use spendlog_core::Expense;

use crate::store::ExpenseStore;

pub const APP_MODE_KEY: &str = "app_mode";
pub const PERSON1_NAME_KEY: &str = "person1_name";
pub const PERSON2_NAME_KEY: &str = "person2_name";

pub const BOTH_PAYERS: &str = "Ambos";
pub const INDIVIDUAL_PAYER: &str = "Eu";
pub const DEFAULT_PERSON1: &str = "Pessoa 1";
pub const DEFAULT_PERSON2: &str = "Pessoa 2";

const DEFAULT_SHARE: Decimal = Decimal::from_parts(50, 0, 0, false, 0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AppMode {
    #[default]
    Individual,
    Casal,
}

impl AppMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppMode::Individual => "Individual",
            AppMode::Casal => "Casal",
        }
    }
}

impl fmt::Display for AppMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Individual" => Ok(AppMode::Individual),
            "Casal" => Ok(AppMode::Casal),
            other => Err(format!("unknown app mode '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participants {
    pub mode: AppMode,
    pub person1: String,
    pub person2: String,
}

impl Default for Participants {
    fn default() -> Self {
        Self {
            mode: AppMode::Individual,
            person1: DEFAULT_PERSON1.to_string(),
            person2: DEFAULT_PERSON2.to_string(),
        }
    }
}

impl Participants {
    pub fn load(store: &ExpenseStore, owner: &str) -> Self {
        let mode = store
            .load_setting(owner, APP_MODE_KEY, AppMode::Individual.as_str())
            .parse()
            .unwrap_or_else(|e: String| {
                tracing::warn!(owner, error = %e, "Stored app mode ignored");
                AppMode::Individual
            });

        Self {
            mode,
            person1: store.load_setting(owner, PERSON1_NAME_KEY, DEFAULT_PERSON1),
            person2: store.load_setting(owner, PERSON2_NAME_KEY, DEFAULT_PERSON2),
        }
    }

    /// Names must be non-empty; nothing is written otherwise.
    pub fn save(&self, store: &ExpenseStore, owner: &str) -> bool {
        if self.person1.trim().is_empty() || self.person2.trim().is_empty() {
            return false;
        }
        let mode = store.save_setting(owner, APP_MODE_KEY, self.mode.as_str());
        let p1 = store.save_setting(owner, PERSON1_NAME_KEY, &self.person1);
        let p2 = store.save_setting(owner, PERSON2_NAME_KEY, &self.person2);
        mode && p1 && p2
    }

    /// Payer options offered when confirming an expense.
    pub fn payer_options(&self) -> Vec<String> {
        match self.mode {
            AppMode::Individual => vec![INDIVIDUAL_PAYER.to_string()],
            AppMode::Casal => vec![
                self.person1.clone(),
                self.person2.clone(),
                BOTH_PAYERS.to_string(),
            ],
        }
    }

    pub fn resolve_payment(&self, details: &PaymentDetails) -> Result<Payment, PaymentError> {
        if self.mode == AppMode::Individual {
            return Ok(Payment {
                payer: INDIVIDUAL_PAYER.to_string(),
                split_person1: None,
                split_person2: None,
            });
        }

        let hundred = Decimal::ONE_HUNDRED;
        let payment = match details.payer {
            PayerChoice::Person1 => Payment {
                payer: self.person1.clone(),
                split_person1: Some(hundred),
                split_person2: Some(Decimal::ZERO),
            },
            PayerChoice::Person2 => Payment {
                payer: self.person2.clone(),
                split_person1: Some(Decimal::ZERO),
                split_person2: Some(hundred),
            },
            PayerChoice::Both => {
                let share = details.share_person1.unwrap_or(DEFAULT_SHARE);
                if share < Decimal::ZERO || share > hundred {
                    return Err(PaymentError::ShareOutOfRange(share));
                }
                Payment {
                    payer: BOTH_PAYERS.to_string(),
                    split_person1: Some(share),
                    split_person2: Some(hundred - share),
                }
            }
        };
        Ok(payment)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayerChoice {
    #[default]
    Person1,
    Person2,
    Both,
}

/// Caller's answer to "who paid?". Ignored in individual mode.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PaymentDetails {
    #[serde(default)]
    pub payer: PayerChoice,
    /// Percentage borne by person 1 when both paid; defaults to 50.
    #[serde(default)]
    pub share_person1: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Payment {
    pub payer: String,
    pub split_person1: Option<Decimal>,
    pub split_person2: Option<Decimal>,
}

#[derive(Debug, Error, PartialEq)]
pub enum PaymentError {
    #[error("share must be between 0 and 100, got {0}")]
    ShareOutOfRange(Decimal),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Contribution {
    pub name: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Contributions {
    pub person1: Contribution,
    pub person2: Contribution,
    /// Rows whose payer matches neither participant, or shared rows without shares.
    pub unassigned: Decimal,
}

/// Sums what each participant paid. A row paid by one person counts in full
/// for them; a row paid by both is divided by its recorded shares.
pub fn contributions(expenses: &[Expense], participants: &Participants) -> Contributions {
    let mut p1 = Decimal::ZERO;
    let mut p2 = Decimal::ZERO;
    let mut unassigned = Decimal::ZERO;

    for e in expenses {
        match e.payer.as_deref() {
            Some(name) if name == participants.person1 => p1 += e.amount,
            Some(name) if name == participants.person2 => p2 += e.amount,
            Some(BOTH_PAYERS) => match (e.split_person1, e.split_person2) {
                (Some(s1), Some(s2)) => {
                    p1 += e.amount * s1 / Decimal::ONE_HUNDRED;
                    p2 += e.amount * s2 / Decimal::ONE_HUNDRED;
                }
                _ => unassigned += e.amount,
            },
            _ => unassigned += e.amount,
        }
    }

    Contributions {
        person1: Contribution {
            name: participants.person1.clone(),
            amount: p1,
        },
        person2: Contribution {
            name: participants.person2.clone(),
            amount: p2,
        },
        unassigned,
    }
}
