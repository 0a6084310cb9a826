//! Conversation flow: text or audio in, extraction, a pending expense waiting
//! for payer details, then persistence. Also the month report and advice.
//!
//! Storage calls are synchronous and run on the blocking pool; extraction
//! calls are awaited inline while the caller holds the session lock.

use std::{collections::BTreeMap, sync::Arc};

use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinError;

use spendlog_core::{Category, Expense, ExpenseId, MonthlyExpenses, NewExpense, YearMonth};

use crate::{
    extraction::{AdviceRequest, ExtractedExpense, Extraction, Extractor},
    participants::{contributions, AppMode, Contributions, Participants, PaymentDetails, PaymentError},
    session::{Role, Session},
    store::{ExpenseStore, Outcome},
};

pub const COULD_NOT_PROCESS: &str =
    "Sorry, I could not process that. Try again including the item and the amount.";
pub const COULD_NOT_TRANSCRIBE: &str = "Sorry, I could not transcribe the audio. Please try again.";

#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("an expense is already awaiting confirmation")]
    PendingExists,
    #[error("no expense is awaiting confirmation")]
    NothingPending,
    #[error("invalid payment details: {0}")]
    Payment(#[from] PaymentError),
    #[error("storage worker failed: {0}")]
    Worker(#[from] JoinError),
}

/// What the assistant said back, plus the expense now awaiting confirmation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reply {
    pub message: String,
    pub pending: Option<ExtractedExpense>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategorySpending {
    pub category: Category,
    pub spent: Decimal,
    pub budget: Decimal,
    pub over_budget: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyReport {
    pub month: YearMonth,
    pub mode: AppMode,
    pub expenses: Vec<Expense>,
    pub total: Decimal,
    pub categories: Vec<CategorySpending>,
    /// Present in couple mode only.
    pub contributions: Option<Contributions>,
}

#[derive(Clone)]
pub struct Assistant {
    store: ExpenseStore,
    extractor: Arc<dyn Extractor>,
    categories: Vec<Category>,
}

impl Assistant {
    pub fn new(store: ExpenseStore, extractor: Arc<dyn Extractor>) -> Self {
        Self {
            store,
            extractor,
            categories: Category::ALL.to_vec(),
        }
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, AssistantError>
    where
        F: FnOnce(&ExpenseStore) -> T + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        Ok(tokio::task::spawn_blocking(move || f(&store)).await?)
    }

    pub async fn submit_text(&self, session: &mut Session, text: &str) -> Result<Reply, AssistantError> {
        if session.pending().is_some() {
            return Err(AssistantError::PendingExists);
        }

        session.push(Role::User, text);
        let extraction = self.extractor.extract(text, &self.categories).await;
        metrics::increment_counter!("spendlog_extractions_total", "outcome" => extraction.outcome_label());

        let message = match extraction {
            Extraction::Expense(expense) => {
                let message = format!(
                    "Got it: '{}' for {} in {}. Now tell me who paid to confirm.",
                    expense.description, expense.amount, expense.category
                );
                session.set_pending(expense);
                message
            }
            Extraction::NotAnExpense => COULD_NOT_PROCESS.to_string(),
            Extraction::Failed { reason } => {
                tracing::debug!(owner = session.owner(), %reason, "Extraction failed");
                COULD_NOT_PROCESS.to_string()
            }
        };

        session.push(Role::Assistant, message.clone());
        Ok(Reply {
            message,
            pending: session.pending().cloned(),
        })
    }

    pub async fn submit_audio(&self, session: &mut Session, audio: Vec<u8>) -> Result<Reply, AssistantError> {
        if session.pending().is_some() {
            return Err(AssistantError::PendingExists);
        }

        match self.extractor.transcribe(audio).await {
            Some(text) => self.submit_text(session, &text).await,
            None => {
                session.push(Role::Assistant, COULD_NOT_TRANSCRIBE);
                Ok(Reply {
                    message: COULD_NOT_TRANSCRIBE.to_string(),
                    pending: None,
                })
            }
        }
    }

    /// Persists the pending expense with the resolved payer and shares. A
    /// storage failure keeps it pending so the caller can retry.
    pub async fn confirm_pending(
        &self,
        session: &mut Session,
        details: PaymentDetails,
    ) -> Result<Outcome, AssistantError> {
        let pending = session
            .pending()
            .cloned()
            .ok_or(AssistantError::NothingPending)?;

        let participants = self.participants(session.owner()).await?;
        let payment = participants.resolve_payment(&details)?;

        let mut expense = NewExpense::new(pending.description, pending.amount, pending.category)
            .paid_by(payment.payer);
        expense.split_person1 = payment.split_person1;
        expense.split_person2 = payment.split_person2;

        let outcome = self.write_expense(session, expense).await?;
        if outcome.success {
            session.take_pending();
        }
        session.push(Role::Assistant, outcome.message.clone());
        Ok(outcome)
    }

    pub fn discard_pending(&self, session: &mut Session) -> bool {
        let had_pending = session.take_pending().is_some();
        if had_pending {
            session.push(Role::Assistant, "Pending expense discarded.");
        }
        had_pending
    }

    /// Direct entry, bypassing extraction.
    pub async fn add_expense(&self, session: &mut Session, expense: NewExpense) -> Result<Outcome, AssistantError> {
        self.write_expense(session, expense).await
    }

    async fn write_expense(&self, session: &mut Session, expense: NewExpense) -> Result<Outcome, AssistantError> {
        let owner = session.owner().to_string();
        self.blocking(move |store| store.add_expense(&owner, &expense))
            .await
    }

    /// Memoized per session. The memo is reused only while no expense of the
    /// owner has been written since, from this session or any other.
    pub async fn monthly_expenses(&self, session: &mut Session, month: YearMonth) -> Result<MonthlyExpenses, AssistantError> {
        let generation = self.store.generation(session.owner());
        if let Some(cached) = session.cached_month(month, generation) {
            return Ok(cached.clone());
        }
        let owner = session.owner().to_string();
        let monthly = self
            .blocking(move |store| store.monthly_expenses(&owner, month))
            .await?;
        tracing::trace!(owner = session.owner(), %month, "Month loaded{}", monthly);
        session.cache_month(month, generation, monthly.clone());
        Ok(monthly)
    }

    pub async fn delete_expense(&self, session: &mut Session, id: ExpenseId) -> Result<bool, AssistantError> {
        let owner = session.owner().to_string();
        self.blocking(move |store| store.delete_expense(&owner, id))
            .await
    }

    pub async fn distinct_months(&self, session: &Session) -> Result<Vec<YearMonth>, AssistantError> {
        let owner = session.owner().to_string();
        self.blocking(move |store| store.distinct_months(&owner)).await
    }

    pub async fn budgets(&self, session: &Session) -> Result<BTreeMap<Category, Decimal>, AssistantError> {
        let owner = session.owner().to_string();
        let categories = self.categories.clone();
        self.blocking(move |store| store.load_category_budgets(&owner, &categories))
            .await
    }

    pub async fn save_budgets(
        &self,
        session: &mut Session,
        budgets: BTreeMap<Category, Decimal>,
    ) -> Result<bool, AssistantError> {
        let owner = session.owner().to_string();
        self.blocking(move |store| store.save_category_budgets(&owner, &budgets))
            .await
    }

    pub async fn participants(&self, owner: &str) -> Result<Participants, AssistantError> {
        let owner = owner.to_string();
        self.blocking(move |store| Participants::load(store, &owner)).await
    }

    pub async fn save_participants(
        &self,
        session: &mut Session,
        participants: Participants,
    ) -> Result<bool, AssistantError> {
        let owner = session.owner().to_string();
        self.blocking(move |store| participants.save(store, &owner))
            .await
    }

    pub async fn monthly_report(&self, session: &mut Session, month: YearMonth) -> Result<MonthlyReport, AssistantError> {
        let monthly = self.monthly_expenses(session, month).await?;
        let budgets = self.budgets(session).await?;
        let participants = self.participants(session.owner()).await?;

        let categories = self
            .categories
            .iter()
            .map(|category| {
                let spent = monthly
                    .expenses
                    .iter()
                    .filter(|e| e.category == *category)
                    .map(|e| e.amount)
                    .sum::<Decimal>();
                let budget = budgets.get(category).copied().unwrap_or(Decimal::ZERO);
                CategorySpending {
                    category: *category,
                    spent,
                    budget,
                    over_budget: budget > Decimal::ZERO && spent > budget,
                }
            })
            .collect();

        let contributions = match participants.mode {
            AppMode::Casal => Some(contributions(&monthly.expenses, &participants)),
            AppMode::Individual => None,
        };

        Ok(MonthlyReport {
            month,
            mode: participants.mode,
            total: monthly.total,
            expenses: monthly.expenses,
            categories,
            contributions,
        })
    }

    pub async fn advice(
        &self,
        session: &mut Session,
        month: YearMonth,
        monthly_budget: Decimal,
    ) -> Result<String, AssistantError> {
        let monthly = self.monthly_expenses(session, month).await?;
        if monthly.is_empty() {
            return Ok(format!("No expenses recorded for {} yet.", month));
        }
        let request = AdviceRequest {
            monthly_budget,
            monthly: &monthly,
        };
        Ok(self.extractor.advise(&request).await)
    }
}
