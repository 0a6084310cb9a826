//! Turning free text (or speech) into a structured expense guess.
//!
//! The hosted model is asked for a JSON object with the keys `descricao`,
//! `valor` and `categoria`, or `{"not_expense": true}`. Whatever comes back
//! is parsed into [`Extraction`]; nothing downstream looks at raw JSON.

use std::str::FromStr;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use spendlog_core::{format_date, Category, MonthlyExpenses};

#[cfg(feature = "nl")]
pub mod openai;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedExpense {
    pub description: String,
    pub amount: Decimal,
    pub category: Category,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Extraction {
    Expense(ExtractedExpense),
    NotAnExpense,
    Failed { reason: String },
}

impl Extraction {
    pub fn failed(reason: impl Into<String>) -> Self {
        Extraction::Failed {
            reason: reason.into(),
        }
    }

    pub fn outcome_label(&self) -> &'static str {
        match self {
            Extraction::Expense(_) => "expense",
            Extraction::NotAnExpense => "not_expense",
            Extraction::Failed { .. } => "failed",
        }
    }
}

/// Input for a short budgeting advice request.
pub struct AdviceRequest<'a> {
    pub monthly_budget: Decimal,
    pub monthly: &'a MonthlyExpenses,
}

/// Hosted language-model collaborator. Calls never fail loudly: transport
/// and model errors come back as `Extraction::Failed`, `None`, or an apology.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, text: &str, categories: &[Category]) -> Extraction;
    async fn transcribe(&self, audio: Vec<u8>) -> Option<String>;
    async fn advise(&self, request: &AdviceRequest<'_>) -> String;
}

pub const ADVICE_UNAVAILABLE: &str = "Sorry, budgeting tips are not available right now.";

/// Stand-in used when no model is configured.
pub struct DisabledExtractor;

#[async_trait]
impl Extractor for DisabledExtractor {
    async fn extract(&self, _text: &str, _categories: &[Category]) -> Extraction {
        Extraction::failed("extraction service is not configured")
    }

    async fn transcribe(&self, _audio: Vec<u8>) -> Option<String> {
        None
    }

    async fn advise(&self, _request: &AdviceRequest<'_>) -> String {
        ADVICE_UNAVAILABLE.to_string()
    }
}

pub fn extraction_prompt(text: &str, categories: &[Category]) -> String {
    let category_list = categories
        .iter()
        .map(|c| c.label())
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        r#"You are a personal finance assistant. Read the user's text and identify an expense.
Extract the following fields:
1. "descricao": a short summary of what was bought.
2. "valor": the numeric amount spent.
3. "categoria": one of these categories: {categories}.

If the text does not describe an expense, answer with the JSON object {{"not_expense": true}}.
If it does, answer ONLY with a valid JSON object in this format:
{{
  "descricao": "example",
  "valor": 123.45,
  "categoria": "One of the valid categories"
}}

User text: "{text}""#,
        categories = category_list,
        text = text.replace('"', "'"),
    )
}

pub fn advice_prompt(request: &AdviceRequest<'_>) -> String {
    let mut lines = String::new();
    for e in &request.monthly.expenses {
        lines.push_str(&format!(
            "- {} | {} | {} | {}\n",
            format_date(e.date),
            e.description,
            e.category,
            e.amount
        ));
    }

    format!(
        "You are a financial advisor. A user has a monthly budget of {budget:.2} \
         and has already spent {total:.2} this month.\n\n\
         Here is a summary of their expenses:\n{lines}\n\
         Based on this, give 2-3 practical and friendly tips to manage spending better. Be concise.",
        budget = request.monthly_budget,
        total = request.monthly.total,
        lines = lines,
    )
}

/// Parses the model's message content. Unknown or missing categories fall
/// back to `Outros`; everything else that does not fit the contract fails.
pub fn parse_extraction(content: &str, categories: &[Category]) -> Extraction {
    let value: Value = match serde_json::from_str(content.trim()) {
        Ok(v) => v,
        Err(e) => return Extraction::failed(format!("malformed model output: {}", e)),
    };
    let obj = match value.as_object() {
        Some(o) => o,
        None => return Extraction::failed("model output is not a JSON object"),
    };

    if obj.get("not_expense").and_then(Value::as_bool) == Some(true) {
        return Extraction::NotAnExpense;
    }
    if let Some(err) = obj.get("error") {
        let reason = err.as_str().map(str::to_string).unwrap_or_else(|| err.to_string());
        return Extraction::failed(reason);
    }

    let description = match obj.get("descricao").and_then(Value::as_str).map(str::trim) {
        Some(d) if !d.is_empty() => d.to_string(),
        _ => return Extraction::failed("missing description"),
    };

    let amount = match obj.get("valor").and_then(parse_amount) {
        Some(a) if a > Decimal::ZERO => a,
        Some(a) => return Extraction::failed(format!("amount must be positive, got {}", a)),
        None => return Extraction::failed("missing or non-numeric amount"),
    };

    let category = obj
        .get("categoria")
        .and_then(Value::as_str)
        .and_then(Category::from_label)
        .filter(|c| categories.contains(c))
        .unwrap_or(Category::Other);

    Extraction::Expense(ExtractedExpense {
        description,
        amount,
        category,
    })
}

fn parse_amount(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => decimal(&n.to_string()),
        Value::String(s) => parse_amount_text(s),
        _ => None,
    }
}

/// Money as people type it: "R$ 1.234,56", "1,234.56", "12,90". When both
/// separators appear the last one is the decimal mark. A lone `.` before
/// exactly three digits is a thousands separator only after "R$"; otherwise
/// it is ambiguous and rejected.
fn parse_amount_text(raw: &str) -> Option<Decimal> {
    let raw = raw.trim();
    let (currency, s) = match raw.strip_prefix("R$") {
        Some(rest) => (true, rest.trim()),
        None => (false, raw),
    };

    let normalized = match (s.rfind('.'), s.rfind(',')) {
        (Some(dot), Some(comma)) => {
            let (group, mark) = if comma > dot { ('.', ',') } else { (',', '.') };
            let (int_part, frac) = s.rsplit_once(mark)?;
            if int_part.contains(mark) {
                return None;
            }
            format!("{}.{}", ungroup(int_part, group)?, frac)
        }
        (None, Some(_)) if s.matches(',').count() == 1 => s.replace(',', "."),
        (None, Some(_)) => ungroup(s, ',')?,
        (Some(_), None) if s.matches('.').count() > 1 => ungroup(s, '.')?,
        (Some(_), None) => {
            let (_, frac) = s.rsplit_once('.')?;
            match (frac.len(), currency) {
                (3, true) => ungroup(s, '.')?,
                (3, false) => return None,
                _ => s.to_string(),
            }
        }
        (None, None) => s.to_string(),
    };
    decimal(&normalized)
}

/// Joins digit groups split by `sep`; every group after the first must have
/// exactly three digits.
fn ungroup(s: &str, sep: char) -> Option<String> {
    let all_digits = |g: &str| !g.is_empty() && g.bytes().all(|b| b.is_ascii_digit());
    let mut groups = s.split(sep);
    let head = groups.next()?;
    if !all_digits(head) || head.len() > 3 {
        return None;
    }
    let mut joined = head.to_string();
    for group in groups {
        if group.len() != 3 || !all_digits(group) {
            return None;
        }
        joined.push_str(group);
    }
    Some(joined)
}

fn decimal(text: &str) -> Option<Decimal> {
    Decimal::from_str(text)
        .or_else(|_| Decimal::from_scientific(text))
        .ok()
}
