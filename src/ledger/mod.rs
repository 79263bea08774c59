//! Fee installment ledger: data model plus the pure operations over it.
//!
//! Nothing in here touches storage. The service layer loads a ledger, runs
//! one of these functions on it and persists the result in one transaction.

pub mod builder;
pub mod editor;
pub mod error;
pub mod payment;
pub mod receipt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ids::OBJECT_ID_LEN;

pub use error::{LedgerError, Result};

pub type Money = Decimal;

/// Sentinel recorded when a payment arrives without a method label.
pub const DEFAULT_PAYMENT_METHOD: &str = "N/A";

/// Ceiling for any single installment amount or ledger total.
pub const MAX_AMOUNT_UNITS: i64 = 1_000_000_000_000_000;

/// Rounds to `scale` decimal places, half away from zero.
pub fn round_money(value: Money, scale: u32) -> Money {
    value.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero)
}

pub fn within_amount_limit(value: Money) -> bool {
    value <= Decimal::from(MAX_AMOUNT_UNITS)
}

pub fn amount_out_of_range() -> LedgerError {
    LedgerError::validation("Amount is out of range.")
}

/// Sums amounts, failing with a validation error rather than overflowing.
pub fn checked_sum<'a, I>(amounts: I) -> Result<Money>
where
    I: IntoIterator<Item = &'a Money>,
{
    amounts
        .into_iter()
        .try_fold(Decimal::ZERO, |acc, a| acc.checked_add(*a))
        .ok_or_else(amount_out_of_range)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallmentStatus {
    Pending,
    Paid,
}

impl InstallmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InstallmentStatus::Pending => "pending",
            InstallmentStatus::Paid => "paid",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(InstallmentStatus::Pending),
            "paid" => Some(InstallmentStatus::Paid),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Installment {
    pub id: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Money,
    #[serde(with = "rust_decimal::serde::float")]
    pub paid: Money,
    #[serde(with = "rust_decimal::serde::float")]
    pub pending: Money,
    pub due_date: NaiveDate,
    pub status: InstallmentStatus,
    pub paid_date: Option<DateTime<Utc>>,
    pub receipt_number: Option<String>,
    pub payment_method: Option<String>,
}

impl Installment {
    /// A freshly scheduled, unpaid installment.
    pub fn scheduled(id: String, amount: Money, due_date: NaiveDate) -> Self {
        Installment {
            id,
            amount,
            paid: Decimal::ZERO,
            pending: amount,
            due_date,
            status: InstallmentStatus::Pending,
            paid_date: None,
            receipt_number: None,
            payment_method: None,
        }
    }

    pub fn is_paid(&self) -> bool {
        self.status == InstallmentStatus::Paid
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeLedger {
    pub id: String,
    pub school_id: String,
    pub student_id: String,
    pub title: Option<String>,
    pub term: Option<String>,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_amount: Money,
    pub number_of_installments: usize,
    pub installments: Vec<Installment>,
    /// Free-form descriptive fields supplied at creation, kept verbatim.
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FeeLedger {
    pub fn installment_sum(&self) -> Result<Money> {
        checked_sum(self.installments.iter().map(|i| &i.amount))
    }

    /// Position of the installment a selector addresses, if any.
    pub fn resolve(&self, selector: &InstallmentRef) -> Option<usize> {
        match selector {
            InstallmentRef::Position(p) => usize::try_from(*p)
                .ok()
                .filter(|p| *p < self.installments.len()),
            InstallmentRef::Id(id) => self.installments.iter().position(|i| &i.id == id),
        }
    }

    /// The at-rest invariants every successful write must satisfy.
    pub fn check_consistency(&self) -> Result<()> {
        if self.installments.is_empty() {
            return Err(LedgerError::Consistency(
                "a fee ledger must keep at least one installment".to_string(),
            ));
        }
        if self.number_of_installments != self.installments.len() {
            return Err(LedgerError::Consistency(format!(
                "numberOfInstallments is {} but the ledger holds {} installments",
                self.number_of_installments,
                self.installments.len()
            )));
        }
        if self.total_amount != self.installment_sum()? {
            return Err(LedgerError::Consistency(
                "Total amount does not match sum of installment amounts.".to_string(),
            ));
        }
        Ok(())
    }
}

/// How a caller addresses an installment: by position in the schedule or by
/// the stable id assigned when the installment was created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallmentRef {
    Position(i64),
    Id(String),
}

impl InstallmentRef {
    /// Short all-digit selectors are positions; anything else is an id.
    pub fn parse(raw: &str) -> Self {
        let t = raw.trim();
        if !t.is_empty() && t.len() < OBJECT_ID_LEN && t.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(p) = t.parse::<i64>() {
                return InstallmentRef::Position(p);
            }
        }
        InstallmentRef::Id(t.to_string())
    }
}

impl fmt::Display for InstallmentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallmentRef::Position(p) => write!(f, "{}", p),
            InstallmentRef::Id(id) => write!(f, "{}", id),
        }
    }
}
