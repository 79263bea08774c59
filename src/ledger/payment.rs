use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use super::{FeeLedger, Installment, InstallmentRef, InstallmentStatus, LedgerError, Result};

/// Everything recorded about one collected installment.
#[derive(Debug, Clone, PartialEq)]
pub struct Payment {
    pub receipt_number: String,
    pub paid_at: DateTime<Utc>,
    pub method: String,
}

/// `FEE-` followed by the 32 hex digits of a random v4 UUID.
pub fn new_receipt_number() -> String {
    format!(
        "FEE-{}",
        Uuid::new_v4().simple().to_string().to_ascii_uppercase()
    )
}

/// The pending -> paid transition. Paying an installment twice is refused so
/// a retried request can never issue a second receipt.
pub fn pay(installment: &Installment, payment: Payment) -> Result<Installment> {
    if installment.is_paid() {
        return Err(LedgerError::AlreadyPaid(installment.id.clone()));
    }
    Ok(Installment {
        paid: installment.amount,
        pending: Decimal::ZERO,
        status: InstallmentStatus::Paid,
        paid_date: Some(payment.paid_at),
        receipt_number: Some(payment.receipt_number),
        payment_method: Some(payment.method),
        ..installment.clone()
    })
}

/// Pays the single installment `selector` addresses and returns its position.
pub fn pay_one(
    ledger: &mut FeeLedger,
    selector: &InstallmentRef,
    payment: Payment,
) -> Result<usize> {
    let Some(pos) = ledger.resolve(selector) else {
        return Err(invalid_selector(selector));
    };
    let paid = pay(&ledger.installments[pos], payment)
        .map_err(|_| LedgerError::AlreadyPaid(selector.to_string()))?;
    ledger.installments[pos] = paid;
    ledger.updated_at = ledger.installments[pos].paid_date.unwrap_or(ledger.updated_at);
    Ok(pos)
}

pub fn invalid_selector(selector: &InstallmentRef) -> LedgerError {
    match selector {
        InstallmentRef::Position(_) => {
            LedgerError::InvalidArgument("Invalid installment index.".to_string())
        }
        InstallmentRef::Id(id) => {
            LedgerError::InvalidArgument(format!("Unknown installment id: {id}"))
        }
    }
}

/// What a batch payment actually did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    pub applied_count: usize,
    /// Positions transitioned to paid, in request order.
    pub applied: Vec<usize>,
    /// Positions that were already paid (or repeated within the batch).
    pub already_paid: Vec<usize>,
    /// Selectors that did not address any installment.
    pub skipped: Vec<String>,
}

/// Best-effort batch payment. Unresolvable selectors are skipped and logged;
/// the ledger is only changed when at least one installment was paid, and
/// then all at once.
pub fn pay_many<F>(
    ledger: &mut FeeLedger,
    selectors: &[InstallmentRef],
    mut next_payment: F,
) -> Result<BatchOutcome>
where
    F: FnMut() -> Payment,
{
    if selectors.is_empty() {
        return Err(LedgerError::validation(
            "A non-empty array of installment indices is required.",
        ));
    }

    let mut working = ledger.clone();
    let mut outcome = BatchOutcome::default();
    for selector in selectors {
        let Some(pos) = working.resolve(selector) else {
            warn!(ledger_id = %ledger.id, selector = %selector, "skipping invalid installment selector");
            outcome.skipped.push(selector.to_string());
            continue;
        };
        if working.installments[pos].is_paid() {
            outcome.already_paid.push(pos);
            continue;
        }
        working.installments[pos] = pay(&working.installments[pos], next_payment())?;
        outcome.applied.push(pos);
    }
    outcome.applied_count = outcome.applied.len();

    if outcome.applied_count == 0 {
        let message = if outcome.skipped.is_empty() {
            "All selected installments were already paid.".to_string()
        } else {
            format!(
                "No installment was paid: {} already paid, {} invalid selector(s) skipped.",
                outcome.already_paid.len(),
                outcome.skipped.len()
            )
        };
        return Err(LedgerError::NoOp(message));
    }

    if let Some(stamp) = outcome
        .applied
        .iter()
        .filter_map(|p| working.installments[*p].paid_date)
        .max()
    {
        working.updated_at = stamp;
    }
    *ledger = working;
    Ok(outcome)
}
