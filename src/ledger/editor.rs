use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

use super::builder::{validate_lines, InstallmentInput, ValidLine};
use super::{
    amount_out_of_range, checked_sum, round_money, within_amount_limit, FeeLedger, Installment,
    LedgerError, Money, Result,
};
use crate::ids::new_object_id;

/// What a total-only edit does to installments that are already paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RescalePolicy {
    /// Paid installments keep `amount == paid`; the outstanding installments
    /// absorb the whole change in proportion to their current amounts.
    #[default]
    FreezePaid,
    /// Every amount is multiplied by `newTotal / currentTotal`. Paid
    /// installments keep their collected amount, so for them
    /// `paid + pending` no longer equals `amount`.
    ScaleAll,
}

impl FromStr for RescalePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "freeze_paid" => Ok(RescalePolicy::FreezePaid),
            "scale_all" => Ok(RescalePolicy::ScaleAll),
            other => Err(format!(
                "unknown rescale policy {other:?} (expected freeze_paid or scale_all)"
            )),
        }
    }
}

impl fmt::Display for RescalePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RescalePolicy::FreezePaid => "freeze_paid",
            RescalePolicy::ScaleAll => "scale_all",
        })
    }
}

/// Body of a ledger edit request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEdit {
    #[serde(default)]
    pub school_id: Option<String>,
    #[serde(default)]
    pub installments: Option<Vec<InstallmentInput>>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub total_amount: Option<Money>,
}

#[derive(Debug, Clone, Copy)]
pub struct EditRules {
    pub policy: RescalePolicy,
    pub scale: u32,
}

/// Computes the edited ledger without touching `ledger`. The result has
/// passed the at-rest consistency check; any error means nothing changes.
pub fn apply_edit(
    ledger: &FeeLedger,
    edit: &LedgerEdit,
    rules: EditRules,
    now: DateTime<Utc>,
) -> Result<FeeLedger> {
    let mut next = ledger.clone();
    let lines = edit.installments.as_deref().filter(|l| !l.is_empty());
    match (lines, edit.total_amount) {
        (Some(lines), declared) => replace_schedule(&mut next, lines, declared, rules)?,
        (None, Some(total)) => rescale_total(&mut next, total, rules)?,
        (None, None) => {
            return Err(LedgerError::validation(
                "Nothing to update: supply installments or totalAmount.",
            ))
        }
    }
    next.check_consistency()?;
    next.updated_at = now;
    Ok(next)
}

fn replace_schedule(
    ledger: &mut FeeLedger,
    lines: &[InstallmentInput],
    declared_total: Option<Money>,
    rules: EditRules,
) -> Result<()> {
    let valid = validate_lines(lines, rules.scale)?;
    let previous = std::mem::take(&mut ledger.installments);
    let sources = map_previous(&previous, lines, &valid)?;

    let installments = valid
        .into_iter()
        .zip(sources)
        .enumerate()
        .map(|(index, (line, source))| carry_over(index, line, source, rules.policy))
        .collect::<Result<Vec<_>>>()?;

    let sum = checked_sum(installments.iter().map(|i| &i.amount))?;
    if let Some(total) = declared_total {
        if round_money(total, rules.scale) != sum {
            return Err(LedgerError::Consistency(format!(
                "Total amount does not match sum of installment amounts ({} declared, {} scheduled).",
                total, sum
            )));
        }
    }

    ledger.number_of_installments = installments.len();
    ledger.installments = installments;
    ledger.total_amount = sum;
    Ok(())
}

/// Pairs each new schedule line with the installment whose payment history
/// it inherits. Lines carrying an `id` map by id; without any ids the
/// mapping is positional. Either way a paid installment may not vanish.
/// A positional edit may not move a paid installment's due date either, since
/// that is indistinguishable from shuffling lines around it.
fn map_previous<'a>(
    previous: &'a [Installment],
    lines: &[InstallmentInput],
    valid: &[ValidLine],
) -> Result<Vec<Option<&'a Installment>>> {
    if !lines.iter().any(|l| l.id.is_some()) {
        if let Some(dropped) = previous.iter().skip(lines.len()).find(|p| p.is_paid()) {
            return Err(LedgerError::Validation(format!(
                "Removing installment {} would discard a recorded payment; address installments by id to restructure the schedule.",
                dropped.id
            )));
        }
        if let Some((index, moved)) = previous
            .iter()
            .zip(valid)
            .enumerate()
            .find(|(_, (p, v))| p.is_paid() && p.due_date != v.due_date)
            .map(|(index, (p, _))| (index, p))
        {
            return Err(LedgerError::Validation(format!(
                "Installment {} at index {index} has been paid and its due date cannot change by position; address installments by id to restructure the schedule.",
                moved.id
            )));
        }
        return Ok((0..lines.len()).map(|i| previous.get(i)).collect());
    }

    let mut seen: HashSet<&str> = HashSet::new();
    let mut mapped = Vec::with_capacity(lines.len());
    for (index, line) in lines.iter().enumerate() {
        let Some(id) = line.id.as_deref() else {
            mapped.push(None);
            continue;
        };
        if !seen.insert(id) {
            return Err(LedgerError::Validation(format!(
                "Duplicate installment id {id} at index {index}."
            )));
        }
        let old = previous.iter().find(|p| p.id == id).ok_or_else(|| {
            LedgerError::Validation(format!("Unknown installment id {id} at index {index}."))
        })?;
        mapped.push(Some(old));
    }
    if let Some(dropped) = previous
        .iter()
        .find(|p| p.is_paid() && !seen.contains(p.id.as_str()))
    {
        return Err(LedgerError::Validation(format!(
            "Installment {} has been paid and cannot be removed from the schedule.",
            dropped.id
        )));
    }
    Ok(mapped)
}

fn carry_over(
    index: usize,
    line: ValidLine,
    source: Option<&Installment>,
    policy: RescalePolicy,
) -> Result<Installment> {
    let Some(old) = source else {
        return Ok(Installment::scheduled(
            new_object_id(),
            line.amount,
            line.due_date,
        ));
    };
    if old.is_paid() {
        if line.amount < old.paid {
            return Err(LedgerError::Validation(format!(
                "Installment at index {index} cannot be set to {} below the {} already collected.",
                line.amount, old.paid
            )));
        }
        if policy == RescalePolicy::FreezePaid && line.amount != old.amount {
            return Err(LedgerError::Validation(format!(
                "Installment at index {index} is paid; its amount is fixed at {}.",
                old.amount
            )));
        }
        // Stays paid, so the difference cannot be collected through a payment.
        if line.amount > old.paid {
            warn!(
                installment_id = %old.id,
                index,
                amount = %line.amount,
                paid = %old.paid,
                "paid installment raised above the amount collected; the balance stays pending on a paid installment"
            );
        }
    }
    Ok(Installment {
        amount: line.amount,
        pending: line.amount - old.paid,
        due_date: line.due_date,
        ..old.clone()
    })
}

fn rescale_total(ledger: &mut FeeLedger, new_total: Money, rules: EditRules) -> Result<()> {
    let new_total = round_money(new_total, rules.scale);
    if new_total <= Decimal::ZERO {
        return Err(LedgerError::validation("totalAmount must be positive."));
    }
    if !within_amount_limit(new_total) {
        return Err(amount_out_of_range());
    }
    if ledger.installment_sum()?.is_zero() {
        return Err(LedgerError::InvalidState(
            "Cannot update total amount with no installments.".to_string(),
        ));
    }

    let (targets, target_total): (Vec<usize>, Money) = match rules.policy {
        RescalePolicy::ScaleAll => ((0..ledger.installments.len()).collect(), new_total),
        RescalePolicy::FreezePaid => {
            let outstanding: Vec<usize> = ledger
                .installments
                .iter()
                .enumerate()
                .filter(|(_, i)| !i.is_paid())
                .map(|(p, _)| p)
                .collect();
            if outstanding.is_empty() {
                return Err(LedgerError::InvalidState(
                    "Every installment is paid; there is nothing outstanding to rescale."
                        .to_string(),
                ));
            }
            let collected = checked_sum(
                ledger
                    .installments
                    .iter()
                    .filter(|i| i.is_paid())
                    .map(|i| &i.amount),
            )?;
            if new_total <= collected {
                return Err(LedgerError::Validation(format!(
                    "totalAmount {new_total} must exceed the {collected} already collected."
                )));
            }
            (outstanding, new_total - collected)
        }
    };

    let weights: Vec<Money> = targets.iter().map(|p| ledger.installments[*p].amount).collect();
    let amounts = distribute(&weights, target_total, rules.scale)?;
    for (pos, amount) in targets.into_iter().zip(amounts) {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::Validation(format!(
                "Rescaling to {new_total} would reduce the installment at index {pos} to zero."
            )));
        }
        let inst = &mut ledger.installments[pos];
        if inst.is_paid() && amount != inst.amount {
            warn!(
                installment_id = %inst.id,
                index = pos,
                amount = %amount,
                paid = %inst.paid,
                "rescaling a paid installment; its collected amount no longer matches"
            );
        }
        inst.amount = amount;
        // Outstanding installments owe their whole new amount; settled ones stay at zero.
        if inst.pending > Decimal::ZERO {
            inst.pending = amount - inst.paid;
        }
    }
    ledger.total_amount = new_total;
    Ok(())
}

/// Splits `target` across `weights` proportionally, rounded to `scale`. The
/// last share absorbs the rounding remainder so the shares sum to `target`.
pub fn distribute(weights: &[Money], target: Money, scale: u32) -> Result<Vec<Money>> {
    let base = checked_sum(weights)?;
    if base.is_zero() {
        return Err(LedgerError::InvalidState(
            "Cannot rescale installments whose amounts sum to zero.".to_string(),
        ));
    }
    let mut shares = Vec::with_capacity(weights.len());
    let mut assigned = Decimal::ZERO;
    for (i, w) in weights.iter().enumerate() {
        let share = if i + 1 == weights.len() {
            target.checked_sub(assigned).ok_or_else(amount_out_of_range)?
        } else {
            let raw = w
                .checked_mul(target)
                .and_then(|v| v.checked_div(base))
                .ok_or_else(amount_out_of_range)?;
            round_money(raw, scale)
        };
        assigned = assigned.checked_add(share).ok_or_else(amount_out_of_range)?;
        shares.push(share);
    }
    Ok(shares)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::payment::{pay_one, Payment};
    use crate::ledger::testutil::{at, date, sample_ledger};
    use crate::ledger::{InstallmentRef, InstallmentStatus};
    use serde_json::json;

    const SCALE_ALL: EditRules = EditRules {
        policy: RescalePolicy::ScaleAll,
        scale: 2,
    };
    const FREEZE_PAID: EditRules = EditRules {
        policy: RescalePolicy::FreezePaid,
        scale: 2,
    };

    fn dec(v: i64) -> Money {
        Decimal::from(v)
    }

    fn paid_first() -> FeeLedger {
        let mut ledger = sample_ledger();
        pay_one(
            &mut ledger,
            &InstallmentRef::Position(0),
            Payment {
                receipt_number: "FEE-FIRST".to_string(),
                paid_at: at(2024, 1, 2),
                method: "cash".to_string(),
            },
        )
        .expect("pay first");
        ledger
    }

    fn edit(body: serde_json::Value) -> LedgerEdit {
        serde_json::from_value(body).expect("deserialize edit")
    }

    #[test]
    fn scale_all_reproduces_proportional_rescale() {
        let ledger = paid_first();
        let next = apply_edit(&ledger, &edit(json!({ "totalAmount": 1500 })), SCALE_ALL, at(2024, 1, 3))
            .expect("rescale");

        let first = &next.installments[0];
        assert_eq!(first.amount, dec(750));
        assert_eq!(first.paid, dec(500));
        assert_eq!(first.pending, Decimal::ZERO);
        assert_eq!(first.status, InstallmentStatus::Paid);
        assert_eq!(first.receipt_number.as_deref(), Some("FEE-FIRST"));

        let second = &next.installments[1];
        assert_eq!(second.amount, dec(750));
        assert_eq!(second.pending, dec(750));
        assert_eq!(next.total_amount, dec(1500));
        assert_eq!(next.updated_at, at(2024, 1, 3));
    }

    #[test]
    fn freeze_paid_moves_the_change_onto_outstanding_installments() {
        let ledger = paid_first();
        let next = apply_edit(&ledger, &edit(json!({ "totalAmount": 1500 })), FREEZE_PAID, at(2024, 1, 3))
            .expect("rescale");

        assert_eq!(next.installments[0].amount, dec(500));
        assert_eq!(next.installments[0].paid, dec(500));
        assert_eq!(next.installments[1].amount, dec(1000));
        assert_eq!(next.installments[1].pending, dec(1000));
        assert_eq!(next.total_amount, dec(1500));
    }

    #[test]
    fn freeze_paid_refuses_when_nothing_is_outstanding() {
        let mut ledger = paid_first();
        pay_one(
            &mut ledger,
            &InstallmentRef::Position(1),
            Payment {
                receipt_number: "FEE-SECOND".to_string(),
                paid_at: at(2024, 2, 2),
                method: "card".to_string(),
            },
        )
        .expect("pay second");
        let res = apply_edit(&ledger, &edit(json!({ "totalAmount": 1200 })), FREEZE_PAID, at(2024, 3, 1));
        assert!(matches!(res, Err(LedgerError::InvalidState(_))));

        let below = apply_edit(&paid_first(), &edit(json!({ "totalAmount": 400 })), FREEZE_PAID, at(2024, 3, 1));
        assert!(matches!(below, Err(LedgerError::Validation(_))));
    }

    #[test]
    fn rescale_remainder_lands_on_last_installment() {
        let mut ledger = sample_ledger();
        ledger.installments.push(Installment::scheduled(
            "aaaaaaaaaaaaaaaaaaaaaa03".to_string(),
            dec(500),
            date(2024, 3, 1),
        ));
        ledger.number_of_installments = 3;
        ledger.total_amount = dec(1500);

        let next = apply_edit(&ledger, &edit(json!({ "totalAmount": 1000 })), SCALE_ALL, at(2024, 1, 3))
            .expect("rescale");
        let amounts: Vec<Money> = next.installments.iter().map(|i| i.amount).collect();
        assert_eq!(
            amounts,
            vec![Decimal::new(33333, 2), Decimal::new(33333, 2), Decimal::new(33334, 2)]
        );
        assert_eq!(next.installment_sum().expect("sum"), dec(1000));
        for inst in &next.installments {
            assert_eq!(inst.pending, inst.amount);
        }
    }

    #[test]
    fn declared_total_must_match_new_schedule() {
        let ledger = sample_ledger();
        let res = apply_edit(
            &ledger,
            &edit(json!({
                "totalAmount": 1000,
                "installments": [
                    { "amount": 400, "dueDate": "2024-01-01" },
                    { "amount": 500, "dueDate": "2024-02-01" }
                ]
            })),
            FREEZE_PAID,
            at(2024, 1, 3),
        );
        assert!(matches!(res, Err(LedgerError::Consistency(_))));
        assert_eq!(ledger, sample_ledger());
    }

    #[test]
    fn positional_replacement_keeps_collected_money() {
        let ledger = paid_first();
        let next = apply_edit(
            &ledger,
            &edit(json!({
                "installments": [
                    { "amount": 500, "dueDate": "2024-01-01" },
                    { "amount": 600, "dueDate": "2024-02-15" },
                    { "amount": 100, "dueDate": "2024-03-15" }
                ]
            })),
            FREEZE_PAID,
            at(2024, 1, 3),
        )
        .expect("replace");

        assert_eq!(next.total_amount, dec(1200));
        assert_eq!(next.number_of_installments, 3);
        assert_eq!(next.installments[0].receipt_number.as_deref(), Some("FEE-FIRST"));
        assert_eq!(next.installments[0].id, ledger.installments[0].id);
        assert_eq!(next.installments[1].id, ledger.installments[1].id);
        assert_eq!(next.installments[1].pending, dec(600));
        assert_eq!(next.installments[1].due_date, date(2024, 2, 15));
        assert_eq!(next.installments[2].status, InstallmentStatus::Pending);
    }

    #[test]
    fn paid_amount_change_depends_on_policy() {
        let ledger = paid_first();
        let body = edit(json!({
            "installments": [
                { "amount": 600, "dueDate": "2024-01-01" },
                { "amount": 500, "dueDate": "2024-02-01" }
            ]
        }));
        assert!(matches!(
            apply_edit(&ledger, &body, FREEZE_PAID, at(2024, 1, 3)),
            Err(LedgerError::Validation(_))
        ));

        let next = apply_edit(&ledger, &body, SCALE_ALL, at(2024, 1, 3)).expect("scale_all edit");
        assert_eq!(next.installments[0].paid, dec(500));
        assert_eq!(next.installments[0].pending, dec(100));
        // The raise is recorded but the installment keeps its paid status and receipt.
        assert_eq!(next.installments[0].status, InstallmentStatus::Paid);
        assert_eq!(next.installments[0].receipt_number.as_deref(), Some("FEE-FIRST"));

        let below = edit(json!({
            "installments": [
                { "amount": 400, "dueDate": "2024-01-01" },
                { "amount": 500, "dueDate": "2024-02-01" }
            ]
        }));
        assert!(matches!(
            apply_edit(&ledger, &below, SCALE_ALL, at(2024, 1, 3)),
            Err(LedgerError::Validation(_))
        ));
    }

    #[test]
    fn id_mapping_follows_reordered_installments() {
        let ledger = paid_first();
        let first = ledger.installments[0].id.clone();
        let second = ledger.installments[1].id.clone();
        let next = apply_edit(
            &ledger,
            &edit(json!({
                "installments": [
                    { "id": second, "amount": 700, "dueDate": "2024-01-15" },
                    { "id": first, "amount": 500, "dueDate": "2024-01-01" },
                    { "amount": 50, "dueDate": "2024-04-01" }
                ]
            })),
            FREEZE_PAID,
            at(2024, 1, 3),
        )
        .expect("reorder");

        assert_eq!(next.installments[0].id, second);
        assert_eq!(next.installments[0].status, InstallmentStatus::Pending);
        assert_eq!(next.installments[0].pending, dec(700));
        assert_eq!(next.installments[1].id, first);
        assert_eq!(next.installments[1].receipt_number.as_deref(), Some("FEE-FIRST"));
        assert!(next.installments[2].id != first && next.installments[2].id != second);
        assert_eq!(next.total_amount, dec(1250));
    }

    #[test]
    fn edits_that_lose_payment_history_are_rejected() {
        let ledger = paid_first();
        let second = ledger.installments[1].id.clone();

        let by_id = edit(json!({
            "installments": [{ "id": second, "amount": 1000, "dueDate": "2024-02-01" }]
        }));
        assert!(matches!(
            apply_edit(&ledger, &by_id, FREEZE_PAID, at(2024, 1, 3)),
            Err(LedgerError::Validation(_))
        ));

        let mut paid_last = sample_ledger();
        pay_one(
            &mut paid_last,
            &InstallmentRef::Position(1),
            Payment {
                receipt_number: "FEE-LAST".to_string(),
                paid_at: at(2024, 2, 1),
                method: "cash".to_string(),
            },
        )
        .expect("pay last");
        let truncated = edit(json!({
            "installments": [{ "amount": 1000, "dueDate": "2024-01-01" }]
        }));
        assert!(matches!(
            apply_edit(&paid_last, &truncated, FREEZE_PAID, at(2024, 2, 3)),
            Err(LedgerError::Validation(_))
        ));

        let unknown = edit(json!({
            "installments": [{ "id": "ffffffffffffffffffffffff", "amount": 1, "dueDate": "2024-01-01" }]
        }));
        assert!(apply_edit(&ledger, &unknown, SCALE_ALL, at(2024, 1, 3)).is_err());
    }

    #[test]
    fn positional_edit_cannot_move_a_paid_due_date() {
        let ledger = paid_first();
        // Same amounts, lines swapped: position 0 is paid and would inherit February.
        let swapped = edit(json!({
            "installments": [
                { "amount": 500, "dueDate": "2024-02-01" },
                { "amount": 500, "dueDate": "2024-01-01" }
            ]
        }));
        let err = apply_edit(&ledger, &swapped, SCALE_ALL, at(2024, 1, 3)).expect_err("ambiguous");
        assert!(matches!(err, LedgerError::Validation(_)));
        assert!(err.to_string().contains("by id"), "{err}");

        // The same reorder expressed with ids goes through.
        let first = ledger.installments[0].id.clone();
        let second = ledger.installments[1].id.clone();
        let by_id = edit(json!({
            "installments": [
                { "id": second, "amount": 500, "dueDate": "2024-02-01" },
                { "id": first, "amount": 500, "dueDate": "2024-01-01" }
            ]
        }));
        let next = apply_edit(&ledger, &by_id, FREEZE_PAID, at(2024, 1, 3)).expect("reorder");
        assert_eq!(next.installments[1].receipt_number.as_deref(), Some("FEE-FIRST"));
    }

    #[test]
    fn oversized_totals_fail_cleanly() {
        let ledger = sample_ledger();
        let huge = edit(json!({ "totalAmount": 5e28 }));
        assert!(matches!(
            apply_edit(&ledger, &huge, SCALE_ALL, at(2024, 1, 3)),
            Err(LedgerError::Validation(_))
        ));

        let lines = edit(json!({
            "installments": [
                { "amount": 5e28, "dueDate": "2024-01-01" },
                { "amount": 5e28, "dueDate": "2024-02-01" }
            ]
        }));
        assert!(matches!(
            apply_edit(&ledger, &lines, SCALE_ALL, at(2024, 1, 3)),
            Err(LedgerError::Validation(_))
        ));

        let weights = [Decimal::MAX, Decimal::ONE];
        assert!(matches!(
            distribute(&weights, dec(10), 2),
            Err(LedgerError::Validation(_))
        ));
    }

    #[test]
    fn empty_edit_is_rejected() {
        let ledger = sample_ledger();
        let res = apply_edit(&ledger, &edit(json!({ "installments": [] })), FREEZE_PAID, at(2024, 1, 3));
        assert!(matches!(res, Err(LedgerError::Validation(_))));
    }

    #[test]
    fn policy_parses_from_config_spellings() {
        assert_eq!("scale-all".parse::<RescalePolicy>(), Ok(RescalePolicy::ScaleAll));
        assert_eq!(" FREEZE_PAID ".parse::<RescalePolicy>(), Ok(RescalePolicy::FreezePaid));
        assert!("proportional".parse::<RescalePolicy>().is_err());
        assert_eq!(RescalePolicy::default().to_string(), "freeze_paid");
    }
}
