use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

use super::{
    checked_sum, round_money, within_amount_limit, FeeLedger, Installment, LedgerError, Money,
    Result,
};
use crate::ids::new_object_id;

/// One caller-supplied line of an installment schedule.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallmentInput {
    /// Only meaningful on edits: ties the line to an existing installment.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub amount: Option<Money>,
    #[serde(default)]
    pub due_date: Option<String>,
}

/// Body of a ledger creation request. Unknown top-level fields land in
/// `extra` and are stored verbatim.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLedger {
    #[serde(default)]
    pub school_id: Option<String>,
    #[serde(default)]
    pub student_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub term: Option<String>,
    #[serde(default)]
    pub installments: Option<Vec<InstallmentInput>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A schedule line that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidLine {
    pub amount: Money,
    pub due_date: NaiveDate,
}

/// Accepts `YYYY-MM-DD` or an RFC 3339 timestamp (its UTC calendar date).
pub fn parse_due_date(raw: &str) -> Option<NaiveDate> {
    let t = raw.trim();
    if let Ok(d) = NaiveDate::parse_from_str(t, "%Y-%m-%d") {
        return Some(d);
    }
    DateTime::parse_from_rfc3339(t)
        .ok()
        .map(|dt| dt.with_timezone(&Utc).date_naive())
}

/// Validates every line of a schedule, naming the first offending index.
pub fn validate_lines(lines: &[InstallmentInput], scale: u32) -> Result<Vec<ValidLine>> {
    lines
        .iter()
        .enumerate()
        .map(|(index, line)| {
            let bad_data = || {
                LedgerError::Validation(format!(
                    "Invalid installment data at index {index}: amount and dueDate are required and amount must be positive."
                ))
            };
            let amount = line
                .amount
                .map(|a| round_money(a, scale))
                .filter(|a| *a > Decimal::ZERO)
                .ok_or_else(bad_data)?;
            if !within_amount_limit(amount) {
                return Err(LedgerError::Validation(format!(
                    "Invalid installment data at index {index}: amount is out of range."
                )));
            }
            let raw_date = line
                .due_date
                .as_deref()
                .filter(|d| !d.trim().is_empty())
                .ok_or_else(bad_data)?;
            let due_date = parse_due_date(raw_date).ok_or_else(|| {
                LedgerError::Validation(format!(
                    "Invalid due date format for installment at index {index}."
                ))
            })?;
            Ok(ValidLine { amount, due_date })
        })
        .collect()
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Builds a new ledger from a creation request. Totals are derived from the
/// schedule; every installment starts pending with nothing collected.
pub fn build_ledger(input: NewLedger, scale: u32, now: DateTime<Utc>) -> Result<FeeLedger> {
    let school_id = non_empty(input.school_id.as_deref());
    let student_id = non_empty(input.student_id.as_deref());
    let lines = input.installments.as_deref().unwrap_or_default();
    let (Some(school_id), Some(student_id)) = (school_id, student_id) else {
        return Err(LedgerError::validation(
            "School ID, student ID, and a non-empty array of installments are required.",
        ));
    };
    if lines.is_empty() {
        return Err(LedgerError::validation(
            "School ID, student ID, and a non-empty array of installments are required.",
        ));
    }

    let installments: Vec<Installment> = validate_lines(lines, scale)?
        .into_iter()
        .map(|l| Installment::scheduled(new_object_id(), l.amount, l.due_date))
        .collect();
    let total_amount = checked_sum(installments.iter().map(|i| &i.amount))?;

    let ledger = FeeLedger {
        id: new_object_id(),
        school_id,
        student_id,
        title: non_empty(input.title.as_deref()),
        term: non_empty(input.term.as_deref()),
        total_amount,
        number_of_installments: installments.len(),
        installments,
        extra: input.extra,
        created_at: now,
        updated_at: now,
    };
    ledger.check_consistency()?;
    Ok(ledger)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::is_object_id;
    use crate::ledger::testutil::{at, date};
    use crate::ledger::InstallmentStatus;
    use serde_json::json;

    fn request(body: serde_json::Value) -> NewLedger {
        serde_json::from_value(body).expect("deserialize request")
    }

    #[test]
    fn builds_totals_and_pending_installments() {
        let input = request(json!({
            "schoolId": "cccccccccccccccccccccc01",
            "studentId": "dddddddddddddddddddddd01",
            "term": "2024-T1",
            "description": "Tuition",
            "installments": [
                { "amount": 500, "dueDate": "2024-01-01" },
                { "amount": 500, "dueDate": "2024-02-01" }
            ]
        }));
        let ledger = build_ledger(input, 2, at(2023, 12, 1)).expect("build");

        assert!(is_object_id(&ledger.id));
        assert_eq!(ledger.total_amount, Decimal::from(1000));
        assert_eq!(ledger.number_of_installments, 2);
        assert_eq!(ledger.term.as_deref(), Some("2024-T1"));
        assert_eq!(ledger.extra.get("description"), Some(&json!("Tuition")));
        for inst in &ledger.installments {
            assert_eq!(inst.paid, Decimal::ZERO);
            assert_eq!(inst.pending, inst.amount);
            assert_eq!(inst.status, InstallmentStatus::Pending);
            assert!(inst.paid_date.is_none());
            assert!(inst.receipt_number.is_none());
            assert!(inst.payment_method.is_none());
        }
        assert_eq!(ledger.installments[1].due_date, date(2024, 2, 1));
        assert_ne!(ledger.installments[0].id, ledger.installments[1].id);
    }

    #[test]
    fn rejects_missing_parties_or_empty_schedule() {
        let no_student = request(json!({
            "schoolId": "cccccccccccccccccccccc01",
            "installments": [{ "amount": 10, "dueDate": "2024-01-01" }]
        }));
        assert!(matches!(
            build_ledger(no_student, 2, at(2024, 1, 1)),
            Err(LedgerError::Validation(_))
        ));

        let empty = request(json!({
            "schoolId": "cccccccccccccccccccccc01",
            "studentId": "dddddddddddddddddddddd01",
            "installments": []
        }));
        assert!(matches!(
            build_ledger(empty, 2, at(2024, 1, 1)),
            Err(LedgerError::Validation(_))
        ));
    }

    #[test]
    fn names_the_offending_index() {
        let bad_amount = request(json!({
            "schoolId": "s", "studentId": "t",
            "installments": [
                { "amount": 100, "dueDate": "2024-01-01" },
                { "amount": 0, "dueDate": "2024-02-01" }
            ]
        }));
        let msg = build_ledger(bad_amount, 2, at(2024, 1, 1))
            .unwrap_err()
            .to_string();
        assert!(msg.contains("index 1"), "{msg}");

        let bad_date = request(json!({
            "schoolId": "s", "studentId": "t",
            "installments": [{ "amount": 100, "dueDate": "soon" }]
        }));
        let msg = build_ledger(bad_date, 2, at(2024, 1, 1))
            .unwrap_err()
            .to_string();
        assert!(msg.contains("due date format"), "{msg}");
        assert!(msg.contains("index 0"), "{msg}");
    }

    #[test]
    fn due_dates_accept_timestamps() {
        assert_eq!(
            parse_due_date("2024-03-15T23:30:00-02:00"),
            Some(date(2024, 3, 16))
        );
        assert_eq!(parse_due_date("2024-02-30"), None);
    }

    #[test]
    fn amounts_round_to_money_scale() {
        let input = request(json!({
            "schoolId": "s", "studentId": "t",
            "installments": [
                { "amount": 100.005, "dueDate": "2024-01-01" },
                { "amount": 0.001, "dueDate": "2024-02-01" }
            ]
        }));
        // 0.001 rounds to zero at two places and is rejected.
        assert!(build_ledger(input, 2, at(2024, 1, 1)).is_err());
    }

    #[test]
    fn oversized_amounts_are_rejected_not_summed() {
        let input = request(json!({
            "schoolId": "s", "studentId": "t",
            "installments": [
                { "amount": 5e28, "dueDate": "2024-01-01" },
                { "amount": 5e28, "dueDate": "2024-02-01" }
            ]
        }));
        let err = build_ledger(input, 2, at(2024, 1, 1)).expect_err("out of range");
        assert!(matches!(err, LedgerError::Validation(_)));
        assert!(err.to_string().contains("index 0"), "{err}");

        let at_limit = request(json!({
            "schoolId": "s", "studentId": "t",
            "installments": [
                { "amount": 1e15, "dueDate": "2024-01-01" },
                { "amount": 1e15, "dueDate": "2024-02-01" }
            ]
        }));
        let ledger = build_ledger(at_limit, 2, at(2024, 1, 1)).expect("build");
        assert_eq!(ledger.total_amount, Decimal::from(2_000_000_000_000_000i64));
    }
}
