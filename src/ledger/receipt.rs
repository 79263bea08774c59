use chrono::{DateTime, Utc};
use serde::Serialize;

use super::payment::invalid_selector;
use super::{FeeLedger, Installment, InstallmentRef, LedgerError, Money, Result};
use crate::directory::{Directory, SchoolRecord, StudentRecord};

const FALLBACK_TITLE: &str = "Fee Payment";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptFee {
    pub id: String,
    pub title: String,
    pub term: Option<String>,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_amount: Money,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptLine {
    pub index: usize,
    #[serde(flatten)]
    pub installment: Installment,
}

/// Read-only view of one installment with both parties identified.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Receipt {
    pub fee: ReceiptFee,
    pub installment: ReceiptLine,
    pub student: StudentRecord,
    pub school: SchoolRecord,
}

fn receipt_title(ledger: &FeeLedger) -> String {
    ledger
        .title
        .clone()
        .or_else(|| {
            ledger
                .extra
                .get("description")
                .and_then(|v| v.as_str())
                .filter(|s| !s.trim().is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| FALLBACK_TITLE.to_string())
}

pub fn assemble<D: Directory + ?Sized>(
    ledger: &FeeLedger,
    selector: &InstallmentRef,
    directory: &D,
) -> Result<Receipt> {
    let Some(pos) = ledger.resolve(selector) else {
        return Err(invalid_selector(selector));
    };

    let student = directory
        .student(&ledger.student_id)?
        .filter(|s| s.school_id == ledger.school_id)
        .ok_or_else(|| LedgerError::not_found("Student details not found."))?;
    let school = directory
        .school(&ledger.school_id)?
        .ok_or_else(|| LedgerError::not_found("School details not found."))?;

    Ok(Receipt {
        fee: ReceiptFee {
            id: ledger.id.clone(),
            title: receipt_title(ledger),
            term: ledger.term.clone(),
            total_amount: ledger.total_amount,
            created_at: ledger.created_at,
        },
        installment: ReceiptLine {
            index: pos,
            installment: ledger.installments[pos].clone(),
        },
        student,
        school,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::testutil::sample_ledger;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MemoryDirectory {
        schools: HashMap<String, SchoolRecord>,
        students: HashMap<String, StudentRecord>,
    }

    impl Directory for MemoryDirectory {
        fn school(&self, school_id: &str) -> anyhow::Result<Option<SchoolRecord>> {
            Ok(self.schools.get(school_id).cloned())
        }

        fn student(&self, student_id: &str) -> anyhow::Result<Option<StudentRecord>> {
            Ok(self.students.get(student_id).cloned())
        }
    }

    fn directory_for(ledger: &FeeLedger) -> MemoryDirectory {
        let mut dir = MemoryDirectory::default();
        dir.schools.insert(
            ledger.school_id.clone(),
            SchoolRecord {
                id: ledger.school_id.clone(),
                name: "Hillside Public School".to_string(),
                address: Some("12 Ridge Road".to_string()),
                phone: None,
                email: None,
            },
        );
        dir.students.insert(
            ledger.student_id.clone(),
            StudentRecord {
                id: ledger.student_id.clone(),
                school_id: ledger.school_id.clone(),
                name: "Asha Rao".to_string(),
                roll_number: Some("7".to_string()),
                class_name: Some("5B".to_string()),
                phone: None,
                email: None,
            },
        );
        dir
    }

    #[test]
    fn assembles_both_parties_and_the_installment() {
        let ledger = sample_ledger();
        let dir = directory_for(&ledger);
        let receipt = assemble(&ledger, &InstallmentRef::Position(1), &dir).expect("receipt");

        assert_eq!(receipt.fee.title, "Term 1 tuition");
        assert_eq!(receipt.installment.index, 1);
        assert_eq!(receipt.installment.installment, ledger.installments[1]);
        assert_eq!(receipt.student.name, "Asha Rao");
        assert_eq!(receipt.school.name, "Hillside Public School");

        let json = serde_json::to_value(&receipt).expect("serialize");
        assert_eq!(json["installment"]["index"], 1);
        assert_eq!(json["installment"]["amount"], 500.0);
        assert_eq!(json["student"]["class"], "5B");
    }

    #[test]
    fn title_falls_back_to_description_then_default() {
        let mut ledger = sample_ledger();
        ledger.title = None;
        let dir = directory_for(&ledger);
        let receipt = assemble(&ledger, &InstallmentRef::Position(0), &dir).expect("receipt");
        assert_eq!(receipt.fee.title, "Fee Payment");

        ledger
            .extra
            .insert("description".to_string(), serde_json::json!("Bus fee"));
        let receipt = assemble(&ledger, &InstallmentRef::Position(0), &dir).expect("receipt");
        assert_eq!(receipt.fee.title, "Bus fee");
    }

    #[test]
    fn missing_party_is_not_found() {
        let ledger = sample_ledger();
        let mut dir = directory_for(&ledger);
        dir.schools.clear();
        assert!(matches!(
            assemble(&ledger, &InstallmentRef::Position(0), &dir),
            Err(LedgerError::NotFound(_))
        ));

        let mut dir = directory_for(&ledger);
        if let Some(s) = dir.students.get_mut(&ledger.student_id) {
            s.school_id = "someotherschool000000000".to_string();
        }
        assert!(matches!(
            assemble(&ledger, &InstallmentRef::Position(0), &dir),
            Err(LedgerError::NotFound(_))
        ));
    }

    #[test]
    fn bad_selector_is_invalid_argument() {
        let ledger = sample_ledger();
        let dir = directory_for(&ledger);
        assert!(matches!(
            assemble(&ledger, &InstallmentRef::Position(2), &dir),
            Err(LedgerError::InvalidArgument(_))
        ));
    }
}
