//! Ledger operations with persistence wrapped around the pure ledger code.
//! Every mutation is a load / compute / save cycle inside one transaction.

use chrono::Utc;
use rusqlite::Connection;
use tracing::{info, warn};

use crate::config::LedgerConfig;
use crate::db;
use crate::directory::{Directory, SqliteDirectory};
use crate::ids::is_object_id;
use crate::ledger::builder::{build_ledger, NewLedger};
use crate::ledger::editor::{apply_edit, EditRules, LedgerEdit};
use crate::ledger::payment::{self, new_receipt_number, BatchOutcome, Payment};
use crate::ledger::receipt::{self, Receipt};
use crate::ledger::{FeeLedger, InstallmentRef, LedgerError, Result};

const LEDGER_NOT_FOUND: &str = "Fee not found or does not belong to this school.";

/// Rejects an absent or blank tenant id the way every operation expects.
pub fn require_school_id(school_id: Option<&str>) -> Result<&str> {
    school_id
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| LedgerError::validation("School ID is required."))
}

pub struct FeeService<'a> {
    conn: &'a Connection,
    config: &'a LedgerConfig,
}

impl<'a> FeeService<'a> {
    pub fn new(conn: &'a Connection, config: &'a LedgerConfig) -> Self {
        FeeService { conn, config }
    }

    fn load(&self, ledger_id: &str, school_id: &str) -> Result<FeeLedger> {
        if !is_object_id(ledger_id) {
            return Err(LedgerError::not_found(LEDGER_NOT_FOUND));
        }
        db::load_ledger(self.conn, ledger_id, school_id)?
            .ok_or_else(|| LedgerError::not_found(LEDGER_NOT_FOUND))
    }

    fn payment_method(&self, requested: Option<&str>) -> String {
        requested
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| self.config.default_payment_method.clone())
    }

    pub fn create(&self, input: NewLedger) -> Result<FeeLedger> {
        let ledger = build_ledger(input, self.config.money_scale, Utc::now())?;
        if self.config.verify_parties_on_create {
            let directory = SqliteDirectory::new(self.conn);
            if directory.school(&ledger.school_id)?.is_none() {
                return Err(LedgerError::not_found("School not found."));
            }
            let student = directory.student(&ledger.student_id)?;
            if student.map(|s| s.school_id != ledger.school_id).unwrap_or(true) {
                return Err(LedgerError::not_found(
                    "Student not found or does not belong to this school.",
                ));
            }
        }
        db::insert_ledger(self.conn, &ledger)?;
        info!(
            ledger_id = %ledger.id,
            school_id = %ledger.school_id,
            student_id = %ledger.student_id,
            installments = ledger.number_of_installments,
            total = %ledger.total_amount,
            "fee ledger created"
        );
        Ok(ledger)
    }

    pub fn get(&self, ledger_id: &str, school_id: &str) -> Result<FeeLedger> {
        self.load(ledger_id, school_id)
    }

    pub fn delete(&self, ledger_id: &str, school_id: &str) -> Result<()> {
        if !is_object_id(ledger_id) || !db::delete_ledger(self.conn, ledger_id, school_id)? {
            return Err(LedgerError::not_found(LEDGER_NOT_FOUND));
        }
        info!(ledger_id, school_id, "fee ledger deleted");
        Ok(())
    }

    /// Runs `apply` on a fresh copy of the ledger and saves the result,
    /// starting over with new receipt numbers if the save hit a collision.
    fn record_payment<T, F>(
        &self,
        ledger_id: &str,
        school_id: &str,
        mut apply: F,
    ) -> Result<(FeeLedger, T)>
    where
        F: FnMut(&mut FeeLedger) -> Result<T>,
    {
        let stored = self.load(ledger_id, school_id)?;
        let mut attempt = 0;
        loop {
            let mut ledger = stored.clone();
            let outcome = apply(&mut ledger)?;
            match db::save_ledger(self.conn, &ledger) {
                Ok(()) => return Ok((ledger, outcome)),
                Err(e)
                    if db::is_receipt_collision(&e) && attempt < self.config.receipt_retry_limit =>
                {
                    attempt += 1;
                    warn!(ledger_id, attempt, "receipt number collision, retrying with fresh numbers");
                }
                Err(e) => return Err(LedgerError::Internal(e)),
            }
        }
    }

    pub fn pay_installment(
        &self,
        ledger_id: &str,
        school_id: &str,
        selector: &InstallmentRef,
        method: Option<&str>,
    ) -> Result<FeeLedger> {
        let method = self.payment_method(method);
        let (ledger, pos) = self.record_payment(ledger_id, school_id, |ledger| {
            let payment = Payment {
                receipt_number: new_receipt_number(),
                paid_at: Utc::now(),
                method: method.clone(),
            };
            payment::pay_one(ledger, selector, payment)
        })?;
        info!(
            ledger_id,
            school_id,
            index = pos,
            receipt = ledger.installments[pos].receipt_number.as_deref().unwrap_or_default(),
            method = %method,
            "installment paid"
        );
        Ok(ledger)
    }

    pub fn pay_multiple(
        &self,
        ledger_id: &str,
        school_id: &str,
        selectors: &[InstallmentRef],
        method: Option<&str>,
    ) -> Result<(FeeLedger, BatchOutcome)> {
        if selectors.is_empty() {
            return Err(LedgerError::validation(
                "School ID and a non-empty array of installment indices are required.",
            ));
        }
        let method = self.payment_method(method);
        let (ledger, outcome) = self.record_payment(ledger_id, school_id, |ledger| {
            let paid_at = Utc::now();
            payment::pay_many(ledger, selectors, || Payment {
                receipt_number: new_receipt_number(),
                paid_at,
                method: method.clone(),
            })
        })?;
        info!(
            ledger_id,
            school_id,
            applied = outcome.applied_count,
            already_paid = outcome.already_paid.len(),
            skipped = outcome.skipped.len(),
            "installments paid"
        );
        Ok((ledger, outcome))
    }

    pub fn update(
        &self,
        ledger_id: &str,
        school_id: &str,
        edit: &LedgerEdit,
    ) -> Result<FeeLedger> {
        let stored = self.load(ledger_id, school_id)?;
        let rules = EditRules {
            policy: self.config.rescale_policy,
            scale: self.config.money_scale,
        };
        let next = apply_edit(&stored, edit, rules, Utc::now())?;
        db::save_ledger(self.conn, &next)?;
        info!(
            ledger_id,
            school_id,
            installments = next.number_of_installments,
            total = %next.total_amount,
            policy = %rules.policy,
            "fee ledger updated"
        );
        Ok(next)
    }

    pub fn receipt(
        &self,
        ledger_id: &str,
        school_id: &str,
        selector: &InstallmentRef,
    ) -> Result<Receipt> {
        let ledger = self.load(ledger_id, school_id)?;
        receipt::assemble(&ledger, selector, &SqliteDirectory::new(self.conn))
    }
}
