use anyhow::Context;
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, Transaction};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;

use crate::directory::{SchoolRecord, StudentRecord};
use crate::ledger::{FeeLedger, Installment, InstallmentStatus, Money};

pub fn open_db(path: &Path) -> anyhow::Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }
    let conn = Connection::open(path)
        .with_context(|| format!("failed to open database {}", path.to_string_lossy()))?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn open_in_memory() -> anyhow::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    init_schema(&conn)?;
    Ok(conn)
}

fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schools(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            address TEXT,
            phone TEXT,
            email TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            name TEXT NOT NULL,
            roll_number TEXT,
            class_name TEXT,
            phone TEXT,
            email TEXT,
            FOREIGN KEY(school_id) REFERENCES schools(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_school ON students(school_id)",
        [],
    )?;

    // Ledgers reference tenants by id only; the directory is not required to
    // know a school before fees are recorded against it.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS fee_ledgers(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            title TEXT,
            term TEXT,
            total_amount TEXT NOT NULL,
            number_of_installments INTEGER NOT NULL,
            extra TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_fee_ledgers_school_student ON fee_ledgers(school_id, student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS fee_installments(
            id TEXT PRIMARY KEY,
            ledger_id TEXT NOT NULL,
            idx INTEGER NOT NULL,
            amount TEXT NOT NULL,
            paid TEXT NOT NULL,
            pending TEXT NOT NULL,
            due_date TEXT NOT NULL,
            status TEXT NOT NULL,
            paid_date TEXT,
            receipt_number TEXT,
            payment_method TEXT,
            FOREIGN KEY(ledger_id) REFERENCES fee_ledgers(id),
            UNIQUE(ledger_id, idx)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_fee_installments_ledger ON fee_installments(ledger_id)",
        [],
    )?;
    // Receipt numbers are random; this index is what turns a collision into
    // a detectable write failure.
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_fee_installments_receipt ON fee_installments(receipt_number)",
        [],
    )?;

    ensure_fee_ledgers_extra(conn)?;
    ensure_fee_installments_payment_method(conn)?;

    Ok(())
}

fn ensure_fee_ledgers_extra(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "fee_ledgers", "extra")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE fee_ledgers ADD COLUMN extra TEXT NOT NULL DEFAULT '{}'",
        [],
    )?;
    Ok(())
}

fn ensure_fee_installments_payment_method(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "fee_installments", "payment_method")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE fee_installments ADD COLUMN payment_method TEXT", [])?;
    // Rows paid before the column existed get the default label.
    conn.execute(
        "UPDATE fee_installments SET payment_method = 'N/A' WHERE status = 'paid'",
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

fn money_from_row(row: &Row<'_>, idx: usize) -> rusqlite::Result<Money> {
    let raw: String = row.get(idx)?;
    Decimal::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn status_from_row(row: &Row<'_>, idx: usize) -> rusqlite::Result<InstallmentStatus> {
    let raw: String = row.get(idx)?;
    InstallmentStatus::parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unknown installment status {raw:?}").into(),
        )
    })
}

fn extra_from_row(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<serde_json::Map<String, serde_json::Value>> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Loads a ledger scoped to its tenant. A ledger owned by another school is
/// indistinguishable from a missing one.
pub fn load_ledger(
    conn: &Connection,
    ledger_id: &str,
    school_id: &str,
) -> anyhow::Result<Option<FeeLedger>> {
    let header = conn
        .query_row(
            "SELECT id, school_id, student_id, title, term, total_amount,
                    number_of_installments, extra, created_at, updated_at
             FROM fee_ledgers
             WHERE id = ? AND school_id = ?",
            [ledger_id, school_id],
            |r| {
                Ok(FeeLedger {
                    id: r.get(0)?,
                    school_id: r.get(1)?,
                    student_id: r.get(2)?,
                    title: r.get(3)?,
                    term: r.get(4)?,
                    total_amount: money_from_row(r, 5)?,
                    number_of_installments: r.get::<_, i64>(6)? as usize,
                    installments: Vec::new(),
                    extra: extra_from_row(r, 7)?,
                    created_at: r.get(8)?,
                    updated_at: r.get(9)?,
                })
            },
        )
        .optional()?;
    let Some(mut ledger) = header else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT id, amount, paid, pending, due_date, status, paid_date,
                receipt_number, payment_method
         FROM fee_installments
         WHERE ledger_id = ?
         ORDER BY idx",
    )?;
    ledger.installments = stmt
        .query_map([ledger_id], |r| {
            Ok(Installment {
                id: r.get(0)?,
                amount: money_from_row(r, 1)?,
                paid: money_from_row(r, 2)?,
                pending: money_from_row(r, 3)?,
                due_date: r.get(4)?,
                status: status_from_row(r, 5)?,
                paid_date: r.get(6)?,
                receipt_number: r.get(7)?,
                payment_method: r.get(8)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Some(ledger))
}

fn write_installments(tx: &Transaction<'_>, ledger: &FeeLedger) -> anyhow::Result<()> {
    let mut stmt = tx.prepare(
        "INSERT INTO fee_installments(
            id, ledger_id, idx, amount, paid, pending, due_date, status,
            paid_date, receipt_number, payment_method
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )?;
    for (i, inst) in ledger.installments.iter().enumerate() {
        stmt.execute(rusqlite::params![
            inst.id,
            ledger.id,
            i as i64,
            inst.amount.to_string(),
            inst.paid.to_string(),
            inst.pending.to_string(),
            inst.due_date,
            inst.status.as_str(),
            inst.paid_date,
            inst.receipt_number,
            inst.payment_method,
        ])?;
    }
    Ok(())
}

pub fn insert_ledger(conn: &Connection, ledger: &FeeLedger) -> anyhow::Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO fee_ledgers(
            id, school_id, student_id, title, term, total_amount,
            number_of_installments, extra, created_at, updated_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            ledger.id,
            ledger.school_id,
            ledger.student_id,
            ledger.title,
            ledger.term,
            ledger.total_amount.to_string(),
            ledger.installments.len() as i64,
            serde_json::to_string(&ledger.extra)?,
            ledger.created_at,
            ledger.updated_at,
        ],
    )?;
    write_installments(&tx, ledger)?;
    tx.commit()?;
    Ok(())
}

/// Replaces the stored ledger with `ledger` in one transaction. On any
/// error the transaction is dropped and the previous state stays intact.
pub fn save_ledger(conn: &Connection, ledger: &FeeLedger) -> anyhow::Result<()> {
    let tx = conn.unchecked_transaction()?;
    let updated = tx.execute(
        "UPDATE fee_ledgers
         SET title = ?, term = ?, total_amount = ?, number_of_installments = ?,
             extra = ?, updated_at = ?
         WHERE id = ? AND school_id = ?",
        rusqlite::params![
            ledger.title,
            ledger.term,
            ledger.total_amount.to_string(),
            ledger.installments.len() as i64,
            serde_json::to_string(&ledger.extra)?,
            ledger.updated_at,
            ledger.id,
            ledger.school_id,
        ],
    )?;
    if updated != 1 {
        anyhow::bail!("fee ledger {} vanished during update", ledger.id);
    }
    tx.execute(
        "DELETE FROM fee_installments WHERE ledger_id = ?",
        [&ledger.id],
    )?;
    write_installments(&tx, ledger)?;
    tx.commit()?;
    Ok(())
}

pub fn delete_ledger(conn: &Connection, ledger_id: &str, school_id: &str) -> anyhow::Result<bool> {
    let tx = conn.unchecked_transaction()?;
    let owned: Option<i64> = tx
        .query_row(
            "SELECT 1 FROM fee_ledgers WHERE id = ? AND school_id = ?",
            [ledger_id, school_id],
            |r| r.get(0),
        )
        .optional()?;
    if owned.is_none() {
        return Ok(false);
    }
    // Explicitly delete in dependency order (no ON DELETE CASCADE).
    tx.execute(
        "DELETE FROM fee_installments WHERE ledger_id = ?",
        [ledger_id],
    )?;
    tx.execute(
        "DELETE FROM fee_ledgers WHERE id = ? AND school_id = ?",
        [ledger_id, school_id],
    )?;
    tx.commit()?;
    Ok(true)
}

/// True when `err` is the unique-index failure raised by a duplicate
/// receipt number.
pub fn is_receipt_collision(err: &anyhow::Error) -> bool {
    match err.downcast_ref::<rusqlite::Error>() {
        Some(rusqlite::Error::SqliteFailure(e, msg)) => {
            e.code == ErrorCode::ConstraintViolation
                && msg
                    .as_deref()
                    .map(|m| m.contains("receipt_number"))
                    .unwrap_or(false)
        }
        _ => false,
    }
}

pub fn upsert_school(conn: &Connection, school: &SchoolRecord) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO schools(id, name, address, phone, email) VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           name = excluded.name,
           address = excluded.address,
           phone = excluded.phone,
           email = excluded.email",
        rusqlite::params![
            school.id,
            school.name,
            school.address,
            school.phone,
            school.email
        ],
    )?;
    Ok(())
}

pub fn upsert_student(conn: &Connection, student: &StudentRecord) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO students(id, school_id, name, roll_number, class_name, phone, email)
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           school_id = excluded.school_id,
           name = excluded.name,
           roll_number = excluded.roll_number,
           class_name = excluded.class_name,
           phone = excluded.phone,
           email = excluded.email",
        rusqlite::params![
            student.id,
            student.school_id,
            student.name,
            student.roll_number,
            student.class_name,
            student.phone,
            student.email
        ],
    )?;
    Ok(())
}

pub fn get_school(conn: &Connection, school_id: &str) -> anyhow::Result<Option<SchoolRecord>> {
    let school = conn
        .query_row(
            "SELECT id, name, address, phone, email FROM schools WHERE id = ?",
            [school_id],
            |r| {
                Ok(SchoolRecord {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    address: r.get(2)?,
                    phone: r.get(3)?,
                    email: r.get(4)?,
                })
            },
        )
        .optional()?;
    Ok(school)
}

pub fn get_student(conn: &Connection, student_id: &str) -> anyhow::Result<Option<StudentRecord>> {
    let student = conn
        .query_row(
            "SELECT id, school_id, name, roll_number, class_name, phone, email
             FROM students WHERE id = ?",
            [student_id],
            |r| {
                Ok(StudentRecord {
                    id: r.get(0)?,
                    school_id: r.get(1)?,
                    name: r.get(2)?,
                    roll_number: r.get(3)?,
                    class_name: r.get(4)?,
                    phone: r.get(5)?,
                    email: r.get(6)?,
                })
            },
        )
        .optional()?;
    Ok(student)
}
