//! School and student lookups the ledger consumes but does not own.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::db;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchoolRecord {
    pub id: String,
    pub name: String,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRecord {
    pub id: String,
    pub school_id: String,
    pub name: String,
    pub roll_number: Option<String>,
    #[serde(rename = "class")]
    pub class_name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

pub trait Directory {
    fn school(&self, school_id: &str) -> anyhow::Result<Option<SchoolRecord>>;
    fn student(&self, student_id: &str) -> anyhow::Result<Option<StudentRecord>>;
}

/// Directory backed by the `schools` / `students` tables of the ledger database.
pub struct SqliteDirectory<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteDirectory<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        SqliteDirectory { conn }
    }
}

impl Directory for SqliteDirectory<'_> {
    fn school(&self, school_id: &str) -> anyhow::Result<Option<SchoolRecord>> {
        db::get_school(self.conn, school_id)
    }

    fn student(&self, student_id: &str) -> anyhow::Result<Option<StudentRecord>> {
        db::get_student(self.conn, student_id)
    }
}
