// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Print history — SQLite log of every job that reached a terminal state.
//
// Schema:
//   print_history(
//     id            INTEGER PRIMARY KEY AUTOINCREMENT,
//     file_name     TEXT    NOT NULL,
//     file_path     TEXT    NOT NULL,
//     printer_name  TEXT    NOT NULL,
//     copies        INTEGER NOT NULL,
//     page_range    TEXT    NOT NULL,
//     page_count    INTEGER NOT NULL,
//     duplex        INTEGER NOT NULL,   -- 0 / 1
//     status        TEXT    NOT NULL,   -- JobStatus::as_str
//     error_message TEXT,
//     created_at    TEXT    NOT NULL,   -- RFC 3339 UTC, microseconds
//     completed_at  TEXT
//   )
//
// Timestamps always carry the same precision and the `Z` suffix, so
// comparing the text compares the instants.

use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{Connection, Row, params, params_from_iter};
use tracing::{debug, info, instrument};

use folio_core::error::{FolioError, Result};
use folio_core::types::{JobStatus, PrintHistoryRecord};

/// Rows per page when the caller does not choose.
pub const DEFAULT_PAGE_SIZE: u32 = 50;

const CREATE_SCHEMA_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS print_history (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        file_name     TEXT    NOT NULL,
        file_path     TEXT    NOT NULL,
        printer_name  TEXT    NOT NULL,
        copies        INTEGER NOT NULL,
        page_range    TEXT    NOT NULL,
        page_count    INTEGER NOT NULL,
        duplex        INTEGER NOT NULL,
        status        TEXT    NOT NULL,
        error_message TEXT,
        created_at    TEXT    NOT NULL,
        completed_at  TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_print_history_created_at
        ON print_history (created_at DESC);
    CREATE INDEX IF NOT EXISTS idx_print_history_status
        ON print_history (status);
"#;

const SELECT_COLUMNS: &str = "SELECT id, file_name, file_path, printer_name, copies, page_range, \
     page_count, duplex, status, error_message, created_at, completed_at FROM print_history";

fn db_err(context: &str) -> impl FnOnce(rusqlite::Error) -> FolioError + '_ {
    move |e| FolioError::Database(format!("{context}: {e}"))
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Criteria for `query` and `count`; empty fields do not filter.
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    /// Substring of the file name.
    pub search: Option<String>,
    pub status: Option<JobStatus>,
    /// Exact printer name.
    pub printer: Option<String>,
    /// Created at or after this instant.
    pub from: Option<DateTime<Utc>>,
    /// Created on or before this day (UTC).
    pub to: Option<NaiveDate>,
}

impl HistoryFilter {
    /// The `WHERE` clause and its positional values.
    fn to_sql(&self) -> (String, Vec<Value>) {
        let mut clauses = Vec::new();
        let mut values = Vec::new();

        if let Some(search) = self.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            clauses.push("file_name LIKE ? ESCAPE '\\'");
            values.push(Value::Text(format!("%{}%", escape_like(search))));
        }
        if let Some(status) = self.status {
            clauses.push("status = ?");
            values.push(Value::Text(status.as_str().to_string()));
        }
        if let Some(printer) = self.printer.as_deref().filter(|p| !p.is_empty()) {
            clauses.push("printer_name = ?");
            values.push(Value::Text(printer.to_string()));
        }
        if let Some(from) = &self.from {
            clauses.push("created_at >= ?");
            values.push(Value::Text(timestamp(from)));
        }
        if let Some(end) = self.to.and_then(|day| day.succ_opt()) {
            clauses.push("created_at < ?");
            values.push(Value::Text(timestamp(&end.and_time(NaiveTime::MIN).and_utc())));
        }

        let sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        (sql, values)
    }
}

fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Number of pages needed to show `total` rows.
pub fn page_total(total: u64, page_size: u32) -> u64 {
    let size = u64::from(page_size.max(1));
    total.div_ceil(size)
}

/// Print history backed by a SQLite database.
///
/// Calls are synchronous; from async code run them on the blocking pool.
pub struct PrintHistory {
    conn: Connection,
}

impl PrintHistory {
    /// Open (or create) the history database at `path` in WAL mode.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).map_err(db_err("open"))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(db_err("WAL pragma"))?;
        conn.execute_batch(CREATE_SCHEMA_SQL)
            .map_err(db_err("create schema"))?;

        info!("print history database opened");
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err("open in-memory"))?;
        conn.execute_batch(CREATE_SCHEMA_SQL)
            .map_err(db_err("create schema"))?;

        debug!("in-memory print history opened");
        Ok(Self { conn })
    }

    /// Store a record and return its row id.
    #[instrument(skip(self, record), fields(file = %record.file_name, status = %record.status))]
    pub fn record(&self, record: &PrintHistoryRecord) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO print_history (file_name, file_path, printer_name, copies,
                 page_range, page_count, duplex, status, error_message, created_at, completed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    record.file_name,
                    record.file_path,
                    record.printer_name,
                    record.copies,
                    record.page_range,
                    record.page_count,
                    record.duplex,
                    record.status.as_str(),
                    record.error_message,
                    timestamp(&record.created_at),
                    record.completed_at.as_ref().map(timestamp),
                ],
            )
            .map_err(db_err("insert record"))?;

        let id = self.conn.last_insert_rowid();
        debug!(id, "history record stored");
        Ok(id)
    }

    /// One page of matching records, newest first.  Pages start at 1.
    pub fn query(
        &self,
        filter: &HistoryFilter,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<PrintHistoryRecord>> {
        let (where_sql, mut values) = filter.to_sql();
        let page_size = page_size.max(1);
        let offset = u64::from(page.max(1) - 1) * u64::from(page_size);
        values.push(Value::Integer(i64::from(page_size)));
        values.push(Value::Integer(i64::try_from(offset).unwrap_or(i64::MAX)));

        let sql = format!(
            "{SELECT_COLUMNS}{where_sql} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?"
        );
        let mut stmt = self.conn.prepare(&sql).map_err(db_err("prepare query"))?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), record_from_row)
            .map_err(db_err("query"))?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row.map_err(db_err("read row"))?);
        }
        Ok(records)
    }

    pub fn get(&self, id: i64) -> Result<Option<PrintHistoryRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{SELECT_COLUMNS} WHERE id = ?1"))
            .map_err(db_err("prepare get"))?;
        let mut rows = stmt
            .query_map(params![id], record_from_row)
            .map_err(db_err("get"))?;
        rows.next().transpose().map_err(db_err("read row"))
    }

    pub fn count(&self, filter: &HistoryFilter) -> Result<u64> {
        let (where_sql, values) = filter.to_sql();
        let sql = format!("SELECT COUNT(*) FROM print_history{where_sql}");
        self.conn
            .query_row(&sql, params_from_iter(values.iter()), |row| row.get(0))
            .map_err(db_err("count"))
    }

    /// Delete records created before `cutoff`, returning how many went.
    #[instrument(skip(self))]
    pub fn clear_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let deleted = self
            .conn
            .execute(
                "DELETE FROM print_history WHERE created_at < ?1",
                params![timestamp(&cutoff)],
            )
            .map_err(db_err("clear"))?;
        info!(deleted, "old history records removed");
        Ok(deleted)
    }

    /// Every printer name that appears in the history, sorted.
    pub fn distinct_printers(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT printer_name FROM print_history ORDER BY printer_name")
            .map_err(db_err("prepare printers"))?;
        let rows = stmt
            .query_map([], |row| row.get(0))
            .map_err(db_err("printers"))?;

        let mut printers = Vec::new();
        for row in rows {
            printers.push(row.map_err(db_err("read row"))?);
        }
        Ok(printers)
    }
}

fn parse_time(idx: usize, text: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<PrintHistoryRecord> {
    let status: String = row.get(8)?;
    let status = status
        .parse::<JobStatus>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(8, Type::Text, Box::new(e)))?;
    let created_at: String = row.get(10)?;
    let completed_at: Option<String> = row.get(11)?;

    Ok(PrintHistoryRecord {
        id: row.get(0)?,
        file_name: row.get(1)?,
        file_path: row.get(2)?,
        printer_name: row.get(3)?,
        copies: row.get(4)?,
        page_range: row.get(5)?,
        page_count: row.get(6)?,
        duplex: row.get(7)?,
        status,
        error_message: row.get(9)?,
        created_at: parse_time(10, &created_at)?,
        completed_at: completed_at.as_deref().map(|t| parse_time(11, t)).transpose()?,
    })
}
