use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use rusqlite::Connection;
use tracing::{info, warn};

use super::Storage;
use crate::config::DatabaseSettings;
use crate::error::ScrapeError;

static UNDERSCORES_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"_+").unwrap());

/// Always present as the surrogate key, so no data column may take it.
const RESERVED: &str = "id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Success => "SUCCESS",
            RunStatus::Failed => "FAILED",
        }
    }
}

/// Matches every character a column name may not contain. `alphabet` is a
/// regex class body of extra characters to keep, e.g. `\x{0600}-\x{06FF}`.
pub fn invalid_chars(alphabet: &str) -> Result<Regex, ScrapeError> {
    Regex::new(&format!("[^A-Za-z0-9_{}]", alphabet)).map_err(|source| ScrapeError::Pattern {
        field: "column_alphabet".into(),
        source,
    })
}

pub fn sanitize_column_name(name: &str, invalid: &Regex) -> String {
    let replaced = invalid.replace_all(name, "_");
    let collapsed = UNDERSCORES_RE.replace_all(&replaced, "_");
    let trimmed = collapsed.trim_matches('_');
    if trimmed.is_empty() {
        "col".to_string()
    } else if trimmed.starts_with(|c: char| c.is_ascii_digit()) {
        format!("col_{}", trimmed)
    } else {
        trimmed.to_string()
    }
}

/// Sanitize every name, then suffix `_2`, `_3`, ... onto later duplicates.
/// SQLite compares identifiers case-insensitively, so collisions do too.
pub fn unique_columns<S: AsRef<str>>(names: &[S], invalid: &Regex) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::from([RESERVED.to_string()]);
    names
        .iter()
        .map(|name| {
            let base = sanitize_column_name(name.as_ref(), invalid);
            let mut candidate = base.clone();
            let mut n = 2;
            while seen.contains(&candidate.to_lowercase()) {
                candidate = format!("{}_{}", base, n);
                n += 1;
            }
            seen.insert(candidate.to_lowercase());
            candidate
        })
        .collect()
}

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn metadata_ddl(meta: &str, if_not_exists: bool) -> String {
    format!(
        "CREATE TABLE {}{} (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            category     TEXT NOT NULL,
            start_time   TIMESTAMP NOT NULL,
            end_time     TIMESTAMP NOT NULL,
            record_count INTEGER NOT NULL,
            status       TEXT NOT NULL CHECK(status IN ('SUCCESS','FAILED'))
        )",
        if if_not_exists { "IF NOT EXISTS " } else { "" },
        quote(meta)
    )
}

/// Statements that rebuild both tables from scratch for `columns`
/// (already sanitized). Every save runs these; nothing is migrated.
pub fn schema_ddl(table: &str, meta: &str, columns: &[String]) -> Vec<String> {
    let mut defs = vec!["id INTEGER PRIMARY KEY AUTOINCREMENT".to_string()];
    defs.extend(columns.iter().map(|c| format!("{} TEXT", quote(c))));
    vec![
        format!("DROP TABLE IF EXISTS {}", quote(table)),
        format!("CREATE TABLE {} (\n    {}\n)", quote(table), defs.join(",\n    ")),
        format!("DROP TABLE IF EXISTS {}", quote(meta)),
        metadata_ddl(meta, false),
    ]
}

fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [name],
        |r| r.get(0),
    )?;
    Ok(n > 0)
}

pub struct SqliteSink {
    conn: Option<Connection>,
    table: String,
    metadata_table: String,
    invalid: Regex,
}

impl SqliteSink {
    pub fn open(settings: &DatabaseSettings) -> Result<Self> {
        let invalid = invalid_chars(&settings.column_alphabet)?;
        if let Some(parent) = Path::new(&settings.path).parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(&settings.path)
            .with_context(|| format!("Failed to open database {}", settings.path))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        Ok(SqliteSink {
            conn: Some(conn),
            table: settings.table_name.clone(),
            metadata_table: settings.metadata_table.clone(),
            invalid,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn write_batch(&self, conn: &Connection, columns: &[String], rows: &[Vec<String>]) -> Result<()> {
        let names = unique_columns(columns, &self.invalid);
        conn.execute_batch(&schema_ddl(&self.table, &self.metadata_table, &names).join(";\n"))?;
        for t in [&self.table, &self.metadata_table] {
            if !table_exists(conn, t)? {
                return Err(ScrapeError::Schema(format!("table {} missing after creation", t)).into());
            }
        }

        let sql = if names.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES", quote(&self.table))
        } else {
            let cols: Vec<String> = names.iter().map(|n| quote(n)).collect();
            let params: Vec<String> = (1..=names.len()).map(|i| format!("?{}", i)).collect();
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quote(&self.table),
                cols.join(", "),
                params.join(", ")
            )
        };

        let tx = conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(&sql)?;
            for (i, row) in rows.iter().enumerate() {
                if row.len() != names.len() {
                    bail!("row {} has {} cells, expected {}", i, row.len(), names.len());
                }
                stmt.execute(rusqlite::params_from_iter(row.iter()))?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn record_run(
        &self,
        conn: &Connection,
        category: &str,
        start: DateTime<Utc>,
        count: usize,
        status: RunStatus,
    ) -> Result<()> {
        conn.execute_batch(&metadata_ddl(&self.metadata_table, true))?;
        conn.execute(
            &format!(
                "INSERT INTO {} (category, start_time, end_time, record_count, status)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                quote(&self.metadata_table)
            ),
            rusqlite::params![
                category,
                start.to_rfc3339(),
                Utc::now().to_rfc3339(),
                count as i64,
                status.as_str(),
            ],
        )?;
        Ok(())
    }
}

impl Storage for SqliteSink {
    fn save(&mut self, category: &str, columns: &[String], rows: &[Vec<String>]) -> Result<usize> {
        let conn = self
            .conn
            .as_ref()
            .ok_or_else(|| anyhow!("database connection already closed"))?;
        let start = Utc::now();

        match self.write_batch(conn, columns, rows) {
            Ok(()) => {
                self.record_run(conn, category, start, rows.len(), RunStatus::Success)?;
                info!(category, records = rows.len(), table = %self.table, "saved to database");
                Ok(rows.len())
            }
            Err(e) => {
                if let Err(meta_err) = self.record_run(conn, category, start, rows.len(), RunStatus::Failed) {
                    warn!("Could not record failed run: {:#}", meta_err);
                }
                Err(e.context(format!("Failed to save {} records to {}", rows.len(), self.table)))
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(_, e)| e)?;
        }
        Ok(())
    }
}
