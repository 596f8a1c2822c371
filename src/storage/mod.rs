pub mod csv;
pub mod sqlite;

use anyhow::Result;

use crate::config::{Settings, StorageKind};
use self::csv::CsvSink;
use self::sqlite::SqliteSink;

/// Somewhere normalized rows end up. Every row passed to `save` has
/// exactly `columns.len()` cells.
pub trait Storage {
    /// Persist one batch, returning how many rows were written.
    fn save(&mut self, category: &str, columns: &[String], rows: &[Vec<String>]) -> Result<usize>;

    /// Release held resources. Safe to call more than once.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

pub enum Sink {
    Csv(CsvSink),
    Sqlite(SqliteSink),
}

impl Sink {
    pub fn open(settings: &Settings) -> Result<Self> {
        Ok(match settings.storage.kind {
            StorageKind::Csv => Sink::Csv(CsvSink::new(settings.output_csv_path())),
            StorageKind::Sqlite => Sink::Sqlite(SqliteSink::open(&settings.storage.database)?),
        })
    }

    pub fn describe(&self) -> String {
        match self {
            Sink::Csv(s) => format!("csv {}", s.path().display()),
            Sink::Sqlite(s) => format!("sqlite table {}", s.table()),
        }
    }
}

impl Storage for Sink {
    fn save(&mut self, category: &str, columns: &[String], rows: &[Vec<String>]) -> Result<usize> {
        match self {
            Sink::Csv(s) => s.save(category, columns, rows),
            Sink::Sqlite(s) => s.save(category, columns, rows),
        }
    }

    fn close(&mut self) -> Result<()> {
        match self {
            Sink::Csv(s) => s.close(),
            Sink::Sqlite(s) => s.close(),
        }
    }
}
