use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use super::Storage;

/// Writes one CSV per run, replacing whatever was at `path`.
pub struct CsvSink {
    path: PathBuf,
}

impl CsvSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        CsvSink { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Storage for CsvSink {
    fn save(&mut self, category: &str, columns: &[String], rows: &[Vec<String>]) -> Result<usize> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let mut wtr = ::csv::Writer::from_path(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        wtr.write_record(columns)?;
        for row in rows {
            wtr.write_record(row)?;
        }
        wtr.flush()?;

        info!(category, records = rows.len(), path = %self.path.display(), "saved csv");
        Ok(rows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns() -> Vec<String> {
        ["title", "final_price", "رنگ"].iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn round_trip_keeps_order_commas_and_script() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("products.csv");
        let rows = vec![
            vec!["Rose, Water".to_string(), "1,500,000 تومان".into(), "صورتی".into()],
            vec!["Oud \"Intense\"".to_string(), "N/A".into(), "N/A".into()],
        ];

        let mut sink = CsvSink::new(&path);
        assert_eq!(sink.save("women-perfume", &columns(), &rows).unwrap(), 2);

        let mut rdr = ::csv::Reader::from_path(&path).unwrap();
        let header: Vec<String> = rdr.headers().unwrap().iter().map(String::from).collect();
        assert_eq!(header, columns());
        let back: Vec<Vec<String>> = rdr
            .records()
            .map(|r| r.unwrap().iter().map(String::from).collect())
            .collect();
        assert_eq!(back, rows);
    }

    #[test]
    fn overwrites_previous_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("products.csv");
        let mut sink = CsvSink::new(&path);
        let row = |t: &str| vec![t.to_string(), "1".into(), "2".into()];

        sink.save("c", &columns(), &[row("a"), row("b"), row("c")]).unwrap();
        sink.save("c", &columns(), &[row("d")]).unwrap();

        let mut rdr = ::csv::Reader::from_path(&path).unwrap();
        let titles: Vec<String> = rdr.records().map(|r| r.unwrap()[0].to_string()).collect();
        assert_eq!(titles, vec!["d"]);
    }

    #[test]
    fn ragged_row_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = CsvSink::new(dir.path().join("products.csv"));
        let err = sink.save("c", &columns(), &[vec!["only one".to_string()]]);
        assert!(err.is_err());
    }
}
