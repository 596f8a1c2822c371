use crate::config::{ExtractSettings, ScalarField};
use crate::record::{ProductRecord, NA};

/// Flattens records into rows of one fixed shape: the configured scalar
/// fields, then the canonical spec keys.
#[derive(Debug, Clone)]
pub struct Normalizer {
    scalars: Vec<ScalarField>,
    spec_keys: Vec<String>,
}

impl Normalizer {
    pub fn new(scalars: Vec<ScalarField>, spec_keys: Vec<String>) -> Self {
        Normalizer { scalars, spec_keys }
    }

    pub fn from_settings(s: &ExtractSettings) -> Self {
        Self::new(s.scalar_fields.clone(), s.spec_keys.clone())
    }

    pub fn columns(&self) -> Vec<String> {
        self.scalars
            .iter()
            .map(|f| f.column().to_string())
            .chain(self.spec_keys.iter().cloned())
            .collect()
    }

    pub fn row(&self, record: &ProductRecord) -> Vec<String> {
        let mut row = Vec::with_capacity(self.scalars.len() + self.spec_keys.len());
        row.extend(self.scalars.iter().map(|f| record.scalar(*f).to_string()));
        row.extend(self.spec_keys.iter().map(|k| {
            record
                .specs
                .get(k)
                .cloned()
                .unwrap_or_else(|| NA.to_string())
        }));
        row
    }

    /// Keys outside the canonical list are dropped; absent ones become `N/A`.
    pub fn normalize(&self, records: &[ProductRecord]) -> Vec<Vec<String>> {
        records.iter().map(|r| self.row(r)).collect()
    }
}
