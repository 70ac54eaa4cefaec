//! Schema context - the ground truth questions are validated against.
//!
//! Built by the data-generation side once per run and never mutated by the
//! question pipeline. Column names are compared case-insensitively.

use crate::error::{ForgeError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaContext {
    pub tables: Vec<TableContext>,
    /// Natural-language synonyms keyed by `TABLE.COLUMN`
    #[serde(default)]
    pub column_synonyms: BTreeMap<String, Vec<String>>,
    /// Unstructured content backing search questions
    #[serde(default)]
    pub unstructured: Vec<UnstructuredSource>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableContext {
    pub name: String,
    #[serde(default)]
    pub row_count: u64,
    /// Kept for display only; never trusted as evidence that a column exists
    #[serde(default)]
    pub description: Option<String>,
    pub columns: Vec<ColumnContext>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnContext {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub unique_count: Option<u64>,
    #[serde(default)]
    pub numeric_range: Option<NumericRange>,
    #[serde(default)]
    pub sample_actual_values: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NumericRange {
    pub min: f64,
    pub max: f64,
    #[serde(default)]
    pub avg: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnstructuredSource {
    pub table: String,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub sample_chunks: Vec<String>,
}

/// Coarse role of a column in analytical questions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Metric,
    Dimension,
    Time,
    Other,
}

impl ColumnContext {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            description: String::new(),
            unique_count: None,
            numeric_range: None,
            sample_actual_values: None,
        }
    }

    pub fn with_unique_count(mut self, count: u64) -> Self {
        self.unique_count = Some(count);
        self
    }

    pub fn with_range(mut self, min: f64, max: f64, avg: Option<f64>) -> Self {
        self.numeric_range = Some(NumericRange { min, max, avg });
        self
    }

    pub fn with_samples<I, S>(mut self, samples: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sample_actual_values = Some(
            samples
                .into_iter()
                .map(|s| serde_json::Value::String(s.into()))
                .collect(),
        );
        self
    }

    pub fn kind(&self) -> ColumnKind {
        let ty = self.data_type.to_uppercase();
        if ["NUMBER", "FLOAT", "DECIMAL", "INT", "DOUBLE", "NUMERIC", "REAL"]
            .iter()
            .any(|t| ty.contains(t))
        {
            ColumnKind::Metric
        } else if ty.contains("DATE") || ty.contains("TIME") {
            ColumnKind::Time
        } else if ["STRING", "VARCHAR", "TEXT", "CHAR", "BOOLEAN"]
            .iter()
            .any(|t| ty.contains(t))
        {
            ColumnKind::Dimension
        } else {
            ColumnKind::Other
        }
    }

    /// Sample values rendered for prompts, at most `limit`.
    pub fn sample_strings(&self, limit: usize) -> Vec<String> {
        self.sample_actual_values
            .as_deref()
            .unwrap_or_default()
            .iter()
            .take(limit)
            .map(|v| match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect()
    }
}

impl SchemaContext {
    pub fn new(tables: Vec<TableContext>) -> Self {
        Self {
            tables,
            ..Self::default()
        }
    }

    /// Load a schema snapshot from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let schema: SchemaContext = serde_json::from_str(&content)?;
        schema.validate()?;
        Ok(schema)
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for table in &self.tables {
            if table.name.trim().is_empty() {
                return Err(ForgeError::Schema("table with empty name".to_string()));
            }
            if !seen.insert(table.name.to_uppercase()) {
                return Err(ForgeError::Schema(format!(
                    "duplicate table '{}'",
                    table.name
                )));
            }
            if table.columns.iter().any(|c| c.name.trim().is_empty()) {
                return Err(ForgeError::Schema(format!(
                    "table '{}' has a column with an empty name",
                    table.name
                )));
            }
        }
        Ok(())
    }

    /// Every structured column name, uppercased.
    pub fn column_names(&self) -> HashSet<String> {
        self.tables
            .iter()
            .flat_map(|t| t.columns.iter())
            .map(|c| c.name.to_uppercase())
            .collect()
    }

    /// Structured tables and unstructured sources, uppercased.
    pub fn table_names(&self) -> HashSet<String> {
        self.tables
            .iter()
            .map(|t| t.name.to_uppercase())
            .chain(self.unstructured.iter().map(|u| u.table.to_uppercase()))
            .collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.find_column(name).is_some()
    }

    pub fn find_column(&self, name: &str) -> Option<&ColumnContext> {
        self.tables
            .iter()
            .flat_map(|t| t.columns.iter())
            .find(|c| c.name.eq_ignore_ascii_case(name.trim()))
    }

    pub fn find_table(&self, name: &str) -> Option<&TableContext> {
        self.tables
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name.trim()))
    }

    /// Synonyms restricted to `TABLE.COLUMN` keys that exist in this snapshot.
    pub fn valid_synonyms(&self) -> BTreeMap<String, Vec<String>> {
        self.column_synonyms
            .iter()
            .filter(|(key, synonyms)| {
                if synonyms.is_empty() {
                    return false;
                }
                match key.rsplit_once('.') {
                    Some((table, column)) => self
                        .find_table(table)
                        .map(|t| t.columns.iter().any(|c| c.name.eq_ignore_ascii_case(column)))
                        .unwrap_or(false),
                    None => false,
                }
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.iter().all(|t| t.columns.is_empty())
    }
}
