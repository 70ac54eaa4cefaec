//! Schema alignment against the columns that were actually deployed.
//!
//! The generated schema snapshot can drift from what ends up in the
//! warehouse. Reconciling rewrites the snapshot so later validation only
//! trusts deployed columns.

use crate::error::{ForgeError, Result};
use crate::schema::{ColumnContext, SchemaContext};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use tracing::{info, warn};

/// Column-existence oracle.
#[async_trait]
pub trait ColumnCatalog: Send + Sync {
    /// Deployed column names for `table`; empty when the table is unknown.
    async fn deployed_columns(&self, table: &str) -> Result<Vec<String>>;
}

/// Catalog backed by an in-memory `TABLE -> [COLUMN]` map.
#[derive(Debug, Clone, Default)]
pub struct StaticColumnCatalog {
    tables: HashMap<String, Vec<String>>,
}

impl StaticColumnCatalog {
    pub fn new(tables: HashMap<String, Vec<String>>) -> Self {
        Self {
            tables: tables
                .into_iter()
                .map(|(table, columns)| (table.to_uppercase(), columns))
                .collect(),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let tables: HashMap<String, Vec<String>> = serde_json::from_str(&content)
            .map_err(|e| ForgeError::Schema(format!("invalid deployed columns file: {}", e)))?;
        Ok(Self::new(tables))
    }
}

#[async_trait]
impl ColumnCatalog for StaticColumnCatalog {
    async fn deployed_columns(&self, table: &str) -> Result<Vec<String>> {
        Ok(self
            .tables
            .get(&table.to_uppercase())
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableAlignment {
    pub table: String,
    /// Expected but not deployed
    pub missing: Vec<String>,
    /// Deployed but not expected
    pub extra: Vec<String>,
    pub match_rate: f64,
    /// No deployed columns were found; the table was left untouched
    pub skipped: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlignmentReport {
    pub tables: Vec<TableAlignment>,
    pub perfect_match: bool,
    pub total_discrepancies: usize,
}

/// Align `schema` with the catalog. Returns the rewritten schema and the report.
pub async fn reconcile_schema(
    schema: &SchemaContext,
    catalog: &dyn ColumnCatalog,
) -> Result<(SchemaContext, AlignmentReport)> {
    let mut updated = schema.clone();
    let mut report = AlignmentReport::default();

    for table in updated.tables.iter_mut() {
        let deployed: BTreeSet<String> = catalog
            .deployed_columns(&table.name)
            .await?
            .into_iter()
            .map(|c| c.trim().to_uppercase())
            .filter(|c| !c.is_empty())
            .collect();

        if deployed.is_empty() {
            warn!("⚠️  No deployed columns found for {} - keeping schema as-is", table.name);
            report.tables.push(TableAlignment {
                table: table.name.clone(),
                missing: Vec::new(),
                extra: Vec::new(),
                match_rate: 0.0,
                skipped: true,
            });
            continue;
        }

        let expected: BTreeSet<String> = table.columns.iter().map(|c| c.name.to_uppercase()).collect();
        let missing: Vec<String> = expected.difference(&deployed).cloned().collect();
        let extra: Vec<String> = deployed.difference(&expected).cloned().collect();
        let union = expected.union(&deployed).count();
        let matched = expected.intersection(&deployed).count();
        let match_rate = if union == 0 { 1.0 } else { matched as f64 / union as f64 };

        table.columns.retain(|c| deployed.contains(&c.name.to_uppercase()));
        table
            .columns
            .extend(extra.iter().map(|name| ColumnContext::new(name.clone(), "VARCHAR")));

        if !missing.is_empty() || !extra.is_empty() {
            info!(
                "🔧 {}: {} missing, {} extra columns (match rate {:.0}%)",
                table.name,
                missing.len(),
                extra.len(),
                match_rate * 100.0
            );
        }
        report.total_discrepancies += missing.len() + extra.len();
        report.tables.push(TableAlignment {
            table: table.name.clone(),
            missing,
            extra,
            match_rate,
            skipped: false,
        });
    }

    report.perfect_match = report.total_discrepancies == 0;
    Ok((updated, report))
}
