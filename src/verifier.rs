//! Static column reference check.
//!
//! Drops any question whose declared columns or tables are absent from the
//! schema. Undeclared references pass through untouched.

use crate::question::Question;
use crate::schema::SchemaContext;
use serde::Serialize;
use std::collections::HashSet;
use strsim::jaro_winkler;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize)]
pub struct Rejection {
    pub question: Question,
    pub missing_columns: Vec<String>,
    pub missing_tables: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct VerificationOutcome {
    pub kept: Vec<Question>,
    pub rejected: Vec<Rejection>,
}

pub struct ColumnReferenceVerifier {
    columns: HashSet<String>,
    tables: HashSet<String>,
}

impl ColumnReferenceVerifier {
    pub fn new(schema: &SchemaContext) -> Self {
        Self {
            columns: schema.column_names(),
            tables: schema.table_names(),
        }
    }

    /// Filter preserving order.
    pub fn verify(&self, questions: Vec<Question>) -> Vec<Question> {
        self.verify_detailed(questions).kept
    }

    pub fn verify_detailed(&self, questions: Vec<Question>) -> VerificationOutcome {
        let mut outcome = VerificationOutcome::default();
        for question in questions {
            let missing_columns = missing(question.referenced_columns.as_ref(), &self.columns);
            let missing_tables = missing(question.referenced_tables.as_ref(), &self.tables);

            if missing_columns.is_empty() && missing_tables.is_empty() {
                outcome.kept.push(question);
                continue;
            }

            for column in &missing_columns {
                match self.closest_column(column) {
                    Some(suggestion) => debug!(
                        "Unknown column '{}' (did you mean '{}'?)",
                        column, suggestion
                    ),
                    None => debug!("Unknown column '{}'", column),
                }
            }
            info!(
                "🚫 Dropped question referencing missing columns {:?} / tables {:?}: {}",
                missing_columns, missing_tables, question.text
            );
            outcome.rejected.push(Rejection {
                question,
                missing_columns,
                missing_tables,
            });
        }
        outcome
    }

    fn closest_column(&self, name: &str) -> Option<&str> {
        let upper = name.to_uppercase();
        self.columns
            .iter()
            .map(|c| (c, jaro_winkler(&upper, c)))
            .filter(|(_, score)| *score >= 0.85)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(c, _)| c.as_str())
    }
}

fn missing(declared: Option<&std::collections::BTreeSet<String>>, known: &HashSet<String>) -> Vec<String> {
    declared
        .map(|names| {
            names
                .iter()
                .filter(|n| !n.trim().is_empty() && !known.contains(&n.trim().to_uppercase()))
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}
