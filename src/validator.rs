//! Answerability Validator
//!
//! Search questions are accepted without a service call. Analytics questions
//! first go through a deterministic cardinality check, then through one
//! batched verdict call. When the verdict cannot be obtained or parsed,
//! every submitted analytics question is accepted and the round is flagged
//! as a fallback with a 0% pass rate.

use crate::config::CategoryPolicy;
use crate::llm::TextGenerator;
use crate::parsing::parse_structured_response;
use crate::prompts;
use crate::question::{Category, Question};
use crate::schema::{ColumnContext, ColumnKind, SchemaContext};
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

lazy_static! {
    static ref TOP_N: Regex = Regex::new(r"(?i)\btop[\s-]+(\d+)\b").unwrap();
    static ref RETRIEVAL_START: Regex = Regex::new(
        r"(?i)^\s*(find|search|locate|look\s+for|retrieve|show\s+me\s+(the\s+)?(documents?|docs|documentation))\b"
    )
    .unwrap();
}

/// Which stage of the run a validation round belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundKind {
    Targets,
    Initial,
    Retry,
}

/// Telemetry for one generate+validate cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationRound {
    pub kind: RoundKind,
    pub round: u32,
    pub started_at: DateTime<Utc>,
    pub questions_generated: usize,
    pub questions_after_column_check: Option<usize>,
    /// Rejected by the cardinality check before any service call
    pub static_rejections: usize,
    pub questions_valid: usize,
    pub pass_rate: f64,
    pub duration_ms: u64,
    pub fallback_used: bool,
    pub error_message: Option<String>,
    pub response_preview: Option<String>,
}

impl ValidationRound {
    fn start(kind: RoundKind, round: u32, submitted: usize) -> Self {
        Self {
            kind,
            round,
            started_at: Utc::now(),
            questions_generated: submitted,
            questions_after_column_check: None,
            static_rejections: 0,
            questions_valid: 0,
            pass_rate: 0.0,
            duration_ms: 0,
            fallback_used: false,
            error_message: None,
            response_preview: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Verdict {
    valid_question_numbers: Vec<serde_json::Value>,
}

impl Verdict {
    fn indices(&self, len: usize) -> BTreeSet<usize> {
        self.valid_question_numbers
            .iter()
            .filter_map(|v| match v {
                serde_json::Value::Number(n) => n.as_u64(),
                serde_json::Value::String(s) => s.trim().parse::<u64>().ok(),
                _ => None,
            })
            .filter(|n| *n >= 1 && (*n as usize) <= len)
            .map(|n| n as usize - 1)
            .collect()
    }
}

/// True when the text reads as a document retrieval request.
pub fn reads_as_retrieval(text: &str) -> bool {
    RETRIEVAL_START.is_match(text)
}

/// Apply the category policy to a declared search question.
pub fn apply_category_policy(mut question: Question, policy: CategoryPolicy) -> Question {
    if policy == CategoryPolicy::Reclassify && question.category == Category::Search {
        let declares_columns = question
            .referenced_columns
            .as_ref()
            .map(|c| !c.is_empty())
            .unwrap_or(false);
        if declares_columns || !reads_as_retrieval(&question.text) {
            info!("🔁 Reclassified search question as analytics: {}", question.text);
            question.category = Category::Analytics;
        }
    }
    question
}

/// Reason a "top N" question cannot be answered, if any.
pub fn cardinality_violation(question: &Question, schema: &SchemaContext) -> Option<String> {
    let n: u64 = TOP_N.captures(&question.text)?.get(1)?.as_str().parse().ok()?;

    let categorical: Vec<&ColumnContext> = match &question.referenced_columns {
        Some(columns) if !columns.is_empty() => columns
            .iter()
            .filter_map(|c| schema.find_column(c))
            .filter(|c| c.kind() == ColumnKind::Dimension)
            .collect(),
        _ => {
            let text = question.text.to_lowercase();
            schema
                .tables
                .iter()
                .flat_map(|t| t.columns.iter())
                .filter(|c| c.kind() == ColumnKind::Dimension)
                .filter(|c| text.contains(&c.name.to_lowercase().replace('_', " ")))
                .collect()
        }
    };

    let with_cardinality: Vec<&ColumnContext> = categorical
        .into_iter()
        .filter(|c| c.unique_count.is_some())
        .collect();
    if with_cardinality.is_empty() {
        return None;
    }
    if with_cardinality
        .iter()
        .all(|c| c.unique_count.map(|u| u <= n).unwrap_or(false))
    {
        let names: Vec<String> = with_cardinality
            .iter()
            .map(|c| format!("{} ({} unique)", c.name, c.unique_count.unwrap_or_default()))
            .collect();
        return Some(format!("asks for top {} but {}", n, names.join(", ")));
    }
    None
}

pub struct AnswerabilityValidator {
    llm: Arc<dyn TextGenerator>,
    policy: CategoryPolicy,
}

impl AnswerabilityValidator {
    pub fn new(llm: Arc<dyn TextGenerator>, policy: CategoryPolicy) -> Self {
        Self { llm, policy }
    }

    pub async fn validate(
        &self,
        questions: Vec<Question>,
        schema: &SchemaContext,
        kind: RoundKind,
        round: u32,
    ) -> (Vec<Question>, ValidationRound) {
        let timer = Instant::now();
        let mut stats = ValidationRound::start(kind, round, questions.len());
        let submitted = questions.len();

        let questions: Vec<Question> = questions
            .into_iter()
            .map(|q| apply_category_policy(q, self.policy))
            .collect();

        // Candidate slots: Some(true) accepted, Some(false) rejected, None pending verdict
        let mut decisions: Vec<Option<bool>> = Vec::with_capacity(questions.len());
        for q in &questions {
            if q.is_search() {
                decisions.push(Some(true));
            } else if let Some(reason) = cardinality_violation(q, schema) {
                info!("🚫 Rejected before validation ({}): {}", reason, q.text);
                stats.static_rejections += 1;
                decisions.push(Some(false));
            } else {
                decisions.push(None);
            }
        }

        let pending: Vec<usize> = decisions
            .iter()
            .enumerate()
            .filter(|(_, d)| d.is_none())
            .map(|(i, _)| i)
            .collect();

        if !pending.is_empty() {
            let batch: Vec<&Question> = pending.iter().map(|&i| &questions[i]).collect();
            let prompt = prompts::validation_prompt(schema, &batch);

            let verdict = match self.llm.complete(&prompt).await {
                Ok(response) => {
                    stats.response_preview = Some(response.chars().take(200).collect());
                    parse_structured_response::<Verdict>(&response)
                        .map_err(|e| format!("Could not parse validation verdict: {}", e))
                }
                Err(e) => Err(format!("Validation call failed: {}", e)),
            };

            match verdict {
                Ok(verdict) => {
                    let accepted = verdict.indices(pending.len());
                    for (pos, &idx) in pending.iter().enumerate() {
                        decisions[idx] = Some(accepted.contains(&pos));
                    }
                }
                Err(message) => {
                    warn!(
                        "⚠️  {} - accepting all {} analytics questions unchecked",
                        message,
                        pending.len()
                    );
                    stats.fallback_used = true;
                    stats.error_message = Some(message);
                    for &idx in &pending {
                        decisions[idx] = Some(true);
                    }
                }
            }
        }

        let valid: Vec<Question> = questions
            .into_iter()
            .zip(decisions)
            .filter(|(_, d)| d.unwrap_or(false))
            .map(|(q, _)| q)
            .collect();

        stats.questions_valid = valid.len();
        stats.pass_rate = if stats.fallback_used || submitted == 0 {
            0.0
        } else {
            valid.len() as f64 / submitted as f64
        };
        stats.duration_ms = timer.elapsed().as_millis() as u64;

        info!(
            "✅ Validation ({:?} round {}): {}/{} valid{}",
            kind,
            round,
            stats.questions_valid,
            submitted,
            if stats.fallback_used { " [fallback]" } else { "" }
        );
        (valid, stats)
    }
}
