//! Candidate question generation.
//!
//! One prompt, one completion, one parsed batch. A failed or unparseable
//! completion is "no progress this round", never an error.

use crate::config::DemoBrief;
use crate::llm::TextGenerator;
use crate::parsing::parse_structured_response;
use crate::prompts;
use crate::question::{Category, Difficulty, Question};
use crate::schema::SchemaContext;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Gaps a round must specifically try to fill.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DifficultyHints {
    pub advanced_analytics: usize,
    pub search: usize,
}

#[derive(Debug, Clone)]
pub struct GenerationRequest<'a> {
    pub count: usize,
    pub hints: DifficultyHints,
    /// Denylist of question texts already produced or reserved
    pub existing: &'a [String],
    pub conservative: bool,
    pub analytics_share: f64,
    /// Round that produces the batch (0 = initial)
    pub round: u32,
}

impl GenerationRequest<'_> {
    /// (analytics, search) counts to request.
    pub fn category_split(&self) -> (usize, usize) {
        let by_share = self.count - ((self.count as f64) * self.analytics_share).round() as usize;
        let search = by_share.max(self.hints.search).min(self.count);
        (self.count - search, search)
    }
}

/// Lenient shape of one generated item; every field may be missing.
#[derive(Debug, Deserialize)]
struct RawCandidate {
    #[serde(alias = "question")]
    text: Option<String>,
    difficulty: Option<String>,
    category: Option<String>,
    referenced_columns: Option<Vec<String>>,
    referenced_tables: Option<Vec<String>>,
}

impl RawCandidate {
    fn into_question(self, round: u32) -> Option<Question> {
        let text = self.text?.trim().to_string();
        if text.is_empty() {
            return None;
        }
        let difficulty = self
            .difficulty
            .and_then(|d| d.parse::<Difficulty>().ok())
            .unwrap_or(Difficulty::Intermediate);
        let category = self
            .category
            .and_then(|c| c.parse::<Category>().ok())
            .unwrap_or(Category::Analytics);

        let mut question = Question::generated(text, category, difficulty).with_retry_attempt(round);
        if let Some(columns) = self.referenced_columns {
            question = question.with_columns(columns.into_iter().map(|c| c.trim().to_string()));
        }
        if let Some(tables) = self.referenced_tables {
            question = question.with_tables(tables.into_iter().map(|t| t.trim().to_string()));
        }
        Some(question)
    }
}

/// Parse a generation completion into questions. Unparseable input yields nothing.
pub fn parse_candidates(response: &str, round: u32) -> Vec<Question> {
    let items: Vec<serde_json::Value> = match parse_structured_response(response) {
        Ok(items) => items,
        Err(e) => {
            warn!("⚠️  Could not parse generated questions: {}", e);
            return Vec::new();
        }
    };

    items
        .into_iter()
        .filter_map(|item| match item {
            serde_json::Value::String(text) => RawCandidate {
                text: Some(text),
                difficulty: None,
                category: None,
                referenced_columns: None,
                referenced_tables: None,
            }
            .into_question(round),
            other => serde_json::from_value::<RawCandidate>(other)
                .ok()
                .and_then(|raw| raw.into_question(round)),
        })
        .collect()
}

pub struct CandidateGenerator {
    llm: Arc<dyn TextGenerator>,
    brief: DemoBrief,
}

impl CandidateGenerator {
    pub fn new(llm: Arc<dyn TextGenerator>, brief: DemoBrief) -> Self {
        Self { llm, brief }
    }

    pub async fn generate(&self, schema: &SchemaContext, request: &GenerationRequest<'_>) -> Vec<Question> {
        if request.count == 0 {
            return Vec::new();
        }
        info!(
            "📝 Generating {} candidate questions (round {}, conservative: {})",
            request.count, request.round, request.conservative
        );

        let prompt = prompts::generation_prompt(schema, &self.brief, request);
        let response = match self.llm.complete(&prompt).await {
            Ok(response) => response,
            Err(e) => {
                warn!("⚠️  Question generation call failed: {}", e);
                return Vec::new();
            }
        };

        let questions = parse_candidates(&response, request.round);
        debug!("Parsed {} candidates from {} chars", questions.len(), response.len());
        questions
    }
}
