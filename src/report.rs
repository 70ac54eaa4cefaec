//! Pipeline result and its debug payload.

use crate::error::Result;
use crate::follow_up::FollowUpChain;
use crate::orchestrator::PipelineState;
use crate::question::{render_markdown, DistributionCounts, Question};
use crate::selector::DistributionDeficit;
use crate::semantic::FailedQuestion;
use crate::validator::ValidationRound;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    /// Targets first, then the selected generated questions
    pub questions: Vec<Question>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub follow_ups: Vec<FollowUpChain>,
    pub debug: PipelineDebug,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticSummary {
    pub tested: usize,
    pub answerable: usize,
    pub failed: Vec<FailedQuestion>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDebug {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Generation rounds, initial included
    pub total_rounds: usize,
    pub rounds: Vec<ValidationRound>,
    pub target_validation: Option<ValidationRound>,
    pub targets_passed: bool,
    pub distribution: DistributionCounts,
    pub deficit: DistributionDeficit,
    /// 0.0 whenever any generation round fell back to accept-all
    pub final_pass_rate: f64,
    pub used_fallback: bool,
    pub retries_exhausted: bool,
    pub semantic_test: Option<SemanticSummary>,
    pub states: Vec<PipelineState>,
    pub total_duration_ms: u64,
}

impl PipelineDebug {
    pub fn has_deficit(&self) -> bool {
        !self.deficit.is_empty()
    }
}

/// Validated share of everything submitted across rounds; 0.0 if any round fell back.
pub fn final_pass_rate(rounds: &[ValidationRound]) -> f64 {
    if rounds.iter().any(|r| r.fallback_used) {
        return 0.0;
    }
    let submitted: usize = rounds
        .iter()
        .map(|r| r.questions_after_column_check.unwrap_or(r.questions_generated))
        .sum();
    let valid: usize = rounds.iter().map(|r| r.questions_valid).sum();
    if submitted == 0 {
        0.0
    } else {
        valid as f64 / submitted as f64
    }
}

impl PipelineResult {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path.as_ref(), self.to_json()?)?;
        Ok(())
    }

    pub fn to_markdown(&self) -> String {
        render_markdown(&self.questions)
    }
}
