//! Semantic answerability test against a deployed query layer.
//!
//! Stricter than batched validation: each analytics question gets its own
//! closed yes/no call. Search questions never touch the query layer.

use crate::error::{ForgeError, Result};
use crate::llm::TextGenerator;
use crate::prompts;
use crate::question::Question;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Deployed-model query oracle: can `model_id` resolve `question`?
#[async_trait]
pub trait QueryOracle: Send + Sync {
    async fn can_answer(&self, model_id: &str, question: &str) -> Result<bool>;
}

/// Oracle that asks the text-generation service on behalf of the deployed model.
pub struct LlmQueryOracle {
    llm: Arc<dyn TextGenerator>,
}

impl LlmQueryOracle {
    pub fn new(llm: Arc<dyn TextGenerator>) -> Self {
        Self { llm }
    }
}

/// Only a reply starting with YES counts.
pub fn is_affirmative(response: &str) -> bool {
    response
        .trim()
        .trim_start_matches(|c: char| !c.is_alphanumeric())
        .to_uppercase()
        .starts_with("YES")
}

#[async_trait]
impl QueryOracle for LlmQueryOracle {
    async fn can_answer(&self, model_id: &str, question: &str) -> Result<bool> {
        let response = self
            .llm
            .complete(&prompts::semantic_prompt(model_id, question))
            .await
            .map_err(|e| ForgeError::SemanticModel(e.to_string()))?;
        Ok(is_affirmative(&response))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedQuestion {
    pub question: Question,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SemanticTestReport {
    pub answerable: Vec<Question>,
    pub failed: Vec<FailedQuestion>,
}

impl SemanticTestReport {
    pub fn pass_rate(&self) -> f64 {
        let total = self.answerable.len() + self.failed.len();
        if total == 0 {
            0.0
        } else {
            self.answerable.len() as f64 / total as f64
        }
    }
}

pub struct SemanticAnswerabilityTester {
    oracle: Arc<dyn QueryOracle>,
    model_id: Option<String>,
}

impl SemanticAnswerabilityTester {
    pub fn new(oracle: Arc<dyn QueryOracle>, model_id: Option<String>) -> Self {
        Self { oracle, model_id }
    }

    /// Questions are tested one at a time, in order.
    pub async fn test(&self, questions: Vec<Question>) -> SemanticTestReport {
        let mut report = SemanticTestReport::default();

        let Some(model_id) = self.model_id.as_deref() else {
            warn!("⚠️  No deployed semantic model - treating all {} questions as failed", questions.len());
            report.failed = questions
                .into_iter()
                .map(|question| FailedQuestion {
                    question,
                    reason: "No deployed semantic model available".to_string(),
                })
                .collect();
            return report;
        };

        for question in questions {
            if question.is_search() {
                report.answerable.push(question);
                continue;
            }
            match self.oracle.can_answer(model_id, &question.text).await {
                Ok(true) => report.answerable.push(question),
                Ok(false) => report.failed.push(FailedQuestion {
                    question,
                    reason: "Deployed model cannot generate a query for this question".to_string(),
                }),
                Err(e) => {
                    let reason: String = format!("Error testing question: {}", e).chars().take(120).collect();
                    report.failed.push(FailedQuestion { question, reason });
                }
            }
        }

        info!(
            "🔬 Semantic test: {} answerable, {} failed",
            report.answerable.len(),
            report.failed.len()
        );
        report
    }
}
