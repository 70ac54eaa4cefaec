//! Follow-up question chains for conversational demos.

use crate::llm::TextGenerator;
use crate::parsing::parse_structured_response;
use crate::prompts;
use crate::question::{Difficulty, Question};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

const MAX_FOLLOW_UPS: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowUpChain {
    pub primary: Question,
    pub follow_ups: Vec<String>,
}

pub struct FollowUpGenerator {
    llm: Arc<dyn TextGenerator>,
}

impl FollowUpGenerator {
    pub fn new(llm: Arc<dyn TextGenerator>) -> Self {
        Self { llm }
    }

    /// Build chains for up to `max_chains` basic or intermediate questions.
    /// Questions whose follow-ups cannot be generated get no chain.
    pub async fn create_chains(&self, questions: &[Question], max_chains: usize) -> Vec<FollowUpChain> {
        let mut chains = Vec::new();
        let candidates = questions
            .iter()
            .filter(|q| matches!(q.difficulty, Difficulty::Basic | Difficulty::Intermediate))
            .take(max_chains);

        for primary in candidates {
            let response = match self.llm.complete(&prompts::follow_up_prompt(&primary.text)).await {
                Ok(response) => response,
                Err(e) => {
                    warn!("⚠️  Follow-up generation failed for '{}': {}", primary.text, e);
                    continue;
                }
            };
            let follow_ups: Vec<String> = match parse_structured_response::<Vec<String>>(&response) {
                Ok(items) => items
                    .into_iter()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .take(MAX_FOLLOW_UPS)
                    .collect(),
                Err(e) => {
                    warn!("⚠️  Could not parse follow-ups for '{}': {}", primary.text, e);
                    continue;
                }
            };
            if follow_ups.is_empty() {
                continue;
            }
            chains.push(FollowUpChain {
                primary: primary.clone(),
                follow_ups,
            });
        }

        info!("🔗 Created {} follow-up chains", chains.len());
        chains
    }
}
