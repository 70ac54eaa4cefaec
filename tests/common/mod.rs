//! Scripted stand-ins for the external services.

#![allow(dead_code)]

use async_trait::async_trait;
use question_forge::error::{ForgeError, Result};
use question_forge::llm::TextGenerator;
use question_forge::schema::{ColumnContext, SchemaContext, TableContext, UnstructuredSource};
use question_forge::semantic::QueryOracle;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptKind {
    Generation,
    Validation,
    Semantic,
    FollowUp,
}

pub fn classify(prompt: &str) -> PromptKind {
    if prompt.contains("valid_question_numbers") {
        PromptKind::Validation
    } else if prompt.contains("Respond with just YES or NO") {
        PromptKind::Semantic
    } else if prompt.contains("follow-up questions") {
        PromptKind::FollowUp
    } else {
        PromptKind::Generation
    }
}

/// Replays queued completions per prompt kind and records every prompt.
#[derive(Default)]
pub struct ScriptedLlm {
    queues: Mutex<HashMap<PromptKind, VecDeque<String>>>,
    prompts: Mutex<Vec<(PromptKind, String)>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(self, kind: PromptKind, response: impl Into<String>) -> Self {
        self.queues
            .lock()
            .unwrap()
            .entry(kind)
            .or_default()
            .push_back(response.into());
        self
    }

    pub fn prompts(&self, kind: PromptKind) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl TextGenerator for ScriptedLlm {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let kind = classify(prompt);
        self.prompts.lock().unwrap().push((kind, prompt.to_string()));
        self.queues
            .lock()
            .unwrap()
            .get_mut(&kind)
            .and_then(|q| q.pop_front())
            .ok_or_else(|| ForgeError::Llm(format!("no scripted response for {:?}", kind)))
    }
}

/// Says no to any question containing one of the given fragments.
pub struct RejectingOracle {
    pub reject_containing: Vec<String>,
}

#[async_trait]
impl QueryOracle for RejectingOracle {
    async fn can_answer(&self, _model_id: &str, question: &str) -> Result<bool> {
        Ok(!self.reject_containing.iter().any(|f| question.contains(f.as_str())))
    }
}

pub fn sales_schema() -> SchemaContext {
    let mut schema = SchemaContext::new(vec![TableContext {
        name: "FACT_SALES".to_string(),
        row_count: 500,
        description: Some("Sales and customer satisfaction".to_string()),
        columns: vec![
            ColumnContext::new("ENTITY_ID", "NUMBER").with_unique_count(500),
            ColumnContext::new("REVENUE", "NUMBER").with_range(0.0, 1000.0, Some(495.2)),
            ColumnContext::new("REGION", "VARCHAR")
                .with_unique_count(4)
                .with_samples(["East", "West", "North", "South"]),
            ColumnContext::new("ORDER_DATE", "DATE"),
        ],
    }]);
    schema.unstructured.push(UnstructuredSource {
        table: "SOP_CHUNKS".to_string(),
        content_type: Some("procedures".to_string()),
        sample_chunks: vec!["Standard Operating Procedure: refund processing. Step 1) Verify the order.".to_string()],
    });
    schema
}

/// `n` analytics items of one difficulty, each with unique text.
pub fn analytics_items(prefix: &str, difficulty: &str, n: usize) -> Vec<serde_json::Value> {
    (1..=n)
        .map(|i| {
            json!({
                "text": format!("{} {}: how does revenue vary by region for cohort {}?", prefix, i, i),
                "difficulty": difficulty,
                "category": "analytics",
                "referenced_columns": ["REVENUE", "REGION"],
                "referenced_tables": ["FACT_SALES"]
            })
        })
        .collect()
}

pub fn search_items(prefix: &str, n: usize) -> Vec<serde_json::Value> {
    (1..=n)
        .map(|i| {
            json!({
                "text": format!("Find refund procedures {} {}", prefix, i),
                "difficulty": "basic",
                "category": "search",
                "referenced_columns": [],
                "referenced_tables": ["SOP_CHUNKS"]
            })
        })
        .collect()
}

pub fn batch(groups: Vec<Vec<serde_json::Value>>) -> String {
    let items: Vec<serde_json::Value> = groups.into_iter().flatten().collect();
    serde_json::Value::Array(items).to_string()
}

pub fn verdict(numbers: impl IntoIterator<Item = usize>) -> String {
    json!({ "valid_question_numbers": numbers.into_iter().collect::<Vec<_>>() }).to_string()
}
