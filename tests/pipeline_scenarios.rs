mod common;

use common::*;
use question_forge::config::PipelineConfig;
use question_forge::error::ForgeError;
use question_forge::orchestrator::{PipelineState, QuestionPipeline};
use question_forge::question::{Category, Difficulty, DistributionCounts, Question, QuestionSource};
use question_forge::schema::{ColumnContext, SchemaContext, TableContext};
use question_forge::semantic::SemanticAnswerabilityTester;
use question_forge::validator::{AnswerabilityValidator, RoundKind};
use question_forge::verifier::ColumnReferenceVerifier;
use question_forge::CategoryPolicy;
use std::collections::HashSet;
use std::sync::Arc;

fn assert_columns_exist(questions: &[Question], schema: &SchemaContext) {
    for q in questions.iter().filter(|q| !q.is_search()) {
        if let Some(columns) = &q.referenced_columns {
            for column in columns {
                assert!(schema.has_column(column), "{} references unknown {}", q.text, column);
            }
        }
    }
}

fn assert_unique_texts(questions: &[Question]) {
    let keys: HashSet<String> = questions.iter().map(|q| q.dedup_key()).collect();
    assert_eq!(keys.len(), questions.len(), "duplicate question texts");
}

#[tokio::test]
async fn test_top_n_above_cardinality_rejected() {
    let schema = SchemaContext::new(vec![TableContext {
        name: "FACT_SALES".to_string(),
        row_count: 200,
        description: None,
        columns: vec![
            ColumnContext::new("ENTITY_ID", "NUMBER"),
            ColumnContext::new("REVENUE", "NUMBER").with_range(0.0, 1000.0, None),
            ColumnContext::new("REGION", "VARCHAR").with_unique_count(4),
        ],
    }]);
    let question = Question::generated(
        "What are the top 10 regions by revenue?",
        Category::Analytics,
        Difficulty::Basic,
    )
    .with_columns(["REGION", "REVENUE"]);

    let verified = ColumnReferenceVerifier::new(&schema).verify(vec![question]);
    assert_eq!(verified.len(), 1);

    // The service would accept it; the cardinality check must not let it through
    let llm = Arc::new(ScriptedLlm::new().push(PromptKind::Validation, verdict([1])));
    let validator = AnswerabilityValidator::new(llm.clone(), CategoryPolicy::Reclassify);
    let (valid, round) = validator.validate(verified, &schema, RoundKind::Initial, 0).await;

    assert!(valid.is_empty());
    assert_eq!(round.static_rejections, 1);
    assert!(!round.fallback_used);
    assert!(llm.prompts(PromptKind::Validation).is_empty());
}

#[tokio::test]
async fn test_unanswerable_target_aborts_run() {
    let schema = sales_schema();
    let targets = vec![
        "What is the total revenue by region?".to_string(),
        "What is the average SATISFACTION_SCORE by region?".to_string(),
    ];
    let llm = Arc::new(ScriptedLlm::new().push(PromptKind::Validation, verdict([1])));
    let pipeline = QuestionPipeline::new(llm.clone(), PipelineConfig::default()).unwrap();

    let err = pipeline.run(&schema, &targets).await.unwrap_err();
    match err {
        ForgeError::TargetQuestionsUnanswerable { failing } => {
            assert_eq!(failing, vec![targets[1].clone()]);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(llm.prompts(PromptKind::Generation).is_empty());
}

#[tokio::test]
async fn test_target_fallback_counts_as_failure() {
    let llm = Arc::new(ScriptedLlm::new().push(PromptKind::Validation, "All of them look answerable."));
    let pipeline = QuestionPipeline::new(llm, PipelineConfig::default()).unwrap();
    let targets = vec!["What is the total revenue by region?".to_string()];

    let err = pipeline.run(&sales_schema(), &targets).await.unwrap_err();
    assert!(matches!(
        err,
        ForgeError::TargetQuestionsUnanswerable { ref failing } if failing.len() == 1
    ));
}

#[tokio::test]
async fn test_retry_round_fills_both_quotas() {
    let schema = sales_schema();
    let llm = Arc::new(
        ScriptedLlm::new()
            .push(
                PromptKind::Generation,
                batch(vec![
                    analytics_items("adv-a", "advanced", 1),
                    analytics_items("int-a", "intermediate", 4),
                    analytics_items("basic-a", "basic", 4),
                    search_items("a", 2),
                ]),
            )
            .push(PromptKind::Validation, verdict(1..=9))
            .push(
                PromptKind::Generation,
                batch(vec![analytics_items("adv-b", "advanced", 3), search_items("b", 2)]),
            )
            .push(PromptKind::Validation, verdict([1, 2, 3])),
    );
    let pipeline = QuestionPipeline::new(llm.clone(), PipelineConfig::default()).unwrap();

    let result = pipeline.run(&schema, &[]).await.unwrap();
    let counts = DistributionCounts::of(&result.questions);

    assert_eq!(result.questions.len(), 12);
    assert!(counts.advanced_analytics >= 3);
    assert!(counts.search >= 3);
    assert_unique_texts(&result.questions);
    assert_columns_exist(&result.questions, &schema);

    assert_eq!(result.debug.total_rounds, 2);
    assert!(!result.debug.retries_exhausted);
    assert!(!result.debug.has_deficit());
    assert!(!result.debug.used_fallback);
    assert_eq!(result.debug.final_pass_rate, 1.0);
    assert_eq!(result.debug.states.last(), Some(&PipelineState::Done));
    assert!(result.debug.states.contains(&PipelineState::RetryGenerate));

    let generation = llm.prompts(PromptKind::Generation);
    assert!(!generation[0].contains("CONSERVATIVE MODE"));
    assert!(generation[1].contains("CONSERVATIVE MODE"));
    assert!(generation[1].contains("adv-a 1: how does revenue vary by region for cohort 1?"));

    let validation = llm.prompts(PromptKind::Validation);
    assert!(validation[0].contains("9. "));
    assert!(!validation[0].contains("10. "));
}

#[tokio::test]
async fn test_unparseable_verdicts_fall_back_transparently() {
    let config = PipelineConfig {
        max_retries: 1,
        ..PipelineConfig::default()
    };
    let llm = Arc::new(
        ScriptedLlm::new()
            .push(PromptKind::Generation, batch(vec![analytics_items("first", "basic", 4)]))
            .push(PromptKind::Validation, "Looking at each question, they all seem fine.")
            .push(PromptKind::Generation, batch(vec![analytics_items("second", "basic", 2)]))
            .push(PromptKind::Validation, ""),
    );
    let pipeline = QuestionPipeline::new(llm, config).unwrap();

    let result = pipeline.run(&sales_schema(), &[]).await.unwrap();

    assert_eq!(result.debug.rounds.len(), 2);
    for round in &result.debug.rounds {
        assert!(round.fallback_used);
        assert_eq!(round.pass_rate, 0.0);
        assert!(round.error_message.is_some());
    }
    assert_eq!(result.debug.final_pass_rate, 0.0);
    assert!(result.debug.used_fallback);
    assert!(result.debug.retries_exhausted);
    assert!(result.debug.has_deficit());
    assert_eq!(result.questions.len(), 6);
}

#[tokio::test]
async fn test_rejected_questions_never_resubmitted() {
    let config = PipelineConfig {
        max_retries: 1,
        ..PipelineConfig::default()
    };
    let rejected = analytics_items("stale", "advanced", 1);
    let llm = Arc::new(
        ScriptedLlm::new()
            .push(
                PromptKind::Generation,
                batch(vec![rejected.clone(), analytics_items("kept", "advanced", 1)]),
            )
            .push(PromptKind::Validation, verdict([2]))
            .push(
                PromptKind::Generation,
                batch(vec![rejected, analytics_items("fresh", "advanced", 1)]),
            )
            .push(PromptKind::Validation, verdict([1])),
    );
    let pipeline = QuestionPipeline::new(llm.clone(), config).unwrap();
    let result = pipeline.run(&sales_schema(), &[]).await.unwrap();

    let validation = llm.prompts(PromptKind::Validation);
    assert!(!validation[1].contains("stale 1"));
    assert!(validation[1].contains("fresh 1"));
    assert!(result.questions.iter().all(|q| !q.text.contains("stale")));
    assert_eq!(result.questions.len(), 2);
}

#[tokio::test]
async fn test_unknown_columns_dropped_before_validation() {
    let config = PipelineConfig {
        max_retries: 0,
        ..PipelineConfig::default()
    };
    let ghost = serde_json::json!({
        "text": "What is the average satisfaction score by region?",
        "difficulty": "intermediate",
        "category": "analytics",
        "referenced_columns": ["SATISFACTION_SCORE", "REGION"],
        "referenced_tables": ["FACT_SALES"]
    });
    let llm = Arc::new(
        ScriptedLlm::new()
            .push(
                PromptKind::Generation,
                batch(vec![vec![ghost], analytics_items("real", "basic", 2)]),
            )
            .push(PromptKind::Validation, verdict([1, 2])),
    );
    let pipeline = QuestionPipeline::new(llm.clone(), config).unwrap();
    let result = pipeline.run(&sales_schema(), &[]).await.unwrap();

    assert!(!llm.prompts(PromptKind::Validation)[0].contains("satisfaction"));
    assert_eq!(result.debug.rounds[0].questions_generated, 3);
    assert_eq!(result.debug.rounds[0].questions_after_column_check, Some(2));
    assert_columns_exist(&result.questions, &sales_schema());
    assert_eq!(result.questions.len(), 2);
}

#[tokio::test]
async fn test_truncated_generation_reply_makes_no_progress() {
    let config = PipelineConfig {
        max_retries: 0,
        ..PipelineConfig::default()
    };
    let truncated = r#"[
  {"text": "How does revenue vary by region?", "difficulty": "basic", "category": "analytics",
   "referenced_columns": ["REGION", "REVENUE"], "referenced_tables": ["FACT_SALES"]},
  {"text": "Which regions grew fastest?", "referenced_columns": ["REGION", "REVENUE"], "referenced_tab"#;
    let llm = Arc::new(
        ScriptedLlm::new()
            .push(PromptKind::Generation, truncated)
            .push(PromptKind::Validation, "Everything looks answerable."),
    );
    let pipeline = QuestionPipeline::new(llm.clone(), config).unwrap();
    let result = pipeline.run(&sales_schema(), &[]).await.unwrap();

    assert!(result.questions.is_empty());
    assert!(llm.prompts(PromptKind::Validation).is_empty());
    assert_eq!(result.debug.rounds[0].questions_generated, 0);
    assert!(result.debug.has_deficit());
}

#[tokio::test]
async fn test_targets_lead_and_count_toward_total() {
    let target = "What is the total revenue by region?".to_string();
    let llm = Arc::new(
        ScriptedLlm::new()
            .push(PromptKind::Validation, verdict([1]))
            .push(
                PromptKind::Generation,
                batch(vec![
                    analytics_items("adv", "advanced", 5),
                    analytics_items("int", "intermediate", 3),
                    search_items("docs", 3),
                    // Same text as the target must never be selected twice
                    vec![serde_json::json!({"text": "what is the total revenue by region?", "difficulty": "basic"})],
                ]),
            )
            .push(PromptKind::Validation, verdict(1..=8)),
    );
    let pipeline = QuestionPipeline::new(llm.clone(), PipelineConfig::default()).unwrap();
    let result = pipeline.run(&sales_schema(), &[target.clone()]).await.unwrap();

    assert_eq!(result.questions.len(), 12);
    assert_eq!(result.questions[0].text, target);
    assert_eq!(result.questions[0].source, QuestionSource::Target);
    assert!(result.debug.targets_passed);
    assert_unique_texts(&result.questions);
    assert!(llm.prompts(PromptKind::Generation)[0].contains(&target));
}

#[tokio::test]
async fn test_semantic_stage_and_follow_ups() {
    let config = PipelineConfig {
        target_count: 6,
        min_advanced_analytics: 1,
        min_search: 1,
        follow_up_chains: 1,
        ..PipelineConfig::default()
    };
    let llm = Arc::new(
        ScriptedLlm::new()
            .push(
                PromptKind::Generation,
                batch(vec![
                    analytics_items("adv", "advanced", 2),
                    analytics_items("int", "intermediate", 4),
                    search_items("docs", 1),
                ]),
            )
            .push(PromptKind::Validation, verdict(1..=6))
            .push(
                PromptKind::FollowUp,
                r#"["Why does the East lead?", "How did it change last quarter?"]"#,
            ),
    );
    let oracle = Arc::new(RejectingOracle {
        reject_containing: vec!["int 1:".to_string()],
    });
    let pipeline = QuestionPipeline::new(llm.clone(), config)
        .unwrap()
        .with_semantic_tester(SemanticAnswerabilityTester::new(oracle, Some("SALES_SV".to_string())));

    let result = pipeline.run(&sales_schema(), &[]).await.unwrap();

    let semantic = result.debug.semantic_test.as_ref().unwrap();
    assert_eq!(semantic.tested, 7);
    assert_eq!(semantic.failed.len(), 1);
    assert!(result.questions.iter().all(|q| !q.text.starts_with("int 1:")));
    assert_eq!(result.questions.len(), 6);

    assert_eq!(result.follow_ups.len(), 1);
    assert_eq!(result.follow_ups[0].follow_ups.len(), 2);
    assert_eq!(result.follow_ups[0].primary.difficulty, Difficulty::Intermediate);
}

#[tokio::test]
async fn test_result_serializes_for_persistence() {
    let config = PipelineConfig {
        max_retries: 0,
        ..PipelineConfig::default()
    };
    let llm = Arc::new(
        ScriptedLlm::new()
            .push(PromptKind::Generation, batch(vec![search_items("docs", 2)])),
    );
    let pipeline = QuestionPipeline::new(llm.clone(), config).unwrap();
    let result = pipeline.run(&sales_schema(), &[]).await.unwrap();

    // Only search questions: no validation call is needed
    assert!(llm.prompts(PromptKind::Validation).is_empty());
    let json: serde_json::Value = serde_json::from_str(&result.to_json().unwrap()).unwrap();
    assert_eq!(json["questions"].as_array().unwrap().len(), 2);
    assert_eq!(json["debug"]["states"][0], "init");
    assert_eq!(json["debug"]["run_id"], result.debug.run_id.to_string());
    assert_eq!(json["debug"]["total_rounds"], 1);
    assert!(result.to_markdown().contains("### Basic Questions"));
}
