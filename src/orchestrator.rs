//! Retry Orchestrator
//!
//! Drives one run through an explicit state machine:
//!
//! ```text
//! Init -> ValidateTargets -> GenerateInitial -> Validate
//!   Validate -> SemanticTest            (distribution met)
//!   Validate -> RetryGenerate -> Validate (deficit, retries left)
//!   Validate -> RetriesExhausted -> SemanticTest
//!   SemanticTest -> Select -> Done
//!   ValidateTargets -> Failed            (any target rejected)
//! ```
//!
//! All service calls are awaited one at a time. Accepted questions only
//! accumulate; a rejected text is never submitted again in the same run.

use crate::config::PipelineConfig;
use crate::error::{ForgeError, Result};
use crate::follow_up::{FollowUpChain, FollowUpGenerator};
use crate::generator::{CandidateGenerator, DifficultyHints, GenerationRequest};
use crate::llm::TextGenerator;
use crate::question::{normalize_text, DistributionCounts, Question};
use crate::report::{final_pass_rate, PipelineDebug, PipelineResult, SemanticSummary};
use crate::schema::SchemaContext;
use crate::selector::{DistributionDeficit, DistributionSelector, Quotas};
use crate::semantic::SemanticAnswerabilityTester;
use crate::validator::{AnswerabilityValidator, RoundKind, ValidationRound};
use crate::verifier::ColumnReferenceVerifier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Init,
    ValidateTargets,
    GenerateInitial,
    Validate,
    RetryGenerate,
    RetriesExhausted,
    SemanticTest,
    Select,
    Done,
    Failed,
}

/// What the step that just ran reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Advance,
    TargetsRejected,
    Assessed {
        distribution_ok: bool,
        retries_used: u32,
        max_retries: u32,
    },
}

/// The single transition function of the run.
pub fn transition(state: PipelineState, outcome: StepOutcome) -> PipelineState {
    use PipelineState::*;
    match (state, outcome) {
        (Init, _) => ValidateTargets,
        (ValidateTargets, StepOutcome::TargetsRejected) => Failed,
        (ValidateTargets, _) => GenerateInitial,
        (GenerateInitial, _) | (RetryGenerate, _) => Validate,
        (
            Validate,
            StepOutcome::Assessed {
                distribution_ok: true,
                ..
            },
        ) => SemanticTest,
        (
            Validate,
            StepOutcome::Assessed {
                retries_used,
                max_retries,
                ..
            },
        ) if retries_used < max_retries => RetryGenerate,
        (Validate, _) => RetriesExhausted,
        (RetriesExhausted, _) => SemanticTest,
        (SemanticTest, _) => Select,
        (Select, _) | (Done, _) => Done,
        (Failed, _) => Failed,
    }
}

/// State owned by a single run.
pub struct RunContext {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    started: Instant,
    pub state: PipelineState,
    pub states: Vec<PipelineState>,
    pub targets: Vec<Question>,
    pub target_round: Option<ValidationRound>,
    failing_targets: Vec<String>,
    /// Validated generated questions, in acceptance order
    pub accumulated: Vec<Question>,
    seen: HashSet<String>,
    rejected: HashSet<String>,
    /// Candidates produced by the last generation step
    pending: Vec<Question>,
    pending_generated: usize,
    pub rounds: Vec<ValidationRound>,
    pub retries_used: u32,
    pub retries_exhausted: bool,
    pub semantic: Option<SemanticSummary>,
    pub selected: Vec<Question>,
    pub deficit: DistributionDeficit,
    pub follow_ups: Vec<FollowUpChain>,
}

impl RunContext {
    pub fn new(target_texts: &[String]) -> Self {
        let mut seen = HashSet::new();
        let targets: Vec<Question> = target_texts
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .filter(|t| seen.insert(normalize_text(t)))
            .map(|t| Question::target(t))
            .collect();

        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            started: Instant::now(),
            state: PipelineState::Init,
            states: vec![PipelineState::Init],
            targets,
            target_round: None,
            failing_targets: Vec::new(),
            accumulated: Vec::new(),
            seen,
            rejected: HashSet::new(),
            pending: Vec::new(),
            pending_generated: 0,
            rounds: Vec::new(),
            retries_used: 0,
            retries_exhausted: false,
            semantic: None,
            selected: Vec::new(),
            deficit: DistributionDeficit::default(),
            follow_ups: Vec::new(),
        }
    }

    fn advance(&mut self, outcome: StepOutcome) {
        let next = transition(self.state, outcome);
        debug!("State {:?} -> {:?}", self.state, next);
        self.state = next;
        self.states.push(next);
    }

    /// Texts the generator must not repeat.
    pub fn denylist(&self) -> Vec<String> {
        self.targets
            .iter()
            .chain(self.accumulated.iter())
            .map(|q| q.text.clone())
            .collect()
    }

    /// Drop candidates already accepted, already rejected, or repeated in the batch.
    fn admit(&self, batch: Vec<Question>) -> Vec<Question> {
        let mut batch_keys = HashSet::new();
        batch
            .into_iter()
            .filter(|q| {
                let key = q.dedup_key();
                !self.seen.contains(&key) && !self.rejected.contains(&key) && batch_keys.insert(key)
            })
            .collect()
    }

    fn record_dropped<'q>(&mut self, dropped: impl IntoIterator<Item = &'q Question>) {
        self.rejected.extend(dropped.into_iter().map(|q| q.dedup_key()));
    }

    fn record_outcome(&mut self, submitted_keys: Vec<String>, valid: Vec<Question>) {
        let valid_keys: HashSet<String> = valid.iter().map(|q| q.dedup_key()).collect();
        for key in submitted_keys {
            if !valid_keys.contains(&key) {
                self.rejected.insert(key);
            }
        }
        for question in valid {
            if self.seen.insert(question.dedup_key()) {
                self.accumulated.push(question);
            }
        }
    }
}

pub struct QuestionPipeline {
    config: PipelineConfig,
    generator: CandidateGenerator,
    validator: AnswerabilityValidator,
    selector: DistributionSelector,
    follow_ups: FollowUpGenerator,
    semantic: Option<SemanticAnswerabilityTester>,
}

impl QuestionPipeline {
    pub fn new(llm: Arc<dyn TextGenerator>, config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            generator: CandidateGenerator::new(llm.clone(), config.brief.clone()),
            validator: AnswerabilityValidator::new(llm.clone(), config.category_policy),
            selector: DistributionSelector::new(Quotas {
                min_advanced_analytics: config.min_advanced_analytics,
                min_search: config.min_search,
            }),
            follow_ups: FollowUpGenerator::new(llm),
            semantic: None,
            config,
        })
    }

    pub fn with_semantic_tester(mut self, tester: SemanticAnswerabilityTester) -> Self {
        self.semantic = Some(tester);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the whole pipeline. Fails only when a target question is rejected.
    pub async fn run(&self, schema: &SchemaContext, target_questions: &[String]) -> Result<PipelineResult> {
        let mut ctx = RunContext::new(target_questions);
        let capacity = self.config.target_count.saturating_sub(ctx.targets.len());
        info!(
            "🚀 Question pipeline {} starting: {} targets, {} open slots",
            ctx.run_id,
            ctx.targets.len(),
            capacity
        );

        loop {
            match ctx.state {
                PipelineState::Init => ctx.advance(StepOutcome::Advance),
                PipelineState::ValidateTargets => {
                    let outcome = self.validate_targets(&mut ctx, schema).await;
                    ctx.advance(outcome);
                }
                PipelineState::GenerateInitial => {
                    let quotas = self.selector_quotas().effective(capacity);
                    let count = if capacity == 0 {
                        0
                    } else {
                        self.config.initial_request_count()
                    };
                    let hints = DifficultyHints {
                        advanced_analytics: quotas.min_advanced_analytics,
                        search: quotas.min_search,
                    };
                    self.generate(&mut ctx, schema, count, hints, false).await;
                    ctx.advance(StepOutcome::Advance);
                }
                PipelineState::RetryGenerate => {
                    ctx.retries_used += 1;
                    let deficit = self.selector.assess(&ctx.accumulated, capacity);
                    let needed = deficit
                        .total_short
                        .max(deficit.advanced_analytics_short + deficit.search_short);
                    let hints = DifficultyHints {
                        advanced_analytics: deficit.advanced_analytics_short,
                        search: deficit.search_short,
                    };
                    info!(
                        "🔄 Retry {}/{}: need {} more ({} advanced analytics, {} search)",
                        ctx.retries_used,
                        self.config.max_retries,
                        needed,
                        hints.advanced_analytics,
                        hints.search
                    );
                    let count = self.config.retry_request_count(needed);
                    self.generate(&mut ctx, schema, count, hints, true).await;
                    ctx.advance(StepOutcome::Advance);
                }
                PipelineState::Validate => {
                    self.validate_pending(&mut ctx, schema).await;
                    let deficit = self.selector.assess(&ctx.accumulated, capacity);
                    ctx.advance(StepOutcome::Assessed {
                        distribution_ok: deficit.is_empty(),
                        retries_used: ctx.retries_used,
                        max_retries: self.config.max_retries,
                    });
                }
                PipelineState::RetriesExhausted => {
                    ctx.retries_exhausted = true;
                    let deficit = self.selector.assess(&ctx.accumulated, capacity);
                    warn!(
                        "⚠️  Retries exhausted with deficit: {} advanced analytics, {} search, {} total short",
                        deficit.advanced_analytics_short, deficit.search_short, deficit.total_short
                    );
                    ctx.advance(StepOutcome::Advance);
                }
                PipelineState::SemanticTest => {
                    if let Some(tester) = &self.semantic {
                        let pool = std::mem::take(&mut ctx.accumulated);
                        let tested = pool.len();
                        let report = tester.test(pool).await;
                        ctx.semantic = Some(SemanticSummary {
                            tested,
                            answerable: report.answerable.len(),
                            failed: report.failed,
                        });
                        ctx.accumulated = report.answerable;
                    }
                    ctx.advance(StepOutcome::Advance);
                }
                PipelineState::Select => {
                    let selection = self.selector.select(&ctx.accumulated, capacity);
                    ctx.selected = selection.questions;
                    ctx.deficit = selection.deficit;
                    if self.config.follow_up_chains > 0 {
                        let primaries: Vec<Question> =
                            ctx.targets.iter().chain(ctx.selected.iter()).cloned().collect();
                        ctx.follow_ups = self
                            .follow_ups
                            .create_chains(&primaries, self.config.follow_up_chains)
                            .await;
                    }
                    ctx.advance(StepOutcome::Advance);
                }
                PipelineState::Done => break,
                PipelineState::Failed => {
                    error!(
                        "❌ {} target question(s) failed validation",
                        ctx.failing_targets.len()
                    );
                    return Err(ForgeError::TargetQuestionsUnanswerable {
                        failing: std::mem::take(&mut ctx.failing_targets),
                    });
                }
            }
        }

        Ok(self.finish(ctx))
    }

    fn selector_quotas(&self) -> Quotas {
        Quotas {
            min_advanced_analytics: self.config.min_advanced_analytics,
            min_search: self.config.min_search,
        }
    }

    async fn validate_targets(&self, ctx: &mut RunContext, schema: &SchemaContext) -> StepOutcome {
        if ctx.targets.is_empty() {
            return StepOutcome::Advance;
        }
        info!("🎯 Validating {} target questions", ctx.targets.len());

        let (valid, round) = self
            .validator
            .validate(ctx.targets.clone(), schema, RoundKind::Targets, 0)
            .await;

        // An unchecked acceptance is not proof that a target is answerable
        let valid_keys: HashSet<String> = if round.fallback_used {
            HashSet::new()
        } else {
            valid.iter().map(|q| q.dedup_key()).collect()
        };
        ctx.failing_targets = ctx
            .targets
            .iter()
            .filter(|q| !valid_keys.contains(&q.dedup_key()))
            .map(|q| q.text.clone())
            .collect();
        ctx.target_round = Some(round);

        if ctx.failing_targets.is_empty() {
            info!("✅ All {} target questions are answerable", ctx.targets.len());
            StepOutcome::Advance
        } else {
            StepOutcome::TargetsRejected
        }
    }

    async fn generate(
        &self,
        ctx: &mut RunContext,
        schema: &SchemaContext,
        count: usize,
        hints: DifficultyHints,
        conservative: bool,
    ) {
        let denylist = ctx.denylist();
        let request = GenerationRequest {
            count,
            hints,
            existing: &denylist,
            conservative,
            analytics_share: self.config.analytics_share,
            round: ctx.retries_used,
        };
        let batch = self.generator.generate(schema, &request).await;
        if batch.is_empty() && count > 0 {
            warn!("⚠️  Round {} produced no candidates", ctx.retries_used);
        }
        ctx.pending_generated = batch.len();
        ctx.pending = batch;
    }

    async fn validate_pending(&self, ctx: &mut RunContext, schema: &SchemaContext) {
        let batch = std::mem::take(&mut ctx.pending);
        let generated = std::mem::take(&mut ctx.pending_generated);
        let admitted = ctx.admit(batch);
        let outcome = ColumnReferenceVerifier::new(schema).verify_detailed(admitted);
        ctx.record_dropped(outcome.rejected.iter().map(|r| &r.question));
        let verified = outcome.kept;
        let submitted_keys: Vec<String> = verified.iter().map(|q| q.dedup_key()).collect();
        let after_column_check = verified.len();

        let kind = if ctx.retries_used == 0 {
            RoundKind::Initial
        } else {
            RoundKind::Retry
        };
        let (valid, mut round) = self
            .validator
            .validate(verified, schema, kind, ctx.retries_used)
            .await;
        round.questions_generated = generated;
        round.questions_after_column_check = Some(after_column_check);

        ctx.record_outcome(submitted_keys, valid);
        ctx.rounds.push(round);
        info!("📊 Accumulated {} validated questions", ctx.accumulated.len());
    }

    fn finish(&self, ctx: RunContext) -> PipelineResult {
        let mut questions = ctx.targets;
        questions.extend(ctx.selected);

        let used_fallback = ctx.rounds.iter().any(|r| r.fallback_used);
        let debug_info = PipelineDebug {
            run_id: ctx.run_id,
            started_at: ctx.started_at,
            total_rounds: ctx.rounds.len(),
            final_pass_rate: final_pass_rate(&ctx.rounds),
            rounds: ctx.rounds,
            targets_passed: ctx.failing_targets.is_empty(),
            target_validation: ctx.target_round,
            distribution: DistributionCounts::of(&questions),
            deficit: ctx.deficit,
            used_fallback,
            retries_exhausted: ctx.retries_exhausted,
            semantic_test: ctx.semantic,
            states: ctx.states,
            total_duration_ms: ctx.started.elapsed().as_millis() as u64,
        };

        if debug_info.has_deficit() {
            warn!("⚠️  Returning {} questions with a distribution deficit", questions.len());
        }
        info!(
            "🏁 Pipeline {} done: {} questions in {} rounds",
            debug_info.run_id,
            questions.len(),
            debug_info.total_rounds
        );

        PipelineResult {
            questions,
            follow_ups: ctx.follow_ups,
            debug: debug_info,
        }
    }
}
