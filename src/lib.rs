//! Generates, validates and selects demo questions that are answerable
//! against a freshly generated schema.

pub mod alignment;
pub mod config;
pub mod error;
pub mod follow_up;
pub mod generator;
pub mod llm;
pub mod orchestrator;
pub mod parsing;
pub mod prompts;
pub mod question;
pub mod report;
pub mod schema;
pub mod selector;
pub mod semantic;
pub mod validator;
pub mod verifier;

pub use alignment::{reconcile_schema, AlignmentReport, ColumnCatalog, StaticColumnCatalog};
pub use config::{CategoryPolicy, DemoBrief, PipelineConfig};
pub use error::{ForgeError, ParseError, Result};
pub use llm::{LlmClient, TextGenerator};
pub use orchestrator::{PipelineState, QuestionPipeline};
pub use question::{Category, Difficulty, Question, QuestionSource};
pub use report::{PipelineDebug, PipelineResult};
pub use schema::SchemaContext;
pub use semantic::{LlmQueryOracle, QueryOracle, SemanticAnswerabilityTester};
