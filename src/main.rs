use question_forge::alignment::{reconcile_schema, StaticColumnCatalog};
use question_forge::llm::{LlmClient, TextGenerator};
use question_forge::question::Question;
use question_forge::semantic::{LlmQueryOracle, SemanticAnswerabilityTester};
use question_forge::verifier::ColumnReferenceVerifier;
use question_forge::{PipelineConfig, QuestionPipeline, SchemaContext};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "question-forge")]
#[command(about = "Generate demo questions guaranteed to be answerable against a schema")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full generation pipeline against the configured LLM
    Generate {
        /// Schema snapshot JSON
        #[arg(short, long)]
        schema: PathBuf,

        /// Mandatory question (repeatable)
        #[arg(short, long = "target")]
        targets: Vec<String>,

        /// File with one mandatory question per line
        #[arg(long)]
        targets_file: Option<PathBuf>,

        /// Pipeline configuration JSON
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Deployed semantic model to test questions against
        #[arg(long)]
        semantic_model: Option<String>,

        /// Where to write the result JSON (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print the questions as markdown
        #[arg(long)]
        markdown: bool,
    },
    /// Check declared column references offline
    Verify {
        #[arg(short, long)]
        schema: PathBuf,

        /// JSON array of questions
        #[arg(short, long)]
        questions: PathBuf,
    },
    /// Align a schema snapshot with deployed columns
    Reconcile {
        #[arg(short, long)]
        schema: PathBuf,

        /// JSON object mapping table names to deployed column lists
        #[arg(short, long)]
        deployed: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Generate {
            schema,
            targets,
            targets_file,
            config,
            semantic_model,
            output,
            markdown,
        } => run_generate(schema, targets, targets_file, config, semantic_model, output, markdown).await,
        Commands::Verify { schema, questions } => run_verify(schema, questions),
        Commands::Reconcile { schema, deployed } => run_reconcile(schema, deployed).await,
    }
}

async fn run_generate(
    schema_path: PathBuf,
    mut targets: Vec<String>,
    targets_file: Option<PathBuf>,
    config_path: Option<PathBuf>,
    semantic_model: Option<String>,
    output: Option<PathBuf>,
    markdown: bool,
) -> Result<()> {
    let schema = SchemaContext::load(&schema_path)
        .with_context(|| format!("Failed to load schema from {:?}", schema_path))?;

    if let Some(path) = targets_file {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read targets from {:?}", path))?;
        targets.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(String::from),
        );
    }

    let config = match config_path {
        Some(path) => PipelineConfig::load(&path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => PipelineConfig::default(),
    };

    let llm: Arc<dyn TextGenerator> = Arc::new(LlmClient::from_env()?);
    let mut pipeline = QuestionPipeline::new(llm.clone(), config)?;
    if let Some(model) = semantic_model {
        info!("Semantic testing against {}", model);
        let oracle = Arc::new(LlmQueryOracle::new(llm));
        pipeline = pipeline.with_semantic_tester(SemanticAnswerabilityTester::new(oracle, Some(model)));
    }

    let result = pipeline.run(&schema, &targets).await?;

    if markdown {
        println!("{}", result.to_markdown());
    }
    match output {
        Some(path) => {
            result.save(&path)?;
            info!("Wrote {} questions to {:?}", result.questions.len(), path);
        }
        None if !markdown => println!("{}", result.to_json()?),
        None => {}
    }
    Ok(())
}

fn run_verify(schema_path: PathBuf, questions_path: PathBuf) -> Result<()> {
    let schema = SchemaContext::load(&schema_path)
        .with_context(|| format!("Failed to load schema from {:?}", schema_path))?;
    let content = std::fs::read_to_string(&questions_path)
        .with_context(|| format!("Failed to read questions from {:?}", questions_path))?;
    let questions: Vec<Question> = serde_json::from_str(&content)?;

    let outcome = ColumnReferenceVerifier::new(&schema).verify_detailed(questions);

    println!("\n=== Kept ({}) ===", outcome.kept.len());
    for q in &outcome.kept {
        println!("  ✓ [{} / {}] {}", q.category, q.difficulty, q.text);
    }
    println!("\n=== Dropped ({}) ===", outcome.rejected.len());
    for r in &outcome.rejected {
        println!("  ✗ {}", r.question.text);
        if !r.missing_columns.is_empty() {
            println!("      missing columns: {}", r.missing_columns.join(", "));
        }
        if !r.missing_tables.is_empty() {
            println!("      missing tables: {}", r.missing_tables.join(", "));
        }
    }
    Ok(())
}

async fn run_reconcile(schema_path: PathBuf, deployed_path: PathBuf) -> Result<()> {
    let schema = SchemaContext::load(&schema_path)
        .with_context(|| format!("Failed to load schema from {:?}", schema_path))?;
    let catalog = StaticColumnCatalog::load(&deployed_path)?;

    let (_, report) = reconcile_schema(&schema, &catalog).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if report.perfect_match {
        info!("✅ Schema matches deployed columns");
    } else {
        info!("{} discrepancies found", report.total_discrepancies);
    }
    Ok(())
}
