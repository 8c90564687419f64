//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use paperscout_core::llm::{ChatClient, ChatOptions, LlmEvaluator, LlmSynthesizer};
use paperscout_core::pipeline::{PipelineOutcome, PipelineState, ProgressReporter};
use paperscout_core::{BoundedCorpusReader, FileEvaluator, ResearchPipeline, SearchEvaluator};
use paperscout_search::{ArxivClient, ArxivOptions};
use paperscout_shared::{
    AppConfig, MAX_RELEVANCE_SCORE, PipelineConfig, SearchFailurePolicy, init_config,
    load_config, validate_api_key,
};
use paperscout_storage::CorpusStore;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// PaperScout: answer research questions from an evaluated paper corpus.
#[derive(Parser)]
#[command(
    name = "paperscout",
    version,
    about = "Search arXiv, keep the relevant papers, and synthesize an answer.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Options shared by commands that read the corpus.
#[derive(clap::Args, Debug, Default)]
pub(crate) struct CorpusArgs {
    /// Output directory holding the store and reports.
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// Minimum relevance score for the synthesis view (0-10).
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=MAX_RELEVANCE_SCORE as i64))]
    pub min_score: Option<u8>,

    /// Character budget for the synthesis view.
    #[arg(long)]
    pub budget: Option<usize>,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Research a topic: evaluate candidate papers, then synthesize an answer.
    Run {
        /// The research question.
        topic: String,

        #[command(flatten)]
        corpus: CorpusArgs,

        /// Replay evaluator outputs from a JSON file instead of searching arXiv.
        #[arg(long)]
        candidates: Option<PathBuf>,

        /// Fail the run if search/evaluation fails (default: continue).
        #[arg(long)]
        abort_on_search_failure: bool,

        /// Do not write per-paper reports.
        #[arg(long)]
        no_reports: bool,
    },

    /// Print the bounded corpus view the synthesizer would receive.
    Corpus {
        #[command(flatten)]
        corpus: CorpusArgs,

        /// List every stored entry instead of the bounded view.
        #[arg(long)]
        all: bool,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "paperscout=info",
        1 => "paperscout=debug",
        _ => "paperscout=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run {
            topic,
            corpus,
            candidates,
            abort_on_search_failure,
            no_reports,
        } => cmd_run(&topic, &corpus, candidates, abort_on_search_failure, no_reports).await,
        Command::Corpus { corpus, all } => cmd_corpus(&corpus, all).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

/// Merge CLI overrides over the loaded config.
fn pipeline_config(config: &AppConfig, args: &CorpusArgs) -> PipelineConfig {
    let mut pipeline = PipelineConfig::from(config);
    if let Some(out) = &args.out {
        pipeline.output_dir = out.clone();
    }
    if let Some(min_score) = args.min_score {
        pipeline.min_score = min_score;
    }
    if let Some(budget) = args.budget {
        pipeline.char_budget = budget;
    }
    pipeline
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(
    topic: &str,
    args: &CorpusArgs,
    candidates: Option<PathBuf>,
    abort_on_search_failure: bool,
    no_reports: bool,
) -> Result<()> {
    let topic = topic.trim();
    if topic.is_empty() {
        return Err(eyre!("topic must not be empty"));
    }

    // Validate API key before doing anything
    let config = load_config()?;
    let api_key = validate_api_key(&config)?;

    let mut pipeline_config = pipeline_config(&config, args);
    if abort_on_search_failure {
        pipeline_config.on_search_failure = SearchFailurePolicy::Abort;
    }
    if no_reports {
        pipeline_config.write_reports = false;
    }

    let chat = ChatClient::new(ChatOptions::from_config(&config.llm, api_key))?;
    let evaluator: Arc<dyn SearchEvaluator> = match candidates {
        Some(path) => {
            info!(path = %path.display(), "replaying evaluator outputs");
            Arc::new(FileEvaluator::new(path))
        }
        None => {
            let search = ArxivClient::new(ArxivOptions::from(&config.search))?;
            Arc::new(LlmEvaluator::new(search, chat.clone()))
        }
    };
    let synthesizer = Arc::new(LlmSynthesizer::new(chat));

    info!(
        topic,
        output_dir = %pipeline_config.output_dir.display(),
        min_score = pipeline_config.min_score,
        "starting research run"
    );

    let reporter = CliProgress::new();
    let pipeline = ResearchPipeline::new(pipeline_config.clone(), evaluator, synthesizer);
    let outcome = pipeline.run(topic, &reporter).await?;

    println!("{}", outcome.answer);
    println!();
    println!("  Extracted: {}", outcome.stats.extracted);
    println!("  Stored:    {}", outcome.stats.stored);
    println!("  Skipped:   {} (not relevant)", outcome.stats.skipped_irrelevant);
    println!("  Corpus:    {} chars", outcome.corpus_chars);
    println!("  Output:    {}", pipeline_config.output_dir.display());
    if let Some(error) = &outcome.search_error {
        println!("  Warning:   search failed, answer uses the existing corpus ({error})");
    }
    println!("  Time:      {:.1}s", outcome.elapsed.as_secs_f64());

    Ok(())
}

async fn cmd_corpus(args: &CorpusArgs, all: bool) -> Result<()> {
    let config = load_config()?;
    let pipeline_config = pipeline_config(&config, args);
    let store_path = pipeline_config.store_path();

    if all {
        if !store_path.exists() {
            println!("No corpus at {}", store_path.display());
            return Ok(());
        }
        let store = CorpusStore::open_readonly(&store_path).await?;
        for entry in store.list().await? {
            let record = &entry.record;
            let marker = if record.is_relevant { "+" } else { "-" };
            println!(
                "{marker} {:>2}  {}  {}",
                record.relevance_score, record.id, entry.artifact_path
            );
        }
        return Ok(());
    }

    let reader = BoundedCorpusReader::from(&pipeline_config);
    let text = reader.read_at(&store_path).await?;
    if text.is_empty() {
        println!(
            "No relevant papers scoring {} or more in {}",
            reader.min_score(),
            store_path.display()
        );
    } else {
        println!("{text}");
    }
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn state(&self, state: PipelineState) {
        match state {
            PipelineState::Init => self.spinner.set_message("Initializing corpus store"),
            PipelineState::SearchAndExtract => {
                self.spinner.set_message("Searching and evaluating papers")
            }
            PipelineState::Synthesize => self.spinner.set_message("Synthesizing answer"),
            PipelineState::Done | PipelineState::Failed => self.spinner.finish_and_clear(),
        }
    }

    fn record_stored(&self, id: &str, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Stored [{current}/{total}] {id}"));
    }

    fn done(&self, _outcome: &PipelineOutcome) {
        self.spinner.finish_and_clear();
    }
}
