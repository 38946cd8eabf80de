use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use tokio::runtime::Runtime;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use bencheval_agents::{AgentSampler, ReactAgent, TerminalBenchAgent, ToolRegistry, WebSearchTool};
use bencheval_core::{
    analyze_log, backend_from_name, eval_log_path, load_cases, BrowseCompRunner, Config,
    ConfigLoader, OpenRouterSampler, SessionExecutor, SessionExecutorConfig,
};

#[derive(Parser, Debug)]
#[command(name = "bencheval", version, about = "Model benchmark evaluation harness")]
struct Cli {
    /// Path to the TOML config file (defaults to ./config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a BrowseComp-style eval over a JSONL dataset.
    Browsecomp(BrowsecompArgs),
    /// Solve one terminal task with the agent loop and a container session.
    Terminal(TerminalArgs),
    /// Execute a single command in a named container session.
    Exec(ExecArgs),
    /// Query a search backend directly.
    Search(SearchArgs),
    /// Recompute metrics from a previous eval run log.
    Report(ReportArgs),
}

#[derive(Args, Debug)]
struct BrowsecompArgs {
    /// JSONL dataset of {problem, answer} cases.
    #[arg(long)]
    dataset: PathBuf,

    /// Randomly subsample this many cases.
    #[arg(long)]
    num_examples: Option<usize>,

    /// Answer through the tool-using agent loop instead of a bare model call.
    #[arg(long, default_value_t = false)]
    agent: bool,

    /// Skip writing the per-case JSONL run log.
    #[arg(long, default_value_t = false)]
    no_log: bool,
}

#[derive(Args, Debug)]
struct TerminalArgs {
    /// Task instruction handed to the agent.
    #[arg(long)]
    instruction: String,

    /// Container image for the session (defaults to the configured one).
    #[arg(long)]
    image: Option<String>,

    /// Session key (generated when omitted).
    #[arg(long)]
    session: Option<String>,

    /// Directory for the combined model/terminal output log.
    #[arg(long)]
    logging_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ExecArgs {
    /// Session key; unknown keys are provisioned on demand.
    #[arg(long)]
    session: String,

    /// Container image for newly provisioned sessions.
    #[arg(long, default_value = "alpine")]
    image: String,

    /// Command to write to the session.
    #[arg(long)]
    command: String,

    /// Drain budget in seconds.
    #[arg(long, default_value_t = 3600)]
    wait_for: u64,

    /// Interactive command attached to new sessions.
    #[arg(long, default_value = "bash")]
    shell: String,
}

#[derive(Args, Debug)]
struct SearchArgs {
    /// Query string.
    #[arg(long)]
    query: String,

    /// Backend name: bing or duckduckgo.
    #[arg(long, default_value = "duckduckgo")]
    backend: String,

    /// Number of results to return.
    #[arg(long, default_value_t = 5)]
    limit: usize,
}

#[derive(Args, Debug)]
struct ReportArgs {
    /// Path of a previous run's JSONL log.
    #[arg(long)]
    log: PathBuf,
}

fn main() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,bencheval_core=info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let rt = Runtime::new()?;
    rt.block_on(async move {
        match cli.command {
            Command::Browsecomp(args) => browsecomp_command(cli.config, args).await?,
            Command::Terminal(args) => terminal_command(cli.config, args).await?,
            Command::Exec(args) => exec_command(args).await?,
            Command::Search(args) => search_command(args).await?,
            Command::Report(args) => report_command(args)?,
        }
        Ok::<(), anyhow::Error>(())
    })?;

    Ok(())
}

fn build_sampler(config: &Config, model: &str) -> Result<Arc<OpenRouterSampler>> {
    let api_key = config.llm_api_key()?;
    Ok(Arc::new(OpenRouterSampler::new(
        config.llm.base_url.clone(),
        model,
        api_key,
    )))
}

async fn browsecomp_command(config_path: Option<PathBuf>, args: BrowsecompArgs) -> Result<()> {
    let config = ConfigLoader::load(config_path)?;
    let base_sampler = build_sampler(&config, &config.llm.model)?;
    let grader = build_sampler(&config, config.llm.grader_model())?;

    let sampler: Arc<dyn bencheval_core::Sampler> = if args.agent {
        let backend = backend_from_name(&config.search.backend)
            .ok_or_else(|| anyhow!("unknown search backend '{}'", config.search.backend))?;
        let mut registry = ToolRegistry::default();
        registry.register(Box::new(WebSearchTool::new(
            backend,
            config.search.result_limit,
        )));
        Arc::new(AgentSampler::new(ReactAgent::new(
            base_sampler,
            "You are a helpful assistant.",
            registry,
        )))
    } else {
        base_sampler
    };

    let cases = load_cases(&args.dataset, args.num_examples)?;
    info!(case_count = cases.len(), model = %config.llm.model, "starting browsecomp run");

    let run_id = Uuid::new_v4().to_string();
    let mut runner = BrowseCompRunner::new(sampler, grader, run_id.clone());
    if !args.no_log {
        let log_path = eval_log_path(&run_id);
        println!("run log: {}", log_path.display());
        runner = runner.with_log_path(log_path);
    }

    let metrics = runner.run(&cases).await?;
    println!("{}", metrics.summary());
    Ok(())
}

async fn terminal_command(config_path: Option<PathBuf>, args: TerminalArgs) -> Result<()> {
    let config = ConfigLoader::load(config_path)?;
    let sampler = build_sampler(&config, &config.llm.model)?;

    let executor = SessionExecutor::start(SessionExecutorConfig {
        shell: config.executor.shell.clone(),
        idle_budget: Duration::from_secs(config.executor.idle_budget_secs),
        reap_interval: Duration::from_secs(config.executor.reap_interval_secs),
    })
    .await?;

    let image = args
        .image
        .unwrap_or_else(|| config.executor.default_image.clone());
    let session_key = args
        .session
        .unwrap_or_else(|| format!("task-{}", Uuid::new_v4().simple()));

    let agent = TerminalBenchAgent::new(sampler, Arc::clone(&executor), image)
        .with_wait_for(Duration::from_secs(config.executor.default_wait_secs));

    let outcome = agent
        .perform_task(&args.instruction, &session_key, args.logging_dir.as_deref())
        .await;

    executor.shutdown().await;

    let outcome = outcome?;
    println!("commands: {:?}", outcome.commands);
    println!("--- terminal output ---\n{}", outcome.terminal_output);
    Ok(())
}

async fn exec_command(args: ExecArgs) -> Result<()> {
    let executor = SessionExecutor::start(SessionExecutorConfig {
        shell: args.shell.clone(),
        ..SessionExecutorConfig::default()
    })
    .await?;

    let result = executor
        .execute(
            &args.session,
            &args.image,
            &args.command,
            Duration::from_secs(args.wait_for),
        )
        .await;

    executor.shutdown().await;

    println!("{}", result?);
    Ok(())
}

async fn search_command(args: SearchArgs) -> Result<()> {
    let backend = backend_from_name(&args.backend)
        .ok_or_else(|| anyhow!("unknown search backend '{}'", args.backend))?;

    let items = backend.search(&args.query, args.limit).await;
    println!("{}", bencheval_core::render_results(&args.query, &items));
    Ok(())
}

fn report_command(args: ReportArgs) -> Result<()> {
    let metrics = analyze_log(&args.log)?;
    println!("{}", metrics.summary());
    Ok(())
}
