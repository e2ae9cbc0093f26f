use anyhow::Result;
use clap::Parser;
use converge_client::AgentClient;
use converge_config::{ConvergeConfig, RunConfig};
use converge_core::CostEstimate;
use converge_metrics::CostEstimator;
use converge_recorder::{Recorder, DEFAULT_APP_NAME};
use std::path::PathBuf;
use tokio_stream::StreamExt;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "converge")]
#[command(about = "Forward a prompt to a coding-agent backend and stream its replies", long_about = None)]
struct Cli {
    /// The prompt to send to the agent
    prompt: String,

    /// Maximum number of turns
    #[arg(long, default_value_t = 300)]
    max_turns: usize,

    /// System prompt
    #[arg(long, default_value = "You are a helpful assistant")]
    system_prompt: String,

    /// Working directory the agent operates in
    #[arg(long, default_value = "/app/source")]
    cwd: PathBuf,

    /// Permission mode passed through to the backend
    #[arg(long, default_value = "acceptEdits")]
    permission_mode: String,

    /// Estimate token usage and record the run in the cluster
    #[arg(long, action = clap::ArgAction::SetTrue)]
    show_cost: bool,

    /// Name for the cluster record
    #[arg(long, env = "APP_NAME")]
    app_name: Option<String>,

    /// Namespace the record is written to
    #[arg(long)]
    namespace: Option<String>,

    #[arg(short, long, value_name = "FILE", default_value = "converge.yaml")]
    config: PathBuf,

    #[arg(short, long, action = clap::ArgAction::SetTrue)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose)?;

    let mut config = if cli.config.exists() {
        info!("Loading configuration from: {:?}", cli.config);
        ConvergeConfig::from_yaml(&cli.config)?
    } else {
        ConvergeConfig::default()
    };
    if let Some(namespace) = cli.namespace {
        config.recorder.namespace = namespace;
    }
    let app_name = cli
        .app_name
        .or_else(|| config.recorder.app_name.clone())
        .unwrap_or_else(|| DEFAULT_APP_NAME.to_string());

    let run = RunConfig::new(cli.prompt)
        .with_max_turns(cli.max_turns)
        .with_system_prompt(cli.system_prompt)
        .with_cwd(cli.cwd)
        .with_permission_mode(cli.permission_mode);
    run.validate()?;

    let mut estimator = cli
        .show_cost
        .then(|| CostEstimator::start(config.pricing.clone(), &run.system_prompt, &run.prompt));

    let prompt = run.prompt.clone();
    let client = AgentClient::new(run, config.agent.clone());

    let stream = client.query().await?;
    tokio::pin!(stream);

    while let Some(message) = stream.next().await {
        let message = message?;
        let rendered = message.to_string();
        println!("{rendered}");

        if let Some(estimator) = estimator.as_mut() {
            estimator.observe(&rendered);
        }
    }

    if let Some(estimator) = estimator {
        if let Some(estimate) = estimator.finish() {
            print_cost_report(&estimate);

            let recorder = Recorder::new(app_name, config.recorder.clone());
            match recorder.record_run(&prompt, &estimate).await {
                Ok(outcome) if outcome.is_persisted() => {
                    info!("Run recorded in namespace '{}'", config.recorder.namespace);
                }
                Ok(_) => {
                    info!("Cluster not reachable; run record kept locally only");
                }
                Err(e) => {
                    // Recording failures never abort the run itself.
                    error!("Recording the run failed: {e}");
                }
            }
        }
    }

    Ok(())
}

fn print_cost_report(estimate: &CostEstimate) {
    println!("\n📊 Estimated Token Usage:");
    println!("  Input tokens: {:.1}", estimate.estimated_input_tokens);
    println!("  Output tokens: {:.1}", estimate.estimated_output_tokens);

    println!("\n💰 Estimated Cost:");
    println!("  Total: ${:.6}", estimate.total_estimated_cost);
    println!("  Duration: {:.2}s", estimate.duration_seconds);
    println!("  (word-count heuristic, not an authoritative token count)");
}

fn init_logging(verbose: bool) -> Result<()> {
    let filter = if verbose { "debug" } else { "info" };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}
