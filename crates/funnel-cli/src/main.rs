mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::logging::LogFormat;

#[derive(Parser)]
#[command(
    name = "funnel",
    version,
    about = "Staged lead-enrichment pipeline runner"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to funnel YAML file (built-in defaults when omitted)
    #[arg(long, short, global = true, env = "FUNNEL_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch a run for a platform and wait for it to finish
    Run {
        /// Platform to discover on (instagram, patreon, facebook)
        platform: String,
        /// Discovery filter as key=value (repeatable; values parse as JSON when possible)
        #[arg(long = "filter", short = 'f', value_name = "KEY=VALUE")]
        filters: Vec<String>,
        /// Maximum profiles to discover
        #[arg(long)]
        max_results: Option<u64>,
        /// Budget ceiling in dollars (platform default when omitted)
        #[arg(long)]
        max_budget: Option<f64>,
        /// Proceed even when the estimate needs confirmation
        #[arg(long, short)]
        yes: bool,
    },
    /// Show a run's status, progress and recent errors
    Status {
        /// Run id
        run_id: String,
    },
    /// Start a new run that resumes a previous one at a stage
    Retry {
        /// Run id of the run to resume
        run_id: String,
        /// Stage to resume at (e.g. enrichment, scoring)
        from_stage: String,
    },
    /// Show circuit breaker health for every external service
    Breakers,
    /// Force a circuit breaker back to closed
    BreakerReset {
        /// Service name (e.g. insightiq, openai)
        service: String,
    },
    /// Print the registered adapters per platform and stage
    PipelineInfo,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level, cli.log_format);

    let config = cli.config.as_deref();
    match cli.command {
        Commands::Run {
            platform,
            filters,
            max_results,
            max_budget,
            yes,
        } => {
            let request = commands::run::RunRequest {
                platform,
                filters,
                max_results,
                max_budget,
                yes,
            };
            commands::run::execute(config, request).await
        }
        Commands::Status { run_id } => commands::status::execute(config, &run_id),
        Commands::Retry { run_id, from_stage } => {
            commands::retry::execute(config, &run_id, &from_stage).await
        }
        Commands::Breakers => commands::breakers::execute(config),
        Commands::BreakerReset { service } => commands::breakers::reset(config, &service),
        Commands::PipelineInfo => commands::pipeline_info::execute(config),
    }
}
