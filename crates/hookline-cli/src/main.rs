//! hookline admin CLI.

use clap::{Parser, Subcommand};
use hookline_core::job::{JobStatus, QueueName};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::ApiClient;

#[derive(Parser)]
#[command(name = "hookline")]
#[command(about = "hookline queue and webhook administration", long_about = None)]
struct Cli {
    /// API server URL
    #[arg(long, env = "HOOKLINE_API_URL", default_value = "http://localhost:3000")]
    api_url: String,

    /// Print raw JSON responses
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect and control queues
    Queues {
        #[command(subcommand)]
        command: QueueCommands,
    },
    /// Inspect and remediate single jobs
    Jobs {
        #[command(subcommand)]
        command: JobCommands,
    },
    /// Inspect and cancel pipeline runs
    Runs {
        #[command(subcommand)]
        command: RunCommands,
    },
    /// Inspect webhook deliveries
    Deliveries {
        #[command(subcommand)]
        command: DeliveryCommands,
    },
}

#[derive(Subcommand)]
enum QueueCommands {
    /// Show per-status job counts
    Stats { queue: QueueName },
    /// List jobs, newest first
    Jobs {
        queue: QueueName,
        /// Only jobs in this status
        #[arg(long)]
        status: Option<JobStatus>,
        /// Maximum number of jobs to show
        #[arg(long, default_value = "20")]
        limit: u32,
    },
    /// Stop handing out new jobs
    Pause { queue: QueueName },
    /// Resume handing out jobs
    Resume { queue: QueueName },
    /// Remove finished jobs older than the grace window
    Purge {
        queue: QueueName,
        /// completed or failed
        #[arg(long)]
        status: JobStatus,
        /// Grace window in milliseconds
        #[arg(long, default_value = "0")]
        grace_ms: u64,
    },
}

#[derive(Subcommand)]
enum JobCommands {
    /// Show job details
    Show { queue: QueueName, id: String },
    /// Re-queue a failed job
    Retry { queue: QueueName, id: String },
    /// Delete a job that is not running
    Remove { queue: QueueName, id: String },
}

#[derive(Subcommand)]
enum RunCommands {
    /// Show run details
    Show {
        /// Run ID
        id: String,
    },
    /// Cancel a pending or running run
    Cancel {
        /// Run ID
        id: String,
    },
}

#[derive(Subcommand)]
enum DeliveryCommands {
    /// List recent deliveries of a webhook
    List {
        /// Webhook ID
        webhook: String,
        /// Maximum number of deliveries to show
        #[arg(long, default_value = "20")]
        limit: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let client = ApiClient::new(&cli.api_url)?;
    let json = cli.json;

    match cli.command {
        Commands::Queues { command } => match command {
            QueueCommands::Stats { queue } => {
                commands::queues::stats(&client, queue, json).await?;
            }
            QueueCommands::Jobs {
                queue,
                status,
                limit,
            } => {
                commands::queues::jobs(&client, queue, status, limit, json).await?;
            }
            QueueCommands::Pause { queue } => {
                commands::queues::pause(&client, queue).await?;
            }
            QueueCommands::Resume { queue } => {
                commands::queues::resume(&client, queue).await?;
            }
            QueueCommands::Purge {
                queue,
                status,
                grace_ms,
            } => {
                commands::queues::purge(&client, queue, status, grace_ms, json).await?;
            }
        },
        Commands::Jobs { command } => match command {
            JobCommands::Show { queue, id } => {
                commands::jobs::show(&client, queue, &id).await?;
            }
            JobCommands::Retry { queue, id } => {
                commands::jobs::retry(&client, queue, &id).await?;
            }
            JobCommands::Remove { queue, id } => {
                commands::jobs::remove(&client, queue, &id).await?;
            }
        },
        Commands::Runs { command } => match command {
            RunCommands::Show { id } => {
                commands::runs::show(&client, &id).await?;
            }
            RunCommands::Cancel { id } => {
                commands::runs::cancel(&client, &id).await?;
            }
        },
        Commands::Deliveries { command } => match command {
            DeliveryCommands::List { webhook, limit } => {
                commands::deliveries::list(&client, &webhook, limit, json).await?;
            }
        },
    }

    Ok(())
}
