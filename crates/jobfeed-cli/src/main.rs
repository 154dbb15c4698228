use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use jobfeed_core::{AlertFilter, JobType};
use jobfeed_storage::{
    postgres, AlertStore, JobQuery, JobStore, NewAlert, Pagination, PgAlertStore, PgJobStore,
    PgPool,
};
use jobfeed_sync::{load_resume_text, maybe_build_scheduler, SyncConfig, SyncPipeline};
use serde_json::json;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const MAX_PURGE_DAYS: i64 = 365 * 100;

#[derive(Debug, Parser)]
#[command(name = "jobfeed-cli")]
#[command(about = "Job aggregation pipeline: fetch, dedup, persist, alert")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// One fetch, persist and alert cycle.
    Sync,
    /// Start the recurring scheduler and block until Ctrl-C.
    Run,
    Migrate,
    /// Re-warm the dedup cache from durable storage.
    Reconcile,
    Purge {
        /// Defaults to JOBFEED_RETENTION_DAYS.
        #[arg(long, value_parser = clap::value_parser!(i64).range(0..=MAX_PURGE_DAYS))]
        days: Option<i64>,
    },
    /// Deliver up to one batch of queued alert e-mails.
    Drain,
    /// Embed one batch of jobs that lack a vector.
    Backfill,
    Search(SearchArgs),
    /// Rank active jobs against a résumé (`.pdf` or plain text).
    Match {
        #[arg(long)]
        resume: PathBuf,
        #[arg(long, default_value_t = 10)]
        top: usize,
    },
    #[command(subcommand)]
    Alerts(AlertCommands),
}

#[derive(Debug, Args)]
struct SearchArgs {
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    company: Option<String>,
    #[arg(long)]
    location: Option<String>,
    /// internship, contract or full-time.
    #[arg(long)]
    job_type: Option<JobType>,
    #[arg(long)]
    source: Option<String>,
    #[arg(long)]
    include_inactive: bool,
    #[arg(long, default_value_t = 0)]
    offset: i64,
    #[arg(long, default_value_t = 50)]
    limit: i64,
}

#[derive(Debug, Subcommand)]
enum AlertCommands {
    Add {
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        company: Option<String>,
        #[arg(long)]
        location: Option<String>,
        #[arg(long)]
        job_type: Option<JobType>,
    },
    List {
        #[arg(long)]
        email: String,
    },
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn connect(config: &SyncConfig) -> Result<PgPool> {
    let url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL is not set")?;
    postgres::connect(url, 5)
        .await
        .context("connecting to postgres")
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("serializing output")?
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let pipeline = SyncPipeline::from_config(config).await?;
            let summary = pipeline.run_once().await;
            println!(
                "sync complete: run_id={} raw={} unique={} created={} updated={} failed={} notifications={}",
                summary.run_id,
                summary.raw_postings,
                summary.unique_jobs,
                summary.created,
                summary.updated,
                summary.failed,
                summary.notifications_queued
            );
        }
        Commands::Run => {
            let pipeline = Arc::new(SyncPipeline::from_config(config).await?);
            let Some(mut sched) = maybe_build_scheduler(Arc::clone(&pipeline)).await? else {
                bail!("scheduler disabled; set JOBFEED_SCHEDULER_ENABLED=1");
            };
            sched.start().await.context("starting scheduler")?;
            info!(adapters = pipeline.adapter_count(), "scheduler running; press Ctrl-C to stop");
            tokio::signal::ctrl_c()
                .await
                .context("waiting for Ctrl-C")?;
            sched.shutdown().await.context("stopping scheduler")?;
        }
        Commands::Migrate => {
            let pool = connect(&config).await?;
            postgres::migrate(&pool).await.context("applying migrations")?;
            println!("migrations applied");
        }
        Commands::Reconcile => {
            let pipeline = SyncPipeline::from_config(config).await?;
            print_json(&pipeline.reconcile().await?)?;
        }
        Commands::Purge { days } => {
            let days = days.unwrap_or(config.retention_days);
            let pipeline = SyncPipeline::from_config(config).await?;
            let deleted = pipeline.purge(days).await?;
            println!("purged {deleted} jobs created more than {days} days ago");
        }
        Commands::Drain => {
            let pipeline = SyncPipeline::from_config(config).await?;
            print_json(&pipeline.drain_notifications().await)?;
        }
        Commands::Backfill => {
            let pipeline = SyncPipeline::from_config(config).await?;
            print_json(&pipeline.backfill_embeddings().await?)?;
        }
        Commands::Search(args) => {
            let store = PgJobStore::new(connect(&config).await?);
            let query = JobQuery {
                title: args.title,
                company: args.company,
                location: args.location,
                job_type: args.job_type,
                source: args.source,
                is_active: if args.include_inactive { None } else { Some(true) },
            };
            let (jobs, total) = store
                .search(
                    &query,
                    Pagination {
                        offset: args.offset.max(0),
                        limit: args.limit.clamp(1, 100),
                    },
                )
                .await
                .context("searching jobs")?;
            print_json(&json!({ "total": total, "jobs": jobs }))?;
        }
        Commands::Match { resume, top } => {
            let text = load_resume_text(&resume).await?;
            let pipeline = SyncPipeline::from_config(config).await?;
            let ranked = pipeline.match_resume(&text, top).await?;
            for (rank, result) in ranked.iter().enumerate() {
                println!(
                    "{:>2}. {:>6.2}  {} @ {}  [{}]",
                    rank + 1,
                    result.match_score,
                    result.job.job.title,
                    result.job.job.company,
                    result.matched_keywords.join(", ")
                );
            }
        }
        Commands::Alerts(AlertCommands::Add {
            email,
            name,
            title,
            company,
            location,
            job_type,
        }) => {
            let store = PgAlertStore::new(connect(&config).await?);
            let alert = store
                .create_alert(NewAlert {
                    email,
                    name,
                    filters: AlertFilter {
                        title,
                        company,
                        location,
                        job_type: job_type.map(|t| t.as_str().to_string()),
                    },
                })
                .await
                .context("creating alert")?;
            print_json(&alert)?;
        }
        Commands::Alerts(AlertCommands::List { email }) => {
            let store = PgAlertStore::new(connect(&config).await?);
            print_json(&store.list_alerts(&email).await.context("listing alerts")?)?;
        }
    }

    Ok(())
}
