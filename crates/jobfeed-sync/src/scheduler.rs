use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use crate::pipeline::SyncPipeline;

type Task = fn(Arc<SyncPipeline>) -> Pin<Box<dyn Future<Output = ()> + Send>>;

fn fetch_task(pipeline: Arc<SyncPipeline>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        pipeline.run_once().await;
    })
}

fn reconcile_task(pipeline: Arc<SyncPipeline>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        if let Err(err) = pipeline.reconcile().await {
            error!(error = %format!("{err:#}"), "scheduled reconcile failed");
        }
    })
}

fn backfill_task(pipeline: Arc<SyncPipeline>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        if let Err(err) = pipeline.backfill_embeddings().await {
            error!(error = %format!("{err:#}"), "scheduled embedding backfill failed");
        }
    })
}

fn drain_task(pipeline: Arc<SyncPipeline>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        pipeline.drain_notifications().await;
    })
}

fn purge_task(pipeline: Arc<SyncPipeline>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        if let Err(err) = pipeline.purge_expired().await {
            error!(error = %format!("{err:#}"), "scheduled purge failed");
        }
    })
}

/// The recurring tasks with their cadences, in registration order.
pub fn recurring_tasks(pipeline: &SyncPipeline) -> Vec<(&'static str, Duration, Task)> {
    let cadences = pipeline.config().cadences;
    vec![
        ("fetch", cadences.fetch, fetch_task as Task),
        ("reconcile", cadences.reconcile, reconcile_task as Task),
        ("backfill", cadences.backfill, backfill_task as Task),
        ("drain", cadences.drain, drain_task as Task),
        ("purge", cadences.purge, purge_task as Task),
    ]
}

pub async fn build_scheduler(pipeline: Arc<SyncPipeline>) -> Result<JobScheduler> {
    let tasks = recurring_tasks(&pipeline);
    if let Some((name, _, _)) = tasks.iter().find(|(_, every, _)| every.is_zero()) {
        bail!("cadence for scheduled task {name} must be positive");
    }
    let sched = JobScheduler::new().await.context("creating scheduler")?;
    for (name, every, task) in tasks {
        let pipeline = Arc::clone(&pipeline);
        let job = Job::new_repeated_async(every, move |_uuid, _lock| {
            info!(task = name, "scheduled task triggered");
            task(Arc::clone(&pipeline))
        })
        .with_context(|| format!("creating scheduler job {name}"))?;
        sched
            .add(job)
            .await
            .with_context(|| format!("adding scheduler job {name}"))?;
        info!(task = name, every_secs = every.as_secs(), "scheduled recurring task");
    }
    Ok(sched)
}

/// `None` when `JOBFEED_SCHEDULER_ENABLED` is off.
pub async fn maybe_build_scheduler(pipeline: Arc<SyncPipeline>) -> Result<Option<JobScheduler>> {
    if !pipeline.config().scheduler_enabled {
        return Ok(None);
    }
    build_scheduler(pipeline).await.map(Some)
}
