use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use crate::pipeline::SyncPipeline;

/// A scheduler with one job running the weekly pipeline on `cron`
/// (six fields, seconds first). The caller starts and stops it.
pub async fn build_scheduler(pipeline: Arc<SyncPipeline>, cron: &str) -> Result<JobScheduler> {
    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let job = Job::new_async(cron, move |_uuid, _lock| {
        let pipeline = pipeline.clone();
        Box::pin(async move {
            info!("scheduled weekly pipeline starting");
            match pipeline.run_weekly().await {
                Ok(outcome) => info!(
                    processed = outcome.sync.processed,
                    ai_transcripts = outcome.sync.ai_transcripts,
                    import_records = outcome.import.as_ref().map(|m| m.total_records),
                    "scheduled weekly pipeline finished"
                ),
                Err(err) => error!(error = %format!("{err:#}"), "scheduled weekly pipeline failed"),
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(sched)
}
