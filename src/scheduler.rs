use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::config::{AppConfig, SchedulerConfig};
use crate::models::DateTag;
use crate::pipeline::{PricePipeline, RunSummary};
use crate::utils::error::{AppError, Result};

#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerStats {
    pub completed_runs: u64,
    pub failed_runs: u64,
    pub skipped_runs: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Periodic runs on a cron schedule. Runs never overlap: a tick that arrives
/// while the previous run is still going is skipped.
pub struct RunScheduler {
    scheduler: JobScheduler,
    pipeline: Arc<PricePipeline>,
    running: Arc<Mutex<()>>,
    stats: Arc<RwLock<SchedulerStats>>,
    config: SchedulerConfig,
}

impl RunScheduler {
    pub async fn new(pipeline: Arc<PricePipeline>, config: SchedulerConfig) -> Result<Self> {
        if !AppConfig::is_valid_cron(&config.cron) {
            return Err(AppError::Validation(format!("Invalid cron expression: {}", config.cron)));
        }

        let scheduler = JobScheduler::new().await?;

        Ok(Self {
            scheduler,
            pipeline,
            running: Arc::new(Mutex::new(())),
            stats: Arc::new(RwLock::new(SchedulerStats::default())),
            config,
        })
    }

    pub async fn start(&mut self) -> Result<()> {
        let pipeline = Arc::clone(&self.pipeline);
        let running = Arc::clone(&self.running);
        let stats = Arc::clone(&self.stats);

        let job = Job::new_async(self.config.cron.as_str(), move |_uuid, _l| {
            let pipeline = Arc::clone(&pipeline);
            let running = Arc::clone(&running);
            let stats = Arc::clone(&stats);

            Box::pin(async move {
                Self::execute_run(pipeline, running, stats).await;
            })
        })?;

        self.scheduler.add(job).await?;
        self.scheduler.start().await?;
        tracing::info!("Run scheduler started with schedule: {}", self.config.cron);

        if self.config.run_on_start {
            self.run_now().await;
        }
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.scheduler.shutdown().await?;
        // Let an in-flight run finish writing before returning.
        let _guard = self.running.lock().await;
        tracing::info!("Run scheduler shutdown");
        Ok(())
    }

    /// Trigger a run immediately, outside the schedule.
    pub async fn run_now(&self) -> Option<RunSummary> {
        Self::execute_run(
            Arc::clone(&self.pipeline),
            Arc::clone(&self.running),
            Arc::clone(&self.stats),
        )
        .await
    }

    pub async fn get_stats(&self) -> SchedulerStats {
        self.stats.read().await.clone()
    }

    async fn execute_run(
        pipeline: Arc<PricePipeline>,
        running: Arc<Mutex<()>>,
        stats: Arc<RwLock<SchedulerStats>>,
    ) -> Option<RunSummary> {
        let Ok(_guard) = running.try_lock() else {
            tracing::warn!("Previous run still in progress, skipping this tick");
            stats.write().await.skipped_runs += 1;
            return None;
        };

        let date = DateTag::today();
        let result = pipeline.run_once(&date).await;

        let mut stats = stats.write().await;
        stats.last_run = Some(Utc::now());
        match result {
            Ok(summary) => {
                stats.completed_runs += 1;
                stats.last_error = None;
                Some(summary)
            }
            Err(e) => {
                tracing::error!("Scheduled run {} failed: {}", date, e);
                stats.failed_runs += 1;
                stats.last_error = Some(e.to_string());
                None
            }
        }
    }
}
