use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};

use crate::jobs::{planning, Task, TaskManager, TaskOutcome};
use crate::orchestrator::ensure::{ensure_jobs_progress, record_abandoned_attempt};
use crate::orchestrator::{run_stage, Pipeline, Stage};

enum Attempt {
    Succeeded,
    Failed(String),
    TimedOut(String),
}

/// Polls the task table and runs due tasks one at a time.
pub struct TaskProcessor {
    pipeline: Pipeline,
    tasks: Arc<TaskManager>,
    poll_interval: Duration,
}

impl TaskProcessor {
    pub fn new(pipeline: Pipeline, tasks: Arc<TaskManager>, poll_interval: Duration) -> Self {
        TaskProcessor {
            pipeline,
            tasks,
            poll_interval,
        }
    }

    async fn dispatch(&self, task: &Task) -> Result<()> {
        match Stage::for_task(task.kind) {
            Some(stage) => run_stage(&self.pipeline, task.payload_id("video_job_id")?, stage).await,
            None => planning::process_plan_video(&self.pipeline, task.payload_id("generation_id")?).await,
        }
    }

    /// Runs one attempt of `task` under its execution timeout and records the
    /// result on the task row.
    pub async fn process_task(&self, task: Task) -> Result<()> {
        info!(
            "[TASKS] Running {} {} (attempt {}/{})",
            task.kind, task.id, task.attempts, task.max_attempts
        );
        let attempt = self.attempt(&task).await;
        self.settle(&task, attempt)
    }

    async fn attempt(&self, task: &Task) -> Attempt {
        let limit = task.kind.retry_policy().execution_timeout;
        match timeout(limit, self.dispatch(task)).await {
            Ok(Ok(())) => Attempt::Succeeded,
            Ok(Err(e)) => Attempt::Failed(format!("{:#}", e)),
            Err(_) => Attempt::TimedOut(format!(
                "{} attempt timed out after {}s",
                task.kind,
                limit.as_secs()
            )),
        }
    }

    /// Writes the attempt's outcome to the task row. Bookkeeping errors along
    /// the way are logged; the row never stays `running`.
    fn settle(&self, task: &Task, attempt: Attempt) -> Result<()> {
        let error = match attempt {
            Attempt::Succeeded => match self.tasks.complete(&task.id) {
                Ok(()) => {
                    info!("[TASKS] {} {} completed", task.kind, task.id);
                    return Ok(());
                }
                Err(e) => {
                    error!("[TASKS] Could not mark {} {} completed: {:#}", task.kind, task.id, e);
                    format!("could not mark task completed: {:#}", e)
                }
            },
            Attempt::Failed(error) => error,
            Attempt::TimedOut(reason) => {
                if let Err(e) = record_abandoned_attempt(&self.pipeline, task, &reason) {
                    error!(
                        "[TASKS] Could not record abandoned {} {}: {:#}",
                        task.kind, task.id, e
                    );
                }
                reason
            }
        };

        match self.tasks.fail(task, &error, Utc::now())? {
            TaskOutcome::Retrying { attempt, run_after } => {
                warn!(
                    "[TASKS] {} {} attempt {} failed, retrying at {}: {}",
                    task.kind, task.id, attempt, run_after, error
                );
            }
            TaskOutcome::Exhausted { attempts } => {
                error!(
                    "[TASKS] {} {} failed permanently after {} attempts: {}",
                    task.kind, task.id, attempts, error
                );
            }
        }
        Ok(())
    }

    /// Claims and runs due tasks until none are left. Returns how many ran.
    pub async fn drain(&self) -> Result<usize> {
        let mut ran = 0;
        while let Some(task) = self.tasks.claim_next(Utc::now())? {
            self.process_task(task).await?;
            ran += 1;
        }
        Ok(ran)
    }

    /// Main processing loop
    pub async fn run(&self) {
        match self.tasks.recover_interrupted() {
            Ok(0) => {}
            Ok(n) => info!("[TASKS] Re-queued {} interrupted tasks", n),
            Err(e) => error!("[TASKS] Could not recover interrupted tasks: {:#}", e),
        }
        match ensure_jobs_progress(&self.pipeline, &self.tasks) {
            Ok(0) => {}
            Ok(n) => info!("[TASKS] Re-queued {} stalled video jobs", n),
            Err(e) => error!("[TASKS] Could not check for stalled video jobs: {:#}", e),
        }

        loop {
            // No DB lock is held across the awaits in here.
            if let Err(e) = self.drain().await {
                error!("[TASKS] Error processing tasks: {:#}", e);
            }
            sleep(self.poll_interval).await;
        }
    }
}
