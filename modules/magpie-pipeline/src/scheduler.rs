use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info};

type JobFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
type JobFn = Arc<dyn Fn() -> JobFuture + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Running,
    Stopped,
    NotFound,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub status: JobState,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub interval_secs: Option<u64>,
}

impl JobStatus {
    fn not_found() -> Self {
        Self {
            status: JobState::NotFound,
            last_run: None,
            next_run: None,
            interval_secs: None,
        }
    }
}

struct Job {
    interval: Duration,
    last_run: Arc<std::sync::Mutex<Option<DateTime<Utc>>>>,
    /// Held for the duration of one body invocation; `stop` locks it to
    /// drain in-flight work.
    busy: Arc<Mutex<()>>,
    handle: JoinHandle<()>,
}

/// Runs named, independently-intervaled repeating jobs as supervised
/// background loops.
///
/// One tokio task per job, all gated on a single `watch` running flag.
/// A failing body is logged and the schedule continues; `stop()` cancels
/// in-flight sleeps promptly and waits for each body to finish its current
/// invocation. Jobs stay registered across stop/start.
pub struct Scheduler {
    running: watch::Sender<bool>,
    jobs: Mutex<HashMap<String, Job>>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        let (running, _) = watch::channel(false);
        Self {
            running,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Register a job and spawn its loop. The loop parks until the
    /// scheduler is started. Re-scheduling an existing name replaces it.
    pub async fn schedule_task<F, Fut>(&self, name: &str, interval: Duration, body: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let body: JobFn = Arc::new(move || Box::pin(body()) as JobFuture);
        let last_run = Arc::new(std::sync::Mutex::new(None));
        let busy = Arc::new(Mutex::new(()));

        let handle = tokio::spawn(run_loop(
            name.to_string(),
            interval,
            body,
            last_run.clone(),
            busy.clone(),
            self.running.subscribe(),
        ));

        let mut jobs = self.jobs.lock().await;
        if let Some(previous) = jobs.insert(
            name.to_string(),
            Job {
                interval,
                last_run,
                busy,
                handle,
            },
        ) {
            previous.handle.abort();
        }
        info!(
            job = name,
            interval_secs = interval.as_secs(),
            "Scheduled task"
        );
    }

    /// Start all schedules. A no-op when already running: only a real
    /// stopped-to-running transition notifies the job loops, so a
    /// redundant start cannot cut inter-tick sleeps short.
    pub fn start(&self) {
        let started = self.running.send_if_modified(|running| {
            if *running {
                false
            } else {
                *running = true;
                true
            }
        });
        if started {
            info!("Scheduler started");
        }
    }

    /// Stop all schedules. Cancels pending inter-tick sleeps immediately
    /// and returns only once every in-flight job body has finished.
    pub async fn stop(&self) {
        self.running.send_replace(false);
        let jobs = self.jobs.lock().await;
        for (name, job) in jobs.iter() {
            let _drained = job.busy.lock().await;
            info!(job = name.as_str(), "Drained scheduled task");
        }
        info!("Scheduler stopped");
    }

    /// Stop and tear the job tasks down. For process shutdown.
    pub async fn shutdown(&self) {
        self.stop().await;
        let mut jobs = self.jobs.lock().await;
        for (_, job) in jobs.drain() {
            job.handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    /// Status of one job. Unknown names report `not_found`, not an error.
    pub async fn status(&self, name: &str) -> JobStatus {
        let jobs = self.jobs.lock().await;
        let Some(job) = jobs.get(name) else {
            return JobStatus::not_found();
        };
        let last_run = *job.last_run.lock().expect("last_run lock");
        let interval =
            chrono::Duration::from_std(job.interval).unwrap_or_else(|_| chrono::Duration::zero());
        JobStatus {
            status: if self.is_running() {
                JobState::Running
            } else {
                JobState::Stopped
            },
            last_run,
            next_run: last_run.map(|t| t + interval),
            interval_secs: Some(job.interval.as_secs()),
        }
    }

    pub async fn job_names(&self) -> Vec<String> {
        let jobs = self.jobs.lock().await;
        let mut names: Vec<String> = jobs.keys().cloned().collect();
        names.sort();
        names
    }
}

async fn run_loop(
    name: String,
    interval: Duration,
    body: JobFn,
    last_run: Arc<std::sync::Mutex<Option<DateTime<Utc>>>>,
    busy: Arc<Mutex<()>>,
    mut running: watch::Receiver<bool>,
) {
    loop {
        // Park until the scheduler is globally running. Err means the
        // scheduler itself was dropped.
        if running.wait_for(|running| *running).await.is_err() {
            return;
        }

        {
            let _guard = busy.lock().await;
            // A stop can land between the running check and this lock.
            // Starting a body now would let it run after stop() already
            // drained this job and returned; re-park instead.
            if !*running.borrow() {
                continue;
            }
            if let Err(e) = body().await {
                error!(job = name.as_str(), error = %e, "Scheduled task failed");
            } else {
                info!(job = name.as_str(), "Scheduled task completed");
            }
            // Recorded regardless of outcome: a failing body must not
            // stall the schedule's cadence.
            *last_run.lock().expect("last_run lock") = Some(Utc::now());
        }

        // Inter-tick sleep; a stop signal cancels it promptly.
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = running.changed() => {}
        }
    }
}
