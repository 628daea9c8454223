//! Single-thread job runner: claim, run, persist the outcome, repeat.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::store::{JobStore, JobStoreError};
use super::types::{DeadLetterEntry, Job, JobResult, JobStatus};

/// Runs one attempt of a job. Must not panic; failures are returned as [`JobResult::Failure`].
pub trait JobHandler: Send + Sync {
    fn handle(&self, job: &Job) -> JobResult;
}

impl<F> JobHandler for F
where
    F: Fn(&Job) -> JobResult + Send + Sync,
{
    fn handle(&self, job: &Job) -> JobResult {
        self(job)
    }
}

#[derive(Debug, Clone)]
pub struct JobExecutorConfig {
    /// Idle wait between polls of an empty queue.
    pub poll_interval: Duration,
    pub name: String,
}

impl Default for JobExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            name: "job-executor".to_string(),
        }
    }
}

impl JobExecutorConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ExecutorStats {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub dead_lettered: u64,
}

#[derive(Debug, Default)]
struct Counters {
    processed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    dead_lettered: AtomicU64,
}

impl Counters {
    fn record(&self, job: &Job, outcome: &Result<JobResult, JobStoreError>) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        let counter = match (outcome, &job.status) {
            (Ok(JobResult::Success), _) => &self.succeeded,
            (Ok(_), JobStatus::DeadLettered { .. }) => &self.dead_lettered,
            _ => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ExecutorStats {
        ExecutorStats {
            processed: self.processed.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
        }
    }
}

/// Owns the executor thread. Dropping the handle also stops the thread, without
/// waiting for it.
#[derive(Debug)]
pub struct JobExecutorHandle {
    stop: mpsc::Sender<()>,
    thread: Option<thread::JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl JobExecutorHandle {
    /// Stop polling and wait for the job in flight.
    pub fn shutdown(mut self) {
        let _ = self.stop.send(());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("job executor thread panicked");
            }
        }
    }

    pub fn stats(&self) -> ExecutorStats {
        self.counters.snapshot()
    }
}

/// Dispatches claimed jobs to the handler registered for their [`JobKind::type_name`].
///
/// [`JobKind::type_name`]: super::JobKind::type_name
pub struct JobExecutor<S: JobStore> {
    store: S,
    handlers: HashMap<&'static str, Box<dyn JobHandler>>,
}

impl<S: JobStore + 'static> JobExecutor<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            handlers: HashMap::new(),
        }
    }

    /// Replaces any handler already registered for `kind`.
    pub fn register_handler(&mut self, kind: &'static str, handler: impl JobHandler + 'static) {
        self.handlers.insert(kind, Box::new(handler));
    }

    pub fn spawn(self, config: JobExecutorConfig) -> std::io::Result<JobExecutorHandle>
    where
        S: Send,
    {
        let (stop, stopped) = mpsc::channel();
        let counters = Arc::new(Counters::default());
        let thread_counters = counters.clone();

        let thread = thread::Builder::new()
            .name(config.name.clone())
            .spawn(move || self.run(config, stopped, thread_counters))?;

        Ok(JobExecutorHandle {
            stop,
            thread: Some(thread),
            counters,
        })
    }

    /// Run one attempt of a job that [`JobStore::claim_next`] marked running, and store
    /// the outcome. A job out of attempts goes to the dead-letter list.
    pub fn execute_one(&self, job: &mut Job) -> Result<JobResult, JobStoreError> {
        let started_at = Utc::now();
        let kind = job.kind.type_name();
        let result = match self.handlers.get(kind) {
            Some(handler) => handler.handle(job),
            None => JobResult::Failure(format!("no handler for job kind {kind}")),
        };

        job.finish_attempt(&result, started_at);
        if let JobStatus::DeadLettered { error, attempts } = &job.status {
            warn!(job_id = %job.id, kind, attempts, error = %error, "job dead-lettered");
            self.store.dead_letter(DeadLetterEntry {
                reason: error.clone(),
                job: job.clone(),
                dead_lettered_at: Utc::now(),
            })?;
        } else {
            debug!(job_id = %job.id, kind, attempt = job.attempt, status = ?job.status, "job attempt finished");
            self.store.update(job)?;
        }
        Ok(result)
    }

    fn run(self, config: JobExecutorConfig, stopped: mpsc::Receiver<()>, counters: Arc<Counters>) {
        let started = Instant::now();
        info!(executor = %config.name, "job executor started");

        loop {
            let idle = match self.store.claim_next() {
                Ok(Some(mut job)) => {
                    let outcome = self.execute_one(&mut job);
                    if let Err(e) = &outcome {
                        error!(executor = %config.name, job_id = %job.id, error = %e, "failed to store job outcome");
                    }
                    counters.record(&job, &outcome);
                    false
                }
                Ok(None) => true,
                Err(e) => {
                    error!(executor = %config.name, error = %e, "failed to claim job");
                    true
                }
            };

            let wait = if idle { config.poll_interval } else { Duration::ZERO };
            match stopped.recv_timeout(wait) {
                Err(mpsc::RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }

        info!(executor = %config.name, uptime_secs = started.elapsed().as_secs(), "job executor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::store::InMemoryJobStore;
    use crate::jobs::types::{JobKind, RetryPolicy};
    use kontor_core::TenantId;
    use kontor_invoicing::ImportedInvoiceId;

    fn extract_job(tenant: TenantId) -> Job {
        Job::new(
            tenant,
            JobKind::ExtractInvoice {
                imported_invoice_id: ImportedInvoiceId::generate(),
            },
        )
    }

    #[test]
    fn successful_job_completes() {
        let store = Arc::new(InMemoryJobStore::new());
        let mut executor = JobExecutor::new(store.clone());
        executor.register_handler(JobKind::EXTRACT_INVOICE, |_: &Job| JobResult::Success);

        let tenant = TenantId::new();
        store.enqueue(extract_job(tenant)).unwrap();
        let mut claimed = store.claim_next().unwrap().unwrap();

        assert_eq!(executor.execute_one(&mut claimed).unwrap(), JobResult::Success);
        assert_eq!(store.get(tenant, claimed.id).unwrap().status, JobStatus::Completed);
    }

    #[test]
    fn failing_job_retries_then_dead_letters() {
        let store = Arc::new(InMemoryJobStore::new());
        let mut executor = JobExecutor::new(store.clone());
        executor.register_handler(JobKind::EXTRACT_INVOICE, |_: &Job| JobResult::Failure("model timeout".into()));

        let tenant = TenantId::new();
        store
            .enqueue(extract_job(tenant).with_retry_policy(RetryPolicy::fixed(2, Duration::ZERO)))
            .unwrap();

        let mut claimed = store.claim_next().unwrap().unwrap();
        executor.execute_one(&mut claimed).unwrap();
        assert!(matches!(claimed.status, JobStatus::Failed { attempt: 1, .. }));

        let mut claimed = store.claim_next().unwrap().unwrap();
        executor.execute_one(&mut claimed).unwrap();
        assert!(matches!(claimed.status, JobStatus::DeadLettered { attempts: 2, .. }));
        assert!(store.claim_next().unwrap().is_none());
        assert_eq!(store.dead_letters(tenant).unwrap()[0].reason, "model timeout");
    }

    #[test]
    fn job_without_handler_fails() {
        let store = Arc::new(InMemoryJobStore::new());
        let executor = JobExecutor::new(store.clone());
        store
            .enqueue(extract_job(TenantId::new()).with_retry_policy(RetryPolicy::once()))
            .unwrap();
        let mut claimed = store.claim_next().unwrap().unwrap();
        assert!(matches!(executor.execute_one(&mut claimed).unwrap(), JobResult::Failure(_)));
        assert!(matches!(claimed.status, JobStatus::DeadLettered { .. }));
    }

    #[test]
    fn spawned_executor_drains_the_queue() {
        let store = Arc::new(InMemoryJobStore::new());
        let mut executor = JobExecutor::new(store.clone());
        executor.register_handler(JobKind::EXTRACT_INVOICE, |_: &Job| JobResult::Success);

        let tenant = TenantId::new();
        let id = store.enqueue(extract_job(tenant)).unwrap();
        let handle = executor
            .spawn(JobExecutorConfig::default().with_poll_interval(Duration::from_millis(5)))
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while handle.stats().processed == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(handle.stats().succeeded, 1);
        assert_eq!(store.get(tenant, id).unwrap().status, JobStatus::Completed);
        handle.shutdown();
    }
}
