use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use kontor_core::TenantId;
use kontor_invoicing::ImportedInvoiceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Background work. [`JobKind::type_name`] picks the handler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobKind {
    /// Read invoice data out of an uploaded PDF or XML file.
    ExtractInvoice { imported_invoice_id: ImportedInvoiceId },
}

impl JobKind {
    pub const EXTRACT_INVOICE: &'static str = "invoicing.extract";

    pub fn type_name(&self) -> &'static str {
        match self {
            JobKind::ExtractInvoice { .. } => Self::EXTRACT_INVOICE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    /// Waiting for `scheduled_at` before the next attempt.
    Failed { error: String, attempt: u32 },
    DeadLettered { error: String, attempts: u32 },
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::DeadLettered { .. })
    }
}

/// Attempts and exponential backoff: `base * 2^(attempt - 1)`, never above `max_delay`.
/// `base == max_delay` gives a fixed delay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Including the first run.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::backoff(3, Duration::from_millis(500), Duration::from_secs(60))
    }
}

impl RetryPolicy {
    pub fn once() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self::backoff(max_attempts, delay, delay)
    }

    pub fn backoff(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Wait after the `attempt`-th (1-based) failure.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let Some(exp) = attempt.checked_sub(1) else {
            return Duration::ZERO;
        };
        self.base_delay
            .saturating_mul(2u32.saturating_pow(exp))
            .min(self.max_delay)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobAttempt {
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub tenant_id: TenantId,
    pub kind: JobKind,
    pub status: JobStatus,
    pub retry_policy: RetryPolicy,
    /// Attempts started so far.
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub history: Vec<JobAttempt>,
}

impl Job {
    pub fn new(tenant_id: TenantId, kind: JobKind) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            tenant_id,
            kind,
            status: JobStatus::Pending,
            retry_policy: RetryPolicy::default(),
            attempt: 0,
            created_at: now,
            updated_at: now,
            scheduled_at: None,
            history: Vec::new(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, JobStatus::Pending | JobStatus::Failed { .. })
            && self.scheduled_at.is_none_or(|at| now >= at)
    }

    pub fn mark_running(&mut self) {
        self.status = JobStatus::Running;
        self.attempt += 1;
        self.updated_at = Utc::now();
    }

    /// Record how the current attempt ended. A failure schedules the next attempt, or
    /// dead-letters the job once `max_attempts` is used up.
    pub fn finish_attempt(&mut self, result: &JobResult, started_at: DateTime<Utc>) {
        let now = Utc::now();
        let error = match result {
            JobResult::Success => None,
            JobResult::Failure(e) => Some(e.clone()),
        };
        self.updated_at = now;
        self.history.push(JobAttempt {
            attempt: self.attempt,
            started_at,
            finished_at: now,
            error: error.clone(),
        });

        self.scheduled_at = None;
        self.status = match error {
            None => JobStatus::Completed,
            Some(error) if self.attempt < self.retry_policy.max_attempts => {
                let delay = chrono::Duration::from_std(self.retry_policy.delay_after(self.attempt)).unwrap_or_default();
                self.scheduled_at = Some(now + delay);
                JobStatus::Failed {
                    error,
                    attempt: self.attempt,
                }
            }
            Some(error) => JobStatus::DeadLettered {
                error,
                attempts: self.attempt,
            },
        };
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobResult {
    Success,
    Failure(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub job: Job,
    pub dead_lettered_at: DateTime<Utc>,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extraction(policy: RetryPolicy) -> Job {
        Job::new(
            TenantId::new(),
            JobKind::ExtractInvoice {
                imported_invoice_id: ImportedInvoiceId::generate(),
            },
        )
        .with_retry_policy(policy)
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let policy = RetryPolicy::backoff(5, Duration::from_millis(100), Duration::from_millis(350));
        assert_eq!(policy.delay_after(0), Duration::ZERO);
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(350));
        assert_eq!(RetryPolicy::fixed(3, Duration::from_secs(1)).delay_after(3), Duration::from_secs(1));
    }

    #[test]
    fn two_attempts_mean_one_retry_then_dead_letter() {
        let mut job = extraction(RetryPolicy::fixed(2, Duration::from_millis(10)));

        job.mark_running();
        job.finish_attempt(&JobResult::Failure("timeout".into()), Utc::now());
        assert!(matches!(job.status, JobStatus::Failed { attempt: 1, .. }));
        assert!(!job.is_ready(Utc::now()));
        assert!(job.is_ready(Utc::now() + chrono::Duration::seconds(1)));

        job.mark_running();
        job.finish_attempt(&JobResult::Failure("still broken".into()), Utc::now());
        assert_eq!(
            job.status,
            JobStatus::DeadLettered {
                error: "still broken".into(),
                attempts: 2
            }
        );
        assert_eq!(job.history.len(), 2);
        assert!(job.status.is_terminal());
    }

    #[test]
    fn success_clears_the_schedule() {
        let mut job = extraction(RetryPolicy::once());
        job.mark_running();
        job.finish_attempt(&JobResult::Success, Utc::now());
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.scheduled_at, None);
        assert_eq!(job.history[0].error, None);
    }
}
