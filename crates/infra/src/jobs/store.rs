use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;
use thiserror::Error;

use kontor_core::TenantId;

use super::types::{DeadLetterEntry, Job, JobId, JobStatus};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("job already exists: {0}")]
    AlreadyExists(JobId),

    #[error("storage error: {0}")]
    Storage(String),
}

fn poisoned() -> JobStoreError {
    JobStoreError::Storage("lock poisoned".to_string())
}

/// Queue and history of background jobs.
pub trait JobStore: Send + Sync {
    fn enqueue(&self, job: Job) -> Result<JobId, JobStoreError>;

    fn get(&self, tenant_id: TenantId, job_id: JobId) -> Result<Job, JobStoreError>;

    fn update(&self, job: &Job) -> Result<(), JobStoreError>;

    /// Atomically pick the oldest ready job and mark it running.
    fn claim_next(&self) -> Result<Option<Job>, JobStoreError>;

    /// Jobs of a tenant, newest first.
    fn list(&self, tenant_id: TenantId, limit: usize) -> Result<Vec<Job>, JobStoreError>;

    fn dead_letter(&self, entry: DeadLetterEntry) -> Result<(), JobStoreError>;

    fn dead_letters(&self, tenant_id: TenantId) -> Result<Vec<DeadLetterEntry>, JobStoreError>;
}

impl<T: JobStore + ?Sized> JobStore for std::sync::Arc<T> {
    fn enqueue(&self, job: Job) -> Result<JobId, JobStoreError> {
        (**self).enqueue(job)
    }

    fn get(&self, tenant_id: TenantId, job_id: JobId) -> Result<Job, JobStoreError> {
        (**self).get(tenant_id, job_id)
    }

    fn update(&self, job: &Job) -> Result<(), JobStoreError> {
        (**self).update(job)
    }

    fn claim_next(&self) -> Result<Option<Job>, JobStoreError> {
        (**self).claim_next()
    }

    fn list(&self, tenant_id: TenantId, limit: usize) -> Result<Vec<Job>, JobStoreError> {
        (**self).list(tenant_id, limit)
    }

    fn dead_letter(&self, entry: DeadLetterEntry) -> Result<(), JobStoreError> {
        (**self).dead_letter(entry)
    }

    fn dead_letters(&self, tenant_id: TenantId) -> Result<Vec<DeadLetterEntry>, JobStoreError> {
        (**self).dead_letters(tenant_id)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
    dead_letters: RwLock<Vec<DeadLetterEntry>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for InMemoryJobStore {
    fn enqueue(&self, job: Job) -> Result<JobId, JobStoreError> {
        let mut jobs = self.jobs.write().map_err(|_| poisoned())?;
        if jobs.contains_key(&job.id) {
            return Err(JobStoreError::AlreadyExists(job.id));
        }
        let id = job.id;
        jobs.insert(id, job);
        Ok(id)
    }

    fn get(&self, tenant_id: TenantId, job_id: JobId) -> Result<Job, JobStoreError> {
        let jobs = self.jobs.read().map_err(|_| poisoned())?;
        let job = jobs.get(&job_id).ok_or(JobStoreError::NotFound(job_id))?;
        if job.tenant_id != tenant_id {
            // Other tenants' jobs are invisible.
            return Err(JobStoreError::NotFound(job_id));
        }
        Ok(job.clone())
    }

    fn update(&self, job: &Job) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.write().map_err(|_| poisoned())?;
        let existing = jobs.get_mut(&job.id).ok_or(JobStoreError::NotFound(job.id))?;
        if existing.tenant_id != job.tenant_id {
            return Err(JobStoreError::TenantIsolation(format!(
                "job {} belongs to another tenant",
                job.id
            )));
        }
        *existing = job.clone();
        Ok(())
    }

    fn claim_next(&self) -> Result<Option<Job>, JobStoreError> {
        let now = Utc::now();
        let mut jobs = self.jobs.write().map_err(|_| poisoned())?;
        let next = jobs
            .values_mut()
            .filter(|j| j.is_ready(now))
            .min_by_key(|j| (j.scheduled_at.unwrap_or(j.created_at), j.id.0));
        Ok(next.map(|job| {
            job.mark_running();
            job.clone()
        }))
    }

    fn list(&self, tenant_id: TenantId, limit: usize) -> Result<Vec<Job>, JobStoreError> {
        let jobs = self.jobs.read().map_err(|_| poisoned())?;
        let mut out: Vec<Job> = jobs.values().filter(|j| j.tenant_id == tenant_id).cloned().collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.0.cmp(&a.id.0)));
        out.truncate(limit);
        Ok(out)
    }

    fn dead_letter(&self, entry: DeadLetterEntry) -> Result<(), JobStoreError> {
        if !matches!(entry.job.status, JobStatus::DeadLettered { .. }) {
            return Err(JobStoreError::Storage(format!(
                "job {} is not dead-lettered",
                entry.job.id
            )));
        }
        self.update(&entry.job)?;
        self.dead_letters.write().map_err(|_| poisoned())?.push(entry);
        Ok(())
    }

    fn dead_letters(&self, tenant_id: TenantId) -> Result<Vec<DeadLetterEntry>, JobStoreError> {
        Ok(self
            .dead_letters
            .read()
            .map_err(|_| poisoned())?
            .iter()
            .filter(|e| e.job.tenant_id == tenant_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::types::JobKind;
    use kontor_invoicing::ImportedInvoiceId;

    fn job(tenant_id: TenantId) -> Job {
        Job::new(
            tenant_id,
            JobKind::ExtractInvoice {
                imported_invoice_id: ImportedInvoiceId::generate(),
            },
        )
    }

    #[test]
    fn claim_marks_running_and_skips_claimed_jobs() {
        let store = InMemoryJobStore::new();
        let t = TenantId::new();
        let first = store.enqueue(job(t)).unwrap();
        let second = store.enqueue(job(t)).unwrap();

        let claimed = store.claim_next().unwrap().unwrap();
        assert_eq!(claimed.id, first);
        assert_eq!(claimed.status, JobStatus::Running);
        assert_eq!(claimed.attempt, 1);

        assert_eq!(store.claim_next().unwrap().unwrap().id, second);
        assert!(store.claim_next().unwrap().is_none());
    }

    #[test]
    fn jobs_are_invisible_to_other_tenants() {
        let store = InMemoryJobStore::new();
        let t = TenantId::new();
        let id = store.enqueue(job(t)).unwrap();

        assert!(store.get(t, id).is_ok());
        assert_eq!(store.get(TenantId::new(), id), Err(JobStoreError::NotFound(id)));
        assert!(store.list(TenantId::new(), 10).unwrap().is_empty());

        let mut foreign = store.get(t, id).unwrap();
        foreign.tenant_id = TenantId::new();
        assert!(matches!(store.update(&foreign), Err(JobStoreError::TenantIsolation(_))));
    }

    #[test]
    fn only_dead_lettered_jobs_enter_the_dead_letter_list() {
        let store = InMemoryJobStore::new();
        let t = TenantId::new();
        let mut j = job(t);
        store.enqueue(j.clone()).unwrap();

        let entry = |job: Job| DeadLetterEntry {
            job,
            dead_lettered_at: Utc::now(),
            reason: "boom".into(),
        };
        assert!(store.dead_letter(entry(j.clone())).is_err());

        j.status = JobStatus::DeadLettered {
            error: "boom".into(),
            attempts: 3,
        };
        store.dead_letter(entry(j.clone())).unwrap();
        assert_eq!(store.dead_letters(t).unwrap().len(), 1);
        assert!(store.get(t, j.id).unwrap().status.is_terminal());
    }
}
