//! Keyed ingestion job store.
//!
//! One [`IngestionJob`] record per `(knowledge_base_id, filename)`. All
//! writes are compare-and-swap transitions under a single mutex:
//!
//! - [`JobRegistry::try_begin`] creates a `pending` job unless one is
//!   already `pending` or `running` for the key.
//! - [`JobRegistry::transition`], [`JobRegistry::complete`] and
//!   [`JobRegistry::fail`] only apply when the record still belongs to
//!   the caller's job id and is in the expected state.
//!
//! Readers get cloned snapshots, never a partially updated record.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use uuid::Uuid;

use ragline_core::models::{DocumentKey, IngestionJob, JobState};
use ragline_core::{Error, Result};

#[derive(Default)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<DocumentKey, IngestionJob>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<DocumentKey, IngestionJob>> {
        // Every mutation is a single assignment, so a poisoned map is
        // still consistent.
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start a new `pending` job for `key`.
    ///
    /// Fails with [`Error::AlreadyInProgress`] carrying the active job's
    /// id if one is pending or running. A previous terminal job is
    /// replaced; its revision carries over.
    pub fn try_begin(&self, key: &DocumentKey) -> Result<IngestionJob> {
        let mut jobs = self.lock();
        let revision = match jobs.get(key) {
            Some(existing) if existing.state.is_active() => {
                return Err(Error::AlreadyInProgress {
                    job_id: existing.id.clone(),
                });
            }
            Some(existing) => existing.revision,
            None => 0,
        };

        let now = Utc::now();
        let job = IngestionJob {
            id: Uuid::new_v4().to_string(),
            key: key.clone(),
            state: JobState::Pending,
            revision,
            error: None,
            error_kind: None,
            chunk_count: 0,
            created_at: now,
            updated_at: now,
        };
        jobs.insert(key.clone(), job.clone());
        Ok(job)
    }

    /// Apply `update` if the record for `key` is job `job_id` in state `from`.
    fn swap(
        &self,
        key: &DocumentKey,
        job_id: &str,
        from: &[JobState],
        update: impl FnOnce(&mut IngestionJob),
    ) -> Option<IngestionJob> {
        let mut jobs = self.lock();
        let job = jobs.get_mut(key)?;
        if job.id != job_id || !from.contains(&job.state) {
            return None;
        }
        update(job);
        job.updated_at = Utc::now();
        Some(job.clone())
    }

    /// Move job `job_id` from `from` to `to`. Returns the updated record,
    /// or `None` if the job is not in `from`.
    pub fn transition(
        &self,
        key: &DocumentKey,
        job_id: &str,
        from: JobState,
        to: JobState,
    ) -> Option<IngestionJob> {
        self.swap(key, job_id, &[from], |job| job.state = to)
    }

    /// `running` → `completed`, bumping the revision.
    pub fn complete(
        &self,
        key: &DocumentKey,
        job_id: &str,
        chunk_count: usize,
    ) -> Option<IngestionJob> {
        self.swap(key, job_id, &[JobState::Running], |job| {
            job.state = JobState::Completed;
            job.revision += 1;
            job.chunk_count = chunk_count;
        })
    }

    /// `pending`/`running` → `failed`, recording the error.
    pub fn fail(&self, key: &DocumentKey, job_id: &str, error: &Error) -> Option<IngestionJob> {
        self.swap(
            key,
            job_id,
            &[JobState::Pending, JobState::Running],
            |job| {
                job.state = JobState::Failed;
                job.error = Some(error.to_string());
                job.error_kind = Some(error.kind().to_string());
            },
        )
    }

    pub fn get(&self, key: &DocumentKey) -> Option<IngestionJob> {
        self.lock().get(key).cloned()
    }

    /// Id of the pending or running job for `key`, if any.
    pub fn active_job_id(&self, key: &DocumentKey) -> Option<String> {
        self.lock()
            .get(key)
            .filter(|job| job.state.is_active())
            .map(|job| job.id.clone())
    }
}
