use std::collections::{HashMap, HashSet};

use log::debug;

use crate::providers::gitlab::GitLabJob;
use crate::status::is_active;

/// In-memory job cache and last-seen status tables.
///
/// Job lists are kept per pipeline while that pipeline is expanded. A cached
/// list is served without a network call unless the pipeline still has active
/// jobs, in which case it is always fetched live. Nothing here is persisted.
///
/// Every collapse bumps the pipeline's epoch, so a job list requested before
/// the collapse can be recognised and dropped when it arrives afterwards.
#[derive(Debug, Default)]
pub struct JobCache {
    jobs: HashMap<u64, Vec<GitLabJob>>,
    pipeline_status: HashMap<u64, String>,
    job_status: HashMap<u64, String>,
    job_pipeline: HashMap<u64, u64>,
    refreshing: HashSet<u64>,
    epochs: HashMap<u64, u64>,
}

impl JobCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached jobs of a pipeline that no longer needs live polling.
    pub fn cached_jobs(&self, pipeline_id: u64) -> Option<Vec<GitLabJob>> {
        if self.refreshing.contains(&pipeline_id) {
            return None;
        }

        self.jobs.get(&pipeline_id).map(|jobs| {
            debug!("Cache hit for pipeline #{pipeline_id}");
            jobs.clone()
        })
    }

    /// Last stored jobs regardless of refresh state, for showing stale data after an error.
    pub fn last_jobs(&self, pipeline_id: u64) -> Vec<GitLabJob> {
        self.jobs.get(&pipeline_id).cloned().unwrap_or_default()
    }

    /// Stores a freshly fetched job list and updates the refresh set.
    ///
    /// Returns true when at least one job is still active.
    pub fn store_jobs(&mut self, pipeline_id: u64, jobs: Vec<GitLabJob>) -> bool {
        let has_active = jobs.iter().any(|job| is_active(&job.status));

        if has_active {
            self.refreshing.insert(pipeline_id);
        } else {
            self.refreshing.remove(&pipeline_id);
        }

        for job in &jobs {
            self.job_pipeline.insert(job.id, pipeline_id);
        }

        self.jobs.insert(pipeline_id, jobs);
        has_active
    }

    /// Records the latest pipeline status and returns the previous one.
    pub fn record_pipeline_status(&mut self, pipeline_id: u64, status: &str) -> Option<String> {
        self.pipeline_status.insert(pipeline_id, status.to_string())
    }

    /// Records the latest job status and returns the previous one.
    pub fn record_job_status(&mut self, job_id: u64, status: &str) -> Option<String> {
        self.job_status.insert(job_id, status.to_string())
    }

    /// Drops everything known about a collapsed pipeline's jobs.
    ///
    /// Returns true when no pipeline needs job polling any more.
    pub fn collapse(&mut self, pipeline_id: u64) -> bool {
        *self.epochs.entry(pipeline_id).or_default() += 1;
        self.jobs.remove(&pipeline_id);
        self.refreshing.remove(&pipeline_id);

        let job_status = &mut self.job_status;
        self.job_pipeline.retain(|job_id, owner| {
            if *owner == pipeline_id {
                job_status.remove(job_id);
                false
            } else {
                true
            }
        });

        self.refreshing.is_empty()
    }

    /// Collapse count of a pipeline; compare before and after a fetch.
    pub fn epoch(&self, pipeline_id: u64) -> u64 {
        self.epochs.get(&pipeline_id).copied().unwrap_or_default()
    }

    /// Forces the next job request for a cached pipeline to go to the network.
    ///
    /// Returns false if nothing was cached or a live fetch is already due.
    pub fn invalidate(&mut self, pipeline_id: u64) -> bool {
        if self.is_refreshing(pipeline_id) || !self.jobs.contains_key(&pipeline_id) {
            return false;
        }
        self.refreshing.insert(pipeline_id)
    }

    pub fn is_refreshing(&self, pipeline_id: u64) -> bool {
        self.refreshing.contains(&pipeline_id)
    }

    pub fn has_refreshing(&self) -> bool {
        !self.refreshing.is_empty()
    }

    pub fn pipeline_of(&self, job_id: u64) -> Option<u64> {
        self.job_pipeline.get(&job_id).copied()
    }
}

#[cfg(test)]
impl JobCache {
    pub fn pipeline_status(&self, pipeline_id: u64) -> Option<&str> {
        self.pipeline_status.get(&pipeline_id).map(String::as_str)
    }

    pub fn job_status(&self, job_id: u64) -> Option<&str> {
        self.job_status.get(&job_id).map(String::as_str)
    }
}
