use std::fmt;

use crate::providers::gitlab::{GitLabJob, GitLabPipeline};
use crate::status::is_finished;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    /// Severity for a status a pipeline or job has just arrived at.
    ///
    /// Both spellings of cancel(l)ed are accepted here even though only
    /// "canceled" counts as finished.
    pub fn for_status(status: &str) -> Self {
        match status.to_lowercase().as_str() {
            "failed" => Self::Error,
            "canceled" | "cancelled" => Self::Warning,
            _ => Self::Info,
        }
    }
}

/// What the notification is about, for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subject {
    Pipeline { git_ref: String },
    Job { name: String, pipeline_id: u64 },
}

/// A one-shot user-facing event for an entity reaching a finished status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub entity_id: u64,
    pub previous: String,
    pub current: String,
    pub subject: Subject,
    pub severity: Severity,
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.subject {
            Subject::Pipeline { git_ref } => write!(
                f,
                "Pipeline #{} {} → {} ({git_ref})",
                self.entity_id, self.previous, self.current
            ),
            Subject::Job { name, pipeline_id } => write!(
                f,
                "Job {name} (#{}, pipeline #{pipeline_id}) {} → {}",
                self.entity_id, self.previous, self.current
            ),
        }
    }
}

/// Decides whether moving from `previous` to `current` deserves a notification.
///
/// First sightings never notify, unchanged statuses never notify, and only
/// arrivals at a finished status count; running/pending flapping stays quiet.
pub fn is_notable(previous: Option<&str>, current: &str) -> bool {
    match previous {
        None | Some("") => false,
        Some(previous) if previous == current => false,
        Some(_) => is_finished(current),
    }
}

pub fn pipeline_transition(previous: Option<&str>, pipeline: &GitLabPipeline) -> Option<Notification> {
    let previous = previous.filter(|prev| is_notable(Some(*prev), &pipeline.status))?;

    Some(Notification {
        entity_id: pipeline.id,
        previous: previous.to_string(),
        current: pipeline.status.clone(),
        subject: Subject::Pipeline {
            git_ref: pipeline.ref_.clone(),
        },
        severity: Severity::for_status(&pipeline.status),
    })
}

pub fn job_transition(
    previous: Option<&str>,
    job: &GitLabJob,
    pipeline_id: u64,
) -> Option<Notification> {
    let previous = previous.filter(|prev| is_notable(Some(*prev), &job.status))?;

    Some(Notification {
        entity_id: job.id,
        previous: previous.to_string(),
        current: job.status.clone(),
        subject: Subject::Job {
            name: job.name.clone(),
            pipeline_id,
        },
        severity: Severity::for_status(&job.status),
    })
}
