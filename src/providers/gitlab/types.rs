use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A GitLab CI/CD pipeline as returned by `GET /projects/:id/pipelines`.
///
/// Only the status changes between polls; the rest is treated as immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitLabPipeline {
    pub id: u64,
    /// Raw status string (e.g. "running", "success")
    pub status: String,
    /// Git reference that triggered the pipeline
    #[serde(rename = "ref", default)]
    pub ref_: String,
    #[serde(default)]
    pub web_url: String,
    pub created_at: DateTime<Utc>,
}

/// A job within a GitLab CI/CD pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitLabJob {
    pub id: u64,
    /// Job name as defined in .gitlab-ci.yml
    pub name: String,
    /// Stage this job belongs to
    #[serde(default)]
    pub stage: String,
    pub status: String,
    #[serde(default)]
    pub web_url: String,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Project lookup result, used to turn a `group/project` path into an ID.
#[derive(Debug, Clone, Deserialize)]
pub struct GitLabProject {
    pub id: u64,
    #[serde(default)]
    pub path_with_namespace: String,
}
