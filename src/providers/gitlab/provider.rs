use log::{debug, info};
use parking_lot::Mutex;

use crate::config::GitLabConfig;
use crate::error::{PipewatchError, Result};
use crate::providers::gitlab::client::GitLabClient;

use super::remote;
use super::types::{GitLabJob, GitLabPipeline};

/// Resolves and remembers which project the workspace belongs to.
///
/// An explicit `project-id` always wins. Otherwise the ID is detected once
/// from the workspace git remote and kept for the lifetime of the process;
/// failed detections are retried on the next operation.
#[derive(Default)]
pub struct ProjectResolver {
    detected: Mutex<Option<u64>>,
}

impl ProjectResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn detected(&self) -> Option<u64> {
        *self.detected.lock()
    }

    pub async fn resolve(&self, client: &GitLabClient, config: &GitLabConfig) -> Result<u64> {
        if let Some(id) = config.project_id {
            return Ok(id);
        }

        if let Some(id) = self.detected() {
            return Ok(id);
        }

        let project_path = remote::detect_project_path(&config.workspace_dir())?;
        debug!("Looking up GitLab project '{project_path}'");

        let project = client.find_project(&project_path).await.map_err(|e| {
            PipewatchError::ProjectIdUnresolved(format!("project lookup for '{project_path}' failed: {e}"))
        })?;

        info!("Detected GitLab project {} ({})", project.id, project.path_with_namespace);
        *self.detected.lock() = Some(project.id);
        Ok(project.id)
    }
}

/// A gateway bound to one project for the duration of a single operation.
///
/// Built fresh from the current configuration each time, so credential or
/// URL changes apply to the next poll without restarting anything.
pub struct GitLabProvider {
    pub client: GitLabClient,
    pub project_id: u64,
}

impl GitLabProvider {
    /// Validates configuration and resolves the project ID.
    ///
    /// # Errors
    ///
    /// Returns `ConfigMissing` when the base URL or token is absent, and
    /// `ProjectIdUnresolved` when no project ID is configured and detection fails.
    pub async fn connect(
        http: reqwest::Client,
        config: &GitLabConfig,
        resolver: &ProjectResolver,
    ) -> Result<Self> {
        let client = GitLabClient::new(
            http,
            config.base_url.as_deref(),
            config.personal_access_token.as_ref(),
        )?;
        let project_id = resolver.resolve(&client, config).await?;

        Ok(Self { client, project_id })
    }

    pub async fn list_pipelines(&self) -> Result<Vec<GitLabPipeline>> {
        self.client.list_pipelines(self.project_id).await
    }

    pub async fn list_jobs(&self, pipeline_id: u64) -> Result<Vec<GitLabJob>> {
        self.client.list_jobs(self.project_id, pipeline_id).await
    }

    /// Fetches job metadata and its log concurrently.
    pub async fn job_snapshot(&self, job_id: u64) -> Result<(GitLabJob, String)> {
        tokio::try_join!(
            self.client.get_job(self.project_id, job_id),
            self.client.get_job_log(self.project_id, job_id),
        )
    }

    pub async fn retry_pipeline(&self, pipeline_id: u64) -> Result<()> {
        self.client.retry_pipeline(self.project_id, pipeline_id).await
    }

    pub async fn cancel_pipeline(&self, pipeline_id: u64) -> Result<()> {
        self.client.cancel_pipeline(self.project_id, pipeline_id).await
    }

    pub async fn retry_job(&self, job_id: u64) -> Result<()> {
        self.client.retry_job(self.project_id, job_id).await
    }

    pub async fn cancel_job(&self, job_id: u64) -> Result<()> {
        self.client.cancel_job(self.project_id, job_id).await
    }
}
