use log::debug;

use super::core::{GitLabClient, PAGE_SIZE};
use crate::error::Result;
use crate::providers::gitlab::types::{GitLabJob, GitLabPipeline};

impl GitLabClient {
    /// Lists the newest pipelines of a project, newest first.
    ///
    /// Page size and ordering are fixed: one page of 20, ordered by id descending.
    pub async fn list_pipelines(&self, project_id: u64) -> Result<Vec<GitLabPipeline>> {
        let mut url = self.endpoint(project_id, "pipelines")?;
        url.query_pairs_mut()
            .append_pair("per_page", &PAGE_SIZE.to_string())
            .append_pair("order_by", "id")
            .append_pair("sort", "desc");

        let pipelines: Vec<GitLabPipeline> = self.get_json(url).await?;
        debug!("Fetched {} pipelines for project {project_id}", pipelines.len());
        Ok(pipelines)
    }

    pub async fn list_jobs(&self, project_id: u64, pipeline_id: u64) -> Result<Vec<GitLabJob>> {
        let url = self.endpoint(project_id, &format!("pipelines/{pipeline_id}/jobs"))?;
        let jobs: Vec<GitLabJob> = self.get_json(url).await?;
        debug!("Fetched {} jobs for pipeline #{pipeline_id}", jobs.len());
        Ok(jobs)
    }

    pub async fn retry_pipeline(&self, project_id: u64, pipeline_id: u64) -> Result<()> {
        let url = self.endpoint(project_id, &format!("pipelines/{pipeline_id}/retry"))?;
        self.post(url).await
    }

    pub async fn cancel_pipeline(&self, project_id: u64, pipeline_id: u64) -> Result<()> {
        let url = self.endpoint(project_id, &format!("pipelines/{pipeline_id}/cancel"))?;
        self.post(url).await
    }
}
