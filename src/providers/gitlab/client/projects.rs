use super::core::GitLabClient;
use crate::error::{PipewatchError, Result};
use crate::providers::gitlab::types::GitLabProject;

impl GitLabClient {
    /// Looks up a project by its full path (e.g. "group/subgroup/project").
    pub async fn find_project(&self, project_path: &str) -> Result<GitLabProject> {
        let url = self
            .api_url()
            .join(&format!("projects/{}", urlencoding::encode(project_path)))
            .map_err(|e| PipewatchError::Config(format!("Invalid project URL: {e}")))?;
        self.get_json(url).await
    }
}
