use super::core::GitLabClient;
use crate::error::Result;
use crate::providers::gitlab::types::GitLabJob;

impl GitLabClient {
    pub async fn get_job(&self, project_id: u64, job_id: u64) -> Result<GitLabJob> {
        let url = self.endpoint(project_id, &format!("jobs/{job_id}"))?;
        self.get_json(url).await
    }

    /// Raw job trace, ANSI escapes included.
    pub async fn get_job_log(&self, project_id: u64, job_id: u64) -> Result<String> {
        let url = self.endpoint(project_id, &format!("jobs/{job_id}/trace"))?;
        self.get_text(url).await
    }

    pub async fn retry_job(&self, project_id: u64, job_id: u64) -> Result<()> {
        let url = self.endpoint(project_id, &format!("jobs/{job_id}/retry"))?;
        self.post(url).await
    }

    pub async fn cancel_job(&self, project_id: u64, job_id: u64) -> Result<()> {
        let url = self.endpoint(project_id, &format!("jobs/{job_id}/cancel"))?;
        self.post(url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Token;
    use crate::error::PipewatchError;

    fn client_for(server: &mockito::Server) -> GitLabClient {
        GitLabClient::new(
            reqwest::Client::new(),
            Some(&server.url()),
            Some(&Token::from("secret")),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_get_job_and_log() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v4/projects/3/jobs/40")
            .match_header("private-token", "secret")
            .with_status(200)
            .with_body(r#"{"id": 40, "name": "test", "stage": "test", "status": "running", "web_url": "w"}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/api/v4/projects/3/jobs/40/trace")
            .with_status(200)
            .with_header("content-type", "text/plain")
            .with_body("\u{1b}[32mok\u{1b}[0m\n")
            .create_async()
            .await;

        let client = client_for(&server);
        let job = client.get_job(3, 40).await.unwrap();
        let log = client.get_job_log(3, 40).await.unwrap();

        assert_eq!(job.status, "running");
        assert!(log.contains("ok"));
    }

    #[tokio::test]
    async fn test_cancel_job_failure_is_reported() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v4/projects/3/jobs/40/cancel")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let result = client_for(&server).cancel_job(3, 40).await;
        assert!(matches!(result, Err(PipewatchError::Api { status: 500, .. })));
    }

    #[tokio::test]
    async fn test_retry_job_posts_once() {
        let mut server = mockito::Server::new_async().await;
        let retry = server
            .mock("POST", "/api/v4/projects/3/jobs/40/retry")
            .with_status(201)
            .with_body("{}")
            .expect(1)
            .create_async()
            .await;

        tokio_test::assert_ok!(client_for(&server).retry_job(3, 40).await);
        retry.assert_async().await;
    }
}
