use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use url::Url;

use crate::auth::Token;
use crate::error::{PipewatchError, Result};

pub(super) const PAGE_SIZE: usize = 20;
const PRIVATE_TOKEN_HEADER: &str = "PRIVATE-TOKEN";

/// Thin REST client for the GitLab v4 API.
///
/// Holds no state beyond connection settings; every call is independent and
/// nothing is retried here. Callers decide whether to try again.
#[derive(Clone)]
pub struct GitLabClient {
    client: Client,
    api_url: Url,
    token: Token,
}

impl GitLabClient {
    /// Builds a client for one operation.
    ///
    /// # Errors
    ///
    /// Returns `ConfigMissing` when the base URL or token is absent or blank,
    /// and `Config` when the base URL cannot be parsed.
    pub fn new(client: Client, base_url: Option<&str>, token: Option<&Token>) -> Result<Self> {
        let base_url = base_url
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| PipewatchError::ConfigMissing("GitLab base URL is not set".into()))?;

        let token = token
            .filter(|token| !token.is_empty())
            .cloned()
            .ok_or_else(|| {
                PipewatchError::ConfigMissing("GitLab personal access token is not set".into())
            })?;

        let api_url = Url::parse(&format!("{}/", base_url.trim_end_matches('/')))
            .map_err(|e| PipewatchError::Config(format!("Invalid base URL: {e}")))?
            .join("api/v4/")
            .map_err(|e| PipewatchError::Config(format!("Invalid API base URL: {e}")))?;

        Ok(Self {
            client,
            api_url,
            token,
        })
    }

    /// Shared HTTP client; the timeout turns a hung request into a normal fetch failure.
    pub fn http_client(timeout: Duration) -> Result<Client> {
        Client::builder()
            .user_agent(concat!("pipewatch/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| PipewatchError::Config(format!("Failed to create HTTP client: {e}")))
    }

    pub fn api_url(&self) -> &Url {
        &self.api_url
    }

    /// Helper to build authenticated requests
    pub fn auth_request(&self, request: RequestBuilder) -> RequestBuilder {
        request.header(PRIVATE_TOKEN_HEADER, self.token.as_str())
    }

    /// Construct project base URL
    pub fn project_url(&self, project_id: u64) -> Result<Url> {
        self.api_url
            .join(&format!("projects/{project_id}/"))
            .map_err(|e| PipewatchError::Config(format!("Invalid project URL: {e}")))
    }

    pub(super) fn endpoint(&self, project_id: u64, path: &str) -> Result<Url> {
        self.project_url(project_id)?
            .join(path)
            .map_err(|e| PipewatchError::Config(format!("Invalid endpoint URL: {e}")))
    }

    pub(super) async fn get_json<T>(&self, url: Url) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let response = self.send(self.client.get(url)).await?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    pub(super) async fn get_text(&self, url: Url) -> Result<String> {
        let response = self.send(self.client.get(url)).await?;
        Ok(response.text().await?)
    }

    pub(super) async fn post(&self, url: Url) -> Result<()> {
        self.send(self.client.post(url).json(&serde_json::json!({})))
            .await?;
        Ok(())
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = self.auth_request(request).send().await?;
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(PipewatchError::Api {
                status: status.as_u16(),
                message: error_text,
            });
        }

        Ok(response)
    }
}
