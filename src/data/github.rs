use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use crate::data::accessor::{AccessorError, SourceHostAccessor};
use crate::data::types::{PrState, PullRef, PullRequest};

/// Pull request lookups against the GitHub REST API
pub struct GithubClient {
    client: Client,
    base_url: String,
    auth: Option<(String, String)>,
}

#[derive(Debug, Deserialize)]
struct ApiPull {
    state: String,
    #[serde(default)]
    merged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    closed_at: Option<DateTime<Utc>>,
}

impl From<ApiPull> for PullRequest {
    fn from(pull: ApiPull) -> Self {
        let state = if pull.merged_at.is_some() {
            PrState::Merged
        } else if pull.state == "closed" {
            PrState::Closed
        } else {
            PrState::Open
        };
        PullRequest {
            state,
            merged_at: pull.merged_at,
            closed_at: pull.closed_at,
        }
    }
}

impl GithubClient {
    /// `auth` is a username and token pair; lookups go unauthenticated without it
    pub fn new(base_url: String, auth: Option<(String, String)>, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("Failed to build source host HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
        })
    }

    async fn fetch(&self, pull: &PullRef) -> Result<Option<ApiPull>> {
        let url = format!(
            "{}/repos/{}/{}/pulls/{}",
            self.base_url, pull.owner, pull.repo, pull.number
        );
        debug!("GET {}", url);

        let mut request = self
            .client
            .get(&url)
            .header("User-Agent", "market-resolver/0.1")
            .header("Accept", "application/vnd.github+json");
        if let Some((user, token)) = &self.auth {
            request = request.basic_auth(user, Some(token));
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to fetch {}", pull))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let pull = response
            .error_for_status()?
            .json()
            .await
            .with_context(|| format!("Failed to parse pull request {}", pull))?;
        Ok(Some(pull))
    }
}

#[async_trait]
impl SourceHostAccessor for GithubClient {
    async fn get_pull_request(&self, pull: &PullRef) -> Result<PullRequest, AccessorError> {
        match self.fetch(pull).await.map_err(AccessorError::request)? {
            Some(found) => Ok(found.into()),
            None => Err(AccessorError::NotFound(pull.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pull(value: serde_json::Value) -> PullRequest {
        serde_json::from_value::<ApiPull>(value).unwrap().into()
    }

    #[test]
    fn test_open_pull() {
        let pr = pull(json!({ "state": "open", "merged_at": null, "closed_at": null }));
        assert_eq!(pr.state, PrState::Open);
        assert!(!pr.state.is_terminal());
    }

    #[test]
    fn test_merged_pull() {
        let pr = pull(json!({
            "state": "closed",
            "merged_at": "2024-03-01T12:00:00Z",
            "closed_at": "2024-03-01T12:00:00Z",
        }));
        assert_eq!(pr.state, PrState::Merged);
        assert_eq!(pr.merged_at.map(|t| t.timestamp()), Some(1_709_294_400));
    }

    #[test]
    fn test_closed_without_merge() {
        let pr = pull(json!({ "state": "closed", "closed_at": "2024-03-01T12:00:00Z" }));
        assert_eq!(pr.state, PrState::Closed);
        assert!(pr.merged_at.is_none());
    }
}
