//! Capabilities the rule engine reads through.
//!
//! The engine never talks to a network client directly; collaborators
//! implement these traits and may retry or back off underneath them. Each call
//! is treated as one blocking operation that either returns or fails.

use async_trait::async_trait;
use crate::data::types::{MarketRef, OtherMarket, OutcomeValue, PullRef, PullRequest, UserStats};
use crate::market::CreationRequest;

#[derive(Debug, thiserror::Error)]
pub enum AccessorError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unexpected response: {0}")]
    Unexpected(String),
}

impl AccessorError {
    /// Collapse an anyhow chain from a client into a request failure
    pub fn request(err: anyhow::Error) -> Self {
        AccessorError::Request(format!("{:#}", err))
    }
}

/// Reads against the market platform
#[async_trait]
pub trait MarketAccessor: Send + Sync {
    /// Live probability, value or distribution of a managed market
    async fn get_current_value(&self, market: &MarketRef) -> Result<OutcomeValue, AccessorError>;

    /// Any market on the platform, looked up by URL
    async fn get_other_market(&self, url: &str) -> Result<OtherMarket, AccessorError>;

    /// Fresh platform snapshot of a managed market
    async fn get_market(&self, id: &str) -> Result<MarketRef, AccessorError>;

    /// Cached profit and created volume of a user, looked up by username
    async fn get_user(&self, username: &str) -> Result<UserStats, AccessorError>;
}

/// Reads against the source-hosting platform
#[async_trait]
pub trait SourceHostAccessor: Send + Sync {
    async fn get_pull_request(&self, pull: &PullRef) -> Result<PullRequest, AccessorError>;
}

/// Writes against the market platform
#[async_trait]
pub trait Applier: Send + Sync {
    async fn resolve(&self, market: &MarketRef, value: &OutcomeValue) -> anyhow::Result<()>;

    async fn cancel(&self, market: &MarketRef) -> anyhow::Result<()>;

    /// Create the market on the platform and return its snapshot
    async fn create_market(&self, request: &CreationRequest) -> anyhow::Result<MarketRef>;
}
