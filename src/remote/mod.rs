pub mod pocket;
pub mod wire;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{Credential, Item, MutationOp};

pub use pocket::PocketClient;

/// Failures a remote call can produce. The client never retries.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("Remote service rejected the access token")]
    Unauthorized,

    #[error("Rate limited by remote service")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

impl ApiError {
    /// Worth one more attempt with the same credential.
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Network(_) | ApiError::RateLimited { .. })
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ApiError::MalformedResponse(e.to_string())
        } else {
            ApiError::Network(e.to_string())
        }
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Offset into the remote item listing.
pub type Cursor = u32;

#[derive(Debug, Clone, Default)]
pub struct ItemPage {
    pub items: Vec<Item>,
    /// Absent once the listing is exhausted.
    pub next_cursor: Option<Cursor>,
}

/// Item-list and item-mutation endpoints.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn fetch_items(
        &self,
        credential: &Credential,
        cursor: Option<Cursor>,
    ) -> ApiResult<ItemPage>;

    async fn mutate(&self, credential: &Credential, item_id: &str, op: MutationOp)
        -> ApiResult<()>;

    /// Save a new URL; returns the item as the remote service recorded it.
    async fn add(&self, credential: &Credential, url: &str) -> ApiResult<Item>;
}

/// Token issuance and exchange endpoints used by the auth flow.
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// Returns the request token code.
    async fn request_token(&self, redirect_uri: &str) -> ApiResult<String>;

    async fn access_token(&self, code: &str) -> ApiResult<Credential>;
}
