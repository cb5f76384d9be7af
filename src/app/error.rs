use thiserror::Error;

use crate::remote::ApiError;

#[derive(Error, Debug)]
pub enum PocketSyncError {
    #[error("Could not start authorization: {0}")]
    AuthInit(String),

    #[error("Authorization exchange failed: {0}")]
    AuthExchange(String),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Local store is corrupt: {0}")]
    StoreCorrupt(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not authenticated; run `pocket-sync login`")]
    NotAuthenticated,

    #[error("Item not found: {0}")]
    ItemNotFound(String),

    #[error("Item {0} already has a pending change")]
    ItemPending(String),

    #[error("A view is already registered for slot {0}")]
    ViewAlreadyRegistered(String),

    #[error("Item store is closed")]
    StoreClosed,

    #[error("{0}")]
    Other(String),
}

impl PocketSyncError {
    /// True when the remote service rejected the credential.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, PocketSyncError::Api(ApiError::Unauthorized))
    }
}

pub type Result<T> = std::result::Result<T, PocketSyncError>;
