use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::app::error::{PocketSyncError, Result};
use crate::auth::{AuthFlow, CredentialStore, InvalidateOnReauth};
use crate::config::{Config, CONSUMER_KEY_ENV};
use crate::domain::Credential;
use crate::remote::{AuthApi, PocketClient, RemoteApi};
use crate::store::{ItemStore, SqliteStore, StoreOptions};
use crate::view::ViewManager;
use tracing::error;

const DATABASE_FILE: &str = "items.db";
const CREDENTIAL_FILE: &str = "credential.json";

/// Wires the credential store, auth flow, item store and view manager
/// together for one process.
pub struct AppContext {
    pub config: Config,
    pub credentials: Arc<CredentialStore>,
    pub auth: AuthFlow,
    pub store: ItemStore,
    pub views: ViewManager,
    data_dir: PathBuf,
}

impl AppContext {
    pub fn new(config: Config, data_dir: Option<PathBuf>) -> Result<Self> {
        let client = Arc::new(
            PocketClient::new(&config.pocket)?.with_page_size(config.sync.page_size),
        );
        Self::with_remote(config, data_dir, client.clone(), client)
    }

    pub fn with_remote(
        config: Config,
        data_dir: Option<PathBuf>,
        remote: Arc<dyn RemoteApi>,
        auth_api: Arc<dyn AuthApi>,
    ) -> Result<Self> {
        let data_dir = match data_dir {
            Some(p) => p,
            None => Self::default_data_dir()?,
        };
        std::fs::create_dir_all(&data_dir)?;

        let credentials = Arc::new(CredentialStore::new(data_dir.join(CREDENTIAL_FILE)));
        let auth = AuthFlow::new(
            auth_api,
            &config.pocket.api_base,
            &config.pocket.redirect_uri,
            Duration::from_secs(config.auth.request_token_ttl_secs),
        )?;

        let storage = SqliteStore::new(Self::database_path_in(&data_dir))?;
        let store = ItemStore::open(
            Box::new(storage),
            remote,
            StoreOptions::from_config(&config.sync),
        )?;
        store.subscribe(Arc::new(InvalidateOnReauth(credentials.clone())));

        let views = ViewManager::new(store.clone());

        Ok(Self {
            config,
            credentials,
            auth,
            store,
            views,
            data_dir,
        })
    }

    pub fn default_data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| PocketSyncError::Config("Could not find data directory".into()))?;
        Ok(data_dir.join("pocket-sync"))
    }

    pub fn database_path_in(data_dir: &Path) -> PathBuf {
        data_dir.join(DATABASE_FILE)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn require_consumer_key(&self) -> Result<()> {
        if self.config.pocket.consumer_key.is_empty() {
            return Err(PocketSyncError::Config(format!(
                "No consumer key; set pocket.consumer_key in the config file or {}",
                CONSUMER_KEY_ENV
            )));
        }
        Ok(())
    }

    /// The stored credential, for commands that talk to the remote service.
    pub fn require_credential(&self) -> Result<Credential> {
        self.require_consumer_key()?;
        self.credentials
            .load()?
            .ok_or(PocketSyncError::NotAuthenticated)
    }

    /// Load the credential and re-send changes left pending by an earlier run.
    pub fn connect(&self) -> Result<Credential> {
        let credential = self.require_credential()?;
        self.store.resume_pending(&credential)?;
        Ok(credential)
    }

    /// Unload views first, then close the store.
    pub async fn shutdown(&self) -> Result<()> {
        self.views.clear_views();
        self.store.close().await
    }
}

/// Combine a command's result with the outcome of closing the store. The
/// command's own error wins; a close failure behind it is only logged.
pub fn keep_command_error<T>(result: Result<T>, closed: Result<()>) -> Result<T> {
    match (result, closed) {
        (Err(e), Err(close_err)) => {
            error!("Failed to close the item store: {}", close_err);
            Err(e)
        }
        (result, closed) => {
            closed?;
            result
        }
    }
}
