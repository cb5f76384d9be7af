use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::app::{PocketSyncError, Result};
use crate::domain::{Credential, Item};
use crate::store::{Notice, Observer};

/// File-backed home of the single access credential.
///
/// Only the auth completion handler and logout write here; last write wins.
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when nothing has been saved yet.
    pub fn load(&self) -> Result<Option<Credential>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let credential: Credential = serde_json::from_str(&content).map_err(|e| {
            PocketSyncError::StoreCorrupt(format!("{}: {}", self.path.display(), e))
        })?;

        if credential.access_token.is_empty() {
            return Err(PocketSyncError::StoreCorrupt(format!(
                "{}: empty access token",
                self.path.display()
            )));
        }

        Ok(Some(credential))
    }

    pub fn save(&self, credential: &Credential) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(credential)
            .map_err(|e| PocketSyncError::Other(e.to_string()))?;

        // Write beside the target and rename so a crash never leaves half a file.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content)?;
        restrict_permissions(&tmp)?;
        fs::rename(&tmp, &self.path)?;

        tracing::info!("Saved credential for {}", credential.username);
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Drop a credential the remote service no longer accepts.
    pub fn invalidate(&self) -> Result<()> {
        tracing::warn!("Credential rejected by remote service; clearing it");
        self.clear()
    }
}

/// Clears the credential as soon as the item store reports it was rejected.
pub struct InvalidateOnReauth(pub Arc<CredentialStore>);

impl Observer for InvalidateOnReauth {
    fn on_change(&self, _items: Arc<[Item]>) {}

    fn on_notice(&self, notice: &Notice) {
        if *notice == Notice::ReauthRequired {
            if let Err(e) = self.0.invalidate() {
                tracing::error!("Failed to clear rejected credential: {}", e);
            }
        }
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
