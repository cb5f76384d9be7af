//! Periodic background sync.
//!
//! Runs a sync cycle on a fixed interval until the item store closes. A cycle
//! is skipped while no credential is stored.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::app::{PocketSyncError, Result};
use crate::auth::CredentialStore;
use crate::config::SyncConfig;
use crate::store::ItemStore;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval: Duration,
    /// Run a cycle immediately instead of waiting one interval.
    pub sync_on_start: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1800),
            sync_on_start: true,
        }
    }
}

/// Upper bound for sync intervals (365d).
const MAX_INTERVAL_SECS: u64 = 365 * 86400;

impl SchedulerConfig {
    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        let secs = Self::parse_interval(&config.interval).map_err(PocketSyncError::Config)?;
        Ok(Self {
            interval: Duration::from_secs(secs),
            ..Self::default()
        })
    }

    /// Parse interval string like "1h", "30m", "6h", "1d"
    pub fn parse_interval(s: &str) -> std::result::Result<u64, String> {
        let s = s.trim().to_lowercase();

        let secs = if let Some(hours) = s.strip_suffix('h') {
            hours
                .parse::<u64>()
                .ok()
                .and_then(|h| h.checked_mul(3600))
                .ok_or_else(|| format!("Invalid hours: {}", hours))
        } else if let Some(minutes) = s.strip_suffix('m') {
            minutes
                .parse::<u64>()
                .ok()
                .and_then(|m| m.checked_mul(60))
                .ok_or_else(|| format!("Invalid minutes: {}", minutes))
        } else if let Some(days) = s.strip_suffix('d') {
            days.parse::<u64>()
                .ok()
                .and_then(|d| d.checked_mul(86400))
                .ok_or_else(|| format!("Invalid days: {}", days))
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>()
                .map_err(|_| format!("Invalid seconds: {}", secs))
        } else {
            s.parse::<u64>()
                .map_err(|_| format!("Invalid interval: {}. Use format like '1h', '30m', '1d'", s))
        }?;

        if secs == 0 {
            return Err("Interval must be greater than zero".to_string());
        }
        if secs > MAX_INTERVAL_SECS {
            return Err(format!("Interval too long: {}. The maximum is 365d", s));
        }
        Ok(secs)
    }

    /// Format interval for display
    pub fn format_interval(secs: u64) -> String {
        if secs >= 86400 && secs.is_multiple_of(86400) {
            format!("{}d", secs / 86400)
        } else if secs >= 3600 && secs.is_multiple_of(3600) {
            format!("{}h", secs / 3600)
        } else if secs >= 60 && secs.is_multiple_of(60) {
            format!("{}m", secs / 60)
        } else {
            format!("{}s", secs)
        }
    }
}

pub struct SyncScheduler {
    store: ItemStore,
    credentials: Arc<CredentialStore>,
    config: SchedulerConfig,
}

impl SyncScheduler {
    pub fn new(store: ItemStore, credentials: Arc<CredentialStore>, config: SchedulerConfig) -> Self {
        Self {
            store,
            credentials,
            config,
        }
    }

    /// Loop until the store starts closing. Returns the number of cycles run.
    pub async fn run(&self) -> usize {
        let mut shutdown = self.store.shutdown_signal();
        if *shutdown.borrow_and_update() {
            return 0;
        }

        info!(
            "Scheduled sync every {}",
            SchedulerConfig::format_interval(self.config.interval.as_secs())
        );

        let mut timer = interval(self.config.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        if !self.config.sync_on_start {
            timer.tick().await; // Skip the first immediate tick
        }

        let mut cycles = 0;
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = timer.tick() => {
                    if !self.run_cycle().await {
                        break;
                    }
                    cycles += 1;
                }
            }
        }

        info!("Scheduled sync stopped after {} cycles", cycles);
        cycles
    }

    /// One sync attempt. Returns false once the store is closed.
    async fn run_cycle(&self) -> bool {
        let credential = match self.credentials.load() {
            Ok(Some(credential)) => credential,
            Ok(None) => {
                debug!("Not logged in; skipping scheduled sync");
                return true;
            }
            Err(e) => {
                warn!("Could not read credential: {}", e);
                return true;
            }
        };

        match self.store.sync(&credential).await {
            Ok(report) => debug!("Scheduled sync: {}", report.summary()),
            Err(PocketSyncError::StoreClosed) => return false,
            Err(e) => warn!("Scheduled sync failed: {}", e),
        }
        true
    }
}
