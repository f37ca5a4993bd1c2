use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

use otapush_core::{PackageMetadata, UpdateError};

use crate::layout::{
    PreferenceDir, FAILED_UPDATES_KEY, LATEST_ROLLBACK_INFO_KEY, PENDING_UPDATE_KEY,
};

/// A package selected to run but not yet confirmed stable. `is_loading`
/// flips to true the moment the package is about to run; the record is
/// removed on confirmed-ready or rollback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingUpdate {
    #[serde(rename = "hash")]
    pub package_hash: String,
    #[serde(rename = "isLoading")]
    pub is_loading: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackInfo {
    pub package_hash: String,
    pub count: u32,
    /// Unix millis of the most recent rollback of this hash.
    pub time: u64,
}

/// Durable settings of the update lifecycle, namespaced by instance key.
///
/// Read paths tolerate corrupt stored bytes (log and treat as absent, or
/// self-heal to the empty list) so stale data can never break startup.
/// Write paths and the boolean queries that gate side effects treat the
/// same corruption as a data-integrity fault instead: stacking new state on
/// top of bytes we cannot read would silently void the dedup guarantees.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    prefs: PreferenceDir,
}

impl SettingsStore {
    pub fn new(prefs: PreferenceDir) -> Self {
        Self { prefs }
    }

    pub fn preference_dir(&self) -> &PreferenceDir {
        &self.prefs
    }

    /// Soft variant: any unreadable record is reported as absent. Startup
    /// must never be blocked by stale bytes.
    pub fn pending_update(&self, instance: &str) -> Option<PendingUpdate> {
        match self.pending_update_checked(instance) {
            Ok(pending) => pending,
            Err(err) => {
                warn!(instance, error = %err, "unable to read pending update metadata");
                None
            }
        }
    }

    /// Checked variant for callers whose next step is a state transition:
    /// bytes that are not JSON at all read as absent (stale garbage), but a
    /// JSON record of the wrong shape is a data-integrity fault, since it
    /// was plausibly written by a newer or corrupted peer.
    pub fn pending_update_checked(&self, instance: &str) -> Result<Option<PendingUpdate>> {
        let Some(raw) = self.prefs.read(instance, PENDING_UPDATE_KEY)? else {
            return Ok(None);
        };
        let Ok(value) = serde_json::from_str::<serde_json::Value>(&raw) else {
            warn!(instance, %raw, "unable to parse stored pending update metadata");
            return Ok(None);
        };
        let pending = serde_json::from_value(value).map_err(|_| {
            UpdateError::data_integrity("unable to read pending update metadata")
        })?;
        Ok(Some(pending))
    }

    pub fn save_pending_update(
        &self,
        package_hash: &str,
        is_loading: bool,
        instance: &str,
    ) -> Result<()> {
        let pending = PendingUpdate {
            package_hash: package_hash.to_string(),
            is_loading,
        };
        let raw = serde_json::to_string(&pending)?;
        self.prefs.write(instance, PENDING_UPDATE_KEY, &raw)
    }

    pub fn remove_pending_update(&self, instance: &str) -> Result<()> {
        self.prefs.remove(instance, PENDING_UPDATE_KEY)
    }

    /// True only when a pending update exists, has finished its loading
    /// handshake (`is_loading == false`), and matches `package_hash` when
    /// one is given. A stored record that is JSON but not a pending-update
    /// shape is a data-integrity fault here, unlike `pending_update`: this
    /// query gates side effects.
    pub fn is_pending_update(&self, package_hash: Option<&str>, instance: &str) -> Result<bool> {
        let Some(pending) = self.pending_update_checked(instance)? else {
            return Ok(false);
        };
        Ok(!pending.is_loading
            && package_hash.is_none_or(|hash| pending.package_hash == hash))
    }

    /// Self-healing: an unparsable stored list is rewritten as the empty
    /// list so subsequent reads recover.
    pub fn failed_updates(&self, instance: &str) -> Vec<PackageMetadata> {
        let raw = match self.prefs.read(instance, FAILED_UPDATES_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(err) => {
                warn!(instance, error = %err, "unable to read failed updates list");
                return Vec::new();
            }
        };
        match serde_json::from_str(&raw) {
            Ok(list) => list,
            Err(_) => {
                warn!(instance, %raw, "resetting unrecognized failed updates list");
                if let Err(err) = self.prefs.write(instance, FAILED_UPDATES_KEY, "[]") {
                    warn!(instance, error = %err, "unable to reset failed updates list");
                }
                Vec::new()
            }
        }
    }

    pub fn is_failed_hash(&self, package_hash: &str, instance: &str) -> Result<bool> {
        for failed in self.failed_updates(instance) {
            let failed_hash = failed.package_hash.as_deref().ok_or_else(|| {
                UpdateError::data_integrity("stored failed update record is missing its hash")
            })?;
            if failed_hash == package_hash {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Appends `package` to the failed list unless its hash is already
    /// present. The write path never self-heals: an unparsable existing
    /// list is a data-integrity fault.
    pub fn save_failed_update(&self, package: &PackageMetadata, instance: &str) -> Result<()> {
        let package_hash = package.package_hash.as_deref().ok_or_else(|| {
            UpdateError::data_integrity("failed package snapshot is missing its hash")
        })?;
        if self.is_failed_hash(package_hash, instance)? {
            return Ok(());
        }

        let mut failed_updates: Vec<PackageMetadata> =
            match self.prefs.read(instance, FAILED_UPDATES_KEY)? {
                None => Vec::new(),
                Some(raw) => serde_json::from_str(&raw).map_err(|_| {
                    UpdateError::data_integrity(format!(
                        "unable to parse stored failed updates list: {raw}"
                    ))
                })?,
            };

        failed_updates.push(package.clone());
        let raw = serde_json::to_string(&failed_updates)?;
        self.prefs.write(instance, FAILED_UPDATES_KEY, &raw)
    }

    pub fn remove_failed_updates(&self, instance: &str) -> Result<()> {
        self.prefs.remove(instance, FAILED_UPDATES_KEY)
    }

    pub fn latest_rollback_info(&self, instance: &str) -> Option<RollbackInfo> {
        let raw = match self.prefs.read(instance, LATEST_ROLLBACK_INFO_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                warn!(instance, error = %err, "unable to read latest rollback metadata");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(info) => Some(info),
            Err(_) => {
                warn!(instance, %raw, "unable to parse stored latest rollback metadata");
                None
            }
        }
    }

    /// Records a rollback of `package_hash`: a consecutive repeat of the
    /// same hash increments the count, any other hash restarts it at 1.
    /// The timestamp is refreshed on every write.
    pub fn set_latest_rollback_info(&self, package_hash: &str, instance: &str) -> Result<()> {
        let count = match self.latest_rollback_info(instance) {
            Some(info) if info.package_hash == package_hash => info.count,
            _ => 0,
        };
        let info = RollbackInfo {
            package_hash: package_hash.to_string(),
            count: count + 1,
            time: current_unix_millis(),
        };
        let raw = serde_json::to_string(&info)?;
        self.prefs.write(instance, LATEST_ROLLBACK_INFO_KEY, &raw)
    }
}

fn current_unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
