use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub const PENDING_UPDATE_KEY: &str = "pending-update";
pub const FAILED_UPDATES_KEY: &str = "failed-updates";
pub const LATEST_ROLLBACK_INFO_KEY: &str = "latest-rollback-info";
pub const LAST_DEPLOYMENT_REPORT_KEY: &str = "last-deployment-report";
pub const RETRY_DEPLOYMENT_REPORT_KEY: &str = "retry-deployment-report";

/// Flat durable key/value directory. Every record lives in its own file
/// named `<instance>_<logical>.json`; the instance key prefix is what keeps
/// independent agent instances from colliding in one shared directory.
/// Writes complete before the call returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreferenceDir {
    root: PathBuf,
}

impl PreferenceDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entry_path(&self, instance: &str, logical: &str) -> PathBuf {
        self.root.join(format!("{instance}_{logical}.json"))
    }

    pub fn read(&self, instance: &str, logical: &str) -> Result<Option<String>> {
        let path = self.entry_path(instance, logical);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err)
                .with_context(|| format!("failed reading state entry: {}", path.display())),
        }
    }

    pub fn write(&self, instance: &str, logical: &str, value: &str) -> Result<()> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("failed creating state root: {}", self.root.display()))?;
        let path = self.entry_path(instance, logical);
        fs::write(&path, value)
            .with_context(|| format!("failed writing state entry: {}", path.display()))
    }

    pub fn remove(&self, instance: &str, logical: &str) -> Result<()> {
        let path = self.entry_path(instance, logical);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err)
                .with_context(|| format!("failed removing state entry: {}", path.display())),
        }
    }
}
