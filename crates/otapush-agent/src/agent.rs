use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use otapush_core::{AgentConfig, PackageMetadata, StatusReport, UpdateError};
use otapush_state::{PreferenceDir, SettingsStore};
use otapush_telemetry::TelemetryManager;

use crate::PackageStore;

/// Which bundle the host should load this session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BundleLocation {
    /// Serve the bundle shipped inside the binary's assets.
    Binary { bundle_file_name: String },
    /// Serve a downloaded package's bundle file.
    Package { path: PathBuf },
}

/// Session-scoped flags, one set per instance key. Recomputed or reset on
/// every process start; never shared between instance keys.
#[derive(Debug, Clone, Copy, Default)]
struct InstanceFlags {
    did_update: bool,
    running_binary: bool,
    need_to_report_rollback: bool,
}

/// The update lifecycle controller: decides binary vs package on startup,
/// arms the crash-before-ready detector, rolls back broken updates, and
/// exposes the session state the bridge layer queries.
///
/// All mutable state is owned by the agent instance; independent agents
/// sharing one state directory stay isolated through instance keys.
pub struct UpdateAgent<S> {
    config: AgentConfig,
    app_version: String,
    test_configuration: bool,
    settings: SettingsStore,
    telemetry: TelemetryManager,
    packages: S,
    instances: HashMap<String, InstanceFlags>,
}

impl<S: PackageStore> UpdateAgent<S> {
    pub fn new(config: AgentConfig, state_root: impl Into<PathBuf>, packages: S) -> Result<Self> {
        config.validate()?;
        let prefs = PreferenceDir::new(state_root);
        let app_version = config.app_version.clone();
        Ok(Self {
            config,
            app_version,
            test_configuration: false,
            settings: SettingsStore::new(prefs.clone()),
            telemetry: TelemetryManager::new(prefs),
            packages,
            instances: HashMap::new(),
        })
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    pub fn telemetry(&self) -> &TelemetryManager {
        &self.telemetry
    }

    pub fn package_store(&self) -> &S {
        &self.packages
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn app_version(&self) -> &str {
        &self.app_version
    }

    /// Test hook: makes the agent compare against a different app version
    /// than the configured one.
    pub fn override_app_version(&mut self, app_version: impl Into<String>) {
        self.app_version = app_version.into();
    }

    /// Test hook: bypasses the app-version equality half of the
    /// latest-package check.
    pub fn set_test_configuration(&mut self, enabled: bool) {
        self.test_configuration = enabled;
    }

    pub fn is_using_test_configuration(&self) -> bool {
        self.test_configuration
    }

    pub fn deployment_key(&self) -> &str {
        &self.config.deployment_key
    }

    pub fn set_deployment_key(&mut self, deployment_key: impl Into<String>) {
        self.config.deployment_key = deployment_key.into();
    }

    pub fn is_debug_mode(&self) -> bool {
        self.config.debug_mode
    }

    pub fn did_update(&self, instance: &str) -> bool {
        self.flags(instance).did_update
    }

    pub fn need_to_report_rollback(&self, instance: &str) -> bool {
        self.flags(instance).need_to_report_rollback
    }

    pub fn set_need_to_report_rollback(&mut self, need_to_report: bool, instance: &str) {
        self.flags_mut(instance).need_to_report_rollback = need_to_report;
    }

    /// Resolves the bundle first so the flag reflects this session even if
    /// no one asked for the bundle path yet.
    pub fn is_running_binary_version(
        &mut self,
        bundle_file_name: &str,
        instance: &str,
    ) -> Result<bool> {
        self.resolve_bundle(bundle_file_name, instance)?;
        Ok(self.flags(instance).running_binary)
    }

    /// Startup reconciliation: detects a crash-before-ready from the last
    /// session and rolls back, or arms the crash detector for a package
    /// that is about to run for the first time.
    pub fn initialize_after_restart(&mut self, instance: &str) -> Result<()> {
        self.flags_mut(instance).did_update = false;

        let Some(pending) = self.settings.pending_update_checked(instance)? else {
            return Ok(());
        };

        let metadata = self.packages.current_package(instance)?;
        if self.should_abandon_reconciliation(metadata.as_ref())? {
            info!(instance, "skipping restart reconciliation, the binary version is newer");
            return Ok(());
        }

        if pending.is_loading {
            // The last session marked this package as about-to-run and
            // never confirmed readiness.
            warn!(
                instance,
                package_hash = %pending.package_hash,
                "update did not finish loading last session, rolling back"
            );
            self.flags_mut(instance).need_to_report_rollback = true;
            self.rollback_package(instance)?;
        } else {
            self.flags_mut(instance).did_update = true;
            // Arm the crash detector: if this session dies before the
            // ready confirmation, the next start rolls back.
            self.settings
                .save_pending_update(&pending.package_hash, true, instance)?;
        }
        Ok(())
    }

    /// Decides which bundle to serve and records the running-binary flag
    /// for the session. A corrupt package manifest degrades to a clean
    /// binary-only state instead of failing the launch.
    pub fn resolve_bundle(
        &mut self,
        bundle_file_name: &str,
        instance: &str,
    ) -> Result<BundleLocation> {
        let package_path =
            match self.packages.current_package_bundle_path(bundle_file_name, instance) {
                Ok(path) => path,
                Err(err) if is_malformed_package_fault(&err) => {
                    warn!(instance, error = %err, "clearing updates after malformed package manifest");
                    self.clear_updates(instance)?;
                    None
                }
                Err(err) => return Err(err),
            };

        let Some(package_path) = package_path else {
            debug!(instance, bundle_file_name, "serving the binary bundle");
            self.flags_mut(instance).running_binary = true;
            return Ok(BundleLocation::Binary {
                bundle_file_name: bundle_file_name.to_string(),
            });
        };

        let metadata = self.packages.current_package(instance)?;
        let package_is_latest = match &metadata {
            Some(metadata) => self.is_package_latest(metadata)?,
            None => false,
        };

        if package_is_latest {
            debug!(instance, path = %package_path.display(), "serving the package bundle");
            self.flags_mut(instance).running_binary = false;
            return Ok(BundleLocation::Package { path: package_path });
        }

        // The binary shipped after this package was installed.
        let version_changed = metadata
            .as_ref()
            .is_none_or(|metadata| self.binary_version_changed(metadata));
        self.flags_mut(instance).did_update = false;
        if !self.config.debug_mode || version_changed {
            self.clear_updates(instance)?;
        }

        debug!(instance, bundle_file_name, "serving the binary bundle");
        self.flags_mut(instance).running_binary = true;
        Ok(BundleLocation::Binary {
            bundle_file_name: bundle_file_name.to_string(),
        })
    }

    /// Deletes every trace of downloaded updates for the instance key:
    /// package data, pending record, failed-update history.
    pub fn clear_updates(&self, instance: &str) -> Result<()> {
        self.packages.clear_updates(instance)?;
        self.settings.remove_pending_update(instance)?;
        self.settings.remove_failed_updates(instance)
    }

    /// Directory of the currently installed package, if one exists.
    pub fn package_folder(&self, instance: &str) -> Result<Option<PathBuf>> {
        let Some(package) = self.packages.current_package(instance)? else {
            return Ok(None);
        };
        let Some(hash) = package.package_hash.as_deref() else {
            return Ok(None);
        };
        Ok(Some(self.packages.package_folder_path(hash, instance)))
    }

    /// Dev-tooling side effect: a debug host caches its dev-server bundle
    /// on disk, which would shadow a freshly installed update. Deletes the
    /// cache when an update is pending and live reload is not active.
    pub fn clear_debug_cache_if_needed(
        &self,
        cached_dev_bundle: &Path,
        live_reload_active: bool,
        instance: &str,
    ) -> Result<()> {
        if self.config.debug_mode
            && !live_reload_active
            && self.settings.is_pending_update(None, instance)?
            && cached_dev_bundle.exists()
        {
            fs::remove_file(cached_dev_bundle).with_context(|| {
                format!(
                    "failed removing cached dev bundle: {}",
                    cached_dev_bundle.display()
                )
            })?;
        }
        Ok(())
    }

    /// Computes the one status report this session still owes upstream, if
    /// any: a rollback report takes precedence, then a fresh-update or
    /// binary-transition report, and an idle session drains the retry
    /// buffer. Consuming the result obliges the caller to deliver it (or
    /// re-buffer it through the telemetry manager).
    pub fn new_status_report(
        &mut self,
        bundle_file_name: &str,
        instance: &str,
    ) -> Result<Option<StatusReport>> {
        if self.need_to_report_rollback(instance) {
            self.set_need_to_report_rollback(false, instance);
            let failed = self.settings.failed_updates(instance);
            match failed.last() {
                Some(last_failed) => {
                    Ok(Some(self.telemetry.rollback_report(last_failed.clone())))
                }
                None => Ok(None),
            }
        } else if self.did_update(instance) {
            match self.packages.current_package(instance)? {
                Some(package) => self.telemetry.update_report(&package, instance),
                None => Ok(None),
            }
        } else if self.is_running_binary_version(bundle_file_name, instance)? {
            let app_version = self.app_version.clone();
            self.telemetry.binary_update_report(&app_version, instance)
        } else {
            self.telemetry.retry_status_report(instance)
        }
    }

    fn rollback_package(&mut self, instance: &str) -> Result<()> {
        let failed = self.packages.current_package(instance)?.ok_or_else(|| {
            UpdateError::data_integrity("no current package metadata to record for rollback")
        })?;
        self.settings.save_failed_update(&failed, instance)?;
        if let Some(hash) = failed.package_hash.as_deref() {
            self.settings.set_latest_rollback_info(hash, instance)?;
        }
        self.packages.rollback_package(instance)?;
        self.settings.remove_pending_update(instance)
    }

    /// A missing package, or a stale package under a changed binary
    /// version, leaves the pending record for the next selection pass to
    /// resolve. The grouping `missing || (!latest && changed)` is the
    /// long-standing shipped behavior; keep it in one place.
    fn should_abandon_reconciliation(
        &self,
        metadata: Option<&PackageMetadata>,
    ) -> Result<bool> {
        let Some(metadata) = metadata else {
            return Ok(true);
        };
        Ok(!self.is_package_latest(metadata)? && self.binary_version_changed(metadata))
    }

    /// A package is latest when the binary build timestamp recorded at its
    /// install time equals the running binary's build timestamp (this
    /// catches binary rebuilds with an unchanged version string), and the
    /// app version matches unless the test configuration bypasses it.
    fn is_package_latest(&self, metadata: &PackageMetadata) -> Result<bool> {
        let installed_against = metadata.binary_modified_time_millis()?;
        let matches_binary =
            installed_against.is_some_and(|millis| millis == self.config.binary_modified_time);
        Ok(matches_binary
            && (self.test_configuration
                || metadata.app_version.as_deref() == Some(self.app_version.as_str())))
    }

    fn binary_version_changed(&self, metadata: &PackageMetadata) -> bool {
        metadata.app_version.as_deref() != Some(self.app_version.as_str())
    }

    fn flags(&self, instance: &str) -> InstanceFlags {
        self.instances.get(instance).copied().unwrap_or_default()
    }

    fn flags_mut(&mut self, instance: &str) -> &mut InstanceFlags {
        self.instances.entry(instance.to_string()).or_default()
    }
}

fn is_malformed_package_fault(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<UpdateError>(),
        Some(UpdateError::MalformedPackage { .. })
    )
}
