use anyhow::Result;
use tracing::warn;

use otapush_core::{PackageMetadata, StatusReport};
use otapush_state::{PreferenceDir, LAST_DEPLOYMENT_REPORT_KEY, RETRY_DEPLOYMENT_REPORT_KEY};

/// Computes at-most-one pending deployment-status report per transition by
/// diffing "what is running now" against the last identifier that was
/// successfully reported upstream.
///
/// A package is identified as `deploymentKey:label` (deployment keys can be
/// switched at runtime, so neither part alone is stable); a binary run is
/// identified by the bare app version. The colon is the discriminator when
/// a stored identifier is parsed back, so keys and labels must never
/// introduce one ambiguously.
#[derive(Debug, Clone)]
pub struct TelemetryManager {
    prefs: PreferenceDir,
}

/// `deploymentKey:label`, or `None` when either half is missing.
pub fn package_identifier(package: &PackageMetadata) -> Option<String> {
    let deployment_key = package.deployment_key.as_deref()?;
    let label = package.label.as_deref()?;
    Some(format!("{deployment_key}:{label}"))
}

fn is_package_identifier(identifier: &str) -> bool {
    identifier.contains(':')
}

/// Splits a stored identifier on `:`, dropping trailing empty segments the
/// way the identifiers were historically tokenized.
fn identifier_parts(identifier: &str) -> Vec<&str> {
    let mut parts: Vec<&str> = identifier.split(':').collect();
    while parts.last().is_some_and(|part| part.is_empty()) {
        parts.pop();
    }
    parts
}

fn attach_previous_identifier(report: &mut StatusReport, previous: &str) {
    if is_package_identifier(previous) {
        let parts = identifier_parts(previous);
        report.previous_deployment_key = parts.first().map(|s| s.to_string());
        report.previous_label_or_app_version = parts.get(1).map(|s| s.to_string());
    } else {
        // The previous report was for a binary app version.
        report.previous_label_or_app_version = Some(previous.to_string());
    }
}

impl TelemetryManager {
    pub fn new(prefs: PreferenceDir) -> Self {
        Self { prefs }
    }

    /// Report for a running downloaded package, or `None` when the package
    /// has no computable identifier or nothing changed since the last
    /// successful report. Computing a fresh report invalidates any buffered
    /// retry report.
    pub fn update_report(
        &self,
        current_package: &PackageMetadata,
        instance: &str,
    ) -> Result<Option<StatusReport>> {
        let Some(current_identifier) = package_identifier(current_package) else {
            return Ok(None);
        };
        let previous = self.previous_identifier(instance)?;
        match previous {
            None => {
                self.clear_retry_status_report(instance)?;
                Ok(Some(StatusReport::deployment_succeeded(
                    current_package.clone(),
                )))
            }
            Some(previous) if previous != current_identifier => {
                self.clear_retry_status_report(instance)?;
                let mut report = StatusReport::deployment_succeeded(current_package.clone());
                attach_previous_identifier(&mut report, &previous);
                Ok(Some(report))
            }
            Some(_) => Ok(None),
        }
    }

    /// Symmetric case for when the binary bundle is what is now running.
    pub fn binary_update_report(
        &self,
        app_version: &str,
        instance: &str,
    ) -> Result<Option<StatusReport>> {
        let previous = self.previous_identifier(instance)?;
        match previous {
            None => {
                self.clear_retry_status_report(instance)?;
                Ok(Some(StatusReport::binary_running(app_version)))
            }
            Some(previous) if previous != app_version => {
                self.clear_retry_status_report(instance)?;
                let mut report = StatusReport::binary_running(app_version);
                attach_previous_identifier(&mut report, &previous);
                Ok(Some(report))
            }
            Some(_) => Ok(None),
        }
    }

    /// Rollback reports are always produced; they are never diffed against
    /// the last-reported identifier.
    pub fn rollback_report(&self, failed_package: PackageMetadata) -> StatusReport {
        StatusReport::deployment_failed(failed_package)
    }

    /// Persists the identifier a successful report covered. Failure reports
    /// are never recorded, so the next real update still gets reported.
    pub fn record_status_reported(&self, report: &StatusReport, instance: &str) -> Result<()> {
        if report.is_failure() {
            return Ok(());
        }

        if let Some(app_version) = &report.app_version {
            self.save_reported_identifier(app_version, instance)
        } else if let Some(package) = &report.package {
            match package_identifier(package) {
                Some(identifier) => self.save_reported_identifier(&identifier, instance),
                None => Ok(()),
            }
        } else {
            Ok(())
        }
    }

    /// Buffers a report that could not be delivered; at most one per
    /// instance key (the newest wins).
    pub fn save_status_report_for_retry(
        &self,
        report: &StatusReport,
        instance: &str,
    ) -> Result<()> {
        let raw = serde_json::to_string(report)?;
        self.prefs.write(instance, RETRY_DEPLOYMENT_REPORT_KEY, &raw)
    }

    /// Single consumption: the buffered report is cleared by this read, so
    /// a delivered retry can never be double-counted.
    pub fn retry_status_report(&self, instance: &str) -> Result<Option<StatusReport>> {
        let Some(raw) = self.prefs.read(instance, RETRY_DEPLOYMENT_REPORT_KEY)? else {
            return Ok(None);
        };
        self.clear_retry_status_report(instance)?;
        match serde_json::from_str(&raw) {
            Ok(report) => Ok(Some(report)),
            Err(_) => {
                warn!(instance, %raw, "unable to parse buffered retry status report");
                Ok(None)
            }
        }
    }

    fn previous_identifier(&self, instance: &str) -> Result<Option<String>> {
        self.prefs.read(instance, LAST_DEPLOYMENT_REPORT_KEY)
    }

    fn save_reported_identifier(&self, identifier: &str, instance: &str) -> Result<()> {
        self.prefs
            .write(instance, LAST_DEPLOYMENT_REPORT_KEY, identifier)
    }

    fn clear_retry_status_report(&self, instance: &str) -> Result<()> {
        self.prefs.remove(instance, RETRY_DEPLOYMENT_REPORT_KEY)
    }
}
