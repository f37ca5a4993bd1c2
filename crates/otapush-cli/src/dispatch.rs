use anyhow::Result;

use otapush_state::{
    PreferenceDir, SettingsStore, LAST_DEPLOYMENT_REPORT_KEY, RETRY_DEPLOYMENT_REPORT_KEY,
};
use otapush_telemetry::TelemetryManager;

use crate::render::{render_section_header, render_status_line, OutputStyle};

pub(crate) struct StateHandles {
    pub(crate) prefs: PreferenceDir,
    pub(crate) settings: SettingsStore,
    pub(crate) telemetry: TelemetryManager,
}

impl StateHandles {
    pub(crate) fn open(prefs: PreferenceDir) -> Self {
        Self {
            settings: SettingsStore::new(prefs.clone()),
            telemetry: TelemetryManager::new(prefs.clone()),
            prefs,
        }
    }
}

pub(crate) fn status_lines(
    handles: &StateHandles,
    instance: &str,
    style: OutputStyle,
) -> Result<Vec<String>> {
    let mut lines = vec![render_section_header(style, &format!("status: {instance}"))];

    match handles.settings.pending_update(instance) {
        Some(pending) => {
            let phase = if pending.is_loading {
                "loading"
            } else {
                "awaiting first run"
            };
            lines.push(format!(
                "pending update: {} ({phase})",
                pending.package_hash
            ));
        }
        None => lines.push("pending update: none".to_string()),
    }

    match handles.settings.latest_rollback_info(instance) {
        Some(info) => lines.push(format!(
            "latest rollback: {} count={} time={}",
            info.package_hash, info.count, info.time
        )),
        None => lines.push("latest rollback: none".to_string()),
    }

    match handles.prefs.read(instance, LAST_DEPLOYMENT_REPORT_KEY)? {
        Some(identifier) => lines.push(format!("last reported: {identifier}")),
        None => lines.push("last reported: none".to_string()),
    }

    // Peek without consuming; only `retry-report` performs the
    // single-consumption read.
    let retry_buffered = handles
        .prefs
        .read(instance, RETRY_DEPLOYMENT_REPORT_KEY)?
        .is_some();
    lines.push(format!(
        "retry report: {}",
        if retry_buffered { "buffered" } else { "none" }
    ));

    let failed = handles.settings.failed_updates(instance);
    lines.push(format!("failed updates: {}", failed.len()));

    Ok(lines)
}

pub(crate) fn failed_lines(handles: &StateHandles, instance: &str) -> Vec<String> {
    let failed = handles.settings.failed_updates(instance);
    if failed.is_empty() {
        return vec!["no failed updates recorded".to_string()];
    }

    failed
        .iter()
        .map(|package| {
            format!(
                "{} label={} appVersion={}",
                package.package_hash.as_deref().unwrap_or("<missing hash>"),
                package.label.as_deref().unwrap_or("-"),
                package.app_version.as_deref().unwrap_or("-")
            )
        })
        .collect()
}

pub(crate) fn retry_report_lines(
    handles: &StateHandles,
    instance: &str,
    style: OutputStyle,
) -> Result<Vec<String>> {
    match handles.telemetry.retry_status_report(instance)? {
        Some(report) => {
            let rendered = serde_json::to_string_pretty(&report)?;
            let mut lines = vec![render_status_line(
                style,
                "ok",
                "consumed the buffered retry report",
            )];
            lines.extend(rendered.lines().map(str::to_string));
            Ok(lines)
        }
        None => Ok(vec!["no retry report buffered".to_string()]),
    }
}

pub(crate) fn clear_lines(
    handles: &StateHandles,
    instance: &str,
    style: OutputStyle,
) -> Result<Vec<String>> {
    handles.settings.remove_pending_update(instance)?;
    handles.settings.remove_failed_updates(instance)?;
    handles.prefs.remove(instance, LAST_DEPLOYMENT_REPORT_KEY)?;
    handles.prefs.remove(instance, RETRY_DEPLOYMENT_REPORT_KEY)?;
    Ok(vec![render_status_line(
        style,
        "ok",
        &format!("cleared update state for instance '{instance}'"),
    )])
}
