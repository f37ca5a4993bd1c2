mod layout;
mod settings;

pub use layout::{
    PreferenceDir, FAILED_UPDATES_KEY, LAST_DEPLOYMENT_REPORT_KEY, LATEST_ROLLBACK_INFO_KEY,
    PENDING_UPDATE_KEY, RETRY_DEPLOYMENT_REPORT_KEY,
};
pub use settings::{PendingUpdate, RollbackInfo, SettingsStore};

#[cfg(test)]
mod tests;
