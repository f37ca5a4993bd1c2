use serde::{Deserialize, Serialize};

use crate::PackageMetadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeploymentStatus {
    #[serde(rename = "DeploymentSucceeded")]
    Succeeded,
    #[serde(rename = "DeploymentFailed")]
    Failed,
}

/// One deployment-status transition to deliver upstream. Exactly one of
/// `package` (a downloaded package is running) or `app_version` (the binary
/// is running) is set on success reports; rollback reports carry the failed
/// package and `DeploymentFailed`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<PackageMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<DeploymentStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_deployment_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_label_or_app_version: Option<String>,
}

impl StatusReport {
    pub fn deployment_succeeded(package: PackageMetadata) -> Self {
        Self {
            package: Some(package),
            status: Some(DeploymentStatus::Succeeded),
            ..Self::default()
        }
    }

    pub fn deployment_failed(package: PackageMetadata) -> Self {
        Self {
            package: Some(package),
            status: Some(DeploymentStatus::Failed),
            ..Self::default()
        }
    }

    pub fn binary_running(app_version: impl Into<String>) -> Self {
        Self {
            app_version: Some(app_version.into()),
            ..Self::default()
        }
    }

    pub fn is_failure(&self) -> bool {
        self.status == Some(DeploymentStatus::Failed)
    }
}
