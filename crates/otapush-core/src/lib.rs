mod config;
mod error;
mod package;
mod report;

pub use config::AgentConfig;
pub use error::UpdateError;
pub use package::PackageMetadata;
pub use report::{DeploymentStatus, StatusReport};
