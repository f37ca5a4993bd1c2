mod agent;
mod package_store;
mod restart;

pub use agent::{BundleLocation, UpdateAgent};
pub use package_store::PackageStore;
pub use restart::{RestartGate, RestartHandler};
