use std::path::PathBuf;

use anyhow::Result;

use otapush_core::PackageMetadata;

/// Physical package storage, implemented by the host: download, unzip,
/// validation, and directory swapping live behind this seam. All methods
/// are namespaced by instance key, like the agent's own state.
pub trait PackageStore {
    /// Metadata of the currently installed package, if any.
    fn current_package(&self, instance: &str) -> Result<Option<PackageMetadata>>;

    /// Absolute path of the current package's bundle file, or `None` when
    /// no update has ever been installed. A corrupt on-disk manifest is
    /// reported as `UpdateError::MalformedPackage`, which the agent answers
    /// with a full state reset.
    fn current_package_bundle_path(
        &self,
        bundle_file_name: &str,
        instance: &str,
    ) -> Result<Option<PathBuf>>;

    /// Directory a package's contents were extracted into.
    fn package_folder_path(&self, package_hash: &str, instance: &str) -> PathBuf;

    /// Restores the previously installed package directory.
    fn rollback_package(&self, instance: &str) -> Result<()>;

    /// Deletes all downloaded update data for the instance.
    fn clear_updates(&self, instance: &str) -> Result<()>;
}
