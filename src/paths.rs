use std::path::PathBuf;

/// Image cache directory on a remote execution target. Proxmox hosts are
/// accessed as root, so a system-wide cache path is fine there.
pub const REMOTE_CACHE_DIR: &str = "/var/cache/altdeploy/images";

/// Snippets directory on the target storage, used for custom user-data.
pub const SNIPPETS_DIR: &str = "/var/lib/vz/snippets";

/// Local image cache directory: `~/.cache/altdeploy/images/`
pub fn cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("altdeploy")
        .join("images")
}

/// Staging area for downloads that are verified before being placed
/// at the execution target's cache path.
pub fn staging_dir() -> PathBuf {
    cache_dir().join("staging")
}
