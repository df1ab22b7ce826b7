use std::path::Path;

use crate::error::DeployError;

/// Default ALT cloud image and its published digest.
pub const DEFAULT_IMAGE_URL: &str =
    "https://ftp.altlinux.org/pub/distributions/ALTLinux/p10/images/cloud/x86_64/alt-p10-cloud-x86_64.qcow2";
pub const DEFAULT_CHECKSUM_URL: &str =
    "https://ftp.altlinux.org/pub/distributions/ALTLinux/p10/images/cloud/x86_64/SHA256SUM";

/// Declarative description of the VM to deploy.
///
/// Loaded once per run (file + defaults + CLI overrides) and immutable
/// afterwards. Values are passed to the hypervisor CLI as-is; anything
/// malformed (e.g. a bad size suffix) surfaces as a command error there.
#[derive(Debug, Clone)]
pub struct DeploymentConfig {
    pub vmid: u32,
    pub name: String,
    pub memory_mb: u64,
    pub cores: u32,
    pub disk_size: Option<String>,
    pub bridge: String,
    pub storage: String,
    pub image_url: String,
    pub checksum_url: Option<String>,
    pub ci_user: Option<String>,
    pub ci_password: Option<String>,
}

/// Caller-supplied overrides that win over both file and defaults.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub vmid: Option<u32>,
    pub name: Option<String>,
}

impl Default for DeploymentConfig {
    /// The documented default set, used when no config file exists.
    fn default() -> Self {
        Self {
            vmid: 100,
            name: "alt-workstation".into(),
            memory_mb: 4096,
            cores: 2,
            disk_size: Some("32G".into()),
            bridge: "vmbr0".into(),
            storage: "local-lvm".into(),
            image_url: DEFAULT_IMAGE_URL.into(),
            checksum_url: Some(DEFAULT_CHECKSUM_URL.into()),
            ci_user: None,
            ci_password: None,
        }
    }
}

impl DeploymentConfig {
    /// File name the image would have in the cache, before cache keying.
    pub fn image_file_name(&self) -> &str {
        self.image_url.rsplit('/').next().unwrap_or("image.qcow2")
    }

    /// Identity invariant checked before any VM mutation begins.
    pub fn validate_identity(&self) -> Result<(), DeployError> {
        if self.vmid == 0 {
            return Err(DeployError::Validation {
                message: "VM id must be a positive number".into(),
            });
        }
        if self.name.trim().is_empty() {
            return Err(DeployError::Validation {
                message: "VM name must not be empty".into(),
            });
        }
        Ok(())
    }
}

/// Load the deployment config.
///
/// A missing file is not an error: the documented defaults are used and
/// logged. With a file present, required keys missing from it fall back
/// to the same defaults, while optional keys (DISK_SIZE, CHECKSUM_URL,
/// cloud-init credentials) stay unset unless the file sets them.
pub fn load(path: &Path, overrides: &Overrides) -> Result<DeploymentConfig, DeployError> {
    let mut config = if path.exists() {
        let contents = std::fs::read_to_string(path).map_err(|source| DeployError::ConfigLoad {
            path: path.display().to_string(),
            source,
        })?;
        parse(&contents, path)?
    } else {
        tracing::info!(path = %path.display(), "no config file found, using defaults");
        DeploymentConfig::default()
    };

    if let Some(vmid) = overrides.vmid {
        config.vmid = vmid;
    }
    if let Some(ref name) = overrides.name {
        config.name = name.clone();
    }

    Ok(config)
}

/// Parse shell-style `KEY=value` assignments (`#` comments, optional
/// quotes, optional `export ` prefix).
fn parse(contents: &str, path: &Path) -> Result<DeploymentConfig, DeployError> {
    let mut config = DeploymentConfig {
        disk_size: None,
        checksum_url: None,
        ..DeploymentConfig::default()
    };

    for (lineno, raw) in contents.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);

        let Some((key, value)) = line.split_once('=') else {
            return Err(DeployError::ConfigParse {
                path: path.display().to_string(),
                message: format!("line {}: expected KEY=value, got '{raw}'", lineno + 1),
            });
        };
        let key = key.trim();
        let value = unquote(value.trim());
        if value.is_empty() {
            continue;
        }

        match key {
            "VMID" => {
                config.vmid = value.parse().map_err(|_| DeployError::ConfigParse {
                    path: path.display().to_string(),
                    message: format!("VMID must be a number, got '{value}'"),
                })?;
            }
            "VM_NAME" => config.name = value.to_string(),
            "MEMORY" => {
                config.memory_mb = value.parse().map_err(|_| DeployError::ConfigParse {
                    path: path.display().to_string(),
                    message: format!("MEMORY must be a number of megabytes, got '{value}'"),
                })?;
            }
            "CORES" => {
                config.cores = value.parse().map_err(|_| DeployError::ConfigParse {
                    path: path.display().to_string(),
                    message: format!("CORES must be a number, got '{value}'"),
                })?;
            }
            "DISK_SIZE" => config.disk_size = Some(value.to_string()),
            "BRIDGE" => config.bridge = value.to_string(),
            "STORAGE" => config.storage = value.to_string(),
            "IMAGE_URL" => config.image_url = value.to_string(),
            "CHECKSUM_URL" => config.checksum_url = Some(value.to_string()),
            "CLOUD_INIT_USER" => config.ci_user = Some(value.to_string()),
            "CLOUD_INIT_PASSWORD" => config.ci_password = Some(value.to_string()),
            other => {
                tracing::debug!(key = other, "ignoring unknown config key");
            }
        }
    }

    Ok(config)
}

/// Strip one matching pair of single or double quotes.
fn unquote(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2
        && (bytes[0] == b'"' || bytes[0] == b'\'')
        && bytes[bytes.len() - 1] == bytes[0]
    {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::path::PathBuf;

    /// Build a DeploymentConfig for testing.
    pub fn test_config() -> DeploymentConfig {
        DeploymentConfig {
            vmid: 9999,
            name: "test-vm".into(),
            image_url: "https://example.com/images/test.qcow2".into(),
            ..DeploymentConfig::default()
        }
    }

    fn parse_str(contents: &str) -> Result<DeploymentConfig, DeployError> {
        parse(contents, &PathBuf::from("test.conf"))
    }

    #[test]
    fn parses_plain_assignments() {
        let config = parse_str("VMID=200\nVM_NAME=alt-dev\nMEMORY=8192\nCORES=4\n").unwrap();
        assert_eq!(config.vmid, 200);
        assert_eq!(config.name, "alt-dev");
        assert_eq!(config.memory_mb, 8192);
        assert_eq!(config.cores, 4);
    }

    #[test]
    fn parses_quotes_comments_and_export() {
        let config = parse_str(
            "# node config\nexport VM_NAME=\"quoted name\"\nBRIDGE='vmbr1'\n\nSTORAGE=local-zfs\n",
        )
        .unwrap();
        assert_eq!(config.name, "quoted name");
        assert_eq!(config.bridge, "vmbr1");
        assert_eq!(config.storage, "local-zfs");
    }

    #[test]
    fn optional_keys_stay_unset_with_file_present() {
        let config = parse_str("VMID=200\nVM_NAME=alt-dev\n").unwrap();
        assert_eq!(config.disk_size, None);
        assert_eq!(config.checksum_url, None);
        assert_eq!(config.ci_user, None);
        // required keys still fall back to defaults
        assert_eq!(config.bridge, "vmbr0");
        assert_eq!(config.memory_mb, 4096);
    }

    #[test]
    fn missing_file_uses_documented_defaults() {
        let config = load(Path::new("/nonexistent/altdeploy.conf"), &Overrides::default()).unwrap();
        assert_eq!(config.vmid, 100);
        assert_eq!(config.name, "alt-workstation");
        assert_eq!(config.memory_mb, 4096);
        assert_eq!(config.cores, 2);
        assert_eq!(config.disk_size.as_deref(), Some("32G"));
        assert_eq!(config.bridge, "vmbr0");
        assert_eq!(config.storage, "local-lvm");
    }

    #[test]
    fn overrides_win_over_file_and_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("altdeploy.conf");
        std::fs::write(&path, "VMID=300\nVM_NAME=from-file\n").unwrap();

        let overrides = Overrides {
            vmid: Some(301),
            name: Some("from-cli".into()),
        };
        let config = load(&path, &overrides).unwrap();
        assert_eq!(config.vmid, 301);
        assert_eq!(config.name, "from-cli");
    }

    #[test]
    fn rejects_malformed_numbers() {
        assert!(parse_str("VMID=lots\n").is_err());
        assert!(parse_str("MEMORY=4G\n").is_err());
    }

    #[test]
    fn rejects_lines_without_assignment() {
        assert!(parse_str("VMID 200\n").is_err());
    }

    #[test]
    fn identity_invariant() {
        let mut config = test_config();
        config.validate_identity().unwrap();
        config.name = "  ".into();
        assert!(config.validate_identity().is_err());
        config = test_config();
        config.vmid = 0;
        assert!(config.validate_identity().is_err());
    }
}
