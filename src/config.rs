use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/nfs3-smb-bridge/config.toml";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BridgeConfig {
    /// Samba configuration holding the share blocks.
    pub smb_conf: PathBuf,
    /// Parent of generated mount directories.
    pub scratch_root: PathBuf,
    /// Serializes mount/unmount across processes.
    pub lock_file: PathBuf,
    pub lock_timeout_secs: u64,
    /// Command line that makes the SMB daemon re-read `smb_conf`.
    pub reload_command: Vec<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            smb_conf: PathBuf::from("/etc/samba/smb.conf"),
            scratch_root: PathBuf::from("/mnt"),
            lock_file: PathBuf::from("/run/nfs3-smb-bridge.lock"),
            lock_timeout_secs: 10,
            reload_command: vec![
                "smbcontrol".to_string(),
                "all".to_string(),
                "reload-config".to_string(),
            ],
        }
    }
}

impl BridgeConfig {
    /// Loads `path`, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No config at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()))
            }
        };

        let config: BridgeConfig = toml::from_str(&text)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        if config.reload_command.is_empty() {
            anyhow::bail!("reload_command in {} must not be empty", path.display());
        }
        Ok(config)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }
}
