//! Agent and hub configuration.
//!
//! # Storage layout
//!
//! ```text
//! ~/.fleet/
//!   agent.yaml   (hub URL, token, host id, collector paths; mode 0600)
//!   hub.yaml     (optional: bind address, database, API token; mode 0600)
//! ```
//!
//! # API pattern
//!
//! Every function touching disk has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! Environment overrides are applied by the convenience wrappers only, so the
//! `_at` forms stay deterministic under test.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::HostId;

pub const ENV_HUB_URL: &str = "FLEET_HUB_URL";
pub const ENV_AGENT_TOKEN: &str = "FLEET_AGENT_TOKEN";
pub const ENV_VPS_ID: &str = "FLEET_VPS_ID";
pub const ENV_HUB_BIND: &str = "FLEET_HUB_BIND";
pub const ENV_API_TOKEN: &str = "FLEET_API_TOKEN";

pub const DEFAULT_VPS_ID: &str = "vps-01";
pub const DEFAULT_HUB_BIND: &str = "0.0.0.0:8000";
pub const DEFAULT_AUDIT_DB: &str = "/var/lib/fleet/audit.db";
pub const DEFAULT_AUDIT_JSONL: &str = "/var/log/fleet/audit.jsonl";
pub const DEFAULT_VHOST_DIR: &str = "/srv/fleet/reverse-proxy/nginx/conf.d";
pub const DEFAULT_PROXY_COMPOSE: &str = "/srv/fleet/reverse-proxy/compose.yml";
pub const DEFAULT_TRAFFIC_LOG_DIR: &str = "/var/log/nginx/domains";

// ---------------------------------------------------------------------------
// 1. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.fleet/`
pub fn fleet_root(home: &Path) -> PathBuf {
    home.join(".fleet")
}

/// `<home>/.fleet/agent.yaml`. Pure, no I/O.
pub fn agent_config_path_at(home: &Path) -> PathBuf {
    fleet_root(home).join("agent.yaml")
}

/// `<home>/.fleet/hub.yaml`. Pure, no I/O.
pub fn hub_config_path_at(home: &Path) -> PathBuf {
    fleet_root(home).join("hub.yaml")
}

/// Resolve the current user's home directory.
pub fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

// ---------------------------------------------------------------------------
// 2. Agent configuration
// ---------------------------------------------------------------------------

/// Settings for one agent process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub hub_url: String,
    pub token: String,
    #[serde(default = "default_vps_id")]
    pub vps_id: HostId,
    #[serde(default = "default_vhost_dir")]
    pub vhost_dir: PathBuf,
    #[serde(default = "default_traffic_log_dir")]
    pub traffic_log_dir: PathBuf,
    #[serde(default = "default_proxy_compose")]
    pub proxy_compose_file: PathBuf,
    #[serde(default = "default_audit_db")]
    pub audit_db_path: PathBuf,
    #[serde(default = "default_audit_jsonl")]
    pub audit_jsonl_path: PathBuf,
}

fn default_vps_id() -> HostId {
    HostId::from(DEFAULT_VPS_ID)
}
fn default_vhost_dir() -> PathBuf {
    PathBuf::from(DEFAULT_VHOST_DIR)
}
fn default_traffic_log_dir() -> PathBuf {
    PathBuf::from(DEFAULT_TRAFFIC_LOG_DIR)
}
fn default_proxy_compose() -> PathBuf {
    PathBuf::from(DEFAULT_PROXY_COMPOSE)
}
fn default_audit_db() -> PathBuf {
    PathBuf::from(DEFAULT_AUDIT_DB)
}
fn default_audit_jsonl() -> PathBuf {
    PathBuf::from(DEFAULT_AUDIT_JSONL)
}

impl AgentConfig {
    /// A config with the given hub coordinates and default collector paths.
    pub fn new(hub_url: impl Into<String>, token: impl Into<String>, vps_id: HostId) -> Self {
        Self {
            hub_url: hub_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            vps_id,
            vhost_dir: default_vhost_dir(),
            traffic_log_dir: default_traffic_log_dir(),
            proxy_compose_file: default_proxy_compose(),
            audit_db_path: default_audit_db(),
            audit_jsonl_path: default_audit_jsonl(),
        }
    }

    /// Apply `FLEET_*` overrides from `lookup` (normally `std::env::var`).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_HUB_URL).filter(|v| !v.is_empty()) {
            self.hub_url = url.trim_end_matches('/').to_string();
        }
        if let Some(token) = lookup(ENV_AGENT_TOKEN).filter(|v| !v.is_empty()) {
            self.token = token;
        }
        if let Some(id) = lookup(ENV_VPS_ID).filter(|v| !v.is_empty()) {
            self.vps_id = HostId::from(id);
        }
    }

    /// Reject configs that cannot reach a hub.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hub_url.trim().is_empty() {
            return Err(ConfigError::Missing("hub_url"));
        }
        if self.token.trim().is_empty() {
            return Err(ConfigError::Missing("token"));
        }
        if self.vps_id.0.trim().is_empty() {
            return Err(ConfigError::Missing("vps_id"));
        }
        Ok(())
    }

    /// Token with everything after the first 8 characters hidden.
    pub fn masked_token(&self) -> String {
        mask_secret(&self.token)
    }
}

/// Load `<home>/.fleet/agent.yaml`.
///
/// Returns `ConfigError::NotRegistered` if absent,
/// `ConfigError::Parse` (with path) if malformed.
pub fn load_agent_at(home: &Path) -> Result<AgentConfig, ConfigError> {
    let path = agent_config_path_at(home);
    if !path.exists() {
        return Err(ConfigError::NotRegistered { path });
    }
    let contents = std::fs::read_to_string(&path)?;
    serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse { path, source: e })
}

/// `load_agent_at` convenience wrapper; applies environment overrides.
pub fn load_agent() -> Result<AgentConfig, ConfigError> {
    let mut cfg = load_agent_at(&home()?)?;
    cfg.apply_overrides(|key| std::env::var(key).ok());
    Ok(cfg)
}

/// Atomically save `<home>/.fleet/agent.yaml`.
///
/// Write flow: serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_agent_at(home: &Path, cfg: &AgentConfig) -> Result<(), ConfigError> {
    ensure_root(home)?;
    let path = agent_config_path_at(home);
    let yaml = serde_yaml::to_string(cfg)?;
    write_atomic(&path, &yaml)
}

/// Register this host with a hub.
///
/// Keeps collector paths from an existing config and replaces only the hub
/// coordinates, so re-registering never loses local customisation.
pub fn register_at(
    home: &Path,
    hub_url: &str,
    token: &str,
    vps_id: Option<HostId>,
) -> Result<AgentConfig, ConfigError> {
    let cfg = match load_agent_at(home) {
        Ok(mut existing) => {
            existing.hub_url = hub_url.trim_end_matches('/').to_string();
            existing.token = token.to_string();
            if let Some(id) = vps_id {
                existing.vps_id = id;
            }
            existing
        }
        Err(ConfigError::NotRegistered { .. }) => {
            AgentConfig::new(hub_url, token, vps_id.unwrap_or_else(default_vps_id))
        }
        Err(err) => return Err(err),
    };
    cfg.validate()?;
    save_agent_at(home, &cfg)?;
    Ok(cfg)
}

/// `register_at` convenience wrapper.
pub fn register(
    hub_url: &str,
    token: &str,
    vps_id: Option<HostId>,
) -> Result<AgentConfig, ConfigError> {
    register_at(&home()?, hub_url, token, vps_id)
}

// ---------------------------------------------------------------------------
// 3. Hub configuration
// ---------------------------------------------------------------------------

/// Settings for the hub server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    pub db_path: PathBuf,
    /// Empty disables bearer-token checks.
    #[serde(default)]
    pub api_token: String,
    /// Audit database of an agent colocated with the hub, merged into reads.
    #[serde(default)]
    pub local_audit_db: Option<PathBuf>,
}

fn default_bind() -> String {
    DEFAULT_HUB_BIND.to_string()
}

impl HubConfig {
    /// Defaults rooted at `home`: database at `<home>/.fleet/hub.db`.
    pub fn default_at(home: &Path) -> Self {
        Self {
            bind: default_bind(),
            db_path: fleet_root(home).join("hub.db"),
            api_token: String::new(),
            local_audit_db: Some(default_audit_db()),
        }
    }

    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bind) = lookup(ENV_HUB_BIND).filter(|v| !v.is_empty()) {
            self.bind = bind;
        }
        if let Some(token) = lookup(ENV_API_TOKEN) {
            self.api_token = token;
        }
    }
}

/// Load `<home>/.fleet/hub.yaml`, falling back to [`HubConfig::default_at`].
pub fn load_hub_at(home: &Path) -> Result<HubConfig, ConfigError> {
    let path = hub_config_path_at(home);
    if !path.exists() {
        return Ok(HubConfig::default_at(home));
    }
    let contents = std::fs::read_to_string(&path)?;
    serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse { path, source: e })
}

/// `load_hub_at` convenience wrapper; applies environment overrides.
pub fn load_hub() -> Result<HubConfig, ConfigError> {
    let mut cfg = load_hub_at(&home()?)?;
    cfg.apply_overrides(|key| std::env::var(key).ok());
    Ok(cfg)
}

/// Atomically save `<home>/.fleet/hub.yaml`.
pub fn save_hub_at(home: &Path, cfg: &HubConfig) -> Result<(), ConfigError> {
    ensure_root(home)?;
    let yaml = serde_yaml::to_string(cfg)?;
    write_atomic(&hub_config_path_at(home), &yaml)
}

/// First 8 characters followed by `...`.
pub fn mask_secret(secret: &str) -> String {
    let visible: String = secret.chars().take(8).collect();
    format!("{visible}...")
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn ensure_root(home: &Path) -> Result<(), ConfigError> {
    let dir = fleet_root(home);
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
        set_dir_permissions(&dir)?;
    }
    Ok(())
}

fn write_atomic(path: &Path, contents: &str) -> Result<(), ConfigError> {
    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, contents)?;
    set_file_permissions(&tmp)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
