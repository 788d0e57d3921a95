//! Configuration loader (C12). Structure and field names follow spec.md §6
//! and `original_source/config/model.go`; Rust's `#[serde(default = "...")]`
//! takes the place of the original's `creasty/defaults` reflection dance.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::hooks::HooksConfig;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/webploy/webploy.conf";
pub const CONFIG_ENV_VAR: &str = "WEBPLOY_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebployConfig {
    #[serde(default)]
    pub listen: ListenConfig,
    #[serde(default)]
    pub authentication: AuthenticationConfig,
    #[serde(default)]
    pub authorization: AuthorizationConfig,
    pub sites: SitesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticationConfig {
    #[serde(default)]
    pub basic_auth: BasicAuthConfig,
}

impl Default for AuthenticationConfig {
    fn default() -> Self {
        Self {
            basic_auth: BasicAuthConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasicAuthConfig {
    #[serde(default = "default_htpasswd_file")]
    pub htpasswd_file: PathBuf,
}

impl Default for BasicAuthConfig {
    fn default() -> Self {
        Self {
            htpasswd_file: default_htpasswd_file(),
        }
    }
}

fn default_htpasswd_file() -> PathBuf {
    PathBuf::from("/etc/webploy/.htpasswd")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationConfig {
    #[serde(default = "default_policy_file")]
    pub policy_file: PathBuf,
}

impl Default for AuthorizationConfig {
    fn default() -> Self {
        Self {
            policy_file: default_policy_file(),
        }
    }
}

fn default_policy_file() -> PathBuf {
    PathBuf::from("/etc/webploy/policy.csv")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default)]
    pub enable_tls: bool,
    #[serde(default)]
    pub tls_key: Option<PathBuf>,
    #[serde(default)]
    pub tls_cert: Option<PathBuf>,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            enable_tls: false,
            tls_key: None,
            tls_cert: None,
        }
    }
}

fn default_bind_addr() -> String {
    ":8000".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SitesConfig {
    #[serde(default = "default_root")]
    pub root: PathBuf,
    #[serde(default)]
    pub sites: Vec<SiteConfig>,
}

fn default_root() -> PathBuf {
    PathBuf::from("/var/www")
}

impl SitesConfig {
    /// Rust equivalent of `GetConfigForSite`.
    pub fn site(&self, name: &str) -> Option<&SiteConfig> {
        self.sites.iter().find(|s| s.name == name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    pub name: String,

    #[serde(default = "default_max_history")]
    pub max_history: u32,
    #[serde(default = "default_max_open")]
    pub max_open: u32,
    #[serde(default = "default_max_concurrent_uploads")]
    pub max_concurrent_uploads: u32,
    #[serde(default = "default_link_name")]
    pub link_name: String,
    #[serde(default = "default_go_live_on_finish")]
    pub go_live_on_finish: bool,
    #[serde(default = "default_stale_cleanup_timeout", with = "humantime_serde")]
    pub stale_cleanup_timeout: Duration,

    #[serde(default)]
    pub hooks: HooksConfig,
}

fn default_max_history() -> u32 {
    2
}
fn default_max_open() -> u32 {
    2
}
fn default_max_concurrent_uploads() -> u32 {
    10
}
fn default_link_name() -> String {
    "live".to_string()
}
fn default_go_live_on_finish() -> bool {
    true
}
fn default_stale_cleanup_timeout() -> Duration {
    Duration::from_secs(30 * 60)
}

/// Loads `WebployConfig` from the path named by `$WEBPLOY_CONFIG`, falling
/// back to `path_override` (a CLI `--config` flag) or `DEFAULT_CONFIG_PATH`.
pub fn load(path_override: Option<&Path>) -> anyhow::Result<WebployConfig> {
    let path = resolve_path(path_override);
    let raw = std::fs::read_to_string(&path)
        .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;
    let cfg: WebployConfig = serde_yaml::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("failed to parse config file {}: {e}", path.display()))?;
    validate(&cfg)?;
    Ok(cfg)
}

fn resolve_path(path_override: Option<&Path>) -> PathBuf {
    if let Some(p) = path_override {
        return p.to_path_buf();
    }
    if let Ok(env_path) = std::env::var(CONFIG_ENV_VAR) {
        return PathBuf::from(env_path);
    }
    PathBuf::from(DEFAULT_CONFIG_PATH)
}

fn validate(cfg: &WebployConfig) -> anyhow::Result<()> {
    let mut seen = std::collections::HashSet::new();
    for site in &cfg.sites.sites {
        crate::validate::validate_site_name(&site.name)
            .map_err(|_| anyhow::anyhow!("invalid site name in config: {:?}", site.name))?;
        if !seen.insert(site.name.clone()) {
            anyhow::bail!("duplicate site name in config: {:?}", site.name);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_yaml_with_defaults() {
        let yaml = r#"
sites:
  root: /srv/sites
  sites:
    - name: demo
"#;
        let cfg: WebployConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.listen.bind_addr, ":8000");
        assert_eq!(cfg.sites.root, PathBuf::from("/srv/sites"));
        let site = cfg.sites.site("demo").unwrap();
        assert_eq!(site.max_history, 2);
        assert_eq!(site.max_open, 2);
        assert_eq!(site.max_concurrent_uploads, 10);
        assert_eq!(site.link_name, "live");
        assert!(site.go_live_on_finish);
        assert_eq!(site.stale_cleanup_timeout, Duration::from_secs(30 * 60));
    }

    #[test]
    fn rejects_duplicate_site_names() {
        let yaml = r#"
sites:
  root: /srv/sites
  sites:
    - name: demo
    - name: demo
"#;
        let cfg: WebployConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(validate(&cfg).is_err());
    }
}
