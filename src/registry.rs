//! Site registry (C6). Grounded on spec.md §4.6; the original has no single
//! file for this (`main.go` wires it up inline), so the shape here follows
//! `deployer`'s convention of a small owned-map service built once at startup.

use std::collections::HashMap;

use crate::config::SitesConfig;
use crate::error::{Error, Result};
use crate::info_store::InfoLock;
use crate::site::Site;

pub struct SiteRegistry {
    sites: HashMap<String, Site>,
    new_since_init: Vec<String>,
}

impl SiteRegistry {
    /// Builds the static name→Site map from configuration, initializing each
    /// site's directory. Duplicate names are rejected by `config::load`
    /// already, but this is re-checked here since the registry can in
    /// principle be built from a `SitesConfig` assembled by other means.
    pub async fn init(cfg: &SitesConfig, info_lock: InfoLock) -> Result<Self> {
        let mut sites = HashMap::new();
        let mut new_since_init = Vec::new();

        for site_cfg in &cfg.sites {
            if sites.contains_key(&site_cfg.name) {
                return Err(Error::Internal(format!(
                    "duplicate site name in configuration: {:?}",
                    site_cfg.name
                )));
            }

            let site = Site::new(&cfg.root, site_cfg.clone(), info_lock.clone());
            let created = site.init().await?;
            if created {
                tracing::info!(site = %site_cfg.name, "site directory created for the first time");
                new_since_init.push(site_cfg.name.clone());
            }
            sites.insert(site_cfg.name.clone(), site);
        }

        Ok(Self {
            sites,
            new_since_init,
        })
    }

    pub fn get_site(&self, name: &str) -> Option<&Site> {
        self.sites.get(name)
    }

    pub fn all_site_names(&self) -> Vec<&str> {
        self.sites.keys().map(|s| s.as_str()).collect()
    }

    pub fn new_site_names_since_init(&self) -> &[String] {
        &self.new_since_init
    }
}
