//! Seeds a starter deployment for sites created for the first time this run.
//!
//! Grounded on `original_source/default_deployment/create_default_deployments.go`,
//! whose `CreateDefaultDeploymentsForSites` creates an empty deployment for
//! each freshly-initialized site but stops short of finishing or publishing
//! it (left behind a `// TODO: actually create a deployment`). This
//! completes that TODO: the seeded deployment is created, immediately
//! finished (it carries no content, which is a legal empty `_content/`),
//! and — matching whatever `GoLiveOnFinish` would do for a real upload —
//! published live if the site is configured that way, so a freshly
//! provisioned site always resolves `live` to *something* instead of
//! leaving the symlink absent until the first real deploy.

use crate::error::Result;
use crate::registry::SiteRegistry;
use crate::validate::SYSTEM_PRINCIPAL_PREFIX;

/// Principal recorded as the creator of a seeded default deployment.
pub const SYSTEM_PRINCIPAL: &str = SYSTEM_PRINCIPAL_PREFIX;

/// Creates and finishes an empty starter deployment for every site name in
/// `new_site_names` (as reported by [`SiteRegistry::new_site_names_since_init`]).
pub async fn create_default_deployments(
    registry: &SiteRegistry,
    new_site_names: &[String],
) -> Result<()> {
    for name in new_site_names {
        let Some(site) = registry.get_site(name) else {
            tracing::error!(site = %name, "trying to seed a non-existing site");
            continue;
        };

        tracing::info!(site = %name, "creating default deployment for freshly initialized site");
        let (id, deployment) = site
            .create_new_deployment(SYSTEM_PRINCIPAL.to_string(), None)
            .await?;
        deployment.finish().await?;

        if site.config().go_live_on_finish {
            site.set_live_deployment_id(&id).await?;
        }
        tracing::debug!(site = %name, id = %id, "default deployment ready");
    }
    Ok(())
}
