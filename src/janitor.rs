//! The only core scheduler job: for each site, run stale cleanup then old
//! cleanup. Grounded on `original_source/jobs/janitor.go` and spec.md §4.8's
//! "The only core job is the janitor" paragraph.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;

use crate::cleanup;
use crate::registry::SiteRegistry;
use crate::scheduler::Job;

pub struct JanitorJob {
    registry: Arc<SiteRegistry>,
}

impl JanitorJob {
    pub fn new(registry: Arc<SiteRegistry>) -> Self {
        Self { registry }
    }
}

impl Job for JanitorJob {
    fn name(&self) -> &str {
        "janitor"
    }

    fn run(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let now = Utc::now();
            for name in self.registry.all_site_names() {
                let Some(site) = self.registry.get_site(name) else {
                    tracing::error!(site = name, "trying to access a non-existing site");
                    continue;
                };

                match cleanup::delete_stale_deployments(site, now).await {
                    Ok(n) if n > 0 => tracing::info!(site = name, count = n, "deleted stale deployments"),
                    Ok(_) => {}
                    Err(e) => tracing::error!(site = name, error = %e, "stale cleanup failed"),
                }

                match cleanup::delete_old_deployments(site).await {
                    Ok(n) if n > 0 => tracing::info!(site = name, count = n, "deleted old deployments"),
                    Ok(_) => {}
                    Err(e) => tracing::error!(site = name, error = %e, "old cleanup failed"),
                }
            }
        })
    }
}
