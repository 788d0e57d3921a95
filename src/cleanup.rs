//! Cleanup policies (C7). Grounded on
//! `original_source/adapters/cleanups.go` and spec.md §4.7. The original's
//! `DeleteOldDeployments` never finishes its own sort-and-trim step (its
//! `deploymentsToDelete` slice is left permanently empty behind a `TODO`);
//! this implements the fully-specified version from spec.md instead.

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::site::Site;

/// Stale cleanup: delete non-live, unfinished deployments whose
/// `LastActivityAt` is more than `StaleCleanupTimeout` behind `reference_now`.
/// No-op if the site's timeout is zero. Returns the number deleted.
pub async fn delete_stale_deployments(site: &Site, reference_now: DateTime<Utc>) -> Result<usize> {
    let timeout = site.config().stale_cleanup_timeout;
    if timeout.is_zero() {
        tracing::debug!(site = %site.name(), "stale cleanup disabled for this site");
        return Ok(0);
    }

    let mut to_delete = Vec::new();
    site.iter_deployments(&|id, deployment, is_live| {
        let id = id.to_string();
        Box::pin(async move {
            if is_live {
                return Ok(true);
            }
            if deployment.is_finished().await? {
                return Ok(true);
            }
            let last_activity = deployment.last_activity().await?;
            let inactive_since = reference_now.signed_duration_since(last_activity);
            let timeout_chrono =
                chrono::Duration::from_std(timeout).expect("stale_cleanup_timeout fits in i64 ms");
            if inactive_since > timeout_chrono {
                to_delete.push(id);
            }
            Ok(true)
        })
    })
    .await?;

    tracing::debug!(site = %site.name(), count = to_delete.len(), "gathered stale deployments for deletion");

    for id in &to_delete {
        tracing::info!(site = %site.name(), id = %id, "deleting stale deployment");
        site.delete_deployment(id).await?;
    }
    Ok(to_delete.len())
}

/// Old-cleanup (quota): keep the newest `MaxHistory` finished, non-live
/// deployments; delete the rest, oldest first. No-op if under quota.
pub async fn delete_old_deployments(site: &Site) -> Result<usize> {
    let mut finished: Vec<(String, DateTime<Utc>)> = Vec::new();
    site.iter_deployments(&|id, deployment, is_live| {
        let id = id.to_string();
        Box::pin(async move {
            if is_live {
                return Ok(true);
            }
            let info = deployment.get_full_info().await?;
            if !info.is_finished() {
                return Ok(true);
            }
            finished.push((id, info.created_at));
            Ok(true)
        })
    })
    .await?;

    let max_history = site.config().max_history as usize;
    if finished.len() <= max_history {
        tracing::debug!(site = %site.name(), "max_history not yet reached, nothing to do");
        return Ok(0);
    }

    finished.sort_by_key(|(_, created_at)| *created_at);
    let excess = finished.len() - max_history;
    let to_delete = &finished[..excess];

    tracing::debug!(site = %site.name(), count = to_delete.len(), "gathered old deployments for deletion");

    for (id, _) in to_delete {
        tracing::info!(site = %site.name(), id = %id, "deleting old deployment");
        site.delete_deployment(id).await?;
    }
    Ok(to_delete.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SiteConfig;
    use crate::info_store::new_info_lock;
    use std::time::Duration;

    fn cfg(name: &str, max_history: u32, stale_timeout: Duration) -> SiteConfig {
        SiteConfig {
            name: name.to_string(),
            max_history,
            max_open: 10,
            max_concurrent_uploads: 0,
            link_name: "live".to_string(),
            go_live_on_finish: false,
            stale_cleanup_timeout: stale_timeout,
            hooks: Default::default(),
        }
    }

    #[tokio::test]
    async fn old_cleanup_keeps_newest_under_quota() {
        let root = tempfile::tempdir().unwrap();
        let site = Site::new(root.path(), cfg("demo", 2, Duration::from_secs(0)), new_info_lock());
        site.init().await.unwrap();

        let mut ids = Vec::new();
        for i in 0..4 {
            let (id, dep) = site
                .create_new_deployment(format!("user{i}"), None)
                .await
                .unwrap();
            dep.finish().await.unwrap();
            ids.push(id);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let deleted = delete_old_deployments(&site).await.unwrap();
        assert_eq!(deleted, 2);

        let remaining = site.list_deployment_ids().await.unwrap();
        let mut remaining_sorted = remaining.clone();
        remaining_sorted.sort();
        let mut expected = vec![ids[2].clone(), ids[3].clone()];
        expected.sort();
        assert_eq!(remaining_sorted, expected);
    }

    #[tokio::test]
    async fn old_cleanup_never_deletes_live() {
        let root = tempfile::tempdir().unwrap();
        let site = Site::new(root.path(), cfg("demo", 1, Duration::from_secs(0)), new_info_lock());
        site.init().await.unwrap();

        let (id1, dep1) = site.create_new_deployment("a".into(), None).await.unwrap();
        dep1.finish().await.unwrap();
        site.set_live_deployment_id(&id1).await.unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        let (id2, dep2) = site.create_new_deployment("b".into(), None).await.unwrap();
        dep2.finish().await.unwrap();

        let deleted = delete_old_deployments(&site).await.unwrap();
        assert_eq!(deleted, 1);
        let remaining = site.list_deployment_ids().await.unwrap();
        assert_eq!(remaining, vec![id1]);
        let _ = id2;
    }

    #[tokio::test]
    async fn stale_cleanup_reaps_inactive_open_deployments() {
        let root = tempfile::tempdir().unwrap();
        let site = Site::new(
            root.path(),
            cfg("demo", 10, Duration::from_secs(30 * 60)),
            new_info_lock(),
        );
        site.init().await.unwrap();

        let (stale_id, _dep) = site.create_new_deployment("a".into(), None).await.unwrap();
        let reference_now = Utc::now() + chrono::Duration::minutes(31);

        let deleted = delete_stale_deployments(&site, reference_now).await.unwrap();
        assert_eq!(deleted, 1);
        assert!(site.get_deployment(&stale_id).await.is_err());
    }

    #[tokio::test]
    async fn stale_cleanup_disabled_when_timeout_zero() {
        let root = tempfile::tempdir().unwrap();
        let site = Site::new(root.path(), cfg("demo", 10, Duration::from_secs(0)), new_info_lock());
        site.init().await.unwrap();
        site.create_new_deployment("a".into(), None).await.unwrap();

        let deleted = delete_stale_deployments(&site, Utc::now() + chrono::Duration::days(1))
            .await
            .unwrap();
        assert_eq!(deleted, 0);
    }
}
