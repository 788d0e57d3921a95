//! Site object (C5). Grounded on `original_source/site/site_impl.go` and
//! spec.md §4.5.

use std::path::PathBuf;

use tokio::sync::RwLock;

use crate::config::SiteConfig;
use crate::deployment::{new_upload_counters, Deployment, DeploymentLimits, UploadCounters};
use crate::error::{Error, Result};
use crate::info_store::InfoLock;
use crate::validate;

const MAX_CREATE_RETRIES: usize = 10;
const DELETE_SUFFIX: &str = ".delete";

/// Callback signature for `iter_deployments`: `(id, deployment, is_live) ->
/// continue?`. Returning `Ok(false)` stops iteration early without error.
pub type IterVisit<'a> =
    dyn Fn(&str, &Deployment, bool) -> futures::future::BoxFuture<'a, Result<bool>> + Send + Sync + 'a;

pub struct Site {
    full_path: PathBuf,
    cfg: SiteConfig,
    deployments_lock: RwLock<()>,
    info_lock: InfoLock,
    uploads: UploadCounters,
}

impl Site {
    pub fn new(root: &std::path::Path, cfg: SiteConfig, info_lock: InfoLock) -> Self {
        let full_path = root.join(&cfg.name);
        Self {
            full_path,
            cfg,
            deployments_lock: RwLock::new(()),
            info_lock,
            uploads: new_upload_counters(),
        }
    }

    pub fn name(&self) -> &str {
        &self.cfg.name
    }

    pub fn path(&self) -> &std::path::Path {
        &self.full_path
    }

    pub fn config(&self) -> &SiteConfig {
        &self.cfg
    }

    fn path_for_id(&self, id: &str) -> PathBuf {
        self.full_path.join(id)
    }

    fn limits(&self) -> DeploymentLimits {
        DeploymentLimits {
            max_concurrent_uploads: self.cfg.max_concurrent_uploads as usize,
        }
    }

    fn deployment_at(&self, path: PathBuf) -> Deployment {
        Deployment::new(path, self.info_lock.clone(), self.uploads.clone(), self.limits())
    }

    /// Ensures the site directory exists. Returns `true` iff it was just
    /// created (the caller may want to seed a default deployment).
    pub async fn init(&self) -> Result<bool> {
        validate::validate_site_name(&self.cfg.name)?;

        let _guard = self.deployments_lock.write().await;
        match tokio::fs::metadata(&self.full_path).await {
            Ok(meta) if meta.is_dir() => Ok(false),
            Ok(_) => Err(Error::Internal(format!(
                "{} exists but is not a directory",
                self.full_path.display()
            ))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tokio::fs::create_dir(&self.full_path).await?;
                set_mode(&self.full_path, 0o750).await?;
                Ok(true)
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// `CreateNewDeployment` — generates a fresh ID, retrying on collision.
    ///
    /// Enforces `MaxOpen` (spec.md §9 Open Question) by counting currently
    /// unfinished deployments while already holding the site's exclusive
    /// lock, rather than accepting the original's unsynchronized scan: since
    /// `create_new_deployment` already takes the write lock for the whole
    /// operation, folding the count in costs nothing and closes the race the
    /// spec calls out as optional to leave open.
    pub async fn create_new_deployment(
        &self,
        creator: String,
        meta: Option<String>,
    ) -> Result<(String, Deployment)> {
        let _guard = self.deployments_lock.write().await;

        if self.cfg.max_open > 0 {
            let open_count = self.count_open_deployments_locked().await?;
            if open_count >= self.cfg.max_open as usize {
                return Err(Error::TooManyOpenDeployments);
            }
        }

        let mut new_id = String::new();
        let mut new_path = PathBuf::new();
        let mut created = false;
        for attempt in 0..MAX_CREATE_RETRIES {
            new_id = validate::new_deployment_id();
            new_path = self.path_for_id(&new_id);
            match tokio::fs::create_dir(&new_path).await {
                Ok(()) => {
                    created = true;
                    break;
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    tracing::debug!(attempt, id = %new_id, "generated colliding deployment id, retrying");
                    continue;
                }
                Err(e) => return Err(Error::Io(e)),
            }
        }
        if !created {
            return Err(Error::Internal(
                "failed to allocate a unique deployment id after retries".into(),
            ));
        }

        tracing::info!(site = %self.cfg.name, id = %new_id, "initializing new deployment");
        let deployment = self.deployment_at(new_path);
        deployment.init(creator, meta).await?;
        Ok((new_id, deployment))
    }

    /// Counts currently-unfinished deployments. Caller must already hold
    /// `deployments_lock` (read or write); this does not acquire it itself
    /// to avoid deadlocking callers that already hold the write half.
    async fn count_open_deployments_locked(&self) -> Result<usize> {
        let ids = self.list_deployment_ids_blocking()?;
        let mut count = 0;
        for id in ids {
            let deployment = self.deployment_at(self.path_for_id(&id));
            if !deployment.is_finished().await? {
                count += 1;
            }
        }
        Ok(count)
    }

    /// `GetDeployment`
    pub async fn get_deployment(&self, id: &str) -> Result<Deployment> {
        if !validate::is_deployment_id_valid(id) {
            return Err(Error::InvalidId);
        }
        let path = self.path_for_id(id);

        let _guard = self.deployments_lock.read().await;
        if !exists_and_dir(&path).await? {
            return Err(Error::DeploymentNotExists);
        }
        Ok(self.deployment_at(path))
    }

    fn list_deployment_ids_blocking(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let entries = std::fs::read_dir(&self.full_path)?;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(DELETE_SUFFIX) {
                continue;
            }
            if name == self.cfg.link_name || name == format!("{}.new", self.cfg.link_name) {
                continue;
            }
            if entry.file_type()?.is_dir() && validate::is_deployment_id_valid(&name) {
                ids.push(name);
            }
        }
        Ok(ids)
    }

    /// `ListDeploymentIDs`
    pub async fn list_deployment_ids(&self) -> Result<Vec<String>> {
        let _guard = self.deployments_lock.read().await;
        self.list_deployment_ids_blocking()
    }

    /// `GetLiveDeploymentID` — readlink, basename, validate.
    pub async fn get_live_deployment_id(&self) -> Result<String> {
        let _guard = self.deployments_lock.read().await;
        self.read_live_symlink().await
    }

    async fn read_live_symlink(&self) -> Result<String> {
        let link_path = self.full_path.join(&self.cfg.link_name);
        let target = match tokio::fs::read_link(&link_path).await {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::DeploymentNotExists)
            }
            Err(e) => return Err(Error::Io(e)),
        };
        let id = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if !validate::is_deployment_id_valid(&id) {
            return Err(Error::InvalidId);
        }
        Ok(id)
    }

    /// `IterDeployments` — holds the shared lock for the whole iteration.
    pub async fn iter_deployments(&self, visit: &IterVisit<'_>) -> Result<()> {
        let _guard = self.deployments_lock.read().await;

        let ids = self.list_deployment_ids_blocking()?;
        let live_id = match self.read_live_symlink().await {
            Ok(id) => Some(id),
            Err(Error::DeploymentNotExists) | Err(Error::InvalidId) => None,
            Err(e) => return Err(e),
        };

        for id in ids {
            let path = self.path_for_id(&id);
            let deployment = self.deployment_at(path);
            let is_live = live_id.as_deref() == Some(id.as_str());
            let cont = visit(&id, &deployment, is_live).await?;
            if !cont {
                break;
            }
        }
        Ok(())
    }

    /// `SetLiveDeploymentID` — atomic unlink-tmp/symlink/rename swap.
    pub async fn set_live_deployment_id(&self, id: &str) -> Result<()> {
        if !validate::is_deployment_id_valid(id) {
            return Err(Error::InvalidId);
        }

        let link_path = self.full_path.join(&self.cfg.link_name);
        let tmp_link_path = self.full_path.join(format!("{}.new", self.cfg.link_name));

        let _guard = self.deployments_lock.write().await;

        let deployment_path = self.path_for_id(id);
        if !exists_and_dir(&deployment_path).await? {
            return Err(Error::DeploymentNotExists);
        }
        let deployment = self.deployment_at(deployment_path);
        if !deployment.is_finished().await? {
            return Err(Error::DeploymentNotFinished);
        }

        match tokio::fs::remove_file(&tmp_link_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::Io(e)),
        }

        symlink(id, &tmp_link_path).await?;
        tokio::fs::rename(&tmp_link_path, &link_path).await?;
        Ok(())
    }

    /// `DeleteDeployment` — rename-to-tombstone then background tree removal.
    pub async fn delete_deployment(&self, id: &str) -> Result<()> {
        if !validate::is_deployment_id_valid(id) {
            return Err(Error::InvalidId);
        }

        let _guard = self.deployments_lock.write().await;

        if let Ok(live_id) = self.read_live_symlink().await {
            if live_id == id {
                return Err(Error::DeploymentLive);
            }
        }

        let full_path = self.path_for_id(id);
        let tombstone_path = self.full_path.join(format!("{id}{DELETE_SUFFIX}"));

        tracing::debug!(id, "renaming deployment to tombstone before deletion");
        match tokio::fs::rename(&full_path, &tombstone_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::DeploymentNotExists)
            }
            Err(e) => return Err(Error::Io(e)),
        }

        let site_name = self.cfg.name.clone();
        tokio::spawn(async move {
            tracing::debug!(site = %site_name, id = %tombstone_path.display(), "removing deployment tree in background");
            if let Err(e) = tokio::fs::remove_dir_all(&tombstone_path).await {
                tracing::error!(site = %site_name, path = %tombstone_path.display(), error = %e, "failed to delete deployment folder");
            }
        });

        Ok(())
    }
}

async fn exists_and_dir(path: &std::path::Path) -> Result<bool> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(meta.is_dir()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::Io(e)),
    }
}

#[cfg(unix)]
async fn symlink(target: &str, link: &std::path::Path) -> Result<()> {
    tokio::fs::symlink(target, link).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn symlink(_target: &str, _link: &std::path::Path) -> Result<()> {
    Err(Error::Internal("symlinks are not supported on this platform".into()))
}

#[cfg(unix)]
async fn set_mode(path: &std::path::Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn set_mode(_path: &std::path::Path, _mode: u32) -> Result<()> {
    Ok(())
}
