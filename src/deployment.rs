//! Deployment object (C4): a thin behavioural façade over a directory and an
//! `InfoStore`. Grounded on `original_source/deployment/deployment_impl.go`
//! and spec.md §4.4.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::hooks;
use crate::info_store::{InfoLock, InfoStore};
use crate::models::{DeploymentInfo, DeploymentState};
use crate::sync::KCounter;
use crate::validate;

pub const CONTENT_DIR_NAME: &str = "_content";

/// Per-deployment pending-upload counters, keyed by deployment path. Threaded
/// through the object graph the same way `InfoLock` is: one instance, shared,
/// never persisted (spec.md §5 "Pending-upload counter").
pub type UploadCounters = std::sync::Arc<KCounter<PathBuf>>;

pub fn new_upload_counters() -> UploadCounters {
    std::sync::Arc::new(KCounter::new())
}

/// Per-site limits a `Deployment` needs in order to enforce quotas without
/// reaching back up to its owning `Site`. Copied by value (spec.md §9: "no
/// back-pointers to Site").
#[derive(Debug, Clone, Copy)]
pub struct DeploymentLimits {
    pub max_concurrent_uploads: usize,
}

pub struct Deployment {
    path: PathBuf,
    info: InfoStore,
    uploads: UploadCounters,
    limits: DeploymentLimits,
}

impl Deployment {
    pub fn new(path: PathBuf, info_lock: InfoLock, uploads: UploadCounters, limits: DeploymentLimits) -> Self {
        let info = InfoStore::new(&path, info_lock);
        Self {
            path,
            info,
            uploads,
            limits,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn content_dir(&self) -> PathBuf {
        self.path.join(CONTENT_DIR_NAME)
    }

    /// Called exactly once, immediately after the directory is created by
    /// `Site::CreateNewDeployment`.
    pub async fn init(&self, creator: String, meta: Option<String>) -> Result<()> {
        let content_dir = self.content_dir();
        if content_dir.exists() {
            return Err(Error::Internal(
                "_content already exists for a freshly created deployment".into(),
            ));
        }
        tokio::fs::create_dir(&content_dir).await?;
        set_mode(&content_dir, 0o750).await?;

        let now = Utc::now();
        self.info
            .tx(false, move |info| {
                info.creator = creator;
                info.created_at = now;
                info.last_activity_at = now;
                info.state = DeploymentState::Open;
                info.meta = meta;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Streams `reader` into `relpath` under `_content/`. Ordering follows
    /// spec.md §4.4 step-by-step. `cancel` is the request-scoped cancellation
    /// token (spec.md §5): if it fires mid-copy, the partial destination file
    /// is removed and `Error::Io` with `ErrorKind::Interrupted` is returned.
    pub async fn add_file<R>(&self, relpath: &str, mut reader: R, cancel: &CancellationToken) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let dest = validate::resolve_content_path(&self.content_dir(), relpath)?;

        self.uploads.increment(self.path.clone());
        let result = self.add_file_inner(&dest, &mut reader, cancel).await;
        self.uploads.decrement(self.path.clone());
        result
    }

    async fn add_file_inner<R>(&self, dest: &Path, reader: &mut R, cancel: &CancellationToken) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let limit = self.limits.max_concurrent_uploads;
        if limit > 0 && self.uploads.count(&self.path) > limit {
            return Err(Error::TooManyConcurrentUploads);
        }

        let now = Utc::now();
        self.info
            .tx(false, move |info| {
                if info.is_finished() {
                    return Err(Error::DeploymentFinished);
                }
                info.last_activity_at = now;
                Ok(())
            })
            .await?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
            set_mode(parent, 0o750).await?;
        }

        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(dest)
            .await
        {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(Error::FileExists)
            }
            Err(e) => return Err(Error::Io(e)),
        };
        set_mode(dest, 0o640).await?;

        let copy_result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(std::io::Error::new(std::io::ErrorKind::Interrupted, "upload cancelled")),
            r = tokio::io::copy(reader, &mut file) => r,
        };
        let copy_result = match copy_result {
            Ok(_) => file.flush().await,
            Err(e) => Err(e),
        };
        match copy_result {
            Ok(()) => Ok(()),
            Err(e) => {
                drop(file);
                let _ = tokio::fs::remove_file(dest).await;
                Err(Error::Io(e))
            }
        }
    }

    /// Transitions `open` → `finished`. Irreversible.
    pub async fn finish(&self) -> Result<()> {
        let now = Utc::now();
        let uploads = self.uploads.clone();
        let path = self.path.clone();
        self.info
            .tx(false, move |info| {
                if info.is_finished() {
                    return Err(Error::DeploymentFinished);
                }
                // Read inside the Tx, not before calling it: the per-deployment
                // Tx mutex is the same keyed lock `AddFile` orders its counter
                // increment and `LastActivityAt` bump against, so a snapshot
                // taken before this closure runs could race an in-flight
                // `AddFile` that increments the counter afterward.
                if uploads.count(&path) > 0 {
                    return Err(Error::UploadPending);
                }
                info.state = DeploymentState::Finished;
                info.finished_at = Some(now);
                info.last_activity_at = now;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn is_finished(&self) -> Result<bool> {
        let info = self.info.tx(true, |_| Ok(())).await?;
        Ok(info.is_finished())
    }

    pub async fn creator(&self) -> Result<String> {
        let info = self.info.tx(true, |_| Ok(())).await?;
        Ok(info.creator)
    }

    pub async fn last_activity(&self) -> Result<DateTime<Utc>> {
        let info = self.info.tx(true, |_| Ok(())).await?;
        Ok(info.last_activity_at)
    }

    pub async fn get_full_info(&self) -> Result<DeploymentInfo> {
        self.info.tx(true, |_| Ok(())).await
    }
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(mode);
    tokio::fs::set_permissions(path, perms).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

/// Runs the hook runner for `pre_*`/`post_*` points that wrap a deployment
/// mutation. Kept here (rather than inline in the HTTP handlers) so both the
/// API layer and any future caller share identical veto semantics.
pub async fn run_pre_hook(ctx: &hooks::HookContext<'_>, point: hooks::HookPoint) -> Result<()> {
    if !hooks::run(ctx, point).await?.allow {
        return Err(Error::HookVetoed);
    }
    Ok(())
}
