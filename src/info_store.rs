//! Per-deployment transactional metadata store (C3).
//!
//! Grounded on `original_source/deployment/info/local_file_provider.go` and
//! spec.md §4.3. The Go original's `Tx` is sketched incompletely in the
//! source tree (it references `currentState`/`newState` that are never
//! bound); the exact change-detection and atomic-write sequence here follows
//! spec.md's fully-specified prose instead.

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fd_lock::RwLock as FileLock;

use crate::error::{Error, Result};
use crate::models::DeploymentInfo;
use crate::sync::KMutex;

pub const INFO_FILE_NAME: &str = "info.json";

/// Process-wide keyed lock over deployment info-file paths, wired into every
/// `InfoStore` a `Site`/`Deployment` constructs. Kept as an `Arc` threaded
/// through the object graph rather than a `static`, per spec.md §9's design
/// note against true globals.
pub type InfoLock = Arc<KMutex<PathBuf>>;

pub fn new_info_lock() -> InfoLock {
    Arc::new(KMutex::new())
}

pub struct InfoStore {
    info_path: PathBuf,
    lock: InfoLock,
}

impl InfoStore {
    pub fn new(deployment_path: &Path, lock: InfoLock) -> Self {
        Self {
            info_path: deployment_path.join(INFO_FILE_NAME),
            lock,
        }
    }

    /// Runs `f` against the current `DeploymentInfo`, serialized against every
    /// other in-process `Tx` on this same path and guarded by an OS advisory
    /// file lock against other processes. Writes back iff `!readonly` and `f`
    /// left the value changed.
    pub async fn tx<F>(&self, readonly: bool, f: F) -> Result<DeploymentInfo>
    where
        F: FnOnce(&mut DeploymentInfo) -> Result<()> + Send + 'static,
    {
        let _guard = self.lock.lock(self.info_path.clone()).await;
        let path = self.info_path.clone();
        tokio::task::spawn_blocking(move || Self::tx_blocking(&path, readonly, f))
            .await
            .map_err(|e| Error::Internal(format!("info store task panicked: {e}")))?
    }

    fn tx_blocking<F>(path: &Path, readonly: bool, f: F) -> Result<DeploymentInfo>
    where
        F: FnOnce(&mut DeploymentInfo) -> Result<()>,
    {
        let existed = path.exists();
        if !existed && readonly {
            return Err(Error::DeploymentNotExists);
        }

        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(!readonly)
            .open(path)?;
        let mut locked = FileLock::new(file);
        let mut guard = locked.write()?;

        let mut buf = String::new();
        guard.read_to_string(&mut buf)?;

        let original: DeploymentInfo = if buf.trim().is_empty() {
            DeploymentInfo::default()
        } else {
            serde_json::from_str(&buf).map_err(|e| Error::Internal(format!("corrupt info.json: {e}")))?
        };

        let mut info = original.clone();
        f(&mut info)?;

        if !readonly && info != original {
            Self::write_atomic(path, &info)?;
        }

        let _ = guard.seek(SeekFrom::Start(0));
        Ok(info)
    }

    fn write_atomic(path: &Path, info: &DeploymentInfo) -> Result<()> {
        let encoded = serde_json::to_vec_pretty(info)
            .map_err(|e| Error::Internal(format!("failed to encode info.json: {e}")))?;

        let dir = path.parent().ok_or_else(|| {
            Error::Internal("info.json path has no parent directory".to_string())
        })?;
        let tmp_path = dir.join(format!(
            ".{}.tmp",
            path.file_name().unwrap_or_default().to_string_lossy()
        ));

        {
            let mut tmp = std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)?;
            tmp.write_all(&encoded)?;
            tmp.sync_all()?;
        }
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DeploymentState;
    use chrono::Utc;

    fn new_store() -> (tempfile::TempDir, InfoStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = InfoStore::new(dir.path(), new_info_lock());
        (dir, store)
    }

    #[tokio::test]
    async fn init_on_missing_file_creates_it() {
        let (dir, store) = new_store();
        let now = Utc::now();
        store
            .tx(false, move |info| {
                info.creator = "alice".into();
                info.created_at = now;
                info.last_activity_at = now;
                info.state = DeploymentState::Open;
                Ok(())
            })
            .await
            .unwrap();

        assert!(dir.path().join(INFO_FILE_NAME).exists());
        let got = store.tx(true, |_| Ok(())).await.unwrap();
        assert_eq!(got.creator, "alice");
    }

    #[tokio::test]
    async fn readonly_tx_on_missing_file_errors() {
        let (_dir, store) = new_store();
        let err = store.tx(true, |_| Ok(())).await.unwrap_err();
        assert!(matches!(err, Error::DeploymentNotExists));
    }

    #[tokio::test]
    async fn unchanged_value_is_not_rewritten() {
        let (dir, store) = new_store();
        store
            .tx(false, |info| {
                info.creator = "bob".into();
                Ok(())
            })
            .await
            .unwrap();

        let info_path = dir.path().join(INFO_FILE_NAME);
        let before = std::fs::metadata(&info_path).unwrap().modified().unwrap();

        std::thread::sleep(std::time::Duration::from_millis(10));
        store.tx(false, |_| Ok(())).await.unwrap();

        let after = std::fs::metadata(&info_path).unwrap().modified().unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn callback_error_aborts_without_writing() {
        let (_dir, store) = new_store();
        store
            .tx(false, |info| {
                info.creator = "carol".into();
                Ok(())
            })
            .await
            .unwrap();

        let err = store
            .tx(false, |info| {
                info.creator = "mallory".into();
                Err(Error::Internal("nope".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));

        let got = store.tx(true, |_| Ok(())).await.unwrap();
        assert_eq!(got.creator, "carol");
    }
}
