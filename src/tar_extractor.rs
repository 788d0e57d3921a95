//! TAR extractor (C9). Grounded on `original_source/adapters/extract_tar.go`
//! and spec.md §4.9.
//!
//! The `tar` crate only exposes a synchronous [`std::io::Read`] entry API, so
//! the archive is unpacked on a blocking thread (`tokio::task::block_in_place`)
//! the same way `gateway/src/tls.rs`'s `ResolvesServerCert` impl bridges back
//! into async code from a sync callback: the async body is wrapped with
//! [`tokio_util::io::SyncIoBridge`] (which itself drives the runtime via
//! `Handle::block_on` under the hood) and each entry's bytes are replayed
//! through the same [`Deployment::add_file`] used by the plain upload route,
//! via `Handle::current().block_on(..)`, so both paths share one code path
//! for quota checks, containment, and the finished-state guard.
//!
//! Each entry is buffered fully in memory before being handed to `add_file`;
//! acceptable for the HTML/CSS/JS/image assets a static site is made of.

use tokio::io::AsyncRead;
use tokio::runtime::Handle;
use tokio_util::io::SyncIoBridge;
use tokio_util::sync::CancellationToken;

use crate::deployment::Deployment;
use crate::error::{Error, Result};

/// Unpacks `body` into `deployment`, one `AddFile` per regular-file entry.
/// Non-regular entries (directories, symlinks, devices, ...) are skipped;
/// `_content/`'s directory structure is created implicitly by `AddFile`.
/// Returns the names of the files successfully added, for audit purposes
/// (spec.md §4.9), even when a later entry fails.
pub async fn extract_tar<R>(
    deployment: &Deployment,
    body: R,
    cancel: &CancellationToken,
) -> Result<Vec<String>>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let bridge = SyncIoBridge::new(body);
    let handle = Handle::current();
    let mut names = Vec::new();

    let result = tokio::task::block_in_place(|| -> Result<()> {
        let mut archive = tar::Archive::new(bridge);
        let entries = archive.entries().map_err(Error::Io)?;

        for entry in entries {
            if cancel.is_cancelled() {
                break;
            }

            let mut entry = entry.map_err(Error::Io)?;
            if entry.header().entry_type() != tar::EntryType::Regular {
                tracing::debug!(
                    entry_type = ?entry.header().entry_type(),
                    "skipping non-regular TAR entry"
                );
                continue;
            }

            let name = entry
                .path()
                .map_err(Error::Io)?
                .to_string_lossy()
                .into_owned();

            let mut buf = Vec::new();
            std::io::Read::read_to_end(&mut entry, &mut buf).map_err(Error::Io)?;

            handle.block_on(deployment.add_file(&name, buf.as_slice(), cancel))?;
            names.push(name);
        }

        Ok(())
    });

    match result {
        Ok(()) => Ok(names),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deployment::{new_upload_counters, Deployment, DeploymentLimits};
    use crate::info_store::new_info_lock;

    fn new_deployment(root: &std::path::Path) -> Deployment {
        Deployment::new(
            root.to_path_buf(),
            new_info_lock(),
            new_upload_counters(),
            DeploymentLimits {
                max_concurrent_uploads: 0,
            },
        )
    }

    fn build_tar(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn empty_archive_adds_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let dep_path = dir.path().join("deployment_2024-01-01-00-00-00_tar1");
        tokio::fs::create_dir(&dep_path).await.unwrap();
        let dep = new_deployment(&dep_path);
        dep.init("alice".into(), None).await.unwrap();

        let archive = build_tar(&[]);
        let cancel = CancellationToken::new();
        let names = extract_tar(&dep, archive.as_slice(), &cancel).await.unwrap();
        assert!(names.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn regular_files_are_added_and_symlinks_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let dep_path = dir.path().join("deployment_2024-01-01-00-00-00_tar2");
        tokio::fs::create_dir(&dep_path).await.unwrap();
        let dep = new_deployment(&dep_path);
        dep.init("alice".into(), None).await.unwrap();

        let mut builder = tar::Builder::new(Vec::new());
        let mut file_header = tar::Header::new_gnu();
        file_header.set_size(5);
        file_header.set_mode(0o644);
        file_header.set_cksum();
        builder
            .append_data(&mut file_header, "index.html", b"hello".as_slice())
            .unwrap();

        let mut symlink_header = tar::Header::new_gnu();
        symlink_header.set_entry_type(tar::EntryType::Symlink);
        symlink_header.set_size(0);
        symlink_header.set_cksum();
        builder
            .append_link(&mut symlink_header, "evil-link", "/etc/passwd")
            .unwrap();
        let archive = builder.into_inner().unwrap();

        let cancel = CancellationToken::new();
        let names = extract_tar(&dep, archive.as_slice(), &cancel).await.unwrap();

        assert_eq!(names, vec!["index.html".to_string()]);
        assert!(dep.content_dir().join("index.html").exists());
        assert!(!dep.content_dir().join("evil-link").exists());
    }
}
