//! TLS certificate loading and hot-reload, for the single server-wide
//! certificate `webployd` serves (unlike `gateway/src/tls.rs`'s per-tenant
//! SNI resolver, there is exactly one site-facing endpoint here, so a plain
//! `RustlsConfig` plus a file-watch reload is enough).

use std::path::{Path, PathBuf};
use std::time::Duration;

use axum_server::tls_rustls::RustlsConfig;
use notify::{RecursiveMode, Watcher};

/// Loads `cert`/`key` and spawns a background watcher that calls
/// `RustlsConfig::reload_from_pem_file` whenever either file changes on
/// disk, so operators can rotate a certificate without restarting
/// `webployd`.
pub async fn load_with_hot_reload(cert: &Path, key: &Path) -> anyhow::Result<RustlsConfig> {
    let config = RustlsConfig::from_pem_file(cert, key)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load TLS certificate/key: {e}"))?;

    spawn_watcher(config.clone(), cert.to_path_buf(), key.to_path_buf())?;
    Ok(config)
}

fn spawn_watcher(config: RustlsConfig, cert: PathBuf, key: PathBuf) -> anyhow::Result<()> {
    let (tx, rx) = std::sync::mpsc::channel();
    let mut watcher = notify::recommended_watcher(move |res| {
        let _ = tx.send(res);
    })?;
    watcher.watch(&cert, RecursiveMode::NonRecursive)?;
    watcher.watch(&key, RecursiveMode::NonRecursive)?;

    tokio::task::spawn_blocking(move || {
        // Keep the watcher alive for the life of the task.
        let _watcher = watcher;
        loop {
            match rx.recv_timeout(Duration::from_secs(3600)) {
                Ok(Ok(event)) if is_write_or_create(&event) => {
                    let config = config.clone();
                    let cert = cert.clone();
                    let key = key.clone();
                    tokio::runtime::Handle::current().block_on(async move {
                        match config.reload_from_pem_file(&cert, &key).await {
                            Ok(()) => tracing::info!("reloaded TLS certificate"),
                            Err(e) => tracing::error!(error = %e, "failed to reload TLS certificate"),
                        }
                    });
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "TLS file watcher error"),
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
    });

    Ok(())
}

fn is_write_or_create(event: &notify::Event) -> bool {
    matches!(
        event.kind,
        notify::EventKind::Modify(_) | notify::EventKind::Create(_)
    )
}
