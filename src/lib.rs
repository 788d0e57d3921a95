//! `webploy`: a multi-tenant static-site deployment server.

pub mod api;
pub mod args;
pub mod cleanup;
pub mod config;
pub mod default_deployment;
pub mod deployment;
pub mod error;
pub mod hooks;
pub mod info_store;
pub mod janitor;
pub mod logging;
pub mod models;
pub mod registry;
pub mod scheduler;
pub mod site;
pub mod sync;
pub mod tar_extractor;
pub mod validate;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use api::auth::BasicAuth;
use api::authz::Authorizer;
use api::AppState;
use config::WebployConfig;
use info_store::new_info_lock;
use janitor::JanitorJob;
use registry::SiteRegistry;
use scheduler::Scheduler;

/// How often the janitor job fires (`original_source/jobs/jobs.go`'s
/// `cleanupInterval` constant).
const JANITOR_INTERVAL: Duration = Duration::from_secs(60);

/// Builds every long-lived service from `cfg`, seeds default deployments for
/// freshly-created sites, starts the janitor, and serves the HTTP API until
/// `shutdown` fires. Owns the whole bootstrap sequence so `main.rs` stays a
/// thin argument/signal shim, matching how `deployer`/`gateway`'s `main.rs`
/// defer everything to a `start`-style library function.
pub async fn run(cfg: WebployConfig, shutdown: CancellationToken) -> anyhow::Result<()> {
    let registry = Arc::new(SiteRegistry::init(&cfg.sites, new_info_lock()).await?);

    let new_sites = registry.new_site_names_since_init().to_vec();
    if !new_sites.is_empty() {
        default_deployment::create_default_deployments(&registry, &new_sites).await?;
    }

    let authn = Arc::new(BasicAuth::load(&cfg.authentication.basic_auth.htpasswd_file)?);
    let authz = Arc::new(Authorizer::load(&cfg.authorization.policy_file).await?);

    let mut scheduler = Scheduler::spawn(JanitorJob::new(registry.clone()), JANITOR_INTERVAL);

    let state = AppState {
        registry,
        authn,
        authz,
        shutdown: shutdown.clone(),
    };
    let app = api::router(state);

    let addr = parse_bind_addr(&cfg.listen.bind_addr)?;
    tracing::info!(%addr, tls = cfg.listen.enable_tls, "starting webployd");

    let handle = axum_server::Handle::new();
    let shutdown_handle = handle.clone();
    tokio::spawn(async move {
        shutdown.cancelled().await;
        tracing::info!("shutting down HTTP listener gracefully");
        shutdown_handle.graceful_shutdown(Some(Duration::from_secs(30)));
    });

    let serve_result = if cfg.listen.enable_tls {
        let cert = cfg
            .listen
            .tls_cert
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("listen.enable_tls is set but listen.tls_cert is missing"))?;
        let key = cfg
            .listen
            .tls_key
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("listen.enable_tls is set but listen.tls_key is missing"))?;
        let tls_config = api::tls::load_with_hot_reload(cert, key).await?;

        axum_server::bind_rustls(addr, tls_config)
            .handle(handle)
            .serve(app.into_make_service())
            .await
    } else {
        axum_server::bind(addr)
            .handle(handle)
            .serve(app.into_make_service())
            .await
    };

    scheduler.stop().await;
    serve_result.map_err(|e| anyhow::anyhow!("server error: {e}"))?;
    Ok(())
}

/// Parses the Go-flavored `":8000"` / `"127.0.0.1:8000"` bind address
/// convention used throughout the original's YAML configs
/// (`original_source/config/model.go`'s `BindAddr string \`yaml:"bind_addr"\``)
/// into a [`SocketAddr`], defaulting a bare `:port` to all interfaces.
fn parse_bind_addr(raw: &str) -> anyhow::Result<SocketAddr> {
    let normalized = if let Some(port) = raw.strip_prefix(':') {
        format!("0.0.0.0:{port}")
    } else {
        raw.to_string()
    };
    normalized
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid listen.bind_addr {raw:?}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_port_binds_all_interfaces() {
        let addr = parse_bind_addr(":8000").unwrap();
        assert_eq!(addr, "0.0.0.0:8000".parse().unwrap());
    }

    #[test]
    fn explicit_host_is_kept() {
        let addr = parse_bind_addr("127.0.0.1:9001").unwrap();
        assert_eq!(addr, "127.0.0.1:9001".parse().unwrap());
    }
}
