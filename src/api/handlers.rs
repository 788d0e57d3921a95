//! Route handlers (spec.md §6). Grounded on
//! `original_source/api/handlers.go`, whose `uploadToDeployment` and
//! `finishDeployment` are left as `// TODO` stubs; this implements the
//! fully-specified behavior from spec.md §4.4/§4.10/§6 instead.

use axum::extract::{BodyStream, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use futures::TryStreamExt;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;

use crate::api::auth::AuthenticatedUser;
use crate::api::authz::act;
use crate::api::model::{DeploymentInfoResp, LiveReq, NewDeploymentReq};
use crate::api::AppState;
use crate::deployment::Deployment;
use crate::error::{Error, Result};
use crate::hooks::{self, HookContext, HookPoint, HookVars};
use crate::site::Site;
use crate::tar_extractor;

const FILENAME_HEADER: &str = "x-filename";

fn get_site<'a>(state: &'a AppState, site_name: &str) -> Result<&'a Site> {
    state
        .registry
        .get_site(site_name)
        .ok_or(Error::SiteNotExists)
}

async fn info_resp(site: &Site, site_name: &str, id: &str, deployment: &Deployment) -> Result<DeploymentInfoResp> {
    let info = deployment.get_full_info().await?;
    let is_live = site.get_live_deployment_id().await.ok().as_deref() == Some(id);
    Ok(DeploymentInfoResp::new(site_name, id, info, is_live))
}

fn hook_vars(user: &str, site: &Site, site_name: &str, live_id: &Option<String>) -> HookVars {
    HookVars {
        user: user.to_string(),
        site_name: site_name.to_string(),
        site_path: site.path().display().to_string(),
        site_current_live: live_id.clone().unwrap_or_default(),
        ..Default::default()
    }
}

async fn current_live_id(site: &Site) -> Option<String> {
    site.get_live_deployment_id().await.ok()
}

// GET /sites/{site}/live
pub async fn read_live(
    State(state): State<AppState>,
    Path(site_name): Path<String>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<Json<DeploymentInfoResp>> {
    let site = get_site(&state, &site_name)?;
    if !state.authz.enforce(&user, &site_name, act::READ_LIVE).await? {
        return Err(Error::Forbidden);
    }

    let id = site.get_live_deployment_id().await?;
    let deployment = site.get_deployment(&id).await?;
    Ok(Json(info_resp(site, &site_name, &id, &deployment).await?))
}

// PUT /sites/{site}/live
pub async fn update_live(
    State(state): State<AppState>,
    Path(site_name): Path<String>,
    AuthenticatedUser(user): AuthenticatedUser,
    Json(req): Json<LiveReq>,
) -> Result<Json<DeploymentInfoResp>> {
    let site = get_site(&state, &site_name)?;
    if !state.authz.enforce(&user, &site_name, act::UPDATE_LIVE).await? {
        return Err(Error::Forbidden);
    }

    let live_before = current_live_id(site).await;
    let mut vars = hook_vars(&user, site, &site_name, &live_before);
    vars.deployment_id = req.id.clone();
    vars.deployment_path = site.path().join(&req.id).display().to_string();
    let ctx = HookContext {
        hooks: &site.config().hooks,
        vars: &vars,
    };
    crate::deployment::run_pre_hook(&ctx, HookPoint::PreLive).await?;

    site.set_live_deployment_id(&req.id).await?;

    hooks::run_detached(site.config().hooks.clone(), vars, HookPoint::PostLive);

    let deployment = site.get_deployment(&req.id).await?;
    Ok(Json(info_resp(site, &site_name, &req.id, &deployment).await?))
}

// GET /sites/{site}/deployments
pub async fn list_deployments(
    State(state): State<AppState>,
    Path(site_name): Path<String>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<Json<Vec<String>>> {
    let site = get_site(&state, &site_name)?;
    if !state
        .authz
        .enforce(&user, &site_name, act::LIST_DEPLOYMENTS)
        .await?
    {
        return Err(Error::Forbidden);
    }
    Ok(Json(site.list_deployment_ids().await?))
}

// POST /sites/{site}/deployments
pub async fn create_deployment(
    State(state): State<AppState>,
    Path(site_name): Path<String>,
    AuthenticatedUser(user): AuthenticatedUser,
    Json(req): Json<NewDeploymentReq>,
) -> Result<(StatusCode, Json<DeploymentInfoResp>)> {
    let site = get_site(&state, &site_name)?;
    if !state
        .authz
        .enforce(&user, &site_name, act::CREATE_DEPLOYMENT)
        .await?
    {
        return Err(Error::Forbidden);
    }

    if let Some(meta) = &req.meta {
        if meta.chars().count() > crate::models::MAX_META_LEN {
            return Err(Error::MetaTooLong);
        }
    }

    let live_id = current_live_id(site).await;
    let vars = hook_vars(&user, site, &site_name, &live_id);
    let ctx = HookContext {
        hooks: &site.config().hooks,
        vars: &vars,
    };
    crate::deployment::run_pre_hook(&ctx, HookPoint::PreCreate).await?;

    let (id, deployment) = site.create_new_deployment(user, req.meta).await?;
    let resp = info_resp(site, &site_name, &id, &deployment).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

// GET /sites/{site}/deployments/{id}
pub async fn read_deployment(
    State(state): State<AppState>,
    Path((site_name, id)): Path<(String, String)>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<Json<DeploymentInfoResp>> {
    let site = get_site(&state, &site_name)?;
    if !state
        .authz
        .enforce(&user, &site_name, act::READ_DEPLOYMENT)
        .await?
    {
        return Err(Error::Forbidden);
    }
    let deployment = site.get_deployment(&id).await?;
    Ok(Json(info_resp(site, &site_name, &id, &deployment).await?))
}

// DELETE /sites/{site}/deployments/{id}
pub async fn delete_deployment(
    State(state): State<AppState>,
    Path((site_name, id)): Path<(String, String)>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<StatusCode> {
    let site = get_site(&state, &site_name)?;
    let deployment = site.get_deployment(&id).await?;
    let is_self = deployment.creator().await? == user;

    let allowed = state
        .authz
        .enforce_self_or_any(&user, &site_name, is_self, act::DELETE_SELF, act::DELETE_ANY)
        .await?;
    if !allowed {
        return Err(Error::Forbidden);
    }

    site.delete_deployment(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// POST /sites/{site}/deployments/{id}/upload
pub async fn upload(
    State(state): State<AppState>,
    Path((site_name, id)): Path<(String, String)>,
    AuthenticatedUser(user): AuthenticatedUser,
    headers: HeaderMap,
    body: BodyStream,
) -> Result<StatusCode> {
    let site = get_site(&state, &site_name)?;
    let deployment = site.get_deployment(&id).await?;
    let is_self = deployment.creator().await? == user;

    let allowed = state
        .authz
        .enforce_self_or_any(&user, &site_name, is_self, act::UPLOAD_SELF, act::UPLOAD_ANY)
        .await?;
    if !allowed {
        return Err(Error::Forbidden);
    }

    let filename = headers
        .get(FILENAME_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(Error::InvalidPath)?
        .to_string();

    let reader = StreamReader::new(body.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)));
    let cancel = state.shutdown.child_token();
    deployment.add_file(&filename, reader, &cancel).await?;

    Ok(StatusCode::CREATED)
}

// POST /sites/{site}/deployments/{id}/uploadTar
pub async fn upload_tar(
    State(state): State<AppState>,
    Path((site_name, id)): Path<(String, String)>,
    AuthenticatedUser(user): AuthenticatedUser,
    body: BodyStream,
) -> Result<StatusCode> {
    let site = get_site(&state, &site_name)?;
    let deployment = site.get_deployment(&id).await?;
    let is_self = deployment.creator().await? == user;

    let allowed = state
        .authz
        .enforce_self_or_any(&user, &site_name, is_self, act::UPLOAD_SELF, act::UPLOAD_ANY)
        .await?;
    if !allowed {
        return Err(Error::Forbidden);
    }

    let reader = StreamReader::new(body.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)));
    let cancel = state.shutdown.child_token();
    tar_extractor::extract_tar(&deployment, reader, &cancel).await?;

    Ok(StatusCode::CREATED)
}

// POST /sites/{site}/deployments/{id}/finish
pub async fn finish_deployment(
    State(state): State<AppState>,
    Path((site_name, id)): Path<(String, String)>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<Json<DeploymentInfoResp>> {
    let site = get_site(&state, &site_name)?;
    let deployment = site.get_deployment(&id).await?;
    let is_self = deployment.creator().await? == user;

    let allowed = state
        .authz
        .enforce_self_or_any(&user, &site_name, is_self, act::FINISH_SELF, act::FINISH_ANY)
        .await?;
    if !allowed {
        return Err(Error::Forbidden);
    }

    let live_before = current_live_id(site).await;
    let mut vars = hook_vars(&user, site, &site_name, &live_before);
    vars.deployment_id = id.clone();
    vars.deployment_creator = deployment.creator().await?;
    vars.deployment_path = deployment.path().display().to_string();

    let ctx = HookContext {
        hooks: &site.config().hooks,
        vars: &vars,
    };
    crate::deployment::run_pre_hook(&ctx, HookPoint::PreFinish).await?;

    deployment.finish().await?;
    hooks::run_detached(site.config().hooks.clone(), vars.clone(), HookPoint::PostFinish);

    // spec.md §9: when go_live_on_finish is set and pre_live vetoes, the
    // finish itself still reports success with is_live=false.
    if site.config().go_live_on_finish {
        let pre_live_ctx = HookContext {
            hooks: &site.config().hooks,
            vars: &vars,
        };
        match crate::deployment::run_pre_hook(&pre_live_ctx, HookPoint::PreLive).await {
            Ok(()) => {
                site.set_live_deployment_id(&id).await?;
                hooks::run_detached(site.config().hooks.clone(), vars.clone(), HookPoint::PostLive);
            }
            Err(Error::HookVetoed) => {
                tracing::info!(site = %site_name, id = %id, "pre_live hook vetoed automatic go-live on finish");
            }
            Err(e) => return Err(e),
        }
    }

    Ok(Json(info_resp(site, &site_name, &id, &deployment).await?))
}

/// Wired from `main.rs` as a task deadline: cancels in-flight uploads when
/// the process receives a shutdown signal, exercising the same
/// `CancellationToken` plumbing spec.md §5 requires for client-initiated
/// cancellation.
pub type ShutdownToken = CancellationToken;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::authz::Authorizer;
    use crate::config::SiteConfig;
    use crate::info_store::new_info_lock;
    use crate::registry::SiteRegistry;
    use axum::extract::State as AxumState;
    use std::io::Write;
    use std::time::Duration;

    async fn permissive_state(root: &std::path::Path, site_name: &str) -> AppState {
        permissive_state_with(root, site_name, |_| {}).await
    }

    async fn permissive_state_with(
        root: &std::path::Path,
        site_name: &str,
        customize: impl FnOnce(&mut SiteConfig),
    ) -> AppState {
        let mut site_cfg = SiteConfig {
            name: site_name.to_string(),
            max_history: 2,
            max_open: 2,
            max_concurrent_uploads: 0,
            link_name: "live".to_string(),
            go_live_on_finish: true,
            stale_cleanup_timeout: Duration::from_secs(1800),
            hooks: Default::default(),
        };
        customize(&mut site_cfg);

        let sites_cfg = crate::config::SitesConfig {
            root: root.to_path_buf(),
            sites: vec![site_cfg],
        };
        let registry = SiteRegistry::init(&sites_cfg, new_info_lock()).await.unwrap();

        let mut policy = tempfile::NamedTempFile::new().unwrap();
        for action in [
            act::READ_LIVE,
            act::UPDATE_LIVE,
            act::LIST_DEPLOYMENTS,
            act::READ_DEPLOYMENT,
            act::CREATE_DEPLOYMENT,
            act::UPLOAD_SELF,
            act::UPLOAD_ANY,
            act::FINISH_SELF,
            act::FINISH_ANY,
            act::DELETE_SELF,
            act::DELETE_ANY,
        ] {
            writeln!(policy, "p, alice, {site_name}, {action}").unwrap();
        }
        let authz = Authorizer::load(policy.path()).await.unwrap();

        let htpasswd = tempfile::NamedTempFile::new().unwrap();
        let authn = crate::api::auth::BasicAuth::load(htpasswd.path()).unwrap_or_else(|_| {
            panic!("htpasswd load should succeed for an empty file")
        });

        AppState {
            registry: std::sync::Arc::new(registry),
            authn: std::sync::Arc::new(authn),
            authz: std::sync::Arc::new(authz),
            shutdown: CancellationToken::new(),
        }
    }

    fn alice() -> AuthenticatedUser {
        AuthenticatedUser("alice".to_string())
    }

    // S1: happy path - create, finish (go_live_on_finish), read live.
    #[tokio::test]
    async fn happy_path_create_finish_goes_live() {
        let root = tempfile::tempdir().unwrap();
        let state = permissive_state(root.path(), "demo").await;

        let created = create_deployment(
            AxumState(state.clone()),
            Path("demo".to_string()),
            alice(),
            Json(NewDeploymentReq { meta: Some("v1".into()) }),
        )
        .await
        .unwrap();
        assert_eq!(created.0, StatusCode::CREATED);
        let id = (created.1).0.id.clone();
        assert!(!(created.1).0.is_finished);

        let site = get_site(&state, "demo").unwrap();
        let deployment = site.get_deployment(&id).await.unwrap();
        deployment
            .add_file("index.html", b"<h1>hi</h1>".as_slice(), &CancellationToken::new())
            .await
            .unwrap();

        let finished = finish_deployment(
            AxumState(state.clone()),
            Path(("demo".to_string(), id.clone())),
            alice(),
        )
        .await
        .unwrap();
        assert!(finished.0.is_finished);
        assert!(finished.0.is_live);

        let live = read_live(AxumState(state.clone()), Path("demo".to_string()), alice())
            .await
            .unwrap();
        assert_eq!(live.0.id, id);
    }

    // S2: upload after finish is rejected.
    #[tokio::test]
    async fn upload_after_finish_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let state = permissive_state(root.path(), "demo").await;

        let created = create_deployment(
            AxumState(state.clone()),
            Path("demo".to_string()),
            alice(),
            Json(NewDeploymentReq::default()),
        )
        .await
        .unwrap();
        let id = (created.1).0.id.clone();

        let site = get_site(&state, "demo").unwrap();
        let deployment = site.get_deployment(&id).await.unwrap();
        deployment.finish().await.unwrap();

        let err = deployment
            .add_file("a.html", b"x".as_slice(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DeploymentFinished));
    }

    // S3: deleting the live deployment is forbidden.
    #[tokio::test]
    async fn delete_live_deployment_is_forbidden() {
        let root = tempfile::tempdir().unwrap();
        let state = permissive_state(root.path(), "demo").await;

        let created = create_deployment(
            AxumState(state.clone()),
            Path("demo".to_string()),
            alice(),
            Json(NewDeploymentReq::default()),
        )
        .await
        .unwrap();
        let id = (created.1).0.id.clone();

        finish_deployment(
            AxumState(state.clone()),
            Path(("demo".to_string(), id.clone())),
            alice(),
        )
        .await
        .unwrap();

        let err = delete_deployment(
            AxumState(state.clone()),
            Path(("demo".to_string(), id)),
            alice(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::DeploymentLive));
    }

    // Authorization denial surfaces as Forbidden, not a silent pass-through.
    #[tokio::test]
    async fn unauthorized_subject_is_forbidden() {
        let root = tempfile::tempdir().unwrap();
        let state = permissive_state(root.path(), "demo").await;

        let err = create_deployment(
            AxumState(state),
            Path("demo".to_string()),
            AuthenticatedUser("mallory".to_string()),
            Json(NewDeploymentReq::default()),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Forbidden));
    }

    // spec.md §9: a pre_live veto during go-live-on-finish still reports the
    // finish as successful, just not live.
    #[tokio::test]
    async fn pre_live_veto_during_auto_golive_does_not_fail_finish() {
        let root = tempfile::tempdir().unwrap();
        let state = permissive_state_with(root.path(), "demo", |cfg| {
            cfg.go_live_on_finish = true;
            cfg.hooks.pre_live = "/bin/false".to_string();
        })
        .await;

        let created = create_deployment(
            AxumState(state.clone()),
            Path("demo".to_string()),
            alice(),
            Json(NewDeploymentReq::default()),
        )
        .await
        .unwrap();
        let id = (created.1).0.id.clone();

        let finished = finish_deployment(
            AxumState(state.clone()),
            Path(("demo".to_string(), id.clone())),
            alice(),
        )
        .await
        .unwrap();
        assert!(finished.0.is_finished);
        assert!(!finished.0.is_live);

        let site = get_site(&state, "demo").unwrap();
        assert!(site.get_live_deployment_id().await.is_err());
    }

    // Unknown site names are rejected before any authz check.
    #[tokio::test]
    async fn unknown_site_is_not_found() {
        let root = tempfile::tempdir().unwrap();
        let state = permissive_state(root.path(), "demo").await;

        let err = list_deployments(AxumState(state), Path("nonexistent".to_string()), alice())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SiteNotExists));
    }
}
