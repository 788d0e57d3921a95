//! Hook runner (C10). Grounded on `original_source/hooks/executor.go`,
//! `hooks.go`, `vars.go` and `ids.go`; spec.md §4.10.

use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPoint {
    PreCreate,
    PreFinish,
    PostFinish,
    PreLive,
    PostLive,
}

impl HookPoint {
    pub fn as_str(self) -> &'static str {
        match self {
            HookPoint::PreCreate => "pre_create",
            HookPoint::PreFinish => "pre_finish",
            HookPoint::PostFinish => "post_finish",
            HookPoint::PreLive => "pre_live",
            HookPoint::PostLive => "post_live",
        }
    }

    pub fn is_pre(self) -> bool {
        matches!(
            self,
            HookPoint::PreCreate | HookPoint::PreFinish | HookPoint::PreLive
        )
    }
}

/// Per-site configured hook program paths. An empty string (the default)
/// means "no hook configured" for that point.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HooksConfig {
    #[serde(default)]
    pub pre_create: String,
    #[serde(default)]
    pub pre_finish: String,
    #[serde(default)]
    pub post_finish: String,
    #[serde(default)]
    pub pre_live: String,
    #[serde(default)]
    pub post_live: String,
}

impl HooksConfig {
    fn path_for(&self, point: HookPoint) -> &str {
        match point {
            HookPoint::PreCreate => &self.pre_create,
            HookPoint::PreFinish => &self.pre_finish,
            HookPoint::PostFinish => &self.post_finish,
            HookPoint::PreLive => &self.pre_live,
            HookPoint::PostLive => &self.post_live,
        }
    }
}

/// Everything a hook invocation needs to fill in its `WEBPLOY_*` environment.
/// Built fresh per request from the site/deployment the caller already has in
/// hand; there is no back-reference into `Site`/`Deployment` (spec.md §9).
#[derive(Debug, Clone, Default)]
pub struct HookVars {
    pub user: String,
    pub site_name: String,
    pub site_path: String,
    pub site_current_live: String,
    pub deployment_id: String,
    pub deployment_creator: String,
    pub deployment_meta: String,
    pub deployment_path: String,
}

impl HookVars {
    fn compile_envvars(&self, hook: HookPoint) -> Vec<(String, String)> {
        vec![
            ("WEBPLOY_HOOK".into(), hook.as_str().to_string()),
            ("WEBPLOY_USER".into(), self.user.clone()),
            ("WEBPLOY_SITE".into(), self.site_name.clone()),
            ("WEBPLOY_SITE_PATH".into(), self.site_path.clone()),
            (
                "WEBPLOY_SITE_CURRENT_LIVE".into(),
                self.site_current_live.clone(),
            ),
            (
                "WEBPLOY_DEPLOYMENT_CREATOR".into(),
                self.deployment_creator.clone(),
            ),
            ("WEBPLOY_DEPLOYMENT_META".into(), self.deployment_meta.clone()),
            ("WEBPLOY_DEPLOYMENT_PATH".into(), self.deployment_path.clone()),
            ("WEBPLOY_DEPLOYMENT_ID".into(), self.deployment_id.clone()),
        ]
    }
}

/// Everything `run` needs; borrowed rather than owned since callers already
/// hold the config and vars for the duration of the call.
pub struct HookContext<'a> {
    pub hooks: &'a HooksConfig,
    pub vars: &'a HookVars,
}

pub struct HookOutcome {
    pub allow: bool,
}

/// Runs the program configured for `point`, if any. `pre_*` hooks should be
/// awaited inline (their context is the request's, so client disconnect
/// cancels them); `post_*` hooks should be spawned onto a detached task with
/// a fresh context by the caller (see `run_detached`).
pub async fn run(ctx: &HookContext<'_>, point: HookPoint) -> Result<HookOutcome> {
    let hook_path = ctx.hooks.path_for(point);
    if hook_path.is_empty() {
        tracing::debug!(hook = point.as_str(), "no hook configured");
        return Ok(HookOutcome { allow: true });
    }

    let mut args = vec![point.as_str().to_string()];
    if !ctx.vars.deployment_path.is_empty() {
        args.push(ctx.vars.deployment_path.clone());
    }
    let envvars = ctx.vars.compile_envvars(point);

    let mut cmd = Command::new(hook_path);
    cmd.args(&args)
        .envs(envvars)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let output = cmd.output().await.map_err(Error::Io)?;
    let combined = [output.stdout.as_slice(), output.stderr.as_slice()].concat();
    let exit_code = output.status.code().unwrap_or(-1);

    tracing::info!(
        hook = point.as_str(),
        site = %ctx.vars.site_name,
        deployment = %ctx.vars.deployment_id,
        exit_code,
        output = %String::from_utf8_lossy(&combined),
        "hook executed"
    );

    Ok(HookOutcome {
        allow: output.status.success(),
    })
}

/// Fire-and-forget variant for `post_*` hooks: runs on its own task with an
/// owned copy of the config/vars, logs failures, never propagates them.
pub fn run_detached(hooks: HooksConfig, vars: HookVars, point: HookPoint) {
    debug_assert!(!point.is_pre(), "post_* hooks only");
    tokio::spawn(async move {
        let ctx = HookContext {
            hooks: &hooks,
            vars: &vars,
        };
        if let Err(e) = run(&ctx, point).await {
            tracing::warn!(hook = point.as_str(), error = %e, "post hook failed");
        }
    });
}
