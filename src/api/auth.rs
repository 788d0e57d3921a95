//! HTTP Basic authentication against an htpasswd-format file (authN).
//!
//! Grounded on `original_source/authentication/basic_provider.go` and
//! `basic.go`: credentials are loaded once at startup, verified per request,
//! and a 401 always carries the `WWW-Authenticate` challenge header
//! (`error.rs`'s `IntoResponse for Error` attaches it for every
//! `Error::Unauthorized`).

use std::path::Path;

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::headers::authorization::Basic;
use axum::headers::Authorization;
use axum::http::request::Parts;
use axum::TypedHeader;
use htpasswd_verify::Htpasswd;

use crate::error::Error;
use crate::validate;

/// Loaded htpasswd credential set. Immutable for the process lifetime,
/// matching spec.md §3 "Sites are immutable for a process lifetime" — the
/// credential file is read once, not watched.
pub struct BasicAuth {
    htpasswd: Htpasswd<'static>,
}

impl BasicAuth {
    /// Loads and validates `path`. Fails fast (spec.md SPEC_FULL §2) if any
    /// line names a username that `validate::validate_principal_name`
    /// would reject, or carries an empty password hash field — rather than
    /// silently admitting a broken entry the way a bare parse would.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("failed to read htpasswd file {}: {e}", path.display())
        })?;
        Self::validate_entries(&contents)
            .map_err(|e| anyhow::anyhow!("invalid htpasswd file {}: {e}", path.display()))?;

        let leaked: &'static str = Box::leak(contents.into_boxed_str());
        Ok(Self {
            htpasswd: Htpasswd::new(leaked),
        })
    }

    fn validate_entries(contents: &str) -> anyhow::Result<()> {
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.splitn(2, ':');
            let user = parts.next().unwrap_or_default();
            let hash = parts.next().unwrap_or_default();

            validate::validate_principal_name(user)
                .map_err(|_| anyhow::anyhow!("username {user:?} is invalid or reserved"))?;
            if hash.is_empty() {
                anyhow::bail!("user {user:?} has an empty password field");
            }
        }
        Ok(())
    }

    /// Verifies `user`/`pass` against the loaded table. Usernames carrying
    /// the reserved system prefix never match here — that prefix is only
    /// ever assigned internally (e.g. by the janitor), never by an
    /// authenticated client (spec.md §4.1 `ValidatePrincipalName`).
    pub fn check(&self, user: &str, pass: &str) -> bool {
        if validate::validate_principal_name(user).is_err() {
            return false;
        }
        self.htpasswd.check(user, pass)
    }
}

/// Extractor that resolves the authenticated principal's username from the
/// request's `Authorization: Basic` header. Requires `AppState` (or
/// anything `AppState` can be derived `FromRef` from) in the router state.
pub struct AuthenticatedUser(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
    crate::api::AppState: axum::extract::FromRef<S>,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        use axum::extract::FromRef;
        let app_state = crate::api::AppState::from_ref(state);

        let TypedHeader(Authorization(basic)) =
            TypedHeader::<Authorization<Basic>>::from_request_parts(parts, state)
                .await
                .map_err(|_| Error::Unauthorized)?;

        if app_state.authn.check(basic.username(), basic.password()) {
            Ok(Self(basic.username().to_string()))
        } else {
            Err(Error::Unauthorized)
        }
    }
}
