//! Crate-wide error kinds and their HTTP mapping (spec.md §7).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// A wrapper to capture any error possible with this service.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("malformed deployment id")]
    InvalidId,

    #[error("invalid site name")]
    InvalidSiteName,

    #[error("invalid principal name")]
    InvalidPrincipalName,

    #[error("upload path escapes the deployment content directory")]
    InvalidPath,

    #[error("meta exceeds the maximum length")]
    MetaTooLong,

    #[error("deployment does not exist")]
    DeploymentNotExists,

    #[error("site does not exist")]
    SiteNotExists,

    #[error("deployment is already finished")]
    DeploymentFinished,

    #[error("deployment is not finished")]
    DeploymentNotFinished,

    #[error("deployment is currently live")]
    DeploymentLive,

    #[error("an upload is still pending on this deployment")]
    UploadPending,

    #[error("too many concurrent uploads for this deployment")]
    TooManyConcurrentUploads,

    #[error("too many open (unfinished) deployments for this site")]
    TooManyOpenDeployments,

    #[error("file already exists at this path")]
    FileExists,

    #[error("action was prevented by a hook")]
    HookVetoed,

    #[error("missing or invalid credentials")]
    Unauthorized,

    #[error("not allowed to perform this action")]
    Forbidden,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidId | Error::InvalidSiteName | Error::InvalidPrincipalName => {
                StatusCode::BAD_REQUEST
            }
            Error::InvalidPath => StatusCode::BAD_REQUEST,
            Error::MetaTooLong => StatusCode::BAD_REQUEST,
            Error::DeploymentNotExists | Error::SiteNotExists => StatusCode::NOT_FOUND,
            Error::DeploymentFinished => StatusCode::BAD_REQUEST,
            Error::DeploymentNotFinished => StatusCode::BAD_REQUEST,
            Error::DeploymentLive => StatusCode::CONFLICT,
            Error::UploadPending => StatusCode::CONFLICT,
            Error::TooManyConcurrentUploads | Error::TooManyOpenDeployments => {
                StatusCode::TOO_MANY_REQUESTS
            }
            Error::FileExists => StatusCode::CONFLICT,
            Error::HookVetoed => StatusCode::from_u16(424).unwrap(),
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
            Error::Forbidden => StatusCode::FORBIDDEN,
            Error::Io(_) | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidId => "InvalidID",
            Error::InvalidSiteName => "InvalidSiteName",
            Error::InvalidPrincipalName => "InvalidPrincipalName",
            Error::InvalidPath => "InvalidPath",
            Error::MetaTooLong => "MetaTooLong",
            Error::DeploymentNotExists => "DeploymentNotExists",
            Error::SiteNotExists => "SiteNotExists",
            Error::DeploymentFinished => "DeploymentFinished",
            Error::DeploymentNotFinished => "DeploymentNotFinished",
            Error::DeploymentLive => "DeploymentLive",
            Error::UploadPending => "UploadPending",
            Error::TooManyConcurrentUploads => "TooManyConcurrentUploads",
            Error::TooManyOpenDeployments => "TooManyOpenDeployments",
            Error::FileExists => "FileExists",
            Error::HookVetoed => "HookVetoed",
            Error::Unauthorized => "Unauthorized",
            Error::Forbidden => "Forbidden",
            Error::Io(_) => "Internal",
            Error::Internal(_) => "Internal",
        }
    }
}

#[derive(Serialize)]
struct ErrorResp {
    err: String,
    kind: &'static str,
}

/// Challenge header sent alongside a 401, per
/// `original_source/authentication/basic.go`'s `wwwAuthenticateHeader`.
const WWW_AUTHENTICATE_BASIC: &str = r#"Basic realm="webploy", charset="UTF-8""#;

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let kind = self.kind();

        if matches!(self, Error::Internal(_) | Error::Io(_)) {
            tracing::error!(error = %self, "internal error while handling request");
        }

        let body = Json(ErrorResp {
            err: self.to_string(),
            kind,
        });

        if matches!(self, Error::Unauthorized) {
            return (
                status,
                [(axum::http::header::WWW_AUTHENTICATE, WWW_AUTHENTICATE_BASIC)],
                body,
            )
                .into_response();
        }

        (status, body).into_response()
    }
}
