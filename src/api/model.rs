//! Wire request/response types (spec.md §6). Grounded on
//! `original_source/api/model.go`; `ErrorResp` is handled separately by
//! `error.rs`'s `IntoResponse for Error` rather than mirrored here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::DeploymentInfo;

/// Body of `POST /sites/{site}/deployments`.
#[derive(Debug, Deserialize, Default)]
pub struct NewDeploymentReq {
    #[serde(default)]
    pub meta: Option<String>,
}

/// Body of `PUT /sites/{site}/live`.
#[derive(Debug, Deserialize)]
pub struct LiveReq {
    pub id: String,
}

/// `DeploymentInfoResp` (spec.md §6), returned by every route that surfaces
/// a single deployment's state.
#[derive(Debug, Serialize)]
pub struct DeploymentInfoResp {
    pub site: String,
    pub id: String,
    pub creator: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<String>,
    pub is_live: bool,
    pub is_finished: bool,
}

impl DeploymentInfoResp {
    pub fn new(site: &str, id: &str, info: DeploymentInfo, is_live: bool) -> Self {
        Self {
            site: site.to_string(),
            id: id.to_string(),
            creator: info.creator,
            created_at: info.created_at,
            finished_at: info.finished_at,
            meta: info.meta,
            is_live,
            is_finished: info.is_finished(),
        }
    }
}
