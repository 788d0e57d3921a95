//! On-disk data model (spec.md §3): `DeploymentInfo` and its `State` tag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum length, in Unicode scalar values, of `DeploymentInfo::meta`.
pub const MAX_META_LEN: usize = 768;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentState {
    Open,
    Finished,
}

/// Persisted once per deployment as `info.json`. Field-level docs follow
/// spec.md §3 exactly; `PartialEq` backs the info store's change-detection
/// (unchanged values are never rewritten).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentInfo {
    pub creator: String,
    pub created_at: DateTime<Utc>,
    pub state: DeploymentState,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_activity_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<String>,
}

impl DeploymentInfo {
    pub fn is_finished(&self) -> bool {
        matches!(self.state, DeploymentState::Finished)
    }
}

impl Default for DeploymentInfo {
    /// The zero value handed to a `Tx` callback when `info.json` does not yet
    /// exist and the transaction is not read-only (the `Init` case).
    fn default() -> Self {
        let epoch = DateTime::<Utc>::from_timestamp(0, 0).unwrap();
        Self {
            creator: String::new(),
            created_at: epoch,
            state: DeploymentState::Open,
            finished_at: None,
            last_activity_at: epoch,
            meta: None,
        }
    }
}

/// Nanosecond-granularity equality, matching spec.md §4.3's "time comparison
/// uses nanoseconds to tolerate monotonic-clock stripping across round-trips".
/// `chrono::DateTime`'s derived `PartialEq` already compares at this
/// granularity, so this is the identity — named so call sites document intent
/// rather than relying on an implicit derive.
impl PartialEq for DeploymentInfo {
    fn eq(&self, other: &Self) -> bool {
        self.creator == other.creator
            && self.created_at == other.created_at
            && self.state == other.state
            && self.finished_at == other.finished_at
            && self.last_activity_at == other.last_activity_at
            && self.meta == other.meta
    }
}
