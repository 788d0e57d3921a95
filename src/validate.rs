//! Path & name validators (C1).
//!
//! All functions here are pure: no filesystem access, no locking. Grounded on
//! `original_source/utils/validate.go`, `site/validate.go`,
//! `authentication/validate.go` and `site/ids.go`.

use std::path::{Component, Path};
use std::time::SystemTime;

use chrono::{DateTime, NaiveDateTime, Timelike, Utc};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Usernames with this prefix are reserved for the server itself (e.g. the
/// janitor job uses `_system`); a real user can never authenticate as one.
pub const SYSTEM_PRINCIPAL_PREFIX: &str = "_system";

const DEPLOYMENT_ID_PREFIX: &str = "deployment";
const DEPLOYMENT_ID_SEPARATOR: char = '_';
const DEPLOYMENT_ID_TIME_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";
const DELETE_SUFFIX: &str = ".delete";

fn is_printable_ascii(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii() && !c.is_ascii_control())
}

/// `ValidateSiteName` — non-empty, no leading `.`, no `/` or `\`, printable ASCII only.
pub fn validate_site_name(s: &str) -> Result<()> {
    if s.is_empty() {
        return Err(Error::InvalidSiteName);
    }
    if s.starts_with('.') {
        return Err(Error::InvalidSiteName);
    }
    if s.contains('/') || s.contains('\\') {
        return Err(Error::InvalidSiteName);
    }
    if !is_printable_ascii(s) {
        return Err(Error::InvalidSiteName);
    }
    Ok(())
}

/// `ValidatePrincipalName` — non-empty, printable ASCII, and must not claim the
/// reserved system prefix (users authenticating from "outside" can never use it,
/// though the server uses it internally for e.g. janitor-initiated deletes).
pub fn validate_principal_name(s: &str) -> Result<()> {
    if s.is_empty() {
        return Err(Error::InvalidPrincipalName);
    }
    if s.starts_with(SYSTEM_PRINCIPAL_PREFIX) {
        return Err(Error::InvalidPrincipalName);
    }
    if !is_printable_ascii(s) {
        return Err(Error::InvalidPrincipalName);
    }
    Ok(())
}

/// `ParseDeploymentID` — parses `deployment_<YYYY-MM-DD-HH-MM-SS>_<uuid>`,
/// returns `(uuid, timestamp)`. Rejects `.delete`-suffixed names.
pub fn parse_deployment_id(id: &str) -> Result<(Uuid, DateTime<Utc>)> {
    if id.ends_with(DELETE_SUFFIX) {
        return Err(Error::InvalidId);
    }

    let parts: Vec<&str> = id.splitn(3, DEPLOYMENT_ID_SEPARATOR).collect();
    if parts.len() != 3 {
        return Err(Error::InvalidId);
    }
    if parts[0] != DEPLOYMENT_ID_PREFIX {
        return Err(Error::InvalidId);
    }

    let naive = NaiveDateTime::parse_from_str(parts[1], DEPLOYMENT_ID_TIME_FORMAT)
        .map_err(|_| Error::InvalidId)?;
    let ts = DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc);

    let uuid = Uuid::parse_str(parts[2]).map_err(|_| Error::InvalidId)?;

    Ok((uuid, ts))
}

/// `IsDeploymentIDValid`
pub fn is_deployment_id_valid(id: &str) -> bool {
    parse_deployment_id(id).is_ok()
}

/// `NewDeploymentID` — composes `deployment_<ts>_<uuid>` from the current time
/// and a freshly generated random UUID.
pub fn new_deployment_id() -> String {
    new_deployment_id_at(Utc::now())
}

pub fn new_deployment_id_at(now: DateTime<Utc>) -> String {
    let uuid = Uuid::new_v4();
    format!(
        "{DEPLOYMENT_ID_PREFIX}{DEPLOYMENT_ID_SEPARATOR}{}{DEPLOYMENT_ID_SEPARATOR}{uuid}",
        now.format(DEPLOYMENT_ID_TIME_FORMAT)
    )
}

/// `IsSubpath` — true iff the relative path from `parent` to `candidate`
/// contains no `..` component. Used to enforce invariant 5 (containment).
///
/// Unlike a simple string-prefix check, this walks path components so that
/// e.g. `_content_evil` is never mistaken for a child of `_content`.
pub fn is_subpath(parent: &Path, candidate: &Path) -> bool {
    match candidate.strip_prefix(parent) {
        Ok(rel) => !rel
            .components()
            .any(|c| matches!(c, Component::ParentDir)),
        Err(_) => false,
    }
}

/// Resolves `relpath` against `content_root` the way `AddFile` must (spec.md
/// §4.4 step 1): reject absolute paths outright, then reject any resolution
/// that would escape `content_root`.
pub fn resolve_content_path(content_root: &Path, relpath: &str) -> Result<std::path::PathBuf> {
    let rel = Path::new(relpath);
    if rel.is_absolute() {
        return Err(Error::InvalidPath);
    }
    if rel
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
    {
        return Err(Error::InvalidPath);
    }

    let joined = content_root.join(rel);
    if !is_subpath(content_root, &joined) {
        return Err(Error::InvalidPath);
    }
    Ok(joined)
}

/// Used only by `NewDeploymentID`'s doc examples / tests that want a
/// deterministic "now".
#[allow(dead_code)]
pub(crate) fn system_now() -> SystemTime {
    SystemTime::now()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn site_names() {
        assert!(validate_site_name("demo").is_ok());
        assert!(validate_site_name("").is_err());
        assert!(validate_site_name(".hidden").is_err());
        assert!(validate_site_name("a/b").is_err());
        assert!(validate_site_name("a\\b").is_err());
        assert!(validate_site_name("cafe\u{301}").is_err());
    }

    #[test]
    fn principal_names() {
        assert!(validate_principal_name("alice").is_ok());
        assert!(validate_principal_name("").is_err());
        assert!(validate_principal_name("_system").is_err());
        assert!(validate_principal_name("_system_janitor").is_err());
    }

    #[test]
    fn deployment_id_roundtrip() {
        let now = Utc::now();
        let trimmed = now
            .date_naive()
            .and_hms_opt(now.time().hour(), now.time().minute(), now.time().second())
            .unwrap();
        let trimmed = DateTime::<Utc>::from_naive_utc_and_offset(trimmed, Utc);
        let id = new_deployment_id_at(trimmed);
        assert!(id.starts_with("deployment_"));
        let (_uuid, ts) = parse_deployment_id(&id).expect("should parse");
        assert_eq!(ts, trimmed);
    }

    #[test]
    fn rejects_malformed_ids() {
        assert!(parse_deployment_id("deployment_2024-01-01-00-00-00").is_err());
        assert!(parse_deployment_id("notdeployment_2024-01-01-00-00-00_uuid").is_err());
        assert!(parse_deployment_id("deployment_bad-ts_not-a-uuid").is_err());
        assert!(!is_deployment_id_valid(
            "deployment_2024-01-01-00-00-00_not-a-uuid.delete"
        ));
    }

    #[test]
    fn subpath_rejects_escape() {
        let parent = Path::new("/srv/site/_content");
        assert!(is_subpath(parent, &parent.join("a/b.html")));
        assert!(!is_subpath(parent, Path::new("/srv/site/_content/../x")));
        assert!(!is_subpath(parent, Path::new("/srv/site/other")));
    }

    #[test]
    fn resolve_rejects_absolute_and_traversal() {
        let root = Path::new("/srv/site/d1/_content");
        assert!(matches!(
            resolve_content_path(root, "/etc/passwd"),
            Err(Error::InvalidPath)
        ));
        assert!(matches!(
            resolve_content_path(root, "../x"),
            Err(Error::InvalidPath)
        ));
        assert!(resolve_content_path(root, "a/b/index.html").is_ok());
    }
}
