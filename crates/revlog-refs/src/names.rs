//! Ref name layout.
//!
//! Entity refs are sharded by the entity number modulo 100, rendered as two
//! zero-padded digits, so that no directory holds more than a hundredth of
//! the refs:
//!
//! - `refs/changes/<NN>/<id>/meta`: entity metadata history
//! - `refs/changes/<NN>/<id>/robot-comments`: secondary annotations
//! - `refs/draft-comments/<NN>/<id>/<account>`: per-account annex data
//!
//! Any store sharing this layout must reproduce these strings exactly.
//!
//! [`validate_ref_name`] applies git-style naming rules to arbitrary refs:
//! - Must start with `refs/`
//! - Must not contain whitespace, control characters, `~`, `^`, `:`, `?`,
//!   `*`, `[`, `\`
//! - Must not contain `..` or `@{`
//! - Must not end with `/` or `.`
//! - Components must be non-empty, must not start with `.` and must not end
//!   with `.lock`

use revlog_types::{AccountId, EntityId};

use crate::error::{RefError, Result};

pub const REFS_CHANGES: &str = "refs/changes/";
pub const REFS_DRAFT_COMMENTS: &str = "refs/draft-comments/";
pub const META_SUFFIX: &str = "meta";
pub const ROBOT_COMMENTS_SUFFIX: &str = "robot-comments";

/// Characters that are forbidden anywhere in a ref name.
const FORBIDDEN_CHARS: &[char] = &['~', '^', ':', '?', '*', '[', '\\'];

/// Which entity ref a name under `refs/changes/` denotes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntityRefKind {
    Meta,
    Annotations,
}

/// `<NN>/<id>`.
fn shard(id: u32) -> String {
    format!("{:02}/{}", id % 100, id)
}

pub fn entity_meta_ref(entity: EntityId) -> String {
    format!("{REFS_CHANGES}{}/{META_SUFFIX}", shard(entity.get()))
}

pub fn annotation_ref(entity: EntityId) -> String {
    format!("{REFS_CHANGES}{}/{ROBOT_COMMENTS_SUFFIX}", shard(entity.get()))
}

pub fn annex_ref(entity: EntityId, account: AccountId) -> String {
    format!("{}{}", annex_prefix(entity), account)
}

/// Prefix shared by every account's annex ref for `entity`, with trailing `/`.
pub fn annex_prefix(entity: EntityId) -> String {
    format!("{REFS_DRAFT_COMMENTS}{}/", shard(entity.get()))
}

/// Split `<NN>/<id>/<rest>` and verify the shard matches the id.
fn parse_sharded(rest: &str) -> Option<(EntityId, &str)> {
    let mut parts = rest.splitn(3, '/');
    let nn = parts.next()?;
    let id: EntityId = parts.next()?.parse().ok()?;
    let tail = parts.next()?;
    if nn != format!("{:02}", id.get() % 100) {
        return None;
    }
    Some((id, tail))
}

/// Parse a metadata or annotation ref name.
pub fn parse_entity_ref(name: &str) -> Option<(EntityId, EntityRefKind)> {
    let (id, tail) = parse_sharded(name.strip_prefix(REFS_CHANGES)?)?;
    match tail {
        META_SUFFIX => Some((id, EntityRefKind::Meta)),
        ROBOT_COMMENTS_SUFFIX => Some((id, EntityRefKind::Annotations)),
        _ => None,
    }
}

/// Parse an annex ref name into its entity and account.
pub fn parse_annex_ref(name: &str) -> Option<(EntityId, AccountId)> {
    let (id, tail) = parse_sharded(name.strip_prefix(REFS_DRAFT_COMMENTS)?)?;
    Some((id, tail.parse().ok()?))
}

/// Validate a full ref name, returning `Ok(())` if valid.
///
/// # Examples
///
/// ```
/// use revlog_refs::names::validate_ref_name;
///
/// assert!(validate_ref_name("refs/changes/34/1234/meta").is_ok());
/// assert!(validate_ref_name("HEAD").is_err());
/// assert!(validate_ref_name("refs/bad..name").is_err());
/// ```
pub fn validate_ref_name(name: &str) -> Result<()> {
    let invalid = |reason: String| -> Result<()> {
        Err(RefError::InvalidRefName {
            name: name.to_string(),
            reason,
        })
    };

    if !name.starts_with("refs/") {
        return invalid("must start with 'refs/'".into());
    }
    if let Some(ch) = name
        .chars()
        .find(|c| c.is_whitespace() || c.is_control() || FORBIDDEN_CHARS.contains(c))
    {
        return invalid(format!("contains forbidden character: {ch:?}"));
    }
    if name.contains("..") {
        return invalid("must not contain '..'".into());
    }
    if name.contains("@{") {
        return invalid("must not contain '@{'".into());
    }
    if name.ends_with('/') || name.ends_with('.') {
        return invalid("must not end with '/' or '.'".into());
    }
    for component in name.split('/') {
        if component.is_empty() {
            return invalid("path components must not be empty".into());
        }
        if component.starts_with('.') {
            return invalid(format!("component must not start with '.': {component:?}"));
        }
        if component.ends_with(".lock") {
            return invalid(format!("component must not end with '.lock': {component:?}"));
        }
    }
    Ok(())
}
