use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Stable identifier of an edited entity (e.g. a review number).
///
/// Always positive. Ref names for an entity are derived from this number.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(u32);

impl EntityId {
    pub fn new(id: u32) -> Result<Self, TypeError> {
        if id == 0 {
            return Err(TypeError::InvalidId {
                what: "entity id",
                value: id.to_string(),
            });
        }
        Ok(Self(id))
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntityId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let n = parse_decimal(s, "entity id")?;
        Self::new(n)
    }
}

/// Identifier of a user account. Scopes annex (draft) refs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(u32);

impl AccountId {
    pub fn new(id: u32) -> Result<Self, TypeError> {
        if id == 0 {
            return Err(TypeError::InvalidId {
                what: "account id",
                value: id.to_string(),
            });
        }
        Ok(Self(id))
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AccountId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let n = parse_decimal(s, "account id")?;
        Self::new(n)
    }
}

/// Accepts only plain decimal digits without sign or leading zeros, so that a
/// parsed id renders back to exactly the same text.
fn parse_decimal(s: &str, what: &'static str) -> Result<u32, TypeError> {
    let invalid = || TypeError::InvalidId {
        what,
        value: s.to_string(),
    };
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) || s.starts_with('0') {
        return Err(invalid());
    }
    s.parse::<u32>().map_err(|_| invalid())
}

/// Name of a repository, as understood by a repository manager.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepoName(String);

impl RepoName {
    /// Create a repository name. Names are used as directory names by the
    /// filesystem backend, so path separators and dot-only names are rejected.
    pub fn new(name: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        let reason = if name.is_empty() {
            Some("must not be empty")
        } else if name == "." || name == ".." {
            Some("must not be a relative path component")
        } else if name.contains(|c: char| c == '/' || c == '\\') {
            Some("must not contain path separators")
        } else if name.chars().any(char::is_whitespace) {
            Some("must not contain whitespace")
        } else {
            None
        };
        match reason {
            Some(reason) => Err(TypeError::InvalidRepoName {
                name,
                reason: reason.into(),
            }),
            None => Ok(Self(name)),
        }
    }

    /// The repository holding per-account annex data unless configured
    /// otherwise.
    pub fn all_users() -> Self {
        Self("All-Users".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RepoName {
    type Error = TypeError;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        Self::new(name)
    }
}

impl From<RepoName> for String {
    fn from(name: RepoName) -> Self {
        name.0
    }
}

impl fmt::Display for RepoName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RepoName {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}
