use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// A person or service identity with a timestamp, recorded as commit author
/// and as the identity of reflog entries.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub email: String,
    /// Milliseconds since the Unix epoch.
    pub when_ms: u64,
}

impl Identity {
    /// Create an identity stamped with the current wall-clock time.
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self::at(name, email, now_ms())
    }

    /// Create an identity with an explicit timestamp.
    pub fn at(name: impl Into<String>, email: impl Into<String>, when_ms: u64) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            when_ms,
        }
    }

    /// Same person, re-stamped with the current time.
    pub fn now(&self) -> Self {
        Self {
            when_ms: now_ms(),
            ..self.clone()
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}> {}", self.name, self.email, self.when_ms)
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
