use serde::{Deserialize, Serialize};

use revlog_types::{Identity, RepoName};

use crate::error::{TxnError, TxnResult};

/// Configuration shared by every transaction of a server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TxnConfig {
    /// Repository holding per-account annex refs.
    pub shared_repo: RepoName,
    /// Reflog message used when neither a message nor a caller label is set.
    pub default_message: String,
    /// Name recorded on reflog entries when no log identity is set.
    pub server_name: String,
    pub server_email: String,
}

impl Default for TxnConfig {
    fn default() -> Self {
        Self {
            shared_repo: RepoName::all_users(),
            default_message: "Update entity refs".to_string(),
            server_name: "revlog".to_string(),
            server_email: "revlog@localhost".to_string(),
        }
    }
}

impl TxnConfig {
    /// Parse a TOML document. Missing keys take their default value.
    ///
    /// ```
    /// use revlog_txn::TxnConfig;
    ///
    /// let config = TxnConfig::from_toml_str("shared_repo = \"Users\"").unwrap();
    /// assert_eq!(config.shared_repo.as_str(), "Users");
    /// assert_eq!(config.default_message, "Update entity refs");
    /// ```
    pub fn from_toml_str(text: &str) -> TxnResult<Self> {
        toml::from_str(text).map_err(|e| TxnError::Config(e.to_string()))
    }

    pub fn to_toml_string(&self) -> TxnResult<String> {
        toml::to_string_pretty(self).map_err(|e| TxnError::Config(e.to_string()))
    }

    /// The server identity stamped with the current time.
    pub fn server_identity(&self) -> Identity {
        Identity::new(&self.server_name, &self.server_email)
    }
}
