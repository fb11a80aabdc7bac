//! Ref transitions and batches.

use std::fmt;

use revlog_crypto::Attestation;
use revlog_types::{Identity, ObjectId};
use serde::{Deserialize, Serialize};

/// A single `old → new` move of a named ref.
///
/// An empty `old` means the ref must not exist yet; an empty `new` deletes it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefTransition {
    pub name: String,
    pub old: ObjectId,
    pub new: ObjectId,
}

/// Shape of a transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransitionKind {
    Create,
    Update,
    Delete,
}

impl RefTransition {
    pub fn new(old: ObjectId, new: ObjectId, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            old,
            new,
        }
    }

    pub fn delete(old: ObjectId, name: impl Into<String>) -> Self {
        Self::new(old, ObjectId::null(), name)
    }

    /// `true` when the transition would not move the ref.
    pub fn is_noop(&self) -> bool {
        self.old == self.new
    }

    pub fn kind(&self) -> TransitionKind {
        if self.old.is_null() {
            TransitionKind::Create
        } else if self.new.is_null() {
            TransitionKind::Delete
        } else {
            TransitionKind::Update
        }
    }
}

impl fmt::Display for RefTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.old, self.new, self.name)
    }
}

/// Outcome of one command within a batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandStatus {
    /// The batch has not been submitted (or was a dry run).
    NotAttempted,
    Ok,
    /// The live ref value did not match the command's `old`.
    LockFailure { actual: ObjectId },
    /// The store refused the command for another reason.
    Rejected(String),
    /// The command was valid but not applied because another command of the
    /// same atomic batch failed.
    Aborted,
}

impl CommandStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, CommandStatus::Ok)
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            CommandStatus::LockFailure { .. } | CommandStatus::Rejected(_) | CommandStatus::Aborted
        )
    }
}

/// A set of ref transitions submitted to a store in one call, with the
/// bookkeeping recorded in each ref's log.
#[derive(Clone, Debug)]
pub struct BatchRefUpdate {
    commands: Vec<RefTransition>,
    statuses: Vec<CommandStatus>,
    message: Option<String>,
    identity: Option<Identity>,
    attestation: Option<Attestation>,
    atomic: bool,
}

impl Default for BatchRefUpdate {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchRefUpdate {
    /// An empty atomic batch.
    pub fn new() -> Self {
        Self {
            commands: Vec::new(),
            statuses: Vec::new(),
            message: None,
            identity: None,
            attestation: None,
            atomic: true,
        }
    }

    pub fn add_command(&mut self, command: RefTransition) -> &mut Self {
        self.commands.push(command);
        self.statuses.push(CommandStatus::NotAttempted);
        self
    }

    pub fn set_message(&mut self, message: impl Into<String>) -> &mut Self {
        self.message = Some(message.into());
        self
    }

    pub fn set_identity(&mut self, identity: Identity) -> &mut Self {
        self.identity = Some(identity);
        self
    }

    pub fn set_attestation(&mut self, attestation: Option<Attestation>) -> &mut Self {
        self.attestation = attestation;
        self
    }

    /// When atomic (the default), either every command applies or none does.
    pub fn set_atomic(&mut self, atomic: bool) -> &mut Self {
        self.atomic = atomic;
        self
    }

    pub fn commands(&self) -> &[RefTransition] {
        &self.commands
    }

    pub fn statuses(&self) -> &[CommandStatus] {
        &self.statuses
    }

    /// Commands paired with their current status.
    pub fn results(&self) -> impl Iterator<Item = (&RefTransition, &CommandStatus)> {
        self.commands.iter().zip(self.statuses.iter())
    }

    pub fn status_of(&self, name: &str) -> Option<&CommandStatus> {
        self.results()
            .find(|(cmd, _)| cmd.name == name)
            .map(|(_, status)| status)
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn attestation(&self) -> Option<&Attestation> {
        self.attestation.as_ref()
    }

    pub fn is_atomic(&self) -> bool {
        self.atomic
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub(crate) fn set_status(&mut self, index: usize, status: CommandStatus) {
        self.statuses[index] = status;
    }

    /// Names of commands whose status is a failure.
    pub fn failures(&self) -> Vec<String> {
        self.results()
            .filter(|(_, status)| status.is_failure())
            .map(|(cmd, status)| format!("{} ({status:?})", cmd.name))
            .collect()
    }
}

/// One entry of a ref's log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReflogEntry {
    pub old: ObjectId,
    pub new: ObjectId,
    pub identity: Option<Identity>,
    pub message: Option<String>,
    pub attestation: Option<Attestation>,
}
