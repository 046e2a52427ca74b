//! Command security filter.
//!
//! Two gates guard process creation:
//!
//! 1. The metacharacter gate inspects the raw line and rejects shell
//!    operators, even though no shell is ever invoked downstream.
//! 2. The command gate inspects the command name once the line is tokenized.
//!    A non-empty allowlist is exclusive; otherwise the denylist applies.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use crate::config::SandboxConfig;

/// Exit code for malformed or injection-like input.
pub const EXIT_MALFORMED: i32 = 2;

/// Exit code for disallowed or unknown commands.
pub const EXIT_NOT_ALLOWED: i32 = 127;

/// Characters that are never accepted in a command line.
const METACHARACTERS: &[char] = &['|', '&', ';', '<', '>', '(', ')', '$', '`', '\\', '\n', '\r'];

/// Reasons a line is refused.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SecurityError {
    /// The raw line contains a shell metacharacter.
    #[error("shell metacharacter {0:?} is not allowed")]
    Metacharacter(char),

    /// The command is not on the configured allowlist.
    #[error("command not allowed: {0}")]
    NotAllowlisted(String),

    /// The command is on the denylist.
    #[error("command blocked by policy: {0}")]
    Denied(String),

    /// The command name contains a path separator.
    #[error("path-qualified commands are not allowed: {0}")]
    PathQualified(String),
}

impl SecurityError {
    /// Exit code reported for this refusal.
    pub fn exit_code(&self) -> i32 {
        match self {
            SecurityError::Metacharacter(_) => EXIT_MALFORMED,
            SecurityError::NotAllowlisted(_)
            | SecurityError::Denied(_)
            | SecurityError::PathQualified(_) => EXIT_NOT_ALLOWED,
        }
    }
}

/// Allowlist/denylist policy for command names.
#[derive(Debug, Clone, Default)]
pub struct CommandPolicy {
    /// Allowed command names with display titles.
    allowlist: BTreeMap<String, String>,
    /// Refused command names.
    denylist: BTreeSet<String>,
}

impl CommandPolicy {
    /// Create a policy from explicit lists.
    pub fn new(
        allowlist: BTreeMap<String, String>,
        denylist: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            allowlist,
            denylist: denylist.into_iter().collect(),
        }
    }

    /// Create a policy from the sandbox configuration.
    pub fn from_config(config: &SandboxConfig) -> Self {
        Self::new(config.allowlist.clone(), config.denylist.iter().cloned())
    }

    /// Returns true if an allowlist is in effect.
    pub fn is_allowlist_mode(&self) -> bool {
        !self.allowlist.is_empty()
    }

    /// Allowed commands and their display titles.
    pub fn allowlist(&self) -> &BTreeMap<String, String> {
        &self.allowlist
    }

    /// Metacharacter gate, applied to the raw line before tokenization.
    pub fn check_line(&self, line: &str) -> Result<(), SecurityError> {
        match line.chars().find(|c| METACHARACTERS.contains(c)) {
            Some(c) => Err(SecurityError::Metacharacter(c)),
            None => Ok(()),
        }
    }

    /// Command gate, applied to the first token.
    pub fn check_command(&self, name: &str) -> Result<(), SecurityError> {
        if name.contains('/') {
            return Err(SecurityError::PathQualified(name.to_string()));
        }

        if self.is_allowlist_mode() {
            if self.allowlist.contains_key(name) {
                Ok(())
            } else {
                Err(SecurityError::NotAllowlisted(name.to_string()))
            }
        } else if self.denylist.contains(name) {
            Err(SecurityError::Denied(name.to_string()))
        } else {
            Ok(())
        }
    }
}
