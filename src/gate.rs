//! Permission gate: the single authorization boundary
//!
//! The broker authorizes configure/write/read operations per (user, vhost)
//! with a regex triple. A check passes when the pattern matches the
//! candidate name anchored at position 0; a partial (prefix-style) match is
//! accepted, per the broker's native semantics. Every declare, bind,
//! consume, and publish decision goes through this gate.

use crate::error::{Result, ShadowError};
use crate::types::Permissions;
use regex::Regex;

/// Compiled permission triple for one (user, vhost) pair
#[derive(Debug, Clone)]
pub struct PermissionGate {
    configure: Regex,
    write: Regex,
    read: Regex,
}

impl PermissionGate {
    /// Compile a permission record into a gate
    pub fn compile(perms: &Permissions) -> Result<Self> {
        Ok(Self {
            configure: anchor(&perms.configure)?,
            write: anchor(&perms.write)?,
            read: anchor(&perms.read)?,
        })
    }

    /// Whether the configure pattern authorizes `candidate`
    pub fn configure_allows(&self, candidate: &str) -> bool {
        self.configure.is_match(candidate)
    }

    /// Whether the write pattern authorizes `candidate`
    ///
    /// The empty string stands in for the default (no-name) exchange:
    /// requeue-capable interception needs write access to it.
    pub fn write_allows(&self, candidate: &str) -> bool {
        self.write.is_match(candidate)
    }

    /// Whether the read pattern authorizes `candidate`
    pub fn read_allows(&self, candidate: &str) -> bool {
        self.read.is_match(candidate)
    }
}

/// Anchor a broker permission pattern at the start of the candidate
///
/// `\A(?:pat)` reproduces match-at-position-0 semantics: the pattern may
/// stop short of the end of the name, but may not start later than 0.
fn anchor(pattern: &str) -> Result<Regex> {
    Regex::new(&format!(r"\A(?:{})", pattern)).map_err(|e| ShadowError::Pattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}
