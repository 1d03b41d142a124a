// src/capability.rs

//! Authorization hook for repository mutations
//!
//! Each public mutating operation consults the repository's capability
//! check exactly once, at entry. Access-control policy lives behind the
//! trait, outside the core logic.

use crate::error::{Error, Result};
use std::fmt;

/// Mutating repository operations subject to authorization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Initialize,
    Install,
    Uninstall,
    Reload,
    Shutdown,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Initialize => "initialize",
            Operation::Install => "install",
            Operation::Uninstall => "uninstall",
            Operation::Reload => "reload",
            Operation::Shutdown => "shutdown",
        };
        write!(f, "{s}")
    }
}

/// Capability policy consulted once per mutating operation
pub trait CapabilityCheck: Send + Sync {
    fn authorize(&self, repository: &str, operation: Operation) -> Result<()>;
}

/// Default policy: everything is permitted
#[derive(Debug, Default)]
pub struct AllowAll;

impl CapabilityCheck for AllowAll {
    fn authorize(&self, _repository: &str, _operation: Operation) -> Result<()> {
        Ok(())
    }
}

/// Policy that rejects every mutation, useful for sealed deployments
#[derive(Debug, Default)]
pub struct DenyMutations;

impl CapabilityCheck for DenyMutations {
    fn authorize(&self, repository: &str, operation: Operation) -> Result<()> {
        Err(Error::PermissionError(format!(
            "Repository '{repository}': {operation} denied by policy"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_all() {
        assert!(AllowAll.authorize("r", Operation::Install).is_ok());
    }

    #[test]
    fn test_deny_mutations() {
        match DenyMutations.authorize("r", Operation::Install) {
            Err(Error::PermissionError(msg)) => assert!(msg.contains("install")),
            other => panic!("expected PermissionError, got {other:?}"),
        }
    }
}
