//! Error taxonomy for lifecycle operations.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::sandbox::SandboxError;
use crate::version::Version;

/// Boxed source error returned by a subsystem `init` hook.
pub type SubsystemError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used throughout the crate.
pub type Result<T, E = LibError> = std::result::Result<T, E>;

/// Which part of the version triple failed the compatibility check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MismatchKind {
    /// Major or minor numbers differ.
    MajorMinor,
    /// Release number hit the exception table.
    Release,
}

impl fmt::Display for MismatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MajorMinor => f.write_str("library version mismatched"),
            Self::Release => f.write_str("library release mismatched"),
        }
    }
}

/// Coarse error class recorded on the per-thread error stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorClass {
    /// Bad argument or call sequence.
    Args,
    /// Allocation or other resource exhaustion.
    Resource,
    /// Subsystem initialization.
    Init,
    /// Version compatibility.
    Version,
    /// Shutdown sweep.
    Shutdown,
    /// Internal consistency (sandbox bookkeeping).
    Internal,
}

/// Errors surfaced by the lifecycle core.
#[derive(Debug, Error)]
pub enum LibError {
    /// Invalid argument or out-of-order call. Never fatal.
    #[error("usage: {0}")]
    Usage(&'static str),
    /// A registry node or stream record could not be allocated.
    #[error("resource: {0}")]
    Resource(&'static str),
    /// A subsystem `init` hook failed; initialization was abandoned.
    #[error("unable to initialize {subsystem} interface: {source}")]
    SubsystemInit {
        subsystem: &'static str,
        #[source]
        source: SubsystemError,
    },
    /// Header and library versions are incompatible.
    #[error("{kind}: headers are {headers}, library is {library}")]
    VersionIncompatible {
        kind: MismatchKind,
        headers: Version,
        library: Version,
    },
    /// The shutdown sweep hit its cap with work still pending.
    #[error("infinite loop closing library after {sweeps} sweeps: {stuck}")]
    ShutdownDiverged { sweeps: usize, stuck: String },
    /// Saving or restoring thread state around a user callback failed.
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

impl LibError {
    /// Error-stack class for this error.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::Usage(_) => ErrorClass::Args,
            Self::Resource(_) => ErrorClass::Resource,
            Self::SubsystemInit { .. } => ErrorClass::Init,
            Self::VersionIncompatible { .. } => ErrorClass::Version,
            Self::ShutdownDiverged { .. } => ErrorClass::Shutdown,
            Self::Sandbox(_) => ErrorClass::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("disk on fire")]
    struct Boom;

    #[test]
    fn subsystem_init_keeps_source_chain() {
        let err = LibError::SubsystemInit {
            subsystem: "T",
            source: Box::new(Boom),
        };
        assert_eq!(
            err.to_string(),
            "unable to initialize T interface: disk on fire"
        );
        let source = std::error::Error::source(&err).expect("source");
        assert_eq!(source.to_string(), "disk on fire");
        assert_eq!(err.class(), ErrorClass::Init);
    }

    #[test]
    fn classes_cover_taxonomy() {
        assert_eq!(LibError::Usage("x").class(), ErrorClass::Args);
        assert_eq!(LibError::Resource("x").class(), ErrorClass::Resource);
        assert_eq!(
            LibError::ShutdownDiverged {
                sweeps: 100,
                stuck: "L".into()
            }
            .class(),
            ErrorClass::Shutdown
        );
    }
}
