//! Error types for the vee library.
//!
//! This module defines all error types used throughout the crate.
//! Uses `thiserror` for ergonomic error handling and automatic `Display` impl.
//!
//! # Error Hierarchy
//!
//! - [`VeeError`] - Top-level error enum, wraps all other errors
//! - [`RequirementError`] - Errors from requirement parsing
//! - [`PackageError`] - Errors from the package driver (install/link state)
//! - [`TransportError`] - Errors from fetching packages (git, http)
//! - [`MetadataError`] - Errors from the package index (bad JSON, no release)
//! - [`BuildError`] - Errors from build/install subprocesses
//! - [`CatalogError`] - Errors from the persistent catalog
//! - [`RelocateError`] - Errors from the binary relocation pass
//!
//! # Usage
//!
//! All public functions return `Result<T, VeeError>` for consistency.
//! Internal modules may use more specific error types.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the vee library.
///
/// This enum wraps all specific error types and is the primary error type
/// returned by public API functions.
#[derive(Error, Debug)]
pub enum VeeError {
    /// Error from requirement parsing
    #[error("requirement error: {0}")]
    Requirement(#[from] RequirementError),

    /// Error from the package driver
    #[error("package error: {0}")]
    Package(#[from] PackageError),

    /// Error from a transport step
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Error from the package index
    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),

    /// Error from a build or install subprocess
    #[error("build error: {0}")]
    Build(#[from] BuildError),

    /// Error from the persistent catalog
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Error from the relocation pass
    #[error("relocate error: {0}")]
    Relocate(#[from] RelocateError),

    /// Error from configuration loading
    #[error("config error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// IO error (file operations)
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl VeeError {
    /// Process exit code for this error class.
    ///
    /// The CLI surfaces these so scripts can distinguish network failures
    /// from build failures from catalog errors.
    pub fn exit_code(&self) -> u8 {
        match self {
            VeeError::Requirement(_) | VeeError::Config(_) => 2,
            VeeError::Transport(_) | VeeError::Metadata(_) => 3,
            VeeError::Build(_) => 4,
            VeeError::Catalog(_) => 5,
            VeeError::Package(PackageError::AlreadyInstalled { .. }) => 6,
            VeeError::Package(PackageError::AlreadyLinked { .. }) => 7,
            _ => 1,
        }
    }
}

/// Errors from parsing a requirement line.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequirementError {
    /// Requirement line could not be tokenized (unbalanced quotes etc).
    #[error("unparseable requirement '{line}': {reason}")]
    Tokenize {
        /// The offending line
        line: String,
        /// Reason from the tokenizer
        reason: String,
    },

    /// Unknown flag in a requirement line.
    #[error("unknown flag '{flag}' in requirement '{line}'")]
    UnknownFlag {
        /// The unrecognized flag
        flag: String,
        /// The offending line
        line: String,
    },

    /// Flag requires a value but none was given.
    #[error("flag '{flag}' requires a value")]
    MissingValue {
        /// The flag missing its value
        flag: String,
    },

    /// Requirement line has no URL.
    #[error("requirement has no url: '{line}'")]
    MissingUrl {
        /// The offending line
        line: String,
    },

    /// Environ override is not KEY=VALUE.
    #[error("invalid environ override '{pair}', expected KEY=VALUE")]
    InvalidEnviron {
        /// The malformed pair
        pair: String,
    },
}

/// Errors from the package driver.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PackageError {
    /// Reinstall attempted without force; the install path exists and the
    /// catalog confirms identity.
    #[error("already installed: {requirement}")]
    AlreadyInstalled {
        /// Frozen requirement of the installed package
        requirement: String,
    },

    /// Link attempted where a prior link exists for the same
    /// (package, environment).
    #[error("already linked: {requirement} (link {link_id})")]
    AlreadyLinked {
        /// Frozen requirement of the linked package
        requirement: String,
        /// Row id of the existing link
        link_id: i64,
    },

    /// Operation requires an installed package.
    #[error("not installed: {requirement}")]
    NotInstalled {
        /// Frozen requirement
        requirement: String,
    },

    /// An identity field required by this phase has not been assigned yet.
    #[error("{what} name required but not derivable")]
    NameRequired {
        /// Which name was missing (package, build, install)
        what: &'static str,
    },

    /// No pipeline step claimed a phase for this package.
    #[error("no pipeline step for phase '{phase}' of {url}")]
    NoStep {
        /// Phase that went unclaimed
        phase: &'static str,
        /// Package URL
        url: String,
    },
}

/// Errors from transport steps (git, http).
///
/// The partial cache directory is removed before these are surfaced so a
/// retry starts clean.
#[derive(Error, Debug)]
pub enum TransportError {
    /// HTTP request failed or returned a non-success status.
    #[error("download failed for {url}: {reason}")]
    Download {
        /// Requested URL
        url: String,
        /// Underlying failure
        reason: String,
    },

    /// A repository command (git) failed.
    #[error("'{command}' failed (exit {code:?})")]
    CommandFailed {
        /// Command string
        command: String,
        /// Exit code (if available)
        code: Option<i32>,
    },

    /// Downloaded artifact did not match the declared checksum.
    #[error("checksum mismatch for {}: expected {expected}, got {actual}", path.display())]
    ChecksumMismatch {
        /// Downloaded file
        path: PathBuf,
        /// Declared `algo:hex`
        expected: String,
        /// Computed `algo:hex`
        actual: String,
    },

    /// Unrecognized checksum algorithm.
    #[error("unknown checksum algorithm '{algo}'")]
    UnknownChecksumAlgo {
        /// Algorithm prefix from `algo:hex`
        algo: String,
    },

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the package index.
#[derive(Error, Debug)]
pub enum MetadataError {
    /// The index returned unparseable JSON.
    #[error("unparseable metadata for {name}: {reason}")]
    Unparseable {
        /// Distribution name
        name: String,
        /// Parse failure
        reason: String,
    },

    /// No release satisfies the version expression on this host.
    #[error("no usable release of {name} {expression} on the index")]
    NoUsableRelease {
        /// Distribution name
        name: String,
        /// The version expression, or "(any version)"
        expression: String,
    },

    /// The revision is not a valid version expression.
    #[error("invalid version expression '{expression}' for {name}: {reason}")]
    InvalidExpression {
        /// Distribution name
        name: String,
        /// The offending expression
        expression: String,
        /// Parse failure
        reason: String,
    },

    /// IO error while caching metadata
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from build and install subprocesses.
#[derive(Error, Debug)]
pub enum BuildError {
    /// Build configuration error
    #[error("build config error: {0}")]
    Config(String),

    /// Build command failed; the build tree is left in place for inspection.
    #[error("build command failed: {command} (exit {code:?})")]
    CommandFailed {
        /// Command string
        command: String,
        /// Exit code (if available)
        code: Option<i32>,
    },

    /// Expected file missing from the build tree.
    #[error("missing in build tree: {}", path.display())]
    MissingFile {
        /// The path that was expected
        path: PathBuf,
    },

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the persistent catalog.
#[derive(Error, Debug)]
pub enum CatalogError {
    /// Underlying database error
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The on-disk schema is newer than this binary understands.
    #[error("unexpected schema version {found}, expected {expected}")]
    SchemaVersion {
        /// Version found in the database
        found: i32,
        /// Version this binary writes
        expected: i32,
    },
}

/// Errors from the binary relocation pass.
#[derive(Error, Debug)]
pub enum RelocateError {
    /// Binary could not be parsed.
    #[error("unparseable binary {}: {reason}", path.display())]
    Parse {
        /// The binary path
        path: PathBuf,
        /// Parse failure
        reason: String,
    },

    /// A rewrite tool (patchelf, install_name_tool) failed.
    #[error("rewrite failed: {command} (exit {code:?})")]
    CommandFailed {
        /// Command string
        command: String,
        /// Exit code (if available)
        code: Option<i32>,
    },

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using VeeError
pub type Result<T> = std::result::Result<T, VeeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = PackageError::AlreadyInstalled {
            requirement: "pypi:requests --revision 2.25.1".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "already installed: pypi:requests --revision 2.25.1"
        );
    }

    #[test]
    fn error_conversion() {
        let pkg_err = PackageError::NameRequired { what: "install" };
        let vee_err: VeeError = pkg_err.into();
        assert!(matches!(vee_err, VeeError::Package(_)));
    }

    #[test]
    fn exit_codes_distinct() {
        let build: VeeError = BuildError::Config("x".into()).into();
        let transport: VeeError = TransportError::Download {
            url: "http://example.com".into(),
            reason: "timeout".into(),
        }
        .into();
        assert_ne!(build.exit_code(), transport.exit_code());
        assert_ne!(build.exit_code(), 0);
    }
}
