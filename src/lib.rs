//! vee: Versioned execution environment manager.
//!
//! A Rust library for fetching source packages from heterogeneous upstreams,
//! building them in isolated working directories, installing them to
//! immutable content-addressed locations, and linking selected installs
//! into named user-facing environments.
//!
//! # Overview
//!
//! vee provides:
//!
//! - **Requirements** describing packages as a URL plus modifiers
//! - **A step-oriented pipeline** (fetch, extract, inspect, build, install)
//!   with priority-dispatched transports and builders
//! - **A persistent catalog** deduplicating installs across invocations
//! - **Binary relocation** so install trees stay movable within the home
//! - **Environments** composed as link trees over installs
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                            CLI                              │
//! ├─────────────────────────────────────────────────────────────┤
//! │   Package driver   │    Catalog    │       Relocator        │
//! ├────────────────────┴───────────────┴────────────────────────┤
//! │  Pipeline: git / http / pypi / generic / python steps       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Home  │  Requirement  │  Environ  │  Environment           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use vee_lib::{Home, Package, Requirement};
//!
//! let home = Home::new("/var/vee");
//! home.init()?;
//!
//! let req = Requirement::parse("pypi:requests --revision '>=2.20,<3'")?;
//! let mut pkg = Package::new(&req, home);
//!
//! if !pkg.resolve_existing(None)? {
//!     pkg.auto_install(false)?;
//! }
//! ```
//!
//! # Modules
//!
//! - [`catalog`] - Persistent package/link store
//! - [`config`] - TOML configuration
//! - [`environ`](mod@environ) - Build-environment resolution
//! - [`environment`] - Named link-tree environments
//! - [`error`] - Error types
//! - [`home`] - Home layout and path scheme
//! - [`package`] - The package driver
//! - [`pipeline`] - Phases, steps, and the step registry
//! - [`relocate`] - Binary relocation
//! - [`requirement`] - Requirement parsing

pub mod catalog;
pub mod config;
pub mod environ;
pub mod environment;
pub mod error;
pub mod home;
pub mod package;
pub mod pipeline;
pub mod relocate;
pub mod requirement;

// Re-exports for convenience
pub use catalog::Catalog;
pub use environment::Environment;
pub use error::{
    BuildError, CatalogError, MetadataError, PackageError, RelocateError, RequirementError,
    TransportError, VeeError,
};
pub use home::Home;
pub use package::Package;
pub use pipeline::{Phase, PipelineStep};
pub use requirement::Requirement;

/// Library version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_reexports() {
        let req = Requirement::parse("pypi:demo").unwrap();
        let home = Home::new("/tmp/vee-test-home");
        let _pkg = Package::new(&req, home);
    }
}
