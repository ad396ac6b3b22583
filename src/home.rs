//! The vee home: root directory layout and path scheme.
//!
//! A home is a single root directory `R` holding everything vee manages:
//!
//! ```text
//! R/packages/      download/clone cache, keyed by package_name
//! R/builds/        scratch build trees, keyed by build_name
//! R/installs/      immutable install trees, keyed by install_name
//! R/opt/           name -> install symlinks for the newest named installs
//! R/environments/  user-facing link trees
//! R/vee.sqlite     the catalog
//! ```
//!
//! Paths under the first three roots are derived from package identity
//! fields; see [`Package`](crate::package::Package) for how the names are
//! assigned as the pipeline progresses.

use crate::catalog::Catalog;
use crate::config::Config;
use crate::error::Result;
use log::{debug, info};
use std::path::{Path, PathBuf};

/// Handle on a home root.
///
/// Cheap to clone; owns no open resources. The catalog is opened on demand
/// via [`Home::catalog`].
#[derive(Debug, Clone)]
pub struct Home {
    root: PathBuf,
}

impl Home {
    /// Open (and lazily create) a home at the given root.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve the home root from, in order: the `VEE` environment
    /// variable, the loaded config, `~/.vee`.
    pub fn from_config(config: &Config) -> Self {
        if let Ok(root) = std::env::var("VEE") {
            return Self::new(root);
        }
        if let Some(path) = &config.home.path {
            return Self::new(path.clone());
        }
        let root = dirs::home_dir()
            .map(|h| h.join(".vee"))
            .unwrap_or_else(|| PathBuf::from(".vee"));
        Self::new(root)
    }

    /// The home root `R`.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the directory skeleton if missing.
    pub fn init(&self) -> Result<()> {
        for sub in ["packages", "builds", "installs", "opt", "environments"] {
            std::fs::create_dir_all(self.root.join(sub))?;
        }
        info!("home initialised at {}", self.root.display());
        Ok(())
    }

    /// `R/packages/{package_name}`
    pub fn package_path(&self, package_name: &str) -> PathBuf {
        self.root.join("packages").join(package_name)
    }

    /// `R/builds/{build_name}`
    pub fn build_path(&self, build_name: &str) -> PathBuf {
        self.root.join("builds").join(build_name)
    }

    /// `R/installs/{install_name}`
    pub fn install_path(&self, install_name: &str) -> PathBuf {
        self.root.join("installs").join(install_name)
    }

    /// `R/opt/{name}`
    pub fn opt_path(&self, name: &str) -> PathBuf {
        self.root.join("opt").join(name)
    }

    /// `R/environments/{name}`
    pub fn environment_path(&self, name: &str) -> PathBuf {
        self.root.join("environments").join(name)
    }

    /// Open the catalog database at its well-known path.
    pub fn catalog(&self) -> Result<Catalog> {
        Catalog::open(self.root.join("vee.sqlite"))
    }

    /// Point `R/opt/{name}` at `install_path`, replacing any previous
    /// symlink atomically (create at a temporary name, rename over).
    pub fn relink_opt(&self, name: &str, install_path: &Path) -> Result<()> {
        let link = self.opt_path(name);
        if let Some(parent) = link.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let tmp = link.with_extension("tmp");
        if tmp.symlink_metadata().is_ok() {
            std::fs::remove_file(&tmp)?;
        }
        symlink(install_path, &tmp)?;
        std::fs::rename(&tmp, &link)?;
        debug!("opt/{} -> {}", name, install_path.display());
        Ok(())
    }
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_dir(target, link)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn path_scheme() {
        let home = Home::new("/var/vee");
        assert_eq!(
            home.package_path("git/example.com/a/b"),
            PathBuf::from("/var/vee/packages/git/example.com/a/b")
        );
        assert_eq!(
            home.build_path("b/1.0/250101120000-deadbeef"),
            PathBuf::from("/var/vee/builds/b/1.0/250101120000-deadbeef")
        );
        assert_eq!(
            home.install_path("b/1.0"),
            PathBuf::from("/var/vee/installs/b/1.0")
        );
    }

    #[test]
    fn init_creates_skeleton() {
        let dir = TempDir::new().unwrap();
        let home = Home::new(dir.path().join("home"));
        home.init().unwrap();
        for sub in ["packages", "builds", "installs", "opt", "environments"] {
            assert!(home.root().join(sub).is_dir(), "{sub} missing");
        }
    }

    #[test]
    fn relink_opt_replaces() {
        let dir = TempDir::new().unwrap();
        let home = Home::new(dir.path());
        home.init().unwrap();

        let first = dir.path().join("installs/a/1.0");
        let second = dir.path().join("installs/a/2.0");
        std::fs::create_dir_all(&first).unwrap();
        std::fs::create_dir_all(&second).unwrap();

        home.relink_opt("a", &first).unwrap();
        assert_eq!(std::fs::read_link(home.opt_path("a")).unwrap(), first);

        home.relink_opt("a", &second).unwrap();
        assert_eq!(std::fs::read_link(home.opt_path("a")).unwrap(), second);
    }
}
