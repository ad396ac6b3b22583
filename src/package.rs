//! The package driver: mutable state for one install attempt.
//!
//! A [`Package`] binds a parsed [`Requirement`] to a [`Home`] and carries
//! the identity fields the pipeline assigns as it progresses:
//!
//! - `package_name` keys the download cache (`R/packages/...`), stable once
//!   set.
//! - `install_name` keys the immutable install (`R/installs/...`);
//!   `{name}/{revision}` when both are known, otherwise derived from
//!   `package_name`.
//! - `build_name` keys one build attempt (`R/builds/...`); a timestamp plus
//!   random tail keeps concurrent builds apart.
//!
//! The driver walks the package through the pipeline phases, re-checking
//! installation state between the early phases (a transport may only learn
//! the true revision after fetching), commits a catalog row after install,
//! and runs the relocation pass.

use crate::catalog::{IdentityQuery, NewPackageRow};
use crate::environ;
use crate::environment::Environment;
use crate::error::{PackageError, Result};
use crate::home::Home;
use crate::pipeline::{self, Phase, PipelineStep};
use crate::relocate;
use crate::requirement::Requirement;
use log::{debug, info, warn};
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::OnceLock;

fn scheme_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[\w.+-]+:").unwrap())
}

fn slashes_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r":?/+:?").unwrap())
}

fn archive_suffix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\.(tar|gz|tgz|zip))+$").unwrap())
}

/// Driver state for one install attempt of one requirement.
pub struct Package {
    home: Home,
    abstract_requirement: String,

    // Requirement fields, mutable as the pipeline learns more.
    pub url: String,
    pub name: Option<String>,
    pub revision: Option<String>,
    pub checksum: Option<String>,
    pub etag: Option<String>,
    pub config: Vec<String>,
    pub environ: BTreeMap<String, String>,
    pub force_fetch: bool,
    pub hard_link: bool,
    pub defer_setup_build: bool,
    pub relocate: Option<String>,

    // Identity fields assigned by the pipeline.
    pub package_name: Option<String>,
    pub build_name: Option<String>,
    pub install_name: Option<String>,
    /// Sub-path within the build tree where artifacts actually live.
    pub build_subdir: Option<PathBuf>,
    /// Sub-path within the install tree where artifacts are placed.
    pub install_prefix: Option<PathBuf>,
    /// Transport tag prefixed onto `package_name` (git, pypi, http).
    pub package_type: String,
    /// Builder that produced the artifacts (generic, python).
    pub build_type: String,
    /// Discovered child requirements, in discovery order.
    pub dependencies: Vec<Requirement>,

    db_id: Option<i64>,
    db_link_id: Option<i64>,
    environ_diff: Option<BTreeMap<String, String>>,
}

impl Package {
    pub fn new(req: &Requirement, home: Home) -> Self {
        Self {
            home,
            abstract_requirement: req.to_line(),
            url: req.url.clone(),
            name: req.name.clone(),
            revision: req.revision.clone(),
            checksum: req.checksum.clone(),
            etag: req.etag.clone(),
            config: req.config.clone(),
            environ: req.environ.clone(),
            force_fetch: req.force_fetch,
            hard_link: req.hard_link,
            defer_setup_build: req.defer_setup_build,
            relocate: req.relocate.clone(),
            package_name: None,
            build_name: None,
            install_name: None,
            build_subdir: None,
            install_prefix: None,
            package_type: "http".to_string(),
            build_type: "generic".to_string(),
            dependencies: Vec::new(),
            db_id: None,
            db_link_id: None,
            environ_diff: None,
        }
    }

    pub fn home(&self) -> &Home {
        &self.home
    }

    /// The requirement line this package was created from.
    pub fn abstract_requirement(&self) -> &str {
        &self.abstract_requirement
    }

    /// Catalog row id once committed or resolved.
    pub fn db_id(&self) -> Option<i64> {
        self.db_id
    }

    /// The concrete requirement: current identity plus resolved environ.
    pub fn freeze(&mut self) -> Requirement {
        Requirement {
            url: self.url.clone(),
            name: self.name.clone(),
            revision: self.revision.clone(),
            checksum: self.checksum.clone(),
            etag: self.etag.clone(),
            config: self.config.clone(),
            environ: self.environ_diff().clone(),
            force_fetch: self.force_fetch,
            hard_link: self.hard_link,
            defer_setup_build: self.defer_setup_build,
            relocate: self.relocate.clone(),
        }
    }

    /// Resolved environment diff, computed once per attempt.
    pub fn environ_diff(&mut self) -> &BTreeMap<String, String> {
        if self.environ_diff.is_none() {
            let base = environ::process_environ();
            let diff = environ::resolve_diff_logged(self.home.root(), &base, &self.environ);
            self.environ_diff = Some(diff);
        }
        self.environ_diff.as_ref().unwrap()
    }

    /// Process environment overlaid with the resolved diff, for subprocesses.
    pub fn fresh_environ(&mut self) -> HashMap<String, String> {
        let diff = self.environ_diff().clone();
        environ::fresh_environ(&diff)
    }

    // ------------------------------------------------------------------
    // Names and paths
    // ------------------------------------------------------------------

    /// What `package_name` would be, from the URL and transport type.
    fn derived_package_name(&self) -> Option<String> {
        if let Some(name) = &self.package_name {
            return Some(name.clone());
        }
        if self.url.is_empty() {
            return None;
        }
        let stripped = scheme_re().replace(&self.url, "");
        let collapsed = slashes_re().replace_all(&stripped, "/");
        let trimmed = collapsed.trim_matches('/');
        if trimmed.is_empty() {
            None
        } else {
            Some(format!("{}/{}", self.package_type, trimmed))
        }
    }

    /// What `install_name` would be: `{name}/{revision}` once both are
    /// known, otherwise the package name with archive suffixes stripped.
    ///
    /// Kept separate from assignment so installation checks early in the
    /// pipeline don't pin a fallback name before a transport has resolved
    /// the true revision.
    fn derived_install_name(&self) -> Option<String> {
        if let Some(name) = &self.install_name {
            return Some(name.clone());
        }
        if let (Some(name), Some(revision)) = (&self.name, &self.revision) {
            return Some(format!("{name}/{revision}"));
        }
        self.derived_package_name()
            .map(|n| archive_suffix_re().replace(&n, "").into_owned())
    }

    /// Derive any of the three names that are still unset and derivable.
    pub fn set_default_names(&mut self, package: bool, build: bool, install: bool) {
        if (package || build || install) && self.package_name.is_none() {
            self.package_name = self.derived_package_name();
        }

        if (install || build) && self.install_name.is_none() {
            self.install_name = self.derived_install_name();
        }

        if build && self.build_name.is_none() {
            if let Some(install_name) = &self.install_name {
                let stamp = chrono::Utc::now().format("%y%m%d%H%M%S");
                let tail: u32 = rand::random();
                self.build_name = Some(format!("{install_name}/{stamp}-{tail:08x}"));
            }
        }
    }

    /// `R/packages/{package_name}`, once derivable.
    pub fn package_path(&self) -> Option<PathBuf> {
        self.package_name
            .as_deref()
            .map(|n| self.home.package_path(n))
    }

    /// `R/builds/{build_name}`, once derivable.
    pub fn build_path(&self) -> Option<PathBuf> {
        self.build_name.as_deref().map(|n| self.home.build_path(n))
    }

    /// `R/installs/{install_name}`, once derivable.
    pub fn install_path(&self) -> Option<PathBuf> {
        self.install_name
            .as_deref()
            .map(|n| self.home.install_path(n))
    }

    /// Where artifacts are read from at install time.
    pub fn build_path_to_install(&self) -> Option<PathBuf> {
        let base = self.build_path()?;
        Some(match &self.build_subdir {
            Some(sub) => base.join(sub),
            None => base,
        })
    }

    /// Where artifacts are written at install time.
    pub fn install_path_from_build(&self) -> Option<PathBuf> {
        let base = self.install_path()?;
        Some(match &self.install_prefix {
            Some(prefix) => base.join(prefix),
            None => base,
        })
    }

    /// Required package path (fetch and later phases).
    pub fn require_package_path(&mut self) -> Result<PathBuf> {
        self.set_default_names(true, false, false);
        self.package_path()
            .ok_or_else(|| PackageError::NameRequired { what: "package" }.into())
    }

    /// Required build path (extract and later phases).
    pub fn require_build_path(&mut self) -> Result<PathBuf> {
        self.set_default_names(true, true, false);
        self.build_path()
            .ok_or_else(|| PackageError::NameRequired { what: "build" }.into())
    }

    /// Required install path (install phase).
    pub fn require_install_path(&mut self) -> Result<PathBuf> {
        self.set_default_names(true, true, true);
        self.install_path()
            .ok_or_else(|| PackageError::NameRequired { what: "install" }.into())
    }

    /// Remove and recreate the build tree.
    pub fn clean_build_path(&mut self) -> Result<()> {
        let path = self.require_build_path()?;
        if path.exists() {
            std::fs::remove_dir_all(&path)?;
        }
        std::fs::create_dir_all(&path)?;
        Ok(())
    }

    /// Whether the install directory currently exists.
    ///
    /// Uses the prospective install name without assigning it, so early
    /// reinstall checks don't pin names that later phases would refine.
    pub fn installed(&self) -> bool {
        self.derived_install_name()
            .map(|n| self.home.install_path(&n).exists())
            .unwrap_or(false)
    }

    // ------------------------------------------------------------------
    // Driver
    // ------------------------------------------------------------------

    fn step_for(
        &self,
        phase: Phase,
        current: Option<Box<dyn PipelineStep>>,
    ) -> Result<Box<dyn PipelineStep>> {
        if let Some(step) = current {
            if step.get_next(phase) {
                return Ok(step);
            }
        }
        pipeline::resolve_step(phase, self).ok_or_else(|| {
            PackageError::NoStep {
                phase: phase.as_str(),
                url: self.url.clone(),
            }
            .into()
        })
    }

    fn reinstall_check(&mut self, force: bool) -> Result<()> {
        if self.installed() {
            if force {
                self.uninstall()?;
            } else {
                return Err(PackageError::AlreadyInstalled {
                    requirement: self.freeze().to_line(),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Run the pipeline to completion: fetch, extract, inspect, build,
    /// install, then commit to the catalog and relocate.
    ///
    /// Installation state is re-checked after `fetch` and `extract`: a
    /// transport may discover the true revision only once fetched (git,
    /// wheels), and a package may self-describe during extraction.
    pub fn auto_install(&mut self, force: bool) -> Result<()> {
        let mut step = self.step_for(Phase::Init, None)?;
        step.run(Phase::Init, self)?;

        self.reinstall_check(force)?;

        let mut current = Some(step);
        for phase in [Phase::Fetch, Phase::Extract] {
            let mut step = self.step_for(phase, current.take())?;
            step.run(phase, self)?;
            current = Some(step);
            self.reinstall_check(force)?;
        }

        for phase in [Phase::Inspect, Phase::Build, Phase::Install] {
            let mut step = self.step_for(phase, current.take())?;
            step.run(phase, self)?;
            current = Some(step);
        }

        if let Some(name) = self.name.clone() {
            let install_path = self.require_install_path()?;
            info!("linking opt/{name}");
            self.home.relink_opt(&name, &install_path)?;
        }

        let package_id = self.record()?;

        let install_path = self.require_install_path()?;
        let spec = match &self.relocate {
            Some(spec) => format!("{spec},SELF"),
            None => "SELF".to_string(),
        };
        let mut catalog = self.home.catalog()?;
        relocate::relocate_install(
            &install_path,
            &spec,
            &mut catalog,
            package_id,
            self.relocate.is_some(),
        )?;

        Ok(())
    }

    /// Alias used by the top-level install command.
    pub fn install(&mut self, force: bool) -> Result<()> {
        self.auto_install(force)
    }

    /// Alternate mode for working trees: fetch, extract, and inspect as
    /// usual, then configure the environment to point at the tree instead
    /// of building and copying an install.
    pub fn develop(&mut self) -> Result<()> {
        let mut step = self.step_for(Phase::Init, None)?;
        step.run(Phase::Init, self)?;

        let mut current = Some(step);
        for phase in [Phase::Fetch, Phase::Extract, Phase::Inspect, Phase::Develop] {
            let mut step = self.step_for(phase, current.take())?;
            step.run(phase, self)?;
            current = Some(step);
        }
        Ok(())
    }

    /// Remove the install directory. Catalog rows are left behind; they are
    /// skipped by existence checks.
    pub fn uninstall(&mut self) -> Result<()> {
        let install_path = self.require_install_path()?;
        if !install_path.exists() {
            return Err(PackageError::NotInstalled {
                requirement: self.freeze().to_line(),
            }
            .into());
        }
        info!("uninstalling {}", install_path.display());
        std::fs::remove_dir_all(&install_path)?;
        Ok(())
    }

    /// Commit this install to the catalog; idempotent per attempt.
    fn record(&mut self) -> Result<i64> {
        if let Some(id) = self.db_id {
            return Ok(id);
        }
        if !self.installed() {
            return Err(PackageError::NotInstalled {
                requirement: self.freeze().to_line(),
            }
            .into());
        }

        let abstract_requirement = self.abstract_requirement.clone();
        let concrete = self.freeze().to_line();
        let package_path = self.package_path().map(|p| p.display().to_string());
        let build_path = self.build_path().map(|p| p.display().to_string());
        let install_path = self.install_path().map(|p| p.display().to_string());

        let mut catalog = self.home.catalog()?;
        let id = catalog.insert_package(&NewPackageRow {
            abstract_requirement: &abstract_requirement,
            concrete_requirement: &concrete,
            package_type: &self.package_type,
            build_type: &self.build_type,
            url: &self.url,
            name: self.name.as_deref(),
            revision: self.revision.as_deref(),
            etag: self.etag.as_deref(),
            package_name: self.package_name.as_deref(),
            build_name: self.build_name.as_deref(),
            install_name: self.install_name.as_deref(),
            package_path: package_path.as_deref(),
            build_path: build_path.as_deref(),
            install_path: install_path.as_deref(),
        })?;
        self.db_id = Some(id);
        Ok(id)
    }

    /// Link this install into an environment.
    ///
    /// Unless `force`, a prior link for the same (package, environment)
    /// fails with `AlreadyLinked`.
    pub fn link(&mut self, env: &mut Environment, force: bool) -> Result<()> {
        let install_path = self.require_install_path()?;
        if !install_path.exists() {
            return Err(PackageError::NotInstalled {
                requirement: self.freeze().to_line(),
            }
            .into());
        }

        let package_id = self.record()?;
        let mut catalog = self.home.catalog()?;
        let env_id = env.db_id(&mut catalog)?;

        if !force {
            let existing = match self.db_link_id {
                Some(id) => Some(id),
                None => catalog.find_link(package_id, env_id)?,
            };
            if let Some(link_id) = existing {
                return Err(PackageError::AlreadyLinked {
                    requirement: self.freeze().to_line(),
                    link_id,
                }
                .into());
            }
        }

        info!("linking {} into {}", self.freeze().to_line(), env.name());
        env.link_directory(&install_path)?;
        let link_id = catalog.insert_link(package_id, env_id, &self.abstract_requirement)?;
        self.db_link_id = Some(link_id);
        Ok(())
    }

    /// Check the catalog for a matching prior install and adopt its
    /// identity.
    ///
    /// Matches on whichever identity fields are currently set. When `env`
    /// is given, rows already linked into that environment are preferred.
    /// The first row whose install path still exists on disk wins; missing
    /// rows are logged and skipped. Returns whether a row was adopted.
    pub fn resolve_existing(&mut self, env: Option<&mut Environment>) -> Result<bool> {
        let mut catalog = self.home.catalog()?;
        let env_id = match env {
            Some(env) => Some(env.db_id(&mut catalog)?),
            None => None,
        };

        let query = IdentityQuery {
            url: &self.url,
            name: self.name.as_deref(),
            revision: self.revision.as_deref(),
            etag: self.etag.as_deref(),
            package_name: self.package_name.as_deref(),
            build_name: self.build_name.as_deref(),
            install_name: self.install_name.as_deref(),
        };

        let rows = catalog.find_existing(&query, env_id)?;
        let row = rows.into_iter().find(|row| {
            if row.install_path.exists() {
                true
            } else {
                warn!(
                    "catalog row {} for {} missing on disk at {}",
                    row.id,
                    self.name
                        .as_deref()
                        .or(row.name.as_deref())
                        .unwrap_or(&self.url),
                    row.install_path.display()
                );
                false
            }
        });

        let Some(row) = row else {
            return Ok(false);
        };

        debug!(
            "found existing install {} at {}",
            row.id,
            row.install_path.display()
        );

        // Everything below either already matches or was unset.
        self.db_id = Some(row.id);
        self.db_link_id = row.link_id;
        self.name = row.name;
        self.revision = row.revision;
        self.package_name = row.package_name;
        self.build_name = row.build_name;
        self.install_name = row.install_name;

        for (label, ours, recorded) in [
            ("package", self.package_path(), row.package_path),
            ("build", self.build_path(), row.build_path),
            ("install", self.install_path(), Some(row.install_path)),
        ] {
            if ours != recorded {
                warn!(
                    "{label} paths don't match:\n  old: {:?}\n  new: {:?}",
                    recorded, ours
                );
            }
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn package(line: &str) -> (TempDir, Package) {
        let dir = TempDir::new().unwrap();
        let home = Home::new(dir.path());
        home.init().unwrap();
        let req = Requirement::parse(line).unwrap();
        (dir, Package::new(&req, home))
    }

    #[test]
    fn package_name_from_url() {
        let (_dir, mut pkg) = package("git+https://example.com/org/repo");
        pkg.package_type = "git".to_string();
        pkg.set_default_names(true, false, false);
        assert_eq!(
            pkg.package_name.as_deref(),
            Some("git/example.com/org/repo")
        );
    }

    #[test]
    fn package_name_collapses_slashes() {
        let (_dir, mut pkg) = package("http://example.com//deep///path/pkg.tar.gz");
        pkg.set_default_names(true, false, false);
        assert_eq!(
            pkg.package_name.as_deref(),
            Some("http/example.com/deep/path/pkg.tar.gz")
        );
    }

    #[test]
    fn install_name_from_name_and_revision() {
        let (_dir, mut pkg) = package("pypi:demo --name demo --revision 1.2.0");
        pkg.set_default_names(true, false, true);
        assert_eq!(pkg.install_name.as_deref(), Some("demo/1.2.0"));
    }

    #[test]
    fn install_name_strips_archive_suffixes() {
        for (url, expected) in [
            ("http://h/pkg.tar.gz", "http/h/pkg"),
            ("http://h/pkg.tgz", "http/h/pkg"),
            ("http://h/pkg.zip", "http/h/pkg"),
            // .egg and .whl are not archive suffixes here.
            ("http://h/pkg.egg", "http/h/pkg.egg"),
            ("http://h/pkg.whl", "http/h/pkg.whl"),
        ] {
            let (_dir, mut pkg) = package(url);
            pkg.set_default_names(true, false, true);
            assert_eq!(pkg.install_name.as_deref(), Some(expected), "{url}");
        }
    }

    #[test]
    fn build_names_are_unique() {
        let (_dir, mut a) = package("pypi:demo --name demo --revision 1.0");
        let (_dir2, mut b) = package("pypi:demo --name demo --revision 1.0");
        a.set_default_names(true, true, true);
        b.set_default_names(true, true, true);
        let a = a.build_name.unwrap();
        let b = b.build_name.unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with("demo/1.0/"));
    }

    #[test]
    fn freeze_round_trips() {
        let (_dir, mut pkg) = package("pypi:demo --revision '>=1,<2' --config --flag");
        let frozen = pkg.freeze();
        let reparsed = Requirement::parse(&frozen.to_line()).unwrap();
        assert_eq!(frozen, reparsed);
    }

    #[test]
    fn paths_follow_subdir_and_prefix() {
        let (_dir, mut pkg) = package("http://h/pkg.tar.gz --name pkg --revision 1.0");
        pkg.set_default_names(true, true, true);
        pkg.build_subdir = Some(PathBuf::from("build"));
        pkg.install_prefix = Some(PathBuf::from("lib/python2.7/site-packages"));

        let to_install = pkg.build_path_to_install().unwrap();
        assert!(to_install.ends_with("build"));
        let from_build = pkg.install_path_from_build().unwrap();
        assert!(from_build.ends_with("pkg/1.0/lib/python2.7/site-packages"));
    }

    #[test]
    fn uninstall_requires_install() {
        let (_dir, mut pkg) = package("http://h/pkg.tar.gz --name pkg --revision 1.0");
        assert!(matches!(
            pkg.uninstall(),
            Err(crate::error::VeeError::Package(
                PackageError::NotInstalled { .. }
            ))
        ));
    }
}
