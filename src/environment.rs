//! Named environments: disposable link trees over install directories.
//!
//! An environment is a directory under `R/environments/{name}` mirroring the
//! directory structure of each linked install, with symlinks at the file
//! level. Installs stay immutable; environments are cheap to rebuild and
//! deleting an install merely leaves dangling links behind.

use crate::catalog::Catalog;
use crate::error::Result;
use crate::home::Home;
use log::{debug, info};
use std::path::{Path, PathBuf};

/// Handle on a named environment.
#[derive(Debug, Clone)]
pub struct Environment {
    name: String,
    path: PathBuf,
    db_id: Option<i64>,
}

impl Environment {
    pub fn new(name: impl Into<String>, home: &Home) -> Self {
        let name = name.into();
        let path = home.environment_path(&name);
        Self {
            name,
            path,
            db_id: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Catalog row id, created on first use.
    pub fn db_id(&mut self, catalog: &mut Catalog) -> Result<i64> {
        if let Some(id) = self.db_id {
            return Ok(id);
        }
        let id = catalog.environment_id(&self.name, &self.path)?;
        self.db_id = Some(id);
        Ok(id)
    }

    /// Replicate an install tree into the environment.
    ///
    /// Directories are created, files are symlinked to the install. Existing
    /// links are replaced so re-linking a rebuilt install converges.
    pub fn link_directory(&self, install_path: &Path) -> Result<()> {
        info!(
            "linking {} into environment {}",
            install_path.display(),
            self.name
        );
        std::fs::create_dir_all(&self.path)?;

        for entry in jwalk::WalkDir::new(install_path)
            .sort(true)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let source = entry.path();
            let relative = match source.strip_prefix(install_path) {
                Ok(r) if !r.as_os_str().is_empty() => r.to_path_buf(),
                _ => continue,
            };
            let target = self.path.join(&relative);

            if entry.file_type().is_dir() {
                std::fs::create_dir_all(&target)?;
            } else {
                if target.symlink_metadata().is_ok() {
                    std::fs::remove_file(&target)?;
                }
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                symlink(&source, &target)?;
                debug!("linked {}", relative.display());
            }
        }
        Ok(())
    }
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn link_directory_mirrors_tree() {
        let dir = TempDir::new().unwrap();
        let home = Home::new(dir.path());
        home.init().unwrap();

        let install = home.install_path("demo/1.0");
        std::fs::create_dir_all(install.join("bin")).unwrap();
        std::fs::write(install.join("bin/demo"), "#!/bin/sh\n").unwrap();
        std::fs::write(install.join("README"), "demo\n").unwrap();

        let env = Environment::new("work", &home);
        env.link_directory(&install).unwrap();

        let linked = env.path().join("bin/demo");
        assert!(linked.symlink_metadata().unwrap().file_type().is_symlink());
        assert_eq!(std::fs::read_link(&linked).unwrap(), install.join("bin/demo"));
        assert!(env.path().join("README").exists());
    }

    #[test]
    fn relink_replaces_existing() {
        let dir = TempDir::new().unwrap();
        let home = Home::new(dir.path());
        home.init().unwrap();

        let v1 = home.install_path("demo/1.0");
        let v2 = home.install_path("demo/2.0");
        for v in [&v1, &v2] {
            std::fs::create_dir_all(v).unwrap();
            std::fs::write(v.join("tool"), "x").unwrap();
        }

        let env = Environment::new("work", &home);
        env.link_directory(&v1).unwrap();
        env.link_directory(&v2).unwrap();

        assert_eq!(
            std::fs::read_link(env.path().join("tool")).unwrap(),
            v2.join("tool")
        );
    }
}
