//! Generic builder: archive extraction, autotools/make builds, copy installs.
//!
//! This is the lowest-priority step and matches every phase nothing else
//! claims, so a package with no recognizable build system still extracts
//! and installs as a plain file tree.

use crate::error::{BuildError, Result};
use crate::package::Package;
use crate::pipeline::{run_command, Phase, PipelineStep};
use flate2::read::GzDecoder;
use log::{debug, info};
use std::path::{Path, PathBuf};

/// Pipeline step of last resort.
pub struct GenericBuilder;

impl GenericBuilder {
    pub(crate) fn factory(_phase: Phase, _pkg: &Package) -> Option<Box<dyn PipelineStep>> {
        Some(Box::new(GenericBuilder))
    }
}

impl PipelineStep for GenericBuilder {
    fn name(&self) -> &'static str {
        "generic"
    }

    fn run(&mut self, phase: Phase, pkg: &mut Package) -> Result<()> {
        match phase {
            Phase::Extract => extract(pkg),
            Phase::Inspect => {
                // Note the build-system entry point, if any, for the build
                // phase to run from.
                if let Some(build_path) = pkg.build_path() {
                    if let Some(found) = find_in_tree(&build_path, "configure", TreeEntry::File)
                        .or_else(|| find_in_tree(&build_path, "Makefile", TreeEntry::File))
                    {
                        let parent = found.parent().unwrap_or(&build_path);
                        if let Ok(rel) = parent.strip_prefix(&build_path) {
                            if !rel.as_os_str().is_empty() {
                                pkg.build_subdir = Some(rel.to_path_buf());
                            }
                        }
                    }
                }
                Ok(())
            }
            Phase::Build => build(pkg),
            Phase::Install => copy_install(pkg),
            _ => Ok(()),
        }
    }
}

/// Extract the cached package into a clean build tree.
///
/// Tarballs and zips (including eggs and wheels) are unpacked; directories
/// are copied, or hard-linked when the package asks for it. `.git` trees
/// are left behind.
fn extract(pkg: &mut Package) -> Result<()> {
    pkg.set_default_names(true, true, false);
    let Some(package_path) = pkg.package_path() else {
        return Ok(());
    };
    let build_path = pkg.require_build_path()?;

    info!("extracting to {}", build_path.display());
    let name = package_path.display().to_string();

    if name.ends_with(".tgz") || name.ends_with(".tar.gz") {
        pkg.clean_build_path()?;
        let file = std::fs::File::open(&package_path).map_err(BuildError::Io)?;
        let mut archive = tar::Archive::new(GzDecoder::new(file));
        archive.unpack(&build_path).map_err(BuildError::Io)?;
    } else if name.ends_with(".zip") || name.ends_with(".egg") || name.ends_with(".whl") {
        pkg.clean_build_path()?;
        let file = std::fs::File::open(&package_path).map_err(BuildError::Io)?;
        let mut archive = zip::ZipArchive::new(file)
            .map_err(|e| BuildError::Config(format!("bad zip {name}: {e}")))?;
        archive
            .extract(&build_path)
            .map_err(|e| BuildError::Config(format!("could not extract {name}: {e}")))?;
    } else if package_path.is_dir() {
        if build_path.exists() {
            std::fs::remove_dir_all(&build_path).map_err(BuildError::Io)?;
        }
        copy_tree(&package_path, &build_path, pkg.hard_link)?;
    } else {
        return Err(BuildError::Config(format!("unknown package type {name}")).into());
    }
    Ok(())
}

/// Run the conventional build commands found in the tree.
fn build(pkg: &mut Package) -> Result<()> {
    let build_dir = match pkg.build_path_to_install() {
        Some(dir) => dir,
        None => return Ok(()),
    };
    let env = pkg.fresh_environ();

    if build_dir.join("configure").exists() {
        info!("running ./configure");
        let mut args = vec!["configure".to_string()];
        args.extend(pkg.config.iter().cloned());
        run_command("sh", &args, &build_dir, &env)?;
    }

    if build_dir.join("Makefile").exists() {
        info!("running make");
        let jobs = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        run_command("make", &[format!("-j{jobs}")], &build_dir, &env)?;
    } else {
        debug!("nothing to build in {}", build_dir.display());
    }
    Ok(())
}

/// Copy the built artifacts into the install tree.
pub(crate) fn copy_install(pkg: &mut Package) -> Result<()> {
    pkg.require_install_path()?;
    let source = pkg
        .build_path_to_install()
        .ok_or(crate::error::PackageError::NameRequired { what: "build" })?;
    let dest = pkg.install_path_from_build().expect("install name set above");

    if !source.exists() {
        return Err(BuildError::MissingFile { path: source }.into());
    }

    info!("installing to {}", dest.display());
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(BuildError::Io)?;
    }
    copy_tree(&source, &dest, false)?;
    Ok(())
}

/// Kinds of entries [`find_in_tree`] can look for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TreeEntry {
    File,
    Dir,
}

/// Breadth-first search for the shallowest entry matching `pattern`.
///
/// Patterns are either exact names or a single leading `*` matched as a
/// suffix (`*.egg-info`). Entries at the same depth are visited in name
/// order, so the result is deterministic.
pub(crate) fn find_in_tree(root: &Path, pattern: &str, kind: TreeEntry) -> Option<PathBuf> {
    let mut level = vec![root.to_path_buf()];

    while !level.is_empty() {
        let mut next = Vec::new();
        for dir in &level {
            let Ok(entries) = std::fs::read_dir(dir) else {
                continue;
            };
            let mut entries: Vec<_> = entries.filter_map(|e| e.ok()).collect();
            entries.sort_by_key(|e| e.file_name());

            for entry in entries {
                let name = entry.file_name().to_string_lossy().into_owned();
                let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);

                let matches = match pattern.strip_prefix('*') {
                    Some(suffix) => name.ends_with(suffix),
                    None => name == pattern,
                };
                let kind_ok = match kind {
                    TreeEntry::File => !is_dir,
                    TreeEntry::Dir => is_dir,
                };
                if matches && kind_ok {
                    return Some(entry.path());
                }
                if is_dir {
                    next.push(entry.path());
                }
            }
        }
        level = next;
    }
    None
}

/// Recursively copy `source` into `dest`, preserving symlinks and skipping
/// `.git`. With `hard_link`, regular files become hard links instead of
/// copies.
pub(crate) fn copy_tree(
    source: &Path,
    dest: &Path,
    hard_link: bool,
) -> std::result::Result<(), BuildError> {
    std::fs::create_dir_all(dest)?;

    for entry in std::fs::read_dir(source)? {
        let entry = entry?;
        let name = entry.file_name();
        if name == ".git" {
            continue;
        }
        let target = dest.join(&name);
        let file_type = entry.file_type()?;

        if file_type.is_symlink() {
            let link_target = std::fs::read_link(entry.path())?;
            if target.symlink_metadata().is_ok() {
                std::fs::remove_file(&target)?;
            }
            symlink(&link_target, &target)?;
        } else if file_type.is_dir() {
            copy_tree(&entry.path(), &target, hard_link)?;
        } else if hard_link {
            if target.exists() {
                std::fs::remove_file(&target)?;
            }
            std::fs::hard_link(entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
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
    fn find_in_tree_prefers_shallowest() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        std::fs::write(dir.path().join("a/setup.py"), "").unwrap();
        std::fs::write(dir.path().join("a/b/setup.py"), "").unwrap();

        let found = find_in_tree(dir.path(), "setup.py", TreeEntry::File).unwrap();
        assert_eq!(found, dir.path().join("a/setup.py"));
    }

    #[test]
    fn find_in_tree_suffix_pattern() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("demo.egg-info")).unwrap();

        let found = find_in_tree(dir.path(), "*.egg-info", TreeEntry::Dir).unwrap();
        assert_eq!(found, dir.path().join("demo.egg-info"));
        assert!(find_in_tree(dir.path(), "*.egg-info", TreeEntry::File).is_none());
    }

    #[test]
    fn copy_tree_skips_git() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir_all(src.join(".git")).unwrap();
        std::fs::create_dir_all(src.join("lib")).unwrap();
        std::fs::write(src.join(".git/HEAD"), "ref").unwrap();
        std::fs::write(src.join("lib/code.py"), "pass").unwrap();

        let dst = dir.path().join("dst");
        copy_tree(&src, &dst, false).unwrap();

        assert!(dst.join("lib/code.py").exists());
        assert!(!dst.join(".git").exists());
    }

    #[test]
    fn copy_tree_hard_links() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("data"), "x").unwrap();

        let dst = dir.path().join("dst");
        copy_tree(&src, &dst, true).unwrap();

        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            let a = std::fs::metadata(src.join("data")).unwrap();
            let b = std::fs::metadata(dst.join("data")).unwrap();
            assert_eq!(a.ino(), b.ino());
        }
    }
}
