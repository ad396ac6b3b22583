//! Binary relocation: make a fresh install position-independent.
//!
//! After installation, dynamic libraries and executables may carry absolute
//! paths into prior installs of their dependencies (or into their own build
//! prefix). The relocation pass scans the install tree for binaries by
//! magic, computes rewrites for every embedded path that points into one of
//! the listed prior installs (the literal token `SELF` names the new
//! install itself), and applies them with the platform's rewrite tool:
//! `patchelf` on ELF systems, `install_name_tool` on Mach-O.
//!
//! Every discovered binary is recorded in the catalog's shared-libraries
//! table regardless of whether anything was rewritten, so later installs
//! can locate the libraries this package provides.

use crate::catalog::{Catalog, SharedLibraryRow};
use crate::error::{RelocateError, Result};
use goblin::mach::Mach;
use goblin::Object;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::process::Command;

/// What a binary turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryKind {
    Elf,
    MachO,
}

/// Dynamic-link metadata pulled out of one binary.
#[derive(Debug, Clone)]
struct BinaryInfo {
    path: PathBuf,
    kind: BinaryKind,
    /// ELF SONAME or Mach-O install name.
    soname: Option<String>,
    /// DT_NEEDED entries or load-dylib paths.
    deps: Vec<String>,
    /// ELF RPATH/RUNPATH entries.
    rpaths: Vec<String>,
}

/// Relocate an installed tree and record its shared libraries.
///
/// `spec` is the comma-separated list of prior install paths plus `SELF`.
/// With `rewrite` false only the scan-and-record half runs.
pub fn relocate_install(
    install_path: &Path,
    spec: &str,
    catalog: &mut Catalog,
    package_id: i64,
    rewrite: bool,
) -> Result<()> {
    let targets: Vec<PathBuf> = spec
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| {
            if t == "SELF" {
                install_path.to_path_buf()
            } else {
                PathBuf::from(t)
            }
        })
        .collect();

    if rewrite {
        info!("relocating {}", install_path.display());
    }

    for binary in scan_tree(install_path) {
        let mut recorded = binary.clone();

        if rewrite {
            match apply_rewrites(&binary, &targets, install_path) {
                Ok(Some(rewritten)) => recorded = rewritten,
                Ok(None) => {}
                Err(e) => return Err(e.into()),
            }
        }

        let rel = recorded
            .path
            .strip_prefix(install_path)
            .unwrap_or(&recorded.path)
            .display()
            .to_string();
        catalog.insert_shared_library(&SharedLibraryRow {
            package_id,
            path: rel,
            soname: recorded.soname.clone(),
            deps: recorded.deps.clone(),
        })?;
    }

    Ok(())
}

/// All dynamic binaries under `root`, identified by magic.
fn scan_tree(root: &Path) -> Vec<BinaryInfo> {
    let mut found = Vec::new();
    for entry in jwalk::WalkDir::new(root)
        .sort(true)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if !has_binary_magic(&path) {
            continue;
        }
        match parse_binary(&path) {
            Ok(Some(info)) => found.push(info),
            Ok(None) => {}
            Err(e) => debug!("skipping {}: {}", path.display(), e),
        }
    }
    found
}

/// Cheap magic check so only candidate files are fully parsed.
fn has_binary_magic(path: &Path) -> bool {
    let Ok(bytes) = read_prefix(path, 4) else {
        return false;
    };
    if bytes.len() < 4 {
        return false;
    }
    matches!(
        [bytes[0], bytes[1], bytes[2], bytes[3]],
        [0x7f, b'E', b'L', b'F']
            | [0xfe, 0xed, 0xfa, 0xce]
            | [0xfe, 0xed, 0xfa, 0xcf]
            | [0xce, 0xfa, 0xed, 0xfe]
            | [0xcf, 0xfa, 0xed, 0xfe]
            | [0xca, 0xfe, 0xba, 0xbe]
    )
}

fn read_prefix(path: &Path, n: usize) -> std::io::Result<Vec<u8>> {
    use std::io::Read;
    let mut file = std::fs::File::open(path)?;
    let mut buffer = vec![0u8; n];
    let read = file.read(&mut buffer)?;
    buffer.truncate(read);
    Ok(buffer)
}

fn parse_binary(path: &Path) -> std::result::Result<Option<BinaryInfo>, RelocateError> {
    let bytes = std::fs::read(path)?;
    let object = Object::parse(&bytes).map_err(|e| RelocateError::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    match object {
        Object::Elf(elf) => {
            let mut rpaths: Vec<String> = Vec::new();
            for rpath in elf.rpaths.iter().chain(elf.runpaths.iter()) {
                for entry in rpath.split(':').filter(|s| !s.is_empty()) {
                    rpaths.push(entry.to_string());
                }
            }
            Ok(Some(BinaryInfo {
                path: path.to_path_buf(),
                kind: BinaryKind::Elf,
                soname: elf.soname.map(str::to_string),
                deps: elf.libraries.iter().map(|s| s.to_string()).collect(),
                rpaths,
            }))
        }
        Object::Mach(Mach::Binary(macho)) => Ok(Some(BinaryInfo {
            path: path.to_path_buf(),
            kind: BinaryKind::MachO,
            soname: macho.name.map(str::to_string),
            deps: macho
                .libs
                .iter()
                .map(|s| s.to_string())
                .filter(|s| s != "self")
                .collect(),
            rpaths: macho.rpaths.iter().map(|s| s.to_string()).collect(),
        })),
        // Fat binaries and archives are left alone.
        _ => Ok(None),
    }
}

/// Map a dependency path into the new install when it points into one of
/// the relocation targets. Identity mappings return `None`.
fn map_dependency(dep: &str, targets: &[PathBuf], install_path: &Path) -> Option<String> {
    for target in targets {
        if let Ok(rest) = Path::new(dep).strip_prefix(target) {
            let mapped = install_path.join(rest);
            let mapped = mapped.display().to_string();
            if mapped != dep {
                return Some(mapped);
            }
            return None;
        }
    }
    None
}

/// Apply the rewrites one binary needs; returns the updated metadata when
/// anything changed.
fn apply_rewrites(
    binary: &BinaryInfo,
    targets: &[PathBuf],
    install_path: &Path,
) -> std::result::Result<Option<BinaryInfo>, RelocateError> {
    let mut updated = binary.clone();
    let mut changed = false;

    match binary.kind {
        BinaryKind::Elf => {
            let mut args: Vec<String> = Vec::new();

            for (i, dep) in binary.deps.iter().enumerate() {
                if let Some(new) = map_dependency(dep, targets, install_path) {
                    debug!("{}: {} -> {}", binary.path.display(), dep, new);
                    args.extend([
                        "--replace-needed".to_string(),
                        dep.clone(),
                        new.clone(),
                    ]);
                    updated.deps[i] = new;
                    changed = true;
                }
            }

            let mut rpaths_changed = false;
            for (i, rpath) in binary.rpaths.iter().enumerate() {
                if let Some(new) = map_dependency(rpath, targets, install_path) {
                    updated.rpaths[i] = new;
                    rpaths_changed = true;
                }
            }
            if rpaths_changed {
                args.extend(["--set-rpath".to_string(), updated.rpaths.join(":")]);
                changed = true;
            }

            if changed {
                args.push(binary.path.display().to_string());
                run_tool("patchelf", &args)?;
            }
        }
        BinaryKind::MachO => {
            let mut args: Vec<String> = Vec::new();

            for (i, dep) in binary.deps.iter().enumerate() {
                if let Some(new) = map_dependency(dep, targets, install_path) {
                    debug!("{}: {} -> {}", binary.path.display(), dep, new);
                    args.extend(["-change".to_string(), dep.clone(), new.clone()]);
                    updated.deps[i] = new;
                    changed = true;
                }
            }

            // A library's install name must name its new location, or
            // dependents resolve it at the old one.
            if let Some(soname) = &binary.soname {
                let new_id = binary.path.display().to_string();
                if map_dependency(soname, targets, install_path).is_some() && *soname != new_id {
                    args.extend(["-id".to_string(), new_id.clone()]);
                    updated.soname = Some(new_id);
                    changed = true;
                }
            }

            if changed {
                args.push(binary.path.display().to_string());
                run_tool("install_name_tool", &args)?;
            }
        }
    }

    Ok(changed.then_some(updated))
}

fn run_tool(tool: &str, args: &[String]) -> std::result::Result<(), RelocateError> {
    let status = Command::new(tool).args(args).status().map_err(|e| {
        warn!("{tool} not available: {e}");
        RelocateError::Io(e)
    })?;
    if status.success() {
        Ok(())
    } else {
        Err(RelocateError::CommandFailed {
            command: format!("{tool} {}", args.join(" ")),
            code: status.code(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependency_mapping() {
        let targets = vec![
            PathBuf::from("/vee/installs/a/1"),
            PathBuf::from("/vee/installs/b/2"),
        ];
        let new = Path::new("/vee/installs/a/3");

        // Dep into a prior install follows the package to its new home.
        assert_eq!(
            map_dependency("/vee/installs/a/1/lib/liba.so", &targets, new).as_deref(),
            Some("/vee/installs/a/3/lib/liba.so")
        );
        assert_eq!(
            map_dependency("/vee/installs/b/2/lib/libb.so", &targets, new).as_deref(),
            Some("/vee/installs/a/3/lib/libb.so")
        );

        // System paths are untouched.
        assert_eq!(map_dependency("/usr/lib/libc.so.6", &targets, new), None);
        assert_eq!(map_dependency("libz.so.1", &targets, new), None);
    }

    #[test]
    fn self_mapping_is_identity() {
        let new = Path::new("/vee/installs/a/3");
        let targets = vec![new.to_path_buf()];
        // SELF resolves to the install itself; already-correct paths are
        // not rewritten.
        assert_eq!(
            map_dependency("/vee/installs/a/3/lib/liba.so", &targets, new),
            None
        );
    }

    #[test]
    fn magic_rejects_text() {
        let dir = tempfile::TempDir::new().unwrap();
        let script = dir.path().join("tool");
        std::fs::write(&script, "#!/bin/sh\necho hi\n").unwrap();
        assert!(!has_binary_magic(&script));

        let fake_elf = dir.path().join("libfake.so");
        std::fs::write(&fake_elf, [0x7f, b'E', b'L', b'F', 0, 0]).unwrap();
        assert!(has_binary_magic(&fake_elf));
    }

    #[test]
    fn scan_skips_unparseable_binaries() {
        let dir = tempfile::TempDir::new().unwrap();
        // Magic alone is not a valid ELF; the scan must tolerate it.
        std::fs::write(dir.path().join("libfake.so"), [0x7f, b'E', b'L', b'F']).unwrap();
        assert!(scan_tree(dir.path()).is_empty());
    }
}
