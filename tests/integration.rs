//! Integration tests for vee.
//!
//! Uses tempdir homes and local package fixtures, so the whole pipeline
//! runs without network access. Git scenarios are skipped when no `git`
//! binary is on PATH.

use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;
use vee_lib::{Environment, Home, Package, PackageError, Requirement, VeeError};

/// Fresh home in a tempdir.
fn create_home() -> (TempDir, Home) {
    let dir = TempDir::new().unwrap();
    let home = Home::new(dir.path().join("home"));
    home.init().unwrap();
    (dir, home)
}

/// Write a small `.tar.gz` source package and return its path.
fn create_tarball(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(format!("{name}.tar.gz"));
    let file = std::fs::File::create(&path).unwrap();
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);

    let mut add_file = |rel: &str, body: &[u8]| {
        let mut header = tar::Header::new_gnu();
        header.set_size(body.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, rel, body).unwrap();
    };
    add_file(&format!("{name}/README"), b"fixture package\n");
    add_file(&format!("{name}/share/data.txt"), b"payload\n");

    builder.into_inner().unwrap().finish().unwrap();
    path
}

/// Write an unpacked-wheel-shaped zip and return its path.
fn create_wheel(dir: &Path) -> PathBuf {
    let path = dir.join("purewheel-1.0-py2.py3-none-any.whl");
    let file = std::fs::File::create(&path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();

    let entries: &[(&str, &str)] = &[
        ("purewheel/__init__.py", "__version__ = '1.0'\n"),
        ("purewheel-1.0.dist-info/METADATA", "Name: purewheel\nVersion: 1.0\n\n"),
        ("purewheel-1.0.dist-info/top_level.txt", "purewheel\n"),
        ("purewheel-1.0.data/scripts/pw", "#!/bin/sh\necho pw\n"),
    ];
    for (name, body) in entries {
        zip.start_file(*name, options).unwrap();
        zip.write_all(body.as_bytes()).unwrap();
    }
    zip.finish().unwrap();
    path
}

fn package_for(home: &Home, line: &str) -> Package {
    let req = Requirement::parse(line).unwrap();
    Package::new(&req, home.clone())
}

fn have(tool: &str) -> bool {
    Command::new(tool)
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

#[test]
fn tarball_install_end_to_end() {
    let (dir, home) = create_home();
    let tarball = create_tarball(dir.path(), "demo");

    let line = format!("file:{} --name demo --revision 1.0", tarball.display());
    let mut pkg = package_for(&home, &line);
    pkg.auto_install(false).unwrap();

    // Content-addressed install location.
    let install = home.install_path("demo/1.0");
    assert!(install.join("demo/README").exists());

    // Named installs get an opt symlink.
    assert_eq!(std::fs::read_link(home.opt_path("demo")).unwrap(), install);

    // One catalog row, with identity recorded.
    let catalog = home.catalog().unwrap();
    let rows = catalog.list_packages().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].name.as_deref(), Some("demo"));
    assert_eq!(rows[0].revision.as_deref(), Some("1.0"));
}

#[test]
fn reinstall_requires_force() {
    let (dir, home) = create_home();
    let tarball = create_tarball(dir.path(), "demo");
    let line = format!("file:{} --name demo --revision 1.0", tarball.display());

    let mut pkg = package_for(&home, &line);
    pkg.auto_install(false).unwrap();

    let mut again = package_for(&home, &line);
    let err = again.auto_install(false).unwrap_err();
    assert!(matches!(
        err,
        VeeError::Package(PackageError::AlreadyInstalled { .. })
    ));
}

#[test]
fn force_reinstall_adds_row_keeps_one_install() {
    let (dir, home) = create_home();
    let tarball = create_tarball(dir.path(), "demo");
    let line = format!("file:{} --name demo --revision 1.0", tarball.display());

    let mut first = package_for(&home, &line);
    first.install(true).unwrap();
    let mut second = package_for(&home, &line);
    second.install(true).unwrap();

    // Two rows, one (replaced) install directory.
    let catalog = home.catalog().unwrap();
    assert_eq!(catalog.list_packages().unwrap().len(), 2);
    assert!(home.install_path("demo/1.0").exists());
    let installs: Vec<_> = std::fs::read_dir(home.root().join("installs/demo"))
        .unwrap()
        .collect();
    assert_eq!(installs.len(), 1);
}

#[test]
fn resolve_existing_adopts_identity() {
    let (dir, home) = create_home();
    let tarball = create_tarball(dir.path(), "demo");
    let line = format!("file:{} --name demo --revision 1.0", tarball.display());

    let mut pkg = package_for(&home, &line);
    pkg.auto_install(false).unwrap();

    let mut fresh = package_for(&home, &line);
    assert!(fresh.resolve_existing(None).unwrap());
    assert_eq!(fresh.install_name.as_deref(), Some("demo/1.0"));
    assert!(fresh.db_id().is_some());
    assert!(fresh.installed());
}

#[test]
fn resolve_existing_skips_deleted_installs() {
    let (dir, home) = create_home();
    let tarball = create_tarball(dir.path(), "demo");
    let line = format!("file:{} --name demo --revision 1.0", tarball.display());

    let mut pkg = package_for(&home, &line);
    pkg.auto_install(false).unwrap();
    pkg.uninstall().unwrap();

    // The row is still there, but its install is gone.
    let mut fresh = package_for(&home, &line);
    assert!(!fresh.resolve_existing(None).unwrap());
}

#[test]
fn link_twice_fails_without_force() {
    let (dir, home) = create_home();
    let tarball = create_tarball(dir.path(), "demo");
    let line = format!("file:{} --name demo --revision 1.0", tarball.display());

    let mut pkg = package_for(&home, &line);
    pkg.auto_install(false).unwrap();

    let mut env = Environment::new("work", &home);
    pkg.link(&mut env, false).unwrap();
    assert!(env.path().join("demo/README").exists());

    let err = pkg.link(&mut env, false).unwrap_err();
    assert!(matches!(
        err,
        VeeError::Package(PackageError::AlreadyLinked { .. })
    ));

    pkg.link(&mut env, true).unwrap();
}

#[test]
fn link_prefers_environment_rows() {
    let (dir, home) = create_home();
    let tarball = create_tarball(dir.path(), "demo");
    let line = format!("file:{} --name demo --revision 1.0", tarball.display());

    let mut pkg = package_for(&home, &line);
    pkg.auto_install(false).unwrap();
    let mut env = Environment::new("work", &home);
    pkg.link(&mut env, false).unwrap();

    // A fresh package scoped to the environment adopts the linked row and
    // so refuses to link again.
    let mut fresh = package_for(&home, &line);
    assert!(fresh.resolve_existing(Some(&mut env)).unwrap());
    let err = fresh.link(&mut env, false).unwrap_err();
    assert!(matches!(
        err,
        VeeError::Package(PackageError::AlreadyLinked { .. })
    ));
}

#[test]
fn wheel_install_stages_site_packages() {
    let (dir, home) = create_home();
    let wheel = create_wheel(dir.path());

    let line = format!("file:{} --name purewheel --revision 1.0", wheel.display());
    let mut pkg = package_for(&home, &line);
    pkg.auto_install(false).unwrap();

    let install = home.install_path("purewheel/1.0");
    assert!(install.exists());

    // Scripts land in bin/, modules and metadata under site-packages.
    assert!(install.join("bin/pw").exists());
    let mut found_module = false;
    let mut found_metadata = false;
    for entry in jwalk::WalkDir::new(&install).into_iter().filter_map(|e| e.ok()) {
        let path = entry.path();
        if path.ends_with("site-packages/purewheel/__init__.py") {
            found_module = true;
        }
        if path.ends_with("purewheel-1.0.dist-info/METADATA") {
            found_metadata = true;
        }
    }
    assert!(found_module, "module not staged into site-packages");
    assert!(found_metadata, "dist-info not staged into site-packages");
}

#[test]
fn directory_package_installs_as_tree() {
    let (dir, home) = create_home();
    let source = dir.path().join("srcpkg");
    std::fs::create_dir_all(source.join("bin")).unwrap();
    std::fs::write(source.join("bin/tool"), "#!/bin/sh\n").unwrap();

    let line = format!("{} --name srcpkg --revision 0.1", source.display());
    let mut pkg = package_for(&home, &line);
    pkg.auto_install(false).unwrap();

    assert!(home.install_path("srcpkg/0.1").join("bin/tool").exists());
}

#[test]
fn git_install_pins_short_revision() {
    if !have("git") {
        eprintln!("git not available, skipping");
        return;
    }

    let (dir, home) = create_home();

    // A local upstream repository with one commit.
    let upstream = dir.path().join("upstream");
    std::fs::create_dir_all(&upstream).unwrap();
    std::fs::write(upstream.join("README"), "hello\n").unwrap();
    for args in [
        vec!["init", "-q"],
        vec!["add", "."],
        vec![
            "-c",
            "user.email=test@example.com",
            "-c",
            "user.name=test",
            "commit",
            "-q",
            "-m",
            "init",
        ],
    ] {
        let status = Command::new("git")
            .args(&args)
            .current_dir(&upstream)
            .status()
            .unwrap();
        assert!(status.success(), "git {args:?} failed");
    }

    let line = format!("git+file://{} --name upstream", upstream.display());
    let mut pkg = package_for(&home, &line);
    pkg.auto_install(false).unwrap();

    // Revision resolved to exactly 8 lower-case hex characters of HEAD.
    let revision = pkg.revision.clone().unwrap();
    assert_eq!(revision.len(), 8);
    assert!(revision.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));

    assert!(home
        .install_path(&format!("upstream/{revision}"))
        .join("README")
        .exists());

    let catalog = home.catalog().unwrap();
    let rows = catalog.list_packages().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].revision.as_deref(), Some(revision.as_str()));
}

#[test]
fn pypi_url_normalizes_to_lowercase() {
    let (_dir, home) = create_home();
    let mut pkg = package_for(&home, "pypi:Foo");

    // Drive just the init phase through the dispatcher.
    let mut step = vee_lib::pipeline::resolve_step(vee_lib::Phase::Init, &pkg).unwrap();
    assert_eq!(step.name(), "pypi");
    step.run(vee_lib::Phase::Init, &mut pkg).unwrap();

    assert_eq!(pkg.url, "pypi:foo");
    assert_eq!(pkg.package_type, "pypi");
}
