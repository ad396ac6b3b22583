//! Python builder: setup scripts, eggs, and wheels.
//!
//! Activates when the extracted tree contains a `setup.py`, an egg-info
//! directory, or a dist-info directory (searched breadth-first, so the
//! shallowest match wins). The build phase emulates a distribution
//! installer with one of three disjoint strategies:
//!
//! 1. *Setup script*: drive `setup.py build` / `setup.py install` under a
//!    resolved environment. Packages that must build during install (for
//!    example anything using `install_clib`) set `defer_setup_build`.
//! 2. *Egg*: the archive already holds built artifacts next to an
//!    `EGG-INFO`/`*.egg-info`; rename the metadata directory canonically
//!    and stage its parent as site-packages content.
//! 3. *Wheel*: stage a `build/` tree with the dist-info and `top_level.txt`
//!    members under site-packages and `*.data/scripts` under `bin`.

use crate::config;
use crate::environ::join_env_path;
use crate::error::{BuildError, Result};
use crate::package::Package;
use crate::pipeline::{generic, run_command, run_command_output, Phase, PipelineStep};
use crate::requirement::Requirement;
use log::{debug, info, warn};
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

fn requires_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([\w.-]+)").unwrap())
}

fn requires_dist_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([\w-]+)").unwrap())
}

/// Pipeline step for Python distributions.
pub struct PythonBuilder {
    setup_path: Option<PathBuf>,
    egg_info: Option<PathBuf>,
    dist_info: Option<PathBuf>,
    python_version: Option<String>,
}

impl PythonBuilder {
    pub(crate) fn factory(phase: Phase, pkg: &Package) -> Option<Box<dyn PipelineStep>> {
        if phase != Phase::Inspect {
            return None;
        }
        let build_path = pkg.build_path()?;
        if !build_path.exists() {
            return None;
        }

        let setup_path = generic::find_in_tree(&build_path, "setup.py", generic::TreeEntry::File);
        let egg_info = generic::find_in_tree(&build_path, "EGG-INFO", generic::TreeEntry::Dir)
            .or_else(|| {
                generic::find_in_tree(&build_path, "*.egg-info", generic::TreeEntry::Dir)
            });
        let dist_info = generic::find_in_tree(&build_path, "*.dist-info", generic::TreeEntry::Dir);

        if setup_path.is_some() || egg_info.is_some() || dist_info.is_some() {
            Some(Box::new(PythonBuilder {
                setup_path,
                egg_info,
                dist_info,
                python_version: None,
            }))
        } else {
            None
        }
    }

    fn interpreter(&self) -> String {
        config::get()
            .map(config::python_interpreter)
            .unwrap_or_else(|_| "python".to_string())
    }

    /// `major.minor` of the configured interpreter, asked once.
    fn python_version(&mut self) -> String {
        if let Some(v) = &self.python_version {
            return v.clone();
        }
        let args = vec![
            "-c".to_string(),
            "import sys; print('%d.%d' % sys.version_info[:2])".to_string(),
        ];
        let version = match run_command_output(&self.interpreter(), &args, Path::new(".")) {
            Ok(v) if !v.is_empty() => v,
            _ => {
                warn!("could not determine python version, assuming 2.7");
                "2.7".to_string()
            }
        };
        self.python_version = Some(version.clone());
        version
    }

    /// `lib/python{major.minor}/site-packages`
    fn site_packages(&mut self) -> PathBuf {
        PathBuf::from("lib")
            .join(format!("python{}", self.python_version()))
            .join("site-packages")
    }

    /// Run the setup script with the given arguments, from its directory.
    fn call_setup(
        &self,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> std::result::Result<(), BuildError> {
        let setup_path = self.setup_path.as_ref().expect("setup.py strategies only");
        let cwd = setup_path.parent().unwrap_or(Path::new("."));
        let mut argv = vec!["setup.py".to_string()];
        argv.extend(args.iter().cloned());
        run_command(&self.interpreter(), &argv, cwd, env)
    }

    fn inspect(&mut self, pkg: &mut Package) -> Result<()> {
        pkg.build_type = "python".to_string();

        if self.setup_path.is_some() && self.egg_info.is_none() {
            info!("building egg-info");
            let env = pkg.fresh_environ();
            self.call_setup(&["egg_info".to_string()], &env)?;

            let build_path = pkg.require_build_path()?;
            self.egg_info =
                generic::find_in_tree(&build_path, "*.egg-info", generic::TreeEntry::Dir);
            if self.egg_info.is_none() {
                warn!("could not find newly created *.egg-info");
            }
        }

        if let Some(egg_info) = self.egg_info.clone() {
            self.read_requires_txt(pkg, &egg_info.join("requires.txt"))?;
        }

        if let Some(dist_info) = self.dist_info.clone() {
            self.read_dist_metadata(pkg, &dist_info.join("METADATA"))?;
        }

        Ok(())
    }

    /// Dependencies from egg-info `requires.txt`: one name per line until
    /// the first `[extras]` section.
    fn read_requires_txt(&self, pkg: &mut Package, path: &Path) -> Result<()> {
        if !path.exists() {
            return Ok(());
        }
        for line in std::fs::read_to_string(path)?.lines() {
            if line.starts_with('[') {
                break;
            }
            if let Some(m) = requires_re().captures(line).and_then(|c| c.get(1)) {
                let name = m.as_str().to_lowercase();
                debug!("{} depends on {}", pkg.url, name);
                pkg.dependencies.push(Requirement {
                    url: format!("pypi:{name}"),
                    name: Some(name),
                    ..Requirement::default()
                });
            }
        }
        Ok(())
    }

    /// Dependencies from dist-info `METADATA` headers, up to the blank line
    /// that ends them. Entries with environment markers (extras) are
    /// skipped.
    fn read_dist_metadata(&self, pkg: &mut Package, path: &Path) -> Result<()> {
        if !path.exists() {
            return Ok(());
        }
        for line in std::fs::read_to_string(path)?.lines() {
            let line = line.trim();
            if line.is_empty() {
                break;
            }
            let Some((key, value)) = line.split_once(": ") else {
                continue;
            };
            if !key.eq_ignore_ascii_case("requires-dist") {
                continue;
            }
            if value.contains(';') {
                continue;
            }
            match requires_dist_re().captures(value).and_then(|c| c.get(1)) {
                Some(m) => {
                    let name = m.as_str().to_lowercase();
                    pkg.dependencies.push(Requirement {
                        url: format!("pypi:{name}"),
                        name: Some(name),
                        ..Requirement::default()
                    });
                }
                None => warn!("could not parse requires-dist {value:?}"),
            }
        }
        Ok(())
    }

    fn build(&mut self, pkg: &mut Package) -> Result<()> {
        if self.setup_path.is_some() {
            if pkg.defer_setup_build {
                info!("deferring build to install stage");
                return Ok(());
            }
            info!("building python package");
            let mut args = vec!["build".to_string()];
            args.extend(pkg.config.iter().cloned());
            let env = pkg.fresh_environ();
            self.call_setup(&args, &env)?;
            return Ok(());
        }

        if self.egg_info.is_some() {
            return self.build_egg(pkg);
        }

        if self.dist_info.is_some() {
            return self.build_wheel(pkg);
        }

        Ok(())
    }

    /// Stage an egg for a plain copy install.
    fn build_egg(&mut self, pkg: &mut Package) -> Result<()> {
        let egg_info = self.egg_info.clone().expect("egg strategy");
        info!("found python egg {}", file_name(&egg_info));
        warn!("scripts and other egg data will not be installed");

        if !pkg
            .package_name
            .as_deref()
            .map(|n| n.ends_with(".egg"))
            .unwrap_or(false)
        {
            warn!("package does not appear to be an egg");
        }

        // The metadata directory must carry the canonical
        // {name}-{version}.egg-info name at runtime.
        let mut staged_egg = egg_info.clone();
        let pkg_info_path = egg_info.join("PKG-INFO");
        match read_pkg_info(&pkg_info_path) {
            Some((name, version)) => {
                let renamed = egg_info
                    .parent()
                    .unwrap_or(Path::new("."))
                    .join(format!("{name}-{version}.egg-info"));
                if renamed != egg_info {
                    std::fs::rename(&egg_info, &renamed).map_err(BuildError::Io)?;
                    staged_egg = renamed;
                }
            }
            None => warn!("EGG-INFO/PKG-INFO is missing or malformed"),
        }
        self.egg_info = Some(staged_egg.clone());

        let build_path = pkg.require_build_path()?;
        let parent = staged_egg.parent().unwrap_or(&build_path);
        if let Ok(rel) = parent.strip_prefix(&build_path) {
            if !rel.as_os_str().is_empty() {
                pkg.build_subdir = Some(rel.to_path_buf());
            }
        }
        pkg.install_prefix = Some(self.site_packages());
        Ok(())
    }

    /// Stage a wheel: site-packages content plus scripts.
    fn build_wheel(&mut self, pkg: &mut Package) -> Result<()> {
        let dist_info = self.dist_info.clone().expect("wheel strategy");
        let is_wheel = pkg
            .package_name
            .as_deref()
            .map(|n| n.ends_with(".whl"))
            .unwrap_or(false);
        if is_wheel {
            info!("found python wheel {}", file_name(&dist_info));
        } else {
            info!("found dist-info {}", file_name(&dist_info));
            warn!("bare dist-info does not appear to be a wheel");
        }

        let top_level_dir = dist_info.parent().unwrap_or(Path::new(".")).to_path_buf();
        let dist_info_name = file_name(&dist_info);
        let wheel_basename = dist_info_name
            .strip_suffix(".dist-info")
            .unwrap_or(&dist_info_name)
            .to_string();

        let build_dir = top_level_dir.join("build");
        let lib_dir = build_dir.join(self.site_packages());
        std::fs::create_dir_all(&lib_dir).map_err(BuildError::Io)?;

        // The metadata is needed at runtime.
        generic::copy_tree(&dist_info, &lib_dir.join(&dist_info_name), false)?;

        // Things listed as top level end up in site-packages.
        let top_level_txt = dist_info.join("top_level.txt");
        if top_level_txt.exists() {
            for name in std::fs::read_to_string(&top_level_txt)
                .map_err(BuildError::Io)?
                .lines()
            {
                let name = name.trim();
                if name.is_empty() {
                    continue;
                }
                let source = top_level_dir.join(name);
                if !source.exists() {
                    warn!("top-level {name} is missing");
                } else if source.is_dir() {
                    generic::copy_tree(&source, &lib_dir.join(name), false)?;
                } else {
                    std::fs::copy(&source, lib_dir.join(name)).map_err(BuildError::Io)?;
                }
            }
        }

        // Data categories have their own spots; only scripts are handled.
        let data_dir = top_level_dir.join(format!("{wheel_basename}.data"));
        if data_dir.exists() {
            for entry in std::fs::read_dir(&data_dir).map_err(BuildError::Io)? {
                let entry = entry.map_err(BuildError::Io)?;
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.starts_with('.') {
                    continue;
                }
                if name == "scripts" {
                    generic::copy_tree(&entry.path(), &build_dir.join("bin"), false)?;
                } else {
                    warn!("unknown wheel data: {name}");
                }
            }
        }

        let build_path = pkg.require_build_path()?;
        let rel = build_dir
            .strip_prefix(&build_path)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| PathBuf::from("build"));
        pkg.build_subdir = Some(rel);
        Ok(())
    }

    fn install(&mut self, pkg: &mut Package) -> Result<()> {
        if self.setup_path.is_none() {
            // Egg and wheel stages install as a plain copy.
            return generic::copy_install(pkg);
        }

        let install_path = pkg.require_install_path()?;
        let site_packages = self.site_packages();
        let install_site_packages = install_path.join(&site_packages);

        // Point PYTHONPATH at the destination so console entry points
        // resolve during installation.
        let mut env = pkg.fresh_environ();
        let prior = env.get("PYTHONPATH").cloned();
        env.insert(
            "PYTHONPATH".to_string(),
            join_env_path(&install_site_packages.display().to_string(), prior.as_deref()),
        );

        if install_path.exists() {
            warn!("removing existing install {}", install_path.display());
            std::fs::remove_dir_all(&install_path).map_err(BuildError::Io)?;
        }
        std::fs::create_dir_all(&install_site_packages).map_err(BuildError::Io)?;

        info!("installing python package to {}", install_site_packages.display());

        let mut args = vec![
            "install".to_string(),
            "--root".to_string(),
            install_path.display().to_string(),
            "--prefix".to_string(),
            ".".to_string(),
            "--install-lib".to_string(),
            site_packages.display().to_string(),
            "--single-version-externally-managed".to_string(),
        ];
        if !pkg.defer_setup_build {
            args.push("--skip-build".to_string());
        }
        self.call_setup(&args, &env)?;
        Ok(())
    }

    /// Point the environment at a working tree instead of copying it.
    fn develop(&mut self, pkg: &mut Package) -> Result<()> {
        let Some(setup_path) = self.setup_path.clone() else {
            return Err(BuildError::Config(
                "develop mode requires a setup.py working tree".to_string(),
            )
            .into());
        };

        info!("building scripts");
        let env = pkg.fresh_environ();
        self.call_setup(
            &[
                "build_scripts".to_string(),
                "--build-dir".to_string(),
                "build/scripts".to_string(),
            ],
            &env,
        )?;

        let source_dir = setup_path.parent().unwrap_or(Path::new(".")).to_path_buf();
        let egg_info = generic::find_in_tree(&source_dir, "*.egg-info", generic::TreeEntry::Dir)
            .ok_or_else(|| BuildError::MissingFile {
                path: source_dir.join("*.egg-info"),
            })?;

        let mut dirs_to_link: Vec<String> = Vec::new();
        let top_level = egg_info.join("top_level.txt");
        if top_level.exists() {
            for line in std::fs::read_to_string(&top_level)?.lines() {
                let dir = Path::new(line.trim())
                    .parent()
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_default();
                if !dirs_to_link.contains(&dir) {
                    dirs_to_link.push(dir);
                }
            }
        }
        dirs_to_link.sort();

        for name in dirs_to_link {
            let entry = if name.is_empty() {
                ".".to_string()
            } else {
                format!("./{name}")
            };
            info!("adding {entry} to PYTHONPATH");
            let prior = pkg
                .environ
                .get("PYTHONPATH")
                .cloned()
                .unwrap_or_else(|| "@".to_string());
            pkg.environ
                .insert("PYTHONPATH".to_string(), join_env_path(&entry, Some(&prior)));
        }

        if source_dir.join("build/scripts").exists() {
            info!("adding ./build/scripts to PATH");
            let prior = pkg
                .environ
                .get("PATH")
                .cloned()
                .unwrap_or_else(|| "@".to_string());
            pkg.environ.insert(
                "PATH".to_string(),
                join_env_path("./build/scripts", Some(&prior)),
            );
        }
        Ok(())
    }
}

impl PipelineStep for PythonBuilder {
    fn name(&self) -> &'static str {
        "python"
    }

    fn get_next(&self, phase: Phase) -> bool {
        matches!(phase, Phase::Build | Phase::Install | Phase::Develop)
    }

    fn run(&mut self, phase: Phase, pkg: &mut Package) -> Result<()> {
        match phase {
            Phase::Inspect => self.inspect(pkg),
            Phase::Build => self.build(pkg),
            Phase::Install => self.install(pkg),
            Phase::Develop => self.develop(pkg),
            _ => Ok(()),
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// `(name, version)` from an egg `PKG-INFO`, if both headers parse.
fn read_pkg_info(path: &Path) -> Option<(String, String)> {
    let body = std::fs::read_to_string(path).ok()?;
    let mut name = None;
    let mut version = None;
    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        match key.trim().to_lowercase().as_str() {
            "name" => name = Some(value.trim().to_string()),
            "version" => version = Some(value.trim().to_string()),
            _ => {}
        }
    }
    Some((name?, version?))
}
