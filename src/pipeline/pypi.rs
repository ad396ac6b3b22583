//! Python package index transport.
//!
//! The package identity is the distribution name, lower-cased. Release
//! metadata comes from `{index}/pypi/{name}/json` and is cached atomically
//! at `R/packages/pypi/{name}/meta.json`; a corrupt cache falls back to a
//! re-fetch.
//!
//! Release selection walks every release with a parseable PEP-440 version,
//! filters by the requirement's version expression when one was given,
//! collects usable artifacts (source distributions, and wheels whose tags
//! this host can run), and picks the greatest `(version, rank)` where
//! sdists rank below wheels.

use crate::config;
use crate::error::{MetadataError, Result, TransportError, VeeError};
use crate::package::Package;
use crate::pipeline::{http, Phase, PipelineStep};
use log::{debug, info, warn};
use pep440_rs::{Version, VersionSpecifiers};
use regex::Regex;
use serde_json::Value;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;

fn pypi_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^pypi[:+]").unwrap())
}

fn wheel_filename_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(.+)-([^-]+)-([^-]+)-([^-]+)-([^-]+)\.whl$").unwrap())
}

/// Python tags this host accepts in a wheel filename.
const PYTHON_TAGS: &[&str] = &["py2", "py27", "py2.py3", "py3"];

/// Pipeline step for index-hosted distributions.
pub struct PyPiTransport {
    name: String,
}

impl PyPiTransport {
    pub(crate) fn factory(phase: Phase, pkg: &Package) -> Option<Box<dyn PipelineStep>> {
        if phase == Phase::Init && pypi_marker_re().is_match(&pkg.url) {
            Some(Box::new(PyPiTransport {
                name: String::new(),
            }))
        } else {
            None
        }
    }

    fn meta_path(&self, pkg: &Package) -> PathBuf {
        pkg.home()
            .package_path(&format!("pypi/{}/meta.json", self.name))
    }

    /// Load metadata, from the cache when it parses, else the index.
    fn meta(&self, pkg: &Package) -> Result<Value> {
        let path = self.meta_path(pkg);

        if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(body) => match serde_json::from_str::<Value>(&body) {
                    Ok(meta) => return Ok(meta),
                    Err(e) => warn!("corrupt metadata cache for {}: {}", self.name, e),
                },
                Err(e) => warn!("unreadable metadata cache for {}: {}", self.name, e),
            }
        }

        let index = config::pypi_index_url(config::get()?);
        let url = format!("{index}/pypi/{}/json", self.name);
        info!("looking up {} on the index", self.name);

        let response = ureq::get(&url).call().map_err(|e| TransportError::Download {
            url: url.clone(),
            reason: e.to_string(),
        })?;
        let meta: Value = response
            .into_json()
            .map_err(|e| MetadataError::Unparseable {
                name: self.name.clone(),
                reason: e.to_string(),
            })?;

        // Re-dump pretty for the cache; write-then-rename keeps readers off
        // half-written documents.
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(MetadataError::Io)?;
        }
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(&meta)?).map_err(MetadataError::Io)?;
        std::fs::rename(&tmp, &path).map_err(MetadataError::Io)?;

        Ok(meta)
    }

    fn select_release<'a>(
        &self,
        pkg: &Package,
        meta: &'a Value,
    ) -> Result<(Version, &'a Value)> {
        let expression = pkg
            .revision
            .clone()
            .unwrap_or_else(|| "(any version)".to_string());

        let Some(releases) = meta.get("releases").and_then(Value::as_object) else {
            return Err(MetadataError::NoUsableRelease {
                name: self.name.clone(),
                expression,
            }
            .into());
        };

        let mut all: Vec<(Version, &'a Vec<Value>)> = Vec::new();
        for (version_str, artifacts) in releases {
            let Some(artifacts) = artifacts.as_array() else {
                continue;
            };
            match Version::from_str(version_str) {
                Ok(version) => all.push((version, artifacts)),
                Err(_) => debug!("skipping unparseable version {version_str}"),
            }
        }

        let matching: Vec<(Version, &Vec<Value>)> = match &pkg.revision {
            Some(revision) => {
                let specifiers = VersionSpecifiers::from_str(revision).map_err(|e| {
                    MetadataError::InvalidExpression {
                        name: self.name.clone(),
                        expression: revision.clone(),
                        reason: e.to_string(),
                    }
                })?;
                let matched: Vec<_> = all
                    .into_iter()
                    .filter(|(v, _)| specifiers.contains(v))
                    .collect();
                debug!(
                    "{} matched {}",
                    revision,
                    if matched.is_empty() {
                        "none".to_string()
                    } else {
                        matched
                            .iter()
                            .map(|(v, _)| v.to_string())
                            .collect::<Vec<_>>()
                            .join(",")
                    }
                );
                matched
            }
            None => all,
        };

        let mut usable: Vec<(Version, u8, &Value)> = Vec::new();
        for (version, artifacts) in &matching {
            for artifact in *artifacts {
                match artifact.get("packagetype").and_then(Value::as_str) {
                    Some("sdist") => usable.push((version.clone(), 0, artifact)),
                    Some("bdist_wheel") => {
                        let filename = artifact
                            .get("filename")
                            .and_then(Value::as_str)
                            .unwrap_or_default();
                        if wheel_usable(filename) {
                            usable.push((version.clone(), 1, artifact));
                        }
                    }
                    _ => {}
                }
            }
        }

        usable.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
        let Some((version, _, artifact)) = usable.pop() else {
            return Err(MetadataError::NoUsableRelease {
                name: self.name.clone(),
                expression,
            }
            .into());
        };
        Ok((version, artifact))
    }
}

/// Whether this host can run a wheel, judging by its filename tags.
fn wheel_usable(filename: &str) -> bool {
    let Some(caps) = wheel_filename_re().captures(filename) else {
        warn!("could not parse wheel filename: {filename}");
        return false;
    };
    let python_tag = caps.get(3).map(|m| m.as_str()).unwrap_or_default();
    let abi_tag = caps.get(4).map(|m| m.as_str()).unwrap_or_default();
    let platform_tag = caps.get(5).map(|m| m.as_str()).unwrap_or_default();

    if !PYTHON_TAGS.contains(&python_tag) {
        return false;
    }
    if abi_tag != "none" {
        return false;
    }
    if platform_tag == "any" {
        return true;
    }
    if cfg!(target_os = "macos") {
        platform_tag.starts_with("macos")
    } else if cfg!(target_os = "linux") {
        platform_tag == "manylinux1_x86_64"
    } else {
        false
    }
}

impl PipelineStep for PyPiTransport {
    fn name(&self) -> &'static str {
        "pypi"
    }

    fn get_next(&self, phase: Phase) -> bool {
        phase == Phase::Fetch
    }

    fn run(&mut self, phase: Phase, pkg: &mut Package) -> Result<()> {
        match phase {
            Phase::Init => {
                self.name = pypi_marker_re().replace(&pkg.url, "").to_lowercase();
                pkg.package_type = "pypi".to_string();
                pkg.url = format!("pypi:{}", self.name);
                Ok(())
            }
            Phase::Fetch => {
                let meta = self.meta(pkg)?;
                let (version, artifact) = self.select_release(pkg, &meta)?;

                pkg.revision = Some(version.to_string());

                let digests = artifact.get("digests");
                if let Some(md5) = artifact
                    .get("md5_digest")
                    .and_then(Value::as_str)
                    .or_else(|| {
                        digests
                            .and_then(|d| d.get("md5"))
                            .and_then(Value::as_str)
                    })
                {
                    pkg.checksum = Some(format!("md5:{md5}"));
                } else if let Some(sha256) = digests
                    .and_then(|d| d.get("sha256"))
                    .and_then(Value::as_str)
                {
                    pkg.checksum = Some(format!("sha256:{sha256}"));
                }

                let url = artifact
                    .get("url")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let filename = url.rsplit('/').next().unwrap_or(&url).to_string();
                pkg.package_name = Some(format!("pypi/{}/{}", self.name, filename));

                let package_path = pkg.require_package_path()?;
                if package_path.exists() {
                    info!("already downloaded {filename}");
                } else {
                    http::download(&url, &package_path, None)
                        .map_err(VeeError::from)
                        .inspect_err(|_| {
                            let _ = std::fs::remove_file(&package_path);
                        })?;
                }

                if let Some(checksum) = pkg.checksum.clone() {
                    http::verify_checksum(&package_path, &checksum)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::home::Home;
    use crate::requirement::Requirement;
    use tempfile::TempDir;

    fn package(line: &str) -> (TempDir, Package) {
        let dir = TempDir::new().unwrap();
        let home = Home::new(dir.path());
        home.init().unwrap();
        let req = Requirement::parse(line).unwrap();
        (dir, Package::new(&req, home))
    }

    fn sdist(version: &str) -> Value {
        serde_json::json!({
            "packagetype": "sdist",
            "filename": format!("requests-{version}.tar.gz"),
            "url": format!("https://files.example.com/requests-{version}.tar.gz"),
            "md5_digest": "5d41402abc4b2a76b9719d911017c592",
        })
    }

    fn meta_fixture() -> Value {
        serde_json::json!({
            "releases": {
                "2.19.0": [sdist("2.19.0")],
                "2.25.1": [sdist("2.25.1")],
                "3.0.0a1": [sdist("3.0.0a1")],
            }
        })
    }

    #[test]
    fn selection_honors_version_expression() {
        let (_dir, pkg) = package("pypi:requests --revision '>=2.20,<3'");
        let transport = PyPiTransport {
            name: "requests".to_string(),
        };

        let meta = meta_fixture();
        let (version, artifact) = transport.select_release(&pkg, &meta).unwrap();

        // 2.19.0 is below the range and <3 excludes the 3.0.0 pre-release.
        assert_eq!(version.to_string(), "2.25.1");
        assert_eq!(
            artifact.get("filename").and_then(Value::as_str),
            Some("requests-2.25.1.tar.gz")
        );
    }

    #[test]
    fn selection_without_expression_takes_greatest() {
        let (_dir, pkg) = package("pypi:requests");
        let transport = PyPiTransport {
            name: "requests".to_string(),
        };

        let (version, _) = transport.select_release(&pkg, &meta_fixture()).unwrap();
        assert_eq!(version.to_string(), "3.0.0a1");
    }

    #[test]
    fn selection_prefers_wheel_rank_at_same_version() {
        let (_dir, pkg) = package("pypi:purewheel");
        let transport = PyPiTransport {
            name: "purewheel".to_string(),
        };

        let meta = serde_json::json!({
            "releases": {
                "1.0": [
                    sdist("1.0"),
                    {
                        "packagetype": "bdist_wheel",
                        "filename": "purewheel-1.0-py2.py3-none-any.whl",
                        "url": "https://files.example.com/purewheel-1.0-py2.py3-none-any.whl",
                    },
                ],
            }
        });
        let (version, artifact) = transport.select_release(&pkg, &meta).unwrap();
        assert_eq!(version.to_string(), "1.0");
        assert_eq!(
            artifact.get("packagetype").and_then(Value::as_str),
            Some("bdist_wheel")
        );
    }

    #[test]
    fn selection_fails_with_expression_in_error() {
        let (_dir, pkg) = package("pypi:requests --revision '>=9'");
        let transport = PyPiTransport {
            name: "requests".to_string(),
        };

        let err = transport.select_release(&pkg, &meta_fixture()).unwrap_err();
        let message = err.to_string();
        assert!(message.contains(">=9"), "error should name the expression: {message}");
    }

    #[test]
    fn wheel_tag_filter() {
        assert!(wheel_usable("purewheel-1.0-py2.py3-none-any.whl"));
        assert!(wheel_usable("demo-2.0-py3-none-any.whl"));
        // Compiled abi is never usable.
        assert!(!wheel_usable("numpy-1.16.6-cp27-cp27mu-manylinux1_x86_64.whl"));
        // Wrong interpreter tag.
        assert!(!wheel_usable("demo-2.0-ip2-none-any.whl"));
        // Unparseable names are unusable.
        assert!(!wheel_usable("notawheel.whl"));
    }

    #[test]
    fn platform_wheels_match_host() {
        let linux = wheel_usable("demo-1.0-py2.py3-none-manylinux1_x86_64.whl");
        let mac = wheel_usable("demo-1.0-py2.py3-none-macosx_10_9_x86_64.whl");
        if cfg!(target_os = "linux") {
            assert!(linux);
            assert!(!mac);
        } else if cfg!(target_os = "macos") {
            assert!(!linux);
            assert!(mac);
        }
    }

    #[test]
    fn pep440_prerelease_ordering() {
        let mut versions: Vec<Version> = ["1.0.post1", "1.0a1", "1.1", "1.0"]
            .iter()
            .map(|s| Version::from_str(s).unwrap())
            .collect();
        versions.sort();
        let rendered: Vec<String> = versions.iter().map(|v| v.to_string()).collect();
        assert_eq!(rendered, vec!["1.0a1", "1.0", "1.0.post1", "1.1"]);
    }
}
