//! Git transport: clones and updates repository packages.
//!
//! Matches URLs beginning `git:` or `git+<scheme>:`. The same step instance
//! handles both `init` (URL normalization) and `fetch` (clone, fetch,
//! checkout). After fetch the package revision is pinned to the first 8
//! characters of the resolved commit id, so installs are content-addressed
//! even when the requirement named a branch.

use crate::error::{Result, TransportError};
use crate::package::Package;
use crate::pipeline::{run_command_output, Phase, PipelineStep};
use log::{debug, info};
use regex::Regex;
use std::path::PathBuf;
use std::process::Command;
use std::sync::OnceLock;

fn git_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^git[:+]").unwrap())
}

fn scp_like_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?:([\w.-]+)@)?([\w.-]+):(.+)$").unwrap())
}

/// Canonicalize a git URL to the `git+<scheme>` form.
///
/// `git@host:org/repo` (scp-like) becomes `git+ssh://git@host/org/repo`;
/// an existing `git:`/`git+` marker is replaced. Returns `None` for
/// something that doesn't look like a git URL at all.
pub fn normalize_git_url(url: &str) -> Option<String> {
    let rest = git_marker_re().replace(url, "");
    let rest = rest.as_ref();

    if rest.contains("://") {
        return Some(format!("git+{rest}"));
    }
    if let Some(caps) = scp_like_re().captures(rest) {
        let user = caps
            .get(1)
            .map(|m| format!("{}@", m.as_str()))
            .unwrap_or_default();
        let host = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
        let path = caps.get(3).map(|m| m.as_str()).unwrap_or_default();
        return Some(format!("git+ssh://{user}{host}/{}", path.trim_start_matches('/')));
    }
    if rest != url {
        // Had a marker but no scheme: a local repository path.
        return Some(format!("git+{rest}"));
    }
    None
}

/// A git work tree driven through the `git` CLI.
pub struct GitRepo {
    work_tree: PathBuf,
    remote_url: String,
}

impl GitRepo {
    pub fn new(work_tree: PathBuf, remote_url: String) -> Self {
        Self {
            work_tree,
            remote_url,
        }
    }

    pub fn exists(&self) -> bool {
        self.work_tree.join(".git").exists()
    }

    fn git(&self, args: &[&str]) -> std::result::Result<String, TransportError> {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        run_command_output("git", &args, &self.work_tree).map_err(|e| match e {
            crate::error::BuildError::CommandFailed { command, code } => {
                TransportError::CommandFailed { command, code }
            }
            crate::error::BuildError::Io(e) => TransportError::Io(e),
            other => TransportError::CommandFailed {
                command: other.to_string(),
                code: None,
            },
        })
    }

    /// Clone the remote if the work tree doesn't exist yet. A failed clone
    /// removes the partial directory so a retry starts clean.
    pub fn clone_if_not_exists(&self) -> std::result::Result<(), TransportError> {
        if self.exists() {
            return Ok(());
        }
        if let Some(parent) = self.work_tree.parent() {
            std::fs::create_dir_all(parent)?;
        }

        info!("cloning {}", self.remote_url);
        let status = Command::new("git")
            .args(["clone", &self.remote_url])
            .arg(&self.work_tree)
            .status()?;
        if !status.success() {
            if self.work_tree.exists() {
                let _ = std::fs::remove_dir_all(&self.work_tree);
            }
            return Err(TransportError::CommandFailed {
                command: format!("git clone {}", self.remote_url),
                code: status.code(),
            });
        }
        Ok(())
    }

    /// Fetch the remote and check out the given revision (detached).
    pub fn checkout(&self, revision: &str) -> std::result::Result<(), TransportError> {
        self.git(&["fetch", "origin"])?;
        if revision != "HEAD" {
            self.git(&["checkout", "--force", "--detach", revision])?;
        }
        Ok(())
    }

    /// Full commit id of the current head.
    pub fn head(&self) -> std::result::Result<String, TransportError> {
        self.git(&["rev-parse", "HEAD"])
    }
}

/// Pipeline step for git-hosted packages.
pub struct GitTransport;

impl GitTransport {
    pub(crate) fn factory(phase: Phase, pkg: &Package) -> Option<Box<dyn PipelineStep>> {
        if phase == Phase::Init && git_marker_re().is_match(&pkg.url) {
            Some(Box::new(GitTransport))
        } else {
            None
        }
    }

    fn remote_url(pkg: &Package) -> String {
        git_marker_re().replace(&pkg.url, "").into_owned()
    }
}

impl PipelineStep for GitTransport {
    fn name(&self) -> &'static str {
        "git"
    }

    fn get_next(&self, phase: Phase) -> bool {
        phase == Phase::Fetch
    }

    fn run(&mut self, phase: Phase, pkg: &mut Package) -> Result<()> {
        match phase {
            Phase::Init => {
                pkg.package_type = "git".to_string();
                if let Some(normalized) = normalize_git_url(&pkg.url) {
                    debug!("normalized {} -> {}", pkg.url, normalized);
                    pkg.url = normalized;
                }
                Ok(())
            }
            Phase::Fetch => {
                let package_path = pkg.require_package_path()?;
                let repo = GitRepo::new(package_path, Self::remote_url(pkg));
                repo.clone_if_not_exists()?;
                let revision = pkg.revision.clone().unwrap_or_else(|| "HEAD".to_string());
                repo.checkout(&revision)?;
                let head = repo.head()?;
                let short = head.chars().take(8).collect::<String>().to_lowercase();
                debug!("resolved {} to {}", revision, short);
                pkg.revision = Some(short);
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_scp_like() {
        assert_eq!(
            normalize_git_url("git@example.com:org/repo").as_deref(),
            Some("git+ssh://git@example.com/org/repo")
        );
    }

    #[test]
    fn normalize_keeps_scheme() {
        assert_eq!(
            normalize_git_url("git+https://example.com/org/repo").as_deref(),
            Some("git+https://example.com/org/repo")
        );
        assert_eq!(
            normalize_git_url("https://example.com/org/repo").as_deref(),
            Some("git+https://example.com/org/repo")
        );
    }

    #[test]
    fn normalize_rejects_plain_path() {
        assert_eq!(normalize_git_url("/src/repo"), None);
        assert_eq!(
            normalize_git_url("git:/src/repo").as_deref(),
            Some("git+/src/repo")
        );
    }
}
