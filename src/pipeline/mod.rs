//! The install pipeline: phases, steps, and the step registry.
//!
//! A package moves through a fixed sequence of phases; each phase is
//! executed by exactly one [`PipelineStep`]. Steps are produced by factories
//! registered with a priority. To pick the step for a phase the driver first
//! asks the current step whether it claims the phase itself
//! ([`PipelineStep::get_next`]); otherwise the registry is scanned in
//! descending priority order and the first factory producing a step wins.
//!
//! Transports (git, http, pypi) claim `init` and `fetch`; builders claim
//! the rest. The generic builder has the lowest priority and matches
//! anything, so every phase finds a step.

pub mod generic;
pub mod git;
pub mod http;
pub mod pypi;
pub mod python;

use crate::error::BuildError;
use crate::error::Result;
use crate::package::Package;
use log::{debug, trace};
use std::collections::HashMap;
use std::path::Path;
use std::process::Command;

/// Phases of the install pipeline, in execution order.
///
/// `Develop` replaces `Build`/`Install` for working-tree installs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Init,
    Fetch,
    Extract,
    Inspect,
    Build,
    Install,
    Develop,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Init => "init",
            Phase::Fetch => "fetch",
            Phase::Extract => "extract",
            Phase::Inspect => "inspect",
            Phase::Build => "build",
            Phase::Install => "install",
            Phase::Develop => "develop",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One step of the pipeline.
///
/// Steps receive the package by exclusive reference for the duration of one
/// phase and may mutate its identity fields (name, revision, checksum,
/// dependencies); they never retain the reference.
pub trait PipelineStep {
    /// Step name, recorded as the catalog's package/build type.
    fn name(&self) -> &'static str;

    /// Whether this step claims `phase` itself, keeping the driver from
    /// consulting the registry.
    fn get_next(&self, _phase: Phase) -> bool {
        false
    }

    /// Execute one phase.
    fn run(&mut self, phase: Phase, pkg: &mut Package) -> Result<()>;
}

/// A registered step factory.
pub struct StepFactory {
    pub name: &'static str,
    /// Higher wins; ties resolve in registration order.
    pub priority: i32,
    /// Produce a step for `(phase, package)`, or decline.
    pub factory: fn(Phase, &Package) -> Option<Box<dyn PipelineStep>>,
}

/// The static registry, highest priority first.
const REGISTRY: &[StepFactory] = &[
    StepFactory {
        name: "python",
        priority: 5000,
        factory: python::PythonBuilder::factory,
    },
    StepFactory {
        name: "git",
        priority: 1000,
        factory: git::GitTransport::factory,
    },
    StepFactory {
        name: "pypi",
        priority: 1000,
        factory: pypi::PyPiTransport::factory,
    },
    StepFactory {
        name: "http",
        priority: 500,
        factory: http::HttpTransport::factory,
    },
    StepFactory {
        name: "generic",
        priority: 0,
        factory: generic::GenericBuilder::factory,
    },
];

/// Find the step for a phase by scanning factories in priority order.
pub fn resolve_step(phase: Phase, pkg: &Package) -> Option<Box<dyn PipelineStep>> {
    let mut factories: Vec<&StepFactory> = REGISTRY.iter().collect();
    factories.sort_by_key(|f| std::cmp::Reverse(f.priority));

    for entry in factories {
        if let Some(step) = (entry.factory)(phase, pkg) {
            trace!("{} -> {} step", phase, entry.name);
            return Some(step);
        }
    }
    None
}

/// Run an external command with explicit working directory and environment.
///
/// Non-zero exit is an error; stdout/stderr are inherited so build output
/// streams to the user.
pub(crate) fn run_command(
    program: &str,
    args: &[String],
    working_dir: &Path,
    env: &HashMap<String, String>,
) -> std::result::Result<(), BuildError> {
    debug!("running {} {} in {}", program, args.join(" "), working_dir.display());
    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd.current_dir(working_dir);
    cmd.envs(env);

    let status = cmd.status().map_err(BuildError::Io)?;
    if status.success() {
        Ok(())
    } else {
        Err(BuildError::CommandFailed {
            command: format!("{} {}", program, args.join(" ")),
            code: status.code(),
        })
    }
}

/// Run an external command and capture trimmed stdout.
pub(crate) fn run_command_output(
    program: &str,
    args: &[String],
    working_dir: &Path,
) -> std::result::Result<String, BuildError> {
    trace!("running {} {} in {}", program, args.join(" "), working_dir.display());
    let output = Command::new(program)
        .args(args)
        .current_dir(working_dir)
        .output()
        .map_err(BuildError::Io)?;

    if !output.status.success() {
        return Err(BuildError::CommandFailed {
            command: format!("{} {}", program, args.join(" ")),
            code: output.status.code(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::home::Home;
    use crate::requirement::Requirement;
    use tempfile::TempDir;

    fn package(url: &str) -> (TempDir, Package) {
        let dir = TempDir::new().unwrap();
        let home = Home::new(dir.path());
        home.init().unwrap();
        let req = Requirement::parse(url).unwrap();
        let pkg = Package::new(&req, home);
        (dir, pkg)
    }

    #[test]
    fn init_dispatch_by_scheme() {
        let (_dir, pkg) = package("git+https://example.com/a/b");
        let step = resolve_step(Phase::Init, &pkg).unwrap();
        assert_eq!(step.name(), "git");

        let (_dir, pkg) = package("pypi:requests");
        let step = resolve_step(Phase::Init, &pkg).unwrap();
        assert_eq!(step.name(), "pypi");

        let (_dir, pkg) = package("http://example.com/pkg.tar.gz");
        let step = resolve_step(Phase::Init, &pkg).unwrap();
        assert_eq!(step.name(), "http");
    }

    #[test]
    fn generic_matches_everything_else() {
        let (_dir, pkg) = package("http://example.com/pkg.tar.gz");
        let step = resolve_step(Phase::Extract, &pkg).unwrap();
        assert_eq!(step.name(), "generic");
        let step = resolve_step(Phase::Build, &pkg).unwrap();
        assert_eq!(step.name(), "generic");
    }

    #[test]
    fn transports_claim_fetch() {
        let (_dir, pkg) = package("git+https://example.com/a/b");
        let step = resolve_step(Phase::Init, &pkg).unwrap();
        assert!(step.get_next(Phase::Fetch));
        assert!(!step.get_next(Phase::Build));
    }
}
