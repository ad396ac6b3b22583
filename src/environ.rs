//! Build-environment resolution.
//!
//! A package declares environment overrides as a mapping of variable names
//! to template values. Resolution substitutes references out of a *base*
//! environment (the process environment by default) and produces a diff
//! mapping suitable for overlaying; the process environment itself is never
//! mutated.
//!
//! Substitution rules, applied in a single pass over each value:
//!
//! - `${NAME}`, `$NAME`, `%NAME%` are replaced with the base environment's
//!   value for `NAME`, or the empty string when unset.
//! - `@` is replaced with the base environment's previous value of the
//!   variable being assigned, permitting `PATH=/new/bin:@`.
//! - The binding `VEE={home root}` is always available.
//!
//! Resolution is pure: the same inputs produce the same diff.

use log::debug;
use regex::{Captures, Regex};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::OnceLock;

/// Variable reserved for the home root inside substitutions.
pub const HOME_VAR: &str = "VEE";

fn reference_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{(\w+)\}|\$(\w+)|%(\w+)%|(@)").unwrap())
}

/// Resolve declared overrides against a base environment.
///
/// Returns the diff mapping. `base` is typically [`process_environ`]; tests
/// pass a fixture.
pub fn resolve_diff(
    home_root: &Path,
    base: &HashMap<String, String>,
    declared: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut source = base.clone();
    source.insert(HOME_VAR.to_string(), home_root.display().to_string());

    let mut diff = BTreeMap::new();
    for (key, template) in declared {
        let value = reference_re().replace_all(template, |caps: &Captures| {
            let named = caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3));
            if let Some(name) = named {
                return source.get(name.as_str()).cloned().unwrap_or_default();
            }
            // The `@` token: prior value of the variable being assigned.
            source.get(key.as_str()).cloned().unwrap_or_default()
        });
        diff.insert(key.clone(), value.into_owned());
    }
    diff
}

/// Resolve and log the diff, eliding the home root back to `$VEE` and each
/// variable's prior value back to `@` for display.
pub fn resolve_diff_logged(
    home_root: &Path,
    base: &HashMap<String, String>,
    declared: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let diff = resolve_diff(home_root, base, declared);
    for (key, value) in &diff {
        debug!("setenv {}={}", key, elide(home_root, base, key, value));
    }
    diff
}

/// Display form of a resolved value: the prior value of `key` shows as `@`
/// and the home root as `$VEE`.
pub fn elide(home_root: &Path, base: &HashMap<String, String>, key: &str, value: &str) -> String {
    let mut shown = value.to_string();
    if let Some(old) = base.get(key) {
        if !old.is_empty() {
            shown = shown.replace(old.as_str(), "@");
        }
    }
    shown.replace(&home_root.display().to_string(), &format!("${HOME_VAR}"))
}

/// Snapshot of the process environment.
pub fn process_environ() -> HashMap<String, String> {
    std::env::vars().collect()
}

/// Process environment overlaid with a resolved diff, for subprocess use.
pub fn fresh_environ(diff: &BTreeMap<String, String>) -> HashMap<String, String> {
    let mut environ = process_environ();
    for (k, v) in diff {
        environ.insert(k.clone(), v.clone());
    }
    environ
}

/// Join path-list fragments with the platform separator, skipping empties.
pub fn join_env_path(head: &str, tail: Option<&str>) -> String {
    let sep = if cfg!(windows) { ';' } else { ':' };
    match tail {
        Some(t) if !t.is_empty() => format!("{head}{sep}{t}"),
        _ => head.to_string(),
    }
}
