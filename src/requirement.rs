//! Requirement parsing and serialization.
//!
//! A requirement is one line describing a package to install: a URL followed
//! by modifier flags. Lines are tokenized with shell quoting rules, so values
//! containing spaces survive a round trip.
//!
//! ```text
//! git+https://example.com/org/repo --revision v1.2 --environ CFLAGS=-O2
//! pypi:requests --revision ">=2.20,<3"
//! http://example.com/pkg.tar.gz --checksum sha256:ab12... --config --with-ssl
//! ```
//!
//! Parsing and [`Requirement::to_line`] are inverses modulo whitespace: a
//! parsed line re-emits in canonical order (environ sorted by key, config in
//! declaration order).

use crate::error::RequirementError;
use std::collections::BTreeMap;
use std::fmt;

/// A parsed requirement line. Immutable once parsed.
///
/// The driver copies these fields into a mutable
/// [`Package`](crate::package::Package) for the duration of one install
/// attempt; the requirement itself is kept as the package's abstract form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Requirement {
    /// Scheme-prefixed locator (`git+...`, `pypi:...`, `http://...`, a path).
    pub url: String,
    /// User-facing package name; combines with `revision` into the install name.
    pub name: Option<String>,
    /// Version tag, branch, commit prefix, or version expression.
    pub revision: Option<String>,
    /// Expected artifact digest, `algo:hex`.
    pub checksum: Option<String>,
    /// HTTP ETag from a previous fetch.
    pub etag: Option<String>,
    /// Pass-through build flags, in declaration order.
    pub config: Vec<String>,
    /// Build-time environment overrides.
    pub environ: BTreeMap<String, String>,
    /// Re-fetch even when the package cache exists.
    pub force_fetch: bool,
    /// Hard-link directory sources into the build tree instead of copying.
    pub hard_link: bool,
    /// Defer the setup-script build into the install phase.
    pub defer_setup_build: bool,
    /// Comma-separated prior install paths to relocate against (may include
    /// the literal `SELF`); empty means no relocation.
    pub relocate: Option<String>,
}

impl Requirement {
    /// Parse a requirement line.
    pub fn parse(line: &str) -> Result<Self, RequirementError> {
        let tokens = shell_words::split(line).map_err(|e| RequirementError::Tokenize {
            line: line.to_string(),
            reason: e.to_string(),
        })?;

        let mut req = Requirement::default();
        let mut iter = tokens.into_iter();

        while let Some(token) = iter.next() {
            if !token.starts_with('-') || token == "-" {
                if req.url.is_empty() {
                    req.url = token;
                    continue;
                }
                return Err(RequirementError::UnknownFlag {
                    flag: token,
                    line: line.to_string(),
                });
            }

            let mut value = |flag: &str| {
                iter.next().ok_or(RequirementError::MissingValue {
                    flag: flag.to_string(),
                })
            };

            match token.as_str() {
                "-n" | "--name" => req.name = Some(value(&token)?),
                "-r" | "--revision" => req.revision = Some(value(&token)?),
                "--checksum" => req.checksum = Some(value(&token)?),
                "--etag" => req.etag = Some(value(&token)?),
                "-c" | "--config" => req.config.push(value(&token)?),
                "-e" | "--environ" => {
                    let pair = value(&token)?;
                    let (key, val) =
                        pair.split_once('=')
                            .ok_or_else(|| RequirementError::InvalidEnviron {
                                pair: pair.clone(),
                            })?;
                    req.environ.insert(key.to_string(), val.to_string());
                }
                "--force-fetch" => req.force_fetch = true,
                "--hard-link" => req.hard_link = true,
                "--defer-setup-build" => req.defer_setup_build = true,
                "--relocate" => req.relocate = Some(value(&token)?),
                _ => {
                    return Err(RequirementError::UnknownFlag {
                        flag: token,
                        line: line.to_string(),
                    })
                }
            }
        }

        if req.url.is_empty() {
            return Err(RequirementError::MissingUrl {
                line: line.to_string(),
            });
        }

        Ok(req)
    }

    /// Re-emit the canonical requirement line.
    ///
    /// This is the abstract form stored in the catalog; parsing it yields an
    /// equal requirement.
    pub fn to_line(&self) -> String {
        let mut parts: Vec<String> = vec![quote(&self.url)];

        let mut flag = |name: &str, value: &Option<String>| {
            if let Some(v) = value {
                parts.push(name.to_string());
                parts.push(quote(v));
            }
        };
        flag("--name", &self.name);
        flag("--revision", &self.revision);
        flag("--checksum", &self.checksum);
        flag("--etag", &self.etag);

        for c in &self.config {
            parts.push("--config".to_string());
            parts.push(quote(c));
        }
        for (k, v) in &self.environ {
            parts.push("--environ".to_string());
            parts.push(quote(&format!("{k}={v}")));
        }
        if self.force_fetch {
            parts.push("--force-fetch".to_string());
        }
        if self.hard_link {
            parts.push("--hard-link".to_string());
        }
        if self.defer_setup_build {
            parts.push("--defer-setup-build".to_string());
        }
        if let Some(r) = &self.relocate {
            parts.push("--relocate".to_string());
            parts.push(quote(r));
        }

        parts.join(" ")
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_line())
    }
}

fn quote(s: &str) -> String {
    shell_words::quote(s).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bare_url() {
        let req = Requirement::parse("pypi:requests").unwrap();
        assert_eq!(req.url, "pypi:requests");
        assert!(req.name.is_none());
        assert!(req.config.is_empty());
    }

    #[test]
    fn parse_full_line() {
        let req = Requirement::parse(
            "git+https://example.com/a/b -n b -r v1.2 --checksum sha1:aabb \
             --config --with-x -e CFLAGS=-O2 --force-fetch --relocate SELF",
        )
        .unwrap();
        assert_eq!(req.name.as_deref(), Some("b"));
        assert_eq!(req.revision.as_deref(), Some("v1.2"));
        assert_eq!(req.checksum.as_deref(), Some("sha1:aabb"));
        assert_eq!(req.config, vec!["--with-x"]);
        assert_eq!(req.environ.get("CFLAGS").map(String::as_str), Some("-O2"));
        assert!(req.force_fetch);
        assert_eq!(req.relocate.as_deref(), Some("SELF"));
    }

    #[test]
    fn parse_quoted_revision() {
        let req = Requirement::parse("pypi:requests --revision '>=2.20,<3'").unwrap();
        assert_eq!(req.revision.as_deref(), Some(">=2.20,<3"));
    }

    #[test]
    fn round_trip() {
        let line = "pypi:requests --revision '>=2.20,<3' --environ A=1 --environ B=2";
        let req = Requirement::parse(line).unwrap();
        let reparsed = Requirement::parse(&req.to_line()).unwrap();
        assert_eq!(req, reparsed);
    }

    #[test]
    fn round_trip_is_canonical() {
        let req = Requirement::parse("pypi:x -e B=2 -e A=1").unwrap();
        // Environ re-emits sorted by key.
        assert_eq!(req.to_line(), "pypi:x --environ A=1 --environ B=2");
    }

    #[test]
    fn missing_url_rejected() {
        assert!(matches!(
            Requirement::parse("--name foo"),
            Err(RequirementError::MissingValue { .. }) | Err(RequirementError::MissingUrl { .. })
        ));
        assert!(matches!(
            Requirement::parse(""),
            Err(RequirementError::MissingUrl { .. })
        ));
    }

    #[test]
    fn unknown_flag_rejected() {
        assert!(matches!(
            Requirement::parse("pypi:x --bogus"),
            Err(RequirementError::UnknownFlag { .. })
        ));
    }
}
