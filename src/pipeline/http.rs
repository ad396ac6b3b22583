//! Generic transport: HTTP(S) downloads, `file:` URLs, and bare paths.
//!
//! Downloads are atomic (written to a `.tmp` sibling, then renamed) and
//! skipped when the cache already holds the artifact, unless `force_fetch`.
//! A recorded ETag short-circuits refetches via `If-None-Match`.

use crate::error::{Result, TransportError};
use crate::package::Package;
use crate::pipeline::{Phase, PipelineStep};
use log::{debug, info};
use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

/// Pipeline step for anything no specialized transport claims.
pub struct HttpTransport;

impl HttpTransport {
    pub(crate) fn factory(phase: Phase, _pkg: &Package) -> Option<Box<dyn PipelineStep>> {
        if phase == Phase::Init {
            Some(Box::new(HttpTransport))
        } else {
            None
        }
    }
}

impl PipelineStep for HttpTransport {
    fn name(&self) -> &'static str {
        "http"
    }

    fn get_next(&self, phase: Phase) -> bool {
        phase == Phase::Fetch
    }

    fn run(&mut self, phase: Phase, pkg: &mut Package) -> Result<()> {
        match phase {
            Phase::Init => {
                pkg.package_type = "http".to_string();
                Ok(())
            }
            Phase::Fetch => {
                let package_path = pkg.require_package_path()?;

                if package_path.exists() && !pkg.force_fetch {
                    debug!("already cached at {}", package_path.display());
                } else if let Some(local) = local_source(&pkg.url) {
                    copy_local(Path::new(&local), &package_path)?;
                } else {
                    let etag = download(
                        &pkg.url,
                        &package_path,
                        pkg.etag.as_deref().filter(|_| package_path.exists()),
                    )?;
                    if etag.is_some() {
                        pkg.etag = etag;
                    }
                }

                if let Some(checksum) = &pkg.checksum {
                    if package_path.is_file() {
                        verify_checksum(&package_path, checksum)?;
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Local filesystem source for `file:` URLs and bare paths.
fn local_source(url: &str) -> Option<String> {
    if let Some(path) = url.strip_prefix("file://") {
        return Some(path.to_string());
    }
    if let Some(path) = url.strip_prefix("file:") {
        return Some(path.to_string());
    }
    if !url.contains("://") && !url.contains(':') {
        return Some(url.to_string());
    }
    None
}

fn copy_local(source: &Path, dest: &Path) -> std::result::Result<(), TransportError> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    info!("copying {}", source.display());
    if source.is_dir() {
        copy_dir(source, dest)?;
    } else {
        std::fs::copy(source, dest)?;
    }
    Ok(())
}

fn copy_dir(source: &Path, dest: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dest)?;
    for entry in std::fs::read_dir(source)? {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Download `url` to `dest` atomically.
///
/// When `etag` is given it is sent as `If-None-Match`; a 304 leaves the
/// existing file in place. Returns the new ETag when the server sent one.
pub(crate) fn download(
    url: &str,
    dest: &Path,
    etag: Option<&str>,
) -> std::result::Result<Option<String>, TransportError> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut request = ureq::get(url);
    if let Some(etag) = etag {
        request = request.set("If-None-Match", etag);
    }

    info!("downloading {url}");
    let response = request.call().map_err(|e| TransportError::Download {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    if response.status() == 304 {
        debug!("etag matched, keeping cached {}", dest.display());
        return Ok(None);
    }

    let new_etag = response.header("ETag").map(str::to_string);

    let tmp = dest.with_extension("tmp");
    let mut file = std::fs::File::create(&tmp)?;
    let copy = std::io::copy(&mut response.into_reader(), &mut file);
    if let Err(e) = copy {
        let _ = std::fs::remove_file(&tmp);
        return Err(TransportError::Download {
            url: url.to_string(),
            reason: e.to_string(),
        });
    }
    std::fs::rename(&tmp, dest)?;

    Ok(new_etag)
}

/// Verify a file against an `algo:hex` checksum.
pub(crate) fn verify_checksum(
    path: &Path,
    checksum: &str,
) -> std::result::Result<(), TransportError> {
    let (algo, expected_hex) = checksum.split_once(':').unwrap_or(("md5", checksum));

    let actual_hex = match algo {
        "md5" => file_digest::<Md5>(path)?,
        "sha1" => file_digest::<Sha1>(path)?,
        "sha256" => file_digest::<Sha256>(path)?,
        other => {
            return Err(TransportError::UnknownChecksumAlgo {
                algo: other.to_string(),
            })
        }
    };

    if actual_hex != expected_hex.to_lowercase() {
        return Err(TransportError::ChecksumMismatch {
            path: path.to_path_buf(),
            expected: checksum.to_string(),
            actual: format!("{algo}:{actual_hex}"),
        });
    }
    debug!("checksum ok for {}", path.display());
    Ok(())
}

fn file_digest<D: Digest>(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = D::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn local_sources() {
        assert_eq!(local_source("file:///src/a").as_deref(), Some("/src/a"));
        assert_eq!(local_source("file:/src/a").as_deref(), Some("/src/a"));
        assert_eq!(local_source("/src/a").as_deref(), Some("/src/a"));
        assert_eq!(local_source("http://example.com/a"), None);
        assert_eq!(local_source("pypi:requests"), None);
    }

    #[test]
    fn checksum_accepts_known_digest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data");
        std::fs::write(&path, b"hello").unwrap();

        // Well-known digests of "hello".
        verify_checksum(&path, "md5:5d41402abc4b2a76b9719d911017c592").unwrap();
        verify_checksum(&path, "sha1:aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d").unwrap();
        verify_checksum(
            &path,
            "sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824",
        )
        .unwrap();
    }

    #[test]
    fn checksum_rejects_mismatch() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data");
        std::fs::write(&path, b"hello").unwrap();

        let err = verify_checksum(&path, "md5:00000000000000000000000000000000").unwrap_err();
        assert!(matches!(err, TransportError::ChecksumMismatch { .. }));
    }

    #[test]
    fn checksum_rejects_unknown_algo() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data");
        std::fs::write(&path, b"hello").unwrap();

        let err = verify_checksum(&path, "crc32:abcd").unwrap_err();
        assert!(matches!(err, TransportError::UnknownChecksumAlgo { .. }));
    }
}
