use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::config::DeploymentConfig;
use crate::error::DeployError;
use crate::exec::{Executor, quote};
use crate::paths;

/// Bearer token enabling the authenticated direct-link fallback when the
/// primary download fails.
pub const API_TOKEN_ENV: &str = "ALTDEPLOY_API_TOKEN";

/// Cache file name for an image URL.
///
/// The name is prefixed with a short hash of the source URL, so a config
/// pointing at a different image invalidates the cache entry instead of
/// silently reusing a stale file under the same base name.
pub fn cache_file_name(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    let prefix: String = digest.iter().take(4).map(|b| format!("{b:02x}")).collect();
    let base = url
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("image.qcow2");
    format!("{prefix}-{base}")
}

/// Ensure the disk image is present in the cache on the execution target
/// and return its path there.
///
/// Cache hits are returned immediately without re-verification. On a
/// miss the image is downloaded into a local staging area, verified
/// against the configured checksum source, and placed at the target
/// cache path together with a sibling `.sha256` digest file.
pub async fn acquire<E: Executor>(
    config: &DeploymentConfig,
    exec: &E,
) -> Result<PathBuf, DeployError> {
    let file_name = cache_file_name(&config.image_url);
    let cache_dir = exec.image_cache_dir();
    let target_path = cache_dir.join(&file_name);

    let hit = exec
        .run(&format!("test -f {}", quote(&target_path.display().to_string())))
        .await?;
    if hit.success() {
        tracing::info!(path = %target_path.display(), "image already cached on target");
        return Ok(target_path);
    }

    let staging_dir = paths::staging_dir();
    tokio::fs::create_dir_all(&staging_dir)
        .await
        .map_err(|e| DeployError::Io {
            context: format!("creating staging dir {}", staging_dir.display()),
            source: e,
        })?;
    let staging_path = staging_dir.join(&file_name);

    if staging_path.exists() {
        tracing::info!(path = %staging_path.display(), "reusing previously downloaded image");
    } else {
        download(config, &staging_path).await?;
    }

    let digest = verify(config, &staging_path).await?;

    // Place the verified image (and its digest record) at the target
    // cache path.
    exec.run_checked(&format!(
        "mkdir -p {}",
        quote(&cache_dir.display().to_string())
    ))
    .await?;
    exec.transfer(&staging_path, &target_path).await?;

    let digest_name = format!("{file_name}.sha256");
    let digest_staging = staging_dir.join(&digest_name);
    tokio::fs::write(&digest_staging, format!("{digest}  {file_name}\n"))
        .await
        .map_err(|e| DeployError::Io {
            context: format!("writing digest file {}", digest_staging.display()),
            source: e,
        })?;
    exec.transfer(&digest_staging, &cache_dir.join(&digest_name))
        .await?;

    tracing::info!(path = %target_path.display(), "image cached on target");
    Ok(target_path)
}

/// Download the image, falling back to the authenticated direct-link
/// path when the primary fetch fails and a bearer token is available.
async fn download(config: &DeploymentConfig, dest: &Path) -> Result<(), DeployError> {
    let client = reqwest::Client::new();

    tracing::info!(url = %config.image_url, "downloading image");
    match fetch_to_file(&client, &config.image_url, dest).await {
        Ok(()) => Ok(()),
        Err(primary_err) => match std::env::var(API_TOKEN_ENV) {
            Ok(token) if !token.is_empty() => {
                tracing::warn!(
                    error = %primary_err,
                    "primary download failed, resolving authenticated download link"
                );
                let direct = resolve_direct_link(&client, &config.image_url, &token).await?;
                fetch_to_file(&client, &direct, dest).await
            }
            _ => Err(primary_err),
        },
    }
}

/// Link-resolution response from the image API. Mirrors typically name
/// the field `href`, some `download_url`.
#[derive(Debug, serde::Deserialize)]
struct DirectLink {
    href: Option<String>,
    download_url: Option<String>,
}

/// Resolve a time-limited direct-download link by authenticating to the
/// image API with a bearer token.
async fn resolve_direct_link(
    client: &reqwest::Client,
    url: &str,
    token: &str,
) -> Result<String, DeployError> {
    let response = client
        .get(url)
        .bearer_auth(token)
        .header(reqwest::header::ACCEPT, "application/json")
        .send()
        .await
        .map_err(|e| DeployError::Download {
            message: format!("link resolution request to {url} failed"),
            source: Box::new(e),
        })?;

    if !response.status().is_success() {
        return Err(DeployError::Download {
            message: format!("HTTP {} resolving download link from {url}", response.status()),
            source: format!("HTTP {}", response.status()).into(),
        });
    }

    let link: DirectLink = response.json().await.map_err(|e| DeployError::Download {
        message: "unexpected link resolution response".into(),
        source: Box::new(e),
    })?;

    link.href
        .or(link.download_url)
        .ok_or_else(|| DeployError::Download {
            message: "link resolution response carried no download link".into(),
            source: "expected an 'href' or 'download_url' field".into(),
        })
}

/// Stream a URL into `dest` via a `.part` temp file, renaming on success.
async fn fetch_to_file(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
) -> Result<(), DeployError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| DeployError::Download {
            message: format!("request to {url} failed"),
            source: Box::new(e),
        })?;

    if !response.status().is_success() {
        return Err(DeployError::Download {
            message: format!("HTTP {} from {url}", response.status()),
            source: format!("HTTP {}", response.status()).into(),
        });
    }

    let total_size = response.content_length().unwrap_or(0);
    let pb = ProgressBar::new(total_size);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
            .unwrap()
            .progress_chars("#>-"),
    );

    let tmp_path = dest.with_extension("part");

    // Remove any stale .part file from a previous failed download
    let _ = tokio::fs::remove_file(&tmp_path).await;

    if let Err(e) = download_to_file(&tmp_path, response, &pb).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e);
    }

    tokio::fs::rename(&tmp_path, dest)
        .await
        .map_err(|e| DeployError::Io {
            context: format!("renaming {} to {}", tmp_path.display(), dest.display()),
            source: e,
        })?;

    pb.finish_and_clear();
    Ok(())
}

/// Download a response body to a file, updating the progress bar as chunks arrive.
async fn download_to_file(
    path: &Path,
    response: reqwest::Response,
    pb: &ProgressBar,
) -> Result<(), DeployError> {
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| DeployError::Io {
            context: format!("creating temp file {}", path.display()),
            source: e,
        })?;

    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| DeployError::Download {
            message: "error reading response body".into(),
            source: Box::new(e),
        })?;
        file.write_all(&chunk).await.map_err(|e| DeployError::Io {
            context: "writing image data".into(),
            source: e,
        })?;
        pb.inc(chunk.len() as u64);
    }

    file.flush().await.map_err(|e| DeployError::Io {
        context: "flushing image file".into(),
        source: e,
    })?;

    Ok(())
}

/// Verify the staged image against the configured checksum source and
/// return its actual digest.
///
/// A missing checksum source and a failed checksum fetch are accepted
/// with a warning (best-effort verification); a digest mismatch is fatal
/// and leaves the staged file in place.
async fn verify(config: &DeploymentConfig, staging_path: &Path) -> Result<String, DeployError> {
    let actual = file_sha256(staging_path).await?;

    let Some(ref checksum_url) = config.checksum_url else {
        tracing::warn!("no checksum source configured, skipping image verification");
        return Ok(actual);
    };

    let expected = match fetch_expected_digest(checksum_url, config.image_file_name()).await {
        Ok(Some(digest)) => digest,
        Ok(None) => {
            tracing::warn!(url = %checksum_url, "checksum source had no digest for the image, skipping verification");
            return Ok(actual);
        }
        Err(e) => {
            tracing::warn!(url = %checksum_url, error = %e, "failed to fetch checksum source, skipping verification");
            return Ok(actual);
        }
    };

    ensure_digest_matches(staging_path, &expected, &actual)?;

    tracing::info!(digest = %actual, "image checksum verified");
    Ok(actual)
}

/// Case-sensitive digest comparison; a mismatch aborts the deployment
/// before any VM mutation. The staged file is retained for inspection.
fn ensure_digest_matches(path: &Path, expected: &str, actual: &str) -> Result<(), DeployError> {
    if expected != actual {
        return Err(DeployError::ChecksumMismatch {
            path: path.to_path_buf(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}

async fn fetch_expected_digest(
    checksum_url: &str,
    file_name: &str,
) -> Result<Option<String>, DeployError> {
    let response = reqwest::get(checksum_url)
        .await
        .map_err(|e| DeployError::Download {
            message: format!("request to {checksum_url} failed"),
            source: Box::new(e),
        })?;

    if !response.status().is_success() {
        return Err(DeployError::Download {
            message: format!("HTTP {} from {checksum_url}", response.status()),
            source: format!("HTTP {}", response.status()).into(),
        });
    }

    let text = response.text().await.map_err(|e| DeployError::Download {
        message: "error reading checksum source body".into(),
        source: Box::new(e),
    })?;

    Ok(parse_digest(&text, file_name))
}

/// Pick the expected digest out of a checksum source body.
///
/// Handles both a bare digest and `sha256sum`-style listings, in which
/// case the line naming `file_name` wins.
fn parse_digest(text: &str, file_name: &str) -> Option<String> {
    let mut fallback = None;
    for line in text.lines() {
        let mut tokens = line.split_whitespace();
        let Some(first) = tokens.next() else { continue };
        if first.len() != 64 || !first.chars().all(|c| c.is_ascii_hexdigit()) {
            continue;
        }
        match tokens.next() {
            Some(name) if name.trim_start_matches('*') == file_name => {
                return Some(first.to_string());
            }
            Some(_) => {}
            None => fallback = fallback.or_else(|| Some(first.to_string())),
        }
    }
    fallback
}

/// SHA-256 of a file, lower-case hex.
async fn file_sha256(path: &Path) -> Result<String, DeployError> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| DeployError::Io {
            context: format!("opening {} for hashing", path.display()),
            source: e,
        })?;

    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await.map_err(|e| DeployError::Io {
            context: format!("reading {}", path.display()),
            source: e,
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;
    use crate::exec::testing::{SpyExecutor, ok};

    #[test]
    fn cache_name_keeps_base_name_and_keys_on_url() {
        let a = cache_file_name("https://example.com/images/alt.qcow2");
        let b = cache_file_name("https://mirror.example.com/images/alt.qcow2");
        assert!(a.ends_with("-alt.qcow2"));
        assert!(b.ends_with("-alt.qcow2"));
        assert_ne!(a, b);
        assert_eq!(a, cache_file_name("https://example.com/images/alt.qcow2"));
    }

    #[test]
    fn digest_parse_prefers_matching_line() {
        let sums = "\
0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef  other.qcow2
fedcba9876543210fedcba9876543210fedcba9876543210fedcba9876543210  test.qcow2
";
        assert_eq!(
            parse_digest(sums, "test.qcow2").as_deref(),
            Some("fedcba9876543210fedcba9876543210fedcba9876543210fedcba9876543210")
        );
    }

    #[test]
    fn digest_parse_accepts_bare_digest() {
        let bare = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef\n";
        assert_eq!(
            parse_digest(bare, "whatever.qcow2").as_deref(),
            Some("0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef")
        );
        assert_eq!(parse_digest("not a digest\n", "x.qcow2"), None);
    }

    #[tokio::test]
    async fn hashes_file_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("img");
        tokio::fs::write(&path, b"alt image bytes").await.unwrap();
        let expected = format!("{:x}", Sha256::digest(b"alt image bytes"));
        assert_eq!(file_sha256(&path).await.unwrap(), expected);
    }

    #[tokio::test]
    async fn checksum_mismatch_is_fatal_and_keeps_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("img");
        tokio::fs::write(&path, b"corrupted").await.unwrap();

        let actual = file_sha256(&path).await.unwrap();
        let expected = "0".repeat(64);

        let err = ensure_digest_matches(&path, &expected, &actual).unwrap_err();
        assert!(matches!(err, DeployError::ChecksumMismatch { .. }));
        // no automatic cleanup of the downloaded artifact
        assert!(path.exists());

        ensure_digest_matches(&path, &actual, &actual).unwrap();
    }

    #[tokio::test]
    async fn bearer_fallback_attempted_when_primary_download_fails() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("img.qcow2");
        let mut config = test_config();
        // Port 9 (discard) refuses connections, so the primary fetch
        // fails without touching the network.
        config.image_url = "http://127.0.0.1:9/img.qcow2".into();

        unsafe { std::env::remove_var(API_TOKEN_ENV) };
        let err = download(&config, &dest).await.unwrap_err();
        assert!(err.to_string().contains("request to"), "unexpected: {err}");

        unsafe { std::env::set_var(API_TOKEN_ENV, "test-token") };
        let err = download(&config, &dest).await.unwrap_err();
        assert!(err.to_string().contains("link resolution"), "unexpected: {err}");
        unsafe { std::env::remove_var(API_TOKEN_ENV) };
    }

    #[tokio::test]
    async fn cache_hit_skips_download_and_returns_target_path() {
        let config = test_config();
        let spy = SpyExecutor::new().respond("test -f", ok(""));

        let path = acquire(&config, &spy).await.unwrap();
        let expected = PathBuf::from("/var/cache/altdeploy/images")
            .join(cache_file_name(&config.image_url));
        assert_eq!(path, expected);

        // Only the existence probe ran; no download, no transfer.
        let recorded = spy.recorded();
        assert_eq!(recorded.len(), 1);
        assert!(recorded[0].starts_with("test -f"));
    }
}
