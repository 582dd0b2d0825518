//! HTTP and local-filesystem fetching.
//!
//! A single client is shared process-wide with a configurable total-request
//! timeout. `file` sources bypass the network path entirely and go through
//! plain filesystem copy.

use std::path::Path;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{EngineError, Result};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);
const MAX_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// Shared HTTP client plus the policy (timeout, retry count) the fetcher
/// applies around it. Constructed once by the caller and passed by
/// reference, never stashed in a process-wide mutable singleton.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
}

impl Fetcher {
    /// Build a fetcher with the given total-request timeout.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::FetchFailed {
                uri: String::new(),
                message: format!("failed to build http client: {e}"),
            })?;
        Ok(Self { client })
    }

    /// Build a fetcher with the spec-default 10-minute timeout.
    pub fn with_default_timeout() -> Result<Self> {
        Self::new(DEFAULT_TIMEOUT)
    }

    /// GET `uri` and stream the response body to `dest`. Retries up to
    /// `MAX_ATTEMPTS - 1` additional times on network error or non-200
    /// status, with a short fixed backoff between attempts.
    ///
    /// `cancel` is observed at every HTTP request boundary (before each
    /// attempt, during the backoff sleep, and around the request itself);
    /// a cancelled token short-circuits with [`EngineError::Cancelled`]
    /// instead of starting or continuing a request.
    pub async fn fetch_url(&self, uri: &str, dest: &Path, cancel: &CancellationToken) -> Result<()> {
        let mut last_err = None;
        for attempt in 0..MAX_ATTEMPTS {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            if attempt > 0 {
                tokio::select! {
                    () = tokio::time::sleep(RETRY_BACKOFF) => {}
                    () = cancel.cancelled() => return Err(EngineError::Cancelled),
                }
            }
            match self.try_fetch_once(uri, dest, cancel).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(uri, attempt, error = %e, "fetch attempt failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or(EngineError::FetchFailed {
            uri: uri.to_string(),
            message: "no attempts made".into(),
        }))
    }

    async fn try_fetch_once(&self, uri: &str, dest: &Path, cancel: &CancellationToken) -> Result<()> {
        let response = tokio::select! {
            res = self.client.get(uri).send() => res.map_err(|e| EngineError::FetchFailed {
                uri: uri.to_string(),
                message: e.to_string(),
            })?,
            () = cancel.cancelled() => return Err(EngineError::Cancelled),
        };

        if response.status().as_u16() != 200 {
            return Err(EngineError::FetchFailed {
                uri: uri.to_string(),
                message: format!("unexpected status {}", response.status()),
            });
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = tokio::select! {
            res = response.bytes() => res.map_err(|e| EngineError::FetchFailed {
                uri: uri.to_string(),
                message: e.to_string(),
            })?,
            () = cancel.cancelled() => return Err(EngineError::Cancelled),
        };
        tokio::fs::write(dest, &bytes).await?;
        Ok(())
    }
}

/// Copy a `file` source into `base`. If `src` is a regular file, copy it
/// preserving mode to `base/<basename(src)>`. If it is a directory,
/// recursively walk and copy it into `base`, creating directories with
/// mode `0o755` and preserving file modes.
pub fn copy_file_source(src: &Path, base: &Path) -> Result<()> {
    let metadata = std::fs::metadata(src)?;
    if metadata.is_dir() {
        copy_dir_recursive(src, base)
    } else {
        std::fs::create_dir_all(base)?;
        let file_name = src
            .file_name()
            .ok_or_else(|| EngineError::InvalidManifest(format!("invalid file source path {src:?}")))?;
        let dest = base.join(file_name);
        std::fs::copy(src, &dest)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&dest, std::fs::Permissions::from_mode(metadata.permissions().mode()))?;
        }
        Ok(())
    }
}

fn copy_dir_recursive(src: &Path, dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dest, std::fs::Permissions::from_mode(0o755))?;
    }
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let src_path = entry.path();
        let dest_path = dest.join(entry.file_name());
        if file_type.is_dir() {
            copy_dir_recursive(&src_path, &dest_path)?;
        } else if file_type.is_symlink() {
            let link_target = std::fs::read_link(&src_path)?;
            #[cfg(unix)]
            std::os::unix::fs::symlink(&link_target, &dest_path)?;
        } else {
            std::fs::copy(&src_path, &dest_path)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let mode = entry.metadata()?.permissions().mode();
                std::fs::set_permissions(&dest_path, std::fs::Permissions::from_mode(mode))?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;
    use tempfile::tempdir;

    #[tokio::test]
    async fn fetch_url_writes_response_body() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/archive.tar")
            .with_status(200)
            .with_body(b"payload".to_vec())
            .create_async()
            .await;

        let dir = tempdir().unwrap();
        let dest = dir.path().join("out/archive.tar");
        let fetcher = Fetcher::with_default_timeout().unwrap();
        fetcher
            .fetch_url(&format!("{}/archive.tar", server.url()), &dest, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"payload");
    }

    #[tokio::test]
    async fn fetch_url_fails_after_exhausting_retries() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/gone.bin")
            .with_status(404)
            .expect(MAX_ATTEMPTS as usize)
            .create_async()
            .await;

        let dir = tempdir().unwrap();
        let dest = dir.path().join("gone.bin");
        let fetcher = Fetcher::with_default_timeout().unwrap();
        let err = fetcher
            .fetch_url(&format!("{}/gone.bin", server.url()), &dest, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::FetchFailed { .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn fetch_url_returns_cancelled_when_token_is_already_cancelled() {
        let mut server = Server::new_async().await;
        let mock = server.mock("GET", "/anything").expect(0).create_async().await;

        let dir = tempdir().unwrap();
        let dest = dir.path().join("anything");
        let fetcher = Fetcher::with_default_timeout().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = fetcher
            .fetch_url(&format!("{}/anything", server.url()), &dest, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
        mock.assert_async().await;
    }

    #[test]
    fn copies_single_file_preserving_name() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("source.bin");
        std::fs::write(&src, b"hello").unwrap();
        let base = dir.path().join("out");
        std::fs::create_dir_all(&base).unwrap();

        copy_file_source(&src, &base).unwrap();
        assert_eq!(std::fs::read(base.join("source.bin")).unwrap(), b"hello");
    }

    #[test]
    fn copies_directory_tree() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("srcdir");
        std::fs::create_dir_all(src.join("nested")).unwrap();
        std::fs::write(src.join("a.txt"), b"a").unwrap();
        std::fs::write(src.join("nested/b.txt"), b"b").unwrap();

        let base = dir.path().join("out");
        copy_file_source(&src, &base).unwrap();

        assert_eq!(std::fs::read(base.join("a.txt")).unwrap(), b"a");
        assert_eq!(std::fs::read(base.join("nested/b.txt")).unwrap(), b"b");
    }
}
