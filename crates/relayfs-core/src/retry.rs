//! Retrying reads for files another process may be writing.

use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;

use crate::config::CoreConfig;
use crate::error::FsResult;
use crate::fs::FileSystem;

/// Read a whole file, retrying transient failures until `timeout` elapses.
///
/// Sharing violations are common while an editor is mid-save, so raw I/O
/// errors are retried every `poll`. Typed failures (not found, access
/// denied, disconnected, ...) return on the first attempt.
pub async fn read_all_with_retry(
    fs: &dyn FileSystem,
    path: &Path,
    poll: Duration,
    timeout: Duration,
) -> FsResult<Bytes> {
    let deadline = Instant::now() + timeout;
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match fs.read_all(path).await {
            Ok(bytes) => return Ok(bytes),
            Err(e) if e.is_transient() && Instant::now() + poll <= deadline => {
                tracing::debug!(path = %path.display(), attempts, error = %e, "read failed, retrying");
                tokio::time::sleep(poll).await;
            }
            Err(e) if e.is_transient() => {
                tracing::warn!(path = %path.display(), attempts, error = %e, "read retries exhausted");
                return Err(e);
            }
            Err(e) => return Err(e),
        }
    }
}

/// [`read_all_with_retry`] using the intervals from `config`.
pub async fn read_all_with_config(
    fs: &dyn FileSystem,
    path: &Path,
    config: &CoreConfig,
) -> FsResult<Bytes> {
    read_all_with_retry(fs, path, config.retry_poll_interval(), config.retry_timeout()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MemoryFileSystem;
    use crate::testing::CountingFileSystem;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_errors_until_success() {
        let memory = Arc::new(MemoryFileSystem::new());
        memory.write_file("/a.txt", &b"data"[..]).await.unwrap();
        let flaky = CountingFileSystem::new(memory).fail_opens(3);

        let bytes = read_all_with_retry(
            &flaky,
            Path::new("/a.txt"),
            Duration::from_millis(10),
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        assert_eq!(&bytes[..], b"data");
        assert_eq!(flaky.opens(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_at_deadline() {
        let memory = Arc::new(MemoryFileSystem::new());
        memory.write_file("/a.txt", &b"data"[..]).await.unwrap();
        let flaky = CountingFileSystem::new(memory).fail_opens(u32::MAX);

        let err = read_all_with_retry(
            &flaky,
            Path::new("/a.txt"),
            Duration::from_millis(10),
            Duration::from_millis(55),
        )
        .await
        .unwrap_err();

        assert!(err.is_transient());
        assert!(flaky.opens() <= 6);
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let memory = MemoryFileSystem::new();
        let err = read_all_with_retry(
            &memory,
            Path::new("/missing.txt"),
            Duration::from_millis(10),
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert!(err.is_not_found());
        assert!(!err.is_transient());
    }

    #[tokio::test(start_paused = true)]
    async fn test_config_intervals_bound_the_retries() {
        let memory = Arc::new(MemoryFileSystem::new());
        memory.write_file("/a.txt", &b"data"[..]).await.unwrap();
        let flaky = CountingFileSystem::new(memory).fail_opens(u32::MAX);
        let config: CoreConfig =
            toml::from_str("retry_poll_interval_ms = 20\nretry_timeout_ms = 100").unwrap();

        let started = Instant::now();
        let err = read_all_with_config(&flaky, Path::new("/a.txt"), &config)
            .await
            .unwrap_err();

        assert!(err.is_transient());
        assert!(started.elapsed() <= Duration::from_millis(100));
        assert!((5..=6).contains(&flaky.opens()), "{} opens", flaky.opens());
    }
}
