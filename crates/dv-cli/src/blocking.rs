//! Runs slow key derivation off the async runtime with a hard deadline.

use std::time::Duration;

use dv_core::{DvError, DvResult};

/// Run `f` (which performs Argon2id) on the blocking pool.
///
/// Expiry returns `KdfTimeout` and is never retried: the cost is fixed,
/// so a second attempt would time out the same way. The abandoned task runs
/// to completion in the background and its result is dropped.
pub async fn derive_blocking_with_timeout<T, F>(timeout: Duration, f: F) -> DvResult<T>
where
    F: FnOnce() -> DvResult<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::time::timeout(timeout, tokio::task::spawn_blocking(f)).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(DvError::Other(anyhow::anyhow!("key derivation task failed: {e}"))),
        Err(_) => {
            tracing::error!(timeout_secs = timeout.as_secs(), "key derivation timed out");
            Err(DvError::KdfTimeout(timeout.as_secs()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_result_passes_through() {
        let out = derive_blocking_with_timeout(Duration::from_secs(5), || Ok(7u32))
            .await
            .unwrap();
        assert_eq!(out, 7);
    }

    #[tokio::test]
    async fn test_inner_error_passes_through() {
        let err = derive_blocking_with_timeout::<(), _>(Duration::from_secs(5), || {
            Err(DvError::InvalidPasswordOrCorruptVault)
        })
        .await
        .unwrap_err();
        assert!(matches!(err, DvError::InvalidPasswordOrCorruptVault));
    }

    #[tokio::test]
    async fn test_slow_derivation_times_out() {
        let err = derive_blocking_with_timeout(Duration::from_secs(1), || {
            std::thread::sleep(Duration::from_millis(2500));
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, DvError::KdfTimeout(1)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_panicking_task_is_internal_error() {
        let err = derive_blocking_with_timeout::<(), _>(Duration::from_secs(5), || {
            panic!("argon2 exploded")
        })
        .await
        .unwrap_err();
        assert!(matches!(err, DvError::Other(_)));
    }
}
