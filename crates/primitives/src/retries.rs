use std::time::Duration;

use alloy::transports::{
    RpcError, TransportError, TransportErrorKind,
    layers::{RetryBackoffLayer, RetryPolicy},
};
use alloy_json_rpc::ErrorPayload;
use serde::Deserialize;
use tokio_retry::{RetryIf, strategy::ExponentialBackoff};

/// Maximum number of transport-level retries per request.
const DEFAULT_MAX_RETRIES: u32 = 9;

/// Initial backoff for a transport error, in milliseconds.
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 1;

/// Compute units per second assumed for the RPC endpoint.
const DEFAULT_COMPUTE_UNITS_PER_SECOND: u64 = 100;

/// The [`RetryBackoffLayer`] installed on every RPC client.
pub const DEFAULT_RETRY_LAYER: RetryBackoffLayer<RateLimitConnRefusedRetryPolicy> =
    RetryBackoffLayer::new_with_policy(
        DEFAULT_MAX_RETRIES,
        DEFAULT_INITIAL_BACKOFF_MS,
        DEFAULT_COMPUTE_UNITS_PER_SECOND,
        RateLimitConnRefusedRetryPolicy,
    );

/// Retry classification for [`RpcError<TransportErrorKind>`], mirroring alloy's private helper.
trait RpcErrorExt {
    fn is_retryable(&self) -> bool;

    fn backoff_hint(&self) -> Option<Duration>;
}

impl RpcErrorExt for RpcError<TransportErrorKind> {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(err) => err.is_retry_err(),
            Self::DeserError { text, .. } => {
                if let Ok(resp) = serde_json::from_str::<ErrorPayload>(text) {
                    return resp.is_retry_err();
                }

                // some providers wrap the payload without a request id
                #[derive(Deserialize)]
                struct Resp {
                    error: ErrorPayload,
                }

                serde_json::from_str::<Resp>(text).is_ok_and(|resp| resp.error.is_retry_err())
            }
            Self::ErrorResp(err) => err.is_retry_err(),
            Self::NullResp => true,
            _ => false,
        }
    }

    fn backoff_hint(&self) -> Option<Duration> {
        let Self::ErrorResp(resp) = self else { return None };
        let Some(Ok(data)) = resp.try_data_as::<serde_json::Value>() else { return None };

        // infura reports the requested backoff when the daily rate limit is exceeded
        let backoff_seconds = &data["rate"]["backoff_seconds"];
        if let Some(seconds) = backoff_seconds.as_u64() {
            return Some(Duration::from_secs(seconds));
        }
        backoff_seconds.as_f64().map(|seconds| Duration::from_secs(seconds as u64 + 1))
    }
}

/// A retry policy that also retries "connection refused" errors, which show up while a node
/// restarts.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConnRefusedRetryPolicy;

impl RetryPolicy for RateLimitConnRefusedRetryPolicy {
    fn should_retry(&self, error: &TransportError) -> bool {
        error.is_retryable() || is_connection_refused(error)
    }

    fn backoff_hint(&self, error: &TransportError) -> Option<Duration> {
        error.backoff_hint()
    }
}

/// Checks whether the error message contains "connection refused".
#[inline]
pub fn is_connection_refused<S: ToString>(e: S) -> bool {
    e.to_string().to_lowercase().contains("connection refused")
}

/// Retry the provided async operation using [`ExponentialBackoff`] while `condition` holds for
/// the returned error.
pub async fn retry_with_backoff_if<F, Fut, T, E, C>(op: F, condition: C) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    C: Fn(&E) -> bool,
{
    let strategy = ExponentialBackoff::from_millis(DEFAULT_INITIAL_BACKOFF_MS)
        .take(DEFAULT_MAX_RETRIES as usize);
    RetryIf::spawn(strategy, op, condition).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_is_connection_refused() {
        assert!(is_connection_refused("error sending request: Connection refused (os error 111)"));
        assert!(!is_connection_refused("execution reverted"));
    }

    #[tokio::test]
    async fn test_retry_with_backoff_if_retries_until_success() {
        let attempts = AtomicU32::new(0);
        let result: Result<u32, String> = retry_with_backoff_if(
            || async {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                if n < 3 { Err("connection refused".to_owned()) } else { Ok(n) }
            },
            |e: &String| is_connection_refused(e),
        )
        .await;
        assert_eq!(result, Ok(3));
    }

    #[tokio::test]
    async fn test_retry_with_backoff_if_stops_on_other_errors() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), String> = retry_with_backoff_if(
            || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err("bad request".to_owned())
            },
            |e: &String| is_connection_refused(e),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
