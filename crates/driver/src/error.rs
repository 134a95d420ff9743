//! Errors that stop the process.
use std::time::Duration;

use storage::Layer;
use thiserror::Error;

/// Failures after which the indexed data can no longer be trusted.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A reorg was detected but could not be rolled back in time.
    #[error("{layer} reorg not resolved within {timeout:?}")]
    ReorgTimeout {
        /// Chain stuck in rollback
        layer: Layer,
        /// Configured resolution deadline
        timeout: Duration,
    },
}

/// Returns true if `err` must end the process instead of being retried on the next tick.
pub fn is_fatal(err: &eyre::Report) -> bool {
    err.downcast_ref::<SyncError>().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reorg_timeout_is_fatal() {
        let err: eyre::Report =
            SyncError::ReorgTimeout { layer: Layer::L1, timeout: Duration::from_secs(1) }.into();
        assert!(is_fatal(&err));
        assert!(!is_fatal(&eyre::eyre!("connection refused")));
    }
}
