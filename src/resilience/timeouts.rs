//! Timeout enforcement.
//!
//! # Responsibilities
//! - Bound the client request read, the upstream dial and the upstream
//!   write/read of every exchange
//! - Cancel the timed-out operation by dropping its future
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Timeout errors are distinct from other errors and name the stage
//! - A timed-out exchange is abandoned like any other failed exchange

use std::fmt;
use std::future::Future;
use std::time::Duration;

/// The part of an exchange a deadline applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ClientRead,
    UpstreamConnect,
    UpstreamExchange,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::ClientRead => "client read",
            Stage::UpstreamConnect => "upstream connect",
            Stage::UpstreamExchange => "upstream exchange",
        };
        f.write_str(name)
    }
}

/// A stage did not finish within its limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{stage} timed out after {limit:?}")]
pub struct TimeoutError {
    pub stage: Stage,
    pub limit: Duration,
}

/// Run `fut` with a deadline of `limit`.
pub async fn with_timeout<F: Future>(
    stage: Stage,
    limit: Duration,
    fut: F,
) -> Result<F::Output, TimeoutError> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| TimeoutError { stage, limit })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn slow_stage_times_out() {
        let err = with_timeout(
            Stage::UpstreamConnect,
            Duration::from_millis(20),
            tokio::time::sleep(Duration::from_secs(60)),
        )
        .await
        .unwrap_err();
        assert_eq!(err.stage, Stage::UpstreamConnect);
        assert_eq!(err.to_string(), "upstream connect timed out after 20ms");
    }

    #[tokio::test]
    async fn fast_stage_passes_through() {
        let value = with_timeout(Stage::ClientRead, Duration::from_secs(1), async { 7 })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }
}
