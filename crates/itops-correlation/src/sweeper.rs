//! Periodic expiration sweeps.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use itops_core::Result;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// One expiration pass over a document kind
#[async_trait]
pub trait Sweeper: Send + Sync + Debug {
    /// Metric label and log field
    fn kind(&self) -> &'static str;

    /// Expire whatever is stale at `now`; returns how many documents moved.
    async fn sweep(&self, now: DateTime<Utc>) -> Result<usize>;
}

/// Sweep every `period` until cancelled. A failed pass is logged and the
/// next tick tries again.
pub async fn run_sweeper(
    sweeper: Arc<dyn Sweeper>,
    period: Duration,
    cancel: CancellationToken,
) -> Result<()> {
    let period = if period.is_zero() {
        DEFAULT_SWEEP_INTERVAL
    } else {
        period
    };
    let kind = sweeper.kind();
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    info!(kind, interval = ?period, "Expiration sweeper started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!(kind, "Expiration sweeper stopped");
                return Ok(());
            }
            _ = ticker.tick() => {
                match sweeper.sweep(Utc::now()).await {
                    Ok(0) => debug!(kind, "Nothing to expire"),
                    Ok(expired) => {
                        metrics::counter!("itops_sweeper_expired_total", "kind" => kind)
                            .increment(expired as u64);
                        info!(kind, expired, "Expiration sweep finished");
                    }
                    Err(e) => error!(kind, error = %e, "Expiration sweep failed"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct Counting {
        passes: AtomicUsize,
    }

    #[async_trait]
    impl Sweeper for Counting {
        fn kind(&self) -> &'static str {
            "test"
        }

        async fn sweep(&self, _now: DateTime<Utc>) -> Result<usize> {
            let pass = self.passes.fetch_add(1, Ordering::SeqCst);
            if pass == 0 {
                Err(itops_core::Error::storage("first pass fails"))
            } else {
                Ok(1)
            }
        }
    }

    #[tokio::test]
    async fn test_failed_pass_does_not_stop_the_loop() {
        let sweeper = Arc::new(Counting::default());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_sweeper(
            sweeper.clone(),
            Duration::from_millis(10),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(80)).await;
        cancel.cancel();
        task.await.unwrap().unwrap();
        assert!(sweeper.passes.load(Ordering::SeqCst) >= 2);
    }
}
