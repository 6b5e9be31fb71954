use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::types::RunStatus;
use crate::utils::error::RelayError;

#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_wait: Duration,
}

impl PollConfig {
    pub fn new(interval: Duration, max_wait: Duration) -> Self {
        Self { interval, max_wait }
    }
}

/// Probe a run's status until it leaves the pending states.
///
/// Fails with `RunTimedOut` once `max_wait` has elapsed, including while a
/// probe is still in flight, and with `Cancelled` as soon as `cancel`
/// fires. Probe errors are returned as-is.
pub async fn poll_until<F, Fut>(
    config: PollConfig,
    cancel: &CancellationToken,
    mut probe: F,
) -> Result<RunStatus, RelayError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<RunStatus, RelayError>>,
{
    let started = Instant::now();
    let deadline = started + config.max_wait;
    let mut attempts: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(RelayError::Cancelled);
        }

        let status = tokio::select! {
            _ = cancel.cancelled() => return Err(RelayError::Cancelled),
            status = timeout_at(deadline, probe()) => match status {
                Ok(status) => status?,
                Err(_) => {
                    return Err(RelayError::RunTimedOut {
                        waited: Instant::now().duration_since(started),
                    })
                }
            },
        };
        attempts += 1;

        if !status.is_pending() {
            debug!("Run left pending state as '{}' after {} probe(s)", status, attempts);
            return Ok(status);
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(RelayError::RunTimedOut {
                waited: now.duration_since(started),
            });
        }

        let pause = config.interval.min(deadline - now);
        tokio::select! {
            _ = cancel.cancelled() => return Err(RelayError::Cancelled),
            _ = sleep(pause) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fast() -> PollConfig {
        PollConfig::new(Duration::from_millis(5), Duration::from_secs(2))
    }

    #[tokio::test]
    async fn test_returns_first_terminal_status() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let cancel = CancellationToken::new();

        let status = poll_until(fast(), &cancel, move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                Ok(match n {
                    0 => RunStatus::Queued,
                    1 => RunStatus::InProgress,
                    _ => RunStatus::Completed,
                })
            }
        })
        .await
        .unwrap();

        assert_eq!(status, RunStatus::Completed);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failed_is_returned_not_raised() {
        let cancel = CancellationToken::new();
        let status = poll_until(fast(), &cancel, || async { Ok(RunStatus::Failed) })
            .await
            .unwrap();
        assert_eq!(status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn test_times_out_when_run_never_finishes() {
        let cancel = CancellationToken::new();
        let config = PollConfig::new(Duration::from_millis(5), Duration::from_millis(40));

        let err = poll_until(config, &cancel, || async { Ok(RunStatus::InProgress) })
            .await
            .unwrap_err();

        match err {
            RelayError::RunTimedOut { waited } => assert!(waited >= Duration::from_millis(40)),
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_slow_status_check_is_bounded_by_max_wait() {
        let cancel = CancellationToken::new();
        let config = PollConfig::new(Duration::from_millis(5), Duration::from_millis(50));
        let started = std::time::Instant::now();

        let err = poll_until(config, &cancel, || async {
            sleep(Duration::from_secs(10)).await;
            Ok(RunStatus::Completed)
        })
        .await
        .unwrap_err();

        assert!(matches!(err, RelayError::RunTimedOut { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_cancellation_stops_polling() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let config = PollConfig::new(Duration::from_millis(10), Duration::from_secs(30));

        tokio::spawn(async move {
            sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let err = poll_until(config, &cancel, || async { Ok(RunStatus::Queued) })
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Cancelled));
    }

    #[tokio::test]
    async fn test_probe_error_propagates() {
        let cancel = CancellationToken::new();
        let err = poll_until(fast(), &cancel, || async {
            Err(RelayError::ProviderUnavailable("connection reset".into()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, RelayError::ProviderUnavailable(_)));
    }
}
