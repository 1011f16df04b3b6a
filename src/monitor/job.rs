//! Periodic background job stopped by a cancellation token

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// A scheduled job; ticks never overlap
pub struct PeriodicJob {
    name: String,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl PeriodicJob {
    /// Spawn `tick` every `period`, starting immediately
    pub fn spawn<F, Fut>(name: impl Into<String>, period: Duration, cancel: CancellationToken, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let job_name = name.clone();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(job = %job_name, "Started, running every {:?}", period);

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        info!(job = %job_name, "Shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        tokio::select! {
                            _ = token.cancelled() => {
                                info!(job = %job_name, "Cancelled mid-cycle");
                                break;
                            }
                            _ = tick() => {}
                        }
                    }
                }
            }
        });

        Self {
            name,
            cancel,
            handle,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancel and wait for the loop to exit
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_job_ticks_until_stopped() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let job = PeriodicJob::spawn(
            "counter",
            Duration::from_secs(30),
            CancellationToken::new(),
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            },
        );

        tokio::time::sleep(Duration::from_secs(65)).await;
        // ticks at 0s, 30s, 60s
        assert_eq!(count.load(Ordering::SeqCst), 3);

        job.stop().await;
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_external_cancellation_ends_job() {
        let token = CancellationToken::new();
        let job = PeriodicJob::spawn("idle", Duration::from_secs(3600), token.clone(), || async {});
        token.cancel();
        tokio::time::timeout(Duration::from_secs(5), async {
            while !job.is_finished() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(job.name(), "idle");
    }
}
