//! Periodic background loops

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Spawn a loop that runs `sweep` every `period` until shutdown.
///
/// The first sweep runs one period after spawning. A sweep that overruns its
/// period delays the next one instead of bursting.
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut sweep: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let period = period.max(Duration::from_millis(1));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!("Starting {} loop (every {:?})", name, period);

        loop {
            tokio::select! {
                _ = ticker.tick() => sweep().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("{} loop shutting down", name);
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_runs_each_period_until_shutdown() {
        let (tx, rx) = watch::channel(false);
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();

        let handle = spawn_periodic("test", Duration::from_secs(5), rx, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_secs(16)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_stops_when_sender_dropped() {
        let (tx, rx) = watch::channel(false);
        let handle = spawn_periodic("test", Duration::from_secs(60), rx, || async {});
        drop(tx);
        handle.await.unwrap();
    }
}
