//! Debounce timer for batching rapid messages before a completion call.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::warn;

/// Fires a callback once no trigger has arrived for a full `duration`.
///
/// Every `trigger()` pushes the deadline out again, so a burst of messages
/// produces a single callback after the burst ends. Dropping the debouncer
/// cancels a pending timer.
pub struct Debouncer {
    trigger_tx: mpsc::Sender<()>,
}

impl Debouncer {
    pub fn new<F>(duration: Duration, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let (trigger_tx, mut trigger_rx) = mpsc::channel::<()>(32);
        let callback = Arc::new(callback);

        tokio::spawn(async move {
            loop {
                // idle until the first trigger arms the timer
                if trigger_rx.recv().await.is_none() {
                    return;
                }
                let mut deadline = Instant::now() + duration;
                loop {
                    tokio::select! {
                        received = trigger_rx.recv() => match received {
                            Some(()) => deadline = Instant::now() + duration,
                            // dropped mid-wait: cancel without firing
                            None => return,
                        },
                        () = sleep_until(deadline) => {
                            callback();
                            break;
                        }
                    }
                }
            }
        });

        Self { trigger_tx }
    }

    /// Arm the timer, or push an armed timer's deadline out.
    pub async fn trigger(&self) {
        if self.trigger_tx.send(()).await.is_err() {
            warn!("Debounce task gone, trigger dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::sleep;

    fn counting_debouncer(ms: u64) -> (Debouncer, Arc<AtomicUsize>) {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();
        let debouncer = Debouncer::new(Duration::from_millis(ms), move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });
        (debouncer, counter)
    }

    #[tokio::test]
    async fn test_fires_after_quiet_period() {
        let (debouncer, counter) = counting_debouncer(50);

        debouncer.trigger().await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        sleep(Duration::from_millis(100)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_burst_collapses_to_one_fire() {
        let (debouncer, counter) = counting_debouncer(50);

        for _ in 0..5 {
            debouncer.trigger().await;
            sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        sleep(Duration::from_millis(100)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rearms_for_later_bursts() {
        let (debouncer, counter) = counting_debouncer(30);

        debouncer.trigger().await;
        sleep(Duration::from_millis(60)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        debouncer.trigger().await;
        sleep(Duration::from_millis(60)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_drop_cancels_pending_timer() {
        let (debouncer, counter) = counting_debouncer(50);

        debouncer.trigger().await;
        drop(debouncer);

        sleep(Duration::from_millis(100)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
