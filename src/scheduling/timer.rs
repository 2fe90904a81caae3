use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A spawned timer task that stops as soon as its token is cancelled.
///
/// Dropping the handle cancels the timer as well, so a timer removed from its
/// owner's map can never fire afterwards.
pub struct ScheduledTimer {
    task_handle: JoinHandle<()>,
    cancellation_token: CancellationToken,
}

impl ScheduledTimer {
    pub fn new(task_handle: JoinHandle<()>, cancellation_token: CancellationToken) -> Self {
        Self {
            task_handle,
            cancellation_token,
        }
    }

    pub fn cancel(self) {
        self.cancellation_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.task_handle.is_finished()
    }
}

impl Drop for ScheduledTimer {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use super::*;

    fn counting_timer(hits: &Arc<AtomicUsize>, delay: Duration) -> ScheduledTimer {
        let token = CancellationToken::new();
        let task_token = token.clone();
        let hits = Arc::clone(hits);
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = task_token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    hits.fetch_add(1, Ordering::SeqCst);
                }
            }
        });
        ScheduledTimer::new(handle, token)
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_and_dropped_timers_never_fire() {
        let hits = Arc::new(AtomicUsize::new(0));

        counting_timer(&hits, Duration::from_secs(10)).cancel();
        drop(counting_timer(&hits, Duration::from_secs(10)));
        let kept = counting_timer(&hits, Duration::from_secs(10));

        tokio::time::sleep(Duration::from_secs(11)).await;

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(kept.is_finished());
        assert!(!kept.is_cancelled());
    }
}
