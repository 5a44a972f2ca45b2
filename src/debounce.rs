//! Cancel-and-reschedule timer
//!
//! Each `schedule` call replaces the pending timer, so a burst of triggers
//! inside the window runs the work once, after the last trigger. Once the
//! window elapses the work is handed to its own task; a later trigger never
//! interrupts work that already started.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

pub struct Debouncer {
    delay: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Mutex::new(None),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Run `work` after the quiet window, dropping any earlier schedule.
    ///
    /// Outside a tokio runtime the work is dropped with a warning.
    pub fn schedule<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("No runtime available, dropping debounced work");
            return;
        };

        let delay = self.delay;
        let timer = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            tokio::spawn(work);
        });

        if let Some(previous) = self.pending.lock().replace(timer) {
            previous.abort();
        }
    }

    /// Drop the pending schedule, if any
    pub fn cancel(&self) {
        if let Some(pending) = self.pending.lock().take() {
            pending.abort();
        }
    }

    /// True while a schedule is waiting out its window
    pub fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .as_ref()
            .is_some_and(|timer| !timer.is_finished())
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for Debouncer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Debouncer")
            .field("delay", &self.delay)
            .field("pending", &self.is_pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_burst_runs_once() {
        let debouncer = Debouncer::new(Duration::from_millis(100));
        let runs = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let runs = runs.clone();
            debouncer.schedule(async move {
                runs.fetch_add(1, Ordering::SeqCst);
            });
            tokio::time::sleep(Duration::from_millis(30)).await;
        }
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!debouncer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_separate_windows_run_separately() {
        let debouncer = Debouncer::new(Duration::from_millis(100));
        let runs = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let runs = runs.clone();
            debouncer.schedule(async move {
                runs.fetch_add(1, Ordering::SeqCst);
            });
            tokio::time::sleep(Duration::from_millis(150)).await;
        }

        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_drops_pending_work() {
        let debouncer = Debouncer::new(Duration::from_millis(100));
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = runs.clone();
        debouncer.schedule(async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(debouncer.is_pending());
        debouncer.cancel();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
