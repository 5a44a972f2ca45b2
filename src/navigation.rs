//! Navigation sequencing
//!
//! Every call that moves the renderer's viewport goes through
//! [`NavigationSequencer::safe_navigate`]. The first caller to find the lock
//! free runs its action and then drains whatever was queued meanwhile, in
//! submission order. Callers that find the lock taken enqueue and return.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;

use crate::annotations::Bookmark;
use crate::error::{ReaderError, Result};
use crate::location::LocationId;
use crate::renderer::{Renderer, RendererHandle};

/// A deferred navigation action
pub type NavAction = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

#[derive(Default)]
struct LockState {
    busy: bool,
    queue: VecDeque<NavAction>,
}

/// Hands the queue to a fresh drain task if the draining future is dropped
/// mid-action, so queued actions never wait for an unrelated submission.
struct DrainGuard {
    state: Arc<Mutex<LockState>>,
    armed: bool,
}

impl Drop for DrainGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let mut state = self.state.lock();
        if state.queue.is_empty() {
            state.busy = false;
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                tracing::warn!(queued = state.queue.len(), "Navigation drain interrupted, resuming in background");
                drop(state);
                // The lock stays held and passes to the new drain
                runtime.spawn(drain(self.state.clone()));
            }
            Err(_) => {
                state.busy = false;
                tracing::warn!(queued = state.queue.len(), "Navigation drain interrupted outside a runtime");
            }
        }
    }
}

/// Run queued actions in order until the queue is empty, then release the
/// lock. The caller must hold the lock.
async fn drain(state: Arc<Mutex<LockState>>) {
    let mut guard = DrainGuard {
        state: state.clone(),
        armed: true,
    };

    loop {
        let action = {
            let mut state = state.lock();
            match state.queue.pop_front() {
                Some(action) => action,
                None => {
                    state.busy = false;
                    guard.armed = false;
                    break;
                }
            }
        };

        // Catch panics too, so the lock is always released
        match std::panic::AssertUnwindSafe(action()).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::warn!(error = %err, "Navigation failed"),
            Err(_) => tracing::error!("Navigation action panicked"),
        }
    }
}

/// Single-worker queue for viewport-mutating actions
#[derive(Clone, Default)]
pub struct NavigationSequencer {
    state: Arc<Mutex<LockState>>,
}

impl NavigationSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `action` now if no navigation is in flight, otherwise queue it.
    ///
    /// Resolves once this call's share of the work is done: immediately for
    /// a queued action, after the queue drains for the caller holding the lock.
    /// Failures are logged and never stop the drain.
    pub async fn safe_navigate<F, Fut>(&self, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        let boxed: NavAction = Box::new(move || action().boxed());

        {
            let mut state = self.state.lock();
            state.queue.push_back(boxed);
            if state.busy {
                tracing::debug!(queued = state.queue.len(), "Navigation queued");
                return;
            }
            state.busy = true;
        }

        drain(self.state.clone()).await;
    }

    pub fn is_busy(&self) -> bool {
        self.state.lock().busy
    }

    pub fn queued(&self) -> usize {
        self.state.lock().queue.len()
    }
}

impl std::fmt::Debug for NavigationSequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("NavigationSequencer")
            .field("busy", &state.busy)
            .field("queued", &state.queue.len())
            .finish()
    }
}

/// Viewport moves expressed as sequenced actions
#[derive(Debug, Clone)]
pub struct Navigator {
    renderer: RendererHandle,
    sequencer: NavigationSequencer,
}

impl Navigator {
    pub fn new(renderer: RendererHandle, sequencer: NavigationSequencer) -> Self {
        Self {
            renderer,
            sequencer,
        }
    }

    pub fn sequencer(&self) -> &NavigationSequencer {
        &self.sequencer
    }

    pub async fn next_page(&self) {
        self.submit(|renderer| async move { renderer.next().await }).await;
    }

    pub async fn prev_page(&self) {
        self.submit(|renderer| async move { renderer.prev().await }).await;
    }

    pub async fn go_to_location(&self, location: &LocationId) {
        let target = location.to_string();
        self.submit(move |renderer| async move { renderer.display(&target).await })
            .await;
    }

    /// Jump to a table-of-contents target (content unit href, optional fragment)
    pub async fn go_to_toc_entry(&self, href: &str) {
        let target = href.to_string();
        self.submit(move |renderer| async move { renderer.display(&target).await })
            .await;
    }

    /// Jump to a 1-based logical page, clamped into the book
    pub async fn go_to_page(&self, page: u32) {
        self.submit(move |renderer| async move {
            let target = {
                let index = renderer.locations();
                let total = u32::try_from(index.total_count()).unwrap_or(u32::MAX);
                if total == 0 {
                    tracing::debug!("Location index not generated, ignoring page jump");
                    return Ok(());
                }
                let page = page.clamp(1, total);
                index
                    .identifier_for_page(page)
                    .ok_or_else(|| ReaderError::Navigation(format!("No location for page {}", page)))?
            };
            renderer.display(target.as_str()).await
        })
        .await;
    }

    pub async fn go_to_bookmark(&self, bookmark: &Bookmark) {
        self.go_to_page(bookmark.page_number).await;
    }

    /// Queue an action against the mounted renderer; no-op when unmounted
    async fn submit<F, Fut>(&self, action: F)
    where
        F: FnOnce(Arc<dyn Renderer>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        let handle = self.renderer.clone();
        self.sequencer
            .safe_navigate(move || async move {
                match handle.get() {
                    Some(renderer) => action(renderer).await,
                    None => Ok(()),
                }
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::{LocationIndex, MemoryRenderer, RendererCall};
    use std::time::Duration;

    #[tokio::test]
    async fn test_queued_actions_run_in_submission_order() {
        let sequencer = NavigationSequencer::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let first = {
            let log = log.clone();
            let sequencer = sequencer.clone();
            tokio::spawn(async move {
                sequencer
                    .safe_navigate(move || async move {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        log.lock().push(1);
                        Ok(())
                    })
                    .await;
            })
        };
        tokio::task::yield_now().await;
        assert!(sequencer.is_busy());

        for value in [2, 3] {
            let log = log.clone();
            sequencer
                .safe_navigate(move || async move {
                    log.lock().push(value);
                    Ok(())
                })
                .await;
        }
        assert_eq!(sequencer.queued(), 2);

        first.await.unwrap();
        assert_eq!(*log.lock(), vec![1, 2, 3]);
        assert!(!sequencer.is_busy());
    }

    #[tokio::test]
    async fn test_actions_never_overlap() {
        let sequencer = NavigationSequencer::new();
        let running = Arc::new(Mutex::new(0usize));
        let max_seen = Arc::new(Mutex::new(0usize));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let sequencer = sequencer.clone();
            let running = running.clone();
            let max_seen = max_seen.clone();
            tasks.push(tokio::spawn(async move {
                sequencer
                    .safe_navigate(move || async move {
                        {
                            let mut now = running.lock();
                            *now += 1;
                            let mut max = max_seen.lock();
                            *max = (*max).max(*now);
                        }
                        tokio::task::yield_now().await;
                        *running.lock() -= 1;
                        Ok(())
                    })
                    .await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(*max_seen.lock(), 1);
    }

    #[tokio::test]
    async fn test_failure_does_not_stall_queue() {
        let sequencer = NavigationSequencer::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        sequencer
            .safe_navigate(|| async { Err(ReaderError::Navigation("boom".to_string())) })
            .await;

        let sink = log.clone();
        sequencer
            .safe_navigate(move || async move {
                sink.lock().push("after");
                Ok(())
            })
            .await;

        assert_eq!(*log.lock(), vec!["after"]);
        assert!(!sequencer.is_busy());
    }

    #[tokio::test]
    async fn test_aborted_holder_hands_queue_to_background_drain() {
        let sequencer = NavigationSequencer::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let stuck = {
            let sequencer = sequencer.clone();
            tokio::spawn(async move {
                sequencer
                    .safe_navigate(|| async {
                        std::future::pending::<()>().await;
                        Ok(())
                    })
                    .await;
            })
        };
        tokio::task::yield_now().await;

        for value in [1, 2] {
            let sink = log.clone();
            sequencer
                .safe_navigate(move || async move {
                    sink.lock().push(value);
                    Ok(())
                })
                .await;
        }
        assert_eq!(sequencer.queued(), 2);

        stuck.abort();
        let _ = stuck.await;

        // No further submission: the queued actions still run, in order
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*log.lock(), vec![1, 2]);
        assert!(!sequencer.is_busy());
        assert_eq!(sequencer.queued(), 0);
    }

    #[tokio::test]
    async fn test_aborted_holder_with_empty_queue_releases_lock() {
        let sequencer = NavigationSequencer::new();
        let stuck = {
            let sequencer = sequencer.clone();
            tokio::spawn(async move {
                sequencer
                    .safe_navigate(|| async {
                        std::future::pending::<()>().await;
                        Ok(())
                    })
                    .await;
            })
        };
        tokio::task::yield_now().await;
        assert!(sequencer.is_busy());

        stuck.abort();
        let _ = stuck.await;
        assert!(!sequencer.is_busy());
    }

    #[tokio::test]
    async fn test_panicking_action_releases_lock() {
        let sequencer = NavigationSequencer::new();
        sequencer
            .safe_navigate(|| async {
                let explode = true;
                if explode {
                    panic!("renderer exploded");
                }
                Ok(())
            })
            .await;
        assert!(!sequencer.is_busy());
    }

    fn navigator() -> (Arc<MemoryRenderer>, Navigator) {
        let renderer = Arc::new(
            MemoryRenderer::from_sections(vec![
                ("c1.xhtml", "<p>abcdefghijklmnopqrst</p>"),
                ("c2.xhtml", "<p>uvwxyz</p>"),
            ])
            .unwrap()
            .with_page_chars(10),
        );
        let handle = RendererHandle::new();
        handle.attach(renderer.clone());
        (renderer, Navigator::new(handle, NavigationSequencer::new()))
    }

    #[tokio::test]
    async fn test_page_navigation() {
        let (renderer, navigator) = navigator();
        navigator.next_page().await;
        navigator.next_page().await;
        navigator.prev_page().await;
        assert_eq!(renderer.current_page_index(), Some(0));

        navigator.go_to_toc_entry("c2.xhtml").await;
        assert_eq!(renderer.current_text().unwrap(), "uvwxyz");
    }

    #[tokio::test]
    async fn test_go_to_page_clamps() {
        let (renderer, navigator) = navigator();
        renderer.generate(10).await.unwrap();

        navigator.go_to_page(99).await;
        assert_eq!(renderer.current_text().unwrap(), "uvwxyz");

        navigator.go_to_page(0).await;
        assert_eq!(renderer.current_page_index(), Some(0));

        let displays: Vec<_> = renderer
            .calls()
            .into_iter()
            .filter(|c| matches!(c, RendererCall::Display(_)))
            .collect();
        assert_eq!(
            displays,
            vec![
                RendererCall::Display("epubcfi(/6/4!/4/1:0)".to_string()),
                RendererCall::Display("epubcfi(/6/2!/4/1:0)".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_unmounted_renderer_is_silent() {
        let navigator = Navigator::new(RendererHandle::new(), NavigationSequencer::new());
        navigator.next_page().await;
        navigator.go_to_page(3).await;
        assert!(!navigator.sequencer().is_busy());
    }
}
