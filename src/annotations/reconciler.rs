//! Highlight marker reconciliation
//!
//! Keeps the renderer's highlight markers equal to the cached highlight list.
//! Three triggers feed it:
//!
//! - content-drawn / relocated events, debounced, then a full clear and redraw
//!   (a re-layout may have silently dropped markers the set still lists)
//! - highlight list changes, debounced, then a plain diff pass
//! - display option changes, through [`AnnotationReconciler::redraw_all`]
//!
//! Renderer listeners hold a weak reference, so a dropped reconciler never
//! keeps reacting to events.

use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use crate::config::TimingConfig;
use crate::debounce::Debouncer;
use crate::error::Result;
use crate::location::LocationId;
use crate::renderer::{RendererHandle, Subscription};

use super::markers::{AppliedMarkers, ReconcileReport};
use super::types::{Highlight, MarkerKind, MarkerStyle};

/// Highlight list shared between the manager and the reconciler's listeners
pub type SharedHighlights = Arc<RwLock<Vec<Highlight>>>;

#[derive(Clone)]
pub struct AnnotationReconciler {
    inner: Arc<Inner>,
}

struct Inner {
    renderer: RendererHandle,
    highlights: SharedHighlights,
    markers: tokio::sync::Mutex<AppliedMarkers>,
    redraw_settle: std::time::Duration,
    reflow: Debouncer,
    list_change: Debouncer,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl AnnotationReconciler {
    pub fn new(renderer: RendererHandle, highlights: SharedHighlights, timing: &TimingConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                renderer,
                highlights,
                markers: tokio::sync::Mutex::new(AppliedMarkers::new(MarkerKind::Highlight)),
                redraw_settle: timing.redraw_settle(),
                reflow: Debouncer::new(timing.reflow_debounce()),
                list_change: Debouncer::new(timing.highlight_reconcile()),
                subscriptions: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn highlights(&self) -> &SharedHighlights {
        &self.inner.highlights
    }

    /// Subscribe to the mounted renderer's layout events.
    ///
    /// Listeners are attached once per renderer; calling again while
    /// attached is a no-op.
    pub fn attach_listeners(&self) {
        let Some(renderer) = self.inner.renderer.get() else {
            return;
        };
        let mut subscriptions = self.inner.subscriptions.lock();
        if !subscriptions.is_empty() {
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        subscriptions.push(renderer.on_content_drawn(Arc::new(move || {
            Inner::on_layout(&weak, "content drawn");
        })));

        let weak = Arc::downgrade(&self.inner);
        subscriptions.push(renderer.on_relocated(Arc::new(move |_location| {
            Inner::on_layout(&weak, "relocated");
        })));

        tracing::debug!("Highlight listeners attached");
    }

    /// Drop the renderer listeners and any pending work
    pub fn detach_listeners(&self) {
        let subscriptions: Vec<Subscription> = self.inner.subscriptions.lock().drain(..).collect();
        let attached = !subscriptions.is_empty();
        for subscription in subscriptions {
            subscription.unsubscribe();
        }
        self.inner.reflow.cancel();
        self.inner.list_change.cancel();
        if attached {
            tracing::debug!("Highlight listeners detached");
        }
    }

    pub fn is_attached(&self) -> bool {
        !self.inner.subscriptions.lock().is_empty()
    }

    /// One diff pass against the current highlight list
    pub async fn reconcile(&self) -> ReconcileReport {
        self.inner.reconcile().await
    }

    /// Remove every drawn highlight marker
    pub async fn clear_all(&self) -> usize {
        self.inner.clear_all().await
    }

    /// Clear every marker, let the renderer settle, then draw the list again
    pub async fn redraw_all(&self) -> ReconcileReport {
        self.inner.redraw_all().await
    }

    /// Schedule a clear-and-redraw after the reflow quiet window
    pub fn schedule_redraw(&self) {
        Inner::schedule_redraw(&self.inner);
    }

    /// Schedule a diff pass after the highlight list changed
    pub fn highlights_changed(&self) {
        let inner = self.inner.clone();
        self.inner.list_change.schedule(async move {
            inner.reconcile().await;
        });
    }

    /// Draw a single marker now, ahead of the next pass
    pub async fn draw(&self, location: &LocationId, style: &MarkerStyle) -> Result<()> {
        let Some(renderer) = self.inner.renderer.get() else {
            return Ok(());
        };
        let mut markers = self.inner.markers.lock().await;
        // Replace rather than stack when restyling a drawn range
        if markers.contains(location) {
            markers.remove(renderer.as_ref(), location).await;
        }
        markers.add(renderer.as_ref(), location, style).await
    }

    /// Remove a single marker now
    pub async fn erase(&self, location: &LocationId) {
        let Some(renderer) = self.inner.renderer.get() else {
            return;
        };
        self.inner
            .markers
            .lock()
            .await
            .remove(renderer.as_ref(), location)
            .await;
    }

    /// Ranges currently drawn, sorted
    pub async fn applied(&self) -> Vec<LocationId> {
        self.inner.markers.lock().await.ranges()
    }

    /// Forget applied markers without touching the renderer, for a fresh mount
    pub async fn reset(&self) {
        self.inner.markers.lock().await.reset();
    }
}

impl Inner {
    fn on_layout(weak: &Weak<Inner>, event: &'static str) {
        if let Some(inner) = weak.upgrade() {
            tracing::trace!(event, "Layout event");
            Inner::schedule_redraw(&inner);
        }
    }

    fn schedule_redraw(inner: &Arc<Inner>) {
        let task = inner.clone();
        inner.reflow.schedule(async move {
            task.redraw_all().await;
        });
    }

    fn desired(&self) -> Vec<(LocationId, MarkerStyle)> {
        self.highlights
            .read()
            .iter()
            .map(|h| (h.document_range.clone(), h.marker_style()))
            .collect()
    }

    async fn reconcile(&self) -> ReconcileReport {
        let Some(renderer) = self.renderer.get() else {
            return ReconcileReport::default();
        };
        let mut markers = self.markers.lock().await;
        let desired = self.desired();
        let report = markers.reconcile(renderer.as_ref(), &desired).await;
        if !report.is_noop() {
            tracing::debug!(
                added = report.added,
                removed = report.removed,
                failed = report.failed,
                "Highlights reconciled"
            );
        }
        report
    }

    async fn clear_all(&self) -> usize {
        let Some(renderer) = self.renderer.get() else {
            return 0;
        };
        self.markers.lock().await.clear(renderer.as_ref()).await
    }

    async fn redraw_all(&self) -> ReconcileReport {
        let cleared = self.clear_all().await;
        tracing::debug!(cleared, "Redrawing highlights");
        tokio::time::sleep(self.redraw_settle).await;
        self.reconcile().await
    }
}

impl std::fmt::Debug for AnnotationReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnnotationReconciler")
            .field("highlights", &self.inner.highlights.read().len())
            .field("attached", &self.is_attached())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::renderer::{MemoryRenderer, Renderer, RendererCall};
    use chrono::Utc;
    use std::time::Duration;

    fn highlight(id: &str, range: &str) -> Highlight {
        Highlight {
            id: id.to_string(),
            document_range: LocationId::new(range),
            text: "passage".to_string(),
            color_name: "yellow".to_string(),
            color_hex: "#ffeb3b".to_string(),
            note: None,
            page_number: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn setup(highlights: Vec<Highlight>) -> (Arc<MemoryRenderer>, AnnotationReconciler) {
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
        let reconciler = AnnotationReconciler::new(
            handle,
            Arc::new(RwLock::new(highlights)),
            &EngineConfig::default().timing,
        );
        (renderer, reconciler)
    }

    #[tokio::test]
    async fn test_two_highlights_are_drawn_once() {
        let (renderer, reconciler) = setup(vec![highlight("h1", "r1"), highlight("h2", "r2")]);

        let report = reconciler.reconcile().await;
        assert_eq!(report.added, 2);
        assert_eq!(report.removed, 0);
        assert_eq!(
            reconciler.applied().await,
            vec![LocationId::new("r1"), LocationId::new("r2")]
        );

        renderer.clear_calls();
        assert!(reconciler.reconcile().await.is_noop());
        assert!(renderer.annotation_calls().is_empty());
    }

    #[tokio::test]
    async fn test_removed_highlight_is_erased() {
        let (renderer, reconciler) = setup(vec![highlight("h1", "r1"), highlight("h2", "r2")]);
        reconciler.reconcile().await;
        renderer.clear_calls();

        reconciler.highlights().write().retain(|h| h.id != "h1");
        let report = reconciler.reconcile().await;

        assert_eq!(report.removed, 1);
        assert_eq!(
            renderer.annotation_calls(),
            vec![RendererCall::RemoveAnnotation {
                kind: MarkerKind::Highlight,
                location: LocationId::new("r1"),
            }]
        );
        assert_eq!(reconciler.applied().await, vec![LocationId::new("r2")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_layout_burst_redraws_once() {
        let (renderer, reconciler) = setup(vec![highlight("h1", "r1")]);
        reconciler.attach_listeners();
        reconciler.reconcile().await;
        renderer.clear_calls();

        // Crossing into c2 fires drawn + relocated, then two more relocations
        renderer.display("c2.xhtml").await.unwrap();
        renderer.prev().await.unwrap();
        renderer.next().await.unwrap();
        assert!(renderer.annotation_calls().is_empty());

        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(
            renderer.annotation_calls(),
            vec![
                RendererCall::RemoveAnnotation {
                    kind: MarkerKind::Highlight,
                    location: LocationId::new("r1"),
                },
                RendererCall::AddAnnotation {
                    kind: MarkerKind::Highlight,
                    location: LocationId::new("r1"),
                    fill: "#ffeb3b".to_string(),
                },
            ]
        );
        assert_eq!(renderer.drawn(MarkerKind::Highlight), vec![LocationId::new("r1")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_change_schedules_pass() {
        let (renderer, reconciler) = setup(Vec::new());
        reconciler.highlights().write().push(highlight("h1", "r1"));
        reconciler.highlights_changed();
        assert!(renderer.drawn(MarkerKind::Highlight).is_empty());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(renderer.drawn(MarkerKind::Highlight), vec![LocationId::new("r1")]);
    }

    #[tokio::test]
    async fn test_listeners_attach_once_and_detach() {
        let (renderer, reconciler) = setup(Vec::new());
        reconciler.attach_listeners();
        reconciler.attach_listeners();
        assert_eq!(renderer.listener_count(), 2);

        reconciler.detach_listeners();
        assert_eq!(renderer.listener_count(), 0);
        assert!(!reconciler.is_attached());
    }

    #[tokio::test]
    async fn test_unmounted_renderer_is_noop() {
        let reconciler = AnnotationReconciler::new(
            RendererHandle::new(),
            Arc::new(RwLock::new(vec![highlight("h1", "r1")])),
            &EngineConfig::default().timing,
        );
        assert!(reconciler.reconcile().await.is_noop());
        reconciler.attach_listeners();
        assert!(!reconciler.is_attached());
    }
}
