//! Highlight lifecycle
//!
//! Markers are drawn or erased right away and the store call follows. When
//! the store call fails the marker change is undone and the reader is told.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{self, ErrorCallback, ReaderError, Result};
use crate::location::LocationId;
use crate::navigation::Navigator;
use crate::renderer::RendererHandle;
use crate::store::{AnnotationStore, StoreScope};

use super::reconciler::{AnnotationReconciler, SharedHighlights};
use super::types::{
    Highlight, HighlightColor, HighlightUpdate, MarkerStyle, NewHighlight, PendingSelection,
};

pub struct HighlightManager {
    scope: StoreScope,
    store: Arc<dyn AnnotationStore>,
    renderer: RendererHandle,
    reconciler: AnnotationReconciler,
    navigator: Navigator,
    pending: Mutex<Option<PendingSelection>>,
    on_error: ErrorCallback,
}

impl HighlightManager {
    pub fn new(
        scope: StoreScope,
        store: Arc<dyn AnnotationStore>,
        renderer: RendererHandle,
        reconciler: AnnotationReconciler,
        navigator: Navigator,
        on_error: ErrorCallback,
    ) -> Self {
        Self {
            scope,
            store,
            renderer,
            reconciler,
            navigator,
            pending: Mutex::new(None),
            on_error,
        }
    }

    fn list(&self) -> &SharedHighlights {
        self.reconciler.highlights()
    }

    /// Snapshot of the cached highlight list
    pub fn highlights(&self) -> Vec<Highlight> {
        self.list().read().clone()
    }

    pub fn get(&self, id: &str) -> Option<Highlight> {
        self.list().read().iter().find(|h| h.id == id).cloned()
    }

    /// Fetch the book's highlights and schedule them to be drawn
    pub async fn load(&self) -> Result<usize> {
        let highlights = self
            .store
            .list_highlights(&self.scope.access_token, &self.scope.book_id)
            .await
            .map_err(|err| {
                error::report(&self.on_error, "Failed to load highlights", &err);
                err
            })?;

        let count = highlights.len();
        *self.list().write() = highlights;
        self.reconciler.highlights_changed();
        tracing::info!(book_id = %self.scope.book_id, count, "Highlights loaded");
        Ok(count)
    }

    /// Remember a selection until a color is picked. Replaces any earlier one.
    pub fn begin_selection(&self, selection: PendingSelection) {
        *self.pending.lock() = Some(selection);
    }

    pub fn pending_selection(&self) -> Option<PendingSelection> {
        self.pending.lock().clone()
    }

    pub fn cancel_selection(&self) {
        self.pending.lock().take();
    }

    /// Highlight the pending selection with `color`.
    ///
    /// Returns `None` when nothing is selected or the store rejected the
    /// highlight; failures go through the error callback.
    pub async fn create_highlight(&self, color: HighlightColor) -> Option<Highlight> {
        let selection = self.pending.lock().take()?;
        let range = selection.document_range.clone();

        if self.list().read().iter().any(|h| h.document_range == range) {
            let err = ReaderError::DuplicateRange(range.to_string());
            error::report(&self.on_error, "Highlight rejected", &err);
            return None;
        }

        let style = MarkerStyle::solid(color.hex());
        if let Err(err) = self.reconciler.draw(&range, &style).await {
            tracing::warn!(range = %range, error = %err, "Optimistic highlight draw failed");
        }

        let request = NewHighlight {
            document_range: range.clone(),
            text: selection.text,
            color_name: color.name().to_string(),
            color_hex: color.hex().to_string(),
            note: None,
            page_number: self.page_for(&range),
        };

        match self
            .store
            .create_highlight(&self.scope.access_token, &self.scope.book_id, request)
            .await
        {
            Ok(highlight) => {
                self.list().write().push(highlight.clone());
                self.reconciler.highlights_changed();
                tracing::debug!(id = %highlight.id, range = %range, "Highlight created");
                Some(highlight)
            }
            Err(err) => {
                self.reconciler.erase(&range).await;
                error::report(&self.on_error, "Failed to save highlight", &err);
                None
            }
        }
    }

    /// Delete a highlight, restoring it if the store refuses
    pub async fn delete_highlight(&self, id: &str) -> bool {
        let removed = {
            let mut list = self.list().write();
            list.iter()
                .position(|h| h.id == id)
                .map(|index| (index, list.remove(index)))
        };
        let Some((index, highlight)) = removed else {
            tracing::debug!(id, "Delete requested for unknown highlight");
            return false;
        };

        self.reconciler.erase(&highlight.document_range).await;

        match self
            .store
            .delete_highlight(&self.scope.access_token, &self.scope.book_id, id)
            .await
        {
            Ok(()) => {
                self.reconciler.highlights_changed();
                true
            }
            Err(err) => {
                {
                    let mut list = self.list().write();
                    let index = index.min(list.len());
                    list.insert(index, highlight.clone());
                }
                self.restore_marker(&highlight).await;
                error::report(&self.on_error, "Failed to delete highlight", &err);
                false
            }
        }
    }

    /// Recolor a highlight, drawing the new color right away
    pub async fn update_color(&self, id: &str, color: HighlightColor) -> Option<Highlight> {
        let original = self.get(id)?;
        let style = MarkerStyle::solid(color.hex());
        if let Err(err) = self.reconciler.draw(&original.document_range, &style).await {
            tracing::warn!(id, error = %err, "Optimistic recolor failed");
        }

        let update = HighlightUpdate {
            color_name: Some(color.name().to_string()),
            color_hex: Some(color.hex().to_string()),
            note: None,
        };
        self.apply_update(original, update, "Failed to update highlight color")
            .await
    }

    /// Save, replace, or clear (`None`) the note on a highlight
    pub async fn update_note(&self, id: &str, note: Option<String>) -> Option<Highlight> {
        let original = self.get(id)?;
        let note = note.filter(|n| !n.trim().is_empty());
        let update = HighlightUpdate {
            note: Some(note),
            ..Default::default()
        };
        self.apply_update(original, update, "Failed to save note").await
    }

    /// Jump the viewport to a highlight
    pub async fn go_to_highlight(&self, id: &str) {
        if let Some(highlight) = self.get(id) {
            self.navigator.go_to_location(&highlight.document_range).await;
        }
    }

    async fn apply_update(
        &self,
        original: Highlight,
        update: HighlightUpdate,
        context: &str,
    ) -> Option<Highlight> {
        match self
            .store
            .update_highlight(
                &self.scope.access_token,
                &self.scope.book_id,
                &original.id,
                update,
            )
            .await
        {
            Ok(updated) => {
                if let Some(slot) = self.list().write().iter_mut().find(|h| h.id == updated.id) {
                    *slot = updated.clone();
                }
                Some(updated)
            }
            Err(err) => {
                self.restore_marker(&original).await;
                error::report(&self.on_error, context, &err);
                None
            }
        }
    }

    async fn restore_marker(&self, highlight: &Highlight) {
        if let Err(err) = self
            .reconciler
            .draw(&highlight.document_range, &highlight.marker_style())
            .await
        {
            tracing::warn!(id = %highlight.id, error = %err, "Failed to restore highlight marker");
        }
    }

    fn page_for(&self, range: &LocationId) -> Option<u32> {
        self.renderer
            .get()
            .and_then(|renderer| renderer.locations().location_for_identifier(range))
    }
}

impl std::fmt::Debug for HighlightManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HighlightManager")
            .field("book_id", &self.scope.book_id)
            .field("highlights", &self.list().read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::MarkerKind;
    use crate::config::EngineConfig;
    use crate::navigation::NavigationSequencer;
    use crate::renderer::{MemoryRenderer, RendererCall};
    use crate::store::MemoryStore;

    struct Fixture {
        renderer: Arc<MemoryRenderer>,
        store: Arc<MemoryStore>,
        manager: HighlightManager,
        errors: Arc<Mutex<Vec<String>>>,
    }

    fn fixture() -> Fixture {
        let renderer = Arc::new(
            MemoryRenderer::from_sections(vec![("c1.xhtml", "<p>The quick brown fox jumps</p>")])
                .unwrap(),
        );
        let handle = RendererHandle::new();
        handle.attach(renderer.clone());

        let store = Arc::new(MemoryStore::new());
        let reconciler = AnnotationReconciler::new(
            handle.clone(),
            SharedHighlights::default(),
            &EngineConfig::default().timing,
        );
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();
        let manager = HighlightManager::new(
            StoreScope::new("token", "book-1"),
            store.clone(),
            handle.clone(),
            reconciler,
            Navigator::new(handle, NavigationSequencer::new()),
            Arc::new(move |m: &str| sink.lock().push(m.to_string())),
        );

        Fixture {
            renderer,
            store,
            manager,
            errors,
        }
    }

    fn select(manager: &HighlightManager, range: &str) {
        manager.begin_selection(PendingSelection {
            text: "quick".to_string(),
            document_range: LocationId::new(range),
            anchor_x: 10.0,
            anchor_y: 20.0,
            anchor_height: 16.0,
        });
    }

    #[tokio::test]
    async fn test_create_draws_and_persists() {
        let f = fixture();
        select(&f.manager, "epubcfi(/6/2!/4,/1:4,/1:9)");

        let created = f.manager.create_highlight(HighlightColor::Green).await.unwrap();

        assert_eq!(created.color_hex, "#a5d6a7");
        assert!(f.manager.pending_selection().is_none());
        assert_eq!(f.manager.highlights().len(), 1);
        assert_eq!(
            f.renderer
                .drawn_style(MarkerKind::Highlight, &created.document_range)
                .unwrap()
                .fill,
            "#a5d6a7"
        );
        assert_eq!(f.store.list_highlights("token", "book-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_create_failure_removes_marker() {
        let f = fixture();
        f.store.set_offline(true);
        select(&f.manager, "r1");

        assert!(f.manager.create_highlight(HighlightColor::Yellow).await.is_none());

        assert!(f.manager.highlights().is_empty());
        assert!(f.renderer.drawn(MarkerKind::Highlight).is_empty());
        assert_eq!(
            f.errors.lock().as_slice(),
            ["Could not reach the server, please try again"]
        );
    }

    #[tokio::test]
    async fn test_create_without_selection_is_noop() {
        let f = fixture();
        assert!(f.manager.create_highlight(HighlightColor::Yellow).await.is_none());
        assert!(f.renderer.annotation_calls().is_empty());
        assert_eq!(f.store.call_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_range_rejected() {
        let f = fixture();
        select(&f.manager, "r1");
        f.manager.create_highlight(HighlightColor::Yellow).await.unwrap();

        select(&f.manager, "r1");
        assert!(f.manager.create_highlight(HighlightColor::Blue).await.is_none());
        assert_eq!(f.manager.highlights().len(), 1);
        assert_eq!(f.errors.lock().as_slice(), ["That passage is already highlighted"]);
    }

    #[tokio::test]
    async fn test_delete_removes_one_marker() {
        let f = fixture();
        select(&f.manager, "r1");
        let h1 = f.manager.create_highlight(HighlightColor::Yellow).await.unwrap();
        select(&f.manager, "r2");
        f.manager.create_highlight(HighlightColor::Yellow).await.unwrap();
        f.renderer.clear_calls();

        assert!(f.manager.delete_highlight(&h1.id).await);

        assert_eq!(
            f.renderer.annotation_calls(),
            vec![RendererCall::RemoveAnnotation {
                kind: MarkerKind::Highlight,
                location: LocationId::new("r1"),
            }]
        );
        assert_eq!(f.renderer.drawn(MarkerKind::Highlight), vec![LocationId::new("r2")]);
    }

    #[tokio::test]
    async fn test_delete_failure_restores_highlight() {
        let f = fixture();
        select(&f.manager, "r1");
        let h1 = f.manager.create_highlight(HighlightColor::Pink).await.unwrap();

        f.store.set_offline(true);
        assert!(!f.manager.delete_highlight(&h1.id).await);

        assert_eq!(f.manager.highlights(), vec![h1.clone()]);
        assert_eq!(
            f.renderer
                .drawn_style(MarkerKind::Highlight, &h1.document_range)
                .unwrap()
                .fill,
            "#f48fb1"
        );
        assert_eq!(f.errors.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_recolor_failure_restores_original_color() {
        let f = fixture();
        select(&f.manager, "r1");
        let h1 = f.manager.create_highlight(HighlightColor::Yellow).await.unwrap();

        f.store.set_offline(true);
        assert!(f.manager.update_color(&h1.id, HighlightColor::Blue).await.is_none());

        assert_eq!(
            f.renderer
                .drawn_style(MarkerKind::Highlight, &h1.document_range)
                .unwrap()
                .fill,
            "#ffeb3b"
        );
        assert_eq!(f.manager.get(&h1.id).unwrap().color_name, "yellow");
    }

    #[tokio::test]
    async fn test_note_update_and_clear() {
        let f = fixture();
        select(&f.manager, "r1");
        let h1 = f.manager.create_highlight(HighlightColor::Yellow).await.unwrap();

        let updated = f
            .manager
            .update_note(&h1.id, Some("Look this up".to_string()))
            .await
            .unwrap();
        assert_eq!(updated.note.as_deref(), Some("Look this up"));

        let cleared = f.manager.update_note(&h1.id, Some("  ".to_string())).await.unwrap();
        assert!(cleared.note.is_none());
        assert!(f.manager.get(&h1.id).unwrap().note.is_none());
    }

    #[tokio::test]
    async fn test_load_reports_failure() {
        let f = fixture();
        f.store.set_offline(true);
        assert!(f.manager.load().await.is_err());
        assert_eq!(f.errors.lock().len(), 1);
    }
}
