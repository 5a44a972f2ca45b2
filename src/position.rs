//! Reading position tracking
//!
//! Follows relocated events and keeps the current logical page, the total
//! page count and the percentage read.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::location::Location;
use crate::renderer::{RendererHandle, Subscription};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingPosition {
    pub location: Option<Location>,
    /// 1-based logical page, once locations are generated
    pub page: Option<u32>,
    pub total_pages: usize,
    /// 0-100
    pub percent: u8,
}

#[derive(Clone, Default)]
pub struct PositionTracker {
    renderer: RendererHandle,
    position: Arc<RwLock<ReadingPosition>>,
    subscription: Arc<Mutex<Option<Subscription>>>,
}

impl PositionTracker {
    pub fn new(renderer: RendererHandle) -> Self {
        Self {
            renderer,
            ..Default::default()
        }
    }

    pub fn attach(&self) {
        let Some(renderer) = self.renderer.get() else {
            return;
        };
        let mut slot = self.subscription.lock();
        if slot.is_some() {
            return;
        }

        let tracker = self.clone_detached();
        *slot = Some(renderer.on_relocated(Arc::new(move |location| {
            tracker.update(location);
        })));

        if let Some(location) = renderer.current_location() {
            drop(slot);
            self.update(&location);
        }
    }

    pub fn detach(&self) {
        if let Some(subscription) = self.subscription.lock().take() {
            subscription.unsubscribe();
        }
    }

    pub fn position(&self) -> ReadingPosition {
        self.position.read().clone()
    }

    pub fn current_page(&self) -> Option<u32> {
        self.position.read().page
    }

    /// Recompute the position for `location`
    pub fn update(&self, location: &Location) {
        let (page, total_pages) = match self.renderer.get() {
            Some(renderer) => {
                let index = renderer.locations();
                (index.location_for_identifier(&location.start), index.total_count())
            }
            None => (None, 0),
        };

        let percent = match (page, total_pages) {
            (Some(page), total) if total > 0 => {
                let ratio = f64::from(page) / total as f64 * 100.0;
                ratio.round().min(100.0) as u8
            }
            _ => 0,
        };

        tracing::trace!(page = ?page, total_pages, percent, "Position updated");
        *self.position.write() = ReadingPosition {
            location: Some(location.clone()),
            page,
            total_pages,
            percent,
        };
    }

    /// Handle sharing state but not the subscription slot, for the listener
    fn clone_detached(&self) -> PositionTracker {
        PositionTracker {
            renderer: self.renderer.clone(),
            position: self.position.clone(),
            subscription: Arc::default(),
        }
    }
}

impl std::fmt::Debug for PositionTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionTracker")
            .field("position", &*self.position.read())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::{LocationIndex, MemoryRenderer, Renderer};

    #[tokio::test]
    async fn test_tracks_relocations() {
        let renderer = Arc::new(
            MemoryRenderer::from_sections(vec![
                ("c1.xhtml", "<p>abcdefghijklmnopqrst</p>"),
                ("c2.xhtml", "<p>uvwxyz</p>"),
            ])
            .unwrap()
            .with_page_chars(10),
        );
        renderer.generate(10).await.unwrap();
        let handle = RendererHandle::new();
        handle.attach(renderer.clone());

        let tracker = PositionTracker::new(handle);
        tracker.attach();
        assert_eq!(tracker.current_page(), None);

        renderer.next().await.unwrap();
        assert_eq!(tracker.current_page(), Some(1));
        assert_eq!(tracker.position().percent, 33);

        renderer.display("c2.xhtml").await.unwrap();
        let position = tracker.position();
        assert_eq!(position.page, Some(3));
        assert_eq!(position.total_pages, 3);
        assert_eq!(position.percent, 100);

        tracker.detach();
        assert_eq!(renderer.listener_count(), 0);
    }
}
