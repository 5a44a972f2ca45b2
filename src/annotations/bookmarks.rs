//! Bookmarks
//!
//! Bookmarks draw nothing, so unlike highlights they are only cached after
//! the store accepts them.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{self, ErrorCallback, Result};
use crate::navigation::Navigator;
use crate::position::PositionTracker;
use crate::store::{AnnotationStore, StoreScope};

use super::types::{Bookmark, BookmarkUpdate, NewBookmark};

pub struct BookmarkManager {
    scope: StoreScope,
    store: Arc<dyn AnnotationStore>,
    navigator: Navigator,
    position: PositionTracker,
    bookmarks: RwLock<Vec<Bookmark>>,
    on_error: ErrorCallback,
}

impl BookmarkManager {
    pub fn new(
        scope: StoreScope,
        store: Arc<dyn AnnotationStore>,
        navigator: Navigator,
        position: PositionTracker,
        on_error: ErrorCallback,
    ) -> Self {
        Self {
            scope,
            store,
            navigator,
            position,
            bookmarks: RwLock::new(Vec::new()),
            on_error,
        }
    }

    /// Cached bookmarks, ordered by page
    pub fn bookmarks(&self) -> Vec<Bookmark> {
        let mut bookmarks = self.bookmarks.read().clone();
        bookmarks.sort_by_key(|b| b.page_number);
        bookmarks
    }

    pub fn bookmark_for_page(&self, page: u32) -> Option<Bookmark> {
        self.bookmarks
            .read()
            .iter()
            .find(|b| b.page_number == page)
            .cloned()
    }

    pub fn is_current_page_bookmarked(&self) -> bool {
        self.position
            .current_page()
            .is_some_and(|page| self.bookmark_for_page(page).is_some())
    }

    pub async fn load(&self) -> Result<usize> {
        let bookmarks = self
            .store
            .list_bookmarks(&self.scope.access_token, &self.scope.book_id)
            .await
            .map_err(|err| {
                error::report(&self.on_error, "Failed to load bookmarks", &err);
                err
            })?;

        let count = bookmarks.len();
        *self.bookmarks.write() = bookmarks;
        tracing::info!(book_id = %self.scope.book_id, count, "Bookmarks loaded");
        Ok(count)
    }

    pub async fn add_bookmark(&self, page_number: u32, note: Option<String>) -> Option<Bookmark> {
        if let Some(existing) = self.bookmark_for_page(page_number) {
            return Some(existing);
        }

        let request = NewBookmark { page_number, note };
        match self
            .store
            .create_bookmark(&self.scope.access_token, &self.scope.book_id, request)
            .await
        {
            Ok(bookmark) => {
                self.bookmarks.write().push(bookmark.clone());
                tracing::debug!(id = %bookmark.id, page = page_number, "Bookmark added");
                Some(bookmark)
            }
            Err(err) => {
                error::report(&self.on_error, "Failed to add bookmark", &err);
                None
            }
        }
    }

    /// Bookmark the current page, or remove its bookmark if it has one.
    ///
    /// Returns whether the page is bookmarked afterwards.
    pub async fn toggle_current_page(&self) -> bool {
        let Some(page) = self.position.current_page() else {
            tracing::debug!("No current page, ignoring bookmark toggle");
            return false;
        };

        match self.bookmark_for_page(page) {
            Some(existing) => !self.remove_bookmark(&existing.id).await,
            None => self.add_bookmark(page, None).await.is_some(),
        }
    }

    pub async fn remove_bookmark(&self, id: &str) -> bool {
        match self
            .store
            .delete_bookmark(&self.scope.access_token, &self.scope.book_id, id)
            .await
        {
            Ok(()) => {
                self.bookmarks.write().retain(|b| b.id != id);
                true
            }
            Err(err) => {
                error::report(&self.on_error, "Failed to remove bookmark", &err);
                false
            }
        }
    }

    pub async fn update_note(&self, id: &str, note: Option<String>) -> Option<Bookmark> {
        let update = BookmarkUpdate {
            note: Some(note.filter(|n| !n.trim().is_empty())),
        };
        match self
            .store
            .update_bookmark(&self.scope.access_token, &self.scope.book_id, id, update)
            .await
        {
            Ok(updated) => {
                if let Some(slot) = self.bookmarks.write().iter_mut().find(|b| b.id == id) {
                    *slot = updated.clone();
                }
                Some(updated)
            }
            Err(err) => {
                error::report(&self.on_error, "Failed to save bookmark note", &err);
                None
            }
        }
    }

    pub async fn go_to_bookmark(&self, id: &str) {
        let bookmark = self.bookmarks.read().iter().find(|b| b.id == id).cloned();
        match bookmark {
            Some(bookmark) => self.navigator.go_to_bookmark(&bookmark).await,
            None => tracing::debug!(id, "Unknown bookmark"),
        }
    }
}

impl std::fmt::Debug for BookmarkManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BookmarkManager")
            .field("book_id", &self.scope.book_id)
            .field("bookmarks", &self.bookmarks.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::navigation::NavigationSequencer;
    use crate::renderer::{LocationIndex, MemoryRenderer, Renderer, RendererHandle};
    use crate::store::MemoryStore;
    use parking_lot::Mutex;

    struct Fixture {
        renderer: Arc<MemoryRenderer>,
        store: Arc<MemoryStore>,
        manager: BookmarkManager,
        errors: Arc<Mutex<Vec<String>>>,
    }

    async fn fixture() -> Fixture {
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

        let position = PositionTracker::new(handle.clone());
        position.attach();

        let store = Arc::new(MemoryStore::new());
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();
        let manager = BookmarkManager::new(
            StoreScope::new("token", "book-1"),
            store.clone(),
            Navigator::new(handle, NavigationSequencer::new()),
            position,
            Arc::new(move |m: &str| sink.lock().push(m.to_string())),
        );

        Fixture {
            renderer,
            store,
            manager,
            errors,
        }
    }

    #[tokio::test]
    async fn test_toggle_current_page() {
        let f = fixture().await;
        f.renderer.next().await.unwrap();
        f.renderer.next().await.unwrap();

        assert!(f.manager.toggle_current_page().await);
        assert!(f.manager.is_current_page_bookmarked());
        assert_eq!(f.manager.bookmarks()[0].page_number, 2);

        assert!(!f.manager.toggle_current_page().await);
        assert!(f.manager.bookmarks().is_empty());
        assert!(f.store.list_bookmarks("token", "book-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_go_to_bookmark() {
        let f = fixture().await;
        let bookmark = f.manager.add_bookmark(3, Some("ending".to_string())).await.unwrap();

        f.manager.go_to_bookmark(&bookmark.id).await;
        assert_eq!(f.renderer.current_text().unwrap(), "uvwxyz");
    }

    #[tokio::test]
    async fn test_failed_add_is_reported() {
        let f = fixture().await;
        f.store.set_offline(true);

        assert!(f.manager.add_bookmark(1, None).await.is_none());
        assert!(f.manager.bookmarks().is_empty());
        assert_eq!(
            f.errors.lock().as_slice(),
            ["Could not reach the server, please try again"]
        );
    }

    #[tokio::test]
    async fn test_update_note() {
        let f = fixture().await;
        let bookmark = f.manager.add_bookmark(1, None).await.unwrap();

        let updated = f
            .manager
            .update_note(&bookmark.id, Some("first page".to_string()))
            .await
            .unwrap();
        assert_eq!(updated.note.as_deref(), Some("first page"));
        assert_eq!(f.manager.bookmarks()[0].note.as_deref(), Some("first page"));
    }
}
