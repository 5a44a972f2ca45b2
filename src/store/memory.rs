//! In-memory annotation store
//!
//! Stands in for the remote service in tests and the demo binary. Records
//! are kept per book in insertion order. `set_offline` makes every call fail
//! the way an unreachable server would.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::AnnotationStore;
use crate::annotations::{
    Bookmark, BookmarkUpdate, Highlight, HighlightUpdate, NewBookmark, NewHighlight,
};
use crate::error::{ReaderError, Result};

#[derive(Default)]
pub struct MemoryStore {
    highlights: RwLock<HashMap<String, Vec<Highlight>>>,
    bookmarks: RwLock<HashMap<String, Vec<Bookmark>>>,
    offline: AtomicBool,
    calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an unreachable server
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of calls received, failed ones included
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Seed a book with existing highlights
    pub async fn insert_highlights(&self, book_id: &str, highlights: Vec<Highlight>) {
        self.highlights
            .write()
            .await
            .entry(book_id.to_string())
            .or_default()
            .extend(highlights);
    }

    fn check(&self, token: &str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if token.trim().is_empty() {
            return Err(ReaderError::Unauthorized);
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(ReaderError::Persistence("store is offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl AnnotationStore for MemoryStore {
    async fn list_highlights(&self, token: &str, book_id: &str) -> Result<Vec<Highlight>> {
        self.check(token)?;
        Ok(self
            .highlights
            .read()
            .await
            .get(book_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_highlight(
        &self,
        token: &str,
        book_id: &str,
        highlight: NewHighlight,
    ) -> Result<Highlight> {
        self.check(token)?;
        let now = Utc::now();
        let created = Highlight {
            id: Uuid::new_v4().to_string(),
            document_range: highlight.document_range,
            text: highlight.text,
            color_name: highlight.color_name,
            color_hex: highlight.color_hex,
            note: highlight.note,
            page_number: highlight.page_number,
            created_at: now,
            updated_at: now,
        };

        self.highlights
            .write()
            .await
            .entry(book_id.to_string())
            .or_default()
            .push(created.clone());

        tracing::debug!(book_id, id = %created.id, "Highlight stored");
        Ok(created)
    }

    async fn update_highlight(
        &self,
        token: &str,
        book_id: &str,
        id: &str,
        update: HighlightUpdate,
    ) -> Result<Highlight> {
        self.check(token)?;
        let mut highlights = self.highlights.write().await;
        let highlight = highlights
            .get_mut(book_id)
            .and_then(|list| list.iter_mut().find(|h| h.id == id))
            .ok_or_else(|| ReaderError::NotFound(format!("highlight {}", id)))?;

        if let Some(name) = update.color_name {
            highlight.color_name = name;
        }
        if let Some(hex) = update.color_hex {
            highlight.color_hex = hex;
        }
        if let Some(note) = update.note {
            highlight.note = note;
        }
        highlight.updated_at = Utc::now();

        Ok(highlight.clone())
    }

    async fn delete_highlight(&self, token: &str, book_id: &str, id: &str) -> Result<()> {
        self.check(token)?;
        let mut highlights = self.highlights.write().await;
        let list = highlights
            .get_mut(book_id)
            .ok_or_else(|| ReaderError::NotFound(format!("highlight {}", id)))?;
        let before = list.len();
        list.retain(|h| h.id != id);
        if list.len() == before {
            return Err(ReaderError::NotFound(format!("highlight {}", id)));
        }
        Ok(())
    }

    async fn list_bookmarks(&self, token: &str, book_id: &str) -> Result<Vec<Bookmark>> {
        self.check(token)?;
        Ok(self
            .bookmarks
            .read()
            .await
            .get(book_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_bookmark(
        &self,
        token: &str,
        book_id: &str,
        bookmark: NewBookmark,
    ) -> Result<Bookmark> {
        self.check(token)?;
        let now = Utc::now();
        let created = Bookmark {
            id: Uuid::new_v4().to_string(),
            page_number: bookmark.page_number,
            note: bookmark.note,
            created_at: now,
            updated_at: now,
        };

        self.bookmarks
            .write()
            .await
            .entry(book_id.to_string())
            .or_default()
            .push(created.clone());

        tracing::debug!(book_id, id = %created.id, page = created.page_number, "Bookmark stored");
        Ok(created)
    }

    async fn update_bookmark(
        &self,
        token: &str,
        book_id: &str,
        id: &str,
        update: BookmarkUpdate,
    ) -> Result<Bookmark> {
        self.check(token)?;
        let mut bookmarks = self.bookmarks.write().await;
        let bookmark = bookmarks
            .get_mut(book_id)
            .and_then(|list| list.iter_mut().find(|b| b.id == id))
            .ok_or_else(|| ReaderError::NotFound(format!("bookmark {}", id)))?;

        if let Some(note) = update.note {
            bookmark.note = note;
        }
        bookmark.updated_at = Utc::now();

        Ok(bookmark.clone())
    }

    async fn delete_bookmark(&self, token: &str, book_id: &str, id: &str) -> Result<()> {
        self.check(token)?;
        let mut bookmarks = self.bookmarks.write().await;
        let list = bookmarks
            .get_mut(book_id)
            .ok_or_else(|| ReaderError::NotFound(format!("bookmark {}", id)))?;
        let before = list.len();
        list.retain(|b| b.id != id);
        if list.len() == before {
            return Err(ReaderError::NotFound(format!("bookmark {}", id)));
        }
        Ok(())
    }
}
