//! Remote annotation storage boundary
//!
//! Highlights and bookmarks live in a remote CRUD service. Every call carries
//! the reader's access token; the engine never caches it beyond the session.

mod memory;

use async_trait::async_trait;

use crate::annotations::{
    Bookmark, BookmarkUpdate, Highlight, HighlightUpdate, NewBookmark, NewHighlight,
};
use crate::error::Result;

pub use memory::MemoryStore;

/// CRUD access to a book's highlights and bookmarks
#[async_trait]
pub trait AnnotationStore: Send + Sync {
    async fn list_highlights(&self, token: &str, book_id: &str) -> Result<Vec<Highlight>>;

    async fn create_highlight(
        &self,
        token: &str,
        book_id: &str,
        highlight: NewHighlight,
    ) -> Result<Highlight>;

    async fn update_highlight(
        &self,
        token: &str,
        book_id: &str,
        id: &str,
        update: HighlightUpdate,
    ) -> Result<Highlight>;

    async fn delete_highlight(&self, token: &str, book_id: &str, id: &str) -> Result<()>;

    async fn list_bookmarks(&self, token: &str, book_id: &str) -> Result<Vec<Bookmark>>;

    async fn create_bookmark(
        &self,
        token: &str,
        book_id: &str,
        bookmark: NewBookmark,
    ) -> Result<Bookmark>;

    async fn update_bookmark(
        &self,
        token: &str,
        book_id: &str,
        id: &str,
        update: BookmarkUpdate,
    ) -> Result<Bookmark>;

    async fn delete_bookmark(&self, token: &str, book_id: &str, id: &str) -> Result<()>;
}

/// Credentials identifying whose annotations a session works on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreScope {
    pub access_token: String,
    pub book_id: String,
}

impl StoreScope {
    pub fn new(access_token: impl Into<String>, book_id: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            book_id: book_id.into(),
        }
    }
}
