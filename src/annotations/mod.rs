//! Highlights, bookmarks and the overlay markers that show them

mod bookmarks;
mod highlights;
mod markers;
mod reconciler;
mod types;

pub use bookmarks::BookmarkManager;
pub use highlights::HighlightManager;
pub use markers::{AppliedMarkers, ReconcileReport};
pub use reconciler::{AnnotationReconciler, SharedHighlights};
pub use types::{
    Bookmark, BookmarkUpdate, Highlight, HighlightColor, HighlightUpdate, MarkerKind, MarkerStyle,
    NewBookmark, NewHighlight, PendingSelection,
};
