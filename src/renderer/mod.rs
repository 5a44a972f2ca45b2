//! Renderer boundary
//!
//! The renderer is an opaque engine that paginates marked-up content. The
//! engine only drives it through [`Renderer`]: viewport moves, overlay
//! markers, lifecycle events, and raw access to content units for search.
//!
//! [`MemoryRenderer`] is a headless implementation with fixed-width
//! character pagination, used by the demo binary and the tests.

pub mod memory;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::annotations::{MarkerKind, MarkerStyle};
use crate::display::DisplayStyle;
use crate::error::Result;
use crate::location::{Location, LocationId, TextRange};

pub use memory::{MemoryRenderer, RendererCall};

/// Listener for "content drawn" events
pub type DrawnListener = Arc<dyn Fn() + Send + Sync>;

/// Listener for viewport relocation events
pub type RelocatedListener = Arc<dyn Fn(&Location) + Send + Sync>;

/// Paginated document renderer
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Advance one page
    async fn next(&self) -> Result<()>;

    /// Go back one page
    async fn prev(&self) -> Result<()>;

    /// Jump to a location identifier or a content unit href
    async fn display(&self, target: &str) -> Result<()>;

    /// Text currently visible on screen
    fn current_text(&self) -> Option<String>;

    fn current_location(&self) -> Option<Location>;

    /// True when the last page of the book is displayed
    fn at_end(&self) -> bool;

    async fn add_annotation(
        &self,
        kind: MarkerKind,
        location: &LocationId,
        style: &MarkerStyle,
    ) -> Result<()>;

    async fn remove_annotation(&self, location: &LocationId, kind: MarkerKind) -> Result<()>;

    fn on_content_drawn(&self, listener: DrawnListener) -> Subscription;

    fn on_relocated(&self, listener: RelocatedListener) -> Subscription;

    /// Number of content units in reading order
    fn section_count(&self) -> usize;

    /// Load a content unit and return its markup
    async fn load_section(&self, index: usize) -> Result<String>;

    /// Release a loaded content unit
    fn unload_section(&self, index: usize);

    fn resolve_range(&self, range: &TextRange) -> Result<LocationId>;

    fn locations(&self) -> &dyn LocationIndex;

    /// Push display options into the renderer's styling hooks
    fn apply_style(&self, style: &DisplayStyle);
}

/// Logical page numbering over the whole book
#[async_trait]
pub trait LocationIndex: Send + Sync {
    /// Build the index; returns the number of locations
    async fn generate(&self, granularity: usize) -> Result<usize>;

    fn total_count(&self) -> usize;

    /// 1-based page number containing `id`
    fn location_for_identifier(&self, id: &LocationId) -> Option<u32>;

    fn identifier_for_page(&self, page: u32) -> Option<LocationId>;
}

/// Handle returned by event registration. Dropping it unsubscribes.
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(unsubscribe: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    pub fn unsubscribe(mut self) {
        self.run();
    }

    fn run(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}

/// Shared slot holding the mounted renderer, if any.
///
/// Every component reads the renderer through this slot so an unmounted
/// renderer turns their operations into silent no-ops.
#[derive(Clone, Default)]
pub struct RendererHandle {
    slot: Arc<RwLock<Option<Arc<dyn Renderer>>>>,
}

impl RendererHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Arc<dyn Renderer>> {
        self.slot.read().clone()
    }

    pub fn attach(&self, renderer: Arc<dyn Renderer>) {
        *self.slot.write() = Some(renderer);
    }

    pub fn detach(&self) -> Option<Arc<dyn Renderer>> {
        self.slot.write().take()
    }

    pub fn is_attached(&self) -> bool {
        self.slot.read().is_some()
    }
}

impl fmt::Debug for RendererHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RendererHandle")
            .field("attached", &self.is_attached())
            .finish()
    }
}
