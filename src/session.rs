//! Reader session
//!
//! Wires every component to one shared renderer slot and runs the mount and
//! unmount sequences. A session outlives its renderers: mounting a new one
//! tears the previous one down first.

use std::sync::Arc;

use futures::FutureExt;

use crate::annotations::{AnnotationReconciler, BookmarkManager, HighlightManager, SharedHighlights};
use crate::config::EngineConfig;
use crate::display::{DisplaySynchronizer, RedrawCallback};
use crate::error::{ErrorCallback, Result};
use crate::location::LocationId;
use crate::narration::{NarrationController, SpeechSynthesizer};
use crate::navigation::{NavigationSequencer, Navigator};
use crate::position::PositionTracker;
use crate::renderer::{Renderer, RendererHandle};
use crate::search::SearchEngine;
use crate::settings::SettingsStore;
use crate::store::{AnnotationStore, StoreScope};

/// External collaborators a session talks to
#[derive(Clone)]
pub struct SessionServices {
    pub store: Arc<dyn AnnotationStore>,
    pub settings: Arc<dyn SettingsStore>,
    pub synth: Arc<dyn SpeechSynthesizer>,
    pub on_error: ErrorCallback,
}

pub struct ReaderSession {
    config: EngineConfig,
    scope: StoreScope,
    renderer: RendererHandle,
    navigator: Navigator,
    reconciler: AnnotationReconciler,
    highlights: HighlightManager,
    bookmarks: BookmarkManager,
    search: SearchEngine,
    narration: NarrationController,
    display: DisplaySynchronizer,
    position: PositionTracker,
}

impl ReaderSession {
    pub fn new(config: EngineConfig, scope: StoreScope, services: SessionServices) -> Self {
        let renderer = RendererHandle::new();
        let navigator = Navigator::new(renderer.clone(), NavigationSequencer::new());
        let position = PositionTracker::new(renderer.clone());

        let reconciler = AnnotationReconciler::new(
            renderer.clone(),
            SharedHighlights::default(),
            &config.timing,
        );

        let highlights = HighlightManager::new(
            scope.clone(),
            services.store.clone(),
            renderer.clone(),
            reconciler.clone(),
            navigator.clone(),
            services.on_error.clone(),
        );

        let bookmarks = BookmarkManager::new(
            scope.clone(),
            services.store.clone(),
            navigator.clone(),
            position.clone(),
            services.on_error.clone(),
        );

        let search = SearchEngine::new(renderer.clone(), navigator.clone(), config.search.clone());

        let narration = NarrationController::new(
            renderer.clone(),
            navigator.clone(),
            services.synth.clone(),
            services.settings.clone(),
            config.timing.narration_settle(),
            services.on_error.clone(),
        );

        let redraw_target = reconciler.clone();
        let on_redraw: RedrawCallback = Arc::new(move || {
            let reconciler = redraw_target.clone();
            async move {
                reconciler.redraw_all().await;
            }
            .boxed()
        });
        let display = DisplaySynchronizer::new(
            scope.book_id.clone(),
            renderer.clone(),
            services.settings.clone(),
            config.timing.display_debounce(),
            on_redraw,
            services.on_error.clone(),
        );

        Self {
            config,
            scope,
            renderer,
            navigator,
            reconciler,
            highlights,
            bookmarks,
            search,
            narration,
            display,
            position,
        }
    }

    /// Attach a renderer, restore annotations and open the book at `start`
    /// (or its first page).
    pub async fn mount(&self, renderer: Arc<dyn Renderer>, start: Option<LocationId>) -> Result<()> {
        if self.renderer.is_attached() {
            self.unmount().await;
        }

        self.renderer.attach(renderer.clone());
        self.reconciler.reset().await;
        self.display.apply();

        let total = renderer
            .locations()
            .generate(self.config.locations.granularity)
            .await?;
        tracing::info!(
            book_id = %self.scope.book_id,
            sections = renderer.section_count(),
            pages = total,
            "Renderer mounted"
        );

        self.reconciler.attach_listeners();
        self.position.attach();

        // Load failures are already reported; the book stays readable
        let _ = self.highlights.load().await;
        let _ = self.bookmarks.load().await;

        match start {
            Some(location) => self.navigator.go_to_location(&location).await,
            None if total > 0 => self.navigator.go_to_page(1).await,
            None => self.navigator.next_page().await,
        }

        self.reconciler.reconcile().await;
        Ok(())
    }

    /// Stop every activity and release the renderer
    pub async fn unmount(&self) {
        if !self.renderer.is_attached() {
            return;
        }

        self.narration.stop_speaking();
        self.search.clear_search().await;
        self.reconciler.detach_listeners();
        self.position.detach();
        self.reconciler.reset().await;
        self.renderer.detach();
        tracing::info!(book_id = %self.scope.book_id, "Renderer unmounted");
    }

    pub fn is_mounted(&self) -> bool {
        self.renderer.is_attached()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn book_id(&self) -> &str {
        &self.scope.book_id
    }

    pub fn navigator(&self) -> &Navigator {
        &self.navigator
    }

    pub fn reconciler(&self) -> &AnnotationReconciler {
        &self.reconciler
    }

    pub fn highlights(&self) -> &HighlightManager {
        &self.highlights
    }

    pub fn bookmarks(&self) -> &BookmarkManager {
        &self.bookmarks
    }

    pub fn search(&self) -> &SearchEngine {
        &self.search
    }

    pub fn narration(&self) -> &NarrationController {
        &self.narration
    }

    pub fn display(&self) -> &DisplaySynchronizer {
        &self.display
    }

    pub fn position(&self) -> &PositionTracker {
        &self.position
    }
}

impl std::fmt::Debug for ReaderSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReaderSession")
            .field("book_id", &self.scope.book_id)
            .field("mounted", &self.is_mounted())
            .finish()
    }
}
