//! Full-text search across the book
//!
//! Content units are scanned in chunks. Units of a chunk load in parallel,
//! and the engine yields to the runtime between chunks so navigation and
//! rendering stay responsive during a long search.
//!
//! A run is cancelled through its [`CancelToken`]. Starting a search for a
//! different query cancels the running one; the cancelled run notices at its
//! next check and returns without committing anything. A generation counter
//! keeps a finished-but-superseded run from resetting its successor's flags.

pub mod text;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::annotations::{AppliedMarkers, MarkerKind, MarkerStyle};
use crate::config::SearchConfig;
use crate::location::{LocationId, TextRange};
use crate::navigation::Navigator;
use crate::renderer::{Renderer, RendererHandle};

use self::text::{extract_text_nodes, SectionText};

/// One occurrence of the query
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub document_range: LocationId,
    pub excerpt: String,
    /// Content unit the match is in
    pub section: usize,
}

/// Observable search state
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchState {
    pub query: String,
    pub results: Vec<SearchResult>,
    pub current_index: Option<usize>,
    /// 0-100 while searching, 0 otherwise
    pub progress: u8,
    pub searching: bool,
}

/// Shared cancellation flag for one search run
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
struct ActiveRun {
    generation: u64,
    query: String,
    token: CancelToken,
}

#[derive(Clone)]
pub struct SearchEngine {
    inner: Arc<Inner>,
}

struct Inner {
    renderer: RendererHandle,
    navigator: Navigator,
    config: SearchConfig,
    state: RwLock<SearchState>,
    active: Mutex<Option<ActiveRun>>,
    generation: AtomicU64,
    markers: tokio::sync::Mutex<AppliedMarkers>,
}

impl SearchEngine {
    pub fn new(renderer: RendererHandle, navigator: Navigator, config: SearchConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                renderer,
                navigator,
                config,
                state: RwLock::new(SearchState::default()),
                active: Mutex::new(None),
                generation: AtomicU64::new(0),
                markers: tokio::sync::Mutex::new(AppliedMarkers::new(MarkerKind::SearchHit)),
            }),
        }
    }

    /// Search the whole book for `query`, case-insensitively.
    ///
    /// Resolves when this run finishes or is cancelled. Blank queries and a
    /// repeat of the query already running are ignored.
    pub async fn search(&self, query: &str) {
        let query = query.trim();
        if query.is_empty() {
            return;
        }
        if let Some(active) = self.inner.active.lock().as_ref() {
            if active.query == query {
                tracing::debug!(query, "Search already running");
                return;
            }
        }
        let Some(renderer) = self.inner.renderer.get() else {
            return;
        };

        self.cancel();
        self.clear_markers().await;

        let token = CancelToken::new();
        let generation = {
            let mut active = self.inner.active.lock();
            // Another search may have started while markers were cleared
            if let Some(previous) = active.take() {
                previous.token.cancel();
            }
            let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
            *active = Some(ActiveRun {
                generation,
                query: query.to_string(),
                token: token.clone(),
            });
            generation
        };

        *self.inner.state.write() = SearchState {
            query: query.to_string(),
            searching: true,
            ..Default::default()
        };
        tracing::info!(query, sections = renderer.section_count(), "Search started");

        if let Some(results) = self.inner.run(renderer.as_ref(), query, &token, generation).await {
            self.inner.commit(renderer.as_ref(), results, &token).await;
        } else {
            tracing::debug!(query, "Search cancelled");
        }

        self.inner.finish(generation);
    }

    /// Stop the running search, keeping whatever results are committed
    pub fn cancel(&self) {
        let previous = self.inner.active.lock().take();
        if let Some(run) = previous {
            run.token.cancel();
            self.inner.generation.fetch_add(1, Ordering::SeqCst);
            let mut state = self.inner.state.write();
            state.searching = false;
            state.progress = 0;
            tracing::debug!(query = %run.query, "Search cancellation requested");
        }
    }

    /// Cancel, remove markers, and forget the query and results
    pub async fn clear_search(&self) {
        self.cancel();
        self.clear_markers().await;
        *self.inner.state.write() = SearchState::default();
    }

    pub async fn next_result(&self) {
        let target = {
            let mut state = self.inner.state.write();
            let count = state.results.len();
            if count == 0 {
                return;
            }
            let index = state.current_index.map_or(0, |i| (i + 1) % count);
            state.current_index = Some(index);
            state.results[index].document_range.clone()
        };
        self.inner.navigator.go_to_location(&target).await;
    }

    pub async fn prev_result(&self) {
        let target = {
            let mut state = self.inner.state.write();
            let count = state.results.len();
            if count == 0 {
                return;
            }
            let index = state.current_index.map_or(0, |i| (i + count - 1) % count);
            state.current_index = Some(index);
            state.results[index].document_range.clone()
        };
        self.inner.navigator.go_to_location(&target).await;
    }

    /// Jump to result `index`; out-of-range indices are ignored
    pub async fn go_to_search_result(&self, index: usize) {
        let target = {
            let mut state = self.inner.state.write();
            let Some(result) = state.results.get(index) else {
                tracing::debug!(index, count = state.results.len(), "Search result out of range");
                return;
            };
            let target = result.document_range.clone();
            state.current_index = Some(index);
            target
        };
        self.inner.navigator.go_to_location(&target).await;
    }

    pub fn state(&self) -> SearchState {
        self.inner.state.read().clone()
    }

    pub fn results(&self) -> Vec<SearchResult> {
        self.inner.state.read().results.clone()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.inner.state.read().current_index
    }

    pub fn progress(&self) -> u8 {
        self.inner.state.read().progress
    }

    pub fn is_searching(&self) -> bool {
        self.inner.state.read().searching
    }

    /// Search-hit ranges currently drawn, sorted
    pub async fn drawn_markers(&self) -> Vec<LocationId> {
        self.inner.markers.lock().await.ranges()
    }

    async fn clear_markers(&self) {
        let mut markers = self.inner.markers.lock().await;
        match self.inner.renderer.get() {
            Some(renderer) => {
                markers.clear(renderer.as_ref()).await;
            }
            None => markers.reset(),
        }
    }
}

impl Inner {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Scan every content unit; `None` when cancelled
    async fn run(
        &self,
        renderer: &dyn Renderer,
        query: &str,
        token: &CancelToken,
        generation: u64,
    ) -> Option<Vec<SearchResult>> {
        let total = renderer.section_count();
        let lowered = query.to_lowercase();
        let chunk_size = self.config.chunk_size.max(1);
        let mut results = Vec::new();
        let mut processed = 0;

        let mut start = 0;
        while start < total {
            if token.is_cancelled() {
                return None;
            }
            let end = (start + chunk_size).min(total);

            let scans = (start..end).map(|index| scan_section(renderer, index, &lowered, token));
            for found in join_all(scans).await {
                results.extend(found);
            }

            if token.is_cancelled() {
                return None;
            }

            processed += end - start;
            let progress = ((processed as f64 / total as f64) * 100.0).round().min(100.0) as u8;
            if self.is_current(generation) {
                self.state.write().progress = progress;
            }
            tracing::trace!(processed, total, progress, "Search chunk scanned");

            start = end;
            tokio::task::yield_now().await;
        }

        Some(results)
    }

    async fn commit(&self, renderer: &dyn Renderer, results: Vec<SearchResult>, token: &CancelToken) {
        let first = results.first().map(|r| r.document_range.clone());
        let to_draw: Vec<LocationId> = results
            .iter()
            .take(self.config.max_markers)
            .map(|r| r.document_range.clone())
            .collect();

        {
            if token.is_cancelled() {
                return;
            }
            let mut state = self.state.write();
            state.current_index = first.as_ref().map(|_| 0);
            state.results = results;
            tracing::info!(query = %state.query, count = state.results.len(), "Search finished");
        }

        {
            let mut markers = self.markers.lock().await;
            let style = MarkerStyle::search_hit();
            for location in &to_draw {
                // A newer search owns the markers from here on
                if token.is_cancelled() {
                    return;
                }
                if let Err(err) = markers.add(renderer, location, &style).await {
                    tracing::warn!(location = %location, error = %err, "Failed to draw search marker");
                }
            }
        }

        if let Some(first) = first {
            if token.is_cancelled() {
                return;
            }
            if let Err(err) = renderer.display(first.as_str()).await {
                tracing::warn!(location = %first, error = %err, "Failed to display first search result");
            }
        }
    }

    fn finish(&self, generation: u64) {
        let mut active = self.active.lock();
        if !self.is_current(generation) {
            return;
        }
        if active.as_ref().is_some_and(|run| run.generation == generation) {
            active.take();
        }
        let mut state = self.state.write();
        state.searching = false;
        state.progress = 0;
    }
}

/// Scan one content unit. Once loaded, the scan runs to completion.
async fn scan_section(
    renderer: &dyn Renderer,
    index: usize,
    lowered_query: &str,
    token: &CancelToken,
) -> Vec<SearchResult> {
    if token.is_cancelled() {
        return Vec::new();
    }

    let markup = match renderer.load_section(index).await {
        Ok(markup) => markup,
        Err(err) => {
            tracing::warn!(section = index, error = %err, "Skipping unreadable section");
            return Vec::new();
        }
    };

    let found = match extract_text_nodes(&markup) {
        Ok(nodes) => SectionText::new(&nodes)
            .find_all(lowered_query)
            .into_iter()
            .filter_map(|m| {
                let range = TextRange {
                    section: index,
                    start: m.start,
                    end: m.end,
                };
                match renderer.resolve_range(&range) {
                    Ok(document_range) => Some(SearchResult {
                        document_range,
                        excerpt: m.excerpt,
                        section: index,
                    }),
                    Err(err) => {
                        tracing::debug!(section = index, error = %err, "Skipping unresolvable match");
                        None
                    }
                }
            })
            .collect(),
        Err(err) => {
            tracing::warn!(section = index, error = %err, "Skipping unparsable section");
            Vec::new()
        }
    };

    renderer.unload_section(index);
    found
}

impl std::fmt::Debug for SearchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.read();
        f.debug_struct("SearchEngine")
            .field("query", &state.query)
            .field("results", &state.results.len())
            .field("searching", &state.searching)
            .finish()
    }
}
