//! Headless in-memory renderer
//!
//! Paginates each content unit into fixed-size character pages. Page size
//! scales with font size and line height so restyling reflows the book the
//! way a real renderer would. Every annotation and navigation call is
//! recorded, and failures can be injected for tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{DrawnListener, LocationIndex, RelocatedListener, Renderer, Subscription};
use crate::annotations::{MarkerKind, MarkerStyle};
use crate::display::DisplayStyle;
use crate::error::{ReaderError, Result};
use crate::location::{self, Cfi, Location, LocationId, NodePoint, TextRange};
use crate::search::text::extract_text_nodes;

/// Characters per page at 100% font size and 1.5 line height
const DEFAULT_PAGE_CHARS: usize = 1000;

/// A recorded renderer call
#[derive(Debug, Clone, PartialEq)]
pub enum RendererCall {
    Next,
    Prev,
    Display(String),
    AddAnnotation {
        kind: MarkerKind,
        location: LocationId,
        fill: String,
    },
    RemoveAnnotation {
        kind: MarkerKind,
        location: LocationId,
    },
    LoadSection(usize),
    UnloadSection(usize),
    ApplyStyle(DisplayStyle),
}

struct Section {
    href: String,
    markup: String,
    nodes: Vec<String>,
    /// Char offset of each node within the section text
    node_starts: Vec<usize>,
    char_len: usize,
}

impl Section {
    fn new(href: String, markup: String) -> Result<Self> {
        let nodes = extract_text_nodes(&markup)?;
        let mut node_starts = Vec::with_capacity(nodes.len());
        let mut char_len = 0;
        for node in &nodes {
            node_starts.push(char_len);
            char_len += node.chars().count();
        }
        Ok(Self {
            href,
            markup,
            nodes,
            node_starts,
            char_len,
        })
    }

    fn node_len(&self, node: usize) -> Option<usize> {
        self.nodes.get(node).map(|n| n.chars().count())
    }

    fn flat_offset(&self, at: NodePoint) -> Option<usize> {
        if self.nodes.is_empty() && at.node == 0 && at.offset == 0 {
            return Some(0);
        }
        let len = self.node_len(at.node)?;
        if at.offset > len {
            return None;
        }
        Some(self.node_starts[at.node] + at.offset)
    }

    fn point_at(&self, flat: usize) -> NodePoint {
        let node = match self.node_starts.binary_search(&flat) {
            Ok(index) => index,
            Err(index) => index.saturating_sub(1),
        };
        let start = self.node_starts.get(node).copied().unwrap_or(0);
        NodePoint {
            node,
            offset: flat - start,
        }
    }

    fn text(&self, start: usize, end: usize) -> String {
        self.nodes
            .iter()
            .flat_map(|n| n.chars())
            .skip(start)
            .take(end.saturating_sub(start))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Page {
    section: usize,
    start: usize,
    end: usize,
}

#[derive(Default)]
struct ViewState {
    style: DisplayStyle,
    pages: Vec<Page>,
    current: Option<usize>,
    drawn_section: Option<usize>,
    annotations: HashMap<(MarkerKind, LocationId), MarkerStyle>,
    loaded: HashSet<usize>,
    /// Generated location starts as (section, flat char offset)
    locations: Vec<(usize, usize)>,
}

#[derive(Default)]
struct Faults {
    annotations: HashSet<LocationId>,
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    drawn: Vec<(u64, DrawnListener)>,
    relocated: Vec<(u64, RelocatedListener)>,
}

/// Event to fire once state locks are released
enum Fired {
    Nothing,
    Moved { redrawn: bool, location: Location },
}

pub struct MemoryRenderer {
    sections: Vec<Section>,
    page_chars: usize,
    state: Mutex<ViewState>,
    listeners: Arc<Mutex<Listeners>>,
    faults: Mutex<Faults>,
    calls: Mutex<Vec<RendererCall>>,
}

impl MemoryRenderer {
    /// Build a renderer from `(href, markup)` pairs in reading order
    pub fn from_sections<I, H, M>(sections: I) -> Result<Self>
    where
        I: IntoIterator<Item = (H, M)>,
        H: Into<String>,
        M: Into<String>,
    {
        let sections = sections
            .into_iter()
            .map(|(href, markup)| Section::new(href.into(), markup.into()))
            .collect::<Result<Vec<_>>>()?;

        let renderer = Self {
            sections,
            page_chars: DEFAULT_PAGE_CHARS,
            state: Mutex::new(ViewState::default()),
            listeners: Arc::new(Mutex::new(Listeners::default())),
            faults: Mutex::new(Faults::default()),
            calls: Mutex::new(Vec::new()),
        };
        renderer.repaginate();
        Ok(renderer)
    }

    /// Characters per page at default styling
    pub fn with_page_chars(mut self, chars: usize) -> Self {
        self.page_chars = chars.max(1);
        self.repaginate();
        self
    }

    pub fn page_count(&self) -> usize {
        self.state.lock().pages.len()
    }

    fn record(&self, call: RendererCall) {
        self.calls.lock().push(call);
    }

    fn page_size(&self, style: &DisplayStyle) -> usize {
        let font = usize::from(style.font_size.max(1));
        let line = usize::from(style.line_height.max(1));
        (self.page_chars * 100 * 15 / (font * line)).max(1)
    }

    fn repaginate(&self) {
        let mut state = self.state.lock();
        let anchor = state
            .current
            .and_then(|index| state.pages.get(index).copied())
            .map(|page| (page.section, page.start));

        let size = self.page_size(&state.style);
        let mut pages = Vec::new();
        for (index, section) in self.sections.iter().enumerate() {
            let mut start = 0;
            loop {
                let end = (start + size).min(section.char_len);
                pages.push(Page {
                    section: index,
                    start,
                    end,
                });
                if end >= section.char_len {
                    break;
                }
                start = end;
            }
        }

        state.current = anchor.and_then(|(section, offset)| find_page(&pages, section, offset));
        state.pages = pages;
    }

    fn location_of(&self, page: Page) -> Location {
        let section = &self.sections[page.section];
        Location {
            start: location::point_cfi(page.section, section.point_at(page.start)),
            end: location::point_cfi(page.section, section.point_at(page.end)),
            section: page.section,
        }
    }

    /// Move to a page index and compute which events to fire
    fn move_to(&self, index: usize) -> Fired {
        let mut state = self.state.lock();
        let Some(page) = state.pages.get(index).copied() else {
            return Fired::Nothing;
        };
        state.current = Some(index);
        let redrawn = state.drawn_section != Some(page.section);
        state.drawn_section = Some(page.section);
        drop(state);

        Fired::Moved {
            redrawn,
            location: self.location_of(page),
        }
    }

    fn fire(&self, fired: Fired) {
        if let Fired::Moved { redrawn, location } = fired {
            if redrawn {
                self.fire_drawn();
            }
            let listeners: Vec<RelocatedListener> = self
                .listeners
                .lock()
                .relocated
                .iter()
                .map(|(_, l)| l.clone())
                .collect();
            for listener in listeners {
                listener(&location);
            }
        }
    }

    fn fire_drawn(&self) {
        let listeners: Vec<DrawnListener> = self
            .listeners
            .lock()
            .drawn
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for listener in listeners {
            listener();
        }
    }

    fn resolve_target(&self, target: &str) -> Result<(usize, usize)> {
        if target.starts_with("epubcfi(") {
            let cfi = location::parse(target)
                .map_err(|e| ReaderError::Renderer(format!("{}: {}", target, e)))?;
            let section = self
                .sections
                .get(cfi.section())
                .ok_or_else(|| ReaderError::Renderer(format!("No section for {}", target)))?;
            let offset = section
                .flat_offset(cfi.start())
                .ok_or_else(|| ReaderError::Renderer(format!("Offset out of range: {}", target)))?;
            return Ok((cfi.section(), offset));
        }

        let href = target.split('#').next().unwrap_or(target);
        self.sections
            .iter()
            .position(|s| s.href == href)
            .map(|index| (index, 0))
            .ok_or_else(|| ReaderError::NotFound(target.to_string()))
    }

    fn subscribe<T>(
        &self,
        pick: fn(&mut Listeners) -> &mut Vec<(u64, T)>,
        listener: T,
    ) -> Subscription
    where
        T: Send + Sync + 'static,
    {
        let id = {
            let mut listeners = self.listeners.lock();
            listeners.next_id += 1;
            let id = listeners.next_id;
            pick(&mut listeners).push((id, listener));
            id
        };

        let weak: Weak<Mutex<Listeners>> = Arc::downgrade(&self.listeners);
        Subscription::new(move || {
            if let Some(listeners) = weak.upgrade() {
                pick(&mut listeners.lock()).retain(|(other, _)| *other != id);
            }
        })
    }
}

fn drawn_listeners(listeners: &mut Listeners) -> &mut Vec<(u64, DrawnListener)> {
    &mut listeners.drawn
}

fn relocated_listeners(listeners: &mut Listeners) -> &mut Vec<(u64, RelocatedListener)> {
    &mut listeners.relocated
}

fn find_page(pages: &[Page], section: usize, offset: usize) -> Option<usize> {
    pages
        .iter()
        .rposition(|p| p.section == section && p.start <= offset)
}

/// Inspection and fault injection for tests
#[cfg(test)]
impl MemoryRenderer {
    pub fn calls(&self) -> Vec<RendererCall> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Annotation add/remove calls only
    pub fn annotation_calls(&self) -> Vec<RendererCall> {
        self.calls
            .lock()
            .iter()
            .filter(|c| {
                matches!(
                    c,
                    RendererCall::AddAnnotation { .. } | RendererCall::RemoveAnnotation { .. }
                )
            })
            .cloned()
            .collect()
    }

    /// Locations currently drawn with the given marker kind, sorted
    pub fn drawn(&self, kind: MarkerKind) -> Vec<LocationId> {
        let mut drawn: Vec<LocationId> = self
            .state
            .lock()
            .annotations
            .keys()
            .filter(|(k, _)| *k == kind)
            .map(|(_, location)| location.clone())
            .collect();
        drawn.sort();
        drawn
    }

    pub fn drawn_style(&self, kind: MarkerKind, location: &LocationId) -> Option<MarkerStyle> {
        self.state
            .lock()
            .annotations
            .get(&(kind, location.clone()))
            .cloned()
    }

    pub fn loaded_sections(&self) -> usize {
        self.state.lock().loaded.len()
    }

    /// 0-based index of the displayed page
    pub fn current_page_index(&self) -> Option<usize> {
        self.state.lock().current
    }

    pub fn style(&self) -> DisplayStyle {
        self.state.lock().style.clone()
    }

    /// Make add/remove of this location fail until cleared
    pub fn fail_annotations_for(&self, location: &LocationId) {
        self.faults.lock().annotations.insert(location.clone());
    }

    pub fn clear_annotation_faults(&self) {
        self.faults.lock().annotations.clear();
    }

    pub fn listener_count(&self) -> usize {
        let listeners = self.listeners.lock();
        listeners.drawn.len() + listeners.relocated.len()
    }
}

#[async_trait]
impl Renderer for MemoryRenderer {
    async fn next(&self) -> Result<()> {
        self.record(RendererCall::Next);
        let target = {
            let state = self.state.lock();
            match state.current {
                Some(index) if index + 1 < state.pages.len() => Some(index + 1),
                Some(_) => None,
                None => (!state.pages.is_empty()).then_some(0),
            }
        };
        if let Some(index) = target {
            let fired = self.move_to(index);
            self.fire(fired);
        }
        Ok(())
    }

    async fn prev(&self) -> Result<()> {
        self.record(RendererCall::Prev);
        let target = self.state.lock().current.and_then(|i| i.checked_sub(1));
        if let Some(index) = target {
            let fired = self.move_to(index);
            self.fire(fired);
        }
        Ok(())
    }

    async fn display(&self, target: &str) -> Result<()> {
        self.record(RendererCall::Display(target.to_string()));
        let (section, offset) = self.resolve_target(target)?;
        let index = find_page(&self.state.lock().pages, section, offset)
            .ok_or_else(|| ReaderError::Renderer(format!("No page for {}", target)))?;
        let fired = self.move_to(index);
        self.fire(fired);
        Ok(())
    }

    fn current_text(&self) -> Option<String> {
        let state = self.state.lock();
        let page = state.pages.get(state.current?)?;
        Some(self.sections[page.section].text(page.start, page.end))
    }

    fn current_location(&self) -> Option<Location> {
        let page = {
            let state = self.state.lock();
            *state.pages.get(state.current?)?
        };
        Some(self.location_of(page))
    }

    fn at_end(&self) -> bool {
        let state = self.state.lock();
        state.current.is_some_and(|index| index + 1 >= state.pages.len())
    }

    async fn add_annotation(
        &self,
        kind: MarkerKind,
        location: &LocationId,
        style: &MarkerStyle,
    ) -> Result<()> {
        self.record(RendererCall::AddAnnotation {
            kind,
            location: location.clone(),
            fill: style.fill.clone(),
        });
        if self.faults.lock().annotations.contains(location) {
            return Err(ReaderError::Renderer(format!("Cannot draw {}", location)));
        }
        self.state
            .lock()
            .annotations
            .insert((kind, location.clone()), style.clone());
        Ok(())
    }

    async fn remove_annotation(&self, location: &LocationId, kind: MarkerKind) -> Result<()> {
        self.record(RendererCall::RemoveAnnotation {
            kind,
            location: location.clone(),
        });
        if self.faults.lock().annotations.contains(location) {
            return Err(ReaderError::Renderer(format!("Cannot remove {}", location)));
        }
        self.state.lock().annotations.remove(&(kind, location.clone()));
        Ok(())
    }

    fn on_content_drawn(&self, listener: DrawnListener) -> Subscription {
        self.subscribe(drawn_listeners, listener)
    }

    fn on_relocated(&self, listener: RelocatedListener) -> Subscription {
        self.subscribe(relocated_listeners, listener)
    }

    fn section_count(&self) -> usize {
        self.sections.len()
    }

    async fn load_section(&self, index: usize) -> Result<String> {
        self.record(RendererCall::LoadSection(index));
        let section = self
            .sections
            .get(index)
            .ok_or_else(|| ReaderError::NotFound(format!("section {}", index)))?;
        self.state.lock().loaded.insert(index);
        Ok(section.markup.clone())
    }

    fn unload_section(&self, index: usize) {
        self.record(RendererCall::UnloadSection(index));
        self.state.lock().loaded.remove(&index);
    }

    fn resolve_range(&self, range: &TextRange) -> Result<LocationId> {
        let section = self
            .sections
            .get(range.section)
            .ok_or_else(|| ReaderError::Resolution(format!("No section {}", range.section)))?;
        let start = section.flat_offset(range.start);
        let end = section.flat_offset(range.end);
        match (start, end) {
            (Some(start), Some(end)) if start <= end => Ok(location::range_cfi(range)),
            _ => Err(ReaderError::Resolution(format!(
                "Range outside section {}: {:?}",
                range.section, range
            ))),
        }
    }

    fn locations(&self) -> &dyn LocationIndex {
        self
    }

    fn apply_style(&self, style: &DisplayStyle) {
        self.record(RendererCall::ApplyStyle(style.clone()));
        let reflow = {
            let mut state = self.state.lock();
            let reflow = state.style.font_size != style.font_size
                || state.style.line_height != style.line_height
                || state.style.font_family != style.font_family;
            state.style = style.clone();
            reflow
        };
        if !reflow {
            return;
        }

        self.repaginate();
        self.fire_drawn();
        let page = {
            let state = self.state.lock();
            state.current.and_then(|index| state.pages.get(index).copied())
        };
        if let Some(page) = page {
            let location = self.location_of(page);
            self.fire(Fired::Moved {
                redrawn: false,
                location,
            });
        }
    }
}

#[async_trait]
impl LocationIndex for MemoryRenderer {
    async fn generate(&self, granularity: usize) -> Result<usize> {
        let granularity = granularity.max(1);
        let mut locations = Vec::new();
        for (index, section) in self.sections.iter().enumerate() {
            let mut start = 0;
            loop {
                locations.push((index, start));
                start += granularity;
                if start >= section.char_len {
                    break;
                }
            }
        }
        let count = locations.len();
        self.state.lock().locations = locations;
        Ok(count)
    }

    fn total_count(&self) -> usize {
        self.state.lock().locations.len()
    }

    fn location_for_identifier(&self, id: &LocationId) -> Option<u32> {
        let cfi: Cfi = location::parse(id.as_str()).ok()?;
        let offset = self.sections.get(cfi.section())?.flat_offset(cfi.start())?;
        let state = self.state.lock();
        let index = state
            .locations
            .iter()
            .rposition(|&(section, start)| (section, start) <= (cfi.section(), offset))?;
        u32::try_from(index + 1).ok()
    }

    fn identifier_for_page(&self, page: u32) -> Option<LocationId> {
        let index = usize::try_from(page).ok()?.checked_sub(1)?;
        let (section, start) = *self.state.lock().locations.get(index)?;
        Some(location::point_cfi(
            section,
            self.sections[section].point_at(start),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn book() -> MemoryRenderer {
        MemoryRenderer::from_sections(vec![
            ("c1.xhtml", "<html><body><p>abcdefghij</p><p>klmnopqrst</p></body></html>"),
            ("c2.xhtml", "<html><body><p>uvwxyz</p></body></html>"),
        ])
        .unwrap()
        .with_page_chars(8)
    }

    #[tokio::test]
    async fn test_pagination_and_navigation() {
        let renderer = book();
        assert_eq!(renderer.page_count(), 4);
        assert!(renderer.current_text().is_none());

        renderer.next().await.unwrap();
        assert_eq!(renderer.current_text().unwrap(), "abcdefgh");
        renderer.next().await.unwrap();
        assert_eq!(renderer.current_text().unwrap(), "ijklmnop");
        renderer.prev().await.unwrap();
        assert_eq!(renderer.current_page_index(), Some(0));
        assert!(!renderer.at_end());

        renderer.display("c2.xhtml").await.unwrap();
        assert!(renderer.at_end());
    }

    #[tokio::test]
    async fn test_display_by_href_and_cfi() {
        let renderer = book();
        renderer.display("c2.xhtml#frag").await.unwrap();
        assert_eq!(renderer.current_text().unwrap(), "uvwxyz");

        renderer.display("epubcfi(/6/2!/4/3:7)").await.unwrap();
        assert_eq!(renderer.current_text().unwrap(), "qrst");

        assert!(renderer.display("missing.xhtml").await.is_err());
    }

    #[tokio::test]
    async fn test_events_fire_and_unsubscribe() {
        let renderer = book();
        let drawn = Arc::new(AtomicUsize::new(0));
        let moved = Arc::new(AtomicUsize::new(0));

        let d = drawn.clone();
        let drawn_sub = renderer.on_content_drawn(Arc::new(move || {
            d.fetch_add(1, Ordering::SeqCst);
        }));
        let m = moved.clone();
        let moved_sub = renderer.on_relocated(Arc::new(move |_| {
            m.fetch_add(1, Ordering::SeqCst);
        }));

        renderer.next().await.unwrap();
        renderer.next().await.unwrap();
        // Same section: relocated only
        assert_eq!(drawn.load(Ordering::SeqCst), 1);
        assert_eq!(moved.load(Ordering::SeqCst), 2);

        drawn_sub.unsubscribe();
        moved_sub.unsubscribe();
        assert_eq!(renderer.listener_count(), 0);

        renderer.display("c2.xhtml").await.unwrap();
        assert_eq!(drawn.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_restyle_reflows_and_keeps_position() {
        let renderer = book();
        renderer.display("epubcfi(/6/2!/4/3:0)").await.unwrap();
        let before = renderer.page_count();

        let style = DisplayStyle {
            font_size: 200,
            ..DisplayStyle::default()
        };
        renderer.apply_style(&style);

        assert!(renderer.page_count() > before);
        // Reflow keeps the page that started at char 8
        assert_eq!(renderer.current_text().unwrap(), "ijkl");
    }

    #[tokio::test]
    async fn test_location_index() {
        let renderer = book();
        let total = renderer.generate(5).await.unwrap();
        // 20 chars -> 4 locations, 6 chars -> 2 locations
        assert_eq!(total, 6);

        let fifth = renderer.identifier_for_page(5).unwrap();
        assert_eq!(fifth.as_str(), "epubcfi(/6/4!/4/1:0)");
        assert_eq!(renderer.location_for_identifier(&fifth), Some(5));
        assert_eq!(
            renderer.location_for_identifier(&LocationId::new("epubcfi(/6/2!/4/3:3)")),
            Some(3)
        );
        assert!(renderer.identifier_for_page(0).is_none());
        assert!(renderer.identifier_for_page(7).is_none());
    }

    #[tokio::test]
    async fn test_resolve_range_validates_offsets() {
        let renderer = book();
        let ok = TextRange {
            section: 0,
            start: NodePoint { node: 0, offset: 2 },
            end: NodePoint { node: 1, offset: 3 },
        };
        assert_eq!(
            renderer.resolve_range(&ok).unwrap().as_str(),
            "epubcfi(/6/2!/4,/1:2,/3:3)"
        );

        let bad = TextRange {
            end: NodePoint { node: 1, offset: 30 },
            ..ok
        };
        assert!(matches!(
            renderer.resolve_range(&bad),
            Err(ReaderError::Resolution(_))
        ));
    }

    #[tokio::test]
    async fn test_annotation_faults() {
        let renderer = book();
        let location = LocationId::new("epubcfi(/6/2!/4,/1:0,/1:3)");
        renderer.fail_annotations_for(&location);

        let result = renderer
            .add_annotation(MarkerKind::Highlight, &location, &MarkerStyle::solid("#fff"))
            .await;
        assert!(result.is_err());
        assert!(renderer.drawn(MarkerKind::Highlight).is_empty());

        renderer.clear_annotation_faults();
        renderer
            .add_annotation(MarkerKind::Highlight, &location, &MarkerStyle::solid("#fff"))
            .await
            .unwrap();
        assert_eq!(renderer.drawn(MarkerKind::Highlight), vec![location]);
    }
}
