//! Applied-marker bookkeeping
//!
//! Tracks which ranges the renderer currently draws for one marker kind and
//! diffs that set against the desired one. Only the difference is sent to the
//! renderer, so running a pass twice with the same input is a no-op.

use std::collections::{HashMap, HashSet};

use crate::location::LocationId;
use crate::renderer::Renderer;

use super::types::{MarkerKind, MarkerStyle};

/// Outcome of one reconcile pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub added: usize,
    pub removed: usize,
    /// Draws that failed; retried on the next pass
    pub failed: usize,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.added == 0 && self.removed == 0 && self.failed == 0
    }
}

#[derive(Debug)]
pub struct AppliedMarkers {
    kind: MarkerKind,
    drawn: HashSet<LocationId>,
}

impl AppliedMarkers {
    pub fn new(kind: MarkerKind) -> Self {
        Self {
            kind,
            drawn: HashSet::new(),
        }
    }

    pub fn kind(&self) -> MarkerKind {
        self.kind
    }

    pub fn contains(&self, location: &LocationId) -> bool {
        self.drawn.contains(location)
    }

    pub fn len(&self) -> usize {
        self.drawn.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drawn.is_empty()
    }

    /// Applied ranges, sorted
    pub fn ranges(&self) -> Vec<LocationId> {
        let mut ranges: Vec<_> = self.drawn.iter().cloned().collect();
        ranges.sort();
        ranges
    }

    /// Bring the drawn set in line with `desired`.
    ///
    /// Removal errors are swallowed and the range is forgotten anyway: the
    /// renderer may already have dropped the marker during a re-layout.
    /// Failed draws stay out of the set so the next pass retries them.
    pub async fn reconcile(
        &mut self,
        renderer: &dyn Renderer,
        desired: &[(LocationId, MarkerStyle)],
    ) -> ReconcileReport {
        let wanted: HashMap<&LocationId, &MarkerStyle> =
            desired.iter().map(|(location, style)| (location, style)).collect();
        let mut report = ReconcileReport::default();

        let stale: Vec<LocationId> = self
            .drawn
            .iter()
            .filter(|location| !wanted.contains_key(location))
            .cloned()
            .collect();
        for location in stale {
            if let Err(err) = renderer.remove_annotation(&location, self.kind).await {
                tracing::debug!(location = %location, error = %err, "Ignoring marker removal failure");
            }
            self.drawn.remove(&location);
            report.removed += 1;
        }

        for (location, style) in desired {
            if self.drawn.contains(location) {
                continue;
            }
            match renderer.add_annotation(self.kind, location, style).await {
                Ok(()) => {
                    self.drawn.insert(location.clone());
                    report.added += 1;
                }
                Err(err) => {
                    tracing::warn!(location = %location, error = %err, "Failed to draw marker");
                    report.failed += 1;
                }
            }
        }

        report
    }

    /// Draw one marker outside a full pass
    pub async fn add(
        &mut self,
        renderer: &dyn Renderer,
        location: &LocationId,
        style: &MarkerStyle,
    ) -> crate::error::Result<()> {
        renderer.add_annotation(self.kind, location, style).await?;
        self.drawn.insert(location.clone());
        Ok(())
    }

    /// Remove one marker outside a full pass; errors are swallowed
    pub async fn remove(&mut self, renderer: &dyn Renderer, location: &LocationId) {
        if let Err(err) = renderer.remove_annotation(location, self.kind).await {
            tracing::debug!(location = %location, error = %err, "Ignoring marker removal failure");
        }
        self.drawn.remove(location);
    }

    /// Remove every applied marker, desired or not
    pub async fn clear(&mut self, renderer: &dyn Renderer) -> usize {
        let drawn: Vec<LocationId> = self.drawn.drain().collect();
        for location in &drawn {
            if let Err(err) = renderer.remove_annotation(location, self.kind).await {
                tracing::debug!(location = %location, error = %err, "Ignoring marker removal failure");
            }
        }
        drawn.len()
    }

    /// Forget everything without touching the renderer
    pub fn reset(&mut self) {
        self.drawn.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::{MemoryRenderer, RendererCall};

    fn renderer() -> MemoryRenderer {
        MemoryRenderer::from_sections(vec![("c1.xhtml", "<p>The quick brown fox</p>")]).unwrap()
    }

    fn desired(ranges: &[&str]) -> Vec<(LocationId, MarkerStyle)> {
        ranges
            .iter()
            .map(|r| (LocationId::new(*r), MarkerStyle::solid("#ffeb3b")))
            .collect()
    }

    #[tokio::test]
    async fn test_reconcile_converges() {
        let renderer = renderer();
        let mut markers = AppliedMarkers::new(MarkerKind::Highlight);

        let report = markers.reconcile(&renderer, &desired(&["r1", "r2"])).await;
        assert_eq!(report.added, 2);
        assert_eq!(report.removed, 0);

        let report = markers.reconcile(&renderer, &desired(&["r2", "r3"])).await;
        assert_eq!(report.added, 1);
        assert_eq!(report.removed, 1);
        assert_eq!(markers.ranges(), vec![LocationId::new("r2"), LocationId::new("r3")]);
        assert_eq!(
            renderer.drawn(MarkerKind::Highlight),
            vec![LocationId::new("r2"), LocationId::new("r3")]
        );
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let renderer = renderer();
        let mut markers = AppliedMarkers::new(MarkerKind::Highlight);
        let wanted = desired(&["r1", "r2"]);

        markers.reconcile(&renderer, &wanted).await;
        renderer.clear_calls();

        let report = markers.reconcile(&renderer, &wanted).await;
        assert!(report.is_noop());
        assert!(renderer.annotation_calls().is_empty());
    }

    #[tokio::test]
    async fn test_failed_draw_is_retried() {
        let renderer = renderer();
        let mut markers = AppliedMarkers::new(MarkerKind::Highlight);
        renderer.fail_annotations_for(&LocationId::new("r2"));

        let report = markers.reconcile(&renderer, &desired(&["r1", "r2"])).await;
        assert_eq!(report.added, 1);
        assert_eq!(report.failed, 1);
        assert!(!markers.contains(&LocationId::new("r2")));

        renderer.clear_annotation_faults();
        let report = markers.reconcile(&renderer, &desired(&["r1", "r2"])).await;
        assert_eq!(report.added, 1);
        assert_eq!(markers.len(), 2);
    }

    #[tokio::test]
    async fn test_removal_failure_is_swallowed() {
        let renderer = renderer();
        let mut markers = AppliedMarkers::new(MarkerKind::Highlight);
        markers.reconcile(&renderer, &desired(&["r1"])).await;

        renderer.fail_annotations_for(&LocationId::new("r1"));
        let report = markers.reconcile(&renderer, &[]).await;
        assert_eq!(report.removed, 1);
        assert!(markers.is_empty());
    }

    #[tokio::test]
    async fn test_clear_removes_everything() {
        let renderer = renderer();
        let mut markers = AppliedMarkers::new(MarkerKind::SearchHit);
        markers.reconcile(&renderer, &desired(&["a", "b"])).await;
        renderer.clear_calls();

        assert_eq!(markers.clear(&renderer).await, 2);
        assert!(markers.is_empty());
        assert!(renderer.drawn(MarkerKind::SearchHit).is_empty());
        assert!(renderer
            .annotation_calls()
            .iter()
            .all(|c| matches!(c, RendererCall::RemoveAnnotation { kind: MarkerKind::SearchHit, .. })));
    }
}
