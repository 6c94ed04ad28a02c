//! Generation-tracked canvas store
//!
//! One slot per canvas. Each slot is written by exactly one logical writer
//! (that canvas's sync pipeline) and read by any number of readers, which get
//! cheap `Arc` snapshots and never block the writer for longer than a
//! pointer swap or an in-place merge.
//!
//! Every full replacement bumps the slot's [`Generation`]. A merge must name
//! the generation it was queued against; merges queued before a newer full
//! frame are rejected instead of reintroducing stale pixels.

use crate::bitmap::Bitmap;
use crate::error::CanvasError;
use crate::CanvasId;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Monotonic per-canvas replacement counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Generation(pub u64);

impl std::fmt::Display for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "g{}", self.0)
    }
}

/// Result of an incremental merge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Delta applied; number of pixels written
    Applied(usize),
    /// A newer full frame replaced the canvas since the merge was queued
    Stale {
        /// Generation the merge was queued against
        queued: Generation,
        /// Generation currently held by the store
        current: Generation,
    },
    /// No full frame received yet; nothing to merge into
    Uninitialized,
}

#[derive(Debug, Default)]
struct Slot {
    generation: Generation,
    bitmap: Option<Arc<Bitmap>>,
}

/// Current state of every canvas
#[derive(Debug)]
pub struct CanvasStore {
    slots: BTreeMap<CanvasId, RwLock<Slot>>,
    dimensions: Option<(u32, u32)>,
}

impl CanvasStore {
    /// Create a store with one empty slot per canvas
    #[must_use]
    pub fn new(canvases: impl IntoIterator<Item = CanvasId>) -> Self {
        Self {
            slots: canvases
                .into_iter()
                .map(|id| (id, RwLock::new(Slot::default())))
                .collect(),
            dimensions: None,
        }
    }

    /// Only accept full frames of `width`x`height`
    #[inline]
    #[must_use]
    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.dimensions = Some((width, height));
        self
    }

    /// Shape every canvas must have, if one was set
    #[inline]
    #[must_use]
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.dimensions
    }

    /// Registered canvas ids
    pub fn canvases(&self) -> impl Iterator<Item = CanvasId> + '_ {
        self.slots.keys().copied()
    }

    /// Consistent snapshot of a canvas; `None` until its first full frame
    #[must_use]
    pub fn snapshot(&self, canvas: CanvasId) -> Option<Arc<Bitmap>> {
        self.slots.get(&canvas)?.read().bitmap.clone()
    }

    /// Generation currently held for a canvas
    #[must_use]
    pub fn generation(&self, canvas: CanvasId) -> Option<Generation> {
        self.slots.get(&canvas).map(|s| s.read().generation)
    }

    /// Atomically replace a canvas with a full frame
    ///
    /// Returns the new generation; every merge queued against an older
    /// generation is rejected from now on.
    ///
    /// # Errors
    /// - `CanvasError::UnknownCanvas` if the canvas has no slot
    /// - `CanvasError::DimensionMismatch` if the frame does not have the
    ///   store's shape; the slot is left untouched
    pub fn replace(&self, canvas: CanvasId, bitmap: Bitmap) -> Result<Generation, CanvasError> {
        let slot = self.slot(canvas)?;
        if let Some(expected) = self.dimensions {
            if bitmap.dimensions() != expected {
                return Err(CanvasError::dimension_mismatch(expected, bitmap.dimensions()));
            }
        }
        let mut guard = slot.write();
        guard.generation = Generation(guard.generation.0 + 1);
        guard.bitmap = Some(Arc::new(bitmap));
        Ok(guard.generation)
    }

    /// Apply a sparse delta queued against `queued`
    ///
    /// Snapshots taken before the merge keep their old pixels; the slot is
    /// copied on write if a reader still holds one.
    ///
    /// # Errors
    /// - `CanvasError::UnknownCanvas` if the canvas has no slot
    /// - `CanvasError::DimensionMismatch` if the delta has a different shape
    pub fn merge(
        &self,
        canvas: CanvasId,
        delta: &Bitmap,
        queued: Generation,
    ) -> Result<MergeOutcome, CanvasError> {
        let slot = self.slot(canvas)?;
        let mut guard = slot.write();

        if guard.generation != queued {
            return Ok(MergeOutcome::Stale {
                queued,
                current: guard.generation,
            });
        }
        let Some(bitmap) = guard.bitmap.as_mut() else {
            return Ok(MergeOutcome::Uninitialized);
        };

        let written = Arc::make_mut(bitmap).apply_delta(delta)?;
        Ok(MergeOutcome::Applied(written))
    }

    fn slot(&self, canvas: CanvasId) -> Result<&RwLock<Slot>, CanvasError> {
        self.slots
            .get(&canvas)
            .ok_or(CanvasError::UnknownCanvas(canvas))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Color;

    const C0: CanvasId = CanvasId(0);

    fn store() -> CanvasStore {
        CanvasStore::new([C0, CanvasId(1)])
    }

    #[test]
    fn empty_until_first_full_frame() {
        let store = store();
        assert!(store.snapshot(C0).is_none());
        assert_eq!(store.generation(C0), Some(Generation(0)));
        assert_eq!(
            store.merge(C0, &Bitmap::transparent(2, 2), Generation(0)).unwrap(),
            MergeOutcome::Uninitialized
        );
    }

    #[test]
    fn replace_is_exact_and_bumps_generation() {
        let store = store();
        let mut first = Bitmap::filled(2, 2, Color::Blue.argb());
        first.set(0, 0, Color::Red.argb());
        assert_eq!(store.replace(C0, first).unwrap(), Generation(1));

        let second = Bitmap::filled(2, 2, Color::White.argb());
        assert_eq!(store.replace(C0, second.clone()).unwrap(), Generation(2));

        // No residue of the first frame
        assert_eq!(*store.snapshot(C0).unwrap(), second);
    }

    #[test]
    fn merge_applies_at_current_generation() {
        let store = store();
        let generation = store.replace(C0, Bitmap::filled(2, 2, Color::Blue.argb())).unwrap();

        let mut delta = Bitmap::transparent(2, 2);
        delta.set(1, 1, Color::Red.argb());
        assert_eq!(
            store.merge(C0, &delta, generation).unwrap(),
            MergeOutcome::Applied(1)
        );

        let snapshot = store.snapshot(C0).unwrap();
        assert_eq!(snapshot.get(1, 1), Some(Color::Red.argb()));
        assert_eq!(snapshot.get(0, 0), Some(Color::Blue.argb()));
    }

    #[test]
    fn merge_queued_before_full_frame_is_rejected() {
        let store = store();
        let queued = store.replace(C0, Bitmap::filled(2, 2, Color::Blue.argb())).unwrap();
        let full = Bitmap::filled(2, 2, Color::Black.argb());
        store.replace(C0, full.clone()).unwrap();

        let delta = Bitmap::filled(2, 2, Color::Red.argb());
        assert_eq!(
            store.merge(C0, &delta, queued).unwrap(),
            MergeOutcome::Stale {
                queued,
                current: Generation(2)
            }
        );
        assert_eq!(*store.snapshot(C0).unwrap(), full);
    }

    #[test]
    fn snapshots_are_not_mutated_by_later_merges() {
        let store = store();
        let generation = store.replace(C0, Bitmap::filled(1, 1, Color::Blue.argb())).unwrap();
        let before = store.snapshot(C0).unwrap();

        store
            .merge(C0, &Bitmap::filled(1, 1, Color::Red.argb()), generation)
            .unwrap();

        assert_eq!(before.get(0, 0), Some(Color::Blue.argb()));
        assert_eq!(store.snapshot(C0).unwrap().get(0, 0), Some(Color::Red.argb()));
    }

    #[test]
    fn full_frame_of_wrong_shape_is_rejected() {
        let store = CanvasStore::new([C0]).with_dimensions(2, 2);
        let generation = store.replace(C0, Bitmap::filled(2, 2, Color::Blue.argb())).unwrap();

        let err = store
            .replace(C0, Bitmap::filled(3, 2, Color::Red.argb()))
            .unwrap_err();
        assert!(matches!(err, CanvasError::DimensionMismatch { width: 3, height: 2, .. }));
        assert_eq!(store.generation(C0), Some(generation));
        assert_eq!(store.snapshot(C0).unwrap().get(0, 0), Some(Color::Blue.argb()));
    }

    #[test]
    fn unknown_canvas_is_an_error() {
        let store = store();
        assert!(matches!(
            store.replace(CanvasId(9), Bitmap::transparent(1, 1)),
            Err(CanvasError::UnknownCanvas(CanvasId(9)))
        ));
    }
}
