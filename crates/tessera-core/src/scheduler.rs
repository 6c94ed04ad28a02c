//! Diff scheduler
//!
//! Each dispatch cycle compares every live canvas against its target, shuffles
//! the mismatching pixels and keeps at most one per available identity.

use crate::types::Assignment;
use rand::seq::SliceRandom;
use tessera_canvas::{CanvasId, CanvasStore, TargetSet};

/// One cycle's worth of work
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    /// Assignments to dispatch, never more than `available`
    pub batch: Vec<Assignment>,
    /// Mismatching pixels found before truncation
    pub candidates: usize,
    /// Identities available at selection time
    pub available: usize,
}

impl Plan {
    /// True when the cycle has nothing to dispatch
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }
}

/// Stateless diff + selection policy
#[derive(Debug, Clone, Copy, Default)]
pub struct DiffScheduler;

impl DiffScheduler {
    /// Every mismatching target pixel across canvases for which `is_live` holds
    ///
    /// Canvases without a full frame yet, or whose current bitmap does not
    /// match the target's shape, contribute nothing.
    #[must_use]
    pub fn candidates(
        store: &CanvasStore,
        targets: &TargetSet,
        is_live: impl Fn(CanvasId) -> bool,
    ) -> Vec<Assignment> {
        let mut out = Vec::new();
        for target in targets.iter() {
            let canvas = target.canvas();
            if !is_live(canvas) {
                continue;
            }
            let Some(current) = store.snapshot(canvas) else {
                continue;
            };
            match target.mismatches(&current) {
                Ok(pixels) => out.extend(
                    pixels
                        .into_iter()
                        .map(|(x, y, color)| Assignment::new(canvas, x, y, color)),
                ),
                Err(e) => tracing::warn!(%canvas, error = %e, "skipping canvas in diff"),
            }
        }
        out
    }

    /// Build this cycle's batch for `available` identities
    ///
    /// With no available identity the canvases are not even scanned.
    #[must_use]
    pub fn plan(
        store: &CanvasStore,
        targets: &TargetSet,
        is_live: impl Fn(CanvasId) -> bool,
        available: usize,
        rng: &mut impl rand::Rng,
    ) -> Plan {
        if available == 0 {
            return Plan::default();
        }

        let mut batch = Self::candidates(store, targets, is_live);
        let candidates = batch.len();
        batch.shuffle(rng);
        batch.truncate(available);

        Plan {
            batch,
            candidates,
            available,
        }
    }
}
