//! Periodic status summary

use crate::account::PoolStats;
use tessera_canvas::{CanvasStore, PixelTally, TargetSet};

/// Matched pixels and identity counts at one instant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusReport {
    pub pixels: PixelTally,
    pub accounts: PoolStats,
}

impl StatusReport {
    /// Tally every target against the current canvas snapshots
    ///
    /// Canvases without a full frame count all their target pixels as
    /// unsynced.
    #[must_use]
    pub fn collect(store: &CanvasStore, targets: &TargetSet, accounts: PoolStats) -> Self {
        let mut pixels = PixelTally::default();
        for target in targets.iter() {
            let snapshot = store.snapshot(target.canvas());
            match target.tally(snapshot.as_deref()) {
                Ok(tally) => pixels += tally,
                Err(e) => {
                    tracing::warn!(canvas = %target.canvas(), error = %e, "canvas not comparable");
                    pixels.unsynced += target.required_count();
                }
            }
        }
        Self { pixels, accounts }
    }

    /// Emit the report through `tracing`
    pub fn log(&self) {
        tracing::info!(
            good = self.pixels.good,
            contested = self.pixels.contested,
            unsynced = self.pixels.unsynced,
            usable = self.accounts.usable,
            disabled = self.accounts.disabled,
            total = self.accounts.total,
            "{self}"
        );
    }
}

impl std::fmt::Display for StatusReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "pixels: {:04} good {:04} contested {:04} unsynced | accounts: {:04} usable {:04} disabled {:04} total",
            self.pixels.good,
            self.pixels.contested,
            self.pixels.unsynced,
            self.accounts.usable,
            self.accounts.disabled,
            self.accounts.total,
        )
    }
}
