//! Tessera canvas model
//!
//! Pure data types shared by every other crate in the workspace:
//! - The fixed 32-colour palette
//! - ARGB bitmaps (full frames and sparse deltas)
//! - Per-canvas target specifications with an ignore mask
//! - The generation-tracked [`CanvasStore`]
//!
//! # Example
//!
//! ```rust,ignore
//! use tessera_canvas::{Bitmap, CanvasId, CanvasStore, Color};
//!
//! let store = CanvasStore::new([CanvasId(0)]);
//! let generation = store.replace(CanvasId(0), Bitmap::filled(4, 4, Color::White.argb()))?;
//! assert_eq!(store.generation(CanvasId(0)), Some(generation));
//! ```

#![warn(unreachable_pub)]

pub mod bitmap;
pub mod error;
pub mod palette;
pub mod store;
pub mod target;

pub use bitmap::Bitmap;
pub use error::CanvasError;
pub use palette::Color;
pub use store::{CanvasStore, Generation, MergeOutcome};
pub use target::{PixelTally, TargetSet, TargetSpec, UnknownColor};

use serde::{Deserialize, Serialize};

/// Default edge length of a canvas in pixels
pub const DEFAULT_DIMENSION: u32 = 1000;

/// Small integer identifying one canvas of the remote service
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CanvasId(pub u8);

impl CanvasId {
    /// Numeric value, as used on the wire
    #[inline]
    #[must_use]
    pub fn value(self) -> u8 {
        self.0
    }
}

impl std::fmt::Display for CanvasId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
