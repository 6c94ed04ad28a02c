//! Error types for the canvas model

use crate::CanvasId;

/// Canvas model errors
#[derive(Debug, thiserror::Error)]
pub enum CanvasError {
    /// Canvas id not registered in the store or target set
    #[error("unknown canvas: {0}")]
    UnknownCanvas(CanvasId),

    /// Two bitmaps that must share a shape do not
    #[error("dimension mismatch: expected {expected_width}x{expected_height}, got {width}x{height}")]
    DimensionMismatch {
        expected_width: u32,
        expected_height: u32,
        width: u32,
        height: u32,
    },

    /// Encoded image could not be decoded
    #[error("image decoding failed: {0}")]
    Decode(#[from] image::ImageError),

    /// Target file could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl CanvasError {
    /// Build a dimension mismatch error
    #[inline]
    #[must_use]
    pub fn dimension_mismatch(expected: (u32, u32), actual: (u32, u32)) -> Self {
        Self::DimensionMismatch {
            expected_width: expected.0,
            expected_height: expected.1,
            width: actual.0,
            height: actual.1,
        }
    }
}
