//! ARGB bitmaps
//!
//! A [`Bitmap`] is either a full frame (every pixel meaningful) or a sparse
//! delta, where a pixel with zero alpha means "not part of this delta".

use crate::error::CanvasError;
use image::RgbaImage;
use std::path::Path;

/// Row-major grid of packed `0xAARRGGBB` pixels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    width: u32,
    height: u32,
    pixels: Vec<u32>,
}

impl Bitmap {
    /// Fully transparent bitmap (an empty delta)
    #[inline]
    #[must_use]
    pub fn transparent(width: u32, height: u32) -> Self {
        Self::filled(width, height, 0)
    }

    /// Bitmap with every pixel set to `argb`
    #[must_use]
    pub fn filled(width: u32, height: u32, argb: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![argb; width as usize * height as usize],
        }
    }

    /// Decode an encoded image (PNG in practice)
    ///
    /// # Errors
    /// - `CanvasError::Decode` if the bytes are not a supported image
    pub fn decode(bytes: &[u8]) -> Result<Self, CanvasError> {
        let image = image::load_from_memory(bytes)?;
        Ok(Self::from_rgba(&image.to_rgba8()))
    }

    /// Read and decode an image file
    ///
    /// # Errors
    /// - `CanvasError::Io` if the file cannot be read
    /// - `CanvasError::Decode` if the file is not a supported image
    pub fn open(path: &Path) -> Result<Self, CanvasError> {
        let bytes = std::fs::read(path).map_err(|source| CanvasError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::decode(&bytes)
    }

    /// Convert from an RGBA image buffer
    #[must_use]
    pub fn from_rgba(image: &RgbaImage) -> Self {
        let pixels = image
            .pixels()
            .map(|p| {
                let [r, g, b, a] = p.0;
                u32::from_be_bytes([a, r, g, b])
            })
            .collect();
        Self {
            width: image.width(),
            height: image.height(),
            pixels,
        }
    }

    /// Width in pixels
    #[inline]
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels
    #[inline]
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// `(width, height)`
    #[inline]
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Pixel at `(x, y)`, `None` when out of bounds
    #[inline]
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> Option<u32> {
        self.offset(x, y).map(|i| self.pixels[i])
    }

    /// Overwrite the pixel at `(x, y)`; out-of-bounds writes are ignored
    #[inline]
    pub fn set(&mut self, x: u32, y: u32, argb: u32) {
        if let Some(i) = self.offset(x, y) {
            self.pixels[i] = argb;
        }
    }

    /// Row-major pixel slice
    #[inline]
    #[must_use]
    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    /// Number of defined (non-transparent) pixels
    #[must_use]
    pub fn defined_count(&self) -> usize {
        self.pixels.iter().filter(|&&p| is_defined(p)).count()
    }

    /// Overwrite every pixel defined in `delta`; all others stay untouched
    ///
    /// Returns the number of pixels copied from the delta.
    ///
    /// # Errors
    /// - `CanvasError::DimensionMismatch` if `delta` has a different shape
    pub fn apply_delta(&mut self, delta: &Bitmap) -> Result<usize, CanvasError> {
        if delta.dimensions() != self.dimensions() {
            return Err(CanvasError::dimension_mismatch(
                self.dimensions(),
                delta.dimensions(),
            ));
        }

        let mut written = 0;
        for (dst, &src) in self.pixels.iter_mut().zip(&delta.pixels) {
            if is_defined(src) {
                *dst = src;
                written += 1;
            }
        }
        Ok(written)
    }

    fn offset(&self, x: u32, y: u32) -> Option<usize> {
        (x < self.width && y < self.height).then(|| y as usize * self.width as usize + x as usize)
    }
}

/// A pixel takes part in a delta or target when its alpha is non-zero
#[inline]
#[must_use]
pub fn is_defined(argb: u32) -> bool {
    argb >> 24 != 0
}
