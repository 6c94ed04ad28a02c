//! Target specifications
//!
//! A [`TargetSpec`] is the desired state of one canvas. Transparent target
//! pixels are "don't care"; opaque pixels must be palette colours, anything
//! else is reported once at load time and excluded from matching.

use crate::bitmap::{is_defined, Bitmap};
use crate::error::CanvasError;
use crate::palette::Color;
use crate::CanvasId;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::path::Path;

/// Opaque target pixel whose colour is not in the palette
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownColor {
    pub canvas: CanvasId,
    pub x: u32,
    pub y: u32,
    /// Raw pixel value as `0xAARRGGBB`
    pub argb: u32,
}

impl std::fmt::Display for UnknownColor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "unknown color at ({}, {}, {}): {:08x}",
            self.x, self.y, self.canvas, self.argb
        )
    }
}

/// Matched/contested pixel counts for one or more canvases
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PixelTally {
    /// Target pixels the canvas already shows
    pub good: usize,
    /// Target pixels the canvas shows differently
    pub contested: usize,
    /// Target pixels on canvases with no synchronized state yet
    pub unsynced: usize,
}

impl std::ops::AddAssign for PixelTally {
    fn add_assign(&mut self, rhs: Self) {
        self.good += rhs.good;
        self.contested += rhs.contested;
        self.unsynced += rhs.unsynced;
    }
}

/// Immutable desired bitmap for one canvas
#[derive(Debug, Clone)]
pub struct TargetSpec {
    canvas: CanvasId,
    width: u32,
    height: u32,
    pixels: Vec<Option<Color>>,
}

impl TargetSpec {
    /// Build a target from a decoded bitmap
    ///
    /// Returns the spec and every opaque pixel that could not be mapped to
    /// the palette (those pixels are ignored by the spec).
    #[must_use]
    pub fn from_bitmap(canvas: CanvasId, bitmap: &Bitmap) -> (Self, Vec<UnknownColor>) {
        let width = bitmap.width();
        let mut unknown = Vec::new();

        let pixels = bitmap
            .pixels()
            .iter()
            .enumerate()
            .map(|(i, &argb)| {
                if !is_defined(argb) {
                    return None;
                }
                let color = Color::from_argb(argb);
                if color.is_none() {
                    unknown.push(UnknownColor {
                        canvas,
                        x: i as u32 % width,
                        y: i as u32 / width,
                        argb,
                    });
                }
                color
            })
            .collect();

        let spec = Self {
            canvas,
            width,
            height: bitmap.height(),
            pixels,
        };
        (spec, unknown)
    }

    /// Load `<dir>/<canvas>.png`
    ///
    /// # Errors
    /// - `CanvasError::Io` / `CanvasError::Decode` if the file is unusable
    pub fn load(canvas: CanvasId, dir: &Path) -> Result<(Self, Vec<UnknownColor>), CanvasError> {
        let bitmap = Bitmap::open(&dir.join(format!("{canvas}.png")))?;
        Ok(Self::from_bitmap(canvas, &bitmap))
    }

    /// Canvas this target belongs to
    #[inline]
    #[must_use]
    pub fn canvas(&self) -> CanvasId {
        self.canvas
    }

    /// `(width, height)`
    #[inline]
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Desired colour at `(x, y)`; `None` for ignored or out-of-bounds pixels
    #[must_use]
    pub fn color_at(&self, x: u32, y: u32) -> Option<Color> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels[y as usize * self.width as usize + x as usize]
    }

    /// Number of non-ignored pixels
    #[must_use]
    pub fn required_count(&self) -> usize {
        self.pixels.iter().filter(|p| p.is_some()).count()
    }

    /// Every non-ignored pixel whose current value differs from the target
    ///
    /// Rows are scanned in parallel; output is in row-major order.
    ///
    /// # Errors
    /// - `CanvasError::DimensionMismatch` if `current` has a different shape
    pub fn mismatches(&self, current: &Bitmap) -> Result<Vec<(u32, u32, Color)>, CanvasError> {
        self.check_shape(current)?;
        let width = self.width as usize;

        Ok(self
            .pixels
            .par_chunks(width)
            .zip(current.pixels().par_chunks(width))
            .enumerate()
            .flat_map_iter(|(y, (want_row, have_row))| {
                want_row
                    .iter()
                    .zip(have_row)
                    .enumerate()
                    .filter_map(move |(x, (want, &have))| match want {
                        Some(color) if color.argb() != have => Some((x as u32, y as u32, *color)),
                        _ => None,
                    })
            })
            .collect())
    }

    /// Count matched and contested pixels against `current`
    ///
    /// # Errors
    /// - `CanvasError::DimensionMismatch` if `current` has a different shape
    pub fn tally(&self, current: Option<&Bitmap>) -> Result<PixelTally, CanvasError> {
        let Some(current) = current else {
            return Ok(PixelTally {
                unsynced: self.required_count(),
                ..PixelTally::default()
            });
        };
        self.check_shape(current)?;

        let mut tally = PixelTally::default();
        for (want, &have) in self.pixels.iter().zip(current.pixels()) {
            match want {
                Some(color) if color.argb() == have => tally.good += 1,
                Some(_) => tally.contested += 1,
                None => {}
            }
        }
        Ok(tally)
    }

    fn check_shape(&self, current: &Bitmap) -> Result<(), CanvasError> {
        if current.dimensions() != self.dimensions() {
            return Err(CanvasError::dimension_mismatch(
                self.dimensions(),
                current.dimensions(),
            ));
        }
        Ok(())
    }
}

/// Targets for every canvas, keyed by id
#[derive(Debug, Clone, Default)]
pub struct TargetSet {
    targets: BTreeMap<CanvasId, TargetSpec>,
}

impl TargetSet {
    /// Create from individual targets
    #[must_use]
    pub fn new(targets: impl IntoIterator<Item = TargetSpec>) -> Self {
        Self {
            targets: targets.into_iter().map(|t| (t.canvas, t)).collect(),
        }
    }

    /// Load `<dir>/0.png ..= <dir>/<count-1>.png`
    ///
    /// # Errors
    /// Fails on the first target that cannot be read or decoded.
    pub fn load_dir(dir: &Path, count: u8) -> Result<(Self, Vec<UnknownColor>), CanvasError> {
        let mut targets = Vec::with_capacity(usize::from(count));
        let mut unknown = Vec::new();
        for id in 0..count {
            let (spec, bad) = TargetSpec::load(CanvasId(id), dir)?;
            targets.push(spec);
            unknown.extend(bad);
        }
        Ok((Self::new(targets), unknown))
    }

    /// Target for one canvas
    #[inline]
    #[must_use]
    pub fn get(&self, canvas: CanvasId) -> Option<&TargetSpec> {
        self.targets.get(&canvas)
    }

    /// Iterate targets in canvas order
    pub fn iter(&self) -> impl Iterator<Item = &TargetSpec> {
        self.targets.values()
    }

    /// Canvas ids with a target
    pub fn canvases(&self) -> impl Iterator<Item = CanvasId> + '_ {
        self.targets.keys().copied()
    }

    /// Number of targets
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// True when no targets are loaded
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target_with(pixels: &[(u32, u32, u32)]) -> (TargetSpec, Vec<UnknownColor>) {
        let mut bitmap = Bitmap::transparent(4, 4);
        for &(x, y, argb) in pixels {
            bitmap.set(x, y, argb);
        }
        TargetSpec::from_bitmap(CanvasId(0), &bitmap)
    }

    #[test]
    fn transparent_pixels_are_ignored() {
        let (spec, unknown) = target_with(&[(1, 1, Color::Red.argb())]);
        assert!(unknown.is_empty());
        assert_eq!(spec.required_count(), 1);
        assert_eq!(spec.color_at(1, 1), Some(Color::Red));
        assert_eq!(spec.color_at(0, 0), None);
    }

    #[test]
    fn unknown_colors_are_reported_and_excluded() {
        let (spec, unknown) = target_with(&[(2, 3, 0xFF12_3456), (0, 0, Color::Black.argb())]);
        assert_eq!(
            unknown,
            vec![UnknownColor {
                canvas: CanvasId(0),
                x: 2,
                y: 3,
                argb: 0xFF12_3456
            }]
        );
        assert_eq!(spec.required_count(), 1);
        assert_eq!(spec.color_at(2, 3), None);
    }

    #[test]
    fn mismatches_skip_matching_and_ignored_pixels() {
        let (spec, _) = target_with(&[(0, 0, Color::Red.argb()), (3, 2, Color::Blue.argb())]);
        let mut current = Bitmap::filled(4, 4, Color::White.argb());
        current.set(0, 0, Color::Red.argb());

        assert_eq!(spec.mismatches(&current).unwrap(), vec![(3, 2, Color::Blue)]);
    }

    #[test]
    fn mismatches_on_matching_canvas_is_empty() {
        let (spec, _) = target_with(&[(1, 0, Color::Green.argb()), (2, 2, Color::Pink.argb())]);
        let mut current = Bitmap::filled(4, 4, Color::Black.argb());
        current.set(1, 0, Color::Green.argb());
        current.set(2, 2, Color::Pink.argb());

        assert!(spec.mismatches(&current).unwrap().is_empty());
        // Idempotent: scanning again gives the same empty answer
        assert!(spec.mismatches(&current).unwrap().is_empty());
    }

    #[test]
    fn tally_counts() {
        let (spec, _) = target_with(&[(0, 0, Color::Red.argb()), (1, 0, Color::Blue.argb())]);
        let mut current = Bitmap::filled(4, 4, Color::White.argb());
        current.set(0, 0, Color::Red.argb());

        let tally = spec.tally(Some(&current)).unwrap();
        assert_eq!(tally, PixelTally { good: 1, contested: 1, unsynced: 0 });

        let tally = spec.tally(None).unwrap();
        assert_eq!(tally.unsynced, 2);
    }

    #[test]
    fn load_dir_reads_numbered_files() {
        let dir = tempfile::tempdir().unwrap();
        for id in 0..2u8 {
            let mut image = image::RgbaImage::new(3, 3);
            image.put_pixel(u32::from(id), 0, image::Rgba([0xFF, 0xFF, 0xFF, 0xFF]));
            image.save(dir.path().join(format!("{id}.png"))).unwrap();
        }

        let (set, unknown) = TargetSet::load_dir(dir.path(), 2).unwrap();
        assert!(unknown.is_empty());
        assert_eq!(set.len(), 2);
        assert_eq!(set.get(CanvasId(1)).unwrap().color_at(1, 0), Some(Color::White));
    }

    #[test]
    fn load_dir_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            TargetSet::load_dir(dir.path(), 1),
            Err(CanvasError::Io { .. })
        ));
    }
}
