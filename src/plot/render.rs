//! Heatmap rasterisation
//!
//! Time runs left to right, particle diameter bottom to top, both linear.
//! Counts are coloured with viridis from 0 to `vmax`; columns without data
//! are left white.

use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use std::path::Path;

use crate::telegram::BIN_COUNT;

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);

/// Viridis colour map, evenly spaced stops from 0 to 1
const VIRIDIS: [[u8; 3]; 10] = [
    [0x44, 0x01, 0x54],
    [0x48, 0x28, 0x78],
    [0x3e, 0x49, 0x89],
    [0x31, 0x68, 0x8e],
    [0x26, 0x82, 0x8e],
    [0x1f, 0x9e, 0x89],
    [0x35, 0xb7, 0x79],
    [0x6e, 0xce, 0x58],
    [0xb5, 0xde, 0x2b],
    [0xfd, 0xe7, 0x25],
];

/// One time slice of the heatmap, covering `start..end` seconds
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub start: i64,
    pub end: i64,
    pub values: Option<[f32; BIN_COUNT]>,
}

#[derive(Debug, Clone)]
pub struct Heatmap {
    /// Sorted by start time, non-overlapping
    columns: Vec<Column>,
    /// Bin diameters, increasing
    diameters: Vec<f32>,
    vmax: f32,
}

impl Heatmap {
    /// With `vmax == None` the colour scale ends at the largest value
    pub fn new(columns: Vec<Column>, diameters: Vec<f32>, vmax: Option<f32>) -> Self {
        let vmax = vmax.unwrap_or_else(|| {
            columns
                .iter()
                .filter_map(|c| c.values.as_ref())
                .flat_map(|v| v.iter().copied())
                .fold(0.0, f32::max)
        });
        Self {
            columns,
            diameters,
            vmax,
        }
    }

    pub fn vmax(&self) -> f32 {
        self.vmax
    }

    /// Column covering time `t`
    fn column_at(&self, t: f64) -> Option<&Column> {
        let idx = self.columns.partition_point(|c| (c.start as f64) <= t);
        let column = self.columns.get(idx.checked_sub(1)?)?;
        ((t as i64) < column.end).then_some(column)
    }

    /// Bin whose diameter is nearest to `d`
    fn bin_at(&self, d: f32) -> usize {
        let idx = self.diameters.partition_point(|&x| x < d);
        match idx {
            0 => 0,
            i if i >= self.diameters.len() => self.diameters.len() - 1,
            i if d - self.diameters[i - 1] < self.diameters[i] - d => i - 1,
            i => i,
        }
    }

    pub fn render(&self, width: u32, height: u32) -> RgbImage {
        let (Some(first), Some(last)) = (self.columns.first(), self.columns.last()) else {
            return RgbImage::from_pixel(width, height, BACKGROUND);
        };
        let (Some(&d_min), Some(&d_max)) = (self.diameters.first(), self.diameters.last()) else {
            return RgbImage::from_pixel(width, height, BACKGROUND);
        };
        let t0 = first.start as f64;
        let span = (last.end - first.start).max(1) as f64;

        let bins: Vec<usize> = (0..height)
            .map(|y| {
                let frac = (f64::from(height - 1 - y) + 0.5) / f64::from(height);
                self.bin_at(d_min + (d_max - d_min) * frac as f32)
            })
            .collect();

        RgbImage::from_fn(width, height, |x, y| {
            let t = t0 + (f64::from(x) + 0.5) / f64::from(width) * span;
            match self.column_at(t).and_then(|c| c.values.as_ref()) {
                Some(values) => colormap(values[bins[y as usize]] / self.vmax),
                None => BACKGROUND,
            }
        })
    }
}

/// Viridis colour for `v` in 0..=1; out-of-range values are clamped
pub fn colormap(v: f32) -> Rgb<u8> {
    let v = if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
    let pos = v * (VIRIDIS.len() - 1) as f32;
    let lo = (pos.floor() as usize).min(VIRIDIS.len() - 2);
    let frac = pos - lo as f32;
    let mix = |a: u8, b: u8| (f32::from(a) + (f32::from(b) - f32::from(a)) * frac).round() as u8;
    let (a, b) = (VIRIDIS[lo], VIRIDIS[lo + 1]);
    Rgb([mix(a[0], b[0]), mix(a[1], b[1]), mix(a[2], b[2])])
}

/// Write an image as PNG
pub fn save(image: &RgbImage, path: &Path) -> Result<()> {
    image
        .save(path)
        .with_context(|| format!("failed to write image {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diameters() -> Vec<f32> {
        (0..BIN_COUNT).map(|i| (i + 1) as f32 * 1e-6).collect()
    }

    #[test]
    fn test_colormap_ends() {
        assert_eq!(colormap(0.0), Rgb([0x44, 0x01, 0x54]));
        assert_eq!(colormap(1.0), Rgb([0xfd, 0xe7, 0x25]));
        assert_eq!(colormap(7.0), colormap(1.0));
        assert_eq!(colormap(-1.0), colormap(0.0));
        assert_eq!(colormap(f32::NAN), colormap(0.0));
    }

    #[test]
    fn test_auto_vmax() {
        let mut values = [0.0; BIN_COUNT];
        values[5] = 12.0;
        let heatmap = Heatmap::new(
            vec![Column { start: 0, end: 1, values: Some(values) }],
            diameters(),
            None,
        );
        assert_eq!(heatmap.vmax(), 12.0);
    }

    #[test]
    fn test_render_gap_is_background() {
        let columns = vec![
            Column { start: 0, end: 60, values: Some([10.0; BIN_COUNT]) },
            Column { start: 60, end: 120, values: None },
            Column { start: 120, end: 180, values: Some([0.0; BIN_COUNT]) },
        ];
        let image = Heatmap::new(columns, diameters(), Some(10.0)).render(30, 8);

        assert_eq!(image.dimensions(), (30, 8));
        assert_eq!(*image.get_pixel(2, 4), colormap(1.0));
        assert_eq!(*image.get_pixel(15, 4), BACKGROUND);
        assert_eq!(*image.get_pixel(28, 4), colormap(0.0));
    }

    #[test]
    fn test_render_diameter_axis() {
        // Only the largest bin has counts: it shows at the top row only
        let mut values = [0.0; BIN_COUNT];
        values[BIN_COUNT - 1] = 1.0;
        let columns = vec![Column { start: 0, end: 1, values: Some(values) }];
        let image = Heatmap::new(columns, diameters(), None).render(4, 64);

        assert_eq!(*image.get_pixel(0, 0), colormap(1.0));
        assert_eq!(*image.get_pixel(0, 63), colormap(0.0));
    }

    #[test]
    fn test_render_empty() {
        let image = Heatmap::new(Vec::new(), diameters(), None).render(5, 5);
        assert!(image.pixels().all(|p| *p == BACKGROUND));
    }
}
