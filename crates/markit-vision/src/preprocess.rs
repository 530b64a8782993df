//! Binarization and grid-line suppression.
//!
//! Printed grid lines are long, regularly spaced rows and columns of ink.
//! Knowing the spacing, we find them, erase them wherever no drawn stroke
//! touches them, and recover the grid origin from their phase. A stroke
//! traced along a grid line survives when its pen is clearly darker than
//! the printed line.

use image::{GrayImage, Luma};
use imageproc::contrast::otsu_level;
use imageproc::distance_transform::Norm;
use imageproc::morphology::close;
use tracing::debug;

use crate::config::VerifierConfig;
use crate::shape::GridPoint;

/// Mask value for ink pixels.
pub const INK: u8 = 255;

/// Distance in pixels beyond a grid band at which a crossing stroke is looked for.
const STROKE_REACH_PX: usize = 2;

/// Percentile of a band's ink levels taken as the printed line's gray level.
const GRID_LEVEL_PERCENTILE: f64 = 0.9;

/// Pixel ↔ grid mapping recovered from the printed grid.
#[derive(Debug, Clone, PartialEq)]
pub struct GridPrior {
    /// Pixel position of grid coordinate (0, 0).
    pub origin_px: [f64; 2],
    pub spacing_px: f64,
    /// Centers of suppressed horizontal lines (pixel rows).
    pub horizontal_lines: Vec<f64>,
    /// Centers of suppressed vertical lines (pixel columns).
    pub vertical_lines: Vec<f64>,
}

impl GridPrior {
    pub fn to_grid(&self, px: [f64; 2]) -> GridPoint {
        [
            (px[0] - self.origin_px[0]) / self.spacing_px,
            (px[1] - self.origin_px[1]) / self.spacing_px,
        ]
    }
}

/// Binary ink mask with grid lines removed.
#[derive(Debug, Clone)]
pub struct InkMask {
    /// `INK` where a drawn stroke is, 0 elsewhere.
    pub mask: GrayImage,
    pub grid: GridPrior,
    /// Fraction of pixels marked as ink after cleanup.
    pub ink_fraction: f64,
    /// Gray level at or below which a pixel counted as ink.
    pub threshold: u8,
}

/// Threshold `gray`, suppress the grid and close small stroke gaps.
pub fn extract_ink(gray: &GrayImage, grid_spacing: f64, config: &VerifierConfig) -> InkMask {
    let (w, h) = gray.dimensions();
    let threshold = ink_threshold(gray, config);
    let mut mask = binarize(gray, threshold);

    let (row_cov, col_cov) = coverage(&mask);
    let rows = regular_bands(
        line_bands(&row_cov, config.grid_line_coverage),
        grid_spacing,
        config.grid_spacing_tolerance,
    );
    let cols = regular_bands(
        line_bands(&col_cov, config.grid_line_coverage),
        grid_spacing,
        config.grid_spacing_tolerance,
    );

    for &(r0, r1) in &rows {
        suppress_band(&mut mask, gray, (r0, r1), Axis::Row, config.stroke_contrast);
    }
    for &(c0, c1) in &cols {
        suppress_band(&mut mask, gray, (c0, c1), Axis::Column, config.stroke_contrast);
    }

    let mask = if config.close_radius > 0 {
        close(&mask, Norm::LInf, config.close_radius)
    } else {
        mask
    };

    let horizontal_lines: Vec<f64> = rows.iter().map(|&(a, b)| band_center(a, b)).collect();
    let vertical_lines: Vec<f64> = cols.iter().map(|&(a, b)| band_center(a, b)).collect();
    let origin_px = [
        grid_phase(&vertical_lines, grid_spacing),
        grid_phase(&horizontal_lines, grid_spacing),
    ];

    let total = (w as f64 * h as f64).max(1.0);
    let ink = mask.pixels().filter(|p| p[0] == INK).count() as f64;

    debug!(
        threshold,
        horizontal_lines = horizontal_lines.len(),
        vertical_lines = vertical_lines.len(),
        origin_x = origin_px[0],
        origin_y = origin_px[1],
        "ink mask extracted"
    );

    InkMask {
        mask,
        grid: GridPrior {
            origin_px,
            spacing_px: grid_spacing,
            horizontal_lines,
            vertical_lines,
        },
        ink_fraction: ink / total,
        threshold,
    }
}

/// Otsu's level, clamped to the configured ceiling.
pub fn ink_threshold(gray: &GrayImage, config: &VerifierConfig) -> u8 {
    otsu_level(gray).min(config.max_ink_level)
}

/// `INK` wherever `gray` is at or below `threshold`.
pub fn binarize(gray: &GrayImage, threshold: u8) -> GrayImage {
    let (w, h) = gray.dimensions();
    let mut mask = GrayImage::new(w, h);
    for (x, y, p) in gray.enumerate_pixels() {
        if p[0] <= threshold {
            mask.put_pixel(x, y, Luma([INK]));
        }
    }
    mask
}

#[derive(Debug, Clone, Copy)]
enum Axis {
    Row,
    Column,
}

/// Fraction of ink per row and per column.
fn coverage(mask: &GrayImage) -> (Vec<f64>, Vec<f64>) {
    let (w, h) = mask.dimensions();
    let mut rows = vec![0usize; h as usize];
    let mut cols = vec![0usize; w as usize];
    for (x, y, p) in mask.enumerate_pixels() {
        if p[0] == INK {
            rows[y as usize] += 1;
            cols[x as usize] += 1;
        }
    }
    let row_cov = rows.iter().map(|&c| c as f64 / w.max(1) as f64).collect();
    let col_cov = cols.iter().map(|&c| c as f64 / h.max(1) as f64).collect();
    (row_cov, col_cov)
}

/// Group consecutive indices whose coverage reaches `min_coverage` into
/// inclusive `(start, end)` bands.
fn line_bands(coverage: &[f64], min_coverage: f64) -> Vec<(usize, usize)> {
    let mut bands = Vec::new();
    let mut start: Option<usize> = None;
    for (i, &c) in coverage.iter().enumerate() {
        match (c >= min_coverage, start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                bands.push((s, i - 1));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        bands.push((s, coverage.len() - 1));
    }
    bands
}

fn band_center(start: usize, end: usize) -> f64 {
    (start + end) as f64 / 2.0
}

/// Keep only bands that sit a whole number of grid spacings from another band.
fn regular_bands(bands: Vec<(usize, usize)>, spacing: f64, tolerance: f64) -> Vec<(usize, usize)> {
    if spacing <= 0.0 {
        return Vec::new();
    }
    let centers: Vec<f64> = bands.iter().map(|&(a, b)| band_center(a, b)).collect();
    bands
        .iter()
        .enumerate()
        .filter(|(i, _)| {
            centers.iter().enumerate().any(|(j, &cj)| {
                if *i == j {
                    return false;
                }
                let gaps = (centers[*i] - cj).abs() / spacing;
                let k = gaps.round();
                k >= 1.0 && (gaps - k).abs() <= tolerance
            })
        })
        .map(|(_, &band)| band)
        .collect()
}

/// Erase a grid band except where a stroke continues on either side of it
/// or a pixel is at least `contrast` levels darker than the printed line.
fn suppress_band(
    mask: &mut GrayImage,
    gray: &GrayImage,
    (start, end): (usize, usize),
    axis: Axis,
    contrast: u8,
) {
    let (w, h) = mask.dimensions();
    let (along, across) = match axis {
        Axis::Row => (w as usize, h as usize),
        Axis::Column => (h as usize, w as usize),
    };
    let at = |a: usize, c: usize| -> (u32, u32) {
        match axis {
            Axis::Row => (a as u32, c as u32),
            Axis::Column => (c as u32, a as u32),
        }
    };
    let is_ink = |mask: &GrayImage, a: usize, c: usize| -> bool {
        let (x, y) = at(a, c);
        mask.get_pixel(x, y)[0] == INK
    };

    let mut levels: Vec<u8> = (0..along)
        .flat_map(|a| (start..=end).map(move |c| (a, c)))
        .filter(|&(a, c)| is_ink(&*mask, a, c))
        .map(|(a, c)| {
            let (x, y) = at(a, c);
            gray.get_pixel(x, y)[0]
        })
        .collect();
    let Some(line_level) = percentile(&mut levels, GRID_LEVEL_PERCENTILE) else {
        return;
    };
    let stroke_level = line_level.saturating_sub(contrast);

    for a in 0..along {
        let before = start
            .checked_sub(STROKE_REACH_PX)
            .is_some_and(|c| is_ink(mask, a, c));
        let after = end + STROKE_REACH_PX < across && is_ink(mask, a, end + STROKE_REACH_PX);
        if before || after {
            continue;
        }
        for c in start..=end {
            let (x, y) = at(a, c);
            if gray.get_pixel(x, y)[0] < stroke_level {
                continue;
            }
            mask.put_pixel(x, y, Luma([0]));
        }
    }
}

fn percentile(values: &mut [u8], q: f64) -> Option<u8> {
    if values.is_empty() {
        return None;
    }
    values.sort_unstable();
    let idx = ((values.len() - 1) as f64 * q).round() as usize;
    values.get(idx).copied()
}

/// Pixel offset of the first grid line within one spacing period.
fn grid_phase(lines: &[f64], spacing: f64) -> f64 {
    match lines.first() {
        Some(&first) if spacing > 0.0 => first.rem_euclid(spacing),
        _ => 0.0,
    }
}
