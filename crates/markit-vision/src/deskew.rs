//! Page skew estimation and correction.
//!
//! Printed grid lines are the longest straight features on the page. A Hough
//! transform over the ink finds their angle to the nearest degree; a
//! projection-profile search around that angle refines it. The page is then
//! rotated back so the grid is axis-aligned before grid suppression.

use std::borrow::Cow;

use image::{GrayImage, Luma};
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use imageproc::hough::{detect_lines, LineDetectionOptions, PolarLine};
use tracing::debug;

use crate::config::VerifierConfig;
use crate::preprocess::{binarize, ink_threshold};

/// Skews smaller than this are left uncorrected.
pub const MIN_CORRECTION_DEGREES: f64 = 0.2;

/// Half-width of the refinement window around the Hough estimate.
const REFINE_WINDOW_DEGREES: f64 = 1.0;
const REFINE_STEP_DEGREES: f64 = 0.05;
const HOUGH_SUPPRESSION_RADIUS: u32 = 8;

/// A page rotated so its grid is axis-aligned.
#[derive(Debug, Clone)]
pub struct Deskewed<'a> {
    pub image: Cow<'a, GrayImage>,
    /// Measured skew in degrees, clockwise positive in image coordinates.
    pub skew_degrees: f64,
    /// Whether `image` was rotated.
    pub corrected: bool,
}

/// Undo page skew in `gray`. Pages without detectable straight lines, or
/// skewed by less than [`MIN_CORRECTION_DEGREES`], are returned as is.
pub fn deskew<'a>(gray: &'a GrayImage, config: &VerifierConfig) -> Deskewed<'a> {
    let skew_degrees = estimate_skew(gray, config);
    if skew_degrees.abs() < MIN_CORRECTION_DEGREES {
        return Deskewed {
            image: Cow::Borrowed(gray),
            skew_degrees,
            corrected: false,
        };
    }
    // Nearest keeps ink levels intact for thresholding.
    let rotated = rotate_about_center(
        gray,
        (-skew_degrees).to_radians() as f32,
        Interpolation::Nearest,
        Luma([255]),
    );
    debug!(skew_degrees, "page deskewed");
    Deskewed {
        image: Cow::Owned(rotated),
        skew_degrees,
        corrected: true,
    }
}

/// Skew of the page's dominant axis-aligned lines in degrees, or zero when
/// none are found within `config.max_skew_degrees`.
pub fn estimate_skew(gray: &GrayImage, config: &VerifierConfig) -> f64 {
    let max_skew = config.max_skew_degrees;
    let (w, h) = gray.dimensions();
    if max_skew <= 0.0 || w == 0 || h == 0 {
        return 0.0;
    }

    let mask = binarize(gray, ink_threshold(gray, config));
    let options = LineDetectionOptions {
        vote_threshold: ((w.min(h) as f64) * config.grid_line_coverage / 2.0).max(1.0) as u32,
        suppression_radius: HOUGH_SUPPRESSION_RADIUS,
    };
    let mut skews: Vec<f64> = detect_lines(&mask, options)
        .iter()
        .map(axis_skew)
        .filter(|s| s.abs() <= max_skew)
        .collect();
    if skews.is_empty() {
        return 0.0;
    }
    skews.sort_by(f64::total_cmp);
    let coarse = skews[skews.len() / 2];

    let cx = w as f64 / 2.0;
    let cy = h as f64 / 2.0;
    let points: Vec<(f64, f64)> = mask
        .enumerate_pixels()
        .filter(|(_, _, p)| p[0] > 0)
        .map(|(x, y, _)| (x as f64 - cx, y as f64 - cy))
        .collect();
    let reach = cx.hypot(cy).ceil() as usize + 1;

    let steps = (REFINE_WINDOW_DEGREES / REFINE_STEP_DEGREES).round() as i32;
    let mut best = (coarse, f64::NEG_INFINITY);
    for k in -steps..=steps {
        let candidate = coarse + k as f64 * REFINE_STEP_DEGREES;
        if candidate.abs() > max_skew {
            continue;
        }
        let score = profile_sharpness(&points, candidate, reach);
        if score > best.1 {
            best = (candidate, score);
        }
    }
    debug!(coarse, refined = best.0, lines = skews.len(), "page skew estimated");
    best.0
}

/// Deviation of a Hough line from the nearest image axis, in degrees.
///
/// `angle_in_degrees` is the angle of the line's normal, clockwise from the
/// x-axis: 90 for a horizontal line, 0 for a vertical one.
fn axis_skew(line: &PolarLine) -> f64 {
    let theta = f64::from(line.angle_in_degrees);
    if theta < 45.0 {
        theta
    } else if theta < 135.0 {
        theta - 90.0
    } else {
        theta - 180.0
    }
}

/// Sum of squared bin counts of the ink's row and column profiles after
/// rotating the points by `-skew_degrees`. Peaks when grid lines collapse
/// into single bins.
fn profile_sharpness(points: &[(f64, f64)], skew_degrees: f64, reach: usize) -> f64 {
    let (sin, cos) = skew_degrees.to_radians().sin_cos();
    let mut rows = vec![0u32; 2 * reach + 1];
    let mut cols = vec![0u32; 2 * reach + 1];
    let bin = |v: f64| (v.round() + reach as f64).clamp(0.0, (2 * reach) as f64) as usize;
    for &(x, y) in points {
        rows[bin(y * cos - x * sin)] += 1;
        cols[bin(x * cos + y * sin)] += 1;
    }
    rows.iter()
        .chain(cols.iter())
        .map(|&c| f64::from(c) * f64::from(c))
        .sum()
}
