//! Tuning knobs for the image pipeline.

use serde::{Deserialize, Serialize};

/// Configuration for [`crate::GeometryVerifier`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    /// Largest page skew, in degrees, that is corrected before thresholding.
    /// Zero disables deskewing.
    pub max_skew_degrees: f64,
    /// Upper bound on the ink threshold; Otsu's level is clamped to it.
    pub max_ink_level: u8,
    /// Fraction of a row/column that must be ink for it to be a grid-line candidate.
    pub grid_line_coverage: f64,
    /// Relative slack when matching line gaps against the expected grid spacing.
    pub grid_spacing_tolerance: f64,
    /// Gray levels below a grid line's own level at which a pixel on that
    /// line counts as a drawn stroke.
    pub stroke_contrast: u8,
    /// Radius (L∞) of the morphological close applied after grid suppression.
    pub close_radius: u8,
    /// Contours enclosing fewer square pixels than this are ignored.
    pub min_contour_area_px: f64,
    /// Douglas–Peucker epsilon as a fraction of the contour perimeter.
    pub dp_epsilon_ratio: f64,
    /// Contours with `4π·area/perimeter²` at or above this are circles.
    pub circularity_threshold: f64,
    /// A quadrilateral whose corners all lie within this many degrees of a
    /// right angle is classified as a rectangle.
    pub right_angle_tolerance_degrees: f64,
    /// Images with more ink than this fraction are treated as unreadable.
    pub max_ink_fraction: f64,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            max_skew_degrees: 10.0,
            max_ink_level: 200,
            grid_line_coverage: 0.6,
            grid_spacing_tolerance: 0.2,
            stroke_contrast: 48,
            close_radius: 2,
            min_contour_area_px: 64.0,
            dp_epsilon_ratio: 0.02,
            circularity_threshold: 0.92,
            right_angle_tolerance_degrees: 15.0,
            max_ink_fraction: 0.5,
        }
    }
}
