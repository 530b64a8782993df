//! End-to-end verification of one drawn answer.

use std::path::Path;

use image::{DynamicImage, GrayImage};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::VerifierConfig;
use crate::contour::trace_shapes;
use crate::deskew::deskew;
use crate::error::{Result, VisionError};
use crate::fit::{fit_outline, roundness_residual};
use crate::preprocess::extract_ink;
use crate::score::{accuracy, evaluate, render_feedback, Measurement};
use crate::shape::{distance, DetectedShape, ExpectedVisualAnswer, GeometricAccuracy, ShapeType};

/// Feedback returned when the image holds no recognisable shape.
pub const NO_SHAPE_FEEDBACK: &str = "no shape detected";

/// Verifier output, also the JSON contract for out-of-process verifiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualVerification {
    pub confidence: f64,
    pub feedback: String,
    #[serde(default)]
    pub geometric_accuracy: Option<GeometricAccuracy>,
    #[serde(default)]
    pub detected_shapes: Vec<DetectedShape>,
}

impl VisualVerification {
    pub fn no_shape() -> Self {
        Self {
            confidence: 0.0,
            feedback: NO_SHAPE_FEEDBACK.to_string(),
            geometric_accuracy: None,
            detected_shapes: Vec::new(),
        }
    }

    /// Zero-confidence result for an image that could not be analysed.
    pub fn unreadable(reason: impl Into<String>) -> Self {
        Self {
            confidence: 0.0,
            feedback: reason.into(),
            geometric_accuracy: None,
            detected_shapes: Vec::new(),
        }
    }

    /// Parse and range-check verifier output.
    pub fn from_json(raw: &str) -> Result<Self> {
        let parsed: Self = serde_json::from_str(raw.trim())
            .map_err(|e| VisionError::MalformedOutput(e.to_string()))?;
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject values outside their documented ranges.
    pub fn validate(&self) -> Result<()> {
        unit_interval("confidence", self.confidence)?;
        if let Some(acc) = &self.geometric_accuracy {
            unit_interval("overall_accuracy", acc.overall_accuracy)?;
            if !acc.scale_factor.is_finite() || acc.scale_factor < 0.0 {
                return Err(malformed(format!("scale_factor out of range: {}", acc.scale_factor)));
            }
            let rot = acc.rotation_angle_degrees;
            if !rot.is_finite() || rot <= -180.0 || rot > 180.0 {
                return Err(malformed(format!("rotation_angle_degrees out of range: {rot}")));
            }
            if !acc.position_error.is_finite() || acc.position_error < 0.0 {
                return Err(malformed(format!(
                    "position_error out of range: {}",
                    acc.position_error
                )));
            }
        }
        for shape in &self.detected_shapes {
            unit_interval("detection_confidence", shape.detection_confidence)?;
            if shape.vertices.iter().flatten().any(|c| !c.is_finite()) {
                return Err(malformed("detected vertex is not finite".to_string()));
            }
        }
        Ok(())
    }
}

fn malformed(msg: String) -> VisionError {
    VisionError::MalformedOutput(msg)
}

fn unit_interval(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(malformed(format!("{name} must be within [0, 1], got {value}")))
    }
}

/// Detects drawn shapes on graph paper and scores them against an expected answer.
#[derive(Debug, Clone, Default)]
pub struct GeometryVerifier {
    config: VerifierConfig,
}

impl GeometryVerifier {
    pub fn new(config: VerifierConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    /// Verify the image at `path`. An unreadable file yields a zero-confidence
    /// result rather than an error.
    pub fn verify_path(
        &self,
        path: &Path,
        expected: &ExpectedVisualAnswer,
        grid_spacing: f64,
    ) -> Result<VisualVerification> {
        check_request(expected, grid_spacing)?;
        match image::open(path) {
            Ok(img) => self.verify_image(&img, expected, grid_spacing),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "image could not be read");
                Ok(VisualVerification::unreadable(format!(
                    "image could not be read: {e}"
                )))
            }
        }
    }

    pub fn verify_image(
        &self,
        img: &DynamicImage,
        expected: &ExpectedVisualAnswer,
        grid_spacing: f64,
    ) -> Result<VisualVerification> {
        self.verify_gray(&img.to_luma8(), expected, grid_spacing)
    }

    pub fn verify_gray(
        &self,
        gray: &GrayImage,
        expected: &ExpectedVisualAnswer,
        grid_spacing: f64,
    ) -> Result<VisualVerification> {
        check_request(expected, grid_spacing)?;
        match self.trace(gray, grid_spacing) {
            Ok(shapes) if shapes.is_empty() => Ok(VisualVerification::no_shape()),
            Ok(shapes) => score_shapes(&shapes, expected),
            Err(reason) => Ok(VisualVerification::unreadable(reason)),
        }
    }

    /// Detect every shape in `gray`, in grid units.
    pub fn detect_shapes(&self, gray: &GrayImage, grid_spacing: f64) -> Result<Vec<DetectedShape>> {
        check_spacing(grid_spacing)?;
        Ok(self.trace(gray, grid_spacing).unwrap_or_default())
    }

    /// `Err` carries the feedback for an image that cannot be analysed.
    fn trace(&self, gray: &GrayImage, grid_spacing: f64) -> std::result::Result<Vec<DetectedShape>, String> {
        if gray.width() == 0 || gray.height() == 0 {
            return Err("image is empty".to_string());
        }
        let page = deskew(gray, &self.config);
        let ink = extract_ink(&page.image, grid_spacing, &self.config);
        if ink.ink_fraction > self.config.max_ink_fraction {
            return Err(format!(
                "image could not be read: {:.0}% of the page is ink",
                ink.ink_fraction * 100.0
            ));
        }

        let shapes: Vec<DetectedShape> = trace_shapes(&ink.mask, &self.config)
            .into_iter()
            .map(|t| {
                let vertices = t.polygon_px.iter().map(|p| ink.grid.to_grid(*p)).collect();
                let (center, radius) = if t.shape_type == ShapeType::Circle {
                    (
                        Some(ink.grid.to_grid(t.center_px)),
                        Some(t.radius_px / grid_spacing),
                    )
                } else {
                    (None, None)
                };
                DetectedShape {
                    shape_type: t.shape_type,
                    vertices,
                    detection_confidence: t.fit_quality,
                    center,
                    radius,
                }
            })
            .collect();
        debug!(detected = shapes.len(), "shapes traced");
        Ok(shapes)
    }
}

fn check_spacing(grid_spacing: f64) -> Result<()> {
    if grid_spacing.is_finite() && grid_spacing > 0.0 {
        Ok(())
    } else {
        Err(VisionError::InvalidGridSpacing(grid_spacing))
    }
}

fn check_request(expected: &ExpectedVisualAnswer, grid_spacing: f64) -> Result<()> {
    check_spacing(grid_spacing)?;
    expected.validate()
}

/// Select the best match among `shapes` and score it against `expected`.
pub fn score_shapes(
    shapes: &[DetectedShape],
    expected: &ExpectedVisualAnswer,
) -> Result<VisualVerification> {
    expected.validate()?;
    let Some(selected) = select(shapes, expected) else {
        return Ok(VisualVerification::no_shape());
    };

    let Some(m) = measure(selected, expected) else {
        return Ok(VisualVerification {
            confidence: 0.0,
            feedback: format!("detected {} is degenerate and cannot be fitted", selected.shape_type),
            geometric_accuracy: None,
            detected_shapes: shapes.to_vec(),
        });
    };

    let checks = evaluate(&m, &expected.tolerance);
    let geometric_accuracy = accuracy(&m, &checks);
    let feedback = render_feedback(&checks, expected.shape_type, selected.shape_type);
    debug!(
        expected = %expected.shape_type,
        detected = %selected.shape_type,
        overall = geometric_accuracy.overall_accuracy,
        "shape scored"
    );

    Ok(VisualVerification {
        confidence: geometric_accuracy.overall_accuracy,
        feedback,
        geometric_accuracy: Some(geometric_accuracy),
        detected_shapes: shapes.to_vec(),
    })
}

/// Same-family shapes first, by exact vertex count then closest area;
/// otherwise the shape with the smallest fitting residual.
fn select<'a>(shapes: &'a [DetectedShape], expected: &ExpectedVisualAnswer) -> Option<&'a DetectedShape> {
    let expected_area = expected.area();
    let exact_count = |s: &DetectedShape| {
        expected.vertices.is_empty() || s.vertices.len() == expected.vertices.len()
    };

    let same_family = shapes
        .iter()
        .filter(|s| expected.shape_type.accepts(s.shape_type))
        .min_by(|a, b| {
            exact_count(b)
                .cmp(&exact_count(a))
                .then((a.area() - expected_area).abs().total_cmp(&(b.area() - expected_area).abs()))
        });
    if same_family.is_some() {
        return same_family;
    }

    shapes
        .iter()
        .min_by(|a, b| fit_residual(a, expected).total_cmp(&fit_residual(b, expected)))
}

/// Fitting residual normalised by the expected shape's size.
fn fit_residual(shape: &DetectedShape, expected: &ExpectedVisualAnswer) -> f64 {
    if expected.shape_type == ShapeType::Circle {
        return shape
            .circle_estimate()
            .map(|(c, r)| roundness_residual(&shape.vertices, c, r))
            .unwrap_or(f64::INFINITY);
    }
    let size = expected.area().sqrt().max(f64::EPSILON);
    fit_outline(&expected.vertices, &shape.vertices)
        .map(|fit| fit.rms / size)
        .unwrap_or(f64::INFINITY)
}

fn measure(shape: &DetectedShape, expected: &ExpectedVisualAnswer) -> Option<Measurement> {
    if let (ShapeType::Circle, Some(center), Some(radius)) =
        (expected.shape_type, expected.center, expected.radius)
    {
        let (c, r) = shape.circle_estimate()?;
        return Some(Measurement {
            scale_factor: r / radius,
            rotation_degrees: 0.0,
            position_error: distance(c, center),
            rotation_applicable: false,
        });
    }
    let fit = fit_outline(&expected.vertices, &shape.vertices)?;
    Some(Measurement {
        scale_factor: fit.scale,
        rotation_degrees: fit.rotation_degrees(),
        position_error: fit.centroid_offset(),
        rotation_applicable: true,
    })
}
