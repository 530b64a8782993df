//! Tolerance scoring and feedback for a fitted shape.

use serde::{Deserialize, Serialize};

use crate::shape::{GeometricAccuracy, ShapeType, Tolerance};

/// Slack added to every tolerance comparison so values that sit exactly on
/// the bound after floating-point round-off still pass.
const TOLERANCE_SLACK: f64 = 1e-9;

/// A scored geometric dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Scale,
    Rotation,
    Position,
}

/// Outcome of one dimension against its tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DimensionCheck {
    pub dimension: Dimension,
    /// Measured value as reported (scale factor, signed degrees, grid units).
    pub measured: f64,
    /// Deviation from identity compared against the tolerance.
    pub deviation: f64,
    pub tolerance: f64,
    pub passed: bool,
}

/// Raw similarity measurements before scoring.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub scale_factor: f64,
    pub rotation_degrees: f64,
    pub position_error: f64,
    /// False for circles, whose rotation is undefined.
    pub rotation_applicable: bool,
}

/// Check each applicable dimension against `tolerance`.
pub fn evaluate(m: &Measurement, tolerance: &Tolerance) -> Vec<DimensionCheck> {
    let mut checks = vec![check(
        Dimension::Scale,
        m.scale_factor,
        (m.scale_factor - 1.0).abs(),
        tolerance.scale,
    )];
    if m.rotation_applicable {
        checks.push(check(
            Dimension::Rotation,
            m.rotation_degrees,
            rotation_deviation(m.rotation_degrees),
            tolerance.rotation_degrees,
        ));
    }
    checks.push(check(
        Dimension::Position,
        m.position_error,
        m.position_error.abs(),
        tolerance.position,
    ));
    checks
}

fn check(dimension: Dimension, measured: f64, deviation: f64, tolerance: f64) -> DimensionCheck {
    DimensionCheck {
        dimension,
        measured,
        deviation,
        tolerance,
        passed: deviation.is_finite() && deviation <= tolerance + TOLERANCE_SLACK,
    }
}

/// Shortest angular distance from zero, in degrees.
pub fn rotation_deviation(degrees: f64) -> f64 {
    let d = degrees.rem_euclid(360.0);
    d.min(360.0 - d)
}

/// Fraction of applicable dimensions that passed. The shape family is
/// reported in feedback only and never enters the ratio.
pub fn overall_accuracy(checks: &[DimensionCheck]) -> f64 {
    let applicable = checks.len();
    if applicable == 0 {
        return 0.0;
    }
    let passed = checks.iter().filter(|c| c.passed).count();
    passed as f64 / applicable as f64
}

/// Assemble the scored [`GeometricAccuracy`].
pub fn accuracy(m: &Measurement, checks: &[DimensionCheck]) -> GeometricAccuracy {
    GeometricAccuracy {
        scale_factor: m.scale_factor,
        rotation_angle_degrees: if m.rotation_applicable {
            m.rotation_degrees
        } else {
            0.0
        },
        position_error: m.position_error,
        overall_accuracy: overall_accuracy(checks),
    }
}

/// Human-readable explanation naming every failed dimension.
pub fn render_feedback(
    checks: &[DimensionCheck],
    expected: ShapeType,
    detected: ShapeType,
) -> String {
    let mut parts = Vec::new();
    if !expected.accepts(detected) {
        parts.push(format!("expected a {expected} but detected a {detected}"));
    }
    for c in checks.iter().filter(|c| !c.passed) {
        parts.push(match c.dimension {
            Dimension::Scale => format!(
                "scale factor {:.2} deviates by {:.2} beyond the {:.2} tolerance",
                c.measured, c.deviation, c.tolerance
            ),
            Dimension::Rotation => format!(
                "rotated {:.1}° beyond the {:.1}° tolerance",
                c.deviation, c.tolerance
            ),
            Dimension::Position => format!(
                "displaced {:.2} grid units beyond the {:.2} tolerance",
                c.deviation, c.tolerance
            ),
        });
    }
    if parts.is_empty() {
        format!("shape matches the expected {expected} within tolerance")
    } else {
        parts.join("; ")
    }
}

/// Continuous geometric score in [0, 1].
///
/// Each dimension contributes `max(0, 1 - deviation / tolerance)`, weighted
/// 0.3 scale, 0.3 rotation and 0.4 position. When rotation does not apply
/// its weight is spread proportionally over the other two.
pub fn graded_geometric_confidence(
    accuracy: &GeometricAccuracy,
    tolerance: &Tolerance,
    rotation_applicable: bool,
) -> f64 {
    let mut terms = vec![(
        0.3,
        graded((accuracy.scale_factor - 1.0).abs(), tolerance.scale),
    )];
    if rotation_applicable {
        terms.push((
            0.3,
            graded(
                rotation_deviation(accuracy.rotation_angle_degrees),
                tolerance.rotation_degrees,
            ),
        ));
    }
    terms.push((0.4, graded(accuracy.position_error.abs(), tolerance.position)));

    let total_weight: f64 = terms.iter().map(|(w, _)| w).sum();
    let score = terms.iter().map(|(w, s)| w * s).sum::<f64>() / total_weight;
    score.clamp(0.0, 1.0)
}

fn graded(deviation: f64, tolerance: f64) -> f64 {
    if !deviation.is_finite() {
        return 0.0;
    }
    if tolerance <= 0.0 {
        return if deviation <= TOLERANCE_SLACK { 1.0 } else { 0.0 };
    }
    (1.0 - deviation / tolerance).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn measurement(scale: f64, rotation: f64, position: f64) -> Measurement {
        Measurement {
            scale_factor: scale,
            rotation_degrees: rotation,
            position_error: position,
            rotation_applicable: true,
        }
    }

    #[test]
    fn test_all_dimensions_pass() {
        let m = measurement(1.0, 0.0, 0.0);
        let checks = evaluate(&m, &Tolerance::default());
        assert_eq!(checks.len(), 3);
        assert_eq!(overall_accuracy(&checks), 1.0);
        assert_eq!(
            render_feedback(&checks, ShapeType::Triangle, ShapeType::Triangle),
            "shape matches the expected triangle within tolerance"
        );
    }

    #[test]
    fn test_rotation_failure_is_named() {
        let m = measurement(1.0, 8.0, 0.0);
        let checks = evaluate(&m, &Tolerance::default());
        assert!((overall_accuracy(&checks) - 2.0 / 3.0).abs() < 1e-12);
        let feedback = render_feedback(&checks, ShapeType::Triangle, ShapeType::Triangle);
        assert_eq!(feedback, "rotated 8.0° beyond the 5.0° tolerance");
    }

    #[test]
    fn test_value_on_the_bound_passes() {
        let m = measurement(1.1, -5.0, 1.0);
        let checks = evaluate(&m, &Tolerance::default());
        assert!(checks.iter().all(|c| c.passed), "{checks:?}");
    }

    #[test]
    fn test_rotation_deviation_takes_shortest_direction() {
        assert!((rotation_deviation(-170.0) - 170.0).abs() < 1e-12);
        assert!((rotation_deviation(350.0) - 10.0).abs() < 1e-12);
        assert!((rotation_deviation(-4.0) - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_circle_excludes_rotation() {
        let m = Measurement {
            scale_factor: 1.3,
            rotation_degrees: 0.0,
            position_error: 0.2,
            rotation_applicable: false,
        };
        let checks = evaluate(&m, &Tolerance::default());
        assert_eq!(checks.len(), 2);
        assert_eq!(overall_accuracy(&checks), 0.5);
        let acc = accuracy(&m, &checks);
        assert_eq!(acc.rotation_angle_degrees, 0.0);
    }

    #[test]
    fn test_type_mismatch_is_feedback_only() {
        let m = measurement(1.0, 0.0, 0.0);
        let checks = evaluate(&m, &Tolerance::default());
        assert_eq!(overall_accuracy(&checks), 1.0);
        assert_eq!(accuracy(&m, &checks).overall_accuracy, 1.0);
        let feedback = render_feedback(&checks, ShapeType::Triangle, ShapeType::Quadrilateral);
        assert!(feedback.starts_with("expected a triangle but detected a quadrilateral"));
    }

    #[test]
    fn test_multiple_failures_are_joined() {
        let m = measurement(1.5, 0.0, 3.0);
        let checks = evaluate(&m, &Tolerance::default());
        let feedback = render_feedback(&checks, ShapeType::Triangle, ShapeType::Triangle);
        assert!(feedback.contains("scale factor 1.50"));
        assert!(feedback.contains("; displaced 3.00 grid units"));
    }

    #[test]
    fn test_graded_confidence() {
        let tol = Tolerance::default();
        let perfect = GeometricAccuracy {
            scale_factor: 1.0,
            rotation_angle_degrees: 0.0,
            position_error: 0.0,
            overall_accuracy: 1.0,
        };
        assert!((graded_geometric_confidence(&perfect, &tol, true) - 1.0).abs() < 1e-12);

        let half_rotated = GeometricAccuracy {
            rotation_angle_degrees: 2.5,
            ..perfect
        };
        let score = graded_geometric_confidence(&half_rotated, &tol, true);
        assert!((score - 0.85).abs() < 1e-12);

        // Rotation ignored for circles.
        assert!((graded_geometric_confidence(&half_rotated, &tol, false) - 1.0).abs() < 1e-12);
    }
}
