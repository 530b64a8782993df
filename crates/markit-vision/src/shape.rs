//! Shape model shared by the detector, the fitter and the verifier output.
//!
//! All coordinates in this module are grid units unless a name says `_px`.
//! The grid frame follows the image frame: x grows to the right, y grows down.

use serde::{Deserialize, Serialize};

use crate::error::{Result, VisionError};

/// A point in grid units.
pub type GridPoint = [f64; 2];

/// Classified shape family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShapeType {
    Triangle,
    Quadrilateral,
    /// A quadrilateral whose corners are all close to right angles.
    Rectangle,
    Pentagon,
    Hexagon,
    /// Any polygon with seven or more vertices.
    Polygon,
    Circle,
}

impl ShapeType {
    /// Shape family implied by a simplified polygon's vertex count.
    pub fn from_vertex_count(count: usize) -> Option<Self> {
        match count {
            0..=2 => None,
            3 => Some(Self::Triangle),
            4 => Some(Self::Quadrilateral),
            5 => Some(Self::Pentagon),
            6 => Some(Self::Hexagon),
            _ => Some(Self::Polygon),
        }
    }

    /// Exact vertex count this family requires, if it fixes one.
    pub fn required_vertices(self) -> Option<usize> {
        match self {
            Self::Triangle => Some(3),
            Self::Quadrilateral | Self::Rectangle => Some(4),
            Self::Pentagon => Some(5),
            Self::Hexagon => Some(6),
            Self::Polygon | Self::Circle => None,
        }
    }

    pub fn is_polygonal(self) -> bool {
        !matches!(self, Self::Circle)
    }

    /// Whether a detected shape of family `detected` satisfies an expected
    /// family of `self`. A generic `polygon` accepts any polygonal detection
    /// and a `quadrilateral` accepts a `rectangle`.
    pub fn accepts(self, detected: ShapeType) -> bool {
        match self {
            Self::Polygon => detected.is_polygonal(),
            Self::Quadrilateral => matches!(detected, Self::Quadrilateral | Self::Rectangle),
            _ => self == detected,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Triangle => "triangle",
            Self::Quadrilateral => "quadrilateral",
            Self::Rectangle => "rectangle",
            Self::Pentagon => "pentagon",
            Self::Hexagon => "hexagon",
            Self::Polygon => "polygon",
            Self::Circle => "circle",
        }
    }
}

impl std::fmt::Display for ShapeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Allowed deviation per geometric dimension.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tolerance {
    /// Maximum `|scale - 1|`.
    pub scale: f64,
    /// Maximum absolute rotation in degrees.
    #[serde(alias = "rotation")]
    pub rotation_degrees: f64,
    /// Maximum centroid displacement in grid units.
    pub position: f64,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self {
            scale: 0.1,
            rotation_degrees: 5.0,
            position: 1.0,
        }
    }
}

impl Tolerance {
    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("scale", self.scale),
            ("rotation_degrees", self.rotation_degrees),
            ("position", self.position),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(VisionError::InvalidExpectedAnswer(format!(
                    "tolerance.{name} must be a non-negative number, got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// The shape a question expects the student to draw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectedVisualAnswer {
    pub shape_type: ShapeType,
    /// Ordered vertices in grid units. Empty for circles.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vertices: Vec<GridPoint>,
    /// Circle center in grid units.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub center: Option<GridPoint>,
    /// Circle radius in grid units.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius: Option<f64>,
    #[serde(default)]
    pub tolerance: Tolerance,
}

impl ExpectedVisualAnswer {
    /// Expected polygonal answer.
    pub fn polygon(shape_type: ShapeType, vertices: Vec<GridPoint>, tolerance: Tolerance) -> Self {
        Self {
            shape_type,
            vertices,
            center: None,
            radius: None,
            tolerance,
        }
    }

    /// Expected circle.
    pub fn circle(center: GridPoint, radius: f64, tolerance: Tolerance) -> Self {
        Self {
            shape_type: ShapeType::Circle,
            vertices: Vec::new(),
            center: Some(center),
            radius: Some(radius),
            tolerance,
        }
    }

    /// Check that the answer is internally consistent.
    pub fn validate(&self) -> Result<()> {
        self.tolerance.validate()?;

        if self.shape_type == ShapeType::Circle {
            let center = self.center.ok_or_else(|| {
                VisionError::InvalidExpectedAnswer("circle requires a center".to_string())
            })?;
            if !center.iter().all(|c| c.is_finite()) {
                return Err(VisionError::InvalidExpectedAnswer(
                    "circle center must be finite".to_string(),
                ));
            }
            match self.radius {
                Some(r) if r.is_finite() && r > 0.0 => return Ok(()),
                _ => {
                    return Err(VisionError::InvalidExpectedAnswer(
                        "circle requires a positive radius".to_string(),
                    ))
                }
            }
        }

        if self.vertices.iter().flatten().any(|c| !c.is_finite()) {
            return Err(VisionError::InvalidExpectedAnswer(
                "vertices must be finite".to_string(),
            ));
        }
        if self.vertices.len() < 3 {
            return Err(VisionError::InvalidExpectedAnswer(format!(
                "{} requires at least 3 vertices, got {}",
                self.shape_type,
                self.vertices.len()
            )));
        }
        if let Some(required) = self.shape_type.required_vertices() {
            if self.vertices.len() != required {
                return Err(VisionError::InvalidExpectedAnswer(format!(
                    "{} requires {} vertices, got {}",
                    self.shape_type,
                    required,
                    self.vertices.len()
                )));
            }
        }
        if polygon_area(&self.vertices) <= f64::EPSILON {
            return Err(VisionError::InvalidExpectedAnswer(
                "vertices enclose no area".to_string(),
            ));
        }
        Ok(())
    }

    /// Enclosed area in square grid units.
    pub fn area(&self) -> f64 {
        match (self.shape_type, self.radius) {
            (ShapeType::Circle, Some(r)) => std::f64::consts::PI * r * r,
            _ => polygon_area(&self.vertices),
        }
    }
}

/// A shape found in the image, already converted to grid units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedShape {
    #[serde(rename = "type")]
    pub shape_type: ShapeType,
    /// Simplified outline vertices in traversal order.
    pub vertices: Vec<GridPoint>,
    /// How well the simplified outline explains the traced contour, in [0, 1].
    #[serde(alias = "confidence")]
    pub detection_confidence: f64,
    /// Fitted center, present for circles.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub center: Option<GridPoint>,
    /// Fitted radius, present for circles.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius: Option<f64>,
}

impl DetectedShape {
    pub fn area(&self) -> f64 {
        match (self.shape_type, self.radius) {
            (ShapeType::Circle, Some(r)) => std::f64::consts::PI * r * r,
            _ => polygon_area(&self.vertices),
        }
    }

    /// Center and radius of the circle that best explains this shape.
    ///
    /// Circles report their fitted values; polygons fall back to the vertex
    /// centroid and mean vertex distance.
    pub fn circle_estimate(&self) -> Option<(GridPoint, f64)> {
        if let (Some(center), Some(radius)) = (self.center, self.radius) {
            return Some((center, radius));
        }
        let center = centroid(&self.vertices)?;
        let radius = self
            .vertices
            .iter()
            .map(|v| distance(*v, center))
            .sum::<f64>()
            / self.vertices.len() as f64;
        Some((center, radius))
    }
}

/// Similarity-transform measurements of the selected shape.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeometricAccuracy {
    pub scale_factor: f64,
    /// Rotation in degrees, normalized to (-180, 180].
    #[serde(alias = "rotation_angle")]
    pub rotation_angle_degrees: f64,
    /// Centroid displacement in grid units.
    pub position_error: f64,
    /// Fraction of applicable dimensions within tolerance.
    pub overall_accuracy: f64,
}

/// Absolute polygon area by the shoelace formula.
pub fn polygon_area(points: &[GridPoint]) -> f64 {
    signed_area(points).abs()
}

/// Signed shoelace area; the sign encodes winding direction.
pub fn signed_area(points: &[GridPoint]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut acc = 0.0;
    for (i, p) in points.iter().enumerate() {
        let q = points[(i + 1) % points.len()];
        acc += p[0] * q[1] - q[0] * p[1];
    }
    acc / 2.0
}

/// Mean of a point set.
pub fn centroid(points: &[GridPoint]) -> Option<GridPoint> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as f64;
    let (sx, sy) = points
        .iter()
        .fold((0.0, 0.0), |(sx, sy), p| (sx + p[0], sy + p[1]));
    Some([sx / n, sy / n])
}

pub fn distance(a: GridPoint, b: GridPoint) -> f64 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt()
}

/// Interior angle at each vertex of a closed polygon, in degrees. `None` if
/// two consecutive vertices coincide.
pub fn interior_angles(vertices: &[GridPoint]) -> Option<Vec<f64>> {
    let n = vertices.len();
    (0..n)
        .map(|i| {
            let p = vertices[i];
            let prev = vertices[(i + n - 1) % n];
            let next = vertices[(i + 1) % n];
            let (ax, ay) = (prev[0] - p[0], prev[1] - p[1]);
            let (bx, by) = (next[0] - p[0], next[1] - p[1]);
            let norms = ax.hypot(ay) * bx.hypot(by);
            if norms <= f64::EPSILON {
                return None;
            }
            Some(((ax * bx + ay * by) / norms).clamp(-1.0, 1.0).acos().to_degrees())
        })
        .collect()
}

/// Whether a four-vertex outline has every corner within
/// `tolerance_degrees` of a right angle.
pub fn is_rectangle(vertices: &[GridPoint], tolerance_degrees: f64) -> bool {
    vertices.len() == 4
        && interior_angles(vertices)
            .is_some_and(|angles| angles.iter().all(|a| (a - 90.0).abs() < tolerance_degrees))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> ExpectedVisualAnswer {
        ExpectedVisualAnswer::polygon(
            ShapeType::Triangle,
            vec![[2.0, 2.0], [4.0, 6.0], [7.0, 3.0]],
            Tolerance::default(),
        )
    }

    #[test]
    fn test_shape_type_from_vertex_count() {
        assert_eq!(ShapeType::from_vertex_count(2), None);
        assert_eq!(ShapeType::from_vertex_count(3), Some(ShapeType::Triangle));
        assert_eq!(ShapeType::from_vertex_count(4), Some(ShapeType::Quadrilateral));
        assert_eq!(ShapeType::from_vertex_count(9), Some(ShapeType::Polygon));
    }

    #[test]
    fn test_polygon_accepts_any_polygonal_detection() {
        assert!(ShapeType::Polygon.accepts(ShapeType::Pentagon));
        assert!(!ShapeType::Polygon.accepts(ShapeType::Circle));
        assert!(!ShapeType::Triangle.accepts(ShapeType::Quadrilateral));
    }

    #[test]
    fn test_quadrilateral_accepts_rectangle_but_not_the_reverse() {
        assert!(ShapeType::Quadrilateral.accepts(ShapeType::Rectangle));
        assert!(ShapeType::Polygon.accepts(ShapeType::Rectangle));
        assert!(!ShapeType::Rectangle.accepts(ShapeType::Quadrilateral));
        assert_eq!(ShapeType::Rectangle.required_vertices(), Some(4));
        let parsed: ShapeType = serde_json::from_str("\"rectangle\"").unwrap();
        assert_eq!(parsed, ShapeType::Rectangle);
    }

    #[test]
    fn test_is_rectangle_checks_every_corner() {
        let square = [[0.0, 0.0], [4.0, 0.0], [4.0, 4.0], [0.0, 4.0]];
        assert!(is_rectangle(&square, 15.0));
        // Rotated rectangle, corners still square.
        let tilted = [[0.0, 0.0], [4.0, 2.0], [3.0, 4.0], [-1.0, 2.0]];
        assert!(is_rectangle(&tilted, 15.0));
        // Parallelogram with 60° and 120° corners.
        let sheared = [[0.0, 0.0], [4.0, 0.0], [6.0, 3.464], [2.0, 3.464]];
        assert!(!is_rectangle(&sheared, 15.0));
        assert!(!is_rectangle(&square[..3], 15.0));
        assert!(!is_rectangle(&[[0.0, 0.0], [0.0, 0.0], [4.0, 4.0], [0.0, 4.0]], 15.0));
    }

    #[test]
    fn test_expected_triangle_validates_and_has_area() {
        let t = triangle();
        t.validate().unwrap();
        // |(4-2)(3-2) - (7-2)(6-2)| / 2 = |2 - 20| / 2
        assert!((t.area() - 9.0).abs() < 1e-12);
    }

    #[test]
    fn test_vertex_count_must_match_family() {
        let mut t = triangle();
        t.vertices.push([1.0, 1.0]);
        let err = t.validate().unwrap_err();
        assert!(err.to_string().contains("requires 3 vertices"));
    }

    #[test]
    fn test_circle_requires_positive_radius() {
        let c = ExpectedVisualAnswer::circle([3.0, 3.0], 0.0, Tolerance::default());
        assert!(c.validate().is_err());
        let c = ExpectedVisualAnswer::circle([3.0, 3.0], 2.0, Tolerance::default());
        c.validate().unwrap();
    }

    #[test]
    fn test_negative_tolerance_rejected() {
        let mut t = triangle();
        t.tolerance.position = -1.0;
        assert!(t.validate().is_err());
    }

    #[test]
    fn test_tolerance_accepts_legacy_rotation_key() {
        let t: Tolerance =
            serde_json::from_str(r#"{"scale":0.1,"rotation":5.0,"position":1.0}"#).unwrap();
        assert_eq!(t.rotation_degrees, 5.0);
    }

    #[test]
    fn test_signed_area_flips_with_winding() {
        let pts = vec![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]];
        let mut rev = pts.clone();
        rev.reverse();
        assert!((signed_area(&pts) + signed_area(&rev)).abs() < 1e-12);
    }
}
