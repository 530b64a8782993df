//! Closed-contour extraction, polygon simplification and classification.

use image::GrayImage;
use imageproc::contours::{find_contours, BorderType};

use crate::config::VerifierConfig;
use crate::shape::{centroid, distance, is_rectangle, signed_area, GridPoint, ShapeType};

/// Epsilon in pixels for the smoothed outline used by the circularity test.
const SMOOTH_EPSILON_PX: f64 = 1.0;

/// A traced outline in pixel coordinates.
#[derive(Debug, Clone)]
pub struct TracedShape {
    pub shape_type: ShapeType,
    /// Douglas–Peucker vertices in traversal order (pixels).
    pub polygon_px: Vec<[f64; 2]>,
    pub area_px: f64,
    pub perimeter_px: f64,
    pub circularity: f64,
    /// Mean contour point (pixels).
    pub center_px: [f64; 2],
    /// Mean contour distance from `center_px` (pixels).
    pub radius_px: f64,
    /// How well the classification explains the raw contour, in [0, 1].
    pub fit_quality: f64,
}

/// Trace every outer border in `mask` and classify the ones large enough.
pub fn trace_shapes(mask: &GrayImage, config: &VerifierConfig) -> Vec<TracedShape> {
    find_contours::<i32>(mask)
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer)
        .filter_map(|c| {
            let points: Vec<[f64; 2]> = c
                .points
                .iter()
                .map(|p| [p.x as f64, p.y as f64])
                .collect();
            classify(&points, config)
        })
        .collect()
}

/// Classify one closed contour; `None` for specks and degenerate strokes.
pub fn classify(points: &[[f64; 2]], config: &VerifierConfig) -> Option<TracedShape> {
    if points.len() < 3 {
        return None;
    }
    let area_px = signed_area(points).abs();
    if area_px < config.min_contour_area_px {
        return None;
    }

    let raw_perimeter = closed_length(points);
    let smooth = simplify_closed(points, SMOOTH_EPSILON_PX);
    let perimeter_px = closed_length(&smooth).max(f64::EPSILON);
    let circularity = (4.0 * std::f64::consts::PI * area_px / perimeter_px.powi(2)).min(1.0);

    let epsilon = (config.dp_epsilon_ratio * raw_perimeter).max(SMOOTH_EPSILON_PX);
    let polygon_px = simplify_closed(points, epsilon);

    let center_px = centroid(points)?;
    let radii: Vec<f64> = points.iter().map(|p| distance(*p, center_px)).collect();
    let radius_px = radii.iter().sum::<f64>() / radii.len() as f64;

    let (shape_type, mut fit_quality) = if circularity >= config.circularity_threshold {
        let var = radii.iter().map(|r| (r - radius_px).powi(2)).sum::<f64>() / radii.len() as f64;
        let cv = if radius_px > 0.0 { var.sqrt() / radius_px } else { 1.0 };
        (ShapeType::Circle, (1.0 - 5.0 * cv).clamp(0.0, 1.0))
    } else {
        let shape_type = match ShapeType::from_vertex_count(polygon_px.len())? {
            ShapeType::Quadrilateral
                if is_rectangle(&polygon_px, config.right_angle_tolerance_degrees) =>
            {
                ShapeType::Rectangle
            }
            family => family,
        };
        let mean_dev = points
            .iter()
            .map(|p| distance_to_outline(*p, &polygon_px))
            .sum::<f64>()
            / points.len() as f64;
        (shape_type, (1.0 - mean_dev / epsilon).clamp(0.0, 1.0))
    };
    // Small outlines are easily noise.
    if area_px < 4.0 * config.min_contour_area_px {
        fit_quality *= 0.8;
    }

    Some(TracedShape {
        shape_type,
        polygon_px,
        area_px,
        perimeter_px,
        circularity,
        center_px,
        radius_px,
        fit_quality,
    })
}

/// Douglas–Peucker simplification of a closed curve.
///
/// The curve is split at the point farthest from its centroid and at the
/// point farthest from that one; both are true corners for any convex
/// outline. Each half is simplified independently, then a split point is
/// dropped if it turns out to be collinear with its neighbours.
pub fn simplify_closed(points: &[[f64; 2]], epsilon: f64) -> Vec<[f64; 2]> {
    let n = points.len();
    if n < 4 {
        return points.to_vec();
    }
    let Some(c) = centroid(points) else {
        return Vec::new();
    };
    let start = argmax(points, |p| distance(*p, c));
    let ring: Vec<[f64; 2]> = (0..n).map(|i| points[(start + i) % n]).collect();
    let split = argmax(&ring, |p| distance(*p, ring[0]));
    if split == 0 {
        return vec![ring[0]];
    }

    let mut first = Vec::new();
    douglas_peucker(&ring[..=split], epsilon, &mut first);
    let mut second_half: Vec<[f64; 2]> = ring[split..].to_vec();
    second_half.push(ring[0]);
    let mut second = Vec::new();
    douglas_peucker(&second_half, epsilon, &mut second);

    // `first` ends with ring[split], `second` starts with it and ends with ring[0].
    let mut out = first;
    out.extend_from_slice(&second[1..second.len().saturating_sub(1)]);

    // Drop redundant vertices (collinear within epsilon) around the ring.
    let mut changed = true;
    while changed && out.len() > 3 {
        changed = false;
        for i in 0..out.len() {
            let prev = out[(i + out.len() - 1) % out.len()];
            let next = out[(i + 1) % out.len()];
            if point_segment_distance(out[i], prev, next) <= epsilon {
                out.remove(i);
                changed = true;
                break;
            }
        }
    }
    out
}

/// Open-polyline Douglas–Peucker; appends the kept points (both endpoints
/// included) to `out`.
fn douglas_peucker(points: &[[f64; 2]], epsilon: f64, out: &mut Vec<[f64; 2]>) {
    let Some((&first, &last)) = points.first().zip(points.last()) else {
        return;
    };
    let mut max_dist = 0.0;
    let mut index = 0;
    for (i, p) in points.iter().enumerate().take(points.len() - 1).skip(1) {
        let d = point_segment_distance(*p, first, last);
        if d > max_dist {
            max_dist = d;
            index = i;
        }
    }
    if max_dist > epsilon {
        douglas_peucker(&points[..=index], epsilon, out);
        out.pop();
        douglas_peucker(&points[index..], epsilon, out);
    } else {
        out.push(first);
        if points.len() > 1 {
            out.push(last);
        }
    }
}

fn argmax(points: &[[f64; 2]], key: impl Fn(&[f64; 2]) -> f64) -> usize {
    let mut best = 0;
    let mut best_val = f64::NEG_INFINITY;
    for (i, p) in points.iter().enumerate() {
        let v = key(p);
        if v > best_val {
            best_val = v;
            best = i;
        }
    }
    best
}

/// Perimeter of a closed polyline.
pub fn closed_length(points: &[[f64; 2]]) -> f64 {
    let n = points.len();
    if n < 2 {
        return 0.0;
    }
    (0..n).map(|i| distance(points[i], points[(i + 1) % n])).sum()
}

fn point_segment_distance(p: GridPoint, a: GridPoint, b: GridPoint) -> f64 {
    let (dx, dy) = (b[0] - a[0], b[1] - a[1]);
    let len_sq = dx * dx + dy * dy;
    if len_sq <= f64::EPSILON {
        return distance(p, a);
    }
    let t = (((p[0] - a[0]) * dx + (p[1] - a[1]) * dy) / len_sq).clamp(0.0, 1.0);
    distance(p, [a[0] + t * dx, a[1] + t * dy])
}

fn distance_to_outline(p: GridPoint, polygon: &[GridPoint]) -> f64 {
    let n = polygon.len();
    (0..n)
        .map(|i| point_segment_distance(p, polygon[i], polygon[(i + 1) % n]))
        .fold(f64::INFINITY, f64::min)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use imageproc::drawing::{draw_filled_circle_mut, draw_polygon_mut};
    use imageproc::point::Point;

    fn canvas() -> GrayImage {
        GrayImage::new(400, 400)
    }

    fn square_outline(side: usize) -> Vec<[f64; 2]> {
        let s = side as f64;
        let mut pts = Vec::new();
        for i in 0..side {
            pts.push([i as f64, 0.0]);
        }
        for i in 0..side {
            pts.push([s, i as f64]);
        }
        for i in 0..side {
            pts.push([s - i as f64, s]);
        }
        for i in 0..side {
            pts.push([0.0, s - i as f64]);
        }
        pts
    }

    #[test]
    fn test_simplify_square_outline_to_four_corners() {
        let poly = simplify_closed(&square_outline(40), 2.0);
        assert_eq!(poly.len(), 4);
        for corner in [[0.0, 0.0], [40.0, 0.0], [40.0, 40.0], [0.0, 40.0]] {
            assert!(poly.iter().any(|p| distance(*p, corner) < 1e-9));
        }
    }

    #[test]
    fn test_filled_triangle_is_traced_as_triangle() {
        let mut img = canvas();
        draw_polygon_mut(
            &mut img,
            &[Point::new(100, 100), Point::new(200, 300), Point::new(350, 150)],
            Luma([255]),
        );
        let shapes = trace_shapes(&img, &VerifierConfig::default());
        assert_eq!(shapes.len(), 1);
        let s = &shapes[0];
        assert_eq!(s.shape_type, ShapeType::Triangle);
        for corner in [[100.0, 100.0], [200.0, 300.0], [350.0, 150.0]] {
            assert!(
                s.polygon_px.iter().any(|p| distance(*p, corner) < 3.0),
                "missing corner {corner:?} in {:?}",
                s.polygon_px
            );
        }
        assert!(s.fit_quality > 0.5);
    }

    #[test]
    fn test_filled_disc_is_classified_as_circle() {
        let mut img = canvas();
        draw_filled_circle_mut(&mut img, (200, 200), 100, Luma([255]));
        let shapes = trace_shapes(&img, &VerifierConfig::default());
        assert_eq!(shapes.len(), 1);
        let s = &shapes[0];
        assert_eq!(s.shape_type, ShapeType::Circle);
        assert!(distance(s.center_px, [200.0, 200.0]) < 1.0);
        assert!((s.radius_px - 100.0).abs() < 2.0);
    }

    #[test]
    fn test_square_is_not_a_circle() {
        let mut img = canvas();
        draw_polygon_mut(
            &mut img,
            &[
                Point::new(50, 50),
                Point::new(250, 50),
                Point::new(250, 250),
                Point::new(50, 250),
            ],
            Luma([255]),
        );
        let shapes = trace_shapes(&img, &VerifierConfig::default());
        assert_eq!(shapes.len(), 1);
        assert_eq!(shapes[0].shape_type, ShapeType::Rectangle);
        assert!(shapes[0].circularity < 0.85);
    }

    #[test]
    fn test_skewed_quadrilateral_is_not_a_rectangle() {
        let mut img = canvas();
        draw_polygon_mut(
            &mut img,
            &[
                Point::new(50, 50),
                Point::new(250, 50),
                Point::new(330, 250),
                Point::new(130, 250),
            ],
            Luma([255]),
        );
        let shapes = trace_shapes(&img, &VerifierConfig::default());
        assert_eq!(shapes.len(), 1);
        assert_eq!(shapes[0].shape_type, ShapeType::Quadrilateral);
    }

    #[test]
    fn test_specks_are_ignored() {
        let mut img = canvas();
        draw_filled_circle_mut(&mut img, (30, 30), 2, Luma([255]));
        assert!(trace_shapes(&img, &VerifierConfig::default()).is_empty());
    }
}
