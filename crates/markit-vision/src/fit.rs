//! Similarity-transform fitting between an expected and a detected outline.
//!
//! A freehand drawing fixes neither the starting vertex nor the winding, so
//! [`fit_outline`] tries every cyclic shift of the correspondence in both
//! directions and keeps the closed-form Procrustes fit with the lowest
//! residual. Ties go to the smaller absolute rotation so symmetric shapes
//! resolve deterministically.

use nalgebra::{Matrix2, Rotation2, Vector2};

use crate::shape::{centroid, distance, GridPoint};

/// Number of arc-length samples used when vertex counts differ.
pub const RESAMPLE_POINTS: usize = 64;

/// Best similarity transform `dst ≈ s·R(θ)·src + t`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityFit {
    pub scale: f64,
    /// Rotation in radians, in [-π, π].
    pub rotation: f64,
    pub translation: Vector2<f64>,
    /// Sum of squared point distances after the transform.
    pub residual: f64,
    /// Root-mean-square point distance after the transform.
    pub rms: f64,
    pub src_centroid: GridPoint,
    pub dst_centroid: GridPoint,
    /// Cyclic offset into the destination sequence.
    pub shift: usize,
    /// Whether the destination was traversed in reverse.
    pub reversed: bool,
}

impl SimilarityFit {
    /// Rotation in degrees, normalized to (-180, 180].
    pub fn rotation_degrees(&self) -> f64 {
        normalize_degrees(self.rotation.to_degrees())
    }

    /// Distance between the two centroids.
    pub fn centroid_offset(&self) -> f64 {
        distance(self.src_centroid, self.dst_centroid)
    }

    /// Apply the fitted transform to a source point.
    pub fn apply(&self, p: GridPoint) -> GridPoint {
        let r = Rotation2::new(self.rotation);
        let q = r * Vector2::new(p[0], p[1]) * self.scale + self.translation;
        [q.x, q.y]
    }
}

/// Normalize an angle in degrees to (-180, 180].
pub fn normalize_degrees(deg: f64) -> f64 {
    let mut d = deg % 360.0;
    if d <= -180.0 {
        d += 360.0;
    } else if d > 180.0 {
        d -= 360.0;
    }
    d
}

/// Closed-form Procrustes fit for a fixed correspondence `src[i] ↔ dst[i]`.
///
/// Returns `None` when the slices differ in length, are empty, or `src` has
/// no spread (every point coincides).
pub fn procrustes(src: &[GridPoint], dst: &[GridPoint]) -> Option<SimilarityFit> {
    if src.is_empty() || src.len() != dst.len() {
        return None;
    }
    let cs = centroid(src)?;
    let cd = centroid(dst)?;
    let cs_v = Vector2::new(cs[0], cs[1]);
    let cd_v = Vector2::new(cd[0], cd[1]);

    let mut h = Matrix2::<f64>::zeros();
    let mut src_var = 0.0;
    let mut dst_var = 0.0;
    for (s, d) in src.iter().zip(dst) {
        let a = Vector2::new(s[0], s[1]) - cs_v;
        let b = Vector2::new(d[0], d[1]) - cd_v;
        h += a * b.transpose();
        src_var += a.norm_squared();
        dst_var += b.norm_squared();
    }
    if src_var <= f64::EPSILON {
        return None;
    }

    // Maximizing Σ bᵢ·R(θ)aᵢ over θ gives tan θ = cross / dot.
    let dot = h[(0, 0)] + h[(1, 1)];
    let cross = h[(0, 1)] - h[(1, 0)];
    let rotation = cross.atan2(dot);
    let norm_sq = dot * dot + cross * cross;
    let scale = norm_sq.sqrt() / src_var;
    let residual = (dst_var - norm_sq / src_var).max(0.0);
    let translation = cd_v - Rotation2::new(rotation) * cs_v * scale;

    Some(SimilarityFit {
        scale,
        rotation,
        translation,
        residual,
        rms: (residual / src.len() as f64).sqrt(),
        src_centroid: cs,
        dst_centroid: cd,
        shift: 0,
        reversed: false,
    })
}

/// Best fit over all cyclic shifts and both windings of `dst`.
pub fn best_correspondence(src: &[GridPoint], dst: &[GridPoint]) -> Option<SimilarityFit> {
    let n = dst.len();
    if n == 0 || src.len() != n {
        return None;
    }
    let dst_spread: f64 = centroid(dst)
        .map(|c| dst.iter().map(|p| distance(*p, c).powi(2)).sum())
        .unwrap_or(0.0);
    let tie_eps = 1e-9 * (1.0 + dst_spread);

    let mut best: Option<SimilarityFit> = None;
    let mut permuted = Vec::with_capacity(n);
    for reversed in [false, true] {
        for shift in 0..n {
            permuted.clear();
            permuted.extend((0..n).map(|i| {
                let idx = if reversed {
                    (shift + n - i) % n
                } else {
                    (shift + i) % n
                };
                dst[idx]
            }));
            let Some(mut fit) = procrustes(src, &permuted) else {
                continue;
            };
            fit.shift = shift;
            fit.reversed = reversed;

            let better = match &best {
                None => true,
                Some(b) if fit.residual < b.residual - tie_eps => true,
                Some(b) if (fit.residual - b.residual).abs() <= tie_eps => {
                    fit.rotation.abs() < b.rotation.abs() - 1e-12
                }
                Some(_) => false,
            };
            if better {
                best = Some(fit);
            }
        }
    }
    best
}

/// Fit two closed outlines, resampling by arc length when their vertex
/// counts differ.
pub fn fit_outline(expected: &[GridPoint], detected: &[GridPoint]) -> Option<SimilarityFit> {
    if expected.len() == detected.len() {
        return best_correspondence(expected, detected);
    }
    let src = resample_closed(expected, RESAMPLE_POINTS);
    let dst = resample_closed(detected, RESAMPLE_POINTS);
    best_correspondence(&src, &dst)
}

/// Sample `count` points at equal arc-length spacing along a closed polyline,
/// starting at its first vertex.
pub fn resample_closed(points: &[GridPoint], count: usize) -> Vec<GridPoint> {
    if points.len() < 2 || count == 0 {
        return points.to_vec();
    }
    let n = points.len();
    let edges: Vec<f64> = (0..n)
        .map(|i| distance(points[i], points[(i + 1) % n]))
        .collect();
    let perimeter: f64 = edges.iter().sum();
    if perimeter <= f64::EPSILON {
        return vec![points[0]; count];
    }

    let step = perimeter / count as f64;
    let mut out = Vec::with_capacity(count);
    let mut edge = 0;
    let mut walked = 0.0;
    for k in 0..count {
        let target = k as f64 * step;
        while edge < n - 1 && walked + edges[edge] < target {
            walked += edges[edge];
            edge += 1;
        }
        let a = points[edge];
        let b = points[(edge + 1) % n];
        let t = if edges[edge] > 0.0 {
            ((target - walked) / edges[edge]).clamp(0.0, 1.0)
        } else {
            0.0
        };
        out.push([a[0] + (b[0] - a[0]) * t, a[1] + (b[1] - a[1]) * t]);
    }
    out
}

/// Radial RMS deviation of `points` from a circle, relative to its radius.
pub fn roundness_residual(points: &[GridPoint], center: GridPoint, radius: f64) -> f64 {
    if points.is_empty() || radius <= 0.0 {
        return f64::INFINITY;
    }
    let ms = points
        .iter()
        .map(|p| (distance(*p, center) - radius).powi(2))
        .sum::<f64>()
        / points.len() as f64;
    ms.sqrt() / radius
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRIANGLE: [GridPoint; 3] = [[2.0, 2.0], [4.0, 6.0], [7.0, 3.0]];

    fn transform(points: &[GridPoint], scale: f64, deg: f64, t: [f64; 2]) -> Vec<GridPoint> {
        let c = centroid(points).unwrap();
        let (s, co) = deg.to_radians().sin_cos();
        points
            .iter()
            .map(|p| {
                let x = p[0] - c[0];
                let y = p[1] - c[1];
                [
                    c[0] + scale * (co * x - s * y) + t[0],
                    c[1] + scale * (s * x + co * y) + t[1],
                ]
            })
            .collect()
    }

    #[test]
    fn test_identity_fit() {
        let fit = procrustes(&TRIANGLE, &TRIANGLE).unwrap();
        assert!((fit.scale - 1.0).abs() < 1e-12);
        assert!(fit.rotation.abs() < 1e-12);
        assert!(fit.residual < 1e-12);
        assert!(fit.centroid_offset() < 1e-12);
    }

    #[test]
    fn test_recovers_scale_rotation_translation() {
        let dst = transform(&TRIANGLE, 1.5, 30.0, [0.5, -1.0]);
        let fit = procrustes(&TRIANGLE, &dst).unwrap();
        assert!((fit.scale - 1.5).abs() < 1e-9);
        assert!((fit.rotation_degrees() - 30.0).abs() < 1e-9);
        assert!((fit.centroid_offset() - (0.25f64 + 1.0).sqrt()).abs() < 1e-9);
        let mapped = fit.apply(TRIANGLE[1]);
        assert!(distance(mapped, dst[1]) < 1e-9);
    }

    #[test]
    fn test_correspondence_search_ignores_start_vertex_and_winding() {
        let mut dst = transform(&TRIANGLE, 1.0, -12.0, [0.0, 0.0]);
        dst.rotate_left(2);
        dst.reverse();
        let fit = best_correspondence(&TRIANGLE, &dst).unwrap();
        assert!((fit.rotation_degrees() + 12.0).abs() < 1e-9);
        assert!(fit.reversed);
        assert!(fit.residual < 1e-9);
    }

    #[test]
    fn test_symmetric_square_prefers_smallest_rotation() {
        let square = [[0.0, 0.0], [2.0, 0.0], [2.0, 2.0], [0.0, 2.0]];
        let mut dst = square.to_vec();
        dst.rotate_left(1);
        let fit = best_correspondence(&square, &dst).unwrap();
        assert!(fit.rotation_degrees().abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_source_has_no_fit() {
        let src = [[1.0, 1.0], [1.0, 1.0], [1.0, 1.0]];
        assert!(procrustes(&src, &TRIANGLE).is_none());
        assert!(procrustes(&TRIANGLE[..2], &TRIANGLE).is_none());
    }

    #[test]
    fn test_fit_outline_with_mismatched_counts_uses_resampling() {
        let square = [[0.0, 0.0], [4.0, 0.0], [4.0, 4.0], [0.0, 4.0]];
        // Same square with a redundant midpoint on one edge.
        let detected = [[0.0, 0.0], [2.0, 0.0], [4.0, 0.0], [4.0, 4.0], [0.0, 4.0]];
        let fit = fit_outline(&square, &detected).unwrap();
        assert!((fit.scale - 1.0).abs() < 1e-6);
        assert!(fit.rotation_degrees().abs() < 1e-6);
        assert!(fit.rms < 1e-6);
    }

    #[test]
    fn test_normalize_degrees_range() {
        assert_eq!(normalize_degrees(-180.0), 180.0);
        assert_eq!(normalize_degrees(180.0), 180.0);
        assert!((normalize_degrees(370.0) - 10.0).abs() < 1e-12);
        assert!((normalize_degrees(-190.0) - 170.0).abs() < 1e-12);
    }

    #[test]
    fn test_resample_closed_is_evenly_spaced() {
        let square = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];
        let pts = resample_closed(&square, 8);
        assert_eq!(pts.len(), 8);
        assert_eq!(pts[0], [0.0, 0.0]);
        assert!(distance(pts[1], [0.5, 0.0]) < 1e-12);
        assert!(distance(pts[4], [1.0, 1.0]) < 1e-12);
    }
}
