//! Differential geometry of sampled 3D trajectories.
//!
//! These helpers turn a trajectory into the signals consumed by the
//! tumble-run approximation: unit headings (`e0`), a per-step turning angle
//! (curvature) and a local orthonormal frame whose third axis is the normal
//! of the best-fit plane through nearby points.

use nalgebra::{Matrix3, SymmetricEigen, Vector3};
use serde::{Deserialize, Serialize};

/// Relative eigenvalue size below which a point cloud is treated as
/// degenerate (coincident or collinear).
const DEGENERATE_EPS: f64 = 1e-12;
const MIN_LENGTH: f64 = 1e-12;
/// Turning angles (radians) below this are rounding error in the headings
/// and are reported as zero.
pub const CURVATURE_NOISE_FLOOR: f64 = 1e-9;

#[derive(thiserror::Error, Debug)]
pub enum TrajectoryError {
    #[error("Posture at frame {0} has no points")]
    EmptyPosture(usize),
    #[error("Trajectory is empty")]
    Empty,
}

/// A sampled 3D trajectory, one position per timestep.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trajectory(Vec<Vector3<f64>>);

impl Trajectory {
    pub fn new(points: Vec<Vector3<f64>>) -> Self {
        Trajectory(points)
    }

    /// Builds the centre-of-mass trajectory of a sequence of postures,
    /// each posture being the points along the body at one timestep.
    pub fn from_postures(postures: &[Vec<Vector3<f64>>]) -> Result<Self, TrajectoryError> {
        if postures.is_empty() {
            return Err(TrajectoryError::Empty);
        }
        postures
            .iter()
            .enumerate()
            .map(|(t, posture)| {
                if posture.is_empty() {
                    return Err(TrajectoryError::EmptyPosture(t));
                }
                let sum: Vector3<f64> = posture.iter().sum();
                Ok(sum / posture.len() as f64)
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Trajectory)
    }

    /// The trajectory translated so that its mean position is the origin.
    pub fn centred(&self) -> Self {
        if self.0.is_empty() {
            return self.clone();
        }
        let mean: Vector3<f64> = self.0.iter().sum::<Vector3<f64>>() / self.0.len() as f64;
        Trajectory(self.0.iter().map(|p| p - mean).collect())
    }

    pub fn points(&self) -> &[Vector3<f64>] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn headings(&self) -> Vec<Vector3<f64>> {
        headings(&self.0)
    }

    pub fn into_inner(self) -> Vec<Vector3<f64>> {
        self.0
    }
}

impl From<Vec<Vector3<f64>>> for Trajectory {
    fn from(points: Vec<Vector3<f64>>) -> Self {
        Trajectory(points)
    }
}

/// Orthonormal frame along a trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameBasis {
    /// Heading.
    pub e0: Vec<Vector3<f64>>,
    /// `e2 × e0`.
    pub e1: Vec<Vector3<f64>>,
    /// Local plane normal, orthogonal to `e0`.
    pub e2: Vec<Vector3<f64>>,
    /// How well the local window is described by a plane, in `[0, 1]`.
    pub planarity: Vec<f64>,
}

/// Unit headings by forward differences.
///
/// The last heading repeats the one before it. A step of zero length keeps
/// the previous heading (or the next valid one at the start); a trajectory
/// with no movement at all gets `+x` everywhere.
pub fn headings(points: &[Vector3<f64>]) -> Vec<Vector3<f64>> {
    let n = points.len();
    if n == 0 {
        return Vec::new();
    }

    let steps: Vec<Option<Vector3<f64>>> = points
        .windows(2)
        .map(|w| {
            let d = w[1] - w[0];
            let norm = d.norm();
            (norm > MIN_LENGTH).then(|| d / norm)
        })
        .collect();

    let first_valid = steps.iter().flatten().next().copied().unwrap_or_else(Vector3::x);
    let mut out = Vec::with_capacity(n);
    let mut previous = first_valid;
    for step in &steps {
        let heading = step.unwrap_or(previous);
        out.push(heading);
        previous = heading;
    }
    out.push(previous);
    out
}

/// Centred moving average with the edges truncated to the available samples.
///
/// Even windows are widened to the next odd size; windows of 0 or 1 return
/// the input unchanged.
pub fn smooth_window(values: &[f64], window: usize) -> Vec<f64> {
    if window <= 1 || values.len() < 2 {
        return values.to_vec();
    }
    let half = window / 2;
    let n = values.len();

    let mut prefix = Vec::with_capacity(n + 1);
    prefix.push(0.0);
    for v in values {
        prefix.push(prefix[prefix.len() - 1] + v);
    }

    (0..n)
        .map(|t| {
            let start = t.saturating_sub(half);
            let end = (t + half + 1).min(n);
            (prefix[end] - prefix[start]) / (end - start) as f64
        })
        .collect()
}

/// Smooths headings component-wise and renormalizes them.
pub fn smooth_headings(e0: &[Vector3<f64>], window: usize) -> Vec<Vector3<f64>> {
    if window <= 1 {
        return e0.to_vec();
    }
    let components: Vec<Vec<f64>> = (0..3)
        .map(|axis| {
            let values: Vec<f64> = e0.iter().map(|v| v[axis]).collect();
            smooth_window(&values, window)
        })
        .collect();

    let mut out = Vec::with_capacity(e0.len());
    for t in 0..e0.len() {
        let v = Vector3::new(components[0][t], components[1][t], components[2][t]);
        let norm = v.norm();
        let heading = if norm > MIN_LENGTH {
            v / norm
        } else {
            // opposite headings cancelled out
            out.last().copied().unwrap_or(e0[t])
        };
        out.push(heading);
    }
    out
}

/// Turning angle between consecutive headings, `k[0] = 0`.
///
/// Angles under [`CURVATURE_NOISE_FLOOR`] are set to zero so that a straight
/// trajectory has an exactly flat curvature whatever its direction.
pub fn curvature(e0: &[Vector3<f64>]) -> Vec<f64> {
    if e0.is_empty() {
        return Vec::new();
    }
    let mut k = Vec::with_capacity(e0.len());
    k.push(0.0);
    k.extend(e0.windows(2).map(|w| {
        let angle = angle_between(&w[0], &w[1]);
        if angle < CURVATURE_NOISE_FLOOR {
            0.0
        } else {
            angle
        }
    }));
    k
}

/// Unsigned angle between two vectors, stable for small and large angles.
pub fn angle_between(a: &Vector3<f64>, b: &Vector3<f64>) -> f64 {
    a.cross(b).norm().atan2(a.dot(b))
}

fn principal_axes(points: &[Vector3<f64>]) -> Option<(Vector3<f64>, [f64; 3])> {
    if points.len() < 3 {
        return None;
    }
    let mean: Vector3<f64> = points.iter().sum::<Vector3<f64>>() / points.len() as f64;
    let covariance: Matrix3<f64> = points
        .iter()
        .map(|p| {
            let d = p - mean;
            d * d.transpose()
        })
        .sum::<Matrix3<f64>>()
        / points.len() as f64;

    let eigen = SymmetricEigen::new(covariance);
    let mut order = [0, 1, 2];
    order.sort_by(|&i, &j| eigen.eigenvalues[i].total_cmp(&eigen.eigenvalues[j]));
    let values = order.map(|i| eigen.eigenvalues[i].max(0.0));
    let normal = eigen.eigenvectors.column(order[0]).into_owned();
    Some((normal, values))
}

/// Planarity of a point cloud: `1 − λ_min / λ_mid` of its covariance,
/// clamped to `[0, 1]`. Collinear or coincident points count as planar.
pub fn planarity(points: &[Vector3<f64>]) -> f64 {
    match principal_axes(points) {
        Some((_, [min, mid, max])) if mid > DEGENERATE_EPS * max.max(1.0) => {
            (1.0 - min / mid).clamp(0.0, 1.0)
        }
        _ => 1.0,
    }
}

/// Best-fit plane normal of a point cloud and its planarity.
///
/// Returns `None` for fewer than three points or when the points are
/// collinear, since the plane is then not unique.
pub fn plane_normal(points: &[Vector3<f64>]) -> Option<(Vector3<f64>, f64)> {
    let (normal, [min, mid, max]) = principal_axes(points)?;
    if mid <= DEGENERATE_EPS * max.max(1.0) {
        return None;
    }
    Some((normal.normalize(), (1.0 - min / mid).clamp(0.0, 1.0)))
}

/// Some unit vector perpendicular to `v`.
pub fn any_perpendicular(v: &Vector3<f64>) -> Vector3<f64> {
    let axis = if v.x.abs() <= v.y.abs() && v.x.abs() <= v.z.abs() {
        Vector3::x()
    } else if v.y.abs() <= v.z.abs() {
        Vector3::y()
    } else {
        Vector3::z()
    };
    v.cross(&axis).normalize()
}

/// Component of `n` orthogonal to the unit vector `e0`, normalized.
pub(crate) fn orthogonalize(n: &Vector3<f64>, e0: &Vector3<f64>) -> Option<Vector3<f64>> {
    let v = n - e0 * n.dot(e0);
    let norm = v.norm();
    (norm > 1e-9).then(|| v / norm)
}

/// Picks the plane normal for one frame, keeping it orthogonal to `e0` and
/// on the same side as `previous`.
pub(crate) fn frame_normal(
    e0: &Vector3<f64>,
    normal: Option<Vector3<f64>>,
    previous: Option<&Vector3<f64>>,
) -> Vector3<f64> {
    let mut e2 = normal
        .and_then(|n| orthogonalize(&n, e0))
        .or_else(|| previous.and_then(|p| orthogonalize(p, e0)))
        .unwrap_or_else(|| any_perpendicular(e0));
    if let Some(p) = previous {
        if e2.dot(p) < 0.0 {
            e2 = -e2;
        }
    }
    e2
}

/// Indices `[start, end)` of a window of `window` samples around `centre`,
/// shifted inwards at the ends of a sequence of length `n`.
pub(crate) fn window_bounds(centre: usize, window: usize, n: usize) -> (usize, usize) {
    let window = window.min(n);
    let start = centre.saturating_sub(window / 2);
    let end = (start + window).min(n);
    (end - window, end)
}

/// Heading frame at every timestep of `points`.
///
/// `e2` is the normal of the plane fitted through `window` points centred on
/// each timestep (at least three), made orthogonal to the heading and kept
/// sign-continuous along the trajectory.
pub fn trajectory_frame(points: &[Vector3<f64>], window: usize) -> FrameBasis {
    let e0 = headings(points);
    let window = window.max(3);
    let n = points.len();

    let mut e1 = Vec::with_capacity(n);
    let mut e2: Vec<Vector3<f64>> = Vec::with_capacity(n);
    let mut planarities = Vec::with_capacity(n);

    for t in 0..n {
        let (start, end) = window_bounds(t, window, n);
        let local = &points[start..end];
        let fit = plane_normal(local);
        planarities.push(fit.map_or_else(|| planarity(local), |(_, p)| p));

        let normal = frame_normal(&e0[t], fit.map(|(n, _)| n), e2.last());
        e1.push(normal.cross(&e0[t]));
        e2.push(normal);
    }

    FrameBasis {
        e0,
        e1,
        e2,
        planarity: planarities,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use std::f64::consts::PI;

    fn helix(n: usize, radius: f64) -> Vec<Vector3<f64>> {
        (0..n)
            .map(|t| {
                let a = t as f64 * 0.05;
                Vector3::new(radius * a.cos(), radius * a.sin(), 0.01 * t as f64)
            })
            .collect()
    }

    #[test]
    fn test_headings() {
        let points = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(2.0, 0.0, 0.0),
            Vector3::new(2.0, 0.0, 0.0),
            Vector3::new(2.0, 3.0, 0.0),
        ];
        let e0 = headings(&points);
        assert_eq!(e0.len(), 4);
        assert_eq!(e0[0], Vector3::x());
        // stationary step keeps the previous heading
        assert_eq!(e0[1], Vector3::x());
        assert_eq!(e0[2], Vector3::y());
        assert_eq!(e0[3], Vector3::y());

        let still = vec![Vector3::new(1.0, 1.0, 1.0); 3];
        assert!(headings(&still).iter().all(|h| *h == Vector3::x()));
        assert!(headings(&[]).is_empty());
    }

    #[test]
    fn test_smooth_window() {
        let values = [0.0, 0.0, 3.0, 0.0, 0.0];
        let smoothed = smooth_window(&values, 3);
        assert_eq!(smoothed, vec![0.0, 1.0, 1.0, 1.0, 0.0]);

        // truncated edges average over what is available
        let smoothed = smooth_window(&[1.0, 2.0, 3.0, 4.0], 5);
        assert_relative_eq!(smoothed[0], 2.0);
        assert_relative_eq!(smoothed[3], 3.0);

        assert_eq!(smooth_window(&values, 1), values.to_vec());
        // even windows widen to the next odd size
        assert_eq!(smooth_window(&values, 2), smooth_window(&values, 3));
    }

    #[test]
    fn test_curvature_of_circle_is_constant() {
        let step = 0.1;
        let points: Vec<Vector3<f64>> = (0..50)
            .map(|t| {
                let a = t as f64 * step;
                Vector3::new(a.cos(), a.sin(), 0.0)
            })
            .collect();
        let k = curvature(&headings(&points));
        assert_eq!(k[0], 0.0);
        for value in &k[1..k.len() - 1] {
            assert_relative_eq!(*value, step, epsilon = 1e-9);
        }
        // the repeated last heading does not turn
        assert_abs_diff_eq!(k[k.len() - 1], 0.0);
    }

    #[test]
    fn test_curvature_of_oblique_line_is_flat() {
        let start = Vector3::new(3.0, -7.5, 12.25);
        let direction = Vector3::new(0.37, -1.3, 2.1);
        let points: Vec<Vector3<f64>> = (0..500)
            .map(|t| start + direction * (0.13 * t as f64))
            .collect();
        let e0 = headings(&points);
        // rounding makes consecutive headings differ in the last bits
        assert!(e0.windows(2).any(|w| w[0] != w[1]));

        assert!(curvature(&e0).iter().all(|&v| v == 0.0));
        let smoothed = smooth_headings(&e0, 11);
        assert!(curvature(&smoothed).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_angle_between() {
        assert_relative_eq!(angle_between(&Vector3::x(), &Vector3::y()), PI / 2.0);
        assert_relative_eq!(angle_between(&Vector3::x(), &-Vector3::x()), PI);
        assert_eq!(angle_between(&Vector3::z(), &Vector3::z()), 0.0);
    }

    #[test]
    fn test_plane_normal() {
        let points = vec![
            Vector3::new(0.0, 0.0, 1.0),
            Vector3::new(1.0, 0.0, 1.0),
            Vector3::new(0.0, 2.0, 1.0),
            Vector3::new(3.0, 1.0, 1.0),
        ];
        let (normal, planarity) = plane_normal(&points).unwrap();
        assert_relative_eq!(normal.z.abs(), 1.0, epsilon = 1e-9);
        assert_relative_eq!(planarity, 1.0, epsilon = 1e-9);

        let line: Vec<Vector3<f64>> = (0..5).map(|t| Vector3::new(t as f64, 0.0, 0.0)).collect();
        assert!(plane_normal(&line).is_none());
        assert_eq!(super::planarity(&line), 1.0);
        assert!(plane_normal(&points[..2]).is_none());
    }

    #[test]
    fn test_trajectory_frame_is_orthonormal() {
        let points = helix(200, 1.0);
        let frame = trajectory_frame(&points, 9);
        assert_eq!(frame.e0.len(), points.len());

        for t in 0..points.len() {
            let (e0, e1, e2) = (frame.e0[t], frame.e1[t], frame.e2[t]);
            assert_relative_eq!(e0.norm(), 1.0, epsilon = 1e-9);
            assert_relative_eq!(e1.norm(), 1.0, epsilon = 1e-9);
            assert_relative_eq!(e2.norm(), 1.0, epsilon = 1e-9);
            assert_abs_diff_eq!(e0.dot(&e2), 0.0, epsilon = 1e-9);
            assert_relative_eq!(e0.cross(&e1), e2, epsilon = 1e-9);
            assert!((0.0..=1.0).contains(&frame.planarity[t]));
            if t > 0 {
                assert!(frame.e2[t - 1].dot(&e2) >= 0.0);
            }
        }
    }

    #[test]
    fn test_straight_line_frame_falls_back() {
        let points: Vec<Vector3<f64>> = (0..10).map(|t| Vector3::new(0.0, 0.0, t as f64)).collect();
        let frame = trajectory_frame(&points, 5);
        for t in 0..points.len() {
            assert_abs_diff_eq!(frame.e2[t].dot(&Vector3::z()), 0.0, epsilon = 1e-12);
            assert_eq!(frame.e2[t], frame.e2[0]);
        }
    }

    #[test]
    fn test_from_postures_and_centred() {
        let postures = vec![
            vec![Vector3::new(0.0, 0.0, 0.0), Vector3::new(2.0, 0.0, 0.0)],
            vec![Vector3::new(2.0, 2.0, 0.0), Vector3::new(4.0, 2.0, 0.0)],
        ];
        let trajectory = Trajectory::from_postures(&postures).unwrap();
        assert_eq!(trajectory.points(), &[Vector3::new(1.0, 0.0, 0.0), Vector3::new(3.0, 2.0, 0.0)]);

        let centred = trajectory.centred();
        assert_eq!(centred.points()[0], Vector3::new(-1.0, -1.0, 0.0));

        let bad = vec![vec![Vector3::zeros()], vec![]];
        assert!(matches!(
            Trajectory::from_postures(&bad),
            Err(TrajectoryError::EmptyPosture(1))
        ));
    }

    #[test]
    fn test_window_bounds() {
        assert_eq!(window_bounds(0, 5, 20), (0, 5));
        assert_eq!(window_bounds(10, 5, 20), (8, 13));
        assert_eq!(window_bounds(19, 5, 20), (15, 20));
        assert_eq!(window_bounds(1, 5, 3), (0, 3));
    }
}
