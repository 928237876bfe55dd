//! Tumble-run decomposition of 3D trajectories.
//!
//! Locomotion is summarized as straight runs joined by abrupt reorientations
//! (tumbles). Tumbles sit at peaks of the curvature signal; the trajectory
//! positions at those peaks, bracketed by the first and last positions, are
//! the vertices of a piecewise-linear approximation. For every tumble the
//! change of heading is split into a planar, a non-planar and a twist angle
//! using a frame attached to each run.
//!
//! [`get_approximate`] builds the approximation for a fixed minimum spacing
//! between tumbles; [`find_approximation`] searches the spacing (and the
//! smoothing applied to the curvature) that meets a target reconstruction
//! error.

pub mod peaks;
pub mod search;
pub mod statistics;

pub use peaks::find_peaks;
pub use search::{find_approximation, SearchOutcome, SearchParams};
pub use statistics::{mean_squared_displacement, TumbleRunStatistics};

use crate::trajectory::{frame_normal, plane_normal, window_bounds};
use log::debug;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Vertices used to fit the plane normal of each run by default.
pub const DEFAULT_PLANARITY_WINDOW: usize = 5;

#[derive(thiserror::Error, Debug)]
pub enum ApproximationError {
    #[error("Precondition failed: {0}")]
    Precondition(String),
    #[error("Approximation did not reach mse {error_limit} within {iterations} iterations (best mse {best_mse})")]
    NotConverged {
        error_limit: f64,
        best_mse: f64,
        iterations: usize,
    },
}

/// Parameters of [`get_approximate_with`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ApproximationParams {
    /// Minimum number of timesteps between two tumbles.
    pub distance: usize,
    /// Minimum curvature of a tumble.
    pub height: Option<f64>,
    /// Number of vertices used to fit each run's plane normal.
    pub planarity_window: usize,
}

impl ApproximationParams {
    pub fn new(distance: usize) -> Self {
        ApproximationParams {
            distance,
            height: None,
            planarity_window: DEFAULT_PLANARITY_WINDOW,
        }
    }
}

/// Piecewise-linear approximation of a trajectory.
///
/// With `n` tumbles there are `n + 2` vertices, `n + 1` runs (and run
/// frames) and `n` angles of each kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Approximation {
    /// Reconstruction at every input timestep.
    pub x_approx: Vec<Vector3<f64>>,
    pub vertices: Vec<Vector3<f64>>,
    pub tumble_indices: Vec<usize>,
    /// Timesteps per run; they sum to `T − 1`.
    pub run_durations: Vec<usize>,
    /// Vertex-to-vertex distance per timestep.
    pub run_speeds: Vec<f64>,
    /// Rotation within the incoming run's `e0`–`e1` plane, in `[−π, π]`.
    pub planar_angles: Vec<f64>,
    /// Elevation of the outgoing heading out of that plane, in `[−π/2, π/2]`.
    pub nonplanar_angles: Vec<f64>,
    /// Roll about the outgoing heading, in `[−π, π]`.
    pub twist_angles: Vec<f64>,
    pub e0: Vec<Vector3<f64>>,
    pub e1: Vec<Vector3<f64>>,
    pub e2: Vec<Vector3<f64>>,
    /// `mean_t ||x[t] − x_approx[t]||²`.
    pub mse: f64,
}

impl Approximation {
    pub fn num_tumbles(&self) -> usize {
        self.tumble_indices.len()
    }

    pub fn num_runs(&self) -> usize {
        self.run_durations.len()
    }
}

/// Reorientation at one tumble, see [`Approximation`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TumbleAngles {
    pub planar: f64,
    pub nonplanar: f64,
    pub twist: f64,
}

/// Builds the approximation with tumbles at least `distance` timesteps apart.
///
/// Equivalent to [`get_approximate_with`] with no height threshold and the
/// default planarity window.
pub fn get_approximate(
    x: &[Vector3<f64>],
    k: &[f64],
    distance: usize,
) -> Result<Approximation, ApproximationError> {
    get_approximate_with(x, k, &ApproximationParams::new(distance))
}

/// Builds the piecewise-linear approximation of `x` with tumbles at the
/// peaks of the curvature signal `k`.
///
/// # Errors
///
/// [`ApproximationError::Precondition`] if `x` and `k` differ in length,
/// `x` has fewer than two samples or `distance` is zero.
pub fn get_approximate_with(
    x: &[Vector3<f64>],
    k: &[f64],
    params: &ApproximationParams,
) -> Result<Approximation, ApproximationError> {
    check_inputs(x.len(), k.len())?;
    if params.distance == 0 {
        return Err(ApproximationError::Precondition(
            "distance must be at least 1".to_string(),
        ));
    }

    let tumble_indices = find_peaks(k, params.distance, params.height);
    let mut indices = Vec::with_capacity(tumble_indices.len() + 2);
    indices.push(0);
    indices.extend_from_slice(&tumble_indices);
    indices.push(x.len() - 1);

    let vertices: Vec<Vector3<f64>> = indices.iter().map(|&i| x[i]).collect();
    let run_durations: Vec<usize> = indices.windows(2).map(|w| w[1] - w[0]).collect();
    let run_speeds: Vec<f64> = vertices
        .windows(2)
        .zip(&run_durations)
        .map(|(v, &d)| (v[1] - v[0]).norm() / d as f64)
        .collect();

    let x_approx = interpolate(&indices, &vertices, x.len());
    let mse = x
        .iter()
        .zip(&x_approx)
        .map(|(a, b)| (a - b).norm_squared())
        .sum::<f64>()
        / x.len() as f64;

    let (e0, e1, e2) = run_frames(&vertices, params.planarity_window);

    let mut planar_angles = Vec::with_capacity(tumble_indices.len());
    let mut nonplanar_angles = Vec::with_capacity(tumble_indices.len());
    let mut twist_angles = Vec::with_capacity(tumble_indices.len());
    for i in 0..tumble_indices.len() {
        let angles = tumble_angles(
            (&e0[i], &e1[i], &e2[i]),
            (&e0[i + 1], &e1[i + 1], &e2[i + 1]),
        );
        planar_angles.push(angles.planar);
        nonplanar_angles.push(angles.nonplanar);
        twist_angles.push(angles.twist);
    }

    debug!(
        "distance={} height={:?}: {} tumbles, mse={:.6}",
        params.distance,
        params.height,
        tumble_indices.len(),
        mse
    );

    Ok(Approximation {
        x_approx,
        vertices,
        tumble_indices,
        run_durations,
        run_speeds,
        planar_angles,
        nonplanar_angles,
        twist_angles,
        e0,
        e1,
        e2,
        mse,
    })
}

pub(crate) fn check_inputs(x_len: usize, k_len: usize) -> Result<(), ApproximationError> {
    if x_len != k_len {
        return Err(ApproximationError::Precondition(format!(
            "trajectory has {x_len} samples but the signal has {k_len}"
        )));
    }
    if x_len < 2 {
        return Err(ApproximationError::Precondition(format!(
            "trajectory needs at least 2 samples, found {x_len}"
        )));
    }
    Ok(())
}

/// Linear interpolation between vertices placed at `indices`.
fn interpolate(indices: &[usize], vertices: &[Vector3<f64>], len: usize) -> Vec<Vector3<f64>> {
    let mut out = Vec::with_capacity(len);
    out.push(vertices[0]);
    for (w, v) in indices.windows(2).zip(vertices.windows(2)) {
        let duration = (w[1] - w[0]) as f64;
        for step in 1..=(w[1] - w[0]) {
            let s = step as f64 / duration;
            out.push(v[0] + (v[1] - v[0]) * s);
        }
    }
    out
}

/// Orthonormal frame of each run.
///
/// `e0` is the run direction. `e2` is the normal of the plane through the
/// `planarity_window` vertices around the run, orthogonal to `e0` and kept on
/// the same side as the previous run's. `e1 = e2 × e0`.
#[allow(clippy::type_complexity)]
fn run_frames(
    vertices: &[Vector3<f64>],
    planarity_window: usize,
) -> (Vec<Vector3<f64>>, Vec<Vector3<f64>>, Vec<Vector3<f64>>) {
    let n_runs = vertices.len() - 1;
    let window = planarity_window.max(3);

    let mut e0: Vec<Vector3<f64>> = Vec::with_capacity(n_runs);
    let mut e1 = Vec::with_capacity(n_runs);
    let mut e2: Vec<Vector3<f64>> = Vec::with_capacity(n_runs);

    for i in 0..n_runs {
        let d = vertices[i + 1] - vertices[i];
        let heading = match d.try_normalize(1e-12) {
            Some(h) => h,
            None => e0.last().copied().unwrap_or_else(Vector3::x),
        };

        // centre between the run's two vertices
        let (start, end) = window_bounds(i + 1, window, vertices.len());
        let normal = plane_normal(&vertices[start..end]).map(|(n, _)| n);
        let normal = frame_normal(&heading, normal, e2.last());

        e0.push(heading);
        e1.push(normal.cross(&heading));
        e2.push(normal);
    }

    (e0, e1, e2)
}

/// Splits the change from the incoming to the outgoing run frame into
/// planar, non-planar and twist angles.
///
/// The outgoing heading is written in the incoming frame as `(a, b, c)`.
/// The planar angle is the rotation about `e2_in` taking `e0_in` towards it,
/// the non-planar angle its elevation out of the `e0_in`–`e1_in` plane, and
/// the twist the roll about `e0_out` between the incoming `e1` carried
/// through those two rotations and the outgoing `e1`.
pub fn tumble_angles(
    incoming: (&Vector3<f64>, &Vector3<f64>, &Vector3<f64>),
    outgoing: (&Vector3<f64>, &Vector3<f64>, &Vector3<f64>),
) -> TumbleAngles {
    let (e0_in, e1_in, e2_in) = incoming;
    let (e0_out, e1_out, _) = outgoing;

    let a = e0_out.dot(e0_in);
    let b = e0_out.dot(e1_in);
    let c = e0_out.dot(e2_in);
    let planar = b.atan2(a);
    let nonplanar = c.atan2(a.hypot(b));

    // e1_in rotated about e2_in by the planar angle; the elevation turns
    // about this axis, so it is also the transported e1.
    let e1_transported = e1_in * planar.cos() - e0_in * planar.sin();
    let twist = e1_transported
        .cross(e1_out)
        .dot(e0_out)
        .atan2(e1_transported.dot(e1_out));

    TumbleAngles {
        planar,
        nonplanar,
        twist,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trajectory::{curvature, headings};
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use rand::{Rng, SeedableRng};
    use rand_pcg::Pcg64;
    use std::f64::consts::{FRAC_PI_2, FRAC_PI_6, PI};

    /// 100 steps along +x, a right-angle turn to +y for 100 steps, then a
    /// 30° climb for 100 steps.
    fn two_corner_path() -> Vec<Vector3<f64>> {
        let climb = Vector3::new(0.0, FRAC_PI_6.cos(), FRAC_PI_6.sin());
        let mut points = vec![Vector3::zeros()];
        for t in 0..300 {
            let step = if t < 100 {
                Vector3::x()
            } else if t < 200 {
                Vector3::y()
            } else {
                climb
            };
            let last = points[points.len() - 1];
            points.push(last + step);
        }
        points
    }

    fn straight_line(n: usize) -> Vec<Vector3<f64>> {
        (0..n).map(|t| Vector3::new(0.1 * t as f64, 0.0, 0.0)).collect()
    }

    fn oblique_line(n: usize) -> Vec<Vector3<f64>> {
        let start = Vector3::new(1.0, 2.0, -4.0);
        let direction = Vector3::new(0.37, -1.3, 2.1);
        (0..n).map(|t| start + direction * (0.13 * t as f64)).collect()
    }

    fn random_walk(rng: &mut Pcg64, n: usize) -> Vec<Vector3<f64>> {
        let mut points = vec![Vector3::zeros()];
        let mut heading = Vector3::x();
        for _ in 1..n {
            if rng.gen_bool(0.05) {
                let v = Vector3::new(
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(-1.0..1.0),
                );
                if let Some(v) = v.try_normalize(1e-6) {
                    heading = v;
                }
            }
            let last = points[points.len() - 1];
            points.push(last + heading * rng.gen_range(0.5..1.5));
        }
        points
    }

    #[test]
    fn test_corner_path_vertices() {
        let x = two_corner_path();
        let k = curvature(&headings(&x));
        assert_relative_eq!(k[100], FRAC_PI_2, epsilon = 1e-12);
        assert_relative_eq!(k[200], FRAC_PI_6, epsilon = 1e-12);

        let params = ApproximationParams {
            planarity_window: 3,
            ..ApproximationParams::new(50)
        };
        let approx = get_approximate_with(&x, &k, &params).unwrap();
        assert_eq!(approx.tumble_indices, vec![100, 200]);
        assert_eq!(approx.vertices.len(), 4);
        assert_eq!(approx.run_durations, vec![100, 100, 100]);
        assert_eq!(approx.run_durations.iter().sum::<usize>(), x.len() - 1);
        for speed in &approx.run_speeds {
            assert_relative_eq!(*speed, 1.0, epsilon = 1e-12);
        }
        assert_abs_diff_eq!(approx.mse, 0.0, epsilon = 1e-20);
        assert_eq!(approx.x_approx.len(), x.len());

        // first turn stays in the plane of the first two runs
        assert_relative_eq!(approx.planar_angles[0].abs(), FRAC_PI_2, epsilon = 1e-9);
        assert_abs_diff_eq!(approx.nonplanar_angles[0], 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_mse_does_not_decrease_with_distance() {
        let x = two_corner_path();
        let k = curvature(&headings(&x));

        let distances = [10, 50, 100, 101, 150, 500];
        let errors: Vec<f64> = distances
            .iter()
            .map(|&d| get_approximate(&x, &k, d).unwrap().mse)
            .collect();

        for w in errors.windows(2) {
            assert!(w[1] >= w[0] - 1e-9, "mse sequence {errors:?}");
        }
        assert!(errors[3] > 0.0);
        assert_eq!(get_approximate(&x, &k, 101).unwrap().tumble_indices, vec![100]);
    }

    #[test]
    fn test_idempotent() {
        let mut rng = Pcg64::seed_from_u64(7);
        let x = random_walk(&mut rng, 400);
        let k = curvature(&headings(&x));
        let a = get_approximate(&x, &k, 20).unwrap();
        let b = get_approximate(&x, &k, 20).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_straight_line_has_no_tumbles() {
        let x = straight_line(100);
        let k = curvature(&headings(&x));
        assert!(k.iter().all(|&v| v == 0.0));

        let approx = get_approximate(&x, &k, 5).unwrap();
        assert_eq!(approx.num_tumbles(), 0);
        assert_eq!(approx.vertices, vec![x[0], x[99]]);
        assert_eq!(approx.run_durations, vec![99]);
        assert!(approx.planar_angles.is_empty());
        assert!(approx.nonplanar_angles.is_empty());
        assert!(approx.twist_angles.is_empty());
        assert_eq!(approx.e0.len(), 1);
        assert_abs_diff_eq!(approx.mse, 0.0, epsilon = 1e-20);
    }

    #[test]
    fn test_oblique_line_has_no_tumbles_at_any_distance() {
        let x = oblique_line(500);
        let k = curvature(&headings(&x));

        for distance in [1, 2, 5, 50, 499, 1000] {
            let approx = get_approximate(&x, &k, distance).unwrap();
            assert_eq!(approx.num_tumbles(), 0, "distance {distance}");
            assert_eq!(approx.vertices, vec![x[0], x[499]]);
            assert!(approx.mse < 1e-20);
        }
    }

    #[test]
    fn test_angle_ranges_on_random_walks() {
        let mut rng = Pcg64::seed_from_u64(42);
        for _ in 0..20 {
            let n = rng.gen_range(50..500);
            let x = random_walk(&mut rng, n);
            let k = curvature(&headings(&x));
            let distance = rng.gen_range(1..30);
            let approx = get_approximate(&x, &k, distance).unwrap();

            let tumbles = approx.num_tumbles();
            assert_eq!(approx.vertices.len(), tumbles + 2);
            assert_eq!(approx.num_runs(), tumbles + 1);
            assert_eq!(approx.planar_angles.len(), tumbles);
            assert_eq!(approx.run_durations.iter().sum::<usize>(), n - 1);
            assert!(approx.tumble_indices.windows(2).all(|w| w[1] - w[0] >= distance));

            for i in 0..tumbles {
                assert!((-PI..=PI).contains(&approx.planar_angles[i]));
                assert!((-FRAC_PI_2..=FRAC_PI_2).contains(&approx.nonplanar_angles[i]));
                assert!((-PI..=PI).contains(&approx.twist_angles[i]));
            }
            for r in 0..approx.num_runs() {
                assert_relative_eq!(approx.e0[r].cross(&approx.e1[r]), approx.e2[r], epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_tumble_angles() {
        let frame = (&Vector3::x(), &Vector3::y(), &Vector3::z());

        // quarter turn in the plane, frame carried along rigidly
        let turned = (&Vector3::y(), &-Vector3::x(), &Vector3::z());
        let angles = tumble_angles(frame, turned);
        assert_relative_eq!(angles.planar, FRAC_PI_2, epsilon = 1e-12);
        assert_abs_diff_eq!(angles.nonplanar, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(angles.twist, 0.0, epsilon = 1e-12);

        // straight up out of the plane
        let climbed = (&Vector3::z(), &Vector3::y(), &-Vector3::x());
        let angles = tumble_angles(frame, climbed);
        assert_abs_diff_eq!(angles.planar, 0.0, epsilon = 1e-12);
        assert_relative_eq!(angles.nonplanar, FRAC_PI_2, epsilon = 1e-12);
        assert_abs_diff_eq!(angles.twist, 0.0, epsilon = 1e-12);

        // pure roll about the unchanged heading
        let rolled = (&Vector3::x(), &Vector3::z(), &-Vector3::y());
        let angles = tumble_angles(frame, rolled);
        assert_abs_diff_eq!(angles.planar, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(angles.nonplanar, 0.0, epsilon = 1e-12);
        assert_relative_eq!(angles.twist, FRAC_PI_2, epsilon = 1e-12);
    }

    #[test]
    fn test_preconditions() {
        let x = straight_line(10);
        let k = vec![0.0; 9];
        assert!(matches!(
            get_approximate(&x, &k, 5),
            Err(ApproximationError::Precondition(_))
        ));

        let k = vec![0.0; 10];
        assert!(matches!(
            get_approximate(&x, &k, 0),
            Err(ApproximationError::Precondition(_))
        ));
        assert!(matches!(
            get_approximate(&x[..1], &k[..1], 5),
            Err(ApproximationError::Precondition(_))
        ));

        // two samples are enough for a single run
        let approx = get_approximate(&x[..2], &k[..2], 1).unwrap();
        assert_eq!(approx.run_durations, vec![1]);
    }
}
