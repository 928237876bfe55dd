//! Three-view triangulation of candidate detections.
//!
//! Each camera may report several candidate detections for a frame (the
//! target plus noise objects). [`triangulate`] solves every combination of
//! one candidate per view for the 3D point whose reprojections best match,
//! keeps the combinations whose residual stays under a matching threshold
//! and returns them best first.

use crate::camera::{CameraTriplet, N_CAMERAS};
use crate::optimization::{self, SolverOptions, TriangulationCost};
use log::{debug, info};
use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug)]
pub enum TriangulationError {
    #[error("Found zero 3D points below threshold, best: {best_error:.2} > {threshold}")]
    NoSolution { best_error: f64, threshold: f64 },
    #[error("Invalid views: {0}")]
    InvalidViews(String),
}

/// Parameters of [`triangulate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriangulationOptions {
    /// Starting point of every minimization.
    pub initial_guess: Vector3<f64>,
    /// Largest residual (pixels, root of summed squares) a candidate may keep.
    pub matching_threshold: f64,
    /// Only the first `K` candidates of each view are combined when set.
    pub max_candidates_per_view: Option<usize>,
    pub apply_distortion: bool,
    pub solver: SolverOptions,
}

impl Default for TriangulationOptions {
    fn default() -> Self {
        TriangulationOptions {
            initial_guess: Vector3::new(1.0, 1.0, 500.0),
            matching_threshold: 1000.0,
            max_candidates_per_view: None,
            apply_distortion: true,
            solver: SolverOptions::default(),
        }
    }
}

/// A triangulated point and the detections it was built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectPoint {
    pub point: Vector3<f64>,
    /// Objective value at `point`.
    pub error: f64,
    /// Index of the detection used in each view.
    pub source_indices: [usize; N_CAMERAS],
    /// `point` projected back into each camera.
    pub reprojected_points: [Vector2<f64>; N_CAMERAS],
}

/// Result of [`triangulate_with_report`].
#[derive(Debug, Clone)]
pub struct TriangulationReport {
    pub points: Vec<ObjectPoint>,
    /// Number of candidate combinations that were solved.
    pub combinations: usize,
    pub best_error: f64,
}

/// Triangulates the candidate detections of one frame.
///
/// # Arguments
///
/// * `detections` - exactly three lists of pixel coordinates, one per camera.
///   A list may be empty, in which case there is nothing to combine.
/// * `cameras` - the calibrated rig.
/// * `options` - see [`TriangulationOptions`].
///
/// # Returns
///
/// All candidates with `error <= matching_threshold`, sorted by ascending
/// error, each carrying its reprojected points.
///
/// # Errors
///
/// * [`TriangulationError::InvalidViews`] if `detections.len() != 3`.
/// * [`TriangulationError::NoSolution`] if no candidate survives the
///   threshold; `best_error` is the smallest error seen (infinite when no
///   combination existed).
pub fn triangulate(
    detections: &[Vec<Vector2<f64>>],
    cameras: &CameraTriplet,
    options: &TriangulationOptions,
) -> Result<Vec<ObjectPoint>, TriangulationError> {
    triangulate_with_report(detections, cameras, options).map(|report| report.points)
}

/// Same as [`triangulate`], also reporting how many combinations were tried.
pub fn triangulate_with_report(
    detections: &[Vec<Vector2<f64>>],
    cameras: &CameraTriplet,
    options: &TriangulationOptions,
) -> Result<TriangulationReport, TriangulationError> {
    if detections.len() != N_CAMERAS {
        return Err(TriangulationError::InvalidViews(format!(
            "expected {N_CAMERAS} views, found {}",
            detections.len()
        )));
    }
    if !options.initial_guess.iter().all(|v| v.is_finite()) {
        return Err(TriangulationError::InvalidViews(
            "initial guess must be finite".to_string(),
        ));
    }

    let views: Vec<&[Vector2<f64>]> = detections
        .iter()
        .map(|view| match options.max_candidates_per_view {
            Some(k) => &view[..view.len().min(k)],
            None => view.as_slice(),
        })
        .collect();

    debug!(
        "Triangulating {}x{}x{} candidates{}",
        views[0].len(),
        views[1].len(),
        views[2].len(),
        cameras
            .reprojection_error
            .map(|e| format!(", rig reprojection error {e:.4}"))
            .unwrap_or_default()
    );

    let model_triplet = cameras.get_camera_model_triplet();
    let mut candidates = Vec::new();
    let mut best_error = f64::INFINITY;
    let mut combinations = 0;

    for (i0, d0) in views[0].iter().enumerate() {
        for (i1, d1) in views[1].iter().enumerate() {
            for (i2, d2) in views[2].iter().enumerate() {
                combinations += 1;
                let cost = TriangulationCost::new(
                    model_triplet,
                    [*d0, *d1, *d2],
                    options.apply_distortion,
                );
                let Some(point) = optimization::solve_point(
                    cost.clone(),
                    &options.initial_guess,
                    &options.solver,
                    cameras.reprojection_error,
                ) else {
                    debug!("No solution for combination {:?}", [i0, i1, i2]);
                    continue;
                };

                let error = cost.objective(&point);
                if !error.is_finite() {
                    continue;
                }
                best_error = best_error.min(error);
                candidates.push((point, error, [i0, i1, i2]));
            }
        }
    }

    let threshold = options.matching_threshold;
    candidates.retain(|(_, error, _)| *error <= threshold);
    candidates.sort_by(|a, b| a.1.total_cmp(&b.1));

    if candidates.is_empty() {
        return Err(TriangulationError::NoSolution {
            best_error,
            threshold,
        });
    }

    let points: Vec<ObjectPoint> = candidates
        .into_iter()
        .map(|(point, error, source_indices)| ObjectPoint {
            point,
            error,
            source_indices,
            reprojected_points: cameras.project_to_2d(&point, options.apply_distortion),
        })
        .collect();

    info!(
        "Triangulated {} of {} combinations, best error {:.4}",
        points.len(),
        combinations,
        best_error
    );

    Ok(TriangulationReport {
        points,
        combinations,
        best_error,
    })
}
