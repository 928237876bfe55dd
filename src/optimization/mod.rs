//! Non-linear least-squares plumbing shared by the triangulator.
//!
//! Costs implement [`tiny_solver::factors::Factor`] so that the solver can
//! differentiate them automatically; [`SolverOptions`] carries the
//! user-facing settings and maps them onto tiny-solver's
//! [`OptimizerOptions`].

use log::debug;
use nalgebra::{DVector, Vector3};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tiny_solver::optimizer::{Optimizer, OptimizerOptions};
use tiny_solver::LevenbergMarquardtOptimizer;

pub mod reprojection;

pub use reprojection::TriangulationCost;

/// Name of the single parameter block solved for by the triangulator.
const POINT_BLOCK: &str = "point";

/// Settings of the Levenberg–Marquardt solve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    pub max_iterations: usize,
    /// Stop once the absolute decrease of the squared error drops below this.
    pub min_abs_error_decrease: f64,
    /// Stop once the relative decrease of the squared error drops below this.
    pub min_rel_error_decrease: f64,
    /// Stop once the squared error itself drops below this.
    pub min_error: f64,
    /// Use the rig's calibration error (squared) as `min_error` when known.
    pub stop_at_rig_error: bool,
    pub verbosity: usize,
}

impl Default for SolverOptions {
    fn default() -> Self {
        SolverOptions {
            max_iterations: 1000,
            min_abs_error_decrease: 1e-16,
            min_rel_error_decrease: 1e-8,
            min_error: 1e-20,
            stop_at_rig_error: false,
            verbosity: 0,
        }
    }
}

impl SolverOptions {
    fn to_optimizer_options(&self, rig_error: Option<f64>) -> OptimizerOptions {
        let min_error = match rig_error {
            Some(e) if self.stop_at_rig_error => e * e,
            _ => self.min_error,
        };
        OptimizerOptions {
            max_iteration: self.max_iterations,
            verbosity_level: self.verbosity,
            min_abs_error_decrease_threshold: self.min_abs_error_decrease,
            min_rel_error_decrease_threshold: self.min_rel_error_decrease,
            min_error_threshold: min_error,
            ..OptimizerOptions::default()
        }
    }
}

/// Minimizes `cost` over a single 3D point starting from `initial`.
///
/// Returns `None` when the solver gives up or produces a non-finite point.
pub fn solve_point(
    cost: TriangulationCost,
    initial: &Vector3<f64>,
    options: &SolverOptions,
    rig_error: Option<f64>,
) -> Option<Vector3<f64>> {
    let mut problem = tiny_solver::Problem::new();
    problem.add_residual_block(cost.num_residuals(), &[POINT_BLOCK], Box::new(cost), None);

    let mut initial_values = HashMap::new();
    initial_values.insert(
        POINT_BLOCK.to_string(),
        DVector::from_column_slice(initial.as_slice()),
    );

    let optimizer = LevenbergMarquardtOptimizer::default();
    let result = optimizer.optimize(
        &problem,
        &initial_values,
        Some(options.to_optimizer_options(rig_error)),
    );

    let Some(values) = result else {
        debug!("Levenberg-Marquardt returned no solution");
        return None;
    };
    let x = values.get(POINT_BLOCK)?;
    if x.len() != 3 || x.iter().any(|v| !v.is_finite()) {
        return None;
    }
    Some(Vector3::new(x[0], x[1], x[2]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rig_error_only_used_when_requested() {
        let options = SolverOptions::default();
        let opts = options.to_optimizer_options(Some(0.5));
        assert_eq!(opts.min_error_threshold, options.min_error);
        assert_eq!(opts.max_iteration, 1000);

        let options = SolverOptions {
            stop_at_rig_error: true,
            ..SolverOptions::default()
        };
        let opts = options.to_optimizer_options(Some(0.5));
        assert_eq!(opts.min_error_threshold, 0.25);
        let opts = options.to_optimizer_options(None);
        assert_eq!(opts.min_error_threshold, options.min_error);
    }
}
