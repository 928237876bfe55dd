//! Search for the sparsest approximation that meets an error limit.
//!
//! The reconstruction error tends to grow with the minimum spacing between
//! tumbles, so the spacing is bisected for a large value whose mse stays
//! under the limit. Greedy peak suppression does not make the error strictly
//! monotone in the spacing, so the result is a feasible spacing whose
//! bracket partner is infeasible, not necessarily the largest feasible one. When even a spacing of one timestep is too coarse, the
//! curvature peak height threshold is dropped and the smoothing applied to
//! the headings and curvature is halved, each time restarting the bracket.

use super::{check_inputs, get_approximate_with, Approximation, ApproximationError, ApproximationParams};
use crate::trajectory::{curvature, smooth_headings, smooth_window};
use log::{debug, info, warn};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Parameters of [`find_approximation`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchParams {
    /// Target mean squared reconstruction error.
    pub error_limit: f64,
    /// Budget of approximations evaluated.
    pub max_iterations: usize,
    /// Spacing tried first.
    pub distance_first: usize,
    /// Minimum curvature of a tumble, dropped if the limit cannot be met.
    pub height_first: Option<f64>,
    /// Initial moving-average window for the headings.
    pub smooth_e0_first: usize,
    /// Initial moving-average window for the curvature.
    pub smooth_k_first: usize,
    /// Accept a feasible candidate whose mse is within `tolerance · error_limit`
    /// of the limit.
    pub tolerance: f64,
    pub planarity_window: usize,
}

impl Default for SearchParams {
    fn default() -> Self {
        SearchParams {
            error_limit: 0.05,
            max_iterations: 50,
            distance_first: 100,
            height_first: None,
            smooth_e0_first: 251,
            smooth_k_first: 251,
            tolerance: 0.01,
            planarity_window: super::DEFAULT_PLANARITY_WINDOW,
        }
    }
}

/// The approximation found by [`find_approximation`] and the settings that
/// produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub approximation: Approximation,
    pub distance: usize,
    pub height: Option<f64>,
    pub smooth_e0: usize,
    pub smooth_k: usize,
    /// Approximations evaluated.
    pub iterations: usize,
    /// `false` when the budget ran out before the search settled; the
    /// approximation is then the best candidate seen.
    pub converged: bool,
}

impl SearchOutcome {
    /// Turns a search that did not converge into an error.
    pub fn into_converged(self, error_limit: f64) -> Result<Self, ApproximationError> {
        if self.converged {
            Ok(self)
        } else {
            Err(ApproximationError::NotConverged {
                error_limit,
                best_mse: self.approximation.mse,
                iterations: self.iterations,
            })
        }
    }
}

/// Smoothing and threshold settings for one bracket of the search.
#[derive(Debug, Clone, Copy)]
struct Relaxation {
    height: Option<f64>,
    smooth_e0: usize,
    smooth_k: usize,
}

impl Relaxation {
    /// The next, more permissive setting, if any: drop the height first,
    /// then halve the smoothing windows.
    fn relax(self) -> Option<Self> {
        if self.height.is_some() {
            return Some(Relaxation {
                height: None,
                ..self
            });
        }
        if self.smooth_e0 <= 1 && self.smooth_k <= 1 {
            return None;
        }
        Some(Relaxation {
            height: None,
            smooth_e0: halve_window(self.smooth_e0),
            smooth_k: halve_window(self.smooth_k),
        })
    }

    fn curvature(&self, e0_raw: &[Vector3<f64>]) -> Vec<f64> {
        let e0 = smooth_headings(e0_raw, self.smooth_e0);
        smooth_window(&curvature(&e0), self.smooth_k)
    }
}

fn odd_window(window: usize) -> usize {
    if window <= 1 {
        1
    } else {
        window | 1
    }
}

fn halve_window(window: usize) -> usize {
    odd_window(window / 2)
}

struct Candidate {
    approximation: Approximation,
    distance: usize,
    relaxation: Relaxation,
}

impl Candidate {
    fn into_outcome(self, iterations: usize, converged: bool) -> SearchOutcome {
        SearchOutcome {
            approximation: self.approximation,
            distance: self.distance,
            height: self.relaxation.height,
            smooth_e0: self.relaxation.smooth_e0,
            smooth_k: self.relaxation.smooth_k,
            iterations,
            converged,
        }
    }
}

/// Finds the approximation with the largest tumble spacing whose mse does
/// not exceed `params.error_limit`.
///
/// The curvature is computed from `e0_raw` after smoothing it with a
/// `smooth_e0` window, then smoothed itself with a `smooth_k` window.
/// The spacing is bisected over `[1, T]` starting from `distance_first`.
/// The search stops once the bracket has width one, once a feasible mse is
/// within the tolerance of the limit, or when `max_iterations`
/// approximations have been evaluated. Running out of budget is not an
/// error: a warning is logged and the best candidate is returned with
/// `converged == false` (see [`SearchOutcome::into_converged`]).
///
/// # Errors
///
/// [`ApproximationError::Precondition`] if `x` and `e0_raw` differ in length,
/// `x` has fewer than two samples, `error_limit` is not positive, or
/// `distance_first` or `max_iterations` is zero.
pub fn find_approximation(
    x: &[Vector3<f64>],
    e0_raw: &[Vector3<f64>],
    params: &SearchParams,
) -> Result<SearchOutcome, ApproximationError> {
    check_inputs(x.len(), e0_raw.len())?;
    if !(params.error_limit > 0.0) {
        return Err(ApproximationError::Precondition(format!(
            "error limit must be positive, got {}",
            params.error_limit
        )));
    }
    if params.distance_first == 0 {
        return Err(ApproximationError::Precondition(
            "distance_first must be at least 1".to_string(),
        ));
    }
    if params.max_iterations == 0 {
        return Err(ApproximationError::Precondition(
            "max_iterations must be at least 1".to_string(),
        ));
    }

    let n = x.len();
    let limit = params.error_limit;
    let mut relaxation = Relaxation {
        height: params.height_first,
        smooth_e0: odd_window(params.smooth_e0_first),
        smooth_k: odd_window(params.smooth_k_first),
    };
    let mut k = relaxation.curvature(e0_raw);

    // largest feasible and smallest infeasible distance of the current bracket
    let mut feasible: Option<usize> = None;
    let mut infeasible: Option<usize> = None;
    let mut distance = params.distance_first.min(n);

    let mut best: Option<Candidate> = None;
    let mut iterations = 0;
    let mut converged = false;

    while iterations < params.max_iterations {
        let approximation = get_approximate_with(
            x,
            &k,
            &ApproximationParams {
                distance,
                height: relaxation.height,
                planarity_window: params.planarity_window,
            },
        )?;
        iterations += 1;
        let mse = approximation.mse;
        let ok = mse <= limit;
        debug!(
            "iteration {iterations}: distance={distance} height={:?} smooth_e0={} smooth_k={} mse={mse:.6} ({})",
            relaxation.height,
            relaxation.smooth_e0,
            relaxation.smooth_k,
            if ok { "ok" } else { "too coarse" }
        );

        let candidate = Candidate {
            approximation,
            distance,
            relaxation,
        };
        if is_better(&candidate, best.as_ref(), limit) {
            best = Some(candidate);
        }

        if ok {
            feasible = Some(feasible.map_or(distance, |f| f.max(distance)));
            if limit - mse <= params.tolerance * limit {
                converged = true;
                break;
            }
        } else {
            infeasible = Some(infeasible.map_or(distance, |i| i.min(distance)));
        }

        distance = match (feasible, infeasible) {
            (Some(lo), Some(hi)) if hi <= lo + 1 => {
                converged = true;
                break;
            }
            (Some(lo), Some(hi)) => lo + (hi - lo) / 2,
            (Some(lo), None) if lo >= n => {
                // no tumbles at all is already good enough
                converged = true;
                break;
            }
            (Some(lo), None) => (lo * 2).min(n),
            (None, Some(1)) => match relaxation.relax() {
                Some(next) => {
                    info!(
                        "mse limit {limit} not reachable with smooth_e0={} smooth_k={} height={:?}; relaxing",
                        relaxation.smooth_e0, relaxation.smooth_k, relaxation.height
                    );
                    relaxation = next;
                    k = relaxation.curvature(e0_raw);
                    feasible = None;
                    infeasible = None;
                    1
                }
                None => break,
            },
            (None, Some(hi)) => (hi / 2).max(1),
            (None, None) => break,
        };
    }

    let best = best.ok_or_else(|| {
        ApproximationError::Precondition("no approximation was evaluated".to_string())
    })?;
    if !converged {
        warn!(
            "Approximation search stopped after {iterations} iterations without meeting mse limit {limit}; best mse {:.6} at distance {}",
            best.approximation.mse, best.distance
        );
    }
    Ok(best.into_outcome(iterations, converged))
}

/// A feasible candidate beats an infeasible one; among feasible ones the
/// larger distance wins, among infeasible ones the smaller mse.
fn is_better(candidate: &Candidate, best: Option<&Candidate>, limit: f64) -> bool {
    let Some(best) = best else {
        return true;
    };
    let ok = candidate.approximation.mse <= limit;
    let best_ok = best.approximation.mse <= limit;
    match (ok, best_ok) {
        (true, false) => true,
        (false, true) => false,
        (true, true) => candidate.distance > best.distance,
        (false, false) => candidate.approximation.mse < best.approximation.mse,
    }
}
