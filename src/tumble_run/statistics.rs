//! Pooled tumble and run statistics over many approximations.

use super::{Approximation, ApproximationError};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Distributions collected from a set of approximations, in physical units.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TumbleRunStatistics {
    /// Run durations in seconds.
    pub run_durations: Vec<f64>,
    /// Run speeds in distance per second.
    pub run_speeds: Vec<f64>,
    pub planar_angles: Vec<f64>,
    pub nonplanar_angles: Vec<f64>,
    pub twist_angles: Vec<f64>,
    /// Path length of each approximation.
    pub trajectory_lengths: Vec<f64>,
    /// Tumbles per second of each approximation.
    pub tumble_rates: Vec<f64>,
}

impl TumbleRunStatistics {
    /// Pools the runs and tumbles of `approximations` sampled every `dt`
    /// seconds.
    pub fn from_approximations(
        approximations: &[Approximation],
        dt: f64,
    ) -> Result<Self, ApproximationError> {
        if !(dt > 0.0) || !dt.is_finite() {
            return Err(ApproximationError::Precondition(format!(
                "time step must be positive and finite, got {dt}"
            )));
        }

        let mut stats = TumbleRunStatistics::default();
        for approximation in approximations {
            stats
                .run_durations
                .extend(approximation.run_durations.iter().map(|&d| d as f64 * dt));
            stats
                .run_speeds
                .extend(approximation.run_speeds.iter().map(|s| s / dt));
            stats
                .planar_angles
                .extend_from_slice(&approximation.planar_angles);
            stats
                .nonplanar_angles
                .extend_from_slice(&approximation.nonplanar_angles);
            stats
                .twist_angles
                .extend_from_slice(&approximation.twist_angles);

            let length: f64 = approximation
                .vertices
                .windows(2)
                .map(|v| (v[1] - v[0]).norm())
                .sum();
            stats.trajectory_lengths.push(length);

            let duration = approximation.run_durations.iter().sum::<usize>() as f64 * dt;
            stats
                .tumble_rates
                .push(approximation.num_tumbles() as f64 / duration);
        }
        Ok(stats)
    }

    pub fn num_runs(&self) -> usize {
        self.run_durations.len()
    }

    pub fn mean_run_duration(&self) -> Option<f64> {
        mean(&self.run_durations)
    }

    pub fn mean_run_speed(&self) -> Option<f64> {
        mean(&self.run_speeds)
    }

    /// Standard deviation over mean of the run durations; `None` without runs
    /// or with a zero mean.
    pub fn coefficient_of_variation(&self) -> Option<f64> {
        let m = mean(&self.run_durations)?;
        if m == 0.0 {
            return None;
        }
        let variance = self
            .run_durations
            .iter()
            .map(|d| (d - m).powi(2))
            .sum::<f64>()
            / self.run_durations.len() as f64;
        Some(variance.sqrt() / m)
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Mean squared displacement of `x` for each lag in `deltas` (in samples).
///
/// A lag with no pair of samples, i.e. `delta >= x.len()`, gives `None`.
pub fn mean_squared_displacement(x: &[Vector3<f64>], deltas: &[usize]) -> Vec<Option<f64>> {
    deltas
        .iter()
        .map(|&delta| {
            if delta >= x.len() {
                return None;
            }
            let pairs = x.len() - delta;
            let total: f64 = x
                .iter()
                .zip(&x[delta..])
                .map(|(a, b)| (b - a).norm_squared())
                .sum();
            Some(total / pairs as f64)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trajectory::{curvature, headings};
    use crate::tumble_run::get_approximate;
    use approx::assert_relative_eq;

    fn square_path() -> Vec<Vector3<f64>> {
        let mut points = vec![Vector3::zeros()];
        for t in 0..40 {
            let step = match t / 10 {
                0 => Vector3::x(),
                1 => Vector3::y(),
                2 => -Vector3::x(),
                _ => -Vector3::y(),
            };
            let last = points[points.len() - 1];
            points.push(last + step);
        }
        points
    }

    #[test]
    fn test_pooled_statistics() {
        let x = square_path();
        let k = curvature(&headings(&x));
        let approx = get_approximate(&x, &k, 5).unwrap();
        assert_eq!(approx.tumble_indices, vec![10, 20, 30]);

        let stats = TumbleRunStatistics::from_approximations(&[approx.clone(), approx], 0.5).unwrap();
        assert_eq!(stats.num_runs(), 8);
        assert_eq!(stats.planar_angles.len(), 6);
        assert_relative_eq!(stats.mean_run_duration().unwrap(), 5.0);
        assert_relative_eq!(stats.mean_run_speed().unwrap(), 2.0);
        assert_relative_eq!(stats.trajectory_lengths[0], 40.0);
        assert_relative_eq!(stats.tumble_rates[0], 3.0 / 20.0);
        // equal runs
        assert_relative_eq!(stats.coefficient_of_variation().unwrap(), 0.0);
    }

    #[test]
    fn test_invalid_time_step() {
        assert!(TumbleRunStatistics::from_approximations(&[], 0.0).is_err());
        assert!(TumbleRunStatistics::from_approximations(&[], f64::NAN).is_err());
        let empty = TumbleRunStatistics::from_approximations(&[], 0.1).unwrap();
        assert!(empty.coefficient_of_variation().is_none());
    }

    #[test]
    fn test_mean_squared_displacement() {
        let x: Vec<Vector3<f64>> = (0..10).map(|t| Vector3::new(t as f64, 0.0, 0.0)).collect();
        let msd = mean_squared_displacement(&x, &[0, 1, 3, 10]);
        assert_eq!(msd[0], Some(0.0));
        assert_relative_eq!(msd[1].unwrap(), 1.0);
        assert_relative_eq!(msd[2].unwrap(), 9.0);
        assert_eq!(msd[3], None);
    }
}
