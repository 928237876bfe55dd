//! Reprojection cost of one 3D point observed by the three rig cameras.

use crate::camera::{PinholeCamera, N_CAMERAS};
use nalgebra::{DVector, Vector2, Vector3};
use tiny_solver::factors::Factor;

/// Residual block for `tiny_solver`: the six pixel differences between the
/// projections of a candidate point and one detection per camera.
///
/// The sum of squares of these residuals is the square of the triangulation
/// objective `sqrt(Σ_c ||project(x, c) − d_c||²)`, so both share a minimizer.
#[derive(Debug, Clone)]
pub struct TriangulationCost {
    cameras: [PinholeCamera; N_CAMERAS],
    detections: [Vector2<f64>; N_CAMERAS],
    apply_distortion: bool,
}

impl TriangulationCost {
    pub fn new(
        cameras: &[PinholeCamera; N_CAMERAS],
        detections: [Vector2<f64>; N_CAMERAS],
        apply_distortion: bool,
    ) -> Self {
        TriangulationCost {
            cameras: cameras.clone(),
            detections,
            apply_distortion,
        }
    }

    pub fn num_residuals(&self) -> usize {
        2 * N_CAMERAS
    }

    /// The triangulation objective evaluated at `point`.
    pub fn objective(&self, point: &Vector3<f64>) -> f64 {
        self.cameras
            .iter()
            .zip(&self.detections)
            .map(|(camera, detection)| {
                (camera.project_to_2d(point, self.apply_distortion) - detection).norm_squared()
            })
            .sum::<f64>()
            .sqrt()
    }
}

impl<T: nalgebra::RealField> Factor<T> for TriangulationCost {
    fn residual_func(&self, params: &[DVector<T>]) -> DVector<T> {
        let p = &params[0];
        let point = Vector3::new(p[0].clone(), p[1].clone(), p[2].clone());

        let mut residuals = DVector::zeros(2 * N_CAMERAS);
        for (c, (camera, detection)) in self.cameras.iter().zip(&self.detections).enumerate() {
            let projected = camera.project_generic(&point, self.apply_distortion);
            let observed: Vector2<T> = detection.cast::<T>();
            residuals[2 * c] = projected.x.clone() - observed.x.clone();
            residuals[2 * c + 1] = projected.y.clone() - observed.y.clone();
        }
        residuals
    }
}
