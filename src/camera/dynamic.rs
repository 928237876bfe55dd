//! Batched projection over many camera triplets.
//!
//! [`DynamicCameras`] evaluates the same projection as
//! [`PinholeCamera`](crate::camera::PinholeCamera) for a whole batch of rigs at
//! once. Each batch item pairs a `3×22` coefficient matrix (one row per
//! camera) with a `3×P` matrix of world points; the result holds one `2×P`
//! pixel matrix per camera.
//!
//! The model is stateless: coefficients are unpacked into a
//! [`CameraCoefficients`] value for the duration of a call and dropped
//! afterwards.

use crate::camera::{pinhole::distort, CameraError, N_CAMERAS};
use nalgebra::{DMatrix, Matrix2xX, Matrix3, Matrix3xX, Vector3};

/// Number of packed coefficients per camera:
/// `fx, fy, cx, cy` (4), rotation row-major (9), translation (3),
/// `k1, k2, p1, p2, k3` (5) and one shift scalar.
pub const N_CAMERA_COEFFICIENTS: usize = 22;

const ROTATION_OFFSET: usize = 4;
const TRANSLATION_OFFSET: usize = 13;
const DISTORTION_OFFSET: usize = 16;
const SHIFT_OFFSET: usize = 21;

/// One camera's coefficients, unpacked from a packed row.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraCoefficients {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
    pub distortion: [f64; 5],
    pub shift: f64,
}

impl CameraCoefficients {
    /// Unpacks a row of [`N_CAMERA_COEFFICIENTS`] values.
    pub fn unpack(row: &[f64]) -> Result<Self, CameraError> {
        if row.len() != N_CAMERA_COEFFICIENTS {
            return Err(CameraError::shape(
                "camera coefficients",
                N_CAMERA_COEFFICIENTS,
                row.len(),
            ));
        }

        let mut distortion = [0.0; 5];
        distortion.copy_from_slice(&row[DISTORTION_OFFSET..SHIFT_OFFSET]);

        Ok(CameraCoefficients {
            fx: row[0],
            fy: row[1],
            cx: row[2],
            cy: row[3],
            rotation: Matrix3::from_row_slice(&row[ROTATION_OFFSET..TRANSLATION_OFFSET]),
            translation: Vector3::from_row_slice(&row[TRANSLATION_OFFSET..DISTORTION_OFFSET]),
            distortion,
            shift: row[SHIFT_OFFSET],
        })
    }

    /// Shift in normalized image coordinates for the camera at `index`.
    ///
    /// The rig mounts the cameras so that camera 0 is shifted along x,
    /// camera 1 along -y and camera 2 along +y.
    fn normalized_shift(&self, index: usize) -> (f64, f64) {
        match index {
            0 => (self.shift / self.fx, 0.0),
            1 => (0.0, -self.shift / self.fy),
            _ => (0.0, self.shift / self.fy),
        }
    }
}

/// Stateless batched projection model.
#[derive(Debug, Clone, Copy)]
pub struct DynamicCameras {
    /// Apply the lens distortion polynomial.
    pub distort: bool,
}

impl Default for DynamicCameras {
    fn default() -> Self {
        DynamicCameras { distort: true }
    }
}

impl DynamicCameras {
    pub fn new(distort: bool) -> Self {
        DynamicCameras { distort }
    }

    /// Projects every batch item's points through its three cameras.
    ///
    /// # Arguments
    ///
    /// * `coefficients` - one `3×22` matrix per batch item.
    /// * `points` - one `3×P` matrix of world points per batch item. `P` may
    ///   differ between items.
    ///
    /// # Returns
    ///
    /// Per batch item, one `2×P` matrix of pixel coordinates per camera.
    ///
    /// # Errors
    ///
    /// [`CameraError::Shape`] if the batch lengths differ or any coefficient
    /// matrix is not `3×22`.
    pub fn project(
        &self,
        coefficients: &[DMatrix<f64>],
        points: &[Matrix3xX<f64>],
    ) -> Result<Vec<[Matrix2xX<f64>; N_CAMERAS]>, CameraError> {
        if coefficients.len() != points.len() {
            return Err(CameraError::shape(
                "batch",
                format!("{} point sets", coefficients.len()),
                points.len(),
            ));
        }

        coefficients
            .iter()
            .zip(points)
            .map(|(c, p)| self.project_single(c, p))
            .collect()
    }

    /// Projects one batch item; see [`DynamicCameras::project`].
    pub fn project_single(
        &self,
        coefficients: &DMatrix<f64>,
        points: &Matrix3xX<f64>,
    ) -> Result<[Matrix2xX<f64>; N_CAMERAS], CameraError> {
        if coefficients.nrows() != N_CAMERAS {
            return Err(CameraError::shape(
                "camera dimension",
                N_CAMERAS,
                coefficients.nrows(),
            ));
        }
        if coefficients.ncols() != N_CAMERA_COEFFICIENTS {
            return Err(CameraError::shape(
                "camera coefficients",
                N_CAMERA_COEFFICIENTS,
                coefficients.ncols(),
            ));
        }

        let mut unpacked = Vec::with_capacity(N_CAMERAS);
        for row in coefficients.row_iter() {
            let row: Vec<f64> = row.iter().copied().collect();
            unpacked.push(CameraCoefficients::unpack(&row)?);
        }

        let mut out: [Matrix2xX<f64>; N_CAMERAS] =
            std::array::from_fn(|_| Matrix2xX::zeros(points.ncols()));
        for (index, camera) in unpacked.iter().enumerate() {
            let (shift_x, shift_y) = camera.normalized_shift(index);
            for (j, point) in points.column_iter().enumerate() {
                let p = camera.rotation * point + camera.translation;
                let mut x = p.x / p.z + shift_x;
                let mut y = p.y / p.z + shift_y;
                if self.distort {
                    (x, y) = distort(x, y, &camera.distortion);
                }
                out[index][(0, j)] = camera.fx * x + camera.cx;
                out[index][(1, j)] = camera.fy * y + camera.cy;
            }
        }

        Ok(out)
    }
}
