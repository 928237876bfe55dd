//! Implements the calibrated pinhole camera used by the triangulator.
//!
//! A [`PinholeCamera`] carries a world-to-camera pose, the intrinsic
//! parameters, optional radial-tangential lens distortion (`k1, k2, p1, p2, k3`)
//! and an optional fixed pixel shift. Projection follows the usual OpenCV
//! convention: rotate and translate into the camera frame, divide by depth,
//! add the shift (in normalized units), distort, then scale by the focal
//! lengths and offset by the principal point.

use crate::camera::{validation, CameraError, Intrinsics};
use nalgebra::{DMatrix, DVector, Matrix2, Matrix3, RealField, Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Convergence tolerance of the iterative undistortion.
const UNDISTORT_EPS: f64 = 1e-12;
const UNDISTORT_MAX_ITERATIONS: usize = 100;

/// A pinhole camera with optional lens distortion and pixel shift.
///
/// # Examples
///
/// ```rust
/// use nalgebra::{Matrix3, Vector3};
/// use worm3d_tools::camera::{Intrinsics, PinholeCamera};
///
/// let camera = PinholeCamera::new(
///     Matrix3::identity(),
///     Vector3::zeros(),
///     Intrinsics { fx: 1000.0, fy: 1000.0, cx: 640.0, cy: 512.0 },
///     None,
///     None,
/// )
/// .unwrap();
///
/// let uv = camera.project_to_2d(&Vector3::new(0.0, 0.0, 500.0), true);
/// assert_eq!(uv.x, 640.0);
/// assert_eq!(uv.y, 512.0);
/// ```
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct PinholeCamera {
    /// World-to-camera rotation.
    pub rotation: Matrix3<f64>,
    /// World-to-camera translation.
    pub translation: Vector3<f64>,
    pub intrinsics: Intrinsics,
    /// `[k1, k2, p1, p2, k3]`; `None` means an undistorted lens.
    pub distortion: Option<[f64; 5]>,
    /// Fixed pixel offset applied after the perspective divide.
    pub shift: Option<Vector2<f64>>,
}

impl PinholeCamera {
    /// Creates a camera from its typed parts, validating the intrinsics.
    pub fn new(
        rotation: Matrix3<f64>,
        translation: Vector3<f64>,
        intrinsics: Intrinsics,
        distortion: Option<[f64; 5]>,
        shift: Option<Vector2<f64>>,
    ) -> Result<Self, CameraError> {
        let camera = PinholeCamera {
            rotation,
            translation,
            intrinsics,
            distortion,
            shift,
        };
        camera.validate_params()?;
        Ok(camera)
    }

    /// Creates a camera from the matrix form stored by calibration records.
    ///
    /// # Arguments
    ///
    /// * `pose` - 4×4 homogeneous world-to-camera transform. Only the 3×3
    ///   rotation block and the translation column are read.
    /// * `matrix` - 3×3 intrinsic matrix; `fx = m[0,0]`, `fy = m[1,1]`,
    ///   `cx = m[0,2]`, `cy = m[1,2]`.
    /// * `distortion` - optional 5-vector `[k1, k2, p1, p2, k3]`.
    /// * `shift` - optional pixel shift.
    ///
    /// # Errors
    ///
    /// * [`CameraError::Shape`] if any input has the wrong dimensions.
    /// * [`CameraError::FocalLengthMustBePositive`] /
    ///   [`CameraError::PrincipalPointMustBeFinite`] for invalid intrinsics.
    pub fn from_matrices(
        pose: &DMatrix<f64>,
        matrix: &DMatrix<f64>,
        distortion: Option<&DVector<f64>>,
        shift: Option<Vector2<f64>>,
    ) -> Result<Self, CameraError> {
        if pose.shape() != (4, 4) {
            return Err(CameraError::shape(
                "pose",
                "4x4",
                format!("{}x{}", pose.nrows(), pose.ncols()),
            ));
        }
        if matrix.shape() != (3, 3) {
            return Err(CameraError::shape(
                "camera matrix",
                "3x3",
                format!("{}x{}", matrix.nrows(), matrix.ncols()),
            ));
        }
        let distortion = match distortion {
            Some(d) if d.len() != 5 => {
                return Err(CameraError::shape("distortion", 5, d.len()));
            }
            Some(d) => Some([d[0], d[1], d[2], d[3], d[4]]),
            None => None,
        };

        let rotation: Matrix3<f64> = pose.fixed_view::<3, 3>(0, 0).into_owned();
        let translation: Vector3<f64> = pose.fixed_view::<3, 1>(0, 3).into_owned();
        let intrinsics = Intrinsics {
            fx: matrix[(0, 0)],
            fy: matrix[(1, 1)],
            cx: matrix[(0, 2)],
            cy: matrix[(1, 2)],
        };

        PinholeCamera::new(rotation, translation, intrinsics, distortion, shift)
    }

    pub fn validate_params(&self) -> Result<(), CameraError> {
        validation::validate_intrinsics(&self.intrinsics)?;
        validation::validate_rotation(&self.rotation)?;
        Ok(())
    }

    /// Projects a world point to pixel coordinates.
    ///
    /// Distortion is applied only when `apply_distortion` is set and the
    /// camera has coefficients. The caller must make sure the point does not
    /// lie in the camera's focal plane (camera-frame `Z == 0`); no check is
    /// made here and such points yield non-finite coordinates.
    pub fn project_to_2d(&self, point: &Vector3<f64>, apply_distortion: bool) -> Vector2<f64> {
        self.project_generic(point, apply_distortion)
    }

    /// Projection generic over the scalar type, so that the same math can be
    /// evaluated on dual numbers by the optimizer.
    pub fn project_generic<T: RealField>(&self, point: &Vector3<T>, apply_distortion: bool) -> Vector2<T> {
        let rotation: Matrix3<T> = self.rotation.cast::<T>();
        let translation: Vector3<T> = self.translation.cast::<T>();
        let p = rotation * point + translation;

        let fx = T::from_f64(self.intrinsics.fx).unwrap_or_else(T::zero);
        let fy = T::from_f64(self.intrinsics.fy).unwrap_or_else(T::zero);
        let cx = T::from_f64(self.intrinsics.cx).unwrap_or_else(T::zero);
        let cy = T::from_f64(self.intrinsics.cy).unwrap_or_else(T::zero);

        let mut x = p[0].clone() / p[2].clone();
        let mut y = p[1].clone() / p[2].clone();

        if let Some(shift) = self.shift {
            x += T::from_f64(shift.x / self.intrinsics.fx).unwrap_or_else(T::zero);
            y += T::from_f64(shift.y / self.intrinsics.fy).unwrap_or_else(T::zero);
        }

        if apply_distortion {
            if let Some(distortion) = &self.distortion {
                let k: [T; 5] = distortion.map(|v| T::from_f64(v).unwrap_or_else(T::zero));
                (x, y) = distort(x, y, &k);
            }
        }

        Vector2::new(fx * x + cx, fy * y + cy)
    }

    /// Back-projects a pixel to a unit ray direction in world coordinates.
    ///
    /// This inverts the intrinsics, the shift and (when requested) the lens
    /// distortion, the latter by Newton iteration on the distortion
    /// polynomial. The ray starts at [`PinholeCamera::center`].
    pub fn unproject_ray(
        &self,
        pixel: &Vector2<f64>,
        apply_distortion: bool,
    ) -> Result<Vector3<f64>, CameraError> {
        let target = Vector2::new(
            (pixel.x - self.intrinsics.cx) / self.intrinsics.fx,
            (pixel.y - self.intrinsics.cy) / self.intrinsics.fy,
        );

        let mut point = target;
        if apply_distortion {
            if let Some(k) = &self.distortion {
                point = undistort(&target, k)?;
            }
        }

        if let Some(shift) = self.shift {
            point.x -= shift.x / self.intrinsics.fx;
            point.y -= shift.y / self.intrinsics.fy;
        }

        let ray_camera = Vector3::new(point.x, point.y, 1.0);
        Ok((self.rotation.transpose() * ray_camera).normalize())
    }

    /// Optical centre in world coordinates.
    pub fn center(&self) -> Vector3<f64> {
        -(self.rotation.transpose() * self.translation)
    }

    /// Packs the camera into the coefficient layout of
    /// [`DynamicCameras`](crate::camera::DynamicCameras):
    /// `fx, fy, cx, cy, R (row-major), t, k1, k2, p1, p2, k3, shift`.
    ///
    /// The batched model carries a single shift scalar per camera, so it is
    /// passed explicitly.
    pub fn to_coefficients(&self, shift: f64) -> [f64; super::N_CAMERA_COEFFICIENTS] {
        let mut c = [0.0; super::N_CAMERA_COEFFICIENTS];
        c[0] = self.intrinsics.fx;
        c[1] = self.intrinsics.fy;
        c[2] = self.intrinsics.cx;
        c[3] = self.intrinsics.cy;
        for row in 0..3 {
            for col in 0..3 {
                c[4 + row * 3 + col] = self.rotation[(row, col)];
            }
        }
        c[13..16].copy_from_slice(self.translation.as_slice());
        c[16..21].copy_from_slice(&self.distortion.unwrap_or([0.0; 5]));
        c[21] = shift;
        c
    }
}

impl fmt::Debug for PinholeCamera {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PinholeCamera [fx: {} fy: {} cx: {} cy: {} t: {:?} distortion: {:?} shift: {:?}]",
            self.intrinsics.fx,
            self.intrinsics.fy,
            self.intrinsics.cx,
            self.intrinsics.cy,
            self.translation.as_slice(),
            self.distortion,
            self.shift.map(|s| [s.x, s.y]),
        )
    }
}

/// Applies radial (`k1, k2, k3`) and tangential (`p1, p2`) distortion to
/// normalized image coordinates.
pub(crate) fn distort<T: RealField>(x: T, y: T, k: &[T; 5]) -> (T, T) {
    let [k1, k2, p1, p2, k3] = k.clone();
    let two = T::one() + T::one();

    let xy = x.clone() * y.clone();
    let x2 = x.clone() * x.clone();
    let y2 = y.clone() * y.clone();
    let r2 = x2.clone() + y2.clone();
    let r4 = r2.clone() * r2.clone();
    let r6 = r4.clone() * r2.clone();
    let radial = T::one() + k1 * r2.clone() + k2 * r4 + k3 * r6;

    let x_distorted = x * radial.clone()
        + two.clone() * p1.clone() * xy.clone()
        + p2.clone() * (r2.clone() + two.clone() * x2);
    let y_distorted = y * radial + p1 * (r2 + two.clone() * y2) + two * p2 * xy;

    (x_distorted, y_distorted)
}

/// Inverts [`distort`] by Newton iteration starting from the distorted point.
fn undistort(target: &Vector2<f64>, k: &[f64; 5]) -> Result<Vector2<f64>, CameraError> {
    let [k1, k2, p1, p2, k3] = *k;
    let mut point = *target;

    for _ in 0..UNDISTORT_MAX_ITERATIONS {
        let (x, y) = (point.x, point.y);
        let (xd, yd) = distort(x, y, k);
        let error = Vector2::new(xd, yd) - target;
        if error.norm() < UNDISTORT_EPS {
            return Ok(point);
        }

        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let radial = 1.0 + k1 * r2 + k2 * r4 + k3 * r4 * r2;
        let d_radial = k1 + 2.0 * k2 * r2 + 3.0 * k3 * r4;

        let j00 = radial + 2.0 * x * x * d_radial + 2.0 * p1 * y + 6.0 * p2 * x;
        let j01 = 2.0 * x * y * d_radial + 2.0 * p1 * x + 2.0 * p2 * y;
        let j10 = 2.0 * x * y * d_radial + 2.0 * p1 * x + 2.0 * p2 * y;
        let j11 = radial + 2.0 * y * y * d_radial + 6.0 * p1 * y + 2.0 * p2 * x;
        let jacobian = Matrix2::new(j00, j01, j10, j11);

        let inv_jacobian = jacobian.try_inverse().ok_or_else(|| {
            CameraError::InvalidParams("Distortion Jacobian is singular".to_string())
        })?;
        let delta = inv_jacobian * error;
        point -= delta;
        if delta.norm() < UNDISTORT_EPS {
            return Ok(point);
        }
    }

    Err(CameraError::InvalidParams(format!(
        "Undistortion did not converge after {UNDISTORT_MAX_ITERATIONS} iterations"
    )))
}
