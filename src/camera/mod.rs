//! Camera models for the three-view rig.
//!
//! This module holds the shared pieces used by every camera representation:
//! the [`Intrinsics`] record, the [`CameraError`] type, parameter validation
//! and the [`CameraTriplet`] that bundles the three synchronized cameras of
//! one calibration. The per-camera projection lives in [`pinhole`], the
//! batched projection over many triplets in [`dynamic`].

pub mod dynamic;
pub mod pinhole;

pub use dynamic::{CameraCoefficients, DynamicCameras, N_CAMERA_COEFFICIENTS};
pub use pinhole::PinholeCamera;

use nalgebra::{Matrix3, Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::{fs, io::Write};
use yaml_rust::{Yaml, YamlLoader};

/// Number of cameras in a synchronized rig.
pub const N_CAMERAS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

#[derive(thiserror::Error, Debug)]
pub enum CameraError {
    #[error("Invalid shape for {what}: expected {expected}, found {found}")]
    Shape {
        what: &'static str,
        expected: String,
        found: String,
    },
    #[error("Focal length must be positive")]
    FocalLengthMustBePositive,
    #[error("Principal point must be finite")]
    PrincipalPointMustBeFinite,
    #[error("Invalid camera parameters: {0}")]
    InvalidParams(String),
    #[error("Failed to load YAML: {0}")]
    YamlError(String),
    #[error("IO Error: {0}")]
    IOError(String),
}

impl CameraError {
    pub(crate) fn shape(what: &'static str, expected: impl ToString, found: impl ToString) -> Self {
        CameraError::Shape {
            what,
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }
}

impl From<std::io::Error> for CameraError {
    fn from(err: std::io::Error) -> Self {
        CameraError::IOError(err.to_string())
    }
}

impl From<yaml_rust::ScanError> for CameraError {
    fn from(err: yaml_rust::ScanError) -> Self {
        CameraError::YamlError(err.to_string())
    }
}

/// Common validation functions for camera parameters
pub mod validation {
    use super::*;

    pub fn validate_intrinsics(intrinsics: &Intrinsics) -> Result<(), CameraError> {
        if intrinsics.fx <= 0.0 || intrinsics.fy <= 0.0 {
            return Err(CameraError::FocalLengthMustBePositive);
        }
        if !intrinsics.cx.is_finite() || !intrinsics.cy.is_finite() {
            return Err(CameraError::PrincipalPointMustBeFinite);
        }
        Ok(())
    }

    pub fn validate_rotation(rotation: &Matrix3<f64>) -> Result<(), CameraError> {
        if rotation.iter().any(|v| !v.is_finite()) {
            return Err(CameraError::InvalidParams(
                "Rotation contains non-finite values".to_string(),
            ));
        }
        Ok(())
    }
}

/// The three cameras of one synchronized rig, together with the residual
/// reprojection error of the calibration that produced them.
///
/// Cameras are immutable once calibrated; the triplet is shared read-only
/// between every frame triangulated with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraTriplet {
    pub cameras: [PinholeCamera; N_CAMERAS],
    /// Mean reprojection error (pixels) reported by the calibration, if known.
    pub reprojection_error: Option<f64>,
}

impl CameraTriplet {
    pub fn new(cameras: [PinholeCamera; N_CAMERAS]) -> Self {
        CameraTriplet {
            cameras,
            reprojection_error: None,
        }
    }

    #[must_use]
    pub fn with_reprojection_error(self, reprojection_error: f64) -> Self {
        Self {
            reprojection_error: Some(reprojection_error),
            ..self
        }
    }

    pub fn get_camera_model_triplet(&self) -> &[PinholeCamera; N_CAMERAS] {
        &self.cameras
    }

    /// Projects a world point through all three cameras.
    pub fn project_to_2d(&self, point: &Vector3<f64>, apply_distortion: bool) -> [Vector2<f64>; 3] {
        [
            self.cameras[0].project_to_2d(point, apply_distortion),
            self.cameras[1].project_to_2d(point, apply_distortion),
            self.cameras[2].project_to_2d(point, apply_distortion),
        ]
    }

    /// Loads a rig from a YAML file with `cam0`, `cam1` and `cam2` sections.
    ///
    /// Each section carries `intrinsics: [fx, fy, cx, cy]`, a row-major
    /// `rotation` (9 values), a `translation` (3 values) and optionally
    /// `distortion: [k1, k2, p1, p2, k3]` and `shift: [sx, sy]`. A top-level
    /// `reprojection_error` is read when present.
    ///
    /// # Errors
    ///
    /// * [`CameraError::IOError`] / [`CameraError::YamlError`] if the file
    ///   cannot be read or parsed.
    /// * [`CameraError::Shape`] if a list has the wrong number of entries.
    /// * [`CameraError::InvalidParams`] for missing sections or non-numeric values.
    pub fn load_from_yaml(path: &str) -> Result<Self, CameraError> {
        let contents = fs::read_to_string(path)?;
        let docs = YamlLoader::load_from_str(&contents)?;

        if docs.is_empty() {
            return Err(CameraError::InvalidParams(
                "Empty YAML document".to_string(),
            ));
        }
        let doc = &docs[0];

        let cameras = [
            camera_from_yaml(&doc["cam0"], "cam0")?,
            camera_from_yaml(&doc["cam1"], "cam1")?,
            camera_from_yaml(&doc["cam2"], "cam2")?,
        ];

        let reprojection_error = match &doc["reprojection_error"] {
            Yaml::BadValue | Yaml::Null => None,
            value => Some(yaml_f64(value).ok_or_else(|| {
                CameraError::InvalidParams("Invalid reprojection_error".to_string())
            })?),
        };

        Ok(CameraTriplet {
            cameras,
            reprojection_error,
        })
    }

    /// Saves the rig in the layout read by [`CameraTriplet::load_from_yaml`].
    pub fn save_to_yaml(&self, path: &str) -> Result<(), CameraError> {
        let yaml_err = |e: serde_yaml::Error| CameraError::YamlError(e.to_string());

        let mut root = serde_yaml::Mapping::new();
        if let Some(err) = self.reprojection_error {
            root.insert(
                serde_yaml::Value::String("reprojection_error".to_string()),
                serde_yaml::to_value(err).map_err(yaml_err)?,
            );
        }

        for (i, camera) in self.cameras.iter().enumerate() {
            let mut section = serde_yaml::Mapping::new();
            let intrinsics = camera.intrinsics;
            section.insert(
                serde_yaml::Value::String("intrinsics".to_string()),
                serde_yaml::to_value(vec![intrinsics.fx, intrinsics.fy, intrinsics.cx, intrinsics.cy])
                    .map_err(yaml_err)?,
            );
            // nalgebra iterates column-major; the file stores rows.
            let rotation: Vec<f64> = camera.rotation.transpose().iter().copied().collect();
            section.insert(
                serde_yaml::Value::String("rotation".to_string()),
                serde_yaml::to_value(rotation).map_err(yaml_err)?,
            );
            section.insert(
                serde_yaml::Value::String("translation".to_string()),
                serde_yaml::to_value(camera.translation.iter().copied().collect::<Vec<_>>())
                    .map_err(yaml_err)?,
            );
            if let Some(distortion) = camera.distortion {
                section.insert(
                    serde_yaml::Value::String("distortion".to_string()),
                    serde_yaml::to_value(distortion.to_vec()).map_err(yaml_err)?,
                );
            }
            if let Some(shift) = camera.shift {
                section.insert(
                    serde_yaml::Value::String("shift".to_string()),
                    serde_yaml::to_value(vec![shift.x, shift.y]).map_err(yaml_err)?,
                );
            }
            root.insert(
                serde_yaml::Value::String(format!("cam{i}")),
                serde_yaml::Value::Mapping(section),
            );
        }

        let yaml_string = serde_yaml::to_string(&root).map_err(yaml_err)?;
        let mut file = fs::File::create(path)?;
        file.write_all(yaml_string.as_bytes())?;

        Ok(())
    }
}

fn yaml_f64(value: &Yaml) -> Option<f64> {
    // yaml-rust keeps integers and reals apart
    value.as_f64().or_else(|| value.as_i64().map(|v| v as f64))
}

fn yaml_floats(
    node: &Yaml,
    what: &'static str,
    expected_len: usize,
) -> Result<Vec<f64>, CameraError> {
    let list = node
        .as_vec()
        .ok_or_else(|| CameraError::InvalidParams(format!("Missing or invalid {what}")))?;
    if list.len() != expected_len {
        return Err(CameraError::shape(what, expected_len, list.len()));
    }
    list.iter()
        .enumerate()
        .map(|(i, v)| {
            yaml_f64(v).ok_or_else(|| {
                CameraError::InvalidParams(format!("Invalid {what} value at index {i}"))
            })
        })
        .collect()
}

fn camera_from_yaml(node: &Yaml, name: &str) -> Result<PinholeCamera, CameraError> {
    if node.is_badvalue() {
        return Err(CameraError::InvalidParams(format!(
            "Missing camera section {name}"
        )));
    }

    let k = yaml_floats(&node["intrinsics"], "intrinsics", 4)?;
    let r = yaml_floats(&node["rotation"], "rotation", 9)?;
    let t = yaml_floats(&node["translation"], "translation", 3)?;

    let distortion = if node["distortion"].is_badvalue() {
        None
    } else {
        let d = yaml_floats(&node["distortion"], "distortion", 5)?;
        Some([d[0], d[1], d[2], d[3], d[4]])
    };
    let shift = if node["shift"].is_badvalue() {
        None
    } else {
        let s = yaml_floats(&node["shift"], "shift", 2)?;
        Some(Vector2::new(s[0], s[1]))
    };

    PinholeCamera::new(
        Matrix3::from_row_slice(&r),
        Vector3::new(t[0], t[1], t[2]),
        Intrinsics {
            fx: k[0],
            fy: k[1],
            cx: k[2],
            cy: k[3],
        },
        distortion,
        shift,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_triplet_load_from_yaml() {
        let rig = CameraTriplet::load_from_yaml("samples/rig.yaml").unwrap();

        assert_eq!(rig.reprojection_error, Some(0.8));
        assert_eq!(rig.cameras[0].intrinsics.fx, 1000.0);
        assert_eq!(rig.cameras[0].intrinsics.cy, 512.0);
        assert_eq!(rig.cameras[0].distortion, Some([-0.1, 0.02, 0.001, -0.0005, 0.0]));
        assert!(rig.cameras[0].shift.is_none());
        assert_eq!(rig.cameras[2].shift, Some(Vector2::new(1.5, -2.0)));
        // identity rotation for the reference camera
        assert_relative_eq!(rig.cameras[0].rotation, Matrix3::identity());
    }

    #[test]
    fn test_triplet_save_to_yaml() {
        fs::create_dir_all("output").expect("Failed to create output directory for test.");
        let output_path = "output/rig_saved.yaml";

        let rig = CameraTriplet::load_from_yaml("samples/rig.yaml").unwrap();
        rig.save_to_yaml(output_path).unwrap();
        let saved = CameraTriplet::load_from_yaml(output_path).unwrap();

        assert_eq!(rig.reprojection_error, saved.reprojection_error);
        for (a, b) in rig.cameras.iter().zip(saved.cameras.iter()) {
            assert_eq!(a.intrinsics, b.intrinsics);
            assert_eq!(a.distortion, b.distortion);
            assert_eq!(a.shift, b.shift);
            assert_relative_eq!(a.rotation, b.rotation, epsilon = 1e-12);
            assert_relative_eq!(a.translation, b.translation, epsilon = 1e-12);
        }

        fs::remove_file(output_path).unwrap();
    }

    #[test]
    fn test_validate_intrinsics() {
        let bad = Intrinsics {
            fx: -1.0,
            fy: 10.0,
            cx: 0.0,
            cy: 0.0,
        };
        assert!(matches!(
            validation::validate_intrinsics(&bad),
            Err(CameraError::FocalLengthMustBePositive)
        ));

        let bad = Intrinsics {
            fx: 1.0,
            fy: 10.0,
            cx: f64::NAN,
            cy: 0.0,
        };
        assert!(matches!(
            validation::validate_intrinsics(&bad),
            Err(CameraError::PrincipalPointMustBeFinite)
        ));
    }
}
