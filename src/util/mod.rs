//! Diagnostics and export helpers: reprojection statistics, CSV/JSON output
//! and overlay images of detections against reprojections.

use crate::batch::FrameResult;
use crate::camera::{CameraTriplet, PinholeCamera, N_CAMERAS};
use crate::triangulation::ObjectPoint;
use crate::tumble_run::Approximation;
use image::{Rgb, RgbImage};
use log::info;
use nalgebra::{Matrix2xX, Matrix3xX, Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

#[derive(thiserror::Error, Debug)]
pub enum UtilError {
    #[error("Zero projection points")]
    ZeroProjectionPoints,
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),
    #[error("IO Error: {0}")]
    IOError(String),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Image error: {0}")]
    Image(String),
}

impl From<std::io::Error> for UtilError {
    fn from(err: std::io::Error) -> Self {
        UtilError::IOError(err.to_string())
    }
}

impl From<image::ImageError> for UtilError {
    fn from(err: image::ImageError) -> Self {
        UtilError::Image(err.to_string())
    }
}

/// Ensure the output directory exists
pub fn ensure_output_dir(path: impl AsRef<Path>) -> Result<(), UtilError> {
    let output_dir = path.as_ref();
    if !output_dir.exists() {
        fs::create_dir_all(output_dir).map_err(|e| {
            UtilError::InvalidParams(format!("Failed to create output directory: {e}"))
        })?;
    }
    Ok(())
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProjectionError {
    pub rmse: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub stddev: f64,
    pub median: f64,
}

impl fmt::Debug for ProjectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Projection Error [ rmse: {}, min: {}, max: {}, mean: {}, stddev: {}, median: {} ]",
            self.rmse, self.min, self.max, self.mean, self.stddev, self.median
        )
    }
}

impl ProjectionError {
    /// Summary statistics of per-point pixel errors.
    pub fn from_errors(errors: &[f64]) -> Result<Self, UtilError> {
        if errors.is_empty() {
            return Err(UtilError::ZeroProjectionPoints);
        }

        let n = errors.len() as f64;
        let mean = errors.iter().sum::<f64>() / n;
        let variance: f64 = errors.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
        let rmse = (errors.iter().map(|x| x.powi(2)).sum::<f64>() / n).sqrt();
        let min = errors.iter().fold(f64::INFINITY, |a, &b| a.min(b));
        let max = errors.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));

        let mut sorted = errors.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let mid = sorted.len() / 2;
        let median = if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        };

        Ok(ProjectionError {
            rmse,
            min,
            max,
            mean,
            stddev: variance.sqrt(),
            median,
        })
    }
}

/// Pixel errors between triangulated points and the detections they were
/// built from, over every camera.
///
/// `detections` are the per-camera candidate lists passed to the
/// triangulator; each object point's `source_indices` select into them.
/// `apply_distortion` should match the setting the points were solved with.
pub fn compute_reprojection_error(
    cameras: &CameraTriplet,
    object_points: &[ObjectPoint],
    detections: &[Vec<Vector2<f64>>],
    apply_distortion: bool,
) -> Result<ProjectionError, UtilError> {
    if detections.len() != N_CAMERAS {
        return Err(UtilError::InvalidParams(format!(
            "expected {N_CAMERAS} views, found {}",
            detections.len()
        )));
    }

    let mut errors = Vec::with_capacity(object_points.len() * N_CAMERAS);
    for object_point in object_points {
        let projected = cameras.project_to_2d(&object_point.point, apply_distortion);
        for (c, &index) in object_point.source_indices.iter().enumerate() {
            let detection = detections[c].get(index).ok_or_else(|| {
                UtilError::InvalidParams(format!(
                    "source index {index} out of range for camera {c}"
                ))
            })?;
            errors.push((projected[c] - detection).norm());
        }
    }
    ProjectionError::from_errors(&errors)
}

/// Pixel errors of a single camera over 3D-2D correspondences.
pub fn compute_camera_reprojection_error(
    camera: &PinholeCamera,
    points3d: &Matrix3xX<f64>,
    points2d: &Matrix2xX<f64>,
) -> Result<ProjectionError, UtilError> {
    if points3d.ncols() != points2d.ncols() {
        return Err(UtilError::InvalidParams(
            "Number of 2D and 3D points must match".to_string(),
        ));
    }
    let errors: Vec<f64> = points3d
        .column_iter()
        .zip(points2d.column_iter())
        .map(|(p3, p2)| (camera.project_to_2d(&p3.into_owned(), true) - p2).norm())
        .filter(|e| e.is_finite())
        .collect();
    ProjectionError::from_errors(&errors)
}

#[derive(Debug, Serialize, Deserialize)]
struct TrajectoryRecord {
    t: usize,
    x: f64,
    y: f64,
    z: f64,
}

/// Writes a trajectory as CSV with columns `t,x,y,z`.
pub fn write_trajectory_csv(path: impl AsRef<Path>, points: &[Vector3<f64>]) -> Result<(), UtilError> {
    let mut writer = csv::Writer::from_path(path)?;
    for (t, p) in points.iter().enumerate() {
        writer.serialize(TrajectoryRecord {
            t,
            x: p.x,
            y: p.y,
            z: p.z,
        })?;
    }
    writer.flush()?;
    Ok(())
}

/// Reads a trajectory written by [`write_trajectory_csv`], ordered by `t`.
pub fn read_trajectory_csv(path: impl AsRef<Path>) -> Result<Vec<Vector3<f64>>, UtilError> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut records = reader
        .deserialize()
        .collect::<Result<Vec<TrajectoryRecord>, _>>()?;
    records.sort_by_key(|r| r.t);
    Ok(records.iter().map(|r| Vector3::new(r.x, r.y, r.z)).collect())
}

#[derive(Debug, Serialize)]
struct ObjectPointRecord {
    frame: usize,
    x: f64,
    y: f64,
    z: f64,
    error: f64,
    idx0: usize,
    idx1: usize,
    idx2: usize,
}

/// Writes the best point of every triangulated frame as CSV; skipped frames
/// are left out.
pub fn write_object_points_csv(path: impl AsRef<Path>, results: &[FrameResult]) -> Result<usize, UtilError> {
    let mut writer = csv::Writer::from_path(path)?;
    let mut written = 0;
    for result in results {
        let Some(best) = result.best() else {
            continue;
        };
        writer.serialize(ObjectPointRecord {
            frame: result.frame(),
            x: best.point.x,
            y: best.point.y,
            z: best.point.z,
            error: best.error,
            idx0: best.source_indices[0],
            idx1: best.source_indices[1],
            idx2: best.source_indices[2],
        })?;
        written += 1;
    }
    writer.flush()?;
    Ok(written)
}

/// Saves an approximation as pretty-printed JSON.
pub fn export_approximation_json(
    path: impl AsRef<Path>,
    approximation: &Approximation,
) -> Result<(), UtilError> {
    let path = path.as_ref();
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, approximation)?;
    info!("Exported approximation to {}", path.display());
    Ok(())
}

/// Pixel centre of `center` when a mark of half-size `reach` around it can
/// touch the canvas.
fn mark_center(center: &Vector2<f64>, reach: i64, width: u32, height: u32) -> Option<(i64, i64)> {
    if !center.x.is_finite() || !center.y.is_finite() {
        return None;
    }
    let reach = reach as f64;
    if center.x < -reach - 1.0
        || center.y < -reach - 1.0
        || center.x > width as f64 + reach
        || center.y > height as f64 + reach
    {
        return None;
    }
    Some((center.x.round() as i64, center.y.round() as i64))
}

fn put_clipped(img: &mut RgbImage, x: i64, y: i64, color: Rgb<u8>) {
    let (width, height) = img.dimensions();
    if x >= 0 && x < width as i64 && y >= 0 && y < height as i64 {
        img.put_pixel(x as u32, y as u32, color);
    }
}

fn draw_disc(img: &mut RgbImage, center: &Vector2<f64>, radius: i64, color: Rgb<u8>) {
    let (width, height) = img.dimensions();
    let Some((center_x, center_y)) = mark_center(center, radius, width, height) else {
        return;
    };
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy <= radius * radius {
                put_clipped(img, center_x + dx, center_y + dy, color);
            }
        }
    }
}

fn draw_cross(img: &mut RgbImage, center: &Vector2<f64>, size: i64, color: Rgb<u8>) {
    let (width, height) = img.dimensions();
    let Some((center_x, center_y)) = mark_center(center, size, width, height) else {
        return;
    };
    for d in -size..=size {
        put_clipped(img, center_x + d, center_y + d, color);
        put_clipped(img, center_x + d, center_y - d, color);
    }
}

/// Draws detections (green discs) and reprojected points (red crosses) of
/// one camera on a black canvas. Marks are clipped to the canvas; points far
/// outside it or with non-finite coordinates are skipped.
pub fn create_triangulation_image(
    detections: &[Vector2<f64>],
    reprojections: &[Vector2<f64>],
    width: u32,
    height: u32,
) -> Result<RgbImage, UtilError> {
    if width == 0 || height == 0 {
        return Err(UtilError::InvalidParams(format!(
            "image size must be positive, got {width}x{height}"
        )));
    }
    let mut img = RgbImage::from_pixel(width, height, Rgb([0, 0, 0]));
    for detection in detections {
        draw_disc(&mut img, detection, 3, Rgb([0, 255, 0]));
    }
    for reprojection in reprojections {
        draw_cross(&mut img, reprojection, 4, Rgb([255, 0, 0]));
    }
    Ok(img)
}

/// Saves an image, creating its parent directory if needed.
pub fn save_image(image: &RgbImage, path: impl AsRef<Path>) -> Result<(), UtilError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            ensure_output_dir(parent)?;
        }
    }
    image.save(path)?;
    info!("Saved image {}", path.display());
    Ok(())
}
