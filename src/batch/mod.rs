//! Parallel processing of independent frames and trajectories.
//!
//! A [`BatchRunner`] owns a fixed-size rayon pool. Every frame (or
//! trajectory) is one job that runs to completion on a single worker; the
//! camera rig and the options are shared read-only between jobs and results
//! come back in input order. A failed frame is logged and reported as
//! skipped rather than aborting the batch.

use crate::camera::CameraTriplet;
use crate::triangulation::{triangulate, ObjectPoint, TriangulationOptions};
use crate::trajectory::headings;
use crate::tumble_run::{find_approximation, ApproximationError, SearchOutcome, SearchParams};
use log::{info, warn};
use nalgebra::{Vector2, Vector3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(thiserror::Error, Debug)]
pub enum BatchError {
    #[error("Failed to build thread pool: {0}")]
    ThreadPool(String),
}

/// Candidate detections of one frame, one list per camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameDetections {
    pub frame: usize,
    pub views: Vec<Vec<Vector2<f64>>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FrameResult {
    Triangulated {
        frame: usize,
        points: Vec<ObjectPoint>,
    },
    /// The frame could not be triangulated and is left for review.
    Skipped { frame: usize, reason: String },
}

impl FrameResult {
    pub fn frame(&self) -> usize {
        match self {
            FrameResult::Triangulated { frame, .. } | FrameResult::Skipped { frame, .. } => *frame,
        }
    }

    /// The best point of a triangulated frame.
    pub fn best(&self) -> Option<&ObjectPoint> {
        match self {
            FrameResult::Triangulated { points, .. } => points.first(),
            FrameResult::Skipped { .. } => None,
        }
    }
}

/// Bounded worker pool for batch jobs.
pub struct BatchRunner {
    pool: rayon::ThreadPool,
    cancelled: Arc<AtomicBool>,
}

impl BatchRunner {
    /// Creates a pool of `num_workers` threads (0 lets rayon choose).
    pub fn new(num_workers: usize) -> Result<Self, BatchError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_workers)
            .thread_name(|idx| format!("worm3d-worker-{idx}"))
            .build()
            .map_err(|e| BatchError::ThreadPool(e.to_string()))?;
        Ok(BatchRunner {
            pool,
            cancelled: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn num_workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Flag that, once set, makes jobs that have not started yet report
    /// themselves as skipped. Jobs already running finish normally.
    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Triangulates every frame with the same rig and options.
    pub fn triangulate_frames(
        &self,
        frames: &[FrameDetections],
        cameras: &CameraTriplet,
        options: &TriangulationOptions,
    ) -> Vec<FrameResult> {
        info!(
            "Triangulating {} frames on {} workers",
            frames.len(),
            self.num_workers()
        );
        let results: Vec<FrameResult> = self.pool.install(|| {
            frames
                .par_iter()
                .map(|frame| {
                    if self.is_cancelled() {
                        return FrameResult::Skipped {
                            frame: frame.frame,
                            reason: "cancelled".to_string(),
                        };
                    }
                    match triangulate(&frame.views, cameras, options) {
                        Ok(points) => FrameResult::Triangulated {
                            frame: frame.frame,
                            points,
                        },
                        Err(e) => {
                            warn!("Skipping frame {}: {}", frame.frame, e);
                            FrameResult::Skipped {
                                frame: frame.frame,
                                reason: e.to_string(),
                            }
                        }
                    }
                })
                .collect()
        });

        let skipped = results
            .iter()
            .filter(|r| matches!(r, FrameResult::Skipped { .. }))
            .count();
        info!("Triangulation done: {} frames skipped", skipped);
        results
    }

    /// Runs [`find_approximation`] on every trajectory, using its raw
    /// headings as `e0`.
    pub fn approximate_trajectories(
        &self,
        trajectories: &[Vec<Vector3<f64>>],
        params: &SearchParams,
    ) -> Vec<Result<SearchOutcome, ApproximationError>> {
        self.pool.install(|| {
            trajectories
                .par_iter()
                .enumerate()
                .map(|(i, x)| {
                    if self.is_cancelled() {
                        return Err(ApproximationError::Precondition(format!(
                            "trajectory {i}: batch cancelled"
                        )));
                    }
                    let e0 = headings(x);
                    let outcome = find_approximation(x, &e0, params);
                    if let Err(e) = &outcome {
                        warn!("Trajectory {i} failed: {e}");
                    }
                    outcome
                })
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn frames(rig: &CameraTriplet) -> (Vec<FrameDetections>, Vec<Vector3<f64>>) {
        let truths: Vec<Vector3<f64>> = (0..6)
            .map(|i| Vector3::new(i as f64 * 4.0 - 10.0, 3.0 - i as f64, 500.0 + i as f64 * 5.0))
            .collect();
        let frames = truths
            .iter()
            .enumerate()
            .map(|(frame, p)| FrameDetections {
                frame,
                views: rig.project_to_2d(p, true).iter().map(|d| vec![*d]).collect(),
            })
            .collect();
        (frames, truths)
    }

    #[test]
    fn test_triangulate_frames_keeps_order_and_skips_failures() {
        let rig = CameraTriplet::load_from_yaml("samples/rig.yaml").unwrap();
        let (mut frames, truths) = frames(&rig);
        // frame 3 loses camera 1
        frames[3].views[1].clear();

        let runner = BatchRunner::new(3).unwrap();
        assert_eq!(runner.num_workers(), 3);
        let results = runner.triangulate_frames(&frames, &rig, &TriangulationOptions::default());

        assert_eq!(results.len(), frames.len());
        for (i, result) in results.iter().enumerate() {
            assert_eq!(result.frame(), i);
            if i == 3 {
                assert!(matches!(result, FrameResult::Skipped { .. }));
            } else {
                let best = result.best().unwrap();
                assert_relative_eq!(best.point, truths[i], epsilon = 1e-3);
            }
        }
    }

    #[test]
    fn test_cancelled_batch_skips_everything() {
        let rig = CameraTriplet::load_from_yaml("samples/rig.yaml").unwrap();
        let (frames, _) = frames(&rig);
        let runner = BatchRunner::new(2).unwrap();
        runner.cancel_token().store(true, Ordering::Relaxed);

        let results = runner.triangulate_frames(&frames, &rig, &TriangulationOptions::default());
        assert!(results
            .iter()
            .all(|r| matches!(r, FrameResult::Skipped { reason, .. } if reason == "cancelled")));
    }

    #[test]
    fn test_approximate_trajectories() {
        let line: Vec<Vector3<f64>> = (0..200).map(|t| Vector3::new(t as f64, 0.0, 0.0)).collect();
        let too_short = vec![Vector3::zeros()];
        let runner = BatchRunner::new(2).unwrap();

        let results = runner.approximate_trajectories(
            &[line.clone(), too_short, line],
            &SearchParams::default(),
        );
        assert_eq!(results.len(), 3);
        assert!(results[0].as_ref().unwrap().converged);
        assert!(matches!(results[1], Err(ApproximationError::Precondition(_))));
        assert_eq!(
            results[0].as_ref().unwrap().approximation,
            results[2].as_ref().unwrap().approximation
        );
    }
}
