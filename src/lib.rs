//! Worm3D Tools Library
//!
//! Geometry core for 3D tracking of freely moving animals filmed by a
//! synchronized three-camera rig:
//! - Pinhole camera model with radial-tangential distortion and pixel shift
//! - Batched (vectorized) projection over many camera triplets
//! - Triangulation of candidate detections from the three views, using the
//!   tiny-solver Levenberg-Marquardt optimizer
//! - Tumble-run decomposition of the resulting 3D trajectories into straight
//!   runs and reorientation events, with an error-limited search
//!
//! Independent frames and trajectories can be processed in parallel with
//! [`batch::BatchRunner`].

pub mod batch;
pub mod camera;
pub mod optimization;
pub mod trajectory;
pub mod triangulation;
pub mod tumble_run;
pub mod util;

// Re-export commonly used types
pub use camera::{
    CameraError, CameraTriplet, DynamicCameras, Intrinsics, PinholeCamera, N_CAMERAS,
    N_CAMERA_COEFFICIENTS,
};

pub use triangulation::{
    triangulate, ObjectPoint, TriangulationError, TriangulationOptions,
};

pub use tumble_run::{
    find_approximation, get_approximate, Approximation, ApproximationError, SearchOutcome,
    SearchParams,
};

pub use trajectory::Trajectory;
