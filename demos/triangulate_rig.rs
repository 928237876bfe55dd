//! Three-view triangulation demo
//!
//! Loads a camera rig, projects a synthetic 3D path into the three views,
//! perturbs the detections and mixes in spurious noise objects, then
//! triangulates every frame in parallel and reports the reprojection error.
//!
//! Usage:
//! ```bash
//! cargo run --example triangulate_rig -- \
//!   --rig samples/rig.yaml \
//!   --frames 200 \
//!   --noise 0.5 \
//!   --noise-objects 2
//! ```

use clap::Parser;
use log::info;
use nalgebra::{Vector2, Vector3};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use std::path::PathBuf;
use worm3d_tools::batch::{BatchRunner, FrameDetections, FrameResult};
use worm3d_tools::camera::CameraTriplet;
use worm3d_tools::triangulation::TriangulationOptions;
use worm3d_tools::util;

/// Triangulate synthetic detections with a calibrated rig
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the rig YAML file
    #[arg(short = 'r', long, default_value = "samples/rig.yaml")]
    rig: PathBuf,

    /// Number of frames to simulate
    #[arg(short = 'f', long, default_value_t = 200)]
    frames: usize,

    /// Standard deviation-like amplitude of the detection noise (pixels)
    #[arg(short = 'n', long, default_value_t = 0.5)]
    noise: f64,

    /// Spurious detections added to each view
    #[arg(long, default_value_t = 1)]
    noise_objects: usize,

    /// Reject candidates with a larger residual (pixels)
    #[arg(short = 't', long, default_value_t = 10.0)]
    matching_threshold: f64,

    /// Worker threads (0 = one per core)
    #[arg(short = 'w', long, default_value_t = 0)]
    workers: usize,

    #[arg(long, default_value_t = 7)]
    seed: u64,

    /// Directory for the CSV and overlay image
    #[arg(short = 'o', long, default_value = "output")]
    output: PathBuf,
}

fn simulate_frames(
    rig: &CameraTriplet,
    cli: &Cli,
    rng: &mut Pcg64,
) -> (Vec<FrameDetections>, Vec<Vector3<f64>>) {
    let mut truths = Vec::with_capacity(cli.frames);
    let mut frames = Vec::with_capacity(cli.frames);

    for frame in 0..cli.frames {
        let s = frame as f64 * 0.05;
        let truth = Vector3::new(20.0 * s.sin(), 10.0 * (0.7 * s).cos(), 500.0 + 15.0 * (0.3 * s).sin());
        let mut views: Vec<Vec<Vector2<f64>>> = rig
            .project_to_2d(&truth, true)
            .iter()
            .map(|d| {
                vec![Vector2::new(
                    d.x + rng.gen_range(-cli.noise..=cli.noise),
                    d.y + rng.gen_range(-cli.noise..=cli.noise),
                )]
            })
            .collect();
        for view in views.iter_mut() {
            for _ in 0..cli.noise_objects {
                let spurious = Vector2::new(rng.gen_range(0.0..1280.0), rng.gen_range(0.0..1024.0));
                let at = rng.gen_range(0..=view.len());
                view.insert(at, spurious);
            }
        }
        truths.push(truth);
        frames.push(FrameDetections { frame, views });
    }
    (frames, truths)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    let rig_path = cli.rig.to_str().ok_or("Invalid rig path string")?;
    let rig = CameraTriplet::load_from_yaml(rig_path)?;
    info!("Loaded rig from {rig_path}");
    for (i, camera) in rig.get_camera_model_triplet().iter().enumerate() {
        info!("cam{i}: {camera:?}");
    }

    let mut rng = Pcg64::seed_from_u64(cli.seed);
    let (frames, truths) = simulate_frames(&rig, &cli, &mut rng);

    let options = TriangulationOptions {
        matching_threshold: cli.matching_threshold,
        ..TriangulationOptions::default()
    };
    let runner = BatchRunner::new(cli.workers)?;
    let results = runner.triangulate_frames(&frames, &rig, &options);

    let mut position_errors = Vec::new();
    let mut object_points = Vec::new();
    for (result, truth) in results.iter().zip(&truths) {
        if let Some(best) = result.best() {
            position_errors.push((best.point - truth).norm());
            object_points.push((result.frame(), best.clone()));
        }
    }
    let skipped = results
        .iter()
        .filter(|r| matches!(r, FrameResult::Skipped { .. }))
        .count();

    println!("🎯 THREE-VIEW TRIANGULATION");
    println!("===========================");
    println!("Frames: {} ({} skipped)", results.len(), skipped);
    if !position_errors.is_empty() {
        let stats = util::ProjectionError::from_errors(&position_errors)?;
        println!("3D position error: {stats:?}");
    }
    for (frame, point) in object_points.iter().take(1) {
        let detections = &frames[*frame].views;
        let stats = util::compute_reprojection_error(
            &rig,
            std::slice::from_ref(point),
            detections,
            options.apply_distortion,
        )?;
        println!("Frame {frame} reprojection error: {stats:?}");
    }

    util::ensure_output_dir(&cli.output)?;
    let csv_path = cli.output.join("object_points.csv");
    let written = util::write_object_points_csv(&csv_path, &results)?;
    info!("Wrote {written} points to {}", csv_path.display());

    if let Some((frame, point)) = object_points.first() {
        for c in 0..3 {
            let image = util::create_triangulation_image(
                &frames[*frame].views[c],
                &[point.reprojected_points[c]],
                1280,
                1024,
            )?;
            util::save_image(&image, cli.output.join(format!("frame{frame}_cam{c}.png")))?;
        }
    }

    Ok(())
}
