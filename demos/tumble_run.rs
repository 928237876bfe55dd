//! Tumble-run decomposition demo
//!
//! Generates (or loads from CSV) a 3D run-and-tumble trajectory, searches the
//! sparsest piecewise-linear approximation meeting an error limit and prints
//! the resulting run and tumble statistics.
//!
//! Usage:
//! ```bash
//! cargo run --example tumble_run -- --error-limit 0.05 --steps 5000
//! cargo run --example tumble_run -- --input output/trajectory.csv --dt 0.04
//! ```

use clap::Parser;
use flexi_logger::{colored_detailed_format, detailed_format, Duplicate, FileSpec, Logger};
use log::info;
use nalgebra::Vector3;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use std::path::PathBuf;
use worm3d_tools::trajectory::headings;
use worm3d_tools::tumble_run::{find_approximation, SearchParams, TumbleRunStatistics};
use worm3d_tools::util;

/// Tumble-run approximation of a 3D trajectory
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Trajectory CSV with columns t,x,y,z; a synthetic one is generated if omitted
    #[arg(short = 'i', long)]
    input: Option<PathBuf>,

    /// Length of the synthetic trajectory
    #[arg(long, default_value_t = 5000)]
    steps: usize,

    /// Target mean squared reconstruction error
    #[arg(short = 'e', long, default_value_t = 0.05)]
    error_limit: f64,

    #[arg(long, default_value_t = 50)]
    max_iterations: usize,

    #[arg(long, default_value_t = 100)]
    distance_first: usize,

    #[arg(long, default_value_t = 251)]
    smooth_e0: usize,

    #[arg(long, default_value_t = 251)]
    smooth_k: usize,

    /// Seconds per sample
    #[arg(long, default_value_t = 0.04)]
    dt: f64,

    #[arg(long, default_value_t = 1)]
    seed: u64,

    /// Directory for the JSON export
    #[arg(short = 'o', long, default_value = "output")]
    output: PathBuf,
}

/// Runs at constant speed broken by random reorientations.
fn synthetic_trajectory(steps: usize, rng: &mut Pcg64) -> Vec<Vector3<f64>> {
    let mut points = Vec::with_capacity(steps);
    let mut position = Vector3::zeros();
    let mut heading = Vector3::x();
    let mut until_tumble = rng.gen_range(200..800);

    for _ in 0..steps {
        points.push(position);
        until_tumble -= 1;
        if until_tumble == 0 {
            let turn = Vector3::new(
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
            );
            heading = (heading + turn * 1.5).try_normalize(1e-9).unwrap_or(heading);
            until_tumble = rng.gen_range(200..800);
        }
        let wobble = Vector3::new(
            rng.gen_range(-0.002..0.002),
            rng.gen_range(-0.002..0.002),
            rng.gen_range(-0.002..0.002),
        );
        position += heading * 0.01 + wobble;
    }
    points
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    Logger::try_with_str("info")?
        .log_to_file(
            FileSpec::default()
                .directory("logs")
                .suppress_timestamp()
                .suffix("log"),
        )
        .duplicate_to_stdout(Duplicate::All)
        .format_for_files(detailed_format)
        .format_for_stdout(colored_detailed_format)
        .set_palette("196;208;76;39;178".to_string())
        .start()?;

    let cli = Cli::parse();

    let x = match &cli.input {
        Some(path) => {
            info!("Loading trajectory from {}", path.display());
            util::read_trajectory_csv(path)?
        }
        None => {
            let mut rng = Pcg64::seed_from_u64(cli.seed);
            synthetic_trajectory(cli.steps, &mut rng)
        }
    };
    let e0 = headings(&x);

    let params = SearchParams {
        error_limit: cli.error_limit,
        max_iterations: cli.max_iterations,
        distance_first: cli.distance_first,
        smooth_e0_first: cli.smooth_e0,
        smooth_k_first: cli.smooth_k,
        ..SearchParams::default()
    };
    let outcome = find_approximation(&x, &e0, &params)?;
    let approximation = &outcome.approximation;

    println!("🌀 TUMBLE-RUN APPROXIMATION");
    println!("===========================");
    println!("Samples: {}", x.len());
    println!(
        "Resolved distance={} height={:?} smooth_e0={} smooth_k={} after {} iterations (converged: {})",
        outcome.distance,
        outcome.height,
        outcome.smooth_e0,
        outcome.smooth_k,
        outcome.iterations,
        outcome.converged
    );
    println!(
        "Tumbles: {}  Runs: {}  MSE: {:.6}",
        approximation.num_tumbles(),
        approximation.num_runs(),
        approximation.mse
    );

    let stats = TumbleRunStatistics::from_approximations(std::slice::from_ref(approximation), cli.dt)?;
    if let Some(duration) = stats.mean_run_duration() {
        println!("Mean run duration: {duration:.2} s");
    }
    if let Some(speed) = stats.mean_run_speed() {
        println!("Mean run speed: {speed:.4} /s");
    }
    if let Some(cv) = stats.coefficient_of_variation() {
        println!("Run duration CV: {cv:.3}");
    }
    for (i, ((planar, nonplanar), twist)) in stats
        .planar_angles
        .iter()
        .zip(&stats.nonplanar_angles)
        .zip(&stats.twist_angles)
        .enumerate()
    {
        println!(
            "  tumble {i}: planar {:7.2}°  non-planar {:7.2}°  twist {:7.2}°",
            planar.to_degrees(),
            nonplanar.to_degrees(),
            twist.to_degrees()
        );
    }

    util::ensure_output_dir(&cli.output)?;
    util::export_approximation_json(cli.output.join("approximation.json"), approximation)?;
    if cli.input.is_none() {
        util::write_trajectory_csv(cli.output.join("trajectory.csv"), &x)?;
    }

    Ok(())
}
