//! tubergrid CLI — command-line interface for tubercle lattice detection.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use tubergrid::{Bounds, DetectConfig, ImageEvidence};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "tubergrid")]
#[command(
    about = "Detect hexagonal tubercle lattices in scanned specimen images (seed extraction, lattice completion, refinement)"
)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect the tubercle lattice in an image.
    Detect(CliDetectArgs),

    /// Score a point set for hexagonal regularity.
    Score(CliScoreArgs),
}

#[derive(Debug, Clone, Args)]
struct CliDetectArgs {
    /// Path to the input image.
    #[arg(long)]
    image: PathBuf,

    /// Path to write detection results (JSON).
    #[arg(long)]
    out: PathBuf,

    /// Expected lattice spacing in pixels; derives the extractor diameter
    /// range and the seed separation.
    #[arg(long)]
    spacing: Option<f64>,

    /// Minimum number of seeds required to attempt lattice detection.
    #[arg(long, default_value = "5")]
    min_seeds: usize,

    /// Long-edge filter factor over the median edge length.
    #[arg(long, default_value = "1.5")]
    max_distance_factor: f64,

    /// Minimum lattice regularity accepted by the validity gate.
    #[arg(long, default_value = "0.7")]
    min_regularity: f64,

    /// Extractor peak threshold as a fraction of the image maximum.
    #[arg(long, default_value = "0.5")]
    threshold: f32,

    /// Maximum refinement passes.
    #[arg(long, default_value = "3")]
    refine_passes: usize,

    /// Prune features further than this fraction of the spacing from their
    /// nearest lattice site.
    #[arg(long, default_value = "0.4")]
    max_lattice_deviation: f64,

    /// Propagation iteration cap.
    #[arg(long, default_value = "10000")]
    max_iterations: usize,
}

#[derive(Debug, Clone, Args)]
struct CliScoreArgs {
    /// Path to a JSON array of [x, y] points.
    #[arg(long)]
    points: PathBuf,

    /// Long-edge filter factor over the median edge length.
    #[arg(long, default_value = "1.5")]
    max_distance_factor: f64,
}

impl CliDetectArgs {
    fn to_config(&self) -> DetectConfig {
        let mut config = match self.spacing {
            Some(s) => DetectConfig::from_spacing_hint(s),
            None => DetectConfig::default(),
        };
        config.min_seeds = self.min_seeds;
        config.max_distance_factor = self.max_distance_factor;
        config.lattice.min_regularity = self.min_regularity;
        config.extract.threshold = self.threshold;
        config.refine.max_passes = self.refine_passes;
        config.refine.max_lattice_deviation = self.max_lattice_deviation;
        config.propagation.max_iterations = self.max_iterations;
        config
    }
}

fn main() -> CliResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Detect(args) => run_detect(&args),
        Commands::Score(args) => run_score(&args),
    }
}

// ── detect ─────────────────────────────────────────────────────────────

fn run_detect(args: &CliDetectArgs) -> CliResult<()> {
    tracing::info!("Loading image: {}", args.image.display());

    let img = image::open(&args.image).map_err(|e| -> CliError {
        format!("Failed to open image {}: {}", args.image.display(), e).into()
    })?;
    let gray = img.to_luma8();
    let (w, h) = gray.dimensions();

    tracing::info!("Image size: {}x{}", w, h);

    let config = args.to_config();
    let candidates = tubergrid::extract_features(&gray, &config.extract);
    let seeds = tubergrid::select_seeds(candidates, &config.seeds);
    tracing::info!("Selected {} seeds", seeds.len());

    let evidence = ImageEvidence::new(&gray);
    let result =
        tubergrid::run_lattice_detection(seeds, &evidence, &Bounds::of_image(&gray), &config);

    let n_active = result.active_features().count();
    if let Some(ref reason) = result.fallback {
        tracing::warn!("Fallback: {}", reason);
    }
    tracing::info!(
        "Detected {} features, hexagonalness {:.3}",
        n_active,
        result.quality.hexagonalness,
    );
    if let Some(ref lattice) = result.lattice {
        tracing::info!(
            "Lattice: spacing {:.2}px, basis angle {:.1} deg, regularity {:.3}",
            lattice.spacing,
            lattice.angle_deg,
            lattice.regularity,
        );
    }

    let json = serde_json::to_string_pretty(&result)?;
    std::fs::write(&args.out, &json)?;
    tracing::info!("Results written to {}", args.out.display());

    Ok(())
}

// ── score ──────────────────────────────────────────────────────────────

fn run_score(args: &CliScoreArgs) -> CliResult<()> {
    let raw = std::fs::read_to_string(&args.points).map_err(|e| -> CliError {
        format!("Failed to read {}: {}", args.points.display(), e).into()
    })?;
    let points: Vec<[f64; 2]> = serde_json::from_str(&raw)
        .map_err(|e| -> CliError { format!("Invalid points JSON: {}", e).into() })?;

    let graph = tubergrid::build_neighbor_graph(&points, args.max_distance_factor, 0);
    let report = graph.quality();

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
