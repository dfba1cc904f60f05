use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use dental_capture::backend::{negotiate, BackendConfig};
use dental_capture::batch::{format_duration, BatchScheduler};
use dental_capture::context::{RenderContext, RenderSettings, Renderer};
use dental_capture::dataset::Dataset;
use dental_capture::executor::PassExecutor;
use dental_capture::manifest::CameraManifest;
use dental_capture::modality::{MaterialLibrary, RenderModality};
use dental_capture::raster::SoftwareRenderer;
use dental_capture::trajectory::{generate, GridConfig, OrbitConfig, TrajectoryMode};
use dental_capture::{CaptureConfig, Resolution};
use log::{info, warn};
use std::path::PathBuf;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum TrajectoryArg {
    Orbit,
    Grid,
    Fixed,
}

/// Render every case of a dental-scan dataset from a camera trajectory in
/// each enabled modality.
#[derive(Debug, Parser)]
#[command(author, version, about = "Multi-view capture of dental-scan datasets")]
struct Args {
    /// Directory containing one sub-directory per case
    #[arg(long)]
    dataset: Option<PathBuf>,

    /// Output root (default: `output` next to the dataset)
    #[arg(long)]
    output: Option<PathBuf>,

    /// JSON capture config; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// First case to render, 1-based
    #[arg(long)]
    start: Option<usize>,

    /// Last case to render, inclusive
    #[arg(long)]
    end: Option<usize>,

    /// Visit cases in reverse order
    #[arg(long)]
    reverse: bool,

    #[arg(long, value_enum)]
    trajectory: Option<TrajectoryArg>,

    /// Comma-separated modalities, e.g. `unlit,depth`
    #[arg(long, value_delimiter = ',')]
    modalities: Option<Vec<RenderModality>>,

    /// Image size as WIDTHxHEIGHT
    #[arg(long, value_parser = parse_resolution)]
    resolution: Option<Resolution>,

    /// Path tracer samples per pixel
    #[arg(long)]
    samples: Option<u32>,

    /// Write depth and normal as OpenEXR
    #[arg(long)]
    float_passes: bool,

    /// Start from the high-quality sampling preset
    #[arg(long)]
    reference: bool,

    /// Write the camera manifest and list planned outputs without rendering
    #[arg(long)]
    plan_only: bool,
}

fn parse_resolution(s: &str) -> Result<Resolution, String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{}'", s))?;
    let parse = |v: &str| {
        v.trim()
            .parse::<u32>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| format!("invalid dimension '{}'", v))
    };
    Ok(Resolution::new(parse(w)?, parse(h)?))
}

fn build_config(args: &Args) -> Result<CaptureConfig> {
    let mut config = match &args.config {
        Some(path) => CaptureConfig::load(path)?,
        None if args.reference => CaptureConfig::reference(),
        None => CaptureConfig::optimized(),
    };
    if args.config.is_some() && args.reference {
        config.sampling = CaptureConfig::reference().sampling;
    }

    if let Some(root) = &args.dataset {
        config.dataset.root = root.clone();
    }
    if let Some(output) = &args.output {
        config.dataset.output = Some(output.clone());
    }
    if let Some(start) = args.start {
        config.dataset.start_case = start;
    }
    if args.end.is_some() {
        config.dataset.end_case = args.end;
    }
    config.dataset.reverse |= args.reverse;

    if let Some(mode) = args.trajectory {
        config.trajectory.mode = match mode {
            TrajectoryArg::Orbit => TrajectoryMode::Orbit(OrbitConfig::default()),
            TrajectoryArg::Grid => TrajectoryMode::Grid(GridConfig::default()),
            TrajectoryArg::Fixed => TrajectoryMode::Fixed,
        };
    }
    if let Some(modalities) = &args.modalities {
        config.modalities = modalities.clone();
    }
    if let Some(resolution) = args.resolution {
        config.render.camera.resolution = resolution;
    }
    if let Some(samples) = args.samples {
        config.sampling.samples = samples;
    }
    config.render.float_passes |= args.float_passes;
    Ok(config)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = build_config(&args)?;
    let output_root = config.dataset.output_root();

    let trajectory = generate(&config.trajectory).context("failed to generate trajectory")?;
    let manifest = CameraManifest::build(&trajectory, &config.render.camera)?;
    let manifest_path = manifest.save(&output_root)?;
    info!(
        "{} trajectory: {} views, manifest written to {}",
        trajectory.mode(),
        manifest.cameras.len(),
        manifest_path.display()
    );

    let dataset = Dataset::discover(&config.dataset)?;
    if dataset.is_empty() {
        warn!("No cases selected under {}", dataset.root.display());
    }

    let renderer = SoftwareRenderer::new();
    let backend = BackendConfig::new(config.sampling.device);
    let negotiated = negotiate(&renderer.capabilities(), &backend, config.render.float_passes)?;
    let mut sampling = config.sampling.clone();
    sampling.device = negotiated.device;

    let library = MaterialLibrary::new(config.curvature_exponent);
    let light = config.light.to_state();
    let executor = PassExecutor::new(&library, light, negotiated.float_passes);
    let scheduler = BatchScheduler::new(
        &dataset,
        &output_root,
        &config.modalities,
        &manifest,
        executor,
    )?;

    if args.plan_only {
        for job in scheduler.plan() {
            println!("{}", scheduler.job_output(&job).display());
        }
        info!("{} images planned", scheduler.total_jobs());
        return Ok(());
    }

    let mut ctx = RenderContext::new(
        renderer,
        negotiated.engines,
        config.render.camera.resolution,
        sampling,
        RenderSettings::baseline(light),
    );
    let summary = scheduler.run(&mut ctx)?;

    println!(
        "Rendered {}/{} images for {} cases in {}",
        summary.jobs_completed,
        summary.jobs_total,
        summary.cases_rendered,
        format_duration(summary.elapsed)
    );
    for skipped in &summary.skipped_cases {
        println!("  skipped {}: {}", skipped.id, skipped.reason);
    }
    for failure in &summary.failures {
        println!(
            "  failed {} {} {}: {}",
            failure.case, failure.modality, failure.view, failure.error
        );
    }
    if summary.jobs_total > 0 && summary.jobs_completed == 0 {
        bail!("no images were rendered");
    }
    Ok(())
}
