use anyhow::Context;
use clap::{Parser, Subcommand};
use image::ImageFormat;
use snapwear_core::{config::Config, BodyRegion, TryOnEngine};
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Parser)]
#[command(name = "snapwear")]
#[command(
    about = "Virtual try-on: place a garment image on a photo of a person",
    long_about = None
)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use this config file instead of the default search path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Composite a garment onto a person image
    Compose {
        /// Photo of the person
        #[arg(long)]
        person: PathBuf,
        /// Garment image, preferably PNG with transparency
        #[arg(long)]
        garment: PathBuf,
        /// Body region: "Upper body", "Lower body" or "Dresses"
        #[arg(short, long, default_value = "Upper body")]
        region: BodyRegion,
        /// Output PNG path (defaults to a generated name in the output dir)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Skip pose estimation and use the center-top placement
        #[arg(long)]
        no_pose: bool,
        /// Save debug visualization showing keypoints and garment box
        /// (to the given path, or a timestamped file in the debug dir)
        #[arg(long, num_args = 0..=1)]
        debug: Option<Option<PathBuf>>,
        /// Print the placement as JSON
        #[arg(long)]
        json: bool,
    },
    /// Detect body keypoints in an image
    Pose {
        /// Image to analyze
        image: PathBuf,
        /// Print keypoints as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show configuration
    Config {
        /// Validate configuration
        #[arg(long)]
        validate: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logger
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .init();

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Compose {
            person,
            garment,
            region,
            output,
            no_pose,
            debug,
            json,
        } => cmd_compose(config, &person, &garment, region, output, no_pose, debug, json),
        Commands::Pose { image, json } => cmd_pose(config, &image, json),
        Commands::Config { validate } => cmd_config(config, validate),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => {
            let mut config = Config::load_from_path(path)
                .with_context(|| format!("loading config from {}", path.display()))?;
            config.apply_env_overrides()?;
            Ok(config)
        }
        None => Ok(Config::load()?),
    }
}

#[allow(clippy::too_many_arguments)]
fn cmd_compose(
    mut config: Config,
    person: &Path,
    garment: &Path,
    region: BodyRegion,
    output: Option<PathBuf>,
    no_pose: bool,
    debug: Option<Option<PathBuf>>,
    json: bool,
) -> anyhow::Result<()> {
    if no_pose {
        config.pose.model_path = None;
    }

    let person_bytes =
        std::fs::read(person).with_context(|| format!("reading {}", person.display()))?;
    let garment_bytes =
        std::fs::read(garment).with_context(|| format!("reading {}", garment.display()))?;

    let output_path = match output {
        Some(path) => path,
        None => {
            std::fs::create_dir_all(&config.output.dir).with_context(|| {
                format!("creating output directory {}", config.output.dir.display())
            })?;
            config
                .output
                .dir
                .join(format!("{}_tryon.png", uuid::Uuid::new_v4()))
        }
    };

    let debug_path = match debug {
        Some(Some(path)) => Some(path),
        Some(None) => Some(
            ensure_debug_dir(&config.debug.output_dir)?
                .join(snapwear_core::generate_debug_filename("tryon")),
        ),
        None => None,
    };

    log::debug!("Writing result to {}", output_path.display());
    let engine = TryOnEngine::new(config)?;

    let start = Instant::now();
    let result = engine.run_bytes(&person_bytes, &garment_bytes, region)?;
    let duration = start.elapsed();

    result
        .image
        .save_with_format(&output_path, ImageFormat::Png)
        .with_context(|| format!("writing {}", output_path.display()))?;

    if let Some(debug_path) = debug_path {
        snapwear_core::save_debug_overlay(&result, &debug_path)?;
        println!("📷 Debug visualization saved to: {}", debug_path.display());
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&result.placement)?);
        return Ok(());
    }

    println!("✓ Try-on saved: {}", output_path.display());
    println!("Region: {}", region);
    if result.placement.used_fallback {
        println!("Placement: center-top fallback (no reliable shoulders)");
    } else {
        println!(
            "Placement: shoulders, rotation {:.2}°",
            result.placement.rotation_degrees
        );
    }
    println!(
        "Garment: {}x{} at ({}, {}), scale {:.3}",
        result.garment_size.0,
        result.garment_size.1,
        result.top_left.0,
        result.top_left.1,
        result.placement.scale_factor
    );
    println!("Total time: {:.2}ms", duration.as_secs_f64() * 1000.0);

    Ok(())
}

/// Expand a leading `~` and create the debug directory
fn ensure_debug_dir(debug_dir: &Path) -> anyhow::Result<PathBuf> {
    let expanded_path = match (debug_dir.strip_prefix("~"), std::env::var_os("HOME")) {
        (Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => debug_dir.to_path_buf(),
    };

    std::fs::create_dir_all(&expanded_path)
        .with_context(|| format!("creating debug directory {}", expanded_path.display()))?;

    Ok(expanded_path)
}

fn cmd_pose(config: Config, image_path: &Path, json: bool) -> anyhow::Result<()> {
    if config.pose.model_path.is_none() {
        anyhow::bail!("No pose model configured (set [pose] model_path or SNAPWEAR_POSE_MODEL)");
    }

    let image = snapwear_core::buffer::decode(
        &std::fs::read(image_path).with_context(|| format!("reading {}", image_path.display()))?,
        snapwear_core::ImageRole::Person,
    )?;

    let engine = TryOnEngine::new(config)?;
    let Some(pose) = engine.keypoints(&image.to_rgb8()) else {
        anyhow::bail!("Pose estimation produced no keypoints");
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&pose)?);
        return Ok(());
    }

    let threshold = engine.config().pose.confidence_threshold;
    println!("{:<15} {:>6} {:>6} {:>8}", "Part", "X", "Y", "Conf");
    println!("{}", "-".repeat(38));
    for (part, keypoint) in snapwear_core::BodyPart::ALL.iter().zip(pose.keypoints()) {
        let marker = if keypoint.confidence >= threshold { "" } else { " (low)" };
        println!(
            "{:<15} {:>6} {:>6} {:>8.3}{}",
            format!("{:?}", part),
            keypoint.x,
            keypoint.y,
            keypoint.confidence,
            marker
        );
    }

    Ok(())
}

fn cmd_config(config: Config, validate: bool) -> anyhow::Result<()> {
    if validate {
        config.validate()?;
        println!("✓ Configuration is valid");
        return Ok(());
    }

    println!("Configuration:");
    println!();

    println!("[pose]");
    match &config.pose.model_path {
        Some(path) => println!("  model = {:?}", path),
        None => println!("  model = (disabled, fallback placement only)"),
    }
    println!("  confidence_threshold = {}", config.pose.confidence_threshold);
    println!(
        "  input_size = {}x{}",
        config.pose.input_width, config.pose.input_height
    );
    println!();

    println!("[placement]");
    println!("  fallback_width_ratio = {}", config.placement.fallback_width_ratio);
    println!("  fallback_top_ratio = {}", config.placement.fallback_top_ratio);
    for (name, fit) in [
        ("upper_body", config.placement.upper_body),
        ("lower_body", config.placement.lower_body),
        ("dresses", config.placement.dresses),
    ] {
        println!(
            "  {} = width x{}, offset {:+}",
            name, fit.width_factor, fit.vertical_offset_ratio
        );
    }
    println!();

    println!("[output]");
    println!("  dir = {:?}", config.output.dir);
    println!();

    println!("[debug]");
    println!("  output_dir = {:?}", config.debug.output_dir);

    Ok(())
}
