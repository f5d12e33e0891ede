//! `glamshift-batch` - apply every reference look to every source face.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use image::RgbImage;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use glamshift::engine::decode_image;
use glamshift::utils::encode_png;
use glamshift::{Config, Pipeline};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// Batch makeup transfer over two directories of images.
#[derive(Parser, Debug)]
#[command(name = "glamshift-batch")]
#[command(version, about, long_about = None)]
struct Args {
    /// Directory with the faces to restyle.
    #[arg(long, default_value = "assets/images/non-makeup", value_name = "DIR")]
    source_dir: PathBuf,

    /// Directory with the makeup references.
    #[arg(long, default_value = "assets/images/makeup", value_name = "DIR")]
    reference_dir: PathBuf,

    /// Where `<source>-<reference>.png` results are written.
    #[arg(short, long, default_value = "transferred", value_name = "DIR")]
    output_dir: PathBuf,

    /// Configuration file.
    #[arg(short, long, default_value = "config.toml", value_name = "FILE")]
    config: PathBuf,

    /// Restrict the transfer to one region (lips, eyeshadow, skin, all).
    #[arg(short, long, value_name = "REGION")]
    region: Option<String>,

    /// Region intensity (0.0-2.0), used together with --region.
    #[arg(short, long, default_value = "1.0", value_name = "FLOAT")]
    intensity: f32,

    /// Skip pasting the result back into the source frame.
    #[arg(long)]
    no_postprocess: bool,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    FmtSubscriber::builder()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .with_target(false)
        .init();

    if let Err(err) = run(&args) {
        error!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

fn run(args: &Args) -> Result<()> {
    let config = Config::load(&args.config.to_string_lossy()).unwrap_or_else(|e| {
        info!("Using default config ({})", e);
        Config::default()
    });

    let sources = list_images(&args.source_dir)?;
    let references = list_images(&args.reference_dir)?;
    info!("{} source(s) x {} reference(s)", sources.len(), references.len());

    std::fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("Failed to create {}", args.output_dir.display()))?;

    let pipeline = Pipeline::from_config(&config)?;

    let start = Instant::now();
    let mut written = 0usize;
    for source_path in &sources {
        let source = match load(source_path) {
            Ok(img) => img,
            Err(e) => {
                warn!("Skipping {}: {:#}", source_path.display(), e);
                continue;
            }
        };

        for reference_path in &references {
            let output_path = args
                .output_dir
                .join(format!("{}-{}.png", file_stem(source_path), file_stem(reference_path)));

            match transfer_pair(&pipeline, args, &source, reference_path, &output_path) {
                Ok(()) => {
                    written += 1;
                    info!("Wrote {}", output_path.display());
                }
                Err(e) => warn!(
                    "Failed {} + {}: {:#}",
                    source_path.display(),
                    reference_path.display(),
                    e
                ),
            }
        }
    }

    info!(
        "Done: {}/{} pair(s) in {:.1}s",
        written,
        sources.len() * references.len(),
        start.elapsed().as_secs_f32()
    );
    Ok(())
}

fn transfer_pair(
    pipeline: &Pipeline,
    args: &Args,
    source: &RgbImage,
    reference_path: &Path,
    output_path: &Path,
) -> Result<()> {
    let reference = load(reference_path)?;
    let output = match &args.region {
        Some(region) => pipeline.run_region(source, &reference, region, args.intensity)?,
        None => pipeline.run(source, &reference, !args.no_postprocess)?,
    };
    let bytes = encode_png(&output)?;
    std::fs::write(output_path, bytes).with_context(|| format!("Failed to write {}", output_path.display()))?;
    Ok(())
}

fn load(path: &Path) -> Result<RgbImage> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(decode_image(&bytes)?)
}

/// Image files directly inside `dir`, sorted by name
fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to list {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect();
    paths.sort();
    Ok(paths)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}
