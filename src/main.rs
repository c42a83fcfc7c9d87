//! WSI Tiler - generates tile pyramids from large microscopy images.
//!
//! This binary wires the raster reader, an in-memory catalog and the pyramid
//! generator behind three subcommands.

use clap::Parser;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wsi_tiler::{
    config::{resolve_image_id, Cli, Command, DescribeConfig, GenerateConfig, TileConfig},
    MemoryCatalog, PyramidConfig, PyramidGenerator, RasterOpener, TileCoord,
};

type Generator = PyramidGenerator<RasterOpener, MemoryCatalog>;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Command::Generate(config) => run_generate(config).await,
        Command::Tile(config) => run_tile(config).await,
        Command::Describe(config) => run_describe(config).await,
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "wsi_tiler=debug"
    } else {
        "wsi_tiler=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build a generator around a fresh catalog; the generator validates the
/// configuration.
fn build_generator(config: PyramidConfig) -> Option<(Generator, Arc<MemoryCatalog>)> {
    let catalog = Arc::new(MemoryCatalog::new());
    match PyramidGenerator::new(RasterOpener::new(), Arc::clone(&catalog), config) {
        Ok(generator) => Some((generator, catalog)),
        Err(e) => {
            error!("{}", e);
            None
        }
    }
}

fn image_id_or_exit(explicit: Option<&str>, input: &Path) -> Option<String> {
    match resolve_image_id(explicit, input) {
        Ok(id) => Some(id),
        Err(e) => {
            error!("{}", e);
            None
        }
    }
}

// =============================================================================
// Generate Command
// =============================================================================

async fn run_generate(config: GenerateConfig) -> ExitCode {
    init_logging(config.pyramid.verbose);

    let Some(image_id) = image_id_or_exit(config.image_id.as_deref(), &config.input) else {
        return ExitCode::FAILURE;
    };
    let pyramid = config.pyramid.to_pyramid_config();

    info!("Configuration:");
    info!("  Source: {}", config.input.display());
    info!("  Image id: {}", image_id);
    info!("  Output: {}", pyramid.output_base.display());
    info!(
        "  Tile size: {}, block size: {}, JPEG quality: {}, workers: {}",
        pyramid.tile_size, pyramid.block_size, pyramid.jpeg_quality, pyramid.workers
    );

    let Some((generator, catalog)) = build_generator(pyramid) else {
        return ExitCode::FAILURE;
    };

    let handle = match generator.submit(&image_id, &config.input).await {
        Ok(handle) => handle,
        Err(e) => {
            error!("Job rejected: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let outcome = match handle.await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("Generation task failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let history = catalog.history(&image_id).await;
    info!(
        "Status history: {}",
        history
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(" → ")
    );

    match outcome {
        Ok(report) => {
            if config.json {
                match serde_json::to_string_pretty(&report) {
                    Ok(json) => println!("{}", json),
                    Err(e) => {
                        error!("Failed to serialize report: {}", e);
                        return ExitCode::FAILURE;
                    }
                }
            } else {
                println!(
                    "{}: {} tiles, levels 0..={}, {} ms",
                    report.image_id, report.tiles_written, report.max_level, report.elapsed_ms
                );
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Generation failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// Tile Command
// =============================================================================

async fn run_tile(config: TileConfig) -> ExitCode {
    init_logging(config.pyramid.verbose);

    let Some(image_id) = image_id_or_exit(config.image_id.as_deref(), &config.input) else {
        return ExitCode::FAILURE;
    };
    let Some((generator, _catalog)) = build_generator(config.pyramid.to_pyramid_config()) else {
        return ExitCode::FAILURE;
    };

    let coord = TileCoord::new(config.level, config.tile_x, config.tile_y);
    match generator
        .generate_tile(&image_id, &config.input, coord)
        .await
    {
        Ok(outcome) => {
            println!(
                "{} ({}x{})",
                outcome.path.display(),
                outcome.width,
                outcome.height
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Tile generation failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// Describe Command
// =============================================================================

async fn run_describe(config: DescribeConfig) -> ExitCode {
    init_logging(config.pyramid.verbose);

    let Some((generator, _catalog)) = build_generator(config.pyramid.to_pyramid_config()) else {
        return ExitCode::FAILURE;
    };

    let descriptor = match generator.describe(&config.input).await {
        Ok(descriptor) => descriptor,
        Err(e) => {
            error!("Failed to describe {}: {}", config.input.display(), e);
            return ExitCode::FAILURE;
        }
    };

    match serde_json::to_string_pretty(&descriptor) {
        Ok(json) => {
            println!("{}", json);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Failed to serialize descriptor: {}", e);
            ExitCode::FAILURE
        }
    }
}
