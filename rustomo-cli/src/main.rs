//! rustomo CLI - Convert multi-file tomography scans into a single exchange file.
//!
//! Every `image` array of the input scan is placed under `/exchange` as a
//! virtual dataset (or a copy, with `--materialize`) and the rotation angles
//! are written to `/exchange/theta`.
#![allow(clippy::uninlined_format_args)]

use clap::Parser;
use log::{error, info, warn};
use rustomo_core::{persist, ConversionConfig, Converter, TargetLayout};
use rustomo_io::{
    load_config, read_source_tree, write_manifest, Hdf5Catalog, Hdf5LayoutWriter, Manifest,
    ReadOptions, WriteMode,
};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    RustomoIo(#[from] rustomo_io::Error),

    #[error("Core error: {0}")]
    Core(#[from] rustomo_core::Error),
}

/// Tomography scan converter.
#[derive(Parser)]
#[command(name = "rustomo")]
#[command(author, version, about, long_about = None)]
#[allow(clippy::struct_excessive_bools)]
struct Cli {
    /// Input scan file (HDF5)
    #[arg(short, long)]
    input: PathBuf,

    /// Output exchange file (HDF5, overwritten)
    #[arg(short, long)]
    output: PathBuf,

    /// Conversion config (JSON); absent fields take defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory holding the detector files [default: input file directory]
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Copy every slab instead of creating virtual datasets
    #[arg(long)]
    materialize: bool,

    /// Also write the composed layout as a JSON manifest
    #[arg(long)]
    manifest: Option<PathBuf>,

    /// Do not check detector files before composing
    #[arg(long)]
    no_verify: bool,

    /// Maximum group nesting accepted in the input file
    #[arg(long, default_value = "64")]
    max_depth: usize,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ConversionConfig::default(),
    };
    if cli.no_verify {
        config = config.with_verify_sources(false);
    }
    config.validate()?;

    let options = ReadOptions::new().with_max_depth(cli.max_depth);
    let tree = read_source_tree(&cli.input, &options)?;
    info!("read {} node(s) from {}", tree.len(), cli.input.display());

    let data_dir = cli
        .data_dir
        .clone()
        .unwrap_or_else(|| parent_dir(&cli.input));
    let mut layout = TargetLayout::new();
    let outcome = Converter::new(&config, &Hdf5Catalog)
        .with_data_dir(data_dir)
        .run(&tree, &mut layout);

    // Whatever was placed is persisted, even when the run failed afterwards.
    let mode = if cli.materialize {
        WriteMode::Materialize
    } else {
        WriteMode::Virtual
    };
    let mut writer = Hdf5LayoutWriter::create(&cli.output, mode)?;
    persist(&layout, &mut writer)?;
    drop(writer);
    info!("wrote {}", cli.output.display());

    let report = match outcome {
        Ok(report) => report,
        Err(err) => {
            error!(
                "conversion incomplete, {} holds {} array(s) and no theta: {err}",
                cli.output.display(),
                layout.arrays.len()
            );
            if let Some(path) = &cli.manifest {
                write_manifest(path, &Manifest::new(&cli.input, layout))?;
            }
            return Err(err.into());
        }
    };

    print!("{}", report);
    if report.is_partial() {
        warn!(
            "partial conversion: {} classified record(s) were not placed",
            report.failures().count()
        );
    }

    if let Some(path) = &cli.manifest {
        write_manifest(path, &Manifest::new(&cli.input, layout).with_report(report))?;
        info!("wrote manifest {}", path.display());
    }
    Ok(())
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();
}

fn parent_dir(path: &Path) -> PathBuf {
    path.parent().map_or_else(PathBuf::new, Path::to_path_buf)
}
