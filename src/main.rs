use std::fs;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use coreg::cli::{Command, ExportArgs, InputArgs, OverlayArgs};
use coreg::{
    compose_all, export, export_name, normalize, Cli, Composite, NormalizedImage, OutputTarget,
    PngSink, PsdSink, RasterImage,
};

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match &cli.command {
        Command::Overlay(args) => run_overlay(args),
        Command::Export(args) => run_export(args),
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Load, normalize and stack every overlay over the base, in order
fn build_composites(inputs: &InputArgs) -> Result<Vec<Composite>> {
    let base = RasterImage::open(&inputs.base, inputs.base_resolution())
        .with_context(|| format!("Failed to load CT image: {:?}", inputs.base))?;

    info!(
        "CT image {:?}: {}x{}, reference width {}",
        inputs.base,
        base.width(),
        base.height(),
        inputs.base_length
    );

    let base = normalize(base, inputs.base_length)
        .with_context(|| format!("Failed to scale CT image: {:?}", inputs.base))?;

    let overlay_resolution = inputs.overlay_resolution();
    let overlays = inputs.overlays.iter().map(|path| -> coreg::Result<NormalizedImage> {
        let raster = RasterImage::open(path, overlay_resolution)?;
        info!(
            "MPI image {:?}: {}x{}, reference width {}",
            path,
            raster.width(),
            raster.height(),
            inputs.overlay_length
        );
        normalize(raster, inputs.overlay_length)
    });

    compose_all(base, overlays, inputs.filter).context("Failed to compose overlays")
}

fn run_overlay(args: &OverlayArgs) -> Result<()> {
    let composites = build_composites(&args.inputs)?;

    fs::create_dir_all(&args.preview_dir)
        .with_context(|| format!("Failed to create preview directory: {:?}", args.preview_dir))?;

    for (index, composite) in composites.iter().enumerate() {
        let path = args.preview_dir.join(format!("{}.png", export_name(index)));
        composite
            .flatten()
            .save(&path)
            .with_context(|| format!("Failed to save preview: {:?}", path))?;
        info!("Saved preview {:?}", path);
    }

    let (width, height) = composites
        .first()
        .map(Composite::dimensions)
        .context("No composites were produced")?;
    eprintln!();
    eprintln!(
        "Composed {} overlay(s) on a {}x{} canvas: {:?}",
        composites.len(),
        width,
        height,
        args.preview_dir
    );
    eprintln!(
        "Find where the MPI layer belongs on {}.png, then run `coreg export` with --offset DX,DY",
        export_name(0)
    );

    Ok(())
}

fn run_export(args: &ExportArgs) -> Result<()> {
    let mut composites = build_composites(&args.inputs)?;

    // Stands in for the manual drag of the top layer on the first composite
    let reference = composites
        .first_mut()
        .context("No composites to export")?;
    reference
        .translate_overlay(args.offset)
        .context("Failed to place the MPI layer")?;

    let reference_offset = reference.overlay_offset();
    if let Some(bounds) = reference.overlay_bounds() {
        info!(
            "Reference MPI layer bounds: ({}, {}) - ({}, {})",
            bounds.left, bounds.top, bounds.right, bounds.bottom
        );
    }

    let exported = export(
        &mut composites,
        reference_offset,
        &OutputTarget::new(&args.psd_dir, &PsdSink),
        &OutputTarget::new(&args.png_dir, &PngSink),
    )
    .context("Failed to export composites")?;

    eprintln!();
    eprintln!(
        "Saved {} composite(s) with offset ({}, {})",
        exported.len(),
        reference_offset.x,
        reference_offset.y
    );
    for files in &exported {
        eprintln!("  {:?}", files.layered);
        eprintln!("  {:?}", files.flattened);
    }

    Ok(())
}
