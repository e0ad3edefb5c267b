use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::compose::MAX_LAYER_OFFSET;
use crate::geometry::{Length, Offset, CM_PER_INCH, DEFAULT_PPCM};
use crate::transform::ResampleFilter;

#[derive(Parser, Debug)]
#[command(name = "coreg")]
#[command(version, about = "Coregister MPI scans over a CT scan at a common physical scale")]
pub struct Cli {
    /// Show debug logging (RUST_LOG takes precedence)
    #[arg(long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Scale and stack the images, writing unaligned previews to pick an offset from
    Overlay(OverlayArgs),
    /// Move the overlays by the chosen offset and save layered and flattened composites
    Export(ExportArgs),
}

#[derive(Args, Debug)]
pub struct InputArgs {
    /// CT image (bottom layer)
    #[arg(long)]
    pub base: PathBuf,

    /// Measured width of the CT image, e.g. "20", "20cm", "200mm" [unit: cm]
    #[arg(long, value_parser = parse_length)]
    pub base_length: Length,

    /// CT resolution in pixels per cm [default: 72 ppi]
    #[arg(long, value_parser = parse_positive, conflicts_with = "base_ppi")]
    pub base_ppcm: Option<f64>,

    /// CT resolution in pixels per inch
    #[arg(long, value_parser = parse_positive)]
    pub base_ppi: Option<f64>,

    /// MPI image to overlay; repeat for several, output order follows
    #[arg(long = "overlay", required = true)]
    pub overlays: Vec<PathBuf>,

    /// Measured width of the MPI images [unit: cm]
    #[arg(long, value_parser = parse_length)]
    pub overlay_length: Length,

    /// MPI resolution in pixels per cm [default: 72 ppi]
    #[arg(long, value_parser = parse_positive, conflicts_with = "overlay_ppi")]
    pub overlay_ppcm: Option<f64>,

    /// MPI resolution in pixels per inch
    #[arg(long, value_parser = parse_positive)]
    pub overlay_ppi: Option<f64>,

    /// Resampling filter
    #[arg(long, value_enum, default_value_t = ResampleFilter::Bicubic)]
    pub filter: ResampleFilter,
}

impl InputArgs {
    pub fn base_resolution(&self) -> f64 {
        resolution_ppcm(self.base_ppcm, self.base_ppi)
    }

    pub fn overlay_resolution(&self) -> f64 {
        resolution_ppcm(self.overlay_ppcm, self.overlay_ppi)
    }
}

#[derive(Args, Debug)]
pub struct OverlayArgs {
    #[command(flatten)]
    pub inputs: InputArgs,

    /// Directory for the unaligned flattened previews
    #[arg(long)]
    pub preview_dir: PathBuf,
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    #[command(flatten)]
    pub inputs: InputArgs,

    /// Placement of the MPI layer on the first composite, in pixels ("DX,DY")
    #[arg(long, value_parser = parse_offset, allow_hyphen_values = true)]
    pub offset: Offset,

    /// Directory for the layered .psd files
    #[arg(long)]
    pub psd_dir: PathBuf,

    /// Directory for the flattened .png files
    #[arg(long)]
    pub png_dir: PathBuf,
}

fn resolution_ppcm(ppcm: Option<f64>, ppi: Option<f64>) -> f64 {
    ppcm.or(ppi.map(|ppi| ppi / CM_PER_INCH))
        .unwrap_or(DEFAULT_PPCM)
}

fn parse_length(s: &str) -> Result<Length, String> {
    s.parse::<Length>().map_err(|e| e.to_string())
}

fn parse_positive(s: &str) -> Result<f64, String> {
    let value: f64 = s
        .parse()
        .map_err(|_| format!("Invalid number: {}", s))?;
    if !value.is_finite() || value <= 0.0 {
        return Err(format!("Value must be positive, got {}", s));
    }
    Ok(value)
}

fn parse_offset(s: &str) -> Result<Offset, String> {
    let parts: Vec<&str> = s.split(',').collect();
    if parts.len() != 2 {
        return Err(format!("Invalid offset format '{}', expected DX,DY", s));
    }

    let dx: i32 = parts[0]
        .trim()
        .parse()
        .map_err(|_| format!("Invalid horizontal offset: {}", parts[0]))?;
    let dy: i32 = parts[1]
        .trim()
        .parse()
        .map_err(|_| format!("Invalid vertical offset: {}", parts[1]))?;

    let range = -MAX_LAYER_OFFSET..=MAX_LAYER_OFFSET;
    if !range.contains(&dx) || !range.contains(&dy) {
        return Err(format!(
            "Offset '{}' out of range, each component must be within +/-{}",
            s, MAX_LAYER_OFFSET
        ));
    }

    Ok(Offset::new(dx, dy))
}
