pub mod cli;
pub mod compose;
pub mod error;
pub mod export;
pub mod geometry;
pub mod normalize;
pub mod psd;
pub mod transform;

pub use cli::Cli;
pub use compose::{compose, compose_all, BlendMode, Composite, LayerBounds, MAX_LAYER_OFFSET};
pub use error::{Error, Result};
pub use export::{export, export_name, CompositeSink, ExportedFiles, OutputTarget, PngSink, PsdSink};
pub use geometry::{Length, LengthUnit, NormalizedGeometry, Offset, Orientation, ScaleFactor};
pub use normalize::{normalize, Measure, NormalizedImage, RasterImage};
pub use transform::{resize_exact, ResampleFilter};
