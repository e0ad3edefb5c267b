use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, RgbaImage};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::compose::Composite;
use crate::error::{Error, Result};
use crate::geometry::Offset;
use crate::psd::{write_psd, PsdDocument, PsdLayer};

pub const EXPORT_NAME_PREFIX: &str = "overlayed-image-";

/// File name stem for the composite at `index`
pub fn export_name(index: usize) -> String {
    format!("{}{}", EXPORT_NAME_PREFIX, index)
}

/// Encodes a composite into one output format
pub trait CompositeSink {
    fn extension(&self) -> &str;

    /// `flattened` is `composite.flatten()`, rendered once per composite
    fn write(
        &self,
        composite: &Composite,
        flattened: &RgbaImage,
        writer: &mut dyn Write,
    ) -> io::Result<()>;
}

/// Layered document keeping both layers, transparency and the ICC profile
pub struct PsdSink;

impl CompositeSink for PsdSink {
    fn extension(&self) -> &str {
        "psd"
    }

    fn write(
        &self,
        composite: &Composite,
        flattened: &RgbaImage,
        writer: &mut dyn Write,
    ) -> io::Result<()> {
        let (width, height) = composite.dimensions();
        let layers = [&composite.base, &composite.overlay]
            .into_iter()
            .map(|layer| PsdLayer {
                name: &layer.name,
                pixels: &layer.pixels,
                left: layer.offset.x,
                top: layer.offset.y,
                blend_key: layer.blend_mode.key(),
                opacity: 255,
            })
            .collect();

        let doc = PsdDocument {
            width,
            height,
            resolution_ppcm: composite.resolution_ppcm,
            icc_profile: composite.icc_profile.as_deref(),
            layers,
            merged: flattened,
        };
        write_psd(writer, &doc)
    }
}

/// Flattened raster for quick viewing
pub struct PngSink;

impl CompositeSink for PngSink {
    fn extension(&self) -> &str {
        "png"
    }

    fn write(
        &self,
        _composite: &Composite,
        flattened: &RgbaImage,
        writer: &mut dyn Write,
    ) -> io::Result<()> {
        PngEncoder::new(writer)
            .write_image(
                flattened.as_raw(),
                flattened.width(),
                flattened.height(),
                ExtendedColorType::Rgba8,
            )
            .map_err(io::Error::other)
    }
}

/// A directory paired with the sink that fills it
pub struct OutputTarget<'a> {
    pub dir: &'a Path,
    pub sink: &'a dyn CompositeSink,
}

impl<'a> OutputTarget<'a> {
    pub fn new(dir: &'a Path, sink: &'a dyn CompositeSink) -> Self {
        Self { dir, sink }
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", name, self.sink.extension().to_ascii_lowercase()))
    }

    /// Encode into a temporary file next to the final path
    fn stage(
        &self,
        name: &str,
        composite: &Composite,
        flattened: &RgbaImage,
    ) -> Result<(NamedTempFile, PathBuf)> {
        let path = self.path_for(name);
        let mut staged = tempfile::Builder::new()
            .prefix(&format!(".{}_", name))
            .suffix(".part")
            .tempfile_in(self.dir)
            .map_err(|e| Error::export(&path, e))?;

        let mut writer = BufWriter::new(staged.as_file_mut());
        self.sink
            .write(composite, flattened, &mut writer)
            .and_then(|_| writer.flush())
            .map_err(|e| Error::export(&path, e))?;
        drop(writer);

        Ok((staged, path))
    }
}

/// Paths written for one composite
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedFiles {
    pub layered: PathBuf,
    pub flattened: PathBuf,
}

/// Write both artifacts of one composite, or neither
fn commit(
    name: &str,
    composite: &Composite,
    layered: &OutputTarget<'_>,
    raster: &OutputTarget<'_>,
) -> Result<ExportedFiles> {
    let flattened = composite.flatten();

    let (layered_tmp, layered_path) = layered.stage(name, composite, &flattened)?;
    let (raster_tmp, raster_path) = raster.stage(name, composite, &flattened)?;

    layered_tmp
        .persist(&layered_path)
        .map_err(|e| Error::export(&layered_path, e.error))?;

    if let Err(e) = raster_tmp.persist(&raster_path) {
        if let Err(cleanup) = fs::remove_file(&layered_path) {
            warn!("Could not remove {:?}: {}", layered_path, cleanup);
        }
        return Err(Error::export(&raster_path, e.error));
    }

    Ok(ExportedFiles {
        layered: layered_path,
        flattened: raster_path,
    })
}

/// Propagate the reference offset and save every composite
///
/// Composite 0 already carries the operator's placement and is saved as-is.
/// Every later composite has its overlay moved by `reference_offset` before
/// saving. Composites are renamed `overlayed-image-<i>` once their files are
/// committed. The first failure, including an offset that would move a layer
/// out of range, aborts the sequence and leaves the failing composite
/// unchanged.
pub fn export(
    composites: &mut [Composite],
    reference_offset: Offset,
    layered: &OutputTarget<'_>,
    raster: &OutputTarget<'_>,
) -> Result<Vec<ExportedFiles>> {
    for target in [layered, raster] {
        fs::create_dir_all(target.dir).map_err(|e| Error::export(target.dir, e))?;
    }

    let mut exported = Vec::with_capacity(composites.len());

    for (index, composite) in composites.iter_mut().enumerate() {
        let name = export_name(index);
        let previous = composite.overlay_offset();

        if index > 0 {
            composite.translate_overlay(reference_offset)?;
        }
        debug!(
            "'{}' overlay offset ({}, {})",
            composite.name,
            composite.overlay_offset().x,
            composite.overlay_offset().y
        );

        match commit(&name, composite, layered, raster) {
            Ok(files) => {
                info!("Saved {:?} and {:?}", files.layered, files.flattened);
                composite.name = name;
                exported.push(files);
            }
            Err(e) => {
                composite.overlay.offset = previous;
                return Err(e);
            }
        }
    }

    Ok(exported)
}
