use std::path::Path;

use image::{DynamicImage, ImageDecoder, ImageError, ImageReader, RgbaImage};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::geometry::{Length, NormalizedGeometry, Orientation};
use crate::transform::rotate_clockwise;

/// A decoded raster with its capture resolution
#[derive(Debug, Clone)]
pub struct RasterImage {
    pub pixels: RgbaImage,
    pub resolution_ppcm: f64,
    /// Embedded ICC profile, if the source carried one
    pub icc_profile: Option<Vec<u8>>,
}

impl RasterImage {
    pub fn new(pixels: RgbaImage, resolution_ppcm: f64) -> Self {
        Self {
            pixels,
            resolution_ppcm,
            icc_profile: None,
        }
    }

    /// Decode an image file, keeping its ICC profile when the decoder exposes one
    pub fn open(path: &Path, resolution_ppcm: f64) -> Result<Self> {
        let decode_err = |source: ImageError| Error::Decode {
            path: path.to_path_buf(),
            source,
        };

        let mut decoder = ImageReader::open(path)
            .and_then(|reader| reader.with_guessed_format())
            .map_err(|e| decode_err(ImageError::IoError(e)))?
            .into_decoder()
            .map_err(decode_err)?;

        let icc_profile = decoder.icc_profile().map_err(decode_err)?;
        let pixels = DynamicImage::from_decoder(decoder)
            .map_err(decode_err)?
            .to_rgba8();

        debug!(
            "Decoded {:?}: {}x{}, icc profile: {}",
            path,
            pixels.width(),
            pixels.height(),
            icc_profile.is_some()
        );

        Ok(Self {
            pixels,
            resolution_ppcm,
            icc_profile,
        })
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn orientation(&self) -> Orientation {
        Orientation::of(self.width(), self.height())
    }
}

/// Something whose width can be measured against a reference length
pub trait Measure {
    /// Width and height in the unit the measurement is taken in
    fn measured_extent(&self) -> (f64, f64);

    fn resolution_ppcm(&self) -> f64;

    /// Give up the pixels and ICC profile
    fn into_parts(self) -> (RgbaImage, Option<Vec<u8>>);
}

impl Measure for RasterImage {
    /// A fresh raster is measured in pixels
    fn measured_extent(&self) -> (f64, f64) {
        (self.width() as f64, self.height() as f64)
    }

    fn resolution_ppcm(&self) -> f64 {
        self.resolution_ppcm
    }

    fn into_parts(self) -> (RgbaImage, Option<Vec<u8>>) {
        (self.pixels, self.icc_profile)
    }
}

/// A raster brought to the physical scale of its reference length
///
/// The pixel grid is the source's (rotated to landscape); `geometry` gives
/// its physical extent, so the grid spans exactly `geometry.width_cm`.
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    pub pixels: RgbaImage,
    pub geometry: NormalizedGeometry,
    pub icc_profile: Option<Vec<u8>>,
    /// Whether the source was portrait and got rotated
    pub rotated: bool,
}

impl NormalizedImage {
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn resolution_ppcm(&self) -> f64 {
        self.geometry.resolution_ppcm
    }

    /// Pixels per cm of the grid over its physical width
    ///
    /// This is the density written into saved documents, so that
    /// `width() / density_ppcm()` is the reference length.
    pub fn density_ppcm(&self) -> f64 {
        self.width() as f64 / self.geometry.width_cm
    }
}

impl Measure for NormalizedImage {
    /// A normalized image is measured by its physical extent in cm
    fn measured_extent(&self) -> (f64, f64) {
        (self.geometry.width_cm, self.geometry.height_cm)
    }

    fn resolution_ppcm(&self) -> f64 {
        self.geometry.resolution_ppcm
    }

    fn into_parts(self) -> (RgbaImage, Option<Vec<u8>>) {
        (self.pixels, self.icc_profile)
    }
}

/// Bring `image` to the physical scale given by `reference`
///
/// Portrait rasters are rotated to landscape first. The physical width of
/// the result equals the reference length. Normalizing a `NormalizedImage`
/// again with the same reference leaves it unchanged (scale factor 1).
pub fn normalize<I: Measure>(image: I, reference: Length) -> Result<NormalizedImage> {
    let reference_cm = reference.to_cm();
    if !reference_cm.is_finite() || reference_cm <= 0.0 {
        return Err(Error::invalid_input(format!(
            "Reference length must be positive, got {}",
            reference
        )));
    }

    let (width, height) = image.measured_extent();
    let resolution_ppcm = image.resolution_ppcm();
    let (pixels, icc_profile) = image.into_parts();

    if pixels.width() == 0 || pixels.height() == 0 {
        return Err(Error::invalid_input(format!(
            "Image has zero extent ({}x{})",
            pixels.width(),
            pixels.height()
        )));
    }

    let rotated = Orientation::of(pixels.width(), pixels.height()) == Orientation::Portrait;
    let (pixels, width, height) = if rotated {
        debug!(
            "Rotating portrait image {}x{} to landscape",
            pixels.width(),
            pixels.height()
        );
        (rotate_clockwise(&pixels), height, width)
    } else {
        (pixels, width, height)
    };

    let geometry = NormalizedGeometry::compute(width, height, resolution_ppcm, reference_cm)?;

    info!(
        "Scale factor {:.4}: {:.3} ppcm -> {:.3} ppcm, {:.3} x {:.3} cm",
        geometry.scale_factor.value(),
        resolution_ppcm,
        geometry.resolution_ppcm,
        geometry.width_cm,
        geometry.height_cm
    );

    Ok(NormalizedImage {
        pixels,
        geometry,
        icc_profile,
        rotated,
    })
}
