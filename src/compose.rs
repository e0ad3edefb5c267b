use image::{Rgba, RgbaImage};
use imageproc::geometric_transformations::{warp, Interpolation, Projection};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::geometry::Offset;
use crate::normalize::NormalizedImage;
use crate::psd::MAX_PSD_DIMENSION;
use crate::transform::{resize_exact, ResampleFilter};

pub const BASE_LAYER_NAME: &str = "CT";
pub const OVERLAY_LAYER_NAME: &str = "MPI";

/// Pixels at or above this alpha count as layer content
const CONTENT_ALPHA_THRESHOLD: u8 = 10;

/// Largest distance, per axis, a layer may sit from the canvas origin
pub const MAX_LAYER_OFFSET: i32 = MAX_PSD_DIMENSION as i32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendMode {
    Normal,
    Screen,
}

impl BlendMode {
    /// Four-character key used by layered document formats
    pub fn key(self) -> &'static [u8; 4] {
        match self {
            BlendMode::Normal => b"norm",
            BlendMode::Screen => b"scrn",
        }
    }

    fn blend_channel(self, backdrop: f64, source: f64) -> f64 {
        match self {
            BlendMode::Normal => source,
            BlendMode::Screen => backdrop + source - backdrop * source,
        }
    }
}

/// Rectangle in canvas pixels; right and bottom are exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerBounds {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl LayerBounds {
    pub fn origin(&self) -> Offset {
        Offset::new(self.left, self.top)
    }
}

#[derive(Debug, Clone)]
pub struct Layer {
    pub name: String,
    pub pixels: RgbaImage,
    pub offset: Offset,
    pub blend_mode: BlendMode,
}

impl Layer {
    fn new(name: &str, pixels: RgbaImage, blend_mode: BlendMode) -> Self {
        Self {
            name: name.to_string(),
            pixels,
            offset: Offset::zeros(),
            blend_mode,
        }
    }

    /// Full pixel rectangle of the layer in canvas coordinates
    pub fn bounds(&self) -> LayerBounds {
        LayerBounds {
            left: self.offset.x,
            top: self.offset.y,
            right: self.offset.x.saturating_add(self.pixels.width() as i32),
            bottom: self.offset.y.saturating_add(self.pixels.height() as i32),
        }
    }

    /// Rectangle covering the layer's visible content, None if fully transparent
    pub fn content_bounds(&self) -> Option<LayerBounds> {
        let (min_x, min_y, width, height) =
            find_content_bounds(&self.pixels, CONTENT_ALPHA_THRESHOLD)?;
        let left = self.offset.x.saturating_add(min_x as i32);
        let top = self.offset.y.saturating_add(min_y as i32);
        Some(LayerBounds {
            left,
            top,
            right: left.saturating_add(width as i32),
            bottom: top.saturating_add(height as i32),
        })
    }
}

/// Find the bounding box (x, y, width, height) of pixels with alpha >= threshold
fn find_content_bounds(img: &RgbaImage, alpha_threshold: u8) -> Option<(u32, u32, u32, u32)> {
    let (width, height) = img.dimensions();
    let mut min_x = width;
    let mut max_x = 0;
    let mut min_y = height;
    let mut max_y = 0;

    for (x, y, pixel) in img.enumerate_pixels() {
        if pixel[3] >= alpha_threshold {
            min_x = min_x.min(x);
            max_x = max_x.max(x);
            min_y = min_y.min(y);
            max_y = max_y.max(y);
        }
    }

    if min_x <= max_x && min_y <= max_y {
        Some((min_x, min_y, max_x - min_x + 1, max_y - min_y + 1))
    } else {
        None
    }
}

/// A base layer with one screen-blended overlay on a canvas the size of the base
#[derive(Debug, Clone)]
pub struct Composite {
    pub name: String,
    pub base: Layer,
    pub overlay: Layer,
    /// Pixels per cm of the canvas over its physical extent
    pub resolution_ppcm: f64,
    pub icc_profile: Option<Vec<u8>>,
}

impl Composite {
    pub fn dimensions(&self) -> (u32, u32) {
        self.base.pixels.dimensions()
    }

    pub fn overlay_offset(&self) -> Offset {
        self.overlay.offset
    }

    /// Move the overlay layer by `delta`, relative to where it currently sits
    ///
    /// The resulting offset must stay within `MAX_LAYER_OFFSET` on both axes;
    /// otherwise the layer is left where it was.
    pub fn translate_overlay(&mut self, delta: Offset) -> Result<()> {
        let current = self.overlay.offset;
        let moved = current
            .x
            .checked_add(delta.x)
            .zip(current.y.checked_add(delta.y))
            .map(|(x, y)| Offset::new(x, y))
            .filter(|o| {
                let range = -MAX_LAYER_OFFSET..=MAX_LAYER_OFFSET;
                range.contains(&o.x) && range.contains(&o.y)
            })
            .ok_or_else(|| {
                Error::invalid_input(format!(
                    "Moving '{}' from ({}, {}) by ({}, {}) leaves the +/-{} px range",
                    self.overlay.name, current.x, current.y, delta.x, delta.y, MAX_LAYER_OFFSET
                ))
            })?;

        self.overlay.offset = moved;
        Ok(())
    }

    /// Visible extent of the overlay in canvas coordinates
    pub fn overlay_bounds(&self) -> Option<LayerBounds> {
        self.overlay.content_bounds()
    }

    /// Render both layers into a single canvas-sized raster
    pub fn flatten(&self) -> RgbaImage {
        let (width, height) = self.dimensions();
        let offset = self.overlay.offset;
        // Whole-pixel shift; uncovered canvas stays transparent
        let overlay = warp(
            &self.overlay.pixels,
            &Projection::translate(offset.x as f32, offset.y as f32),
            Interpolation::Nearest,
            Rgba([0, 0, 0, 0]),
        );

        let mut output = RgbaImage::new(width, height);
        for (x, y, pixel) in output.enumerate_pixels_mut() {
            let backdrop = self.base.pixels.get_pixel(x, y);
            let source = if x < overlay.width() && y < overlay.height() {
                *overlay.get_pixel(x, y)
            } else {
                Rgba([0, 0, 0, 0])
            };
            *pixel = composite_pixel(backdrop, &source, self.overlay.blend_mode);
        }

        output
    }
}

/// Separable blend followed by source-over, on straight (non-premultiplied) alpha
fn composite_pixel(backdrop: &Rgba<u8>, source: &Rgba<u8>, mode: BlendMode) -> Rgba<u8> {
    let alpha_b = backdrop[3] as f64 / 255.0;
    let alpha_s = source[3] as f64 / 255.0;
    let alpha_o = alpha_s + alpha_b * (1.0 - alpha_s);

    if alpha_o <= 0.0 {
        return Rgba([0, 0, 0, 0]);
    }

    let mut out = [0u8; 4];
    for c in 0..3 {
        let cb = backdrop[c] as f64 / 255.0;
        let cs = source[c] as f64 / 255.0;
        let mixed = (1.0 - alpha_b) * cs + alpha_b * mode.blend_channel(cb, cs);
        let premultiplied = alpha_s * mixed + (1.0 - alpha_s) * alpha_b * cb;
        out[c] = (premultiplied / alpha_o * 255.0).round().clamp(0.0, 255.0) as u8;
    }
    out[3] = (alpha_o * 255.0).round().clamp(0.0, 255.0) as u8;

    Rgba(out)
}

/// Stack `overlay` over `base` with the screen blend
///
/// The overlay is resampled to the base's pixel extent so it covers the
/// whole canvas before any translation. Only the overlay's pixels are used:
/// its normalized resolution and physical height do not affect the result.
/// `base` is not modified.
pub fn compose(
    base: &NormalizedImage,
    overlay: &NormalizedImage,
    filter: ResampleFilter,
) -> Result<Composite> {
    let (width, height) = (base.width(), base.height());

    debug!(
        "Resampling overlay {}x{} -> {}x{}",
        overlay.width(),
        overlay.height(),
        width,
        height
    );
    let overlay_pixels = resize_exact(&overlay.pixels, width, height, filter)?;

    Ok(Composite {
        name: String::new(),
        base: Layer::new(BASE_LAYER_NAME, base.pixels.clone(), BlendMode::Normal),
        overlay: Layer::new(OVERLAY_LAYER_NAME, overlay_pixels, BlendMode::Screen),
        resolution_ppcm: base.density_ppcm(),
        icc_profile: base.icc_profile.clone(),
    })
}

/// Compose every overlay over `base`, one at a time, in input order
///
/// Each overlay is dropped before the next one is pulled from the
/// iterator, and the base is released once all composites exist. The first
/// error aborts the sequence.
pub fn compose_all<I>(
    base: NormalizedImage,
    overlays: I,
    filter: ResampleFilter,
) -> Result<Vec<Composite>>
where
    I: IntoIterator<Item = Result<NormalizedImage>>,
{
    let mut composites = Vec::new();

    for (index, overlay) in overlays.into_iter().enumerate() {
        let overlay = overlay?;
        let mut composite = compose(&base, &overlay, filter)?;
        composite.name = format!("overlay {}", index);
        info!(
            "Composed '{}' ({}x{})",
            composite.name,
            composite.dimensions().0,
            composite.dimensions().1
        );
        composites.push(composite);
    }

    Ok(composites)
}
