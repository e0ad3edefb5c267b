use clap::ValueEnum;
use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};

use crate::error::{Error, Result};
use crate::psd::MAX_PSD_DIMENSION;

/// Resampling kernel (no nearest-neighbour)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ResampleFilter {
    /// Catmull-Rom on premultiplied alpha
    #[default]
    Bicubic,
    /// Bilinear on premultiplied alpha
    Bilinear,
    /// Lanczos3 (image::imageops)
    Lanczos3,
}

/// Premultiply alpha: RGB values are multiplied by alpha
fn premultiply_alpha(img: &RgbaImage) -> Vec<[f64; 4]> {
    img.pixels()
        .map(|pixel| {
            let alpha = pixel[3] as f64 / 255.0;
            [
                pixel[0] as f64 * alpha,
                pixel[1] as f64 * alpha,
                pixel[2] as f64 * alpha,
                pixel[3] as f64,
            ]
        })
        .collect()
}

/// Unpremultiply alpha: divide RGB by alpha
fn unpremultiply_alpha(premultiplied: [f64; 4]) -> Rgba<u8> {
    let alpha = premultiplied[3];
    if alpha < 1.0 {
        return Rgba([0, 0, 0, 0]);
    }

    let alpha_norm = alpha.min(255.0) / 255.0;
    let r = (premultiplied[0] / alpha_norm).round().clamp(0.0, 255.0) as u8;
    let g = (premultiplied[1] / alpha_norm).round().clamp(0.0, 255.0) as u8;
    let b = (premultiplied[2] / alpha_norm).round().clamp(0.0, 255.0) as u8;
    let a = alpha.round().clamp(0.0, 255.0) as u8;

    Rgba([r, g, b, a])
}

/// Cubic interpolation kernel (Catmull-Rom)
fn cubic_weight(t: f64) -> [f64; 4] {
    let t2 = t * t;
    let t3 = t2 * t;

    [
        -0.5 * t3 + t2 - 0.5 * t,
        1.5 * t3 - 2.5 * t2 + 1.0,
        -1.5 * t3 + 2.0 * t2 + 0.5 * t,
        0.5 * t3 - 0.5 * t2,
    ]
}

fn bicubic_interpolate(
    premultiplied: &[[f64; 4]],
    width: u32,
    height: u32,
    x: f64,
    y: f64,
) -> [f64; 4] {
    let x_floor = x.floor() as i64;
    let y_floor = y.floor() as i64;

    let wx = cubic_weight(x - x.floor());
    let wy = cubic_weight(y - y.floor());

    let mut result = [0.0; 4];

    for (j, weight_y) in wy.iter().enumerate() {
        let py = (y_floor + j as i64 - 1).clamp(0, height as i64 - 1) as u64;
        for (i, weight_x) in wx.iter().enumerate() {
            let px = (x_floor + i as i64 - 1).clamp(0, width as i64 - 1) as u64;
            let idx = (py * width as u64 + px) as usize;

            let weight = weight_x * weight_y;
            for c in 0..4 {
                result[c] += premultiplied[idx][c] * weight;
            }
        }
    }

    result
}

fn bilinear_interpolate(
    premultiplied: &[[f64; 4]],
    width: u32,
    height: u32,
    x: f64,
    y: f64,
) -> [f64; 4] {
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;

    let x_frac = x - x.floor();
    let y_frac = y - y.floor();

    let get_pixel = |px: i64, py: i64| -> [f64; 4] {
        let px = px.clamp(0, width as i64 - 1) as u64;
        let py = py.clamp(0, height as i64 - 1) as u64;
        premultiplied[(py * width as u64 + px) as usize]
    };

    let p00 = get_pixel(x0, y0);
    let p10 = get_pixel(x0 + 1, y0);
    let p01 = get_pixel(x0, y0 + 1);
    let p11 = get_pixel(x0 + 1, y0 + 1);

    let mut result = [0.0; 4];
    for c in 0..4 {
        let top = p00[c] * (1.0 - x_frac) + p10[c] * x_frac;
        let bottom = p01[c] * (1.0 - x_frac) + p11[c] * x_frac;
        result[c] = top * (1.0 - y_frac) + bottom * y_frac;
    }

    result
}

fn check_target(width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(Error::Resample {
            width,
            height,
            reason: "degenerate target extent",
        });
    }
    if width > MAX_PSD_DIMENSION || height > MAX_PSD_DIMENSION {
        return Err(Error::Resample {
            width,
            height,
            reason: "target exceeds 30000 px per side",
        });
    }
    Ok(())
}

/// Resample an image to exactly `new_width` x `new_height`
///
/// Aspect ratio is not preserved; callers decide the target extent.
pub fn resize_exact(
    img: &RgbaImage,
    new_width: u32,
    new_height: u32,
    filter: ResampleFilter,
) -> Result<RgbaImage> {
    check_target(new_width, new_height)?;

    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return Err(Error::Resample {
            width: new_width,
            height: new_height,
            reason: "source image is empty",
        });
    }

    if (width, height) == (new_width, new_height) {
        return Ok(img.clone());
    }

    let interpolate: fn(&[[f64; 4]], u32, u32, f64, f64) -> [f64; 4] = match filter {
        ResampleFilter::Lanczos3 => {
            return Ok(imageops::resize(
                img,
                new_width,
                new_height,
                FilterType::Lanczos3,
            ));
        }
        ResampleFilter::Bicubic => bicubic_interpolate,
        ResampleFilter::Bilinear => bilinear_interpolate,
    };

    let scale_x = new_width as f64 / width as f64;
    let scale_y = new_height as f64 / height as f64;

    // Premultiply alpha for correct interpolation
    let premultiplied = premultiply_alpha(img);

    let mut output = RgbaImage::new(new_width, new_height);

    for (out_x, out_y, pixel) in output.enumerate_pixels_mut() {
        // Map output pixel centres to source coordinates
        let src_x = (out_x as f64 + 0.5) / scale_x - 0.5;
        let src_y = (out_y as f64 + 0.5) / scale_y - 0.5;

        *pixel = unpremultiply_alpha(interpolate(&premultiplied, width, height, src_x, src_y));
    }

    Ok(output)
}

/// Rotate 90 degrees clockwise so a portrait raster becomes landscape
pub fn rotate_clockwise(img: &RgbaImage) -> RgbaImage {
    imageops::rotate90(img)
}
