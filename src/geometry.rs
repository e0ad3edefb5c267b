use std::fmt;
use std::str::FromStr;

use nalgebra::Vector2;

use crate::error::{Error, Result};

pub const CM_PER_INCH: f64 = 2.54;

/// Resolution assumed for rasters that carry no density tag (72 ppi)
pub const DEFAULT_PPCM: f64 = 72.0 / CM_PER_INCH;

/// Translation of a layer in canvas pixels (dx, dy)
pub type Offset = Vector2<i32>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthUnit {
    Centimeter,
    Millimeter,
    Inch,
}

impl LengthUnit {
    fn cm_per_unit(self) -> f64 {
        match self {
            LengthUnit::Centimeter => 1.0,
            LengthUnit::Millimeter => 0.1,
            LengthUnit::Inch => CM_PER_INCH,
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            LengthUnit::Centimeter => "cm",
            LengthUnit::Millimeter => "mm",
            LengthUnit::Inch => "in",
        }
    }
}

/// A physical length tagged with its unit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Length {
    pub value: f64,
    pub unit: LengthUnit,
}

impl Length {
    pub fn new(value: f64, unit: LengthUnit) -> Self {
        Self { value, unit }
    }

    pub fn cm(value: f64) -> Self {
        Self::new(value, LengthUnit::Centimeter)
    }

    pub fn to_cm(&self) -> f64 {
        self.value * self.unit.cm_per_unit()
    }
}

impl fmt::Display for Length {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.value, self.unit.suffix())
    }
}

impl FromStr for Length {
    type Err = Error;

    /// Accepts "10.6", "10.6cm", "106mm" or "4in". Bare numbers are centimetres.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (number, unit) = if let Some(n) = s.strip_suffix("cm") {
            (n, LengthUnit::Centimeter)
        } else if let Some(n) = s.strip_suffix("mm") {
            (n, LengthUnit::Millimeter)
        } else if let Some(n) = s.strip_suffix("in") {
            (n, LengthUnit::Inch)
        } else {
            (s, LengthUnit::Centimeter)
        };

        let value: f64 = number
            .trim()
            .parse()
            .map_err(|_| Error::invalid_input(format!("Invalid length '{}'", s)))?;

        if !value.is_finite() || value <= 0.0 {
            return Err(Error::invalid_input(format!(
                "Length must be positive, got '{}'",
                s
            )));
        }

        Ok(Self::new(value, unit))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Landscape,
    Portrait,
}

impl Orientation {
    /// Square images count as landscape; only a taller-than-wide raster is rotated
    pub fn of(width: u32, height: u32) -> Self {
        if height > width {
            Orientation::Portrait
        } else {
            Orientation::Landscape
        }
    }
}

/// Ratio of a measured extent to the operator's reference length
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleFactor(f64);

impl ScaleFactor {
    pub fn new(measured: f64, reference_cm: f64) -> Result<Self> {
        if !reference_cm.is_finite() || reference_cm <= 0.0 {
            return Err(Error::invalid_input(format!(
                "Reference length must be positive, got {}",
                reference_cm
            )));
        }
        if !measured.is_finite() || measured <= 0.0 {
            return Err(Error::invalid_input(format!(
                "Measured extent must be positive, got {}",
                measured
            )));
        }

        let factor = measured / reference_cm;
        if !factor.is_finite() || factor <= 0.0 {
            return Err(Error::invalid_input(format!(
                "Scale factor {} / {} is not a positive finite number",
                measured, reference_cm
            )));
        }

        Ok(Self(factor))
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

/// Physical geometry of an image after scale normalization
///
/// `width_cm` is pinned to the reference length; `height_cm` and
/// `resolution_ppcm` follow from the scale factor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedGeometry {
    pub scale_factor: ScaleFactor,
    pub resolution_ppcm: f64,
    pub width_cm: f64,
    pub height_cm: f64,
}

impl NormalizedGeometry {
    /// Compute the normalized geometry of a landscape raster
    ///
    /// `width` and `height` are the measured extent: pixels for a fresh
    /// raster, centimetres for one that is already normalized.
    /// scale = width / reference, resolution *= scale, height /= scale,
    /// width = reference.
    pub fn compute(
        width: f64,
        height: f64,
        resolution_ppcm: f64,
        reference_cm: f64,
    ) -> Result<Self> {
        if !(width.is_finite() && height.is_finite() && width > 0.0 && height > 0.0) {
            return Err(Error::invalid_input(format!(
                "Image has no positive extent ({} x {})",
                width, height
            )));
        }
        if !resolution_ppcm.is_finite() || resolution_ppcm <= 0.0 {
            return Err(Error::invalid_input(format!(
                "Resolution must be positive, got {} ppcm",
                resolution_ppcm
            )));
        }

        let scale_factor = ScaleFactor::new(width, reference_cm)?;
        let factor = scale_factor.value();

        Ok(Self {
            scale_factor,
            resolution_ppcm: resolution_ppcm * factor,
            width_cm: reference_cm,
            height_cm: height / factor,
        })
    }

    /// Recover the measured height from the normalized one
    pub fn original_height(&self) -> f64 {
        self.height_cm * self.scale_factor.value()
    }
}
