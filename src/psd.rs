//! Minimal writer for layered Photoshop documents (PSD version 1).
//!
//! Writes 8-bit RGB with a transparency channel per layer, uncompressed
//! channel data, a resolution resource and an optional ICC profile. The
//! merged image section carries the flattened result including alpha.
use std::io::{self, Write};

use image::RgbaImage;
use tracing::warn;

use crate::geometry::CM_PER_INCH;

const SIGNATURE: &[u8; 4] = b"8BPS";
const RESOURCE_SIGNATURE: &[u8; 4] = b"8BIM";
const VERSION: u16 = 1;
const DEPTH: u16 = 8;
const COLOR_MODE_RGB: u16 = 3;
const COMPRESSION_RAW: u16 = 0;

const RESOURCE_RESOLUTION_INFO: u16 = 0x03ED;
const RESOURCE_ICC_PROFILE: u16 = 0x040F;

const RES_UNIT_PPI: u16 = 1;
const SIZE_UNIT_CM: u16 = 2;

/// Largest width/height a version 1 document may have
pub const MAX_PSD_DIMENSION: u32 = 30_000;

/// Channel ids in write order: transparency first, then R, G, B
const LAYER_CHANNELS: [(i16, usize); 4] = [(-1, 3), (0, 0), (1, 1), (2, 2)];

pub struct PsdLayer<'a> {
    pub name: &'a str,
    pub pixels: &'a RgbaImage,
    pub left: i32,
    pub top: i32,
    pub blend_key: &'a [u8; 4],
    pub opacity: u8,
}

pub struct PsdDocument<'a> {
    pub width: u32,
    pub height: u32,
    pub resolution_ppcm: f64,
    pub icc_profile: Option<&'a [u8]>,
    /// Bottom-most layer first
    pub layers: Vec<PsdLayer<'a>>,
    /// Flattened canvas, stored as the document's composite image
    pub merged: &'a RgbaImage,
}

fn invalid(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, msg)
}

fn put_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn put_i16(buf: &mut Vec<u8>, v: i16) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn put_i32(buf: &mut Vec<u8>, v: i32) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn section_len(len: usize) -> io::Result<u32> {
    u32::try_from(len).map_err(|_| invalid(format!("section of {} bytes is too large", len)))
}

/// Pascal string padded so that length byte plus text is a multiple of `align`
fn put_pascal_string(buf: &mut Vec<u8>, text: &str, align: usize) {
    let bytes: Vec<u8> = text
        .bytes()
        .map(|b| if b.is_ascii() { b } else { b'?' })
        .take(255)
        .collect();
    buf.push(bytes.len() as u8);
    buf.extend_from_slice(&bytes);
    let written = 1 + bytes.len();
    let padded = written.div_ceil(align) * align;
    buf.resize(buf.len() + padded - written, 0);
}

/// 16.16 fixed-point pixels per inch
fn fixed_ppi(resolution_ppcm: f64) -> u32 {
    let ppi = resolution_ppcm * CM_PER_INCH;
    let max = u16::MAX as f64;
    let clamped = if !ppi.is_finite() || ppi < 1.0 {
        warn!("Resolution {:.3} ppi out of range, storing 1 ppi", ppi);
        1.0
    } else if ppi > max {
        warn!("Resolution {:.3} ppi out of range, storing {} ppi", ppi, max);
        max
    } else {
        ppi
    };
    (clamped * 65536.0).round().min(u32::MAX as f64) as u32
}

fn resource_block(buf: &mut Vec<u8>, id: u16, data: &[u8]) -> io::Result<()> {
    buf.extend_from_slice(RESOURCE_SIGNATURE);
    put_u16(buf, id);
    // Empty name, padded to even length
    buf.extend_from_slice(&[0, 0]);
    put_u32(buf, section_len(data.len())?);
    buf.extend_from_slice(data);
    if data.len() % 2 == 1 {
        buf.push(0);
    }
    Ok(())
}

fn image_resources(doc: &PsdDocument<'_>) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();

    let fixed = fixed_ppi(doc.resolution_ppcm);
    let mut resolution = Vec::with_capacity(16);
    put_u32(&mut resolution, fixed);
    put_u16(&mut resolution, RES_UNIT_PPI);
    put_u16(&mut resolution, SIZE_UNIT_CM);
    put_u32(&mut resolution, fixed);
    put_u16(&mut resolution, RES_UNIT_PPI);
    put_u16(&mut resolution, SIZE_UNIT_CM);
    resource_block(&mut buf, RESOURCE_RESOLUTION_INFO, &resolution)?;

    if let Some(profile) = doc.icc_profile {
        resource_block(&mut buf, RESOURCE_ICC_PROFILE, profile)?;
    }

    Ok(buf)
}

fn channel_plane(pixels: &RgbaImage, channel: usize) -> impl Iterator<Item = u8> + '_ {
    pixels.pixels().map(move |p| p[channel])
}

fn layer_info(doc: &PsdDocument<'_>) -> io::Result<Vec<u8>> {
    let mut records = Vec::new();
    let mut channel_data = Vec::new();

    for layer in &doc.layers {
        let (width, height) = layer.pixels.dimensions();
        let plane_len = width as usize * height as usize;

        put_i32(&mut records, layer.top);
        put_i32(&mut records, layer.left);
        put_i32(&mut records, layer.top.saturating_add(height as i32));
        put_i32(&mut records, layer.left.saturating_add(width as i32));

        put_u16(&mut records, LAYER_CHANNELS.len() as u16);
        for (id, channel) in LAYER_CHANNELS {
            put_i16(&mut records, id);
            put_u32(&mut records, section_len(2 + plane_len)?);

            put_u16(&mut channel_data, COMPRESSION_RAW);
            channel_data.extend(channel_plane(layer.pixels, channel));
        }

        records.extend_from_slice(RESOURCE_SIGNATURE);
        records.extend_from_slice(layer.blend_key);
        records.push(layer.opacity);
        records.push(0); // clipping: base
        records.push(0); // flags: visible
        records.push(0); // filler

        let mut extra = Vec::new();
        put_u32(&mut extra, 0); // no layer mask
        put_u32(&mut extra, 0); // no blending ranges
        put_pascal_string(&mut extra, layer.name, 4);
        put_u32(&mut records, section_len(extra.len())?);
        records.extend_from_slice(&extra);
    }

    let mut info = Vec::with_capacity(2 + records.len() + channel_data.len());
    // Negative count: the merged image's first extra channel is its transparency
    put_i16(&mut info, -(doc.layers.len() as i16));
    info.extend_from_slice(&records);
    info.extend_from_slice(&channel_data);
    if info.len() % 2 == 1 {
        info.push(0);
    }
    Ok(info)
}

/// Serialize `doc` as a PSD file
pub fn write_psd<W: Write + ?Sized>(writer: &mut W, doc: &PsdDocument<'_>) -> io::Result<()> {
    if doc.width == 0 || doc.height == 0 {
        return Err(invalid(format!(
            "document has zero extent ({}x{})",
            doc.width, doc.height
        )));
    }
    if doc.width > MAX_PSD_DIMENSION || doc.height > MAX_PSD_DIMENSION {
        return Err(invalid(format!(
            "document {}x{} exceeds {} px per side",
            doc.width, doc.height, MAX_PSD_DIMENSION
        )));
    }
    if doc.merged.dimensions() != (doc.width, doc.height) {
        return Err(invalid(format!(
            "merged image is {:?}, document is {}x{}",
            doc.merged.dimensions(),
            doc.width,
            doc.height
        )));
    }
    if doc.layers.len() > i16::MAX as usize {
        return Err(invalid(format!("too many layers: {}", doc.layers.len())));
    }

    let mut out = Vec::new();

    // File header
    out.extend_from_slice(SIGNATURE);
    put_u16(&mut out, VERSION);
    out.extend_from_slice(&[0; 6]);
    put_u16(&mut out, 4);
    put_u32(&mut out, doc.height);
    put_u32(&mut out, doc.width);
    put_u16(&mut out, DEPTH);
    put_u16(&mut out, COLOR_MODE_RGB);

    // Color mode data (none for RGB)
    put_u32(&mut out, 0);

    let resources = image_resources(doc)?;
    put_u32(&mut out, section_len(resources.len())?);
    out.extend_from_slice(&resources);

    let info = layer_info(doc)?;
    // Layer info + empty global layer mask info
    put_u32(&mut out, section_len(4 + info.len() + 4)?);
    put_u32(&mut out, section_len(info.len())?);
    out.extend_from_slice(&info);
    put_u32(&mut out, 0);

    // Merged image data, planar R, G, B, A
    put_u16(&mut out, COMPRESSION_RAW);
    for channel in 0..4 {
        out.extend(channel_plane(doc.merged, channel));
    }

    writer.write_all(&out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    struct Cursor<'a> {
        data: &'a [u8],
        pos: usize,
    }

    impl<'a> Cursor<'a> {
        fn take(&mut self, n: usize) -> &'a [u8] {
            let slice = &self.data[self.pos..self.pos + n];
            self.pos += n;
            slice
        }

        fn u16(&mut self) -> u16 {
            u16::from_be_bytes(self.take(2).try_into().unwrap())
        }

        fn i16(&mut self) -> i16 {
            i16::from_be_bytes(self.take(2).try_into().unwrap())
        }

        fn u32(&mut self) -> u32 {
            u32::from_be_bytes(self.take(4).try_into().unwrap())
        }

        fn i32(&mut self) -> i32 {
            i32::from_be_bytes(self.take(4).try_into().unwrap())
        }
    }

    fn sample_doc<'a>(base: &'a RgbaImage, top: &'a RgbaImage, merged: &'a RgbaImage) -> PsdDocument<'a> {
        PsdDocument {
            width: 3,
            height: 2,
            resolution_ppcm: 28.0,
            icc_profile: Some(&b"icc"[..]),
            layers: vec![
                PsdLayer {
                    name: "CT",
                    pixels: base,
                    left: 0,
                    top: 0,
                    blend_key: b"norm",
                    opacity: 255,
                },
                PsdLayer {
                    name: "MPI",
                    pixels: top,
                    left: -1,
                    top: 4,
                    blend_key: b"scrn",
                    opacity: 255,
                },
            ],
            merged,
        }
    }

    #[test]
    fn test_document_structure() {
        let base = RgbaImage::from_pixel(3, 2, Rgba([10, 20, 30, 255]));
        let top = RgbaImage::from_pixel(3, 2, Rgba([200, 0, 0, 128]));
        let merged = RgbaImage::from_pixel(3, 2, Rgba([1, 2, 3, 4]));
        let doc = sample_doc(&base, &top, &merged);

        let mut bytes = Vec::new();
        write_psd(&mut bytes, &doc).unwrap();
        let mut c = Cursor { data: &bytes, pos: 0 };

        assert_eq!(c.take(4), b"8BPS");
        assert_eq!(c.u16(), 1);
        c.take(6);
        assert_eq!(c.u16(), 4);
        assert_eq!(c.u32(), 2);
        assert_eq!(c.u32(), 3);
        assert_eq!(c.u16(), 8);
        assert_eq!(c.u16(), 3);
        assert_eq!(c.u32(), 0);

        let resources_len = c.u32() as usize;
        let resources_end = c.pos + resources_len;
        assert_eq!(c.take(4), b"8BIM");
        assert_eq!(c.u16(), 0x03ED);
        c.take(2);
        assert_eq!(c.u32(), 16);
        assert_eq!(c.u32(), (28.0 * 2.54 * 65536.0_f64).round() as u32);
        c.take(12);
        assert_eq!(c.take(4), b"8BIM");
        assert_eq!(c.u16(), 0x040F);
        c.take(2);
        assert_eq!(c.u32(), 3);
        assert_eq!(c.take(4), b"icc\0");
        assert_eq!(c.pos, resources_end);

        let layer_mask_len = c.u32() as usize;
        let layer_mask_end = c.pos + layer_mask_len;
        let _layer_info_len = c.u32();
        assert_eq!(c.i16(), -2);

        // Base layer record
        assert_eq!((c.i32(), c.i32(), c.i32(), c.i32()), (0, 0, 2, 3));
        assert_eq!(c.u16(), 4);
        for expected in [-1, 0, 1, 2] {
            assert_eq!(c.i16(), expected);
            assert_eq!(c.u32(), 2 + 6);
        }
        assert_eq!(c.take(4), b"8BIM");
        assert_eq!(c.take(4), b"norm");
        assert_eq!(c.take(4), &[255, 0, 0, 0]);
        assert_eq!(c.u32(), 12);
        c.take(8);
        assert_eq!(c.take(4), &[2, b'C', b'T', 0]);

        // Overlay layer record, offset and unclipped
        assert_eq!((c.i32(), c.i32(), c.i32(), c.i32()), (4, -1, 6, 2));
        assert_eq!(c.u16(), 4);
        c.take(4 * 6);
        assert_eq!(c.take(4), b"8BIM");
        assert_eq!(c.take(4), b"scrn");
        c.take(4);
        assert_eq!(c.u32(), 12);
        c.take(8);
        assert_eq!(c.take(4), &[3, b'M', b'P', b'I']);

        // Base channel data: alpha plane first
        assert_eq!(c.u16(), 0);
        assert_eq!(c.take(6), &[255; 6]);
        assert_eq!(c.u16(), 0);
        assert_eq!(c.take(6), &[10; 6]);

        c.pos = layer_mask_end;
        assert_eq!(c.u16(), 0);
        assert_eq!(c.take(6), &[1; 6]);
        assert_eq!(c.take(6), &[2; 6]);
        assert_eq!(c.take(6), &[3; 6]);
        assert_eq!(c.take(6), &[4; 6]);
        assert_eq!(c.pos, bytes.len());
    }

    #[test]
    fn test_rejects_mismatched_merged_image() {
        let base = RgbaImage::new(3, 2);
        let merged = RgbaImage::new(4, 4);
        let doc = sample_doc(&base, &base, &merged);
        let err = write_psd(&mut Vec::new(), &doc).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_writes_through_trait_object() {
        let base = RgbaImage::from_pixel(3, 2, Rgba([10, 20, 30, 255]));
        let merged = base.clone();
        let doc = sample_doc(&base, &base, &merged);

        let mut direct = Vec::new();
        write_psd(&mut direct, &doc).unwrap();

        let mut bytes = Vec::new();
        let writer: &mut dyn Write = &mut bytes;
        write_psd(writer, &doc).unwrap();
        assert_eq!(bytes, direct);
    }

    #[test]
    fn test_pascal_string_padding() {
        let mut buf = Vec::new();
        put_pascal_string(&mut buf, "", 4);
        assert_eq!(buf, vec![0, 0, 0, 0]);

        let mut buf = Vec::new();
        put_pascal_string(&mut buf, "abcd", 4);
        assert_eq!(buf.len(), 8);
        assert_eq!(buf[0], 4);
    }
}
