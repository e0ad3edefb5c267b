use std::fs;
use std::path::Path;

use image::{Rgba, RgbaImage};

use coreg::{
    compose_all, export, normalize, Error, Length, Offset, OutputTarget, PngSink, PsdSink,
    RasterImage, ResampleFilter,
};

fn write_png(path: &Path, width: u32, height: u32, color: Rgba<u8>) {
    RgbaImage::from_pixel(width, height, color).save(path).unwrap();
}

#[test]
fn test_ct_mpi_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let ct_path = dir.path().join("ct.png");
    let mpi_paths = [dir.path().join("mpi-a.png"), dir.path().join("mpi-b.png")];

    // Portrait CT gets rotated; MPI scans are small and landscape
    write_png(&ct_path, 48, 64, Rgba([60, 60, 60, 255]));
    write_png(&mpi_paths[0], 16, 12, Rgba([0, 0, 0, 255]));
    write_png(&mpi_paths[1], 12, 16, Rgba([200, 0, 0, 255]));

    let ct = RasterImage::open(&ct_path, 28.0).unwrap();
    let base = normalize(ct, Length::cm(16.0)).unwrap();
    assert!(base.rotated);
    assert_eq!((base.width(), base.height()), (64, 48));
    assert_eq!(base.geometry.scale_factor.value(), 4.0);
    assert_eq!(base.resolution_ppcm(), 112.0);
    assert_eq!(base.geometry.height_cm, 12.0);
    assert_eq!(base.density_ppcm(), 4.0);

    let overlays = mpi_paths.iter().map(|path| -> coreg::Result<coreg::NormalizedImage> {
        let raster = RasterImage::open(path, 10.0)?;
        normalize(raster, "106mm".parse::<Length>()?)
    });
    let mut composites = compose_all(base, overlays, ResampleFilter::Bicubic).unwrap();
    assert_eq!(composites.len(), 2);
    for composite in &composites {
        assert_eq!(composite.dimensions(), (64, 48));
        assert_eq!(composite.resolution_ppcm, 4.0);
    }

    // Operator places the MPI layer on the first composite
    composites[0].translate_overlay(Offset::new(5, 10)).unwrap();
    let reference_offset = composites[0].overlay_offset();

    let psd_dir = dir.path().join("out").join("psd");
    let png_dir = dir.path().join("out").join("png");
    let exported = export(
        &mut composites,
        reference_offset,
        &OutputTarget::new(&psd_dir, &PsdSink),
        &OutputTarget::new(&png_dir, &PngSink),
    )
    .unwrap();

    assert_eq!(exported.len(), 2);
    assert_eq!(composites[1].overlay_offset(), Offset::new(5, 10));
    assert!(psd_dir.join("overlayed-image-1.psd").is_file());

    // Red MPI screened over grey CT only where the translated layer lands
    let flat = image::open(png_dir.join("overlayed-image-1.png"))
        .unwrap()
        .to_rgba8();
    assert_eq!(flat.dimensions(), (64, 48));
    assert_eq!(flat.get_pixel(0, 0), &Rgba([60, 60, 60, 255]));
    let covered = flat.get_pixel(20, 20);
    assert!(covered[0] > 200);
    assert_eq!(covered[1], 60);

    let psd = fs::read(psd_dir.join("overlayed-image-0.psd")).unwrap();
    assert_eq!(&psd[..4], b"8BPS");

    // The stored resolution makes the 64 px canvas span the 16 cm reference
    assert_eq!(&psd[34..38], b"8BIM");
    assert_eq!(u16::from_be_bytes([psd[38], psd[39]]), 0x03ED);
    let fixed_ppi = u32::from_be_bytes(psd[46..50].try_into().unwrap());
    let ppcm = fixed_ppi as f64 / 65536.0 / 2.54;
    assert!((64.0 / ppcm - 16.0).abs() < 1e-3);
}

#[test]
fn test_missing_input_is_decode_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = RasterImage::open(&dir.path().join("absent.png"), 28.0);
    assert!(matches!(result, Err(Error::Decode { .. })));
}

#[test]
fn test_reference_length_must_be_positive() {
    let raster = RasterImage::new(RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 255])), 28.0);
    let result = normalize(raster, Length::cm(-1.0));
    assert!(matches!(result, Err(Error::InvalidInput(_))));
}
