//! Image normalisation: decode whatever the asset host serves, write TIFF.
//!
//! ## Why spawn_blocking?
//!
//! Archive scans are routinely 100+ megapixels. Decoding and re-encoding
//! them is pure CPU work that would stall the Tokio worker threads and with
//! them every other download in flight, so [`to_tiff`] and [`store_pdf`] move
//! the work onto the blocking pool.
//!
//! HEIF/HEIC needs libheif and is only decoded when the crate is built with
//! the `heif` feature; otherwise such assets fail with
//! [`ItemError::UnsupportedFormat`].

use crate::atomic::{self, Persisted, Placement};
use crate::error::ItemError;
use image::{DynamicImage, ImageError, ImageFormat, ImageReader, Limits};
use std::io::{BufWriter, Cursor, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Decoder allocation cap. Large enough for 600 dpi A0 scans.
const MAX_DECODE_ALLOC: u64 = 4 * 1024 * 1024 * 1024;

/// Decode `bytes` and write them to `target` as TIFF, create-exclusive.
pub async fn to_tiff(bytes: Vec<u8>, target: PathBuf) -> Result<Persisted, ItemError> {
    tokio::task::spawn_blocking(move || to_tiff_blocking(&bytes, &target))
        .await
        .map_err(|e| ItemError::Undecodable {
            detail: format!("conversion task panicked: {e}"),
        })?
}

/// Write a downloaded PDF to `target` unchanged, create-exclusive.
pub async fn store_pdf(bytes: Vec<u8>, target: PathBuf) -> Result<Persisted, ItemError> {
    let shown = target.display().to_string();
    tokio::task::spawn_blocking(move || {
        atomic::write_bytes(&target, &bytes, Placement::NoClobber).map_err(|e| write_error(&target, e))
    })
    .await
    .map_err(|e| ItemError::Write {
        path: shown,
        detail: format!("write task panicked: {e}"),
    })?
}

fn to_tiff_blocking(bytes: &[u8], target: &Path) -> Result<Persisted, ItemError> {
    let img = decode(bytes)?;
    debug!(
        "Decoded {}x{} {:?} for {}",
        img.width(),
        img.height(),
        img.color(),
        target.display()
    );
    let img = normalize_for_tiff(img);

    let mut tmp = atomic::temp_for(target).map_err(|e| write_error(target, e))?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        img.write_to(&mut writer, ImageFormat::Tiff)
            .map_err(|e| ItemError::Write {
                path: target.display().to_string(),
                detail: format!("TIFF encoding failed: {e}"),
            })?;
        writer.flush().map_err(|e| write_error(target, e))?;
    }
    atomic::persist(tmp, target, Placement::NoClobber).map_err(|e| write_error(target, e))
}

/// Decode with format sniffing; HEIF goes to libheif.
pub fn decode(bytes: &[u8]) -> Result<DynamicImage, ItemError> {
    if is_heif(bytes) {
        return decode_heif(bytes);
    }

    let mut reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| ItemError::Undecodable {
            detail: e.to_string(),
        })?;
    if reader.format().is_none() {
        return Err(ItemError::UnsupportedFormat {
            detail: "unrecognised file signature".into(),
        });
    }

    let mut limits = Limits::default();
    limits.max_alloc = Some(MAX_DECODE_ALLOC);
    reader.limits(limits);

    reader.decode().map_err(|e| match e {
        ImageError::Unsupported(u) => ItemError::UnsupportedFormat {
            detail: u.to_string(),
        },
        other => ItemError::Undecodable {
            detail: other.to_string(),
        },
    })
}

/// ISO BMFF `ftyp` box with a HEIF brand.
fn is_heif(bytes: &[u8]) -> bool {
    const BRANDS: [&[u8; 4]; 8] = [
        b"heic", b"heix", b"hevc", b"hevx", b"heim", b"heis", b"mif1", b"msf1",
    ];
    bytes.len() >= 12 && &bytes[4..8] == b"ftyp" && BRANDS.iter().any(|b| &bytes[8..12] == *b)
}

#[cfg(feature = "heif")]
fn decode_heif(bytes: &[u8]) -> Result<DynamicImage, ItemError> {
    use libheif_rs::{ColorSpace, HeifContext, LibHeif, RgbChroma};

    let undecodable = |e: libheif_rs::HeifError| ItemError::Undecodable {
        detail: format!("HEIF: {e}"),
    };

    let lib = LibHeif::new();
    let ctx = HeifContext::read_from_bytes(bytes).map_err(undecodable)?;
    let handle = ctx.primary_image_handle().map_err(undecodable)?;
    let image = lib
        .decode(&handle, ColorSpace::Rgb(RgbChroma::Rgb), None)
        .map_err(undecodable)?;

    let planes = image.planes();
    let plane = planes.interleaved.ok_or_else(|| ItemError::Undecodable {
        detail: "HEIF: no interleaved RGB plane".into(),
    })?;

    let (width, height) = (plane.width, plane.height);
    let row_len = width as usize * 3;
    let mut pixels = Vec::with_capacity(row_len * height as usize);
    for row in plane.data.chunks(plane.stride).take(height as usize) {
        pixels.extend_from_slice(&row[..row_len]);
    }

    image::RgbImage::from_raw(width, height, pixels)
        .map(DynamicImage::ImageRgb8)
        .ok_or_else(|| ItemError::Undecodable {
            detail: "HEIF: plane size does not match dimensions".into(),
        })
}

#[cfg(not(feature = "heif"))]
fn decode_heif(_bytes: &[u8]) -> Result<DynamicImage, ItemError> {
    Err(ItemError::UnsupportedFormat {
        detail: "HEIF/HEIC (build with the `heif` feature)".into(),
    })
}

/// Map colour types the TIFF encoder rejects onto ones it accepts.
fn normalize_for_tiff(img: DynamicImage) -> DynamicImage {
    match img {
        DynamicImage::ImageLuma8(_)
        | DynamicImage::ImageLuma16(_)
        | DynamicImage::ImageRgb8(_)
        | DynamicImage::ImageRgba8(_)
        | DynamicImage::ImageRgb16(_)
        | DynamicImage::ImageRgba16(_) => img,
        DynamicImage::ImageLumaA8(_) => DynamicImage::ImageRgba8(img.to_rgba8()),
        DynamicImage::ImageLumaA16(_) => DynamicImage::ImageRgba16(img.to_rgba16()),
        DynamicImage::ImageRgb32F(_) => DynamicImage::ImageRgb16(img.to_rgb16()),
        _ => DynamicImage::ImageRgba16(img.to_rgba16()),
    }
}

fn write_error(path: &Path, e: std::io::Error) -> ItemError {
    ItemError::Write {
        path: path.display().to_string(),
        detail: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayAlphaImage, GrayImage, Luma, LumaA, Rgb, RgbImage};

    fn encoded(img: &DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), format).unwrap();
        buf
    }

    #[test]
    fn png_becomes_tiff() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("cms-1.tif");
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 4, Rgb([10, 20, 30])));

        let r = to_tiff_blocking(&encoded(&img, ImageFormat::Png), &target).unwrap();
        assert_eq!(r, Persisted::Written);

        let back = image::open(&target).unwrap();
        assert_eq!((back.width(), back.height()), (8, 4));
        assert_eq!(
            image::guess_format(&std::fs::read(&target).unwrap()).unwrap(),
            ImageFormat::Tiff
        );
    }

    #[test]
    fn grayscale_png_stays_grayscale() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("cms-5.tif");
        let img = DynamicImage::ImageLuma8(GrayImage::from_fn(5, 3, |x, _| Luma([(x * 50) as u8])));

        let r = to_tiff_blocking(&encoded(&img, ImageFormat::Png), &target).unwrap();
        assert_eq!(r, Persisted::Written);

        let back = image::open(&target).unwrap();
        assert!(matches!(back, DynamicImage::ImageLuma8(_)));
        assert_eq!((back.width(), back.height()), (5, 3));
        assert_eq!(back.to_luma8().get_pixel(4, 0), &Luma([200]));
    }

    #[test]
    fn gray_alpha_is_widened() {
        let img = DynamicImage::ImageLumaA8(GrayAlphaImage::from_pixel(2, 2, LumaA([7, 255])));
        assert!(matches!(normalize_for_tiff(img), DynamicImage::ImageRgba8(_)));
    }

    #[test]
    fn existing_target_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("cms-2.tif");
        std::fs::write(&target, b"winner").unwrap();
        let img = DynamicImage::ImageRgb8(RgbImage::new(1, 1));

        let r = to_tiff_blocking(&encoded(&img, ImageFormat::Jpeg), &target).unwrap();
        assert_eq!(r, Persisted::AlreadyExists);
        assert_eq!(std::fs::read(&target).unwrap(), b"winner");
    }

    #[test]
    fn garbage_is_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("cms-3.tif");
        let err = to_tiff_blocking(b"<html>rate limited</html>", &target).unwrap_err();
        assert!(matches!(err, ItemError::UnsupportedFormat { .. }));
        assert!(!target.exists());
    }

    #[test]
    fn truncated_png_is_undecodable() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(64, 64));
        let mut bytes = encoded(&img, ImageFormat::Png);
        bytes.truncate(bytes.len() / 2);
        assert!(matches!(decode(&bytes), Err(ItemError::Undecodable { .. })));
    }

    #[test]
    fn heif_signature() {
        let mut head = vec![0, 0, 0, 24];
        head.extend_from_slice(b"ftypheic");
        head.extend_from_slice(&[0; 8]);
        assert!(is_heif(&head));
        assert!(!is_heif(b"\x89PNG\r\n\x1a\n0000"));
    }

    #[cfg(not(feature = "heif"))]
    #[test]
    fn heif_without_feature_is_unsupported() {
        let mut head = vec![0, 0, 0, 24];
        head.extend_from_slice(b"ftypmif1");
        head.extend_from_slice(&[0; 8]);
        assert!(matches!(decode(&head), Err(ItemError::UnsupportedFormat { .. })));
    }

    #[tokio::test]
    async fn pdf_is_stored_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("cms-4.pdf");
        let r = store_pdf(b"%PDF-1.4 body".to_vec(), target.clone()).await.unwrap();
        assert_eq!(r, Persisted::Written);
        assert_eq!(std::fs::read(&target).unwrap(), b"%PDF-1.4 body");
    }
}
