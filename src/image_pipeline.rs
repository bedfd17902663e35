//! Grayscale derivatives of cached images for black-and-white requests.

use std::fs;
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat};
use log::debug;
use zune_core::{colorspace::ColorSpace, options::DecoderOptions};
use zune_jpeg::JpegDecoder;

use crate::error::MediaError;

/// Subdirectory of a cache entry holding derived files. Entry listings skip it.
pub const DERIVED_DIR: &str = "derived";

fn save_png_atomic(image: &DynamicImage, temp_path: &Path, target_path: &Path) -> Option<()> {
    if temp_path.exists() {
        let _ = fs::remove_file(temp_path);
    }
    if image.save_with_format(temp_path, ImageFormat::Png).is_err() {
        let _ = fs::remove_file(temp_path);
        return None;
    }
    fs::rename(temp_path, target_path).ok()?;
    Some(())
}

fn looks_like_jpeg(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0xff && bytes[1] == 0xd8
}

fn decode_jpeg_non_strict(bytes: &[u8]) -> Option<DynamicImage> {
    if !looks_like_jpeg(bytes) {
        return None;
    }

    let options = DecoderOptions::new_cmd()
        .set_strict_mode(false)
        .jpeg_set_out_colorspace(ColorSpace::RGBA);
    let mut decoder = JpegDecoder::new_with_options(bytes, options);
    let pixels = decoder.decode().ok()?;
    let (width, height) = decoder.dimensions()?;
    let image = image::RgbaImage::from_raw(width as u32, height as u32, pixels)?;
    Some(DynamicImage::ImageRgba8(image))
}

fn decode_image_from_path_with_fallback(path: &Path) -> Option<DynamicImage> {
    image::open(path).ok().or_else(|| {
        // Catalog JPEGs are occasionally truncated; the lenient decoder still
        // recovers most of them.
        let bytes = fs::read(path).ok()?;
        decode_jpeg_non_strict(&bytes)
    })
}

/// `{entry}/derived/{stem}.bw.png` for a cached source image.
pub fn grayscale_path_for(source: &Path) -> Option<PathBuf> {
    let stem = source.file_stem()?.to_str()?;
    let parent = source.parent()?;
    Some(parent.join(DERIVED_DIR).join(format!("{stem}.bw.png")))
}

/// Returns a grayscale PNG copy of `source`, creating it on first use.
pub fn ensure_grayscale_png(source: &Path) -> Result<PathBuf, MediaError> {
    let target = grayscale_path_for(source).ok_or_else(|| {
        MediaError::Validation(format!("no derived path for {}", source.display()))
    })?;
    if target.exists() && image::image_dimensions(&target).is_ok() {
        return Ok(target);
    }
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }

    let decoded = decode_image_from_path_with_fallback(source).ok_or_else(|| {
        MediaError::UnsupportedContentType(format!("undecodable image {}", source.display()))
    })?;
    let grayscale = DynamicImage::ImageLuma8(decoded.to_luma8());
    let temp_path = target.with_extension("png.part");
    save_png_atomic(&grayscale, &temp_path, &target).ok_or_else(|| {
        MediaError::Io(std::io::Error::other(format!(
            "failed to write {}",
            target.display()
        )))
    })?;
    debug!("ImagePipeline: wrote {}", target.display());
    Ok(target)
}
