//! Staging artifacts handed to the external tiler.
//!
//! An encoded image is staged as an 8-bit RGB PNG next to an ESRI world
//! file (`.pgw`) carrying its geotransform.

use std::fs;
use std::path::{Path, PathBuf};

use forecast_common::EncodedImage;
use image::{ImageFormat, RgbImage};
use tracing::debug;

use crate::error::{EncodeError, EncodeResult};
use crate::georef::GeoTransform;

/// Write `image` as an RGB PNG at `path`.
pub fn write_png(image: &EncodedImage, path: &Path) -> EncodeResult<()> {
    let (width, height) = (image.width(), image.height());
    let too_large = || EncodeError::TooLarge { width, height };
    let w = u32::try_from(width).map_err(|_| too_large())?;
    let h = u32::try_from(height).map_err(|_| too_large())?;

    let buffer = RgbImage::from_raw(w, h, image.pixels().to_vec())
        .ok_or(EncodeError::BufferMismatch { width, height })?;
    buffer.save_with_format(path, ImageFormat::Png)?;

    debug!(path = %path.display(), width, height, "Wrote staging PNG");
    Ok(())
}

/// World file path belonging to a PNG (`foo.png` -> `foo.pgw`).
pub fn world_file_path(png_path: &Path) -> PathBuf {
    png_path.with_extension("pgw")
}

/// Write the world file for the PNG at `png_path`, returning its path.
pub fn write_world_file(png_path: &Path, transform: &GeoTransform) -> EncodeResult<PathBuf> {
    let path = world_file_path(png_path);
    fs::write(&path, transform.world_file())?;
    Ok(path)
}
