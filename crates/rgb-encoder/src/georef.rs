//! Pixel alignment and georeferencing of encoded images.
//!
//! Encoded images are enlarged 2x before tiling so the bilinear warp has
//! room to smooth cell edges. Providers disagree on where their first grid
//! column sits, so each model gets its own reshuffle before the image is
//! pinned to the global extent (-180, 90)..(180, -90).

use forecast_common::{CommonResult, EncodedImage, Model};
use tracing::trace;

/// Enlarge by pixel replication, doubling both axes.
pub fn upscale2x(image: &EncodedImage) -> CommonResult<EncodedImage> {
    let (width, height) = (image.width(), image.height());
    let row_len = width * 2 * 3;
    let mut pixels = Vec::with_capacity(row_len * height * 2);
    for row in image.pixels().chunks_exact((width * 3).max(1)) {
        let start = pixels.len();
        for pixel in row.chunks_exact(3) {
            pixels.extend_from_slice(pixel);
            pixels.extend_from_slice(pixel);
        }
        pixels.extend_from_within(start..start + row_len);
    }
    EncodedImage::new(pixels, width * 2, height * 2)
}

/// Align provider pixels with the -180..180 extent.
///
/// - GFS: roll rows by -1, then swap the left and right halves so the grid,
///   which starts at 0 E, starts at the anti-meridian.
/// - ECMWF: roll by -1 along both axes.
pub fn reshuffle(mut image: EncodedImage, model: Model) -> EncodedImage {
    let (width, height) = (image.width(), image.height());
    if width == 0 || height == 0 {
        return image;
    }
    let pixels = image.pixels_mut();
    pixels.rotate_left(width * 3);

    let column_shift = match model {
        Model::Gfs => width / 2,
        Model::Ecmwf => 1,
    };
    for row in pixels.chunks_exact_mut(width * 3) {
        row.rotate_left(column_shift * 3);
    }
    trace!(model = %model, width, height, column_shift, "Reshuffled pixels");
    image
}

/// Affine transform of a north-up raster.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub pixel_width: f64,
    pub origin_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// Whole-globe equirectangular transform for a `width` x `height` image.
    pub fn global(width: usize, height: usize) -> Self {
        Self {
            origin_x: -180.0,
            pixel_width: 360.0 / width as f64,
            origin_y: 90.0,
            pixel_height: -180.0 / height as f64,
        }
    }

    /// ESRI world file contents.
    ///
    /// World files locate the centre of the upper-left pixel, not its corner.
    pub fn world_file(&self) -> String {
        format!(
            "{}\n0\n0\n{}\n{}\n{}\n",
            self.pixel_width,
            self.pixel_height,
            self.origin_x + self.pixel_width / 2.0,
            self.origin_y + self.pixel_height / 2.0
        )
    }
}

/// Enlarge, reshuffle and georeference an encoded image for `model`.
pub fn prepare_for_tiling(
    image: &EncodedImage,
    model: Model,
) -> CommonResult<(EncodedImage, GeoTransform)> {
    let aligned = reshuffle(upscale2x(image)?, model);
    let transform = GeoTransform::global(aligned.width(), aligned.height());
    Ok((aligned, transform))
}
