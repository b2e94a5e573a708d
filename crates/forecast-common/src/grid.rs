//! Decoded rasters and their RGB encodings.

use crate::error::CommonError;

/// A decoded grid field: `nj` rows of `ni` values, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterGrid {
    values: Vec<f32>,
    ni: usize,
    nj: usize,
}

impl RasterGrid {
    /// Build a grid, checking that `values.len() == ni * nj`.
    pub fn new(values: Vec<f32>, ni: usize, nj: usize) -> Result<Self, CommonError> {
        if values.len() != ni * nj {
            return Err(CommonError::GridSizeMismatch {
                len: values.len(),
                ni,
                nj,
            });
        }
        Ok(Self { values, ni, nj })
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn ni(&self) -> usize {
        self.ni
    }

    pub fn nj(&self) -> usize {
        self.nj
    }

    pub fn same_shape(&self, other: &RasterGrid) -> bool {
        self.ni == other.ni && self.nj == other.nj
    }
}

/// An RGB image with shape `(height, width, 3)`, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pixels: Vec<u8>,
    width: usize,
    height: usize,
}

impl EncodedImage {
    pub fn new(pixels: Vec<u8>, width: usize, height: usize) -> Result<Self, CommonError> {
        if pixels.len() != width * height * 3 {
            return Err(CommonError::ImageSizeMismatch {
                len: pixels.len(),
                width,
                height,
            });
        }
        Ok(Self {
            pixels,
            width,
            height,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Mutable pixel access; the shape cannot change through it.
    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    /// RGB triple at column `x`, row `y`.
    pub fn pixel(&self, x: usize, y: usize) -> [u8; 3] {
        let idx = (y * self.width + x) * 3;
        [self.pixels[idx], self.pixels[idx + 1], self.pixels[idx + 2]]
    }
}
