//! Synthetic grids for encoder and pipeline tests.

use forecast_common::RasterGrid;

/// A grid where every cell holds `value`.
pub fn constant_grid(ni: usize, nj: usize, value: f32) -> RasterGrid {
    RasterGrid::new(vec![value; ni * nj], ni, nj).expect("shape is consistent")
}

/// A grid built from explicit row-major values.
pub fn grid_from(values: &[f32], ni: usize, nj: usize) -> RasterGrid {
    RasterGrid::new(values.to_vec(), ni, nj).expect("shape is consistent")
}

/// Evenly spaced values from `lo` to `hi` (inclusive) in one row.
pub fn ramp_grid(ni: usize, lo: f32, hi: f32) -> RasterGrid {
    let step = if ni > 1 { (hi - lo) / (ni - 1) as f32 } else { 0.0 };
    let values = (0..ni).map(|i| lo + step * i as f32).collect();
    RasterGrid::new(values, ni, 1).expect("shape is consistent")
}

/// Temperature-like field in Kelvin, 250 K top-left to 310 K bottom-right.
pub fn temperature_grid(ni: usize, nj: usize) -> RasterGrid {
    let mut values = Vec::with_capacity(ni * nj);
    for row in 0..nj {
        for col in 0..ni {
            let x = col as f32 / ni.max(1) as f32;
            let y = row as f32 / nj.max(1) as f32;
            values.push(250.0 + x * 30.0 + y * 30.0);
        }
    }
    RasterGrid::new(values, ni, nj).expect("shape is consistent")
}

/// An RGB image where pixel `(x, y)` is `[x, y, 0]`.
pub fn coordinate_pixels(width: usize, height: usize) -> Vec<u8> {
    let mut pixels = Vec::with_capacity(width * height * 3);
    for y in 0..height {
        for x in 0..width {
            pixels.extend_from_slice(&[x as u8, y as u8, 0]);
        }
    }
    pixels
}
