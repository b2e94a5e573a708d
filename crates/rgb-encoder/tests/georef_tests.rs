//! Tests for enlargement, provider alignment and georeferencing.

use forecast_common::{EncodedImage, Model, Parameter};
use rgb_encoder::{encode_field, prepare_for_tiling, reshuffle, upscale2x, GeoTransform};
use test_utils::{assert_approx_eq, coordinate_pixels, grid, temperature_grid};

fn coordinate_image(width: usize, height: usize) -> EncodedImage {
    EncodedImage::new(coordinate_pixels(width, height), width, height).unwrap()
}

#[test]
fn test_upscale_replicates_pixels() {
    let image = coordinate_image(2, 2);
    let large = upscale2x(&image).unwrap();

    assert_eq!(large.width(), 4);
    assert_eq!(large.height(), 4);
    assert_eq!(large.pixel(0, 0), [0, 0, 0]);
    assert_eq!(large.pixel(1, 1), [0, 0, 0]);
    assert_eq!(large.pixel(2, 0), [1, 0, 0]);
    assert_eq!(large.pixel(3, 3), [1, 1, 0]);
    assert_eq!(large.pixel(0, 2), [0, 1, 0]);
}

#[test]
fn test_gfs_rolls_rows_and_swaps_halves() {
    let image = coordinate_image(4, 3);
    let aligned = reshuffle(image, Model::Gfs);

    // Row 0 now holds source row 1, starting at source column 2
    assert_eq!(aligned.pixel(0, 0), [2, 1, 0]);
    assert_eq!(aligned.pixel(1, 0), [3, 1, 0]);
    assert_eq!(aligned.pixel(2, 0), [0, 1, 0]);
    assert_eq!(aligned.pixel(3, 0), [1, 1, 0]);
    // Last row wraps around to source row 0
    assert_eq!(aligned.pixel(0, 2), [2, 0, 0]);
}

#[test]
fn test_ecmwf_rolls_both_axes() {
    let image = coordinate_image(3, 3);
    let aligned = reshuffle(image, Model::Ecmwf);

    assert_eq!(aligned.pixel(0, 0), [1, 1, 0]);
    assert_eq!(aligned.pixel(2, 0), [0, 1, 0]);
    assert_eq!(aligned.pixel(2, 2), [0, 0, 0]);
}

#[test]
fn test_prepare_for_tiling_covers_globe() {
    let image = coordinate_image(720, 361);
    let (aligned, transform) = prepare_for_tiling(&image, Model::Gfs).unwrap();

    assert_eq!(aligned.width(), 1440);
    assert_eq!(aligned.height(), 722);
    assert_approx_eq!(transform.origin_x, -180.0, 1e-9);
    assert_approx_eq!(transform.origin_y, 90.0, 1e-9);
    assert_approx_eq!(transform.pixel_width * 1440.0, 360.0, 1e-9);
    assert_approx_eq!(transform.pixel_height * 722.0, -180.0, 1e-9);
}

#[test]
fn test_global_transform_matches_world_file() {
    let transform = GeoTransform::global(360, 180);
    let lines: Vec<f64> = transform
        .world_file()
        .lines()
        .map(|line| line.parse().unwrap())
        .collect();
    assert_eq!(lines.len(), 6);
    assert_approx_eq!(lines[0], 1.0, 1e-12);
    assert_approx_eq!(lines[3], -1.0, 1e-12);
    assert_approx_eq!(lines[4], -179.5, 1e-12);
    assert_approx_eq!(lines[5], 89.5, 1e-12);
}

#[test]
fn test_native_ecmwf_grid_doubles_to_tiling_size() {
    let (ni, nj) = grid::ECMWF_0P25;
    let encoded = encode_field(Parameter::Temperature, &temperature_grid(ni, nj)).unwrap();
    let (aligned, transform) = prepare_for_tiling(&encoded, Model::Ecmwf).unwrap();

    assert_eq!((aligned.width(), aligned.height()), (2 * ni, 2 * nj));
    assert_approx_eq!(transform.pixel_width, 0.125, 1e-9);
}
