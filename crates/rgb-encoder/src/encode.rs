//! Per-parameter channel tables.
//!
//! | Parameter     | Red                      | Green                         | Blue            |
//! |---------------|--------------------------|-------------------------------|-----------------|
//! | Temperature   | `encode_data(x,320,200)` | jitter 50-60 if x<273 else 70-80 | `x/273`      |
//! | Humidity      | `encode_data(x,100,0)`   | `x/6`                         | `x/50`          |
//! | Pressure      | `encode_data(x,105000,90000)` | `x/90000`                | `x/90000`       |
//! | Cloud cover   | `encode_data(x,100,0)`   | `x/40`                        | `x/20`          |
//! | Wind (u, v)   | jitter 50-60 if dir<0 else 70-80 | `|atan2(v,u)|/pi`     | `speed/40`      |
//! | Precipitation | `diff/35`                | frozen >= 35                  | diff > 15       |
//!
//! Jitter values are drawn once per image for each branch, so all cold
//! pixels of one temperature image share the same green value.

use std::f32::consts::PI;

use forecast_common::{EncodedImage, Parameter, RasterGrid};
use rand::Rng;
use rayon::prelude::*;

use crate::scale::{clip_unit, encode_data, flag_byte, to_byte};

const TEMPERATURE_HI: f32 = 320.0;
const TEMPERATURE_LO: f32 = 200.0;
const FREEZING_K: f32 = 273.0;
const PRESSURE_HI: f32 = 105_000.0;
const PRESSURE_LO: f32 = 90_000.0;
const WIND_SPEED_MAX: f32 = 40.0;
const PRECIPITATION_MAX: f32 = 35.0;
const HEAVY_PRECIPITATION: f32 = 15.0;
const FROZEN_PERCENT: f32 = 35.0;

/// Decoded inputs for one encoding, shaped by what the parameter needs.
#[derive(Debug, Clone)]
pub enum FieldInputs {
    Scalar(Option<RasterGrid>),
    Wind {
        u: Option<RasterGrid>,
        v: Option<RasterGrid>,
    },
    /// Two accumulation snapshots and the frozen-fraction field.
    Precipitation {
        current: Option<RasterGrid>,
        previous: Option<RasterGrid>,
        frozen: Option<RasterGrid>,
    },
}

/// Encode `inputs` for `parameter`.
///
/// Returns `None` when a required field is missing, the component grids
/// disagree in shape, or the inputs do not fit the parameter.
pub fn encode(parameter: Parameter, inputs: &FieldInputs) -> Option<EncodedImage> {
    match (parameter, inputs) {
        (Parameter::Wind, FieldInputs::Wind { u, v }) => encode_wind(u.as_ref()?, v.as_ref()?),
        (
            Parameter::Precipitation,
            FieldInputs::Precipitation {
                current,
                previous,
                frozen,
            },
        ) => {
            let interval = accumulation_difference(current.as_ref()?, previous.as_ref()?)?;
            encode_precipitation(&interval, frozen.as_ref()?)
        }
        (_, FieldInputs::Scalar(grid)) => encode_field(parameter, grid.as_ref()?),
        _ => None,
    }
}

/// Encode a single-field parameter. Composite parameters yield `None`.
pub fn encode_field(parameter: Parameter, grid: &RasterGrid) -> Option<EncodedImage> {
    let values = grid.values();
    match parameter {
        Parameter::Temperature => {
            let jitter = Jitter::draw();
            build_image(grid.ni(), grid.nj(), |i| {
                let x = values[i];
                [
                    to_byte(encode_data(x, TEMPERATURE_HI, TEMPERATURE_LO)),
                    jitter.pick(x < FREEZING_K),
                    to_byte(x / FREEZING_K),
                ]
            })
        }
        Parameter::Humidity => build_image(grid.ni(), grid.nj(), |i| {
            let x = values[i];
            [
                to_byte(encode_data(x, 100.0, 0.0)),
                to_byte(x / 6.0),
                to_byte(x / 50.0),
            ]
        }),
        Parameter::Pressure => build_image(grid.ni(), grid.nj(), |i| {
            let x = values[i];
            let low = to_byte(x / PRESSURE_LO);
            [to_byte(encode_data(x, PRESSURE_HI, PRESSURE_LO)), low, low]
        }),
        Parameter::CloudCover => build_image(grid.ni(), grid.nj(), |i| {
            let x = values[i];
            [
                to_byte(encode_data(x, 100.0, 0.0)),
                to_byte(x / 40.0),
                to_byte(x / 20.0),
            ]
        }),
        Parameter::Wind | Parameter::Precipitation => None,
    }
}

/// Encode wind from its u and v components.
pub fn encode_wind(u: &RasterGrid, v: &RasterGrid) -> Option<EncodedImage> {
    if !u.same_shape(v) {
        return None;
    }
    let (us, vs) = (u.values(), v.values());
    let jitter = Jitter::draw();
    build_image(u.ni(), u.nj(), |i| {
        let direction = vs[i].atan2(us[i]);
        let speed = (us[i] * us[i] + vs[i] * vs[i]).sqrt();
        [
            jitter.pick(direction < 0.0),
            to_byte(clip_unit(direction.abs() / PI)),
            to_byte(speed / WIND_SPEED_MAX),
        ]
    })
}

/// Encode an interval precipitation total with the frozen-fraction flag.
pub fn encode_precipitation(interval: &RasterGrid, frozen: &RasterGrid) -> Option<EncodedImage> {
    if !interval.same_shape(frozen) {
        return None;
    }
    let (amounts, fractions) = (interval.values(), frozen.values());
    build_image(interval.ni(), interval.nj(), |i| {
        let amount = amounts[i];
        [
            to_byte(amount / PRECIPITATION_MAX),
            flag_byte(fractions[i] >= FROZEN_PERCENT),
            flag_byte(amount > HEAVY_PRECIPITATION),
        ]
    })
}

/// Precipitation over the interval between two accumulation snapshots.
pub fn accumulation_difference(current: &RasterGrid, previous: &RasterGrid) -> Option<RasterGrid> {
    if !current.same_shape(previous) {
        return None;
    }
    let values = current
        .values()
        .iter()
        .zip(previous.values())
        .map(|(now, before)| now - before)
        .collect();
    RasterGrid::new(values, current.ni(), current.nj()).ok()
}

/// Byte values for the two branches of a jittered channel.
#[derive(Debug, Clone, Copy)]
struct Jitter {
    low: u8,
    high: u8,
}

impl Jitter {
    fn draw() -> Self {
        let mut rng = rand::thread_rng();
        Self {
            low: rng.gen_range(50..=60),
            high: rng.gen_range(70..=80),
        }
    }

    #[inline]
    fn pick(&self, low_branch: bool) -> u8 {
        if low_branch {
            self.low
        } else {
            self.high
        }
    }
}

fn build_image<F>(ni: usize, nj: usize, pixel: F) -> Option<EncodedImage>
where
    F: Fn(usize) -> [u8; 3] + Sync,
{
    let mut pixels = vec![0u8; ni * nj * 3];
    pixels
        .par_chunks_mut(3)
        .enumerate()
        .for_each(|(i, out)| out.copy_from_slice(&pixel(i)));
    EncodedImage::new(pixels, ni, nj).ok()
}
