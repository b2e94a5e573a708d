//! Clipped linear scaling shared by all channel tables.

/// Map `x` linearly so that `lo` becomes 0 and `hi` becomes 1, clipped to
/// `[0, 1]`. Missing values (NaN) encode as 0.
#[inline]
pub fn encode_data(x: f32, hi: f32, lo: f32) -> f32 {
    clip_unit((x - lo) / (hi - lo))
}

/// Clip to `[0, 1]`, mapping NaN to 0.
#[inline]
pub fn clip_unit(x: f32) -> f32 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}

/// Normalised channel value to a byte. Truncates like a raster byte write.
#[inline]
pub fn to_byte(x: f32) -> u8 {
    (clip_unit(x) * 255.0) as u8
}

/// 255 when `flag` holds, 0 otherwise.
#[inline]
pub fn flag_byte(flag: bool) -> u8 {
    if flag {
        255
    } else {
        0
    }
}
