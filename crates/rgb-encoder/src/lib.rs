//! Field-to-RGB encoding for forecast tiles.
//!
//! Each parameter maps its decoded values onto three byte channels so the
//! map client can recover the magnitude (and for wind, the direction) from
//! tile colours:
//! - `scale`: the clipped linear scaling every channel is built from
//! - `encode`: per-parameter channel tables, including the composite wind
//!   and precipitation encodings
//! - `georef`: 2x enlargement, provider-specific pixel alignment and the
//!   global equirectangular geotransform
//! - `png`: staging artifacts for the external tiler

pub mod encode;
pub mod error;
pub mod georef;
pub mod png;
pub mod scale;

pub use encode::{encode, encode_field, encode_precipitation, encode_wind, FieldInputs};
pub use error::{EncodeError, EncodeResult};
pub use georef::{prepare_for_tiling, reshuffle, upscale2x, GeoTransform};
pub use png::{world_file_path, write_png, write_world_file};
pub use scale::encode_data;
