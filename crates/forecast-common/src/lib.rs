//! Common types shared across the forecast tile importer crates.

pub mod cycle;
pub mod error;
pub mod grid;
pub mod model;
pub mod parameter;
pub mod tile;

pub use cycle::{Cycle, IssuanceTime};
pub use error::{CommonError, CommonResult};
pub use grid::{EncodedImage, RasterGrid};
pub use model::Model;
pub use parameter::{FieldSelector, GfsFilter, Parameter};
pub use tile::{TileOutputPath, TILE_DATE_FORMAT};
