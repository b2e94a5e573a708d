//! Field extraction from GRIB2 grid files.
//!
//! The binary format itself is handled by the `grib` crate; this crate only
//! scans a file's records in order, picks the first one matching a
//! [`FieldSelector`] and returns its values as a [`RasterGrid`].
//!
//! Callers that want to substitute another decoder (or a canned one in
//! tests) program against the [`FieldDecoder`] trait.

pub mod error;
mod grib;

use std::path::Path;

pub use error::{DecodeError, DecodeResult};
pub use forecast_common::{FieldSelector, RasterGrid};
pub use grib::GribFieldDecoder;

/// Reads one field out of a grid file.
pub trait FieldDecoder: Send + Sync {
    /// Scan the file's records in order and return the first one matching
    /// `selector`, or `Ok(None)` when no record matched.
    fn read_field(&self, path: &Path, selector: FieldSelector) -> DecodeResult<Option<RasterGrid>>;

    /// Read several fields from the same file, one result per selector.
    fn read_fields(
        &self,
        path: &Path,
        selectors: &[FieldSelector],
    ) -> DecodeResult<Vec<Option<RasterGrid>>> {
        selectors
            .iter()
            .map(|selector| self.read_field(path, *selector))
            .collect()
    }
}
