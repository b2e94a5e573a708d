//! [`FieldDecoder`] backed by the `grib` crate.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use tracing::{debug, trace};

use crate::error::{DecodeError, DecodeResult};
use crate::{FieldDecoder, FieldSelector, RasterGrid};

/// Decodes GRIB2 files with the pure-Rust `grib` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct GribFieldDecoder;

impl GribFieldDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl FieldDecoder for GribFieldDecoder {
    fn read_field(&self, path: &Path, selector: FieldSelector) -> DecodeResult<Option<RasterGrid>> {
        let reader = BufReader::new(File::open(path)?);
        let grib2 = grib::from_reader(reader).map_err(|e| DecodeError::Parse(e.to_string()))?;

        let wanted = selector.as_parameter_number();

        for (index, ((message, submessage_index), submessage)) in grib2.iter().enumerate() {
            // The submessage and its decoder are dropped at the end of each
            // iteration whether or not the record matched.
            let parameter_number = submessage.prod_def().parameter_number();
            trace!(
                path = %path.display(),
                message,
                submessage = submessage_index,
                parameter_number = ?parameter_number,
                "Scanning record"
            );

            if wanted.is_some() && parameter_number != wanted {
                continue;
            }

            let (ni, nj) = submessage
                .grid_shape()
                .map_err(|e| DecodeError::Unpack {
                    index,
                    message: e.to_string(),
                })?;

            let decoder = grib::Grib2SubmessageDecoder::from(submessage).map_err(|e| {
                DecodeError::Unpack {
                    index,
                    message: e.to_string(),
                }
            })?;
            let values: Vec<f32> = decoder
                .dispatch()
                .map_err(|e| DecodeError::Unpack {
                    index,
                    message: e.to_string(),
                })?
                .collect();

            debug!(
                path = %path.display(),
                selector = ?selector,
                ni,
                nj,
                "Decoded field"
            );
            return Ok(Some(RasterGrid::new(values, ni, nj)?));
        }

        debug!(path = %path.display(), selector = ?selector, "No matching record");
        Ok(None)
    }
}
