//! Published tile tree layout.
//!
//! Tiles are written as
//! `{root}/{model}/{issuance_date}{issuance_hour}/{forecast_date}{forecast_hour}/{parameter}/{z}/{x}/{y}.png`,
//! for example `tiles/ecmwf/2023120812/2023120900/wind/3/4/2.png` is the
//! 12-hour ECMWF wind forecast issued 2023-12-08 12Z.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::cycle::IssuanceTime;
use crate::model::Model;
use crate::parameter::Parameter;

/// `strftime` pattern of the date+hour path components.
pub const TILE_DATE_FORMAT: &str = "%Y%m%d%H";

/// Deterministic location of one parameter's tile pyramid.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileOutputPath {
    pub model: Model,
    pub issuance: IssuanceTime,
    pub step: u32,
    pub parameter: Parameter,
}

impl TileOutputPath {
    pub fn new(model: Model, issuance: IssuanceTime, step: u32, parameter: Parameter) -> Self {
        Self {
            model,
            issuance,
            step,
            parameter,
        }
    }

    /// Valid time of the forecast.
    pub fn forecast_time(&self) -> DateTime<Utc> {
        self.issuance.valid_time(self.step)
    }

    /// Path relative to the tile root.
    pub fn relative(&self) -> PathBuf {
        PathBuf::from(self.model.as_str())
            .join(self.issuance.to_string())
            .join(self.forecast_time().format(TILE_DATE_FORMAT).to_string())
            .join(self.parameter.tile_dir())
    }

    /// Absolute tile directory under `root`.
    pub fn under(&self, root: &Path) -> PathBuf {
        root.join(self.relative())
    }

    /// Stem for staging artifacts in the shared temp directory.
    ///
    /// Includes every component of the tile path so two concurrently staged
    /// units never share a name.
    pub fn staging_stem(&self) -> String {
        format!(
            "{}.{}.{}.{}",
            self.model.as_str(),
            self.parameter.code(),
            self.issuance,
            self.forecast_time().format(TILE_DATE_FORMAT)
        )
    }
}
