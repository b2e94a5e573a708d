//! Forecast model providers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CommonError;

/// A numerical weather model provider.
///
/// Each provider has its own access protocol and native grid convention:
/// GFS is fetched from the NOMADS filter service as plain HTTP downloads,
/// ECMWF open data through its index-driven provider client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Model {
    Gfs,
    Ecmwf,
}

impl Model {
    /// All supported models, in the order scheduled triggers invoke them.
    pub const ALL: [Model; 2] = [Model::Ecmwf, Model::Gfs];

    /// Lower-case tag used in tile paths, staging names and the job store.
    pub fn as_str(&self) -> &'static str {
        match self {
            Model::Gfs => "gfs",
            Model::Ecmwf => "ecmwf",
        }
    }

    /// Whether accumulated fields from this provider must be differenced
    /// between two snapshots to obtain an interval value.
    pub fn differences_accumulations(&self) -> bool {
        matches!(self, Model::Gfs)
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Model {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gfs" => Ok(Model::Gfs),
            "ecmwf" => Ok(Model::Ecmwf),
            _ => Err(CommonError::UnknownModel(s.to_string())),
        }
    }
}
