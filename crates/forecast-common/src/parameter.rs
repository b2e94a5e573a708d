//! Meteorological parameters and their per-provider metadata.
//!
//! Every provider-specific detail (filter-service fragments, open-data codes,
//! decode selectors) lives in a `match` on [`Parameter`] so that adding a
//! parameter fails to compile until every table is filled in.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CommonError;

/// GRIB2 `parameterNumber` of the u wind component.
pub const WIND_U_PARAMETER_NUMBER: u8 = 2;
/// GRIB2 `parameterNumber` of the v wind component.
pub const WIND_V_PARAMETER_NUMBER: u8 = 3;
/// GRIB2 `parameterNumber` of total precipitation.
pub const PRECIPITATION_PARAMETER_NUMBER: u8 = 8;
/// GRIB2 `parameterNumber` of the percent frozen precipitation field.
pub const FROZEN_FRACTION_PARAMETER_NUMBER: u8 = 39;

/// A field the importer can encode into tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parameter {
    Temperature,
    Humidity,
    Pressure,
    CloudCover,
    Wind,
    Precipitation,
}

/// Query fragments for the NOMADS GRIB filter service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GfsFilter {
    pub var_request: &'static str,
    pub level_request: &'static str,
}

/// Selects one record inside a grid file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldSelector {
    /// The first record in the file.
    First,
    /// The first record with this GRIB2 `parameterNumber`.
    ParameterNumber(u8),
}

impl FieldSelector {
    pub fn as_parameter_number(&self) -> Option<u8> {
        match self {
            FieldSelector::First => None,
            FieldSelector::ParameterNumber(n) => Some(*n),
        }
    }
}

/// Side-channel GFS fetch that accompanies precipitation requests.
pub const WEATHER_ICON_FILTER: GfsFilter = GfsFilter {
    var_request: "var_CPOFP=on&var_TCDC=on",
    level_request: "lev_surface=on&lev_entire_atmosphere=on",
};

impl Parameter {
    pub const ALL: [Parameter; 6] = [
        Parameter::Temperature,
        Parameter::Humidity,
        Parameter::Pressure,
        Parameter::CloudCover,
        Parameter::Wind,
        Parameter::Precipitation,
    ];

    /// Short code used in staging names and tile paths (lower-cased).
    pub fn code(&self) -> &'static str {
        match self {
            Parameter::Temperature => "TMP",
            Parameter::Humidity => "RH",
            Parameter::Pressure => "PRES",
            Parameter::CloudCover => "TCDC",
            Parameter::Wind => "WIND",
            Parameter::Precipitation => "APCP",
        }
    }

    /// Tile directory component.
    pub fn tile_dir(&self) -> String {
        self.code().to_lowercase()
    }

    /// NOMADS filter fragments for GFS.
    pub fn gfs_filter(&self) -> GfsFilter {
        match self {
            Parameter::Temperature => GfsFilter {
                var_request: "var_TMP=on",
                level_request: "lev_2_m_above_ground=on",
            },
            Parameter::Humidity => GfsFilter {
                var_request: "var_RH=on",
                level_request: "lev_2_m_above_ground=on",
            },
            Parameter::Pressure => GfsFilter {
                var_request: "var_PRMSL=on",
                level_request: "lev_mean_sea_level=on",
            },
            Parameter::CloudCover => GfsFilter {
                var_request: "var_TCDC=on",
                level_request: "lev_entire_atmosphere=on",
            },
            Parameter::Wind => GfsFilter {
                var_request: "var_UGRD=on&var_VGRD=on",
                level_request: "lev_10_m_above_ground=on",
            },
            Parameter::Precipitation => GfsFilter {
                var_request: "var_APCP=on",
                level_request: "lev_surface=on",
            },
        }
    }

    /// ECMWF open-data parameter codes.
    pub fn ecmwf_params(&self) -> &'static [&'static str] {
        match self {
            Parameter::Temperature => &["2t"],
            Parameter::Humidity => &["r"],
            Parameter::Pressure => &["msl"],
            Parameter::CloudCover => &["tcc"],
            Parameter::Wind => &["10v", "10u"],
            Parameter::Precipitation => &["tp"],
        }
    }

    /// Selectors for the fields that feed the encoder, in encoder order.
    ///
    /// Wind reads u then v from the same file; precipitation reads the
    /// accumulation from both snapshots with the same selector.
    pub fn selectors(&self) -> &'static [FieldSelector] {
        match self {
            Parameter::Wind => &[
                FieldSelector::ParameterNumber(WIND_U_PARAMETER_NUMBER),
                FieldSelector::ParameterNumber(WIND_V_PARAMETER_NUMBER),
            ],
            Parameter::Precipitation => &[FieldSelector::ParameterNumber(
                PRECIPITATION_PARAMETER_NUMBER,
            )],
            Parameter::Temperature
            | Parameter::Humidity
            | Parameter::Pressure
            | Parameter::CloudCover => &[FieldSelector::First],
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Parameter {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tmp" | "temperature" | "2t" => Ok(Parameter::Temperature),
            "rh" | "humidity" | "r" => Ok(Parameter::Humidity),
            "pres" | "pressure" | "msl" => Ok(Parameter::Pressure),
            "tcdc" | "cloud_cover" | "tcc" => Ok(Parameter::CloudCover),
            "wind" => Ok(Parameter::Wind),
            "apcp" | "precipitation" | "tp" => Ok(Parameter::Precipitation),
            _ => Err(CommonError::UnknownParameter(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_round_trip_through_from_str() {
        for parameter in Parameter::ALL {
            assert_eq!(parameter.code().parse::<Parameter>().unwrap(), parameter);
        }
    }

    #[test]
    fn test_tile_dir_is_lowercase() {
        assert_eq!(Parameter::Precipitation.tile_dir(), "apcp");
        assert_eq!(Parameter::Wind.tile_dir(), "wind");
    }

    #[test]
    fn test_wind_selectors() {
        assert_eq!(
            Parameter::Wind.selectors(),
            &[
                FieldSelector::ParameterNumber(2),
                FieldSelector::ParameterNumber(3)
            ]
        );
        assert_eq!(Parameter::Temperature.selectors(), &[FieldSelector::First]);
    }

    #[test]
    fn test_serde_accepts_snake_case() {
        let p: Parameter = serde_json::from_str("\"cloud_cover\"").unwrap();
        assert_eq!(p, Parameter::CloudCover);
    }
}
