//! Request planner: expands one model run into the ordered list of fetches
//! needed to produce every tile directory of that run.
//!
//! Planning is pure. The output for a given input never depends on time or
//! on what is already on disk.

use std::fmt;

use forecast_common::parameter::WEATHER_ICON_FILTER;
use forecast_common::{GfsFilter, IssuanceTime, Model, Parameter};

use crate::ecmwf::EcmwfRequest;
use crate::error::{ImportError, ImportResult};

/// GFS total precipitation is accumulated over 6-hour windows; the interval
/// amount is the 6-hour value minus the 3-hour value of the same window.
const GFS_ACCUMULATION_WINDOW: u32 = 6;
const GFS_ACCUMULATION_HALF: u32 = 3;

/// Where to fetch one grid file from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchSpec {
    Http { url: String },
    Ecmwf(EcmwfRequest),
}

impl fmt::Display for FetchSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchSpec::Http { url } => f.write_str(url),
            FetchSpec::Ecmwf(request) => write!(
                f,
                "ecmwf:{}+{}h:{}",
                request.issuance,
                request.step,
                request.params.join("/")
            ),
        }
    }
}

/// Everything needed to produce one tile directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    pub parameter: Parameter,
    /// Forecast horizon in hours after the (unshifted) issuance.
    pub step: u32,
    pub primary: FetchSpec,
    /// Earlier accumulation snapshot to difference against.
    pub secondary: Option<FetchSpec>,
    /// Frozen-fraction companion file for precipitation.
    pub side_channel: Option<FetchSpec>,
}

/// Inputs of one plan.
#[derive(Debug, Clone)]
pub struct PlanRequest<'a> {
    pub model: Model,
    pub issuance: IssuanceTime,
    pub forecast_step: u32,
    pub max_forecast_step: u32,
    pub parameters: &'a [Parameter],
    pub gfs_url: &'a str,
}

/// NOMADS filter URL for one GFS file.
pub fn gfs_url(base: &str, issuance: &IssuanceTime, step: u32, filter: &GfsFilter) -> String {
    let date = issuance.date_compact();
    let hh = issuance.cycle.as_hh();
    format!(
        "{base}?dir=%2Fgfs.{date}%2F{hh}%2Fatmos&file=gfs.t{hh}z.pgrb2.0p25.f{step:03}&{var}&{lev}",
        var = filter.var_request,
        lev = filter.level_request,
    )
}

/// Expand a run into request descriptors, parameter-major.
///
/// Duplicate parameters are collapsed. An empty result is an error.
pub fn plan(request: &PlanRequest<'_>) -> ImportResult<Vec<RequestDescriptor>> {
    if request.forecast_step == 0 {
        return Err(ImportError::Planning("forecast step must be positive".into()));
    }

    let mut parameters: Vec<Parameter> = Vec::with_capacity(request.parameters.len());
    for parameter in request.parameters {
        if !parameters.contains(parameter) {
            parameters.push(*parameter);
        }
    }

    let steps: Vec<u32> = (0..=request.max_forecast_step)
        .step_by(request.forecast_step as usize)
        .collect();

    let mut descriptors = Vec::with_capacity(parameters.len() * steps.len());
    for parameter in parameters {
        for &step in &steps {
            let descriptor = match request.model {
                Model::Ecmwf => ecmwf_descriptor(request, parameter, step),
                Model::Gfs => gfs_descriptor(request, parameter, step)?,
            };
            descriptors.push(descriptor);
        }
    }

    if descriptors.is_empty() {
        return Err(ImportError::Planning(format!(
            "no requests for {} {}",
            request.model, request.issuance
        )));
    }
    Ok(descriptors)
}

fn ecmwf_descriptor(request: &PlanRequest<'_>, parameter: Parameter, step: u32) -> RequestDescriptor {
    RequestDescriptor {
        parameter,
        step,
        primary: FetchSpec::Ecmwf(EcmwfRequest {
            issuance: request.issuance,
            step,
            params: parameter.ecmwf_params(),
        }),
        secondary: None,
        side_channel: None,
    }
}

fn gfs_descriptor(
    request: &PlanRequest<'_>,
    parameter: Parameter,
    step: u32,
) -> ImportResult<RequestDescriptor> {
    let filter = parameter.gfs_filter();
    let http = |issuance: &IssuanceTime, step: u32, filter: &GfsFilter| FetchSpec::Http {
        url: gfs_url(request.gfs_url, issuance, step, filter),
    };

    if !request.model.differences_accumulations() || parameter != Parameter::Precipitation {
        return Ok(RequestDescriptor {
            parameter,
            step,
            primary: http(&request.issuance, step, &filter),
            secondary: None,
            side_channel: None,
        });
    }

    // The analysis file has no accumulation; use the previous run's first
    // window instead, which covers the same valid time.
    let (issuance, retrieved) = if step == 0 {
        let shifted = request
            .issuance
            .shifted_back(GFS_ACCUMULATION_WINDOW)
            .ok_or_else(|| {
                ImportError::Planning(format!("cannot shift {} back 6 h", request.issuance))
            })?;
        (shifted, GFS_ACCUMULATION_WINDOW)
    } else {
        (request.issuance, step)
    };

    let earlier = retrieved.checked_sub(GFS_ACCUMULATION_HALF).ok_or_else(|| {
        ImportError::Planning(format!(
            "horizon {}h has no earlier accumulation snapshot",
            retrieved
        ))
    })?;

    Ok(RequestDescriptor {
        parameter,
        step,
        primary: http(&issuance, retrieved, &filter),
        secondary: Some(http(&issuance, earlier, &filter)),
        side_channel: Some(http(&request.issuance, step, &WEATHER_ICON_FILTER)),
    })
}
