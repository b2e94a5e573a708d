//! ECMWF open-data client.
//!
//! Open-data runs are published as one GRIB2 file per (run, step) together
//! with a JSON-lines `.index` describing the byte range of every message.
//! A request is resolved by reading the index and range-fetching only the
//! messages whose `param` was asked for.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use forecast_common::{Cycle, IssuanceTime};
use reqwest::header::{HeaderMap, HeaderValue, RANGE};
use serde::Deserialize;
use tracing::debug;

use crate::download::Retriever;
use crate::error::{ImportError, ImportResult};

const LOG_TARGET: &str = "importer::ecmwf";

/// One open-data retrieval: a forecast (`type=fc`) step of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcmwfRequest {
    pub issuance: IssuanceTime,
    pub step: u32,
    pub params: &'static [&'static str],
}

impl EcmwfRequest {
    pub const KIND: &'static str = "fc";

    /// Open-data stream of the run: 00/12 runs are `oper`, 06/18 are `scda`.
    pub fn stream(&self) -> &'static str {
        match self.issuance.cycle {
            Cycle::H00 | Cycle::H12 => "oper",
            Cycle::H06 | Cycle::H18 => "scda",
        }
    }

    /// URL of the GRIB2 file under `base`.
    pub fn grib_url(&self, base: &str) -> String {
        let date = self.issuance.date_compact();
        let hh = self.issuance.cycle.as_hh();
        let stream = self.stream();
        format!(
            "{base}/{date}/{hh}z/ifs/0p25/{stream}/{date}{hh}0000-{step}h-{stream}-{kind}.grib2",
            base = base.trim_end_matches('/'),
            step = self.step,
            kind = Self::KIND,
        )
    }

    /// URL of the JSON-lines index accompanying the GRIB2 file.
    pub fn index_url(&self, base: &str) -> String {
        let grib = self.grib_url(base);
        match grib.strip_suffix(".grib2") {
            Some(stem) => format!("{stem}.index"),
            None => grib,
        }
    }
}

/// One line of an open-data index.
#[derive(Debug, Clone, Deserialize)]
pub struct IndexEntry {
    pub param: String,
    #[serde(default)]
    pub levtype: Option<String>,
    #[serde(rename = "_offset")]
    pub offset: u64,
    #[serde(rename = "_length")]
    pub length: u64,
}

impl IndexEntry {
    fn range_header(&self) -> String {
        format!(
            "bytes={}-{}",
            self.offset,
            self.offset + self.length.saturating_sub(1)
        )
    }
}

/// Parse an index and keep entries for `params`, in file order.
pub fn select_entries(index: &str, params: &[&str]) -> ImportResult<Vec<IndexEntry>> {
    let mut selected = Vec::new();
    for line in index.lines().filter(|l| !l.trim().is_empty()) {
        let entry: IndexEntry = serde_json::from_str(line)
            .map_err(|e| ImportError::retrieval("ecmwf index", format!("bad index line: {e}")))?;
        if params.contains(&entry.param.as_str()) {
            selected.push(entry);
        }
    }
    Ok(selected)
}

#[derive(Debug, Clone)]
pub struct EcmwfClient {
    base_url: String,
}

impl EcmwfClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    /// Fetch the GRIB2 messages for `request`, concatenated in index order.
    pub async fn retrieve(
        &self,
        retriever: &Retriever,
        request: &EcmwfRequest,
    ) -> ImportResult<Bytes> {
        let index_url = request.index_url(&self.base_url);
        let index_timeout = Duration::from_secs(retriever.config().index_timeout_secs);
        let index = retriever
            .fetch(&index_url, &HeaderMap::new(), Some(index_timeout))
            .await?;
        let index = String::from_utf8_lossy(&index);

        let entries = select_entries(&index, request.params)?;
        if entries.is_empty() {
            return Err(ImportError::retrieval(
                index_url,
                format!("no index entries for {:?}", request.params),
            ));
        }

        let grib_url = request.grib_url(&self.base_url);
        let mut body = BytesMut::new();
        for entry in &entries {
            let mut headers = HeaderMap::new();
            let range = HeaderValue::from_str(&entry.range_header())
                .map_err(|e| ImportError::retrieval(&grib_url, e.to_string()))?;
            headers.insert(RANGE, range);

            let part = retriever.fetch(&grib_url, &headers, None).await?;
            debug!(
                target: LOG_TARGET,
                param = %entry.param,
                levtype = ?entry.levtype,
                offset = entry.offset,
                bytes = part.len(),
                "Fetched message"
            );
            body.extend_from_slice(&part);
        }

        debug!(
            target: LOG_TARGET,
            url = %grib_url,
            messages = entries.len(),
            bytes = body.len(),
            "Retrieved open-data request"
        );
        Ok(body.freeze())
    }
}
