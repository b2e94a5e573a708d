//! Model issuance cycles and issuance timestamps.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CommonError;

/// Model-run issuance hour (UTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum Cycle {
    H00,
    H06,
    H12,
    H18,
}

impl Cycle {
    pub const ALL: [Cycle; 4] = [Cycle::H00, Cycle::H06, Cycle::H12, Cycle::H18];

    pub fn hour(&self) -> u32 {
        match self {
            Cycle::H00 => 0,
            Cycle::H06 => 6,
            Cycle::H12 => 12,
            Cycle::H18 => 18,
        }
    }

    pub fn from_hour(hour: u32) -> Option<Self> {
        match hour {
            0 => Some(Cycle::H00),
            6 => Some(Cycle::H06),
            12 => Some(Cycle::H12),
            18 => Some(Cycle::H18),
            _ => None,
        }
    }

    /// The cycle `hours` earlier, wrapping around midnight.
    pub fn shifted_back(&self, hours: u32) -> Option<Self> {
        Self::from_hour((self.hour() + 24 - hours % 24) % 24)
    }

    /// Two-digit hour as used in provider URLs and tile paths.
    pub fn as_hh(&self) -> String {
        format!("{:02}", self.hour())
    }
}

impl fmt::Display for Cycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}", self.hour())
    }
}

impl From<Cycle> for u32 {
    fn from(cycle: Cycle) -> u32 {
        cycle.hour()
    }
}

impl TryFrom<u32> for Cycle {
    type Error = CommonError;

    fn try_from(hour: u32) -> Result<Self, Self::Error> {
        Cycle::from_hour(hour).ok_or_else(|| CommonError::InvalidCycle(hour.to_string()))
    }
}

impl FromStr for Cycle {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u32>()
            .ok()
            .and_then(Cycle::from_hour)
            .ok_or_else(|| CommonError::InvalidCycle(s.to_string()))
    }
}

/// An issuance date combined with its cycle hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IssuanceTime {
    pub date: NaiveDate,
    pub cycle: Cycle,
}

impl IssuanceTime {
    pub fn new(date: NaiveDate, cycle: Cycle) -> Self {
        Self { date, cycle }
    }

    /// Parse a `YYYYMMDD` date string and a cycle-hour string.
    pub fn parse(date: &str, cycle: &str) -> Result<Self, CommonError> {
        let date = NaiveDate::parse_from_str(date, "%Y%m%d")
            .map_err(|_| CommonError::InvalidDate(date.to_string()))?;
        let cycle = cycle.parse::<Cycle>()?;
        Ok(Self { date, cycle })
    }

    /// Issuance for the given cycle on the date `latency` before `now`.
    pub fn from_latency(now: DateTime<Utc>, latency: Duration, cycle: Cycle) -> Self {
        Self {
            date: (now - latency).date_naive(),
            cycle,
        }
    }

    /// The issuance instant (date at the cycle hour, UTC).
    pub fn datetime(&self) -> DateTime<Utc> {
        let time = NaiveTime::from_hms_opt(self.cycle.hour(), 0, 0).unwrap_or(NaiveTime::MIN);
        Utc.from_utc_datetime(&NaiveDateTime::new(self.date, time))
    }

    /// Valid time of a forecast `step` hours after issuance.
    pub fn valid_time(&self, step: u32) -> DateTime<Utc> {
        self.datetime() + Duration::hours(step as i64)
    }

    /// `YYYYMMDD` date as used by both providers.
    pub fn date_compact(&self) -> String {
        self.date.format("%Y%m%d").to_string()
    }

    /// Shift the issuance back by whole hours, adjusting date and cycle.
    ///
    /// Returns `None` when the shifted hour is not a valid cycle.
    pub fn shifted_back(&self, hours: u32) -> Option<Self> {
        let shifted = self.datetime() - Duration::hours(hours as i64);
        let cycle = Cycle::from_hour(shifted.hour())?;
        Some(Self {
            date: shifted.date_naive(),
            cycle,
        })
    }
}

impl fmt::Display for IssuanceTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.date_compact(), self.cycle)
    }
}
