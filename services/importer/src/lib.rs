//! Forecast tile importer.
//!
//! Downloads GFS and ECMWF model runs, encodes selected fields into RGB
//! images and publishes them as slippy-map tile pyramids. Jobs are driven by
//! daily triggers and a persistent retry state machine; a janitor removes
//! stale issuances.

pub mod backfill;
pub mod config;
pub mod download;
pub mod ecmwf;
pub mod error;
pub mod janitor;
pub mod logging;
pub mod orchestrator;
pub mod pipeline;
pub mod planner;
pub mod scheduler;
pub mod server;
pub mod state;
pub mod tiles;

pub use config::ImporterConfig;
pub use error::{ImportError, ImportResult};
pub use orchestrator::{JobKey, JobOutcome, JobState, Orchestrator};
