//! Tile pool: turns staged images into tile pyramids with the GDAL tools.
//!
//! Units run concurrently up to a fixed number of permits. A unit's
//! outcome is logged and counted but never propagated; one failing unit
//! does not affect its siblings or the job that submitted it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, error, info};

use crate::error::{ImportError, ImportResult};
use crate::pipeline::StagedUnit;

/// External tiling tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TilerConfig {
    pub gdalwarp: String,
    pub gdal2tiles: String,
    pub zoom_levels: String,
    pub resampling: String,
    /// Pool size; defaults to the number of CPUs.
    pub workers: Option<usize>,
    /// How long shutdown waits for in-flight units.
    pub drain_timeout_secs: u64,
}

impl Default for TilerConfig {
    fn default() -> Self {
        Self {
            gdalwarp: "gdalwarp".to_string(),
            gdal2tiles: "gdal2tiles.py".to_string(),
            zoom_levels: "0-3".to_string(),
            resampling: "bilinear".to_string(),
            workers: None,
            drain_timeout_secs: 300,
        }
    }
}

impl TilerConfig {
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(num_cpus::get).max(1)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    fn warp_args(&self, unit: &StagedUnit) -> Vec<String> {
        vec![
            "-q".into(),
            "-overwrite".into(),
            "-s_srs".into(),
            "EPSG:4326".into(),
            "-t_srs".into(),
            "EPSG:4326".into(),
            "-r".into(),
            self.resampling.clone(),
            "-of".into(),
            "GTiff".into(),
            unit.image.display().to_string(),
            unit.warped.display().to_string(),
        ]
    }

    fn tiles_args(&self, unit: &StagedUnit) -> Vec<String> {
        vec![
            "-z".into(),
            self.zoom_levels.clone(),
            "-w".into(),
            "none".into(),
            "-n".into(),
            "-r".into(),
            self.resampling.clone(),
            unit.warped.display().to_string(),
            unit.tile_dir.display().to_string(),
        ]
    }
}

/// Produces the tile tree for one staged unit.
#[async_trait]
pub trait TileGenerator: Send + Sync {
    async fn generate(&self, unit: &StagedUnit) -> ImportResult<()>;
}

/// `gdalwarp` to a GeoTIFF, then `gdal2tiles.py` into the tile directory.
pub struct GdalTiler {
    config: TilerConfig,
}

impl GdalTiler {
    pub fn new(config: TilerConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl TileGenerator for GdalTiler {
    async fn generate(&self, unit: &StagedUnit) -> ImportResult<()> {
        tokio::fs::create_dir_all(&unit.tile_dir).await?;
        run_tool(&self.config.gdalwarp, &self.config.warp_args(unit)).await?;
        run_tool(&self.config.gdal2tiles, &self.config.tiles_args(unit)).await?;
        Ok(())
    }
}

async fn run_tool(program: &str, args: &[String]) -> ImportResult<()> {
    debug!(program, args = ?args, "Running tiling tool");
    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| ImportError::Tiling(format!("failed to start {program}: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ImportError::Tiling(format!(
            "{program} exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }
    Ok(())
}

/// Decrements the in-flight count even if the unit panics.
struct InFlight {
    count: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let remaining = self.count.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::gauge!("importer_tile_units_in_flight").set(remaining as f64);
        if remaining == 0 {
            self.idle.notify_waiters();
        }
    }
}

/// Bounded pool of tiling units.
pub struct TilePool {
    generator: Arc<dyn TileGenerator>,
    permits: Arc<Semaphore>,
    workers: usize,
    in_flight: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl TilePool {
    pub fn new(generator: Arc<dyn TileGenerator>, workers: usize) -> Self {
        let workers = workers.max(1);
        info!(workers, "Created tile pool");
        Self {
            generator,
            permits: Arc::new(Semaphore::new(workers)),
            workers,
            in_flight: Arc::new(AtomicUsize::new(0)),
            idle: Arc::new(Notify::new()),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Units submitted and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Queue a unit. Returns immediately; the pool owns the unit's artifacts.
    pub fn submit(&self, unit: StagedUnit) {
        let count = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::gauge!("importer_tile_units_in_flight").set(count as f64);

        let guard = InFlight {
            count: self.in_flight.clone(),
            idle: self.idle.clone(),
        };
        let permits = self.permits.clone();
        let generator = self.generator.clone();

        tokio::spawn(async move {
            let _guard = guard;
            // The semaphore is never closed, so acquisition only fails if
            // the pool is gone; the unit still gets cleaned up.
            let _permit = permits.acquire_owned().await.ok();

            let result = generator.generate(&unit).await;
            unit.discard();

            match result {
                Ok(()) => {
                    info!(tile_dir = %unit.tile_dir.display(), "Generated tiles");
                    metrics::counter!("importer_tile_units_total", "outcome" => "ok").increment(1);
                }
                Err(e) => {
                    error!(tile_dir = %unit.tile_dir.display(), error = %e, "Tile generation failed");
                    metrics::counter!("importer_tile_units_total", "outcome" => "failed")
                        .increment(1);
                }
            }
        });
    }

    /// Wait until every submitted unit has finished.
    pub async fn drain(&self) {
        loop {
            let notified = self.idle.notified();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Like [`TilePool::drain`], but gives up after `limit`.
    ///
    /// Returns `false` if units were still running when the limit expired.
    pub async fn drain_timeout(&self, limit: Duration) -> bool {
        tokio::time::timeout(limit, self.drain()).await.is_ok()
    }
}
