//! Foreground work for one request descriptor: fetch, decode, encode and
//! stage an image for the tile pool.
//!
//! Downloaded grid files never outlive the call, whether it succeeds or
//! not. Staged artifacts are handed to the pool, which owns their cleanup.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use field_decoder::FieldDecoder;
use forecast_common::parameter::FROZEN_FRACTION_PARAMETER_NUMBER;
use forecast_common::{FieldSelector, IssuanceTime, Model, Parameter, TileOutputPath};
use rgb_encoder::{encode, prepare_for_tiling, write_png, write_world_file, FieldInputs};
use tracing::{debug, instrument, trace};

use crate::download::Fetch;
use crate::error::{ImportError, ImportResult};
use crate::planner::RequestDescriptor;

/// A georeferenced image waiting for the tiler.
#[derive(Debug, Clone)]
pub struct StagedUnit {
    pub model: Model,
    pub tile: TileOutputPath,
    pub tile_dir: PathBuf,
    pub image: PathBuf,
    pub world_file: PathBuf,
    /// Intermediate GeoTIFF written by the warp step.
    pub warped: PathBuf,
}

impl StagedUnit {
    /// Remove every staging artifact; missing files are ignored.
    pub fn discard(&self) {
        for path in [&self.image, &self.world_file, &self.warped] {
            remove_quietly(path);
        }
        // GDAL may leave an auxiliary metadata file next to the warp input.
        remove_quietly(&aux_path(&self.image));
    }
}

fn aux_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".aux.xml");
    PathBuf::from(name)
}

fn remove_quietly(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => trace!(path = %path.display(), "Removed scratch file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => debug!(path = %path.display(), error = %e, "Failed to remove scratch file"),
    }
}

/// Grid files downloaded for one descriptor, removed on drop.
#[derive(Default)]
struct Downloads {
    paths: Vec<PathBuf>,
}

impl Downloads {
    fn track(&mut self, path: PathBuf) -> PathBuf {
        self.paths.push(path.clone());
        path
    }
}

impl Drop for Downloads {
    fn drop(&mut self) {
        for path in &self.paths {
            remove_quietly(path);
        }
    }
}

/// Local paths of the fetched grid files.
struct FetchedFiles {
    primary: PathBuf,
    previous: Option<PathBuf>,
    frozen: Option<PathBuf>,
}

pub struct Pipeline {
    fetcher: Arc<dyn Fetch>,
    decoder: Arc<dyn FieldDecoder>,
    temp_dir: PathBuf,
    tiles_root: PathBuf,
}

impl Pipeline {
    pub fn new(
        fetcher: Arc<dyn Fetch>,
        decoder: Arc<dyn FieldDecoder>,
        temp_dir: PathBuf,
        tiles_root: PathBuf,
    ) -> Self {
        Self {
            fetcher,
            decoder,
            temp_dir,
            tiles_root,
        }
    }

    /// Fetch, decode, encode and stage one descriptor.
    #[instrument(skip(self, descriptor), fields(model = %model, issuance = %issuance, parameter = %descriptor.parameter, step = descriptor.step))]
    pub async fn process(
        &self,
        model: Model,
        issuance: IssuanceTime,
        descriptor: &RequestDescriptor,
    ) -> ImportResult<StagedUnit> {
        let tile = TileOutputPath::new(model, issuance, descriptor.step, descriptor.parameter);
        let stem = tile.staging_stem();
        tokio::fs::create_dir_all(&self.temp_dir).await?;

        let mut downloads = Downloads::default();

        let frozen = match &descriptor.side_channel {
            Some(spec) => {
                let path = downloads.track(self.temp_dir.join(format!("{stem}.frozen.grib2")));
                self.fetcher.fetch(spec, &path).await?;
                Some(path)
            }
            None => None,
        };
        let previous = match &descriptor.secondary {
            Some(spec) => {
                let path = downloads.track(self.temp_dir.join(format!("{stem}.prev.grib2")));
                self.fetcher.fetch(spec, &path).await?;
                Some(path)
            }
            None => None,
        };
        let primary = downloads.track(self.temp_dir.join(format!("{stem}.grib2")));
        self.fetcher.fetch(&descriptor.primary, &primary).await?;
        debug!(stem = %stem, "Fetched grid files");

        let files = FetchedFiles {
            primary,
            previous,
            frozen,
        };
        let decoder = self.decoder.clone();
        let parameter = descriptor.parameter;
        let unit = StagedUnit {
            model,
            tile_dir: tile.under(&self.tiles_root),
            image: self.temp_dir.join(format!("{stem}.png")),
            world_file: rgb_encoder::world_file_path(&self.temp_dir.join(format!("{stem}.png"))),
            warped: self.temp_dir.join(format!("{stem}.tif")),
            tile,
        };

        let staged = tokio::task::spawn_blocking(move || {
            let inputs = decode_inputs(decoder.as_ref(), parameter, &files)?;
            let image =
                encode(parameter, &inputs).ok_or(ImportError::EncodingGap { parameter })?;
            stage(&image, unit)
        })
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))??;

        // Grid files are removed here, before the unit reaches the pool.
        drop(downloads);
        Ok(staged)
    }
}

fn decode_inputs(
    decoder: &dyn FieldDecoder,
    parameter: Parameter,
    files: &FetchedFiles,
) -> ImportResult<FieldInputs> {
    let miss = |path: &Path, selector: FieldSelector| ImportError::DecodeMiss {
        path: path.to_path_buf(),
        selector,
    };

    match parameter {
        Parameter::Wind => {
            let selectors = parameter.selectors();
            let mut fields = decoder.read_fields(&files.primary, selectors)?.into_iter();
            let u = fields.next().flatten();
            let v = fields.next().flatten();
            if u.is_none() {
                return Err(miss(&files.primary, selectors[0]));
            }
            Ok(FieldInputs::Wind { u, v })
        }
        Parameter::Precipitation => {
            let selector = parameter.selectors()[0];
            let current = decoder
                .read_field(&files.primary, selector)?
                .ok_or_else(|| miss(&files.primary, selector))?;
            let previous = match &files.previous {
                Some(path) => decoder.read_field(path, selector)?,
                None => None,
            };
            let frozen = match &files.frozen {
                Some(path) => decoder.read_field(
                    path,
                    FieldSelector::ParameterNumber(FROZEN_FRACTION_PARAMETER_NUMBER),
                )?,
                None => None,
            };
            Ok(FieldInputs::Precipitation {
                current: Some(current),
                previous,
                frozen,
            })
        }
        Parameter::Temperature
        | Parameter::Humidity
        | Parameter::Pressure
        | Parameter::CloudCover => {
            let selector = parameter.selectors()[0];
            let grid = decoder
                .read_field(&files.primary, selector)?
                .ok_or_else(|| miss(&files.primary, selector))?;
            Ok(FieldInputs::Scalar(Some(grid)))
        }
    }
}

fn stage(image: &forecast_common::EncodedImage, unit: StagedUnit) -> ImportResult<StagedUnit> {
    let result = (|| {
        let (aligned, transform) = prepare_for_tiling(image, unit.model)?;
        write_png(&aligned, &unit.image)?;
        write_world_file(&unit.image, &transform)?;
        Ok::<_, ImportError>(())
    })();

    match result {
        Ok(()) => {
            debug!(image = %unit.image.display(), "Staged image");
            Ok(unit)
        }
        Err(e) => {
            unit.discard();
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use field_decoder::DecodeResult;
    use forecast_common::RasterGrid;
    use std::sync::Mutex;
    use test_utils::constant_grid;

    use crate::planner::FetchSpec;

    /// Writes the URL into the destination so the decoder can tell files apart.
    struct EchoFetcher {
        fail_on: Option<&'static str>,
        seen: Mutex<Vec<PathBuf>>,
    }

    #[async_trait]
    impl Fetch for EchoFetcher {
        async fn fetch(&self, spec: &FetchSpec, dest: &Path) -> ImportResult<()> {
            self.seen.lock().unwrap().push(dest.to_path_buf());
            let text = spec.to_string();
            if self.fail_on.map_or(false, |f| text.contains(f)) {
                return Err(ImportError::retrieval(text, "HTTP status 404 Not Found"));
            }
            std::fs::write(dest, text)?;
            Ok(())
        }
    }

    /// Returns a constant grid unless the file's contents contain "missing".
    struct StubDecoder;

    impl FieldDecoder for StubDecoder {
        fn read_field(
            &self,
            path: &Path,
            _selector: FieldSelector,
        ) -> DecodeResult<Option<RasterGrid>> {
            let text = std::fs::read_to_string(path)?;
            if text.contains("missing") {
                return Ok(None);
            }
            Ok(Some(constant_grid(4, 2, 280.0)))
        }
    }

    fn http(url: &str) -> FetchSpec {
        FetchSpec::Http {
            url: url.to_string(),
        }
    }

    fn pipeline(dir: &Path, fetcher: Arc<EchoFetcher>) -> Pipeline {
        Pipeline::new(
            fetcher,
            Arc::new(StubDecoder),
            dir.join("tmp"),
            dir.join("tiles"),
        )
    }

    fn issuance() -> IssuanceTime {
        IssuanceTime::parse("20240301", "00").unwrap()
    }

    #[tokio::test]
    async fn test_stages_image_and_removes_downloads() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(EchoFetcher {
            fail_on: None,
            seen: Mutex::new(Vec::new()),
        });
        let descriptor = RequestDescriptor {
            parameter: Parameter::Humidity,
            step: 6,
            primary: http("http://gfs/rh"),
            secondary: None,
            side_channel: None,
        };

        let unit = pipeline(dir.path(), fetcher.clone())
            .process(Model::Gfs, issuance(), &descriptor)
            .await
            .unwrap();

        assert!(unit.image.exists());
        assert!(unit.world_file.exists());
        assert_eq!(unit.tile_dir, dir.path().join("tiles/gfs/2024030100/2024030106/rh"));
        for path in fetcher.seen.lock().unwrap().iter() {
            assert!(!path.exists(), "download {} not removed", path.display());
        }
        unit.discard();
        assert!(!unit.image.exists());
    }

    #[tokio::test]
    async fn test_missing_field_is_a_soft_miss() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(EchoFetcher {
            fail_on: None,
            seen: Mutex::new(Vec::new()),
        });
        let descriptor = RequestDescriptor {
            parameter: Parameter::Temperature,
            step: 0,
            primary: http("http://gfs/missing"),
            secondary: None,
            side_channel: None,
        };

        let err = pipeline(dir.path(), fetcher)
            .process(Model::Gfs, issuance(), &descriptor)
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::DecodeMiss { .. }));
        assert!(err.is_soft());
    }

    #[tokio::test]
    async fn test_precipitation_without_snapshot_is_encoding_gap() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(EchoFetcher {
            fail_on: None,
            seen: Mutex::new(Vec::new()),
        });
        let descriptor = RequestDescriptor {
            parameter: Parameter::Precipitation,
            step: 6,
            primary: http("http://ecmwf/tp"),
            secondary: None,
            side_channel: None,
        };

        let err = pipeline(dir.path(), fetcher)
            .process(Model::Ecmwf, issuance(), &descriptor)
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::EncodingGap { .. }));
    }

    #[tokio::test]
    async fn test_failed_secondary_still_cleans_side_channel() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(EchoFetcher {
            fail_on: Some("f003"),
            seen: Mutex::new(Vec::new()),
        });
        let descriptor = RequestDescriptor {
            parameter: Parameter::Precipitation,
            step: 6,
            primary: http("http://gfs/apcp/f006"),
            secondary: Some(http("http://gfs/apcp/f003")),
            side_channel: Some(http("http://gfs/icon/f006")),
        };

        let err = pipeline(dir.path(), fetcher.clone())
            .process(Model::Gfs, issuance(), &descriptor)
            .await
            .unwrap_err();

        assert!(matches!(err, ImportError::Retrieval { .. }));
        assert!(!err.is_soft());
        let seen = fetcher.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|p| !p.exists()));
    }
}
