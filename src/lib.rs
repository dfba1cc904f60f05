//! dental-capture: multi-view capture of synthetic dental-scan datasets
//!
//! Each case of a dataset (one `.obj` mesh plus per-vertex gum/tooth labels)
//! is rendered from a fixed camera trajectory in several modalities: lit,
//! unlit segmentation, matte, depth, normal and curvature. Camera intrinsics
//! and extrinsics for every view are written once to a JSON manifest.
//!
//! # Pipeline
//!
//! ```ignore
//! use dental_capture::{
//!     batch::BatchScheduler, context::RenderContext, dataset::Dataset,
//!     executor::PassExecutor, manifest::CameraManifest, raster::SoftwareRenderer,
//!     trajectory::generate, CaptureConfig,
//! };
//!
//! let config = CaptureConfig::default();
//! let trajectory = generate(&config.trajectory)?;
//! let manifest = CameraManifest::build(&trajectory, &config.render.camera)?;
//! manifest.save(&config.dataset.output_root())?;
//!
//! let dataset = Dataset::discover(&config.dataset)?;
//! // ... negotiate, build a RenderContext and a PassExecutor, then:
//! let summary = scheduler.run(&mut ctx)?;
//! ```
//!
//! # Modules
//!
//! - [`pose`], [`trajectory`]: camera poses and the orbit/grid/fixed rigs
//! - [`camera`], [`manifest`]: pinhole parameters and their JSON manifest
//! - [`context`], [`backend`]: the renderer boundary, settings stack and
//!   capability negotiation
//! - [`modality`], [`executor`], [`postprocess`], [`encode`]: one render pass
//!   from material binding to the file on disk
//! - [`dataset`], [`mesh`], [`batch`]: case discovery, loading and scheduling
//! - [`raster`]: a CPU renderer implementing the boundary

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod backend;
pub mod batch;
pub mod camera;
pub mod context;
pub mod dataset;
pub mod encode;
pub mod executor;
pub mod manifest;
pub mod mesh;
pub mod modality;
pub mod pose;
pub mod postprocess;
pub mod raster;
pub mod trajectory;

pub use bevy::prelude::{Quat, Transform, Vec3};

use backend::Device;
use camera::CameraConfig;
use context::LightState;
use dataset::DatasetConfig;
use modality::{RenderModality, DEFAULT_CURVATURE_EXPONENT};
use trajectory::TrajectoryConfig;

/// Image size in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write config {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Serialize(#[from] serde_json::Error),
}

/// Path tracer sampling and device settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Samples per pixel (default: 64)
    pub samples: u32,
    /// Run the denoiser (default: true)
    pub denoise: bool,
    /// Adaptive sampling noise threshold (default: 0.01)
    pub adaptive_threshold: f32,
    /// Minimum samples before adaptive sampling stops a pixel (default: 32)
    pub adaptive_min_samples: u32,
    /// Maximum light bounces (default: 8)
    pub max_bounces: u32,
    /// Trace caustics (default: false)
    pub caustics: bool,
    /// Render tile edge in pixels (default: 256)
    pub tile_size: u32,
    /// Preferred compute device (default: GPU)
    pub device: Device,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self::optimized()
    }
}

impl SamplingConfig {
    /// Denoised 64-sample renders for bulk dataset generation.
    pub fn optimized() -> Self {
        Self {
            samples: 64,
            denoise: true,
            adaptive_threshold: 0.01,
            adaptive_min_samples: 32,
            max_bounces: 8,
            caustics: false,
            tile_size: 256,
            device: Device::Gpu,
        }
    }

    /// Slower, higher-quality settings.
    pub fn reference() -> Self {
        Self {
            samples: 128,
            adaptive_min_samples: 64,
            max_bounces: 12,
            caustics: true,
            tile_size: 512,
            ..Self::optimized()
        }
    }
}

/// The sun light parented to the camera.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LightConfig {
    /// Sun strength (default: 5.0)
    pub energy: f32,
    /// Shadow casting (default: true)
    pub cast_shadows: bool,
}

impl Default for LightConfig {
    fn default() -> Self {
        Self {
            energy: 5.0,
            cast_shadows: true,
        }
    }
}

impl LightConfig {
    pub fn to_state(&self) -> LightState {
        LightState {
            energy: self.energy,
            cast_shadows: self.cast_shadows,
        }
    }
}

/// Sensor settings plus the output encoding switch.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    #[serde(flatten)]
    pub camera: CameraConfig,
    /// Write depth and normal as 32-bit OpenEXR instead of 16-bit PNG (default: false)
    pub float_passes: bool,
}

/// Everything a capture run needs.
///
/// # Example
///
/// ```ignore
/// use dental_capture::CaptureConfig;
///
/// let mut config = CaptureConfig::load("capture.json")?;
/// config.dataset.start_case = 10;
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub dataset: DatasetConfig,
    pub trajectory: TrajectoryConfig,
    pub render: RenderConfig,
    pub sampling: SamplingConfig,
    pub light: LightConfig,
    /// Enabled modalities (default: all six)
    pub modalities: Vec<RenderModality>,
    /// Exponent applied to pointiness by the curvature material (default: 2.9)
    pub curvature_exponent: f32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self::optimized()
    }
}

impl CaptureConfig {
    pub fn optimized() -> Self {
        Self {
            dataset: DatasetConfig::default(),
            trajectory: TrajectoryConfig::default(),
            render: RenderConfig::default(),
            sampling: SamplingConfig::optimized(),
            light: LightConfig::default(),
            modalities: RenderModality::ALL.to_vec(),
            curvature_exponent: DEFAULT_CURVATURE_EXPONENT,
        }
    }

    pub fn reference() -> Self {
        Self {
            sampling: SamplingConfig::reference(),
            ..Self::optimized()
        }
    }

    /// Read a JSON config; missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Images a run over `cases` cases will produce with `views` cameras.
    pub fn total_images(&self, cases: usize, views: usize) -> usize {
        cases * RenderModality::canonical(&self.modalities).len() * views
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_optimized_defaults() {
        let config = CaptureConfig::default();
        assert_eq!(config.render.camera.resolution, Resolution::new(512, 512));
        assert_eq!(config.sampling.samples, 64);
        assert_eq!(config.sampling.adaptive_min_samples, 32);
        assert!(!config.sampling.caustics);
        assert_eq!(config.light.energy, 5.0);
        assert_eq!(config.modalities.len(), 6);
        assert_eq!(config.curvature_exponent, 2.9);
        assert!(!config.render.float_passes);
    }

    #[test]
    fn test_reference_preset() {
        let config = CaptureConfig::reference();
        assert_eq!(config.sampling.samples, 128);
        assert_eq!(config.sampling.adaptive_min_samples, 64);
        assert_eq!(config.sampling.max_bounces, 12);
        assert!(config.sampling.caustics);
        assert_eq!(config.sampling.tile_size, 512);
        assert_eq!(config.sampling.adaptive_threshold, 0.01);
        assert_eq!(config.trajectory, CaptureConfig::optimized().trajectory);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: CaptureConfig = serde_json::from_str(
            r#"{
                "dataset": { "root": "/data/scans", "start_case": 3 },
                "render": { "resolution": { "width": 256, "height": 128 }, "float_passes": true },
                "modalities": ["depth", "unlit"]
            }"#,
        )
        .unwrap();
        assert_eq!(config.dataset.root, PathBuf::from("/data/scans"));
        assert_eq!(config.dataset.start_case, 3);
        assert_eq!(config.dataset.end_case, None);
        assert_eq!(config.render.camera.resolution, Resolution::new(256, 128));
        assert_eq!(config.render.camera.clip_end, 1000.0);
        assert!(config.render.float_passes);
        assert_eq!(config.modalities, [RenderModality::Depth, RenderModality::Unlit]);
        assert_eq!(config.sampling, SamplingConfig::optimized());
    }

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("capture.json");
        let mut config = CaptureConfig::reference();
        config.dataset.reverse = true;
        config.trajectory = TrajectoryConfig::grid();
        config.save(&path).unwrap();
        assert_eq!(CaptureConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_load_errors() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            CaptureConfig::load(temp.path().join("missing.json")),
            Err(ConfigError::Read { .. })
        ));
        let bad = temp.path().join("bad.json");
        fs::write(&bad, "{ not json").unwrap();
        assert!(matches!(CaptureConfig::load(&bad), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_total_images() {
        let mut config = CaptureConfig::default();
        assert_eq!(config.total_images(2, 10), 120);
        config.modalities = vec![RenderModality::Lit, RenderModality::Lit];
        assert_eq!(config.total_images(2, 10), 20);
    }

    #[test]
    fn test_light_state() {
        let state = LightConfig::default().to_state();
        assert_eq!(state.energy, 5.0);
        assert!(state.cast_shadows);
    }

    #[test]
    fn test_resolution() {
        let res = Resolution::new(640, 480);
        assert_eq!(res.pixel_count(), 307_200);
        assert_eq!(res.to_string(), "640x480");
    }
}
