//! Camera manifest: every camera of a trajectory in one JSON file.
//!
//! The manifest is written once per run, before any rendering, to
//! `<output>/cameras/sequence_{N}.json` where `N` is the trajectory length.
//! Cameras are keyed by view name; `metadata.view_order` keeps the trajectory
//! order, which file names and video reconstruction rely on.

use crate::camera::{self, CameraConfig, CameraError, CameraParameters};
use crate::trajectory::Trajectory;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const MANIFEST_VERSION: &str = "1.0";
/// Sub-directory of the output root holding manifests.
pub const CAMERAS_DIR: &str = "cameras";

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("invalid camera configuration: {0}")]
    Camera(#[from] CameraError),
    #[error("manifest I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("manifest JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Run-wide camera settings stored alongside the cameras.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub version: String,
    pub resolution: [u32; 2],
    pub pixel_aspect: [f64; 2],
    /// Projection convention of `projection_matrix`
    pub convention: String,
    /// Number of cameras written
    pub view_count: usize,
    pub view_order: Vec<String>,
    pub field_of_view_deg: f64,
    pub clip: [f64; 2],
    pub trajectory: String,
    /// Poses dropped because their extrinsics were degenerate
    #[serde(default)]
    pub skipped_views: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraManifest {
    pub metadata: ManifestMetadata,
    pub cameras: BTreeMap<String, CameraParameters>,
}

impl CameraManifest {
    /// Extract parameters for every pose.
    ///
    /// A pose with degenerate extrinsics is skipped with a warning. Invalid
    /// lens settings fail the whole manifest, since they affect every pose.
    pub fn build(trajectory: &Trajectory, config: &CameraConfig) -> Result<Self, ManifestError> {
        let mut cameras = BTreeMap::new();
        let mut view_order = Vec::with_capacity(trajectory.len());
        let mut skipped_views = Vec::new();

        for pose in trajectory {
            match camera::extract(pose, config) {
                Ok(params) => {
                    view_order.push(pose.name.clone());
                    cameras.insert(pose.name.clone(), params);
                }
                Err(e @ (CameraError::Degenerate { .. } | CameraError::NonFinite(_))) => {
                    warn!("Skipping camera '{}': {}", pose.name, e);
                    skipped_views.push(pose.name.clone());
                }
                Err(e) => return Err(e.into()),
            }
        }

        let field_of_view_deg = trajectory
            .poses()
            .first()
            .map(|p| (p.field_of_view as f64).to_degrees())
            .unwrap_or_default();

        Ok(Self {
            metadata: ManifestMetadata {
                version: MANIFEST_VERSION.to_string(),
                resolution: [config.resolution.width, config.resolution.height],
                pixel_aspect: config.pixel_aspect,
                convention: "opengl".to_string(),
                view_count: view_order.len(),
                view_order,
                field_of_view_deg,
                clip: [config.clip_start, config.clip_end],
                trajectory: trajectory.mode().to_string(),
                skipped_views,
            },
            cameras,
        })
    }

    /// File name for a trajectory of `trajectory_len` poses.
    pub fn file_name(trajectory_len: usize) -> String {
        format!("sequence_{}.json", trajectory_len)
    }

    /// Length of the trajectory this manifest was built from.
    pub fn trajectory_len(&self) -> usize {
        self.metadata.view_count + self.metadata.skipped_views.len()
    }

    pub fn get(&self, view_name: &str) -> Option<&CameraParameters> {
        self.cameras.get(view_name)
    }

    /// Cameras in trajectory order.
    pub fn ordered(&self) -> impl Iterator<Item = &CameraParameters> {
        self.metadata
            .view_order
            .iter()
            .filter_map(|name| self.cameras.get(name))
    }

    /// Write under `<output_root>/cameras/` and return the file path.
    pub fn save(&self, output_root: &Path) -> Result<PathBuf, ManifestError> {
        let dir = output_root.join(CAMERAS_DIR);
        fs::create_dir_all(&dir).map_err(|source| ManifestError::Io {
            path: dir.clone(),
            source,
        })?;
        let path = dir.join(Self::file_name(self.trajectory_len()));
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json).map_err(|source| ManifestError::Io {
            path: path.clone(),
            source,
        })?;
        info!(
            "Saved {} cameras to {}",
            self.metadata.view_count,
            path.display()
        );
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let json = fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&json)?)
    }
}
