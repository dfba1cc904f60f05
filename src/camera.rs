//! Pinhole camera parameters derived from poses.
//!
//! Two conventions live side by side here and are kept apart on purpose:
//!
//! - the **pixel-space intrinsic matrix** `K` (`fx`, `fy`, `cx`, `cy`) with
//!   image `y` pointing down, and
//! - the **clip-space projection matrix** (OpenGL, right-handed, depth mapped
//!   to NDC `[-1, 1]`) built from the vertical field of view, aspect ratio and
//!   clip distances.
//!
//! Extrinsics follow the camera convention of [`Pose::transform`]: the camera
//! looks down its local `-Z` axis with `+Y` up. All math is done in `f64`.

use crate::pose::Pose;
use crate::Resolution;
use bevy::math::{DMat3, DMat4, DVec3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while deriving camera parameters for one pose.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CameraError {
    #[error("camera-to-world matrix of '{view}' is not invertible (det = {determinant})")]
    Degenerate { view: String, determinant: f64 },
    #[error("camera parameters of '{0}' are not finite")]
    NonFinite(String),
    #[error("invalid clip range [{near}, {far}]")]
    InvalidClip { near: f64, far: f64 },
    #[error("field of view must be in (0, pi) radians, got {0}")]
    InvalidFieldOfView(f64),
}

/// Sensor and lens settings shared by every camera of a run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Output image size (default: 512x512)
    pub resolution: Resolution,
    /// Pixel aspect ratio [x, y] (default: [1, 1])
    pub pixel_aspect: [f64; 2],
    /// Lens shift [x, y] in fractions of the larger image dimension (default: [0, 0])
    pub lens_shift: [f64; 2],
    /// Near clip distance (default: 0.1)
    pub clip_start: f64,
    /// Far clip distance (default: 1000)
    pub clip_end: f64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            resolution: Resolution::new(512, 512),
            pixel_aspect: [1.0, 1.0],
            lens_shift: [0.0, 0.0],
            clip_start: 0.1,
            clip_end: 1000.0,
        }
    }
}

impl CameraConfig {
    /// Display aspect ratio including the pixel aspect.
    pub fn aspect_ratio(&self) -> f64 {
        (self.resolution.width as f64 * self.pixel_aspect[0])
            / (self.resolution.height as f64 * self.pixel_aspect[1])
    }
}

/// Pinhole intrinsics in pixel units.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    /// Vertical field of view in radians
    pub fov: f64,
    /// `[[fx, 0, cx], [0, fy, cy], [0, 0, 1]]`, row-major
    pub k: [[f64; 3]; 3],
}

impl Intrinsics {
    /// Project a camera-space point (camera looking down `-Z`) to pixel
    /// coordinates. Returns `None` for points on or behind the image plane.
    pub fn project(&self, point: DVec3) -> Option<[f64; 2]> {
        let depth = -point.z;
        if depth <= 0.0 {
            return None;
        }
        Some([
            self.fx * point.x / depth + self.cx,
            self.cy - self.fy * point.y / depth,
        ])
    }

    /// Camera-space point at `depth` along the ray through `pixel`.
    pub fn unproject(&self, pixel: [f64; 2], depth: f64) -> DVec3 {
        DVec3::new(
            (pixel[0] - self.cx) / self.fx * depth,
            (self.cy - pixel[1]) / self.fy * depth,
            -depth,
        )
    }
}

/// Camera pose as matrices. `world_to_camera` is the exact inverse of
/// `cam_to_world`; `rotation` and `translation` are its `R` and `t`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Extrinsics {
    pub cam_to_world: [[f64; 4]; 4],
    pub world_to_camera: [[f64; 4]; 4],
    pub rotation: [[f64; 3]; 3],
    pub translation: [f64; 3],
}

/// Everything needed to reproduce one camera of a trajectory.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraParameters {
    pub view_name: String,
    /// Camera position in world space
    pub position: [f64; 3],
    pub intrinsic: Intrinsics,
    pub extrinsic: Extrinsics,
    /// World-to-camera view matrix, row-major
    pub view_matrix: [[f64; 4]; 4],
    /// OpenGL perspective projection, row-major
    pub projection_matrix: [[f64; 4]; 4],
    pub clip_start: f64,
    pub clip_end: f64,
}

impl CameraParameters {
    pub fn cam_to_world_matrix(&self) -> DMat4 {
        from_rows4(&self.extrinsic.cam_to_world)
    }

    pub fn world_to_camera_matrix(&self) -> DMat4 {
        from_rows4(&self.extrinsic.world_to_camera)
    }

    pub fn projection(&self) -> DMat4 {
        from_rows4(&self.projection_matrix)
    }

    /// Same camera with a different clip range. The projection matrix is
    /// rebuilt; intrinsics and extrinsics are unaffected.
    pub fn with_clip(&self, clip_start: f64, clip_end: f64) -> Result<Self, CameraError> {
        // perspective_rh_gl stores f / aspect and f on the diagonal
        let aspect = self.projection_matrix[1][1] / self.projection_matrix[0][0];
        let projection = projection_matrix(self.intrinsic.fov, aspect, clip_start, clip_end)?;
        Ok(Self {
            projection_matrix: rows4(&projection),
            clip_start,
            clip_end,
            ..self.clone()
        })
    }
}

/// Pixel-space intrinsics for a vertical field of view.
///
/// `focal = (height / 2) / tan(fov / 2)`, `fx = focal / pixel_aspect_x`,
/// `fy = focal / pixel_aspect_y`. The principal point is the image center
/// moved by the lens shift (scaled by the larger dimension, `y` flipped).
pub fn intrinsics(config: &CameraConfig, fov: f64) -> Result<Intrinsics, CameraError> {
    if !(fov > 0.0 && fov < std::f64::consts::PI) {
        return Err(CameraError::InvalidFieldOfView(fov));
    }
    let width = config.resolution.width as f64;
    let height = config.resolution.height as f64;
    let focal = (height / 2.0) / (fov / 2.0).tan();
    let fx = focal / config.pixel_aspect[0];
    let fy = focal / config.pixel_aspect[1];
    let max_dim = width.max(height);
    let cx = width / 2.0 + config.lens_shift[0] * max_dim;
    let cy = height / 2.0 - config.lens_shift[1] * max_dim;

    Ok(Intrinsics {
        fx,
        fy,
        cx,
        cy,
        fov,
        k: [[fx, 0.0, cx], [0.0, fy, cy], [0.0, 0.0, 1.0]],
    })
}

/// Extrinsics of a pose.
pub fn extrinsics(pose: &Pose) -> Result<Extrinsics, CameraError> {
    let cam_to_world = pose.transform().compute_matrix().as_dmat4();
    if !cam_to_world.is_finite() {
        return Err(CameraError::NonFinite(pose.name.clone()));
    }
    let determinant = cam_to_world.determinant();
    if !determinant.is_finite() || determinant.abs() < 1e-12 {
        return Err(CameraError::Degenerate {
            view: pose.name.clone(),
            determinant,
        });
    }
    let world_to_camera = cam_to_world.inverse();
    if !world_to_camera.is_finite() {
        return Err(CameraError::NonFinite(pose.name.clone()));
    }

    let rotation = DMat3::from_mat4(world_to_camera);
    let translation = world_to_camera.w_axis.truncate();

    Ok(Extrinsics {
        cam_to_world: rows4(&cam_to_world),
        world_to_camera: rows4(&world_to_camera),
        rotation: rotation.transpose().to_cols_array_2d(),
        translation: translation.to_array(),
    })
}

/// OpenGL right-handed perspective projection (vertical FOV, NDC depth in `[-1, 1]`).
pub fn projection_matrix(fov: f64, aspect: f64, near: f64, far: f64) -> Result<DMat4, CameraError> {
    if !(near > 0.0 && far > near && far.is_finite()) {
        return Err(CameraError::InvalidClip { near, far });
    }
    if !(fov > 0.0 && fov < std::f64::consts::PI) {
        return Err(CameraError::InvalidFieldOfView(fov));
    }
    Ok(DMat4::perspective_rh_gl(fov, aspect, near, far))
}

/// Full parameter record for one pose.
pub fn extract(pose: &Pose, config: &CameraConfig) -> Result<CameraParameters, CameraError> {
    let fov = pose.field_of_view as f64;
    let intrinsic = intrinsics(config, fov)?;
    let extrinsic = extrinsics(pose)?;
    let projection = projection_matrix(fov, config.aspect_ratio(), config.clip_start, config.clip_end)?;

    Ok(CameraParameters {
        view_name: pose.name.clone(),
        position: pose.position.as_dvec3().to_array(),
        view_matrix: extrinsic.world_to_camera,
        intrinsic,
        extrinsic,
        projection_matrix: rows4(&projection),
        clip_start: config.clip_start,
        clip_end: config.clip_end,
    })
}

/// Row-major nested array of a column-major matrix.
pub fn rows4(m: &DMat4) -> [[f64; 4]; 4] {
    m.transpose().to_cols_array_2d()
}

pub fn from_rows4(rows: &[[f64; 4]; 4]) -> DMat4 {
    DMat4::from_cols_array_2d(rows).transpose()
}
