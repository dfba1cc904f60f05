//! Camera pose geometry.
//!
//! Everything here is pure math on top of Bevy's `Transform`: a camera sits on a
//! sphere of fixed radius around a target point and always looks at it. The
//! scan datasets are authored Z-up, so the default world up is `+Z` and the
//! canonical "front" view looks along `+Y` from the `-Y` side of the target.

use bevy::prelude::{Quat, Transform, Vec3};

/// Scene target the scans are centered on.
pub const DEFAULT_TARGET: Vec3 = Vec3::new(0.0, 100.0, 0.0);

/// Camera distance from the target, in scene units.
pub const DEFAULT_DISTANCE: f32 = 100.0;

/// Vertical field of view in degrees.
pub const DEFAULT_FOV_DEG: f32 = 60.0;

/// World up axis of the scan datasets.
pub const WORLD_UP: Vec3 = Vec3::Z;

/// Base view direction (target to camera) of the front view.
pub const FRONT: Vec3 = Vec3::NEG_Y;

/// A named camera placement.
///
/// Orientation is not stored: it is always derived from `position`, `look_at`
/// and `up_hint` through a look-at construction, so there is no independent
/// roll degree of freedom.
#[derive(Clone, Debug, PartialEq)]
pub struct Pose {
    /// Unique name within its trajectory (used in file names and manifests)
    pub name: String,
    /// Camera position in world space
    pub position: Vec3,
    /// Point the camera looks at
    pub look_at: Vec3,
    /// World up hint used to resolve roll
    pub up_hint: Vec3,
    /// Vertical field of view in radians
    pub field_of_view: f32,
}

impl Pose {
    pub fn new(
        name: impl Into<String>,
        position: Vec3,
        look_at: Vec3,
        up_hint: Vec3,
        field_of_view: f32,
    ) -> Self {
        Self {
            name: name.into(),
            position,
            look_at,
            up_hint,
            field_of_view,
        }
    }

    /// Camera-to-world transform. The camera looks down its local `-Z` axis
    /// with local `+Y` as screen up.
    pub fn transform(&self) -> Transform {
        Transform::from_translation(self.position).looking_at(self.look_at, self.up_hint)
    }

    /// Look-at rotation toward `look_at`.
    pub fn rotation(&self) -> Quat {
        self.transform().rotation
    }

    /// Unit viewing direction (camera to target).
    pub fn forward(&self) -> Vec3 {
        (self.look_at - self.position).normalize_or_zero()
    }

    /// Distance from the camera to the point it looks at.
    pub fn distance(&self) -> f32 {
        self.position.distance(self.look_at)
    }
}

/// A camera rig orbiting a fixed target at a fixed distance.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OrbitRig {
    pub target: Vec3,
    pub distance: f32,
    pub up: Vec3,
    /// Vertical field of view in radians
    pub field_of_view: f32,
}

impl Default for OrbitRig {
    fn default() -> Self {
        Self {
            target: DEFAULT_TARGET,
            distance: DEFAULT_DISTANCE,
            up: WORLD_UP,
            field_of_view: DEFAULT_FOV_DEG.to_radians(),
        }
    }
}

impl OrbitRig {
    /// Camera position for a view direction: `target + normalize(direction) * distance`.
    ///
    /// Returns `None` for a zero or non-finite direction.
    pub fn position(&self, direction: Vec3) -> Option<Vec3> {
        direction
            .try_normalize()
            .map(|dir| self.target + dir * self.distance)
    }

    /// Build a pose looking at the rig's target from `position`.
    pub fn pose(&self, name: impl Into<String>, position: Vec3) -> Pose {
        Pose::new(name, position, self.target, self.up, self.field_of_view)
    }

    /// Rotate `base` by an elevation offset around the lateral axis
    /// (`base × up`), then by an azimuth angle around `up`.
    ///
    /// Positive elevation tilts the direction toward `up`.
    pub fn grid_direction(&self, base: Vec3, elevation_deg: f32, azimuth_deg: f32) -> Vec3 {
        let up = self.up.normalize_or_zero();
        let lateral = base.cross(up).try_normalize().unwrap_or(Vec3::X);
        let pitched = Quat::from_axis_angle(lateral, elevation_deg.to_radians()) * base;
        Quat::from_axis_angle(up, azimuth_deg.to_radians()) * pitched
    }

    /// Full elevation × azimuth cross product of view directions.
    ///
    /// Elevation is the outer loop and azimuth the inner loop, both in
    /// ascending listed order. Azimuths are evenly spaced over 360°.
    /// Each entry is `(elevation_index, azimuth_index, direction)`.
    pub fn grid_directions(
        &self,
        base: Vec3,
        elevations_deg: &[f32],
        azimuth_count: usize,
    ) -> Vec<(usize, usize, Vec3)> {
        let mut directions = Vec::with_capacity(elevations_deg.len() * azimuth_count);
        for (e, elevation) in elevations_deg.iter().enumerate() {
            for a in 0..azimuth_count {
                let azimuth = a as f32 * 360.0 / azimuth_count as f32;
                directions.push((e, a, self.grid_direction(base, *elevation, azimuth)));
            }
        }
        directions
    }
}

/// Linear interpolation between two camera positions.
pub fn lerp_position(start: Vec3, end: Vec3, t: f32) -> Vec3 {
    start.lerp(end, t)
}
