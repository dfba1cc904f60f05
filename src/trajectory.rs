//! Camera trajectory generation.
//!
//! A trajectory is an ordered list of uniquely named poses around the scan
//! target. Three modes exist and a run uses exactly one of them:
//!
//! - **Orbit**: linear interpolation of the camera position between keyframe
//!   views (`top → left → bottom` by default), `sequence_{index:02}` names.
//! - **Grid**: the elevation × azimuth cross product from [`OrbitRig`],
//!   `grid_e{elevation:02}_a{azimuth:02}` names.
//! - **Fixed**: ten canonical named views.
//!
//! Order is part of the contract: manifests and image file names encode it.
//!
//! # Example
//!
//! ```ignore
//! use dental_capture::trajectory::{generate, TrajectoryConfig};
//!
//! let trajectory = generate(&TrajectoryConfig::default())?;
//! assert_eq!(trajectory.len(), 30);
//! ```

use crate::pose::{
    lerp_position, OrbitRig, Pose, DEFAULT_DISTANCE, DEFAULT_FOV_DEG, DEFAULT_TARGET, FRONT,
    WORLD_UP,
};
use bevy::prelude::Vec3;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Errors raised while generating a trajectory. All of them are configuration
/// errors and abort the run before any job starts.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TrajectoryError {
    #[error("orbit needs at least 2 samples per segment, got {0}")]
    TooFewSamples(usize),
    #[error("orbit needs at least 2 keyframes, got {0}")]
    TooFewKeyframes(usize),
    #[error("view direction for '{0}' is zero or not finite")]
    InvalidDirection(String),
    #[error("grid needs at least one elevation and one azimuth")]
    EmptyGrid,
    #[error("camera distance must be positive and finite, got {0}")]
    InvalidDistance(f32),
    #[error("field of view must be in (0, 180) degrees, got {0}")]
    InvalidFieldOfView(f32),
    #[error("duplicate view name '{0}'")]
    DuplicateName(String),
}

/// A named keyframe view direction (target to camera, need not be normalized).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Keyframe {
    pub name: String,
    pub direction: [f32; 3],
}

impl Keyframe {
    pub fn new(name: &str, direction: [f32; 3]) -> Self {
        Self {
            name: name.to_string(),
            direction,
        }
    }
}

/// Keyframe-interpolated orbit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrbitConfig {
    /// Keyframes visited in order; one segment per consecutive pair
    pub keyframes: Vec<Keyframe>,
    /// Samples per segment, `t = i / (N - 1)` (default: 15)
    pub samples_per_segment: usize,
    /// Emit the shared pivot between two segments once instead of twice
    /// (default: false, which renders both copies)
    pub merge_pivot: bool,
}

impl Default for OrbitConfig {
    fn default() -> Self {
        Self {
            keyframes: vec![
                Keyframe::new("top", [0.0, -1.0, 1.0]),
                Keyframe::new("left", [-1.0, -1.0, 0.0]),
                Keyframe::new("bottom", [0.0, -1.0, -1.0]),
            ],
            samples_per_segment: 15,
            merge_pivot: false,
        }
    }
}

impl OrbitConfig {
    /// Number of poses this orbit produces.
    pub fn pose_count(&self) -> usize {
        let segments = self.keyframes.len().saturating_sub(1);
        let frames = segments * self.samples_per_segment;
        if self.merge_pivot {
            frames.saturating_sub(segments.saturating_sub(1))
        } else {
            frames
        }
    }
}

/// Fixed spherical grid.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Elevation offsets in degrees, outer loop (default: -30, -15, 0, 15, 30)
    pub elevations_deg: Vec<f32>,
    /// Evenly spaced azimuths over 360°, inner loop (default: 8)
    pub azimuth_count: usize,
    /// Direction rotated by the grid offsets (default: front)
    pub base_direction: [f32; 3],
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            elevations_deg: vec![-30.0, -15.0, 0.0, 15.0, 30.0],
            azimuth_count: 8,
            base_direction: FRONT.to_array(),
        }
    }
}

/// Trajectory mode. Modes are never mixed within a run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TrajectoryMode {
    Orbit(OrbitConfig),
    Grid(GridConfig),
    Fixed,
}

impl TrajectoryMode {
    /// Short label recorded in manifests.
    pub fn label(&self) -> &'static str {
        match self {
            TrajectoryMode::Orbit(_) => "orbit",
            TrajectoryMode::Grid(_) => "grid",
            TrajectoryMode::Fixed => "fixed",
        }
    }
}

impl Default for TrajectoryMode {
    fn default() -> Self {
        TrajectoryMode::Orbit(OrbitConfig::default())
    }
}

/// Camera rig and trajectory mode for a run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrajectoryConfig {
    pub mode: TrajectoryMode,
    /// Point every camera looks at (default: [0, 100, 0])
    pub target: [f32; 3],
    /// Camera distance from the target (default: 100)
    pub distance: f32,
    /// Vertical field of view in degrees (default: 60)
    pub field_of_view_deg: f32,
    /// World up hint (default: +Z)
    pub world_up: [f32; 3],
}

impl Default for TrajectoryConfig {
    fn default() -> Self {
        Self {
            mode: TrajectoryMode::default(),
            target: DEFAULT_TARGET.to_array(),
            distance: DEFAULT_DISTANCE,
            field_of_view_deg: DEFAULT_FOV_DEG,
            world_up: WORLD_UP.to_array(),
        }
    }
}

impl TrajectoryConfig {
    pub fn grid() -> Self {
        Self {
            mode: TrajectoryMode::Grid(GridConfig::default()),
            ..Default::default()
        }
    }

    pub fn fixed() -> Self {
        Self {
            mode: TrajectoryMode::Fixed,
            ..Default::default()
        }
    }

    pub fn rig(&self) -> OrbitRig {
        OrbitRig {
            target: Vec3::from_array(self.target),
            distance: self.distance,
            up: Vec3::from_array(self.world_up),
            field_of_view: self.field_of_view_deg.to_radians(),
        }
    }
}

/// The ten canonical views of the capture rig, in capture order.
pub const FIXED_VIEWS: [(&str, [f32; 3]); 10] = [
    ("front", [0.0, -1.0, 0.0]),
    ("top", [0.0, -1.0, 1.0]),
    ("bottom", [0.0, -1.0, -1.0]),
    ("right", [1.0, -1.0, 0.0]),
    ("left", [-1.0, -1.0, 0.0]),
    ("front_top_right", [1.0, -1.0, 1.0]),
    ("front_top_left", [-1.0, -1.0, 1.0]),
    ("front_bottom_right", [1.0, -1.0, -1.0]),
    ("front_bottom_left", [-1.0, -1.0, -1.0]),
    ("front_slightly_up", [0.0, -1.0, 0.5]),
];

/// An ordered, uniquely named sequence of poses.
#[derive(Clone, Debug, PartialEq)]
pub struct Trajectory {
    mode: &'static str,
    poses: Vec<Pose>,
}

impl Trajectory {
    /// Wrap hand-built poses. Names must be unique.
    pub fn from_poses(mode: &'static str, poses: Vec<Pose>) -> Result<Self, TrajectoryError> {
        let mut seen = HashSet::with_capacity(poses.len());
        for pose in &poses {
            if !seen.insert(pose.name.as_str()) {
                return Err(TrajectoryError::DuplicateName(pose.name.clone()));
            }
        }
        Ok(Self { mode, poses })
    }

    /// Mode label ("orbit", "grid" or "fixed").
    pub fn mode(&self) -> &'static str {
        self.mode
    }

    pub fn poses(&self) -> &[Pose] {
        &self.poses
    }

    pub fn len(&self) -> usize {
        self.poses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.poses.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Pose> {
        self.poses.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.poses.iter().map(|p| p.name.clone()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&Pose> {
        self.poses.iter().find(|p| p.name == name)
    }
}

impl<'a> IntoIterator for &'a Trajectory {
    type Item = &'a Pose;
    type IntoIter = std::slice::Iter<'a, Pose>;

    fn into_iter(self) -> Self::IntoIter {
        self.poses.iter()
    }
}

/// Generate the trajectory described by `config`.
///
/// Output is fully deterministic for identical inputs.
pub fn generate(config: &TrajectoryConfig) -> Result<Trajectory, TrajectoryError> {
    if !(config.distance.is_finite() && config.distance > 0.0) {
        return Err(TrajectoryError::InvalidDistance(config.distance));
    }
    if !(config.field_of_view_deg > 0.0 && config.field_of_view_deg < 180.0) {
        return Err(TrajectoryError::InvalidFieldOfView(config.field_of_view_deg));
    }

    let rig = config.rig();
    let poses = match &config.mode {
        TrajectoryMode::Orbit(orbit) => orbit_poses(&rig, orbit)?,
        TrajectoryMode::Grid(grid) => grid_poses(&rig, grid)?,
        TrajectoryMode::Fixed => fixed_poses(&rig)?,
    };

    let trajectory = Trajectory::from_poses(config.mode.label(), poses)?;
    debug!(
        "Generated {} trajectory with {} poses",
        trajectory.mode(),
        trajectory.len()
    );
    Ok(trajectory)
}

fn keyframe_position(rig: &OrbitRig, name: &str, direction: [f32; 3]) -> Result<Vec3, TrajectoryError> {
    rig.position(Vec3::from_array(direction))
        .ok_or_else(|| TrajectoryError::InvalidDirection(name.to_string()))
}

fn orbit_poses(rig: &OrbitRig, orbit: &OrbitConfig) -> Result<Vec<Pose>, TrajectoryError> {
    if orbit.keyframes.len() < 2 {
        return Err(TrajectoryError::TooFewKeyframes(orbit.keyframes.len()));
    }
    let n = orbit.samples_per_segment;
    if n < 2 {
        return Err(TrajectoryError::TooFewSamples(n));
    }

    let anchors = orbit
        .keyframes
        .iter()
        .map(|k| keyframe_position(rig, &k.name, k.direction))
        .collect::<Result<Vec<_>, _>>()?;

    let mut poses = Vec::with_capacity(orbit.pose_count());
    for (segment, pair) in anchors.windows(2).enumerate() {
        let first = if orbit.merge_pivot && segment > 0 { 1 } else { 0 };
        for i in first..n {
            let t = i as f32 / (n - 1) as f32;
            let position = lerp_position(pair[0], pair[1], t);
            let name = format!("sequence_{:02}", poses.len());
            poses.push(rig.pose(name, position));
        }
    }
    Ok(poses)
}

fn grid_poses(rig: &OrbitRig, grid: &GridConfig) -> Result<Vec<Pose>, TrajectoryError> {
    if grid.elevations_deg.is_empty() || grid.azimuth_count == 0 {
        return Err(TrajectoryError::EmptyGrid);
    }
    let base = Vec3::from_array(grid.base_direction)
        .try_normalize()
        .ok_or_else(|| TrajectoryError::InvalidDirection("grid base".to_string()))?;

    rig.grid_directions(base, &grid.elevations_deg, grid.azimuth_count)
        .into_iter()
        .map(|(e, a, direction)| {
            let name = format!("grid_e{:02}_a{:02}", e, a);
            let position = rig
                .position(direction)
                .ok_or_else(|| TrajectoryError::InvalidDirection(name.clone()))?;
            Ok(rig.pose(name, position))
        })
        .collect()
}

fn fixed_poses(rig: &OrbitRig) -> Result<Vec<Pose>, TrajectoryError> {
    FIXED_VIEWS
        .iter()
        .map(|(name, direction)| Ok(rig.pose(*name, keyframe_position(rig, name, *direction)?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: Vec3, b: Vec3) -> bool {
        (a - b).length() < 1e-3
    }

    #[test]
    fn test_orbit_scenario_thirty_poses() {
        let trajectory = generate(&TrajectoryConfig::default()).unwrap();
        assert_eq!(trajectory.len(), 30);
        assert_eq!(trajectory.mode(), "orbit");

        let target = Vec3::new(0.0, 100.0, 0.0);
        let top = target + Vec3::new(0.0, -1.0, 1.0).normalize() * 100.0;
        let left = target + Vec3::new(-1.0, -1.0, 0.0).normalize() * 100.0;
        let bottom = target + Vec3::new(0.0, -1.0, -1.0).normalize() * 100.0;

        let poses = trajectory.poses();
        assert!(approx(poses[0].position, top));
        // 15th pose closes the first segment
        assert!(approx(poses[14].position, left));
        // Pivot is rendered twice
        assert!(approx(poses[15].position, left));
        assert!(approx(poses[29].position, bottom));
        assert_eq!(poses[0].name, "sequence_00");
        assert_eq!(poses[29].name, "sequence_29");
    }

    #[test]
    fn test_orbit_merge_pivot() {
        let config = TrajectoryConfig {
            mode: TrajectoryMode::Orbit(OrbitConfig {
                merge_pivot: true,
                ..Default::default()
            }),
            ..Default::default()
        };
        let trajectory = generate(&config).unwrap();
        assert_eq!(trajectory.len(), 29);
        let poses = trajectory.poses();
        assert!(!approx(poses[14].position, poses[15].position));
        assert_eq!(poses[28].name, "sequence_28");
    }

    #[test]
    fn test_orbit_pose_count_matches() {
        let mut orbit = OrbitConfig::default();
        assert_eq!(orbit.pose_count(), 30);
        orbit.merge_pivot = true;
        assert_eq!(orbit.pose_count(), 29);
    }

    #[test]
    fn test_orbit_rejects_single_sample() {
        let config = TrajectoryConfig {
            mode: TrajectoryMode::Orbit(OrbitConfig {
                samples_per_segment: 1,
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(generate(&config), Err(TrajectoryError::TooFewSamples(1)));
    }

    #[test]
    fn test_orbit_rejects_zero_keyframe() {
        let config = TrajectoryConfig {
            mode: TrajectoryMode::Orbit(OrbitConfig {
                keyframes: vec![
                    Keyframe::new("top", [0.0, -1.0, 1.0]),
                    Keyframe::new("nowhere", [0.0, 0.0, 0.0]),
                ],
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(
            generate(&config),
            Err(TrajectoryError::InvalidDirection("nowhere".to_string()))
        );
    }

    #[test]
    fn test_grid_scenario_forty_unique_poses() {
        let trajectory = generate(&TrajectoryConfig::grid()).unwrap();
        assert_eq!(trajectory.len(), 40);

        let names: HashSet<_> = trajectory.names().into_iter().collect();
        assert_eq!(names.len(), 40);

        let poses = trajectory.poses();
        for i in 0..poses.len() {
            for j in (i + 1)..poses.len() {
                assert!(
                    poses[i].position.distance(poses[j].position) > 1.0,
                    "{} and {} coincide",
                    poses[i].name,
                    poses[j].name
                );
            }
        }
    }

    #[test]
    fn test_grid_names_encode_loop_order() {
        let trajectory = generate(&TrajectoryConfig::grid()).unwrap();
        let names = trajectory.names();
        assert_eq!(names[0], "grid_e00_a00");
        assert_eq!(names[1], "grid_e00_a01");
        assert_eq!(names[8], "grid_e01_a00");
        assert_eq!(names[39], "grid_e04_a07");
    }

    #[test]
    fn test_grid_rejects_empty() {
        let config = TrajectoryConfig {
            mode: TrajectoryMode::Grid(GridConfig {
                azimuth_count: 0,
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(generate(&config), Err(TrajectoryError::EmptyGrid));
    }

    #[test]
    fn test_fixed_views() {
        let trajectory = generate(&TrajectoryConfig::fixed()).unwrap();
        assert_eq!(trajectory.len(), 10);
        assert_eq!(trajectory.names()[0], "front");
        let front = trajectory.get("front").unwrap();
        assert!(approx(front.position, Vec3::new(0.0, 0.0, 0.0)));
    }

    #[test]
    fn test_generation_is_deterministic() {
        for config in [
            TrajectoryConfig::default(),
            TrajectoryConfig::grid(),
            TrajectoryConfig::fixed(),
        ] {
            let a = generate(&config).unwrap();
            let b = generate(&config).unwrap();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_poses_look_at_target() {
        let trajectory = generate(&TrajectoryConfig::grid()).unwrap();
        for pose in &trajectory {
            assert_eq!(pose.look_at, Vec3::new(0.0, 100.0, 0.0));
            assert!((pose.distance() - 100.0).abs() < 1e-2);
        }
    }

    #[test]
    fn test_invalid_distance() {
        let config = TrajectoryConfig {
            distance: 0.0,
            ..Default::default()
        };
        assert_eq!(generate(&config), Err(TrajectoryError::InvalidDistance(0.0)));
    }

    #[test]
    fn test_mode_serde_tagged() {
        let json = r#"{"mode":"grid","azimuth_count":4}"#;
        let mode: TrajectoryMode = serde_json::from_str(json).unwrap();
        match mode {
            TrajectoryMode::Grid(grid) => {
                assert_eq!(grid.azimuth_count, 4);
                assert_eq!(grid.elevations_deg.len(), 5);
            }
            other => panic!("unexpected mode {:?}", other),
        }
        let fixed: TrajectoryMode = serde_json::from_str(r#"{"mode":"fixed"}"#).unwrap();
        assert_eq!(fixed, TrajectoryMode::Fixed);
    }
}
