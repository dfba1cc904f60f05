//! Headless CPU renderer.
//!
//! A z-buffered triangle rasterizer that implements [`Renderer`] so the whole
//! pipeline can run without a production renderer. It only offers the
//! rasterizer engine; capability negotiation routes path-traced modalities to
//! it with a warning.
//!
//! # Shading
//!
//! - **Emission**: flat preset color, used for segmentation output
//! - **Principled**: ambient term plus Lambert and Blinn-Phong lobes from a
//!   sun parented to the camera (so it always lights from the viewer)
//! - **Curvature**: per-vertex pointiness raised to the preset exponent and
//!   mapped through the preset's color ramp
//!
//! Because the sun sits at the camera, shadows are never visible from the
//! camera and `cast_shadows` has no effect on the image.
//!
//! # Passes
//!
//! - **Depth**: distance along the camera's viewing axis, `INFINITY` on background
//! - **Normal**: world-space shading normal facing the camera, zero on background

use crate::backend::Capabilities;
use crate::camera::CameraParameters;
use crate::context::{
    AuxPasses, Engine, LightState, RenderedFrame, Renderer, RendererError, ViewTransform,
};
use crate::mesh::{Mesh, TOOTH_SLOT};
use crate::modality::{MaterialPreset, Shading};
use crate::{Resolution, SamplingConfig};
use bevy::math::DVec3;
use bevy::prelude::Vec3;
use log::debug;
use std::collections::HashSet;
use std::f32::consts::PI;

/// Fraction of the base color visible without direct light.
const AMBIENT: f32 = 0.15;
/// Radiance per unit of sun energy.
const SUN_SCALE: f32 = 0.16;

/// Counters for inspecting renderer use.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RendererStats {
    pub configures: usize,
    pub renders: usize,
    pub reclaims: usize,
}

/// Mesh data prepared for rasterization.
#[derive(Clone, Debug)]
struct PreparedMesh {
    vertices: Vec<Vec3>,
    normals: Vec<Vec3>,
    pointiness: Vec<f32>,
    triangles: Vec<([u32; 3], u8)>,
}

impl PreparedMesh {
    fn new(mesh: &Mesh) -> Self {
        let triangles: Vec<_> = mesh.triangles().collect();
        let normals = vertex_normals(&mesh.vertices, &triangles);
        let pointiness = pointiness(mesh, &normals);
        Self {
            vertices: mesh.vertices.clone(),
            normals,
            pointiness,
            triangles,
        }
    }
}

/// Area-weighted vertex normals.
pub fn vertex_normals(vertices: &[Vec3], triangles: &[([u32; 3], u8)]) -> Vec<Vec3> {
    let mut normals = vec![Vec3::ZERO; vertices.len()];
    for ([a, b, c], _) in triangles {
        let (a, b, c) = (*a as usize, *b as usize, *c as usize);
        let (Some(pa), Some(pb), Some(pc)) = (vertices.get(a), vertices.get(b), vertices.get(c))
        else {
            continue;
        };
        let face = (*pb - *pa).cross(*pc - *pa);
        normals[a] += face;
        normals[b] += face;
        normals[c] += face;
    }
    normals.iter().map(|n| n.normalize_or_zero()).collect()
}

/// Per-vertex pointiness in `[0, 1]`: 0.5 on flat surfaces, higher on
/// convex features, lower in cavities.
///
/// Angle between the vertex normal and the mean direction of its edges,
/// divided by pi.
pub fn pointiness(mesh: &Mesh, normals: &[Vec3]) -> Vec<f32> {
    let mut edges = HashSet::new();
    for polygon in &mesh.polygons {
        let n = polygon.vertices.len();
        for i in 0..n {
            let (a, b) = (polygon.vertices[i], polygon.vertices[(i + 1) % n]);
            if a != b {
                edges.insert((a.min(b), a.max(b)));
            }
        }
    }

    let mut accum = vec![Vec3::ZERO; mesh.vertices.len()];
    for (a, b) in edges {
        let (a, b) = (a as usize, b as usize);
        let (Some(pa), Some(pb)) = (mesh.vertices.get(a), mesh.vertices.get(b)) else {
            continue;
        };
        let dir = (*pb - *pa).normalize_or_zero();
        accum[a] += dir;
        accum[b] -= dir;
    }

    accum
        .iter()
        .zip(normals)
        .map(|(edge, normal)| match edge.try_normalize() {
            Some(edge) if *normal != Vec3::ZERO => normal.dot(edge).clamp(-1.0, 1.0).acos() / PI,
            _ => 0.5,
        })
        .collect()
}

/// Approximate filmic tone curve.
fn filmic(v: f32) -> f32 {
    let v = v.max(0.0);
    ((v * (2.51 * v + 0.03)) / (v * (2.43 * v + 0.59) + 0.14)).clamp(0.0, 1.0)
}

/// CPU rasterizer offering the rasterizer engine only.
#[derive(Clone, Debug)]
pub struct SoftwareRenderer {
    engine: Option<Engine>,
    resolution: Resolution,
    mesh: Option<PreparedMesh>,
    materials: Option<[MaterialPreset; 2]>,
    camera: Option<CameraParameters>,
    light: LightState,
    view_transform: ViewTransform,
    passes: AuxPasses,
    stats: RendererStats,
}

impl Default for SoftwareRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareRenderer {
    pub fn new() -> Self {
        Self {
            engine: None,
            resolution: Resolution::new(512, 512),
            mesh: None,
            materials: None,
            camera: None,
            light: LightState {
                energy: 5.0,
                cast_shadows: true,
            },
            view_transform: ViewTransform::default(),
            passes: AuxPasses::NONE,
            stats: RendererStats::default(),
        }
    }

    pub fn stats(&self) -> RendererStats {
        self.stats
    }

    fn shade(&self, slot: u8, normal: Vec3, view_dir: Vec3, pointiness: f32) -> [f32; 3] {
        let Some(materials) = &self.materials else {
            // unbound slots render as plain gray
            return [0.8; 3];
        };
        let preset = if slot == TOOTH_SLOT {
            &materials[1]
        } else {
            &materials[0]
        };

        match &preset.shading {
            Shading::Emission { color, strength } => color.map(|c| c * strength),
            Shading::Curvature { exponent, ramp } => ramp.eval(pointiness.max(0.0).powf(*exponent)),
            Shading::Principled {
                base_color,
                roughness,
                coat,
                ..
            } => {
                // sun at the camera: light, view and half vector coincide
                let n_dot_l = normal.dot(view_dir).max(0.0);
                let sun = self.light.energy * SUN_SCALE;
                let shininess = 2.0 / (roughness * roughness).max(1e-3);
                let specular = n_dot_l.powf(shininess) * 0.04 + coat * n_dot_l.powf(400.0) * 0.04;
                base_color.map(|c| c * (AMBIENT + sun * n_dot_l) + sun * specular)
            }
        }
    }

    fn display(&self, color: [f32; 3]) -> [f32; 3] {
        match self.view_transform {
            ViewTransform::Filmic => color.map(filmic),
            ViewTransform::Standard => color.map(|c| c.clamp(0.0, 1.0)),
        }
    }
}

/// A vertex in camera space and pixel coordinates.
#[derive(Clone, Copy)]
struct Projected {
    x: f32,
    y: f32,
    depth: f32,
}

impl Renderer for SoftwareRenderer {
    fn capabilities(&self) -> Capabilities {
        Capabilities::raster_only()
    }

    fn configure(
        &mut self,
        engine: Engine,
        resolution: Resolution,
        _sampling: &SamplingConfig,
    ) -> Result<(), RendererError> {
        if engine == Engine::PathTracer {
            return Err(RendererError::EngineUnavailable(engine));
        }
        if resolution.pixel_count() == 0 {
            return Err(RendererError::NotReady(format!(
                "invalid resolution {}x{}",
                resolution.width, resolution.height
            )));
        }
        self.engine = Some(engine);
        self.resolution = resolution;
        self.stats.configures += 1;
        Ok(())
    }

    fn load_mesh(&mut self, mesh: &Mesh) -> Result<(), RendererError> {
        self.mesh = Some(PreparedMesh::new(mesh));
        self.materials = None;
        Ok(())
    }

    fn bind_materials(
        &mut self,
        gum: &MaterialPreset,
        tooth: &MaterialPreset,
    ) -> Result<(), RendererError> {
        self.materials = Some([gum.clone(), tooth.clone()]);
        Ok(())
    }

    fn set_camera(&mut self, camera: &CameraParameters) -> Result<(), RendererError> {
        self.camera = Some(camera.clone());
        Ok(())
    }

    fn set_light(&mut self, light: &LightState) {
        self.light = *light;
    }

    fn set_view_transform(&mut self, transform: ViewTransform) {
        self.view_transform = transform;
    }

    fn request_passes(&mut self, passes: AuxPasses) {
        self.passes = passes;
    }

    fn render(&mut self) -> Result<RenderedFrame, RendererError> {
        if self.engine.is_none() {
            return Err(RendererError::NotReady("engine not configured".into()));
        }
        let camera = self
            .camera
            .as_ref()
            .ok_or_else(|| RendererError::NotReady("no camera".into()))?;
        let mesh = self
            .mesh
            .as_ref()
            .ok_or_else(|| RendererError::NotReady("no mesh loaded".into()))?;

        let (width, height) = (self.resolution.width as usize, self.resolution.height as usize);
        let mut frame = RenderedFrame::blank(self.resolution);
        let mut zbuf = vec![f32::INFINITY; width * height];
        let mut normal_buf = vec![0.0f32; width * height * 3];

        let world_to_camera = camera.world_to_camera_matrix();
        let k = &camera.intrinsic;
        let (near, far) = (camera.clip_start as f32, camera.clip_end as f32);
        // camera +Z in world space points from the scene back at the camera
        let view_dir = camera
            .cam_to_world_matrix()
            .transform_vector3(DVec3::Z)
            .as_vec3()
            .normalize_or_zero();

        let projected: Vec<Option<Projected>> = mesh
            .vertices
            .iter()
            .map(|v| {
                let p = world_to_camera.transform_point3(v.as_dvec3());
                let depth = -p.z;
                if depth <= 0.0 {
                    return None;
                }
                Some(Projected {
                    x: (k.fx * p.x / depth + k.cx) as f32,
                    y: (k.cy - k.fy * p.y / depth) as f32,
                    depth: depth as f32,
                })
            })
            .collect();

        for ([a, b, c], slot) in &mesh.triangles {
            let idx = [*a as usize, *b as usize, *c as usize];
            let (Some(Some(p0)), Some(Some(p1)), Some(Some(p2))) = (
                projected.get(idx[0]),
                projected.get(idx[1]),
                projected.get(idx[2]),
            ) else {
                continue;
            };
            let (p0, p1, p2) = (*p0, *p1, *p2);
            if p0.depth.max(p1.depth).max(p2.depth) < near || p0.depth.min(p1.depth).min(p2.depth) > far {
                continue;
            }

            let area = (p1.x - p0.x) * (p2.y - p0.y) - (p1.y - p0.y) * (p2.x - p0.x);
            if area.abs() < 1e-12 {
                continue;
            }

            let min_x = p0.x.min(p1.x).min(p2.x).floor().max(0.0) as usize;
            let max_x = (p0.x.max(p1.x).max(p2.x).ceil() as isize).min(width as isize - 1);
            let min_y = p0.y.min(p1.y).min(p2.y).floor().max(0.0) as usize;
            let max_y = (p0.y.max(p1.y).max(p2.y).ceil() as isize).min(height as isize - 1);
            if max_x < 0 || max_y < 0 {
                continue;
            }

            let normals = idx.map(|i| mesh.normals[i]);
            let points = idx.map(|i| mesh.pointiness[i]);

            for y in min_y..=max_y as usize {
                for x in min_x..=max_x as usize {
                    let (px, py) = (x as f32 + 0.5, y as f32 + 0.5);
                    let w0 = ((p1.x - px) * (p2.y - py) - (p1.y - py) * (p2.x - px)) / area;
                    let w1 = ((p2.x - px) * (p0.y - py) - (p2.y - py) * (p0.x - px)) / area;
                    let w2 = 1.0 - w0 - w1;
                    if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                        continue;
                    }

                    // perspective-correct interpolation
                    let inv = [w0 / p0.depth, w1 / p1.depth, w2 / p2.depth];
                    let inv_sum = inv[0] + inv[1] + inv[2];
                    let depth = 1.0 / inv_sum;
                    if depth < near || depth > far {
                        continue;
                    }
                    let pixel = y * width + x;
                    if depth >= zbuf[pixel] {
                        continue;
                    }
                    zbuf[pixel] = depth;

                    let weights = inv.map(|w| w * depth);
                    let mut normal = (normals[0] * weights[0]
                        + normals[1] * weights[1]
                        + normals[2] * weights[2])
                        .normalize_or_zero();
                    if normal.dot(view_dir) < 0.0 {
                        normal = -normal;
                    }
                    let point = points[0] * weights[0] + points[1] * weights[1] + points[2] * weights[2];

                    let color = self.display(self.shade(*slot, normal, view_dir, point));
                    frame.combined[pixel * 4..pixel * 4 + 4]
                        .copy_from_slice(&[color[0], color[1], color[2], 1.0]);
                    normal_buf[pixel * 3..pixel * 3 + 3].copy_from_slice(&normal.to_array());
                }
            }
        }

        if self.passes.depth {
            frame.depth = Some(zbuf);
        }
        if self.passes.normal {
            frame.normal = Some(normal_buf);
        }
        self.stats.renders += 1;
        Ok(frame)
    }

    fn reclaim_memory(&mut self) {
        self.stats.reclaims += 1;
        debug!("Software renderer holds no device memory");
    }
}
