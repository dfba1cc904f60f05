//! Render pass executor: one (modality, view) job against a render context.
//!
//! A job walks a fixed state machine:
//!
//! ```text
//! Idle -> EngineConfigured -> MaterialsBound -> [AuxiliaryGraphBuilt] -> Rendered -> Restored
//! ```
//!
//! Engine and material bindings are sticky and only touched when they change.
//! Every other renderer-global setting is changed inside a
//! [`RenderContext::scoped`] guard, so it is restored on every exit path.
//! Post-processing and encoding run after the restore, on the returned frame.

use crate::camera::{CameraError, CameraParameters};
use crate::context::{LightState, RenderContext, RenderedFrame, Renderer, RendererError};
use crate::encode::{write_image, EncodeError, OutputSettings};
use crate::mesh::Mesh;
use crate::modality::{MaterialBinding, MaterialLibrary, MaterialPreset, RenderModality};
use crate::postprocess::{depth_graph, normal_graph, CompositeImage, GraphError, PostProcessGraph};
use bevy::prelude::Vec3;
use log::debug;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Step of the per-job state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PassState {
    Idle,
    EngineConfigured,
    MaterialsBound,
    AuxiliaryGraphBuilt,
    Rendered,
    Restored,
}

impl fmt::Display for PassState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PassState::Idle => "idle",
            PassState::EngineConfigured => "engine configured",
            PassState::MaterialsBound => "materials bound",
            PassState::AuxiliaryGraphBuilt => "auxiliary graph built",
            PassState::Rendered => "rendered",
            PassState::Restored => "restored",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum PassError {
    #[error("renderer failed after reaching '{state}': {source}")]
    Renderer {
        state: PassState,
        #[source]
        source: RendererError,
    },
    #[error("material preset '{0}' is not in the library")]
    MissingPreset(String),
    #[error(transparent)]
    Camera(#[from] CameraError),
    #[error("post-processing failed: {0}")]
    Graph(#[from] GraphError),
    #[error("failed to encode {}: {source}", path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: EncodeError,
    },
    #[error("failed to create {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ============================================================================
// Depth range
// ============================================================================

/// Camera-space depth extent of a mesh.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DepthExtent {
    pub near: f64,
    pub far: f64,
}

impl DepthExtent {
    /// Min/max distance along the viewing axis over all vertices.
    ///
    /// An empty mesh gives `[0, 1]`. `near` is clamped to 0 and a flat extent
    /// is widened to `near + 1`.
    pub fn of_vertices<'a>(
        vertices: impl IntoIterator<Item = &'a Vec3>,
        camera: &CameraParameters,
    ) -> Self {
        let world_to_camera = camera.world_to_camera_matrix();
        let (near, far) = vertices
            .into_iter()
            .map(|v| -world_to_camera.transform_point3(v.as_dvec3()).z)
            .filter(|d| d.is_finite())
            .fold(None, |acc: Option<(f64, f64)>, d| match acc {
                None => Some((d, d)),
                Some((lo, hi)) => Some((lo.min(d), hi.max(d))),
            })
            .unwrap_or((0.0, 1.0));

        let near = near.max(0.0);
        let far = if far <= near { near + 1.0 } else { far };
        Self { near, far }
    }

    /// Padded clip range: `margin = max(0.01, 0.05 * range)`.
    pub fn clip_range(&self) -> (f64, f64) {
        let range = (self.far - self.near).max(1e-3);
        let margin = (0.05 * range).max(0.01);
        ((self.near - margin).max(0.001), self.far + margin)
    }
}

// ============================================================================
// Executor
// ============================================================================

fn failed_at(state: PassState) -> impl FnOnce(RendererError) -> PassError {
    move |source| PassError::Renderer { state, source }
}

/// One job.
#[derive(Clone, Copy, Debug)]
pub struct PassRequest<'a> {
    pub modality: RenderModality,
    pub camera: &'a CameraParameters,
    pub mesh: &'a Mesh,
    /// Dataset root directory name
    pub prefix: &'a str,
    pub case_id: &'a str,
    pub output_root: &'a Path,
}

/// Outcome of a successful job.
#[derive(Clone, Debug, PartialEq)]
pub struct PassReport {
    pub path: PathBuf,
    pub states: Vec<PassState>,
    pub engine_switched: bool,
}

/// `<root>/<modality>/{prefix}_{case}_{view}.{ext}`
pub fn output_path(
    output_root: &Path,
    modality: RenderModality,
    prefix: &str,
    case_id: &str,
    view: &str,
    extension: &str,
) -> PathBuf {
    output_root
        .join(modality.dir_name())
        .join(format!("{}_{}_{}.{}", prefix, case_id, view, extension))
}

/// Runs render jobs against a [`RenderContext`].
pub struct PassExecutor<'a> {
    library: &'a MaterialLibrary,
    light: LightState,
    float_passes: bool,
}

impl<'a> PassExecutor<'a> {
    /// `light` is the configured sun; each modality's light policy is
    /// applied to it per job.
    pub fn new(library: &'a MaterialLibrary, light: LightState, float_passes: bool) -> Self {
        Self {
            library,
            light,
            float_passes,
        }
    }

    /// Output encoding used for `modality`.
    pub fn output_settings(&self, modality: RenderModality) -> OutputSettings {
        modality.output(self.float_passes)
    }

    /// Where `request` will be written.
    pub fn output_path_for(&self, request: &PassRequest<'_>) -> PathBuf {
        output_path(
            request.output_root,
            request.modality,
            request.prefix,
            request.case_id,
            &request.camera.view_name,
            self.output_settings(request.modality).extension(),
        )
    }

    /// Configure, render, restore, then post-process and write the image.
    pub fn execute<R: Renderer>(
        &self,
        ctx: &mut RenderContext<R>,
        request: &PassRequest<'_>,
    ) -> Result<PassReport, PassError> {
        let modality = request.modality;
        let mut states = vec![PassState::Idle];

        let engine_switched = ctx
            .use_engine(modality.preferred_engine())
            .map_err(failed_at(PassState::Idle))?;
        states.push(PassState::EngineConfigured);

        if let MaterialBinding::Slots { gum, tooth } = modality.materials() {
            let gum = self.preset(gum)?;
            let tooth = self.preset(tooth)?;
            ctx.bind_materials(gum, tooth)
                .map_err(failed_at(PassState::EngineConfigured))?;
        }
        states.push(PassState::MaterialsBound);

        let (camera, graph) = self.prepare(modality, request)?;
        ctx.set_camera(&camera)
            .map_err(failed_at(PassState::MaterialsBound))?;

        let output = self.output_settings(modality);
        let rendered = {
            let mut pass = ctx.scoped();
            pass.set_output(output);
            if let Some(transform) = modality.view_transform() {
                pass.set_view_transform(transform);
            }
            pass.set_light(modality.light_policy().apply(&self.light));
            if let Some(graph) = graph.clone() {
                pass.set_passes(modality.passes());
                pass.set_compositing(Some(graph));
                states.push(PassState::AuxiliaryGraphBuilt);
            }
            let result = pass.render();
            result
        };
        let last = *states.last().unwrap_or(&PassState::Idle);
        let frame = rendered.map_err(failed_at(last))?;
        states.push(PassState::Rendered);
        states.push(PassState::Restored);

        let path = self.output_path_for(request);
        let image = Self::composite(graph.as_ref(), &frame)?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|source| PassError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        write_image(&image, &output, &path).map_err(|source| PassError::Encode {
            path: path.clone(),
            source,
        })?;
        debug!("Wrote {}", path.display());

        Ok(PassReport {
            path,
            states,
            engine_switched,
        })
    }

    fn preset(&self, name: &str) -> Result<&'a MaterialPreset, PassError> {
        self.library
            .get(name)
            .ok_or_else(|| PassError::MissingPreset(name.to_string()))
    }

    /// Camera for the job and the post-process graph, if any.
    fn prepare(
        &self,
        modality: RenderModality,
        request: &PassRequest<'_>,
    ) -> Result<(CameraParameters, Option<PostProcessGraph>), PassError> {
        match modality {
            RenderModality::Depth => {
                let extent = DepthExtent::of_vertices(&request.mesh.vertices, request.camera);
                let (clip_start, clip_end) = extent.clip_range();
                debug!(
                    "Depth range for {}: [{:.3}, {:.3}]",
                    request.camera.view_name, clip_start, clip_end
                );
                let camera = request.camera.with_clip(clip_start, clip_end)?;
                Ok((camera, Some(depth_graph(clip_start, clip_end))))
            }
            RenderModality::Normal => Ok((request.camera.clone(), Some(normal_graph()))),
            _ => Ok((request.camera.clone(), None)),
        }
    }

    fn composite(
        graph: Option<&PostProcessGraph>,
        frame: &RenderedFrame,
    ) -> Result<CompositeImage, PassError> {
        match graph {
            Some(graph) => Ok(graph.evaluate(frame)?),
            None => Ok(CompositeImage::from_combined(frame)),
        }
    }
}
