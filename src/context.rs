//! Renderer boundary and the render context that owns it.
//!
//! The renderer is a black box behind the [`Renderer`] trait. Everything a
//! render pass may mutate on it lives in a [`RenderContext`], which keeps a
//! copy of the current renderer-global settings plus an explicit stack of
//! saved copies. A pass calls [`RenderContext::scoped`] before touching any
//! setting; the returned guard pops the stack and re-applies the saved
//! settings when it goes out of scope, on success, error or panic alike.
//!
//! Engine and material bindings are deliberately outside the saved settings:
//! they are sticky across the jobs of one modality group and the context
//! skips redundant switches.
//!
//! ```ignore
//! let mut ctx = RenderContext::new(renderer, engines, resolution, sampling, baseline);
//! {
//!     let mut pass = ctx.scoped();
//!     pass.set_light(LightState::dark());
//!     pass.render()?;
//! } // light restored here
//! ```

use crate::backend::{Capabilities, EngineTable};
use crate::camera::CameraParameters;
use crate::encode::OutputSettings;
use crate::mesh::Mesh;
use crate::modality::MaterialPreset;
use crate::postprocess::PostProcessGraph;
use crate::{Resolution, SamplingConfig};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Deref, DerefMut};
use thiserror::Error;

/// Errors reported by a renderer.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RendererError {
    #[error("{0} engine is not available")]
    EngineUnavailable(Engine),
    #[error("renderer is not ready: {0}")]
    NotReady(String),
    #[error("render failed: {0}")]
    RenderFailed(String),
}

/// Rendering engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Engine {
    /// Global illumination (ambient occlusion, subsurface, pointiness)
    PathTracer,
    /// Fast raster engine for flat, matte and pass-based output
    Rasterizer,
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Engine::PathTracer => write!(f, "path tracer"),
            Engine::Rasterizer => write!(f, "rasterizer"),
        }
    }
}

/// Display transform applied to the combined image.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewTransform {
    /// Filmic tone mapping, the scene default
    #[default]
    Filmic,
    /// Values written as-is
    Standard,
}

/// The single sun light parented to the camera.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LightState {
    pub energy: f32,
    pub cast_shadows: bool,
}

impl LightState {
    /// All light neutralized.
    pub fn dark() -> Self {
        Self {
            energy: 0.0,
            cast_shadows: false,
        }
    }
}

/// Auxiliary buffers requested alongside the combined image.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuxPasses {
    pub depth: bool,
    pub normal: bool,
}

impl AuxPasses {
    pub const NONE: AuxPasses = AuxPasses {
        depth: false,
        normal: false,
    };
    pub const DEPTH: AuxPasses = AuxPasses {
        depth: true,
        normal: false,
    };
    pub const NORMAL: AuxPasses = AuxPasses {
        depth: false,
        normal: true,
    };

    pub fn any(&self) -> bool {
        self.depth || self.normal
    }
}

/// One rendered frame: combined RGBA plus any requested auxiliary passes,
/// all row-major, top row first.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderedFrame {
    pub width: u32,
    pub height: u32,
    /// RGBA, 4 floats per pixel
    pub combined: Vec<f32>,
    /// Camera-space distance along the view axis; `INFINITY` on background
    pub depth: Option<Vec<f32>>,
    /// World-space unit normals, 3 floats per pixel; zero on background
    pub normal: Option<Vec<f32>>,
}

impl RenderedFrame {
    /// Fully transparent frame with no auxiliary passes.
    pub fn blank(resolution: Resolution) -> Self {
        let pixels = resolution.pixel_count();
        Self {
            width: resolution.width,
            height: resolution.height,
            combined: vec![0.0; pixels * 4],
            depth: None,
            normal: None,
        }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// The renderer capability the orchestrator drives.
///
/// Calls are blocking and never concurrent. `render` returns raw buffers;
/// compositing and file encoding happen on this side of the boundary.
pub trait Renderer {
    /// Features this renderer offers. Read once at startup.
    fn capabilities(&self) -> Capabilities;

    /// Switch engine and apply resolution and sampling.
    fn configure(
        &mut self,
        engine: Engine,
        resolution: Resolution,
        sampling: &SamplingConfig,
    ) -> Result<(), RendererError>;

    /// Replace the scene mesh. Polygons carry their material slot.
    fn load_mesh(&mut self, mesh: &Mesh) -> Result<(), RendererError>;

    /// Bind presets to material slot 0 (gum) and slot 1 (tooth).
    fn bind_materials(
        &mut self,
        gum: &MaterialPreset,
        tooth: &MaterialPreset,
    ) -> Result<(), RendererError>;

    fn set_camera(&mut self, camera: &CameraParameters) -> Result<(), RendererError>;

    fn set_light(&mut self, light: &LightState);

    fn set_view_transform(&mut self, transform: ViewTransform);

    fn request_passes(&mut self, passes: AuxPasses);

    fn render(&mut self) -> Result<RenderedFrame, RendererError>;

    /// Release cached device memory. Called between modality groups.
    fn reclaim_memory(&mut self) {}
}

/// Renderer-global settings a pass may change and must restore.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderSettings {
    pub output: OutputSettings,
    pub view_transform: ViewTransform,
    /// `Some` enables compositing with this graph
    pub compositing: Option<PostProcessGraph>,
    pub passes: AuxPasses,
    pub light: LightState,
}

impl RenderSettings {
    /// Scene defaults with the given light.
    pub fn baseline(light: LightState) -> Self {
        Self {
            output: OutputSettings::default(),
            view_transform: ViewTransform::default(),
            compositing: None,
            passes: AuxPasses::NONE,
            light,
        }
    }
}

/// Owns the renderer and tracks its state.
pub struct RenderContext<R: Renderer> {
    renderer: R,
    engines: EngineTable,
    resolution: Resolution,
    sampling: SamplingConfig,
    engine: Option<Engine>,
    materials: Option<(String, String)>,
    settings: RenderSettings,
    saved: Vec<RenderSettings>,
    engine_switches: usize,
}

impl<R: Renderer> RenderContext<R> {
    /// Wrap `renderer` and push `baseline` to it.
    pub fn new(
        renderer: R,
        engines: EngineTable,
        resolution: Resolution,
        sampling: SamplingConfig,
        baseline: RenderSettings,
    ) -> Self {
        let mut ctx = Self {
            renderer,
            engines,
            resolution,
            sampling,
            engine: None,
            materials: None,
            settings: baseline.clone(),
            saved: Vec::new(),
            engine_switches: 0,
        };
        ctx.apply(baseline);
        ctx
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut R {
        &mut self.renderer
    }

    pub fn into_renderer(self) -> R {
        self.renderer
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    /// Current engine, `None` before the first configure.
    pub fn engine(&self) -> Option<Engine> {
        self.engine
    }

    /// Number of times the engine actually changed.
    pub fn engine_switches(&self) -> usize {
        self.engine_switches
    }

    /// Depth of the saved-settings stack.
    pub fn saved_depth(&self) -> usize {
        self.saved.len()
    }

    /// Engine that serves a request for `wanted` after negotiation.
    pub fn resolve_engine(&self, wanted: Engine) -> Engine {
        self.engines.resolve(wanted)
    }

    /// Make `wanted` (after negotiation) the active engine. Returns whether
    /// the renderer was reconfigured.
    pub fn use_engine(&mut self, wanted: Engine) -> Result<bool, RendererError> {
        let engine = self.engines.resolve(wanted);
        if self.engine == Some(engine) {
            return Ok(false);
        }
        self.renderer
            .configure(engine, self.resolution, &self.sampling)?;
        if self.engine.is_some() {
            self.engine_switches += 1;
        }
        debug!("Engine set to {}", engine);
        self.engine = Some(engine);
        Ok(true)
    }

    /// Load a new mesh. Material bindings are reset with it.
    pub fn load_mesh(&mut self, mesh: &Mesh) -> Result<(), RendererError> {
        self.renderer.load_mesh(mesh)?;
        self.materials = None;
        Ok(())
    }

    /// Bind presets to both slots unless they are already bound. Returns
    /// whether the renderer was called.
    pub fn bind_materials(
        &mut self,
        gum: &MaterialPreset,
        tooth: &MaterialPreset,
    ) -> Result<bool, RendererError> {
        let key = (gum.name.clone(), tooth.name.clone());
        if self.materials.as_ref() == Some(&key) {
            return Ok(false);
        }
        self.renderer.bind_materials(gum, tooth)?;
        self.materials = Some(key);
        Ok(true)
    }

    /// Names of the presets currently bound to (gum, tooth).
    pub fn bound_materials(&self) -> Option<(&str, &str)> {
        self.materials
            .as_ref()
            .map(|(g, t)| (g.as_str(), t.as_str()))
    }

    pub fn set_camera(&mut self, camera: &CameraParameters) -> Result<(), RendererError> {
        self.renderer.set_camera(camera)
    }

    pub fn set_output(&mut self, output: OutputSettings) {
        self.settings.output = output;
    }

    pub fn set_view_transform(&mut self, transform: ViewTransform) {
        self.settings.view_transform = transform;
        self.renderer.set_view_transform(transform);
    }

    pub fn set_light(&mut self, light: LightState) {
        self.settings.light = light;
        self.renderer.set_light(&light);
    }

    pub fn set_passes(&mut self, passes: AuxPasses) {
        self.settings.passes = passes;
        self.renderer.request_passes(passes);
    }

    pub fn set_compositing(&mut self, graph: Option<PostProcessGraph>) {
        self.settings.compositing = graph;
    }

    pub fn render(&mut self) -> Result<RenderedFrame, RendererError> {
        self.renderer.render()
    }

    pub fn reclaim_memory(&mut self) {
        debug!("Reclaiming renderer memory");
        self.renderer.reclaim_memory();
    }

    /// Save the current settings on the stack.
    pub fn push_settings(&mut self) {
        self.saved.push(self.settings.clone());
    }

    /// Restore the most recently saved settings. Returns `false` if the
    /// stack was empty.
    pub fn pop_settings(&mut self) -> bool {
        match self.saved.pop() {
            Some(saved) => {
                self.apply(saved);
                true
            }
            None => {
                warn!("Settings stack underflow; nothing to restore");
                false
            }
        }
    }

    /// Save settings and return a guard that restores them when dropped.
    pub fn scoped(&mut self) -> SettingsGuard<'_, R> {
        self.push_settings();
        SettingsGuard { ctx: self }
    }

    fn apply(&mut self, settings: RenderSettings) {
        self.renderer.set_view_transform(settings.view_transform);
        self.renderer.set_light(&settings.light);
        self.renderer.request_passes(settings.passes);
        self.settings = settings;
    }
}

/// Restores the settings saved by [`RenderContext::scoped`] on drop.
pub struct SettingsGuard<'a, R: Renderer> {
    ctx: &'a mut RenderContext<R>,
}

impl<R: Renderer> Deref for SettingsGuard<'_, R> {
    type Target = RenderContext<R>;

    fn deref(&self) -> &Self::Target {
        self.ctx
    }
}

impl<R: Renderer> DerefMut for SettingsGuard<'_, R> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.ctx
    }
}

impl<R: Renderer> Drop for SettingsGuard<'_, R> {
    fn drop(&mut self) {
        self.ctx.pop_settings();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::EngineTable;
    use crate::encode::OutputSettings;
    use crate::modality::MaterialLibrary;

    #[derive(Default)]
    struct Recorder {
        configures: Vec<Engine>,
        binds: Vec<(String, String)>,
        light: Option<LightState>,
        view: Option<ViewTransform>,
        passes: AuxPasses,
        fail: bool,
    }

    impl Renderer for Recorder {
        fn capabilities(&self) -> Capabilities {
            Capabilities::full()
        }
        fn configure(&mut self, engine: Engine, _: Resolution, _: &SamplingConfig) -> Result<(), RendererError> {
            self.configures.push(engine);
            Ok(())
        }
        fn load_mesh(&mut self, _: &Mesh) -> Result<(), RendererError> {
            Ok(())
        }
        fn bind_materials(&mut self, gum: &MaterialPreset, tooth: &MaterialPreset) -> Result<(), RendererError> {
            self.binds.push((gum.name.clone(), tooth.name.clone()));
            Ok(())
        }
        fn set_camera(&mut self, _: &CameraParameters) -> Result<(), RendererError> {
            Ok(())
        }
        fn set_light(&mut self, light: &LightState) {
            self.light = Some(*light);
        }
        fn set_view_transform(&mut self, transform: ViewTransform) {
            self.view = Some(transform);
        }
        fn request_passes(&mut self, passes: AuxPasses) {
            self.passes = passes;
        }
        fn render(&mut self) -> Result<RenderedFrame, RendererError> {
            if self.fail {
                Err(RendererError::RenderFailed("boom".into()))
            } else {
                Ok(RenderedFrame::blank(Resolution::new(1, 1)))
            }
        }
    }

    fn context() -> RenderContext<Recorder> {
        let light = LightState {
            energy: 5.0,
            cast_shadows: true,
        };
        RenderContext::new(
            Recorder::default(),
            EngineTable::identity(),
            Resolution::new(4, 4),
            SamplingConfig::default(),
            RenderSettings::baseline(light),
        )
    }

    #[test]
    fn test_baseline_applied_on_creation() {
        let ctx = context();
        assert_eq!(ctx.renderer().light.unwrap().energy, 5.0);
        assert_eq!(ctx.renderer().view, Some(ViewTransform::Filmic));
        assert_eq!(ctx.saved_depth(), 0);
    }

    #[test]
    fn test_scoped_restores_on_drop() {
        let mut ctx = context();
        let before = ctx.settings().clone();
        {
            let mut pass = ctx.scoped();
            pass.set_light(LightState::dark());
            pass.set_view_transform(ViewTransform::Standard);
            pass.set_passes(AuxPasses::NORMAL);
            pass.set_output(OutputSettings::png16_rgb());
            assert_eq!(pass.saved_depth(), 1);
            assert_eq!(pass.renderer().light, Some(LightState::dark()));
        }
        assert_eq!(ctx.settings(), &before);
        assert_eq!(ctx.saved_depth(), 0);
        assert_eq!(ctx.renderer().light.unwrap().energy, 5.0);
        assert_eq!(ctx.renderer().view, Some(ViewTransform::Filmic));
        assert_eq!(ctx.renderer().passes, AuxPasses::NONE);
    }

    #[test]
    fn test_scoped_restores_after_render_failure() {
        let mut ctx = context();
        ctx.renderer_mut().fail = true;
        let result = {
            let mut pass = ctx.scoped();
            pass.set_light(LightState::dark());
            let rendered = pass.render();
            rendered
        };
        assert!(result.is_err());
        assert!(ctx.renderer().light.unwrap().cast_shadows);
        assert_eq!(ctx.saved_depth(), 0);
    }

    #[test]
    fn test_nested_scopes_unwind_in_order() {
        let mut ctx = context();
        {
            let mut outer = ctx.scoped();
            outer.set_view_transform(ViewTransform::Standard);
            {
                let mut inner = outer.scoped();
                inner.set_light(LightState::dark());
                assert_eq!(inner.saved_depth(), 2);
            }
            assert_eq!(outer.settings().light.energy, 5.0);
            assert_eq!(outer.settings().view_transform, ViewTransform::Standard);
        }
        assert_eq!(ctx.settings().view_transform, ViewTransform::Filmic);
    }

    #[test]
    fn test_pop_on_empty_stack() {
        let mut ctx = context();
        assert!(!ctx.pop_settings());
    }

    #[test]
    fn test_engine_switches_are_counted_once() {
        let mut ctx = context();
        assert!(ctx.use_engine(Engine::Rasterizer).unwrap());
        assert!(!ctx.use_engine(Engine::Rasterizer).unwrap());
        assert!(ctx.use_engine(Engine::PathTracer).unwrap());
        assert!(ctx.use_engine(Engine::Rasterizer).unwrap());
        assert_eq!(ctx.engine_switches(), 2);
        assert_eq!(
            ctx.renderer().configures,
            vec![Engine::Rasterizer, Engine::PathTracer, Engine::Rasterizer]
        );
    }

    #[test]
    fn test_material_binding_is_sticky() {
        let library = MaterialLibrary::default();
        let gum = library.get("Gingiva_unlit").unwrap();
        let tooth = library.get("Tooth_unlit").unwrap();
        let mut ctx = context();
        assert!(ctx.bind_materials(gum, tooth).unwrap());
        assert!(!ctx.bind_materials(gum, tooth).unwrap());
        assert_eq!(ctx.bound_materials(), Some(("Gingiva_unlit", "Tooth_unlit")));
        assert_eq!(ctx.renderer().binds.len(), 1);
    }
}
