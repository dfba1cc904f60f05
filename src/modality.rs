//! Render modalities and the material presets they bind.
//!
//! Each [`RenderModality`] is a fixed recipe: which engine it wants, which
//! presets go on the gum and tooth slots, how the light is treated, which
//! auxiliary buffers are needed and how the result is encoded. The executor
//! only reads these recipes; it never branches on modality names.

use crate::context::{AuxPasses, Engine, LightState, ViewTransform};
use crate::encode::{ColorMode, OutputSettings};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Default exponent applied to pointiness before the curvature ramp.
pub const DEFAULT_CURVATURE_EXPONENT: f32 = 2.9;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown modality '{0}' (expected one of: lit, unlit, matte, depth, normal, curvature)")]
pub struct ParseModalityError(pub String);

/// One kind of output image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderModality {
    /// Shaded beauty render
    Lit,
    /// Flat per-class colors for segmentation
    Unlit,
    /// Uniform white material without shadows
    Matte,
    /// Normalized camera distance
    Depth,
    /// World-space normals remapped to [0, 1]
    Normal,
    /// Pointiness mapped through a color ramp
    Curvature,
}

/// How a modality treats the configured sun light.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LightPolicy {
    /// Configured energy and shadow flag
    Scene,
    /// Configured energy, shadows off
    Flat,
    /// No light at all
    Dark,
}

impl LightPolicy {
    pub fn apply(&self, configured: &LightState) -> LightState {
        match self {
            LightPolicy::Scene => *configured,
            LightPolicy::Flat => LightState {
                energy: configured.energy,
                cast_shadows: false,
            },
            LightPolicy::Dark => LightState::dark(),
        }
    }
}

/// Presets bound to the (gum, tooth) slots.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MaterialBinding {
    /// Pass-based modality, nothing to bind
    None,
    Slots { gum: &'static str, tooth: &'static str },
}

impl RenderModality {
    /// All modalities in scheduling order.
    pub const ALL: [RenderModality; 6] = [
        RenderModality::Unlit,
        RenderModality::Matte,
        RenderModality::Lit,
        RenderModality::Depth,
        RenderModality::Normal,
        RenderModality::Curvature,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            RenderModality::Lit => "lit",
            RenderModality::Unlit => "unlit",
            RenderModality::Matte => "matte",
            RenderModality::Depth => "depth",
            RenderModality::Normal => "normal",
            RenderModality::Curvature => "curvature",
        }
    }

    /// Output sub-directory.
    pub fn dir_name(&self) -> &'static str {
        self.name()
    }

    /// Position in the scheduling order.
    pub fn order(&self) -> usize {
        Self::ALL.iter().position(|m| m == self).unwrap_or(Self::ALL.len())
    }

    pub fn preferred_engine(&self) -> Engine {
        match self {
            RenderModality::Lit | RenderModality::Curvature => Engine::PathTracer,
            RenderModality::Unlit
            | RenderModality::Matte
            | RenderModality::Depth
            | RenderModality::Normal => Engine::Rasterizer,
        }
    }

    pub fn materials(&self) -> MaterialBinding {
        match self {
            RenderModality::Lit => MaterialBinding::Slots {
                gum: "Gingiva_mat",
                tooth: "Teeth_mat",
            },
            RenderModality::Unlit => MaterialBinding::Slots {
                gum: "Gingiva_unlit",
                tooth: "Tooth_unlit",
            },
            RenderModality::Matte => MaterialBinding::Slots {
                gum: "Gingiva_matt",
                tooth: "Tooth_matt",
            },
            RenderModality::Curvature => MaterialBinding::Slots {
                gum: "Curvature_mat",
                tooth: "Curvature_mat",
            },
            RenderModality::Depth | RenderModality::Normal => MaterialBinding::None,
        }
    }

    pub fn light_policy(&self) -> LightPolicy {
        match self {
            RenderModality::Lit => LightPolicy::Scene,
            RenderModality::Normal => LightPolicy::Dark,
            RenderModality::Unlit
            | RenderModality::Matte
            | RenderModality::Depth
            | RenderModality::Curvature => LightPolicy::Flat,
        }
    }

    pub fn passes(&self) -> AuxPasses {
        match self {
            RenderModality::Depth => AuxPasses::DEPTH,
            RenderModality::Normal => AuxPasses::NORMAL,
            _ => AuxPasses::NONE,
        }
    }

    /// Whether the modality is produced by a post-process graph.
    pub fn uses_compositing(&self) -> bool {
        self.passes().any()
    }

    /// File encoding. `float_passes` switches depth and normal to OpenEXR.
    pub fn output(&self, float_passes: bool) -> OutputSettings {
        match (self, float_passes) {
            (RenderModality::Depth, false) => OutputSettings::png16_bw(),
            (RenderModality::Depth, true) => OutputSettings::exr(ColorMode::Bw),
            (RenderModality::Normal, false) => OutputSettings::png16_rgb(),
            (RenderModality::Normal, true) => OutputSettings::exr(ColorMode::Rgb),
            _ => OutputSettings::png8_rgba(),
        }
    }

    /// View transform override; `None` keeps the scene default.
    pub fn view_transform(&self) -> Option<ViewTransform> {
        match self {
            RenderModality::Lit | RenderModality::Matte => None,
            _ => Some(ViewTransform::Standard),
        }
    }

    /// Deduplicate and sort into scheduling order.
    pub fn canonical(set: &[RenderModality]) -> Vec<RenderModality> {
        Self::ALL
            .iter()
            .copied()
            .filter(|m| set.contains(m))
            .collect()
    }
}

impl fmt::Display for RenderModality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RenderModality {
    type Err = ParseModalityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "lit" => Ok(RenderModality::Lit),
            "unlit" => Ok(RenderModality::Unlit),
            "matte" | "matt" => Ok(RenderModality::Matte),
            "depth" => Ok(RenderModality::Depth),
            "normal" => Ok(RenderModality::Normal),
            "curvature" => Ok(RenderModality::Curvature),
            _ => Err(ParseModalityError(s.to_string())),
        }
    }
}

// ============================================================================
// Material presets
// ============================================================================

/// Two-stop linear color ramp.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColorRamp {
    pub stops: [(f32, [f32; 3]); 2],
}

impl Default for ColorRamp {
    fn default() -> Self {
        Self {
            stops: [(0.094, [0.0; 3]), (0.188, [1.0; 3])],
        }
    }
}

impl ColorRamp {
    /// Color at `t`, clamped to the end stops.
    pub fn eval(&self, t: f32) -> [f32; 3] {
        let [(p0, c0), (p1, c1)] = self.stops;
        if t <= p0 {
            return c0;
        }
        if t >= p1 || p1 <= p0 {
            return c1;
        }
        let f = (t - p0) / (p1 - p0);
        [
            c0[0] + (c1[0] - c0[0]) * f,
            c0[1] + (c1[1] - c0[1]) * f,
            c0[2] + (c1[2] - c0[2]) * f,
        ]
    }
}

/// Shading model of a preset.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Shading {
    Principled {
        base_color: [f32; 3],
        roughness: f32,
        #[serde(default)]
        coat: f32,
        #[serde(default)]
        subsurface: f32,
        #[serde(default)]
        transmission: f32,
    },
    Emission {
        color: [f32; 3],
        strength: f32,
    },
    Curvature {
        exponent: f32,
        ramp: ColorRamp,
    },
}

/// A named material preset.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MaterialPreset {
    pub name: String,
    pub shading: Shading,
}

impl MaterialPreset {
    pub fn principled(name: &str, base_color: [f32; 3], roughness: f32) -> Self {
        Self {
            name: name.to_string(),
            shading: Shading::Principled {
                base_color,
                roughness,
                coat: 0.0,
                subsurface: 0.0,
                transmission: 0.0,
            },
        }
    }

    pub fn emission(name: &str, color: [f32; 3]) -> Self {
        Self {
            name: name.to_string(),
            shading: Shading::Emission {
                color,
                strength: 1.0,
            },
        }
    }

    pub fn curvature(name: &str, exponent: f32) -> Self {
        Self {
            name: name.to_string(),
            shading: Shading::Curvature {
                exponent,
                ramp: ColorRamp::default(),
            },
        }
    }
}

/// Presets by name.
#[derive(Clone, Debug, PartialEq)]
pub struct MaterialLibrary {
    presets: BTreeMap<String, MaterialPreset>,
}

impl Default for MaterialLibrary {
    fn default() -> Self {
        Self::new(DEFAULT_CURVATURE_EXPONENT)
    }
}

impl MaterialLibrary {
    /// The standard presets with the given curvature exponent.
    pub fn new(curvature_exponent: f32) -> Self {
        let gum_red = [1.0, 0.196, 0.282]; // #FF3248
        let teeth = MaterialPreset {
            name: "Teeth_mat".to_string(),
            shading: Shading::Principled {
                base_color: [1.0, 1.0, 1.0],
                roughness: 0.1,
                coat: 0.8,
                subsurface: 1.0,
                transmission: 0.1,
            },
        };

        let mut library = Self::empty();
        for preset in [
            MaterialPreset::principled("Gingiva_mat", gum_red, 0.2),
            teeth,
            MaterialPreset::emission("Gingiva_unlit", [1.0, 0.0, 0.0]),
            MaterialPreset::emission("Tooth_unlit", [1.0, 1.0, 0.0]),
            MaterialPreset::principled("Gingiva_matt", [1.0, 1.0, 1.0], 0.5),
            MaterialPreset::principled("Tooth_matt", [1.0, 1.0, 1.0], 0.5),
            MaterialPreset::curvature("Curvature_mat", curvature_exponent),
        ] {
            library.insert(preset);
        }
        library
    }

    /// A library with no presets.
    pub fn empty() -> Self {
        Self {
            presets: BTreeMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&MaterialPreset> {
        self.presets.get(name)
    }

    /// Add or replace a preset.
    pub fn insert(&mut self, preset: MaterialPreset) {
        self.presets.insert(preset.name.clone(), preset);
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.presets.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_order() {
        let names: Vec<_> = RenderModality::ALL.iter().map(|m| m.name()).collect();
        assert_eq!(names, ["unlit", "matte", "lit", "depth", "normal", "curvature"]);
    }

    #[test]
    fn test_canonical_dedups_and_sorts() {
        let set = [
            RenderModality::Curvature,
            RenderModality::Lit,
            RenderModality::Unlit,
            RenderModality::Lit,
        ];
        assert_eq!(
            RenderModality::canonical(&set),
            vec![RenderModality::Unlit, RenderModality::Lit, RenderModality::Curvature]
        );
    }

    #[test]
    fn test_engines() {
        assert_eq!(RenderModality::Lit.preferred_engine(), Engine::PathTracer);
        assert_eq!(RenderModality::Curvature.preferred_engine(), Engine::PathTracer);
        for m in [
            RenderModality::Unlit,
            RenderModality::Matte,
            RenderModality::Depth,
            RenderModality::Normal,
        ] {
            assert_eq!(m.preferred_engine(), Engine::Rasterizer);
        }
    }

    #[test]
    fn test_every_bound_preset_exists() {
        let library = MaterialLibrary::default();
        for m in RenderModality::ALL {
            if let MaterialBinding::Slots { gum, tooth } = m.materials() {
                assert!(library.get(gum).is_some(), "{}", gum);
                assert!(library.get(tooth).is_some(), "{}", tooth);
            }
        }
        assert_eq!(library.len(), 7);
    }

    #[test]
    fn test_pass_modalities_bind_nothing() {
        assert_eq!(RenderModality::Depth.materials(), MaterialBinding::None);
        assert_eq!(RenderModality::Normal.materials(), MaterialBinding::None);
        assert!(RenderModality::Depth.uses_compositing());
        assert!(!RenderModality::Lit.uses_compositing());
    }

    #[test]
    fn test_outputs() {
        assert_eq!(RenderModality::Depth.output(false), OutputSettings::png16_bw());
        assert_eq!(RenderModality::Normal.output(false), OutputSettings::png16_rgb());
        assert_eq!(RenderModality::Lit.output(true), OutputSettings::png8_rgba());
        assert!(RenderModality::Depth.output(true).is_float());
        assert_eq!(RenderModality::Normal.output(true).extension(), "exr");
    }

    #[test]
    fn test_light_policies() {
        let sun = LightState {
            energy: 5.0,
            cast_shadows: true,
        };
        assert_eq!(RenderModality::Lit.light_policy().apply(&sun), sun);
        let matte = RenderModality::Matte.light_policy().apply(&sun);
        assert_eq!(matte.energy, 5.0);
        assert!(!matte.cast_shadows);
        assert_eq!(RenderModality::Normal.light_policy().apply(&sun), LightState::dark());
    }

    #[test]
    fn test_from_str() {
        assert_eq!("Depth".parse::<RenderModality>(), Ok(RenderModality::Depth));
        assert_eq!("matt".parse::<RenderModality>(), Ok(RenderModality::Matte));
        assert!("albedo".parse::<RenderModality>().is_err());
    }

    #[test]
    fn test_ramp_eval() {
        let ramp = ColorRamp::default();
        assert_eq!(ramp.eval(0.0), [0.0; 3]);
        assert_eq!(ramp.eval(1.0), [1.0; 3]);
        let mid = ramp.eval(0.141);
        assert!((mid[0] - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_curvature_exponent_configurable() {
        let library = MaterialLibrary::new(3.5);
        match &library.get("Curvature_mat").unwrap().shading {
            Shading::Curvature { exponent, .. } => assert_eq!(*exponent, 3.5),
            other => panic!("unexpected shading {:?}", other),
        }
    }

    #[test]
    fn test_shading_serde_tag() {
        let json = serde_json::to_string(&MaterialPreset::emission("x", [1.0, 0.0, 0.0])).unwrap();
        assert!(json.contains("\"kind\":\"emission\""));
    }
}
