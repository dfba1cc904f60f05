//! Renderer capability negotiation.
//!
//! Renderers differ in what they offer: a production renderer has both a path
//! tracer and a rasterizer, the bundled software renderer only rasterizes, and
//! GPU or float-output support varies by machine. Instead of probing on every
//! call, the capabilities are read once at startup and resolved into:
//!
//! - an [`EngineTable`] that maps the engine a modality wants to the engine
//!   that will actually serve it (with a warning for every fallback),
//! - the compute [`Device`] (preferred device plus fallbacks, overridable with
//!   the `DENTAL_CAPTURE_DEVICE` environment variable),
//! - whether float (OpenEXR) passes can be honored.

use crate::context::Engine;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::env;
use thiserror::Error;

/// Environment variable overriding the compute device.
pub const DEVICE_ENV: &str = "DENTAL_CAPTURE_DEVICE";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("renderer offers neither a path tracer nor a rasterizer")]
    NoEngine,
}

/// What a renderer can do.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub path_tracer: bool,
    pub rasterizer: bool,
    pub gpu: bool,
    pub float_output: bool,
}

impl Capabilities {
    /// Everything available.
    pub fn full() -> Self {
        Self {
            path_tracer: true,
            rasterizer: true,
            gpu: true,
            float_output: true,
        }
    }

    /// CPU rasterizer only.
    pub fn raster_only() -> Self {
        Self {
            path_tracer: false,
            rasterizer: true,
            gpu: false,
            float_output: true,
        }
    }

    pub fn supports(&self, engine: Engine) -> bool {
        match engine {
            Engine::PathTracer => self.path_tracer,
            Engine::Rasterizer => self.rasterizer,
        }
    }
}

/// Compute device for the path tracer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    #[default]
    Gpu,
    Cpu,
}

impl Device {
    pub fn name(&self) -> &'static str {
        match self {
            Device::Gpu => "GPU",
            Device::Cpu => "CPU",
        }
    }
}

/// Device preference order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    /// Preferred device (if available)
    pub preferred: Device,
    /// Fallback devices in order of preference
    pub fallbacks: Vec<Device>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::new(Device::Gpu)
    }
}

impl BackendConfig {
    pub fn new(preferred: Device) -> Self {
        Self {
            preferred,
            fallbacks: vec![Device::Cpu],
        }
    }

    /// Preferred device, considering the environment override.
    pub fn selected_device(&self) -> Device {
        env::var(DEVICE_ENV)
            .ok()
            .and_then(|value| parse_device(&value))
            .unwrap_or(self.preferred)
    }

    /// Devices to try, in order.
    pub fn devices_to_try(&self) -> Vec<Device> {
        let mut devices = vec![self.selected_device()];
        devices.extend(self.fallbacks.iter().copied());
        devices.dedup();
        devices
    }
}

/// Parse a device name from the environment or user input.
pub fn parse_device(s: &str) -> Option<Device> {
    match s.trim().to_lowercase().as_str() {
        "gpu" | "cuda" | "optix" | "hip" | "metal" => Some(Device::Gpu),
        "cpu" => Some(Device::Cpu),
        _ => None,
    }
}

/// Which engine serves a request for each engine kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EngineTable {
    path_tracer: Engine,
    rasterizer: Engine,
}

impl EngineTable {
    /// Every request served by the engine it names.
    pub fn identity() -> Self {
        Self {
            path_tracer: Engine::PathTracer,
            rasterizer: Engine::Rasterizer,
        }
    }

    pub fn resolve(&self, wanted: Engine) -> Engine {
        match wanted {
            Engine::PathTracer => self.path_tracer,
            Engine::Rasterizer => self.rasterizer,
        }
    }

    /// Whether any request is served by a substitute.
    pub fn has_fallbacks(&self) -> bool {
        *self != Self::identity()
    }
}

/// Outcome of negotiation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Negotiated {
    pub engines: EngineTable,
    pub device: Device,
    pub float_passes: bool,
}

/// Resolve renderer capabilities against the run configuration.
pub fn negotiate(
    caps: &Capabilities,
    backend: &BackendConfig,
    float_passes: bool,
) -> Result<Negotiated, BackendError> {
    let pick = |wanted: Engine, other: Engine| -> Result<Engine, BackendError> {
        if caps.supports(wanted) {
            Ok(wanted)
        } else if caps.supports(other) {
            warn!("{} not available; falling back to the {}", wanted, other);
            Ok(other)
        } else {
            Err(BackendError::NoEngine)
        }
    };
    let engines = EngineTable {
        path_tracer: pick(Engine::PathTracer, Engine::Rasterizer)?,
        rasterizer: pick(Engine::Rasterizer, Engine::PathTracer)?,
    };

    let device = backend
        .devices_to_try()
        .into_iter()
        .find(|d| *d == Device::Cpu || caps.gpu)
        .unwrap_or(Device::Cpu);

    let float_passes = if float_passes && !caps.float_output {
        warn!("Renderer cannot write float buffers; depth and normal fall back to 16-bit PNG");
        false
    } else {
        float_passes
    };

    info!(
        "Backend: path-traced passes on the {}, raster passes on the {}, device {}",
        engines.path_tracer,
        engines.rasterizer,
        device.name()
    );

    Ok(Negotiated {
        engines,
        device,
        float_passes,
    })
}
