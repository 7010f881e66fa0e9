//! Contracts for the rendering libraries the backends drive, plus software
//! implementations that run on the CPU surfaces in [`crate::surface`].
//!
//! A GPU-backed library plugs in by implementing [`ShaderLibrary`] or
//! [`GenerativeLibrary`]; the backends never see anything but these traits.

mod isf;
mod plasma;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{AudioTap, PresetPayload, Result, Surface, SurfaceSize};

pub use isf::{SoftwareShaderLibrary, SoftwareShaderProgram};
pub use plasma::{PlasmaLibrary, PlasmaVisualizer};

/// Value of a shader uniform or renderer parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ParamValue {
    Float(f32),
    /// Straight RGBA in `[0, 1]`.
    Color([f32; 4]),
    Bool(bool),
}

impl ParamValue {
    pub fn kind(&self) -> UniformKind {
        match self {
            Self::Float(_) => UniformKind::Float,
            Self::Color(_) => UniformKind::Color,
            Self::Bool(_) => UniformKind::Bool,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UniformKind {
    Float,
    Color,
    Bool,
}

/// One externally controllable input, as needed to build a matching control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniformDescriptor {
    pub name: String,
    pub kind: UniformKind,
    pub min: Option<f32>,
    pub max: Option<f32>,
    pub value: ParamValue,
}

/// A compiled shader program ready to draw.
pub trait ShaderProgram: fmt::Debug {
    /// Declared uniform set in declaration order, with current values.
    fn uniforms(&self) -> Vec<UniformDescriptor>;

    fn get_value(&self, name: &str) -> Option<ParamValue>;

    fn set_value(&mut self, name: &str, value: ParamValue) -> Result<()>;

    /// Evaluates the program at `time_seconds` into `surface`.
    fn draw(&mut self, surface: &mut Surface, time_seconds: f64);
}

pub trait ShaderLibrary {
    /// Compiles shader source text. Compile failures surface as
    /// `BackendInit` with a human-readable message.
    fn compile(&self, source: &str) -> Result<Box<dyn ShaderProgram>>;
}

/// Preset-driven, audio-reactive renderer bound to one surface size.
pub trait GenerativeRenderer: fmt::Debug {
    /// Switches to `preset`, blending over `transition_seconds` (0 cuts).
    fn load_preset(&mut self, preset: &PresetPayload, transition_seconds: f32) -> Result<()>;

    fn connect_audio(&mut self, tap: AudioTap);

    fn disconnect_audio(&mut self) -> Option<AudioTap>;

    /// Advances the audio-reactive state and draws one frame.
    fn render(&mut self, surface: &mut Surface, time_seconds: f64);

    fn parameters(&self) -> Vec<UniformDescriptor> {
        Vec::new()
    }

    fn set_parameter(&mut self, name: &str, _value: ParamValue) -> Result<()> {
        Err(crate::CompositorError::invalid(format!("unknown parameter `{name}`")))
    }
}

pub trait GenerativeLibrary {
    /// Fails with `ResourceExhausted` when the target size cannot be served.
    fn create_renderer(&self, size: SurfaceSize) -> Result<Box<dyn GenerativeRenderer>>;
}

pub(crate) fn find_parameter(params: &[UniformDescriptor], name: &str) -> Option<ParamValue> {
    params.iter().find(|p| p.name == name).map(|p| p.value)
}
