//! Rendering strategies, one per content kind.
//!
//! The scheduler and the surface manager only ever talk to
//! [`ContentBackend`]; kind-specific behaviour (mirroring included) lives in
//! the implementers.

mod generative;
mod shader;
mod still;
mod video;

use std::fmt;

use crate::render::{GenerativeLibrary, ParamValue, ShaderLibrary, UniformDescriptor};
use crate::{
    AudioRouter, CompositorError, ContentDescriptor, ContentKind, ContentPayload, Preset, Result,
    SinkId, Surface, SurfaceSize,
};

pub use generative::GenerativeBackend;
pub use shader::ShaderBackend;
pub use still::StaticImageBackend;
pub use video::VideoBackend;

/// Collaborators a backend may need while being constructed.
pub struct BackendContext<'a> {
    pub shaders: &'a dyn ShaderLibrary,
    pub generative: &'a dyn GenerativeLibrary,
    pub audio: &'a mut AudioRouter,
}

pub trait ContentBackend: fmt::Debug {
    fn kind(&self) -> ContentKind;

    /// Draws one frame. `time` is the shared monotonic clock in seconds.
    fn render_frame(&mut self, surface: &mut Surface, time: f64);

    /// Releases playback and audio resources. Idempotent.
    fn release(&mut self, audio: &mut AudioRouter);

    /// Builds an independent instance for a surface of `size`, starting from
    /// this backend's current observable state.
    fn mirror(&self, ctx: &mut BackendContext<'_>, size: SurfaceSize)
        -> Result<Box<dyn ContentBackend>>;

    /// Externally controllable inputs with their current values.
    fn parameters(&self) -> Vec<UniformDescriptor> {
        Vec::new()
    }

    fn get_parameter(&self, name: &str) -> Option<ParamValue> {
        self.parameters()
            .into_iter()
            .find(|p| p.name == name)
            .map(|p| p.value)
    }

    fn set_parameter(&mut self, name: &str, _value: ParamValue) -> Result<()> {
        Err(CompositorError::invalid(format!(
            "{:?} content has no parameter `{name}`",
            self.kind()
        )))
    }

    /// Requests a switch to `preset` blended over `transition_seconds`.
    fn load_preset(&mut self, _preset: &Preset, _transition_seconds: f32) -> Result<()> {
        Err(CompositorError::invalid(format!(
            "{:?} content does not take presets",
            self.kind()
        )))
    }

    fn current_preset(&self) -> Option<&Preset> {
        None
    }

    /// Audio fan-out registration, for audio-reactive backends.
    fn audio_sink(&self) -> Option<SinkId> {
        None
    }
}

/// Constructs the backend for `descriptor` targeting a surface of `size`.
/// Nothing is registered anywhere unless construction fully succeeds.
pub fn initialize(
    descriptor: &ContentDescriptor,
    size: SurfaceSize,
    ctx: &mut BackendContext<'_>,
) -> Result<Box<dyn ContentBackend>> {
    size.ensure_allocatable()?;
    let backend: Box<dyn ContentBackend> = match &descriptor.payload {
        ContentPayload::Image(image) => Box::new(StaticImageBackend::new(image.clone())),
        ContentPayload::Video(clip) => Box::new(VideoBackend::new(clip.clone())),
        ContentPayload::ShaderSource(source) => Box::new(ShaderBackend::compile(source, ctx)?),
        ContentPayload::Preset(preset) => {
            Box::new(GenerativeBackend::create(preset.clone(), size, ctx)?)
        }
    };
    tracing::debug!(kind = ?backend.kind(), name = %descriptor.name, ?size, "backend ready");
    Ok(backend)
}
