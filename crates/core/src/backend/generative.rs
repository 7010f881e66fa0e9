use super::{BackendContext, ContentBackend};
use crate::render::{find_parameter, GenerativeRenderer, ParamValue, UniformDescriptor};
use crate::{AudioRouter, ContentKind, Preset, Result, SinkId, Surface, SurfaceSize};

/// Preset-driven audio-reactive renderer registered as an audio sink.
#[derive(Debug)]
pub struct GenerativeBackend {
    renderer: Box<dyn GenerativeRenderer>,
    preset: Preset,
    sink: Option<SinkId>,
}

impl GenerativeBackend {
    /// Creates the renderer, loads `preset` as an instant cut, then joins the
    /// audio fan-out.
    pub fn create(preset: Preset, size: SurfaceSize, ctx: &mut BackendContext<'_>) -> Result<Self> {
        let mut renderer = ctx.generative.create_renderer(size)?;
        renderer.load_preset(&preset.payload, 0.0)?;

        let tap = ctx.audio.register_sink();
        let sink = tap.id();
        renderer.connect_audio(tap);
        Ok(Self {
            renderer,
            preset,
            sink: Some(sink),
        })
    }
}

impl ContentBackend for GenerativeBackend {
    fn kind(&self) -> ContentKind {
        ContentKind::GenerativeAudioReactive
    }

    fn render_frame(&mut self, surface: &mut Surface, time: f64) {
        self.renderer.render(surface, time);
    }

    fn release(&mut self, audio: &mut AudioRouter) {
        if let Some(sink) = self.sink.take() {
            audio.unregister_sink(sink);
            self.renderer.disconnect_audio();
        }
    }

    /// New renderer at the mirror size with the active preset loaded as a cut.
    fn mirror(
        &self,
        ctx: &mut BackendContext<'_>,
        size: SurfaceSize,
    ) -> Result<Box<dyn ContentBackend>> {
        Ok(Box::new(Self::create(self.preset.clone(), size, ctx)?))
    }

    fn parameters(&self) -> Vec<UniformDescriptor> {
        self.renderer.parameters()
    }

    fn get_parameter(&self, name: &str) -> Option<ParamValue> {
        find_parameter(&self.renderer.parameters(), name)
    }

    fn set_parameter(&mut self, name: &str, value: ParamValue) -> Result<()> {
        self.renderer.set_parameter(name, value)
    }

    fn load_preset(&mut self, preset: &Preset, transition_seconds: f32) -> Result<()> {
        self.renderer.load_preset(&preset.payload, transition_seconds)?;
        tracing::debug!(preset = %preset.name, transition_seconds, "loaded preset");
        self.preset = preset.clone();
        Ok(())
    }

    fn current_preset(&self) -> Option<&Preset> {
        Some(&self.preset)
    }

    fn audio_sink(&self) -> Option<SinkId> {
        self.sink
    }
}
