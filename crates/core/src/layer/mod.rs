//! Per-slot layer state: content, backend, preview surface and the optional
//! mirror bound to the external display.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    AnimatedImage, AudioRouter, CompositorError, ContentBackend, Preset, PresetSelector, Result,
    Surface, VideoClip,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    StaticImage,
    Video,
    ShaderProgram,
    GenerativeAudioReactive,
}

impl ContentKind {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "gif" | "png" | "jpg" | "jpeg" => Some(Self::StaticImage),
            "mp4" | "webm" | "mov" => Some(Self::Video),
            "isf" | "fs" | "frag" => Some(Self::ShaderProgram),
            "json" | "milk" => Some(Self::GenerativeAudioReactive),
            _ => None,
        }
    }

    /// Detects the kind from a file name's extension.
    pub fn from_file_name(name: &str) -> Result<Self> {
        name.rsplit_once('.')
            .and_then(|(_, ext)| Self::from_extension(ext))
            .ok_or_else(|| CompositorError::unsupported(format!("unsupported file kind: {name}")))
    }

    pub fn is_audio_reactive(&self) -> bool {
        matches!(self, Self::GenerativeAudioReactive)
    }
}

/// Raw, decoded source material for a backend.
#[derive(Debug, Clone)]
pub enum ContentPayload {
    Image(AnimatedImage),
    Video(VideoClip),
    ShaderSource(String),
    Preset(Preset),
}

impl ContentPayload {
    pub fn kind(&self) -> ContentKind {
        match self {
            Self::Image(_) => ContentKind::StaticImage,
            Self::Video(_) => ContentKind::Video,
            Self::ShaderSource(_) => ContentKind::ShaderProgram,
            Self::Preset(_) => ContentKind::GenerativeAudioReactive,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContentDescriptor {
    pub name: String,
    pub payload: ContentPayload,
}

impl ContentDescriptor {
    pub fn new(name: impl Into<String>, payload: ContentPayload) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }

    pub fn kind(&self) -> ContentKind {
        self.payload.kind()
    }
}

/// Per-layer load counter. Only the completion carrying the latest version
/// may install content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ContentVersion(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadTicket {
    pub layer: usize,
    pub version: ContentVersion,
}

/// Mirror backend and its raster target on the external display.
#[derive(Debug)]
pub struct OutputSurfaceState {
    pub backend: Box<dyn ContentBackend>,
    pub surface: Surface,
}

pub struct LayerModel {
    id: usize,
    opacity: f32,
    content: Option<ContentDescriptor>,
    backend: Option<Box<dyn ContentBackend>>,
    preview: Option<Surface>,
    output: Option<OutputSurfaceState>,
    presets: Option<PresetSelector>,
    requested: ContentVersion,
    installed: ContentVersion,
}

impl LayerModel {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            opacity: 1.0,
            content: None,
            backend: None,
            preview: None,
            output: None,
            presets: None,
            requested: ContentVersion::default(),
            installed: ContentVersion::default(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    /// Stores `value` exactly; values outside `[0, 1]` are rejected.
    pub fn set_opacity(&mut self, value: f32) -> Result<()> {
        if !(0.0..=1.0).contains(&value) {
            return Err(CompositorError::invalid(format!(
                "opacity {value} is outside [0, 1]"
            )));
        }
        self.opacity = value;
        Ok(())
    }

    pub fn content(&self) -> Option<&ContentDescriptor> {
        self.content.as_ref()
    }

    pub fn kind(&self) -> Option<ContentKind> {
        self.content.as_ref().map(ContentDescriptor::kind)
    }

    pub fn backend(&self) -> Option<&dyn ContentBackend> {
        self.backend.as_deref()
    }

    pub fn backend_mut(&mut self) -> Option<&mut (dyn ContentBackend + 'static)> {
        self.backend.as_deref_mut()
    }

    pub fn preview(&self) -> Option<&Surface> {
        self.preview.as_ref()
    }

    pub fn output(&self) -> Option<&OutputSurfaceState> {
        self.output.as_ref()
    }

    pub fn output_mut(&mut self) -> Option<&mut OutputSurfaceState> {
        self.output.as_mut()
    }

    pub fn presets(&self) -> Option<&PresetSelector> {
        self.presets.as_ref()
    }

    pub fn presets_mut(&mut self) -> Option<&mut PresetSelector> {
        self.presets.as_mut()
    }

    /// Starts a new load, invalidating any load still in flight.
    pub fn begin_load(&mut self) -> LoadTicket {
        self.requested = ContentVersion(self.requested.0 + 1);
        LoadTicket {
            layer: self.id,
            version: self.requested,
        }
    }

    pub fn is_current(&self, ticket: &LoadTicket) -> bool {
        ticket.layer == self.id && ticket.version == self.requested
    }

    pub fn is_loading(&self) -> bool {
        self.requested > self.installed
    }

    /// Marks the load identified by `ticket` as settled without installing.
    pub fn settle(&mut self, ticket: &LoadTicket) {
        if self.is_current(ticket) {
            self.installed = ticket.version;
        }
    }

    /// Replaces content and backend in one step. The previous backend and any
    /// mirror of it are released first.
    pub fn install(
        &mut self,
        content: ContentDescriptor,
        backend: Box<dyn ContentBackend>,
        preview: Surface,
        presets: Option<PresetSelector>,
        audio: &mut AudioRouter,
    ) {
        self.release_output(audio);
        if let Some(mut previous) = self.backend.take() {
            tracing::debug!(layer = self.id, kind = ?previous.kind(), "releasing backend");
            previous.release(audio);
        }
        tracing::info!(
            layer = self.id,
            kind = ?content.kind(),
            name = %content.name,
            "installed backend"
        );
        self.content = Some(content);
        self.backend = Some(backend);
        self.preview = Some(preview);
        self.presets = presets;
        self.installed = self.requested;
    }

    /// Installs a mirror, releasing the one it replaces.
    pub fn install_output(&mut self, output: OutputSurfaceState, audio: &mut AudioRouter) {
        self.release_output(audio);
        self.output = Some(output);
    }

    pub fn release_output(&mut self, audio: &mut AudioRouter) {
        if let Some(mut output) = self.output.take() {
            tracing::debug!(layer = self.id, "releasing mirror backend");
            output.backend.release(audio);
        }
    }

    /// Renders the preview backend, if any. Returns whether a frame was drawn.
    pub fn render_preview(&mut self, time: f64) -> bool {
        match (self.backend.as_mut(), self.preview.as_mut()) {
            (Some(backend), Some(surface)) => {
                backend.render_frame(surface, time);
                true
            }
            _ => false,
        }
    }

    /// Renders the mirror backend, if any. Returns whether a frame was drawn.
    pub fn render_output(&mut self, time: f64) -> bool {
        match self.output.as_mut() {
            Some(output) => {
                output.backend.render_frame(&mut output.surface, time);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for LayerModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LayerModel")
            .field("id", &self.id)
            .field("opacity", &self.opacity)
            .field("kind", &self.kind())
            .field("mirrored", &self.output.is_some())
            .field("requested", &self.requested)
            .field("installed", &self.installed)
            .finish()
    }
}
