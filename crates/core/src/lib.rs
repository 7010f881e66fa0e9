//! Core library for the layerdeck live compositor.
//!
//! Four layer slots each hold one piece of visual content (still or
//! animated image, looping video, shader program, audio-reactive generative
//! preset). Each layer renders into its own preview surface and, while an
//! external display is open, into an independent mirror backend whose
//! output is composited bottom-to-top at the layer's opacity.
//!
//! [`Compositor`] is the control surface; the other modules are the parts it
//! coordinates and are public for embedding and testing.

pub mod analysis;
pub mod assets;
pub mod audio;
pub mod backend;
pub mod compositor;
pub mod config;
pub mod error;
pub mod layer;
pub mod output;
pub mod presets;
pub mod render;
pub mod surface;
pub mod timeline;

pub use analysis::{AnalysisEngine, AnalysisFrame};
pub use assets::{AnimatedImage, ContentLoader, FileLoader, ImageFrame, MediaFile, VideoClip};
pub use audio::{AudioNode, AudioRouter, AudioSource, AudioTap, Connection, SinkId, SourceId};
pub use backend::{BackendContext, ContentBackend};
pub use compositor::{Compositor, LayerView, Notification, PresetListView};
pub use config::{
    AppConfig, AudioConfig, OutputConfig, PresetConfig, VideoConfig, LAYER_COUNT,
};
pub use error::{CompositorError, ErrorKind, Result};
pub use layer::{
    ContentDescriptor, ContentKind, ContentPayload, ContentVersion, LayerModel, LoadTicket,
    OutputSurfaceState,
};
pub use output::SurfaceManager;
pub use presets::{
    parse_preset_text, MilkTextConverter, Preset, PresetBank, PresetBankSender, PresetCollection,
    PresetConverter, PresetLoad, PresetPayload, PresetSelector,
};
pub use render::{ParamValue, UniformDescriptor, UniformKind};
pub use surface::{RasterImage, Surface, SurfaceSize};
pub use timeline::{FrameScheduler, PlaybackClock, TickStats};
