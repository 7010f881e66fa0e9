//! The engine facade: owns the layers and the shared services and exposes the
//! request API used by a UI or the CLI.
//!
//! All mutation happens on the thread that owns the [`Compositor`]. File
//! decoding runs on worker threads and comes back through a channel that is
//! drained at the start of every tick, so a backend is never observed
//! half-built.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::backend::{self, BackendContext};
use crate::render::{GenerativeLibrary, PlasmaLibrary, ShaderLibrary, SoftwareShaderLibrary};
use crate::{
    AppConfig, AudioRouter, AudioSource, CompositorError, ContentDescriptor, ContentKind,
    ContentLoader, ContentPayload, ErrorKind, FileLoader, FrameScheduler, LayerModel, LoadTicket,
    MediaFile, ParamValue, PresetBank, PresetLoad, PresetSelector, Result, SourceId, Surface,
    SurfaceManager, SurfaceSize, TickStats, UniformDescriptor, LAYER_COUNT,
};

/// A user-visible report of a failed or refused request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub layer: Option<usize>,
    pub kind: ErrorKind,
    pub message: String,
    /// The same request may succeed if retried later.
    pub transient: bool,
}

impl Notification {
    fn from_error(layer: Option<usize>, err: &CompositorError) -> Self {
        Self {
            layer,
            kind: err.kind(),
            message: err.to_string(),
            transient: err.is_transient(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PresetListView {
    pub labels: Vec<String>,
    pub index: Option<usize>,
}

/// What a UI needs to draw the controls for one layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerView {
    pub id: usize,
    pub opacity: f32,
    pub kind: Option<ContentKind>,
    pub name: Option<String>,
    pub loading: bool,
    pub mirrored: bool,
    pub parameters: Vec<UniformDescriptor>,
    pub presets: Option<PresetListView>,
}

struct LoadOutcome {
    ticket: LoadTicket,
    result: Result<ContentDescriptor>,
}

pub struct Compositor {
    config: AppConfig,
    layers: Vec<LayerModel>,
    audio: AudioRouter,
    surfaces: SurfaceManager,
    scheduler: FrameScheduler,
    shaders: Box<dyn ShaderLibrary>,
    generative: Box<dyn GenerativeLibrary>,
    loader: Arc<dyn ContentLoader>,
    bank: PresetBank,
    rng: fastrand::Rng,
    loads_tx: Sender<LoadOutcome>,
    loads_rx: Receiver<LoadOutcome>,
    in_flight: usize,
    notifications: Vec<Notification>,
}

impl Compositor {
    /// Builds a compositor with the software rendering libraries, the file
    /// loader and no preset bank.
    pub fn new(config: AppConfig) -> Result<Self> {
        config.validate()?;
        let (loads_tx, loads_rx) = mpsc::channel();
        Ok(Self {
            layers: (0..LAYER_COUNT).map(LayerModel::new).collect(),
            audio: AudioRouter::new(&config.audio),
            surfaces: SurfaceManager::new(),
            scheduler: FrameScheduler::new(config.output.refresh_hz),
            shaders: Box::new(SoftwareShaderLibrary),
            generative: Box::new(PlasmaLibrary),
            loader: Arc::new(FileLoader::new(config.video.clone())),
            bank: PresetBank::unavailable(),
            rng: fastrand::Rng::new(),
            loads_tx,
            loads_rx,
            in_flight: 0,
            notifications: Vec::new(),
            config,
        })
    }

    pub fn with_shader_library(mut self, shaders: Box<dyn ShaderLibrary>) -> Self {
        self.shaders = shaders;
        self
    }

    pub fn with_generative_library(mut self, generative: Box<dyn GenerativeLibrary>) -> Self {
        self.generative = generative;
        self
    }

    pub fn with_loader(mut self, loader: Arc<dyn ContentLoader>) -> Self {
        self.loader = loader;
        self
    }

    pub fn with_preset_bank(mut self, bank: PresetBank) -> Self {
        self.bank = bank;
        self
    }

    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = fastrand::Rng::with_seed(seed);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Polls the shared bank; true once `request_preset_bank` can succeed
    /// without an `EmptyCollection` refusal.
    pub fn preset_bank_ready(&mut self) -> bool {
        self.bank.poll().is_some_and(|bank| !bank.is_empty())
    }

    pub fn layers(&self) -> &[LayerModel] {
        &self.layers
    }

    pub fn layer(&self, id: usize) -> Result<&LayerModel> {
        self.layers.get(id).ok_or(CompositorError::UnknownLayer(id))
    }

    pub fn audio(&self) -> &AudioRouter {
        &self.audio
    }

    pub fn surfaces(&self) -> &SurfaceManager {
        &self.surfaces
    }

    pub fn scheduler(&self) -> &FrameScheduler {
        &self.scheduler
    }

    pub fn pending_loads(&self) -> usize {
        self.in_flight
    }

    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.notifications)
    }

    pub fn layer_views(&self) -> Vec<LayerView> {
        let label_limit = self.config.presets.label_limit;
        self.layers
            .iter()
            .map(|layer| LayerView {
                id: layer.id(),
                opacity: layer.opacity(),
                kind: layer.kind(),
                name: layer.content().map(|c| c.name.clone()),
                loading: layer.is_loading(),
                mirrored: layer.output().is_some(),
                parameters: layer.backend().map(|b| b.parameters()).unwrap_or_default(),
                presets: layer.presets().map(|selector| PresetListView {
                    labels: selector.labels(label_limit),
                    index: selector.index(),
                }),
            })
            .collect()
    }

    pub fn request_opacity(&mut self, layer: usize, value: f32) -> Result<()> {
        self.layer_mut(layer)?.set_opacity(value)
    }

    /// Starts decoding `file` for `layer` in the background. The layer keeps
    /// its current content until the decoded result is installed by a later
    /// tick; an unsupported file kind is refused up front.
    pub fn request_file(&mut self, layer: usize, file: MediaFile) -> Result<LoadTicket> {
        self.layer(layer)?;
        let kind = match file.kind() {
            Ok(kind) => kind,
            Err(err) => return Err(self.report(Some(layer), err)),
        };
        let ticket = self.layer_mut(layer)?.begin_load();
        tracing::info!(layer, file = %file.name, ?kind, version = ?ticket.version, "loading file");

        let loader = Arc::clone(&self.loader);
        let tx = self.loads_tx.clone();
        self.in_flight += 1;
        thread::spawn(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(|| loader.load(&file, kind)))
                .unwrap_or_else(|payload| {
                    Err(CompositorError::decode(format!(
                        "decoder for {} panicked: {}",
                        file.name,
                        panic_message(payload.as_ref())
                    )))
                });
            // The compositor may be gone; nothing left to report to.
            let _ = tx.send(LoadOutcome { ticket, result });
        });
        Ok(ticket)
    }

    /// Installs already decoded content on `layer` immediately.
    pub fn request_content(
        &mut self,
        layer: usize,
        content: ContentDescriptor,
    ) -> Result<LoadTicket> {
        let ticket = self.layer_mut(layer)?.begin_load();
        let presets = self.one_off_presets(&content);
        self.install_or_report(ticket, content, presets)?;
        Ok(ticket)
    }

    /// Puts a generative backend on `layer` with a random preset from the
    /// shared bank. Refused with a transient `EmptyCollection` while the bank
    /// is not available yet.
    pub fn request_preset_bank(&mut self, layer: usize) -> Result<usize> {
        self.layer(layer)?;
        let collection = match self.bank.poll() {
            Some(collection) if !collection.is_empty() => collection,
            _ => return Err(self.report(Some(layer), CompositorError::EmptyCollection)),
        };
        let mut selector = PresetSelector::new(collection, self.config.presets.crossfade_seconds);
        let load = selector.select_random(&mut self.rng)?;
        let content =
            ContentDescriptor::new(load.preset.name.clone(), ContentPayload::Preset(load.preset));
        let ticket = self.layer_mut(layer)?.begin_load();
        self.install_or_report(ticket, content, Some(selector))?;
        Ok(load.index)
    }

    pub fn request_preset_next(&mut self, layer: usize) -> Result<Option<usize>> {
        self.switch_preset(layer, PresetSelector::select_next)
    }

    pub fn request_preset_previous(&mut self, layer: usize) -> Result<Option<usize>> {
        self.switch_preset(layer, PresetSelector::select_previous)
    }

    pub fn request_preset_explicit(&mut self, layer: usize, index: usize) -> Result<Option<usize>> {
        self.switch_preset(layer, |selector| selector.select_explicit(index).map(Some))
    }

    /// Sets a shader uniform or renderer parameter on the layer and on its
    /// mirror, if one exists.
    pub fn request_parameter(&mut self, layer: usize, name: &str, value: ParamValue) -> Result<()> {
        let model = self.layer_mut(layer)?;
        let backend = model
            .backend_mut()
            .ok_or_else(|| CompositorError::invalid(format!("layer {layer} has no content")))?;
        backend.set_parameter(name, value)?;
        if let Some(output) = model.output_mut() {
            if let Err(err) = output.backend.set_parameter(name, value) {
                tracing::warn!(layer, parameter = name, %err, "mirror rejected parameter");
            }
        }
        Ok(())
    }

    pub fn request_audio_source(&mut self, source: AudioSource) -> SourceId {
        self.audio.set_source(source)
    }

    pub fn clear_audio_source(&mut self) {
        self.audio.clear_source();
    }

    /// Feeds captured or decoded samples from the current source.
    pub fn push_audio(&mut self, samples: &[f32]) -> Result<()> {
        self.audio.push_samples(samples)
    }

    /// Opens the external display at the configured size. Returns false if it
    /// was already open.
    pub fn request_output_display_open(&mut self) -> Result<bool> {
        let size = self.config.output.size();
        let mut ctx = BackendContext {
            shaders: self.shaders.as_ref(),
            generative: self.generative.as_ref(),
            audio: &mut self.audio,
        };
        let (opened, failures) = self.surfaces.open(size, &mut self.layers, &mut ctx)?;
        for (layer, err) in failures {
            self.report(Some(layer), err);
        }
        Ok(opened)
    }

    pub fn request_output_display_close(&mut self) -> bool {
        let mut ctx = BackendContext {
            shaders: self.shaders.as_ref(),
            generative: self.generative.as_ref(),
            audio: &mut self.audio,
        };
        self.surfaces.close(&mut self.layers, &mut ctx)
    }

    /// Changes the output size; an open display is re-created with fresh
    /// mirrors.
    pub fn request_output_display_resize(&mut self, size: SurfaceSize) -> Result<()> {
        size.ensure_allocatable()?;
        self.config.output.width = size.width;
        self.config.output.height = size.height;
        if !self.surfaces.is_open() {
            return Ok(());
        }
        let mut ctx = BackendContext {
            shaders: self.shaders.as_ref(),
            generative: self.generative.as_ref(),
            audio: &mut self.audio,
        };
        let failures = self.surfaces.resize(size, &mut self.layers, &mut ctx)?;
        for (layer, err) in failures {
            self.report(Some(layer), err);
        }
        Ok(())
    }

    pub fn output_composite(&self) -> Option<&Surface> {
        self.surfaces.display().map(|display| display.composite())
    }

    /// Applies every finished background load without blocking.
    pub fn poll_loads(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(outcome) = self.loads_rx.try_recv() {
            self.apply_outcome(outcome);
            applied += 1;
        }
        applied
    }

    /// Blocks until every background load has been applied or `timeout`
    /// passes. Returns whether nothing is left in flight.
    pub fn wait_for_loads(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.in_flight > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.loads_rx.recv_timeout(remaining) {
                Ok(outcome) => self.apply_outcome(outcome),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    return false
                }
            }
        }
        true
    }

    pub fn tick(&mut self) -> TickStats {
        let time = self.scheduler.now();
        self.tick_at(time)
    }

    /// One frame at an explicit clock reading: apply finished loads, render
    /// every layer, then composite the output.
    pub fn tick_at(&mut self, time: f64) -> TickStats {
        self.poll_loads();
        self.bank.poll();
        let stats = self.scheduler.render_tick(&mut self.layers, time);
        self.surfaces.composite(&self.layers);
        stats
    }

    /// Runs `frames` ticks at the display cadence, calling `on_tick` after
    /// each one.
    pub fn run(
        &mut self,
        frames: u64,
        mut on_tick: impl FnMut(&mut Self, &TickStats),
    ) -> Option<TickStats> {
        let mut last = None;
        for _ in 0..frames {
            let stats = self.tick();
            on_tick(self, &stats);
            last = Some(stats);
            self.scheduler.wait_for_next_frame();
        }
        last
    }

    fn layer_mut(&mut self, id: usize) -> Result<&mut LayerModel> {
        self.layers.get_mut(id).ok_or(CompositorError::UnknownLayer(id))
    }

    /// A preset file owns a single-entry collection named after the file.
    fn one_off_presets(&self, content: &ContentDescriptor) -> Option<PresetSelector> {
        match &content.payload {
            ContentPayload::Preset(preset) => Some(PresetSelector::one_off(
                preset.clone(),
                self.config.presets.crossfade_seconds,
            )),
            _ => None,
        }
    }

    fn apply_outcome(&mut self, outcome: LoadOutcome) {
        self.in_flight = self.in_flight.saturating_sub(1);
        let LoadOutcome { ticket, result } = outcome;
        let Some(layer) = self.layers.get_mut(ticket.layer) else {
            return;
        };
        if !layer.is_current(&ticket) {
            tracing::debug!(
                layer = ticket.layer,
                version = ?ticket.version,
                "discarding stale load"
            );
            return;
        }
        match result {
            Ok(content) => {
                let presets = self.one_off_presets(&content);
                // Failures are already reported.
                let _ = self.install_or_report(ticket, content, presets);
            }
            Err(err) => {
                layer.settle(&ticket);
                self.report(Some(ticket.layer), err);
            }
        }
    }

    /// Builds the backend for `content` and swaps it in only once it is
    /// ready. On failure the layer keeps its previous content.
    fn install_or_report(
        &mut self,
        ticket: LoadTicket,
        content: ContentDescriptor,
        presets: Option<PresetSelector>,
    ) -> Result<()> {
        let id = ticket.layer;
        let size = self.config.preview;
        let Some(layer) = self.layers.get_mut(id) else {
            return Err(CompositorError::UnknownLayer(id));
        };
        let mut ctx = BackendContext {
            shaders: self.shaders.as_ref(),
            generative: self.generative.as_ref(),
            audio: &mut self.audio,
        };
        let built = Surface::new(size).and_then(|preview| {
            backend::initialize(&content, size, &mut ctx).map(|backend| (backend, preview))
        });
        let (backend, preview) = match built {
            Ok(parts) => parts,
            Err(err) => {
                layer.settle(&ticket);
                return Err(self.report(Some(id), err));
            }
        };
        layer.install(content, backend, preview, presets, ctx.audio);
        let mirrored = self.surfaces.sync_layer(layer, &mut ctx);
        if let Err(err) = mirrored {
            self.report(Some(id), err);
        }
        Ok(())
    }

    /// Runs a selection on a copy of the layer's selector and commits it only
    /// if the backend accepted the preset.
    fn switch_preset(
        &mut self,
        layer: usize,
        select: impl FnOnce(&mut PresetSelector) -> Result<Option<PresetLoad>>,
    ) -> Result<Option<usize>> {
        let mut selector = self
            .layer(layer)?
            .presets()
            .cloned()
            .ok_or_else(|| CompositorError::invalid(format!("layer {layer} has no presets")))?;
        let load = match select(&mut selector) {
            Ok(Some(load)) => load,
            Ok(None) => return Ok(None),
            Err(err) => return Err(self.report(Some(layer), err)),
        };
        let model = self.layer_mut(layer)?;
        let applied = match model.backend_mut() {
            Some(backend) => backend.load_preset(&load.preset, load.transition_seconds),
            None => Err(CompositorError::invalid(format!("layer {layer} has no content"))),
        };
        if let Err(err) = applied {
            return Err(self.report(Some(layer), err));
        }
        if let Some(output) = model.output_mut() {
            if let Err(err) = output.backend.load_preset(&load.preset, load.transition_seconds) {
                tracing::warn!(layer, %err, "mirror rejected preset");
            }
        }
        if let Some(current) = model.presets_mut() {
            *current = selector;
        }
        tracing::info!(layer, index = load.index, preset = %load.preset.name, "switched preset");
        Ok(Some(load.index))
    }

    fn report(&mut self, layer: Option<usize>, err: CompositorError) -> CompositorError {
        tracing::warn!(?layer, kind = ?err.kind(), %err, "request failed");
        self.notifications.push(Notification::from_error(layer, &err));
        err
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown cause")
}

impl std::fmt::Debug for Compositor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compositor")
            .field("layers", &self.layers)
            .field("audio", &self.audio)
            .field("surfaces", &self.surfaces)
            .field("bank", &self.bank)
            .field("in_flight", &self.in_flight)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{Preset, PresetPayload};

    const SHADER: &str = r#"/*{ "INPUTS": [
        { "NAME": "speed", "TYPE": "float", "MIN": 0.0, "MAX": 4.0, "DEFAULT": 1.0 },
        { "NAME": "tint", "TYPE": "color", "DEFAULT": [1.0, 0.5, 0.0, 1.0] }
    ] }*/
    void main() { gl_FragColor = vec4(1.0); }
    "#;

    fn small_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.preview = SurfaceSize::new(16, 12);
        config.output.width = 32;
        config.output.height = 24;
        config
    }

    fn preset(name: &str, zoom: f64) -> Preset {
        Preset::new(name, PresetPayload::new(json!({ "baseVals": { "zoom": zoom } })))
    }

    fn shader_content() -> ContentDescriptor {
        ContentDescriptor::new("rings.fs", ContentPayload::ShaderSource(SHADER.to_string()))
    }

    #[test]
    fn starts_with_four_empty_layers() {
        let compositor = Compositor::new(small_config()).unwrap();
        let views = compositor.layer_views();
        assert_eq!(views.len(), LAYER_COUNT);
        assert!(views.iter().all(|v| v.kind.is_none() && v.opacity == 1.0));
        assert!(matches!(compositor.layer(7), Err(CompositorError::UnknownLayer(7))));
    }

    #[test]
    fn rejects_out_of_range_opacity_without_mutation() {
        let mut compositor = Compositor::new(small_config()).unwrap();
        compositor.request_opacity(1, 0.25).unwrap();
        assert!(compositor.request_opacity(1, 1.5).is_err());
        assert!(compositor.request_opacity(1, f32::NAN).is_err());
        assert_eq!(compositor.layer(1).unwrap().opacity(), 0.25);
    }

    #[test]
    fn bank_requests_are_transient_until_the_bank_arrives() {
        let (sender, bank) = PresetBank::pending();
        let mut compositor = Compositor::new(small_config())
            .unwrap()
            .with_preset_bank(bank)
            .with_rng_seed(7);

        let err = compositor.request_preset_bank(0).unwrap_err();
        assert!(err.is_transient());
        let notes = compositor.drain_notifications();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].kind, ErrorKind::EmptyCollection);
        assert!(notes[0].transient);
        assert!(compositor.layer(0).unwrap().backend().is_none());

        assert!(sender.publish(vec![preset("a", 1.0), preset("b", 1.1), preset("c", 1.2)]));
        let index = compositor.request_preset_bank(0).unwrap();
        let layer = compositor.layer(0).unwrap();
        assert_eq!(layer.kind(), Some(ContentKind::GenerativeAudioReactive));
        assert_eq!(layer.presets().unwrap().index(), Some(index));
        assert_eq!(compositor.audio().sink_count(), 1);
    }

    #[test]
    fn bank_readiness_is_silent_while_pending() {
        let (sender, bank) = PresetBank::pending();
        let mut compositor = Compositor::new(small_config()).unwrap().with_preset_bank(bank);

        assert!(!compositor.preset_bank_ready());
        assert!(compositor.drain_notifications().is_empty());

        assert!(sender.publish(vec![preset("a", 1.0)]));
        assert!(compositor.preset_bank_ready());
        assert!(compositor.request_preset_bank(1).is_ok());
        assert!(compositor.drain_notifications().is_empty());
    }

    #[test]
    fn empty_or_missing_banks_never_report_ready() {
        let mut compositor = Compositor::new(small_config()).unwrap();
        assert!(!compositor.preset_bank_ready());

        let mut compositor = compositor.with_preset_bank(PresetBank::ready(Vec::new()));
        assert!(!compositor.preset_bank_ready());
    }

    #[test]
    fn preset_switches_reach_the_mirror() {
        let bank = PresetBank::ready(vec![preset("a", 1.0), preset("b", 1.1)]);
        let mut compositor = Compositor::new(small_config())
            .unwrap()
            .with_preset_bank(bank)
            .with_rng_seed(1);
        let first = compositor.request_preset_bank(2).unwrap();
        assert!(compositor.request_output_display_open().unwrap());
        assert_eq!(compositor.audio().sink_count(), 2);

        let next = compositor.request_preset_next(2).unwrap().unwrap();
        assert_eq!(next, (first + 1) % 2);
        let layer = compositor.layer(2).unwrap();
        let name = &layer.presets().unwrap().current().unwrap().name;
        assert_eq!(&layer.backend().unwrap().current_preset().unwrap().name, name);
        assert_eq!(&layer.output().unwrap().backend.current_preset().unwrap().name, name);
    }

    #[test]
    fn failed_preset_selection_leaves_the_index_alone() {
        let mut compositor = Compositor::new(small_config()).unwrap();
        let content = ContentDescriptor::new("a", ContentPayload::Preset(preset("a", 1.0)));
        compositor.request_content(0, content).unwrap();
        assert_eq!(compositor.request_preset_next(0).unwrap(), None);
        assert!(compositor.request_preset_explicit(0, 3).is_err());
        assert_eq!(compositor.layer(0).unwrap().presets().unwrap().index(), Some(0));
        assert!(compositor.request_preset_next(1).is_err());
    }

    #[test]
    fn parameters_are_forwarded_to_the_mirror() {
        let mut compositor = Compositor::new(small_config()).unwrap();
        compositor.request_content(1, shader_content()).unwrap();
        compositor.request_output_display_open().unwrap();
        compositor.request_parameter(1, "speed", ParamValue::Float(3.0)).unwrap();

        let layer = compositor.layer(1).unwrap();
        assert_eq!(layer.backend().unwrap().get_parameter("speed"), Some(ParamValue::Float(3.0)));
        assert_eq!(
            layer.output().unwrap().backend.get_parameter("speed"),
            Some(ParamValue::Float(3.0))
        );
        assert!(compositor.request_parameter(1, "missing", ParamValue::Bool(true)).is_err());
    }

    #[test]
    fn broken_shader_keeps_previous_content() {
        let mut compositor = Compositor::new(small_config()).unwrap();
        compositor.request_content(0, shader_content()).unwrap();
        let broken =
            ContentDescriptor::new("bad.fs", ContentPayload::ShaderSource("void main( {".into()));
        let err = compositor.request_content(0, broken).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BackendInit);

        let layer = compositor.layer(0).unwrap();
        assert_eq!(layer.content().unwrap().name, "rings.fs");
        assert!(!layer.is_loading());
        assert_eq!(compositor.drain_notifications().len(), 1);
    }

    #[test]
    fn loads_files_in_the_background() {
        let mut compositor = Compositor::new(small_config()).unwrap();
        let file = MediaFile::from_bytes("rings.fs", SHADER.as_bytes().to_vec());
        compositor.request_file(3, file).unwrap();
        assert!(compositor.layer(3).unwrap().is_loading());
        assert!(compositor.wait_for_loads(Duration::from_secs(5)));

        let layer = compositor.layer(3).unwrap();
        assert_eq!(layer.kind(), Some(ContentKind::ShaderProgram));
        assert!(!layer.is_loading());
        let stats = compositor.tick_at(0.5);
        assert_eq!(stats.previews, 1);
    }

    #[test]
    fn slash_opened_comment_shader_loads_without_panicking() {
        let mut compositor = Compositor::new(small_config()).unwrap();
        let source = "/*/ plain comment */\nvoid main() {}";
        compositor
            .request_file(0, MediaFile::from_bytes("edge.fs", source.as_bytes().to_vec()))
            .unwrap();
        assert!(compositor.wait_for_loads(Duration::from_secs(5)));
        assert_eq!(compositor.layer(0).unwrap().kind(), Some(ContentKind::ShaderProgram));
        assert!(compositor.drain_notifications().is_empty());
    }

    #[test]
    fn float_controls_carry_a_display_range() {
        let mut compositor = Compositor::new(small_config()).unwrap();
        let source = r#"/*{ "INPUTS": [ { "NAME": "amt", "TYPE": "float" } ] }*/ void main() {}"#;
        let content = ContentDescriptor::new("amt.fs", ContentPayload::ShaderSource(source.into()));
        compositor.request_content(0, content).unwrap();
        let views = compositor.layer_views();
        let control = &views[0].parameters[0];
        assert_eq!(control.name, "amt");
        assert_eq!((control.min, control.max), (Some(0.0), Some(1.0)));
    }

    struct PanickingLoader;

    impl ContentLoader for PanickingLoader {
        fn load(&self, _file: &MediaFile, _kind: ContentKind) -> Result<ContentDescriptor> {
            panic!("corrupt stream");
        }
    }

    #[test]
    fn panicking_decoder_settles_the_load() {
        let mut compositor = Compositor::new(small_config())
            .unwrap()
            .with_loader(Arc::new(PanickingLoader));
        compositor
            .request_file(2, MediaFile::from_bytes("clip.png", vec![0; 4]))
            .unwrap();
        assert!(compositor.wait_for_loads(Duration::from_secs(5)));

        assert_eq!(compositor.pending_loads(), 0);
        assert!(!compositor.layer(2).unwrap().is_loading());
        let notes = compositor.drain_notifications();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].kind, ErrorKind::Decode);
        assert!(notes[0].message.contains("corrupt stream"));
    }

    #[test]
    fn decode_failures_become_notifications() {
        let mut compositor = Compositor::new(small_config()).unwrap();
        compositor
            .request_file(0, MediaFile::from_bytes("broken.png", vec![1, 2, 3]))
            .unwrap();
        assert!(compositor.wait_for_loads(Duration::from_secs(5)));
        let notes = compositor.drain_notifications();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].layer, Some(0));
        assert_eq!(notes[0].kind, ErrorKind::Decode);
        assert!(compositor.layer(0).unwrap().backend().is_none());
        assert!(!compositor.layer(0).unwrap().is_loading());
    }

    #[test]
    fn output_composite_tracks_display_state() {
        let mut compositor = Compositor::new(small_config()).unwrap();
        assert!(compositor.output_composite().is_none());
        assert!(compositor.request_output_display_open().unwrap());
        assert!(!compositor.request_output_display_open().unwrap());
        compositor.tick_at(0.0);
        let composite = compositor.output_composite().unwrap();
        assert_eq!(composite.size(), SurfaceSize::new(32, 24));
        assert_eq!(composite.pixel(0, 0), Some([0, 0, 0, 255]));

        compositor.request_output_display_resize(SurfaceSize::new(8, 8)).unwrap();
        compositor.tick_at(0.1);
        assert_eq!(compositor.output_composite().unwrap().size(), SurfaceSize::new(8, 8));
        assert!(compositor.request_output_display_close());
        assert!(compositor.output_composite().is_none());
    }
}
