//! Process-wide audio fan-out.
//!
//! One source at a time feeds a fixed delay stage, and the delayed signal is
//! routed both to the audible destination and to every registered sink. Sinks
//! are the audio-reactive backends (preview and mirror instances alike); each
//! holds an [`AudioTap`] that exposes the latest analysed block.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ringbuf::traits::{Consumer as _, Observer as _, Producer as _};
use ringbuf::HeapRb;
use serde::Serialize;

use crate::{AnalysisEngine, AnalysisFrame, AudioConfig, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SourceId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SinkId(u64);

/// Where the samples pushed into the router originate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSource {
    /// A decoded audio file played back alongside the visuals.
    File { path: PathBuf },
    /// Live capture; the caller owns the device and pushes its samples.
    Microphone { device: Option<String> },
}

impl AudioSource {
    pub fn label(&self) -> String {
        match self {
            Self::File { path } => path.display().to_string(),
            Self::Microphone { device: Some(name) } => format!("microphone ({name})"),
            Self::Microphone { device: None } => "microphone".to_string(),
        }
    }
}

/// Vertex of the routing graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AudioNode {
    Source(SourceId),
    Delay,
    Destination,
    Sink(SinkId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Connection {
    pub from: AudioNode,
    pub to: AudioNode,
}

#[derive(Debug, Default)]
struct SinkFeed {
    source: Option<SourceId>,
    frame: AnalysisFrame,
    blocks: u64,
}

/// Receiving end of the fan-out held by an audio-reactive backend.
#[derive(Clone)]
pub struct AudioTap {
    id: SinkId,
    feed: Arc<Mutex<SinkFeed>>,
}

impl AudioTap {
    pub fn id(&self) -> SinkId {
        self.id
    }

    /// Latest analysed block, or silence when disconnected.
    pub fn frame(&self) -> AnalysisFrame {
        self.lock().frame
    }

    /// Source currently feeding this tap.
    pub fn source(&self) -> Option<SourceId> {
        self.lock().source
    }

    pub fn blocks_received(&self) -> u64 {
        self.lock().blocks
    }

    fn lock(&self) -> MutexGuard<'_, SinkFeed> {
        self.feed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for AudioTap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioTap").field("id", &self.id).finish()
    }
}

/// Fixed-latency delay line inserted between the raw source and its listeners.
struct DelayStage {
    line: HeapRb<f32>,
}

impl DelayStage {
    fn new(delay_samples: usize) -> Self {
        let mut line = HeapRb::new(delay_samples + 1);
        for _ in 0..delay_samples {
            let _ = line.try_push(0.0);
        }
        Self { line }
    }

    fn process(&mut self, input: &[f32]) -> Vec<f32> {
        input
            .iter()
            .map(|sample| {
                let _ = self.line.try_push(*sample);
                self.line.try_pop().unwrap_or(0.0)
            })
            .collect()
    }

    fn latency(&self) -> usize {
        self.line.occupied_len()
    }
}

struct ActiveSource {
    id: SourceId,
    source: AudioSource,
    delay: DelayStage,
}

/// Owns the single source-to-sinks audio graph.
pub struct AudioRouter {
    delay_samples: usize,
    active: Option<ActiveSource>,
    sinks: BTreeMap<SinkId, Arc<Mutex<SinkFeed>>>,
    connections: Vec<Connection>,
    analysis: AnalysisEngine,
    audible: Vec<f32>,
    next_source: u64,
    next_sink: u64,
}

impl AudioRouter {
    pub fn new(config: &AudioConfig) -> Self {
        let delay_samples = (config.delay_seconds.max(0.0) * config.sample_rate as f32).round();
        Self {
            delay_samples: delay_samples as usize,
            active: None,
            sinks: BTreeMap::new(),
            connections: Vec::new(),
            analysis: AnalysisEngine::with_sample_rate(config.sample_rate),
            audible: Vec::new(),
            next_source: 0,
            next_sink: 0,
        }
    }

    /// Replaces the current source. The previous source is fully disconnected
    /// before the new one is wired, and the delay line is rebuilt so no
    /// buffered samples from the old source reach any sink.
    pub fn set_source(&mut self, source: AudioSource) -> SourceId {
        self.clear_source();

        self.next_source += 1;
        let id = SourceId(self.next_source);
        tracing::info!(source = %source.label(), ?id, "connecting audio source");

        self.connect(AudioNode::Source(id), AudioNode::Delay);
        self.connect(AudioNode::Delay, AudioNode::Destination);
        let sink_ids: Vec<SinkId> = self.sinks.keys().copied().collect();
        for sink in sink_ids {
            self.attach_sink(sink, id);
        }

        self.analysis.reset();
        self.active = Some(ActiveSource {
            id,
            source,
            delay: DelayStage::new(self.delay_samples),
        });
        id
    }

    /// Disconnects the current source, if any. Sinks stay registered.
    pub fn clear_source(&mut self) {
        let Some(previous) = self.active.take() else {
            return;
        };
        tracing::info!(
            source = %previous.source.label(),
            id = ?previous.id,
            "disconnecting audio source"
        );
        self.connections.clear();
        for feed in self.sinks.values() {
            let mut feed = feed.lock().unwrap_or_else(PoisonError::into_inner);
            feed.source = None;
            feed.frame = AnalysisFrame::default();
        }
        self.audible.clear();
    }

    pub fn current_source(&self) -> Option<(SourceId, &AudioSource)> {
        self.active.as_ref().map(|active| (active.id, &active.source))
    }

    /// Adds a sink to the fan-out; it is connected right away when a source
    /// already exists.
    pub fn register_sink(&mut self) -> AudioTap {
        self.next_sink += 1;
        let id = SinkId(self.next_sink);
        let feed = Arc::new(Mutex::new(SinkFeed::default()));
        self.sinks.insert(id, feed.clone());
        if let Some(source) = self.active.as_ref().map(|active| active.id) {
            self.attach_sink(id, source);
        }
        tracing::debug!(?id, sinks = self.sinks.len(), "registered audio sink");
        AudioTap { id, feed }
    }

    /// Removes a sink and every connection into it. Returns false when the
    /// sink was not registered.
    pub fn unregister_sink(&mut self, id: SinkId) -> bool {
        let Some(feed) = self.sinks.remove(&id) else {
            return false;
        };
        self.connections.retain(|c| c.to != AudioNode::Sink(id));
        let mut feed = feed.lock().unwrap_or_else(PoisonError::into_inner);
        feed.source = None;
        feed.frame = AnalysisFrame::default();
        tracing::debug!(?id, sinks = self.sinks.len(), "unregistered audio sink");
        true
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_registered(&self, id: SinkId) -> bool {
        self.sinks.contains_key(&id)
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Pushes a block of raw source samples through the graph.
    pub fn push_samples(&mut self, samples: &[f32]) -> Result<()> {
        let Some(active) = self.active.as_mut() else {
            return Ok(());
        };
        if samples.is_empty() {
            return Ok(());
        }

        let source = active.id;
        let delayed = active.delay.process(samples);
        let frame = if delayed.len() >= 2 {
            Some(self.analysis.process_block(&delayed)?)
        } else {
            None
        };
        self.audible = delayed;

        let Some(frame) = frame else {
            return Ok(());
        };
        for connection in &self.connections {
            let AudioNode::Sink(sink) = connection.to else {
                continue;
            };
            if let Some(feed) = self.sinks.get(&sink) {
                let mut feed = feed.lock().unwrap_or_else(PoisonError::into_inner);
                if feed.source == Some(source) {
                    feed.frame = frame;
                    feed.blocks += 1;
                }
            }
        }
        Ok(())
    }

    /// Last delayed block routed to the audible destination.
    pub fn audible_output(&self) -> &[f32] {
        &self.audible
    }

    pub fn latency_samples(&self) -> usize {
        self.active
            .as_ref()
            .map(|active| active.delay.latency())
            .unwrap_or(self.delay_samples)
    }

    pub fn tempo_bpm(&self) -> Option<f32> {
        self.analysis.tempo_bpm()
    }

    fn attach_sink(&mut self, sink: SinkId, source: SourceId) {
        self.connect(AudioNode::Delay, AudioNode::Sink(sink));
        if let Some(feed) = self.sinks.get(&sink) {
            feed.lock().unwrap_or_else(PoisonError::into_inner).source = Some(source);
        }
    }

    fn connect(&mut self, from: AudioNode, to: AudioNode) {
        let connection = Connection { from, to };
        if !self.connections.contains(&connection) {
            self.connections.push(connection);
        }
    }
}

impl fmt::Debug for AudioRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioRouter")
            .field("source", &self.active.as_ref().map(|a| a.id))
            .field("sinks", &self.sinks.len())
            .field("connections", &self.connections)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router(delay_seconds: f32) -> AudioRouter {
        AudioRouter::new(&AudioConfig {
            sample_rate: 100,
            block_size: 8,
            delay_seconds,
        })
    }

    fn file(name: &str) -> AudioSource {
        AudioSource::File { path: PathBuf::from(name) }
    }

    #[test]
    fn delays_the_audible_signal() {
        let mut audio = router(0.04);
        audio.set_source(file("a.wav"));
        audio.push_samples(&[1.0; 6]).unwrap();

        assert_eq!(audio.audible_output(), &[0.0, 0.0, 0.0, 0.0, 1.0, 1.0]);
        assert_eq!(audio.latency_samples(), 4);
    }

    #[test]
    fn late_sinks_connect_immediately() {
        let mut audio = router(0.0);
        let source = audio.set_source(file("a.wav"));
        let tap = audio.register_sink();

        assert_eq!(tap.source(), Some(source));
        audio.push_samples(&[0.5; 16]).unwrap();
        assert!(tap.frame().rms > 0.4);
        assert_eq!(tap.blocks_received(), 1);
    }

    #[test]
    fn switching_sources_tears_down_the_previous_one() {
        let mut audio = router(0.05);
        let taps: Vec<AudioTap> = (0..3).map(|_| audio.register_sink()).collect();

        let a = audio.set_source(file("a.wav"));
        audio.push_samples(&[1.0; 32]).unwrap();
        let b = audio.set_source(AudioSource::Microphone { device: None });

        assert!(audio
            .connections()
            .iter()
            .all(|c| c.from != AudioNode::Source(a)));
        for tap in &taps {
            assert_eq!(tap.source(), Some(b));
            assert_eq!(tap.frame(), AnalysisFrame::default());
        }

        // The fresh delay line only carries silence and B's samples.
        audio.push_samples(&[0.0; 5]).unwrap();
        assert!(audio.audible_output().iter().all(|s| *s == 0.0));
        assert_eq!(taps[0].frame().rms, 0.0);
    }

    #[test]
    fn unregistered_sinks_receive_nothing() {
        let mut audio = router(0.0);
        let tap = audio.register_sink();
        audio.set_source(file("a.wav"));
        assert!(audio.unregister_sink(tap.id()));
        assert!(!audio.unregister_sink(tap.id()));

        audio.push_samples(&[1.0; 16]).unwrap();
        assert_eq!(tap.source(), None);
        assert_eq!(tap.blocks_received(), 0);
        assert!(audio
            .connections()
            .iter()
            .all(|c| c.to != AudioNode::Sink(tap.id())));
    }

    #[test]
    fn pushing_without_a_source_is_ignored() {
        let mut audio = router(0.26);
        let tap = audio.register_sink();
        audio.push_samples(&[1.0; 64]).unwrap();
        assert_eq!(tap.blocks_received(), 0);
        assert!(audio.audible_output().is_empty());
    }
}
