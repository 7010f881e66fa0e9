use std::{f32::consts::PI, fmt, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};

use crate::{CompositorError, Result};

const BEAT_GAIN: f32 = 12.0;
const BEAT_THRESHOLD: f32 = 0.6;
const MIN_BEAT_INTERVAL: f32 = 0.2;
const MAX_BEAT_HISTORY: usize = 32;

/// Representation of the feature set for a single block of audio.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisFrame {
    pub time: f32,
    pub rms: f32,
    /// Normalised [0, 1] spectral centroid where 1.0 corresponds to the
    /// Nyquist frequency of the analysed block.
    pub spectral_centroid: f32,
    pub beat_confidence: f32,
}

impl AnalysisFrame {
    /// Single scalar drive used by audio-reactive renderers.
    pub fn energy(&self) -> f32 {
        (self.rms * 2.0 + self.beat_confidence * 0.5).clamp(0.0, 1.0)
    }
}

/// Block-based feature extractor that runs on the delayed signal the audio
/// router fans out to its sinks.
pub struct AnalysisEngine {
    sample_rate: u32,
    processed_samples: usize,
    last_rms: f32,
    latest: Option<AnalysisFrame>,
    beat_timestamps: Vec<f32>,
    tempo_bpm: Option<f32>,
    fft_planner: RealFftPlanner<f32>,
    fft: Option<FftResources>,
}

impl AnalysisEngine {
    pub fn with_sample_rate(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            processed_samples: 0,
            last_rms: 0.0,
            latest: None,
            beat_timestamps: Vec::new(),
            tempo_bpm: None,
            fft_planner: RealFftPlanner::new(),
            fft: None,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Clears the accumulated state while preserving configuration.
    pub fn reset(&mut self) {
        self.processed_samples = 0;
        self.last_rms = 0.0;
        self.latest = None;
        self.beat_timestamps.clear();
        self.tempo_bpm = None;
    }

    /// Consumes audio samples and updates the tracked features.
    pub fn process_block(&mut self, samples: &[f32]) -> Result<AnalysisFrame> {
        if samples.len() < 2 {
            return Err(CompositorError::invalid(
                "analysis requires blocks with at least two samples",
            ));
        }

        let block_size = samples.len();
        let sample_rate = self.sample_rate as f32;
        let start_time = self.processed_samples as f32 / sample_rate;
        let end_time = (self.processed_samples + block_size) as f32 / sample_rate;
        let timestamp = start_time + (end_time - start_time) * 0.5;

        let rms = compute_rms(samples);
        let beat_confidence = self.update_beats(timestamp, rms);
        let centroid_hz = self.compute_spectral_centroid(samples)?;
        let nyquist = sample_rate * 0.5;
        let spectral_centroid = (centroid_hz / nyquist).clamp(0.0, 1.0);

        self.processed_samples += block_size;

        let frame = AnalysisFrame {
            time: timestamp,
            rms,
            spectral_centroid,
            beat_confidence,
        };
        self.latest = Some(frame);
        Ok(frame)
    }

    /// Returns the latest frame emitted by the engine, if any.
    pub fn latest_frame(&self) -> Option<&AnalysisFrame> {
        self.latest.as_ref()
    }

    pub fn tempo_bpm(&self) -> Option<f32> {
        self.tempo_bpm
    }

    fn update_beats(&mut self, timestamp: f32, rms: f32) -> f32 {
        let delta = (rms - self.last_rms).max(0.0);
        self.last_rms = rms;
        let confidence = (delta * BEAT_GAIN).clamp(0.0, 1.0);

        if confidence >= BEAT_THRESHOLD
            && self
                .beat_timestamps
                .last()
                .map(|last| timestamp - last >= MIN_BEAT_INTERVAL)
                .unwrap_or(true)
        {
            self.beat_timestamps.push(timestamp);
            if self.beat_timestamps.len() > MAX_BEAT_HISTORY {
                let overflow = self.beat_timestamps.len() - MAX_BEAT_HISTORY;
                self.beat_timestamps.drain(0..overflow);
            }
            self.update_tempo_estimate();
        }

        confidence
    }

    fn update_tempo_estimate(&mut self) {
        let intervals: Vec<f32> = self
            .beat_timestamps
            .windows(2)
            .map(|w| w[1] - w[0])
            .filter(|interval| *interval > f32::EPSILON)
            .collect();

        if intervals.is_empty() {
            return;
        }
        let average = intervals.iter().sum::<f32>() / intervals.len() as f32;
        if average > 0.0 {
            self.tempo_bpm = Some(60.0 / average);
        }
    }

    fn compute_spectral_centroid(&mut self, samples: &[f32]) -> Result<f32> {
        let len = samples.len();
        let sample_rate = self.sample_rate as f32;
        let fft = self.prepare_fft(len);

        for (index, value) in samples.iter().enumerate() {
            fft.input[index] = *value * hann_value(index, len);
        }

        fft.plan
            .process_with_scratch(&mut fft.input, &mut fft.spectrum, &mut fft.scratch)
            .map_err(|err| CompositorError::msg(format!("fft failed: {err}")))?;

        let mut magnitude_sum = 0.0;
        let mut weighted_sum = 0.0;
        let bin_hz = sample_rate / len as f32;

        for (i, bin) in fft.spectrum.iter().enumerate() {
            let magnitude = bin.norm();
            magnitude_sum += magnitude;
            weighted_sum += magnitude * (i as f32 * bin_hz);
        }

        if magnitude_sum <= f32::EPSILON {
            Ok(0.0)
        } else {
            Ok(weighted_sum / magnitude_sum)
        }
    }

    fn prepare_fft(&mut self, size: usize) -> &mut FftResources {
        let planner = &mut self.fft_planner;
        let fft = self.fft.get_or_insert_with(|| FftResources::plan(planner, size));
        if fft.size != size {
            *fft = FftResources::plan(planner, size);
        }
        fft
    }
}

struct FftResources {
    size: usize,
    plan: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    input: Vec<f32>,
}

impl FftResources {
    fn plan(planner: &mut RealFftPlanner<f32>, size: usize) -> Self {
        let plan = planner.plan_fft_forward(size);
        Self {
            size,
            scratch: plan.make_scratch_vec(),
            spectrum: plan.make_output_vec(),
            input: plan.make_input_vec(),
            plan,
        }
    }
}

impl fmt::Debug for AnalysisEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisEngine")
            .field("sample_rate", &self.sample_rate)
            .field("processed_samples", &self.processed_samples)
            .field("latest", &self.latest)
            .field("tempo_bpm", &self.tempo_bpm)
            .finish()
    }
}

pub(crate) fn compute_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|sample| sample * sample).sum();
    (sum / samples.len() as f32).sqrt()
}

fn hann_value(index: usize, len: usize) -> f32 {
    if len <= 1 {
        return 1.0;
    }

    0.5 - 0.5 * ((2.0 * PI * index as f32) / (len as f32 - 1.0)).cos()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn computes_basic_features() {
        let mut engine = AnalysisEngine::with_sample_rate(48_000);
        let samples: Vec<f32> = vec![0.0; 1024];
        let frame = engine.process_block(&samples).unwrap();

        assert!((frame.rms - 0.0).abs() <= f32::EPSILON);
        assert_eq!(frame.beat_confidence, 0.0);
        assert_eq!(frame.spectral_centroid, 0.0);
        assert_eq!(frame.energy(), 0.0);
    }

    #[test]
    fn detects_tempo_from_pulses() {
        let mut engine = AnalysisEngine::with_sample_rate(100);
        let quiet = vec![0.0; 25];
        let loud = vec![1.0; 25];

        for _ in 0..4 {
            engine.process_block(&quiet).unwrap();
            engine.process_block(&loud).unwrap();
        }

        let tempo = engine.tempo_bpm().expect("tempo should be detected");
        assert!((tempo - 120.0).abs() < 10.0);
    }

    #[test]
    fn high_tones_raise_the_centroid() {
        let mut engine = AnalysisEngine::with_sample_rate(8_000);
        let low: Vec<f32> = (0..512)
            .map(|i| (2.0 * PI * 100.0 * i as f32 / 8_000.0).sin())
            .collect();
        let high: Vec<f32> = (0..512)
            .map(|i| (2.0 * PI * 3_000.0 * i as f32 / 8_000.0).sin())
            .collect();

        let low = engine.process_block(&low).unwrap();
        let high = engine.process_block(&high).unwrap();
        assert!(high.spectral_centroid > low.spectral_centroid);
    }

    #[test]
    fn rejects_tiny_blocks() {
        let mut engine = AnalysisEngine::with_sample_rate(48_000);
        assert!(engine.process_block(&[0.5]).is_err());
        assert!(engine.latest_frame().is_none());
    }
}
