//! Shared clock and the per-frame render loop.

use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::LayerModel;

/// Monotonic seconds since the clock started. Readings never go backwards.
#[derive(Debug, Clone)]
pub struct PlaybackClock {
    origin: Instant,
    last: f64,
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::start()
    }
}

impl PlaybackClock {
    pub fn start() -> Self {
        Self {
            origin: Instant::now(),
            last: 0.0,
        }
    }

    pub fn now(&mut self) -> f64 {
        let elapsed = self.origin.elapsed().as_secs_f64();
        self.last = self.last.max(elapsed);
        self.last
    }

    pub fn reset(&mut self) {
        self.origin = Instant::now();
        self.last = 0.0;
    }
}

/// What one tick drew.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TickStats {
    pub frame: u64,
    pub time: f64,
    pub previews: usize,
    pub outputs: usize,
}

/// Drives every layer once per display refresh.
#[derive(Debug)]
pub struct FrameScheduler {
    clock: PlaybackClock,
    frame_interval: Duration,
    frames: u64,
    last_time: f64,
    next_deadline: Option<Instant>,
}

impl FrameScheduler {
    pub fn new(refresh_hz: u32) -> Self {
        let hz = if refresh_hz > 0 { refresh_hz } else { 60 };
        Self {
            clock: PlaybackClock::start(),
            frame_interval: Duration::from_secs_f64(1.0 / f64::from(hz)),
            frames: 0,
            last_time: 0.0,
            next_deadline: None,
        }
    }

    pub fn now(&mut self) -> f64 {
        self.clock.now()
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn frame_interval(&self) -> Duration {
        self.frame_interval
    }

    /// Renders every layer at `time`: the preview first, then the mirror, in
    /// layer index order. `time` is clamped so it never decreases between
    /// ticks.
    pub fn render_tick(&mut self, layers: &mut [LayerModel], time: f64) -> TickStats {
        let time = if time.is_finite() {
            time.max(self.last_time)
        } else {
            self.last_time
        };
        self.last_time = time;
        self.frames += 1;

        let mut stats = TickStats {
            frame: self.frames,
            time,
            ..TickStats::default()
        };
        for layer in layers.iter_mut() {
            if layer.render_preview(time) {
                stats.previews += 1;
            }
            if layer.render_output(time) {
                stats.outputs += 1;
            }
        }
        tracing::trace!(
            frame = stats.frame,
            time,
            previews = stats.previews,
            outputs = stats.outputs,
            "tick"
        );
        stats
    }

    /// Sleeps until the next refresh deadline. Falls behind gracefully: a
    /// missed deadline resets the cadence instead of bursting.
    pub fn wait_for_next_frame(&mut self) {
        let now = Instant::now();
        let deadline = self.next_deadline.unwrap_or(now + self.frame_interval);
        if deadline > now {
            thread::sleep(deadline - now);
            self.next_deadline = Some(deadline + self.frame_interval);
        } else {
            self.next_deadline = Some(now + self.frame_interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::backend::{BackendContext, ContentBackend};
    use crate::{
        AudioConfig, AudioRouter, ContentDescriptor, ContentKind, ContentPayload,
        OutputSurfaceState, Result, Surface, SurfaceSize,
    };

    type Log = Arc<Mutex<Vec<(String, f64)>>>;

    #[derive(Debug)]
    struct Recording {
        label: String,
        log: Log,
    }

    impl ContentBackend for Recording {
        fn kind(&self) -> ContentKind {
            ContentKind::ShaderProgram
        }

        fn render_frame(&mut self, _surface: &mut Surface, time: f64) {
            self.log.lock().unwrap().push((self.label.clone(), time));
        }

        fn release(&mut self, _audio: &mut AudioRouter) {}

        fn mirror(
            &self,
            _ctx: &mut BackendContext<'_>,
            _size: SurfaceSize,
        ) -> Result<Box<dyn ContentBackend>> {
            Ok(Box::new(Recording {
                label: format!("{}-out", self.label),
                log: Arc::clone(&self.log),
            }))
        }
    }

    fn layer_with_recorder(
        id: usize,
        log: &Log,
        mirrored: bool,
        audio: &mut AudioRouter,
    ) -> LayerModel {
        let size = SurfaceSize::new(4, 4);
        let mut layer = LayerModel::new(id);
        layer.install(
            ContentDescriptor::new("rec", ContentPayload::ShaderSource(String::new())),
            Box::new(Recording {
                label: format!("{id}"),
                log: Arc::clone(log),
            }),
            Surface::new(size).unwrap(),
            None,
            audio,
        );
        if mirrored {
            let backend = Box::new(Recording {
                label: format!("{id}-out"),
                log: Arc::clone(log),
            });
            layer.install_output(
                OutputSurfaceState {
                    backend,
                    surface: Surface::new(size).unwrap(),
                },
                audio,
            );
        }
        layer
    }

    #[test]
    fn clock_is_monotonic() {
        let mut clock = PlaybackClock::start();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
        clock.reset();
        assert!(clock.now() < 1.0);
    }

    #[test]
    fn renders_previews_then_mirrors_in_index_order() {
        let mut audio = AudioRouter::new(&AudioConfig::default());
        let log: Log = Arc::default();
        let mut layers = vec![
            layer_with_recorder(0, &log, true, &mut audio),
            LayerModel::new(1),
            layer_with_recorder(2, &log, false, &mut audio),
        ];
        let mut scheduler = FrameScheduler::new(60);
        let stats = scheduler.render_tick(&mut layers, 1.5);

        assert_eq!(stats.previews, 2);
        assert_eq!(stats.outputs, 1);
        let labels: Vec<String> = log.lock().unwrap().iter().map(|(l, _)| l.clone()).collect();
        assert_eq!(labels, ["0", "0-out", "2"]);
        assert!(log.lock().unwrap().iter().all(|(_, t)| *t == 1.5));
    }

    #[test]
    fn tick_time_never_decreases() {
        let mut scheduler = FrameScheduler::new(60);
        let mut layers: Vec<LayerModel> = Vec::new();
        assert_eq!(scheduler.render_tick(&mut layers, 2.0).time, 2.0);
        assert_eq!(scheduler.render_tick(&mut layers, 1.0).time, 2.0);
        assert_eq!(scheduler.render_tick(&mut layers, f64::NAN).time, 2.0);
        assert_eq!(scheduler.frames(), 3);
    }

    #[test]
    fn invalid_refresh_rate_falls_back() {
        let scheduler = FrameScheduler::new(0);
        assert_eq!(scheduler.frame_interval(), Duration::from_secs_f64(1.0 / 60.0));
    }
}
