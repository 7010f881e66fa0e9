use serde_json::Value;

use super::{GenerativeLibrary, GenerativeRenderer, ParamValue, UniformDescriptor, UniformKind};
use crate::surface::{mix, unit_to_u8, Rgba8};
use crate::{AudioTap, CompositorError, PresetPayload, Result, Surface, SurfaceSize};

/// Longest simulated step; larger gaps (stalls, first frame) are clamped.
const MAX_STEP_SECONDS: f64 = 0.25;

/// Software generative library producing audio-reactive plasma fields.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlasmaLibrary;

impl GenerativeLibrary for PlasmaLibrary {
    fn create_renderer(&self, size: SurfaceSize) -> Result<Box<dyn GenerativeRenderer>> {
        size.ensure_allocatable()?;
        Ok(Box::new(PlasmaVisualizer::new(size)))
    }
}

/// Visual parameters extracted from a preset's `baseVals`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Look {
    hue: f32,
    zoom: f32,
    rot: f32,
    warp: f32,
}

impl Look {
    fn from_payload(payload: &PresetPayload) -> Result<Self> {
        let Value::Object(root) = payload.as_value() else {
            return Err(CompositorError::unsupported("preset payload must be an object"));
        };
        let base = root.get("baseVals").and_then(Value::as_object);
        let field = |name: &str| base.and_then(|b| b.get(name)).and_then(Value::as_f64);

        let hue = match (field("wave_r"), field("wave_g"), field("wave_b")) {
            (Some(r), Some(g), Some(b)) => rgb_hue(r as f32, g as f32, b as f32),
            _ => {
                let text = payload.as_value().to_string();
                let hash = text
                    .bytes()
                    .fold(0x811c_9dc5_u32, |h, b| (h ^ u32::from(b)).wrapping_mul(0x0100_0193));
                (hash % 360) as f32 / 360.0
            }
        };

        Ok(Self {
            hue,
            zoom: field("zoom").unwrap_or(1.0).clamp(0.1, 10.0) as f32,
            rot: field("rot").unwrap_or(0.0).clamp(-10.0, 10.0) as f32,
            warp: field("warp").unwrap_or(1.0).clamp(0.0, 10.0) as f32,
        })
    }

    fn shade(&self, x: f32, y: f32, phase: f32, energy: f32) -> Rgba8 {
        let u = (x - 0.5) * 2.0 / self.zoom;
        let v = (y - 0.5) * 2.0 / self.zoom;
        let (s, c) = (phase * self.rot * 0.2).sin_cos();
        let (u, v) = (u * c - v * s, u * s + v * c);
        let field = (u * 3.0 + phase).sin()
            + (v * 3.0 * self.warp - phase * 0.7).sin()
            + ((u * u + v * v).sqrt() * 5.0 - phase * 1.3).sin();
        let level = 0.5 + field / 6.0;
        let hue = (self.hue + level * 0.35 + energy * 0.1).fract();
        let value = (0.35 + level * 0.5 + energy * 0.4).clamp(0.0, 1.0);
        hsv(hue, 0.85, value)
    }
}

#[derive(Debug, Clone, Copy)]
struct Transition {
    from: Look,
    duration: f32,
    started: Option<f64>,
}

/// Audio-reactive plasma renderer. Internal phase advances by elapsed time
/// scaled by the current audio energy, so the motion speeds up with the music.
#[derive(Debug)]
pub struct PlasmaVisualizer {
    size: SurfaceSize,
    look: Option<Look>,
    transition: Option<Transition>,
    audio: Option<AudioTap>,
    sensitivity: f32,
    phase: f32,
    energy: f32,
    last_time: Option<f64>,
}

impl PlasmaVisualizer {
    pub fn new(size: SurfaceSize) -> Self {
        Self {
            size,
            look: None,
            transition: None,
            audio: None,
            sensitivity: 1.0,
            phase: 0.0,
            energy: 0.0,
            last_time: None,
        }
    }

    pub fn size(&self) -> SurfaceSize {
        self.size
    }

    pub fn is_transitioning(&self) -> bool {
        self.transition.is_some()
    }

    pub fn phase(&self) -> f32 {
        self.phase
    }

    fn advance(&mut self, time: f64) {
        let step = match self.last_time {
            Some(last) => (time - last).clamp(0.0, MAX_STEP_SECONDS),
            None => 0.0,
        };
        self.last_time = Some(self.last_time.map_or(time, |last| last.max(time)));

        let target = self
            .audio
            .as_ref()
            .map(|tap| tap.frame().energy())
            .unwrap_or(0.0)
            * self.sensitivity;
        self.energy += (target.clamp(0.0, 1.0) - self.energy) * 0.3;
        self.phase = (self.phase + step as f32 * (0.6 + self.energy * 3.0)) % 10_000.0;
    }
}

impl GenerativeRenderer for PlasmaVisualizer {
    fn load_preset(&mut self, preset: &PresetPayload, transition_seconds: f32) -> Result<()> {
        let next = Look::from_payload(preset)?;
        self.transition = match self.look {
            Some(from) if transition_seconds > 0.0 => Some(Transition {
                from,
                duration: transition_seconds,
                started: None,
            }),
            _ => None,
        };
        self.look = Some(next);
        Ok(())
    }

    fn connect_audio(&mut self, tap: AudioTap) {
        self.audio = Some(tap);
    }

    fn disconnect_audio(&mut self) -> Option<AudioTap> {
        self.audio.take()
    }

    fn render(&mut self, surface: &mut Surface, time_seconds: f64) {
        self.advance(time_seconds);
        let Some(look) = self.look else {
            surface.clear([0, 0, 0, 255]);
            return;
        };

        let blend = self.transition.as_mut().map(|transition| {
            let started = *transition.started.get_or_insert(time_seconds);
            let t = ((time_seconds - started) / f64::from(transition.duration)) as f32;
            (transition.from, t.clamp(0.0, 1.0))
        });
        let (phase, energy) = (self.phase, self.energy);

        match blend {
            Some((from, t)) if t < 1.0 => surface.shade(|x, y| {
                mix(from.shade(x, y, phase, energy), look.shade(x, y, phase, energy), t)
            }),
            _ => {
                self.transition = None;
                surface.shade(|x, y| look.shade(x, y, phase, energy));
            }
        }
    }

    fn parameters(&self) -> Vec<UniformDescriptor> {
        vec![UniformDescriptor {
            name: "sensitivity".into(),
            kind: UniformKind::Float,
            min: Some(0.0),
            max: Some(4.0),
            value: ParamValue::Float(self.sensitivity),
        }]
    }

    fn set_parameter(&mut self, name: &str, value: ParamValue) -> Result<()> {
        match (name, value) {
            ("sensitivity", ParamValue::Float(v)) if v.is_finite() && v >= 0.0 => {
                self.sensitivity = v;
                Ok(())
            }
            ("sensitivity", other) => Err(CompositorError::invalid(format!(
                "sensitivity expects a non-negative float, got {other:?}"
            ))),
            _ => Err(CompositorError::invalid(format!("unknown parameter `{name}`"))),
        }
    }
}

fn rgb_hue(r: f32, g: f32, b: f32) -> f32 {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;
    if delta <= f32::EPSILON {
        return 0.0;
    }
    let h = if max == r {
        ((g - b) / delta).rem_euclid(6.0)
    } else if max == g {
        (b - r) / delta + 2.0
    } else {
        (r - g) / delta + 4.0
    };
    h / 6.0
}

fn hsv(h: f32, s: f32, v: f32) -> Rgba8 {
    let h6 = h.rem_euclid(1.0) * 6.0;
    let c = v * s;
    let x = c * (1.0 - (h6 % 2.0 - 1.0).abs());
    let (r, g, b) = match h6 as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = v - c;
    [unit_to_u8(r + m), unit_to_u8(g + m), unit_to_u8(b + m), 255]
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn preset(r: f64, g: f64, b: f64) -> PresetPayload {
        PresetPayload::new(json!({
            "baseVals": { "wave_r": r, "wave_g": g, "wave_b": b, "zoom": 1.2 }
        }))
    }

    fn surface() -> Surface {
        Surface::new(SurfaceSize::new(24, 16)).unwrap()
    }

    #[test]
    fn renders_before_any_preset() {
        let mut viz = PlasmaVisualizer::new(SurfaceSize::new(24, 16));
        let mut out = surface();
        viz.render(&mut out, 0.0);
        assert_eq!(out.pixel(3, 3), Some([0, 0, 0, 255]));
    }

    #[test]
    fn zero_transition_cuts_instantly() {
        let mut viz = PlasmaVisualizer::new(SurfaceSize::new(24, 16));
        viz.load_preset(&preset(1.0, 0.0, 0.0), 0.0).unwrap();
        viz.load_preset(&preset(0.0, 0.0, 1.0), 0.0).unwrap();
        assert!(!viz.is_transitioning());
    }

    #[test]
    fn crossfade_finishes_after_its_duration() {
        let mut viz = PlasmaVisualizer::new(SurfaceSize::new(24, 16));
        let mut out = surface();
        viz.load_preset(&preset(1.0, 0.0, 0.0), 0.0).unwrap();
        viz.render(&mut out, 0.0);

        viz.load_preset(&preset(0.0, 0.0, 1.0), 2.0).unwrap();
        viz.render(&mut out, 0.1);
        assert!(viz.is_transitioning());
        viz.render(&mut out, 1.0);
        assert!(viz.is_transitioning());
        viz.render(&mut out, 2.2);
        assert!(!viz.is_transitioning());
    }

    #[test]
    fn rejects_non_object_presets() {
        let mut viz = PlasmaVisualizer::new(SurfaceSize::new(4, 4));
        let err = viz.load_preset(&PresetPayload::new(json!([1, 2, 3])), 0.0).unwrap_err();
        assert!(matches!(err, CompositorError::UnsupportedFormat(_)));
    }

    #[test]
    fn phase_is_monotonic_under_jittery_clocks() {
        let mut viz = PlasmaVisualizer::new(SurfaceSize::new(8, 8));
        let mut out = Surface::new(SurfaceSize::new(8, 8)).unwrap();
        viz.load_preset(&preset(0.2, 0.8, 0.1), 0.0).unwrap();

        let mut last = viz.phase();
        for time in [0.0, 0.016, 0.010, 0.5, 5.0, 5.016] {
            viz.render(&mut out, time);
            assert!(viz.phase() >= last);
            last = viz.phase();
        }
    }

    #[test]
    fn library_rejects_oversized_targets() {
        let err = PlasmaLibrary
            .create_renderer(SurfaceSize::new(100_000, 100_000))
            .unwrap_err();
        assert!(matches!(err, CompositorError::ResourceExhausted(_)));
    }
}
