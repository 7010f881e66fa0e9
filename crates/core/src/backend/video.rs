use super::{BackendContext, ContentBackend};
use crate::{AudioRouter, ContentKind, Result, Surface, SurfaceSize, VideoClip};

/// Looping, muted video playback. Plays on creation, pauses on release.
#[derive(Debug, Clone)]
pub struct VideoBackend {
    clip: VideoClip,
    playing: bool,
    /// Clock time that corresponds to playback position zero.
    origin: Option<f64>,
    position: f64,
}

impl VideoBackend {
    pub fn new(clip: VideoClip) -> Self {
        Self {
            clip,
            playing: true,
            origin: None,
            position: 0.0,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn play(&mut self) {
        if !self.playing {
            self.playing = true;
            self.origin = None;
        }
    }

    pub fn pause(&mut self) {
        self.playing = false;
    }

    /// Playback position in seconds.
    pub fn position(&self) -> f64 {
        self.position
    }
}

impl ContentBackend for VideoBackend {
    fn kind(&self) -> ContentKind {
        ContentKind::Video
    }

    fn render_frame(&mut self, surface: &mut Surface, time: f64) {
        if self.playing {
            let origin = *self.origin.get_or_insert(time - self.position);
            self.position = (time - origin).max(0.0);
        }
        surface.draw_contain(self.clip.frame_at(self.position));
    }

    fn release(&mut self, _audio: &mut AudioRouter) {
        self.pause();
    }

    /// The mirror is a clone of the element that starts playing right away.
    fn mirror(
        &self,
        _ctx: &mut BackendContext<'_>,
        _size: SurfaceSize,
    ) -> Result<Box<dyn ContentBackend>> {
        let mut clone = Self::new(self.clip.clone());
        clone.play();
        Ok(Box::new(clone))
    }
}
