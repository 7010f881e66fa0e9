use super::{BackendContext, ContentBackend};
use crate::{AnimatedImage, AudioRouter, ContentKind, Result, Surface, SurfaceSize};

/// Still or animated image drawn scaled to fit.
#[derive(Debug, Clone)]
pub struct StaticImageBackend {
    image: AnimatedImage,
    started: Option<f64>,
}

impl StaticImageBackend {
    pub fn new(image: AnimatedImage) -> Self {
        Self {
            image,
            started: None,
        }
    }
}

impl ContentBackend for StaticImageBackend {
    fn kind(&self) -> ContentKind {
        ContentKind::StaticImage
    }

    fn render_frame(&mut self, surface: &mut Surface, time: f64) {
        let started = *self.started.get_or_insert(time);
        surface.draw_contain(self.image.frame_at(time - started));
    }

    fn release(&mut self, _audio: &mut AudioRouter) {}

    fn mirror(
        &self,
        _ctx: &mut BackendContext<'_>,
        _size: SurfaceSize,
    ) -> Result<Box<dyn ContentBackend>> {
        Ok(Box::new(Self::new(self.image.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RasterImage;

    #[test]
    fn fills_the_surface_with_the_image() {
        let image = AnimatedImage::still(RasterImage::solid(2, 2, [0, 255, 0, 255]).unwrap());
        let mut backend = StaticImageBackend::new(image);
        let mut surface = Surface::new(SurfaceSize::new(4, 4)).unwrap();

        backend.render_frame(&mut surface, 0.0);
        backend.render_frame(&mut surface, 10.0);
        assert!(surface.pixels().chunks_exact(4).all(|px| px == [0, 255, 0, 255]));
    }
}
