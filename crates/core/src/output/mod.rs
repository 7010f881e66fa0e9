//! External display handling: mirror backends per layer and the composited
//! output frame.
//!
//! Mirrors are built from a one-time snapshot of the preview backend; after
//! that both instances advance on their own from the shared clock.

use crate::backend::BackendContext;
use crate::{CompositorError, LayerModel, OutputSurfaceState, Result, Surface, SurfaceSize};

/// The external display while it is open.
#[derive(Debug)]
pub struct OutputDisplay {
    size: SurfaceSize,
    composite: Surface,
}

impl OutputDisplay {
    pub fn size(&self) -> SurfaceSize {
        self.size
    }

    pub fn composite(&self) -> &Surface {
        &self.composite
    }
}

#[derive(Debug, Default)]
pub struct SurfaceManager {
    display: Option<OutputDisplay>,
}

impl SurfaceManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.display.is_some()
    }

    pub fn display(&self) -> Option<&OutputDisplay> {
        self.display.as_ref()
    }

    /// Opens the display and mirrors every layer onto it. Opening an already
    /// open display does nothing and returns `Ok(false)`.
    ///
    /// Per-layer mirror failures do not keep the display closed; they are
    /// returned alongside the layer id.
    pub fn open(
        &mut self,
        size: SurfaceSize,
        layers: &mut [LayerModel],
        ctx: &mut BackendContext<'_>,
    ) -> Result<(bool, Vec<(usize, CompositorError)>)> {
        if self.display.is_some() {
            tracing::debug!("output display already open");
            return Ok((false, Vec::new()));
        }
        let composite = Surface::new(size)?;
        self.display = Some(OutputDisplay { size, composite });
        tracing::info!(width = size.width, height = size.height, "opened output display");

        let failures = layers
            .iter_mut()
            .filter_map(|layer| {
                self.sync_layer(layer, ctx)
                    .err()
                    .map(|err| (layer.id(), err))
            })
            .collect();
        Ok((true, failures))
    }

    /// Releases every mirror. Preview backends are untouched.
    pub fn close(&mut self, layers: &mut [LayerModel], ctx: &mut BackendContext<'_>) -> bool {
        if self.display.take().is_none() {
            return false;
        }
        for layer in layers.iter_mut() {
            layer.release_output(ctx.audio);
        }
        tracing::info!("closed output display");
        true
    }

    /// Re-creates the display at a new size; mirrors restart cold.
    pub fn resize(
        &mut self,
        size: SurfaceSize,
        layers: &mut [LayerModel],
        ctx: &mut BackendContext<'_>,
    ) -> Result<Vec<(usize, CompositorError)>> {
        size.ensure_allocatable()?;
        self.close(layers, ctx);
        self.open(size, layers, ctx).map(|(_, failures)| failures)
    }

    /// Brings one layer's mirror in line with its current backend: a fresh
    /// mirror while the display is open, none otherwise.
    pub fn sync_layer(&self, layer: &mut LayerModel, ctx: &mut BackendContext<'_>) -> Result<()> {
        let Some(display) = &self.display else {
            layer.release_output(ctx.audio);
            return Ok(());
        };
        let Some(source) = layer.backend() else {
            layer.release_output(ctx.audio);
            return Ok(());
        };

        let surface = Surface::new(display.size)?;
        let backend = source.mirror(ctx, display.size)?;
        tracing::debug!(layer = layer.id(), kind = ?backend.kind(), "created mirror backend");
        layer.install_output(OutputSurfaceState { backend, surface }, ctx.audio);
        Ok(())
    }

    /// Paints every mirrored layer bottom-to-top over black at its opacity.
    pub fn composite(&mut self, layers: &[LayerModel]) -> Option<&Surface> {
        let display = self.display.as_mut()?;
        display.composite.clear([0, 0, 0, 255]);
        for layer in layers {
            if let Some(output) = layer.output() {
                let opacity = layer.opacity();
                if let Err(err) = display.composite.composite_over(&output.surface, opacity) {
                    tracing::warn!(layer = layer.id(), %err, "skipping layer in output composite");
                }
            }
        }
        Some(&display.composite)
    }
}
