use super::{BackendContext, ContentBackend};
use crate::render::{ParamValue, ShaderProgram, UniformDescriptor};
use crate::{AudioRouter, ContentKind, Result, Surface, SurfaceSize};

/// Shader program evaluated against the shared clock every frame.
#[derive(Debug)]
pub struct ShaderBackend {
    source: String,
    program: Box<dyn ShaderProgram>,
}

impl ShaderBackend {
    pub fn compile(source: &str, ctx: &BackendContext<'_>) -> Result<Self> {
        let program = ctx.shaders.compile(source)?;
        Ok(Self {
            source: source.to_string(),
            program,
        })
    }
}

impl ContentBackend for ShaderBackend {
    fn kind(&self) -> ContentKind {
        ContentKind::ShaderProgram
    }

    fn render_frame(&mut self, surface: &mut Surface, time: f64) {
        self.program.draw(surface, time);
    }

    fn release(&mut self, _audio: &mut AudioRouter) {}

    /// Recompiles the source and copies every uniform value before the mirror
    /// draws its first frame.
    fn mirror(
        &self,
        ctx: &mut BackendContext<'_>,
        _size: SurfaceSize,
    ) -> Result<Box<dyn ContentBackend>> {
        let mut mirror = Self::compile(&self.source, ctx)?;
        for uniform in self.program.uniforms() {
            if let Some(value) = self.program.get_value(&uniform.name) {
                mirror.program.set_value(&uniform.name, value)?;
            }
        }
        Ok(Box::new(mirror))
    }

    fn parameters(&self) -> Vec<UniformDescriptor> {
        self.program.uniforms()
    }

    fn get_parameter(&self, name: &str) -> Option<ParamValue> {
        self.program.get_value(name)
    }

    fn set_parameter(&mut self, name: &str, value: ParamValue) -> Result<()> {
        self.program.set_value(name, value)
    }
}
