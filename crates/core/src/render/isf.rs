use serde::Deserialize;
use serde_json::Value;

use super::{ParamValue, ShaderLibrary, ShaderProgram, UniformDescriptor, UniformKind};
use crate::surface::unit_to_u8;
use crate::{CompositorError, Result, Surface};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
struct IsfHeader {
    #[serde(default)]
    inputs: Vec<IsfInput>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
struct IsfInput {
    name: String,
    #[serde(rename = "TYPE")]
    kind: String,
    #[serde(default)]
    default: Option<Value>,
    #[serde(default)]
    min: Option<f32>,
    #[serde(default)]
    max: Option<f32>,
}

/// Software stand-in for a GPU shader library.
///
/// Reads the ISF JSON header (`/*{ ... }*/`) for the uniform set and
/// validates the GLSL body structurally. Drawing evaluates a procedural
/// pattern driven by the uniforms and time, not the GLSL itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct SoftwareShaderLibrary;

impl ShaderLibrary for SoftwareShaderLibrary {
    fn compile(&self, source: &str) -> Result<Box<dyn ShaderProgram>> {
        Ok(Box::new(SoftwareShaderProgram::compile(source)?))
    }
}

#[derive(Debug, Clone)]
pub struct SoftwareShaderProgram {
    uniforms: Vec<UniformDescriptor>,
    seed: f32,
}

impl SoftwareShaderProgram {
    pub fn compile(source: &str) -> Result<Self> {
        let (header, body) = split_header(source)?;
        validate_body(body)?;

        let uniforms = header
            .inputs
            .into_iter()
            .filter_map(|input| uniform_from_input(input).transpose())
            .collect::<Result<Vec<_>>>()?;

        let seed = source
            .bytes()
            .fold(0x811c_9dc5_u32, |h, b| (h ^ u32::from(b)).wrapping_mul(0x0100_0193));

        Ok(Self {
            uniforms,
            seed: (seed % 6283) as f32 / 1000.0,
        })
    }
}

impl ShaderProgram for SoftwareShaderProgram {
    fn uniforms(&self) -> Vec<UniformDescriptor> {
        self.uniforms.clone()
    }

    fn get_value(&self, name: &str) -> Option<ParamValue> {
        super::find_parameter(&self.uniforms, name)
    }

    fn set_value(&mut self, name: &str, value: ParamValue) -> Result<()> {
        let uniform = self
            .uniforms
            .iter_mut()
            .find(|u| u.name == name)
            .ok_or_else(|| CompositorError::invalid(format!("unknown uniform `{name}`")))?;
        if uniform.kind != value.kind() {
            return Err(CompositorError::invalid(format!(
                "uniform `{name}` expects {:?}, got {:?}",
                uniform.kind,
                value.kind()
            )));
        }
        uniform.value = value;
        Ok(())
    }

    fn draw(&mut self, surface: &mut Surface, time_seconds: f64) {
        let t = (time_seconds % 3600.0) as f32;
        let mut drive = 0.0;
        let mut floats = 0;
        let mut tint = None;
        let mut invert = false;
        for uniform in &self.uniforms {
            match uniform.value {
                ParamValue::Float(v) => {
                    let lo = uniform.min.unwrap_or(0.0);
                    let hi = uniform.max.unwrap_or(1.0);
                    let span = (hi - lo).abs().max(f32::EPSILON);
                    drive += ((v - lo) / span).clamp(0.0, 1.0);
                    floats += 1;
                }
                ParamValue::Color(c) => {
                    tint.get_or_insert(c);
                }
                ParamValue::Bool(b) => invert ^= b,
            }
        }
        let drive = if floats > 0 { drive / floats as f32 } else { 0.5 };
        let tint = tint.unwrap_or([1.0, 1.0, 1.0, 1.0]);
        let (sin_a, cos_a) = self.seed.sin_cos();
        let freq = 6.0 + drive * 18.0;

        surface.shade(|x, y| {
            let u = x - 0.5;
            let v = y - 0.5;
            let wave = (freq * (u * cos_a + v * sin_a) + t * (0.5 + drive * 2.0)).sin();
            let ring = ((u * u + v * v).sqrt() * freq - t).cos();
            let mut level = 0.5 + 0.25 * wave + 0.25 * ring;
            if invert {
                level = 1.0 - level;
            }
            [
                unit_to_u8(level * tint[0]),
                unit_to_u8(level * tint[1]),
                unit_to_u8(level * tint[2]),
                255,
            ]
        });
    }
}

fn split_header(source: &str) -> Result<(IsfHeader, &str)> {
    let trimmed = source.trim_start();
    if !trimmed.starts_with("/*") {
        return Ok((IsfHeader::default(), source));
    }
    // Search past the opener so `/*/` is not read as an empty comment.
    let end = trimmed[2..]
        .find("*/")
        .map(|i| i + 2)
        .ok_or_else(|| CompositorError::BackendInit("unterminated header comment".into()))?;
    let header_text = trimmed[2..end].trim();
    let body = &trimmed[end + 2..];
    if !header_text.starts_with('{') {
        return Ok((IsfHeader::default(), body));
    }
    let header = serde_json::from_str(header_text)
        .map_err(|err| CompositorError::BackendInit(format!("invalid ISF header: {err}")))?;
    Ok((header, body))
}

fn validate_body(body: &str) -> Result<()> {
    if !body.contains("void main") {
        return Err(CompositorError::BackendInit(
            "shader has no `void main()` entry point".into(),
        ));
    }
    let mut depth: i64 = 0;
    for (line_no, line) in body.lines().enumerate() {
        for ch in line.chars() {
            match ch {
                '{' => depth += 1,
                '}' => depth -= 1,
                _ => {}
            }
            if depth < 0 {
                return Err(CompositorError::BackendInit(format!(
                    "unexpected `}}` on line {}",
                    line_no + 1
                )));
            }
        }
    }
    if depth != 0 {
        return Err(CompositorError::BackendInit("unbalanced braces".into()));
    }
    Ok(())
}

/// Only float, colour and boolean inputs are controllable; other ISF input
/// types (images, events, points) are skipped.
fn uniform_from_input(input: IsfInput) -> Result<Option<UniformDescriptor>> {
    let (kind, value) = match input.kind.as_str() {
        "float" => {
            let fallback = input.min.unwrap_or(0.0);
            let value = input
                .default
                .as_ref()
                .and_then(Value::as_f64)
                .map(|v| v as f32)
                .unwrap_or(fallback);
            (UniformKind::Float, ParamValue::Float(value))
        }
        "color" => {
            let mut rgba = [0.0, 0.0, 0.0, 1.0];
            if let Some(Value::Array(parts)) = &input.default {
                for (slot, part) in rgba.iter_mut().zip(parts) {
                    *slot = part.as_f64().ok_or_else(|| {
                        CompositorError::BackendInit(format!(
                            "color default of `{}` must be numeric",
                            input.name
                        ))
                    })? as f32;
                }
            }
            (UniformKind::Color, ParamValue::Color(rgba))
        }
        "bool" => {
            let value = match &input.default {
                Some(Value::Bool(b)) => *b,
                Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0) != 0.0,
                _ => false,
            };
            (UniformKind::Bool, ParamValue::Bool(value))
        }
        _ => return Ok(None),
    };
    // Float controls always get a display range.
    let (min, max) = match kind {
        UniformKind::Float => (Some(input.min.unwrap_or(0.0)), Some(input.max.unwrap_or(1.0))),
        _ => (input.min, input.max),
    };
    Ok(Some(UniformDescriptor {
        name: input.name,
        kind,
        min,
        max,
        value,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SurfaceSize;

    const SOURCE: &str = r#"/*{
        "DESCRIPTION": "rings",
        "INPUTS": [
            { "NAME": "speed", "TYPE": "float", "DEFAULT": 0.25, "MIN": 0.0, "MAX": 2.0 },
            { "NAME": "tint", "TYPE": "color", "DEFAULT": [1.0, 0.5, 0.0, 1.0] },
            { "NAME": "flip", "TYPE": "bool", "DEFAULT": true },
            { "NAME": "inputImage", "TYPE": "image" }
        ]
    }*/
    void main() {
        gl_FragColor = vec4(1.0);
    }
    "#;

    #[test]
    fn reads_controllable_uniforms() {
        let program = SoftwareShaderProgram::compile(SOURCE).unwrap();
        let uniforms = program.uniforms();

        let names: Vec<&str> = uniforms.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, ["speed", "tint", "flip"]);
        assert_eq!(uniforms[0].max, Some(2.0));
        assert_eq!(program.get_value("tint"), Some(ParamValue::Color([1.0, 0.5, 0.0, 1.0])));
        assert_eq!(program.get_value("flip"), Some(ParamValue::Bool(true)));
    }

    #[test]
    fn plain_fragment_shaders_have_no_uniforms() {
        let program = SoftwareShaderProgram::compile("void main() { }").unwrap();
        assert!(program.uniforms().is_empty());
    }

    #[test]
    fn compile_errors_are_reported() {
        let err = SoftwareShaderProgram::compile("float x = 1.0;").unwrap_err();
        assert!(matches!(err, CompositorError::BackendInit(_)));

        let err = SoftwareShaderProgram::compile("void main() { {").unwrap_err();
        assert!(format!("{err}").contains("unbalanced"));

        let err = SoftwareShaderProgram::compile("/*{ \"INPUTS\": [ }*/ void main() {}")
            .unwrap_err();
        assert!(format!("{err}").contains("ISF header"));
    }

    #[test]
    fn leading_comment_that_opens_with_a_slash_is_not_a_header() {
        let program =
            SoftwareShaderProgram::compile("/*/ plain comment */\nvoid main() {}").unwrap();
        assert!(program.uniforms().is_empty());

        let err = SoftwareShaderProgram::compile("/*/ void main() {}").unwrap_err();
        assert!(format!("{err}").contains("unterminated"));
    }

    #[test]
    fn undeclared_float_range_defaults_to_unit_interval() {
        let source = r#"/*{ "INPUTS": [
            { "NAME": "amt", "TYPE": "float" },
            { "NAME": "on", "TYPE": "bool" }
        ] }*/ void main() {}"#;
        let uniforms = SoftwareShaderProgram::compile(source).unwrap().uniforms();
        assert_eq!((uniforms[0].min, uniforms[0].max), (Some(0.0), Some(1.0)));
        assert_eq!((uniforms[1].min, uniforms[1].max), (None, None));
    }

    #[test]
    fn set_value_checks_name_and_type() {
        let mut program = SoftwareShaderProgram::compile(SOURCE).unwrap();
        program.set_value("speed", ParamValue::Float(1.5)).unwrap();
        assert_eq!(program.get_value("speed"), Some(ParamValue::Float(1.5)));

        assert!(program.set_value("speed", ParamValue::Bool(true)).is_err());
        assert!(program.set_value("missing", ParamValue::Float(0.0)).is_err());
    }

    #[test]
    fn draw_is_time_dependent() {
        let mut program = SoftwareShaderProgram::compile(SOURCE).unwrap();
        let mut a = Surface::new(SurfaceSize::new(16, 12)).unwrap();
        let mut b = Surface::new(SurfaceSize::new(16, 12)).unwrap();
        program.draw(&mut a, 0.0);
        program.draw(&mut b, 1.7);

        assert_ne!(a.pixels(), b.pixels());
        assert!(a.pixels().chunks_exact(4).all(|px| px[3] == 255));
    }
}
