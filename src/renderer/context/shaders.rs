use std::path::Path;

use crate::renderer::config::MAX_VERTEX_FIELDS;
use crate::renderer::context::RenderContext;
use crate::renderer::device::{Device, PrimitiveTopology, VertexAttribute};
use crate::renderer::error::{RenderError, Result};
use crate::renderer::resources::shader::{
    CompiledShader, ComputeShader, PixelShader, ShaderInput, ShaderStage, VertexShader,
};
use crate::renderer::resources::vertex::{VertexField, VertexFormat};
use crate::renderer::shader_compiler::{self, ShaderLanguage};

impl<D: Device> RenderContext<D> {
    /// Compiles a vertex shader. A missing file yields `Ok(None)`.
    pub fn compile_vertex_shader_from_file(&mut self, path: impl AsRef<Path>) -> Result<Option<VertexShader>> {
        let Some(blob) = shader_compiler::compile_file(path.as_ref(), ShaderStage::Vertex)? else {
            return Ok(None);
        };
        self.create_vertex_shader(blob).map(Some)
    }

    pub fn compile_pixel_shader_from_file(&mut self, path: impl AsRef<Path>) -> Result<Option<PixelShader>> {
        let Some(blob) = shader_compiler::compile_file(path.as_ref(), ShaderStage::Pixel)? else {
            return Ok(None);
        };
        let module = self.device.create_shader_module(&blob)?;
        Ok(Some(PixelShader { module }))
    }

    pub fn compile_compute_shader_from_file(&mut self, path: impl AsRef<Path>) -> Result<Option<ComputeShader>> {
        let Some(blob) = shader_compiler::compile_file(path.as_ref(), ShaderStage::Compute)? else {
            return Ok(None);
        };
        let module = self.device.create_shader_module(&blob)?;
        Ok(Some(ComputeShader { module }))
    }

    pub fn compile_vertex_shader_from_source(
        &mut self,
        name: &str,
        source: &str,
        language: ShaderLanguage,
    ) -> Result<VertexShader> {
        let blob = shader_compiler::compile(name, source, language, ShaderStage::Vertex)?;
        self.create_vertex_shader(blob)
    }

    pub fn compile_pixel_shader_from_source(
        &mut self,
        name: &str,
        source: &str,
        language: ShaderLanguage,
    ) -> Result<PixelShader> {
        let blob = shader_compiler::compile(name, source, language, ShaderStage::Pixel)?;
        let module = self.device.create_shader_module(&blob)?;
        Ok(PixelShader { module })
    }

    pub fn compile_compute_shader_from_source(
        &mut self,
        name: &str,
        source: &str,
        language: ShaderLanguage,
    ) -> Result<ComputeShader> {
        let blob = shader_compiler::compile(name, source, language, ShaderStage::Compute)?;
        let module = self.device.create_shader_module(&blob)?;
        Ok(ComputeShader { module })
    }

    fn create_vertex_shader(&mut self, blob: CompiledShader) -> Result<VertexShader> {
        let module = self.device.create_shader_module(&blob)?;
        Ok(VertexShader { module, blob })
    }

    pub fn destroy_vertex_shader(&mut self, shader: VertexShader) {
        if self.state.vertex_shader == Some(shader.module) {
            self.state.vertex_shader = None;
            self.device.set_shader(ShaderStage::Vertex, None);
        }
        self.device.destroy_shader_module(shader.module);
    }

    pub fn destroy_pixel_shader(&mut self, shader: PixelShader) {
        self.device.destroy_shader_module(shader.module);
    }

    pub fn destroy_compute_shader(&mut self, shader: ComputeShader) {
        if self.state.compute_shader == Some(shader.module) {
            self.state.compute_shader = None;
            self.device.set_shader(ShaderStage::Compute, None);
        }
        self.device.destroy_shader_module(shader.module);
    }

    /// Builds an input layout from `fields`, checked against the vertex
    /// shader's input signature.
    pub fn create_vertex_format(&mut self, fields: &[VertexField], shader: &VertexShader) -> Result<VertexFormat> {
        if fields.len() > MAX_VERTEX_FIELDS {
            return Err(RenderError::TooManyVertexFields {
                count: fields.len(),
                max: MAX_VERTEX_FIELDS,
            });
        }

        let inputs = &shader.blob.inputs;
        let attributes = fields
            .iter()
            .map(|field| {
                let input = match_input(field, inputs)?;
                Ok(VertexAttribute {
                    semantic: field.semantic.clone(),
                    location: input.location,
                    format: field.ty,
                    input_slot: field.step.input_slot(),
                    step_rate: field.step.step_rate(),
                    offset: field.offset,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        if let Some(unfed) = inputs
            .iter()
            .find(|input| !fields.iter().any(|field| field.semantic.eq_ignore_ascii_case(&input.name)))
        {
            return Err(RenderError::InputSignatureMismatch(format!(
                "shader input `{}` (location {}) is not fed by any field",
                unfed.name, unfed.location
            )));
        }

        let layout = self.device.create_input_layout(&attributes, &shader.blob)?;
        log::debug!(
            "Created vertex format with {} fields for {}",
            attributes.len(),
            shader.blob.name
        );
        Ok(VertexFormat::new(layout, attributes))
    }

    pub fn destroy_vertex_format(&mut self, format: VertexFormat) {
        self.device.destroy_input_layout(format.layout);
    }

    pub fn bind_shaders(&mut self, vertex: Option<&VertexShader>, pixel: Option<&PixelShader>) {
        let vertex = vertex.map(|shader| shader.module);
        self.state.vertex_shader = vertex;
        self.device.set_shader(ShaderStage::Vertex, vertex);
        self.device
            .set_shader(ShaderStage::Pixel, pixel.map(|shader| shader.module));
    }

    pub fn bind_compute_shader(&mut self, compute: Option<&ComputeShader>) {
        let compute = compute.map(|shader| shader.module);
        self.state.compute_shader = compute;
        self.device.set_shader(ShaderStage::Compute, compute);
    }

    pub fn bind_vertex_format(&mut self, format: Option<&VertexFormat>) {
        self.device
            .set_input_layout(format.map(|format| format.layout));
    }

    pub fn set_primitive_topology(&mut self, topology: PrimitiveTopology) {
        self.device.set_primitive_topology(topology);
    }

    pub fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) -> Result<()> {
        self.check_can_draw()?;
        self.device
            .draw(vertex_count, instance_count, first_vertex, first_instance)
    }

    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    ) -> Result<()> {
        self.check_can_draw()?;
        self.device.draw_indexed(
            index_count,
            instance_count,
            first_index,
            base_vertex,
            first_instance,
        )
    }

    fn check_can_draw(&self) -> Result<()> {
        if !self.state.render_targets_bound() {
            return Err(RenderError::usage("draw issued with no render targets bound"));
        }
        if self.state.vertex_shader.is_none() {
            return Err(RenderError::usage("draw issued with no vertex shader bound"));
        }
        Ok(())
    }
}

fn match_input<'a>(field: &VertexField, inputs: &'a [ShaderInput]) -> Result<&'a ShaderInput> {
    let input = inputs
        .iter()
        .find(|input| input.name.eq_ignore_ascii_case(&field.semantic))
        .ok_or_else(|| {
            RenderError::InputSignatureMismatch(format!(
                "field `{}` uses semantic `{}`, which the shader does not declare",
                field.name, field.semantic
            ))
        })?;

    if input.kind != field.ty.kind() {
        return Err(RenderError::InputSignatureMismatch(format!(
            "field `{}` is {:?} but shader input `{}` is {:?}",
            field.name,
            field.ty.kind(),
            input.name,
            input.kind
        )));
    }
    if field.ty.components() < input.components {
        return Err(RenderError::InputSignatureMismatch(format!(
            "field `{}` has {} components, shader input `{}` reads {}",
            field.name,
            field.ty.components(),
            input.name,
            input.components
        )));
    }
    Ok(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::config::RenderConfig;
    use crate::renderer::device::null::NullDevice;
    use crate::renderer::resources::vertex::VertexFieldType;

    const VERTEX: &str = r#"
struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) tint: vec4<f32>,
};

@vertex
fn vs_main(input: VertexInput) -> @builtin(position) vec4<f32> {
    return vec4<f32>(input.position, 1.0) * input.tint;
}
"#;

    fn context() -> RenderContext<NullDevice> {
        RenderContext::new(NullDevice::new(64, 64).unwrap(), RenderConfig::default()).unwrap()
    }

    #[test]
    fn semantics_match_case_insensitively() {
        let mut ctx = context();
        let shader = ctx
            .compile_vertex_shader_from_source("test.wgsl", VERTEX, ShaderLanguage::Wgsl)
            .unwrap();
        let fields = [
            VertexField::per_vertex("POSITION", 0, VertexFieldType::Float3),
            VertexField::per_instance("Tint", 0, VertexFieldType::Float4),
        ];
        let format = ctx.create_vertex_format(&fields, &shader).unwrap();
        assert_eq!(format.attributes()[0].location, 0);
        assert_eq!(format.attributes()[1].location, 1);
        assert_eq!(format.attributes()[1].input_slot, 1);
        assert_eq!(format.attributes()[1].step_rate, 1);
        ctx.destroy_vertex_format(format);
        ctx.destroy_vertex_shader(shader);
    }

    #[test]
    fn narrow_fields_are_rejected() {
        let mut ctx = context();
        let shader = ctx
            .compile_vertex_shader_from_source("test.wgsl", VERTEX, ShaderLanguage::Wgsl)
            .unwrap();
        let fields = [
            VertexField::per_vertex("position", 0, VertexFieldType::Float2),
            VertexField::per_vertex("tint", 8, VertexFieldType::Float4),
        ];
        assert!(matches!(
            ctx.create_vertex_format(&fields, &shader),
            Err(RenderError::InputSignatureMismatch(_))
        ));
        ctx.destroy_vertex_shader(shader);
    }

    #[test]
    fn unfed_inputs_are_rejected() {
        let mut ctx = context();
        let shader = ctx
            .compile_vertex_shader_from_source("test.wgsl", VERTEX, ShaderLanguage::Wgsl)
            .unwrap();
        let fields = [VertexField::per_vertex("position", 0, VertexFieldType::Float3)];
        assert!(ctx.create_vertex_format(&fields, &shader).is_err());
        ctx.destroy_vertex_shader(shader);
    }

    #[test]
    fn draw_needs_targets_and_shader() {
        let mut ctx = context();
        assert!(ctx.draw(3, 1, 0, 0).is_err());
        let shader = ctx
            .compile_vertex_shader_from_source("test.wgsl", VERTEX, ShaderLanguage::Wgsl)
            .unwrap();
        ctx.bind_shaders(Some(&shader), None);
        assert!(ctx.draw(3, 1, 0, 0).is_err());
        ctx.destroy_vertex_shader(shader);
    }
}
