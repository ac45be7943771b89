use std::path::Path;

use naga::back::spv;
use naga::front::glsl;
use naga::valid::{Capabilities, ValidationFlags, Validator};
use naga::{Binding, EntryPoint, Expression, Module, ScalarKind, Statement, TypeInner};

use crate::renderer::error::{RenderError, Result};
use crate::renderer::resources::shader::{CompiledShader, ShaderInput, ShaderStage};
use crate::renderer::resources::vertex::ElementKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderLanguage {
    Glsl,
    Wgsl,
}

impl ShaderLanguage {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "vert" | "frag" | "comp" | "glsl" => Some(Self::Glsl),
            "wgsl" => Some(Self::Wgsl),
            _ => None,
        }
    }
}

/// Reads and compiles a shader file.
///
/// A file that cannot be read is logged and yields `Ok(None)`; a file that
/// fails to compile is an error.
pub fn compile_file(path: &Path, stage: ShaderStage) -> Result<Option<CompiledShader>> {
    let name = path.display().to_string();
    let language = ShaderLanguage::from_path(path).ok_or_else(|| RenderError::ShaderCompile {
        name: name.clone(),
        message: "unrecognized shader file extension".into(),
    })?;

    let source = match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(e) => {
            log::error!("Could not read shader {}: {}", name, e);
            return Ok(None);
        }
    };

    compile(&name, &source, language, stage).map(Some)
}

pub fn compile(
    name: &str,
    source: &str,
    language: ShaderLanguage,
    stage: ShaderStage,
) -> Result<CompiledShader> {
    let naga_stage = naga_stage(stage);
    let compile_error = |message: String| {
        log::error!("Shader {} failed to compile:\n{}", name, message);
        RenderError::ShaderCompile {
            name: name.to_string(),
            message,
        }
    };

    // Parse into IR
    let module = match language {
        ShaderLanguage::Glsl => {
            let mut frontend = glsl::Frontend::default();
            frontend
                .parse(&glsl::Options::from(naga_stage), source)
                .map_err(|e| compile_error(format!("{:?}", e)))?
        }
        ShaderLanguage::Wgsl => naga::front::wgsl::parse_str(source)
            .map_err(|e| compile_error(e.emit_to_string(source)))?,
    };

    // Validate the IR
    let mut validator = Validator::new(ValidationFlags::all(), Capabilities::all());
    let module_info = validator
        .validate(&module)
        .map_err(|e| compile_error(e.to_string()))?;

    let entry_point = module
        .entry_points
        .iter()
        .find(|ep| ep.stage == naga_stage)
        .ok_or_else(|| compile_error(format!("no {:?} entry point", stage)))?;

    let inputs = if stage == ShaderStage::Vertex {
        reflect_inputs(&module, entry_point)
    } else {
        Vec::new()
    };

    // Generate the SPIR-V binary
    let pipeline_options = spv::PipelineOptions {
        shader_stage: naga_stage,
        entry_point: entry_point.name.clone(),
    };
    let spirv = spv::write_vec(
        &module,
        &module_info,
        &spv::Options::default(),
        Some(&pipeline_options),
    )
    .map_err(|e| compile_error(e.to_string()))?;

    log::debug!(
        "Compiled {:?} shader {} ({} words, {} inputs)",
        stage,
        name,
        spirv.len(),
        inputs.len()
    );

    Ok(CompiledShader {
        name: name.to_string(),
        stage,
        entry_point: entry_point.name.clone(),
        spirv,
        inputs,
    })
}

fn naga_stage(stage: ShaderStage) -> naga::ShaderStage {
    match stage {
        ShaderStage::Vertex => naga::ShaderStage::Vertex,
        ShaderStage::Pixel => naga::ShaderStage::Fragment,
        ShaderStage::Compute => naga::ShaderStage::Compute,
    }
}

/// Collects the location-bound inputs of a vertex entry point.
/// Built-ins such as the vertex index are skipped.
fn reflect_inputs(module: &Module, entry_point: &EntryPoint) -> Vec<ShaderInput> {
    let mut inputs = Vec::new();
    for (index, argument) in entry_point.function.arguments.iter().enumerate() {
        match &argument.binding {
            Some(binding) => {
                let name = argument
                    .name
                    .clone()
                    .or_else(|| stored_global_name(module, entry_point, index as u32));
                push_input(module, name, argument.ty, binding, &mut inputs);
            }
            None => {
                if let TypeInner::Struct { members, .. } = &module.types[argument.ty].inner {
                    for member in members {
                        if let Some(binding) = &member.binding {
                            push_input(module, member.name.clone(), member.ty, binding, &mut inputs);
                        }
                    }
                }
            }
        }
    }
    inputs.sort_by_key(|input| input.location);
    inputs
}

fn push_input(
    module: &Module,
    name: Option<String>,
    ty: naga::Handle<naga::Type>,
    binding: &Binding,
    inputs: &mut Vec<ShaderInput>,
) {
    let Binding::Location { location, .. } = *binding else {
        return;
    };
    let Some((kind, components)) = element_of(&module.types[ty].inner) else {
        log::warn!("Vertex input at location {} has an unsupported type", location);
        return;
    };
    inputs.push(ShaderInput {
        name: name.unwrap_or_else(|| format!("location{}", location)),
        location,
        kind,
        components,
    });
}

/// GLSL inputs arrive as unnamed arguments that the entry point copies into
/// named globals, so recover the name from that store.
fn stored_global_name(module: &Module, entry_point: &EntryPoint, argument: u32) -> Option<String> {
    let function = &entry_point.function;
    function.body.iter().find_map(|statement| {
        let Statement::Store { pointer, value } = *statement else {
            return None;
        };
        match (&function.expressions[pointer], &function.expressions[value]) {
            (Expression::GlobalVariable(global), Expression::FunctionArgument(index))
                if *index == argument =>
            {
                module.global_variables[*global].name.clone()
            }
            _ => None,
        }
    })
}

fn element_of(inner: &TypeInner) -> Option<(ElementKind, u8)> {
    match *inner {
        TypeInner::Scalar(scalar) => Some((element_kind(scalar.kind)?, 1)),
        TypeInner::Vector { size, scalar } => Some((element_kind(scalar.kind)?, size as u8)),
        _ => None,
    }
}

fn element_kind(kind: ScalarKind) -> Option<ElementKind> {
    match kind {
        ScalarKind::Sint => Some(ElementKind::Int),
        ScalarKind::Uint => Some(ElementKind::Uint),
        ScalarKind::Float => Some(ElementKind::Float),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WGSL_VERTEX: &str = r#"
struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) color: vec4<f32>,
    @location(2) instance_offset: vec2<f32>,
};

@vertex
fn vs_main(input: VertexInput, @builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    return vec4<f32>(input.position.xy + input.instance_offset, input.position.z, 1.0) * input.color.a;
}
"#;

    const GLSL_VERTEX: &str = r#"
#version 450
layout(location = 0) in vec3 position;
layout(location = 1) in vec2 uv;
layout(location = 0) out vec2 v_uv;

void main() {
    v_uv = uv;
    gl_Position = vec4(position, 1.0);
}
"#;

    #[test]
    fn wgsl_vertex_inputs_are_reflected() {
        let shader = compile("test.wgsl", WGSL_VERTEX, ShaderLanguage::Wgsl, ShaderStage::Vertex).unwrap();
        assert_eq!(shader.entry_point, "vs_main");
        assert!(!shader.spirv.is_empty());
        let names: Vec<_> = shader.inputs.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, ["position", "color", "instance_offset"]);
        assert_eq!(shader.inputs[1].components, 4);
        assert_eq!(shader.inputs[1].kind, ElementKind::Float);
    }

    #[test]
    fn glsl_vertex_inputs_are_reflected() {
        let shader = compile("test.vert", GLSL_VERTEX, ShaderLanguage::Glsl, ShaderStage::Vertex).unwrap();
        assert_eq!(shader.entry_point, "main");
        assert_eq!(shader.inputs.len(), 2);
        assert_eq!(shader.inputs[0].location, 0);
        assert_eq!(shader.inputs[0].components, 3);
        assert_eq!(shader.inputs[1].components, 2);
    }

    #[test]
    fn syntax_errors_are_reported() {
        let result = compile("broken.wgsl", "fn nope( {", ShaderLanguage::Wgsl, ShaderStage::Vertex);
        assert!(matches!(result, Err(RenderError::ShaderCompile { .. })));
    }

    #[test]
    fn missing_stage_is_an_error() {
        let result = compile("test.wgsl", WGSL_VERTEX, ShaderLanguage::Wgsl, ShaderStage::Compute);
        assert!(result.is_err());
    }

    #[test]
    fn missing_file_yields_none() {
        let path = std::env::temp_dir().join("ember-does-not-exist.wgsl");
        assert!(compile_file(&path, ShaderStage::Vertex).unwrap().is_none());
    }

    #[test]
    fn language_is_picked_from_extension() {
        assert_eq!(ShaderLanguage::from_path(Path::new("a.frag")), Some(ShaderLanguage::Glsl));
        assert_eq!(ShaderLanguage::from_path(Path::new("a.wgsl")), Some(ShaderLanguage::Wgsl));
        assert_eq!(ShaderLanguage::from_path(Path::new("a.hlsl")), None);
    }
}
