use crate::renderer::device::ShaderId;
use crate::renderer::resources::vertex::ElementKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Pixel,
    Compute,
}

/// One entry of a vertex shader's input signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderInput {
    pub name: String,
    pub location: u32,
    pub kind: ElementKind,
    pub components: u8,
}

/// Output of the shader compiler: SPIR-V plus what later stages need to know about it
#[derive(Debug, Clone)]
pub struct CompiledShader {
    pub name: String,
    pub stage: ShaderStage,
    pub entry_point: String,
    pub spirv: Vec<u32>,
    /// Empty for every stage except vertex
    pub inputs: Vec<ShaderInput>,
}

impl CompiledShader {
    pub fn bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.spirv)
    }
}

/// Vertex stage. Keeps its compiled blob around because input layouts are
/// validated against it.
#[derive(Debug)]
pub struct VertexShader {
    pub(crate) module: ShaderId,
    pub(crate) blob: CompiledShader,
}

impl VertexShader {
    pub fn blob(&self) -> &CompiledShader {
        &self.blob
    }
}

#[derive(Debug)]
pub struct PixelShader {
    pub(crate) module: ShaderId,
}

#[derive(Debug)]
pub struct ComputeShader {
    pub(crate) module: ShaderId,
}
