use crate::renderer::device::{InputLayoutId, VertexAttribute};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Int,
    Uint,
    Float,
}

/// Scalar or vector element type of a vertex field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexFieldType {
    Int,
    Int2,
    Int3,
    Int4,
    Uint,
    Uint2,
    Uint3,
    Uint4,
    Float,
    Float2,
    Float3,
    Float4,
}

impl VertexFieldType {
    pub fn kind(self) -> ElementKind {
        use VertexFieldType::*;
        match self {
            Int | Int2 | Int3 | Int4 => ElementKind::Int,
            Uint | Uint2 | Uint3 | Uint4 => ElementKind::Uint,
            Float | Float2 | Float3 | Float4 => ElementKind::Float,
        }
    }

    pub fn components(self) -> u8 {
        use VertexFieldType::*;
        match self {
            Int | Uint | Float => 1,
            Int2 | Uint2 | Float2 => 2,
            Int3 | Uint3 | Float3 => 3,
            Int4 | Uint4 | Float4 => 4,
        }
    }
}

/// Whether a field advances per vertex or per instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StepRate {
    #[default]
    PerVertex,
    PerInstance,
}

impl StepRate {
    pub fn input_slot(self) -> u32 {
        match self {
            StepRate::PerVertex => 0,
            StepRate::PerInstance => 1,
        }
    }

    pub fn step_rate(self) -> u32 {
        match self {
            StepRate::PerVertex => 0,
            StepRate::PerInstance => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexField {
    /// Matched against the vertex shader's input names
    pub semantic: String,
    pub name: String,
    pub offset: u32,
    pub ty: VertexFieldType,
    pub step: StepRate,
}

impl VertexField {
    pub fn new(
        semantic: impl Into<String>,
        name: impl Into<String>,
        offset: u32,
        ty: VertexFieldType,
        step: StepRate,
    ) -> Self {
        Self {
            semantic: semantic.into(),
            name: name.into(),
            offset,
            ty,
            step,
        }
    }

    pub fn per_vertex(semantic: impl Into<String>, offset: u32, ty: VertexFieldType) -> Self {
        let semantic = semantic.into();
        Self::new(semantic.clone(), semantic, offset, ty, StepRate::PerVertex)
    }

    pub fn per_instance(semantic: impl Into<String>, offset: u32, ty: VertexFieldType) -> Self {
        let semantic = semantic.into();
        Self::new(semantic.clone(), semantic, offset, ty, StepRate::PerInstance)
    }
}

/// Input layout derived from a list of vertex fields and a vertex shader
#[derive(Debug)]
pub struct VertexFormat {
    pub(crate) layout: InputLayoutId,
    attributes: Vec<VertexAttribute>,
}

impl VertexFormat {
    pub(crate) fn new(layout: InputLayoutId, attributes: Vec<VertexAttribute>) -> Self {
        Self { layout, attributes }
    }

    pub fn attributes(&self) -> &[VertexAttribute] {
        &self.attributes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_rate_implies_slot_and_rate() {
        assert_eq!(StepRate::PerVertex.input_slot(), 0);
        assert_eq!(StepRate::PerVertex.step_rate(), 0);
        assert_eq!(StepRate::PerInstance.input_slot(), 1);
        assert_eq!(StepRate::PerInstance.step_rate(), 1);
    }

    #[test]
    fn field_type_decomposes() {
        assert_eq!(VertexFieldType::Float3.kind(), ElementKind::Float);
        assert_eq!(VertexFieldType::Float3.components(), 3);
        assert_eq!(VertexFieldType::Int.kind(), ElementKind::Int);
        assert_eq!(VertexFieldType::Uint4.components(), 4);
    }
}
