//! Pipelines built on demand from the bound shader and target state.

use std::collections::HashMap;
use std::ffi::CString;

use ash::vk;
use smallvec::SmallVec;

use crate::renderer::device::{InputLayoutId, PrimitiveTopology, ShaderId, VertexAttribute};
use crate::renderer::error::{RenderError, Result};
use crate::renderer::resources::shader::ShaderStage;
use crate::renderer::vk::convert;

pub struct ShaderModule {
    pub raw: vk::ShaderModule,
    pub stage: ShaderStage,
    pub entry_point: CString,
}

/// Vertex input state; strides come from the vertex buffer bindings at draw
/// time.
pub struct InputLayout {
    pub attributes: Vec<vk::VertexInputAttributeDescription>,
    pub bindings: Vec<vk::VertexInputBindingDescription>,
}

impl InputLayout {
    pub fn new(attributes: &[VertexAttribute]) -> Self {
        let mut bindings: Vec<vk::VertexInputBindingDescription> = Vec::new();
        for attribute in attributes {
            if bindings.iter().any(|b| b.binding == attribute.input_slot) {
                continue;
            }
            bindings.push(vk::VertexInputBindingDescription {
                binding: attribute.input_slot,
                stride: 0,
                input_rate: if attribute.step_rate == 0 {
                    vk::VertexInputRate::VERTEX
                } else {
                    vk::VertexInputRate::INSTANCE
                },
            });
        }
        let attributes = attributes
            .iter()
            .map(|a| vk::VertexInputAttributeDescription {
                location: a.location,
                binding: a.input_slot,
                format: convert::vertex_format(a.format),
                offset: a.offset,
            })
            .collect();
        Self { attributes, bindings }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GraphicsPipelineKey {
    pub vertex_shader: ShaderId,
    pub pixel_shader: Option<ShaderId>,
    pub input_layout: Option<InputLayoutId>,
    pub topology: PrimitiveTopology,
    pub color_formats: SmallVec<[vk::Format; 8]>,
    pub depth_format: Option<vk::Format>,
    pub samples: u32,
}

impl GraphicsPipelineKey {
    fn uses_shader(&self, shader: ShaderId) -> bool {
        self.vertex_shader == shader || self.pixel_shader == Some(shader)
    }
}

#[derive(Default)]
pub struct PipelineCache {
    graphics: HashMap<GraphicsPipelineKey, vk::Pipeline>,
    compute: HashMap<ShaderId, vk::Pipeline>,
}

impl PipelineCache {
    pub fn graphics(&self, key: &GraphicsPipelineKey) -> Option<vk::Pipeline> {
        self.graphics.get(key).copied()
    }

    pub fn insert_graphics(&mut self, key: GraphicsPipelineKey, pipeline: vk::Pipeline) {
        self.graphics.insert(key, pipeline);
    }

    pub fn compute(&self, shader: ShaderId) -> Option<vk::Pipeline> {
        self.compute.get(&shader).copied()
    }

    pub fn insert_compute(&mut self, shader: ShaderId, pipeline: vk::Pipeline) {
        self.compute.insert(shader, pipeline);
    }

    /// Removes every pipeline built from `shader` and returns them
    pub fn evict_shader(&mut self, shader: ShaderId) -> Vec<vk::Pipeline> {
        let mut evicted = Vec::new();
        self.graphics.retain(|key, pipeline| {
            let keep = !key.uses_shader(shader);
            if !keep {
                evicted.push(*pipeline);
            }
            keep
        });
        evicted.extend(self.compute.remove(&shader));
        evicted
    }

    pub fn evict_input_layout(&mut self, layout: InputLayoutId) -> Vec<vk::Pipeline> {
        let mut evicted = Vec::new();
        self.graphics.retain(|key, pipeline| {
            let keep = key.input_layout != Some(layout);
            if !keep {
                evicted.push(*pipeline);
            }
            keep
        });
        evicted
    }

    pub fn drain(&mut self) -> impl Iterator<Item = vk::Pipeline> + '_ {
        self.graphics
            .drain()
            .map(|(_, pipeline)| pipeline)
            .chain(self.compute.drain().map(|(_, pipeline)| pipeline))
    }
}

pub struct GraphicsPipelineDesc<'a> {
    pub key: &'a GraphicsPipelineKey,
    pub vertex_shader: &'a ShaderModule,
    pub pixel_shader: Option<&'a ShaderModule>,
    pub input_layout: Option<&'a InputLayout>,
    pub layout: vk::PipelineLayout,
}

pub fn create_graphics_pipeline(desc: &GraphicsPipelineDesc<'_>, device: &ash::Device) -> Result<vk::Pipeline> {
    let key = desc.key;

    let mut stages = vec![
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(desc.vertex_shader.raw)
            .name(&desc.vertex_shader.entry_point),
    ];
    if let Some(pixel_shader) = desc.pixel_shader {
        stages.push(
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(pixel_shader.raw)
                .name(&pixel_shader.entry_point),
        );
    }

    let (bindings, attributes) = match desc.input_layout {
        Some(layout) => (layout.bindings.as_slice(), layout.attributes.as_slice()),
        None => (&[][..], &[][..]),
    };
    let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(bindings)
        .vertex_attribute_descriptions(attributes);

    let input_assembly =
        vk::PipelineInputAssemblyStateCreateInfo::default().topology(convert::topology(key.topology));

    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);

    let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
        .polygon_mode(vk::PolygonMode::FILL)
        .cull_mode(vk::CullModeFlags::NONE)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .line_width(1.0);

    let multisample = vk::PipelineMultisampleStateCreateInfo::default()
        .rasterization_samples(convert::sample_count(key.samples));

    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(key.depth_format.is_some())
        .depth_write_enable(key.depth_format.is_some())
        .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL);

    let blend_attachments: SmallVec<[_; 8]> = key
        .color_formats
        .iter()
        .map(|_| {
            vk::PipelineColorBlendAttachmentState::default()
                .blend_enable(false)
                .color_write_mask(vk::ColorComponentFlags::RGBA)
        })
        .collect();
    let color_blend = vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

    let dynamic_states = [
        vk::DynamicState::VIEWPORT,
        vk::DynamicState::SCISSOR,
        vk::DynamicState::VERTEX_INPUT_BINDING_STRIDE,
    ];
    let dynamic_state = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

    let depth_format = key.depth_format.unwrap_or(vk::Format::UNDEFINED);
    let stencil_format = if depth_format == vk::Format::D24_UNORM_S8_UINT {
        depth_format
    } else {
        vk::Format::UNDEFINED
    };
    let mut rendering_info = vk::PipelineRenderingCreateInfo::default()
        .color_attachment_formats(&key.color_formats)
        .depth_attachment_format(depth_format)
        .stencil_attachment_format(stencil_format);

    let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization)
        .multisample_state(&multisample)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&color_blend)
        .dynamic_state(&dynamic_state)
        .layout(desc.layout)
        .push_next(&mut rendering_info);

    let pipelines = unsafe {
        device
            .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
            .map_err(|(_, e)| RenderError::Vulkan(e))?
    };
    log::debug!(
        "Created graphics pipeline ({} color targets, depth {:?}, {}x)",
        key.color_formats.len(),
        key.depth_format,
        key.samples
    );
    pipelines
        .into_iter()
        .next()
        .ok_or_else(|| RenderError::Device("driver returned no pipeline".into()))
}

pub fn create_compute_pipeline(
    shader: &ShaderModule,
    layout: vk::PipelineLayout,
    device: &ash::Device,
) -> Result<vk::Pipeline> {
    let stage = vk::PipelineShaderStageCreateInfo::default()
        .stage(vk::ShaderStageFlags::COMPUTE)
        .module(shader.raw)
        .name(&shader.entry_point);
    let pipeline_info = vk::ComputePipelineCreateInfo::default()
        .stage(stage)
        .layout(layout);

    let pipelines = unsafe {
        device
            .create_compute_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
            .map_err(|(_, e)| RenderError::Vulkan(e))?
    };
    pipelines
        .into_iter()
        .next()
        .ok_or_else(|| RenderError::Device("driver returned no pipeline".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::resources::vertex::VertexFieldType;

    fn attribute(location: u32, input_slot: u32, step_rate: u32) -> VertexAttribute {
        VertexAttribute {
            semantic: format!("attr{location}"),
            location,
            format: VertexFieldType::Float4,
            input_slot,
            step_rate,
            offset: 0,
        }
    }

    #[test]
    fn input_layout_has_one_binding_per_slot() {
        let layout = InputLayout::new(&[attribute(0, 0, 0), attribute(1, 0, 0), attribute(2, 1, 1)]);
        assert_eq!(layout.attributes.len(), 3);
        assert_eq!(layout.bindings.len(), 2);
        assert_eq!(layout.bindings[0].input_rate, vk::VertexInputRate::VERTEX);
        assert_eq!(layout.bindings[1].input_rate, vk::VertexInputRate::INSTANCE);
    }

    #[test]
    fn evicting_a_shader_drops_only_its_pipelines() {
        let mut shaders = slotmap::SlotMap::<ShaderId, ()>::with_key();
        let (a, b) = (shaders.insert(()), shaders.insert(()));
        let key = |vs| GraphicsPipelineKey {
            vertex_shader: vs,
            pixel_shader: None,
            input_layout: None,
            topology: PrimitiveTopology::TriangleList,
            color_formats: SmallVec::from_slice(&[vk::Format::R8G8B8A8_UNORM]),
            depth_format: None,
            samples: 1,
        };

        let mut cache = PipelineCache::default();
        cache.insert_graphics(key(a), vk::Pipeline::null());
        cache.insert_graphics(key(b), vk::Pipeline::null());

        assert_eq!(cache.evict_shader(a).len(), 1);
        assert!(cache.graphics(&key(a)).is_none());
        assert!(cache.graphics(&key(b)).is_some());
    }
}
