//! Abstract types to their Vulkan counterparts

use ash::vk;

use crate::renderer::device::{ImageUsage, PrimitiveTopology};
use crate::renderer::format::Format;
use crate::renderer::resources::buffer::{BufferKind, IndexFormat};
use crate::renderer::resources::texture::WrapMode;
use crate::renderer::resources::vertex::VertexFieldType;

pub fn format(format: Format) -> vk::Format {
    match format {
        Format::R8Unorm => vk::Format::R8_UNORM,
        Format::R8G8Unorm => vk::Format::R8G8_UNORM,
        Format::R8G8B8A8Unorm => vk::Format::R8G8B8A8_UNORM,
        Format::R8G8B8A8Srgb => vk::Format::R8G8B8A8_SRGB,
        Format::B8G8R8A8Unorm => vk::Format::B8G8R8A8_UNORM,
        Format::B8G8R8A8Srgb => vk::Format::B8G8R8A8_SRGB,
        Format::R16Float => vk::Format::R16_SFLOAT,
        Format::R16G16Float => vk::Format::R16G16_SFLOAT,
        Format::R16G16B16A16Float => vk::Format::R16G16B16A16_SFLOAT,
        Format::R32Float => vk::Format::R32_SFLOAT,
        Format::R32G32Float => vk::Format::R32G32_SFLOAT,
        Format::R32G32B32A32Float => vk::Format::R32G32B32A32_SFLOAT,
        Format::R32Uint => vk::Format::R32_UINT,
        Format::R11G11B10Float => vk::Format::B10G11R11_UFLOAT_PACK32,
        Format::R10G10B10A2Unorm => vk::Format::A2B10G10R10_UNORM_PACK32,
        Format::D16Unorm => vk::Format::D16_UNORM,
        Format::D24UnormS8Uint => vk::Format::D24_UNORM_S8_UINT,
        Format::D32Float => vk::Format::D32_SFLOAT,
    }
}

/// Reverse of [`format`], for formats chosen by the surface
pub fn from_vk_format(format: vk::Format) -> Option<Format> {
    Format::ALL.iter().copied().find(|&f| self::format(f) == format)
}

pub fn aspect(format: Format) -> vk::ImageAspectFlags {
    match format {
        Format::D24UnormS8Uint => vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
        Format::D16Unorm | Format::D32Float => vk::ImageAspectFlags::DEPTH,
        _ => vk::ImageAspectFlags::COLOR,
    }
}

/// Every image can be copied, cleared and resolved, so transfer usage is
/// always included.
pub fn image_usage(usage: ImageUsage) -> vk::ImageUsageFlags {
    let mut flags = vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST;
    if usage.contains(ImageUsage::SAMPLED) {
        flags |= vk::ImageUsageFlags::SAMPLED;
    }
    if usage.contains(ImageUsage::STORAGE) {
        flags |= vk::ImageUsageFlags::STORAGE;
    }
    if usage.contains(ImageUsage::COLOR_TARGET) {
        flags |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
    }
    if usage.contains(ImageUsage::DEPTH_TARGET) {
        flags |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
    }
    flags
}

pub fn sample_count(samples: u32) -> vk::SampleCountFlags {
    match samples {
        0 | 1 => vk::SampleCountFlags::TYPE_1,
        2 => vk::SampleCountFlags::TYPE_2,
        4 => vk::SampleCountFlags::TYPE_4,
        8 => vk::SampleCountFlags::TYPE_8,
        16 => vk::SampleCountFlags::TYPE_16,
        32 => vk::SampleCountFlags::TYPE_32,
        _ => vk::SampleCountFlags::TYPE_64,
    }
}

pub fn sampler_info(wrap: WrapMode) -> vk::SamplerCreateInfo<'static> {
    let filter = if wrap.is_linear() {
        vk::Filter::LINEAR
    } else {
        vk::Filter::NEAREST
    };
    let address_mode = if wrap.is_repeat() {
        vk::SamplerAddressMode::REPEAT
    } else {
        vk::SamplerAddressMode::CLAMP_TO_EDGE
    };
    vk::SamplerCreateInfo::default()
        .mag_filter(filter)
        .min_filter(filter)
        .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
        .address_mode_u(address_mode)
        .address_mode_v(address_mode)
        .address_mode_w(address_mode)
        .max_lod(vk::LOD_CLAMP_NONE)
}

pub fn topology(topology: PrimitiveTopology) -> vk::PrimitiveTopology {
    match topology {
        PrimitiveTopology::PointList => vk::PrimitiveTopology::POINT_LIST,
        PrimitiveTopology::LineList => vk::PrimitiveTopology::LINE_LIST,
        PrimitiveTopology::LineStrip => vk::PrimitiveTopology::LINE_STRIP,
        PrimitiveTopology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
        PrimitiveTopology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
    }
}

pub fn vertex_format(ty: VertexFieldType) -> vk::Format {
    use VertexFieldType::*;
    match ty {
        Int => vk::Format::R32_SINT,
        Int2 => vk::Format::R32G32_SINT,
        Int3 => vk::Format::R32G32B32_SINT,
        Int4 => vk::Format::R32G32B32A32_SINT,
        Uint => vk::Format::R32_UINT,
        Uint2 => vk::Format::R32G32_UINT,
        Uint3 => vk::Format::R32G32B32_UINT,
        Uint4 => vk::Format::R32G32B32A32_UINT,
        Float => vk::Format::R32_SFLOAT,
        Float2 => vk::Format::R32G32_SFLOAT,
        Float3 => vk::Format::R32G32B32_SFLOAT,
        Float4 => vk::Format::R32G32B32A32_SFLOAT,
    }
}

pub fn index_type(format: IndexFormat) -> vk::IndexType {
    match format {
        IndexFormat::U16 => vk::IndexType::UINT16,
        IndexFormat::U32 => vk::IndexType::UINT32,
    }
}

pub fn buffer_usage(kind: BufferKind) -> vk::BufferUsageFlags {
    let usage = match kind {
        BufferKind::Vertex => vk::BufferUsageFlags::VERTEX_BUFFER,
        BufferKind::Index => vk::BufferUsageFlags::INDEX_BUFFER,
        BufferKind::Constant => vk::BufferUsageFlags::UNIFORM_BUFFER,
    };
    usage | vk::BufferUsageFlags::TRANSFER_DST
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_format_round_trips_through_vulkan() {
        for &f in Format::ALL {
            assert_ne!(format(f), vk::Format::UNDEFINED);
            assert_eq!(from_vk_format(format(f)), Some(f));
        }
    }

    #[test]
    fn depth_formats_use_depth_aspect() {
        assert_eq!(aspect(Format::D32Float), vk::ImageAspectFlags::DEPTH);
        assert!(aspect(Format::D24UnormS8Uint).contains(vk::ImageAspectFlags::STENCIL));
        assert_eq!(aspect(Format::R8Unorm), vk::ImageAspectFlags::COLOR);
    }
}
