use ash::vk;

use crate::renderer::vk::memory::GpuImage;

/// Moves every layer of `image` into `new_layout` and records the new layout
/// on the image. Returns false if it was already there.
pub fn transition_image(
    cmd: vk::CommandBuffer,
    image: &mut GpuImage,
    new_layout: vk::ImageLayout,
    device: &ash::Device,
) -> bool {
    if image.layout == new_layout {
        return false;
    }
    transition_image_layout(cmd, image.raw, image.aspect, image.layout, new_layout, device);
    image.layout = new_layout;
    true
}

pub fn transition_image_layout(
    cmd: vk::CommandBuffer,
    image: vk::Image,
    image_aspect: vk::ImageAspectFlags,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    device: &ash::Device,
) {
    let image_barrier = vk::ImageMemoryBarrier2::default()
        .src_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
        .src_access_mask(vk::AccessFlags2::MEMORY_WRITE)
        .dst_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
        .dst_access_mask(vk::AccessFlags2::MEMORY_WRITE | vk::AccessFlags2::MEMORY_READ)
        .old_layout(old_layout)
        .new_layout(new_layout)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: image_aspect,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: vk::REMAINING_ARRAY_LAYERS,
        })
        .image(image);

    let barriers = [image_barrier];
    let dep_info = vk::DependencyInfo::default().image_memory_barriers(&barriers);

    unsafe { device.cmd_pipeline_barrier2(cmd, &dep_info) };
}

/// Orders all prior memory writes before all later accesses. Used around
/// buffer uploads and after compute dispatches.
pub fn memory_barrier(cmd: vk::CommandBuffer, device: &ash::Device) {
    let barrier = vk::MemoryBarrier2::default()
        .src_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
        .src_access_mask(vk::AccessFlags2::MEMORY_WRITE)
        .dst_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
        .dst_access_mask(vk::AccessFlags2::MEMORY_WRITE | vk::AccessFlags2::MEMORY_READ);

    let barriers = [barrier];
    let dep_info = vk::DependencyInfo::default().memory_barriers(&barriers);

    unsafe { device.cmd_pipeline_barrier2(cmd, &dep_info) };
}

/// Makes device writes visible to host reads after the submission completes
pub fn host_read_barrier(cmd: vk::CommandBuffer, device: &ash::Device) {
    let barrier = vk::MemoryBarrier2::default()
        .src_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
        .src_access_mask(vk::AccessFlags2::MEMORY_WRITE)
        .dst_stage_mask(vk::PipelineStageFlags2::HOST)
        .dst_access_mask(vk::AccessFlags2::HOST_READ);

    let barriers = [barrier];
    let dep_info = vk::DependencyInfo::default().memory_barriers(&barriers);

    unsafe { device.cmd_pipeline_barrier2(cmd, &dep_info) };
}

/// Layout an image rests in after an upload, chosen by how it will be used next
pub fn resting_layout(image: &GpuImage) -> vk::ImageLayout {
    use crate::renderer::device::ImageUsage;

    let usage = image.desc.usage;
    if usage.contains(ImageUsage::DEPTH_TARGET) {
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
    } else if usage.contains(ImageUsage::SAMPLED) {
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
    } else {
        vk::ImageLayout::GENERAL
    }
}
