//! Slot bindings as one descriptor set.
//!
//! Texture slots, UAV slots and constant buffer slots share a single
//! partially bound set layout. Shaders address them as
//! `@group(0) @binding(n)` with `n` offset per slot kind.

use std::sync::Arc;

use ash::vk;
use gpu_descriptor::{
    CreatePoolError, DescriptorDevice, DescriptorPoolCreateFlags, DescriptorTotalCount,
    DeviceAllocationError,
};

use crate::renderer::config::{MAX_CONSTANT_BUFFER_SLOTS, MAX_TEXTURE_SLOTS, MAX_UAV_SLOTS};
use crate::renderer::error::Result;

pub const TEXTURE_BINDING_BASE: u32 = 0;
pub const UAV_BINDING_BASE: u32 = 16;
pub const CONSTANT_BINDING_BASE: u32 = 32;

/// Descriptors in one slot set, used to size the pools
pub fn slot_set_counts() -> DescriptorTotalCount {
    DescriptorTotalCount {
        combined_image_sampler: MAX_TEXTURE_SLOTS as u32,
        storage_image: MAX_UAV_SLOTS as u32,
        uniform_buffer: MAX_CONSTANT_BUFFER_SLOTS as u32,
        ..Default::default()
    }
}

pub struct DescriptorSetLayoutBuilder<'a> {
    bindings: Vec<vk::DescriptorSetLayoutBinding<'a>>,
    binding_flags: Vec<vk::DescriptorBindingFlags>,
}

impl DescriptorSetLayoutBuilder<'_> {
    pub fn new() -> Self {
        Self {
            bindings: Vec::new(),
            binding_flags: Vec::new(),
        }
    }

    /// Adds `count` consecutive single-descriptor bindings starting at `base`
    pub fn add_slots(mut self, base: u32, count: usize, descriptor_type: vk::DescriptorType) -> Self {
        for i in 0..count as u32 {
            self.bindings.push(
                vk::DescriptorSetLayoutBinding::default()
                    .binding(base + i)
                    .descriptor_type(descriptor_type)
                    .descriptor_count(1)
                    .stage_flags(vk::ShaderStageFlags::ALL),
            );
            self.binding_flags
                .push(vk::DescriptorBindingFlags::PARTIALLY_BOUND);
        }
        self
    }

    pub fn build(self, device: &ash::Device) -> Result<vk::DescriptorSetLayout> {
        let mut binding_flags_info =
            vk::DescriptorSetLayoutBindingFlagsCreateInfo::default().binding_flags(&self.binding_flags);
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default()
            .bindings(&self.bindings)
            .push_next(&mut binding_flags_info);
        Ok(unsafe { device.create_descriptor_set_layout(&layout_info, None)? })
    }
}

/// The slot set layout and the pipeline layout every pipeline is built with
pub fn create_slot_layouts(device: &ash::Device) -> Result<(vk::DescriptorSetLayout, vk::PipelineLayout)> {
    let set_layout = DescriptorSetLayoutBuilder::new()
        .add_slots(TEXTURE_BINDING_BASE, MAX_TEXTURE_SLOTS, vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
        .add_slots(UAV_BINDING_BASE, MAX_UAV_SLOTS, vk::DescriptorType::STORAGE_IMAGE)
        .add_slots(CONSTANT_BINDING_BASE, MAX_CONSTANT_BUFFER_SLOTS, vk::DescriptorType::UNIFORM_BUFFER)
        .build(device)?;

    let set_layouts = [set_layout];
    let layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
    let pipeline_layout = match unsafe { device.create_pipeline_layout(&layout_info, None) } {
        Ok(layout) => layout,
        Err(e) => {
            unsafe { device.destroy_descriptor_set_layout(set_layout, None) };
            return Err(e.into());
        }
    };
    Ok((set_layout, pipeline_layout))
}

pub struct DescriptorAshDevice(pub Arc<ash::Device>);

impl DescriptorDevice<vk::DescriptorSetLayout, vk::DescriptorPool, vk::DescriptorSet> for DescriptorAshDevice {
    unsafe fn create_descriptor_pool(
        &self,
        descriptor_count: &DescriptorTotalCount,
        max_sets: u32,
        flags: DescriptorPoolCreateFlags,
    ) -> std::result::Result<vk::DescriptorPool, CreatePoolError> {
        let counts = [
            (vk::DescriptorType::SAMPLER, descriptor_count.sampler),
            (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, descriptor_count.combined_image_sampler),
            (vk::DescriptorType::SAMPLED_IMAGE, descriptor_count.sampled_image),
            (vk::DescriptorType::STORAGE_IMAGE, descriptor_count.storage_image),
            (vk::DescriptorType::UNIFORM_TEXEL_BUFFER, descriptor_count.uniform_texel_buffer),
            (vk::DescriptorType::STORAGE_TEXEL_BUFFER, descriptor_count.storage_texel_buffer),
            (vk::DescriptorType::UNIFORM_BUFFER, descriptor_count.uniform_buffer),
            (vk::DescriptorType::STORAGE_BUFFER, descriptor_count.storage_buffer),
            (vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC, descriptor_count.uniform_buffer_dynamic),
            (vk::DescriptorType::STORAGE_BUFFER_DYNAMIC, descriptor_count.storage_buffer_dynamic),
            (vk::DescriptorType::INPUT_ATTACHMENT, descriptor_count.input_attachment),
        ];
        let pool_sizes: smallvec::SmallVec<[vk::DescriptorPoolSize; 11]> = counts
            .iter()
            .filter(|(_, count)| *count != 0)
            .map(|&(ty, descriptor_count)| vk::DescriptorPoolSize { ty, descriptor_count })
            .collect();

        let mut ash_flags = vk::DescriptorPoolCreateFlags::empty();
        if flags.contains(DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET) {
            ash_flags |= vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET;
        }
        if flags.contains(DescriptorPoolCreateFlags::UPDATE_AFTER_BIND) {
            ash_flags |= vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND;
        }

        let result = unsafe {
            self.0.create_descriptor_pool(
                &vk::DescriptorPoolCreateInfo::default()
                    .max_sets(max_sets)
                    .pool_sizes(&pool_sizes)
                    .flags(ash_flags),
                None,
            )
        };

        match result {
            Ok(pool) => Ok(pool),
            Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY) => Err(CreatePoolError::OutOfDeviceMemory),
            Err(vk::Result::ERROR_FRAGMENTATION) => Err(CreatePoolError::Fragmentation),
            Err(err) => {
                if err != vk::Result::ERROR_OUT_OF_HOST_MEMORY {
                    log::error!("Unexpected descriptor pool creation result: {}", err);
                }
                Err(CreatePoolError::OutOfHostMemory)
            }
        }
    }

    unsafe fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.0.destroy_descriptor_pool(pool, None) }
    }

    unsafe fn alloc_descriptor_sets<'a>(
        &self,
        pool: &mut vk::DescriptorPool,
        layouts: impl ExactSizeIterator<Item = &'a vk::DescriptorSetLayout>,
        sets: &mut impl Extend<vk::DescriptorSet>,
    ) -> std::result::Result<(), DeviceAllocationError> {
        let set_layouts: smallvec::SmallVec<[_; 16]> = layouts.copied().collect();

        let result = unsafe {
            self.0.allocate_descriptor_sets(
                &vk::DescriptorSetAllocateInfo::default()
                    .set_layouts(&set_layouts)
                    .descriptor_pool(*pool),
            )
        };
        match result {
            Ok(allocated) => {
                sets.extend(allocated);
                Ok(())
            }
            Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY) => Err(DeviceAllocationError::OutOfDeviceMemory),
            Err(vk::Result::ERROR_FRAGMENTED_POOL) => Err(DeviceAllocationError::FragmentedPool),
            Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY) => Err(DeviceAllocationError::OutOfPoolMemory),
            Err(err) => {
                if err != vk::Result::ERROR_OUT_OF_HOST_MEMORY {
                    log::error!("Unexpected descriptor set allocation result: {}", err);
                }
                Err(DeviceAllocationError::OutOfHostMemory)
            }
        }
    }

    unsafe fn dealloc_descriptor_sets<'a>(
        &self,
        pool: &mut vk::DescriptorPool,
        sets: impl Iterator<Item = vk::DescriptorSet>,
    ) {
        let sets: smallvec::SmallVec<[_; 16]> = sets.collect();
        if let Err(err) = unsafe { self.0.free_descriptor_sets(*pool, &sets) } {
            log::error!("Failed to free descriptor sets: {}", err);
        }
    }
}
