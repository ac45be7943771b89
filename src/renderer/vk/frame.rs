use ash::vk;

use crate::renderer::error::Result;
use crate::renderer::vk::device::Queue;
use crate::renderer::vk::memory::{GpuBuffer, GpuImage};

/// A native object that recorded commands may still reference. Destroyed once
/// the frame's fence has signalled.
pub enum Garbage {
    Image(GpuImage),
    Buffer(GpuBuffer),
    View(vk::ImageView),
    Sampler(vk::Sampler),
    ShaderModule(vk::ShaderModule),
    Pipeline(vk::Pipeline),
}

/// Command recording and synchronization for the frame in flight.
///
/// There is only ever one frame in flight: `present` waits for the GPU before
/// recording continues.
pub struct Frame {
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    recording: bool,
    in_flight: bool,

    fence: vk::Fence,
    pub acquire_semaphore: vk::Semaphore,

    pub garbage: Vec<Garbage>,
    pub descriptor_sets: Vec<gpu_descriptor::DescriptorSet<vk::DescriptorSet>>,
}

impl Frame {
    pub fn new(queue: Queue, device: &ash::Device) -> Result<Self> {
        let command_pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue.family_index)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = unsafe { device.create_command_pool(&command_pool_info, None)? };

        let command_buffer_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(command_pool)
            .command_buffer_count(1)
            .level(vk::CommandBufferLevel::PRIMARY);
        let command_buffer = unsafe { device.allocate_command_buffers(&command_buffer_info)?[0] };

        let fence = unsafe { device.create_fence(&vk::FenceCreateInfo::default(), None)? };
        let acquire_semaphore =
            unsafe { device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None)? };

        Ok(Self {
            command_pool,
            command_buffer,
            recording: false,
            in_flight: false,
            fence,
            acquire_semaphore,
            garbage: Vec::new(),
            descriptor_sets: Vec::new(),
        })
    }

    /// The command buffer being recorded, begun on first use
    pub fn cmd(&mut self, device: &ash::Device) -> Result<vk::CommandBuffer> {
        if !self.recording {
            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            unsafe { device.begin_command_buffer(self.command_buffer, &begin_info)? };
            self.recording = true;
        }
        Ok(self.command_buffer)
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Ends recording and submits everything recorded so far
    pub fn submit(
        &mut self,
        device: &ash::Device,
        queue: Queue,
        waits: &[vk::SemaphoreSubmitInfo<'_>],
        signals: &[vk::SemaphoreSubmitInfo<'_>],
    ) -> Result<()> {
        let cmd = self.cmd(device)?;
        unsafe { device.end_command_buffer(cmd)? };
        self.recording = false;

        let command_buffers = [vk::CommandBufferSubmitInfo::default().command_buffer(cmd)];
        let submit = vk::SubmitInfo2::default()
            .wait_semaphore_infos(waits)
            .command_buffer_infos(&command_buffers)
            .signal_semaphore_infos(signals);
        unsafe { device.queue_submit2(queue.handle, &[submit], self.fence)? };
        self.in_flight = true;
        Ok(())
    }

    /// Blocks until the last submission is done, then destroys the garbage
    /// it could have referenced. Descriptor sets are left for the caller.
    pub fn wait(&mut self, device: &ash::Device) -> Result<()> {
        if self.in_flight {
            unsafe {
                device.wait_for_fences(&[self.fence], true, u64::MAX)?;
                device.reset_fences(&[self.fence])?;
                device.reset_command_buffer(self.command_buffer, vk::CommandBufferResetFlags::empty())?;
            }
            self.in_flight = false;
        }
        self.destroy_garbage(device);
        Ok(())
    }

    pub fn destroy_garbage(&mut self, device: &ash::Device) {
        for garbage in self.garbage.drain(..) {
            unsafe {
                match garbage {
                    Garbage::Image(_) | Garbage::Buffer(_) => {}
                    Garbage::View(view) => device.destroy_image_view(view, None),
                    Garbage::Sampler(sampler) => device.destroy_sampler(sampler, None),
                    Garbage::ShaderModule(module) => device.destroy_shader_module(module, None),
                    Garbage::Pipeline(pipeline) => device.destroy_pipeline(pipeline, None),
                }
            }
        }
    }

    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        self.destroy_garbage(device);
        unsafe {
            device.destroy_semaphore(self.acquire_semaphore, None);
            device.destroy_fence(self.fence, None);
            device.destroy_command_pool(self.command_pool, None);
        }
    }
}
