use ash::vk;

use crate::renderer::error::Result;
use crate::renderer::vk::device::Queue;

/// One-shot command submission for uploads that must finish before the
/// resource is handed out.
pub struct Transfer {
    fence: vk::Fence,
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    queue: Queue,
}

impl Transfer {
    pub fn new(queue: Queue, device: &ash::Device) -> Result<Self> {
        let fence = unsafe { device.create_fence(&vk::FenceCreateInfo::default(), None)? };

        let command_pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue.family_index)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);
        let command_pool = unsafe { device.create_command_pool(&command_pool_info, None)? };

        let command_buffer_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(command_pool)
            .command_buffer_count(1)
            .level(vk::CommandBufferLevel::PRIMARY);
        let command_buffer = unsafe { device.allocate_command_buffers(&command_buffer_info)?[0] };

        Ok(Self {
            fence,
            command_pool,
            command_buffer,
            queue,
        })
    }

    /// Records `func`, submits it and blocks until the GPU is done with it
    pub fn immediate_submit<F>(&self, device: &ash::Device, func: F) -> Result<()>
    where
        F: FnOnce(vk::CommandBuffer, &ash::Device) -> Result<()>,
    {
        let cmd = self.command_buffer;
        let begin_info =
            vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { device.begin_command_buffer(cmd, &begin_info)? };

        let recorded = func(cmd, device);
        unsafe { device.end_command_buffer(cmd)? };
        if let Err(e) = recorded {
            unsafe {
                device.reset_command_pool(self.command_pool, vk::CommandPoolResetFlags::empty())?
            };
            return Err(e);
        }

        let command_buffers = [vk::CommandBufferSubmitInfo::default().command_buffer(cmd)];
        let submit = vk::SubmitInfo2::default().command_buffer_infos(&command_buffers);
        unsafe {
            device.queue_submit2(self.queue.handle, &[submit], self.fence)?;
            device.wait_for_fences(&[self.fence], true, u64::MAX)?;
            device.reset_fences(&[self.fence])?;
            device.reset_command_pool(self.command_pool, vk::CommandPoolResetFlags::empty())?;
        }
        Ok(())
    }

    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            device.destroy_command_pool(self.command_pool, None);
            device.destroy_fence(self.fence, None);
        }
    }
}
