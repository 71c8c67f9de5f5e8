// Command pools and buffers
//
// Per-frame graphics buffers come from one resettable pool; setup-time
// transfers use a transient pool and block until their queue is idle.

use ash::vk;
use std::sync::Arc;

use super::device::VulkanDevice;
use super::frame::validate_frame_counts;
use crate::error::{EngineResult, VkResultExt};

pub struct CommandInfrastructure {
    pub graphics_pool: vk::CommandPool,
    pub command_buffers: Vec<vk::CommandBuffer>,
    pub transfer_pool: vk::CommandPool,
    device: Arc<VulkanDevice>,
}

impl CommandInfrastructure {
    /// Create both pools and one primary graphics buffer per frame in flight.
    pub fn new(device: Arc<VulkanDevice>, frames_in_flight: usize) -> EngineResult<Self> {
        validate_frame_counts(frames_in_flight, frames_in_flight)?;

        let graphics_pool = create_pool(
            &device.device,
            device.queues.graphics,
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        )?;
        let transfer_pool = create_pool(
            &device.device,
            device.queues.transfer,
            vk::CommandPoolCreateFlags::TRANSIENT,
        )?;

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(graphics_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(frames_in_flight as u32);
        let command_buffers = unsafe { device.device.allocate_command_buffers(&alloc_info) }
            .op("vkAllocateCommandBuffers")?;

        log::debug!(
            "Created command pools ({} frame command buffers)",
            command_buffers.len()
        );

        Ok(Self {
            graphics_pool,
            command_buffers,
            transfer_pool,
            device,
        })
    }

    pub fn frame_buffer(&self, frame: usize) -> vk::CommandBuffer {
        self.command_buffers[frame]
    }

    /// Copy `size` bytes from `src` (starting at `src_offset`) to the start
    /// of `dst` on the transfer queue. Returns once the copy has completed.
    pub fn copy_buffer(
        &self,
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
        src_offset: vk::DeviceSize,
    ) -> EngineResult<()> {
        let device = &self.device.device;
        let cmd = begin_single_time_commands(device, self.transfer_pool)?;

        let region = vk::BufferCopy {
            src_offset,
            dst_offset: 0,
            size,
        };
        unsafe { device.cmd_copy_buffer(cmd, src, dst, std::slice::from_ref(&region)) };

        end_single_time_commands(device, self.transfer_pool, self.device.transfer_queue, cmd)
    }
}

impl Drop for CommandInfrastructure {
    fn drop(&mut self) {
        if let Err(err) = self.device.wait_idle() {
            log::error!("{err}");
        }
        unsafe {
            // Freeing the pools frees their buffers
            self.device.device.destroy_command_pool(self.graphics_pool, None);
            self.device.device.destroy_command_pool(self.transfer_pool, None);
        }
        log::debug!("Destroyed command pools");
    }
}

fn create_pool(
    device: &ash::Device,
    family: u32,
    flags: vk::CommandPoolCreateFlags,
) -> EngineResult<vk::CommandPool> {
    let create_info = vk::CommandPoolCreateInfo::builder()
        .queue_family_index(family)
        .flags(flags);
    unsafe { device.create_command_pool(&create_info, None) }.op("vkCreateCommandPool")
}

/// Allocate one primary buffer from `pool` and begin it for one-time submit.
pub fn begin_single_time_commands(
    device: &ash::Device,
    pool: vk::CommandPool,
) -> EngineResult<vk::CommandBuffer> {
    let alloc_info = vk::CommandBufferAllocateInfo::builder()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(1);
    let cmd = unsafe { device.allocate_command_buffers(&alloc_info) }
        .op("vkAllocateCommandBuffers")?[0];

    let begin_info = vk::CommandBufferBeginInfo::builder()
        .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
    unsafe { device.begin_command_buffer(cmd, &begin_info) }.op("vkBeginCommandBuffer")?;

    Ok(cmd)
}

/// End, submit and wait for `queue` to go idle, then free `cmd`.
pub fn end_single_time_commands(
    device: &ash::Device,
    pool: vk::CommandPool,
    queue: vk::Queue,
    cmd: vk::CommandBuffer,
) -> EngineResult<()> {
    let command_buffers = [cmd];
    let result = unsafe {
        device
            .end_command_buffer(cmd)
            .op("vkEndCommandBuffer")
            .and_then(|()| {
                let submit = vk::SubmitInfo::builder()
                    .command_buffers(&command_buffers)
                    .build();
                device
                    .queue_submit(queue, std::slice::from_ref(&submit), vk::Fence::null())
                    .op("vkQueueSubmit")
            })
            .and_then(|()| device.queue_wait_idle(queue).op("vkQueueWaitIdle"))
    };

    unsafe { device.free_command_buffers(pool, &command_buffers) };
    result
}
