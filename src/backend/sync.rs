// Synchronization primitives
//
// Fences gate CPU reuse of per-frame resources (one per frame in flight).
// Semaphores order GPU work (one acquire + one render-finished per swapchain image).

use ash::vk;
use std::sync::Arc;

use super::command::CommandInfrastructure;
use super::device::VulkanDevice;
use super::frame::{validate_frame_counts, AcquiredImage, FrameTimeline, PresentStatus};
use super::swapchain::Swapchain;
use crate::error::{EngineResult, VkResultExt};

pub struct FrameSyncSet {
    pub in_flight_fences: Vec<vk::Fence>,
    pub image_available: Vec<vk::Semaphore>,
    pub render_finished: Vec<vk::Semaphore>,
    device: Arc<VulkanDevice>,
}

impl FrameSyncSet {
    pub fn new(
        device: Arc<VulkanDevice>,
        frames_in_flight: usize,
        image_count: usize,
    ) -> EngineResult<Self> {
        validate_frame_counts(frames_in_flight, image_count)?;

        let mut set = Self {
            in_flight_fences: Vec::with_capacity(frames_in_flight),
            image_available: Vec::with_capacity(image_count),
            render_finished: Vec::with_capacity(image_count),
            device,
        };

        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        // Start signaled so the first wait on each frame returns immediately
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);
        let device = &set.device.device;

        // Pushed one by one so Drop cleans up whatever was created before a failure
        for _ in 0..frames_in_flight {
            let fence =
                unsafe { device.create_fence(&fence_info, None) }.op("vkCreateFence")?;
            set.in_flight_fences.push(fence);
        }
        for _ in 0..image_count {
            let available = unsafe { device.create_semaphore(&semaphore_info, None) }
                .op("vkCreateSemaphore")?;
            set.image_available.push(available);
            let finished = unsafe { device.create_semaphore(&semaphore_info, None) }
                .op("vkCreateSemaphore")?;
            set.render_finished.push(finished);
        }

        log::debug!(
            "Created {} fences and {} semaphore pairs",
            frames_in_flight,
            image_count
        );

        Ok(set)
    }
}

impl Drop for FrameSyncSet {
    fn drop(&mut self) {
        if let Err(err) = self.device.wait_idle() {
            log::error!("{err}");
        }
        let device = &self.device.device;
        unsafe {
            for &fence in &self.in_flight_fences {
                device.destroy_fence(fence, None);
            }
            for &semaphore in self.image_available.iter().chain(&self.render_finished) {
                device.destroy_semaphore(semaphore, None);
            }
        }
    }
}

/// `FrameTimeline` backed by real fences, semaphores and queues.
pub struct VulkanFrameTimeline<'a> {
    pub device: &'a VulkanDevice,
    pub sync: &'a FrameSyncSet,
    pub swapchain: &'a Swapchain,
    pub commands: &'a CommandInfrastructure,
}

impl FrameTimeline for VulkanFrameTimeline<'_> {
    fn wait_for_frame(&mut self, frame: usize) -> EngineResult<()> {
        let fences = [self.sync.in_flight_fences[frame]];
        unsafe { self.device.device.wait_for_fences(&fences, true, u64::MAX) }
            .op("vkWaitForFences")
    }

    fn acquire_image(&mut self, present_slot: usize) -> EngineResult<AcquiredImage> {
        self.swapchain
            .acquire_next_image(self.sync.image_available[present_slot])
    }

    fn reset_frame(&mut self, frame: usize) -> EngineResult<()> {
        let device = &self.device.device;
        let fences = [self.sync.in_flight_fences[frame]];
        unsafe {
            device.reset_fences(&fences).op("vkResetFences")?;
            device
                .reset_command_buffer(
                    self.commands.frame_buffer(frame),
                    vk::CommandBufferResetFlags::empty(),
                )
                .op("vkResetCommandBuffer")
        }
    }

    fn submit(&mut self, frame: usize, present_slot: usize, image_index: u32) -> EngineResult<()> {
        let wait_semaphores = [self.sync.image_available[present_slot]];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [self.sync.render_finished[image_index as usize]];
        let command_buffers = [self.commands.frame_buffer(frame)];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        unsafe {
            self.device.device.queue_submit(
                self.device.graphics_queue,
                std::slice::from_ref(&submit_info),
                self.sync.in_flight_fences[frame],
            )
        }
        .op("vkQueueSubmit")
    }

    fn present(&mut self, image_index: u32) -> EngineResult<PresentStatus> {
        let wait_semaphores = [self.sync.render_finished[image_index as usize]];
        self.swapchain
            .present(self.device.present_queue, image_index, &wait_semaphores)
    }
}
