// GPU memory - gpu-allocator adapter
//
// Every buffer, image and view handed out here is an `Owned<_>`: dropping it
// destroys the API object and returns its memory to the allocator, once.

use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::{AllocationError, MemoryLocation};
use parking_lot::Mutex;
use std::sync::Arc;

use super::device::VulkanDevice;
use super::owned::{Owned, Release};
use crate::error::{EngineError, EngineResult, VkResultExt};

pub type AllocatedBuffer = Owned<BufferResource>;
pub type AllocatedImage = Owned<ImageResource>;
pub type ImageView = Owned<ViewResource>;

/// Thread-safe wrapper around the gpu-allocator `Allocator`.
///
/// The allocator lives in an `Option` so it can be torn down while the
/// device is still alive.
pub struct MemoryAllocator {
    allocator: Mutex<Option<Allocator>>,
    pub device: Arc<VulkanDevice>,
}

impl MemoryAllocator {
    pub fn new(device: Arc<VulkanDevice>) -> EngineResult<Arc<Self>> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: device.instance.instance.clone(),
            device: device.device.clone(),
            physical_device: device.physical_device,
            debug_settings: Default::default(),
            buffer_device_address: true,
            allocation_sizes: Default::default(),
        })
        .map_err(|err| allocation_error("create_allocator", "allocator", err))?;

        log::debug!("Created GPU memory allocator");

        Ok(Arc::new(Self {
            allocator: Mutex::new(Some(allocator)),
            device,
        }))
    }

    /// Create a buffer and bind memory to it.
    ///
    /// Host-visible requests get persistently mapped, write-combined memory;
    /// everything else is device-local and unmapped.
    pub fn create_buffer(
        self: &Arc<Self>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        memory_properties: vk::MemoryPropertyFlags,
        name: &str,
    ) -> EngineResult<AllocatedBuffer> {
        let device = &self.device.device;

        // Shared with the transfer queue so uploads need no ownership transfer
        let families = [self.device.queues.graphics, self.device.queues.transfer];
        let mut buffer_info = vk::BufferCreateInfo::builder().size(size).usage(usage);
        buffer_info = if self.device.queues.has_dedicated_transfer() {
            buffer_info
                .sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&families)
        } else {
            buffer_info.sharing_mode(vk::SharingMode::EXCLUSIVE)
        };

        let buffer = unsafe { device.create_buffer(&buffer_info, None) }
            .map_err(|result| vk_allocation_error("vkCreateBuffer", name, result))?;
        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

        let location = location_for(memory_properties);
        let allocation = match self.allocate(name, requirements, location, true) {
            Ok(allocation) => allocation,
            Err(err) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(allocation_error("create_buffer", name, err));
            }
        };

        if let Err(result) =
            unsafe { device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset()) }
        {
            unsafe { device.destroy_buffer(buffer, None) };
            self.free(allocation, name);
            return Err(vk_allocation_error("vkBindBufferMemory", name, result));
        }

        log::debug!("Created buffer '{}' ({} bytes, {:?})", name, size, location);

        Ok(Owned::new(BufferResource {
            buffer,
            size,
            allocation,
            name: name.to_string(),
            allocator: self.clone(),
        }))
    }

    /// Create a device-local 2D image with a matching view.
    pub fn create_image(
        self: &Arc<Self>,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        aspect: vk::ImageAspectFlags,
        name: &str,
    ) -> EngineResult<AllocatedImage> {
        let device = &self.device.device;

        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(usage)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let image = unsafe { device.create_image(&image_info, None) }
            .map_err(|result| vk_allocation_error("vkCreateImage", name, result))?;
        let requirements = unsafe { device.get_image_memory_requirements(image) };

        let allocation = match self.allocate(name, requirements, MemoryLocation::GpuOnly, false) {
            Ok(allocation) => allocation,
            Err(err) => {
                unsafe { device.destroy_image(image, None) };
                return Err(allocation_error("create_image", name, err));
            }
        };

        if let Err(result) =
            unsafe { device.bind_image_memory(image, allocation.memory(), allocation.offset()) }
        {
            unsafe { device.destroy_image(image, None) };
            self.free(allocation, name);
            return Err(vk_allocation_error("vkBindImageMemory", name, result));
        }

        let view = match create_image_view(&self.device, image, format, aspect) {
            Ok(view) => view,
            Err(err) => {
                unsafe { device.destroy_image(image, None) };
                self.free(allocation, name);
                return Err(err);
            }
        };

        log::debug!(
            "Created image '{}' ({}x{}, {:?})",
            name,
            extent.width,
            extent.height,
            format
        );

        Ok(Owned::new(ImageResource {
            image,
            view,
            format,
            extent,
            allocation,
            name: name.to_string(),
            allocator: self.clone(),
        }))
    }

    fn allocate(
        &self,
        name: &str,
        requirements: vk::MemoryRequirements,
        location: MemoryLocation,
        linear: bool,
    ) -> Result<Allocation, AllocationError> {
        let mut guard = self.allocator.lock();
        let allocator = guard
            .as_mut()
            .ok_or_else(|| AllocationError::Internal("allocator already destroyed".into()))?;
        allocator.allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })
    }

    fn free(&self, allocation: Allocation, name: &str) {
        if let Some(allocator) = self.allocator.lock().as_mut() {
            if let Err(err) = allocator.free(allocation) {
                log::error!("Failed to free allocation '{}': {}", name, err);
            }
        }
    }
}

impl Drop for MemoryAllocator {
    fn drop(&mut self) {
        if let Some(allocator) = self.allocator.lock().take() {
            allocator.report_memory_leaks(log::Level::Warn);
            drop(allocator);
        }
        log::debug!("Destroyed GPU memory allocator");
    }
}

/// Where gpu-allocator should place memory with the given property request.
pub fn location_for(memory_properties: vk::MemoryPropertyFlags) -> MemoryLocation {
    if memory_properties.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
        MemoryLocation::CpuToGpu
    } else {
        MemoryLocation::GpuOnly
    }
}

/// `VkResult` equivalent of an allocator failure.
pub fn allocation_result_code(err: &AllocationError) -> vk::Result {
    match err {
        AllocationError::OutOfMemory => vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
        AllocationError::FailedToMap(_) => vk::Result::ERROR_MEMORY_MAP_FAILED,
        AllocationError::NoCompatibleMemoryTypeFound => vk::Result::ERROR_FEATURE_NOT_PRESENT,
        _ => vk::Result::ERROR_UNKNOWN,
    }
}

fn allocation_error(operation: &'static str, name: &str, err: AllocationError) -> EngineError {
    EngineError::Allocation {
        operation,
        name: name.to_string(),
        code: allocation_result_code(&err).as_raw(),
        reason: err.to_string(),
    }
}

fn vk_allocation_error(operation: &'static str, name: &str, result: vk::Result) -> EngineError {
    EngineError::Allocation {
        operation,
        name: name.to_string(),
        code: result.as_raw(),
        reason: result.to_string(),
    }
}

/// A buffer plus its memory.
pub struct BufferResource {
    buffer: vk::Buffer,
    size: vk::DeviceSize,
    allocation: Allocation,
    name: String,
    allocator: Arc<MemoryAllocator>,
}

impl Release for BufferResource {
    fn release(self) {
        unsafe { self.allocator.device.device.destroy_buffer(self.buffer, None) };
        self.allocator.free(self.allocation, &self.name);
    }
}

impl Owned<BufferResource> {
    /// Raw handle, null when empty.
    pub fn handle(&self) -> vk::Buffer {
        self.get().map_or(vk::Buffer::null(), |res| res.buffer)
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.get().map_or(0, |res| res.size)
    }

    /// Host view of a mapped buffer. `None` when empty or device-local.
    pub fn mapped(&self) -> Option<&[u8]> {
        self.get()?.allocation.mapped_slice()
    }

    /// Copy `bytes` into the mapping at `offset`.
    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) -> EngineResult<()> {
        let res = self.get_mut().ok_or_else(|| EngineError::Allocation {
            operation: "write_bytes",
            name: "<empty>".into(),
            code: vk::Result::ERROR_UNKNOWN.as_raw(),
            reason: "buffer handle owns nothing".into(),
        })?;
        let name = res.name.clone();
        let mapped = res.allocation.mapped_slice_mut().ok_or_else(|| {
            EngineError::Allocation {
                operation: "write_bytes",
                name: name.clone(),
                code: vk::Result::ERROR_MEMORY_MAP_FAILED.as_raw(),
                reason: "buffer is not host visible".into(),
            }
        })?;
        let range = write_range(offset, bytes.len(), mapped.len()).ok_or_else(|| {
            EngineError::Allocation {
                operation: "write_bytes",
                name,
                code: vk::Result::ERROR_OUT_OF_HOST_MEMORY.as_raw(),
                reason: format!("write of {} bytes at {} overflows mapping", bytes.len(), offset),
            }
        })?;
        mapped[range].copy_from_slice(bytes);
        Ok(())
    }

    pub fn write<T: bytemuck::Pod>(&mut self, data: &[T]) -> EngineResult<()> {
        self.write_bytes(0, bytemuck::cast_slice(data))
    }
}

/// An image, its memory and its default view.
pub struct ImageResource {
    image: vk::Image,
    view: ImageView,
    format: vk::Format,
    extent: vk::Extent2D,
    allocation: Allocation,
    name: String,
    allocator: Arc<MemoryAllocator>,
}

impl Release for ImageResource {
    fn release(mut self) {
        // View first, then the image, then its memory
        self.view.reset();
        unsafe { self.allocator.device.device.destroy_image(self.image, None) };
        self.allocator.free(self.allocation, &self.name);
    }
}

impl Owned<ImageResource> {
    pub fn handle(&self) -> vk::Image {
        self.get().map_or(vk::Image::null(), |res| res.image)
    }

    pub fn view(&self) -> vk::ImageView {
        self.get().map_or(vk::ImageView::null(), |res| res.view.handle())
    }

    pub fn format(&self) -> vk::Format {
        self.get().map_or(vk::Format::UNDEFINED, |res| res.format)
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.get().map_or(vk::Extent2D::default(), |res| res.extent)
    }
}

/// An image view. Does not own the image it looks at.
pub struct ViewResource {
    view: vk::ImageView,
    device: Arc<VulkanDevice>,
}

impl Release for ViewResource {
    fn release(self) {
        unsafe { self.device.device.destroy_image_view(self.view, None) };
    }
}

impl Owned<ViewResource> {
    pub fn handle(&self) -> vk::ImageView {
        self.get().map_or(vk::ImageView::null(), |res| res.view)
    }
}

/// 2D view covering the full mip and array range of `image`.
/// Byte range of a `len`-byte write at `offset`, if it fits in `capacity`.
fn write_range(offset: usize, len: usize, capacity: usize) -> Option<std::ops::Range<usize>> {
    let end = offset.checked_add(len)?;
    (end <= capacity).then_some(offset..end)
}

pub fn create_image_view(
    device: &Arc<VulkanDevice>,
    image: vk::Image,
    format: vk::Format,
    aspect: vk::ImageAspectFlags,
) -> EngineResult<ImageView> {
    let view_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        })
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: aspect,
            base_mip_level: 0,
            level_count: vk::REMAINING_MIP_LEVELS,
            base_array_layer: 0,
            layer_count: vk::REMAINING_ARRAY_LAYERS,
        });

    let view =
        unsafe { device.device.create_image_view(&view_info, None) }.op("vkCreateImageView")?;

    Ok(Owned::new(ViewResource {
        view,
        device: device.clone(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_visible_requests_are_mapped() {
        assert_eq!(
            location_for(
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
            ),
            MemoryLocation::CpuToGpu
        );
        assert_eq!(
            location_for(vk::MemoryPropertyFlags::DEVICE_LOCAL),
            MemoryLocation::GpuOnly
        );
    }

    #[test]
    fn write_range_rejects_overflowing_writes() {
        assert_eq!(write_range(4, 8, 12), Some(4..12));
        assert_eq!(write_range(4, 9, 12), None);
        assert_eq!(write_range(usize::MAX, 1, 12), None);
        assert_eq!(write_range(1, usize::MAX, 12), None);
    }

    #[test]
    fn allocator_errors_map_to_vk_codes() {
        assert_eq!(allocation_result_code(&AllocationError::OutOfMemory).as_raw(), -2);
        assert_eq!(
            allocation_result_code(&AllocationError::FailedToMap("nope".into())).as_raw(),
            -5
        );
        assert_eq!(
            allocation_result_code(&AllocationError::Internal("boom".into())),
            vk::Result::ERROR_UNKNOWN
        );
    }

    #[test]
    fn allocation_error_names_the_resource() {
        let err = allocation_error("create_buffer", "staging", AllocationError::OutOfMemory);
        match err {
            EngineError::Allocation {
                operation,
                name,
                code,
                ..
            } => {
                assert_eq!(operation, "create_buffer");
                assert_eq!(name, "staging");
                assert_eq!(code, -2);
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn empty_handles_report_null() {
        let buffer = AllocatedBuffer::default();
        assert_eq!(buffer.handle(), vk::Buffer::null());
        assert_eq!(buffer.size(), 0);
        assert!(buffer.mapped().is_none());

        let image = AllocatedImage::default();
        assert_eq!(image.handle(), vk::Image::null());
        assert_eq!(image.view(), vk::ImageView::null());
    }
}
