// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen.
// Built once for a fixed-size target; there is no recreation path.

use ash::vk;
use std::sync::Arc;

use super::device::VulkanDevice;
use super::frame::{AcquiredImage, PresentStatus};
use super::memory::{create_image_view, ImageView};
use super::queues::QueueAssignment;
use super::surface::VulkanSurface;
use crate::error::{EngineError, EngineResult, VkResultExt};

pub const PREFERRED_IMAGE_COUNT: u32 = 3;

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: ash::extensions::khr::Swapchain,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<ImageView>,
    pub format: vk::Format,
    pub color_space: vk::ColorSpaceKHR,
    pub present_mode: vk::PresentModeKHR,
    pub sharing_mode: vk::SharingMode,
    pub extent: vk::Extent2D,
    device: Arc<VulkanDevice>,
    _surface: Arc<VulkanSurface>,
}

impl Swapchain {
    /// Build the image chain for `surface`.
    ///
    /// `drawable` is the framebuffer size in pixels, only used when the
    /// surface leaves the extent up to the application.
    pub fn new(
        device: Arc<VulkanDevice>,
        surface: Arc<VulkanSurface>,
        drawable: (u32, u32),
    ) -> EngineResult<Self> {
        let support = surface.support(device.physical_device)?;
        let caps = &support.capabilities;

        let surface_format = choose_surface_format(&support.formats)
            .ok_or_else(|| EngineError::Swapchain("surface reports no formats".into()))?;
        let present_mode = choose_present_mode(&support.present_modes);
        let extent = choose_extent(caps, drawable);
        let image_count = choose_image_count(caps);
        let (sharing_mode, family_indices) = choose_sharing(&device.queues);

        log::info!(
            "Creating swapchain: {}x{} {:?} {:?}, {} images, {:?}",
            extent.width,
            extent.height,
            surface_format.format,
            present_mode,
            image_count,
            sharing_mode
        );

        let swapchain_loader =
            ash::extensions::khr::Swapchain::new(&device.instance.instance, &device.device);

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(&family_indices)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }
            .op("vkCreateSwapchainKHR")?;

        // From here on the swapchain must be destroyed on failure
        let images = match unsafe { swapchain_loader.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(result) => {
                unsafe { swapchain_loader.destroy_swapchain(swapchain, None) };
                return Err(EngineError::Vulkan {
                    operation: "vkGetSwapchainImagesKHR",
                    result,
                });
            }
        };

        let image_views = match views_for_images(&images, |image| {
            create_image_view(
                &device,
                image,
                surface_format.format,
                vk::ImageAspectFlags::COLOR,
            )
        }) {
            Ok(views) => views,
            Err(err) => {
                unsafe { swapchain_loader.destroy_swapchain(swapchain, None) };
                return Err(err);
            }
        };

        log::info!("Created swapchain with {} images", images.len());

        Ok(Self {
            swapchain,
            swapchain_loader,
            images,
            image_views,
            format: surface_format.format,
            color_space: surface_format.color_space,
            present_mode,
            sharing_mode,
            extent,
            device,
            _surface: surface,
        })
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Acquire the next image, signalling `semaphore` when it is ready.
    ///
    /// Suboptimal is success; out-of-date and everything else is fatal.
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> EngineResult<AcquiredImage> {
        let (index, suboptimal) = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        }
        .op("vkAcquireNextImageKHR")?;

        Ok(AcquiredImage { index, suboptimal })
    }

    /// Present `image_index` once `wait_semaphores` have signalled.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> EngineResult<PresentStatus> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let suboptimal = unsafe { self.swapchain_loader.queue_present(queue, &present_info) }
            .op("vkQueuePresentKHR")?;

        Ok(if suboptimal {
            PresentStatus::Suboptimal
        } else {
            PresentStatus::Presented
        })
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        if let Err(err) = self.device.wait_idle() {
            log::error!("{err}");
        }
        // Views before the swapchain that owns their images
        self.image_views.clear();
        unsafe {
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
        log::debug!("Destroyed swapchain");
    }
}

/// Prefer 8-bit BGRA sRGB with non-linear colour space, else the first format.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first().copied())
}

/// One view per image, in image order. Fails on an empty chain or on the
/// first view that cannot be created.
fn views_for_images<V>(
    images: &[vk::Image],
    make_view: impl FnMut(vk::Image) -> EngineResult<V>,
) -> EngineResult<Vec<V>> {
    if images.is_empty() {
        return Err(EngineError::Swapchain("swapchain returned no images".into()));
    }
    images
        .iter()
        .copied()
        .map(make_view)
        .collect::<EngineResult<Vec<_>>>()
        .map_err(|err| EngineError::Swapchain(format!("image view creation failed: {err}")))
}

/// MAILBOX if available, FIFO otherwise (always supported).
pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, drawable: (u32, u32)) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    vk::Extent2D {
        width: drawable
            .0
            .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: drawable
            .1
            .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// `max(3, min_image_count)`, capped by `max_image_count` when that is nonzero.
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = PREFERRED_IMAGE_COUNT.max(caps.min_image_count);
    if caps.max_image_count > 0 {
        count.min(caps.max_image_count)
    } else {
        count
    }
}

/// Concurrent over graphics and present when they are different families.
pub fn choose_sharing(queues: &QueueAssignment) -> (vk::SharingMode, Vec<u32>) {
    if queues.graphics != queues.present {
        (
            vk::SharingMode::CONCURRENT,
            vec![queues.graphics, queues.present],
        )
    } else {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        }
    }

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    #[test]
    fn prefers_bgra_srgb_nonlinear() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(
            choose_surface_format(&formats).unwrap().format,
            vk::Format::B8G8R8A8_SRGB
        );
    }

    #[test]
    fn falls_back_to_first_format() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT),
        ];
        assert_eq!(
            choose_surface_format(&formats).unwrap().format,
            vk::Format::R8G8B8A8_UNORM
        );
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn one_view_per_image() {
        let images: Vec<vk::Image> = (1..=3).map(vk::Image::from_raw).collect();
        let views = views_for_images(&images, |image| Ok(image.as_raw() * 10)).unwrap();
        assert_eq!(views, vec![10, 20, 30]);
        assert_eq!(views.len(), images.len());
    }

    #[test]
    fn empty_chain_or_failed_view_is_a_swapchain_error() {
        assert!(matches!(
            views_for_images(&[], |_| Ok(0u64)),
            Err(EngineError::Swapchain(_))
        ));

        let images: Vec<vk::Image> = (1..=3).map(vk::Image::from_raw).collect();
        let result = views_for_images(&images, |image| {
            if image.as_raw() == 2 {
                Err(EngineError::Vulkan {
                    operation: "vkCreateImageView",
                    result: vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
                })
            } else {
                Ok(image.as_raw())
            }
        });
        assert!(matches!(result, Err(EngineError::Swapchain(_))));
    }

    #[test]
    fn mailbox_then_fifo() {
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX]),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO]),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn extent_uses_current_extent_when_defined() {
        assert_eq!(
            choose_extent(&caps(2, 8), (1920, 1080)),
            vk::Extent2D {
                width: 800,
                height: 600
            }
        );
    }

    #[test]
    fn undefined_extent_clamps_drawable_size() {
        let mut caps = caps(2, 8);
        caps.current_extent = vk::Extent2D {
            width: u32::MAX,
            height: u32::MAX,
        };
        caps.max_image_extent = vk::Extent2D {
            width: 1024,
            height: 768,
        };
        assert_eq!(
            choose_extent(&caps, (1920, 0)),
            vk::Extent2D {
                width: 1024,
                height: 1
            }
        );
    }

    #[test]
    fn image_count_rule() {
        assert_eq!(choose_image_count(&caps(2, 8)), 3);
        assert_eq!(choose_image_count(&caps(4, 8)), 4);
        assert_eq!(choose_image_count(&caps(2, 2)), 2);
        assert_eq!(choose_image_count(&caps(1, 0)), 3);
        assert_eq!(choose_image_count(&caps(5, 0)), 5);
    }

    #[test]
    fn sharing_follows_queue_families() {
        let same = QueueAssignment {
            graphics: 0,
            present: 0,
            transfer: 1,
        };
        assert_eq!(choose_sharing(&same), (vk::SharingMode::EXCLUSIVE, vec![]));

        let split = QueueAssignment {
            graphics: 0,
            present: 2,
            transfer: 0,
        };
        assert_eq!(
            choose_sharing(&split),
            (vk::SharingMode::CONCURRENT, vec![0, 2])
        );
    }
}
