use std::sync::Arc;

use ash::vk;
use thiserror::Error;

use super::{device::Device, surface::SurfaceConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextImageState {
    Ok(u32),
    Suboptimal(u32),
    OutOfDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentState {
    Ok,
    Suboptimal,
    OutOfDate,
}

/// A presentable image and the view rendering goes through.
#[derive(Debug, Clone, Copy)]
pub struct SwapchainImage {
    pub handle: vk::Image,
    pub view: vk::ImageView,
}

pub struct Swapchain {
    pub handle: vk::SwapchainKHR,
    pub extent: vk::Extent2D,
    pub images: Vec<SwapchainImage>,

    // bookkeeping
    device: Arc<Device>,
}

#[derive(Debug, Error)]
pub enum SwapchainCreateError {
    #[error("vulkan call to create the swapchain failed")]
    VulkanCreation(vk::Result),

    #[error("vulkan call to fetch swapchain images failed")]
    ImageFetching(vk::Result),

    #[error("vulkan call to create swapchain image views failed")]
    ImageViewCreation(vk::Result),
}

#[derive(Debug, Error)]
pub enum NextImageAcquireError {
    #[error("vulkan call to acquire next image index failed")]
    NextIndexAcquisition(vk::Result),

    #[error("acquired index is out of range ({0}, max is {1})")]
    InvalidIndex(u32, usize),
}

#[derive(Debug, Error)]
pub enum PresentError {
    #[error("vulkan call to present swapchain image failed")]
    Present(vk::Result),
}

/// One more image than the minimum, within what the surface allows. A maximum of zero
/// means the surface sets no upper bound.
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        desired.clamp(capabilities.min_image_count, capabilities.max_image_count)
    } else {
        desired
    }
}

/// The surface's current extent, or `fallback` when the surface lets the swapchain
/// decide.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    fallback: vk::Extent2D,
) -> vk::Extent2D {
    match capabilities.current_extent {
        vk::Extent2D {
            width: u32::MAX,
            height: u32::MAX,
        } => fallback,
        current => current,
    }
}

impl Swapchain {
    pub(crate) fn create(
        device: Arc<Device>,
        surface: vk::SurfaceKHR,
        surface_config: &SurfaceConfig,
        capabilities: &vk::SurfaceCapabilitiesKHR,
        extent: vk::Extent2D,
        previous: Option<&Swapchain>,
    ) -> Result<Self, SwapchainCreateError> {
        let image_count = choose_image_count(capabilities);
        let format = surface_config.format;

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(surface_config.present_mode)
            .clipped(true)
            .old_swapchain(previous.map_or(vk::SwapchainKHR::null(), |previous| previous.handle));

        let loader = &device.swapchain_loader;
        let handle = unsafe { loader.create_swapchain(&create_info, None) }
            .map_err(SwapchainCreateError::VulkanCreation)?;

        let images_handles = match unsafe { loader.get_swapchain_images(handle) } {
            Ok(images) => images,
            Err(err) => {
                unsafe { loader.destroy_swapchain(handle, None) };
                return Err(SwapchainCreateError::ImageFetching(err));
            }
        };

        let image_view_create_info = vk::ImageViewCreateInfo::default()
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format.format)
            .components(
                vk::ComponentMapping::default()
                    .r(vk::ComponentSwizzle::IDENTITY)
                    .g(vk::ComponentSwizzle::IDENTITY)
                    .b(vk::ComponentSwizzle::IDENTITY)
                    .a(vk::ComponentSwizzle::IDENTITY),
            )
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1),
            );

        // Built incrementally so a failing view still lets Drop release what exists.
        let mut swapchain = Self {
            handle,
            extent,
            images: Vec::with_capacity(images_handles.len()),
            device: device.clone(),
        };
        for image in images_handles {
            let image_view_create_info = image_view_create_info.image(image);
            let view = unsafe { device.create_image_view(&image_view_create_info, None) }
                .map_err(SwapchainCreateError::ImageViewCreation)?;

            swapchain.images.push(SwapchainImage {
                handle: image,
                view,
            });
        }

        log::debug!(
            "created swapchain with {} image(s) (requested {}) of {}x{}",
            swapchain.images.len(),
            image_count,
            extent.width,
            extent.height
        );

        Ok(swapchain)
    }

    /// Blocks until the presentation engine hands out an image; `image_available` is
    /// signaled once the image can actually be written.
    pub fn acquire_next_image(
        &self,
        image_available: vk::Semaphore,
    ) -> Result<NextImageState, NextImageAcquireError> {
        match unsafe {
            self.device.swapchain_loader.acquire_next_image(
                self.handle,
                u64::MAX,
                image_available,
                vk::Fence::null(),
            )
        } {
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(NextImageState::OutOfDate),
            Ok((index, _)) if index as usize >= self.images.len() => Err(
                NextImageAcquireError::InvalidIndex(index, self.images.len()),
            ),
            Ok((index, false)) => Ok(NextImageState::Ok(index)),
            Ok((index, true)) => Ok(NextImageState::Suboptimal(index)),
            Err(err) => Err(NextImageAcquireError::NextIndexAcquisition(err)),
        }
    }

    pub fn present(
        &self,
        queue: vk::Queue,
        render_finished: vk::Semaphore,
        image_index: u32,
    ) -> Result<PresentState, PresentError> {
        let wait_semaphores = [render_finished];
        let swapchains = [self.handle];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe {
            self.device
                .swapchain_loader
                .queue_present(queue, &present_info)
        } {
            Ok(false) => Ok(PresentState::Ok),
            Ok(true) => Ok(PresentState::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentState::OutOfDate),
            Err(err) => Err(PresentError::Present(err)),
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        log::debug!("destroying swapchain");
        for image in &self.images {
            unsafe { self.device.destroy_image_view(image.view, None) };
        }
        unsafe {
            self.device
                .swapchain_loader
                .destroy_swapchain(self.handle, None)
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities(min_image_count: u32, max_image_count: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count,
            max_image_count,
            current_extent: vk::Extent2D {
                width: 1280,
                height: 720,
            },
            ..Default::default()
        }
    }

    #[test]
    fn image_count_is_one_above_minimum() {
        assert_eq!(choose_image_count(&capabilities(2, 3)), 3);
        assert_eq!(choose_image_count(&capabilities(2, 8)), 3);
    }

    #[test]
    fn image_count_is_clamped_to_maximum() {
        assert_eq!(choose_image_count(&capabilities(3, 3)), 3);
        assert_eq!(choose_image_count(&capabilities(1, 1)), 1);
    }

    #[test]
    fn unbounded_maximum_means_minimum_plus_one() {
        assert_eq!(choose_image_count(&capabilities(2, 0)), 3);
        assert_eq!(choose_image_count(&capabilities(4, 0)), 5);
    }

    #[test]
    fn image_count_stays_within_bounds() {
        for min in 1..6 {
            for max in min..10 {
                let count = choose_image_count(&capabilities(min, max));
                assert!(min <= count && count <= max, "min {min} max {max} got {count}");
            }
        }
    }

    #[test]
    fn extent_comes_from_surface() {
        let fallback = vk::Extent2D {
            width: 640,
            height: 480,
        };
        let extent = choose_extent(&capabilities(2, 3), fallback);

        assert_eq!((extent.width, extent.height), (1280, 720));
    }

    #[test]
    fn undefined_extent_uses_fallback() {
        let mut capabilities = capabilities(2, 3);
        capabilities.current_extent = vk::Extent2D {
            width: u32::MAX,
            height: u32::MAX,
        };
        let fallback = vk::Extent2D {
            width: 640,
            height: 480,
        };
        let extent = choose_extent(&capabilities, fallback);

        assert_eq!((extent.width, extent.height), (640, 480));
    }
}
