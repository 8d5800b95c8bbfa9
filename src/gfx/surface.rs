use ash::{khr, vk};
use thiserror::Error;
use winit::raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use super::instance::Instance;

pub(crate) struct Surface {
    pub handle: vk::SurfaceKHR,
    pub loader: khr::surface::Instance,
}

/// Format and present mode negotiated once against what the surface supports.
#[derive(Debug, Clone, Copy)]
pub struct SurfaceConfig {
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
}

#[derive(Debug, Error)]
pub enum SurfaceCreateError {
    #[error("vulkan call to create the surface failed")]
    VulkanCreation(vk::Result),
}

#[derive(Debug, Error)]
pub enum SurfaceQueryError {
    #[error("vulkan call to fetch capabilities from surface failed")]
    CapabilitiesFetching(vk::Result),

    #[error("vulkan call to enumerate present modes from surface failed")]
    PresentModeEnumeration(vk::Result),

    #[error("vulkan call to enumerate formats from surface failed")]
    FormatEnumeration(vk::Result),

    #[error("surface advertises no format")]
    NoFormat,
}

/// Exact (format, color space) match when available, otherwise whatever the surface
/// lists first.
pub fn choose_surface_format(
    available: &[vk::SurfaceFormatKHR],
    preferred: vk::SurfaceFormatKHR,
) -> Option<vk::SurfaceFormatKHR> {
    available
        .iter()
        .find(|format| {
            format.format == preferred.format && format.color_space == preferred.color_space
        })
        .or_else(|| available.first())
        .copied()
}

/// The preferred mode when advertised, FIFO otherwise since every surface supports it.
pub fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if available.contains(&preferred) {
        preferred
    } else {
        vk::PresentModeKHR::FIFO
    }
}

impl Surface {
    pub fn create(
        entry: &ash::Entry,
        instance: &Instance,
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
    ) -> Result<Self, SurfaceCreateError> {
        // SAFETY: This surface must have a strictly smaller lifetime than the instance and entry
        // used to create it. We ensure this is the case by storing them accordingly and dropping
        // them in the correct order.
        let handle = unsafe {
            ash_window::create_surface(entry, instance, display_handle, window_handle, None)
                .map_err(SurfaceCreateError::VulkanCreation)?
        };
        let loader = khr::surface::Instance::new(entry, instance);
        log::debug!("created surface");

        Ok(Self { handle, loader })
    }

    pub fn capabilities(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<vk::SurfaceCapabilitiesKHR, SurfaceQueryError> {
        unsafe {
            self.loader
                .get_physical_device_surface_capabilities(physical_device, self.handle)
        }
        .map_err(SurfaceQueryError::CapabilitiesFetching)
    }

    pub fn negotiate(
        &self,
        physical_device: vk::PhysicalDevice,
        preferred_format: vk::SurfaceFormatKHR,
        preferred_present_mode: vk::PresentModeKHR,
    ) -> Result<SurfaceConfig, SurfaceQueryError> {
        let available_formats = unsafe {
            self.loader
                .get_physical_device_surface_formats(physical_device, self.handle)
        }
        .map_err(SurfaceQueryError::FormatEnumeration)?;
        let format = choose_surface_format(&available_formats, preferred_format)
            .ok_or(SurfaceQueryError::NoFormat)?;
        if format.format != preferred_format.format
            || format.color_space != preferred_format.color_space
        {
            log::warn!(
                "preferred surface format {:?}/{:?} unsupported, falling back",
                preferred_format.format,
                preferred_format.color_space
            );
        }

        let present_modes = unsafe {
            self.loader
                .get_physical_device_surface_present_modes(physical_device, self.handle)
        }
        .map_err(SurfaceQueryError::PresentModeEnumeration)?;
        let present_mode = choose_present_mode(&present_modes, preferred_present_mode);

        log::debug!(
            "Selected surface format {:?} with colorspace {:?}, present mode {:?}",
            format.format,
            format.color_space,
            present_mode
        );

        Ok(SurfaceConfig {
            format,
            present_mode,
        })
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        log::debug!("destroying surface");
        // SAFETY: This is safe as long as the entry used to create the loader is still alive.
        unsafe {
            self.loader.destroy_surface(self.handle, None);
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    const PREFERRED: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
        format: vk::Format::B8G8R8A8_UNORM,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    };

    #[test]
    fn exact_format_match_is_chosen() {
        let available = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];

        let chosen = choose_surface_format(&available, PREFERRED).expect("format should match");
        assert_eq!(chosen.format, PREFERRED.format);
        assert_eq!(chosen.color_space, PREFERRED.color_space);
    }

    #[test]
    fn color_space_must_match_too() {
        let available = [
            format(vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT),
        ];

        let chosen = choose_surface_format(&available, PREFERRED).expect("fallback expected");
        assert_eq!(chosen.format, vk::Format::R8G8B8A8_SRGB);
        assert_eq!(chosen.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn no_format_when_surface_lists_none() {
        assert!(choose_surface_format(&[], PREFERRED).is_none());
    }

    #[test]
    fn preferred_present_mode_when_supported() {
        let available = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(
            choose_present_mode(&available, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::MAILBOX
        );
    }

    #[test]
    fn present_mode_falls_back_to_fifo() {
        let available = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(
            choose_present_mode(&available, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::FIFO
        );
    }
}
