use std::{
    ffi::{CStr, c_char},
    ops::Deref,
};

use ash::{ext, vk};
use thiserror::Error;
use winit::raw_window_handle::RawDisplayHandle;

use super::capabilities::InstanceCapabilities;

pub(crate) const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

pub(crate) struct Instance {
    pub handle: ash::Instance,
    pub debug_utils_enabled: bool,
}

impl Deref for Instance {
    type Target = ash::Instance;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

#[derive(Debug, Error)]
pub enum InstanceCreateError {
    #[error("query for necessary extensions from ash_window failed")]
    ExtensionQuery(vk::Result),

    #[error("vulkan call to create instance failed")]
    VulkanCreation(vk::Result),
}

/// Extensions and layers an instance is created with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct InstanceRequest<'a> {
    pub extensions: Vec<&'a CStr>,
    pub layers: Vec<&'a CStr>,
    pub debug_utils: bool,
}

impl<'a> InstanceRequest<'a> {
    /// The platform extensions are mandatory and kept in order; validation only ever
    /// appends to them, and only what the loader actually offers.
    pub fn resolve(
        platform_extensions: &[&'a CStr],
        capabilities: &InstanceCapabilities,
        validation: bool,
    ) -> Self {
        let mut extensions = platform_extensions.to_vec();
        let mut layers = vec![];
        let mut debug_utils = false;

        if validation {
            if capabilities.has_layer(VALIDATION_LAYER) {
                layers.push(VALIDATION_LAYER);
            } else {
                log::warn!("validation requested but {VALIDATION_LAYER:?} is not available");
            }

            if capabilities.has_extension(ext::debug_utils::NAME) {
                extensions.push(ext::debug_utils::NAME);
                debug_utils = true;
            } else {
                log::warn!("validation requested but debug utils are not available");
            }
        }

        Self {
            extensions,
            layers,
            debug_utils,
        }
    }
}

/// Instance extensions the platform needs to expose a presentation surface.
pub(crate) fn required_platform_extensions(
    display_handle: RawDisplayHandle,
) -> Result<Vec<&'static CStr>, InstanceCreateError> {
    let names = ash_window::enumerate_required_extensions(display_handle)
        .map_err(InstanceCreateError::ExtensionQuery)?;

    // SAFETY: ash_window hands out pointers to static, nul-terminated extension names.
    let names = names
        .iter()
        .map(|&name| unsafe { CStr::from_ptr(name) })
        .collect::<Vec<_>>();

    log::debug!("Required instance extensions:");
    for name in &names {
        log::debug!("\t{name:?}");
    }

    Ok(names)
}

fn engine_version() -> u32 {
    let part = |value: &str| value.parse::<u32>().unwrap_or(0);
    vk::make_api_version(
        0,
        part(env!("CARGO_PKG_VERSION_MAJOR")),
        part(env!("CARGO_PKG_VERSION_MINOR")),
        part(env!("CARGO_PKG_VERSION_PATCH")),
    )
}

impl Instance {
    pub fn create(
        entry: &ash::Entry,
        application_name: &CStr,
        application_version: u32,
        vk_version: u32,
        request: &InstanceRequest,
    ) -> Result<Self, InstanceCreateError> {
        let app_info = vk::ApplicationInfo::default()
            .application_name(application_name)
            .application_version(application_version)
            .engine_name(c"kiln")
            .engine_version(engine_version())
            .api_version(vk_version);

        let enabled_extensions: Vec<*const c_char> =
            request.extensions.iter().map(|name| name.as_ptr()).collect();
        let enabled_layers: Vec<*const c_char> =
            request.layers.iter().map(|name| name.as_ptr()).collect();

        let instance_create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&enabled_extensions)
            .enabled_layer_names(&enabled_layers);

        // SAFETY: This is only safe is we keep the entry alive for longer than the instance, which
        // we do by storing it as well.
        let handle = unsafe { entry.create_instance(&instance_create_info, None) }
            .map_err(InstanceCreateError::VulkanCreation)?;
        log::debug!(
            "created instance with {} extension(s) and {} layer(s)",
            enabled_extensions.len(),
            enabled_layers.len()
        );

        Ok(Self {
            handle,
            debug_utils_enabled: request.debug_utils,
        })
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        log::debug!("destroying instance");
        // SAFETY: This is safe as long as the entry used to create the loader is still alive.
        unsafe { self.handle.destroy_instance(None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::capabilities::LayerInfo;

    fn capabilities(with_validation: bool) -> InstanceCapabilities {
        let mut capabilities = InstanceCapabilities {
            extensions: vec!["VK_KHR_surface".to_owned(), "VK_KHR_xlib_surface".to_owned()],
            layers: vec![],
        };
        if with_validation {
            capabilities.extensions.push("VK_EXT_debug_utils".to_owned());
            capabilities.layers.push(LayerInfo {
                name: "VK_LAYER_KHRONOS_validation".to_owned(),
                description: String::new(),
            });
        }
        capabilities
    }

    #[test]
    fn platform_extensions_are_kept_in_order() {
        let platform = [c"VK_KHR_surface", c"VK_KHR_xlib_surface"];
        let request = InstanceRequest::resolve(&platform, &capabilities(true), false);

        assert_eq!(request.extensions, platform.to_vec());
        assert!(request.layers.is_empty());
        assert!(!request.debug_utils);
    }

    #[test]
    fn validation_appends_to_platform_extensions() {
        let platform = [c"VK_KHR_surface", c"VK_KHR_xlib_surface"];
        let request = InstanceRequest::resolve(&platform, &capabilities(true), true);

        assert_eq!(
            request.extensions,
            vec![c"VK_KHR_surface", c"VK_KHR_xlib_surface", ext::debug_utils::NAME]
        );
        assert_eq!(request.layers, vec![VALIDATION_LAYER]);
        assert!(request.debug_utils);
    }

    #[test]
    fn missing_validation_support_is_skipped() {
        let platform = [c"VK_KHR_surface"];
        let request = InstanceRequest::resolve(&platform, &capabilities(false), true);

        assert_eq!(request.extensions, vec![c"VK_KHR_surface"]);
        assert!(request.layers.is_empty());
        assert!(!request.debug_utils);
    }
}
