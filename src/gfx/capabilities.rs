//! Read-only discovery of what the backend and the hardware offer.
//!
//! Nothing in here creates or owns a GPU object: instance extensions and layers,
//! physical devices and their queue families are only enumerated and described, so
//! that instance creation and device selection can make their decisions from plain
//! data.

use std::ffi::CStr;

use ash::vk;
use thiserror::Error;

use super::surface::Surface;

#[derive(Debug, Error)]
pub enum CapabilityQueryError {
    #[error("vulkan call to enumerate instance extensions failed")]
    InstanceExtensionEnumeration(vk::Result),

    #[error("vulkan call to enumerate instance layers failed")]
    InstanceLayerEnumeration(vk::Result),

    #[error("vulkan call to enumerate physical devices failed")]
    DeviceEnumeration(vk::Result),

    #[error("vulkan call to enumerate device extensions failed")]
    DeviceExtensionEnumeration(vk::Result),

    #[error("vulkan call to query surface support failed")]
    SurfaceSupport(vk::Result),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerInfo {
    pub name: String,
    pub description: String,
}

/// Extensions and layers the loader exposes before any instance exists.
#[derive(Debug, Clone, Default)]
pub struct InstanceCapabilities {
    pub extensions: Vec<String>,
    pub layers: Vec<LayerInfo>,
}

impl InstanceCapabilities {
    pub fn enumerate(entry: &ash::Entry) -> Result<Self, CapabilityQueryError> {
        // SAFETY: The entry is loaded and stays alive for the duration of both calls.
        let extensions = unsafe { entry.enumerate_instance_extension_properties(None) }
            .map_err(CapabilityQueryError::InstanceExtensionEnumeration)?
            .iter()
            .map(|properties| c_str_lossy(properties.extension_name_as_c_str()))
            .collect();
        let layers = unsafe { entry.enumerate_instance_layer_properties() }
            .map_err(CapabilityQueryError::InstanceLayerEnumeration)?
            .iter()
            .map(|properties| LayerInfo {
                name: c_str_lossy(properties.layer_name_as_c_str()),
                description: c_str_lossy(properties.description_as_c_str()),
            })
            .collect();

        let capabilities = Self { extensions, layers };
        capabilities.log();

        Ok(capabilities)
    }

    pub fn has_extension(&self, name: &CStr) -> bool {
        let name = name.to_string_lossy();
        self.extensions.iter().any(|extension| *extension == name)
    }

    pub fn has_layer(&self, name: &CStr) -> bool {
        let name = name.to_string_lossy();
        self.layers.iter().any(|layer| layer.name == name)
    }

    fn log(&self) {
        log::debug!("Available instance extensions:");
        for extension in &self.extensions {
            log::debug!("\t{extension}");
        }

        log::debug!("Available instance layers:");
        for layer in &self.layers {
            log::debug!("\t{}: {}", layer.name, layer.description);
        }
    }
}

/// Capability flags of one queue family, including whether it can present to the
/// target surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyInfo {
    pub index: u32,
    pub queue_count: u32,
    pub graphics: bool,
    pub compute: bool,
    pub transfer: bool,
    pub protected: bool,
    pub sparse_binding: bool,
    pub present: bool,
}

impl QueueFamilyInfo {
    pub fn from_properties(
        index: u32,
        properties: &vk::QueueFamilyProperties,
        present: bool,
    ) -> Self {
        let flags = properties.queue_flags;
        Self {
            index,
            queue_count: properties.queue_count,
            graphics: flags.contains(vk::QueueFlags::GRAPHICS),
            compute: flags.contains(vk::QueueFlags::COMPUTE),
            transfer: flags.contains(vk::QueueFlags::TRANSFER),
            protected: flags.contains(vk::QueueFlags::PROTECTED),
            sparse_binding: flags.contains(vk::QueueFlags::SPARSE_BINDING),
            present,
        }
    }
}

/// How rendering and presentation are mapped onto device queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStrategy {
    /// One queue from a family that can both draw and present.
    Shared { family_index: u32 },

    /// Distinct graphics and present families; swapchain images change queue family
    /// ownership before every presentation.
    Split {
        graphics_family_index: u32,
        present_family_index: u32,
    },
}

impl QueueStrategy {
    pub fn graphics_family_index(&self) -> u32 {
        match *self {
            Self::Shared { family_index } => family_index,
            Self::Split {
                graphics_family_index,
                ..
            } => graphics_family_index,
        }
    }

    pub fn present_family_index(&self) -> u32 {
        match *self {
            Self::Shared { family_index } => family_index,
            Self::Split {
                present_family_index,
                ..
            } => present_family_index,
        }
    }

    pub fn is_split(&self) -> bool {
        matches!(self, Self::Split { .. })
    }
}

/// Prefers a family that both draws and presents, otherwise pairs the first
/// graphics-capable family with the first present-capable one.
pub fn resolve_queue_strategy(families: &[QueueFamilyInfo]) -> Option<QueueStrategy> {
    let usable = |family: &&QueueFamilyInfo| family.queue_count > 0;

    if let Some(family) = families
        .iter()
        .filter(usable)
        .find(|family| family.graphics && family.present)
    {
        return Some(QueueStrategy::Shared {
            family_index: family.index,
        });
    }

    let graphics = families.iter().filter(usable).find(|family| family.graphics)?;
    let present = families.iter().filter(usable).find(|family| family.present)?;

    Some(QueueStrategy::Split {
        graphics_family_index: graphics.index,
        present_family_index: present.index,
    })
}

/// Selection policy: the first enumerated entry wins, no scoring.
pub fn select_device<T>(devices: impl IntoIterator<Item = T>) -> Option<T> {
    devices.into_iter().next()
}

/// Everything discovery learned about one physical device.
#[derive(Debug, Clone)]
pub struct DeviceCandidate {
    pub handle: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub queue_families: Vec<QueueFamilyInfo>,
    pub extensions: Vec<String>,
}

impl DeviceCandidate {
    pub fn name(&self) -> String {
        c_str_lossy(self.properties.device_name_as_c_str())
    }

    pub fn supports_extension(&self, name: &CStr) -> bool {
        let name = name.to_string_lossy();
        self.extensions.iter().any(|extension| *extension == name)
    }

    pub fn debug_string(&self) -> String {
        format!(
            "{} [{}]: {} (id {:#06x})",
            self.name(),
            vendor_id_to_str(self.properties.vendor_id),
            device_type_to_str(self.properties.device_type),
            self.properties.device_id
        )
    }
}

pub(crate) fn enumerate_devices(
    instance: &ash::Instance,
    surface: &Surface,
) -> Result<Vec<DeviceCandidate>, CapabilityQueryError> {
    // SAFETY: This is safe as long as the entry used to create the instance is still alive.
    let handles = unsafe { instance.enumerate_physical_devices() }
        .map_err(CapabilityQueryError::DeviceEnumeration)?;

    let candidates = handles
        .into_iter()
        .map(|handle| {
            let properties = unsafe { instance.get_physical_device_properties(handle) };
            let queue_families = query_queue_families(instance, surface, handle)?;
            let extensions = unsafe { instance.enumerate_device_extension_properties(handle) }
                .map_err(CapabilityQueryError::DeviceExtensionEnumeration)?
                .iter()
                .map(|properties| c_str_lossy(properties.extension_name_as_c_str()))
                .collect();

            Ok(DeviceCandidate {
                handle,
                properties,
                queue_families,
                extensions,
            })
        })
        .collect::<Result<Vec<_>, CapabilityQueryError>>()?;

    log::debug!("Available physical devices:");
    for candidate in &candidates {
        log::debug!("\t{} with queue families:", candidate.debug_string());
        for family in &candidate.queue_families {
            log::debug!(
                "\t\tfamily {} ({} queues): compute {}, graphics {}, protected {}, sparse binding {}, transfer {}, present {}",
                family.index,
                family.queue_count,
                family.compute,
                family.graphics,
                family.protected,
                family.sparse_binding,
                family.transfer,
                family.present
            );
        }
    }

    Ok(candidates)
}

pub(crate) fn query_queue_families(
    instance: &ash::Instance,
    surface: &Surface,
    physical_device: vk::PhysicalDevice,
) -> Result<Vec<QueueFamilyInfo>, CapabilityQueryError> {
    let properties =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

    properties
        .iter()
        .enumerate()
        .map(|(index, family)| {
            let index = index as u32;
            let present = unsafe {
                surface.loader.get_physical_device_surface_support(
                    physical_device,
                    index,
                    surface.handle,
                )
            }
            .map_err(CapabilityQueryError::SurfaceSupport)?;

            Ok(QueueFamilyInfo::from_properties(index, family, present))
        })
        .collect()
}

pub(crate) fn vendor_id_to_str(vendor_id: u32) -> &'static str {
    match vendor_id {
        0x1002 => "AMD",
        0x1010 => "ImgTec",
        0x10DE => "NVIDIA",
        0x13B5 => "ARM",
        0x5143 => "Qualcomm",
        0x8086 => "Intel",
        _ => "unknown",
    }
}

pub(crate) fn device_type_to_str(device_type: vk::PhysicalDeviceType) -> &'static str {
    match device_type {
        vk::PhysicalDeviceType::INTEGRATED_GPU => "integrated GPU",
        vk::PhysicalDeviceType::DISCRETE_GPU => "discrete GPU",
        vk::PhysicalDeviceType::VIRTUAL_GPU => "virtual GPU",
        vk::PhysicalDeviceType::CPU => "CPU",
        _ => "other",
    }
}

fn c_str_lossy(name: Result<&CStr, std::ffi::FromBytesUntilNulError>) -> String {
    name.map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "INVALID".to_owned())
}
