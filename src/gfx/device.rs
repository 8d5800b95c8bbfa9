use std::ops::Deref;

use ash::{khr, vk};
use thiserror::Error;

use super::{
    capabilities::{self, CapabilityQueryError, DeviceCandidate, QueueStrategy},
    instance::Instance,
    surface::Surface,
};

pub struct PhysicalDevice {
    pub handle: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub queue_strategy: QueueStrategy,
}

#[derive(Debug, Error)]
pub enum PhysicalDeviceSelectError {
    #[error("capability discovery failed")]
    Discovery(#[from] CapabilityQueryError),

    #[error("no valid device detected")]
    NoDevice,
}

impl PhysicalDevice {
    pub(crate) fn select(
        instance: &Instance,
        target_surface: &Surface,
    ) -> Result<Self, PhysicalDeviceSelectError> {
        log::debug!("Started physical device selection");
        let candidates = capabilities::enumerate_devices(instance, target_surface)?;

        // A device is only a candidate if it can hold a swapchain and has queues that can
        // both draw and present, possibly through two families.
        let usable = candidates.into_iter().filter_map(|candidate| {
            if !candidate.supports_extension(khr::swapchain::NAME) {
                log::debug!("\t{} lacks swapchain support", candidate.debug_string());
                return None;
            }

            match capabilities::resolve_queue_strategy(&candidate.queue_families) {
                Some(strategy) => Some((candidate, strategy)),
                None => {
                    log::debug!(
                        "\t{} has no graphics/present queue family",
                        candidate.debug_string()
                    );
                    None
                }
            }
        });

        let (candidate, queue_strategy) =
            capabilities::select_device(usable).ok_or(PhysicalDeviceSelectError::NoDevice)?;
        log_device_extensions(&candidate);

        let selected_device = Self {
            handle: candidate.handle,
            properties: candidate.properties,
            queue_strategy,
        };

        log::info!("Physical device selection result:");
        log::info!("\t{}", selected_device.debug_string());
        log::info!("\tqueue strategy: {:?}", selected_device.queue_strategy);

        Ok(selected_device)
    }

    pub fn debug_string(&self) -> String {
        let device_name = self
            .properties
            .device_name_as_c_str()
            .unwrap_or(c"INVALID")
            .to_str()
            .unwrap_or("INVALID");
        let device_type = capabilities::device_type_to_str(self.properties.device_type);
        let device_vendor = capabilities::vendor_id_to_str(self.properties.vendor_id);
        format!("{} [{}]: {}", device_name, device_vendor, device_type)
    }
}

fn log_device_extensions(candidate: &DeviceCandidate) {
    log::debug!("Available device extensions for {}:", candidate.name());
    for extension in &candidate.extensions {
        log::debug!("\t{extension}");
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Queue {
    pub handle: vk::Queue,
    pub family_index: u32,
}

pub struct Device {
    pub handle: ash::Device,
    pub swapchain_loader: khr::swapchain::Device,

    pub graphics_queue: Queue,
    pub present_queue: Queue,
    pub queue_strategy: QueueStrategy,
}

impl Deref for Device {
    type Target = ash::Device;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

#[derive(Debug, Error)]
pub enum DeviceCreateError {
    #[error("vulkan call to create the logical device failed")]
    VulkanCreation(vk::Result),
}

impl Device {
    pub(crate) fn create(
        instance: &Instance,
        physical_device: &PhysicalDevice,
    ) -> Result<Self, DeviceCreateError> {
        let strategy = physical_device.queue_strategy;
        let priorities = [1.0];

        let mut family_indices = vec![strategy.graphics_family_index()];
        if strategy.is_split() {
            family_indices.push(strategy.present_family_index());
        }
        let queue_infos: Vec<_> = family_indices
            .iter()
            .map(|&family_index| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family_index)
                    .queue_priorities(&priorities)
            })
            .collect();

        let extensions = [khr::swapchain::NAME.as_ptr()];
        let features = vk::PhysicalDeviceFeatures::default();
        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        // SAFETY: The device must be destroyed before the instance, which every owner of the
        // device guarantees by keeping the instance declared after it.
        let handle = unsafe { instance.create_device(physical_device.handle, &create_info, None) }
            .map_err(DeviceCreateError::VulkanCreation)?;

        let graphics_queue = Queue {
            handle: unsafe { handle.get_device_queue(strategy.graphics_family_index(), 0) },
            family_index: strategy.graphics_family_index(),
        };
        let present_queue = match strategy {
            QueueStrategy::Shared { .. } => graphics_queue,
            QueueStrategy::Split {
                present_family_index,
                ..
            } => Queue {
                handle: unsafe { handle.get_device_queue(present_family_index, 0) },
                family_index: present_family_index,
            },
        };

        let swapchain_loader = khr::swapchain::Device::new(instance, &handle);
        log::debug!("created logical device with {} queue(s)", queue_infos.len());

        Ok(Self {
            handle,
            swapchain_loader,
            graphics_queue,
            present_queue,
            queue_strategy: strategy,
        })
    }

    pub fn wait_idle(&self) -> Result<(), vk::Result> {
        unsafe { self.handle.device_wait_idle() }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        log::debug!("destroying logical device");
        // SAFETY: Every resource created from this device holds a reference to it, so nothing
        // created from it can still be alive here.
        unsafe { self.handle.destroy_device(None) };
    }
}
