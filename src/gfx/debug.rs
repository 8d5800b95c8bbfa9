use std::{borrow::Cow, ffi::CStr};

use ash::{ext, vk};
use thiserror::Error;

/// A single diagnostic forwarded by the validation layers.
#[derive(Debug, Clone)]
pub(crate) struct DebugMessage<'a> {
    pub severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    pub category: vk::DebugUtilsMessageTypeFlagsEXT,
    pub id: i32,
    pub message: Cow<'a, str>,
}

impl DebugMessage<'_> {
    pub fn level(&self) -> log::Level {
        if self.severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
            log::Level::Error
        } else if self
            .severity
            .contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING)
        {
            log::Level::Warn
        } else if self.severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
            log::Level::Info
        } else {
            log::Level::Trace
        }
    }

    pub fn emit(&self) {
        log::log!(
            target: "vulkan",
            self.level(),
            "{:?} ({:?}): [ID: {}] {}",
            self.severity,
            self.category,
            self.id,
            self.message
        );
    }
}

unsafe extern "system" fn vulkan_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if callback_data.is_null() {
        return vk::FALSE;
    }

    // SAFETY: The layers hand us a valid callback data pointer for the duration of the call.
    let callback_data = unsafe { *callback_data };
    let message = if callback_data.p_message.is_null() {
        Cow::from("")
    } else {
        unsafe { CStr::from_ptr(callback_data.p_message) }.to_string_lossy()
    };

    DebugMessage {
        severity: message_severity,
        category: message_type,
        id: callback_data.message_id_number,
        message,
    }
    .emit();

    vk::FALSE
}

#[derive(Debug, Error)]
pub enum DUMCreationError {
    #[error("vulkan call to create the messenger failed")]
    VulkanCreation(vk::Result),
}

pub(crate) struct DUMessenger {
    pub handle: vk::DebugUtilsMessengerEXT,
    pub loader: ext::debug_utils::Instance,
}

impl DUMessenger {
    pub(crate) fn create(
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> Result<Self, DUMCreationError> {
        let loader = ext::debug_utils::Instance::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                    | vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(vulkan_debug_callback));
        // SAFETY: This is safe as long as the entry used to create the loader is still alive.
        let handle = unsafe { loader.create_debug_utils_messenger(&create_info, None) }
            .map_err(DUMCreationError::VulkanCreation)?;

        let messenger = Self { handle, loader };
        messenger.submit_self_test();

        Ok(messenger)
    }

    /// Pushes one verbose message through the whole callback chain.
    fn submit_self_test(&self) {
        let callback_data =
            vk::DebugUtilsMessengerCallbackDataEXT::default().message(c"debug messenger attached");
        unsafe {
            self.loader.submit_debug_utils_message(
                vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE,
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL,
                &callback_data,
            )
        };
    }
}

impl Drop for DUMessenger {
    fn drop(&mut self) {
        log::debug!("destroying debug utils messenger");
        // SAFETY: This is safe as long as the entry used to create the loader is still alive.
        unsafe { self.loader.destroy_debug_utils_messenger(self.handle, None) };
    }
}
