use std::sync::Arc;

use ash::vk;
use thiserror::Error;

use super::device::Device;

pub struct RenderPass {
    pub handle: vk::RenderPass,

    // bookkeeping
    device: Arc<Device>,
}

#[derive(Debug, Error)]
pub enum RenderPassCreateError {
    #[error("vulkan call to create the render pass failed")]
    VulkanCreation(vk::Result),
}

/// The single presentable color target: cleared on load, kept on store, handed to the
/// presentation engine at the end of the pass.
pub fn color_attachment(format: vk::Format) -> vk::AttachmentDescription {
    vk::AttachmentDescription::default()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
}

/// Keeps the pass from writing the attachment before the presentation engine has
/// released the image: the acquire semaphore is waited on at this same stage.
pub fn acquire_dependency() -> vk::SubpassDependency {
    vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_access_mask(
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        )
}

impl RenderPass {
    pub(crate) fn create(
        device: Arc<Device>,
        color_format: vk::Format,
    ) -> Result<Self, RenderPassCreateError> {
        let attachments = [color_attachment(color_format)];
        let color_references = [vk::AttachmentReference::default()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];
        let subpasses = [vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_references)];
        let dependencies = [acquire_dependency()];

        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        let handle = unsafe { device.create_render_pass(&create_info, None) }
            .map_err(RenderPassCreateError::VulkanCreation)?;
        log::debug!("created render pass for {color_format:?}");

        Ok(Self {
            handle,
            device,
        })
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        log::debug!("destroying render pass");
        unsafe { self.device.destroy_render_pass(self.handle, None) };
    }
}
