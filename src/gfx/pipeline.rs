use std::sync::Arc;

use ash::vk;
use thiserror::Error;

use super::{
    device::Device,
    render_pass::RenderPass,
    shader::{ENTRY_POINT, ShaderBinaries, ShaderModule, ShaderModuleCreateError},
};

/// The triangle pipeline and its layout. All state is baked in, including the
/// viewport, so a new surface extent means a new pipeline.
pub struct GraphicsPipeline {
    pub handle: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub extent: vk::Extent2D,

    // bookkeeping
    device: Arc<Device>,
}

#[derive(Debug, Error)]
pub enum PipelineCreateError {
    #[error("shader module creation failed")]
    ShaderModule(#[from] ShaderModuleCreateError),

    #[error("vulkan call to create the pipeline layout failed")]
    LayoutCreation(vk::Result),

    #[error("vulkan call to create the graphics pipeline failed")]
    VulkanCreation(vk::Result),
}

pub fn input_assembly_state() -> vk::PipelineInputAssemblyStateCreateInfo<'static> {
    vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
        .primitive_restart_enable(false)
}

pub fn full_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport::default()
        .x(0.0)
        .y(0.0)
        .width(extent.width as f32)
        .height(extent.height as f32)
        .min_depth(0.0)
        .max_depth(1.0)
}

pub fn full_scissor(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D::default()
        .offset(vk::Offset2D { x: 0, y: 0 })
        .extent(extent)
}

pub fn rasterization_state() -> vk::PipelineRasterizationStateCreateInfo<'static> {
    vk::PipelineRasterizationStateCreateInfo::default()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(vk::CullModeFlags::BACK)
        .front_face(vk::FrontFace::CLOCKWISE)
        .depth_bias_enable(false)
}

pub fn multisample_state() -> vk::PipelineMultisampleStateCreateInfo<'static> {
    vk::PipelineMultisampleStateCreateInfo::default()
        .sample_shading_enable(false)
        .rasterization_samples(vk::SampleCountFlags::TYPE_1)
        .min_sample_shading(1.0)
        .alpha_to_coverage_enable(false)
        .alpha_to_one_enable(false)
}

/// Opaque writes to every channel.
pub fn color_blend_attachment() -> vk::PipelineColorBlendAttachmentState {
    vk::PipelineColorBlendAttachmentState::default()
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .blend_enable(false)
        .src_color_blend_factor(vk::BlendFactor::ONE)
        .dst_color_blend_factor(vk::BlendFactor::ZERO)
        .color_blend_op(vk::BlendOp::ADD)
        .src_alpha_blend_factor(vk::BlendFactor::ONE)
        .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
        .alpha_blend_op(vk::BlendOp::ADD)
}

impl GraphicsPipeline {
    pub(crate) fn create(
        device: Arc<Device>,
        render_pass: &RenderPass,
        shaders: &ShaderBinaries,
        extent: vk::Extent2D,
    ) -> Result<Self, PipelineCreateError> {
        // The pipeline keeps what it needs from the modules, they die at the end of this call.
        let vertex_module = ShaderModule::create(device.clone(), &shaders.vertex)?;
        let fragment_module = ShaderModule::create(device.clone(), &shaders.fragment)?;

        let stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vertex_module.handle)
                .name(ENTRY_POINT),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(fragment_module.handle)
                .name(ENTRY_POINT),
        ];

        // vertices are generated in the vertex shader
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default();
        let input_assembly = input_assembly_state();

        let viewports = [full_viewport(extent)];
        let scissors = [full_scissor(extent)];
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewports(&viewports)
            .scissors(&scissors);

        let rasterization = rasterization_state();
        let multisample = multisample_state();

        let blend_attachments = [color_blend_attachment()];
        let color_blend = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .logic_op(vk::LogicOp::COPY)
            .attachments(&blend_attachments)
            .blend_constants([0.0; 4]);

        let layout_info = vk::PipelineLayoutCreateInfo::default();
        let layout = unsafe { device.create_pipeline_layout(&layout_info, None) }
            .map_err(PipelineCreateError::LayoutCreation)?;

        let create_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .color_blend_state(&color_blend)
            .layout(layout)
            .render_pass(render_pass.handle)
            .subpass(0)
            .base_pipeline_index(-1);

        let pipelines = unsafe {
            device.create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
        };
        let handle = match pipelines {
            Ok(pipelines) => pipelines[0],
            Err((_, result)) => {
                unsafe { device.destroy_pipeline_layout(layout, None) };
                return Err(PipelineCreateError::VulkanCreation(result));
            }
        };
        log::debug!(
            "created graphics pipeline for {}x{}",
            extent.width,
            extent.height
        );

        Ok(Self {
            handle,
            layout,
            extent,
            device,
        })
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        log::debug!("destroying graphics pipeline");
        unsafe { self.device.destroy_pipeline(self.handle, None) };
        unsafe { self.device.destroy_pipeline_layout(self.layout, None) };
    }
}
