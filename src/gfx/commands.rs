//! Command pools and the recorded frame content.
//!
//! What goes into a command buffer is first described as a plan of
//! [`RecordedCommand`]s, which is then replayed into the backend buffer. The draw never
//! changes, so each buffer is recorded once, ahead of the frame loop, and resubmitted
//! every frame.

use std::sync::Arc;

use ash::vk::{self, CommandBufferLevel};
use thiserror::Error;

use super::device::Device;

pub const TRIANGLE_VERTEX_COUNT: u32 = 3;
pub const TRIANGLE_INSTANCE_COUNT: u32 = 1;

/// Queue family ownership handoff of a swapchain image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnershipTransfer {
    pub src_family_index: u32,
    pub dst_family_index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RecordedCommand {
    Begin,
    BeginRenderPass {
        clear_color: [f32; 4],
    },
    BindPipeline,
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    EndRenderPass,
    ReleaseOwnership(OwnershipTransfer),
    AcquireOwnership(OwnershipTransfer),
    End,
}

/// Content of the graphics command buffer of every swapchain image.
pub fn triangle_commands(
    clear_color: [f32; 4],
    release: Option<OwnershipTransfer>,
) -> Vec<RecordedCommand> {
    let mut commands = vec![
        RecordedCommand::Begin,
        RecordedCommand::BeginRenderPass { clear_color },
        RecordedCommand::BindPipeline,
        RecordedCommand::Draw {
            vertex_count: TRIANGLE_VERTEX_COUNT,
            instance_count: TRIANGLE_INSTANCE_COUNT,
            first_vertex: 0,
            first_instance: 0,
        },
        RecordedCommand::EndRenderPass,
    ];
    if let Some(transfer) = release {
        commands.push(RecordedCommand::ReleaseOwnership(transfer));
    }
    commands.push(RecordedCommand::End);

    commands
}

/// Content of the present-queue command buffer used when images change queue family.
pub fn ownership_acquire_commands(transfer: OwnershipTransfer) -> Vec<RecordedCommand> {
    vec![
        RecordedCommand::Begin,
        RecordedCommand::AcquireOwnership(transfer),
        RecordedCommand::End,
    ]
}

/// Everything a plan can refer to while it is replayed.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RecordTarget {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub pipeline: vk::Pipeline,
    pub extent: vk::Extent2D,
    pub image: vk::Image,
}

#[derive(Debug, Error)]
pub enum CommandPoolCreateError {
    #[error("vulkan call to create command pool failed")]
    CmdPoolCreation(vk::Result),

    #[error("vulkan call to allocated command buffer failed")]
    CmdBufferAllocation(vk::Result),
}

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("command buffer begin failed")]
    Begin(vk::Result),

    #[error("vulkan call to end command buffer failed")]
    End(vk::Result),
}

pub(crate) struct CommandPool {
    pub handle: vk::CommandPool,
    pub family_index: u32,

    // bookkeeping
    device: Arc<Device>,
}

impl CommandPool {
    pub fn create(
        device: Arc<Device>,
        family_index: u32,
    ) -> Result<Self, CommandPoolCreateError> {
        let cmd_pool_info = vk::CommandPoolCreateInfo::default().queue_family_index(family_index);
        let handle = unsafe { device.create_command_pool(&cmd_pool_info, None) }
            .map_err(CommandPoolCreateError::CmdPoolCreation)?;

        Ok(Self {
            handle,
            family_index,
            device,
        })
    }

    pub fn allocate(&self, count: usize) -> Result<Vec<vk::CommandBuffer>, CommandPoolCreateError> {
        let cmd_buffer_info = vk::CommandBufferAllocateInfo::default()
            .level(CommandBufferLevel::PRIMARY)
            .command_buffer_count(count as u32)
            .command_pool(self.handle);

        unsafe { self.device.allocate_command_buffers(&cmd_buffer_info) }
            .map_err(CommandPoolCreateError::CmdBufferAllocation)
    }

    /// Replays `commands` into `cmd_buffer`. Buffers are flagged for simultaneous use
    /// since the same recording is resubmitted every frame.
    pub fn record(
        &self,
        cmd_buffer: vk::CommandBuffer,
        commands: &[RecordedCommand],
        target: &RecordTarget,
    ) -> Result<(), RecordError> {
        let device = &self.device;

        for command in commands {
            match *command {
                RecordedCommand::Begin => {
                    let begin_info = vk::CommandBufferBeginInfo::default()
                        .flags(vk::CommandBufferUsageFlags::SIMULTANEOUS_USE);
                    unsafe { device.begin_command_buffer(cmd_buffer, &begin_info) }
                        .map_err(RecordError::Begin)?;
                }
                RecordedCommand::BeginRenderPass { clear_color } => {
                    let clear_values = [vk::ClearValue {
                        color: vk::ClearColorValue {
                            float32: clear_color,
                        },
                    }];
                    let begin_info = vk::RenderPassBeginInfo::default()
                        .render_pass(target.render_pass)
                        .framebuffer(target.framebuffer)
                        .render_area(vk::Rect2D {
                            offset: vk::Offset2D { x: 0, y: 0 },
                            extent: target.extent,
                        })
                        .clear_values(&clear_values);
                    unsafe {
                        device.cmd_begin_render_pass(
                            cmd_buffer,
                            &begin_info,
                            vk::SubpassContents::INLINE,
                        )
                    };
                }
                RecordedCommand::BindPipeline => unsafe {
                    device.cmd_bind_pipeline(
                        cmd_buffer,
                        vk::PipelineBindPoint::GRAPHICS,
                        target.pipeline,
                    )
                },
                RecordedCommand::Draw {
                    vertex_count,
                    instance_count,
                    first_vertex,
                    first_instance,
                } => unsafe {
                    device.cmd_draw(
                        cmd_buffer,
                        vertex_count,
                        instance_count,
                        first_vertex,
                        first_instance,
                    )
                },
                RecordedCommand::EndRenderPass => unsafe {
                    device.cmd_end_render_pass(cmd_buffer)
                },
                RecordedCommand::ReleaseOwnership(transfer) => {
                    let barrier = ownership_barrier(target.image, transfer)
                        .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
                    unsafe {
                        device.cmd_pipeline_barrier(
                            cmd_buffer,
                            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                            vk::DependencyFlags::empty(),
                            &[],
                            &[],
                            &[barrier],
                        )
                    };
                }
                RecordedCommand::AcquireOwnership(transfer) => {
                    let barrier = ownership_barrier(target.image, transfer);
                    unsafe {
                        device.cmd_pipeline_barrier(
                            cmd_buffer,
                            vk::PipelineStageFlags::TOP_OF_PIPE,
                            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                            vk::DependencyFlags::empty(),
                            &[],
                            &[],
                            &[barrier],
                        )
                    };
                }
                RecordedCommand::End => {
                    unsafe { device.end_command_buffer(cmd_buffer) }.map_err(RecordError::End)?;
                }
            }
        }

        Ok(())
    }
}

/// The layout is already present-ready when the render pass ends; only the owning
/// queue family changes.
fn ownership_barrier(
    image: vk::Image,
    transfer: OwnershipTransfer,
) -> vk::ImageMemoryBarrier<'static> {
    vk::ImageMemoryBarrier::default()
        .image(image)
        .old_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .new_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .src_queue_family_index(transfer.src_family_index)
        .dst_queue_family_index(transfer.dst_family_index)
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .base_mip_level(0)
                .level_count(1)
                .base_array_layer(0)
                .layer_count(1),
        )
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        log::debug!("destroying command pool of family {}", self.family_index);
        // Destroying the pool frees every command buffer allocated from it.
        unsafe { self.device.destroy_command_pool(self.handle, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLACK: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

    fn draws(commands: &[RecordedCommand]) -> Vec<(u32, u32, u32, u32)> {
        commands
            .iter()
            .filter_map(|command| match *command {
                RecordedCommand::Draw {
                    vertex_count,
                    instance_count,
                    first_vertex,
                    first_instance,
                } => Some((vertex_count, instance_count, first_vertex, first_instance)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn triangle_sequence_is_fixed() {
        let commands = triangle_commands(BLACK, None);

        assert_eq!(
            commands,
            vec![
                RecordedCommand::Begin,
                RecordedCommand::BeginRenderPass { clear_color: BLACK },
                RecordedCommand::BindPipeline,
                RecordedCommand::Draw {
                    vertex_count: 3,
                    instance_count: 1,
                    first_vertex: 0,
                    first_instance: 0,
                },
                RecordedCommand::EndRenderPass,
                RecordedCommand::End,
            ]
        );
    }

    #[test]
    fn exactly_one_draw_of_three_vertices() {
        let commands = triangle_commands(BLACK, None);
        assert_eq!(draws(&commands), vec![(3, 1, 0, 0)]);
    }

    #[test]
    fn release_follows_render_pass() {
        let transfer = OwnershipTransfer {
            src_family_index: 0,
            dst_family_index: 2,
        };
        let commands = triangle_commands(BLACK, Some(transfer));

        let end_pass = commands
            .iter()
            .position(|command| *command == RecordedCommand::EndRenderPass)
            .expect("render pass should end");
        assert_eq!(
            commands[end_pass + 1],
            RecordedCommand::ReleaseOwnership(transfer)
        );
        assert_eq!(commands.last(), Some(&RecordedCommand::End));
        assert_eq!(draws(&commands).len(), 1);
    }

    #[test]
    fn acquire_plan_has_no_draw() {
        let transfer = OwnershipTransfer {
            src_family_index: 0,
            dst_family_index: 2,
        };
        let commands = ownership_acquire_commands(transfer);

        assert!(draws(&commands).is_empty());
        assert!(commands.contains(&RecordedCommand::AcquireOwnership(transfer)));
    }
}
