//! Per-image and per-slot resources of one surface epoch.
//!
//! Every swapchain image gets a framebuffer and a pre-recorded command buffer (plus a
//! present-queue buffer when the queue families are split). Synchronization objects live
//! in frame slots, reused round-robin; with a single slot at most one frame is ever in
//! flight.

use std::sync::Arc;

use ash::vk;
use thiserror::Error;

use super::{
    capabilities::QueueStrategy,
    commands::{
        self, CommandPool, CommandPoolCreateError, OwnershipTransfer, RecordError, RecordTarget,
        RecordedCommand,
    },
    device::Device,
    pipeline::GraphicsPipeline,
    render_pass::RenderPass,
    swapchain::Swapchain,
};

pub const FRAMES_IN_FLIGHT: usize = 1;

/// What gets recorded for one swapchain image.
#[derive(Debug, Clone, PartialEq)]
pub struct FramePlan {
    pub graphics: Vec<RecordedCommand>,
    pub present_acquire: Option<Vec<RecordedCommand>>,
}

/// The handoff images go through when drawing and presenting happen on different
/// families.
pub fn ownership_transfer(strategy: QueueStrategy) -> Option<OwnershipTransfer> {
    match strategy {
        QueueStrategy::Shared { .. } => None,
        QueueStrategy::Split {
            graphics_family_index,
            present_family_index,
        } => Some(OwnershipTransfer {
            src_family_index: graphics_family_index,
            dst_family_index: present_family_index,
        }),
    }
}

pub fn frame_plans(
    image_count: usize,
    clear_color: [f32; 4],
    strategy: QueueStrategy,
) -> Vec<FramePlan> {
    let transfer = ownership_transfer(strategy);

    (0..image_count)
        .map(|_| FramePlan {
            graphics: commands::triangle_commands(clear_color, transfer),
            present_acquire: transfer.map(commands::ownership_acquire_commands),
        })
        .collect()
}

/// Queue a submission goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitQueue {
    Graphics,
    Present,
}

/// Which semaphore of the frame slot a submission waits on or signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemaphoreRole {
    ImageAvailable,
    OwnershipReleased,
    RenderFinished,
}

/// Which of the image's recorded buffers a submission executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitBuffer {
    Draw,
    OwnershipAcquire,
}

/// One queue submission of a frame, described in terms of slot and target roles.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitPlan {
    pub queue: SubmitQueue,
    pub waits: Vec<(SemaphoreRole, vk::PipelineStageFlags)>,
    pub command_buffer: SubmitBuffer,
    pub signals: Vec<SemaphoreRole>,
    pub signals_fence: bool,
}

/// The submissions of one frame, in queue order. Drawing waits for the acquired image at
/// the stage that writes it; presentation waits on `RenderFinished`, and only the last
/// submission signals the slot fence.
pub fn submit_plans(strategy: QueueStrategy) -> Vec<SubmitPlan> {
    let acquire_wait = (
        SemaphoreRole::ImageAvailable,
        vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
    );

    match strategy {
        QueueStrategy::Shared { .. } => vec![SubmitPlan {
            queue: SubmitQueue::Graphics,
            waits: vec![acquire_wait],
            command_buffer: SubmitBuffer::Draw,
            signals: vec![SemaphoreRole::RenderFinished],
            signals_fence: true,
        }],
        QueueStrategy::Split { .. } => vec![
            SubmitPlan {
                queue: SubmitQueue::Graphics,
                waits: vec![acquire_wait],
                command_buffer: SubmitBuffer::Draw,
                signals: vec![SemaphoreRole::OwnershipReleased],
                signals_fence: false,
            },
            SubmitPlan {
                queue: SubmitQueue::Present,
                waits: vec![(
                    SemaphoreRole::OwnershipReleased,
                    vk::PipelineStageFlags::ALL_COMMANDS,
                )],
                command_buffer: SubmitBuffer::OwnershipAcquire,
                signals: vec![SemaphoreRole::RenderFinished],
                signals_fence: true,
            },
        ],
    }
}

/// Synchronization of one frame in flight.
pub(crate) struct FrameSlot {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    /// Only with split queues: graphics work done, present-queue acquire may run.
    pub ownership_released: Option<vk::Semaphore>,
    /// Signaled when the last submission of the slot retired; created signaled.
    pub in_flight: vk::Fence,
}

impl FrameSlot {
    pub fn semaphore(&self, role: SemaphoreRole) -> Option<vk::Semaphore> {
        match role {
            SemaphoreRole::ImageAvailable => Some(self.image_available),
            SemaphoreRole::OwnershipReleased => self.ownership_released,
            SemaphoreRole::RenderFinished => Some(self.render_finished),
        }
    }
}

pub(crate) struct FrameTarget {
    pub framebuffer: vk::Framebuffer,
    pub command_buffer: vk::CommandBuffer,
    pub present_acquire: Option<vk::CommandBuffer>,
}

impl FrameTarget {
    pub fn buffer(&self, buffer: SubmitBuffer) -> Option<vk::CommandBuffer> {
        match buffer {
            SubmitBuffer::Draw => Some(self.command_buffer),
            SubmitBuffer::OwnershipAcquire => self.present_acquire,
        }
    }
}

#[derive(Debug, Error)]
pub enum FrameResourcesCreateError {
    #[error("command pool setup failed")]
    CommandPool(#[from] CommandPoolCreateError),

    #[error("vulkan call to create a framebuffer failed")]
    FramebufferCreation(vk::Result),

    #[error("vulkan call to create a synchronization object failed")]
    SyncObjectCreation(vk::Result),

    #[error("command buffer recording failed")]
    Recording(#[from] RecordError),
}

pub(crate) struct FrameResources {
    pub targets: Vec<FrameTarget>,
    pub slots: Vec<FrameSlot>,
    pub submit_plans: Vec<SubmitPlan>,
    current_slot: usize,

    present_pool: Option<CommandPool>,
    graphics_pool: CommandPool,

    // bookkeeping
    device: Arc<Device>,
}

impl FrameResources {
    pub fn create(
        device: Arc<Device>,
        render_pass: &RenderPass,
        pipeline: &GraphicsPipeline,
        swapchain: &Swapchain,
        clear_color: [f32; 4],
    ) -> Result<Self, FrameResourcesCreateError> {
        let strategy = device.queue_strategy;
        let graphics_pool = CommandPool::create(device.clone(), strategy.graphics_family_index())?;
        let present_pool = if strategy.is_split() {
            Some(CommandPool::create(
                device.clone(),
                strategy.present_family_index(),
            )?)
        } else {
            None
        };

        let image_count = swapchain.images.len();
        let command_buffers = graphics_pool.allocate(image_count)?;
        let present_buffers = match &present_pool {
            Some(pool) => Some(pool.allocate(image_count)?),
            None => None,
        };

        // Filled incrementally so Drop can release a partially built set.
        let mut resources = Self {
            targets: Vec::with_capacity(image_count),
            slots: Vec::with_capacity(FRAMES_IN_FLIGHT),
            submit_plans: submit_plans(strategy),
            current_slot: 0,
            present_pool,
            graphics_pool,
            device,
        };

        let plans = frame_plans(image_count, clear_color, strategy);
        for (index, (image, plan)) in swapchain.images.iter().zip(&plans).enumerate() {
            let attachments = [image.view];
            let framebuffer_info = vk::FramebufferCreateInfo::default()
                .render_pass(render_pass.handle)
                .attachments(&attachments)
                .width(swapchain.extent.width)
                .height(swapchain.extent.height)
                .layers(1);
            let framebuffer =
                unsafe { resources.device.create_framebuffer(&framebuffer_info, None) }
                    .map_err(FrameResourcesCreateError::FramebufferCreation)?;

            let target = FrameTarget {
                framebuffer,
                command_buffer: command_buffers[index],
                present_acquire: present_buffers.as_ref().map(|buffers| buffers[index]),
            };
            resources.targets.push(target);

            let record_target = RecordTarget {
                render_pass: render_pass.handle,
                framebuffer,
                pipeline: pipeline.handle,
                extent: swapchain.extent,
                image: image.handle,
            };
            resources.graphics_pool.record(
                command_buffers[index],
                &plan.graphics,
                &record_target,
            )?;
            if let (Some(pool), Some(buffers), Some(acquire)) = (
                &resources.present_pool,
                &present_buffers,
                &plan.present_acquire,
            ) {
                pool.record(buffers[index], acquire, &record_target)?;
            }
        }

        for _ in 0..FRAMES_IN_FLIGHT {
            let slot = resources.create_slot(strategy.is_split())?;
            resources.slots.push(slot);
        }

        debug_assert_eq!(resources.targets.len(), swapchain.images.len());
        log::debug!(
            "recorded {} command buffer(s), {} frame slot(s)",
            resources.targets.len(),
            resources.slots.len()
        );

        Ok(resources)
    }

    fn create_slot(&self, split: bool) -> Result<FrameSlot, FrameResourcesCreateError> {
        let semaphore_info = vk::SemaphoreCreateInfo::default();
        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);

        let create_semaphore = || {
            unsafe { self.device.create_semaphore(&semaphore_info, None) }
                .map_err(FrameResourcesCreateError::SyncObjectCreation)
        };

        // Objects created before a failure are released by hand, the slot does not exist yet.
        let image_available = create_semaphore()?;
        let render_finished = match create_semaphore() {
            Ok(semaphore) => semaphore,
            Err(err) => {
                unsafe { self.device.destroy_semaphore(image_available, None) };
                return Err(err);
            }
        };
        let ownership_released = if split {
            match create_semaphore() {
                Ok(semaphore) => Some(semaphore),
                Err(err) => {
                    unsafe { self.device.destroy_semaphore(image_available, None) };
                    unsafe { self.device.destroy_semaphore(render_finished, None) };
                    return Err(err);
                }
            }
        } else {
            None
        };
        let in_flight = match unsafe { self.device.create_fence(&fence_info, None) } {
            Ok(fence) => fence,
            Err(err) => {
                unsafe { self.device.destroy_semaphore(image_available, None) };
                unsafe { self.device.destroy_semaphore(render_finished, None) };
                if let Some(semaphore) = ownership_released {
                    unsafe { self.device.destroy_semaphore(semaphore, None) };
                }
                return Err(FrameResourcesCreateError::SyncObjectCreation(err));
            }
        };

        Ok(FrameSlot {
            image_available,
            render_finished,
            ownership_released,
            in_flight,
        })
    }

    pub fn current_slot(&self) -> &FrameSlot {
        &self.slots[self.current_slot]
    }

    pub fn advance_slot(&mut self) {
        self.current_slot = (self.current_slot + 1) % self.slots.len();
    }

    pub fn target(&self, image_index: u32) -> &FrameTarget {
        &self.targets[image_index as usize]
    }
}

impl Drop for FrameResources {
    fn drop(&mut self) {
        log::debug!("destroying frame resources");
        for slot in &self.slots {
            unsafe {
                self.device.destroy_fence(slot.in_flight, None);
                self.device.destroy_semaphore(slot.image_available, None);
                self.device.destroy_semaphore(slot.render_finished, None);
                if let Some(semaphore) = slot.ownership_released {
                    self.device.destroy_semaphore(semaphore, None);
                }
            }
        }
        for target in &self.targets {
            unsafe { self.device.destroy_framebuffer(target.framebuffer, None) };
        }
        // the pools drop right after, taking their command buffers with them
    }
}
