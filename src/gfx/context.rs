use std::{ffi::CString, path::PathBuf, sync::Arc};

use ash::vk;
use thiserror::Error;
use winit::{
    raw_window_handle::{HasDisplayHandle, HasWindowHandle},
    window::Window,
};

use crate::debug::ScopeTimer;

use super::{
    capabilities::{CapabilityQueryError, InstanceCapabilities},
    debug::{DUMCreationError, DUMessenger},
    device::{Device, DeviceCreateError, PhysicalDevice, PhysicalDeviceSelectError},
    frame::{
        FrameResources, FrameResourcesCreateError, FrameSlot, FrameTarget, SemaphoreRole,
        SubmitBuffer, SubmitPlan, SubmitQueue,
    },
    frame_loop::{Acquire, FrameBackend, Present},
    instance::{self, Instance, InstanceCreateError, InstanceRequest},
    pipeline::{GraphicsPipeline, PipelineCreateError},
    render_pass::{RenderPass, RenderPassCreateError},
    shader::{ShaderBinaries, ShaderReadError},
    surface::{Surface, SurfaceConfig, SurfaceCreateError, SurfaceQueryError},
    swapchain::{
        self, NextImageAcquireError, NextImageState, PresentError, PresentState, Swapchain,
        SwapchainCreateError,
    },
};

const VK_VERSION: u32 = vk::make_api_version(0, 1, 3, 0);

pub struct ContextCreateInfo {
    pub application_name: CString,
    pub application_version: u32,

    /// Directory holding `vert.spv` and `frag.spv`.
    pub shader_dir: PathBuf,

    pub preferred_surface_format: vk::SurfaceFormatKHR,
    pub preferred_present_mode: vk::PresentModeKHR,
    pub clear_color: [f32; 4],

    /// Enables the validation layer and the debug messenger when they are available.
    pub validation: bool,
}

impl Default for ContextCreateInfo {
    fn default() -> Self {
        Self {
            application_name: c"kiln".to_owned(),
            application_version: vk::make_api_version(0, 0, 1, 0),
            shader_dir: PathBuf::from("shaders"),
            preferred_surface_format: vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            preferred_present_mode: vk::PresentModeKHR::MAILBOX,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            validation: cfg!(debug_assertions),
        }
    }
}

/// Everything that is only valid for one surface size. Replaced as a whole when the
/// surface goes stale; members are declared in reverse creation order.
pub(crate) struct SurfaceEpoch {
    pub frames: FrameResources,
    pub pipeline: GraphicsPipeline,
    pub swapchain: Swapchain,
}

#[derive(Debug, Error)]
pub enum SurfaceEpochCreateError {
    #[error("surface query failed")]
    SurfaceQuery(#[from] SurfaceQueryError),

    #[error("swapchain creation failed")]
    SwapchainCreation(#[from] SwapchainCreateError),

    #[error("graphics pipeline creation failed")]
    PipelineCreation(#[from] PipelineCreateError),

    #[error("frame resources creation failed")]
    FrameResourcesCreation(#[from] FrameResourcesCreateError),
}

pub(crate) struct SurfaceEpochInfo<'a> {
    pub surface: &'a Surface,
    pub physical_device: &'a PhysicalDevice,
    pub surface_config: &'a SurfaceConfig,
    pub render_pass: &'a RenderPass,
    pub shaders: &'a ShaderBinaries,
    pub clear_color: [f32; 4],
    pub window_extent: vk::Extent2D,
}

impl SurfaceEpoch {
    /// `None` when the surface has no area, in which case nothing was created.
    pub fn create(
        device: Arc<Device>,
        info: &SurfaceEpochInfo,
        previous: Option<&Swapchain>,
    ) -> Result<Option<Self>, SurfaceEpochCreateError> {
        let capabilities = info.surface.capabilities(info.physical_device.handle)?;
        let extent = swapchain::choose_extent(&capabilities, info.window_extent);
        if extent.width == 0 || extent.height == 0 {
            return Ok(None);
        }

        let swapchain = Swapchain::create(
            device.clone(),
            info.surface.handle,
            info.surface_config,
            &capabilities,
            extent,
            previous,
        )?;
        let pipeline =
            GraphicsPipeline::create(device.clone(), info.render_pass, info.shaders, extent)?;
        let frames = FrameResources::create(
            device,
            info.render_pass,
            &pipeline,
            &swapchain,
            info.clear_color,
        )?;

        Ok(Some(Self {
            frames,
            pipeline,
            swapchain,
        }))
    }
}

pub struct Context {
    epoch: SurfaceEpoch,
    render_pass: RenderPass,
    surface_config: SurfaceConfig,

    device: Arc<Device>,
    physical_device: PhysicalDevice,
    surface: Surface,
    _du_messenger: Option<DUMessenger>,
    _instance: Instance,
    _entry: ash::Entry,

    shaders: ShaderBinaries,
    clear_color: [f32; 4],
    window_extent: vk::Extent2D,
}

#[derive(Debug, Error)]
pub enum ContextCreateError {
    #[error("shader loading failed")]
    ShaderRead(#[from] ShaderReadError),

    #[error("unable to get necessary handles from window")]
    InvalidWindow(#[from] winit::raw_window_handle::HandleError),

    #[error("vulkan library loading failed")]
    VulkanLoad(#[from] ash::LoadingError),

    #[error("instance capability query failed")]
    CapabilityQuery(#[from] CapabilityQueryError),

    #[error("instance creation failed")]
    InstanceCreation(#[from] InstanceCreateError),

    #[error("debug utils messenger creation failed")]
    DUMCreation(#[from] DUMCreationError),

    #[error("surface creation failed")]
    SurfaceCreation(#[from] SurfaceCreateError),

    #[error("physical device selection failed")]
    PhysicalDeviceSelection(#[from] PhysicalDeviceSelectError),

    #[error("logical device creation failed")]
    DeviceCreation(#[from] DeviceCreateError),

    #[error("surface format selection failed")]
    SurfaceNegotiation(#[from] SurfaceQueryError),

    #[error("render pass creation failed")]
    RenderPassCreation(#[from] RenderPassCreateError),

    #[error("surface resources creation failed")]
    SurfaceEpochCreation(#[from] SurfaceEpochCreateError),

    #[error("surface has no area")]
    ZeroSizedSurface,
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("waiting on the frame fence failed")]
    FenceWait(vk::Result),

    #[error("resetting the frame fence failed")]
    FenceReset(vk::Result),

    #[error("image acquisition failed")]
    ImageAcquisition(#[from] NextImageAcquireError),

    #[error("queue submission failed")]
    Submit(vk::Result),

    #[error("frame slot has no {0:?} semaphore")]
    MissingSemaphore(SemaphoreRole),

    #[error("frame target has no {0:?} command buffer")]
    MissingCommandBuffer(SubmitBuffer),

    #[error("swapchain presentation failed")]
    SwapchainPresent(#[from] PresentError),

    #[error("surface resources rebuild failed")]
    Rebuild(#[from] SurfaceEpochCreateError),

    #[error("waiting for the device to go idle failed")]
    WaitIdle(vk::Result),
}

impl Context {
    pub fn new(
        window: &Window,
        create_info: &ContextCreateInfo,
    ) -> Result<Self, ContextCreateError> {
        let _timer = ScopeTimer::start(log::Level::Info, "context creation");

        // Read before anything else exists, a bad binary has nothing to tear down.
        let shaders = ShaderBinaries::load(&create_info.shader_dir)?;

        let window_handle = window.window_handle()?.as_raw();
        let display_handle = window.display_handle()?.as_raw();
        let window_size = window.inner_size();
        let window_extent = vk::Extent2D {
            width: window_size.width,
            height: window_size.height,
        };

        // SAFETY: This is basically foreign code execution, and there is not way to properly ensure safety
        // here. It is unfortunately an uncontrollable risk we must accept.
        let entry = unsafe { ash::Entry::load() }?;
        let capabilities = InstanceCapabilities::enumerate(&entry)?;
        let platform_extensions = instance::required_platform_extensions(display_handle)?;
        let request =
            InstanceRequest::resolve(&platform_extensions, &capabilities, create_info.validation);
        let instance = Instance::create(
            &entry,
            &create_info.application_name,
            create_info.application_version,
            VK_VERSION,
            &request,
        )?;
        let du_messenger = if instance.debug_utils_enabled {
            Some(DUMessenger::create(&entry, &instance)?)
        } else {
            None
        };

        let surface = Surface::create(&entry, &instance, display_handle, window_handle)?;
        let physical_device = PhysicalDevice::select(&instance, &surface)?;

        // Every GPU object needs the device to destroy itself, so each of them holds a
        // reference to it.
        let device = Arc::new(Device::create(&instance, &physical_device)?);

        let surface_config = surface.negotiate(
            physical_device.handle,
            create_info.preferred_surface_format,
            create_info.preferred_present_mode,
        )?;
        let render_pass = RenderPass::create(device.clone(), surface_config.format.format)?;

        let epoch = SurfaceEpoch::create(
            device.clone(),
            &SurfaceEpochInfo {
                surface: &surface,
                physical_device: &physical_device,
                surface_config: &surface_config,
                render_pass: &render_pass,
                shaders: &shaders,
                clear_color: create_info.clear_color,
                window_extent,
            },
            None,
        )?
        .ok_or(ContextCreateError::ZeroSizedSurface)?;

        Ok(Self {
            epoch,
            render_pass,
            surface_config,

            device,
            physical_device,
            surface,
            _du_messenger: du_messenger,
            _instance: instance,
            _entry: entry,

            shaders,
            clear_color: create_info.clear_color,
            window_extent,
        })
    }

    /// Size used for the next rebuild when the surface lets the swapchain pick its extent.
    pub fn set_window_extent(&mut self, width: u32, height: u32) {
        self.window_extent = vk::Extent2D { width, height };
    }

    pub fn surface_config(&self) -> SurfaceConfig {
        self.surface_config
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.epoch.swapchain.extent
    }

    pub fn image_count(&self) -> usize {
        self.epoch.swapchain.images.len()
    }

    fn submit_frame(&self, image_index: u32) -> Result<(), RenderError> {
        let frames = &self.epoch.frames;
        let slot = frames.current_slot();
        let target = frames.target(image_index);

        // Resolved before the fence reset, a failed lookup must not leave it unsignaled.
        let submissions = frames
            .submit_plans
            .iter()
            .map(|plan| ResolvedSubmit::resolve(plan, &self.device, slot, target))
            .collect::<Result<Vec<_>, _>>()?;

        // The fence is only reset once the work that will signal it is about to be queued.
        unsafe { self.device.reset_fences(&[slot.in_flight]) }.map_err(RenderError::FenceReset)?;

        for submission in &submissions {
            let submit_info = vk::SubmitInfo::default()
                .wait_semaphores(&submission.wait_semaphores)
                .wait_dst_stage_mask(&submission.wait_stages)
                .command_buffers(&submission.command_buffers)
                .signal_semaphores(&submission.signal_semaphores);
            unsafe {
                self.device
                    .queue_submit(submission.queue, &[submit_info], submission.fence)
            }
            .map_err(RenderError::Submit)?;
        }

        Ok(())
    }
}

/// A [`SubmitPlan`] with its roles bound to the handles of one slot and image.
struct ResolvedSubmit {
    queue: vk::Queue,
    wait_semaphores: Vec<vk::Semaphore>,
    wait_stages: Vec<vk::PipelineStageFlags>,
    command_buffers: [vk::CommandBuffer; 1],
    signal_semaphores: Vec<vk::Semaphore>,
    fence: vk::Fence,
}

impl ResolvedSubmit {
    fn resolve(
        plan: &SubmitPlan,
        device: &Device,
        slot: &FrameSlot,
        target: &FrameTarget,
    ) -> Result<Self, RenderError> {
        let semaphore =
            |role: SemaphoreRole| slot.semaphore(role).ok_or(RenderError::MissingSemaphore(role));

        let queue = match plan.queue {
            SubmitQueue::Graphics => device.graphics_queue.handle,
            SubmitQueue::Present => device.present_queue.handle,
        };
        let wait_semaphores = plan
            .waits
            .iter()
            .map(|&(role, _)| semaphore(role))
            .collect::<Result<Vec<_>, _>>()?;
        let wait_stages = plan.waits.iter().map(|&(_, stage)| stage).collect();
        let command_buffer = target
            .buffer(plan.command_buffer)
            .ok_or(RenderError::MissingCommandBuffer(plan.command_buffer))?;
        let signal_semaphores = plan
            .signals
            .iter()
            .map(|&role| semaphore(role))
            .collect::<Result<Vec<_>, _>>()?;
        let fence = if plan.signals_fence {
            slot.in_flight
        } else {
            vk::Fence::null()
        };

        Ok(Self {
            queue,
            wait_semaphores,
            wait_stages,
            command_buffers: [command_buffer],
            signal_semaphores,
            fence,
        })
    }
}

impl FrameBackend for Context {
    type Error = RenderError;

    fn acquire(&mut self) -> Result<Acquire, RenderError> {
        let slot = self.epoch.frames.current_slot();
        unsafe {
            self.device
                .wait_for_fences(&[slot.in_flight], true, u64::MAX)
        }
        .map_err(RenderError::FenceWait)?;

        match self.epoch.swapchain.acquire_next_image(slot.image_available)? {
            NextImageState::Ok(index) => Ok(Acquire::Image(index)),
            NextImageState::Suboptimal(index) => {
                log::debug!("acquired image is suboptimal");
                Ok(Acquire::Image(index))
            }
            NextImageState::OutOfDate => Ok(Acquire::Stale),
        }
    }

    fn submit(&mut self, image_index: u32) -> Result<(), RenderError> {
        self.submit_frame(image_index)
    }

    fn present(&mut self, image_index: u32) -> Result<Present, RenderError> {
        let render_finished = self.epoch.frames.current_slot().render_finished;
        let state = self.epoch.swapchain.present(
            self.device.present_queue.handle,
            render_finished,
            image_index,
        )?;
        self.epoch.frames.advance_slot();

        match state {
            PresentState::Ok => Ok(Present::Presented),
            PresentState::Suboptimal => {
                log::debug!("presented image is suboptimal");
                Ok(Present::Presented)
            }
            PresentState::OutOfDate => Ok(Present::Stale),
        }
    }

    fn rebuild(&mut self) -> Result<bool, RenderError> {
        let _timer = ScopeTimer::start(log::Level::Debug, "surface resources rebuild");
        let epoch = SurfaceEpoch::create(
            self.device.clone(),
            &SurfaceEpochInfo {
                surface: &self.surface,
                physical_device: &self.physical_device,
                surface_config: &self.surface_config,
                render_pass: &self.render_pass,
                shaders: &self.shaders,
                clear_color: self.clear_color,
                window_extent: self.window_extent,
            },
            Some(&self.epoch.swapchain),
        )?;

        match epoch {
            Some(epoch) => {
                // the retired swapchain and everything built on it go away here
                self.epoch = epoch;
                log::info!(
                    "surface resources rebuilt for {}x{}",
                    self.epoch.pipeline.extent.width,
                    self.epoch.pipeline.extent.height
                );
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn wait_idle(&mut self) -> Result<(), RenderError> {
        self.device.wait_idle().map_err(RenderError::WaitIdle)
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        log::debug!("destroying context");
        // Members drop in declaration order right after this, none of them may still be in use.
        if let Err(err) = self.device.wait_idle() {
            log::error!("device wait before teardown failed: {err}");
        }
    }
}
