use thiserror::Error;
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowAttributes, WindowId},
};

use crate::gfx::{
    context::{Context, ContextCreateError, ContextCreateInfo, RenderError},
    frame_loop::{FrameLoop, FrameState},
};

#[derive(Debug, Clone)]
pub struct WindowCreationInfo {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowCreationInfo {
    fn default() -> Self {
        Self {
            title: "Vulkan Window".to_owned(),
            width: 1280,
            height: 720,
        }
    }
}

impl From<WindowCreationInfo> for WindowAttributes {
    fn from(value: WindowCreationInfo) -> Self {
        Self::default()
            .with_title(value.title)
            .with_inner_size(PhysicalSize::new(value.width, value.height))
            .with_resizable(false)
    }
}

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("event loop creation failed")]
    EventLoopCreation(winit::error::EventLoopError),

    #[error("application run failed")]
    Run(winit::error::EventLoopError),

    #[error("window creation failed")]
    WindowCreation(#[from] winit::error::OsError),

    #[error("graphics context initialization failed")]
    Init(#[from] ContextCreateError),

    #[error("frame rendering failed")]
    Render(#[from] RenderError),
}

pub struct Application {
    window_info: WindowCreationInfo,
    context_info: ContextCreateInfo,
    frame_loop: FrameLoop,

    // the context renders to the window and has to go first
    context: Option<Context>,
    window: Option<Window>,

    failure: Option<ApplicationError>,
}

impl Application {
    pub fn build(window_info: WindowCreationInfo, context_info: ContextCreateInfo) -> Self {
        Self {
            window_info,
            context_info,
            frame_loop: FrameLoop::new(),
            context: None,
            window: None,
            failure: None,
        }
    }

    /// Blocks until the window is closed or a fatal error happened.
    pub fn run(mut self) -> Result<(), ApplicationError> {
        let event_loop = EventLoop::new().map_err(ApplicationError::EventLoopCreation)?;

        event_loop.set_control_flow(ControlFlow::Poll);
        event_loop
            .run_app(&mut self)
            .map_err(ApplicationError::Run)?;

        match self.failure.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: ApplicationError) {
        log::error!("{err}");
        self.failure = Some(err);
        self.shutdown();
        event_loop.exit();
    }

    fn shutdown(&mut self) {
        // Context teardown waits for the device, then the surface's window can go.
        self.context = None;
        self.window = None;
    }
}

impl ApplicationHandler for Application {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window = match event_loop.create_window(self.window_info.clone().into()) {
            Ok(window) => window,
            Err(err) => return self.fail(event_loop, err.into()),
        };

        match Context::new(&window, &self.context_info) {
            Ok(context) => {
                let config = context.surface_config();
                let extent = context.extent();
                log::info!(
                    "rendering to {} image(s) of {}x{} in {:?}, present mode {:?}",
                    context.image_count(),
                    extent.width,
                    extent.height,
                    config.format.format,
                    config.present_mode
                );
                self.context = Some(context);
                self.window = Some(window);
            }
            Err(err) => {
                drop(window);
                self.fail(event_loop, err.into());
            }
        }
    }

    fn window_event(
        &mut self,
        _event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => self.frame_loop.request_quit(),
            WindowEvent::Resized(size) => {
                if let Some(context) = self.context.as_mut() {
                    context.set_window_extent(size.width, size.height);
                }
            }
            _ => (),
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let Some(context) = self.context.as_mut() else {
            return;
        };

        if let Some(window) = &self.window {
            window.pre_present_notify();
        }

        match self.frame_loop.iterate(context) {
            Ok(FrameState::Terminated) => {
                self.shutdown();
                event_loop.exit();
            }
            // a minimized window wakes the loop through its resize event
            Ok(_) if self.frame_loop.waiting_for_surface() => {
                event_loop.set_control_flow(ControlFlow::Wait);
            }
            Ok(_) => event_loop.set_control_flow(ControlFlow::Poll),
            Err(err) => {
                if let Err(drain_err) = self.frame_loop.drain(context) {
                    log::error!("drain after failed frame also failed: {drain_err}");
                }
                self.fail(event_loop, err.into());
            }
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(context) = self.context.as_mut() {
            if let Err(err) = self.frame_loop.drain(context) {
                log::error!("drain on exit failed: {err}");
            }
        }
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_window_is_720p() {
        let info = WindowCreationInfo::default();

        assert_eq!(info.title, "Vulkan Window");
        assert_eq!((info.width, info.height), (1280, 720));
    }

    #[test]
    fn window_is_not_resizable() {
        let attributes: WindowAttributes = WindowCreationInfo::default().into();

        assert!(!attributes.resizable);
        assert_eq!(attributes.title, "Vulkan Window");
    }
}
