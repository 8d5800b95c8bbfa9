pub(crate) mod debug;
pub(crate) mod instance;

pub mod capabilities;
pub mod commands;
pub mod context;
pub mod device;
pub mod frame;
pub mod frame_loop;
pub mod pipeline;
pub mod render_pass;
pub mod shader;
pub mod surface;
pub mod swapchain;

pub use debug::DUMCreationError;
pub use instance::InstanceCreateError;
