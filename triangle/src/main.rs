mod logging;

use std::{error::Error, path::PathBuf, process::ExitCode};

use kiln::{application, ash::vk, gfx::context::ContextCreateInfo};

fn get_version() -> u32 {
    let mut version_numbers = env!("CARGO_PKG_VERSION")
        .split('.')
        .map(|value| value.parse::<u32>().unwrap_or(0))
        .chain(std::iter::repeat(0));
    let mut next = || version_numbers.next().unwrap_or(0);
    vk::make_api_version(0, next(), next(), next())
}

fn report(err: &dyn Error) {
    log::error!("{err}");
    let mut source = err.source();
    while let Some(cause) = source {
        log::error!("\tcaused by: {cause}");
        source = cause.source();
    }
}

fn main() -> ExitCode {
    let _logger_handle = match logging::init() {
        Ok(handle) => handle,
        Err(err) => {
            eprintln!("failed to set up logging: {err}");
            return ExitCode::FAILURE;
        }
    };

    let window_info = application::WindowCreationInfo::default();
    let context_info = ContextCreateInfo {
        application_name: c"triangle".to_owned(),
        application_version: get_version(),
        shader_dir: PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders")),
        ..Default::default()
    };

    match application::Application::build(window_info, context_info).run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report(&err);
            ExitCode::FAILURE
        }
    }
}
