use std::{fs, path::PathBuf};

use kiln::{
    ash::vk,
    gfx::{
        DUMCreationError, InstanceCreateError,
        capabilities::{self, QueueFamilyInfo, QueueStrategy},
        commands::RecordedCommand,
        context::ContextCreateError,
        frame, shader, swapchain,
    },
};

const BLACK: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

fn surface_capabilities() -> vk::SurfaceCapabilitiesKHR {
    vk::SurfaceCapabilitiesKHR {
        min_image_count: 2,
        max_image_count: 3,
        current_extent: vk::Extent2D {
            width: 1280,
            height: 720,
        },
        ..Default::default()
    }
}

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("kiln-{}-{name}", std::process::id()));
    fs::create_dir_all(&dir).expect("scratch directory should be creatable");
    dir
}

#[test]
fn window_720p_with_two_to_three_images() {
    let capabilities = surface_capabilities();
    let extent = swapchain::choose_extent(
        &capabilities,
        vk::Extent2D {
            width: 1,
            height: 1,
        },
    );
    let image_count = swapchain::choose_image_count(&capabilities);

    assert_eq!((extent.width, extent.height), (1280, 720));
    assert_eq!(image_count, 3);

    let plans = frame::frame_plans(
        image_count as usize,
        BLACK,
        QueueStrategy::Shared { family_index: 0 },
    );
    assert_eq!(plans.len(), 3);
    for plan in &plans {
        let draws: Vec<_> = plan
            .graphics
            .iter()
            .filter(|command| matches!(command, RecordedCommand::Draw { .. }))
            .collect();
        assert_eq!(
            draws,
            [&RecordedCommand::Draw {
                vertex_count: 3,
                instance_count: 1,
                first_vertex: 0,
                first_instance: 0,
            }]
        );
    }
}

#[test]
fn split_families_still_draw_once_per_image() {
    let families = [
        QueueFamilyInfo {
            index: 0,
            queue_count: 1,
            graphics: true,
            compute: true,
            transfer: true,
            protected: false,
            sparse_binding: false,
            present: false,
        },
        QueueFamilyInfo {
            index: 1,
            queue_count: 1,
            graphics: false,
            compute: false,
            transfer: true,
            protected: false,
            sparse_binding: false,
            present: true,
        },
    ];
    let strategy =
        capabilities::resolve_queue_strategy(&families).expect("two families should combine");
    assert!(strategy.is_split());

    let plans = frame::frame_plans(3, BLACK, strategy);
    for plan in &plans {
        let draw_count = plan
            .graphics
            .iter()
            .filter(|command| matches!(command, RecordedCommand::Draw { .. }))
            .count();
        assert_eq!(draw_count, 1);
        assert!(plan.present_acquire.is_some());
    }
}

#[test]
fn zero_length_shader_is_rejected_at_load() {
    let dir = scratch_dir("empty-shader");
    fs::write(dir.join(shader::VERTEX_SHADER_FILE), b"").expect("write should succeed");
    fs::write(dir.join(shader::FRAGMENT_SHADER_FILE), b"").expect("write should succeed");

    let err = shader::ShaderBinaries::load(&dir).unwrap_err();
    assert!(matches!(err, shader::ShaderReadError::Empty { .. }));

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn malformed_shader_is_rejected_at_load() {
    let dir = scratch_dir("malformed-shader");
    fs::write(dir.join(shader::VERTEX_SHADER_FILE), b"not spirv").expect("write should succeed");
    fs::write(dir.join(shader::FRAGMENT_SHADER_FILE), b"not spirv").expect("write should succeed");

    let err = shader::ShaderBinaries::load(&dir).unwrap_err();
    assert!(matches!(err, shader::ShaderReadError::BadMagic { .. }));

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn header_only_magic_is_rejected_at_load() {
    let dir = scratch_dir("truncated-shader");
    let magic = 0x0723_0203_u32.to_le_bytes();
    fs::write(dir.join(shader::VERTEX_SHADER_FILE), magic).expect("write should succeed");
    fs::write(dir.join(shader::FRAGMENT_SHADER_FILE), magic).expect("write should succeed");

    let err = shader::ShaderBinaries::load(&dir).unwrap_err();
    assert!(matches!(
        err,
        shader::ShaderReadError::Truncated { words: 1, .. }
    ));

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn instance_and_messenger_failures_can_be_matched() {
    let instance_err: ContextCreateError =
        InstanceCreateError::VulkanCreation(vk::Result::ERROR_INCOMPATIBLE_DRIVER).into();
    assert!(matches!(
        instance_err,
        ContextCreateError::InstanceCreation(InstanceCreateError::VulkanCreation(
            vk::Result::ERROR_INCOMPATIBLE_DRIVER
        ))
    ));

    let messenger_err: ContextCreateError =
        DUMCreationError::VulkanCreation(vk::Result::ERROR_OUT_OF_HOST_MEMORY).into();
    assert!(matches!(
        messenger_err,
        ContextCreateError::DUMCreation(DUMCreationError::VulkanCreation(_))
    ));
}

#[test]
fn first_device_is_selected() {
    let devices = ["discrete", "integrated", "cpu"];
    assert_eq!(capabilities::select_device(devices), Some("discrete"));
    assert_eq!(capabilities::select_device(Vec::<&str>::new()), None);
}
