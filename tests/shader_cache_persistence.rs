//! Program binaries persist across device lifetimes: a warm disk cache
//! restores programs without recompiling.

use std::sync::{Arc, Mutex};

use dx8gl::backend::HeadlessBackend;
use dx8gl::d3d8::PrimitiveType;
use dx8gl::error::S_OK;
use dx8gl::fvf::{D3DFVF_DIFFUSE, D3DFVF_XYZ};
use dx8gl::{Config, Direct3D8, Direct3DDevice8};

fn cached_config(dir: &std::path::Path) -> Config {
    Config {
        shader_cache_dir: dir.to_path_buf(),
        synchronous_cache_writes: true,
        ..Config::default()
    }
}

fn device_with(
    config: Config,
) -> (Direct3DDevice8, Arc<Mutex<HeadlessBackend>>) {
    let backend = Arc::new(Mutex::new(HeadlessBackend::new()));
    let d3d = Direct3D8::with_config(config);
    (d3d.create_device_with(Arc::clone(&backend)), backend)
}

fn draw_fixed_function(device: &Direct3DDevice8) {
    device.set_render_state(dx8gl::d3d8::RenderStateType::Lighting as u32, 0);
    device.set_fvf(D3DFVF_XYZ | D3DFVF_DIFFUSE);
    assert_eq!(
        device.draw_primitive_up(
            PrimitiveType::TriangleList as u32,
            1,
            &vec![0u8; 3 * 16],
            16
        ),
        S_OK
    );
    device.wait_for_idle();
}

#[test]
fn second_device_restores_from_disk() {
    let dir = tempfile::tempdir().unwrap();

    let compiled_first = {
        let (device, backend) = device_with(cached_config(dir.path()));
        draw_fixed_function(&device);
        let stats = device.cache_statistics().unwrap();
        assert_eq!(stats.disk_entries, 1);
        let count = backend.lock().unwrap().counters.shaders_compiled;
        drop(device);
        count
    };
    assert!(compiled_first > 0);

    // cold process, warm disk
    let (device, backend) = device_with(cached_config(dir.path()));
    draw_fixed_function(&device);
    let backend = backend.lock().unwrap();
    assert_eq!(backend.counters.shaders_compiled, 0);
    assert_eq!(backend.counters.binary_loads, 1);
}

#[test]
fn disabled_cache_always_compiles() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = cached_config(dir.path());
    config.disable_shader_cache = true;

    {
        let (device, _) = device_with(config.clone());
        draw_fixed_function(&device);
        assert!(device.cache_statistics().is_none());
    }

    let (device, backend) = device_with(config);
    draw_fixed_function(&device);
    assert!(backend.lock().unwrap().counters.shaders_compiled > 0);
}

#[test]
fn context_change_invalidates_entries() {
    let dir = tempfile::tempdir().unwrap();
    {
        let (device, _) = device_with(cached_config(dir.path()));
        draw_fixed_function(&device);
    }

    // a backend reporting different version/extension hashes must not see
    // the stored binaries
    let other_caps = dx8gl::backend::BackendCaps {
        program_binaries: true,
        anisotropic_filtering: true,
        sampler_lod_bias: true,
        native_triangle_fan: true,
        gl_version_hash: 0xDEAD,
        extension_hash: 0xBEEF,
    };
    let backend = Arc::new(Mutex::new(HeadlessBackend::with_caps(other_caps)));
    let d3d = Direct3D8::with_config(cached_config(dir.path()));
    let device = d3d.create_device_with(Arc::clone(&backend));
    draw_fixed_function(&device);
    let backend = backend.lock().unwrap();
    assert_eq!(backend.counters.binary_loads, 0);
    assert!(backend.counters.shaders_compiled > 0);
}
