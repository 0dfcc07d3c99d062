//! Program cache behaviour across vertex/pixel shader pairs, driven
//! through the public device surface.

use std::sync::{Arc, Mutex};

use dx8gl::backend::HeadlessBackend;
use dx8gl::d3d8::PrimitiveType;
use dx8gl::error::S_OK;
use dx8gl::fvf::D3DFVF_XYZ;
use dx8gl::{Config, Direct3D8, Direct3DDevice8};

fn device_with_backend() -> (Direct3DDevice8, Arc<Mutex<HeadlessBackend>>) {
    let backend = Arc::new(Mutex::new(HeadlessBackend::new()));
    let d3d = Direct3D8::with_config(Config {
        disable_shader_cache: true,
        ..Config::default()
    });
    (d3d.create_device_with(Arc::clone(&backend)), backend)
}

fn draw(device: &Direct3DDevice8) {
    assert_eq!(
        device.draw_primitive(PrimitiveType::TriangleList as u32, 0, 1),
        S_OK
    );
    device.wait_for_idle();
}

const VS_A: &str = "vs.1.1\nmov oPos, v0\nmov oD0, c0\n";
const VS_B: &str = "vs.1.1\nmov oPos, v0\nmov oD0, v2\n";
const PS_A: &str = "ps.1.1\nmov r0, v0\n";
const PS_B: &str = "ps.1.1\nmov r0, 1-v0\n";

#[test]
fn every_half_combination_gets_its_own_program() {
    let (device, _backend) = device_with_backend();
    device.set_fvf(D3DFVF_XYZ);

    let (_, vs_a) = device.create_vertex_shader_from_asm(VS_A);
    let (_, vs_b) = device.create_vertex_shader_from_asm(VS_B);
    let (_, ps_a) = device.create_pixel_shader_from_asm(PS_A);
    let (_, ps_b) = device.create_pixel_shader_from_asm(PS_B);

    let mut programs = Vec::new();
    for (vs, ps) in [
        (vs_a, 0),
        (vs_a, ps_a),
        (vs_a, ps_b),
        (vs_b, ps_a),
        (vs_b, ps_b),
    ] {
        device.set_vertex_shader(vs);
        device.set_pixel_shader(ps);
        draw(&device);
        programs.push(device.current_program().unwrap());
    }

    // all five combinations are distinct
    for i in 0..programs.len() {
        for j in i + 1..programs.len() {
            assert_ne!(programs[i], programs[j], "combo {} vs {}", i, j);
        }
    }
    assert_eq!(device.cached_program_count(), 5);
}

#[test]
fn rebinding_the_same_pair_relinks_nothing() {
    let (device, backend) = device_with_backend();
    device.set_fvf(D3DFVF_XYZ);
    let (_, vs) = device.create_vertex_shader_from_asm(VS_A);
    let (_, ps) = device.create_pixel_shader_from_asm(PS_A);

    device.set_vertex_shader(vs);
    device.set_pixel_shader(ps);
    draw(&device);
    let first = device.current_program().unwrap();
    let linked = backend.lock().unwrap().counters.programs_linked;

    // unbind, rebind, draw again
    device.set_pixel_shader(0);
    draw(&device);
    device.set_pixel_shader(ps);
    draw(&device);

    assert_eq!(device.current_program(), Some(first));
    // only the vs+default pairing added one link
    assert_eq!(backend.lock().unwrap().counters.programs_linked, linked + 1);
}

#[test]
fn broken_bytecode_still_yields_a_usable_handle() {
    let (device, backend) = device_with_backend();
    device.set_fvf(D3DFVF_XYZ);

    // ps_1_4 texld syntax inside a ps_1_1 shader: version mismatch
    let (hr, handle) = device.create_pixel_shader_from_asm("ps.1.1\ntexld r0, r1\n");
    assert!(hr.is_failure());
    assert_ne!(handle, 0);

    let (_, vs) = device.create_vertex_shader_from_asm(VS_A);
    device.set_vertex_shader(vs);
    // the application ignores the error and binds anyway
    assert_eq!(device.set_pixel_shader(handle), S_OK);
    draw(&device);

    let program = device.current_program().unwrap();
    let backend = backend.lock().unwrap();
    let (_, fs) = backend.program_sources(program).unwrap();
    // the stub renders the constant error colour instead of crashing
    assert!(fs.contains("vec4(1.0, 0.0, 1.0, 1.0)"));
}

#[test]
fn attribute_bindings_are_applied_before_linking() {
    let (device, backend) = device_with_backend();
    device.set_fvf(D3DFVF_XYZ);
    let (_, vs) = device.create_vertex_shader_from_asm(VS_A);
    device.set_vertex_shader(vs);
    draw(&device);

    let program = device.current_program().unwrap();
    let backend = backend.lock().unwrap();
    let bindings = backend.attribute_bindings(program).unwrap();
    assert!(bindings.contains(&("a_position".to_string(), 0)));
    assert!(bindings.contains(&("a_normal".to_string(), 1)));
    assert!(bindings.contains(&("a_color".to_string(), 2)));
    assert!(bindings.contains(&("a_texcoord0".to_string(), 3)));
}
