//! End-to-end draw scenarios over the recording backend: the generated
//! programs and the recorded call stream are asserted in place of pixel
//! readback, which needs a live GPU context.

use std::sync::{Arc, Mutex};

use dx8gl::backend::HeadlessBackend;
use dx8gl::d3d8::{
    ClearFlags, CmpFunc, PrimitiveType, RenderStateType, StencilOp, TextureStageStateType,
    D3DTA_DIFFUSE, D3DTA_TEXTURE,
};
use dx8gl::error::S_OK;
use dx8gl::fvf::{d3dfvf_tex, D3DFVF_DIFFUSE, D3DFVF_XYZ};
use dx8gl::{Config, Direct3D8, Direct3DDevice8};

fn device_with_backend() -> (Direct3DDevice8, Arc<Mutex<HeadlessBackend>>) {
    let backend = Arc::new(Mutex::new(HeadlessBackend::new()));
    let d3d = Direct3D8::with_config(Config {
        disable_shader_cache: true,
        ..Config::default()
    });
    (d3d.create_device_with(Arc::clone(&backend)), backend)
}

/// Three XYZ|DIFFUSE vertices, blue diffuse, matching the solid-triangle
/// scenario layout (12 position bytes + packed color each).
fn triangle_vertices() -> Vec<u8> {
    let mut data = Vec::new();
    for (x, y) in [(-1.0f32, -1.0f32), (1.0, -1.0), (0.0, 1.0)] {
        data.extend_from_slice(&x.to_le_bytes());
        data.extend_from_slice(&y.to_le_bytes());
        data.extend_from_slice(&0.0f32.to_le_bytes());
        data.extend_from_slice(&0xFF00_00FFu32.to_le_bytes()); // blue, opaque
    }
    data
}

#[test]
fn solid_color_triangle() {
    let (device, backend) = device_with_backend();
    device.set_render_state(RenderStateType::Lighting as u32, 0);
    device.set_fvf(D3DFVF_XYZ | D3DFVF_DIFFUSE);

    assert_eq!(
        device.clear(ClearFlags::TARGET, 0xFFFF_FFFF, 1.0, 0),
        S_OK
    );
    assert_eq!(
        device.draw_primitive_up(
            PrimitiveType::TriangleList as u32,
            1,
            &triangle_vertices(),
            16
        ),
        S_OK
    );
    device.wait_for_idle();

    let program = device.current_program().unwrap();
    let backend = backend.lock().unwrap();
    assert_eq!(backend.counters.clears, 1);
    assert_eq!(backend.counters.draws, 1);
    assert_eq!(backend.draws[0].vertex_count, 3);
    assert_eq!(backend.draws[0].program, Some(program));

    // unlit vertex-color pipeline: diffuse passes straight through
    let (vs, fs) = backend.program_sources(program).unwrap();
    assert!(vs.contains("v_color0 = a_color;"));
    assert!(fs.contains("vec4 current = v_color0;"));
    assert!(!fs.contains("discard"));
}

#[test]
fn modulated_textured_quad() {
    let (device, backend) = device_with_backend();
    device.set_render_state(RenderStateType::Lighting as u32, 0);
    device.set_fvf(D3DFVF_XYZ | D3DFVF_DIFFUSE | d3dfvf_tex(1));

    let texture = device.create_texture(2, 2, 1).unwrap();
    device.set_texture(0, Some(texture));
    device.set_texture_stage_state(0, TextureStageStateType::ColorOp as u32, 4); // MODULATE
    device.set_texture_stage_state(0, TextureStageStateType::ColorArg1 as u32, D3DTA_TEXTURE);
    device.set_texture_stage_state(0, TextureStageStateType::ColorArg2 as u32, D3DTA_DIFFUSE);

    let vertices = vec![0u8; 4 * 24];
    assert_eq!(
        device.draw_primitive_up(PrimitiveType::TriangleStrip as u32, 2, &vertices, 24),
        S_OK
    );
    device.wait_for_idle();

    let program = device.current_program().unwrap();
    let backend = backend.lock().unwrap();
    let (_, fs) = backend.program_sources(program).unwrap();
    assert!(fs.contains("texture(u_texture[0], v_texcoord0.xy)"));
    assert!(fs.contains("(tex0.rgb * v_color0.rgb)"));
    // a texture got bound and filtered
    assert!(backend.counters.sampler_calls > 0);
}

#[test]
fn alpha_test_adds_a_discard() {
    let (device, backend) = device_with_backend();
    device.set_render_state(RenderStateType::Lighting as u32, 0);
    device.set_fvf(D3DFVF_XYZ | D3DFVF_DIFFUSE | d3dfvf_tex(1));
    let texture = device.create_texture(2, 2, 1).unwrap();
    device.set_texture(0, Some(texture));
    device.set_render_state(RenderStateType::AlphaTestEnable as u32, 1);
    device.set_render_state(RenderStateType::AlphaFunc as u32, CmpFunc::Greater as u32);
    device.set_render_state(RenderStateType::AlphaRef as u32, 0x90);

    let vertices = vec![0u8; 4 * 24];
    device.draw_primitive_up(PrimitiveType::TriangleStrip as u32, 2, &vertices, 24);
    device.wait_for_idle();

    let program = device.current_program().unwrap();
    let backend = backend.lock().unwrap();
    let (_, fs) = backend.program_sources(program).unwrap();
    assert!(fs.contains("if (!(current.a > u_alpha_ref)) discard;"));
    // the reference value rides along as a uniform, normalized to 0..1
    let alpha_ref = backend.uniform_value(program, "u_alpha_ref").unwrap();
    assert!((alpha_ref[0][0] - 0x90 as f32 / 255.0).abs() < 1e-6);
}

#[test]
fn stencil_masked_two_pass_draw() {
    let (device, backend) = device_with_backend();
    device.set_render_state(RenderStateType::Lighting as u32, 0);
    device.set_fvf(D3DFVF_XYZ | D3DFVF_DIFFUSE);

    device.clear(
        ClearFlags::TARGET | ClearFlags::STENCIL,
        0xFF00_0000,
        1.0,
        0,
    );

    // pass 1: write reference 1 where the triangle covers
    device.set_render_state(RenderStateType::StencilEnable as u32, 1);
    device.set_render_state(RenderStateType::StencilFunc as u32, CmpFunc::Always as u32);
    device.set_render_state(RenderStateType::StencilRef as u32, 1);
    device.set_render_state(
        RenderStateType::StencilPass as u32,
        StencilOp::Replace as u32,
    );
    device.draw_primitive_up(
        PrimitiveType::TriangleList as u32,
        1,
        &triangle_vertices(),
        16,
    );

    // pass 2: draw only where the stencil equals 1
    device.set_render_state(RenderStateType::StencilFunc as u32, CmpFunc::Equal as u32);
    device.set_render_state(RenderStateType::StencilPass as u32, StencilOp::Keep as u32);
    device.draw_primitive_up(
        PrimitiveType::TriangleStrip as u32,
        2,
        &vec![0u8; 4 * 16],
        16,
    );
    device.wait_for_idle();

    let backend = backend.lock().unwrap();
    assert_eq!(backend.counters.draws, 2);
    // state changes between passes reached the backend
    assert!(backend.counters.state_calls > 0);
    assert_eq!(device.validate_device(), 0);
}

#[test]
fn assembled_shader_draws_magenta() {
    let (device, backend) = device_with_backend();
    device.set_fvf(D3DFVF_XYZ);

    let (hr, handle) =
        device.create_vertex_shader_from_asm("vs.1.1\nmov oPos, v0\nmov oD0, c0\n");
    assert_eq!(hr, S_OK);
    device.set_vertex_shader(handle);
    device.set_vertex_shader_constant(0, &[[1.0, 0.0, 1.0, 1.0]]);

    device.draw_primitive(PrimitiveType::TriangleList as u32, 0, 1);
    device.wait_for_idle();

    let program = device.current_program().unwrap();
    let backend = backend.lock().unwrap();
    let (vs, fs) = backend.program_sources(program).unwrap();
    assert!(vs.contains("v_color0 = vec4(c0);"));
    // no pixel shader bound: the default pass-through is linked
    assert!(fs.contains("FragColor = v_color0;"));
    let c0 = backend.uniform_value(program, "c0").unwrap();
    assert_eq!(c0[0], [1.0, 0.0, 1.0, 1.0]);
}

#[test]
fn triangle_fan_draws_with_fan_topology() {
    let (device, backend) = device_with_backend();
    device.set_render_state(RenderStateType::Lighting as u32, 0);
    device.set_fvf(D3DFVF_XYZ | D3DFVF_DIFFUSE);
    device.draw_primitive_up(
        PrimitiveType::TriangleFan as u32,
        3,
        &vec![0u8; 5 * 16],
        16,
    );
    device.wait_for_idle();

    let backend = backend.lock().unwrap();
    assert_eq!(
        backend.draws[0].topology,
        dx8gl::backend::PrimitiveTopology::TriangleFan
    );
    // fan with 3 primitives consumes 5 vertices
    assert_eq!(backend.draws[0].vertex_count, 5);
}
