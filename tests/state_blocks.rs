//! State-block replay through the public device surface.

use std::sync::{Arc, Mutex};

use dx8gl::backend::HeadlessBackend;
use dx8gl::d3d8::{CmpFunc, CullMode, RenderStateType, StateBlockType};
use dx8gl::error::{D3DERR_INVALIDCALL, S_OK};
use dx8gl::{Config, Direct3D8, Direct3DDevice8};

fn device() -> Direct3DDevice8 {
    let backend = Arc::new(Mutex::new(HeadlessBackend::new()));
    Direct3D8::with_config(Config {
        disable_shader_cache: true,
        ..Config::default()
    })
    .create_device_with(backend)
}

#[test]
fn recorded_delta_replays_over_later_changes() {
    let device = device();

    // baseline S, captured completely
    device.set_render_state(RenderStateType::CullMode as u32, CullMode::Cw as u32);
    let baseline = device.create_state_block(StateBlockType::All as u32).unwrap();

    // record a delta to S'
    assert_eq!(device.begin_state_block(), S_OK);
    device.set_render_state(RenderStateType::ZFunc as u32, CmpFunc::Greater as u32);
    device.set_render_state(RenderStateType::AlphaRef as u32, 0x55);
    let delta = device.end_state_block().unwrap();

    // wander off somewhere else entirely
    device.set_render_state(RenderStateType::CullMode as u32, CullMode::None as u32);
    device.set_render_state(RenderStateType::ZFunc as u32, CmpFunc::Never as u32);
    device.set_render_state(RenderStateType::AlphaRef as u32, 0x01);

    // restore S, then replay the delta: captured subset lands on S',
    // everything else stays at S
    assert_eq!(device.apply_state_block(baseline), S_OK);
    assert_eq!(device.apply_state_block(delta), S_OK);

    assert_eq!(
        device.get_render_state(RenderStateType::ZFunc as u32),
        Ok(CmpFunc::Greater as u32)
    );
    assert_eq!(
        device.get_render_state(RenderStateType::AlphaRef as u32),
        Ok(0x55)
    );
    assert_eq!(
        device.get_render_state(RenderStateType::CullMode as u32),
        Ok(CullMode::Cw as u32)
    );
}

#[test]
fn vertex_block_carries_the_vertex_shader_binding() {
    let device = device();
    let (hr, handle) =
        device.create_vertex_shader_from_asm("vs.1.1\nmov oPos, v0\nmov oD0, c0\n");
    assert_eq!(hr, S_OK);
    device.set_vertex_shader(handle);
    device.set_vertex_shader_constant(3, &[[9.0, 8.0, 7.0, 6.0]]);

    let token = device
        .create_state_block(StateBlockType::VertexState as u32)
        .unwrap();

    device.set_vertex_shader(0);
    device.set_vertex_shader_constant(3, &[[0.0; 4]]);
    assert_eq!(device.get_vertex_shader(), 0);

    assert_eq!(device.apply_state_block(token), S_OK);
    assert_eq!(device.get_vertex_shader(), handle);
    assert_eq!(
        device.get_vertex_shader_constant(3, 1).unwrap()[0],
        [9.0, 8.0, 7.0, 6.0]
    );
}

#[test]
fn capture_refreshes_an_existing_block() {
    let device = device();
    device.set_render_state(RenderStateType::AlphaRef as u32, 0x10);
    let token = device.create_state_block(StateBlockType::All as u32).unwrap();

    device.set_render_state(RenderStateType::AlphaRef as u32, 0x20);
    assert_eq!(device.capture_state_block(token), S_OK);

    device.set_render_state(RenderStateType::AlphaRef as u32, 0x30);
    device.apply_state_block(token);
    assert_eq!(
        device.get_render_state(RenderStateType::AlphaRef as u32),
        Ok(0x20)
    );
}

#[test]
fn deleted_tokens_are_invalid() {
    let device = device();
    let token = device.create_state_block(StateBlockType::All as u32).unwrap();
    assert_eq!(device.delete_state_block(token), S_OK);
    assert_eq!(device.apply_state_block(token), D3DERR_INVALIDCALL);
    assert_eq!(device.delete_state_block(token), D3DERR_INVALIDCALL);
    assert_eq!(device.capture_state_block(token), D3DERR_INVALIDCALL);
}

#[test]
fn end_without_begin_is_invalid() {
    let device = device();
    assert!(device.end_state_block().is_err());
    assert_eq!(device.begin_state_block(), S_OK);
    assert_eq!(device.begin_state_block(), D3DERR_INVALIDCALL);
    assert!(device.end_state_block().is_ok());
}
