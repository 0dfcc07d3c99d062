//! dx8gl: a Direct3D 8 runtime on top of modern GL-class backends.
//!
//! The crate shadows the entire D3D8 device state, translates vs_1_1 /
//! ps_1_1..ps_1_4 shader bytecode into GLSL, synthesizes shaders for the
//! fixed-function pipeline, and forwards draws through a backend seam.
//! Submission order is preserved: the application thread mutates the
//! shadow and enqueues command buffers; a render thread that owns the
//! backend context drains them in FIFO order.
//!
//! The platform backends themselves (GL, GLES, OSMesa, WebGPU) live
//! behind [`backend::RenderBackend`]; this crate ships a headless
//! recording implementation used by the test suite.

#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate log;

pub mod backend;
pub mod command;
pub mod config;
pub mod d3d8;
pub mod device;
pub mod error;
pub mod fixed_function;
pub mod fvf;
pub mod render_thread;
pub mod shader;
pub mod state;

use std::sync::Once;

pub use crate::config::Config;
pub use crate::device::{create_direct3d8, Direct3D8, Direct3DDevice8};
pub use crate::error::HResult;

static LOG_INIT: Once = Once::new();

/// Initialize the logger once, honouring `DX8GL_LOG_LEVEL` when set.
///
/// Safe to call repeatedly; only the first call has any effect.
pub fn init_logging() {
    LOG_INIT.call_once(|| {
        let mut builder = pretty_env_logger::formatted_builder();
        if let Ok(spec) = std::env::var("RUST_LOG") {
            builder.parse_filters(&spec);
        } else if let Some(level) = config::log_level_from_env() {
            builder.filter_level(level);
        } else {
            builder.filter_level(log::LevelFilter::Warn);
        }
        // a second logger may already be installed by the host application
        let _ = builder.try_init();
    });
}
