//! Library configuration.
//!
//! dx8gl is configured exclusively through environment variables; there is
//! no config file. Everything has a sensible default so a bare
//! `create_direct3d8` works with no environment at all.

use std::path::PathBuf;
use std::time::Duration;

/// Which platform backend the device should be created against.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BackendKind {
    OpenGl,
    Gles,
    OsMesa,
    WebGpu,
    /// In-process recording backend; used by tests and headless tooling.
    Headless,
}

impl BackendKind {
    fn parse(s: &str) -> Option<BackendKind> {
        match s.to_ascii_lowercase().as_str() {
            "opengl" | "gl" => Some(BackendKind::OpenGl),
            "gles" | "es" => Some(BackendKind::Gles),
            "osmesa" => Some(BackendKind::OsMesa),
            "webgpu" => Some(BackendKind::WebGpu),
            "headless" => Some(BackendKind::Headless),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub backend: BackendKind,
    /// Root directory of the on-disk shader binary cache.
    pub shader_cache_dir: PathBuf,
    /// Disables both cache tiers when set.
    pub disable_shader_cache: bool,
    /// Memory-tier limits.
    pub max_memory_cache_bytes: usize,
    pub max_memory_cache_entries: usize,
    /// Disk-tier limits.
    pub max_disk_cache_bytes: u64,
    pub disk_cache_ttl: Duration,
    /// Compress disk-cache payloads.
    pub compress_disk_cache: bool,
    /// Persist binaries on the calling thread instead of best-effort async.
    pub synchronous_cache_writes: bool,
    /// Dump generated shader sources and watch them for edits.
    pub shader_hot_reload: bool,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            backend: BackendKind::Headless,
            shader_cache_dir: PathBuf::from(".shader_cache"),
            disable_shader_cache: false,
            max_memory_cache_bytes: 64 * 1024 * 1024,
            max_memory_cache_entries: 1000,
            max_disk_cache_bytes: 256 * 1024 * 1024,
            disk_cache_ttl: Duration::from_secs(30 * 24 * 60 * 60),
            compress_disk_cache: true,
            synchronous_cache_writes: false,
            shader_hot_reload: false,
        }
    }
}

impl Config {
    /// Build a configuration from the `DX8GL_*` environment contract.
    pub fn from_env() -> Config {
        let mut cfg = Config::default();

        if let Ok(name) = std::env::var("DX8GL_BACKEND") {
            match BackendKind::parse(&name) {
                Some(kind) => cfg.backend = kind,
                None => warn!("DX8GL_BACKEND={:?} not recognized, keeping default", name),
            }
        }
        if let Ok(dir) = std::env::var("DX8GL_SHADER_CACHE_DIR") {
            if !dir.is_empty() {
                cfg.shader_cache_dir = PathBuf::from(dir);
            }
        }
        if let Ok(v) = std::env::var("DX8GL_DISABLE_SHADER_CACHE") {
            cfg.disable_shader_cache = !v.is_empty();
        }
        if let Ok(v) = std::env::var("DX8GL_SHADER_HOT_RELOAD") {
            cfg.shader_hot_reload = !v.is_empty();
        }
        cfg
    }
}

/// `DX8GL_LOG_LEVEL` mapped to a log filter, when present and valid.
pub fn log_level_from_env() -> Option<log::LevelFilter> {
    let raw = std::env::var("DX8GL_LOG_LEVEL").ok()?;
    match raw.to_ascii_lowercase().as_str() {
        "trace" => Some(log::LevelFilter::Trace),
        "debug" => Some(log::LevelFilter::Debug),
        "info" => Some(log::LevelFilter::Info),
        "warn" => Some(log::LevelFilter::Warn),
        "error" => Some(log::LevelFilter::Error),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_contract() {
        let cfg = Config::default();
        assert_eq!(cfg.shader_cache_dir, PathBuf::from(".shader_cache"));
        assert!(!cfg.disable_shader_cache);
        assert_eq!(cfg.disk_cache_ttl, Duration::from_secs(30 * 24 * 60 * 60));
    }

    #[test]
    fn backend_names() {
        assert_eq!(BackendKind::parse("opengl"), Some(BackendKind::OpenGl));
        assert_eq!(BackendKind::parse("GLES"), Some(BackendKind::Gles));
        assert_eq!(BackendKind::parse("osmesa"), Some(BackendKind::OsMesa));
        assert_eq!(BackendKind::parse("webgpu"), Some(BackendKind::WebGpu));
        assert_eq!(BackendKind::parse("metal"), None);
    }
}
