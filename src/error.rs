//! Status words and typed errors.
//!
//! The public D3D8 surface reports bit-exact HRESULT values; everything
//! behind it uses ordinary `Result`s and converts at the boundary.

use std::fmt;

use thiserror::Error;

/// 32-bit COM-style status word. High bit set means failure.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct HResult(pub u32);

pub const S_OK: HResult = HResult(0x0000_0000);
pub const E_FAIL: HResult = HResult(0x8000_4005);
pub const D3DERR_INVALIDCALL: HResult = HResult(0x8876_086C);
pub const D3DERR_OUTOFVIDEOMEMORY: HResult = HResult(0x8876_0005);
pub const D3DERR_DEVICELOST: HResult = HResult(0x8876_0868);
pub const D3DERR_DEVICENOTRESET: HResult = HResult(0x8876_0869);
pub const D3DERR_NOTAVAILABLE: HResult = HResult(0x8876_086A);
pub const D3DERR_NOTFOUND: HResult = HResult(0x8876_0866);
pub const D3DERR_DRIVERINTERNALERROR: HResult = HResult(0x8876_0827);

impl HResult {
    #[inline]
    pub fn is_success(self) -> bool {
        self.0 & 0x8000_0000 == 0
    }

    #[inline]
    pub fn is_failure(self) -> bool {
        !self.is_success()
    }
}

impl fmt::Debug for HResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            S_OK => "S_OK",
            E_FAIL => "E_FAIL",
            D3DERR_INVALIDCALL => "D3DERR_INVALIDCALL",
            D3DERR_OUTOFVIDEOMEMORY => "D3DERR_OUTOFVIDEOMEMORY",
            D3DERR_DEVICELOST => "D3DERR_DEVICELOST",
            D3DERR_DEVICENOTRESET => "D3DERR_DEVICENOTRESET",
            D3DERR_NOTAVAILABLE => "D3DERR_NOTAVAILABLE",
            D3DERR_NOTFOUND => "D3DERR_NOTFOUND",
            D3DERR_DRIVERINTERNALERROR => "D3DERR_DRIVERINTERNALERROR",
            _ => return write!(f, "HResult({:#010x})", self.0),
        };
        f.write_str(name)
    }
}

/// Errors raised while decoding a D3D8 shader token stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BytecodeError {
    #[error("bytecode stream truncated at token {0}")]
    Truncated(usize),
    #[error("unknown shader version token {0:#010x}")]
    UnknownVersion(u32),
    #[error("instruction at token {0} has zero length")]
    ZeroLength(usize),
    #[error("missing end token")]
    MissingEndToken,
    #[error("token {0:#010x} is not a parameter token")]
    BadParameter(u32),
}

/// Errors recorded by the shader translator. All of these are non-fatal:
/// the translator substitutes a stub shader and keeps going.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranslateError {
    #[error("unsupported opcode {0:#06x}")]
    UnsupportedOpcode(u32),
    #[error("instruction not valid for shader version {version:#010x}: {what}")]
    VersionMismatch { version: u32, what: String },
    #[error("invalid register reference: {0}")]
    InvalidRegister(String),
    #[error("malformed bytecode: {0}")]
    MalformedBytecode(#[from] BytecodeError),
}

/// Errors surfaced by backend objects (compile, link, binary upload).
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("shader compilation failed: {0}")]
    Compile(String),
    #[error("program link failed: {0}")]
    Link(String),
    #[error("program binaries not supported by this backend")]
    BinariesUnsupported,
    #[error("program binary rejected: {0}")]
    BadBinary(String),
}

/// Errors from the on-disk shader binary cache.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache entry size changed for {hash}: stored {stored}, new {new}")]
    SizeMismatch { hash: String, stored: usize, new: usize },
    #[error("cache entry has incompatible header")]
    BadHeader,
    #[error("cache entry was built for a different context")]
    ContextMismatch,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hresult_values_are_bit_exact() {
        assert_eq!(S_OK.0, 0x0000_0000);
        assert_eq!(E_FAIL.0, 0x8000_4005);
        assert_eq!(D3DERR_INVALIDCALL.0, 0x8876_086C);
        assert_eq!(D3DERR_OUTOFVIDEOMEMORY.0, 0x8876_0005);
        assert_eq!(D3DERR_DEVICELOST.0, 0x8876_0868);
        assert_eq!(D3DERR_NOTAVAILABLE.0, 0x8876_086A);
        assert_eq!(D3DERR_NOTFOUND.0, 0x8876_0866);
    }

    #[test]
    fn failure_follows_high_bit() {
        assert!(S_OK.is_success());
        assert!(E_FAIL.is_failure());
        assert!(D3DERR_INVALIDCALL.is_failure());
        assert!(D3DERR_DEVICELOST.is_failure());
    }
}
