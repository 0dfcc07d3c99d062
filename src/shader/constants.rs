//! Shader constant storage and batched upload.
//!
//! Constants are shadowed on the CPU and flushed once per draw: the dirty
//! bitmap is scanned for maximal contiguous runs and each run becomes a
//! single ranged backend upload, so ten consecutive `set` calls cost one
//! call into the backend.

use std::sync::Mutex;

use thiserror::Error;

use crate::backend::{RenderBackend, UniformLocation};
use crate::d3d8::Matrix;

pub const FLOAT_REGISTERS: usize = 96;
pub const INT_REGISTERS: usize = 16;
pub const BOOL_REGISTERS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("constant register range {start}..{end} exceeds {max}")]
pub struct ConstantRangeError {
    pub start: usize,
    pub end: usize,
    pub max: usize,
}

/// Cached uniform locations a program exposes for the shadowed registers.
/// `None` means the program does not contain the uniform; uploads skip it.
#[derive(Clone)]
pub struct ConstantLocations {
    pub float_regs: [Option<UniformLocation>; FLOAT_REGISTERS],
    pub int_regs: [Option<UniformLocation>; INT_REGISTERS],
    pub bool_regs: [Option<UniformLocation>; BOOL_REGISTERS],
}

impl Default for ConstantLocations {
    fn default() -> ConstantLocations {
        ConstantLocations {
            float_regs: [None; FLOAT_REGISTERS],
            int_regs: [None; INT_REGISTERS],
            bool_regs: [None; BOOL_REGISTERS],
        }
    }
}

#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
pub struct UploadMetrics {
    /// Ranged backend calls issued.
    pub uploads: usize,
    /// Registers examined while scanning dirty bitmaps.
    pub registers_scanned: usize,
    /// Payload bytes handed to the backend.
    pub bytes_uploaded: usize,
    /// Registers written through `set_*` since the last reset.
    pub constants_set: usize,
}

struct Inner {
    floats: [[f32; 4]; FLOAT_REGISTERS],
    ints: [[i32; 4]; INT_REGISTERS],
    bools: [bool; BOOL_REGISTERS],
    float_dirty: [u32; 3],
    int_dirty: u32,
    bool_dirty: u32,
    metrics: UploadMetrics,
}

/// Thread-safe constant shadow. The mutex allows the submit thread to
/// flush while the application thread keeps setting values.
pub struct ShaderConstantManager {
    inner: Mutex<Inner>,
}

impl ShaderConstantManager {
    pub fn new() -> ShaderConstantManager {
        ShaderConstantManager {
            inner: Mutex::new(Inner {
                floats: [[0.0; 4]; FLOAT_REGISTERS],
                ints: [[0; 4]; INT_REGISTERS],
                bools: [false; BOOL_REGISTERS],
                float_dirty: [0; 3],
                int_dirty: 0,
                bool_dirty: 0,
                metrics: UploadMetrics::default(),
            }),
        }
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.floats = [[0.0; 4]; FLOAT_REGISTERS];
        inner.ints = [[0; 4]; INT_REGISTERS];
        inner.bools = [false; BOOL_REGISTERS];
        inner.float_dirty = [0; 3];
        inner.int_dirty = 0;
        inner.bool_dirty = 0;
    }

    pub fn set_float(&self, start: usize, values: &[[f32; 4]]) -> Result<(), ConstantRangeError> {
        check_range(start, values.len(), FLOAT_REGISTERS)?;
        let mut inner = self.inner.lock().unwrap();
        for (i, v) in values.iter().enumerate() {
            inner.floats[start + i] = *v;
            mark_dirty96(&mut inner.float_dirty, start + i);
        }
        inner.metrics.constants_set += values.len();
        Ok(())
    }

    pub fn set_int(&self, start: usize, values: &[[i32; 4]]) -> Result<(), ConstantRangeError> {
        check_range(start, values.len(), INT_REGISTERS)?;
        let mut inner = self.inner.lock().unwrap();
        for (i, v) in values.iter().enumerate() {
            inner.ints[start + i] = *v;
            inner.int_dirty |= 1 << (start + i);
        }
        inner.metrics.constants_set += values.len();
        Ok(())
    }

    pub fn set_bool(&self, start: usize, values: &[bool]) -> Result<(), ConstantRangeError> {
        check_range(start, values.len(), BOOL_REGISTERS)?;
        let mut inner = self.inner.lock().unwrap();
        for (i, v) in values.iter().enumerate() {
            inner.bools[start + i] = *v;
            inner.bool_dirty |= 1 << (start + i);
        }
        inner.metrics.constants_set += values.len();
        Ok(())
    }

    /// A matrix occupies four consecutive float registers, one row each;
    /// `transpose` stores columns instead.
    pub fn set_matrix(
        &self,
        start: usize,
        matrix: &Matrix,
        transpose: bool,
    ) -> Result<(), ConstantRangeError> {
        let m = if transpose {
            matrix.transposed()
        } else {
            *matrix
        };
        self.set_float(start, &m.m)
    }

    pub fn get_float(&self, start: usize, count: usize) -> Result<Vec<[f32; 4]>, ConstantRangeError> {
        check_range(start, count, FLOAT_REGISTERS)?;
        let inner = self.inner.lock().unwrap();
        Ok(inner.floats[start..start + count].to_vec())
    }

    pub fn get_int(&self, start: usize, count: usize) -> Result<Vec<[i32; 4]>, ConstantRangeError> {
        check_range(start, count, INT_REGISTERS)?;
        let inner = self.inner.lock().unwrap();
        Ok(inner.ints[start..start + count].to_vec())
    }

    pub fn get_bool(&self, start: usize, count: usize) -> Result<Vec<bool>, ConstantRangeError> {
        check_range(start, count, BOOL_REGISTERS)?;
        let inner = self.inner.lock().unwrap();
        Ok(inner.bools[start..start + count].to_vec())
    }

    /// Snapshot of every float register; used by state-block capture.
    pub fn float_snapshot(&self) -> [[f32; 4]; FLOAT_REGISTERS] {
        self.inner.lock().unwrap().floats
    }

    /// Flush dirty registers: one ranged upload per maximal contiguous
    /// dirty run, split only where the program lacks the uniform.
    pub fn upload_dirty(&self, backend: &mut dyn RenderBackend, locations: &ConstantLocations) {
        let mut inner = self.inner.lock().unwrap();
        let inner = &mut *inner;

        // float runs
        let mut reg = 0usize;
        while reg < FLOAT_REGISTERS {
            inner.metrics.registers_scanned += 1;
            if !is_dirty96(&inner.float_dirty, reg) {
                reg += 1;
                continue;
            }
            let run_start = reg;
            while reg < FLOAT_REGISTERS && is_dirty96(&inner.float_dirty, reg) {
                reg += 1;
            }
            inner.metrics.registers_scanned += reg - run_start - 1;
            upload_float_run(
                backend,
                locations,
                &inner.floats,
                run_start,
                reg - run_start,
                &mut inner.metrics,
            );
        }
        inner.float_dirty = [0; 3];

        // int runs, split on missing locations like the float path
        let mut reg = 0usize;
        while reg < INT_REGISTERS {
            if inner.int_dirty & 1 << reg == 0 {
                reg += 1;
                continue;
            }
            let run_start = reg;
            while reg < INT_REGISTERS && inner.int_dirty & 1 << reg != 0 {
                reg += 1;
            }
            let mut i = run_start;
            while i < reg {
                if locations.int_regs[i].is_none() {
                    i += 1;
                    continue;
                }
                let sub_start = i;
                let loc = locations.int_regs[sub_start].unwrap();
                while i < reg && locations.int_regs[i].is_some() {
                    i += 1;
                }
                backend.set_uniform_ivec4_array(loc, &inner.ints[sub_start..i]);
                inner.metrics.uploads += 1;
                inner.metrics.bytes_uploaded += 16 * (i - sub_start);
            }
        }
        inner.int_dirty = 0;

        // bool runs
        let mut reg = 0usize;
        while reg < BOOL_REGISTERS {
            if inner.bool_dirty & 1 << reg == 0 {
                reg += 1;
                continue;
            }
            let run_start = reg;
            while reg < BOOL_REGISTERS && inner.bool_dirty & 1 << reg != 0 {
                reg += 1;
            }
            let mut i = run_start;
            while i < reg {
                if locations.bool_regs[i].is_none() {
                    i += 1;
                    continue;
                }
                let sub_start = i;
                let loc = locations.bool_regs[sub_start].unwrap();
                while i < reg && locations.bool_regs[i].is_some() {
                    i += 1;
                }
                let values: Vec<i32> = inner.bools[sub_start..i]
                    .iter()
                    .map(|b| *b as i32)
                    .collect();
                backend.set_uniform_int_array(loc, &values);
                inner.metrics.uploads += 1;
                inner.metrics.bytes_uploaded += 4 * (i - sub_start);
            }
        }
        inner.bool_dirty = 0;
    }

    /// Mark every register dirty, then flush. Used after a program switch
    /// so the new program sees the full shadow.
    pub fn upload_all(&self, backend: &mut dyn RenderBackend, locations: &ConstantLocations) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.float_dirty = [u32::MAX, u32::MAX, u32::MAX];
            inner.int_dirty = (1 << INT_REGISTERS) - 1;
            inner.bool_dirty = (1 << BOOL_REGISTERS) - 1;
        }
        self.upload_dirty(backend, locations);
    }

    pub fn metrics(&self) -> UploadMetrics {
        self.inner.lock().unwrap().metrics
    }

    pub fn reset_metrics(&self) {
        self.inner.lock().unwrap().metrics = UploadMetrics::default();
    }
}

impl Default for ShaderConstantManager {
    fn default() -> Self {
        ShaderConstantManager::new()
    }
}

fn check_range(start: usize, count: usize, max: usize) -> Result<(), ConstantRangeError> {
    if start + count > max || count == 0 {
        return Err(ConstantRangeError {
            start,
            end: start + count,
            max,
        });
    }
    Ok(())
}

fn mark_dirty96(bits: &mut [u32; 3], reg: usize) {
    bits[reg / 32] |= 1 << (reg % 32);
}

fn is_dirty96(bits: &[u32; 3], reg: usize) -> bool {
    bits[reg / 32] & 1 << (reg % 32) != 0
}

fn upload_float_run(
    backend: &mut dyn RenderBackend,
    locations: &ConstantLocations,
    floats: &[[f32; 4]; FLOAT_REGISTERS],
    start: usize,
    count: usize,
    metrics: &mut UploadMetrics,
) {
    // split only where the program lacks the uniform
    let mut i = start;
    let end = start + count;
    while i < end {
        if locations.float_regs[i].is_none() {
            i += 1;
            continue;
        }
        let sub_start = i;
        let loc = locations.float_regs[sub_start].unwrap();
        while i < end && locations.float_regs[i].is_some() {
            i += 1;
        }
        backend.set_uniform_vec4_array(loc, &floats[sub_start..i]);
        metrics.uploads += 1;
        metrics.bytes_uploaded += 16 * (i - sub_start);
    }
}
