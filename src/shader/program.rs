//! Shader handle managers and the linked-program cache.
//!
//! D3D8 hands out DWORD handles for vertex and pixel shaders and keeps
//! them independent; GL-class backends want a linked pair. The program
//! manager caches links keyed on the bytecode hashes of both halves
//! (pixel hash zero = the default pass-through shader) and shares its
//! cache with the fixed-function generator through a key discriminator.

use std::sync::Arc;

use fxhash::FxHashMap;

use crate::backend::{ProgramId, RenderBackend, ShaderStage, UniformLocation};
use crate::d3d8::Dword;
use crate::error::TranslateError;

use super::asm::ConstantDecl;
use super::binary_cache::{hash_string, ShaderBinaryCache};
use super::bytecode::{compute_bytecode_hash, MAX_PS_FLOAT_CONSTANTS};
use super::constants::ConstantLocations;
use super::translator::{
    self, default_pixel_shader_source, stub_shader, ShaderDialect, TranslatedShader,
};
use super::ShaderKind;

/// Everything the runtime keeps per created shader. Immutable once built.
pub struct ShaderInfo {
    pub handle: Dword,
    /// Vertex declaration tokens as supplied at creation (vertex only).
    pub declaration: Vec<Dword>,
    /// Raw function bytecode, version token through end marker.
    pub function: Vec<Dword>,
    pub bytecode_hash: u64,
    pub translated: TranslatedShader,
}

pub struct CreatedShader {
    pub handle: Dword,
    /// First translation error, when the shader was stubbed.
    pub error: Option<TranslateError>,
}

/// Allocates odd handles so they can never collide with FVF codes, which
/// always have bit 0 clear in practice.
struct HandleAllocator {
    next: Dword,
}

impl HandleAllocator {
    fn new() -> HandleAllocator {
        HandleAllocator { next: 1 }
    }

    fn allocate(&mut self) -> Dword {
        let handle = self.next;
        self.next += 2;
        handle
    }
}

pub struct VertexShaderManager {
    shaders: FxHashMap<Dword, Arc<ShaderInfo>>,
    handles: HandleAllocator,
    current: Dword,
}

impl VertexShaderManager {
    pub fn new() -> VertexShaderManager {
        VertexShaderManager {
            shaders: FxHashMap::default(),
            handles: HandleAllocator::new(),
            current: 0,
        }
    }

    /// Create a shader from a declaration plus optional function bytecode.
    /// A translation failure still registers the handle (bound later, it
    /// renders the stub), but is surfaced to the caller.
    pub fn create(
        &mut self,
        declaration: &[Dword],
        function: Option<&[Dword]>,
        dialect: &ShaderDialect,
    ) -> CreatedShader {
        let handle = self.handles.allocate();
        let (translated, function_tokens) = match function {
            Some(tokens) => (
                translator::translate_tokens(tokens, &[], dialect, false),
                tokens.to_vec(),
            ),
            None => (
                // declaration-only shader: fixed-function transform applies
                stub_shader(ShaderKind::Vertex, dialect, Vec::new()),
                Vec::new(),
            ),
        };
        let error = translated.errors.first().cloned();
        let info = ShaderInfo {
            handle,
            declaration: declaration.to_vec(),
            function: function_tokens,
            bytecode_hash: if translated.is_stub && error.is_some() {
                // a distinct hash keeps broken shaders out of good cache slots
                compute_bytecode_hash(&[handle])
            } else if function.is_some() {
                compute_bytecode_hash(function.unwrap())
            } else {
                0
            },
            translated,
        };
        debug!("created vertex shader {:#x} (hash {:016x})", handle, info.bytecode_hash);
        self.shaders.insert(handle, Arc::new(info));
        CreatedShader { handle, error }
    }

    /// Create from pre-assembled text; used by tooling and tests.
    pub fn create_from_asm(
        &mut self,
        source: &str,
        constants: &[ConstantDecl],
        dialect: &ShaderDialect,
    ) -> Result<CreatedShader, super::asm::AsmError> {
        let parsed = super::asm::parse_asm(source)?;
        let mut merged: Vec<ConstantDecl> = parsed.constants.clone();
        merged.extend_from_slice(constants);
        let tokens = parsed.to_bytecode();
        let handle = self.handles.allocate();
        let translated = translator::translate(&parsed.shader, &merged, dialect);
        let error = translated.errors.first().cloned();
        let info = ShaderInfo {
            handle,
            declaration: Vec::new(),
            bytecode_hash: compute_bytecode_hash(&tokens),
            function: tokens,
            translated,
        };
        self.shaders.insert(handle, Arc::new(info));
        Ok(CreatedShader { handle, error })
    }

    pub fn delete(&mut self, handle: Dword) -> bool {
        if self.current == handle {
            self.current = 0;
        }
        self.shaders.remove(&handle).is_some()
    }

    pub fn get(&self, handle: Dword) -> Option<&Arc<ShaderInfo>> {
        self.shaders.get(&handle)
    }

    pub fn is_programmable(&self, handle: Dword) -> bool {
        self.shaders
            .get(&handle)
            .map(|info| !info.function.is_empty())
            .unwrap_or(false)
    }

    pub fn set_current(&mut self, handle: Dword) {
        self.current = handle;
    }

    pub fn current(&self) -> Dword {
        self.current
    }

    pub fn current_info(&self) -> Option<&Arc<ShaderInfo>> {
        self.shaders.get(&self.current)
    }
}

impl Default for VertexShaderManager {
    fn default() -> Self {
        VertexShaderManager::new()
    }
}

pub struct PixelShaderManager {
    shaders: FxHashMap<Dword, Arc<ShaderInfo>>,
    handles: HandleAllocator,
    current: Dword,
}

impl PixelShaderManager {
    pub fn new() -> PixelShaderManager {
        PixelShaderManager {
            shaders: FxHashMap::default(),
            handles: HandleAllocator::new(),
            current: 0,
        }
    }

    pub fn create(&mut self, function: &[Dword], dialect: &ShaderDialect) -> CreatedShader {
        let handle = self.handles.allocate();
        let translated = translator::translate_tokens(function, &[], dialect, true);
        let error = translated.errors.first().cloned();
        let info = ShaderInfo {
            handle,
            declaration: Vec::new(),
            function: function.to_vec(),
            bytecode_hash: if error.is_some() {
                compute_bytecode_hash(&[0xFFFF_0000 | handle])
            } else {
                compute_bytecode_hash(function)
            },
            translated,
        };
        debug!("created pixel shader {:#x} (hash {:016x})", handle, info.bytecode_hash);
        self.shaders.insert(handle, Arc::new(info));
        CreatedShader { handle, error }
    }

    pub fn delete(&mut self, handle: Dword) -> bool {
        if self.current == handle {
            self.current = 0;
        }
        self.shaders.remove(&handle).is_some()
    }

    pub fn get(&self, handle: Dword) -> Option<&Arc<ShaderInfo>> {
        self.shaders.get(&handle)
    }

    pub fn set_current(&mut self, handle: Dword) {
        self.current = handle;
    }

    pub fn current(&self) -> Dword {
        self.current
    }

    pub fn current_info(&self) -> Option<&Arc<ShaderInfo>> {
        self.shaders.get(&self.current)
    }
}

impl Default for PixelShaderManager {
    fn default() -> Self {
        PixelShaderManager::new()
    }
}

// ---------------------------------------------------------------------------
// Program cache
// ---------------------------------------------------------------------------

/// `fixed_function` is the discriminator keeping FF state hashes and
/// bytecode hashes in the same cache without collisions.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ProgramKey {
    pub vs_hash: u64,
    pub ps_hash: u64,
    pub fixed_function: bool,
}

impl ProgramKey {
    pub fn programmable(vs_hash: u64, ps_hash: u64) -> ProgramKey {
        ProgramKey {
            vs_hash,
            ps_hash,
            fixed_function: false,
        }
    }

    pub fn fixed_function(state_hash: u64) -> ProgramKey {
        ProgramKey {
            vs_hash: state_hash,
            ps_hash: 0,
            fixed_function: true,
        }
    }
}

/// One linked program plus every uniform location the runtime will ever
/// ask it for.
pub struct ProgramEntry {
    pub key: ProgramKey,
    pub program: ProgramId,
    pub vs_constants: ConstantLocations,
    pub ps_constants: ConstantLocations,
    pub samplers: [Option<UniformLocation>; 8],
    pub named: FxHashMap<String, UniformLocation>,
    pub is_stub: bool,
}

impl ProgramEntry {
    pub fn uniform(&self, name: &str) -> Option<UniformLocation> {
        self.named.get(name).copied()
    }
}

const ATTRIBUTE_BINDINGS: [(&str, u32); 7] = [
    ("a_position", 0),
    ("a_normal", 1),
    ("a_color", 2),
    ("a_texcoord0", 3),
    ("a_texcoord1", 4),
    ("a_texcoord2", 5),
    ("a_texcoord3", 6),
];

/// Uniform names cached eagerly at link time.
const NAMED_UNIFORMS: [&str; 13] = [
    "u_world_matrix",
    "u_view_matrix",
    "u_projection_matrix",
    "u_world_view_proj_matrix",
    "u_normal_matrix",
    "u_viewport_size",
    "u_texture_factor",
    "u_alpha_ref",
    "u_fog_color",
    "u_fog_start",
    "u_fog_end",
    "u_fog_density",
    "u_ambient_light",
];

pub struct ShaderProgramManager {
    cache: FxHashMap<ProgramKey, Arc<ProgramEntry>>,
    current: Option<ProgramKey>,
    dialect: ShaderDialect,
}

impl ShaderProgramManager {
    pub fn new(dialect: ShaderDialect) -> ShaderProgramManager {
        ShaderProgramManager {
            cache: FxHashMap::default(),
            current: None,
            dialect,
        }
    }

    pub fn dialect(&self) -> ShaderDialect {
        self.dialect
    }

    /// Resolve the program for a vertex/pixel shader pair. Cached entries
    /// cost no backend work; otherwise the binary cache is consulted before
    /// compiling from source.
    pub fn get_program(
        &mut self,
        backend: &mut dyn RenderBackend,
        vs: &ShaderInfo,
        ps: Option<&ShaderInfo>,
        binary_cache: Option<&ShaderBinaryCache>,
    ) -> Arc<ProgramEntry> {
        let key = ProgramKey::programmable(
            vs.bytecode_hash,
            ps.map(|p| p.bytecode_hash).unwrap_or(0),
        );
        if let Some(entry) = self.cache.get(&key) {
            self.current = Some(key);
            return Arc::clone(entry);
        }

        let fs_source = match ps {
            Some(info) => info.translated.source.clone(),
            None => default_pixel_shader_source(&self.dialect),
        };
        let entry = self.link_sources(backend, key, &vs.translated.source, &fs_source, binary_cache);
        if !entry.is_stub {
            self.cache.insert(key, Arc::clone(&entry));
        }
        self.current = Some(key);
        entry
    }

    /// Fixed-function entry point; `state_hash` comes from the generator.
    pub fn get_fixed_function_program(
        &mut self,
        backend: &mut dyn RenderBackend,
        state_hash: u64,
        vs_source: &str,
        fs_source: &str,
        binary_cache: Option<&ShaderBinaryCache>,
    ) -> Arc<ProgramEntry> {
        let key = ProgramKey::fixed_function(state_hash);
        if let Some(entry) = self.cache.get(&key) {
            self.current = Some(key);
            return Arc::clone(entry);
        }
        let entry = self.link_sources(backend, key, vs_source, fs_source, binary_cache);
        if !entry.is_stub {
            self.cache.insert(key, Arc::clone(&entry));
        }
        self.current = Some(key);
        entry
    }

    /// Drop only the "currently bound" notion; cache entries persist.
    pub fn invalidate_current(&mut self) {
        self.current = None;
    }

    pub fn current_program(&self) -> Option<ProgramId> {
        self.current
            .and_then(|key| self.cache.get(&key))
            .map(|entry| entry.program)
    }

    pub fn cached_program_count(&self) -> usize {
        self.cache.len()
    }

    /// Replace a cached entry's program object after a hot-reload
    /// recompile. The entry keeps its key and uniform locations are
    /// refreshed against the new object.
    pub fn replace_program(
        &mut self,
        backend: &mut dyn RenderBackend,
        key: ProgramKey,
        program: ProgramId,
    ) {
        if let Some(slot) = self.cache.get_mut(&key) {
            let entry = build_entry(backend, key, program, false);
            *slot = Arc::new(entry);
        }
    }

    pub fn cached_keys(&self) -> Vec<ProgramKey> {
        self.cache.keys().copied().collect()
    }

    /// Destroy every cached program object. Called at device teardown on
    /// the render thread.
    pub fn clear(&mut self, backend: &mut dyn RenderBackend) {
        for (_, entry) in self.cache.drain() {
            backend.delete_program(entry.program);
        }
        self.current = None;
    }

    fn link_sources(
        &mut self,
        backend: &mut dyn RenderBackend,
        key: ProgramKey,
        vs_source: &str,
        fs_source: &str,
        binary_cache: Option<&ShaderBinaryCache>,
    ) -> Arc<ProgramEntry> {
        let cache_key = hash_string(key.vs_hash, key.ps_hash ^ (key.fixed_function as u64) << 63);

        // binary-first path
        if let Some(cache) = binary_cache {
            if backend.caps().program_binaries {
                if let Some(binary) = cache.load(&cache_key) {
                    match backend.load_program_binary(&binary) {
                        Ok(program) => {
                            debug!("program {} restored from binary cache", cache_key);
                            return Arc::new(build_entry(backend, key, program, false));
                        }
                        Err(err) => {
                            debug!("binary upload failed ({}), recompiling", err);
                        }
                    }
                }
            }
        }

        let vs_obj = match backend.compile_shader(ShaderStage::Vertex, vs_source) {
            Ok(obj) => obj,
            Err(err) => {
                error!("vertex shader compile failed: {}", err);
                return self.stub_entry(backend, key);
            }
        };
        let fs_obj = match backend.compile_shader(ShaderStage::Fragment, fs_source) {
            Ok(obj) => obj,
            Err(err) => {
                error!("pixel shader compile failed: {}", err);
                backend.delete_shader(vs_obj);
                return self.stub_entry(backend, key);
            }
        };

        let program = match backend.link_program(vs_obj, fs_obj, &ATTRIBUTE_BINDINGS) {
            Ok(program) => program,
            Err(err) => {
                error!("program link failed: {}", err);
                backend.delete_shader(vs_obj);
                backend.delete_shader(fs_obj);
                return self.stub_entry(backend, key);
            }
        };

        if let Some(cache) = binary_cache {
            if backend.caps().program_binaries {
                if let Some(binary) = backend.get_program_binary(program) {
                    if let Err(err) = cache.store(&cache_key, &binary) {
                        debug!("binary save skipped for {}: {}", cache_key, err);
                    }
                }
            }
        }

        Arc::new(build_entry(backend, key, program, false))
    }

    /// The error-colour program returned for failed compiles. Never
    /// inserted into the cache.
    fn stub_entry(
        &mut self,
        backend: &mut dyn RenderBackend,
        key: ProgramKey,
    ) -> Arc<ProgramEntry> {
        let vs = stub_shader(ShaderKind::Vertex, &self.dialect, Vec::new());
        let fs = stub_shader(ShaderKind::Pixel(1), &self.dialect, Vec::new());
        let program = (|| {
            let vs_obj = backend.compile_shader(ShaderStage::Vertex, &vs.source)?;
            let fs_obj = backend.compile_shader(ShaderStage::Fragment, &fs.source)?;
            backend.link_program(vs_obj, fs_obj, &ATTRIBUTE_BINDINGS)
        })();
        match program {
            Ok(program) => Arc::new(ProgramEntry {
                key,
                program,
                vs_constants: ConstantLocations::default(),
                ps_constants: ConstantLocations::default(),
                samplers: [None; 8],
                named: FxHashMap::default(),
                is_stub: true,
            }),
            Err(err) => {
                // even the stub failed; the draw will be dropped
                error!("stub program creation failed: {}", err);
                Arc::new(ProgramEntry {
                    key,
                    program: ProgramId(0),
                    vs_constants: ConstantLocations::default(),
                    ps_constants: ConstantLocations::default(),
                    samplers: [None; 8],
                    named: FxHashMap::default(),
                    is_stub: true,
                })
            }
        }
    }
}

fn build_entry(
    backend: &mut dyn RenderBackend,
    key: ProgramKey,
    program: ProgramId,
    is_stub: bool,
) -> ProgramEntry {
    let mut vs_constants = ConstantLocations::default();
    for i in 0..vs_constants.float_regs.len() {
        vs_constants.float_regs[i] = backend.uniform_location(program, &format!("c{}", i));
    }
    for i in 0..vs_constants.int_regs.len() {
        vs_constants.int_regs[i] = backend.uniform_location(program, &format!("i{}", i));
    }
    for i in 0..vs_constants.bool_regs.len() {
        vs_constants.bool_regs[i] = backend.uniform_location(program, &format!("b{}", i));
    }

    let mut ps_constants = ConstantLocations::default();
    for i in 0..MAX_PS_FLOAT_CONSTANTS {
        ps_constants.float_regs[i] = backend.uniform_location(program, &format!("ps_c{}", i));
    }

    let mut samplers = [None; 8];
    for (i, slot) in samplers.iter_mut().enumerate() {
        *slot = backend
            .uniform_location(program, &format!("s{}", i))
            .or_else(|| backend.uniform_location(program, &format!("u_texture[{}]", i)));
    }

    let mut named = FxHashMap::default();
    for name in NAMED_UNIFORMS {
        if let Some(loc) = backend.uniform_location(program, name) {
            named.insert(name.to_string(), loc);
        }
    }

    ProgramEntry {
        key,
        program,
        vs_constants,
        ps_constants,
        samplers,
        named,
        is_stub,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;
    use crate::shader::bytecode::*;

    fn simple_vs_tokens() -> Vec<Dword> {
        let mut asm = BytecodeAssembler::new();
        asm.set_version(VS_1_1);
        asm.add_instruction(
            Opcode::Mov,
            DestParam::new(RegisterFile::RastOut, 0),
            &[SrcParam::new(RegisterFile::Input, 0)],
        );
        asm.add_instruction(
            Opcode::Mov,
            DestParam::new(RegisterFile::AttrOut, 0),
            &[SrcParam::new(RegisterFile::Const, 0)],
        );
        asm.finish()
    }

    fn simple_ps_tokens() -> Vec<Dword> {
        let mut asm = BytecodeAssembler::new();
        asm.set_version(PS_1_1);
        asm.add_instruction(
            Opcode::Mov,
            DestParam::new(RegisterFile::Temp, 0),
            &[SrcParam::new(RegisterFile::Input, 0)],
        );
        asm.finish()
    }

    #[test]
    fn handles_are_odd_and_unique() {
        let mut mgr = VertexShaderManager::new();
        let dialect = ShaderDialect::default();
        let a = mgr.create(&[], Some(&simple_vs_tokens()), &dialect);
        let b = mgr.create(&[], Some(&simple_vs_tokens()), &dialect);
        assert_eq!(a.handle % 2, 1);
        assert_eq!(b.handle % 2, 1);
        assert_ne!(a.handle, b.handle);
        assert!(a.error.is_none());
    }

    #[test]
    fn same_shaders_reuse_the_program() {
        let mut backend = HeadlessBackend::new();
        let mut vs_mgr = VertexShaderManager::new();
        let mut ps_mgr = PixelShaderManager::new();
        let mut programs = ShaderProgramManager::new(ShaderDialect::default());
        let dialect = ShaderDialect::default();

        let vs = vs_mgr.create(&[], Some(&simple_vs_tokens()), &dialect);
        let ps = ps_mgr.create(&simple_ps_tokens(), &dialect);
        let vs_info = vs_mgr.get(vs.handle).unwrap().clone();
        let ps_info = ps_mgr.get(ps.handle).unwrap().clone();

        let first = programs.get_program(&mut backend, &vs_info, Some(&*ps_info), None);
        let second = programs.get_program(&mut backend, &vs_info, Some(&*ps_info), None);
        assert_eq!(first.program, second.program);
        assert_eq!(backend.counters.programs_linked, 1);
    }

    #[test]
    fn different_halves_make_different_programs() {
        let mut backend = HeadlessBackend::new();
        let mut vs_mgr = VertexShaderManager::new();
        let mut ps_mgr = PixelShaderManager::new();
        let mut programs = ShaderProgramManager::new(ShaderDialect::default());
        let dialect = ShaderDialect::default();

        let vs_a = vs_mgr.create(&[], Some(&simple_vs_tokens()), &dialect);
        // a second, different vertex shader
        let mut other = BytecodeAssembler::new();
        other.set_version(VS_1_1);
        other.add_instruction(
            Opcode::Mov,
            DestParam::new(RegisterFile::RastOut, 0),
            &[SrcParam::new(RegisterFile::Input, 0).negated()],
        );
        let vs_b = vs_mgr.create(&[], Some(&other.finish()), &dialect);
        let ps = ps_mgr.create(&simple_ps_tokens(), &dialect);

        let a_info = vs_mgr.get(vs_a.handle).unwrap().clone();
        let b_info = vs_mgr.get(vs_b.handle).unwrap().clone();
        let ps_info = ps_mgr.get(ps.handle).unwrap().clone();

        let with_ps = programs.get_program(&mut backend, &a_info, Some(&*ps_info), None);
        let without_ps = programs.get_program(&mut backend, &a_info, None, None);
        let other_vs = programs.get_program(&mut backend, &b_info, Some(&*ps_info), None);

        assert_ne!(with_ps.program, without_ps.program);
        assert_ne!(with_ps.program, other_vs.program);
        assert_ne!(without_ps.program, other_vs.program);
    }

    #[test]
    fn invalidate_current_preserves_cache() {
        let mut backend = HeadlessBackend::new();
        let mut vs_mgr = VertexShaderManager::new();
        let mut programs = ShaderProgramManager::new(ShaderDialect::default());
        let dialect = ShaderDialect::default();

        let vs = vs_mgr.create(&[], Some(&simple_vs_tokens()), &dialect);
        let info = vs_mgr.get(vs.handle).unwrap().clone();

        let before = programs.get_program(&mut backend, &info, None, None);
        programs.invalidate_current();
        assert_eq!(programs.current_program(), None);
        let after = programs.get_program(&mut backend, &info, None, None);
        assert_eq!(before.program, after.program);
        assert_eq!(backend.counters.programs_linked, 1);
    }

    #[test]
    fn compile_failure_returns_stub_and_caches_nothing() {
        let mut backend = HeadlessBackend::new();
        backend.fail_compiles = true;
        let mut vs_mgr = VertexShaderManager::new();
        let mut programs = ShaderProgramManager::new(ShaderDialect::default());
        let dialect = ShaderDialect::default();

        let vs = vs_mgr.create(&[], Some(&simple_vs_tokens()), &dialect);
        let info = vs_mgr.get(vs.handle).unwrap().clone();
        let entry = programs.get_program(&mut backend, &info, None, None);
        assert!(entry.is_stub);
        assert_eq!(programs.cached_program_count(), 0);

        // once compiles work again, the pair links and is cached
        backend.fail_compiles = false;
        let entry = programs.get_program(&mut backend, &info, None, None);
        assert!(!entry.is_stub);
        assert_eq!(programs.cached_program_count(), 1);
    }

    #[test]
    fn binary_cache_short_circuits_compilation() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = crate::config::Config::default();
        config.shader_cache_dir = dir.path().to_path_buf();
        let cache = ShaderBinaryCache::new(&config, 0x3300_4652, 0x00C0_FFEE);
        assert!(cache.initialize());

        let mut vs_mgr = VertexShaderManager::new();
        let dialect = ShaderDialect::default();
        let vs = vs_mgr.create(&[], Some(&simple_vs_tokens()), &dialect);
        let info = vs_mgr.get(vs.handle).unwrap().clone();

        let compiled = {
            let mut backend = HeadlessBackend::new();
            let mut programs = ShaderProgramManager::new(dialect);
            let _ = programs.get_program(&mut backend, &info, None, Some(&cache));
            backend.counters.shaders_compiled
        };
        assert!(compiled > 0);

        // fresh manager and backend, warm cache
        let mut backend = HeadlessBackend::new();
        let mut programs = ShaderProgramManager::new(dialect);
        let entry = programs.get_program(&mut backend, &info, None, Some(&cache));
        assert!(!entry.is_stub);
        assert_eq!(backend.counters.shaders_compiled, 0);
        assert_eq!(backend.counters.binary_loads, 1);
    }

    #[test]
    fn fixed_function_keys_do_not_collide_with_bytecode_keys() {
        let mut backend = HeadlessBackend::new();
        let mut vs_mgr = VertexShaderManager::new();
        let mut programs = ShaderProgramManager::new(ShaderDialect::default());
        let dialect = ShaderDialect::default();

        let vs = vs_mgr.create(&[], Some(&simple_vs_tokens()), &dialect);
        let info = vs_mgr.get(vs.handle).unwrap().clone();
        let programmable = programs.get_program(&mut backend, &info, None, None);

        // an FF state hash equal to the bytecode hash still gets its own slot
        let ff = programs.get_fixed_function_program(
            &mut backend,
            info.bytecode_hash,
            "void main() {}",
            "void main() {}",
            None,
        );
        assert_ne!(programmable.program, ff.program);
        assert_eq!(programs.cached_program_count(), 2);
    }

    #[test]
    fn deleting_a_shader_clears_current_binding() {
        let mut mgr = PixelShaderManager::new();
        let dialect = ShaderDialect::default();
        let ps = mgr.create(&simple_ps_tokens(), &dialect);
        mgr.set_current(ps.handle);
        assert_eq!(mgr.current(), ps.handle);
        assert!(mgr.delete(ps.handle));
        assert_eq!(mgr.current(), 0);
        assert!(!mgr.delete(ps.handle));
    }
}
