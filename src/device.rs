//! The Direct3D 8 device facade.
//!
//! `create_direct3d8` stands in for the module entry point; the device it
//! creates owns the state shadow, the shader managers and caches, and a
//! render thread that executes command buffers against the backend. The
//! application-facing methods return bit-exact HRESULT words and never
//! touch the backend themselves.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use slotmap::{new_key_type, SlotMap};

use crate::backend::{
    translate, BufferId, HeadlessBackend, ProgramId, RenderBackend, TextureId, UniformLocation,
};
use crate::command::{Command, CommandBuffer};
use crate::config::{BackendKind, Config};
use crate::d3d8::{
    primitive_vertex_count, ClearFlags, ColorValue, Dword, Light, Material, Matrix,
    PrimitiveType, Rect, StateBlockType, TransformStateType, Vector3, Viewport, MAX_STREAMS,
    MAX_TEXTURE_STAGES,
};
use crate::error::{
    HResult, D3DERR_DEVICELOST, D3DERR_DEVICENOTRESET, D3DERR_INVALIDCALL, D3DERR_NOTAVAILABLE,
    D3DERR_NOTFOUND, E_FAIL, S_OK,
};
use crate::fixed_function;
use crate::fvf::parse_fvf;
use crate::render_thread::RenderThread;
use crate::shader::binary_cache::ShaderBinaryCache;
use crate::shader::constants::ShaderConstantManager;
use crate::shader::hot_reload::ShaderHotReloadManager;
use crate::shader::program::{
    PixelShaderManager, ProgramEntry, ShaderProgramManager, VertexShaderManager,
};
use crate::shader::ShaderDialect;
use crate::state::{DeviceBindings, StateManager, StreamBinding};

new_key_type! {
    pub struct TextureHandle;
    pub struct VertexBufferHandle;
    pub struct IndexBufferHandle;
}

struct TextureResource {
    id: TextureId,
    width: u32,
    height: u32,
    levels: u32,
}

struct BufferResource {
    id: BufferId,
    size: u32,
}

/// Id-indexed resource registry; resources carry the device id back-pointer
/// implicitly by living here rather than holding a cyclic reference.
struct ResourceRegistry {
    textures: SlotMap<TextureHandle, TextureResource>,
    vertex_buffers: SlotMap<VertexBufferHandle, BufferResource>,
    index_buffers: SlotMap<IndexBufferHandle, BufferResource>,
    next_texture_id: u32,
    next_buffer_id: u32,
}

impl ResourceRegistry {
    fn new() -> ResourceRegistry {
        ResourceRegistry {
            textures: SlotMap::with_key(),
            vertex_buffers: SlotMap::with_key(),
            index_buffers: SlotMap::with_key(),
            next_texture_id: 1,
            next_buffer_id: 1,
        }
    }
}

/// Everything shared between the application thread and the render thread.
struct DeviceShared {
    dialect: ShaderDialect,
    state: Mutex<StateManager>,
    vertex_shaders: Mutex<VertexShaderManager>,
    pixel_shaders: Mutex<PixelShaderManager>,
    programs: Mutex<ShaderProgramManager>,
    vs_constants: ShaderConstantManager,
    ps_constants: ShaderConstantManager,
    binary_cache: Option<ShaderBinaryCache>,
    hot_reload: Option<ShaderHotReloadManager>,
    streams: Mutex<[Option<StreamBinding>; MAX_STREAMS]>,
    indices: Mutex<(Option<BufferId>, u32)>,
    device_lost: AtomicBool,
}

// ---------------------------------------------------------------------------
// Module entry point
// ---------------------------------------------------------------------------

/// The `Direct3DCreate8` equivalent.
pub fn create_direct3d8(sdk_version: u32) -> Direct3D8 {
    crate::init_logging();
    debug!("create_direct3d8(sdk_version = {:#x})", sdk_version);
    Direct3D8 {
        config: Config::from_env(),
    }
}

pub struct Direct3D8 {
    config: Config,
}

impl Direct3D8 {
    pub fn with_config(config: Config) -> Direct3D8 {
        Direct3D8 { config }
    }

    pub fn adapter_count(&self) -> u32 {
        1
    }

    pub fn adapter_identifier(&self, adapter: u32) -> Result<String, HResult> {
        if adapter >= self.adapter_count() {
            return Err(D3DERR_INVALIDCALL);
        }
        Ok(format!("dx8gl ({:?})", self.config.backend))
    }

    /// Create a device on the configured backend. Platform backends are
    /// external; only the headless backend is constructible in-tree.
    pub fn create_device(&self, adapter: u32) -> Result<Direct3DDevice8, HResult> {
        if adapter >= self.adapter_count() {
            return Err(D3DERR_INVALIDCALL);
        }
        match self.config.backend {
            BackendKind::Headless => Ok(Direct3DDevice8::create_with_backend(
                self.config.clone(),
                Arc::new(Mutex::new(HeadlessBackend::new())),
            )),
            other => {
                error!("backend {:?} must be supplied via create_device_with", other);
                Err(D3DERR_NOTAVAILABLE)
            }
        }
    }

    /// Create a device over a caller-provided backend instance.
    pub fn create_device_with<B>(&self, backend: Arc<Mutex<B>>) -> Direct3DDevice8
    where
        B: RenderBackend + 'static,
    {
        Direct3DDevice8::create_with_backend(self.config.clone(), backend)
    }
}

// ---------------------------------------------------------------------------
// Device
// ---------------------------------------------------------------------------

pub struct Direct3DDevice8 {
    shared: Arc<DeviceShared>,
    render_thread: RenderThread,
    resources: Mutex<ResourceRegistry>,
    bound_texture_handles: Mutex<[Option<TextureHandle>; MAX_TEXTURE_STAGES]>,
}

impl Direct3DDevice8 {
    pub fn create_with_backend<B>(config: Config, backend: Arc<Mutex<B>>) -> Direct3DDevice8
    where
        B: RenderBackend + 'static,
    {
        let dialect = match config.backend {
            BackendKind::Gles | BackendKind::WebGpu => ShaderDialect::ES3,
            _ => ShaderDialect::default(),
        };

        let binary_cache = {
            let caps = backend.lock().unwrap().caps();
            let cache = ShaderBinaryCache::new(&config, caps.gl_version_hash, caps.extension_hash);
            if cache.initialize() {
                Some(cache)
            } else {
                None
            }
        };

        let hot_reload = if config.shader_hot_reload {
            Some(ShaderHotReloadManager::new(
                &config.shader_cache_dir.join("sources"),
            ))
        } else {
            None
        };

        let shared = Arc::new(DeviceShared {
            dialect,
            state: Mutex::new(StateManager::new()),
            vertex_shaders: Mutex::new(VertexShaderManager::new()),
            pixel_shaders: Mutex::new(PixelShaderManager::new()),
            programs: Mutex::new(ShaderProgramManager::new(dialect)),
            vs_constants: ShaderConstantManager::new(),
            ps_constants: ShaderConstantManager::new(),
            binary_cache,
            hot_reload,
            streams: Mutex::new([None; MAX_STREAMS]),
            indices: Mutex::new((None, 0)),
            device_lost: AtomicBool::new(false),
        });

        let executor_shared = Arc::clone(&shared);
        let mut last_program: Option<ProgramId> = None;
        let render_thread = RenderThread::spawn(move |buffer| {
            let mut backend = backend.lock().unwrap();
            execute_buffer(&executor_shared, &mut *backend, buffer, &mut last_program);
        });

        Direct3DDevice8 {
            shared,
            render_thread,
            resources: Mutex::new(ResourceRegistry::new()),
            bound_texture_handles: Mutex::new([None; MAX_TEXTURE_STAGES]),
        }
    }

    fn submit_one(&self, command: Command) {
        let mut buffer = CommandBuffer::new();
        buffer.push(command);
        self.render_thread.submit(buffer);
    }

    fn check_not_lost(&self) -> Result<(), HResult> {
        if self.shared.device_lost.load(Ordering::Acquire) {
            Err(D3DERR_DEVICELOST)
        } else {
            Ok(())
        }
    }

    // -- render / texture-stage / transform state ---------------------------

    pub fn set_render_state(&self, state: Dword, value: Dword) -> HResult {
        if self.shared.state.lock().unwrap().set_render_state(state, value) {
            S_OK
        } else {
            D3DERR_INVALIDCALL
        }
    }

    pub fn get_render_state(&self, state: Dword) -> Result<Dword, HResult> {
        self.shared
            .state
            .lock()
            .unwrap()
            .get_render_state(state)
            .ok_or(D3DERR_INVALIDCALL)
    }

    pub fn set_texture_stage_state(&self, stage: Dword, ty: Dword, value: Dword) -> HResult {
        if self
            .shared
            .state
            .lock()
            .unwrap()
            .set_texture_stage_state(stage, ty, value)
        {
            S_OK
        } else {
            D3DERR_INVALIDCALL
        }
    }

    pub fn get_texture_stage_state(&self, stage: Dword, ty: Dword) -> Result<Dword, HResult> {
        self.shared
            .state
            .lock()
            .unwrap()
            .get_texture_stage_state(stage, ty)
            .ok_or(D3DERR_INVALIDCALL)
    }

    pub fn set_transform(&self, which: Dword, matrix: &Matrix) -> HResult {
        let Some(ts) = TransformStateType::from_dword(which) else {
            return D3DERR_INVALIDCALL;
        };
        self.shared.state.lock().unwrap().set_transform(ts, matrix);
        S_OK
    }

    pub fn get_transform(&self, which: Dword) -> Result<Matrix, HResult> {
        let ts = TransformStateType::from_dword(which).ok_or(D3DERR_INVALIDCALL)?;
        Ok(self.shared.state.lock().unwrap().transforms.get(ts))
    }

    pub fn multiply_transform(&self, which: Dword, matrix: &Matrix) -> HResult {
        let Some(ts) = TransformStateType::from_dword(which) else {
            return D3DERR_INVALIDCALL;
        };
        self.shared
            .state
            .lock()
            .unwrap()
            .multiply_transform(ts, matrix);
        S_OK
    }

    // -- lights, material, viewport, clipping --------------------------------

    pub fn set_light(&self, index: u32, light: &Light) -> HResult {
        if self
            .shared
            .state
            .lock()
            .unwrap()
            .set_light(index as usize, light)
        {
            S_OK
        } else {
            D3DERR_INVALIDCALL
        }
    }

    pub fn get_light(&self, index: u32) -> Result<Light, HResult> {
        self.shared
            .state
            .lock()
            .unwrap()
            .get_light(index as usize)
            .ok_or(D3DERR_INVALIDCALL)
    }

    pub fn light_enable(&self, index: u32, enable: bool) -> HResult {
        if self
            .shared
            .state
            .lock()
            .unwrap()
            .light_enable(index as usize, enable)
        {
            S_OK
        } else {
            D3DERR_INVALIDCALL
        }
    }

    pub fn get_light_enable(&self, index: u32) -> Result<bool, HResult> {
        if index as usize >= crate::d3d8::MAX_LIGHTS {
            return Err(D3DERR_INVALIDCALL);
        }
        Ok(self
            .shared
            .state
            .lock()
            .unwrap()
            .is_light_enabled(index as usize))
    }

    pub fn set_material(&self, material: &Material) -> HResult {
        self.shared.state.lock().unwrap().set_material(material);
        S_OK
    }

    pub fn get_material(&self) -> Material {
        self.shared.state.lock().unwrap().material
    }

    pub fn set_viewport(&self, viewport: &Viewport) -> HResult {
        if self.shared.state.lock().unwrap().set_viewport(viewport) {
            S_OK
        } else {
            D3DERR_INVALIDCALL
        }
    }

    pub fn get_viewport(&self) -> Viewport {
        self.shared.state.lock().unwrap().viewport
    }

    pub fn set_scissor_rect(&self, rect: &Rect, enable: bool) -> HResult {
        self.shared
            .state
            .lock()
            .unwrap()
            .set_scissor_rect(rect, enable);
        S_OK
    }

    pub fn set_clip_plane(&self, index: u32, plane: &[f32; 4]) -> HResult {
        if self
            .shared
            .state
            .lock()
            .unwrap()
            .set_clip_plane(index as usize, plane)
        {
            S_OK
        } else {
            D3DERR_INVALIDCALL
        }
    }

    pub fn get_clip_plane(&self, index: u32) -> Result<[f32; 4], HResult> {
        self.shared
            .state
            .lock()
            .unwrap()
            .get_clip_plane(index as usize)
            .ok_or(D3DERR_INVALIDCALL)
    }

    pub fn set_clip_status(&self, clip_union: Dword, clip_intersection: Dword) -> HResult {
        self.shared
            .state
            .lock()
            .unwrap()
            .set_clip_status(clip_union, clip_intersection);
        S_OK
    }

    pub fn get_clip_status(&self) -> (Dword, Dword) {
        self.shared.state.lock().unwrap().get_clip_status()
    }

    /// Advisory validation of the whole shadow; violation count only, the
    /// details go to the log.
    pub fn validate_device(&self) -> usize {
        self.shared.state.lock().unwrap().validate().len()
    }

    // -- resources -----------------------------------------------------------

    pub fn create_texture(
        &self,
        width: u32,
        height: u32,
        levels: u32,
    ) -> Result<TextureHandle, HResult> {
        if width == 0 || height == 0 {
            return Err(D3DERR_INVALIDCALL);
        }
        let mut resources = self.resources.lock().unwrap();
        let id = TextureId(resources.next_texture_id);
        resources.next_texture_id += 1;
        Ok(resources.textures.insert(TextureResource {
            id,
            width,
            height,
            levels: levels.max(1),
        }))
    }

    pub fn texture_dimensions(&self, handle: TextureHandle) -> Option<(u32, u32, u32)> {
        let resources = self.resources.lock().unwrap();
        resources
            .textures
            .get(handle)
            .map(|t| (t.width, t.height, t.levels))
    }

    /// Release a texture. GPU-side destruction happens on the render
    /// thread; the registry entry is gone immediately.
    pub fn release_texture(&self, handle: TextureHandle) -> HResult {
        let removed = self.resources.lock().unwrap().textures.remove(handle);
        let Some(resource) = removed else {
            return D3DERR_NOTFOUND;
        };
        // unbind from any stage still holding it
        {
            let mut state = self.shared.state.lock().unwrap();
            let mut handles = self.bound_texture_handles.lock().unwrap();
            for stage in 0..MAX_TEXTURE_STAGES {
                if handles[stage] == Some(handle) {
                    handles[stage] = None;
                    state.set_texture(stage, None);
                }
            }
        }
        self.submit_one(Command::DestroyTexture(resource.id));
        S_OK
    }

    pub fn create_vertex_buffer(&self, size: u32) -> Result<VertexBufferHandle, HResult> {
        if size == 0 {
            return Err(D3DERR_INVALIDCALL);
        }
        let mut resources = self.resources.lock().unwrap();
        let id = BufferId(resources.next_buffer_id);
        resources.next_buffer_id += 1;
        Ok(resources.vertex_buffers.insert(BufferResource { id, size }))
    }

    pub fn create_index_buffer(&self, size: u32) -> Result<IndexBufferHandle, HResult> {
        if size == 0 {
            return Err(D3DERR_INVALIDCALL);
        }
        let mut resources = self.resources.lock().unwrap();
        let id = BufferId(resources.next_buffer_id);
        resources.next_buffer_id += 1;
        Ok(resources.index_buffers.insert(BufferResource { id, size }))
    }

    pub fn release_vertex_buffer(&self, handle: VertexBufferHandle) -> HResult {
        let removed = self.resources.lock().unwrap().vertex_buffers.remove(handle);
        match removed {
            Some(resource) => {
                let mut streams = self.shared.streams.lock().unwrap();
                for slot in streams.iter_mut() {
                    if slot.map(|s| s.buffer) == Some(resource.id) {
                        *slot = None;
                    }
                }
                drop(streams);
                self.submit_one(Command::DestroyBuffer(resource.id));
                S_OK
            }
            None => D3DERR_NOTFOUND,
        }
    }

    pub fn release_index_buffer(&self, handle: IndexBufferHandle) -> HResult {
        let removed = self.resources.lock().unwrap().index_buffers.remove(handle);
        match removed {
            Some(resource) => {
                let mut indices = self.shared.indices.lock().unwrap();
                if indices.0 == Some(resource.id) {
                    *indices = (None, 0);
                }
                drop(indices);
                self.submit_one(Command::DestroyBuffer(resource.id));
                S_OK
            }
            None => D3DERR_NOTFOUND,
        }
    }

    pub fn set_texture(&self, stage: u32, handle: Option<TextureHandle>) -> HResult {
        if stage as usize >= MAX_TEXTURE_STAGES {
            return D3DERR_INVALIDCALL;
        }
        let id = match handle {
            Some(handle) => {
                let resources = self.resources.lock().unwrap();
                match resources.textures.get(handle) {
                    Some(resource) => Some(resource.id),
                    None => return D3DERR_INVALIDCALL,
                }
            }
            None => None,
        };
        self.shared
            .state
            .lock()
            .unwrap()
            .set_texture(stage as usize, id);
        self.bound_texture_handles.lock().unwrap()[stage as usize] = handle;
        S_OK
    }

    pub fn get_texture(&self, stage: u32) -> Result<Option<TextureHandle>, HResult> {
        if stage as usize >= MAX_TEXTURE_STAGES {
            return Err(D3DERR_INVALIDCALL);
        }
        Ok(self.bound_texture_handles.lock().unwrap()[stage as usize])
    }

    pub fn set_stream_source(
        &self,
        stream: u32,
        handle: Option<VertexBufferHandle>,
        stride: u32,
    ) -> HResult {
        if stream as usize >= MAX_STREAMS {
            return D3DERR_INVALIDCALL;
        }
        let binding = match handle {
            Some(handle) => {
                let resources = self.resources.lock().unwrap();
                match resources.vertex_buffers.get(handle) {
                    Some(resource) => Some(StreamBinding {
                        buffer: resource.id,
                        stride,
                    }),
                    None => return D3DERR_INVALIDCALL,
                }
            }
            None => None,
        };
        self.shared.streams.lock().unwrap()[stream as usize] = binding;
        S_OK
    }

    pub fn set_indices(&self, handle: Option<IndexBufferHandle>, base_vertex: u32) -> HResult {
        let id = match handle {
            Some(handle) => {
                let resources = self.resources.lock().unwrap();
                match resources.index_buffers.get(handle) {
                    Some(resource) => Some(resource.id),
                    None => return D3DERR_INVALIDCALL,
                }
            }
            None => None,
        };
        *self.shared.indices.lock().unwrap() = (id, base_vertex);
        S_OK
    }

    // -- shaders -------------------------------------------------------------

    /// Result of shader creation: the handle is valid even when the
    /// translation failed (the bound shader renders the stub then).
    pub fn create_vertex_shader(
        &self,
        declaration: &[Dword],
        function: Option<&[Dword]>,
    ) -> (HResult, Dword) {
        let created = self.shared.vertex_shaders.lock().unwrap().create(
            declaration,
            function,
            &self.shared.dialect,
        );
        match created.error {
            Some(err) => {
                warn!("create_vertex_shader: {}", err);
                (E_FAIL, created.handle)
            }
            None => (S_OK, created.handle),
        }
    }

    pub fn create_pixel_shader(&self, function: &[Dword]) -> (HResult, Dword) {
        let created = self
            .shared
            .pixel_shaders
            .lock()
            .unwrap()
            .create(function, &self.shared.dialect);
        match created.error {
            Some(err) => {
                warn!("create_pixel_shader: {}", err);
                (E_FAIL, created.handle)
            }
            None => (S_OK, created.handle),
        }
    }

    /// Create a vertex shader from assembly text (runtime assembly, the
    /// common D3D8 pattern).
    pub fn create_vertex_shader_from_asm(&self, source: &str) -> (HResult, Dword) {
        match self.shared.vertex_shaders.lock().unwrap().create_from_asm(
            source,
            &[],
            &self.shared.dialect,
        ) {
            Ok(created) => match created.error {
                Some(err) => {
                    warn!("create_vertex_shader_from_asm: {}", err);
                    (E_FAIL, created.handle)
                }
                None => (S_OK, created.handle),
            },
            Err(err) => {
                warn!("vertex shader assembly rejected: {}", err);
                (D3DERR_INVALIDCALL, 0)
            }
        }
    }

    pub fn create_pixel_shader_from_asm(&self, source: &str) -> (HResult, Dword) {
        let parsed = match crate::shader::asm::parse_asm(source) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!("pixel shader assembly rejected: {}", err);
                return (D3DERR_INVALIDCALL, 0);
            }
        };
        let tokens = parsed.to_bytecode();
        self.create_pixel_shader(&tokens)
    }

    /// Bind a vertex shader handle or an FVF code. Shader handles are odd;
    /// anything else selects the fixed-function pipeline for that FVF.
    pub fn set_vertex_shader(&self, handle: Dword) -> HResult {
        // short managers lock first; the state lock is taken afterwards so
        // the lock order stays state-before-managers everywhere else
        let defs = {
            let mut managers = self.shared.vertex_shaders.lock().unwrap();
            if handle != 0 && managers.get(handle).is_some() {
                managers.set_current(handle);
                Some(managers.get(handle).unwrap().translated.defs.clone())
            } else if handle & 1 == 1 && handle != 0 {
                // odd handles are shader handles; an unknown one is an error
                return D3DERR_INVALIDCALL;
            } else {
                managers.set_current(0);
                None
            }
        };

        match defs {
            Some(defs) => {
                // seed def constants so the program sees them on bind
                for (register, values) in &defs {
                    let _ = self
                        .shared
                        .vs_constants
                        .set_float(*register as usize, &[*values]);
                }
                let mut state = self.shared.state.lock().unwrap();
                if let Some(block) = state.recording_block() {
                    block.record_vertex_shader(handle);
                }
            }
            None => {
                let mut state = self.shared.state.lock().unwrap();
                state.current_fvf = handle;
                if let Some(block) = state.recording_block() {
                    block.record_fvf(handle);
                }
            }
        }
        S_OK
    }

    pub fn get_vertex_shader(&self) -> Dword {
        let current = self.shared.vertex_shaders.lock().unwrap().current();
        if current != 0 {
            current
        } else {
            self.shared.state.lock().unwrap().current_fvf
        }
    }

    pub fn delete_vertex_shader(&self, handle: Dword) -> HResult {
        if self.shared.vertex_shaders.lock().unwrap().delete(handle) {
            S_OK
        } else {
            D3DERR_INVALIDCALL
        }
    }

    pub fn set_pixel_shader(&self, handle: Dword) -> HResult {
        let defs = {
            let mut managers = self.shared.pixel_shaders.lock().unwrap();
            if handle == 0 {
                managers.set_current(0);
                Vec::new()
            } else {
                match managers.get(handle) {
                    Some(info) => {
                        let defs = info.translated.defs.clone();
                        managers.set_current(handle);
                        defs
                    }
                    None => return D3DERR_INVALIDCALL,
                }
            }
        };
        for (register, values) in &defs {
            let _ = self
                .shared
                .ps_constants
                .set_float(*register as usize, &[*values]);
        }
        let mut state = self.shared.state.lock().unwrap();
        if let Some(block) = state.recording_block() {
            block.record_pixel_shader(handle);
        }
        S_OK
    }

    pub fn get_pixel_shader(&self) -> Dword {
        self.shared.pixel_shaders.lock().unwrap().current()
    }

    pub fn delete_pixel_shader(&self, handle: Dword) -> HResult {
        if self.shared.pixel_shaders.lock().unwrap().delete(handle) {
            S_OK
        } else {
            D3DERR_INVALIDCALL
        }
    }

    pub fn set_vertex_shader_constant(&self, register: u32, data: &[[f32; 4]]) -> HResult {
        match self
            .shared
            .vs_constants
            .set_float(register as usize, data)
        {
            Ok(()) => S_OK,
            Err(_) => D3DERR_INVALIDCALL,
        }
    }

    pub fn get_vertex_shader_constant(
        &self,
        register: u32,
        count: u32,
    ) -> Result<Vec<[f32; 4]>, HResult> {
        self.shared
            .vs_constants
            .get_float(register as usize, count as usize)
            .map_err(|_| D3DERR_INVALIDCALL)
    }

    pub fn set_pixel_shader_constant(&self, register: u32, data: &[[f32; 4]]) -> HResult {
        match self
            .shared
            .ps_constants
            .set_float(register as usize, data)
        {
            Ok(()) => S_OK,
            Err(_) => D3DERR_INVALIDCALL,
        }
    }

    pub fn get_pixel_shader_constant(
        &self,
        register: u32,
        count: u32,
    ) -> Result<Vec<[f32; 4]>, HResult> {
        self.shared
            .ps_constants
            .get_float(register as usize, count as usize)
            .map_err(|_| D3DERR_INVALIDCALL)
    }

    // -- state blocks --------------------------------------------------------

    fn device_bindings(&self) -> DeviceBindings {
        let state = self.shared.state.lock().unwrap();
        DeviceBindings {
            vertex_shader: self.shared.vertex_shaders.lock().unwrap().current(),
            pixel_shader: self.shared.pixel_shaders.lock().unwrap().current(),
            fvf: state.current_fvf,
            vs_constants: self.shared.vs_constants.float_snapshot().to_vec(),
            ps_constants: self.shared.ps_constants.float_snapshot()[..8].to_vec(),
            textures: state.bound_textures,
            streams: *self.shared.streams.lock().unwrap(),
            index_buffer: self.shared.indices.lock().unwrap().0,
        }
    }

    pub fn begin_state_block(&self) -> HResult {
        if self.shared.state.lock().unwrap().begin_state_block() {
            S_OK
        } else {
            D3DERR_INVALIDCALL
        }
    }

    pub fn end_state_block(&self) -> Result<Dword, HResult> {
        self.shared
            .state
            .lock()
            .unwrap()
            .end_state_block()
            .ok_or(D3DERR_INVALIDCALL)
    }

    pub fn create_state_block(&self, block_type: Dword) -> Result<Dword, HResult> {
        let ty = StateBlockType::from_dword(block_type).ok_or(D3DERR_INVALIDCALL)?;
        let bindings = self.device_bindings();
        Ok(self
            .shared
            .state
            .lock()
            .unwrap()
            .create_state_block(ty, &bindings))
    }

    pub fn capture_state_block(&self, token: Dword) -> HResult {
        let bindings = self.device_bindings();
        if self
            .shared
            .state
            .lock()
            .unwrap()
            .capture_state_block(token, &bindings)
        {
            S_OK
        } else {
            D3DERR_INVALIDCALL
        }
    }

    pub fn apply_state_block(&self, token: Dword) -> HResult {
        let applied = {
            let mut state = self.shared.state.lock().unwrap();
            match state.apply_state_block(token) {
                Some(applied) => applied,
                None => return D3DERR_INVALIDCALL,
            }
        };
        if let Some(vs) = applied.vertex_shader {
            let _ = self.set_vertex_shader(vs);
        }
        if let Some(fvf) = applied.fvf {
            if applied.vertex_shader.unwrap_or(0) == 0 {
                self.shared.state.lock().unwrap().current_fvf = fvf;
            }
        }
        if let Some(ps) = applied.pixel_shader {
            let _ = self.set_pixel_shader(ps);
        }
        if let Some(constants) = applied.vs_constants {
            let _ = self.shared.vs_constants.set_float(0, &constants);
        }
        if let Some(constants) = applied.ps_constants {
            let _ = self.shared.ps_constants.set_float(0, &constants);
        }
        if !applied.streams.is_empty() {
            let mut streams = self.shared.streams.lock().unwrap();
            for (index, binding) in applied.streams {
                streams[index] = Some(binding);
            }
        }
        if let Some(index_buffer) = applied.index_buffer {
            self.shared.indices.lock().unwrap().0 = index_buffer;
        }
        S_OK
    }

    pub fn delete_state_block(&self, token: Dword) -> HResult {
        if self.shared.state.lock().unwrap().delete_state_block(token) {
            S_OK
        } else {
            D3DERR_INVALIDCALL
        }
    }

    // -- drawing -------------------------------------------------------------

    pub fn set_fvf(&self, fvf: Dword) -> HResult {
        self.set_vertex_shader(fvf)
    }

    pub fn get_fvf(&self) -> Dword {
        self.shared.state.lock().unwrap().current_fvf
    }

    pub fn clear(&self, flags: ClearFlags, color: Dword, z: f32, stencil: Dword) -> HResult {
        if flags.is_empty() {
            return D3DERR_INVALIDCALL;
        }
        self.submit_one(Command::Clear {
            flags,
            color,
            z,
            stencil,
        });
        S_OK
    }

    pub fn draw_primitive(
        &self,
        primitive_type: Dword,
        start_vertex: u32,
        primitive_count: u32,
    ) -> HResult {
        let Some(ty) = PrimitiveType::from_dword(primitive_type) else {
            return D3DERR_INVALIDCALL;
        };
        if primitive_count == 0 {
            return D3DERR_INVALIDCALL;
        }
        if let Err(hr) = self.check_not_lost() {
            return hr;
        }
        self.submit_one(Command::DrawPrimitive {
            primitive_type: ty,
            start_vertex,
            primitive_count,
        });
        S_OK
    }

    pub fn draw_indexed_primitive(
        &self,
        primitive_type: Dword,
        start_index: u32,
        primitive_count: u32,
    ) -> HResult {
        let Some(ty) = PrimitiveType::from_dword(primitive_type) else {
            return D3DERR_INVALIDCALL;
        };
        if primitive_count == 0 {
            return D3DERR_INVALIDCALL;
        }
        if let Err(hr) = self.check_not_lost() {
            return hr;
        }
        let base_vertex = self.shared.indices.lock().unwrap().1 as i32;
        self.submit_one(Command::DrawIndexedPrimitive {
            primitive_type: ty,
            base_vertex,
            start_index,
            primitive_count,
        });
        S_OK
    }

    pub fn draw_primitive_up(
        &self,
        primitive_type: Dword,
        primitive_count: u32,
        vertex_data: &[u8],
        stride: u32,
    ) -> HResult {
        let Some(ty) = PrimitiveType::from_dword(primitive_type) else {
            return D3DERR_INVALIDCALL;
        };
        if primitive_count == 0 || stride == 0 || vertex_data.is_empty() {
            return D3DERR_INVALIDCALL;
        }
        let needed = primitive_vertex_count(ty, primitive_count) as usize * stride as usize;
        if vertex_data.len() < needed {
            return D3DERR_INVALIDCALL;
        }
        if let Err(hr) = self.check_not_lost() {
            return hr;
        }
        self.submit_one(Command::DrawPrimitiveUp {
            primitive_type: ty,
            primitive_count,
            vertex_data: vertex_data.to_vec(),
            stride,
        });
        S_OK
    }

    pub fn present(&self) -> HResult {
        if let Err(hr) = self.check_not_lost() {
            return hr;
        }
        self.submit_one(Command::Present);
        // loss surfaces on the *next* call after the render thread saw it
        S_OK
    }

    pub fn test_cooperative_level(&self) -> HResult {
        if self.shared.device_lost.load(Ordering::Acquire) {
            D3DERR_DEVICENOTRESET
        } else {
            S_OK
        }
    }

    pub fn reset(&self) -> HResult {
        self.render_thread.wait_for_idle();
        let mut state = self.shared.state.lock().unwrap();
        state.invalidate_cached_states();
        drop(state);
        self.shared.programs.lock().unwrap().invalidate_current();
        self.shared.device_lost.store(false, Ordering::Release);
        info!("device reset");
        S_OK
    }

    // -- plumbing ------------------------------------------------------------

    pub fn wait_for_idle(&self) {
        self.render_thread.wait_for_idle();
    }

    pub fn flush(&self) {
        self.render_thread.flush();
    }

    /// Program bound by the most recent draw; `None` before any draw or
    /// after `invalidate_current`.
    pub fn current_program(&self) -> Option<ProgramId> {
        self.shared.programs.lock().unwrap().current_program()
    }

    pub fn invalidate_current_program(&self) {
        self.shared.programs.lock().unwrap().invalidate_current();
    }

    pub fn cached_program_count(&self) -> usize {
        self.shared.programs.lock().unwrap().cached_program_count()
    }

    pub fn constant_upload_metrics(&self) -> crate::shader::constants::UploadMetrics {
        self.shared.vs_constants.metrics()
    }

    pub fn cache_statistics(&self) -> Option<crate::shader::binary_cache::CacheStatistics> {
        self.shared.binary_cache.as_ref().map(|c| c.statistics())
    }
}

impl Drop for Direct3DDevice8 {
    fn drop(&mut self) {
        self.render_thread.stop();
        if let Some(cache) = &self.shared.binary_cache {
            cache.shutdown();
        }
    }
}

// ---------------------------------------------------------------------------
// Command execution (render thread)
// ---------------------------------------------------------------------------

fn execute_buffer(
    shared: &DeviceShared,
    backend: &mut dyn RenderBackend,
    buffer: CommandBuffer,
    last_program: &mut Option<ProgramId>,
) {
    for command in buffer.into_commands() {
        match command {
            Command::Clear {
                flags,
                color,
                z,
                stencil,
            } => {
                let c = ColorValue::from_d3dcolor(color);
                backend.clear(flags, c.to_array(), z, stencil);
            }
            Command::Present => {
                if let Err(err) = backend.present() {
                    error!("present failed, marking device lost: {}", err);
                    shared.device_lost.store(true, Ordering::Release);
                }
            }
            Command::DestroyTexture(id) => {
                trace!("deferred destroy of texture {:?}", id);
            }
            Command::DestroyBuffer(id) => {
                trace!("deferred destroy of buffer {:?}", id);
            }
            Command::DrawPrimitive {
                primitive_type,
                start_vertex,
                primitive_count,
            } => {
                if prepare_draw(shared, backend, last_program) {
                    backend.draw(
                        translate::primitive_topology(primitive_type),
                        start_vertex,
                        primitive_vertex_count(primitive_type, primitive_count),
                    );
                }
            }
            Command::DrawIndexedPrimitive {
                primitive_type,
                base_vertex,
                start_index,
                primitive_count,
            } => {
                if prepare_draw(shared, backend, last_program) {
                    backend.draw_indexed(
                        translate::primitive_topology(primitive_type),
                        primitive_vertex_count(primitive_type, primitive_count),
                        start_index,
                        base_vertex,
                    );
                }
            }
            Command::DrawPrimitiveUp {
                primitive_type,
                primitive_count,
                vertex_data,
                stride,
            } => {
                if prepare_draw(shared, backend, last_program) {
                    backend.draw_up(
                        translate::primitive_topology(primitive_type),
                        primitive_vertex_count(primitive_type, primitive_count),
                        &vertex_data,
                        stride,
                    );
                }
            }
        }
    }
}

/// The per-draw data flow: flush dirty state, resolve the program, upload
/// batched constants and fixed-function uniforms, bind samplers and
/// geometry. Returns false when no usable program exists.
fn prepare_draw(
    shared: &DeviceShared,
    backend: &mut dyn RenderBackend,
    last_program: &mut Option<ProgramId>,
) -> bool {
    let mut state = shared.state.lock().unwrap();
    state.apply_render_states(backend);
    state.apply_viewport(backend);

    let vertex_shaders = shared.vertex_shaders.lock().unwrap();
    let pixel_shaders = shared.pixel_shaders.lock().unwrap();
    let mut programs = shared.programs.lock().unwrap();
    let cache = shared.binary_cache.as_ref();

    let programmable = vertex_shaders
        .current_info()
        .filter(|info| !info.function.is_empty())
        .cloned();

    let entry: Arc<ProgramEntry> = match programmable {
        Some(vs_info) => {
            let ps_info = pixel_shaders.current_info().cloned();
            programs.get_program(backend, &vs_info, ps_info.as_deref(), cache)
        }
        None => {
            let ff = state.fixed_function_state();
            let Some(layout) = parse_fvf(state.current_fvf) else {
                warn!("draw with no vertex shader and no usable FVF; dropping");
                return false;
            };
            let generated = fixed_function::generate_program(&ff, &layout, &shared.dialect);
            let entry = programs.get_fixed_function_program(
                backend,
                generated.state_hash,
                &generated.vertex_source,
                &generated.fragment_source,
                cache,
            );
            if let Some(hot_reload) = &shared.hot_reload {
                hot_reload.register_program(
                    entry.key,
                    &generated.vertex_source,
                    &generated.fragment_source,
                );
            }
            entry
        }
    };

    if entry.is_stub && entry.program == ProgramId(0) {
        warn!("no program available for draw; dropping");
        return false;
    }

    backend.use_program(entry.program);
    let switched = *last_program != Some(entry.program);
    *last_program = Some(entry.program);

    if switched {
        shared.vs_constants.upload_all(backend, &entry.vs_constants);
        shared.ps_constants.upload_all(backend, &entry.ps_constants);
    } else {
        shared.vs_constants.upload_dirty(backend, &entry.vs_constants);
        shared.ps_constants.upload_dirty(backend, &entry.ps_constants);
    }

    for (unit, loc) in entry.samplers.iter().enumerate() {
        if let Some(loc) = loc {
            backend.set_uniform_i32(*loc, unit as i32);
        }
    }

    upload_pipeline_uniforms(&mut state, backend, &entry);

    if let Some(layout) = parse_fvf(state.current_fvf) {
        backend.set_vertex_layout(&layout);
    }
    {
        let streams = shared.streams.lock().unwrap();
        for (index, binding) in streams.iter().enumerate() {
            if let Some(binding) = binding {
                backend.bind_vertex_stream(index as u32, binding.buffer, binding.stride);
            }
        }
    }
    if let Some(index_buffer) = shared.indices.lock().unwrap().0 {
        backend.bind_index_buffer(index_buffer);
    }

    state.apply_texture_states(backend);

    // hot reload polls on the draw path so swaps land between frames
    if let Some(hot_reload) = &shared.hot_reload {
        hot_reload.check_for_changes(backend, &mut programs);
    }

    true
}

fn transform_point(view: &Matrix, p: Vector3) -> [f32; 3] {
    let mut out = [0.0f32; 3];
    for (j, slot) in out.iter_mut().enumerate() {
        *slot = p.x * view.m[0][j] + p.y * view.m[1][j] + p.z * view.m[2][j] + view.m[3][j];
    }
    out
}

fn transform_direction(view: &Matrix, d: Vector3) -> [f32; 3] {
    let mut out = [0.0f32; 3];
    for (j, slot) in out.iter_mut().enumerate() {
        *slot = d.x * view.m[0][j] + d.y * view.m[1][j] + d.z * view.m[2][j];
    }
    out
}

/// Upload the transform/material/light/fog/alpha uniforms the bound
/// program actually contains. Programs without them (translated shaders)
/// skip everything via absent locations.
fn upload_pipeline_uniforms(
    state: &mut StateManager,
    backend: &mut dyn RenderBackend,
    entry: &ProgramEntry,
) {
    let named = |backend: &mut dyn RenderBackend, name: &str| -> Option<UniformLocation> {
        entry
            .uniform(name)
            .or_else(|| backend.uniform_location(entry.program, name))
    };

    if let Some(loc) = named(backend, "u_world_view_proj_matrix") {
        let wvp = state.transforms.world_view_projection();
        backend.set_uniform_mat4(loc, wvp.as_rows());
    }
    if let Some(loc) = named(backend, "u_world_matrix") {
        backend.set_uniform_mat4(loc, state.transforms.world.as_rows());
    }
    if let Some(loc) = named(backend, "u_view_matrix") {
        backend.set_uniform_mat4(loc, state.transforms.view.as_rows());
    }
    if let Some(loc) = named(backend, "u_projection_matrix") {
        backend.set_uniform_mat4(loc, state.transforms.projection.as_rows());
    }
    if let Some(loc) = named(backend, "u_normal_matrix") {
        let n = state.transforms.normal_matrix();
        backend.set_uniform_mat3(loc, n);
    }
    if let Some(loc) = named(backend, "u_viewport_size") {
        let vp = state.viewport;
        backend.set_uniform_vec4(
            loc,
            [vp.x as f32, vp.y as f32, vp.width as f32, vp.height as f32],
        );
    }
    if let Some(loc) = named(backend, "u_texture_factor") {
        backend.set_uniform_vec4(
            loc,
            ColorValue::from_d3dcolor(state.render.texture_factor).to_array(),
        );
    }
    if let Some(loc) = named(backend, "u_alpha_ref") {
        backend.set_uniform_f32(loc, state.render.alpha_ref as f32 / 255.0);
    }
    if let Some(loc) = named(backend, "u_fog_color") {
        backend.set_uniform_vec4(
            loc,
            ColorValue::from_d3dcolor(state.render.fog_color).to_array(),
        );
    }
    if let Some(loc) = named(backend, "u_fog_start") {
        backend.set_uniform_f32(loc, state.render.fog_start);
    }
    if let Some(loc) = named(backend, "u_fog_end") {
        backend.set_uniform_f32(loc, state.render.fog_end);
    }
    if let Some(loc) = named(backend, "u_fog_density") {
        backend.set_uniform_f32(loc, state.render.fog_density);
    }
    if let Some(loc) = named(backend, "u_ambient_light") {
        backend.set_uniform_vec4(
            loc,
            ColorValue::from_d3dcolor(state.render.ambient).to_array(),
        );
    }

    // material
    let material = state.material;
    for (name, value) in [
        ("u_material_diffuse", material.diffuse),
        ("u_material_ambient", material.ambient),
        ("u_material_specular", material.specular),
        ("u_material_emissive", material.emissive),
    ] {
        if let Some(loc) = backend.uniform_location(entry.program, name) {
            backend.set_uniform_vec4(loc, value.to_array());
        }
    }
    if let Some(loc) = backend.uniform_location(entry.program, "u_material_power") {
        backend.set_uniform_f32(loc, material.power);
    }

    // lights, transformed into view space the way the runtime does
    let view = state.transforms.view;
    for index in 0..crate::d3d8::MAX_LIGHTS {
        if !state.lights[index].enabled {
            continue;
        }
        let light = state.lights[index].light;
        let set_vec3 = |backend: &mut dyn RenderBackend, name: String, v: [f32; 3]| {
            if let Some(loc) = backend.uniform_location(entry.program, &name) {
                backend.set_uniform_vec3(loc, v);
            }
        };
        let set_vec4 = |backend: &mut dyn RenderBackend, name: String, v: [f32; 4]| {
            if let Some(loc) = backend.uniform_location(entry.program, &name) {
                backend.set_uniform_vec4(loc, v);
            }
        };
        let set_f32 = |backend: &mut dyn RenderBackend, name: String, v: f32| {
            if let Some(loc) = backend.uniform_location(entry.program, &name) {
                backend.set_uniform_f32(loc, v);
            }
        };

        set_vec3(
            backend,
            format!("u_light{}_position", index),
            transform_point(&view, light.position),
        );
        set_vec3(
            backend,
            format!("u_light{}_direction", index),
            transform_direction(&view, light.direction),
        );
        set_vec4(
            backend,
            format!("u_light{}_diffuse", index),
            light.diffuse.to_array(),
        );
        set_vec4(
            backend,
            format!("u_light{}_specular", index),
            light.specular.to_array(),
        );
        set_vec4(
            backend,
            format!("u_light{}_ambient", index),
            light.ambient.to_array(),
        );
        set_f32(backend, format!("u_light{}_range", index), light.range);
        set_f32(backend, format!("u_light{}_falloff", index), light.falloff);
        set_f32(backend, format!("u_light{}_theta", index), light.theta);
        set_f32(backend, format!("u_light{}_phi", index), light.phi);
        if let Some(loc) = backend.uniform_location(
            entry.program,
            &format!("u_light{}_attenuation", index),
        ) {
            backend.set_uniform_vec3(
                loc,
                [light.attenuation0, light.attenuation1, light.attenuation2],
            );
        }
    }

    // texture matrices and bump parameters for transformed/bump stages
    for stage in 0..MAX_TEXTURE_STAGES {
        let s = state.stages[stage];
        if s.texture_transform_flags != crate::d3d8::D3DTTFF_DISABLE {
            if let Some(loc) =
                backend.uniform_location(entry.program, &format!("u_texture_matrix[{}]", stage))
            {
                backend.set_uniform_mat4(loc, state.transforms.texture[stage].as_rows());
            }
        }
        let is_bump = s.color_op == crate::d3d8::TextureOp::BumpEnvMap as Dword
            || s.color_op == crate::d3d8::TextureOp::BumpEnvMapLuminance as Dword;
        if is_bump {
            if let Some(loc) =
                backend.uniform_location(entry.program, &format!("u_bumpEnvMat[{}]", stage))
            {
                backend.set_uniform_mat2(loc, s.bump_env_mat);
            }
            if let Some(loc) =
                backend.uniform_location(entry.program, &format!("u_bump_lscale[{}]", stage))
            {
                backend.set_uniform_f32(loc, s.bump_env_lscale);
            }
            if let Some(loc) =
                backend.uniform_location(entry.program, &format!("u_bump_loffset[{}]", stage))
            {
                backend.set_uniform_f32(loc, s.bump_env_loffset);
            }
        }
    }
}
