//! Recording backend.
//!
//! Fabricates object ids, resolves every uniform name to a stable
//! location, and keeps counters plus a value log so tests can assert on
//! exactly what the translation layer issued. Takes the role the GL stub
//! objects play for context-less test runs.

use fxhash::FxHashMap;

use crate::d3d8::ClearFlags;
use crate::error::BackendError;

use super::{
    AddressMode, BackendCaps, BlendEquation, BlendFactor, CompareOp, CullState, FilterMode,
    PolygonMode, PrimitiveTopology, ProgramBinary, ProgramId, RenderBackend, ShaderId,
    ShaderStage, StencilAction, TextureId, UniformLocation,
};

#[derive(Clone, Debug, PartialEq)]
pub struct RecordedDraw {
    pub topology: PrimitiveTopology,
    pub first_vertex: u32,
    pub vertex_count: u32,
    pub indexed: bool,
    pub program: Option<ProgramId>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RecordedUpload {
    pub location: UniformLocation,
    pub register_count: usize,
}

#[derive(Default, Clone, Debug)]
pub struct CallCounters {
    pub shaders_compiled: usize,
    pub programs_linked: usize,
    pub binary_loads: usize,
    pub state_calls: usize,
    pub sampler_calls: usize,
    pub uniform_calls: usize,
    pub vec4_array_uploads: usize,
    pub draws: usize,
    pub clears: usize,
    pub presents: usize,
}

pub struct HeadlessBackend {
    caps: BackendCaps,
    next_shader: u32,
    next_program: u32,
    shader_sources: FxHashMap<ShaderId, (ShaderStage, String)>,
    program_shaders: FxHashMap<ProgramId, (ShaderId, ShaderId)>,
    program_bindings: FxHashMap<ProgramId, Vec<(String, u32)>>,
    uniform_locations: FxHashMap<(ProgramId, String), UniformLocation>,
    next_location: i32,
    missing_uniforms: Vec<String>,
    current_program: Option<ProgramId>,
    /// Uniform values keyed by location of the first register written.
    pub uniform_values: FxHashMap<i32, Vec<[f32; 4]>>,
    pub uploads: Vec<RecordedUpload>,
    pub draws: Vec<RecordedDraw>,
    pub counters: CallCounters,
    /// When set, `present` reports a lost context once.
    pub fail_next_present: bool,
    /// When set, every compile fails (for stub-program paths).
    pub fail_compiles: bool,
}

impl HeadlessBackend {
    pub fn new() -> HeadlessBackend {
        HeadlessBackend::with_caps(BackendCaps {
            program_binaries: true,
            anisotropic_filtering: true,
            sampler_lod_bias: true,
            native_triangle_fan: true,
            gl_version_hash: 0x3300_4652,
            extension_hash: 0x00C0_FFEE,
        })
    }

    pub fn with_caps(caps: BackendCaps) -> HeadlessBackend {
        HeadlessBackend {
            caps,
            next_shader: 1,
            next_program: 1,
            shader_sources: FxHashMap::default(),
            program_shaders: FxHashMap::default(),
            program_bindings: FxHashMap::default(),
            uniform_locations: FxHashMap::default(),
            next_location: 0,
            missing_uniforms: Vec::new(),
            current_program: None,
            uniform_values: FxHashMap::default(),
            uploads: Vec::new(),
            draws: Vec::new(),
            counters: CallCounters::default(),
            fail_next_present: false,
            fail_compiles: false,
        }
    }

    /// Declare a uniform name this fake program does not contain.
    pub fn without_uniform(mut self, name: &str) -> HeadlessBackend {
        self.missing_uniforms.push(name.to_string());
        self
    }

    pub fn shader_source(&self, id: ShaderId) -> Option<&str> {
        self.shader_sources.get(&id).map(|(_, s)| s.as_str())
    }

    /// Sources of the vertex/fragment pair a program was linked from.
    pub fn program_sources(&self, id: ProgramId) -> Option<(&str, &str)> {
        let (vs, fs) = self.program_shaders.get(&id)?;
        Some((self.shader_source(*vs)?, self.shader_source(*fs)?))
    }

    pub fn attribute_bindings(&self, id: ProgramId) -> Option<&[(String, u32)]> {
        self.program_bindings.get(&id).map(|v| v.as_slice())
    }

    pub fn current_program(&self) -> Option<ProgramId> {
        self.current_program
    }

    pub fn uniform_value(&self, program: ProgramId, name: &str) -> Option<&[[f32; 4]]> {
        let loc = self
            .uniform_locations
            .get(&(program, name.to_string()))?;
        self.uniform_values.get(&loc.0).map(|v| v.as_slice())
    }

    pub fn clear_recordings(&mut self) {
        self.uploads.clear();
        self.draws.clear();
        self.counters = CallCounters::default();
    }

    fn record_upload(&mut self, loc: UniformLocation, count: usize) {
        self.counters.uniform_calls += 1;
        self.uploads.push(RecordedUpload {
            location: loc,
            register_count: count,
        });
    }
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        HeadlessBackend::new()
    }
}

impl RenderBackend for HeadlessBackend {
    fn caps(&self) -> BackendCaps {
        self.caps
    }

    fn compile_shader(
        &mut self,
        stage: ShaderStage,
        source: &str,
    ) -> Result<ShaderId, BackendError> {
        if self.fail_compiles {
            return Err(BackendError::Compile("forced failure".into()));
        }
        let id = ShaderId(self.next_shader);
        self.next_shader += 1;
        self.counters.shaders_compiled += 1;
        self.shader_sources.insert(id, (stage, source.to_string()));
        trace!("headless: compiled {:?} shader -> {:?}", stage, id);
        Ok(id)
    }

    fn delete_shader(&mut self, shader: ShaderId) {
        self.shader_sources.remove(&shader);
    }

    fn link_program(
        &mut self,
        vs: ShaderId,
        fs: ShaderId,
        attribute_bindings: &[(&str, u32)],
    ) -> Result<ProgramId, BackendError> {
        if !self.shader_sources.contains_key(&vs) || !self.shader_sources.contains_key(&fs) {
            return Err(BackendError::Link("unknown shader object".into()));
        }
        let id = ProgramId(self.next_program);
        self.next_program += 1;
        self.counters.programs_linked += 1;
        self.program_shaders.insert(id, (vs, fs));
        self.program_bindings.insert(
            id,
            attribute_bindings
                .iter()
                .map(|(n, l)| (n.to_string(), *l))
                .collect(),
        );
        Ok(id)
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.program_shaders.remove(&program);
        self.program_bindings.remove(&program);
        if self.current_program == Some(program) {
            self.current_program = None;
        }
    }

    fn use_program(&mut self, program: ProgramId) {
        self.current_program = Some(program);
    }

    fn uniform_location(&mut self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        if self.missing_uniforms.iter().any(|m| m == name) {
            return None;
        }
        if !self.program_shaders.contains_key(&program) {
            return None;
        }
        let key = (program, name.to_string());
        if let Some(loc) = self.uniform_locations.get(&key) {
            return Some(*loc);
        }
        // leave room so ranged uploads land on distinct locations
        let loc = UniformLocation(self.next_location);
        self.next_location += 128;
        self.uniform_locations.insert(key, loc);
        Some(loc)
    }

    fn get_program_binary(&mut self, program: ProgramId) -> Option<ProgramBinary> {
        if !self.caps.program_binaries {
            return None;
        }
        let (vs, fs) = self.program_shaders.get(&program)?;
        let (_, vs_src) = self.shader_sources.get(vs)?;
        let (_, fs_src) = self.shader_sources.get(fs)?;
        let mut data = Vec::with_capacity(vs_src.len() + fs_src.len() + 1);
        data.extend_from_slice(vs_src.as_bytes());
        data.push(0);
        data.extend_from_slice(fs_src.as_bytes());
        Some(ProgramBinary {
            format: 0xD00D,
            data,
        })
    }

    fn load_program_binary(&mut self, binary: &ProgramBinary) -> Result<ProgramId, BackendError> {
        if !self.caps.program_binaries {
            return Err(BackendError::BinariesUnsupported);
        }
        if binary.format != 0xD00D || binary.data.is_empty() {
            return Err(BackendError::BadBinary("unrecognized format".into()));
        }
        let id = ProgramId(self.next_program);
        self.next_program += 1;
        self.counters.binary_loads += 1;
        // a binary-restored program still resolves uniforms
        self.program_shaders.insert(id, (ShaderId(0), ShaderId(0)));
        self.shader_sources
            .entry(ShaderId(0))
            .or_insert((ShaderStage::Vertex, String::new()));
        Ok(id)
    }

    fn set_uniform_f32(&mut self, loc: UniformLocation, v: f32) {
        self.uniform_values.insert(loc.0, vec![[v, 0.0, 0.0, 0.0]]);
        self.record_upload(loc, 1);
    }

    fn set_uniform_i32(&mut self, loc: UniformLocation, v: i32) {
        self.uniform_values
            .insert(loc.0, vec![[v as f32, 0.0, 0.0, 0.0]]);
        self.record_upload(loc, 1);
    }

    fn set_uniform_vec3(&mut self, loc: UniformLocation, v: [f32; 3]) {
        self.uniform_values
            .insert(loc.0, vec![[v[0], v[1], v[2], 0.0]]);
        self.record_upload(loc, 1);
    }

    fn set_uniform_vec4(&mut self, loc: UniformLocation, v: [f32; 4]) {
        self.uniform_values.insert(loc.0, vec![v]);
        self.record_upload(loc, 1);
    }

    fn set_uniform_vec4_array(&mut self, loc: UniformLocation, values: &[[f32; 4]]) {
        self.counters.vec4_array_uploads += 1;
        self.uniform_values.insert(loc.0, values.to_vec());
        self.record_upload(loc, values.len());
    }

    fn set_uniform_ivec4_array(&mut self, loc: UniformLocation, values: &[[i32; 4]]) {
        self.counters.vec4_array_uploads += 1;
        self.uniform_values.insert(
            loc.0,
            values
                .iter()
                .map(|v| [v[0] as f32, v[1] as f32, v[2] as f32, v[3] as f32])
                .collect(),
        );
        self.record_upload(loc, values.len());
    }

    fn set_uniform_int_array(&mut self, loc: UniformLocation, values: &[i32]) {
        self.uniform_values.insert(
            loc.0,
            values.iter().map(|v| [*v as f32, 0.0, 0.0, 0.0]).collect(),
        );
        self.record_upload(loc, values.len());
    }

    fn set_uniform_mat4(&mut self, loc: UniformLocation, row_major: [f32; 16]) {
        let mut rows = Vec::with_capacity(4);
        for r in 0..4 {
            rows.push([
                row_major[r * 4],
                row_major[r * 4 + 1],
                row_major[r * 4 + 2],
                row_major[r * 4 + 3],
            ]);
        }
        self.uniform_values.insert(loc.0, rows);
        self.record_upload(loc, 4);
    }

    fn set_uniform_mat3(&mut self, loc: UniformLocation, row_major: [f32; 9]) {
        let mut rows = Vec::with_capacity(3);
        for r in 0..3 {
            rows.push([
                row_major[r * 3],
                row_major[r * 3 + 1],
                row_major[r * 3 + 2],
                0.0,
            ]);
        }
        self.uniform_values.insert(loc.0, rows);
        self.record_upload(loc, 3);
    }

    fn set_uniform_mat2(&mut self, loc: UniformLocation, row_major: [f32; 4]) {
        self.uniform_values.insert(
            loc.0,
            vec![[row_major[0], row_major[1], row_major[2], row_major[3]]],
        );
        self.record_upload(loc, 1);
    }

    fn set_depth_test(&mut self, _enabled: bool) {
        self.counters.state_calls += 1;
    }
    fn set_depth_write(&mut self, _enabled: bool) {
        self.counters.state_calls += 1;
    }
    fn set_depth_func(&mut self, _func: CompareOp) {
        self.counters.state_calls += 1;
    }
    fn set_polygon_offset(&mut self, _enabled: bool, _factor: f32, _units: f32) {
        self.counters.state_calls += 1;
    }
    fn set_blend_enable(&mut self, _enabled: bool) {
        self.counters.state_calls += 1;
    }
    fn set_blend_func(&mut self, _src: BlendFactor, _dst: BlendFactor) {
        self.counters.state_calls += 1;
    }
    fn set_blend_equation(&mut self, _eq: BlendEquation) {
        self.counters.state_calls += 1;
    }
    fn set_cull(&mut self, _cull: CullState) {
        self.counters.state_calls += 1;
    }
    fn set_polygon_mode(&mut self, _mode: PolygonMode) {
        self.counters.state_calls += 1;
    }
    fn set_stencil_test(&mut self, _enabled: bool) {
        self.counters.state_calls += 1;
    }
    fn set_stencil_func(&mut self, _func: CompareOp, _reference: i32, _mask: u32) {
        self.counters.state_calls += 1;
    }
    fn set_stencil_op(
        &mut self,
        _fail: StencilAction,
        _depth_fail: StencilAction,
        _pass: StencilAction,
    ) {
        self.counters.state_calls += 1;
    }
    fn set_stencil_write_mask(&mut self, _mask: u32) {
        self.counters.state_calls += 1;
    }
    fn set_scissor_test(&mut self, _enabled: bool) {
        self.counters.state_calls += 1;
    }
    fn set_scissor_rect(&mut self, _x: i32, _y: i32, _width: i32, _height: i32) {
        self.counters.state_calls += 1;
    }
    fn set_color_write(&mut self, _r: bool, _g: bool, _b: bool, _a: bool) {
        self.counters.state_calls += 1;
    }
    fn set_viewport(&mut self, _x: i32, _y: i32, _w: i32, _h: i32, _min_z: f32, _max_z: f32) {
        self.counters.state_calls += 1;
    }

    fn bind_texture(&mut self, _unit: u32, _texture: TextureId) {
        self.counters.sampler_calls += 1;
    }
    fn set_sampler_filters(
        &mut self,
        _unit: u32,
        _min: FilterMode,
        _mag: FilterMode,
        _mip: Option<FilterMode>,
    ) {
        self.counters.sampler_calls += 1;
    }
    fn set_sampler_address(
        &mut self,
        _unit: u32,
        _u: AddressMode,
        _v: AddressMode,
        _w: AddressMode,
    ) {
        self.counters.sampler_calls += 1;
    }
    fn set_sampler_anisotropy(&mut self, _unit: u32, _max_anisotropy: u32) {
        self.counters.sampler_calls += 1;
    }
    fn set_sampler_lod_bias(&mut self, _unit: u32, _bias: f32) {
        self.counters.sampler_calls += 1;
    }

    fn set_vertex_layout(&mut self, _layout: &crate::fvf::VertexLayout) {
        self.counters.state_calls += 1;
    }

    fn bind_vertex_stream(&mut self, _stream: u32, _buffer: super::BufferId, _stride: u32) {
        self.counters.state_calls += 1;
    }

    fn bind_index_buffer(&mut self, _buffer: super::BufferId) {
        self.counters.state_calls += 1;
    }

    fn clear(&mut self, _flags: ClearFlags, _color: [f32; 4], _depth: f32, _stencil: u32) {
        self.counters.clears += 1;
    }

    fn draw(&mut self, topology: PrimitiveTopology, first_vertex: u32, vertex_count: u32) {
        self.counters.draws += 1;
        self.draws.push(RecordedDraw {
            topology,
            first_vertex,
            vertex_count,
            indexed: false,
            program: self.current_program,
        });
    }

    fn draw_indexed(
        &mut self,
        topology: PrimitiveTopology,
        index_count: u32,
        start_index: u32,
        _base_vertex: i32,
    ) {
        self.counters.draws += 1;
        self.draws.push(RecordedDraw {
            topology,
            first_vertex: start_index,
            vertex_count: index_count,
            indexed: true,
            program: self.current_program,
        });
    }

    fn draw_up(
        &mut self,
        topology: PrimitiveTopology,
        vertex_count: u32,
        _vertex_data: &[u8],
        _stride: u32,
    ) {
        self.counters.draws += 1;
        self.draws.push(RecordedDraw {
            topology,
            first_vertex: 0,
            vertex_count,
            indexed: false,
            program: self.current_program,
        });
    }

    fn present(&mut self) -> Result<(), BackendError> {
        self.counters.presents += 1;
        if self.fail_next_present {
            self.fail_next_present = false;
            return Err(BackendError::Compile("context lost".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_locations_are_stable_per_program() {
        let mut b = HeadlessBackend::new();
        let vs = b.compile_shader(ShaderStage::Vertex, "void main(){}").unwrap();
        let fs = b.compile_shader(ShaderStage::Fragment, "void main(){}").unwrap();
        let p = b.link_program(vs, fs, &[("a_position", 0)]).unwrap();
        let a = b.uniform_location(p, "c0").unwrap();
        let again = b.uniform_location(p, "c0").unwrap();
        assert_eq!(a, again);
        let other = b.uniform_location(p, "c1").unwrap();
        assert_ne!(a, other);
    }

    #[test]
    fn missing_uniforms_resolve_to_none() {
        let mut b = HeadlessBackend::new().without_uniform("u_fog_color");
        let vs = b.compile_shader(ShaderStage::Vertex, "").unwrap();
        let fs = b.compile_shader(ShaderStage::Fragment, "").unwrap();
        let p = b.link_program(vs, fs, &[]).unwrap();
        assert!(b.uniform_location(p, "u_fog_color").is_none());
        assert!(b.uniform_location(p, "u_alpha_ref").is_some());
    }

    #[test]
    fn binary_round_trip() {
        let mut b = HeadlessBackend::new();
        let vs = b.compile_shader(ShaderStage::Vertex, "vs").unwrap();
        let fs = b.compile_shader(ShaderStage::Fragment, "fs").unwrap();
        let p = b.link_program(vs, fs, &[]).unwrap();
        let binary = b.get_program_binary(p).unwrap();
        let restored = b.load_program_binary(&binary).unwrap();
        assert_ne!(restored, p);
        assert_eq!(b.counters.binary_loads, 1);
    }
}
