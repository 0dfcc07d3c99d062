//! Backend abstraction seam.
//!
//! One uniform interface over the GL3 / GLES3 / WebGPU backends. The state
//! manager and the shader pipeline speak only these typed values; each
//! platform backend maps them onto its own API. The crate itself ships the
//! headless recording implementation used by tests and tooling; real
//! context-owning backends plug in from outside.

mod headless;
pub mod translate;

pub use self::headless::HeadlessBackend;

use crate::d3d8::ClearFlags;
use crate::error::BackendError;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ShaderId(pub u32);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ProgramId(pub u32);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct TextureId(pub u32);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct BufferId(pub u32);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct UniformLocation(pub i32);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

/// Retrieved program binary plus the backend-specific format id it was
/// produced under.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgramBinary {
    pub format: u32,
    pub data: Vec<u8>,
}

/// Static backend properties queried once at device creation.
#[derive(Copy, Clone, Debug)]
pub struct BackendCaps {
    pub program_binaries: bool,
    pub anisotropic_filtering: bool,
    pub sampler_lod_bias: bool,
    pub native_triangle_fan: bool,
    /// Hash of the context version string; binary-cache entries built under
    /// a different hash are treated as absent.
    pub gl_version_hash: u32,
    /// Hash of the advertised extension set.
    pub extension_hash: u32,
}

// ---------------------------------------------------------------------------
// Typed state values
// ---------------------------------------------------------------------------

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
    DstColor,
    OneMinusDstColor,
    SrcAlphaSaturate,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BlendEquation {
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Never,
    Less,
    Equal,
    LessOrEqual,
    Greater,
    NotEqual,
    GreaterOrEqual,
    Always,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum StencilAction {
    Keep,
    Zero,
    Replace,
    IncrementAndClamp,
    DecrementAndClamp,
    Invert,
    IncrementAndWrap,
    DecrementAndWrap,
}

/// Cull enable and face folded together; D3D8 has no separate toggles.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CullState {
    Disabled,
    Back,
    Front,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PolygonMode {
    Point,
    Line,
    Fill,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AddressMode {
    Repeat,
    MirrorRepeat,
    ClampToEdge,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FilterMode {
    Nearest,
    Linear,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PrimitiveTopology {
    Points,
    Lines,
    LineStrip,
    Triangles,
    TriangleStrip,
    TriangleFan,
}

/// The seam every platform backend implements.
///
/// All calls happen on the render thread, which owns the context; none of
/// them may be issued from the application thread.
pub trait RenderBackend: Send {
    fn caps(&self) -> BackendCaps;

    // -- shaders and programs ------------------------------------------------
    fn compile_shader(&mut self, stage: ShaderStage, source: &str)
        -> Result<ShaderId, BackendError>;
    fn delete_shader(&mut self, shader: ShaderId);
    /// Attribute bindings are applied before the link, `(name, location)`.
    fn link_program(
        &mut self,
        vs: ShaderId,
        fs: ShaderId,
        attribute_bindings: &[(&str, u32)],
    ) -> Result<ProgramId, BackendError>;
    fn delete_program(&mut self, program: ProgramId);
    fn use_program(&mut self, program: ProgramId);
    fn uniform_location(&mut self, program: ProgramId, name: &str) -> Option<UniformLocation>;
    fn get_program_binary(&mut self, program: ProgramId) -> Option<ProgramBinary>;
    fn load_program_binary(&mut self, binary: &ProgramBinary) -> Result<ProgramId, BackendError>;

    // -- uniforms ------------------------------------------------------------
    fn set_uniform_f32(&mut self, loc: UniformLocation, v: f32);
    fn set_uniform_i32(&mut self, loc: UniformLocation, v: i32);
    fn set_uniform_vec3(&mut self, loc: UniformLocation, v: [f32; 3]);
    fn set_uniform_vec4(&mut self, loc: UniformLocation, v: [f32; 4]);
    /// One ranged upload covering `values.len()` consecutive array elements.
    fn set_uniform_vec4_array(&mut self, loc: UniformLocation, values: &[[f32; 4]]);
    fn set_uniform_ivec4_array(&mut self, loc: UniformLocation, values: &[[i32; 4]]);
    fn set_uniform_int_array(&mut self, loc: UniformLocation, values: &[i32]);
    /// Matrix handed over row-major; the backend transposes on upload when
    /// its API wants column-major.
    fn set_uniform_mat4(&mut self, loc: UniformLocation, row_major: [f32; 16]);
    fn set_uniform_mat3(&mut self, loc: UniformLocation, row_major: [f32; 9]);
    fn set_uniform_mat2(&mut self, loc: UniformLocation, row_major: [f32; 4]);

    // -- fixed state ---------------------------------------------------------
    fn set_depth_test(&mut self, enabled: bool);
    fn set_depth_write(&mut self, enabled: bool);
    fn set_depth_func(&mut self, func: CompareOp);
    fn set_polygon_offset(&mut self, enabled: bool, factor: f32, units: f32);
    fn set_blend_enable(&mut self, enabled: bool);
    fn set_blend_func(&mut self, src: BlendFactor, dst: BlendFactor);
    fn set_blend_equation(&mut self, eq: BlendEquation);
    fn set_cull(&mut self, cull: CullState);
    fn set_polygon_mode(&mut self, mode: PolygonMode);
    fn set_stencil_test(&mut self, enabled: bool);
    /// D3D8 stencil state is symmetric; backends apply it to both faces.
    fn set_stencil_func(&mut self, func: CompareOp, reference: i32, mask: u32);
    fn set_stencil_op(
        &mut self,
        fail: StencilAction,
        depth_fail: StencilAction,
        pass: StencilAction,
    );
    fn set_stencil_write_mask(&mut self, mask: u32);
    fn set_scissor_test(&mut self, enabled: bool);
    fn set_scissor_rect(&mut self, x: i32, y: i32, width: i32, height: i32);
    fn set_color_write(&mut self, red: bool, green: bool, blue: bool, alpha: bool);
    fn set_viewport(&mut self, x: i32, y: i32, width: i32, height: i32, min_z: f32, max_z: f32);

    // -- samplers ------------------------------------------------------------
    fn bind_texture(&mut self, unit: u32, texture: TextureId);
    fn set_sampler_filters(
        &mut self,
        unit: u32,
        min: FilterMode,
        mag: FilterMode,
        mip: Option<FilterMode>,
    );
    fn set_sampler_address(&mut self, unit: u32, u: AddressMode, v: AddressMode, w: AddressMode);
    fn set_sampler_anisotropy(&mut self, unit: u32, max_anisotropy: u32);
    fn set_sampler_lod_bias(&mut self, unit: u32, bias: f32);

    // -- geometry ------------------------------------------------------------
    /// Describe the vertex fetch layout for subsequent draws.
    fn set_vertex_layout(&mut self, layout: &crate::fvf::VertexLayout);
    fn bind_vertex_stream(&mut self, stream: u32, buffer: BufferId, stride: u32);
    fn bind_index_buffer(&mut self, buffer: BufferId);

    // -- commands ------------------------------------------------------------
    fn clear(&mut self, flags: ClearFlags, color: [f32; 4], depth: f32, stencil: u32);
    fn draw(&mut self, topology: PrimitiveTopology, first_vertex: u32, vertex_count: u32);
    /// Indexed draw against the bound index buffer. Backends without a
    /// native triangle fan synthesize one via `translate::expand_triangle_fan`.
    fn draw_indexed(
        &mut self,
        topology: PrimitiveTopology,
        index_count: u32,
        start_index: u32,
        base_vertex: i32,
    );
    /// Draw from user memory; the payload is uploaded transiently.
    fn draw_up(
        &mut self,
        topology: PrimitiveTopology,
        vertex_count: u32,
        vertex_data: &[u8],
        stride: u32,
    );
    /// Presents the backbuffer; reports context loss.
    fn present(&mut self) -> Result<(), BackendError>;
}
