//! Fixed-function pipeline shader synthesis.
//!
//! When no vertex shader is bound, the runtime derives a program from the
//! transform/lighting/texture-stage state. The state vector below is the
//! cache key: everything that changes generated code is in it, nothing
//! else, so two states hashing equal produce identical source.

mod fragment;
mod vertex;

pub use self::fragment::generate_fragment_shader;
pub use self::vertex::generate_vertex_shader;

use std::hash::{Hash, Hasher};

use crate::d3d8::{CmpFunc, Dword, FogMode, LightType, MaterialColorSource, TextureOp};
use crate::fvf::VertexLayout;
use crate::shader::ShaderDialect;

pub const MAX_STAGES: usize = 8;

/// Texture-coordinate source for a stage (high word of
/// `D3DTSS_TEXCOORDINDEX`).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TexGen {
    PassThru,
    CameraSpaceNormal,
    CameraSpacePosition,
    CameraSpaceReflection,
}

impl TexGen {
    pub fn from_texcoord_index(value: Dword) -> TexGen {
        match value & 0xFFFF_0000 {
            crate::d3d8::D3DTSS_TCI_CAMERASPACENORMAL => TexGen::CameraSpaceNormal,
            crate::d3d8::D3DTSS_TCI_CAMERASPACEPOSITION => TexGen::CameraSpacePosition,
            crate::d3d8::D3DTSS_TCI_CAMERASPACEREFLECTIONVECTOR => TexGen::CameraSpaceReflection,
            _ => TexGen::PassThru,
        }
    }

    pub fn needs_normal(self) -> bool {
        matches!(self, TexGen::CameraSpaceNormal | TexGen::CameraSpaceReflection)
    }
}

/// Texture transform applied to a stage's coordinates.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct TexTransform {
    pub count: u8,
    pub projected: bool,
}

impl TexTransform {
    pub const DISABLED: TexTransform = TexTransform {
        count: 0,
        projected: false,
    };

    pub fn from_flags(flags: Dword) -> TexTransform {
        TexTransform {
            count: (flags & 0xFF).min(4) as u8,
            projected: flags & crate::d3d8::D3DTTFF_PROJECTED != 0,
        }
    }

    pub fn enabled(self) -> bool {
        self.count > 0
    }
}

/// Per-stage combiner state that affects code generation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct StageState {
    pub texture_bound: bool,
    pub color_op: TextureOp,
    pub color_arg0: Dword,
    pub color_arg1: Dword,
    pub color_arg2: Dword,
    pub alpha_op: TextureOp,
    pub alpha_arg0: Dword,
    pub alpha_arg1: Dword,
    pub alpha_arg2: Dword,
    /// Low word of `D3DTSS_TEXCOORDINDEX`.
    pub texcoord_index: u8,
    pub texgen: TexGen,
    pub transform: TexTransform,
    /// `D3DTSS_RESULTARG == D3DTA_TEMP`.
    pub result_temp: bool,
}

impl Default for StageState {
    fn default() -> StageState {
        StageState {
            texture_bound: false,
            color_op: TextureOp::Disable,
            color_arg0: crate::d3d8::D3DTA_CURRENT,
            color_arg1: crate::d3d8::D3DTA_TEXTURE,
            color_arg2: crate::d3d8::D3DTA_CURRENT,
            alpha_op: TextureOp::Disable,
            alpha_arg0: crate::d3d8::D3DTA_CURRENT,
            alpha_arg1: crate::d3d8::D3DTA_TEXTURE,
            alpha_arg2: crate::d3d8::D3DTA_CURRENT,
            texcoord_index: 0,
            texgen: TexGen::PassThru,
            transform: TexTransform::DISABLED,
            result_temp: false,
        }
    }
}

/// Per-light state that affects code generation. `None` marks a disabled
/// slot; the light's parameters are uniforms, its type is code.
pub type LightSlot = Option<LightType>;

/// The full fixed-function state vector the generator keys on.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FixedFunctionState {
    pub fvf: Dword,
    pub lighting: bool,
    pub color_vertex: bool,
    pub specular_enable: bool,
    pub normalize_normals: bool,
    pub lights: [LightSlot; 8],
    pub diffuse_source: MaterialColorSource,
    pub specular_source: MaterialColorSource,
    pub ambient_source: MaterialColorSource,
    pub emissive_source: MaterialColorSource,
    pub fog_enabled: bool,
    pub fog_mode: FogMode,
    pub range_fog: bool,
    /// `None` when alpha test is off or the function is ALWAYS.
    pub alpha_test: Option<CmpFunc>,
    pub stages: [StageState; MAX_STAGES],
}

impl Default for FixedFunctionState {
    fn default() -> FixedFunctionState {
        FixedFunctionState {
            fvf: 0,
            lighting: false,
            color_vertex: true,
            specular_enable: false,
            normalize_normals: false,
            lights: [None; 8],
            diffuse_source: MaterialColorSource::Color1,
            specular_source: MaterialColorSource::Color2,
            ambient_source: MaterialColorSource::Material,
            emissive_source: MaterialColorSource::Material,
            fog_enabled: false,
            fog_mode: FogMode::None,
            range_fog: false,
            alpha_test: None,
            stages: [StageState::default(); MAX_STAGES],
        }
    }
}

impl FixedFunctionState {
    /// Stages that actually run: the combiner chain stops at the first
    /// stage whose color op is DISABLE.
    pub fn active_stage_count(&self) -> usize {
        self.stages
            .iter()
            .position(|s| s.color_op == TextureOp::Disable)
            .unwrap_or(MAX_STAGES)
    }

    pub fn active_light_count(&self) -> usize {
        self.lights.iter().filter(|l| l.is_some()).count()
    }

    /// Cache key; equal hashes come from equal states and therefore equal
    /// generated source.
    pub fn state_hash(&self) -> u64 {
        let mut hasher = fxhash::FxHasher::default();
        self.hash(&mut hasher);
        hasher.finish()
    }

    /// True when any running stage samples a bump-environment op.
    pub fn uses_bump_mapping(&self) -> bool {
        self.stages[..self.active_stage_count()].iter().any(|s| {
            matches!(
                s.color_op,
                TextureOp::BumpEnvMap | TextureOp::BumpEnvMapLuminance
            )
        })
    }
}

/// Generated program sources for one fixed-function state.
pub struct GeneratedProgram {
    pub state_hash: u64,
    pub vertex_source: String,
    pub fragment_source: String,
}

pub fn generate_program(
    state: &FixedFunctionState,
    layout: &VertexLayout,
    dialect: &ShaderDialect,
) -> GeneratedProgram {
    GeneratedProgram {
        state_hash: state.state_hash(),
        vertex_source: generate_vertex_shader(state, layout, dialect),
        fragment_source: generate_fragment_shader(state, layout, dialect),
    }
}

#[cfg(test)]
pub(crate) mod tests_support {
    use super::*;
    use crate::d3d8::{D3DTA_DIFFUSE, D3DTA_TEXTURE};
    use crate::fvf;

    /// Stage 0 modulating texture with diffuse over `XYZ|DIFFUSE|TEX1`,
    /// the shape most scenario tests start from.
    pub fn modulated_quad_state() -> FixedFunctionState {
        let mut state = FixedFunctionState::default();
        state.fvf = fvf::D3DFVF_XYZ | fvf::D3DFVF_DIFFUSE | fvf::d3dfvf_tex(1);
        state.stages[0] = StageState {
            texture_bound: true,
            color_op: TextureOp::Modulate,
            color_arg1: D3DTA_TEXTURE,
            color_arg2: D3DTA_DIFFUSE,
            alpha_op: TextureOp::SelectArg1,
            alpha_arg1: D3DTA_TEXTURE,
            ..StageState::default()
        };
        state
    }
}

#[cfg(test)]
mod tests {
    use super::tests_support::modulated_quad_state;
    use super::*;
    use crate::fvf;

    fn textured_state() -> FixedFunctionState {
        modulated_quad_state()
    }

    #[test]
    fn equal_states_hash_equal() {
        let a = textured_state();
        let b = textured_state();
        assert_eq!(a.state_hash(), b.state_hash());
        assert_eq!(a, b);
    }

    #[test]
    fn code_affecting_changes_change_the_hash() {
        let base = textured_state();

        let mut lit = base.clone();
        lit.lighting = true;
        lit.lights[0] = Some(LightType::Directional);
        assert_ne!(base.state_hash(), lit.state_hash());

        let mut alpha = base.clone();
        alpha.alpha_test = Some(CmpFunc::Greater);
        assert_ne!(base.state_hash(), alpha.state_hash());

        let mut other_op = base.clone();
        other_op.stages[0].color_op = TextureOp::Add;
        assert_ne!(base.state_hash(), other_op.state_hash());

        let mut other_fvf = base.clone();
        other_fvf.fvf = fvf::D3DFVF_XYZ | fvf::d3dfvf_tex(1);
        assert_ne!(base.state_hash(), other_fvf.state_hash());
    }

    #[test]
    fn identical_hashes_mean_identical_source() {
        let a = textured_state();
        let b = textured_state();
        let layout = fvf::parse_fvf(a.fvf).unwrap();
        let dialect = ShaderDialect::default();
        let pa = generate_program(&a, &layout, &dialect);
        let pb = generate_program(&b, &layout, &dialect);
        assert_eq!(pa.state_hash, pb.state_hash);
        assert_eq!(pa.vertex_source, pb.vertex_source);
        assert_eq!(pa.fragment_source, pb.fragment_source);
    }

    #[test]
    fn stage_chain_stops_at_disable() {
        let mut state = textured_state();
        assert_eq!(state.active_stage_count(), 1);
        state.stages[1] = state.stages[0];
        assert_eq!(state.active_stage_count(), 2);
        state.stages[0].color_op = TextureOp::Disable;
        assert_eq!(state.active_stage_count(), 0);
    }

    #[test]
    fn texgen_decodes_from_texcoord_index() {
        use crate::d3d8::*;
        assert_eq!(TexGen::from_texcoord_index(2), TexGen::PassThru);
        assert_eq!(
            TexGen::from_texcoord_index(D3DTSS_TCI_CAMERASPACENORMAL | 1),
            TexGen::CameraSpaceNormal
        );
        assert_eq!(
            TexGen::from_texcoord_index(D3DTSS_TCI_CAMERASPACEREFLECTIONVECTOR),
            TexGen::CameraSpaceReflection
        );
    }

    #[test]
    fn transform_flags_decode() {
        use crate::d3d8::*;
        let t = TexTransform::from_flags(D3DTTFF_COUNT2);
        assert_eq!(t.count, 2);
        assert!(!t.projected);
        let p = TexTransform::from_flags(D3DTTFF_COUNT3 | D3DTTFF_PROJECTED);
        assert_eq!(p.count, 3);
        assert!(p.projected);
        assert!(!TexTransform::from_flags(D3DTTFF_DISABLE).enabled());
    }
}
