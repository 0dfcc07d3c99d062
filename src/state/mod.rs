//! The device state shadow.
//!
//! Every D3D8 render, texture-stage, transform, light, material, viewport
//! and clip-plane state lives here, with documented defaults. Setters are
//! shadow-only and constant time; `apply_*` flushes to the backend before
//! a draw, going through a per-value cache so re-setting an identical
//! value never reaches the API.

pub mod blocks;
pub mod transform;
pub mod validate;

pub use self::blocks::{AppliedBindings, DeviceBindings, StateBlock, StreamBinding};
pub use self::transform::TransformState;
pub use self::validate::StateViolation;

use fxhash::FxHashMap;
use ordered_float::NotNan;

use crate::backend::{translate, RenderBackend, TextureId};
use crate::d3d8::{
    CmpFunc, CullMode, Dword, FogMode, Light, Material, Matrix, RenderStateType, Rect,
    StateBlockType, TextureOp, TextureStageStateType, TransformStateType, Viewport,
    MAX_CLIP_PLANES, MAX_LIGHTS, MAX_TEXTURE_STAGES,
};
use crate::fixed_function::{FixedFunctionState, StageState, TexGen, TexTransform};

/// Raw render-state shadow. Enum-valued states keep the application's
/// DWORD; conversion to typed values happens on use, so the validator can
/// still see out-of-range values that arrived through block replay or
/// direct construction in tests.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderStates {
    pub z_enable: Dword,
    pub fill_mode: Dword,
    pub shade_mode: Dword,
    pub z_write_enable: Dword,
    pub alpha_test_enable: Dword,
    pub last_pixel: Dword,
    pub src_blend: Dword,
    pub dest_blend: Dword,
    pub cull_mode: Dword,
    pub z_func: Dword,
    pub alpha_ref: Dword,
    pub alpha_func: Dword,
    pub dither_enable: Dword,
    pub alpha_blend_enable: Dword,
    pub fog_enable: Dword,
    pub specular_enable: Dword,
    pub fog_color: Dword,
    pub fog_table_mode: Dword,
    pub fog_start: f32,
    pub fog_end: f32,
    pub fog_density: f32,
    pub z_bias: Dword,
    pub range_fog_enable: Dword,
    pub stencil_enable: Dword,
    pub stencil_fail: Dword,
    pub stencil_z_fail: Dword,
    pub stencil_pass: Dword,
    pub stencil_func: Dword,
    pub stencil_ref: Dword,
    pub stencil_mask: Dword,
    pub stencil_write_mask: Dword,
    pub texture_factor: Dword,
    pub clipping: Dword,
    pub lighting: Dword,
    pub ambient: Dword,
    pub fog_vertex_mode: Dword,
    pub color_vertex: Dword,
    pub local_viewer: Dword,
    pub normalize_normals: Dword,
    pub diffuse_material_source: Dword,
    pub specular_material_source: Dword,
    pub ambient_material_source: Dword,
    pub emissive_material_source: Dword,
    pub clip_plane_enable: Dword,
    pub point_size: f32,
    pub multisample_antialias: Dword,
    pub color_write_enable: Dword,
    pub blend_op: Dword,
    pub scissor_test_enable: Dword,
}

impl Default for RenderStates {
    fn default() -> RenderStates {
        RenderStates {
            z_enable: 1,
            fill_mode: crate::d3d8::FillMode::Solid as Dword,
            shade_mode: crate::d3d8::ShadeMode::Gouraud as Dword,
            z_write_enable: 1,
            alpha_test_enable: 0,
            last_pixel: 1,
            src_blend: crate::d3d8::BlendFactor::One as Dword,
            dest_blend: crate::d3d8::BlendFactor::Zero as Dword,
            cull_mode: CullMode::Ccw as Dword,
            z_func: CmpFunc::LessEqual as Dword,
            alpha_ref: 0,
            alpha_func: CmpFunc::Always as Dword,
            dither_enable: 0,
            alpha_blend_enable: 0,
            fog_enable: 0,
            specular_enable: 0,
            fog_color: 0,
            fog_table_mode: FogMode::None as Dword,
            fog_start: 0.0,
            fog_end: 1.0,
            fog_density: 1.0,
            z_bias: 0,
            range_fog_enable: 0,
            stencil_enable: 0,
            stencil_fail: crate::d3d8::StencilOp::Keep as Dword,
            stencil_z_fail: crate::d3d8::StencilOp::Keep as Dword,
            stencil_pass: crate::d3d8::StencilOp::Keep as Dword,
            stencil_func: CmpFunc::Always as Dword,
            stencil_ref: 0,
            stencil_mask: 0xFFFF_FFFF,
            stencil_write_mask: 0xFFFF_FFFF,
            texture_factor: 0xFFFF_FFFF,
            clipping: 1,
            lighting: 1,
            ambient: 0,
            fog_vertex_mode: FogMode::None as Dword,
            color_vertex: 1,
            local_viewer: 0,
            normalize_normals: 0,
            diffuse_material_source: crate::d3d8::MaterialColorSource::Color1 as Dword,
            specular_material_source: crate::d3d8::MaterialColorSource::Color2 as Dword,
            ambient_material_source: crate::d3d8::MaterialColorSource::Material as Dword,
            emissive_material_source: crate::d3d8::MaterialColorSource::Material as Dword,
            clip_plane_enable: 0,
            point_size: 1.0,
            multisample_antialias: 0,
            color_write_enable: 0xF,
            blend_op: crate::d3d8::BlendOp::Add as Dword,
            scissor_test_enable: 0,
        }
    }
}

/// Per-stage texture stage shadow; raw DWORDs for the same reason.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TextureStage {
    pub color_op: Dword,
    pub color_arg1: Dword,
    pub color_arg2: Dword,
    pub alpha_op: Dword,
    pub alpha_arg1: Dword,
    pub alpha_arg2: Dword,
    pub bump_env_mat: [f32; 4],
    pub texcoord_index: Dword,
    pub address_u: Dword,
    pub address_v: Dword,
    pub address_w: Dword,
    pub border_color: Dword,
    pub mag_filter: Dword,
    pub min_filter: Dword,
    pub mip_filter: Dword,
    pub mipmap_lod_bias: f32,
    pub max_mip_level: Dword,
    pub max_anisotropy: Dword,
    pub bump_env_lscale: f32,
    pub bump_env_loffset: f32,
    pub texture_transform_flags: Dword,
    pub color_arg0: Dword,
    pub alpha_arg0: Dword,
    pub result_arg: Dword,
}

impl TextureStage {
    fn default_for(stage: usize) -> TextureStage {
        TextureStage {
            color_op: if stage == 0 {
                TextureOp::Modulate as Dword
            } else {
                TextureOp::Disable as Dword
            },
            color_arg1: crate::d3d8::D3DTA_TEXTURE,
            color_arg2: crate::d3d8::D3DTA_CURRENT,
            alpha_op: if stage == 0 {
                TextureOp::SelectArg1 as Dword
            } else {
                TextureOp::Disable as Dword
            },
            alpha_arg1: crate::d3d8::D3DTA_TEXTURE,
            alpha_arg2: crate::d3d8::D3DTA_CURRENT,
            bump_env_mat: [0.0; 4],
            texcoord_index: stage as Dword,
            address_u: crate::d3d8::TextureAddress::Wrap as Dword,
            address_v: crate::d3d8::TextureAddress::Wrap as Dword,
            address_w: crate::d3d8::TextureAddress::Wrap as Dword,
            border_color: 0,
            mag_filter: crate::d3d8::TextureFilter::Point as Dword,
            min_filter: crate::d3d8::TextureFilter::Point as Dword,
            mip_filter: crate::d3d8::TextureFilter::None as Dword,
            mipmap_lod_bias: 0.0,
            max_mip_level: 0,
            max_anisotropy: 1,
            bump_env_lscale: 0.0,
            bump_env_loffset: 0.0,
            texture_transform_flags: crate::d3d8::D3DTTFF_DISABLE,
            color_arg0: crate::d3d8::D3DTA_CURRENT,
            alpha_arg0: crate::d3d8::D3DTA_CURRENT,
            result_arg: crate::d3d8::D3DTA_CURRENT,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LightSlot {
    pub light: Light,
    pub enabled: bool,
}

impl Default for LightSlot {
    fn default() -> LightSlot {
        LightSlot {
            light: Light::default(),
            enabled: false,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ClipPlane {
    pub plane: [f32; 4],
    pub enabled: bool,
}

// ---------------------------------------------------------------------------
// Backend value cache: unset slots issue unconditionally, matching slots
// swallow the call
// ---------------------------------------------------------------------------

fn update_cached<T: PartialEq + Copy>(slot: &mut Option<T>, new: T, apply: impl FnOnce()) {
    if slot.map_or(true, |old| old != new) {
        *slot = Some(new);
        apply();
    }
}

#[derive(Default)]
struct BackendCache {
    depth_test: Option<bool>,
    depth_write: Option<bool>,
    depth_func: Option<crate::backend::CompareOp>,
    polygon_offset: Option<Dword>,
    blend_enable: Option<bool>,
    blend_func: Option<(crate::backend::BlendFactor, crate::backend::BlendFactor)>,
    blend_eq: Option<crate::backend::BlendEquation>,
    cull: Option<crate::backend::CullState>,
    polygon_mode: Option<crate::backend::PolygonMode>,
    stencil_test: Option<bool>,
    stencil_func: Option<(crate::backend::CompareOp, i32, u32)>,
    stencil_op: Option<(
        crate::backend::StencilAction,
        crate::backend::StencilAction,
        crate::backend::StencilAction,
    )>,
    stencil_write_mask: Option<u32>,
    scissor_test: Option<bool>,
    scissor_rect: Option<Rect>,
    color_write: Option<Dword>,
    viewport: Option<Viewport>,
    textures: [Option<TextureId>; MAX_TEXTURE_STAGES],
    sampler_filters: [Option<(Dword, Dword, Dword)>; MAX_TEXTURE_STAGES],
    sampler_address: [Option<(Dword, Dword, Dword)>; MAX_TEXTURE_STAGES],
    sampler_anisotropy: [Option<Dword>; MAX_TEXTURE_STAGES],
    sampler_lod_bias: [Option<NotNan<f32>>; MAX_TEXTURE_STAGES],
}

// ---------------------------------------------------------------------------
// State manager
// ---------------------------------------------------------------------------

pub struct StateManager {
    pub render: RenderStates,
    pub stages: [TextureStage; MAX_TEXTURE_STAGES],
    pub transforms: TransformState,
    pub lights: [LightSlot; MAX_LIGHTS],
    pub material: Material,
    pub viewport: Viewport,
    pub scissor_rect: Rect,
    pub clip_planes: [ClipPlane; MAX_CLIP_PLANES],
    pub clip_status: (Dword, Dword),
    pub bound_textures: [Option<TextureId>; MAX_TEXTURE_STAGES],
    pub current_fvf: Dword,

    render_dirty: bool,
    transform_dirty: bool,
    texture_dirty: bool,
    light_dirty: bool,
    material_dirty: bool,
    viewport_dirty: bool,

    cache: BackendCache,

    state_blocks: FxHashMap<Dword, StateBlock>,
    recording: Option<StateBlock>,
    next_block_token: Dword,
}

impl StateManager {
    pub fn new() -> StateManager {
        StateManager {
            render: RenderStates::default(),
            stages: std::array::from_fn(TextureStage::default_for),
            transforms: TransformState::new(),
            lights: [LightSlot::default(); MAX_LIGHTS],
            material: Material::default(),
            viewport: Viewport::default(),
            scissor_rect: Rect::default(),
            clip_planes: [ClipPlane::default(); MAX_CLIP_PLANES],
            clip_status: (0, 0),
            bound_textures: [None; MAX_TEXTURE_STAGES],
            current_fvf: 0,
            render_dirty: true,
            transform_dirty: true,
            texture_dirty: true,
            light_dirty: true,
            material_dirty: true,
            viewport_dirty: true,
            cache: BackendCache::default(),
            state_blocks: FxHashMap::default(),
            recording: None,
            next_block_token: 1,
        }
    }

    /// Back to creation defaults; state blocks survive a reset.
    pub fn reset(&mut self) {
        let blocks = std::mem::take(&mut self.state_blocks);
        let next_token = self.next_block_token;
        *self = StateManager::new();
        self.state_blocks = blocks;
        self.next_block_token = next_token;
    }

    /// Forget every cached backend value; the next apply re-issues all of
    /// it. Used after a context loss or external GL activity.
    pub fn invalidate_cached_states(&mut self) {
        self.cache = BackendCache::default();
        self.render_dirty = true;
        self.texture_dirty = true;
        self.viewport_dirty = true;
    }

    // -- setters -------------------------------------------------------------

    /// Returns `false` for unknown states or out-of-range values; the
    /// shadow is untouched in that case.
    pub fn set_render_state(&mut self, state: Dword, value: Dword) -> bool {
        let Some(kind) = RenderStateType::from_dword(state) else {
            return false;
        };
        if !render_state_value_ok(kind, value) {
            return false;
        }
        if let Some(block) = self.recording.as_mut() {
            block.record_render_state(state, value);
        }
        self.store_render_state(kind, value);
        self.render_dirty = true;
        true
    }

    fn store_render_state(&mut self, kind: RenderStateType, value: Dword) {
        use RenderStateType as RS;
        let r = &mut self.render;
        match kind {
            RS::ZEnable => r.z_enable = value,
            RS::FillMode => r.fill_mode = value,
            RS::ShadeMode => r.shade_mode = value,
            RS::ZWriteEnable => r.z_write_enable = value,
            RS::AlphaTestEnable => r.alpha_test_enable = value,
            RS::LastPixel => r.last_pixel = value,
            RS::SrcBlend => r.src_blend = value,
            RS::DestBlend => r.dest_blend = value,
            RS::CullMode => r.cull_mode = value,
            RS::ZFunc => r.z_func = value,
            RS::AlphaRef => r.alpha_ref = value,
            RS::AlphaFunc => r.alpha_func = value,
            RS::DitherEnable => r.dither_enable = value,
            RS::AlphaBlendEnable => r.alpha_blend_enable = value,
            RS::FogEnable => r.fog_enable = value,
            RS::SpecularEnable => r.specular_enable = value,
            RS::FogColor => r.fog_color = value,
            RS::FogTableMode => r.fog_table_mode = value,
            RS::FogStart => r.fog_start = f32::from_bits(value),
            RS::FogEnd => r.fog_end = f32::from_bits(value),
            RS::FogDensity => r.fog_density = f32::from_bits(value),
            RS::ZBias => r.z_bias = value,
            RS::RangeFogEnable => r.range_fog_enable = value,
            RS::StencilEnable => r.stencil_enable = value,
            RS::StencilFail => r.stencil_fail = value,
            RS::StencilZFail => r.stencil_z_fail = value,
            RS::StencilPass => r.stencil_pass = value,
            RS::StencilFunc => r.stencil_func = value,
            RS::StencilRef => r.stencil_ref = value,
            RS::StencilMask => r.stencil_mask = value,
            RS::StencilWriteMask => r.stencil_write_mask = value,
            RS::TextureFactor => r.texture_factor = value,
            RS::Clipping => r.clipping = value,
            RS::Lighting => r.lighting = value,
            RS::Ambient => r.ambient = value,
            RS::FogVertexMode => r.fog_vertex_mode = value,
            RS::ColorVertex => r.color_vertex = value,
            RS::LocalViewer => r.local_viewer = value,
            RS::NormalizeNormals => r.normalize_normals = value,
            RS::DiffuseMaterialSource => r.diffuse_material_source = value,
            RS::SpecularMaterialSource => r.specular_material_source = value,
            RS::AmbientMaterialSource => r.ambient_material_source = value,
            RS::EmissiveMaterialSource => r.emissive_material_source = value,
            RS::ClipPlaneEnable => r.clip_plane_enable = value,
            RS::PointSize => r.point_size = f32::from_bits(value),
            RS::MultisampleAntialias => r.multisample_antialias = value,
            RS::ColorWriteEnable => r.color_write_enable = value,
            RS::BlendOp => r.blend_op = value,
            RS::ScissorTestEnable => r.scissor_test_enable = value,
        }
    }

    pub fn get_render_state(&self, state: Dword) -> Option<Dword> {
        use RenderStateType as RS;
        let kind = RenderStateType::from_dword(state)?;
        let r = &self.render;
        Some(match kind {
            RS::ZEnable => r.z_enable,
            RS::FillMode => r.fill_mode,
            RS::ShadeMode => r.shade_mode,
            RS::ZWriteEnable => r.z_write_enable,
            RS::AlphaTestEnable => r.alpha_test_enable,
            RS::LastPixel => r.last_pixel,
            RS::SrcBlend => r.src_blend,
            RS::DestBlend => r.dest_blend,
            RS::CullMode => r.cull_mode,
            RS::ZFunc => r.z_func,
            RS::AlphaRef => r.alpha_ref,
            RS::AlphaFunc => r.alpha_func,
            RS::DitherEnable => r.dither_enable,
            RS::AlphaBlendEnable => r.alpha_blend_enable,
            RS::FogEnable => r.fog_enable,
            RS::SpecularEnable => r.specular_enable,
            RS::FogColor => r.fog_color,
            RS::FogTableMode => r.fog_table_mode,
            RS::FogStart => r.fog_start.to_bits(),
            RS::FogEnd => r.fog_end.to_bits(),
            RS::FogDensity => r.fog_density.to_bits(),
            RS::ZBias => r.z_bias,
            RS::RangeFogEnable => r.range_fog_enable,
            RS::StencilEnable => r.stencil_enable,
            RS::StencilFail => r.stencil_fail,
            RS::StencilZFail => r.stencil_z_fail,
            RS::StencilPass => r.stencil_pass,
            RS::StencilFunc => r.stencil_func,
            RS::StencilRef => r.stencil_ref,
            RS::StencilMask => r.stencil_mask,
            RS::StencilWriteMask => r.stencil_write_mask,
            RS::TextureFactor => r.texture_factor,
            RS::Clipping => r.clipping,
            RS::Lighting => r.lighting,
            RS::Ambient => r.ambient,
            RS::FogVertexMode => r.fog_vertex_mode,
            RS::ColorVertex => r.color_vertex,
            RS::LocalViewer => r.local_viewer,
            RS::NormalizeNormals => r.normalize_normals,
            RS::DiffuseMaterialSource => r.diffuse_material_source,
            RS::SpecularMaterialSource => r.specular_material_source,
            RS::AmbientMaterialSource => r.ambient_material_source,
            RS::EmissiveMaterialSource => r.emissive_material_source,
            RS::ClipPlaneEnable => r.clip_plane_enable,
            RS::PointSize => r.point_size.to_bits(),
            RS::MultisampleAntialias => r.multisample_antialias,
            RS::ColorWriteEnable => r.color_write_enable,
            RS::BlendOp => r.blend_op,
            RS::ScissorTestEnable => r.scissor_test_enable,
        })
    }

    pub fn set_texture_stage_state(&mut self, stage: Dword, ty: Dword, value: Dword) -> bool {
        if stage as usize >= MAX_TEXTURE_STAGES {
            return false;
        }
        let Some(kind) = TextureStageStateType::from_dword(ty) else {
            return false;
        };
        if let Some(block) = self.recording.as_mut() {
            block.record_texture_stage_state(stage as usize, ty, value);
        }
        let s = &mut self.stages[stage as usize];
        use TextureStageStateType as TSS;
        match kind {
            TSS::ColorOp => s.color_op = value,
            TSS::ColorArg1 => s.color_arg1 = value,
            TSS::ColorArg2 => s.color_arg2 = value,
            TSS::AlphaOp => s.alpha_op = value,
            TSS::AlphaArg1 => s.alpha_arg1 = value,
            TSS::AlphaArg2 => s.alpha_arg2 = value,
            TSS::BumpEnvMat00 => s.bump_env_mat[0] = f32::from_bits(value),
            TSS::BumpEnvMat01 => s.bump_env_mat[1] = f32::from_bits(value),
            TSS::BumpEnvMat10 => s.bump_env_mat[2] = f32::from_bits(value),
            TSS::BumpEnvMat11 => s.bump_env_mat[3] = f32::from_bits(value),
            TSS::TexCoordIndex => s.texcoord_index = value,
            TSS::AddressU => s.address_u = value,
            TSS::AddressV => s.address_v = value,
            TSS::BorderColor => s.border_color = value,
            TSS::MagFilter => s.mag_filter = value,
            TSS::MinFilter => s.min_filter = value,
            TSS::MipFilter => s.mip_filter = value,
            TSS::MipMapLodBias => s.mipmap_lod_bias = f32::from_bits(value),
            TSS::MaxMipLevel => s.max_mip_level = value,
            TSS::MaxAnisotropy => s.max_anisotropy = value,
            TSS::BumpEnvLScale => s.bump_env_lscale = f32::from_bits(value),
            TSS::BumpEnvLOffset => s.bump_env_loffset = f32::from_bits(value),
            TSS::TextureTransformFlags => s.texture_transform_flags = value,
            TSS::AddressW => s.address_w = value,
            TSS::ColorArg0 => s.color_arg0 = value,
            TSS::AlphaArg0 => s.alpha_arg0 = value,
            TSS::ResultArg => s.result_arg = value,
        }
        self.texture_dirty = true;
        true
    }

    pub fn get_texture_stage_state(&self, stage: Dword, ty: Dword) -> Option<Dword> {
        if stage as usize >= MAX_TEXTURE_STAGES {
            return None;
        }
        let kind = TextureStageStateType::from_dword(ty)?;
        let s = &self.stages[stage as usize];
        use TextureStageStateType as TSS;
        Some(match kind {
            TSS::ColorOp => s.color_op,
            TSS::ColorArg1 => s.color_arg1,
            TSS::ColorArg2 => s.color_arg2,
            TSS::AlphaOp => s.alpha_op,
            TSS::AlphaArg1 => s.alpha_arg1,
            TSS::AlphaArg2 => s.alpha_arg2,
            TSS::BumpEnvMat00 => s.bump_env_mat[0].to_bits(),
            TSS::BumpEnvMat01 => s.bump_env_mat[1].to_bits(),
            TSS::BumpEnvMat10 => s.bump_env_mat[2].to_bits(),
            TSS::BumpEnvMat11 => s.bump_env_mat[3].to_bits(),
            TSS::TexCoordIndex => s.texcoord_index,
            TSS::AddressU => s.address_u,
            TSS::AddressV => s.address_v,
            TSS::BorderColor => s.border_color,
            TSS::MagFilter => s.mag_filter,
            TSS::MinFilter => s.min_filter,
            TSS::MipFilter => s.mip_filter,
            TSS::MipMapLodBias => s.mipmap_lod_bias.to_bits(),
            TSS::MaxMipLevel => s.max_mip_level,
            TSS::MaxAnisotropy => s.max_anisotropy,
            TSS::BumpEnvLScale => s.bump_env_lscale.to_bits(),
            TSS::BumpEnvLOffset => s.bump_env_loffset.to_bits(),
            TSS::TextureTransformFlags => s.texture_transform_flags,
            TSS::AddressW => s.address_w,
            TSS::ColorArg0 => s.color_arg0,
            TSS::AlphaArg0 => s.alpha_arg0,
            TSS::ResultArg => s.result_arg,
        })
    }

    pub fn set_transform(&mut self, which: TransformStateType, matrix: &Matrix) {
        if let Some(block) = self.recording.as_mut() {
            block.record_transform(which, matrix);
        }
        self.transforms.set(which, matrix);
        self.transform_dirty = true;
    }

    pub fn multiply_transform(&mut self, which: TransformStateType, matrix: &Matrix) {
        self.transforms.multiply(which, matrix);
        if let Some(block) = self.recording.as_mut() {
            let combined = self.transforms.get(which);
            block.record_transform(which, &combined);
        }
        self.transform_dirty = true;
    }

    pub fn set_light(&mut self, index: usize, light: &Light) -> bool {
        if index >= MAX_LIGHTS {
            return false;
        }
        if let Some(block) = self.recording.as_mut() {
            block.record_light(index, light, self.lights[index].enabled);
        }
        self.lights[index].light = *light;
        self.light_dirty = true;
        true
    }

    pub fn get_light(&self, index: usize) -> Option<Light> {
        self.lights.get(index).map(|slot| slot.light)
    }

    pub fn light_enable(&mut self, index: usize, enable: bool) -> bool {
        if index >= MAX_LIGHTS {
            return false;
        }
        if let Some(block) = self.recording.as_mut() {
            block.record_light(index, &self.lights[index].light, enable);
        }
        self.lights[index].enabled = enable;
        self.light_dirty = true;
        true
    }

    pub fn is_light_enabled(&self, index: usize) -> bool {
        self.lights.get(index).map(|l| l.enabled).unwrap_or(false)
    }

    pub fn set_material(&mut self, material: &Material) {
        if let Some(block) = self.recording.as_mut() {
            block.record_material(material);
        }
        self.material = *material;
        self.material_dirty = true;
    }

    pub fn set_viewport(&mut self, viewport: &Viewport) -> bool {
        if viewport.min_z > viewport.max_z
            || !(0.0..=1.0).contains(&viewport.min_z)
            || !(0.0..=1.0).contains(&viewport.max_z)
        {
            return false;
        }
        if let Some(block) = self.recording.as_mut() {
            block.record_viewport(viewport);
        }
        self.viewport = *viewport;
        self.viewport_dirty = true;
        true
    }

    pub fn set_scissor_rect(&mut self, rect: &Rect, enable: bool) {
        self.scissor_rect = *rect;
        self.render.scissor_test_enable = enable as Dword;
        self.render_dirty = true;
        self.viewport_dirty = true;
    }

    pub fn set_clip_plane(&mut self, index: usize, plane: &[f32; 4]) -> bool {
        if index >= MAX_CLIP_PLANES {
            return false;
        }
        if let Some(block) = self.recording.as_mut() {
            block.record_clip_plane(index, plane, self.clip_planes[index].enabled);
        }
        self.clip_planes[index].plane = *plane;
        self.render_dirty = true;
        true
    }

    pub fn get_clip_plane(&self, index: usize) -> Option<[f32; 4]> {
        self.clip_planes.get(index).map(|p| p.plane)
    }

    pub fn set_clip_status(&mut self, clip_union: Dword, clip_intersection: Dword) {
        self.clip_status = (clip_union, clip_intersection);
    }

    pub fn get_clip_status(&self) -> (Dword, Dword) {
        self.clip_status
    }

    pub fn set_texture(&mut self, stage: usize, texture: Option<TextureId>) -> bool {
        if stage >= MAX_TEXTURE_STAGES {
            return false;
        }
        if let Some(block) = self.recording.as_mut() {
            block.record_texture(stage, texture);
        }
        self.bound_textures[stage] = texture;
        self.texture_dirty = true;
        true
    }

    pub fn is_texture_enabled(&self, stage: usize) -> bool {
        stage < MAX_TEXTURE_STAGES
            && self.bound_textures[stage].is_some()
            && self.stages[stage].color_op != TextureOp::Disable as Dword
    }

    // -- apply ---------------------------------------------------------------

    /// Flush dirty render states. Every backend call goes through the
    /// per-value cache, so redundant values cost nothing even when the
    /// dirty flag fired.
    pub fn apply_render_states(&mut self, backend: &mut dyn RenderBackend) {
        if !self.render_dirty {
            return;
        }
        self.render_dirty = false;

        let r = &self.render;
        let cache = &mut self.cache;

        update_cached(&mut cache.depth_test, r.z_enable != 0, || {
            backend.set_depth_test(r.z_enable != 0)
        });
        update_cached(&mut cache.depth_write, r.z_write_enable != 0, || {
            backend.set_depth_write(r.z_write_enable != 0)
        });
        if let Some(func) = CmpFunc::from_dword(r.z_func) {
            let func = translate::compare_func(func);
            update_cached(&mut cache.depth_func, func, || backend.set_depth_func(func));
        }
        update_cached(&mut cache.polygon_offset, r.z_bias, || {
            backend.set_polygon_offset(r.z_bias != 0, 0.0, -(r.z_bias as f32))
        });

        update_cached(&mut cache.blend_enable, r.alpha_blend_enable != 0, || {
            backend.set_blend_enable(r.alpha_blend_enable != 0)
        });
        if let (Some(src), Some(dst)) = (
            crate::d3d8::BlendFactor::from_dword(r.src_blend),
            crate::d3d8::BlendFactor::from_dword(r.dest_blend),
        ) {
            let pair = (translate::blend_factor(src), translate::blend_factor(dst));
            update_cached(&mut cache.blend_func, pair, || {
                backend.set_blend_func(pair.0, pair.1)
            });
        }
        if let Some(op) = crate::d3d8::BlendOp::from_dword(r.blend_op) {
            let eq = translate::blend_op(op);
            update_cached(&mut cache.blend_eq, eq, || backend.set_blend_equation(eq));
        }

        if let Some(mode) = CullMode::from_dword(r.cull_mode) {
            let cull = translate::cull_mode(mode);
            update_cached(&mut cache.cull, cull, || backend.set_cull(cull));
        }
        if let Some(mode) = crate::d3d8::FillMode::from_dword(r.fill_mode) {
            let mode = translate::fill_mode(mode);
            update_cached(&mut cache.polygon_mode, mode, || {
                backend.set_polygon_mode(mode)
            });
        }

        update_cached(&mut cache.stencil_test, r.stencil_enable != 0, || {
            backend.set_stencil_test(r.stencil_enable != 0)
        });
        if let Some(func) = CmpFunc::from_dword(r.stencil_func) {
            let state = (
                translate::compare_func(func),
                r.stencil_ref as i32,
                r.stencil_mask,
            );
            update_cached(&mut cache.stencil_func, state, || {
                backend.set_stencil_func(state.0, state.1, state.2)
            });
        }
        if let (Some(fail), Some(zfail), Some(pass)) = (
            crate::d3d8::StencilOp::from_dword(r.stencil_fail),
            crate::d3d8::StencilOp::from_dword(r.stencil_z_fail),
            crate::d3d8::StencilOp::from_dword(r.stencil_pass),
        ) {
            let ops = (
                translate::stencil_op(fail),
                translate::stencil_op(zfail),
                translate::stencil_op(pass),
            );
            update_cached(&mut cache.stencil_op, ops, || {
                backend.set_stencil_op(ops.0, ops.1, ops.2)
            });
        }
        update_cached(&mut cache.stencil_write_mask, r.stencil_write_mask, || {
            backend.set_stencil_write_mask(r.stencil_write_mask)
        });

        update_cached(&mut cache.scissor_test, r.scissor_test_enable != 0, || {
            backend.set_scissor_test(r.scissor_test_enable != 0)
        });
        let rect = self.scissor_rect;
        update_cached(&mut cache.scissor_rect, rect, || {
            backend.set_scissor_rect(
                rect.left,
                rect.top,
                rect.right - rect.left,
                rect.bottom - rect.top,
            )
        });

        update_cached(&mut cache.color_write, r.color_write_enable, || {
            backend.set_color_write(
                r.color_write_enable & 0x1 != 0,
                r.color_write_enable & 0x2 != 0,
                r.color_write_enable & 0x4 != 0,
                r.color_write_enable & 0x8 != 0,
            )
        });

        // ALPHATEST*, FOG*, LIGHTING and AMBIENT are folded into the
        // generated shaders; nothing to issue here.
    }

    pub fn apply_viewport(&mut self, backend: &mut dyn RenderBackend) {
        if !self.viewport_dirty {
            return;
        }
        self.viewport_dirty = false;
        let vp = self.viewport;
        update_cached(&mut self.cache.viewport, vp, || {
            backend.set_viewport(
                vp.x as i32,
                vp.y as i32,
                vp.width as i32,
                vp.height as i32,
                vp.min_z,
                vp.max_z,
            )
        });
    }

    /// Bind textures and flush sampler state for every active stage.
    pub fn apply_texture_states(&mut self, backend: &mut dyn RenderBackend) {
        if !self.texture_dirty {
            return;
        }
        self.texture_dirty = false;
        let caps = backend.caps();

        for stage in 0..MAX_TEXTURE_STAGES {
            let Some(texture) = self.bound_textures[stage] else {
                continue;
            };
            if self.stages[stage].color_op == TextureOp::Disable as Dword {
                continue;
            }
            let s = self.stages[stage];
            let unit = stage as u32;
            let cache = &mut self.cache;

            update_cached(&mut cache.textures[stage], texture, || {
                backend.bind_texture(unit, texture)
            });

            let filters = (s.min_filter, s.mag_filter, s.mip_filter);
            update_cached(&mut cache.sampler_filters[stage], filters, || {
                let min = crate::d3d8::TextureFilter::from_dword(s.min_filter)
                    .map(translate::texture_filter)
                    .unwrap_or(crate::backend::FilterMode::Nearest);
                let mag = crate::d3d8::TextureFilter::from_dword(s.mag_filter)
                    .map(translate::texture_filter)
                    .unwrap_or(crate::backend::FilterMode::Nearest);
                let mip = crate::d3d8::TextureFilter::from_dword(s.mip_filter)
                    .and_then(translate::mip_filter);
                backend.set_sampler_filters(unit, min, mag, mip);
            });

            let addresses = (s.address_u, s.address_v, s.address_w);
            update_cached(&mut cache.sampler_address[stage], addresses, || {
                let to_mode = |raw| {
                    crate::d3d8::TextureAddress::from_dword(raw)
                        .map(translate::address_mode)
                        .unwrap_or(crate::backend::AddressMode::Repeat)
                };
                backend.set_sampler_address(
                    unit,
                    to_mode(s.address_u),
                    to_mode(s.address_v),
                    to_mode(s.address_w),
                );
            });

            if caps.anisotropic_filtering {
                update_cached(&mut cache.sampler_anisotropy[stage], s.max_anisotropy, || {
                    backend.set_sampler_anisotropy(unit, s.max_anisotropy.max(1))
                });
            }
            if caps.sampler_lod_bias {
                let bias = NotNan::new(s.mipmap_lod_bias)
                    .unwrap_or_else(|_| NotNan::new(0.0).unwrap());
                update_cached(&mut cache.sampler_lod_bias[stage], bias, || {
                    backend.set_sampler_lod_bias(unit, bias.into_inner())
                });
            }
        }
    }

    // -- fixed-function key --------------------------------------------------

    /// Snapshot the shader-affecting subset for the generator.
    pub fn fixed_function_state(&self) -> FixedFunctionState {
        let mut state = FixedFunctionState::default();
        state.fvf = self.current_fvf;
        state.lighting = self.render.lighting != 0;
        state.color_vertex = self.render.color_vertex != 0;
        state.specular_enable = self.render.specular_enable != 0;
        state.normalize_normals = self.render.normalize_normals != 0;
        state.diffuse_source = crate::d3d8::MaterialColorSource::from_dword(
            self.render.diffuse_material_source,
        )
        .unwrap_or(crate::d3d8::MaterialColorSource::Color1);
        state.specular_source = crate::d3d8::MaterialColorSource::from_dword(
            self.render.specular_material_source,
        )
        .unwrap_or(crate::d3d8::MaterialColorSource::Color2);
        state.ambient_source = crate::d3d8::MaterialColorSource::from_dword(
            self.render.ambient_material_source,
        )
        .unwrap_or(crate::d3d8::MaterialColorSource::Material);
        state.emissive_source = crate::d3d8::MaterialColorSource::from_dword(
            self.render.emissive_material_source,
        )
        .unwrap_or(crate::d3d8::MaterialColorSource::Material);

        if state.lighting {
            for (i, slot) in self.lights.iter().enumerate() {
                if slot.enabled {
                    state.lights[i] = Some(slot.light.light_type);
                }
            }
        }

        state.fog_enabled = self.render.fog_enable != 0;
        // table mode wins when both are set, as on real hardware
        let table = FogMode::from_dword(self.render.fog_table_mode).unwrap_or(FogMode::None);
        let vertex = FogMode::from_dword(self.render.fog_vertex_mode).unwrap_or(FogMode::None);
        state.fog_mode = if table != FogMode::None { table } else { vertex };
        state.range_fog = self.render.range_fog_enable != 0;

        state.alpha_test = if self.render.alpha_test_enable != 0 {
            match CmpFunc::from_dword(self.render.alpha_func) {
                Some(CmpFunc::Always) | None => None,
                Some(func) => Some(func),
            }
        } else {
            None
        };

        for stage in 0..MAX_TEXTURE_STAGES {
            let s = &self.stages[stage];
            state.stages[stage] = StageState {
                texture_bound: self.bound_textures[stage].is_some(),
                color_op: TextureOp::from_dword(s.color_op).unwrap_or(TextureOp::Disable),
                color_arg0: s.color_arg0,
                color_arg1: s.color_arg1,
                color_arg2: s.color_arg2,
                alpha_op: TextureOp::from_dword(s.alpha_op).unwrap_or(TextureOp::Disable),
                alpha_arg0: s.alpha_arg0,
                alpha_arg1: s.alpha_arg1,
                alpha_arg2: s.alpha_arg2,
                texcoord_index: (s.texcoord_index & 0xFFFF) as u8,
                texgen: TexGen::from_texcoord_index(s.texcoord_index),
                transform: TexTransform::from_flags(s.texture_transform_flags),
                result_temp: s.result_arg & crate::d3d8::D3DTA_SELECTMASK
                    == crate::d3d8::D3DTA_TEMP,
            };
        }
        state
    }

    // -- state blocks --------------------------------------------------------

    pub fn begin_state_block(&mut self) -> bool {
        if self.recording.is_some() {
            return false;
        }
        self.recording = Some(StateBlock::recording());
        true
    }

    pub fn end_state_block(&mut self) -> Option<Dword> {
        let block = self.recording.take()?;
        let token = self.next_block_token;
        self.next_block_token += 1;
        self.state_blocks.insert(token, block);
        Some(token)
    }

    pub fn create_state_block(&mut self, ty: StateBlockType, bindings: &DeviceBindings) -> Dword {
        let block = StateBlock::capture(ty, self, bindings);
        let token = self.next_block_token;
        self.next_block_token += 1;
        self.state_blocks.insert(token, block);
        token
    }

    pub fn delete_state_block(&mut self, token: Dword) -> bool {
        self.state_blocks.remove(&token).is_some()
    }

    /// Replay a block through the ordinary setters so every dirty flag
    /// fires. Returns the device-level bindings the caller must restore.
    pub fn apply_state_block(&mut self, token: Dword) -> Option<AppliedBindings> {
        let block = self.state_blocks.get(&token)?.clone();
        Some(block.apply_to(self))
    }

    /// Re-snapshot the block's captured states from the current shadow.
    pub fn capture_state_block(&mut self, token: Dword, bindings: &DeviceBindings) -> bool {
        let Some(block) = self.state_blocks.remove(&token) else {
            return false;
        };
        let recaptured = block.recapture(self, bindings);
        self.state_blocks.insert(token, recaptured);
        true
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    /// The block currently being recorded, for device-level hooks.
    pub fn recording_block(&mut self) -> Option<&mut StateBlock> {
        self.recording.as_mut()
    }
}

impl Default for StateManager {
    fn default() -> Self {
        StateManager::new()
    }
}

/// Range checks for enum-valued render states.
fn render_state_value_ok(kind: RenderStateType, value: Dword) -> bool {
    use RenderStateType as RS;
    match kind {
        RS::SrcBlend | RS::DestBlend => crate::d3d8::BlendFactor::from_dword(value).is_some(),
        RS::BlendOp => crate::d3d8::BlendOp::from_dword(value).is_some(),
        RS::ZFunc | RS::AlphaFunc | RS::StencilFunc => CmpFunc::from_dword(value).is_some(),
        RS::StencilFail | RS::StencilZFail | RS::StencilPass => {
            crate::d3d8::StencilOp::from_dword(value).is_some()
        }
        RS::CullMode => CullMode::from_dword(value).is_some(),
        RS::FillMode => crate::d3d8::FillMode::from_dword(value).is_some(),
        RS::ShadeMode => crate::d3d8::ShadeMode::from_dword(value).is_some(),
        RS::FogTableMode | RS::FogVertexMode => FogMode::from_dword(value).is_some(),
        RS::DiffuseMaterialSource
        | RS::SpecularMaterialSource
        | RS::AmbientMaterialSource
        | RS::EmissiveMaterialSource => {
            crate::d3d8::MaterialColorSource::from_dword(value).is_some()
        }
        RS::AlphaRef => value <= 0xFF,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;
    use crate::d3d8::BlendFactor;

    #[test]
    fn defaults_match_d3d8() {
        let sm = StateManager::new();
        assert_eq!(sm.render.z_enable, 1);
        assert_eq!(sm.render.cull_mode, CullMode::Ccw as Dword);
        assert_eq!(sm.stages[0].color_op, TextureOp::Modulate as Dword);
        for stage in 1..MAX_TEXTURE_STAGES {
            assert_eq!(sm.stages[stage].color_op, TextureOp::Disable as Dword);
        }
        assert_eq!(sm.stages[3].texcoord_index, 3);
        assert_eq!(sm.render.texture_factor, 0xFFFF_FFFF);
    }

    #[test]
    fn reset_restores_defaults() {
        let mut sm = StateManager::new();
        sm.set_render_state(
            RenderStateType::CullMode as Dword,
            CullMode::None as Dword,
        );
        sm.reset();
        assert_eq!(sm.render.cull_mode, CullMode::Ccw as Dword);
    }

    #[test]
    fn invalid_values_leave_the_shadow_untouched() {
        let mut sm = StateManager::new();
        assert!(!sm.set_render_state(RenderStateType::SrcBlend as Dword, 99));
        assert_eq!(sm.render.src_blend, BlendFactor::One as Dword);
        assert!(!sm.set_render_state(9999, 1));
        assert!(!sm.set_render_state(RenderStateType::AlphaRef as Dword, 0x100));
        assert!(sm.set_render_state(RenderStateType::AlphaRef as Dword, 0x80));
        assert_eq!(sm.render.alpha_ref, 0x80);
    }

    #[test]
    fn float_states_round_trip_through_bits() {
        let mut sm = StateManager::new();
        let value = 0.25f32;
        assert!(sm.set_render_state(RenderStateType::FogStart as Dword, value.to_bits()));
        assert_eq!(sm.render.fog_start, 0.25);
        assert_eq!(
            sm.get_render_state(RenderStateType::FogStart as Dword),
            Some(value.to_bits())
        );
    }

    #[test]
    fn setters_do_not_touch_the_backend() {
        let mut sm = StateManager::new();
        let mut backend = HeadlessBackend::new();
        // drain initial dirtiness first
        sm.apply_render_states(&mut backend);
        backend.clear_recordings();

        sm.set_render_state(RenderStateType::CullMode as Dword, CullMode::Cw as Dword);
        assert_eq!(backend.counters.state_calls, 0);
        sm.apply_render_states(&mut backend);
        assert!(backend.counters.state_calls > 0);
    }

    #[test]
    fn redundant_values_are_not_reissued() {
        let mut sm = StateManager::new();
        let mut backend = HeadlessBackend::new();
        sm.apply_render_states(&mut backend);
        backend.clear_recordings();

        // same value again: dirty flag fires, cache filters it out
        sm.set_render_state(RenderStateType::CullMode as Dword, CullMode::Ccw as Dword);
        sm.apply_render_states(&mut backend);
        assert_eq!(backend.counters.state_calls, 0);

        sm.set_render_state(RenderStateType::CullMode as Dword, CullMode::None as Dword);
        sm.apply_render_states(&mut backend);
        assert_eq!(backend.counters.state_calls, 1);
    }

    #[test]
    fn texture_stage_state_round_trips() {
        let mut sm = StateManager::new();
        assert!(sm.set_texture_stage_state(
            2,
            TextureStageStateType::ColorOp as Dword,
            TextureOp::Add as Dword
        ));
        assert_eq!(
            sm.get_texture_stage_state(2, TextureStageStateType::ColorOp as Dword),
            Some(TextureOp::Add as Dword)
        );
        assert!(!sm.set_texture_stage_state(8, TextureStageStateType::ColorOp as Dword, 1));
    }

    #[test]
    fn viewport_rejects_bad_z_range() {
        let mut sm = StateManager::new();
        let mut vp = Viewport {
            x: 0,
            y: 0,
            width: 640,
            height: 480,
            min_z: 0.8,
            max_z: 0.2,
        };
        assert!(!sm.set_viewport(&vp));
        vp.min_z = 0.0;
        vp.max_z = 1.0;
        assert!(sm.set_viewport(&vp));
        assert_eq!(sm.viewport.width, 640);
    }

    #[test]
    fn fixed_function_state_reflects_shadow() {
        let mut sm = StateManager::new();
        sm.current_fvf = crate::fvf::D3DFVF_XYZ | crate::fvf::D3DFVF_DIFFUSE;
        sm.set_render_state(RenderStateType::Lighting as Dword, 0);
        sm.set_render_state(RenderStateType::AlphaTestEnable as Dword, 1);
        sm.set_render_state(RenderStateType::AlphaFunc as Dword, CmpFunc::Greater as Dword);
        sm.set_texture(0, Some(TextureId(7)));

        let ff = sm.fixed_function_state();
        assert!(!ff.lighting);
        assert_eq!(ff.alpha_test, Some(CmpFunc::Greater));
        assert!(ff.stages[0].texture_bound);
        assert_eq!(ff.stages[0].color_op, TextureOp::Modulate);
        assert_eq!(ff.active_stage_count(), 1);

        // ALWAYS normalizes to no alpha test
        sm.set_render_state(RenderStateType::AlphaFunc as Dword, CmpFunc::Always as Dword);
        assert_eq!(sm.fixed_function_state().alpha_test, None);
    }

    #[test]
    fn texture_apply_skips_disabled_stages() {
        let mut sm = StateManager::new();
        let mut backend = HeadlessBackend::new();
        sm.set_texture(0, Some(TextureId(1)));
        sm.set_texture(3, Some(TextureId(2))); // stage 3 color op is DISABLE
        sm.apply_texture_states(&mut backend);
        // only stage 0 binds: one texture bind + filters + addresses + aniso + lod
        assert_eq!(backend.counters.sampler_calls, 5);
    }

    #[test]
    fn clip_status_round_trips() {
        let mut sm = StateManager::new();
        sm.set_clip_status(0x3F, 0x01);
        assert_eq!(sm.get_clip_status(), (0x3F, 0x01));
    }
}
