//! State blocks: captured state deltas with typed replay.
//!
//! A block comes from either explicit capture (`create_state_block`) or a
//! begin/end recording. Applying replays every captured value through the
//! ordinary setters, so dirty flags fire exactly as if the application had
//! set the states itself. Device-level bindings (shaders, constants, FVF,
//! textures, streams) are carried alongside and handed back to the device
//! on apply.

use fxhash::FxHashMap;

use crate::backend::{BufferId, TextureId};
use crate::d3d8::{
    Dword, Light, Material, Matrix, RenderStateType, StateBlockType, TextureStageStateType,
    TransformStateType, Viewport, MAX_CLIP_PLANES, MAX_LIGHTS, MAX_STREAMS, MAX_TEXTURE_STAGES,
};
use crate::shader::bytecode::MAX_PS_FLOAT_CONSTANTS;
use crate::shader::constants::FLOAT_REGISTERS;

use super::StateManager;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct StreamBinding {
    pub buffer: BufferId,
    pub stride: u32,
}

/// Device-side bindings snapshotted into a block.
#[derive(Clone)]
pub struct DeviceBindings {
    pub vertex_shader: Dword,
    pub pixel_shader: Dword,
    pub fvf: Dword,
    pub vs_constants: Vec<[f32; 4]>,
    pub ps_constants: Vec<[f32; 4]>,
    pub textures: [Option<TextureId>; MAX_TEXTURE_STAGES],
    pub streams: [Option<StreamBinding>; MAX_STREAMS],
    pub index_buffer: Option<BufferId>,
}

impl Default for DeviceBindings {
    fn default() -> DeviceBindings {
        DeviceBindings {
            vertex_shader: 0,
            pixel_shader: 0,
            fvf: 0,
            vs_constants: vec![[0.0; 4]; FLOAT_REGISTERS],
            ps_constants: vec![[0.0; 4]; MAX_PS_FLOAT_CONSTANTS],
            textures: [None; MAX_TEXTURE_STAGES],
            streams: [None; MAX_STREAMS],
            index_buffer: None,
        }
    }
}

/// What the device must restore after a block is applied.
#[derive(Clone, Default)]
pub struct AppliedBindings {
    pub vertex_shader: Option<Dword>,
    pub pixel_shader: Option<Dword>,
    pub fvf: Option<Dword>,
    pub vs_constants: Option<Vec<[f32; 4]>>,
    pub ps_constants: Option<Vec<[f32; 4]>>,
    pub streams: Vec<(usize, StreamBinding)>,
    pub index_buffer: Option<Option<BufferId>>,
}

#[derive(Clone)]
pub struct StateBlock {
    block_type: StateBlockType,
    from_recording: bool,

    render_states: FxHashMap<Dword, Dword>,
    texture_stage_states: [FxHashMap<Dword, Dword>; MAX_TEXTURE_STAGES],
    transforms: FxHashMap<Dword, Matrix>,
    lights: FxHashMap<u32, (Light, bool)>,
    material: Option<Material>,
    viewport: Option<Viewport>,
    clip_planes: FxHashMap<u32, ([f32; 4], bool)>,

    vertex_shader: Option<Dword>,
    pixel_shader: Option<Dword>,
    vs_constants: Option<Vec<[f32; 4]>>,
    ps_constants: Option<Vec<[f32; 4]>>,
    fvf: Option<Dword>,
    textures: [Option<Option<TextureId>>; MAX_TEXTURE_STAGES],
    streams: [Option<StreamBinding>; MAX_STREAMS],
    index_buffer: Option<Option<BufferId>>,
}

impl StateBlock {
    fn empty(block_type: StateBlockType, from_recording: bool) -> StateBlock {
        StateBlock {
            block_type,
            from_recording,
            render_states: FxHashMap::default(),
            texture_stage_states: Default::default(),
            transforms: FxHashMap::default(),
            lights: FxHashMap::default(),
            material: None,
            viewport: None,
            clip_planes: FxHashMap::default(),
            vertex_shader: None,
            pixel_shader: None,
            vs_constants: None,
            ps_constants: None,
            fvf: None,
            textures: [None; MAX_TEXTURE_STAGES],
            streams: [None; MAX_STREAMS],
            index_buffer: None,
        }
    }

    /// A fresh recording block; setters feed it until `end_state_block`.
    pub fn recording() -> StateBlock {
        StateBlock::empty(StateBlockType::All, true)
    }

    /// Snapshot the current shadow filtered by `block_type`.
    pub fn capture(
        block_type: StateBlockType,
        sm: &StateManager,
        bindings: &DeviceBindings,
    ) -> StateBlock {
        let mut block = StateBlock::empty(block_type, false);

        for state in captured_render_states(block_type) {
            if let Some(value) = sm.get_render_state(*state as Dword) {
                block.render_states.insert(*state as Dword, value);
            }
        }

        for stage in 0..MAX_TEXTURE_STAGES {
            for tss in captured_texture_stage_states(block_type) {
                if let Some(value) = sm.get_texture_stage_state(stage as Dword, *tss as Dword) {
                    block.texture_stage_states[stage].insert(*tss as Dword, value);
                }
            }
        }

        if matches!(block_type, StateBlockType::All | StateBlockType::VertexState) {
            for which in [
                TransformStateType::World,
                TransformStateType::View,
                TransformStateType::Projection,
            ] {
                block.transforms.insert(which.to_dword(), sm.transforms.get(which));
            }
            for i in 0..MAX_TEXTURE_STAGES {
                let which = TransformStateType::Texture(i);
                block.transforms.insert(which.to_dword(), sm.transforms.get(which));
            }
            for i in 0..MAX_LIGHTS {
                block
                    .lights
                    .insert(i as u32, (sm.lights[i].light, sm.lights[i].enabled));
            }
            block.material = Some(sm.material);
            for i in 0..MAX_CLIP_PLANES {
                block.clip_planes.insert(
                    i as u32,
                    (sm.clip_planes[i].plane, sm.clip_planes[i].enabled),
                );
            }
            block.vertex_shader = Some(bindings.vertex_shader);
            block.vs_constants = Some(bindings.vs_constants.clone());
            block.fvf = Some(bindings.fvf);
        }

        if matches!(block_type, StateBlockType::All | StateBlockType::PixelState) {
            block.pixel_shader = Some(bindings.pixel_shader);
            block.ps_constants = Some(bindings.ps_constants.clone());
        }

        if block_type == StateBlockType::All {
            block.viewport = Some(sm.viewport);
            for i in 0..MAX_TEXTURE_STAGES {
                block.textures[i] = Some(bindings.textures[i]);
            }
            block.streams = bindings.streams;
            block.index_buffer = Some(bindings.index_buffer);
        }

        block
    }

    /// Re-snapshot exactly the states this block already names.
    pub fn recapture(self, sm: &StateManager, bindings: &DeviceBindings) -> StateBlock {
        if !self.from_recording {
            return StateBlock::capture(self.block_type, sm, bindings);
        }
        let mut block = self;
        for (state, value) in block.render_states.iter_mut() {
            if let Some(current) = sm.get_render_state(*state) {
                *value = current;
            }
        }
        for stage in 0..MAX_TEXTURE_STAGES {
            for (tss, value) in block.texture_stage_states[stage].iter_mut() {
                if let Some(current) = sm.get_texture_stage_state(stage as Dword, *tss) {
                    *value = current;
                }
            }
        }
        for (which, matrix) in block.transforms.iter_mut() {
            if let Some(ts) = TransformStateType::from_dword(*which) {
                *matrix = sm.transforms.get(ts);
            }
        }
        for (index, slot) in block.lights.iter_mut() {
            let i = *index as usize;
            if i < MAX_LIGHTS {
                *slot = (sm.lights[i].light, sm.lights[i].enabled);
            }
        }
        if block.material.is_some() {
            block.material = Some(sm.material);
        }
        if block.viewport.is_some() {
            block.viewport = Some(sm.viewport);
        }
        for (index, plane) in block.clip_planes.iter_mut() {
            let i = *index as usize;
            if i < MAX_CLIP_PLANES {
                *plane = (sm.clip_planes[i].plane, sm.clip_planes[i].enabled);
            }
        }
        if block.vertex_shader.is_some() {
            block.vertex_shader = Some(bindings.vertex_shader);
        }
        if block.pixel_shader.is_some() {
            block.pixel_shader = Some(bindings.pixel_shader);
        }
        if block.vs_constants.is_some() {
            block.vs_constants = Some(bindings.vs_constants.clone());
        }
        if block.ps_constants.is_some() {
            block.ps_constants = Some(bindings.ps_constants.clone());
        }
        if block.fvf.is_some() {
            block.fvf = Some(bindings.fvf);
        }
        for i in 0..MAX_TEXTURE_STAGES {
            if block.textures[i].is_some() {
                block.textures[i] = Some(bindings.textures[i]);
            }
        }
        block
    }

    /// Replay through the setters; returns the device-level remainder.
    pub fn apply_to(&self, sm: &mut StateManager) -> AppliedBindings {
        for (state, value) in &self.render_states {
            sm.set_render_state(*state, *value);
        }
        for stage in 0..MAX_TEXTURE_STAGES {
            for (tss, value) in &self.texture_stage_states[stage] {
                sm.set_texture_stage_state(stage as Dword, *tss, *value);
            }
        }
        for (which, matrix) in &self.transforms {
            if let Some(ts) = TransformStateType::from_dword(*which) {
                sm.set_transform(ts, matrix);
            }
        }
        for (index, (light, enabled)) in &self.lights {
            sm.set_light(*index as usize, light);
            sm.light_enable(*index as usize, *enabled);
        }
        if let Some(material) = &self.material {
            sm.set_material(material);
        }
        if let Some(viewport) = &self.viewport {
            sm.set_viewport(viewport);
        }
        for (index, (plane, enabled)) in &self.clip_planes {
            sm.set_clip_plane(*index as usize, plane);
            let bit = 1u32 << *index;
            let mask = sm.render.clip_plane_enable;
            let new_mask = if *enabled { mask | bit } else { mask & !bit };
            sm.set_render_state(RenderStateType::ClipPlaneEnable as Dword, new_mask);
        }
        for (stage, captured) in self.textures.iter().enumerate() {
            if let Some(texture) = captured {
                sm.set_texture(stage, *texture);
            }
        }

        AppliedBindings {
            vertex_shader: self.vertex_shader,
            pixel_shader: self.pixel_shader,
            fvf: self.fvf,
            vs_constants: self.vs_constants.clone(),
            ps_constants: self.ps_constants.clone(),
            streams: self
                .streams
                .iter()
                .enumerate()
                .filter_map(|(i, s)| s.map(|s| (i, s)))
                .collect(),
            index_buffer: self.index_buffer,
        }
    }

    // -- recording hooks -----------------------------------------------------

    pub fn record_render_state(&mut self, state: Dword, value: Dword) {
        self.render_states.insert(state, value);
    }

    pub fn record_texture_stage_state(&mut self, stage: usize, ty: Dword, value: Dword) {
        self.texture_stage_states[stage].insert(ty, value);
    }

    pub fn record_transform(&mut self, which: TransformStateType, matrix: &Matrix) {
        self.transforms.insert(which.to_dword(), *matrix);
    }

    pub fn record_light(&mut self, index: usize, light: &Light, enabled: bool) {
        self.lights.insert(index as u32, (*light, enabled));
    }

    pub fn record_material(&mut self, material: &Material) {
        self.material = Some(*material);
    }

    pub fn record_viewport(&mut self, viewport: &Viewport) {
        self.viewport = Some(*viewport);
    }

    pub fn record_clip_plane(&mut self, index: usize, plane: &[f32; 4], enabled: bool) {
        self.clip_planes.insert(index as u32, (*plane, enabled));
    }

    pub fn record_texture(&mut self, stage: usize, texture: Option<TextureId>) {
        self.textures[stage] = Some(texture);
    }

    pub fn record_vertex_shader(&mut self, handle: Dword) {
        self.vertex_shader = Some(handle);
    }

    pub fn record_pixel_shader(&mut self, handle: Dword) {
        self.pixel_shader = Some(handle);
    }

    pub fn record_fvf(&mut self, fvf: Dword) {
        self.fvf = Some(fvf);
    }

    pub fn block_type(&self) -> StateBlockType {
        self.block_type
    }
}

/// Render states a PIXELSTATE block captures (the D3D8 documented set,
/// restricted to states this runtime shadows).
const PIXEL_RENDER_STATES: &[RenderStateType] = &[
    RenderStateType::ZEnable,
    RenderStateType::FillMode,
    RenderStateType::ShadeMode,
    RenderStateType::ZWriteEnable,
    RenderStateType::AlphaTestEnable,
    RenderStateType::LastPixel,
    RenderStateType::SrcBlend,
    RenderStateType::DestBlend,
    RenderStateType::ZFunc,
    RenderStateType::AlphaRef,
    RenderStateType::AlphaFunc,
    RenderStateType::DitherEnable,
    RenderStateType::AlphaBlendEnable,
    RenderStateType::FogStart,
    RenderStateType::FogEnd,
    RenderStateType::FogDensity,
    RenderStateType::ZBias,
    RenderStateType::StencilEnable,
    RenderStateType::StencilFail,
    RenderStateType::StencilZFail,
    RenderStateType::StencilPass,
    RenderStateType::StencilFunc,
    RenderStateType::StencilRef,
    RenderStateType::StencilMask,
    RenderStateType::StencilWriteMask,
    RenderStateType::TextureFactor,
    RenderStateType::ColorWriteEnable,
    RenderStateType::BlendOp,
    RenderStateType::ScissorTestEnable,
];

/// Render states a VERTEXSTATE block captures.
const VERTEX_RENDER_STATES: &[RenderStateType] = &[
    RenderStateType::ShadeMode,
    RenderStateType::SpecularEnable,
    RenderStateType::CullMode,
    RenderStateType::FogEnable,
    RenderStateType::FogColor,
    RenderStateType::FogTableMode,
    RenderStateType::FogStart,
    RenderStateType::FogEnd,
    RenderStateType::FogDensity,
    RenderStateType::RangeFogEnable,
    RenderStateType::Clipping,
    RenderStateType::Lighting,
    RenderStateType::Ambient,
    RenderStateType::FogVertexMode,
    RenderStateType::ColorVertex,
    RenderStateType::LocalViewer,
    RenderStateType::NormalizeNormals,
    RenderStateType::DiffuseMaterialSource,
    RenderStateType::SpecularMaterialSource,
    RenderStateType::AmbientMaterialSource,
    RenderStateType::EmissiveMaterialSource,
    RenderStateType::ClipPlaneEnable,
    RenderStateType::PointSize,
    RenderStateType::MultisampleAntialias,
];

const ALL_RENDER_STATES: &[RenderStateType] = &[
    RenderStateType::ZEnable,
    RenderStateType::FillMode,
    RenderStateType::ShadeMode,
    RenderStateType::ZWriteEnable,
    RenderStateType::AlphaTestEnable,
    RenderStateType::LastPixel,
    RenderStateType::SrcBlend,
    RenderStateType::DestBlend,
    RenderStateType::CullMode,
    RenderStateType::ZFunc,
    RenderStateType::AlphaRef,
    RenderStateType::AlphaFunc,
    RenderStateType::DitherEnable,
    RenderStateType::AlphaBlendEnable,
    RenderStateType::FogEnable,
    RenderStateType::SpecularEnable,
    RenderStateType::FogColor,
    RenderStateType::FogTableMode,
    RenderStateType::FogStart,
    RenderStateType::FogEnd,
    RenderStateType::FogDensity,
    RenderStateType::ZBias,
    RenderStateType::RangeFogEnable,
    RenderStateType::StencilEnable,
    RenderStateType::StencilFail,
    RenderStateType::StencilZFail,
    RenderStateType::StencilPass,
    RenderStateType::StencilFunc,
    RenderStateType::StencilRef,
    RenderStateType::StencilMask,
    RenderStateType::StencilWriteMask,
    RenderStateType::TextureFactor,
    RenderStateType::Clipping,
    RenderStateType::Lighting,
    RenderStateType::Ambient,
    RenderStateType::FogVertexMode,
    RenderStateType::ColorVertex,
    RenderStateType::LocalViewer,
    RenderStateType::NormalizeNormals,
    RenderStateType::DiffuseMaterialSource,
    RenderStateType::SpecularMaterialSource,
    RenderStateType::AmbientMaterialSource,
    RenderStateType::EmissiveMaterialSource,
    RenderStateType::ClipPlaneEnable,
    RenderStateType::PointSize,
    RenderStateType::MultisampleAntialias,
    RenderStateType::ColorWriteEnable,
    RenderStateType::BlendOp,
    RenderStateType::ScissorTestEnable,
];

fn captured_render_states(ty: StateBlockType) -> &'static [RenderStateType] {
    match ty {
        StateBlockType::All => ALL_RENDER_STATES,
        StateBlockType::PixelState => PIXEL_RENDER_STATES,
        StateBlockType::VertexState => VERTEX_RENDER_STATES,
    }
}

const PIXEL_TSS: &[TextureStageStateType] = &[
    TextureStageStateType::ColorOp,
    TextureStageStateType::ColorArg0,
    TextureStageStateType::ColorArg1,
    TextureStageStateType::ColorArg2,
    TextureStageStateType::AlphaOp,
    TextureStageStateType::AlphaArg0,
    TextureStageStateType::AlphaArg1,
    TextureStageStateType::AlphaArg2,
    TextureStageStateType::BumpEnvMat00,
    TextureStageStateType::BumpEnvMat01,
    TextureStageStateType::BumpEnvMat10,
    TextureStageStateType::BumpEnvMat11,
    TextureStageStateType::BumpEnvLScale,
    TextureStageStateType::BumpEnvLOffset,
    TextureStageStateType::AddressU,
    TextureStageStateType::AddressV,
    TextureStageStateType::AddressW,
    TextureStageStateType::BorderColor,
    TextureStageStateType::MagFilter,
    TextureStageStateType::MinFilter,
    TextureStageStateType::MipFilter,
    TextureStageStateType::MipMapLodBias,
    TextureStageStateType::MaxMipLevel,
    TextureStageStateType::MaxAnisotropy,
    TextureStageStateType::ResultArg,
];

const VERTEX_TSS: &[TextureStageStateType] = &[
    TextureStageStateType::TexCoordIndex,
    TextureStageStateType::TextureTransformFlags,
];

const ALL_TSS: &[TextureStageStateType] = &[
    TextureStageStateType::ColorOp,
    TextureStageStateType::ColorArg0,
    TextureStageStateType::ColorArg1,
    TextureStageStateType::ColorArg2,
    TextureStageStateType::AlphaOp,
    TextureStageStateType::AlphaArg0,
    TextureStageStateType::AlphaArg1,
    TextureStageStateType::AlphaArg2,
    TextureStageStateType::BumpEnvMat00,
    TextureStageStateType::BumpEnvMat01,
    TextureStageStateType::BumpEnvMat10,
    TextureStageStateType::BumpEnvMat11,
    TextureStageStateType::BumpEnvLScale,
    TextureStageStateType::BumpEnvLOffset,
    TextureStageStateType::TexCoordIndex,
    TextureStageStateType::AddressU,
    TextureStageStateType::AddressV,
    TextureStageStateType::AddressW,
    TextureStageStateType::BorderColor,
    TextureStageStateType::MagFilter,
    TextureStageStateType::MinFilter,
    TextureStageStateType::MipFilter,
    TextureStageStateType::MipMapLodBias,
    TextureStageStateType::MaxMipLevel,
    TextureStageStateType::MaxAnisotropy,
    TextureStageStateType::TextureTransformFlags,
    TextureStageStateType::ResultArg,
];

fn captured_texture_stage_states(ty: StateBlockType) -> &'static [TextureStageStateType] {
    match ty {
        StateBlockType::All => ALL_TSS,
        StateBlockType::PixelState => PIXEL_TSS,
        StateBlockType::VertexState => VERTEX_TSS,
    }
}
