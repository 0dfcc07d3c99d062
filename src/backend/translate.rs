//! D3D8 enum values mapped onto the backend seam vocabulary.
//!
//! Every match is exhaustive over the legal D3D8 inputs; the tables are a
//! tested property of the crate.

use crate::d3d8 as d3d;

use super::{
    AddressMode, BlendEquation, BlendFactor, CompareOp, CullState, FilterMode, PolygonMode,
    PrimitiveTopology, StencilAction,
};

pub fn blend_factor(factor: d3d::BlendFactor) -> BlendFactor {
    match factor {
        d3d::BlendFactor::Zero => BlendFactor::Zero,
        d3d::BlendFactor::One => BlendFactor::One,
        d3d::BlendFactor::SrcColor => BlendFactor::SrcColor,
        d3d::BlendFactor::InvSrcColor => BlendFactor::OneMinusSrcColor,
        d3d::BlendFactor::SrcAlpha => BlendFactor::SrcAlpha,
        d3d::BlendFactor::InvSrcAlpha => BlendFactor::OneMinusSrcAlpha,
        d3d::BlendFactor::DestAlpha => BlendFactor::DstAlpha,
        d3d::BlendFactor::InvDestAlpha => BlendFactor::OneMinusDstAlpha,
        d3d::BlendFactor::DestColor => BlendFactor::DstColor,
        d3d::BlendFactor::InvDestColor => BlendFactor::OneMinusDstColor,
        d3d::BlendFactor::SrcAlphaSat => BlendFactor::SrcAlphaSaturate,
        // the BOTH* factors set src and dst together; as plain factors they
        // reduce to the source-alpha pair
        d3d::BlendFactor::BothSrcAlpha => BlendFactor::SrcAlpha,
        d3d::BlendFactor::BothInvSrcAlpha => BlendFactor::OneMinusSrcAlpha,
    }
}

pub fn blend_op(op: d3d::BlendOp) -> BlendEquation {
    match op {
        d3d::BlendOp::Add => BlendEquation::Add,
        d3d::BlendOp::Subtract => BlendEquation::Subtract,
        d3d::BlendOp::RevSubtract => BlendEquation::ReverseSubtract,
        d3d::BlendOp::Min => BlendEquation::Min,
        d3d::BlendOp::Max => BlendEquation::Max,
    }
}

pub fn compare_func(func: d3d::CmpFunc) -> CompareOp {
    match func {
        d3d::CmpFunc::Never => CompareOp::Never,
        d3d::CmpFunc::Less => CompareOp::Less,
        d3d::CmpFunc::Equal => CompareOp::Equal,
        d3d::CmpFunc::LessEqual => CompareOp::LessOrEqual,
        d3d::CmpFunc::Greater => CompareOp::Greater,
        d3d::CmpFunc::NotEqual => CompareOp::NotEqual,
        d3d::CmpFunc::GreaterEqual => CompareOp::GreaterOrEqual,
        d3d::CmpFunc::Always => CompareOp::Always,
    }
}

pub fn stencil_op(op: d3d::StencilOp) -> StencilAction {
    match op {
        d3d::StencilOp::Keep => StencilAction::Keep,
        d3d::StencilOp::Zero => StencilAction::Zero,
        d3d::StencilOp::Replace => StencilAction::Replace,
        d3d::StencilOp::IncrSat => StencilAction::IncrementAndClamp,
        d3d::StencilOp::DecrSat => StencilAction::DecrementAndClamp,
        d3d::StencilOp::Invert => StencilAction::Invert,
        d3d::StencilOp::Incr => StencilAction::IncrementAndWrap,
        d3d::StencilOp::Decr => StencilAction::DecrementAndWrap,
    }
}

/// D3D winding convention: CW culls back faces, CCW culls front faces.
pub fn cull_mode(mode: d3d::CullMode) -> CullState {
    match mode {
        d3d::CullMode::None => CullState::Disabled,
        d3d::CullMode::Cw => CullState::Back,
        d3d::CullMode::Ccw => CullState::Front,
    }
}

pub fn fill_mode(mode: d3d::FillMode) -> PolygonMode {
    match mode {
        d3d::FillMode::Point => PolygonMode::Point,
        d3d::FillMode::Wireframe => PolygonMode::Line,
        d3d::FillMode::Solid => PolygonMode::Fill,
    }
}

/// BORDER approximates to clamp-to-edge (plus border color where the
/// backend can honour it); MIRRORONCE approximates to mirror-repeat.
pub fn address_mode(mode: d3d::TextureAddress) -> AddressMode {
    match mode {
        d3d::TextureAddress::Wrap => AddressMode::Repeat,
        d3d::TextureAddress::Mirror => AddressMode::MirrorRepeat,
        d3d::TextureAddress::Clamp => AddressMode::ClampToEdge,
        d3d::TextureAddress::Border => AddressMode::ClampToEdge,
        d3d::TextureAddress::MirrorOnce => AddressMode::MirrorRepeat,
    }
}

/// Filter selection; anisotropic keeps a linear base filter and the caller
/// raises max anisotropy separately.
pub fn texture_filter(filter: d3d::TextureFilter) -> FilterMode {
    match filter {
        d3d::TextureFilter::None => FilterMode::Nearest,
        d3d::TextureFilter::Point => FilterMode::Nearest,
        d3d::TextureFilter::Linear => FilterMode::Linear,
        d3d::TextureFilter::Anisotropic => FilterMode::Linear,
        d3d::TextureFilter::FlatCubic => FilterMode::Linear,
        d3d::TextureFilter::GaussianCubic => FilterMode::Linear,
    }
}

pub fn mip_filter(filter: d3d::TextureFilter) -> Option<FilterMode> {
    match filter {
        d3d::TextureFilter::None => None,
        other => Some(texture_filter(other)),
    }
}

pub fn primitive_topology(ty: d3d::PrimitiveType) -> PrimitiveTopology {
    match ty {
        d3d::PrimitiveType::PointList => PrimitiveTopology::Points,
        d3d::PrimitiveType::LineList => PrimitiveTopology::Lines,
        d3d::PrimitiveType::LineStrip => PrimitiveTopology::LineStrip,
        d3d::PrimitiveType::TriangleList => PrimitiveTopology::Triangles,
        d3d::PrimitiveType::TriangleStrip => PrimitiveTopology::TriangleStrip,
        d3d::PrimitiveType::TriangleFan => PrimitiveTopology::TriangleFan,
    }
}

/// Index expansion for backends without a native triangle fan (WebGPU):
/// fan (v0, v1, v2, v3, ...) becomes triangles (v0,v1,v2), (v0,v2,v3), ...
pub fn expand_triangle_fan(first_vertex: u32, vertex_count: u32) -> Vec<u32> {
    if vertex_count < 3 {
        return Vec::new();
    }
    let mut indices = Vec::with_capacity(((vertex_count - 2) * 3) as usize);
    for i in 1..vertex_count - 1 {
        indices.push(first_vertex);
        indices.push(first_vertex + i);
        indices.push(first_vertex + i + 1);
    }
    indices
}

/// Same expansion applied to an existing index list.
pub fn expand_triangle_fan_indices(indices: &[u32]) -> Vec<u32> {
    if indices.len() < 3 {
        return Vec::new();
    }
    let mut out = Vec::with_capacity((indices.len() - 2) * 3);
    for i in 1..indices.len() - 1 {
        out.push(indices[0]);
        out.push(indices[i]);
        out.push(indices[i + 1]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blend_factor_table_is_total() {
        for raw in 1..=13u32 {
            let d3d_value = d3d::BlendFactor::from_dword(raw).unwrap();
            // no panic, every value maps
            let _ = blend_factor(d3d_value);
        }
        assert_eq!(blend_factor(d3d::BlendFactor::InvSrcAlpha), BlendFactor::OneMinusSrcAlpha);
        assert_eq!(blend_factor(d3d::BlendFactor::SrcAlphaSat), BlendFactor::SrcAlphaSaturate);
    }

    #[test]
    fn compare_and_stencil_tables_are_total() {
        for raw in 1..=8u32 {
            let _ = compare_func(d3d::CmpFunc::from_dword(raw).unwrap());
            let _ = stencil_op(d3d::StencilOp::from_dword(raw).unwrap());
        }
        assert_eq!(stencil_op(d3d::StencilOp::IncrSat), StencilAction::IncrementAndClamp);
        assert_eq!(stencil_op(d3d::StencilOp::Incr), StencilAction::IncrementAndWrap);
    }

    #[test]
    fn cull_follows_d3d_winding() {
        assert_eq!(cull_mode(d3d::CullMode::None), CullState::Disabled);
        assert_eq!(cull_mode(d3d::CullMode::Cw), CullState::Back);
        assert_eq!(cull_mode(d3d::CullMode::Ccw), CullState::Front);
    }

    #[test]
    fn address_and_filter_tables_are_total() {
        for raw in 1..=5u32 {
            let _ = address_mode(d3d::TextureAddress::from_dword(raw).unwrap());
        }
        for raw in 0..=5u32 {
            let _ = texture_filter(d3d::TextureFilter::from_dword(raw).unwrap());
        }
        assert_eq!(address_mode(d3d::TextureAddress::Border), AddressMode::ClampToEdge);
        assert_eq!(mip_filter(d3d::TextureFilter::None), None);
        assert_eq!(mip_filter(d3d::TextureFilter::Linear), Some(FilterMode::Linear));
    }

    #[test]
    fn topology_table_is_total() {
        for raw in 1..=6u32 {
            let _ = primitive_topology(d3d::PrimitiveType::from_dword(raw).unwrap());
        }
    }

    #[test]
    fn triangle_fan_expansion() {
        assert_eq!(expand_triangle_fan(0, 5), vec![0, 1, 2, 0, 2, 3, 0, 3, 4]);
        assert_eq!(expand_triangle_fan(10, 3), vec![10, 11, 12]);
        assert!(expand_triangle_fan(0, 2).is_empty());
        assert_eq!(
            expand_triangle_fan_indices(&[7, 8, 9, 10]),
            vec![7, 8, 9, 7, 9, 10]
        );
    }
}
