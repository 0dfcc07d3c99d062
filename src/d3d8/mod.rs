//! The D3D8 type and enum vocabulary.
//!
//! Discriminants are bit-exact with the Direct3D 8 headers; the public
//! device surface accepts raw DWORDs and converts to these typed values
//! at the boundary.

mod types;

pub use self::types::*;

/// Raw 32-bit value as the D3D8 API hands it over.
pub type Dword = u32;

macro_rules! d3d_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $value:expr),+ $(,)? }) => {
        $(#[$meta])*
        #[repr(u32)]
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant = $value),+
        }

        impl $name {
            pub fn from_dword(value: Dword) -> Option<$name> {
                match value {
                    $($value => Some($name::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

d3d_enum!(BlendFactor {
    Zero = 1,
    One = 2,
    SrcColor = 3,
    InvSrcColor = 4,
    SrcAlpha = 5,
    InvSrcAlpha = 6,
    DestAlpha = 7,
    InvDestAlpha = 8,
    DestColor = 9,
    InvDestColor = 10,
    SrcAlphaSat = 11,
    BothSrcAlpha = 12,
    BothInvSrcAlpha = 13,
});

d3d_enum!(BlendOp {
    Add = 1,
    Subtract = 2,
    RevSubtract = 3,
    Min = 4,
    Max = 5,
});

d3d_enum!(CmpFunc {
    Never = 1,
    Less = 2,
    Equal = 3,
    LessEqual = 4,
    Greater = 5,
    NotEqual = 6,
    GreaterEqual = 7,
    Always = 8,
});

d3d_enum!(StencilOp {
    Keep = 1,
    Zero = 2,
    Replace = 3,
    IncrSat = 4,
    DecrSat = 5,
    Invert = 6,
    Incr = 7,
    Decr = 8,
});

d3d_enum!(CullMode {
    None = 1,
    Cw = 2,
    Ccw = 3,
});

d3d_enum!(FillMode {
    Point = 1,
    Wireframe = 2,
    Solid = 3,
});

d3d_enum!(ShadeMode {
    Flat = 1,
    Gouraud = 2,
    Phong = 3,
});

d3d_enum!(FogMode {
    None = 0,
    Exp = 1,
    Exp2 = 2,
    Linear = 3,
});

d3d_enum!(TextureOp {
    Disable = 1,
    SelectArg1 = 2,
    SelectArg2 = 3,
    Modulate = 4,
    Modulate2x = 5,
    Modulate4x = 6,
    Add = 7,
    AddSigned = 8,
    AddSigned2x = 9,
    Subtract = 10,
    AddSmooth = 11,
    BlendDiffuseAlpha = 12,
    BlendTextureAlpha = 13,
    BlendFactorAlpha = 14,
    BlendTextureAlphaPm = 15,
    BlendCurrentAlpha = 16,
    PreModulate = 17,
    ModulateAlphaAddColor = 18,
    ModulateColorAddAlpha = 19,
    ModulateInvAlphaAddColor = 20,
    ModulateInvColorAddAlpha = 21,
    BumpEnvMap = 22,
    BumpEnvMapLuminance = 23,
    DotProduct3 = 24,
    MultiplyAdd = 25,
    Lerp = 26,
});

d3d_enum!(TextureAddress {
    Wrap = 1,
    Mirror = 2,
    Clamp = 3,
    Border = 4,
    MirrorOnce = 5,
});

d3d_enum!(TextureFilter {
    None = 0,
    Point = 1,
    Linear = 2,
    Anisotropic = 3,
    FlatCubic = 4,
    GaussianCubic = 5,
});

d3d_enum!(PrimitiveType {
    PointList = 1,
    LineList = 2,
    LineStrip = 3,
    TriangleList = 4,
    TriangleStrip = 5,
    TriangleFan = 6,
});

d3d_enum!(LightType {
    Point = 1,
    Spot = 2,
    Directional = 3,
});

d3d_enum!(MaterialColorSource {
    Material = 0,
    Color1 = 1,
    Color2 = 2,
});

d3d_enum!(StateBlockType {
    All = 1,
    PixelState = 2,
    VertexState = 3,
});

// ---------------------------------------------------------------------------
// Render state, transform state, texture stage state ids
// ---------------------------------------------------------------------------

d3d_enum!(
/// `D3DRENDERSTATETYPE`. Only the states the runtime shadows are listed;
/// anything else is rejected as an invalid call.
RenderStateType {
    ZEnable = 7,
    FillMode = 8,
    ShadeMode = 9,
    ZWriteEnable = 14,
    AlphaTestEnable = 15,
    LastPixel = 16,
    SrcBlend = 19,
    DestBlend = 20,
    CullMode = 22,
    ZFunc = 23,
    AlphaRef = 24,
    AlphaFunc = 25,
    DitherEnable = 26,
    AlphaBlendEnable = 27,
    FogEnable = 28,
    SpecularEnable = 29,
    FogColor = 34,
    FogTableMode = 35,
    FogStart = 36,
    FogEnd = 37,
    FogDensity = 38,
    ZBias = 47,
    RangeFogEnable = 48,
    StencilEnable = 52,
    StencilFail = 53,
    StencilZFail = 54,
    StencilPass = 55,
    StencilFunc = 56,
    StencilRef = 57,
    StencilMask = 58,
    StencilWriteMask = 59,
    TextureFactor = 60,
    Clipping = 136,
    Lighting = 137,
    Ambient = 139,
    FogVertexMode = 140,
    ColorVertex = 141,
    LocalViewer = 142,
    NormalizeNormals = 143,
    DiffuseMaterialSource = 145,
    SpecularMaterialSource = 146,
    AmbientMaterialSource = 147,
    EmissiveMaterialSource = 148,
    ClipPlaneEnable = 152,
    PointSize = 154,
    MultisampleAntialias = 161,
    ColorWriteEnable = 168,
    BlendOp = 171,
    ScissorTestEnable = 174,
});

d3d_enum!(TextureStageStateType {
    ColorOp = 1,
    ColorArg1 = 2,
    ColorArg2 = 3,
    AlphaOp = 4,
    AlphaArg1 = 5,
    AlphaArg2 = 6,
    BumpEnvMat00 = 7,
    BumpEnvMat01 = 8,
    BumpEnvMat10 = 9,
    BumpEnvMat11 = 10,
    TexCoordIndex = 11,
    AddressU = 13,
    AddressV = 14,
    BorderColor = 15,
    MagFilter = 16,
    MinFilter = 17,
    MipFilter = 18,
    MipMapLodBias = 19,
    MaxMipLevel = 20,
    MaxAnisotropy = 21,
    BumpEnvLScale = 22,
    BumpEnvLOffset = 23,
    TextureTransformFlags = 24,
    AddressW = 25,
    ColorArg0 = 26,
    AlphaArg0 = 27,
    ResultArg = 28,
});

/// `D3DTRANSFORMSTATETYPE`, with the world matrix at its D3D8 value.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TransformStateType {
    View,
    Projection,
    Texture(usize),
    World,
}

impl TransformStateType {
    pub fn from_dword(value: Dword) -> Option<TransformStateType> {
        match value {
            2 => Some(TransformStateType::View),
            3 => Some(TransformStateType::Projection),
            16..=23 => Some(TransformStateType::Texture((value - 16) as usize)),
            256 => Some(TransformStateType::World),
            _ => None,
        }
    }

    pub fn to_dword(self) -> Dword {
        match self {
            TransformStateType::View => 2,
            TransformStateType::Projection => 3,
            TransformStateType::Texture(i) => 16 + i as Dword,
            TransformStateType::World => 256,
        }
    }
}

// ---------------------------------------------------------------------------
// Texture argument codes and texture transform flags
// ---------------------------------------------------------------------------

pub const D3DTA_SELECTMASK: Dword = 0x0000_000F;
pub const D3DTA_DIFFUSE: Dword = 0x0000_0000;
pub const D3DTA_CURRENT: Dword = 0x0000_0001;
pub const D3DTA_TEXTURE: Dword = 0x0000_0002;
pub const D3DTA_TFACTOR: Dword = 0x0000_0003;
pub const D3DTA_SPECULAR: Dword = 0x0000_0004;
pub const D3DTA_TEMP: Dword = 0x0000_0005;
pub const D3DTA_COMPLEMENT: Dword = 0x0000_0010;
pub const D3DTA_ALPHAREPLICATE: Dword = 0x0000_0020;

pub const D3DTTFF_DISABLE: Dword = 0;
pub const D3DTTFF_COUNT1: Dword = 1;
pub const D3DTTFF_COUNT2: Dword = 2;
pub const D3DTTFF_COUNT3: Dword = 3;
pub const D3DTTFF_COUNT4: Dword = 4;
pub const D3DTTFF_PROJECTED: Dword = 256;

/// Texture-coordinate index generation selectors (high word of
/// `D3DTSS_TEXCOORDINDEX`).
pub const D3DTSS_TCI_PASSTHRU: Dword = 0x0000_0000;
pub const D3DTSS_TCI_CAMERASPACENORMAL: Dword = 0x0001_0000;
pub const D3DTSS_TCI_CAMERASPACEPOSITION: Dword = 0x0002_0000;
pub const D3DTSS_TCI_CAMERASPACEREFLECTIONVECTOR: Dword = 0x0003_0000;

bitflags! {
    /// `Clear` flags.
    pub struct ClearFlags: u32 {
        const TARGET = 0x0000_0001;
        const ZBUFFER = 0x0000_0002;
        const STENCIL = 0x0000_0004;
    }
}

pub const MAX_TEXTURE_STAGES: usize = 8;
pub const MAX_LIGHTS: usize = 8;
pub const MAX_CLIP_PLANES: usize = 6;
pub const MAX_STREAMS: usize = 16;

/// Number of vertices consumed by `count` primitives of the given type.
pub fn primitive_vertex_count(ty: PrimitiveType, count: u32) -> u32 {
    match ty {
        PrimitiveType::PointList => count,
        PrimitiveType::LineList => count * 2,
        PrimitiveType::LineStrip => count + 1,
        PrimitiveType::TriangleList => count * 3,
        PrimitiveType::TriangleStrip => count + 2,
        PrimitiveType::TriangleFan => count + 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discriminants_match_d3d8_headers() {
        assert_eq!(BlendFactor::Zero as u32, 1);
        assert_eq!(BlendFactor::SrcAlphaSat as u32, 11);
        assert_eq!(BlendOp::Max as u32, 5);
        assert_eq!(CmpFunc::Always as u32, 8);
        assert_eq!(StencilOp::Decr as u32, 8);
        assert_eq!(CullMode::Ccw as u32, 3);
        assert_eq!(TextureOp::MultiplyAdd as u32, 25);
        assert_eq!(TextureAddress::MirrorOnce as u32, 5);
        assert_eq!(PrimitiveType::TriangleFan as u32, 6);
        assert_eq!(LightType::Directional as u32, 3);
        assert_eq!(RenderStateType::ScissorTestEnable as u32, 174);
        assert_eq!(TextureStageStateType::ResultArg as u32, 28);
    }

    #[test]
    fn transform_state_round_trips() {
        for raw in [2u32, 3, 16, 23, 256] {
            let ts = TransformStateType::from_dword(raw).unwrap();
            assert_eq!(ts.to_dword(), raw);
        }
        assert_eq!(TransformStateType::from_dword(4), None);
        assert_eq!(TransformStateType::from_dword(24), None);
    }

    #[test]
    fn primitive_vertex_counts() {
        assert_eq!(primitive_vertex_count(PrimitiveType::PointList, 7), 7);
        assert_eq!(primitive_vertex_count(PrimitiveType::LineList, 7), 14);
        assert_eq!(primitive_vertex_count(PrimitiveType::LineStrip, 7), 8);
        assert_eq!(primitive_vertex_count(PrimitiveType::TriangleList, 7), 21);
        assert_eq!(primitive_vertex_count(PrimitiveType::TriangleStrip, 7), 9);
        assert_eq!(primitive_vertex_count(PrimitiveType::TriangleFan, 7), 9);
    }

    #[test]
    fn unknown_dwords_are_rejected() {
        assert_eq!(BlendFactor::from_dword(0), None);
        assert_eq!(BlendFactor::from_dword(14), None);
        assert_eq!(CmpFunc::from_dword(9), None);
        assert_eq!(TextureOp::from_dword(0), None);
        assert_eq!(RenderStateType::from_dword(9999), None);
    }
}
