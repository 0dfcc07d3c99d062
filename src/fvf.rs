//! Flexible vertex format parsing.
//!
//! An FVF DWORD describes which attributes a vertex carries; the parser
//! turns it into a typed layout with byte offsets and attribute slots.

use smallvec::SmallVec;

use crate::d3d8::Dword;

pub const D3DFVF_RESERVED0: Dword = 0x0001;
pub const D3DFVF_XYZ: Dword = 0x0002;
pub const D3DFVF_XYZRHW: Dword = 0x0004;
pub const D3DFVF_XYZB1: Dword = 0x0006;
pub const D3DFVF_XYZB2: Dword = 0x0008;
pub const D3DFVF_XYZB3: Dword = 0x000A;
pub const D3DFVF_XYZB4: Dword = 0x000C;
pub const D3DFVF_XYZB5: Dword = 0x000E;
pub const D3DFVF_POSITION_MASK: Dword = 0x000E;
pub const D3DFVF_NORMAL: Dword = 0x0010;
pub const D3DFVF_PSIZE: Dword = 0x0020;
pub const D3DFVF_DIFFUSE: Dword = 0x0040;
pub const D3DFVF_SPECULAR: Dword = 0x0080;
pub const D3DFVF_TEXCOUNT_MASK: Dword = 0x0F00;
pub const D3DFVF_TEXCOUNT_SHIFT: Dword = 8;

/// `D3DFVF_TEXn`: n texture coordinate sets.
pub const fn d3dfvf_tex(n: Dword) -> Dword {
    n << D3DFVF_TEXCOUNT_SHIFT
}

/// `D3DFVF_TEXCOORDSIZEn(stage)` two-bit codes at `16 + 2*stage`.
/// Two floats is the default and encodes as zero.
pub const fn texcoord_size_bits(size: u32, stage: u32) -> Dword {
    let code: Dword = match size {
        1 => 3,
        2 => 0,
        3 => 1,
        4 => 2,
        _ => 0,
    };
    code << (16 + 2 * stage)
}

/// How position is expressed in the vertex.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PositionKind {
    /// Untransformed 3-float position.
    Xyz,
    /// Pre-transformed position with reciprocal homogeneous w.
    XyzRhw,
    /// 3-float position followed by `n` blend weights.
    XyzBlend(u8),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AttributeType {
    Float32,
    /// Four unsigned bytes in BGRA order, normalized and swizzled to RGBA
    /// at attribute-fetch time.
    UByte4Bgra,
}

/// What the attribute feeds in the generated shaders.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AttributeUsage {
    Position,
    BlendWeights,
    Normal,
    PointSize,
    Diffuse,
    Specular,
    TexCoord(u8),
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct VertexAttribute {
    pub usage: AttributeUsage,
    pub component_count: u8,
    pub data_type: AttributeType,
    pub normalized: bool,
    pub byte_offset: u32,
    pub attribute_slot: u32,
}

impl VertexAttribute {
    pub fn byte_size(&self) -> u32 {
        match self.data_type {
            AttributeType::Float32 => 4 * self.component_count as u32,
            AttributeType::UByte4Bgra => 4,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct VertexLayout {
    pub fvf: Dword,
    pub stride: u32,
    pub position: PositionKind,
    pub attributes: SmallVec<[VertexAttribute; 8]>,
}

impl VertexLayout {
    pub fn has_normal(&self) -> bool {
        self.fvf & D3DFVF_NORMAL != 0
    }

    pub fn has_diffuse(&self) -> bool {
        self.fvf & D3DFVF_DIFFUSE != 0
    }

    pub fn has_specular(&self) -> bool {
        self.fvf & D3DFVF_SPECULAR != 0
    }

    pub fn texcoord_count(&self) -> u32 {
        texcoord_count(self.fvf)
    }

    pub fn texcoord_size(&self, stage: u32) -> u32 {
        texcoord_size(self.fvf, stage)
    }
}

pub fn texcoord_count(fvf: Dword) -> u32 {
    (fvf & D3DFVF_TEXCOUNT_MASK) >> D3DFVF_TEXCOUNT_SHIFT
}

/// Component count of texture coordinate set `stage`, from the two bits at
/// `16 + 2*stage`. Defaults to 2.
pub fn texcoord_size(fvf: Dword, stage: u32) -> u32 {
    match (fvf >> (16 + stage * 2)) & 0x3 {
        3 => 1,
        0 => 2,
        1 => 3,
        2 => 4,
        _ => unreachable!(),
    }
}

pub fn position_kind(fvf: Dword) -> Option<PositionKind> {
    match fvf & D3DFVF_POSITION_MASK {
        D3DFVF_XYZ => Some(PositionKind::Xyz),
        D3DFVF_XYZRHW => Some(PositionKind::XyzRhw),
        // XYZB1 is 0x0006, each extra weight adds 2 to the mask
        m @ (D3DFVF_XYZB1 | D3DFVF_XYZB2 | D3DFVF_XYZB3 | D3DFVF_XYZB4 | D3DFVF_XYZB5) => {
            Some(PositionKind::XyzBlend(((m - D3DFVF_XYZRHW) / 2) as u8))
        }
        _ => None,
    }
}

/// Total vertex stride in bytes implied by the FVF.
pub fn vertex_size(fvf: Dword) -> u32 {
    let mut size = match position_kind(fvf) {
        Some(PositionKind::Xyz) => 12,
        Some(PositionKind::XyzRhw) => 16,
        Some(PositionKind::XyzBlend(n)) => 12 + 4 * n as u32,
        None => 0,
    };
    if fvf & D3DFVF_NORMAL != 0 {
        size += 12;
    }
    if fvf & D3DFVF_PSIZE != 0 {
        size += 4;
    }
    if fvf & D3DFVF_DIFFUSE != 0 {
        size += 4;
    }
    if fvf & D3DFVF_SPECULAR != 0 {
        size += 4;
    }
    for stage in 0..texcoord_count(fvf) {
        size += 4 * texcoord_size(fvf, stage);
    }
    size
}

/// Parse an FVF into an ordered attribute layout. Returns `None` for a
/// position mask that names no position.
pub fn parse_fvf(fvf: Dword) -> Option<VertexLayout> {
    let position = position_kind(fvf)?;
    let mut attributes = SmallVec::new();
    let mut offset = 0u32;
    let mut slot = 0u32;

    let mut push = |usage, component_count: u8, data_type, normalized, offset: &mut u32, slot: &mut u32| {
        let attr = VertexAttribute {
            usage,
            component_count,
            data_type,
            normalized,
            byte_offset: *offset,
            attribute_slot: *slot,
        };
        *offset += attr.byte_size();
        *slot += 1;
        attributes.push(attr);
    };

    match position {
        PositionKind::Xyz => {
            push(AttributeUsage::Position, 3, AttributeType::Float32, false, &mut offset, &mut slot)
        }
        PositionKind::XyzRhw => {
            push(AttributeUsage::Position, 4, AttributeType::Float32, false, &mut offset, &mut slot)
        }
        PositionKind::XyzBlend(n) => {
            push(AttributeUsage::Position, 3, AttributeType::Float32, false, &mut offset, &mut slot);
            if n > 0 {
                push(
                    AttributeUsage::BlendWeights,
                    n,
                    AttributeType::Float32,
                    false,
                    &mut offset,
                    &mut slot,
                );
            }
        }
    }

    if fvf & D3DFVF_NORMAL != 0 {
        push(AttributeUsage::Normal, 3, AttributeType::Float32, false, &mut offset, &mut slot);
    }
    if fvf & D3DFVF_PSIZE != 0 {
        push(AttributeUsage::PointSize, 1, AttributeType::Float32, false, &mut offset, &mut slot);
    }
    if fvf & D3DFVF_DIFFUSE != 0 {
        push(AttributeUsage::Diffuse, 4, AttributeType::UByte4Bgra, true, &mut offset, &mut slot);
    }
    if fvf & D3DFVF_SPECULAR != 0 {
        push(AttributeUsage::Specular, 4, AttributeType::UByte4Bgra, true, &mut offset, &mut slot);
    }
    for stage in 0..texcoord_count(fvf) {
        push(
            AttributeUsage::TexCoord(stage as u8),
            texcoord_size(fvf, stage) as u8,
            AttributeType::Float32,
            false,
            &mut offset,
            &mut slot,
        );
    }

    Some(VertexLayout {
        fvf,
        stride: offset,
        position,
        attributes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_layout_consistent(fvf: Dword) {
        let layout = parse_fvf(fvf).expect("parse");
        let mut expected_offset = 0u32;
        for (i, attr) in layout.attributes.iter().enumerate() {
            assert_eq!(attr.byte_offset, expected_offset, "offset of attr {}", i);
            assert_eq!(attr.attribute_slot, i as u32);
            expected_offset += attr.byte_size();
        }
        assert_eq!(layout.stride, expected_offset);
        assert_eq!(layout.stride, vertex_size(fvf));
    }

    #[test]
    fn basic_formats() {
        assert_eq!(vertex_size(D3DFVF_XYZ), 12);
        assert_eq!(vertex_size(D3DFVF_XYZ | D3DFVF_NORMAL), 24);
        assert_eq!(vertex_size(D3DFVF_XYZRHW | D3DFVF_DIFFUSE), 20);
        assert_eq!(vertex_size(D3DFVF_XYZ | D3DFVF_DIFFUSE | d3dfvf_tex(1)), 24);
        assert_layout_consistent(D3DFVF_XYZ);
        assert_layout_consistent(D3DFVF_XYZ | D3DFVF_NORMAL);
        assert_layout_consistent(D3DFVF_XYZRHW | D3DFVF_DIFFUSE);
    }

    #[test]
    fn blend_weight_positions() {
        let layout = parse_fvf(D3DFVF_XYZB3).unwrap();
        assert_eq!(layout.position, PositionKind::XyzBlend(3));
        assert_eq!(layout.attributes[0].component_count, 3);
        assert_eq!(layout.attributes[1].usage, AttributeUsage::BlendWeights);
        assert_eq!(layout.attributes[1].component_count, 3);
        assert_eq!(layout.stride, 24);
    }

    #[test]
    fn texcoord_sizes_all_combinations() {
        for n in 1..=8u32 {
            for size in 1..=4u32 {
                let mut fvf = D3DFVF_XYZ | d3dfvf_tex(n);
                for stage in 0..n {
                    fvf |= texcoord_size_bits(size, stage);
                }
                let layout = parse_fvf(fvf).unwrap();
                assert_eq!(layout.texcoord_count(), n);
                for stage in 0..n {
                    assert_eq!(layout.texcoord_size(stage), size);
                }
                assert_layout_consistent(fvf);
                assert_eq!(vertex_size(fvf), 12 + n * size * 4);
            }
        }
    }

    #[test]
    fn default_texcoord_size_is_two_floats() {
        let fvf = D3DFVF_XYZ | d3dfvf_tex(2);
        assert_eq!(texcoord_size(fvf, 0), 2);
        assert_eq!(texcoord_size(fvf, 1), 2);
        assert_eq!(vertex_size(fvf), 12 + 16);
    }

    #[test]
    fn diffuse_is_normalized_bgra() {
        let layout = parse_fvf(D3DFVF_XYZ | D3DFVF_DIFFUSE).unwrap();
        let diffuse = &layout.attributes[1];
        assert_eq!(diffuse.data_type, AttributeType::UByte4Bgra);
        assert!(diffuse.normalized);
        assert_eq!(diffuse.byte_offset, 12);
    }

    #[test]
    fn position_mask_without_position_is_rejected() {
        assert!(parse_fvf(D3DFVF_NORMAL).is_none());
    }
}
