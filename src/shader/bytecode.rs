//! The D3D8 shader token stream.
//!
//! Wire format (32-bit tokens, little-endian):
//!
//! * token 0: version — `0xFFFE0101` (vs_1_1) or `0xFFFF0101..0xFFFF0104`
//!   (ps_1_1..ps_1_4)
//! * instruction token: bit 31 set, bit 30 co-issue, bits 23:16 length in
//!   tokens including itself, bits 15:0 opcode
//! * parameter token: bit 31 set, bits 30:28 register file, bits 10:0
//!   register number. Destinations carry the write mask in bits 19:16,
//!   the result modifier in bits 15:13 and the result shift in bits
//!   27:24; sources carry the swizzle in bits 23:16, the source modifier
//!   in bits 27:24 and the relative-addressing flag in bit 13.
//! * `def` is six tokens, the last four reinterpreted IEEE-754 floats;
//!   `dcl` is three tokens (instruction, usage, destination)
//! * the stream ends with `0x0000FFFF`
//!
//! Every instruction encodes its length, so a reader can walk the stream
//! with no opcode-specific knowledge.

use smallvec::SmallVec;

use crate::d3d8::Dword;

pub const VS_1_1: Dword = 0xFFFE_0101;
pub const PS_1_1: Dword = 0xFFFF_0101;
pub const PS_1_2: Dword = 0xFFFF_0102;
pub const PS_1_3: Dword = 0xFFFF_0103;
pub const PS_1_4: Dword = 0xFFFF_0104;
pub const END_TOKEN: Dword = 0x0000_FFFF;

pub const MAX_VS_FLOAT_CONSTANTS: usize = 96;
pub const MAX_PS_FLOAT_CONSTANTS: usize = 8;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ShaderKind {
    Vertex,
    /// Pixel shader with its minor version (1..=4).
    Pixel(u8),
}

impl ShaderKind {
    pub fn from_version(version: Dword) -> Option<ShaderKind> {
        match version {
            VS_1_1 => Some(ShaderKind::Vertex),
            PS_1_1 => Some(ShaderKind::Pixel(1)),
            PS_1_2 => Some(ShaderKind::Pixel(2)),
            PS_1_3 => Some(ShaderKind::Pixel(3)),
            PS_1_4 => Some(ShaderKind::Pixel(4)),
            _ => None,
        }
    }

    pub fn is_pixel(self) -> bool {
        matches!(self, ShaderKind::Pixel(_))
    }
}

// ---------------------------------------------------------------------------
// Opcodes
// ---------------------------------------------------------------------------

macro_rules! opcodes {
    ($($variant:ident = $value:expr, $name:expr, $srcs:expr;)+) => {
        #[repr(u16)]
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
        pub enum Opcode {
            $($variant = $value),+
        }

        impl Opcode {
            pub fn from_u16(value: u16) -> Option<Opcode> {
                match value {
                    $($value => Some(Opcode::$variant),)+
                    _ => None,
                }
            }

            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(Opcode::$variant => $name),+
                }
            }

            /// Source operand count in the canonical form.
            pub fn source_count(self) -> usize {
                match self {
                    $(Opcode::$variant => $srcs),+
                }
            }
        }
    };
}

opcodes! {
    Nop = 0, "nop", 0;
    Mov = 1, "mov", 1;
    Add = 2, "add", 2;
    Sub = 3, "sub", 2;
    Mad = 4, "mad", 3;
    Mul = 5, "mul", 2;
    Rcp = 6, "rcp", 1;
    Rsq = 7, "rsq", 1;
    Dp3 = 8, "dp3", 2;
    Dp4 = 9, "dp4", 2;
    Min = 10, "min", 2;
    Max = 11, "max", 2;
    Slt = 12, "slt", 2;
    Sge = 13, "sge", 2;
    Exp = 14, "exp", 1;
    Log = 15, "log", 1;
    Lit = 16, "lit", 1;
    Dst = 17, "dst", 2;
    Lrp = 18, "lrp", 3;
    Frc = 19, "frc", 1;
    M4x4 = 20, "m4x4", 2;
    M4x3 = 21, "m4x3", 2;
    M3x4 = 22, "m3x4", 2;
    M3x3 = 23, "m3x3", 2;
    M3x2 = 24, "m3x2", 2;
    Dcl = 31, "dcl", 0;
    SinCos = 37, "sincos", 1;
    Mova = 46, "mova", 1;
    TexKill = 65, "texkill", 0;
    Tex = 66, "tex", 0;
    TexBem = 67, "texbem", 1;
    TexBemL = 68, "texbeml", 1;
    Expp = 78, "expp", 1;
    Logp = 79, "logp", 1;
    Cnd = 80, "cnd", 3;
    Def = 81, "def", 0;
    Cmp = 88, "cmp", 3;
    Bem = 89, "bem", 2;
    Phase = 0xFFFD, "phase", 0;
    Comment = 0xFFFE, "; ", 0;
}

// ---------------------------------------------------------------------------
// Registers and modifiers
// ---------------------------------------------------------------------------

/// Register files, 3 bits on the wire. File 3 is the address register in
/// vertex shaders and the texture-coordinate register in pixel shaders.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RegisterFile {
    Temp = 0,
    Input = 1,
    Const = 2,
    AddrTexture = 3,
    RastOut = 4,
    AttrOut = 5,
    TexCoordOut = 6,
}

impl RegisterFile {
    pub fn from_bits(bits: u32) -> Option<RegisterFile> {
        match bits {
            0 => Some(RegisterFile::Temp),
            1 => Some(RegisterFile::Input),
            2 => Some(RegisterFile::Const),
            3 => Some(RegisterFile::AddrTexture),
            4 => Some(RegisterFile::RastOut),
            5 => Some(RegisterFile::AttrOut),
            6 => Some(RegisterFile::TexCoordOut),
            _ => None,
        }
    }
}

#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SrcModifier {
    None = 0,
    Negate = 1,
    Bias = 2,
    BiasNegate = 3,
    /// `_bx2`: signed scaling, (x - 0.5) * 2.
    SignedScale = 4,
    SignedScaleNegate = 5,
    /// `1-x`.
    Complement = 6,
    X2 = 7,
    X2Negate = 8,
    Dz = 9,
    Dw = 10,
}

impl SrcModifier {
    pub fn from_bits(bits: u32) -> Option<SrcModifier> {
        match bits {
            0 => Some(SrcModifier::None),
            1 => Some(SrcModifier::Negate),
            2 => Some(SrcModifier::Bias),
            3 => Some(SrcModifier::BiasNegate),
            4 => Some(SrcModifier::SignedScale),
            5 => Some(SrcModifier::SignedScaleNegate),
            6 => Some(SrcModifier::Complement),
            7 => Some(SrcModifier::X2),
            8 => Some(SrcModifier::X2Negate),
            9 => Some(SrcModifier::Dz),
            10 => Some(SrcModifier::Dw),
            _ => None,
        }
    }
}

bitflags! {
    pub struct ResultModifier: u8 {
        const SATURATE = 0x1;
        const PARTIAL_PRECISION = 0x2;
        const CENTROID = 0x4;
    }
}

/// Result shift scale, 4-bit code: 1..=3 multiply by 2/4/8,
/// 0xF..=0xD divide by 2/4/8, 0 is none.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResultShift(pub u8);

impl ResultShift {
    pub const NONE: ResultShift = ResultShift(0);
    pub const X2: ResultShift = ResultShift(1);
    pub const X4: ResultShift = ResultShift(2);
    pub const X8: ResultShift = ResultShift(3);
    pub const D2: ResultShift = ResultShift(0xF);
    pub const D4: ResultShift = ResultShift(0xE);
    pub const D8: ResultShift = ResultShift(0xD);

    /// Scale factor the shift applies to the instruction result.
    pub fn factor(self) -> Option<f32> {
        match self.0 {
            0 => None,
            1 => Some(2.0),
            2 => Some(4.0),
            3 => Some(8.0),
            0xF => Some(0.5),
            0xE => Some(0.25),
            0xD => Some(0.125),
            _ => None,
        }
    }

    pub fn suffix(self) -> &'static str {
        match self.0 {
            1 => "_x2",
            2 => "_x4",
            3 => "_x8",
            0xF => "_d2",
            0xE => "_d4",
            0xD => "_d8",
            _ => "",
        }
    }
}

pub const WRITEMASK_X: u8 = 0x1;
pub const WRITEMASK_Y: u8 = 0x2;
pub const WRITEMASK_Z: u8 = 0x4;
pub const WRITEMASK_W: u8 = 0x8;
pub const WRITEMASK_ALL: u8 = 0xF;

/// Identity swizzle `.xyzw`, two bits per component.
pub const SWIZZLE_NONE: u8 = 0b1110_0100;

/// Broadcast swizzle `.cccc` for component 0..=3.
pub fn swizzle_replicate(component: u8) -> u8 {
    let c = component & 0x3;
    c | c << 2 | c << 4 | c << 6
}

pub fn swizzle_component(swizzle: u8, lane: usize) -> u8 {
    (swizzle >> (lane * 2)) & 0x3
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct DestParam {
    pub file: RegisterFile,
    pub index: u32,
    pub write_mask: u8,
    pub modifier: u8,
    pub shift: ResultShift,
}

impl DestParam {
    pub fn new(file: RegisterFile, index: u32) -> DestParam {
        DestParam {
            file,
            index,
            write_mask: WRITEMASK_ALL,
            modifier: 0,
            shift: ResultShift::NONE,
        }
    }

    pub fn masked(file: RegisterFile, index: u32, write_mask: u8) -> DestParam {
        DestParam {
            write_mask,
            ..DestParam::new(file, index)
        }
    }

    pub fn saturated(self) -> DestParam {
        DestParam {
            modifier: self.modifier | ResultModifier::SATURATE.bits(),
            ..self
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SrcParam {
    pub file: RegisterFile,
    pub index: u32,
    pub swizzle: u8,
    pub modifier: SrcModifier,
    /// Relative addressing through `a0.x` (vertex shaders only).
    pub relative: bool,
}

impl SrcParam {
    pub fn new(file: RegisterFile, index: u32) -> SrcParam {
        SrcParam {
            file,
            index,
            swizzle: SWIZZLE_NONE,
            modifier: SrcModifier::None,
            relative: false,
        }
    }

    pub fn swizzled(file: RegisterFile, index: u32, swizzle: u8) -> SrcParam {
        SrcParam {
            swizzle,
            ..SrcParam::new(file, index)
        }
    }

    pub fn negated(self) -> SrcParam {
        SrcParam {
            modifier: SrcModifier::Negate,
            ..self
        }
    }

    pub fn relative_to_a0(self) -> SrcParam {
        SrcParam {
            relative: true,
            ..self
        }
    }
}

/// DCL usage codes, bits 4:0 of the usage token.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DeclUsage {
    Position = 0,
    BlendWeight = 1,
    BlendIndices = 2,
    Normal = 3,
    PointSize = 4,
    TexCoord = 5,
    Tangent = 6,
    Binormal = 7,
    Color = 10,
}

impl DeclUsage {
    pub fn from_bits(bits: u32) -> Option<DeclUsage> {
        match bits {
            0 => Some(DeclUsage::Position),
            1 => Some(DeclUsage::BlendWeight),
            2 => Some(DeclUsage::BlendIndices),
            3 => Some(DeclUsage::Normal),
            4 => Some(DeclUsage::PointSize),
            5 => Some(DeclUsage::TexCoord),
            6 => Some(DeclUsage::Tangent),
            7 => Some(DeclUsage::Binormal),
            10 => Some(DeclUsage::Color),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DeclUsage::Position => "position",
            DeclUsage::BlendWeight => "blendweight",
            DeclUsage::BlendIndices => "blendindices",
            DeclUsage::Normal => "normal",
            DeclUsage::PointSize => "psize",
            DeclUsage::TexCoord => "texcoord",
            DeclUsage::Tangent => "tangent",
            DeclUsage::Binormal => "binormal",
            DeclUsage::Color => "color",
        }
    }
}

/// One decoded instruction. The tagged form keeps the translator's match
/// tables exhaustive.
#[derive(Clone, Debug, PartialEq)]
pub enum Instruction {
    Def {
        register: u32,
        values: [f32; 4],
    },
    Dcl {
        usage: DeclUsage,
        usage_index: u8,
        dest: DestParam,
    },
    Phase,
    Comment(String),
    Op {
        opcode: Opcode,
        coissue: bool,
        dest: DestParam,
        sources: SmallVec<[SrcParam; 3]>,
    },
    /// In-format instruction with an opcode this runtime does not know.
    /// Decoding keeps it so the translator can flag it without aborting.
    Unknown {
        opcode: u16,
        params: Vec<Dword>,
    },
}

/// A decoded shader: version plus instruction list.
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedShader {
    pub version: Dword,
    pub instructions: Vec<Instruction>,
}

impl ParsedShader {
    pub fn kind(&self) -> ShaderKind {
        ShaderKind::from_version(self.version).expect("parsed shader carries a valid version")
    }
}

// ---------------------------------------------------------------------------
// Token encoding
// ---------------------------------------------------------------------------

const PARAM_BIT: Dword = 0x8000_0000;
const COISSUE_BIT: Dword = 0x4000_0000;

fn instruction_token(opcode: Opcode, length: u32, coissue: bool) -> Dword {
    debug_assert!(length > 0 && length <= 0xFF);
    PARAM_BIT
        | if coissue { COISSUE_BIT } else { 0 }
        | (length & 0xFF) << 16
        | (opcode as u32) & 0xFFFF
}

pub(crate) fn encode_dest(dest: &DestParam) -> Dword {
    PARAM_BIT
        | (dest.file as u32) << 28
        | (dest.shift.0 as u32) << 24
        | (dest.write_mask as u32 & 0xF) << 16
        | (dest.modifier as u32 & 0x7) << 13
        | dest.index & 0x7FF
}

pub(crate) fn encode_src(src: &SrcParam) -> Dword {
    PARAM_BIT
        | (src.file as u32) << 28
        | (src.modifier as u32) << 24
        | (src.swizzle as u32) << 16
        | if src.relative { 1 << 13 } else { 0 }
        | src.index & 0x7FF
}

fn encode_usage(usage: DeclUsage, usage_index: u8) -> Dword {
    PARAM_BIT | (usage_index as u32 & 0xF) << 16 | (usage as u32 & 0x1F)
}

pub(crate) struct DecodedDest(pub DestParam);
pub(crate) struct DecodedSrc(pub SrcParam);

pub(crate) fn decode_dest(token: Dword) -> Option<DecodedDest> {
    let file = RegisterFile::from_bits(token >> 28 & 0x7)?;
    Some(DecodedDest(DestParam {
        file,
        index: token & 0x7FF,
        write_mask: (token >> 16 & 0xF) as u8,
        modifier: (token >> 13 & 0x7) as u8,
        shift: ResultShift((token >> 24 & 0xF) as u8),
    }))
}

pub(crate) fn decode_src(token: Dword) -> Option<DecodedSrc> {
    let file = RegisterFile::from_bits(token >> 28 & 0x7)?;
    let modifier = SrcModifier::from_bits(token >> 24 & 0xF)?;
    Some(DecodedSrc(SrcParam {
        file,
        index: token & 0x7FF,
        swizzle: (token >> 16 & 0xFF) as u8,
        modifier,
        relative: token & 1 << 13 != 0,
    }))
}

pub(crate) fn decode_usage(token: Dword) -> Option<(DeclUsage, u8)> {
    let usage = DeclUsage::from_bits(token & 0x1F)?;
    Some((usage, (token >> 16 & 0xF) as u8))
}

pub(crate) fn is_param_token(token: Dword) -> bool {
    token & PARAM_BIT != 0
}

// ---------------------------------------------------------------------------
// Assembler
// ---------------------------------------------------------------------------

/// Builds a token stream instruction by instruction.
pub struct BytecodeAssembler {
    tokens: Vec<Dword>,
    has_version: bool,
    pending_modifier: u8,
    pending_shift: ResultShift,
    pending_coissue: bool,
}

impl BytecodeAssembler {
    pub fn new() -> BytecodeAssembler {
        BytecodeAssembler {
            tokens: Vec::new(),
            has_version: false,
            pending_modifier: 0,
            pending_shift: ResultShift::NONE,
            pending_coissue: false,
        }
    }

    pub fn clear(&mut self) {
        self.tokens.clear();
        self.has_version = false;
        self.pending_modifier = 0;
        self.pending_shift = ResultShift::NONE;
        self.pending_coissue = false;
    }

    pub fn set_version(&mut self, version: Dword) {
        if self.has_version {
            warn!("shader version set twice, keeping the first");
            return;
        }
        self.tokens.push(version);
        self.has_version = true;
    }

    /// `def c#, x, y, z, w`
    pub fn add_def(&mut self, register: u32, x: f32, y: f32, z: f32, w: f32) {
        self.tokens.push(instruction_token(Opcode::Def, 6, false));
        self.tokens
            .push(encode_dest(&DestParam::new(RegisterFile::Const, register)));
        for v in [x, y, z, w] {
            self.tokens.push(v.to_bits());
        }
    }

    pub fn add_dcl(&mut self, usage: DeclUsage, usage_index: u8, dest: DestParam) {
        self.tokens.push(instruction_token(Opcode::Dcl, 3, false));
        self.tokens.push(encode_usage(usage, usage_index));
        self.tokens.push(encode_dest(&dest));
    }

    /// Applies to the next `add_instruction` only.
    pub fn set_instruction_modifier(&mut self, modifier: ResultModifier, shift: ResultShift) {
        self.pending_modifier = modifier.bits();
        self.pending_shift = shift;
    }

    /// Applies to the next `add_instruction` only.
    pub fn set_coissue(&mut self, coissue: bool) {
        self.pending_coissue = coissue;
    }

    pub fn add_instruction(&mut self, opcode: Opcode, dest: DestParam, sources: &[SrcParam]) {
        let mut dest = dest;
        dest.modifier |= self.pending_modifier;
        if self.pending_shift != ResultShift::NONE {
            dest.shift = self.pending_shift;
        }
        let length = 2 + sources.len() as u32;
        self.tokens
            .push(instruction_token(opcode, length, self.pending_coissue));
        self.tokens.push(encode_dest(&dest));
        for src in sources {
            self.tokens.push(encode_src(src));
        }
        self.pending_modifier = 0;
        self.pending_shift = ResultShift::NONE;
        self.pending_coissue = false;
    }

    pub fn add_phase(&mut self) {
        self.tokens.push(instruction_token(Opcode::Phase, 1, false));
    }

    /// Comment payload is carried in the stream but ignored by every
    /// consumer. Truncated to what the 8-bit length field can hold.
    pub fn add_comment(&mut self, text: &str) {
        let bytes = text.as_bytes();
        let max_payload = (0xFF - 1) * 4;
        let bytes = &bytes[..bytes.len().min(max_payload)];
        let dwords = (bytes.len() + 3) / 4;
        self.tokens
            .push(instruction_token(Opcode::Comment, 1 + dwords as u32, false));
        for chunk in bytes.chunks(4) {
            let mut packed = [0u8; 4];
            packed[..chunk.len()].copy_from_slice(chunk);
            self.tokens.push(u32::from_le_bytes(packed));
        }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Finalize: appends the end marker and hands back the stream.
    pub fn finish(mut self) -> Vec<Dword> {
        self.tokens.push(END_TOKEN);
        self.tokens
    }
}

impl Default for BytecodeAssembler {
    fn default() -> Self {
        BytecodeAssembler::new()
    }
}

/// Re-encode a parsed shader into a token stream (end marker included).
pub fn encode(shader: &ParsedShader) -> Vec<Dword> {
    let mut asm = BytecodeAssembler::new();
    asm.set_version(shader.version);
    for inst in &shader.instructions {
        match inst {
            Instruction::Def { register, values } => {
                asm.add_def(*register, values[0], values[1], values[2], values[3]);
            }
            Instruction::Dcl {
                usage,
                usage_index,
                dest,
            } => asm.add_dcl(*usage, *usage_index, *dest),
            Instruction::Phase => asm.add_phase(),
            Instruction::Comment(text) => asm.add_comment(text),
            Instruction::Op {
                opcode,
                coissue,
                dest,
                sources,
            } => {
                if *opcode == Opcode::Nop {
                    asm.tokens.push(instruction_token(Opcode::Nop, 1, false));
                    continue;
                }
                asm.set_coissue(*coissue);
                asm.add_instruction(*opcode, *dest, sources);
            }
            Instruction::Unknown { opcode, params } => {
                asm.tokens.push(PARAM_BIT | ((1 + params.len() as u32) << 16) | *opcode as u32);
                asm.tokens.extend_from_slice(params);
            }
        }
    }
    asm.finish()
}

/// FNV-1a over the raw token bytes. Used as the cache key for programs;
/// zero is reserved for "no shader".
pub fn compute_bytecode_hash(tokens: &[Dword]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01B3;
    let mut hash = OFFSET_BASIS;
    for token in tokens {
        for byte in token.to_le_bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(PRIME);
        }
    }
    if hash == 0 {
        hash = OFFSET_BASIS;
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instruction_token_layout() {
        let token = instruction_token(Opcode::Mad, 5, true);
        assert_eq!(token & 0x8000_0000, 0x8000_0000);
        assert_eq!(token & 0x4000_0000, 0x4000_0000);
        assert_eq!(token >> 16 & 0xFF, 5);
        assert_eq!(token & 0xFFFF, 4);
    }

    #[test]
    fn dest_param_round_trips() {
        let dest = DestParam {
            file: RegisterFile::AttrOut,
            index: 1,
            write_mask: WRITEMASK_X | WRITEMASK_W,
            modifier: ResultModifier::SATURATE.bits(),
            shift: ResultShift::D2,
        };
        let decoded = decode_dest(encode_dest(&dest)).unwrap().0;
        assert_eq!(decoded, dest);
    }

    #[test]
    fn src_param_round_trips() {
        let src = SrcParam {
            file: RegisterFile::Const,
            index: 42,
            swizzle: swizzle_replicate(2),
            modifier: SrcModifier::SignedScaleNegate,
            relative: true,
        };
        let decoded = decode_src(encode_src(&src)).unwrap().0;
        assert_eq!(decoded, src);
    }

    #[test]
    fn def_encodes_ieee_floats() {
        let mut asm = BytecodeAssembler::new();
        asm.set_version(VS_1_1);
        asm.add_def(3, 1.0, -0.5, 0.0, 2.5);
        let tokens = asm.finish();
        assert_eq!(tokens[0], VS_1_1);
        assert_eq!(tokens[1] >> 16 & 0xFF, 6);
        assert_eq!(f32::from_bits(tokens[3]), 1.0);
        assert_eq!(f32::from_bits(tokens[4]), -0.5);
        assert_eq!(f32::from_bits(tokens[6]), 2.5);
        assert_eq!(*tokens.last().unwrap(), END_TOKEN);
    }

    #[test]
    fn hash_distinguishes_streams() {
        let mut a = BytecodeAssembler::new();
        a.set_version(VS_1_1);
        a.add_instruction(
            Opcode::Mov,
            DestParam::new(RegisterFile::RastOut, 0),
            &[SrcParam::new(RegisterFile::Input, 0)],
        );
        let a = a.finish();

        let mut b = BytecodeAssembler::new();
        b.set_version(VS_1_1);
        b.add_instruction(
            Opcode::Mov,
            DestParam::new(RegisterFile::RastOut, 0),
            &[SrcParam::new(RegisterFile::Input, 1)],
        );
        let b = b.finish();

        assert_eq!(compute_bytecode_hash(&a), compute_bytecode_hash(&a));
        assert_ne!(compute_bytecode_hash(&a), compute_bytecode_hash(&b));
    }

    #[test]
    fn modifier_applies_to_next_instruction_only() {
        let mut asm = BytecodeAssembler::new();
        asm.set_version(PS_1_1);
        asm.set_instruction_modifier(ResultModifier::SATURATE, ResultShift::X2);
        asm.add_instruction(
            Opcode::Mul,
            DestParam::new(RegisterFile::Temp, 0),
            &[
                SrcParam::new(RegisterFile::Temp, 0),
                SrcParam::new(RegisterFile::Const, 0),
            ],
        );
        asm.add_instruction(
            Opcode::Mov,
            DestParam::new(RegisterFile::Temp, 1),
            &[SrcParam::new(RegisterFile::Temp, 0)],
        );
        let tokens = asm.finish();
        let first_dest = decode_dest(tokens[2]).unwrap().0;
        assert_eq!(first_dest.modifier, ResultModifier::SATURATE.bits());
        assert_eq!(first_dest.shift, ResultShift::X2);
        let second_dest = decode_dest(tokens[6]).unwrap().0;
        assert_eq!(second_dest.modifier, 0);
        assert_eq!(second_dest.shift, ResultShift::NONE);
    }
}
