//! Token stream decoder and pretty-printer.
//!
//! The walk is driven entirely by the per-instruction length field; no
//! opcode-specific knowledge is required to skip an instruction.

use std::fmt::Write;

use smallvec::SmallVec;

use crate::d3d8::Dword;
use crate::error::BytecodeError;

use super::bytecode::{
    decode_dest, decode_src, decode_usage, is_param_token, swizzle_component, DestParam,
    Instruction, Opcode, ParsedShader, RegisterFile, ResultModifier, ShaderKind, SrcModifier,
    SrcParam, END_TOKEN, SWIZZLE_NONE, WRITEMASK_ALL,
};

/// Decode a raw token stream into instructions.
pub fn decode(tokens: &[Dword]) -> Result<ParsedShader, BytecodeError> {
    let version = *tokens.first().ok_or(BytecodeError::Truncated(0))?;
    if ShaderKind::from_version(version).is_none() {
        return Err(BytecodeError::UnknownVersion(version));
    }

    let mut instructions = Vec::new();
    let mut i = 1usize;
    let mut saw_end = false;

    while i < tokens.len() {
        let token = tokens[i];
        if token == END_TOKEN {
            saw_end = true;
            break;
        }
        if !is_param_token(token) {
            return Err(BytecodeError::BadParameter(token));
        }
        let length = (token >> 16 & 0xFF) as usize;
        if length == 0 {
            return Err(BytecodeError::ZeroLength(i));
        }
        if i + length > tokens.len() {
            return Err(BytecodeError::Truncated(i));
        }
        let opcode_bits = (token & 0xFFFF) as u16;
        let coissue = token & 0x4000_0000 != 0;
        let params = &tokens[i + 1..i + length];

        match Opcode::from_u16(opcode_bits) {
            Some(Opcode::Def) => {
                if params.len() != 5 {
                    return Err(BytecodeError::Truncated(i));
                }
                let dest = decode_dest(params[0])
                    .ok_or(BytecodeError::BadParameter(params[0]))?
                    .0;
                instructions.push(Instruction::Def {
                    register: dest.index,
                    values: [
                        f32::from_bits(params[1]),
                        f32::from_bits(params[2]),
                        f32::from_bits(params[3]),
                        f32::from_bits(params[4]),
                    ],
                });
            }
            Some(Opcode::Dcl) => {
                if params.len() != 2 {
                    return Err(BytecodeError::Truncated(i));
                }
                let (usage, usage_index) =
                    decode_usage(params[0]).ok_or(BytecodeError::BadParameter(params[0]))?;
                let dest = decode_dest(params[1])
                    .ok_or(BytecodeError::BadParameter(params[1]))?
                    .0;
                instructions.push(Instruction::Dcl {
                    usage,
                    usage_index,
                    dest,
                });
            }
            Some(Opcode::Phase) => instructions.push(Instruction::Phase),
            Some(Opcode::Comment) => {
                let mut bytes = Vec::with_capacity(params.len() * 4);
                for p in params {
                    bytes.extend_from_slice(&p.to_le_bytes());
                }
                while bytes.last() == Some(&0) {
                    bytes.pop();
                }
                instructions.push(Instruction::Comment(
                    String::from_utf8_lossy(&bytes).into_owned(),
                ));
            }
            Some(Opcode::Nop) => instructions.push(Instruction::Op {
                opcode: Opcode::Nop,
                coissue,
                dest: DestParam::new(RegisterFile::Temp, 0),
                sources: SmallVec::new(),
            }),
            Some(opcode) => {
                if params.is_empty() {
                    return Err(BytecodeError::Truncated(i));
                }
                let dest = decode_dest(params[0])
                    .ok_or(BytecodeError::BadParameter(params[0]))?
                    .0;
                let mut sources = SmallVec::new();
                for p in &params[1..] {
                    sources.push(decode_src(*p).ok_or(BytecodeError::BadParameter(*p))?.0);
                }
                instructions.push(Instruction::Op {
                    opcode,
                    coissue,
                    dest,
                    sources,
                });
            }
            None => instructions.push(Instruction::Unknown {
                opcode: opcode_bits,
                params: params.to_vec(),
            }),
        }
        i += length;
    }

    if !saw_end {
        return Err(BytecodeError::MissingEndToken);
    }

    Ok(ParsedShader {
        version,
        instructions,
    })
}

/// Decode and pretty-print in one step.
pub fn disassemble_tokens(tokens: &[Dword]) -> Result<String, BytecodeError> {
    Ok(disassemble(&decode(tokens)?))
}

/// Render a parsed shader as D3D8 assembly text.
pub fn disassemble(shader: &ParsedShader) -> String {
    let kind = shader.kind();
    let mut out = String::new();
    match kind {
        ShaderKind::Vertex => out.push_str("vs.1.1\n"),
        ShaderKind::Pixel(minor) => {
            let _ = writeln!(out, "ps.1.{}", minor);
        }
    }

    for inst in &shader.instructions {
        match inst {
            Instruction::Def { register, values } => {
                let _ = writeln!(
                    out,
                    "def c{}, {:?}, {:?}, {:?}, {:?}",
                    register, values[0], values[1], values[2], values[3]
                );
            }
            Instruction::Dcl {
                usage,
                usage_index,
                dest,
            } => {
                let _ = write!(out, "dcl_{}", usage.name());
                if *usage_index > 0 {
                    let _ = write!(out, "{}", usage_index);
                }
                let _ = writeln!(out, " {}", dest_to_string(dest, kind, false));
            }
            Instruction::Phase => out.push_str("phase\n"),
            Instruction::Comment(text) => {
                let _ = writeln!(out, "; {}", text);
            }
            Instruction::Op {
                opcode,
                coissue,
                dest,
                sources,
            } => {
                if *opcode == Opcode::Nop {
                    out.push_str("nop\n");
                    continue;
                }
                if *coissue {
                    out.push('+');
                }
                out.push_str(opcode.mnemonic());
                out.push_str(dest.shift.suffix());
                let modifier = ResultModifier::from_bits_truncate(dest.modifier);
                if modifier.contains(ResultModifier::SATURATE) {
                    out.push_str("_sat");
                }
                if modifier.contains(ResultModifier::PARTIAL_PRECISION) {
                    out.push_str("_pp");
                }
                let _ = write!(out, " {}", dest_to_string(dest, kind, true));
                for src in sources {
                    let _ = write!(out, ", {}", src_to_string(src, kind));
                }
                out.push('\n');
            }
            Instruction::Unknown { opcode, params } => {
                let _ = writeln!(out, "; unknown opcode {:#06x} ({} params)", opcode, params.len());
            }
        }
    }
    out
}

pub(crate) fn register_name(file: RegisterFile, index: u32, kind: ShaderKind) -> String {
    match (file, kind) {
        (RegisterFile::Temp, _) => format!("r{}", index),
        (RegisterFile::Input, _) => format!("v{}", index),
        (RegisterFile::Const, _) => format!("c{}", index),
        (RegisterFile::AddrTexture, ShaderKind::Vertex) => "a0".to_string(),
        (RegisterFile::AddrTexture, ShaderKind::Pixel(_)) => format!("t{}", index),
        (RegisterFile::RastOut, _) => match index {
            0 => "oPos".to_string(),
            1 => "oFog".to_string(),
            _ => "oPts".to_string(),
        },
        (RegisterFile::AttrOut, _) => format!("oD{}", index),
        (RegisterFile::TexCoordOut, _) => format!("oT{}", index),
    }
}

fn write_mask_string(mask: u8) -> String {
    let mut s = String::new();
    if mask & 0x1 != 0 {
        s.push('x');
    }
    if mask & 0x2 != 0 {
        s.push('y');
    }
    if mask & 0x4 != 0 {
        s.push('z');
    }
    if mask & 0x8 != 0 {
        s.push('w');
    }
    s
}

/// Shortest swizzle text that re-expands (by replicating the last
/// component) to the stored 4-lane swizzle. Empty for the identity.
pub(crate) fn swizzle_string(swizzle: u8) -> String {
    if swizzle == SWIZZLE_NONE {
        return String::new();
    }
    const NAMES: [char; 4] = ['x', 'y', 'z', 'w'];
    let lanes: Vec<char> = (0..4)
        .map(|lane| NAMES[swizzle_component(swizzle, lane) as usize])
        .collect();
    for prefix_len in 1..=4 {
        let mut expanded = lanes[..prefix_len].to_vec();
        while expanded.len() < 4 {
            expanded.push(*expanded.last().unwrap());
        }
        if expanded == lanes {
            return lanes[..prefix_len].iter().collect();
        }
    }
    lanes.iter().collect()
}

fn dest_to_string(dest: &DestParam, kind: ShaderKind, with_mask: bool) -> String {
    let mut s = register_name(dest.file, dest.index, kind);
    if with_mask && dest.write_mask != WRITEMASK_ALL && dest.write_mask != 0 {
        s.push('.');
        s.push_str(&write_mask_string(dest.write_mask));
    }
    s
}

fn src_to_string(src: &SrcParam, kind: ShaderKind) -> String {
    let name = if src.relative {
        if src.index > 0 {
            format!("c[a0.x + {}]", src.index)
        } else {
            "c[a0.x]".to_string()
        }
    } else {
        register_name(src.file, src.index, kind)
    };

    let (prefix, suffix) = match src.modifier {
        SrcModifier::None => ("", ""),
        SrcModifier::Negate => ("-", ""),
        SrcModifier::Bias => ("", "_bias"),
        SrcModifier::BiasNegate => ("-", "_bias"),
        SrcModifier::SignedScale => ("", "_bx2"),
        SrcModifier::SignedScaleNegate => ("-", "_bx2"),
        SrcModifier::Complement => ("1-", ""),
        SrcModifier::X2 => ("", "_x2"),
        SrcModifier::X2Negate => ("-", "_x2"),
        SrcModifier::Dz => ("", "_dz"),
        SrcModifier::Dw => ("", "_dw"),
    };

    let swizzle = swizzle_string(src.swizzle);
    let mut s = String::new();
    s.push_str(prefix);
    s.push_str(&name);
    s.push_str(suffix);
    if !swizzle.is_empty() {
        s.push('.');
        s.push_str(&swizzle);
    }
    s
}

#[cfg(test)]
mod tests {
    use super::super::bytecode::*;
    use super::*;

    fn simple_vs() -> Vec<Dword> {
        let mut asm = BytecodeAssembler::new();
        asm.set_version(VS_1_1);
        asm.add_instruction(
            Opcode::Mov,
            DestParam::new(RegisterFile::RastOut, 0),
            &[SrcParam::new(RegisterFile::Input, 0)],
        );
        asm.add_instruction(
            Opcode::Mov,
            DestParam::new(RegisterFile::AttrOut, 0),
            &[SrcParam::new(RegisterFile::Const, 0)],
        );
        asm.finish()
    }

    #[test]
    fn decodes_simple_stream() {
        let shader = decode(&simple_vs()).unwrap();
        assert_eq!(shader.kind(), ShaderKind::Vertex);
        assert_eq!(shader.instructions.len(), 2);
    }

    #[test]
    fn disassembles_to_expected_text() {
        let text = disassemble_tokens(&simple_vs()).unwrap();
        assert_eq!(text, "vs.1.1\nmov oPos, v0\nmov oD0, c0\n");
    }

    #[test]
    fn swizzle_collapse() {
        assert_eq!(swizzle_string(SWIZZLE_NONE), "");
        assert_eq!(swizzle_string(swizzle_replicate(0)), "x");
        assert_eq!(swizzle_string(swizzle_replicate(3)), "w");
        // .xyz parses as xyzz and prints back as .xyz
        let xyzz = 0b1010_0100u8;
        assert_eq!(swizzle_string(xyzz), "xyz");
    }

    #[test]
    fn negation_and_masks_render() {
        let mut asm = BytecodeAssembler::new();
        asm.set_version(VS_1_1);
        asm.add_instruction(
            Opcode::Add,
            DestParam::masked(RegisterFile::Temp, 2, WRITEMASK_X | WRITEMASK_Y),
            &[
                SrcParam::new(RegisterFile::Temp, 0).negated(),
                SrcParam::swizzled(RegisterFile::Const, 4, swizzle_replicate(1)),
            ],
        );
        let text = disassemble_tokens(&asm.finish()).unwrap();
        assert_eq!(text, "vs.1.1\nadd r2.xy, -r0, c4.y\n");
    }

    #[test]
    fn def_and_dcl_render() {
        let mut asm = BytecodeAssembler::new();
        asm.set_version(VS_1_1);
        asm.add_dcl(DeclUsage::Position, 0, DestParam::new(RegisterFile::Input, 0));
        asm.add_dcl(DeclUsage::TexCoord, 1, DestParam::new(RegisterFile::Input, 4));
        asm.add_def(0, 1.0, 0.0, 1.0, 1.0);
        let text = disassemble_tokens(&asm.finish()).unwrap();
        assert_eq!(
            text,
            "vs.1.1\ndcl_position v0\ndcl_texcoord1 v4\ndef c0, 1.0, 0.0, 1.0, 1.0\n"
        );
    }

    #[test]
    fn truncated_stream_is_rejected() {
        let mut tokens = simple_vs();
        tokens.pop(); // end token
        assert_eq!(decode(&tokens), Err(BytecodeError::MissingEndToken));
        tokens.pop(); // half an instruction
        assert!(matches!(decode(&tokens), Err(BytecodeError::Truncated(_))));
    }

    #[test]
    fn unknown_version_is_rejected() {
        assert_eq!(
            decode(&[0xFFFE_0200, END_TOKEN]),
            Err(BytecodeError::UnknownVersion(0xFFFE_0200))
        );
    }

    #[test]
    fn zero_length_is_rejected() {
        let tokens = vec![VS_1_1, 0x8000_0001, END_TOKEN];
        assert_eq!(decode(&tokens), Err(BytecodeError::ZeroLength(1)));
    }

    #[test]
    fn unknown_opcodes_survive_decoding() {
        // length-driven walk: a made-up opcode with 2 params is kept
        let tokens = vec![
            PS_1_4,
            0x8003_0063, // opcode 0x63, length 3
            0x8000_0000,
            0x8000_0001,
            END_TOKEN,
        ];
        let shader = decode(&tokens).unwrap();
        assert!(matches!(
            shader.instructions[0],
            Instruction::Unknown { opcode: 0x63, .. }
        ));
    }

    #[test]
    fn result_shift_suffix_renders_on_mnemonic() {
        let mut asm = BytecodeAssembler::new();
        asm.set_version(PS_1_1);
        asm.set_instruction_modifier(ResultModifier::SATURATE, ResultShift::X4);
        asm.add_instruction(
            Opcode::Mul,
            DestParam::new(RegisterFile::Temp, 0),
            &[
                SrcParam::new(RegisterFile::Temp, 0),
                SrcParam::new(RegisterFile::AddrTexture, 0),
            ],
        );
        let text = disassemble_tokens(&asm.finish()).unwrap();
        assert_eq!(text, "ps.1.1\nmul_x4_sat r0, r0, t0\n");
    }
}
