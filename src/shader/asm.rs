//! Assembly-text front end.
//!
//! D3D8-era applications frequently carry shaders as assembly source and
//! assemble at startup; this module parses that text into the same
//! instruction records the bytecode decoder produces. `#define` lines
//! provide constant-register metadata (matrix blocks span four
//! registers), which the translator uses for `mat4` grouping.

use regex::Regex;
use smallvec::SmallVec;
use thiserror::Error;

use crate::d3d8::Dword;

use super::bytecode::{
    encode, DeclUsage, DestParam, Instruction, Opcode, ParsedShader, RegisterFile, ResultModifier,
    ResultShift, ShaderKind, SrcModifier, SrcParam, PS_1_1, SWIZZLE_NONE, VS_1_1, WRITEMASK_ALL,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AsmError {
    #[error("line {line}: missing shader version declaration")]
    MissingVersion { line: usize },
    #[error("line {line}: unknown opcode {mnemonic:?}")]
    UnknownOpcode { line: usize, mnemonic: String },
    #[error("line {line}: unknown register {register:?}")]
    UnknownRegister { line: usize, register: String },
    #[error("line {line}: malformed operands")]
    BadOperands { line: usize },
    #[error("line {line}: register not valid in this shader type: {register:?}")]
    WrongShaderType { line: usize, register: String },
}

/// A `#define CV_*` constant-register declaration. `count == 4` marks a
/// matrix block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConstantDecl {
    pub name: String,
    pub index: u32,
    pub count: u32,
}

#[derive(Clone, Debug)]
pub struct AsmShader {
    pub shader: ParsedShader,
    pub constants: Vec<ConstantDecl>,
}

impl AsmShader {
    pub fn to_bytecode(&self) -> Vec<Dword> {
        encode(&self.shader)
    }
}

/// Parse D3D8 shader assembly text.
pub fn parse_asm(source: &str) -> Result<AsmShader, AsmError> {
    let define_re = Regex::new(r"^#define\s+(\w+)\s+(\S+)").unwrap();
    let relative_re = Regex::new(r"^c\[\s*a0\.x\s*(?:\+\s*(\d+))?\s*\]$").unwrap();

    let mut version: Option<Dword> = None;
    let mut kind = ShaderKind::Vertex;
    let mut instructions = Vec::new();
    let mut constants: Vec<ConstantDecl> = Vec::new();
    let mut defines: Vec<(String, u32)> = Vec::new();

    for (line_index, raw_line) in source.lines().enumerate() {
        let line_no = line_index + 1;
        let mut line = raw_line.trim();
        if line.is_empty() {
            continue;
        }

        // full-line comments are preserved, trailing comments stripped
        if let Some(text) = line.strip_prefix(';') {
            if version.is_some() {
                instructions.push(Instruction::Comment(text.trim().to_string()));
            }
            continue;
        }
        if let Some(pos) = line.find(';') {
            line = line[..pos].trim_end();
        }
        if line.is_empty() {
            continue;
        }

        if line.starts_with('#') {
            if let Some(caps) = define_re.captures(line) {
                let name = caps[1].to_string();
                if let Ok(value) = caps[2].parse::<u32>() {
                    if name.starts_with("CV_") {
                        let count =
                            if name.contains("WORLDVIEWPROJ") || name.contains("TEXPROJ")
                                || name.contains("MATRIX")
                            {
                                4
                            } else {
                                1
                            };
                        constants.push(ConstantDecl {
                            name: name.clone(),
                            index: value,
                            count,
                        });
                    }
                    defines.push((name, value));
                }
            }
            continue;
        }

        // version declarations: vs.1.1 / ps.1.4 / vs_1_1
        let normalized = line.replace('_', ".");
        if let Some(rest) = normalized.strip_prefix("vs.") {
            version = Some(parse_version(rest, 0xFFFE_0000).unwrap_or(VS_1_1));
            kind = ShaderKind::Vertex;
            continue;
        }
        if let Some(rest) = normalized.strip_prefix("ps.") {
            let v = parse_version(rest, 0xFFFF_0000).unwrap_or(PS_1_1);
            version = Some(v);
            kind = ShaderKind::from_version(v).unwrap_or(ShaderKind::Pixel(1));
            continue;
        }

        let version_set = version.is_some();
        if !version_set {
            return Err(AsmError::MissingVersion { line: line_no });
        }

        parse_instruction_line(
            line,
            line_no,
            kind,
            &defines,
            &relative_re,
            &mut instructions,
        )?;
    }

    let version = version.ok_or(AsmError::MissingVersion { line: 0 })?;
    Ok(AsmShader {
        shader: ParsedShader {
            version,
            instructions,
        },
        constants,
    })
}

fn parse_version(rest: &str, base: Dword) -> Option<Dword> {
    let mut parts = rest.split('.');
    let major: u32 = parts.next()?.trim().parse().ok()?;
    let minor: u32 = parts.next()?.trim().parse().ok()?;
    Some(base | major << 8 | minor)
}

fn parse_instruction_line(
    line: &str,
    line_no: usize,
    kind: ShaderKind,
    defines: &[(String, u32)],
    relative_re: &Regex,
    instructions: &mut Vec<Instruction>,
) -> Result<(), AsmError> {
    let (mnemonic_text, operand_text) = match line.find(char::is_whitespace) {
        Some(pos) => (&line[..pos], line[pos..].trim()),
        None => (line, ""),
    };

    let mut mnemonic = mnemonic_text.to_ascii_lowercase();
    let coissue = mnemonic.starts_with('+');
    if coissue {
        mnemonic.remove(0);
    }

    // dcl_<usage><index>
    if let Some(usage_text) = mnemonic.strip_prefix("dcl_") {
        let (usage, usage_index) = parse_decl_usage(usage_text)
            .ok_or_else(|| AsmError::UnknownOpcode {
                line: line_no,
                mnemonic: mnemonic.clone(),
            })?;
        let dest = parse_register(operand_text, line_no, kind, defines, relative_re)?
            .into_dest(line_no)?;
        instructions.push(Instruction::Dcl {
            usage,
            usage_index,
            dest,
        });
        return Ok(());
    }

    match mnemonic.as_str() {
        "phase" => {
            instructions.push(Instruction::Phase);
            return Ok(());
        }
        "nop" => {
            instructions.push(Instruction::Op {
                opcode: Opcode::Nop,
                coissue: false,
                dest: DestParam::new(RegisterFile::Temp, 0),
                sources: SmallVec::new(),
            });
            return Ok(());
        }
        _ => {}
    }

    // instruction-level suffixes: shift then _sat/_pp, any order tolerated
    let mut shift = ResultShift::NONE;
    let mut modifier = ResultModifier::empty();
    loop {
        if let Some(s) = mnemonic.strip_suffix("_sat") {
            modifier |= ResultModifier::SATURATE;
            mnemonic = s.to_string();
        } else if let Some(s) = mnemonic.strip_suffix("_pp") {
            modifier |= ResultModifier::PARTIAL_PRECISION;
            mnemonic = s.to_string();
        } else if let Some(s) = strip_shift_suffix(&mnemonic, &mut shift) {
            mnemonic = s;
        } else {
            break;
        }
    }

    let opcode = match mnemonic.as_str() {
        "mov" => Opcode::Mov,
        "add" => Opcode::Add,
        "sub" => Opcode::Sub,
        "mad" => Opcode::Mad,
        "mul" => Opcode::Mul,
        "rcp" => Opcode::Rcp,
        "rsq" => Opcode::Rsq,
        "dp3" => Opcode::Dp3,
        "dp4" => Opcode::Dp4,
        "min" => Opcode::Min,
        "max" => Opcode::Max,
        "slt" => Opcode::Slt,
        "sge" => Opcode::Sge,
        "exp" => Opcode::Exp,
        "log" => Opcode::Log,
        "lit" => Opcode::Lit,
        "dst" => Opcode::Dst,
        "lrp" => Opcode::Lrp,
        "frc" => Opcode::Frc,
        "m4x4" => Opcode::M4x4,
        "m4x3" => Opcode::M4x3,
        "m3x4" => Opcode::M3x4,
        "m3x3" => Opcode::M3x3,
        "m3x2" => Opcode::M3x2,
        "expp" => Opcode::Expp,
        "logp" => Opcode::Logp,
        "sincos" => Opcode::SinCos,
        "mova" => Opcode::Mova,
        "def" => Opcode::Def,
        "tex" | "texld" => Opcode::Tex,
        "texkill" => Opcode::TexKill,
        "texbem" => Opcode::TexBem,
        "texbeml" => Opcode::TexBemL,
        "cnd" => Opcode::Cnd,
        "cmp" => Opcode::Cmp,
        "bem" => Opcode::Bem,
        _ => {
            return Err(AsmError::UnknownOpcode {
                line: line_no,
                mnemonic,
            })
        }
    };

    let operands: Vec<&str> = if operand_text.is_empty() {
        Vec::new()
    } else {
        operand_text.split(',').map(|t| t.trim()).collect()
    };

    if opcode == Opcode::Def {
        if operands.len() != 5 {
            return Err(AsmError::BadOperands { line: line_no });
        }
        let reg = parse_register(operands[0], line_no, kind, defines, relative_re)?;
        if reg.file != RegisterFile::Const {
            return Err(AsmError::UnknownRegister {
                line: line_no,
                register: operands[0].to_string(),
            });
        }
        let mut values = [0.0f32; 4];
        for (slot, text) in operands[1..].iter().enumerate() {
            values[slot] = text
                .parse::<f32>()
                .map_err(|_| AsmError::BadOperands { line: line_no })?;
        }
        instructions.push(Instruction::Def {
            register: reg.index,
            values,
        });
        return Ok(());
    }

    if operands.is_empty() {
        return Err(AsmError::BadOperands { line: line_no });
    }

    let mut dest = parse_register(operands[0], line_no, kind, defines, relative_re)?
        .into_dest(line_no)?;
    dest.modifier |= modifier.bits();
    dest.shift = shift;

    let mut sources: SmallVec<[SrcParam; 3]> = SmallVec::new();
    for operand in &operands[1..] {
        sources.push(
            parse_register(operand, line_no, kind, defines, relative_re)?.into_src(),
        );
    }

    instructions.push(Instruction::Op {
        opcode,
        coissue,
        dest,
        sources,
    });
    Ok(())
}

fn strip_shift_suffix(mnemonic: &str, shift: &mut ResultShift) -> Option<String> {
    for (suffix, value) in [
        ("_x2", ResultShift::X2),
        ("_x4", ResultShift::X4),
        ("_x8", ResultShift::X8),
        ("_d2", ResultShift::D2),
        ("_d4", ResultShift::D4),
        ("_d8", ResultShift::D8),
    ] {
        // only opcodes can carry shift suffixes, registers are parsed later
        if let Some(stripped) = mnemonic.strip_suffix(suffix) {
            if matches!(
                stripped,
                "mov" | "add" | "sub" | "mad" | "mul" | "lrp" | "cnd" | "cmp" | "dp3" | "dp4"
                    | "bem"
            ) {
                *shift = value;
                return Some(stripped.to_string());
            }
        }
    }
    None
}

fn parse_decl_usage(text: &str) -> Option<(DeclUsage, u8)> {
    let split = text.find(|c: char| c.is_ascii_digit());
    let (name, index) = match split {
        Some(pos) => (&text[..pos], text[pos..].parse::<u8>().ok()?),
        None => (text, 0),
    };
    let usage = match name {
        "position" => DeclUsage::Position,
        "blendweight" => DeclUsage::BlendWeight,
        "blendindices" => DeclUsage::BlendIndices,
        "normal" => DeclUsage::Normal,
        "psize" => DeclUsage::PointSize,
        "texcoord" => DeclUsage::TexCoord,
        "tangent" => DeclUsage::Tangent,
        "binormal" => DeclUsage::Binormal,
        "color" => DeclUsage::Color,
        _ => return None,
    };
    Some((usage, index))
}

struct ParsedRegister {
    file: RegisterFile,
    index: u32,
    swizzle: u8,
    write_mask: u8,
    modifier: SrcModifier,
    relative: bool,
}

impl ParsedRegister {
    fn into_dest(self, line_no: usize) -> Result<DestParam, AsmError> {
        if self.modifier != SrcModifier::None || self.relative {
            return Err(AsmError::BadOperands { line: line_no });
        }
        Ok(DestParam {
            file: self.file,
            index: self.index,
            write_mask: self.write_mask,
            modifier: 0,
            shift: ResultShift::NONE,
        })
    }

    fn into_src(self) -> SrcParam {
        SrcParam {
            file: self.file,
            index: self.index,
            swizzle: self.swizzle,
            modifier: self.modifier,
            relative: self.relative,
        }
    }
}

fn parse_register(
    token: &str,
    line_no: usize,
    kind: ShaderKind,
    defines: &[(String, u32)],
    relative_re: &Regex,
) -> Result<ParsedRegister, AsmError> {
    let mut text = token.trim().to_string();
    let mut negate = false;
    let mut complement = false;

    if let Some(rest) = text.strip_prefix("1-") {
        complement = true;
        text = rest.trim().to_string();
    } else if let Some(rest) = text.strip_prefix('-') {
        negate = true;
        text = rest.trim().to_string();
    }

    // split off swizzle / write mask
    let (mut base, suffix) = match text.find('.') {
        // a0.x inside c[...] is not a swizzle split
        Some(_) if text.starts_with("c[") => (text.clone(), String::new()),
        Some(pos) => (text[..pos].to_string(), text[pos + 1..].to_string()),
        None => (text.clone(), String::new()),
    };

    // source modifiers written as register suffixes
    let mut modifier = SrcModifier::None;
    for (mod_suffix, plain, negated) in [
        ("_bias", SrcModifier::Bias, SrcModifier::BiasNegate),
        ("_bx2", SrcModifier::SignedScale, SrcModifier::SignedScaleNegate),
        ("_x2", SrcModifier::X2, SrcModifier::X2Negate),
        ("_dz", SrcModifier::Dz, SrcModifier::Dz),
        ("_dw", SrcModifier::Dw, SrcModifier::Dw),
    ] {
        if let Some(stripped) = base.strip_suffix(mod_suffix) {
            modifier = if negate { negated } else { plain };
            base = stripped.to_string();
            break;
        }
    }
    if modifier == SrcModifier::None {
        if complement {
            modifier = SrcModifier::Complement;
        } else if negate {
            modifier = SrcModifier::Negate;
        }
    }

    // defines act as constant-register aliases
    for (name, value) in defines {
        if base == *name {
            base = format!("c{}", value);
            break;
        }
    }

    let unknown = || AsmError::UnknownRegister {
        line: line_no,
        register: token.to_string(),
    };

    let (file, index, relative) = if let Some(caps) = relative_re.captures(&base) {
        let offset = caps
            .get(1)
            .map(|m| m.as_str().parse::<u32>().unwrap_or(0))
            .unwrap_or(0);
        (RegisterFile::Const, offset, true)
    } else if base == "a0" {
        if kind.is_pixel() {
            return Err(AsmError::WrongShaderType {
                line: line_no,
                register: token.to_string(),
            });
        }
        (RegisterFile::AddrTexture, 0, false)
    } else if base == "oPos" {
        (RegisterFile::RastOut, 0, false)
    } else if base == "oFog" {
        (RegisterFile::RastOut, 1, false)
    } else if base == "oPts" {
        (RegisterFile::RastOut, 2, false)
    } else if let Some(rest) = base.strip_prefix("oD") {
        (
            RegisterFile::AttrOut,
            rest.parse().map_err(|_| unknown())?,
            false,
        )
    } else if let Some(rest) = base.strip_prefix("oT") {
        (
            RegisterFile::TexCoordOut,
            rest.parse().map_err(|_| unknown())?,
            false,
        )
    } else if let Some(rest) = base.strip_prefix('r') {
        (
            RegisterFile::Temp,
            rest.parse().map_err(|_| unknown())?,
            false,
        )
    } else if let Some(rest) = base.strip_prefix('v') {
        (
            RegisterFile::Input,
            rest.parse().map_err(|_| unknown())?,
            false,
        )
    } else if let Some(rest) = base.strip_prefix('c') {
        (
            RegisterFile::Const,
            rest.parse().map_err(|_| unknown())?,
            false,
        )
    } else if let Some(rest) = base.strip_prefix('t') {
        if !kind.is_pixel() {
            return Err(AsmError::WrongShaderType {
                line: line_no,
                register: token.to_string(),
            });
        }
        (
            RegisterFile::AddrTexture,
            rest.parse().map_err(|_| unknown())?,
            false,
        )
    } else {
        return Err(unknown());
    };

    let (swizzle, write_mask) = if suffix.is_empty() {
        (SWIZZLE_NONE, WRITEMASK_ALL)
    } else {
        (
            parse_swizzle(&suffix).ok_or_else(unknown)?,
            parse_write_mask(&suffix).unwrap_or(WRITEMASK_ALL),
        )
    };

    Ok(ParsedRegister {
        file,
        index,
        swizzle,
        write_mask,
        modifier,
        relative,
    })
}

fn component_index(c: char) -> Option<u8> {
    match c {
        'x' => Some(0),
        'y' => Some(1),
        'z' => Some(2),
        'w' => Some(3),
        _ => None,
    }
}

/// Swizzle text to the 4-lane encoding; short forms replicate the last
/// component (`.xyz` == `.xyzz`, `.x` == `.xxxx`).
fn parse_swizzle(text: &str) -> Option<u8> {
    if text.is_empty() || text.len() > 4 {
        return None;
    }
    let mut lanes = [0u8; 4];
    let chars: Vec<char> = text.chars().collect();
    for lane in 0..4 {
        let c = chars.get(lane).copied().unwrap_or(*chars.last().unwrap());
        lanes[lane] = component_index(c)?;
    }
    Some(lanes[0] | lanes[1] << 2 | lanes[2] << 4 | lanes[3] << 6)
}

fn parse_write_mask(text: &str) -> Option<u8> {
    let mut mask = 0u8;
    for c in text.chars() {
        mask |= 1 << component_index(c)?;
    }
    Some(mask)
}
