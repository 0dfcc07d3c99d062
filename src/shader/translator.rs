//! D3D8 shader bytecode to GLSL.
//!
//! The translator consumes decoded instruction records and emits a single
//! GLSL source string for the requested dialect. Translation failures are
//! never fatal: the error is recorded on the result and a stub shader
//! (constant magenta) is substituted so the application keeps running.

use std::collections::BTreeSet;
use std::fmt::Write;

use fxhash::FxHashMap;

use crate::d3d8::Dword;
use crate::error::{BytecodeError, TranslateError};

use super::asm::ConstantDecl;
use super::bytecode::{
    DeclUsage, DestParam, Instruction, Opcode, ParsedShader, RegisterFile, ResultModifier,
    ShaderKind, SrcModifier, SrcParam, WRITEMASK_ALL,
};
use super::disasm;

/// Target dialect for generated sources.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ShaderDialect {
    pub es_profile: bool,
    /// 300 (ES), 330 or 450 (core).
    pub version: u16,
}

impl Default for ShaderDialect {
    fn default() -> ShaderDialect {
        ShaderDialect {
            es_profile: false,
            version: 330,
        }
    }
}

impl ShaderDialect {
    pub const ES3: ShaderDialect = ShaderDialect {
        es_profile: true,
        version: 300,
    };

    pub fn header(&self) -> String {
        if self.es_profile {
            format!("#version {} es\nprecision highp float;\n\n", self.version)
        } else {
            format!("#version {} core\n\n", self.version)
        }
    }

    pub fn uses_legacy_frag_color(&self) -> bool {
        self.version < 300
    }
}

#[derive(Clone, Debug)]
pub struct TranslatedShader {
    pub kind: ShaderKind,
    pub source: String,
    pub errors: Vec<TranslateError>,
    pub is_stub: bool,
    /// `def` side table: constants to seed when the program is bound.
    pub defs: Vec<(u32, [f32; 4])>,
    /// Bitmask of sampler units referenced (pixel shaders).
    pub samplers_used: u8,
    /// Bitmask of `oT#` outputs written (vertex shaders).
    pub texcoord_outputs: u8,
}

/// Translate a raw token stream; malformed streams yield a recorded error
/// plus the stub shader for the version the caller expected.
pub fn translate_tokens(
    tokens: &[Dword],
    constants: &[ConstantDecl],
    dialect: &ShaderDialect,
    expect_pixel: bool,
) -> TranslatedShader {
    match disasm::decode(tokens) {
        Ok(parsed) => translate(&parsed, constants, dialect),
        Err(err) => {
            let kind = if expect_pixel {
                ShaderKind::Pixel(1)
            } else {
                ShaderKind::Vertex
            };
            warn!("shader bytecode rejected: {}", err);
            stub_shader(kind, dialect, vec![TranslateError::MalformedBytecode(err)])
        }
    }
}

/// Translate a decoded shader.
pub fn translate(
    shader: &ParsedShader,
    constants: &[ConstantDecl],
    dialect: &ShaderDialect,
) -> TranslatedShader {
    let mut ctx = Context::new(shader, constants, dialect);
    ctx.scan();
    let source = match shader.kind() {
        ShaderKind::Vertex => ctx.emit_vertex(),
        ShaderKind::Pixel(_) => ctx.emit_pixel(),
    };
    if ctx.errors.is_empty() {
        TranslatedShader {
            kind: shader.kind(),
            source,
            errors: Vec::new(),
            is_stub: false,
            defs: ctx.defs,
            samplers_used: ctx.samplers_used,
            texcoord_outputs: ctx.texcoord_outputs,
        }
    } else {
        for err in &ctx.errors {
            warn!("shader translation failed: {}", err);
        }
        stub_shader(shader.kind(), dialect, ctx.errors)
    }
}

/// The pass-through pixel shader linked when no pixel shader is bound.
pub fn default_pixel_shader_source(dialect: &ShaderDialect) -> String {
    let mut out = dialect.header();
    out.push_str("in vec4 v_color0;\n");
    if dialect.uses_legacy_frag_color() {
        out.push_str("\nvoid main() {\n    gl_FragColor = v_color0;\n}\n");
    } else {
        out.push_str("out vec4 FragColor;\n\nvoid main() {\n    FragColor = v_color0;\n}\n");
    }
    out
}

/// Constant error-colour shader pair member for failed translations.
pub fn stub_shader(
    kind: ShaderKind,
    dialect: &ShaderDialect,
    errors: Vec<TranslateError>,
) -> TranslatedShader {
    let mut source = dialect.header();
    match kind {
        ShaderKind::Vertex => {
            source.push_str("in vec4 a_position;\nout vec4 v_color0;\n\nvoid main() {\n");
            source.push_str("    gl_Position = a_position;\n");
            source.push_str("    v_color0 = vec4(1.0, 0.0, 1.0, 1.0);\n}\n");
        }
        ShaderKind::Pixel(_) => {
            if dialect.uses_legacy_frag_color() {
                source.push_str("void main() {\n    gl_FragColor = vec4(1.0, 0.0, 1.0, 1.0);\n}\n");
            } else {
                source.push_str(
                    "out vec4 FragColor;\n\nvoid main() {\n    FragColor = vec4(1.0, 0.0, 1.0, 1.0);\n}\n",
                );
            }
        }
    }
    TranslatedShader {
        kind,
        source,
        errors,
        is_stub: true,
        defs: Vec::new(),
        samplers_used: 0,
        texcoord_outputs: 0,
    }
}

// ---------------------------------------------------------------------------

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum InputRole {
    Position,
    Normal,
    Color0,
    Color1,
    TexCoord(u8),
    TangentS,
    TangentT,
    Binormal,
    BlendWeight,
    PointSize,
}

struct MatrixGroup {
    first: u32,
    last: u32,
}

struct Context<'a> {
    shader: &'a ParsedShader,
    dialect: ShaderDialect,
    kind: ShaderKind,
    errors: Vec<TranslateError>,
    defs: Vec<(u32, [f32; 4])>,
    matrix_groups: Vec<MatrixGroup>,
    input_roles: FxHashMap<u32, InputRole>,
    inputs_used: BTreeSet<u32>,
    consts_used: BTreeSet<u32>,
    temps_used: BTreeSet<u32>,
    textures_used: BTreeSet<u32>,
    samplers_used: u8,
    texcoord_outputs: u8,
    uses_relative: bool,
    uses_addr: bool,
    writes_opos: bool,
    writes_od0: bool,
    writes_od1: bool,
    reads_v1: bool,
    writes_fog_or_psize: bool,
    uses_bem: bool,
}

impl<'a> Context<'a> {
    fn new(
        shader: &'a ParsedShader,
        constants: &[ConstantDecl],
        dialect: &ShaderDialect,
    ) -> Context<'a> {
        Context {
            shader,
            dialect: *dialect,
            kind: shader.kind(),
            errors: Vec::new(),
            defs: Vec::new(),
            matrix_groups: constants
                .iter()
                .filter(|c| c.count == 4)
                .map(|c| MatrixGroup {
                    first: c.index,
                    last: c.index + 3,
                })
                .collect(),
            input_roles: FxHashMap::default(),
            inputs_used: BTreeSet::new(),
            consts_used: BTreeSet::new(),
            temps_used: BTreeSet::new(),
            textures_used: BTreeSet::new(),
            samplers_used: 0,
            texcoord_outputs: 0,
            uses_relative: false,
            uses_addr: false,
            writes_opos: false,
            writes_od0: false,
            writes_od1: false,
            reads_v1: false,
            writes_fog_or_psize: false,
            uses_bem: false,
        }
    }

    fn matrix_group_of(&self, index: u32) -> Option<&MatrixGroup> {
        self.matrix_groups
            .iter()
            .find(|g| index >= g.first && index <= g.last)
    }

    fn note_dest(&mut self, dest: &DestParam) {
        match dest.file {
            RegisterFile::Temp => {
                self.temps_used.insert(dest.index);
            }
            RegisterFile::AddrTexture => {
                if self.kind.is_pixel() {
                    self.textures_used.insert(dest.index);
                } else {
                    self.uses_addr = true;
                }
            }
            RegisterFile::RastOut => match dest.index {
                0 => self.writes_opos = true,
                _ => self.writes_fog_or_psize = true,
            },
            RegisterFile::AttrOut => match dest.index {
                0 => self.writes_od0 = true,
                1 => self.writes_od1 = true,
                _ => self.errors.push(TranslateError::InvalidRegister(format!(
                    "oD{}",
                    dest.index
                ))),
            },
            RegisterFile::TexCoordOut => {
                if dest.index < 8 {
                    self.texcoord_outputs |= 1 << dest.index;
                } else {
                    self.errors.push(TranslateError::InvalidRegister(format!(
                        "oT{}",
                        dest.index
                    )));
                }
            }
            RegisterFile::Input | RegisterFile::Const => {
                self.errors.push(TranslateError::InvalidRegister(format!(
                    "write to read-only register file {:?}",
                    dest.file
                )));
            }
        }
    }

    fn note_src(&mut self, src: &SrcParam, opcode: Option<Opcode>) {
        match src.file {
            RegisterFile::Temp => {
                self.temps_used.insert(src.index);
            }
            RegisterFile::Input => {
                self.inputs_used.insert(src.index);
                if self.kind.is_pixel() && src.index == 1 {
                    self.reads_v1 = true;
                }
            }
            RegisterFile::Const => {
                if src.relative {
                    if self.kind.is_pixel() {
                        self.errors.push(TranslateError::InvalidRegister(
                            "relative constant addressing in pixel shader".into(),
                        ));
                    }
                    self.uses_relative = true;
                    self.uses_addr = true;
                } else {
                    self.consts_used.insert(src.index);
                    // matrix ops consume consecutive constant registers
                    let extra = match opcode {
                        Some(Opcode::M4x4) | Some(Opcode::M3x4) => 4,
                        Some(Opcode::M4x3) | Some(Opcode::M3x3) => 3,
                        Some(Opcode::M3x2) => 2,
                        _ => 1,
                    };
                    for i in 1..extra {
                        self.consts_used.insert(src.index + i);
                    }
                }
            }
            RegisterFile::AddrTexture => {
                if self.kind.is_pixel() {
                    self.textures_used.insert(src.index);
                } else {
                    self.uses_addr = true;
                }
            }
            RegisterFile::RastOut | RegisterFile::AttrOut | RegisterFile::TexCoordOut => {
                self.errors.push(TranslateError::InvalidRegister(format!(
                    "read from output register file {:?}",
                    src.file
                )));
            }
        }
    }

    fn scan(&mut self) {
        for inst in &self.shader.instructions {
            match inst {
                Instruction::Def { register, values } => {
                    self.defs.push((*register, *values));
                    self.consts_used.insert(*register);
                }
                Instruction::Dcl {
                    usage,
                    usage_index,
                    dest,
                } => {
                    if dest.file == RegisterFile::Input {
                        let role = match (usage, usage_index) {
                            (DeclUsage::Position, _) => InputRole::Position,
                            (DeclUsage::Normal, _) => InputRole::Normal,
                            (DeclUsage::Color, 0) => InputRole::Color0,
                            (DeclUsage::Color, _) => InputRole::Color1,
                            (DeclUsage::TexCoord, n) => InputRole::TexCoord(*n),
                            (DeclUsage::Tangent, _) => InputRole::TangentS,
                            (DeclUsage::Binormal, _) => InputRole::Binormal,
                            (DeclUsage::BlendWeight, _) => InputRole::BlendWeight,
                            (DeclUsage::BlendIndices, _) => InputRole::BlendWeight,
                            (DeclUsage::PointSize, _) => InputRole::PointSize,
                        };
                        self.input_roles.insert(dest.index, role);
                    }
                }
                Instruction::Phase | Instruction::Comment(_) => {}
                Instruction::Op {
                    opcode,
                    dest,
                    sources,
                    ..
                } => {
                    self.check_version(*opcode, sources);
                    self.note_dest(dest);
                    for src in sources {
                        self.note_src(src, Some(*opcode));
                    }
                    if matches!(*opcode, Opcode::Tex | Opcode::TexBem | Opcode::TexBemL) {
                        let unit = self.sampler_unit(dest, sources);
                        if unit < 8 {
                            self.samplers_used |= 1 << unit;
                        }
                    }
                    if matches!(*opcode, Opcode::Bem | Opcode::TexBem | Opcode::TexBemL) {
                        self.uses_bem = true;
                    }
                }
                Instruction::Unknown { opcode, .. } => {
                    self.errors
                        .push(TranslateError::UnsupportedOpcode(*opcode as u32));
                }
            }
        }

        // default role assignment for undeclared inputs
        let used: Vec<u32> = self.inputs_used.iter().copied().collect();
        for index in used {
            if self.input_roles.contains_key(&index) {
                continue;
            }
            let role = if self.kind.is_pixel() {
                // pixel shader v0/v1 are the interpolated colors
                if index == 0 {
                    InputRole::Color0
                } else {
                    InputRole::Color1
                }
            } else {
                match index {
                    0 => InputRole::Position,
                    1 => InputRole::Normal,
                    2 => InputRole::Color0,
                    3 => InputRole::TexCoord(0),
                    4 => InputRole::TangentS,
                    5 => InputRole::TangentT,
                    6 => InputRole::Binormal,
                    n => InputRole::TexCoord((n - 3) as u8),
                }
            };
            self.input_roles.insert(index, role);
        }
    }

    fn check_version(&mut self, opcode: Opcode, sources: &[SrcParam]) {
        if let ShaderKind::Pixel(minor) = self.kind {
            if opcode == Opcode::Tex {
                let texld_form = !sources.is_empty();
                if minor <= 3 && texld_form {
                    self.errors.push(TranslateError::VersionMismatch {
                        version: self.shader.version,
                        what: "texld with an explicit source requires ps_1_4".into(),
                    });
                }
                if minor == 4 && !texld_form {
                    self.errors.push(TranslateError::VersionMismatch {
                        version: self.shader.version,
                        what: "ps_1_4 requires the texld form".into(),
                    });
                }
            }
        } else if matches!(opcode, Opcode::Tex | Opcode::TexKill | Opcode::Cnd | Opcode::Bem) {
            self.errors.push(TranslateError::VersionMismatch {
                version: self.shader.version,
                what: format!("{} is a pixel-shader instruction", opcode.mnemonic()),
            });
        }
    }

    fn sampler_unit(&self, dest: &DestParam, sources: &[SrcParam]) -> u32 {
        match self.kind {
            // ps_1_1..1_3: tex tN samples sampler N
            ShaderKind::Pixel(minor) if minor <= 3 => dest.index,
            // ps_1_4: texld rN, tM samples sampler M
            _ => sources.first().map(|s| s.index).unwrap_or(dest.index),
        }
    }

    // -- expression generation ----------------------------------------------

    fn input_expr(&self, index: u32) -> String {
        match self.input_roles.get(&index) {
            Some(InputRole::Position) => "a_position".to_string(),
            Some(InputRole::Normal) => "vec4(a_normal, 0.0)".to_string(),
            Some(InputRole::Color0) => {
                if self.kind.is_pixel() {
                    "v_color0".to_string()
                } else {
                    "a_color".to_string()
                }
            }
            Some(InputRole::Color1) => {
                if self.kind.is_pixel() {
                    "v_color1".to_string()
                } else {
                    "a_specular".to_string()
                }
            }
            Some(InputRole::TexCoord(n)) => format!("vec4(a_texcoord{}, 0.0, 1.0)", n),
            Some(InputRole::TangentS) => "vec4(a_tangent_s, 0.0)".to_string(),
            Some(InputRole::TangentT) => "vec4(a_tangent_t, 0.0)".to_string(),
            Some(InputRole::Binormal) => "vec4(a_binormal, 0.0)".to_string(),
            Some(InputRole::BlendWeight) => "a_blend_weights".to_string(),
            Some(InputRole::PointSize) => "vec4(a_psize)".to_string(),
            None => format!("v{}", index),
        }
    }

    fn const_expr(&self, src: &SrcParam) -> String {
        if src.relative {
            if src.index > 0 {
                format!("c[int(a0.x) + {}]", src.index)
            } else {
                "c[int(a0.x)]".to_string()
            }
        } else if self.uses_relative && !self.kind.is_pixel() {
            format!("c[{}]", src.index)
        } else if let Some(group) = self.matrix_group_of(src.index) {
            format!(
                "c{}_{}[{}]",
                group.first,
                group.last,
                src.index - group.first
            )
        } else if self.kind.is_pixel() {
            format!("ps_c{}", src.index)
        } else {
            format!("c{}", src.index)
        }
    }

    fn register_expr(&self, src: &SrcParam) -> String {
        let base = match src.file {
            RegisterFile::Temp => format!("r{}", src.index),
            RegisterFile::Input => self.input_expr(src.index),
            RegisterFile::Const => self.const_expr(src),
            RegisterFile::AddrTexture => {
                if self.kind.is_pixel() {
                    format!("t{}", src.index)
                } else {
                    "vec4(a0)".to_string()
                }
            }
            RegisterFile::RastOut => "gl_Position".to_string(),
            RegisterFile::AttrOut => format!("v_color{}", src.index),
            RegisterFile::TexCoordOut => format!("v_texcoord{}", src.index),
        };

        let swizzled = {
            let sw = disasm::swizzle_string(src.swizzle);
            if sw.is_empty() {
                base
            } else {
                format!("{}.{}", base, sw)
            }
        };

        apply_src_modifier(&swizzled, src.modifier)
    }

    fn dest_expr(&self, dest: &DestParam) -> String {
        match dest.file {
            RegisterFile::Temp => format!("r{}", dest.index),
            RegisterFile::AddrTexture => {
                if self.kind.is_pixel() {
                    format!("t{}", dest.index)
                } else {
                    "a0".to_string()
                }
            }
            RegisterFile::RastOut => match dest.index {
                0 => "gl_Position".to_string(),
                _ => "o_fog_psize".to_string(),
            },
            RegisterFile::AttrOut => format!("v_color{}", dest.index),
            RegisterFile::TexCoordOut => format!("v_texcoord{}", dest.index),
            RegisterFile::Input | RegisterFile::Const => "/* invalid */ r0".to_string(),
        }
    }

    /// `dest = rhs;` honouring the write mask, result shift and saturate.
    fn assign(&self, dest: &DestParam, rhs: &str) -> String {
        let mut rhs = rhs.to_string();
        if let Some(factor) = dest.shift.factor() {
            rhs = format!("({} * {:?})", rhs, factor);
        }
        if ResultModifier::from_bits_truncate(dest.modifier).contains(ResultModifier::SATURATE) {
            rhs = format!("clamp({}, 0.0, 1.0)", rhs);
        }
        let target = self.dest_expr(dest);
        let is_addr = !self.kind.is_pixel() && dest.file == RegisterFile::AddrTexture;
        if dest.write_mask == WRITEMASK_ALL || dest.write_mask == 0 {
            if is_addr {
                format!("{} = ivec4(vec4({}));", target, rhs)
            } else {
                format!("{} = vec4({});", target, rhs)
            }
        } else {
            let mask = mask_string(dest.write_mask);
            if is_addr {
                format!("{t}.{m} = ivec4(vec4({r})).{m};", t = target, m = mask, r = rhs)
            } else {
                format!("{t}.{m} = vec4({r}).{m};", t = target, m = mask, r = rhs)
            }
        }
    }

    fn instruction_stmt(&mut self, opcode: Opcode, dest: &DestParam, sources: &[SrcParam]) -> String {
        let src = |i: usize| -> String {
            sources
                .get(i)
                .map(|s| self.register_expr(s))
                .unwrap_or_else(|| "vec4(0.0)".to_string())
        };

        match opcode {
            Opcode::Nop => "// nop".to_string(),
            Opcode::Mov | Opcode::Mova => self.assign(dest, &src(0)),
            Opcode::Add => self.assign(dest, &format!("{} + {}", src(0), src(1))),
            Opcode::Sub => self.assign(dest, &format!("{} - {}", src(0), src(1))),
            Opcode::Mul => self.assign(dest, &format!("{} * {}", src(0), src(1))),
            Opcode::Mad => self.assign(dest, &format!("{} * {} + {}", src(0), src(1), src(2))),
            Opcode::Rcp => self.assign(dest, &format!("vec4(1.0) / vec4({})", src(0))),
            Opcode::Rsq => self.assign(dest, &format!("inversesqrt(vec4({}))", src(0))),
            Opcode::Dp3 => self.assign(
                dest,
                &format!("vec4(dot(vec4({}).xyz, vec4({}).xyz))", src(0), src(1)),
            ),
            Opcode::Dp4 => self.assign(
                dest,
                &format!("vec4(dot(vec4({}), vec4({})))", src(0), src(1)),
            ),
            Opcode::Min => self.assign(dest, &format!("min(vec4({}), vec4({}))", src(0), src(1))),
            Opcode::Max => self.assign(dest, &format!("max(vec4({}), vec4({}))", src(0), src(1))),
            Opcode::Slt => self.assign(
                dest,
                &format!("vec4(lessThan(vec4({}), vec4({})))", src(0), src(1)),
            ),
            Opcode::Sge => self.assign(
                dest,
                &format!("vec4(greaterThanEqual(vec4({}), vec4({})))", src(0), src(1)),
            ),
            Opcode::Exp | Opcode::Expp => self.assign(dest, &format!("exp2(vec4({}))", src(0))),
            Opcode::Log | Opcode::Logp => self.assign(dest, &format!("log2(vec4({}))", src(0))),
            Opcode::Frc => self.assign(dest, &format!("fract(vec4({}))", src(0))),
            Opcode::Lit => {
                let a = src(0);
                self.assign(
                    dest,
                    &format!(
                        "vec4(1.0, max(0.0, vec4({a}).x), (vec4({a}).x > 0.0) ? pow(max(0.0, vec4({a}).y), vec4({a}).w) : 0.0, 1.0)",
                        a = a
                    ),
                )
            }
            Opcode::Dst => {
                let (a, b) = (src(0), src(1));
                self.assign(
                    dest,
                    &format!(
                        "vec4(1.0, vec4({a}).y * vec4({b}).y, vec4({a}).z, vec4({b}).w)",
                        a = a,
                        b = b
                    ),
                )
            }
            Opcode::Lrp => self.assign(dest, &format!("mix({}, {}, {})", src(2), src(1), src(0))),
            Opcode::SinCos => {
                let target = self.dest_expr(dest);
                let a = src(0);
                format!(
                    "{t}.x = cos(vec4({a}).x); {t}.y = sin(vec4({a}).x);",
                    t = target,
                    a = a
                )
            }
            Opcode::M4x4 | Opcode::M4x3 | Opcode::M3x4 | Opcode::M3x3 | Opcode::M3x2 => {
                self.matrix_stmt(opcode, dest, sources)
            }
            Opcode::Cmp => self.assign(
                dest,
                &format!(
                    "mix({}, {}, vec4(greaterThanEqual(vec4({}), vec4(0.0))))",
                    src(2),
                    src(1),
                    src(0)
                ),
            ),
            Opcode::Cnd => self.assign(
                dest,
                &format!(
                    "mix({}, {}, vec4(greaterThan(vec4({}), vec4(0.5))))",
                    src(2),
                    src(1),
                    src(0)
                ),
            ),
            Opcode::TexKill => {
                // the coordinate is the register named as destination
                let coord = self.dest_expr(dest);
                format!("if (any(lessThan({}.xyz, vec3(0.0)))) discard;", coord)
            }
            Opcode::Tex => self.tex_stmt(dest, sources),
            Opcode::TexBem | Opcode::TexBemL => {
                let stage = dest.index;
                let perturb = src(0);
                format!(
                    "t{s} = texture(s{s}, v_texcoord{s}.xy + u_bumpEnvMat[{s}] * vec4({p}).xy);",
                    s = stage,
                    p = perturb
                )
            }
            Opcode::Bem => {
                let stage = dest.index;
                let target = self.dest_expr(dest);
                format!(
                    "{t}.xy = vec4({a}).xy + u_bumpEnvMat[{s}] * vec4({b}).xy;",
                    t = target,
                    a = src(0),
                    b = src(1),
                    s = stage
                )
            }
            Opcode::Dcl | Opcode::Def | Opcode::Phase | Opcode::Comment => String::new(),
            other => {
                self.errors
                    .push(TranslateError::UnsupportedOpcode(other as u32));
                format!("// unsupported: {}", other.mnemonic())
            }
        }
    }

    fn matrix_stmt(&mut self, opcode: Opcode, dest: &DestParam, sources: &[SrcParam]) -> String {
        let vec = sources
            .first()
            .map(|s| self.register_expr(s))
            .unwrap_or_else(|| "vec4(0.0)".to_string());
        let base = match sources.get(1) {
            Some(s) if s.file == RegisterFile::Const && !s.relative => s.index,
            _ => {
                self.errors.push(TranslateError::InvalidRegister(
                    "matrix instruction requires a constant-register matrix".into(),
                ));
                return "// invalid matrix operand".to_string();
            }
        };

        // a full 4x4 against a declared matrix block becomes one multiply
        if opcode == Opcode::M4x4 {
            if let Some(group) = self.matrix_group_of(base) {
                if group.first == base {
                    return self.assign(
                        dest,
                        &format!("vec4({}) * c{}_{}", vec, group.first, group.last),
                    );
                }
            }
        }

        let const_name = |index: u32| -> String {
            self.const_expr(&SrcParam::new(RegisterFile::Const, index))
        };

        let (rows, three_component_src) = match opcode {
            Opcode::M4x4 => (4, false),
            Opcode::M4x3 => (3, false),
            Opcode::M3x4 => (4, true),
            Opcode::M3x3 => (3, true),
            Opcode::M3x2 => (2, true),
            _ => unreachable!(),
        };

        let mut dots = Vec::with_capacity(rows);
        for i in 0..rows {
            if three_component_src {
                dots.push(format!(
                    "dot(vec4({v}).xyz, {c}.xyz)",
                    v = vec,
                    c = const_name(base + i as u32)
                ));
            } else {
                dots.push(format!(
                    "dot(vec4({v}), {c})",
                    v = vec,
                    c = const_name(base + i as u32)
                ));
            }
        }

        let target = self.dest_expr(dest);
        match rows {
            4 => self.assign(dest, &format!("vec4({})", dots.join(", "))),
            3 => format!("{}.xyz = vec3({});", target, dots.join(", ")),
            _ => format!("{}.xy = vec2({});", target, dots.join(", ")),
        }
    }

    fn tex_stmt(&mut self, dest: &DestParam, sources: &[SrcParam]) -> String {
        match self.kind {
            ShaderKind::Pixel(minor) if minor <= 3 => {
                // tex tN: sample sampler N with interpolated coordinate N
                let unit = dest.index;
                format!("t{u} = texture(s{u}, t{u}.xy);", u = unit)
            }
            _ => {
                // texld rN, tM (or rM): sampler index tracks the source register
                let unit = sources.first().map(|s| s.index).unwrap_or(dest.index);
                let coord = sources
                    .first()
                    .map(|s| self.register_expr(s))
                    .unwrap_or_else(|| "vec4(0.0)".to_string());
                let target = self.dest_expr(dest);
                format!("{} = texture(s{}, vec4({}).xy);", target, unit, coord)
            }
        }
    }

    // -- whole-shader emission ----------------------------------------------

    fn emit_vertex(&mut self) -> String {
        let mut out = self.dialect.header();

        // attributes, in slot order
        let mut roles: Vec<(u32, InputRole)> = self
            .inputs_used
            .iter()
            .filter_map(|i| self.input_roles.get(i).map(|r| (*i, *r)))
            .collect();
        roles.sort_by_key(|(i, _)| *i);
        for (_, role) in &roles {
            let decl = match role {
                InputRole::Position => "in vec4 a_position;",
                InputRole::Normal => "in vec3 a_normal;",
                InputRole::Color0 => "in vec4 a_color;",
                InputRole::Color1 => "in vec4 a_specular;",
                InputRole::TexCoord(n) => {
                    let _ = writeln!(out, "in vec2 a_texcoord{};", n);
                    continue;
                }
                InputRole::TangentS => "in vec3 a_tangent_s;",
                InputRole::TangentT => "in vec3 a_tangent_t;",
                InputRole::Binormal => "in vec3 a_binormal;",
                InputRole::BlendWeight => "in vec4 a_blend_weights;",
                InputRole::PointSize => "in float a_psize;",
            };
            let _ = writeln!(out, "{}", decl);
        }
        out.push('\n');

        // constants
        if self.uses_relative {
            out.push_str("uniform vec4 c[96];\n");
        } else {
            for index in &self.consts_used {
                if let Some(group) = self.matrix_group_of(*index) {
                    if group.first == *index {
                        let _ = writeln!(out, "uniform mat4 c{}_{};", group.first, group.last);
                    }
                    continue;
                }
                let _ = writeln!(out, "uniform vec4 c{};", index);
            }
        }
        out.push('\n');

        // varyings
        out.push_str("out vec4 v_color0;\n");
        if self.writes_od1 {
            out.push_str("out vec4 v_color1;\n");
        }
        for n in 0..8 {
            if self.texcoord_outputs & 1 << n != 0 {
                let _ = writeln!(out, "out vec4 v_texcoord{};", n);
            }
        }
        out.push('\n');

        out.push_str("void main() {\n");
        if self.uses_addr {
            out.push_str("    ivec4 a0 = ivec4(0);\n");
        }
        for temp in &self.temps_used {
            let _ = writeln!(out, "    vec4 r{};", temp);
        }
        if self.writes_fog_or_psize {
            out.push_str("    vec4 o_fog_psize;\n");
        }
        if self.uses_addr || !self.temps_used.is_empty() {
            out.push('\n');
        }

        self.emit_body(&mut out);

        if !self.writes_opos {
            out.push_str("    gl_Position = vec4(0.0);\n");
        }
        if !self.writes_od0 {
            out.push_str("    v_color0 = vec4(1.0);\n");
        }
        out.push_str("}\n");
        out
    }

    fn emit_pixel(&mut self) -> String {
        let mut out = self.dialect.header();

        // constants
        for index in &self.consts_used {
            let _ = writeln!(out, "uniform vec4 ps_c{};", index);
        }
        if !self.consts_used.is_empty() {
            out.push('\n');
        }

        // samplers
        for unit in 0..8 {
            if self.samplers_used & 1 << unit != 0 {
                let _ = writeln!(out, "uniform sampler2D s{};", unit);
            }
        }
        if self.uses_bem {
            out.push_str("uniform mat2 u_bumpEnvMat[8];\n");
        }
        out.push('\n');

        // varyings
        out.push_str("in vec4 v_color0;\n");
        if self.reads_v1 {
            out.push_str("in vec4 v_color1;\n");
        }
        for t in &self.textures_used {
            let _ = writeln!(out, "in vec4 v_texcoord{};", t);
        }
        if !self.dialect.uses_legacy_frag_color() {
            out.push_str("out vec4 FragColor;\n");
        }
        out.push('\n');

        out.push_str("void main() {\n");
        for temp in &self.temps_used {
            let _ = writeln!(out, "    vec4 r{};", temp);
        }
        for t in &self.textures_used {
            let _ = writeln!(out, "    vec4 t{t} = v_texcoord{t};", t = t);
        }
        if !self.temps_used.is_empty() || !self.textures_used.is_empty() {
            out.push('\n');
        }

        self.emit_body(&mut out);

        let output = if self.dialect.uses_legacy_frag_color() {
            "gl_FragColor"
        } else {
            "FragColor"
        };
        if self.temps_used.contains(&0) {
            let _ = writeln!(out, "    {} = r0;", output);
        } else {
            let _ = writeln!(out, "    {} = vec4(1.0);", output);
        }
        out.push_str("}\n");
        out
    }

    fn emit_body(&mut self, out: &mut String) {
        let instructions = self.shader.instructions.clone();
        for inst in &instructions {
            match inst {
                Instruction::Def { .. } | Instruction::Dcl { .. } => {}
                Instruction::Phase => out.push_str("    // ---- phase ----\n"),
                Instruction::Comment(text) => {
                    let _ = writeln!(out, "    // {}", text);
                }
                Instruction::Op {
                    opcode,
                    dest,
                    sources,
                    ..
                } => {
                    let stmt = self.instruction_stmt(*opcode, dest, sources);
                    if !stmt.is_empty() {
                        let _ = writeln!(out, "    {}", stmt);
                    }
                }
                Instruction::Unknown { opcode, .. } => {
                    let _ = writeln!(out, "    // unknown opcode {:#06x}", opcode);
                }
            }
        }
    }
}

fn mask_string(mask: u8) -> String {
    let mut s = String::new();
    for (bit, c) in [(0x1, 'x'), (0x2, 'y'), (0x4, 'z'), (0x8, 'w')] {
        if mask & bit != 0 {
            s.push(c);
        }
    }
    s
}

fn apply_src_modifier(expr: &str, modifier: SrcModifier) -> String {
    match modifier {
        SrcModifier::None => expr.to_string(),
        SrcModifier::Negate => format!("(-{})", expr),
        SrcModifier::Bias => format!("({} - 0.5)", expr),
        SrcModifier::BiasNegate => format!("(-({} - 0.5))", expr),
        SrcModifier::SignedScale => format!("(({} - 0.5) * 2.0)", expr),
        SrcModifier::SignedScaleNegate => format!("(-(({} - 0.5) * 2.0))", expr),
        SrcModifier::Complement => format!("(1.0 - {})", expr),
        SrcModifier::X2 => format!("({} * 2.0)", expr),
        SrcModifier::X2Negate => format!("(-({} * 2.0))", expr),
        SrcModifier::Dz => format!("({e} / vec4({e}).z)", e = expr),
        SrcModifier::Dw => format!("({e} / vec4({e}).w)", e = expr),
    }
}

#[cfg(test)]
mod tests {
    use super::super::asm::parse_asm;
    use super::*;

    fn translate_source(source: &str) -> TranslatedShader {
        let parsed = parse_asm(source).expect("asm parses");
        translate(&parsed.shader, &parsed.constants, &ShaderDialect::default())
    }

    #[test]
    fn minimal_vertex_shader() {
        let t = translate_source("vs.1.1\nmov oPos, v0\nmov oD0, c0\n");
        assert!(!t.is_stub, "errors: {:?}", t.errors);
        assert!(t.source.contains("#version 330 core"));
        assert!(t.source.contains("in vec4 a_position;"));
        assert!(t.source.contains("uniform vec4 c0;"));
        assert!(t.source.contains("out vec4 v_color0;"));
        assert!(t.source.contains("gl_Position = vec4(a_position);"));
        assert!(t.source.contains("v_color0 = vec4(c0);"));
        // defaults not re-applied when outputs are written
        assert!(!t.source.contains("gl_Position = vec4(0.0);"));
        assert!(!t.source.contains("v_color0 = vec4(1.0);"));
    }

    #[test]
    fn missing_outputs_get_defaults() {
        let t = translate_source("vs.1.1\nmov r0, v0\n");
        assert!(t.source.contains("gl_Position = vec4(0.0);"));
        assert!(t.source.contains("v_color0 = vec4(1.0);"));
    }

    #[test]
    fn relative_addressing_declares_full_array() {
        let t = translate_source("vs.1.1\nmov a0.x, c0.x\nmov oPos, c[a0.x + 4]\nmov r0, c7\n");
        assert!(t.source.contains("uniform vec4 c[96];"));
        assert!(t.source.contains("ivec4 a0 = ivec4(0);"));
        assert!(t.source.contains("c[int(a0.x) + 4]"));
        // non-relative references go through the array as well
        assert!(t.source.contains("c[7]"));
        assert!(!t.source.contains("uniform vec4 c7;"));
    }

    #[test]
    fn matrix_define_becomes_mat4() {
        let src = "#define CV_WORLDVIEWPROJ_0 2\nvs.1.1\nm4x4 oPos, v0, CV_WORLDVIEWPROJ_0\nmov oD0, v2\n";
        let t = translate_source(src);
        assert!(!t.is_stub, "errors: {:?}", t.errors);
        assert!(t.source.contains("uniform mat4 c2_5;"));
        assert!(t.source.contains("* c2_5"));
        assert!(!t.source.contains("uniform vec4 c2;"));
    }

    #[test]
    fn m4x4_without_metadata_uses_dot_products() {
        let t = translate_source("vs.1.1\nm4x4 oPos, v0, c4\n");
        assert!(t.source.contains("dot(vec4(a_position), c4)"));
        assert!(t.source.contains("uniform vec4 c7;"));
    }

    #[test]
    fn def_constants_feed_side_table() {
        let t = translate_source("vs.1.1\ndef c5, 1.0, 2.0, 3.0, 4.0\nmov oPos, v0\nmov oD0, c5\n");
        assert_eq!(t.defs, vec![(5, [1.0, 2.0, 3.0, 4.0])]);
        assert!(t.source.contains("uniform vec4 c5;"));
    }

    #[test]
    fn ps11_tex_samples_matching_unit() {
        let t = translate_source("ps.1.1\ntex t0\nmul r0, t0, v0\n");
        assert!(!t.is_stub, "errors: {:?}", t.errors);
        assert_eq!(t.samplers_used, 0b1);
        assert!(t.source.contains("uniform sampler2D s0;"));
        assert!(t.source.contains("t0 = texture(s0, t0.xy);"));
        assert!(!t.source.contains("uniform vec4"));
        assert!(t.source.contains("in vec4 v_texcoord0;"));
        assert!(t.source.contains("FragColor = r0;"));
    }

    #[test]
    fn ps14_texld_uses_source_register_unit() {
        let t = translate_source("ps.1.4\ntexld r0, t1\nphase\nmov r0, r0\n");
        assert!(!t.is_stub, "errors: {:?}", t.errors);
        assert_eq!(t.samplers_used, 0b10);
        assert!(t.source.contains("r0 = texture(s1, vec4(t1).xy);"));
        assert!(t.source.contains("// ---- phase ----"));
    }

    #[test]
    fn ps11_with_ps14_syntax_is_a_version_mismatch() {
        let t = translate_source("ps.1.1\ntexld r0, r1\n");
        assert!(t.is_stub);
        assert!(t
            .errors
            .iter()
            .any(|e| matches!(e, TranslateError::VersionMismatch { .. })));
        // stub renders the error color
        assert!(t.source.contains("vec4(1.0, 0.0, 1.0, 1.0)"));
    }

    #[test]
    fn pixel_constants_get_ps_prefix() {
        let t = translate_source("ps.1.1\nmov r0, c3\n");
        assert!(t.source.contains("uniform vec4 ps_c3;"));
        assert!(t.source.contains("r0 = vec4(ps_c3);"));
    }

    #[test]
    fn texkill_discards() {
        let t = translate_source("ps.1.1\ntexkill t0\nmov r0, v0\n");
        assert!(t
            .source
            .contains("if (any(lessThan(t0.xyz, vec3(0.0)))) discard;"));
    }

    #[test]
    fn source_modifiers_wrap_expressions() {
        let t = translate_source("ps.1.1\nmad r0, 1-v0, r0_bias, -r1_bx2\n");
        assert!(t.source.contains("(1.0 - v_color0)"));
        assert!(t.source.contains("(r0 - 0.5)"));
        assert!(t.source.contains("(-((r1 - 0.5) * 2.0))"));
    }

    #[test]
    fn saturate_and_shift_wrap_rhs() {
        let t = translate_source("ps.1.1\nmul_x2_sat r0, v0, c0\n");
        assert!(t
            .source
            .contains("r0 = vec4(clamp((v_color0 * ps_c0 * 2.0), 0.0, 1.0));"));
    }

    #[test]
    fn sincos_expansion() {
        let t = translate_source("vs.1.1\nsincos r4.xy, r3.x\nmov oPos, v0\n");
        assert!(t.source.contains("r4.x = cos(vec4(r3.x).x); r4.y = sin(vec4(r3.x).x);"));
    }

    #[test]
    fn unknown_opcode_yields_stub_with_error() {
        use super::super::bytecode::*;
        let tokens = vec![
            VS_1_1,
            0x8002_0040, // opcode 64, not in the D3D8 set
            0x8000_0000,
            END_TOKEN,
        ];
        let t = translate_tokens(&tokens, &[], &ShaderDialect::default(), false);
        assert!(t.is_stub);
        assert!(matches!(t.errors[0], TranslateError::UnsupportedOpcode(0x40)));
    }

    #[test]
    fn malformed_bytecode_yields_stub() {
        let t = translate_tokens(&[0xDEAD_BEEF], &[], &ShaderDialect::default(), true);
        assert!(t.is_stub);
        assert!(matches!(
            t.errors[0],
            TranslateError::MalformedBytecode(BytecodeError::UnknownVersion(_))
        ));
    }

    #[test]
    fn es_dialect_adds_precision() {
        let parsed = parse_asm("ps.1.1\nmov r0, v0\n").unwrap();
        let t = translate(&parsed.shader, &[], &ShaderDialect::ES3);
        assert!(t.source.starts_with("#version 300 es\nprecision highp float;"));
        assert!(t.source.contains("out vec4 FragColor;"));
    }

    #[test]
    fn default_pixel_shader_passes_color_through() {
        let src = default_pixel_shader_source(&ShaderDialect::default());
        assert!(src.contains("FragColor = v_color0;"));
    }

    #[test]
    fn dcl_overrides_default_input_roles() {
        let t = translate_source("vs.1.1\ndcl_texcoord2 v2\nmov oT2, v2\nmov oPos, v0\n");
        assert!(t.source.contains("in vec2 a_texcoord2;"));
        assert!(!t.source.contains("in vec4 a_color;"));
        assert!(t.source.contains("out vec4 v_texcoord2;"));
        assert_eq!(t.texcoord_outputs, 0b100);
    }

    #[test]
    fn tangent_frame_attributes_appear_when_referenced() {
        let t = translate_source("vs.1.1\ndp3 r0.x, v4, v5\nmov oPos, v0\nmov oD0, r0\n");
        assert!(t.source.contains("in vec3 a_tangent_s;"));
        assert!(t.source.contains("in vec3 a_tangent_t;"));
    }
}
