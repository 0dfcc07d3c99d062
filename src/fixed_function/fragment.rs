//! Fixed-function fragment shader synthesis.
//!
//! Walks the texture-stage combiner chain, then alpha test and fog.

use std::fmt::Write;

use crate::d3d8::{
    CmpFunc, TextureOp, D3DTA_ALPHAREPLICATE, D3DTA_COMPLEMENT, D3DTA_CURRENT, D3DTA_DIFFUSE,
    D3DTA_SELECTMASK, D3DTA_SPECULAR, D3DTA_TEMP, D3DTA_TEXTURE, D3DTA_TFACTOR,
};
use crate::fvf::VertexLayout;
use crate::shader::ShaderDialect;

use super::{FixedFunctionState, StageState};

#[derive(Copy, Clone, PartialEq, Eq)]
enum Channel {
    Rgb,
    Alpha,
}

pub fn generate_fragment_shader(
    state: &FixedFunctionState,
    _layout: &VertexLayout,
    dialect: &ShaderDialect,
) -> String {
    let mut out = dialect.header();

    let stage_count = state.active_stage_count();
    let stages = &state.stages[..stage_count];
    let any_texture = stages.iter().any(|s| s.texture_bound);
    let uses_tfactor = stages.iter().any(|s| stage_uses_arg(s, D3DTA_TFACTOR));
    let uses_specular = state.specular_enable
        || stages.iter().any(|s| stage_uses_arg(s, D3DTA_SPECULAR));
    let uses_temp = stages
        .iter()
        .any(|s| s.result_temp || stage_uses_arg(s, D3DTA_TEMP));
    let uses_bump = state.uses_bump_mapping();

    // -- uniforms ------------------------------------------------------------
    if any_texture {
        out.push_str("uniform sampler2D u_texture[8];\n");
    }
    if uses_tfactor {
        out.push_str("uniform vec4 u_texture_factor;\n");
    }
    if state.alpha_test.is_some() {
        out.push_str("uniform float u_alpha_ref;\n");
    }
    if state.fog_enabled {
        out.push_str("uniform vec4 u_fog_color;\n");
    }
    if uses_bump {
        out.push_str("uniform mat2 u_bumpEnvMat[8];\n");
        out.push_str("uniform float u_bump_lscale[8];\n");
        out.push_str("uniform float u_bump_loffset[8];\n");
    }
    out.push('\n');

    // -- varyings ------------------------------------------------------------
    out.push_str("in vec4 v_color0;\n");
    if uses_specular {
        out.push_str("in vec4 v_color1;\n");
    }
    for i in 0..stage_count {
        let _ = writeln!(out, "in vec4 v_texcoord{};", i);
    }
    if state.fog_enabled {
        out.push_str("in float v_fog_factor;\n");
    }
    if !dialect.uses_legacy_frag_color() {
        out.push_str("out vec4 FragColor;\n");
    }
    out.push('\n');

    out.push_str("void main() {\n");
    out.push_str("    vec4 current = v_color0;\n");
    if uses_temp {
        out.push_str("    vec4 temp = current;\n");
    }
    if uses_bump {
        out.push_str("    vec2 bump_offset = vec2(0.0);\n");
        out.push_str("    float bump_lum = 1.0;\n");
    }

    for (i, stage) in stages.iter().enumerate() {
        emit_stage(&mut out, state, stage, i, uses_bump);
    }

    if let Some(func) = state.alpha_test {
        emit_alpha_test(&mut out, func);
    }

    if state.fog_enabled {
        out.push_str(
            "    current = vec4(mix(u_fog_color.rgb, current.rgb, v_fog_factor), current.a);\n",
        );
    }

    if dialect.uses_legacy_frag_color() {
        out.push_str("    gl_FragColor = current;\n");
    } else {
        out.push_str("    FragColor = current;\n");
    }
    out.push_str("}\n");
    out
}

fn stage_uses_arg(stage: &StageState, arg: u32) -> bool {
    let color_args = [stage.color_arg0, stage.color_arg1, stage.color_arg2];
    let alpha_args = [stage.alpha_arg0, stage.alpha_arg1, stage.alpha_arg2];
    color_args
        .iter()
        .chain(alpha_args.iter())
        .any(|a| a & D3DTA_SELECTMASK == arg)
}

fn emit_stage(
    out: &mut String,
    state: &FixedFunctionState,
    stage: &StageState,
    index: usize,
    bump_enabled: bool,
) {
    let _ = writeln!(out, "    // stage {}", index);

    // sample this stage's texture
    if stage.texture_bound {
        let coord = if bump_enabled && index > 0 {
            // a preceding bump stage perturbs our coordinates
            if stage.transform.projected {
                format!(
                    "(v_texcoord{i}.xy / max(v_texcoord{i}.w, 0.0001)) + bump_offset",
                    i = index
                )
            } else {
                format!("v_texcoord{}.xy + bump_offset", index)
            }
        } else if stage.transform.projected {
            format!(
                "v_texcoord{i}.xy / max(v_texcoord{i}.w, 0.0001)",
                i = index
            )
        } else {
            format!("v_texcoord{}.xy", index)
        };
        let _ = writeln!(
            out,
            "    vec4 tex{i} = texture(u_texture[{i}], {c});",
            i = index,
            c = coord
        );
        if bump_enabled && index > 0 {
            let _ = writeln!(out, "    tex{i} = vec4(tex{i}.rgb * bump_lum, tex{i}.a);", i = index);
            out.push_str("    bump_offset = vec2(0.0);\n    bump_lum = 1.0;\n");
        }
    } else {
        let _ = writeln!(out, "    vec4 tex{} = vec4(1.0);", index);
    }

    // bump stages feed the next stage rather than the combiner chain
    if matches!(
        stage.color_op,
        TextureOp::BumpEnvMap | TextureOp::BumpEnvMapLuminance
    ) {
        let _ = writeln!(
            out,
            "    bump_offset = u_bumpEnvMat[{i}] * tex{i}.xy;",
            i = index
        );
        if stage.color_op == TextureOp::BumpEnvMapLuminance {
            let _ = writeln!(
                out,
                "    bump_lum = clamp(tex{i}.z * u_bump_lscale[{i}] + u_bump_loffset[{i}], 0.0, 1.0);",
                i = index
            );
        }
        return;
    }

    let rgb = op_expr(state, stage, index, Channel::Rgb);
    let alpha = if stage.alpha_op == TextureOp::Disable {
        "current.a".to_string()
    } else {
        op_expr(state, stage, index, Channel::Alpha)
    };

    let target = if stage.result_temp { "temp" } else { "current" };
    out.push_str("    {\n");
    let _ = writeln!(out, "        vec3 rgb = clamp({}, vec3(0.0), vec3(1.0));", rgb);
    let _ = writeln!(out, "        float alpha = clamp({}, 0.0, 1.0);", alpha);
    let _ = writeln!(out, "        {} = vec4(rgb, alpha);", target);
    out.push_str("    }\n");
}

fn arg_expr(stage_index: usize, arg: u32, channel: Channel, specular_available: bool) -> String {
    let base = match arg & D3DTA_SELECTMASK {
        D3DTA_DIFFUSE => "v_color0".to_string(),
        D3DTA_CURRENT => "current".to_string(),
        D3DTA_TEXTURE => format!("tex{}", stage_index),
        D3DTA_TFACTOR => "u_texture_factor".to_string(),
        D3DTA_SPECULAR => {
            if specular_available {
                "v_color1".to_string()
            } else {
                "vec4(0.0)".to_string()
            }
        }
        D3DTA_TEMP => "temp".to_string(),
        _ => "current".to_string(),
    };

    let mut expr = match channel {
        Channel::Rgb => {
            if arg & D3DTA_ALPHAREPLICATE != 0 {
                format!("vec3({}.a)", base)
            } else {
                format!("{}.rgb", base)
            }
        }
        Channel::Alpha => format!("{}.a", base),
    };

    if arg & D3DTA_COMPLEMENT != 0 {
        expr = match channel {
            Channel::Rgb => format!("(vec3(1.0) - {})", expr),
            Channel::Alpha => format!("(1.0 - {})", expr),
        };
    }
    expr
}

fn op_expr(
    state: &FixedFunctionState,
    stage: &StageState,
    index: usize,
    channel: Channel,
) -> String {
    let specular = state.specular_enable
        || state.stages[..state.active_stage_count()]
            .iter()
            .any(|s| stage_uses_arg(s, D3DTA_SPECULAR));
    let (op, a0, a1, a2) = match channel {
        Channel::Rgb => (
            stage.color_op,
            stage.color_arg0,
            stage.color_arg1,
            stage.color_arg2,
        ),
        Channel::Alpha => (
            stage.alpha_op,
            stage.alpha_arg0,
            stage.alpha_arg1,
            stage.alpha_arg2,
        ),
    };
    let arg0 = arg_expr(index, a0, channel, specular);
    let arg1 = arg_expr(index, a1, channel, specular);
    let arg2 = arg_expr(index, a2, channel, specular);

    let half = match channel {
        Channel::Rgb => "vec3(0.5)",
        Channel::Alpha => "0.5",
    };

    match op {
        TextureOp::Disable => match channel {
            Channel::Rgb => "current.rgb".to_string(),
            Channel::Alpha => "current.a".to_string(),
        },
        TextureOp::SelectArg1 => arg1,
        TextureOp::SelectArg2 => arg2,
        TextureOp::Modulate => format!("({} * {})", arg1, arg2),
        TextureOp::Modulate2x => format!("(2.0 * {} * {})", arg1, arg2),
        TextureOp::Modulate4x => format!("(4.0 * {} * {})", arg1, arg2),
        TextureOp::Add => format!("({} + {})", arg1, arg2),
        TextureOp::AddSigned => format!("({} + {} - {})", arg1, arg2, half),
        TextureOp::AddSigned2x => format!("(2.0 * ({} + {} - {}))", arg1, arg2, half),
        TextureOp::Subtract => format!("({} - {})", arg1, arg2),
        TextureOp::AddSmooth => format!("({a} + {b} - {a} * {b})", a = arg1, b = arg2),
        TextureOp::BlendDiffuseAlpha => {
            format!("mix({}, {}, v_color0.a)", arg2, arg1)
        }
        TextureOp::BlendTextureAlpha => {
            format!("mix({}, {}, tex{}.a)", arg2, arg1, index)
        }
        TextureOp::BlendFactorAlpha => {
            format!("mix({}, {}, u_texture_factor.a)", arg2, arg1)
        }
        TextureOp::BlendTextureAlphaPm => {
            format!("({} + {} * (1.0 - tex{}.a))", arg1, arg2, index)
        }
        TextureOp::BlendCurrentAlpha => {
            format!("mix({}, {}, current.a)", arg2, arg1)
        }
        TextureOp::PreModulate => {
            // next-stage premodulation has no modern equivalent; the closest
            // observable behaviour is a plain modulate
            format!("({} * {})", arg1, arg2)
        }
        TextureOp::ModulateAlphaAddColor => match channel {
            Channel::Rgb => format!(
                "({} + {} * {})",
                arg1,
                arg_expr(index, a1, Channel::Alpha, specular),
                arg2
            ),
            Channel::Alpha => format!("({} * {})", arg1, arg2),
        },
        TextureOp::ModulateColorAddAlpha => match channel {
            Channel::Rgb => format!(
                "({} * {} + {})",
                arg1,
                arg2,
                arg_expr(index, a1, Channel::Alpha, specular)
            ),
            Channel::Alpha => format!("({} * {})", arg1, arg2),
        },
        TextureOp::ModulateInvAlphaAddColor => match channel {
            Channel::Rgb => format!(
                "((1.0 - {}) * {} + {})",
                arg_expr(index, a1, Channel::Alpha, specular),
                arg2,
                arg1
            ),
            Channel::Alpha => format!("({} * {})", arg1, arg2),
        },
        TextureOp::ModulateInvColorAddAlpha => match channel {
            Channel::Rgb => format!(
                "((vec3(1.0) - {}) * {} + vec3({}))",
                arg1,
                arg2,
                arg_expr(index, a1, Channel::Alpha, specular)
            ),
            Channel::Alpha => format!("({} * {})", arg1, arg2),
        },
        TextureOp::DotProduct3 => match channel {
            Channel::Rgb => format!(
                "vec3(dot({} - vec3(0.5), {} - vec3(0.5)) * 4.0 + 0.5)",
                arg1, arg2
            ),
            // undefined for alpha; preserve the running value
            Channel::Alpha => "current.a".to_string(),
        },
        TextureOp::MultiplyAdd => format!("({} + {} * {})", arg0, arg1, arg2),
        TextureOp::Lerp => format!("mix({}, {}, {})", arg2, arg1, arg0),
        TextureOp::BumpEnvMap | TextureOp::BumpEnvMapLuminance => {
            // handled structurally before the combiner
            match channel {
                Channel::Rgb => "current.rgb".to_string(),
                Channel::Alpha => "current.a".to_string(),
            }
        }
    }
}

fn emit_alpha_test(out: &mut String, func: CmpFunc) {
    let condition = match func {
        CmpFunc::Never => {
            out.push_str("    discard;\n");
            return;
        }
        CmpFunc::Always => return,
        CmpFunc::Less => "current.a < u_alpha_ref",
        CmpFunc::Equal => "current.a == u_alpha_ref",
        CmpFunc::LessEqual => "current.a <= u_alpha_ref",
        CmpFunc::Greater => "current.a > u_alpha_ref",
        CmpFunc::NotEqual => "current.a != u_alpha_ref",
        CmpFunc::GreaterEqual => "current.a >= u_alpha_ref",
    };
    let _ = writeln!(out, "    if (!({})) discard;", condition);
}
