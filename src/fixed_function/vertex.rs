//! Fixed-function vertex shader synthesis.
//!
//! Transforms, D3D lighting, texture-coordinate generation and texture
//! transforms, driven entirely by the state key.

use std::fmt::Write;

use crate::d3d8::{FogMode, LightType, MaterialColorSource};
use crate::fvf::{PositionKind, VertexLayout};
use crate::shader::ShaderDialect;

use super::{FixedFunctionState, TexGen};

pub fn generate_vertex_shader(
    state: &FixedFunctionState,
    layout: &VertexLayout,
    dialect: &ShaderDialect,
) -> String {
    let mut out = dialect.header();

    let pre_transformed = layout.position == PositionKind::XyzRhw;
    let stage_count = state.active_stage_count();
    let needs_normal = layout.has_normal()
        && (state.lighting
            || state.stages[..stage_count]
                .iter()
                .any(|s| s.texgen.needs_normal()));
    let needs_view_pos = state.lighting
        || state.fog_enabled
        || state.stages[..stage_count]
            .iter()
            .any(|s| s.texgen != TexGen::PassThru);
    let any_texture_transform = state.stages[..stage_count]
        .iter()
        .any(|s| s.transform.enabled());

    // -- attributes ----------------------------------------------------------
    if pre_transformed {
        out.push_str("in vec4 a_position;\n");
    } else {
        out.push_str("in vec3 a_position;\n");
    }
    if layout.has_normal() {
        out.push_str("in vec3 a_normal;\n");
    }
    if layout.has_diffuse() {
        out.push_str("in vec4 a_color;\n");
    }
    if layout.has_specular() {
        out.push_str("in vec4 a_specular;\n");
    }
    for i in 0..layout.texcoord_count() {
        let ty = match layout.texcoord_size(i) {
            1 => "float",
            2 => "vec2",
            3 => "vec3",
            _ => "vec4",
        };
        let _ = writeln!(out, "in {} a_texcoord{};", ty, i);
    }
    out.push('\n');

    // -- uniforms ------------------------------------------------------------
    if pre_transformed {
        out.push_str("uniform vec4 u_viewport_size;\n");
    } else {
        out.push_str("uniform mat4 u_world_view_proj_matrix;\n");
    }
    if needs_view_pos || needs_normal {
        out.push_str("uniform mat4 u_world_matrix;\n");
        out.push_str("uniform mat4 u_view_matrix;\n");
    }
    if needs_normal {
        out.push_str("uniform mat3 u_normal_matrix;\n");
    }
    if any_texture_transform {
        out.push_str("uniform mat4 u_texture_matrix[8];\n");
    }
    if state.lighting {
        out.push_str("uniform vec4 u_material_diffuse;\n");
        out.push_str("uniform vec4 u_material_ambient;\n");
        out.push_str("uniform vec4 u_material_specular;\n");
        out.push_str("uniform vec4 u_material_emissive;\n");
        out.push_str("uniform float u_material_power;\n");
        out.push_str("uniform vec4 u_ambient_light;\n");
        for (i, slot) in state.lights.iter().enumerate() {
            if slot.is_none() {
                continue;
            }
            let _ = writeln!(out, "uniform vec3 u_light{}_position;", i);
            let _ = writeln!(out, "uniform vec3 u_light{}_direction;", i);
            let _ = writeln!(out, "uniform vec4 u_light{}_diffuse;", i);
            let _ = writeln!(out, "uniform vec4 u_light{}_specular;", i);
            let _ = writeln!(out, "uniform vec4 u_light{}_ambient;", i);
            let _ = writeln!(out, "uniform float u_light{}_range;", i);
            let _ = writeln!(out, "uniform vec3 u_light{}_attenuation;", i);
            let _ = writeln!(out, "uniform float u_light{}_falloff;", i);
            let _ = writeln!(out, "uniform float u_light{}_theta;", i);
            let _ = writeln!(out, "uniform float u_light{}_phi;", i);
        }
    }
    if state.fog_enabled {
        out.push_str("uniform float u_fog_start;\n");
        out.push_str("uniform float u_fog_end;\n");
        out.push_str("uniform float u_fog_density;\n");
    }
    out.push('\n');

    // -- varyings ------------------------------------------------------------
    out.push_str("out vec4 v_color0;\n");
    if state.specular_enable {
        out.push_str("out vec4 v_color1;\n");
    }
    for i in 0..stage_count {
        let _ = writeln!(out, "out vec4 v_texcoord{};", i);
    }
    if state.fog_enabled {
        out.push_str("out float v_fog_factor;\n");
    }
    out.push('\n');

    // -- body ----------------------------------------------------------------
    out.push_str("void main() {\n");

    if pre_transformed {
        // screen-space x/y plus rhw back to clip space
        out.push_str("    float rhw = (a_position.w != 0.0) ? a_position.w : 1.0;\n");
        out.push_str("    float w = 1.0 / rhw;\n");
        out.push_str(
            "    float ndc_x = ((a_position.x - u_viewport_size.x) / u_viewport_size.z) * 2.0 - 1.0;\n",
        );
        out.push_str(
            "    float ndc_y = 1.0 - ((a_position.y - u_viewport_size.y) / u_viewport_size.w) * 2.0;\n",
        );
        out.push_str("    gl_Position = vec4(ndc_x * w, ndc_y * w, a_position.z * w, w);\n");
    } else {
        out.push_str("    gl_Position = u_world_view_proj_matrix * vec4(a_position, 1.0);\n");
    }

    if needs_view_pos {
        if pre_transformed {
            out.push_str("    vec3 view_pos = vec3(a_position.xy, a_position.z);\n");
        } else {
            out.push_str(
                "    vec3 view_pos = (u_view_matrix * u_world_matrix * vec4(a_position, 1.0)).xyz;\n",
            );
        }
    }
    if needs_normal {
        if state.normalize_normals {
            out.push_str("    vec3 normal = normalize(u_normal_matrix * a_normal);\n");
        } else {
            out.push_str("    vec3 normal = u_normal_matrix * a_normal;\n");
        }
    }

    emit_color_outputs(&mut out, state, layout, needs_normal);

    for i in 0..stage_count {
        emit_texcoord(&mut out, state, layout, i);
    }

    if state.fog_enabled {
        emit_fog_factor(&mut out, state, needs_view_pos);
    }

    out.push_str("}\n");
    out
}

fn material_color(source: MaterialColorSource, layout: &VertexLayout, material: &str) -> String {
    match source {
        MaterialColorSource::Material => material.to_string(),
        MaterialColorSource::Color1 => {
            if layout.has_diffuse() {
                "a_color".to_string()
            } else {
                material.to_string()
            }
        }
        MaterialColorSource::Color2 => {
            if layout.has_specular() {
                "a_specular".to_string()
            } else {
                material.to_string()
            }
        }
    }
}

fn emit_color_outputs(
    out: &mut String,
    state: &FixedFunctionState,
    layout: &VertexLayout,
    have_normal: bool,
) {
    if !state.lighting {
        // unlit: vertex color straight through (white without one)
        if layout.has_diffuse() && state.color_vertex {
            out.push_str("    v_color0 = a_color;\n");
        } else {
            out.push_str("    v_color0 = vec4(1.0);\n");
        }
        if state.specular_enable {
            if layout.has_specular() {
                out.push_str("    v_color1 = a_specular;\n");
            } else {
                out.push_str("    v_color1 = vec4(0.0);\n");
            }
        }
        return;
    }

    let diffuse_src = if state.color_vertex {
        material_color(state.diffuse_source, layout, "u_material_diffuse")
    } else {
        "u_material_diffuse".to_string()
    };
    let ambient_src = if state.color_vertex {
        material_color(state.ambient_source, layout, "u_material_ambient")
    } else {
        "u_material_ambient".to_string()
    };
    let emissive_src = if state.color_vertex {
        material_color(state.emissive_source, layout, "u_material_emissive")
    } else {
        "u_material_emissive".to_string()
    };
    let specular_src = if state.color_vertex {
        material_color(state.specular_source, layout, "u_material_specular")
    } else {
        "u_material_specular".to_string()
    };

    let _ = writeln!(out, "    vec4 mat_diffuse = {};", diffuse_src);
    let _ = writeln!(out, "    vec4 mat_ambient = {};", ambient_src);
    let _ = writeln!(out, "    vec4 mat_emissive = {};", emissive_src);
    if state.specular_enable {
        let _ = writeln!(out, "    vec4 mat_specular = {};", specular_src);
    }

    out.push_str(
        "    vec3 diffuse_acc = vec3(0.0);\n    vec3 specular_acc = vec3(0.0);\n",
    );
    if !have_normal {
        // lighting without normals degenerates to ambient only
        out.push_str("    vec3 normal = vec3(0.0, 0.0, 1.0);\n");
    }
    out.push_str("    vec3 to_eye = normalize(-view_pos);\n");

    for (i, slot) in state.lights.iter().enumerate() {
        let light_type = match slot {
            Some(t) => *t,
            None => continue,
        };
        let _ = writeln!(out, "    {{ // light {}", i);
        match light_type {
            LightType::Directional => {
                let _ = writeln!(
                    out,
                    "        vec3 to_light = normalize(-u_light{}_direction);",
                    i
                );
                out.push_str("        float attenuation = 1.0;\n");
            }
            LightType::Point => {
                emit_point_attenuation(out, i);
            }
            LightType::Spot => {
                emit_point_attenuation(out, i);
                // cone falloff between theta (inner) and phi (outer)
                let _ = writeln!(
                    out,
                    "        float rho = dot(normalize(-u_light{}_direction), to_light);",
                    i
                );
                let _ = writeln!(
                    out,
                    "        float cos_theta = cos(u_light{}_theta * 0.5);",
                    i
                );
                let _ = writeln!(out, "        float cos_phi = cos(u_light{}_phi * 0.5);", i);
                let _ = writeln!(
                    out,
                    "        float spot = (rho > cos_theta) ? 1.0 : ((rho <= cos_phi) ? 0.0 : pow((rho - cos_phi) / max(cos_theta - cos_phi, 0.0001), u_light{}_falloff));",
                    i
                );
                out.push_str("        attenuation *= spot;\n");
            }
        }
        out.push_str("        float n_dot_l = max(dot(normal, to_light), 0.0);\n");
        let _ = writeln!(
            out,
            "        diffuse_acc += attenuation * n_dot_l * u_light{}_diffuse.rgb;",
            i
        );
        if state.specular_enable {
            out.push_str("        vec3 half_vec = normalize(to_light + to_eye);\n");
            let _ = writeln!(
                out,
                "        specular_acc += attenuation * pow(max(dot(normal, half_vec), 0.0), max(u_material_power, 1.0)) * u_light{}_specular.rgb;",
                i
            );
        }
        out.push_str("    }\n");
    }

    out.push_str(
        "    vec3 lit_rgb = mat_emissive.rgb + mat_ambient.rgb * u_ambient_light.rgb + mat_diffuse.rgb * diffuse_acc;\n",
    );
    out.push_str("    v_color0 = vec4(clamp(lit_rgb, 0.0, 1.0), mat_diffuse.a);\n");
    if state.specular_enable {
        out.push_str(
            "    v_color1 = vec4(clamp(mat_specular.rgb * specular_acc, 0.0, 1.0), 0.0);\n",
        );
    }
}

fn emit_point_attenuation(out: &mut String, i: usize) {
    let _ = writeln!(out, "        vec3 light_vec = u_light{}_position - view_pos;", i);
    out.push_str("        float dist = length(light_vec);\n");
    out.push_str("        vec3 to_light = light_vec / max(dist, 0.0001);\n");
    let _ = writeln!(
        out,
        "        float attenuation = (dist <= u_light{i}_range) ? 1.0 / max(u_light{i}_attenuation.x + u_light{i}_attenuation.y * dist + u_light{i}_attenuation.z * dist * dist, 0.0001) : 0.0;",
        i = i
    );
}

fn emit_texcoord(out: &mut String, state: &FixedFunctionState, layout: &VertexLayout, stage: usize) {
    let stage_state = &state.stages[stage];
    let coord = match stage_state.texgen {
        TexGen::PassThru => {
            let index = stage_state.texcoord_index as u32;
            if index < layout.texcoord_count() {
                match layout.texcoord_size(index) {
                    1 => format!("vec4(a_texcoord{}, 0.0, 0.0, 1.0)", index),
                    2 => format!("vec4(a_texcoord{}, 0.0, 1.0)", index),
                    3 => format!("vec4(a_texcoord{}, 1.0)", index),
                    _ => format!("a_texcoord{}", index),
                }
            } else if layout.texcoord_count() > 0 {
                // fall back to set 0, a common pattern in D3D8 content
                match layout.texcoord_size(0) {
                    1 => "vec4(a_texcoord0, 0.0, 0.0, 1.0)".to_string(),
                    2 => "vec4(a_texcoord0, 0.0, 1.0)".to_string(),
                    3 => "vec4(a_texcoord0, 1.0)".to_string(),
                    _ => "a_texcoord0".to_string(),
                }
            } else {
                "vec4(0.0, 0.0, 0.0, 1.0)".to_string()
            }
        }
        TexGen::CameraSpaceNormal => "vec4(normal, 1.0)".to_string(),
        TexGen::CameraSpacePosition => "vec4(view_pos, 1.0)".to_string(),
        TexGen::CameraSpaceReflection => {
            "vec4(reflect(normalize(view_pos), normal), 1.0)".to_string()
        }
    };

    if stage_state.transform.enabled() {
        let _ = writeln!(
            out,
            "    v_texcoord{s} = u_texture_matrix[{s}] * {c};",
            s = stage,
            c = coord
        );
    } else {
        let _ = writeln!(out, "    v_texcoord{} = {};", stage, coord);
    }
}

fn emit_fog_factor(out: &mut String, state: &FixedFunctionState, have_view_pos: bool) {
    if have_view_pos {
        if state.range_fog {
            out.push_str("    float fog_dist = length(view_pos);\n");
        } else {
            out.push_str("    float fog_dist = abs(view_pos.z);\n");
        }
    } else {
        out.push_str("    float fog_dist = gl_Position.w;\n");
    }
    match state.fog_mode {
        FogMode::Linear => out.push_str(
            "    v_fog_factor = clamp((u_fog_end - fog_dist) / max(u_fog_end - u_fog_start, 0.0001), 0.0, 1.0);\n",
        ),
        FogMode::Exp => out.push_str(
            "    v_fog_factor = clamp(exp(-u_fog_density * fog_dist), 0.0, 1.0);\n",
        ),
        FogMode::Exp2 => out.push_str(
            "    v_fog_factor = clamp(exp(-u_fog_density * u_fog_density * fog_dist * fog_dist), 0.0, 1.0);\n",
        ),
        FogMode::None => out.push_str("    v_fog_factor = 1.0;\n"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::d3d8::{TextureOp, D3DTA_DIFFUSE, D3DTA_TEXTURE};
    use crate::fixed_function::StageState;
    use crate::fvf;

    fn layout(fvf_bits: u32) -> VertexLayout {
        fvf::parse_fvf(fvf_bits).unwrap()
    }

    fn base_state(fvf_bits: u32) -> FixedFunctionState {
        let mut state = FixedFunctionState::default();
        state.fvf = fvf_bits;
        state
    }

    #[test]
    fn untransformed_position_uses_wvp() {
        let bits = fvf::D3DFVF_XYZ | fvf::D3DFVF_DIFFUSE;
        let src = generate_vertex_shader(&base_state(bits), &layout(bits), &ShaderDialect::default());
        assert!(src.contains("uniform mat4 u_world_view_proj_matrix;"));
        assert!(src.contains("gl_Position = u_world_view_proj_matrix * vec4(a_position, 1.0);"));
        assert!(src.contains("v_color0 = a_color;"));
        assert!(!src.contains("u_viewport_size"));
    }

    #[test]
    fn pre_transformed_position_uses_viewport() {
        let bits = fvf::D3DFVF_XYZRHW | fvf::D3DFVF_DIFFUSE;
        let src = generate_vertex_shader(&base_state(bits), &layout(bits), &ShaderDialect::default());
        assert!(src.contains("in vec4 a_position;"));
        assert!(src.contains("uniform vec4 u_viewport_size;"));
        assert!(!src.contains("u_world_view_proj_matrix"));
    }

    #[test]
    fn lighting_declares_material_and_lights() {
        let bits = fvf::D3DFVF_XYZ | fvf::D3DFVF_NORMAL;
        let mut state = base_state(bits);
        state.lighting = true;
        state.lights[0] = Some(LightType::Directional);
        state.lights[2] = Some(LightType::Spot);
        let src = generate_vertex_shader(&state, &layout(bits), &ShaderDialect::default());
        assert!(src.contains("uniform vec4 u_material_diffuse;"));
        assert!(src.contains("uniform vec3 u_light0_direction;"));
        assert!(src.contains("uniform float u_light2_phi;"));
        // slot 1 is disabled and costs nothing
        assert!(!src.contains("u_light1_"));
        assert!(src.contains("uniform mat3 u_normal_matrix;"));
        assert!(src.contains("u_ambient_light.rgb"));
    }

    #[test]
    fn spot_light_emits_cone_falloff() {
        let bits = fvf::D3DFVF_XYZ | fvf::D3DFVF_NORMAL;
        let mut state = base_state(bits);
        state.lighting = true;
        state.lights[0] = Some(LightType::Spot);
        let src = generate_vertex_shader(&state, &layout(bits), &ShaderDialect::default());
        assert!(src.contains("cos(u_light0_theta * 0.5)"));
        assert!(src.contains("u_light0_falloff"));
        assert!(src.contains("u_light0_attenuation"));
    }

    #[test]
    fn texcoords_pass_through_with_expansion() {
        let bits = fvf::D3DFVF_XYZ | fvf::d3dfvf_tex(2) | fvf::texcoord_size_bits(3, 1);
        let mut state = base_state(bits);
        state.stages[0].color_op = TextureOp::SelectArg1;
        state.stages[0].color_arg1 = D3DTA_TEXTURE;
        state.stages[0].texture_bound = true;
        state.stages[1] = StageState {
            texture_bound: true,
            color_op: TextureOp::Modulate,
            color_arg1: D3DTA_TEXTURE,
            color_arg2: D3DTA_DIFFUSE,
            texcoord_index: 1,
            ..StageState::default()
        };
        let src = generate_vertex_shader(&state, &layout(bits), &ShaderDialect::default());
        assert!(src.contains("v_texcoord0 = vec4(a_texcoord0, 0.0, 1.0);"));
        assert!(src.contains("v_texcoord1 = vec4(a_texcoord1, 1.0);"));
    }

    #[test]
    fn texture_transform_multiplies_matrix() {
        let bits = fvf::D3DFVF_XYZ | fvf::d3dfvf_tex(1);
        let mut state = base_state(bits);
        state.stages[0].color_op = TextureOp::SelectArg1;
        state.stages[0].color_arg1 = D3DTA_TEXTURE;
        state.stages[0].texture_bound = true;
        state.stages[0].transform = super::super::TexTransform {
            count: 2,
            projected: false,
        };
        let src = generate_vertex_shader(&state, &layout(bits), &ShaderDialect::default());
        assert!(src.contains("uniform mat4 u_texture_matrix[8];"));
        assert!(src.contains("v_texcoord0 = u_texture_matrix[0] * vec4(a_texcoord0, 0.0, 1.0);"));
    }

    #[test]
    fn camera_space_texgen() {
        let bits = fvf::D3DFVF_XYZ | fvf::D3DFVF_NORMAL;
        let mut state = base_state(bits);
        state.stages[0].color_op = TextureOp::SelectArg1;
        state.stages[0].color_arg1 = D3DTA_TEXTURE;
        state.stages[0].texture_bound = true;
        state.stages[0].texgen = TexGen::CameraSpaceReflection;
        let src = generate_vertex_shader(&state, &layout(bits), &ShaderDialect::default());
        assert!(src.contains("reflect(normalize(view_pos), normal)"));
        assert!(src.contains("uniform mat4 u_view_matrix;"));
    }

    #[test]
    fn fog_modes_emit_their_curves() {
        let bits = fvf::D3DFVF_XYZ;
        for (mode, needle) in [
            (FogMode::Linear, "(u_fog_end - fog_dist)"),
            (FogMode::Exp, "exp(-u_fog_density * fog_dist)"),
            (FogMode::Exp2, "exp(-u_fog_density * u_fog_density"),
        ] {
            let mut state = base_state(bits);
            state.fog_enabled = true;
            state.fog_mode = mode;
            let src = generate_vertex_shader(&state, &layout(bits), &ShaderDialect::default());
            assert!(src.contains("out float v_fog_factor;"));
            assert!(src.contains(needle), "missing {:?} curve", mode);
        }
    }
}
