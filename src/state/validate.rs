//! Advisory state validation.
//!
//! Walks the shadow and reports every violation it can name. Nothing is
//! blocked: draws proceed regardless, the list exists for logging and for
//! tests to assert on.

use std::fmt;

use crate::d3d8::{
    BlendFactor, BlendOp, CmpFunc, CullMode, Dword, FillMode, LightType, StencilOp,
    TransformStateType, MAX_TEXTURE_STAGES,
};

use super::StateManager;

#[derive(Clone, Debug, PartialEq)]
pub enum StateViolation {
    UnknownBlendFactor { state: &'static str, value: Dword },
    UnknownBlendOp { value: Dword },
    UnknownCompareFunc { state: &'static str, value: Dword },
    UnknownStencilOp { state: &'static str, value: Dword },
    UnknownCullMode { value: Dword },
    UnknownFillMode { value: Dword },
    AlphaRefOutOfRange { value: Dword },
    StencilRefOutsideWriteMask { reference: Dword, write_mask: Dword },
    UnknownLightType { index: usize, value: Dword },
    SpotPhiLessThanTheta { index: usize, theta: f32, phi: f32 },
    NegativeLightRange { index: usize, range: f32 },
    AllZeroAttenuation { index: usize },
    ZeroLightDirection { index: usize },
    NonFiniteMatrix { which: &'static str },
    TexCoordIndexOutOfRange { stage: usize, index: Dword },
    StageAfterDisabled { stage: usize },
    ViewportZRange { min_z: f32, max_z: f32 },
}

impl fmt::Display for StateViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateViolation::UnknownBlendFactor { state, value } => {
                write!(f, "{} has no blend factor {}", state, value)
            }
            StateViolation::UnknownBlendOp { value } => write!(f, "unknown blend op {}", value),
            StateViolation::UnknownCompareFunc { state, value } => {
                write!(f, "{} has no compare function {}", state, value)
            }
            StateViolation::UnknownStencilOp { state, value } => {
                write!(f, "{} has no stencil op {}", state, value)
            }
            StateViolation::UnknownCullMode { value } => write!(f, "unknown cull mode {}", value),
            StateViolation::UnknownFillMode { value } => write!(f, "unknown fill mode {}", value),
            StateViolation::AlphaRefOutOfRange { value } => {
                write!(f, "alpha reference {:#x} exceeds 0xFF", value)
            }
            StateViolation::StencilRefOutsideWriteMask { reference, write_mask } => write!(
                f,
                "stencil reference {:#x} has bits outside write mask {:#x}",
                reference, write_mask
            ),
            StateViolation::UnknownLightType { index, value } => {
                write!(f, "light {} has unknown type {}", index, value)
            }
            StateViolation::SpotPhiLessThanTheta { index, theta, phi } => write!(
                f,
                "spot light {} has phi {} < theta {}",
                index, phi, theta
            ),
            StateViolation::NegativeLightRange { index, range } => {
                write!(f, "light {} has negative range {}", index, range)
            }
            StateViolation::AllZeroAttenuation { index } => {
                write!(f, "light {} has all-zero attenuation", index)
            }
            StateViolation::ZeroLightDirection { index } => {
                write!(f, "directional light {} has a zero direction", index)
            }
            StateViolation::NonFiniteMatrix { which } => {
                write!(f, "{} matrix contains NaN or infinity", which)
            }
            StateViolation::TexCoordIndexOutOfRange { stage, index } => {
                write!(f, "stage {} texcoord index {} out of range", stage, index)
            }
            StateViolation::StageAfterDisabled { stage } => write!(
                f,
                "stage {} is enabled but an earlier stage is disabled",
                stage
            ),
            StateViolation::ViewportZRange { min_z, max_z } => {
                write!(f, "viewport z range [{}, {}] invalid", min_z, max_z)
            }
        }
    }
}

impl StateManager {
    /// Walk the shadow and list every violation. Reported at debug level;
    /// never blocks a draw.
    pub fn validate(&self) -> Vec<StateViolation> {
        let mut violations = Vec::new();
        self.validate_render_states(&mut violations);
        self.validate_texture_stages(&mut violations);
        self.validate_lights(&mut violations);
        self.validate_transforms(&mut violations);
        self.validate_viewport(&mut violations);
        for violation in &violations {
            debug!("state validation: {}", violation);
        }
        violations
    }

    fn validate_render_states(&self, out: &mut Vec<StateViolation>) {
        let r = &self.render;
        if BlendFactor::from_dword(r.src_blend).is_none() {
            out.push(StateViolation::UnknownBlendFactor {
                state: "SRCBLEND",
                value: r.src_blend,
            });
        }
        if BlendFactor::from_dword(r.dest_blend).is_none() {
            out.push(StateViolation::UnknownBlendFactor {
                state: "DESTBLEND",
                value: r.dest_blend,
            });
        }
        if BlendOp::from_dword(r.blend_op).is_none() {
            out.push(StateViolation::UnknownBlendOp { value: r.blend_op });
        }
        for (name, value) in [
            ("ZFUNC", r.z_func),
            ("ALPHAFUNC", r.alpha_func),
            ("STENCILFUNC", r.stencil_func),
        ] {
            if CmpFunc::from_dword(value).is_none() {
                out.push(StateViolation::UnknownCompareFunc { state: name, value });
            }
        }
        for (name, value) in [
            ("STENCILFAIL", r.stencil_fail),
            ("STENCILZFAIL", r.stencil_z_fail),
            ("STENCILPASS", r.stencil_pass),
        ] {
            if StencilOp::from_dword(value).is_none() {
                out.push(StateViolation::UnknownStencilOp { state: name, value });
            }
        }
        if CullMode::from_dword(r.cull_mode).is_none() {
            out.push(StateViolation::UnknownCullMode {
                value: r.cull_mode,
            });
        }
        if FillMode::from_dword(r.fill_mode).is_none() {
            out.push(StateViolation::UnknownFillMode {
                value: r.fill_mode,
            });
        }
        if r.alpha_ref > 0xFF {
            out.push(StateViolation::AlphaRefOutOfRange {
                value: r.alpha_ref,
            });
        }
        if r.stencil_enable != 0 && r.stencil_ref & !r.stencil_write_mask != 0 {
            out.push(StateViolation::StencilRefOutsideWriteMask {
                reference: r.stencil_ref,
                write_mask: r.stencil_write_mask,
            });
        }
    }

    fn validate_texture_stages(&self, out: &mut Vec<StateViolation>) {
        let mut seen_disabled = false;
        for stage in 0..MAX_TEXTURE_STAGES {
            let s = &self.stages[stage];
            let disabled = s.color_op == crate::d3d8::TextureOp::Disable as Dword;
            if disabled {
                seen_disabled = true;
            } else if seen_disabled {
                out.push(StateViolation::StageAfterDisabled { stage });
            }
            let index = s.texcoord_index & 0xFFFF;
            if index >= MAX_TEXTURE_STAGES as Dword {
                out.push(StateViolation::TexCoordIndexOutOfRange { stage, index });
            }
        }
    }

    fn validate_lights(&self, out: &mut Vec<StateViolation>) {
        for (index, slot) in self.lights.iter().enumerate() {
            if !slot.enabled {
                continue;
            }
            let light = &slot.light;
            // the typed field can only hold valid types; the raw check
            // matters for states arriving through block replay
            let raw_type = light.light_type as Dword;
            if LightType::from_dword(raw_type).is_none() {
                out.push(StateViolation::UnknownLightType {
                    index,
                    value: raw_type,
                });
                continue;
            }
            match light.light_type {
                LightType::Directional => {
                    if light.direction.length_sq() == 0.0 {
                        out.push(StateViolation::ZeroLightDirection { index });
                    }
                }
                LightType::Point => {
                    self.validate_ranged_light(index, light, out);
                }
                LightType::Spot => {
                    self.validate_ranged_light(index, light, out);
                    if light.phi < light.theta || light.theta < 0.0 {
                        out.push(StateViolation::SpotPhiLessThanTheta {
                            index,
                            theta: light.theta,
                            phi: light.phi,
                        });
                    }
                    if light.direction.length_sq() == 0.0 {
                        out.push(StateViolation::ZeroLightDirection { index });
                    }
                }
            }
        }
    }

    fn validate_ranged_light(
        &self,
        index: usize,
        light: &crate::d3d8::Light,
        out: &mut Vec<StateViolation>,
    ) {
        if light.range < 0.0 {
            out.push(StateViolation::NegativeLightRange {
                index,
                range: light.range,
            });
        }
        if light.attenuation0 == 0.0 && light.attenuation1 == 0.0 && light.attenuation2 == 0.0 {
            out.push(StateViolation::AllZeroAttenuation { index });
        }
    }

    fn validate_transforms(&self, out: &mut Vec<StateViolation>) {
        for (name, which) in [
            ("world", TransformStateType::World),
            ("view", TransformStateType::View),
            ("projection", TransformStateType::Projection),
        ] {
            if self.transforms.get(which).has_non_finite() {
                out.push(StateViolation::NonFiniteMatrix { which: name });
            }
        }
        for i in 0..MAX_TEXTURE_STAGES {
            if self
                .transforms
                .get(TransformStateType::Texture(i))
                .has_non_finite()
            {
                out.push(StateViolation::NonFiniteMatrix { which: "texture" });
            }
        }
    }

    fn validate_viewport(&self, out: &mut Vec<StateViolation>) {
        let vp = &self.viewport;
        if vp.min_z > vp.max_z
            || !(0.0..=1.0).contains(&vp.min_z)
            || !(0.0..=1.0).contains(&vp.max_z)
        {
            out.push(StateViolation::ViewportZRange {
                min_z: vp.min_z,
                max_z: vp.max_z,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::d3d8::{Light, Matrix, RenderStateType, TextureOp, Vector3};
    use crate::state::StateManager;

    #[test]
    fn default_state_with_one_valid_change_is_clean() {
        let mut sm = StateManager::new();
        sm.set_render_state(
            RenderStateType::CullMode as Dword,
            CullMode::None as Dword,
        );
        assert!(sm.validate().is_empty());
    }

    #[test]
    fn unknown_enums_are_reported() {
        let mut sm = StateManager::new();
        // setters reject these, so write the shadow directly
        sm.render.src_blend = 99;
        sm.render.blend_op = 0;
        sm.render.z_func = 42;
        sm.render.stencil_pass = 200;
        sm.render.cull_mode = 7;
        sm.render.fill_mode = 0;
        let violations = sm.validate();
        assert!(violations.iter().any(|v| matches!(
            v,
            StateViolation::UnknownBlendFactor { state: "SRCBLEND", .. }
        )));
        assert!(violations
            .iter()
            .any(|v| matches!(v, StateViolation::UnknownBlendOp { .. })));
        assert!(violations.iter().any(|v| matches!(
            v,
            StateViolation::UnknownCompareFunc { state: "ZFUNC", .. }
        )));
        assert!(violations.iter().any(|v| matches!(
            v,
            StateViolation::UnknownStencilOp { state: "STENCILPASS", .. }
        )));
        assert!(violations
            .iter()
            .any(|v| matches!(v, StateViolation::UnknownCullMode { value: 7 })));
        assert!(violations
            .iter()
            .any(|v| matches!(v, StateViolation::UnknownFillMode { value: 0 })));
    }

    #[test]
    fn alpha_ref_and_stencil_mask_checks() {
        let mut sm = StateManager::new();
        sm.render.alpha_ref = 0x1FF;
        sm.render.stencil_enable = 1;
        sm.render.stencil_ref = 0xF0;
        sm.render.stencil_write_mask = 0x0F;
        let violations = sm.validate();
        assert!(violations
            .iter()
            .any(|v| matches!(v, StateViolation::AlphaRefOutOfRange { value: 0x1FF })));
        assert!(violations
            .iter()
            .any(|v| matches!(v, StateViolation::StencilRefOutsideWriteMask { .. })));
    }

    #[test]
    fn light_violations() {
        let mut sm = StateManager::new();

        let spot = Light {
            light_type: crate::d3d8::LightType::Spot,
            theta: 1.0,
            phi: 0.5, // phi < theta
            range: -2.0,
            attenuation0: 0.0,
            attenuation1: 0.0,
            attenuation2: 0.0,
            direction: Vector3::new(0.0, 0.0, 0.0),
            ..Light::default()
        };
        sm.set_light(0, &spot);
        sm.light_enable(0, true);

        let violations = sm.validate();
        assert!(violations
            .iter()
            .any(|v| matches!(v, StateViolation::SpotPhiLessThanTheta { index: 0, .. })));
        assert!(violations
            .iter()
            .any(|v| matches!(v, StateViolation::NegativeLightRange { index: 0, .. })));
        assert!(violations
            .iter()
            .any(|v| matches!(v, StateViolation::AllZeroAttenuation { index: 0 })));
        assert!(violations
            .iter()
            .any(|v| matches!(v, StateViolation::ZeroLightDirection { index: 0 })));

        // disabled lights are not validated
        sm.light_enable(0, false);
        assert!(sm.validate().is_empty());
    }

    #[test]
    fn non_finite_matrices_are_reported() {
        let mut sm = StateManager::new();
        let mut bad = Matrix::identity();
        bad.m[1][1] = f32::INFINITY;
        sm.set_transform(crate::d3d8::TransformStateType::View, &bad);
        let violations = sm.validate();
        assert!(violations
            .iter()
            .any(|v| matches!(v, StateViolation::NonFiniteMatrix { which: "view" })));
    }

    #[test]
    fn stage_ordering_hole_is_reported() {
        let mut sm = StateManager::new();
        // stage 1 disabled (default), stage 2 enabled: hole
        sm.stages[2].color_op = TextureOp::Modulate as Dword;
        let violations = sm.validate();
        assert!(violations
            .iter()
            .any(|v| matches!(v, StateViolation::StageAfterDisabled { stage: 2 })));
    }

    #[test]
    fn texcoord_index_out_of_range() {
        let mut sm = StateManager::new();
        sm.stages[0].texcoord_index = 9;
        let violations = sm.validate();
        assert!(violations
            .iter()
            .any(|v| matches!(v, StateViolation::TexCoordIndexOutOfRange { stage: 0, index: 9 })));
    }

    #[test]
    fn viewport_z_range_is_reported() {
        let mut sm = StateManager::new();
        sm.viewport.min_z = 0.9;
        sm.viewport.max_z = 0.1;
        let violations = sm.validate();
        assert!(violations
            .iter()
            .any(|v| matches!(v, StateViolation::ViewportZRange { .. })));
    }
}
