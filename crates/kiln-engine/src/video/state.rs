use std::f32::consts::{PI, TAU};

use glam::{Mat4, Vec3};

use crate::coords::Color;
use crate::device::{BlendMode, GpuLight, PipelineState, SceneUniforms, MAX_LIGHTS};

use super::error::VideoError;

// ── fog ───────────────────────────────────────────────────────────────────

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FogMode {
    Linear,
    Exponential,
    ExponentialSquared,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Fog {
    pub color: Color,
    pub density: f32,
    pub mode: FogMode,
    /// Linear fog only.
    pub start: f32,
    /// Linear fog only.
    pub end: f32,
}

impl Default for Fog {
    fn default() -> Self {
        Self {
            color: Color::white(),
            density: 0.01,
            mode: FogMode::Exponential,
            start: 10.0,
            end: 1000.0,
        }
    }
}

// ── light ─────────────────────────────────────────────────────────────────

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum LightType {
    Directional,
    Point,
    Spot,
}

/// A fixed-function light source.
///
/// The spot cone and the light type are coupled: [`set_spot_cone`] is the
/// only way to change the cone and derives the type from it.
///
/// [`set_spot_cone`]: Light::set_spot_cone
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Light {
    pub ambient: Color,
    pub diffuse: Color,
    pub specular: Color,
    pub position: Vec3,
    /// Direction of directional lights and the axis of spot lights.
    pub direction: Vec3,
    pub range: f32,
    pub spot_falloff: f32,
    pub constant_attenuation: f32,
    pub linear_attenuation: f32,
    pub quadratic_attenuation: f32,
    light_type: LightType,
    spot_theta: f32,
    spot_phi: f32,
}

impl Default for Light {
    fn default() -> Self {
        Self {
            ambient: Color::black(),
            diffuse: Color::white(),
            specular: Color::white(),
            position: Vec3::ZERO,
            direction: Vec3::NEG_Z,
            range: f32::MAX,
            spot_falloff: 1.0,
            constant_attenuation: 1.0,
            linear_attenuation: 0.0,
            quadratic_attenuation: 0.0,
            light_type: LightType::Point,
            spot_theta: TAU,
            spot_phi: TAU,
        }
    }
}

impl Light {
    pub fn point(position: Vec3, diffuse: Color) -> Self {
        Self {
            position,
            diffuse,
            ..Self::default()
        }
    }

    pub fn directional(direction: Vec3, diffuse: Color) -> Self {
        Self {
            direction,
            diffuse,
            light_type: LightType::Directional,
            ..Self::default()
        }
    }

    /// A spot light with inner cone `theta` and outer cone `phi` (full angles).
    pub fn spot(position: Vec3, direction: Vec3, theta: f32, phi: f32) -> Result<Self, VideoError> {
        let mut light = Self {
            position,
            direction,
            ..Self::default()
        };
        light.set_spot_cone(theta, phi)?;
        Ok(light)
    }

    pub fn light_type(&self) -> LightType {
        self.light_type
    }

    pub fn spot_theta(&self) -> f32 {
        self.spot_theta
    }

    pub fn spot_phi(&self) -> f32 {
        self.spot_phi
    }

    /// Sets the inner (`theta`) and outer (`phi`) cone angles in radians.
    ///
    /// Requires `0 ≤ theta ≤ phi ≤ 2π`. An outer cone narrower than a half
    /// space makes this a spot light; anything wider makes it a point light.
    /// On error the light is left unchanged.
    pub fn set_spot_cone(&mut self, theta: f32, phi: f32) -> Result<(), VideoError> {
        if !(0.0..=TAU).contains(&theta) || !(0.0..=TAU).contains(&phi) || theta > phi {
            return Err(VideoError::InvalidState(format!(
                "spot cone requires 0 <= theta <= phi <= 2pi, got theta={theta}, phi={phi}"
            )));
        }
        self.spot_theta = theta;
        self.spot_phi = phi;
        self.light_type = if phi < PI {
            LightType::Spot
        } else {
            LightType::Point
        };
        Ok(())
    }

    /// Turns the light into a directional light, keeping its colors.
    pub fn make_directional(&mut self) {
        self.light_type = LightType::Directional;
        self.spot_theta = TAU;
        self.spot_phi = TAU;
    }

    fn to_gpu(self) -> GpuLight {
        let positional = self.light_type != LightType::Directional;
        let spot = self.light_type == LightType::Spot;
        GpuLight {
            ambient: self.ambient.to_array(),
            diffuse: self.diffuse.to_array(),
            specular: self.specular.to_array(),
            position: self.position.extend(if positional { 1.0 } else { 0.0 }).to_array(),
            direction: self.direction.normalize_or_zero().extend(self.range).to_array(),
            attenuation: [
                self.constant_attenuation,
                self.linear_attenuation,
                self.quadratic_attenuation,
                1.0,
            ],
            spot: [
                (self.spot_theta * 0.5).cos(),
                (self.spot_phi * 0.5).cos(),
                self.spot_falloff,
                if spot { 1.0 } else { 0.0 },
            ],
        }
    }
}

// ── material ──────────────────────────────────────────────────────────────

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Material {
    pub ambient: Color,
    pub diffuse: Color,
    pub specular: Color,
    pub emissive: Color,
    /// Specular exponent.
    pub power: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            ambient: Color::white(),
            diffuse: Color::white(),
            specular: Color::argb(1.0, 0.2, 0.2, 0.2),
            emissive: Color::black(),
            power: 1.0,
        }
    }
}

impl Material {
    /// A material whose ambient and diffuse response is `color`.
    pub fn colored(color: Color) -> Self {
        Self {
            ambient: color,
            diffuse: color,
            ..Self::default()
        }
    }

    /// Writes the material into already-packed uniforms.
    pub(crate) fn apply(&self, u: &mut SceneUniforms) {
        u.material_ambient = self.ambient.to_array();
        u.material_diffuse = self.diffuse.to_array();
        u.material_specular = self.specular.to_array();
        u.material_emissive = self.emissive.to_array();
        u.material_params[0] = self.power;
    }
}

// ── render state ──────────────────────────────────────────────────────────

/// Everything that affects how geometry is shaded, except transforms.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderState {
    pub lighting: bool,
    pub ambient: Color,
    pub lights: [Option<Light>; MAX_LIGHTS],
    pub material: Material,
    pub fog: Option<Fog>,
    pub pipeline: PipelineState,
    pub clear_color: Color,
}

impl Default for RenderState {
    fn default() -> Self {
        Self {
            lighting: false,
            ambient: Color::black(),
            lights: [None; MAX_LIGHTS],
            material: Material::default(),
            fog: None,
            pipeline: PipelineState {
                blend: BlendMode::Alpha,
                ..PipelineState::default()
            },
            clear_color: Color::black(),
        }
    }
}

impl RenderState {
    /// Packs the state and transforms for the shader.
    ///
    /// `projection` must already be in the device's clip convention.
    pub fn uniforms(&self, world: Mat4, view: Mat4, projection: Mat4, textured: bool) -> SceneUniforms {
        let mut u = SceneUniforms {
            world: world.to_cols_array_2d(),
            view: view.to_cols_array_2d(),
            projection: projection.to_cols_array_2d(),
            ambient: self.ambient.to_array(),
            material_params: [
                0.0,
                if self.lighting { 1.0 } else { 0.0 },
                if textured { 1.0 } else { 0.0 },
                0.0,
            ],
            ..SceneUniforms::default()
        };
        self.material.apply(&mut u);

        if let Some(fog) = self.fog {
            u.fog_color = fog.color.to_array();
            let mode = match fog.mode {
                FogMode::Linear => 1.0,
                FogMode::Exponential => 2.0,
                FogMode::ExponentialSquared => 3.0,
            };
            u.fog_params = [fog.density, fog.start, fog.end, mode];
        }

        if self.lighting {
            for (slot, light) in u.lights.iter_mut().zip(&self.lights) {
                if let Some(light) = light {
                    *slot = light.to_gpu();
                }
            }
        }
        u
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f32::consts::FRAC_PI_2;

    // ── light ─────────────────────────────────────────────────────────────

    #[test]
    fn narrow_cone_makes_spot_light() {
        let mut light = Light::default();
        assert_eq!(light.light_type(), LightType::Point);

        light.set_spot_cone(0.3, 1.0).unwrap();
        assert_eq!(light.light_type(), LightType::Spot);
        assert_eq!((light.spot_theta(), light.spot_phi()), (0.3, 1.0));
    }

    #[test]
    fn wide_cone_makes_point_light() {
        let mut light = Light::spot(Vec3::ZERO, Vec3::X, 0.2, 0.5).unwrap();
        light.set_spot_cone(1.0, PI).unwrap();
        assert_eq!(light.light_type(), LightType::Point);
        light.set_spot_cone(TAU, TAU).unwrap();
        assert_eq!(light.light_type(), LightType::Point);
    }

    #[test]
    fn invalid_cone_is_rejected_without_change() {
        let mut light = Light::spot(Vec3::ZERO, Vec3::X, 0.2, 0.5).unwrap();
        let before = light;

        assert!(light.set_spot_cone(0.6, 0.5).is_err());
        assert!(light.set_spot_cone(-0.1, 0.5).is_err());
        assert!(light.set_spot_cone(0.1, 7.0).is_err());
        assert!(light.set_spot_cone(f32::NAN, 0.5).is_err());
        assert_eq!(light, before);
    }

    #[test]
    fn gpu_light_encodes_type() {
        let dir = Light::directional(Vec3::new(0.0, 0.0, -2.0), Color::white()).to_gpu();
        assert_eq!(dir.position[3], 0.0);
        assert_relative_eq!(dir.direction[2], -1.0);

        let spot = Light::spot(Vec3::ONE, Vec3::X, 0.0, FRAC_PI_2).unwrap().to_gpu();
        assert_eq!(spot.position[3], 1.0);
        assert_eq!(spot.spot[3], 1.0);
        assert_relative_eq!(spot.spot[1], (FRAC_PI_2 * 0.5).cos());
    }

    // ── defaults ──────────────────────────────────────────────────────────

    #[test]
    fn fog_defaults() {
        let fog = Fog::default();
        assert_eq!(fog.color, Color::white());
        assert_eq!(fog.density, 0.01);
        assert_eq!(fog.mode, FogMode::Exponential);
        assert_eq!((fog.start, fog.end), (10.0, 1000.0));
    }

    #[test]
    fn material_defaults() {
        let m = Material::default();
        assert_eq!(m.diffuse, Color::white());
        assert_eq!(m.specular, Color::rgba(0.2, 0.2, 0.2, 1.0));
        assert_eq!(m.emissive, Color::black());
        assert_eq!(m.power, 1.0);
    }

    // ── uniforms ──────────────────────────────────────────────────────────

    #[test]
    fn lights_are_packed_only_when_lighting_is_on() {
        let mut state = RenderState::default();
        state.lights[2] = Some(Light::point(Vec3::ONE, Color::white()));

        let off = state.uniforms(Mat4::IDENTITY, Mat4::IDENTITY, Mat4::IDENTITY, false);
        assert!(!off.lighting_enabled());
        assert_eq!(off.lights[2].attenuation[3], 0.0);

        state.lighting = true;
        let on = state.uniforms(Mat4::IDENTITY, Mat4::IDENTITY, Mat4::IDENTITY, true);
        assert!(on.lighting_enabled());
        assert!(on.textured());
        assert_eq!(on.lights[2].attenuation[3], 1.0);
        assert_eq!(on.lights[0].attenuation[3], 0.0);
    }

    #[test]
    fn fog_mode_is_encoded() {
        let mut state = RenderState::default();
        let none = state.uniforms(Mat4::IDENTITY, Mat4::IDENTITY, Mat4::IDENTITY, false);
        assert_eq!(none.fog_params[3], 0.0);

        state.fog = Some(Fog {
            mode: FogMode::Linear,
            ..Fog::default()
        });
        let linear = state.uniforms(Mat4::IDENTITY, Mat4::IDENTITY, Mat4::IDENTITY, false);
        assert_eq!(linear.fog_params, [0.01, 10.0, 1000.0, 1.0]);
    }
}
