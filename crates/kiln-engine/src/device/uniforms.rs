//! Plain-old-data types shared by the CPU side and `shaders/scene.wgsl`.

use bytemuck::{Pod, Zeroable};

/// Number of hardware light slots.
pub const MAX_LIGHTS: usize = 8;

// ── vertex ────────────────────────────────────────────────────────────────

#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Pod, Zeroable)]
pub struct GpuVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub color: [f32; 4],
    pub uv: [f32; 2],
}

impl GpuVertex {
    const ATTRS: [wgpu::VertexAttribute; 4] = wgpu::vertex_attr_array![
        0 => Float32x3,
        1 => Float32x3,
        2 => Float32x4,
        3 => Float32x2,
    ];

    pub(crate) fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<GpuVertex>() as u64,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRS,
        }
    }
}

// ── light ─────────────────────────────────────────────────────────────────

#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Pod, Zeroable)]
pub struct GpuLight {
    pub ambient: [f32; 4],
    pub diffuse: [f32; 4],
    pub specular: [f32; 4],
    /// `w`: 0 for directional lights, 1 for positional ones.
    pub position: [f32; 4],
    /// `w`: range.
    pub direction: [f32; 4],
    /// constant, linear, quadratic, enabled.
    pub attenuation: [f32; 4],
    /// cos(inner/2), cos(outer/2), falloff, is-spot.
    pub spot: [f32; 4],
}

// ── scene ─────────────────────────────────────────────────────────────────

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct SceneUniforms {
    pub world: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    /// Already in the device's clip convention (depth in `[0, 1]`).
    pub projection: [[f32; 4]; 4],
    pub ambient: [f32; 4],
    pub material_ambient: [f32; 4],
    pub material_diffuse: [f32; 4],
    pub material_specular: [f32; 4],
    pub material_emissive: [f32; 4],
    /// power, lighting enabled, textured, unused.
    pub material_params: [f32; 4],
    pub fog_color: [f32; 4],
    /// density, start, end, mode (0 off, 1 linear, 2 exp, 3 exp2).
    pub fog_params: [f32; 4],
    pub lights: [GpuLight; MAX_LIGHTS],
}

impl Default for SceneUniforms {
    fn default() -> Self {
        let identity = glam::Mat4::IDENTITY.to_cols_array_2d();
        Self {
            world: identity,
            view: identity,
            projection: identity,
            material_diffuse: [1.0; 4],
            material_ambient: [1.0; 4],
            material_params: [1.0, 0.0, 0.0, 0.0],
            ..Zeroable::zeroed()
        }
    }
}

impl SceneUniforms {
    #[inline]
    pub fn lighting_enabled(&self) -> bool {
        self.material_params[1] != 0.0
    }

    #[inline]
    pub fn textured(&self) -> bool {
        self.material_params[2] != 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_layout_matches_shader() {
        // 3 matrices, 8 vec4 fields, 8 lights of 7 vec4 each.
        assert_eq!(std::mem::size_of::<GpuLight>(), 7 * 16);
        assert_eq!(std::mem::size_of::<SceneUniforms>(), 3 * 64 + 8 * 16 + MAX_LIGHTS * 7 * 16);
        assert_eq!(std::mem::size_of::<SceneUniforms>() % 16, 0);
    }

    #[test]
    fn vertex_stride() {
        assert_eq!(std::mem::size_of::<GpuVertex>(), 48);
    }
}
