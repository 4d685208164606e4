use glam::{Vec2, Vec3};

use crate::coords::Color;
use crate::device::{GpuVertex, Topology};

use super::state::Material;

/// A vertex as the application describes it.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub color: Color,
    pub uv: Vec2,
}

impl Default for Vertex {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            normal: Vec3::Z,
            color: Color::white(),
            uv: Vec2::ZERO,
        }
    }
}

impl Vertex {
    pub fn new(position: Vec3, color: Color) -> Self {
        Self {
            position,
            color,
            ..Self::default()
        }
    }

    /// A vertex in a 2D view (z = 0).
    pub fn at_2d(x: f32, y: f32, color: Color) -> Self {
        Self::new(Vec3::new(x, y, 0.0), color)
    }

    pub fn textured(position: Vec3, uv: Vec2) -> Self {
        Self {
            position,
            uv,
            ..Self::default()
        }
    }

    pub fn with_normal(mut self, normal: Vec3) -> Self {
        self.normal = normal;
        self
    }

    pub fn with_uv(mut self, uv: Vec2) -> Self {
        self.uv = uv;
        self
    }

    pub fn with_color(mut self, color: Color) -> Self {
        self.color = color;
        self
    }

    pub fn to_gpu(self) -> GpuVertex {
        GpuVertex {
            position: self.position.to_array(),
            normal: self.normal.to_array(),
            color: self.color.to_array(),
            uv: self.uv.to_array(),
        }
    }
}

/// Anything [`Video::render`](super::Video::render) can draw in one call.
pub trait Renderable {
    fn topology(&self) -> Topology;

    /// Vertices in draw order, already expanded for `topology`.
    fn vertices(&self) -> Vec<Vertex>;

    /// Material used instead of the active one for this draw.
    fn material(&self) -> Option<&Material> {
        None
    }
}

/// A point, line or convex polygon with `N` corners.
///
/// Polygons are drawn as a triangle fan around the first corner, so a quad
/// `[a, b, c, d]` becomes the triangles `abc` and `acd`.
#[derive(Debug, Clone, PartialEq)]
pub struct Shape<const N: usize> {
    pub corners: [Vertex; N],
    pub material: Option<Material>,
}

pub type Point = Shape<1>;
pub type Line = Shape<2>;
pub type Triangle = Shape<3>;
pub type Quad = Shape<4>;

impl<const N: usize> Shape<N> {
    pub fn new(corners: [Vertex; N]) -> Self {
        Self {
            corners,
            material: None,
        }
    }

    pub fn with_material(mut self, material: Material) -> Self {
        self.material = Some(material);
        self
    }
}

impl Quad {
    /// Axis-aligned textured quad spanning `min`..`max` in a 2D view.
    pub fn rect_2d(min: Vec2, max: Vec2, color: Color) -> Self {
        let corner = |x: f32, y: f32, u: f32, v: f32| {
            Vertex::at_2d(x, y, color).with_uv(Vec2::new(u, v))
        };
        Self::new([
            corner(min.x, min.y, 0.0, 0.0),
            corner(min.x, max.y, 0.0, 1.0),
            corner(max.x, max.y, 1.0, 1.0),
            corner(max.x, min.y, 1.0, 0.0),
        ])
    }
}

impl<const N: usize> Renderable for Shape<N> {
    fn topology(&self) -> Topology {
        match N {
            1 => Topology::Points,
            2 => Topology::Lines,
            _ => Topology::Triangles,
        }
    }

    fn vertices(&self) -> Vec<Vertex> {
        if N < 3 {
            return self.corners.to_vec();
        }
        (1..N.saturating_sub(1))
            .flat_map(|i| [self.corners[0], self.corners[i], self.corners[i + 1]])
            .collect()
    }

    fn material(&self) -> Option<&Material> {
        self.material.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(x: f32) -> Vertex {
        Vertex::at_2d(x, 0.0, Color::white())
    }

    #[test]
    fn topology_follows_corner_count() {
        assert_eq!(Point::new([v(0.0)]).topology(), Topology::Points);
        assert_eq!(Line::new([v(0.0), v(1.0)]).topology(), Topology::Lines);
        assert_eq!(Triangle::new([v(0.0), v(1.0), v(2.0)]).topology(), Topology::Triangles);
        assert_eq!(Quad::new([v(0.0), v(1.0), v(2.0), v(3.0)]).topology(), Topology::Triangles);
    }

    #[test]
    fn quad_expands_to_two_triangles() {
        let quad = Quad::new([v(0.0), v(1.0), v(2.0), v(3.0)]);
        let xs: Vec<f32> = quad.vertices().iter().map(|v| v.position.x).collect();
        assert_eq!(xs, vec![0.0, 1.0, 2.0, 0.0, 2.0, 3.0]);
    }

    #[test]
    fn points_and_lines_are_passed_through() {
        assert_eq!(Point::new([v(5.0)]).vertices().len(), 1);
        assert_eq!(Line::new([v(0.0), v(1.0)]).vertices().len(), 2);
    }

    #[test]
    fn material_override_is_reported() {
        let tri = Triangle::new([v(0.0), v(1.0), v(2.0)]);
        assert!(tri.material().is_none());
        let red = Material::colored(Color::rgba(1.0, 0.0, 0.0, 1.0));
        assert_eq!(tri.with_material(red).material(), Some(&red));
    }

    #[test]
    fn rect_uvs_cover_unit_square() {
        let quad = Quad::rect_2d(Vec2::ZERO, Vec2::new(10.0, 20.0), Color::white());
        assert_eq!(quad.corners[0].uv, Vec2::ZERO);
        assert_eq!(quad.corners[2].uv, Vec2::ONE);
        assert_eq!(quad.corners[2].position, Vec3::new(10.0, 20.0, 0.0));
    }

    #[test]
    fn gpu_vertex_carries_all_attributes() {
        let g = Vertex::new(Vec3::new(1.0, 2.0, 3.0), Color::rgba(0.5, 0.25, 0.0, 1.0))
            .with_uv(Vec2::new(0.5, 1.0))
            .to_gpu();
        assert_eq!(g.position, [1.0, 2.0, 3.0]);
        assert_eq!(g.normal, [0.0, 0.0, 1.0]);
        assert_eq!(g.color, [0.5, 0.25, 0.0, 1.0]);
        assert_eq!(g.uv, [0.5, 1.0]);
    }
}
