use std::cell::RefCell;
use std::rc::Rc;

use anyhow::{Context, Result};
use glam::{Quat, Vec2, Vec3};
use image::{Rgba, RgbaImage};
use winit::event::{ElementState, WindowEvent};
use winit::keyboard::{KeyCode, PhysicalKey};

use kiln_engine::camera::Camera;
use kiln_engine::coords::{Color, Rect};
use kiln_engine::core::{AppControl, Game};
use kiln_engine::logging::{init_logging, LoggingConfig};
use kiln_engine::registry;
use kiln_engine::resources::{Colors, Fonts, ImageTexture, Justify, Textures, VertexBuffer, VertexBuffers};
use kiln_engine::time::FrameTime;
use kiln_engine::video::{Fog, FogMode, Light, Material, Quad, Vertex, Video};
use kiln_engine::window::{Runtime, RuntimeConfig};

const CHECKER: &str = "demo/checker";
const HUD_FONT: &str = "hud";

/// A lit, fogged, textured crate circling in front of the camera, with a 2D
/// overlay on top.
struct Showcase {
    camera: Camera,
    spin: f32,
    fog: bool,
    tunnel: bool,
    cube: Rc<RefCell<VertexBuffer>>,
    textures: Rc<RefCell<Textures>>,
    fonts: Rc<RefCell<Fonts>>,
    background: Color,
    frames: u64,
}

impl Showcase {
    fn new(video: &mut Video) -> Result<Self> {
        let textures = registry::get::<Textures>().context("textures unavailable")?;
        textures
            .borrow_mut()
            .give(CHECKER, ImageTexture::new(CHECKER, checkerboard(64, 8), true), true, video);

        let buffers = registry::get::<VertexBuffers>()?;
        let cube = buffers.borrow_mut().create("demo/cube");
        for face in cube_faces(1.0) {
            cube.borrow_mut().give_quad(&face, Some(CHECKER));
        }

        // Optional manifests: the demo runs without a config directory.
        let background = registry::get::<Colors>()
            .context("colors unavailable")?
            .borrow_mut()
            .get("background")
            .unwrap_or(Color::rgba(0.1, 0.12, 0.18, 1.0));

        let mut camera = Camera::new(Vec3::new(-4.0, 0.0, 1.0), Quat::IDENTITY, 0.1, 100.0, 60f32.to_radians());
        camera.look_at(Vec3::ZERO, Vec3::Z);

        Ok(Self {
            camera,
            spin: 0.0,
            fog: true,
            tunnel: false,
            cube,
            textures,
            fonts: registry::get::<Fonts>().context("fonts unavailable")?,
            background,
            frames: 0,
        })
    }

    fn render_scene(&mut self, video: &mut Video) -> Result<()> {
        video.set_3d(&self.camera);
        video.set_lighting(true);
        video.set_ambient_lighting(Color::rgba(0.25, 0.25, 0.25, 1.0));
        video.set_light(0, Light::directional(Vec3::new(1.0, 0.5, -1.0), Color::white()))?;
        video.set_fog(self.fog.then_some(Fog {
            color: self.background,
            mode: FogMode::Linear,
            start: 3.0,
            end: 8.0,
            ..Fog::default()
        }));
        video.set_material(Material::default());

        video.push_world();
        video.rotate_scene(Quat::from_rotation_z(self.spin));
        let drawn = self.cube.borrow_mut().render(video, &mut self.textures.borrow_mut());
        video.pop_world()?;
        drawn?;
        Ok(())
    }

    fn render_overlay(&mut self, video: &mut Video) -> Result<()> {
        video.set_lighting(false);
        video.set_fog(None);
        video.set_2d_view(Rect::from_size(800.0, 600.0), true);
        video.unbind_texture();

        let shade = Color::rgba(0.0, 0.0, 0.0, 0.5);
        video.render(&Quad::new([
            Vertex::at_2d(0.0, 0.0, shade),
            Vertex::at_2d(0.0, 40.0, shade),
            Vertex::at_2d(800.0, 40.0, shade),
            Vertex::at_2d(800.0, 0.0, shade),
        ]))?;

        let status = format!(
            "{}  fog {} [F]  tunnel {} [T]  frame {}",
            video.api(),
            if self.fog { "on" } else { "off" },
            if self.tunnel { "on" } else { "off" },
            self.frames
        );
        self.fonts.borrow_mut().render_text(
            HUD_FONT,
            video,
            &status,
            Vec2::new(400.0, 8.0),
            Color::white(),
            Justify::Center,
        )?;
        Ok(())
    }
}

impl Game for Showcase {
    fn on_window_event(&mut self, event: &WindowEvent, _video: &mut Video) -> AppControl {
        if let WindowEvent::KeyboardInput { event, .. } = event {
            if event.state == ElementState::Pressed && !event.repeat {
                match event.physical_key {
                    PhysicalKey::Code(KeyCode::KeyF) => self.fog = !self.fog,
                    PhysicalKey::Code(KeyCode::KeyT) => {
                        self.tunnel = !self.tunnel;
                        self.camera
                            .set_tunnel_vision_factor(if self.tunnel { 0.25 } else { 1.0 });
                    }
                    _ => {}
                }
            }
        }
        AppControl::Continue
    }

    fn perform_logic(&mut self, time: FrameTime) -> AppControl {
        self.spin = (self.spin + time.dt * 0.8) % std::f32::consts::TAU;
        self.frames = time.frame_index;
        AppControl::Continue
    }

    fn render(&mut self, video: &mut Video) -> Result<()> {
        video.set_clear_color(self.background);
        self.render_scene(video)?;
        self.render_overlay(video)
    }
}

fn checkerboard(size: u32, cells: u32) -> RgbaImage {
    let cell = (size / cells).max(1);
    RgbaImage::from_fn(size, size, |x, y| {
        if (x / cell + y / cell) % 2 == 0 {
            Rgba([230, 180, 90, 255])
        } else {
            Rgba([120, 70, 30, 255])
        }
    })
}

/// Six outward-facing quads of a cube centered on the origin.
fn cube_faces(half: f32) -> Vec<Quad> {
    let uv = [Vec2::new(0.0, 0.0), Vec2::new(0.0, 1.0), Vec2::new(1.0, 1.0), Vec2::new(1.0, 0.0)];
    let axes = [Vec3::X, Vec3::NEG_X, Vec3::Y, Vec3::NEG_Y, Vec3::Z, Vec3::NEG_Z];

    axes.iter()
        .map(|&normal| {
            let (u, v) = normal.any_orthonormal_pair();
            let center = normal * half;
            let corners = [
                center - u * half - v * half,
                center - u * half + v * half,
                center + u * half + v * half,
                center + u * half - v * half,
            ];
            Quad::new(std::array::from_fn(|i| {
                Vertex::textured(corners[i], uv[i]).with_normal(normal)
            }))
        })
        .collect()
}

fn main() -> Result<()> {
    init_logging(LoggingConfig::default());

    let config = RuntimeConfig {
        title: "kiln demo".to_string(),
        ..RuntimeConfig::default()
    };
    Runtime::run(config, Showcase::new)
}
