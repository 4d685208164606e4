use std::collections::HashMap;

use glam::{UVec2, Vec2};
use image::{Rgba, RgbaImage};

use crate::coords::Color;
use crate::database::LoadError;
use crate::device::{SamplerState, TextureHandle, Topology};
use crate::video::{RenderBackend, Renderable, Vertex, Video, VideoError};

const GLYPH_PADDING: u32 = 1;
const ATLAS_WIDTH: u32 = 512;
/// Rasterization is capped here regardless of window size.
const MAX_RASTER_PX: f32 = 256.0;

/// The printable ASCII range every font atlas carries.
pub const GLYPHS: std::ops::RangeInclusive<char> = ' '..='~';

/// Horizontal alignment of text relative to its anchor point.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub enum Justify {
    #[default]
    Left,
    Center,
    Right,
}

/// The coordinate space a font's height is expressed in.
///
/// A font `height` units tall in a virtual screen `height` units high covers
/// the same fraction of the window at any resolution.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct VirtualScreen {
    pub width: Option<f32>,
    pub height: Option<f32>,
}

impl VirtualScreen {
    /// Height of the virtual screen for a given window.
    ///
    /// With both dimensions given, the one that maps to the larger height
    /// wins. With neither, the virtual screen is the window itself.
    pub fn resolve_height(&self, window: UVec2) -> f32 {
        let (w, h) = (window.x as f32, window.y as f32);
        let from_width = |vw: f32| if w > 0.0 { vw / w * h } else { vw };
        match (self.width, self.height) {
            (None, None) => h,
            (Some(vw), None) => from_width(vw),
            (None, Some(vh)) => vh,
            (Some(vw), Some(vh)) => {
                if w > 0.0 && h > 0.0 && vw / w > vh / h {
                    from_width(vw)
                } else {
                    vh
                }
            }
        }
    }
}

/// Coverage bitmap of one rasterized glyph.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterGlyph {
    pub ch: char,
    pub width: u32,
    pub height: u32,
    /// Left edge relative to the pen.
    pub xmin: i32,
    /// Bottom edge relative to the baseline, positive up.
    pub ymin: i32,
    pub advance: f32,
    pub coverage: Vec<u8>,
}

#[derive(Debug, Copy, Clone, PartialEq)]
struct Cell {
    uv_min: Vec2,
    uv_max: Vec2,
    /// Top-left corner relative to the pen on the line's top edge, pixels.
    offset: Vec2,
    size: Vec2,
    advance: f32,
}

/// Rasterized glyphs packed row by row into one white-on-transparent image.
#[derive(Debug, Clone)]
pub struct GlyphAtlas {
    image: RgbaImage,
    cells: HashMap<char, Cell>,
    ascent: f32,
    line_height: f32,
}

impl GlyphAtlas {
    /// Packs `glyphs` for a face whose lines are `line_height` pixels apart
    /// with the baseline `ascent` pixels below the top.
    pub fn pack(glyphs: &[RasterGlyph], ascent: f32, line_height: f32) -> Self {
        let width = glyphs
            .iter()
            .map(|g| g.width + 2 * GLYPH_PADDING)
            .fold(ATLAS_WIDTH, u32::max);

        let mut placed = Vec::with_capacity(glyphs.len());
        let (mut x, mut y, mut row) = (GLYPH_PADDING, GLYPH_PADDING, 0);
        for glyph in glyphs {
            if glyph.width == 0 || glyph.height == 0 {
                placed.push((glyph, 0, 0));
                continue;
            }
            if x + glyph.width + GLYPH_PADDING > width {
                y += row + GLYPH_PADDING;
                x = GLYPH_PADDING;
                row = 0;
            }
            placed.push((glyph, x, y));
            x += glyph.width + GLYPH_PADDING;
            row = row.max(glyph.height);
        }
        let height = (y + row + GLYPH_PADDING).max(1);

        let mut image = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 0]));
        let mut cells = HashMap::with_capacity(glyphs.len());
        let (fw, fh) = (width as f32, height as f32);
        for (glyph, gx, gy) in placed {
            for (i, &alpha) in glyph.coverage.iter().enumerate() {
                let (px, py) = (i as u32 % glyph.width.max(1), i as u32 / glyph.width.max(1));
                if px < glyph.width && py < glyph.height {
                    image.put_pixel(gx + px, gy + py, Rgba([255, 255, 255, alpha]));
                }
            }
            let size = Vec2::new(glyph.width as f32, glyph.height as f32);
            cells.insert(
                glyph.ch,
                Cell {
                    uv_min: Vec2::new(gx as f32 / fw, gy as f32 / fh),
                    uv_max: Vec2::new((gx + glyph.width) as f32 / fw, (gy + glyph.height) as f32 / fh),
                    offset: Vec2::new(glyph.xmin as f32, ascent - (glyph.ymin as f32 + size.y)),
                    size,
                    advance: glyph.advance,
                },
            );
        }

        Self {
            image,
            cells,
            ascent,
            line_height,
        }
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn contains(&self, ch: char) -> bool {
        self.cells.contains_key(&ch)
    }

    pub fn ascent(&self) -> f32 {
        self.ascent
    }

    pub fn line_height(&self) -> f32 {
        self.line_height
    }

    /// Glyphs outside the atlas are drawn as `?`.
    fn cell(&self, ch: char) -> Option<&Cell> {
        self.cells.get(&ch).or_else(|| self.cells.get(&'?'))
    }

    /// Width of one line in pixels.
    pub fn line_width(&self, line: &str) -> f32 {
        line.chars().filter_map(|c| self.cell(c)).map(|c| c.advance).sum()
    }

    /// Triangles for `text`, in units of `scale` per pixel, anchored at
    /// `origin` (top of the first line). Lines are `line_step` units apart.
    pub fn layout(&self, text: &str, origin: Vec2, scale: f32, line_step: f32, color: Color, justify: Justify) -> Vec<Vertex> {
        let mut vertices = Vec::new();
        for (row, line) in text.split('\n').enumerate() {
            let width = self.line_width(line) * scale;
            let mut pen = Vec2::new(
                match justify {
                    Justify::Left => origin.x,
                    Justify::Center => origin.x - width / 2.0,
                    Justify::Right => origin.x - width,
                },
                origin.y + row as f32 * line_step,
            );

            for cell in line.chars().filter_map(|c| self.cell(c)) {
                if cell.size.x > 0.0 && cell.size.y > 0.0 {
                    let min = pen + cell.offset * scale;
                    let max = min + cell.size * scale;
                    let corner = |x: f32, y: f32, u: f32, v: f32| {
                        Vertex::at_2d(x, y, color).with_uv(Vec2::new(u, v))
                    };
                    let a = corner(min.x, min.y, cell.uv_min.x, cell.uv_min.y);
                    let b = corner(min.x, max.y, cell.uv_min.x, cell.uv_max.y);
                    let c = corner(max.x, max.y, cell.uv_max.x, cell.uv_max.y);
                    let d = corner(max.x, min.y, cell.uv_max.x, cell.uv_min.y);
                    vertices.extend([a, b, c, a, c, d]);
                }
                pen.x += cell.advance * scale;
            }
        }
        vertices
    }
}

/// Triangles of one text draw.
struct TextMesh(Vec<Vertex>);

impl Renderable for TextMesh {
    fn topology(&self) -> Topology {
        Topology::Triangles
    }

    fn vertices(&self) -> Vec<Vertex> {
        self.0.clone()
    }
}

/// A TrueType face rasterized for one window size.
///
/// The atlas is rebuilt whenever the window it was rasterized for changes,
/// so glyphs stay pixel-sharp at any resolution.
pub struct Font {
    name: String,
    face: fontdue::Font,
    height: f32,
    virtual_screen: VirtualScreen,
    window: UVec2,
    atlas: GlyphAtlas,
    handle: Option<TextureHandle>,
}

impl std::fmt::Debug for Font {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Font")
            .field("name", &self.name)
            .field("height", &self.height)
            .field("window", &self.window)
            .field("realized", &self.handle.is_some())
            .finish()
    }
}

impl Font {
    /// Parses a TrueType or OpenType face and rasterizes it for `window`.
    ///
    /// `height` is in virtual-screen units.
    pub fn from_bytes(
        name: impl Into<String>,
        bytes: &[u8],
        height: f32,
        virtual_screen: VirtualScreen,
        window: UVec2,
    ) -> Result<Self, LoadError> {
        let name = name.into();
        if !(height.is_finite() && height > 0.0) {
            return Err(format!("{name}: font height must be positive, got {height}").into());
        }
        let face = fontdue::Font::from_bytes(bytes, fontdue::FontSettings::default())
            .map_err(|e| format!("{name}: {e}"))?;

        let mut font = Self {
            name,
            face,
            height,
            virtual_screen,
            window,
            atlas: GlyphAtlas::pack(&[], 0.0, 0.0),
            handle: None,
        };
        font.atlas = font.rasterize(window);
        Ok(font)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Line height in virtual-screen units.
    pub fn text_height(&self) -> f32 {
        self.height
    }

    /// Width of the widest line of `text` in virtual-screen units.
    pub fn text_width(&self, text: &str) -> f32 {
        let scale = self.units_per_pixel();
        text.split('\n')
            .map(|line| self.atlas.line_width(line) * scale)
            .fold(0.0, f32::max)
    }

    pub fn virtual_screen_height(&self) -> f32 {
        self.virtual_screen.resolve_height(self.window)
    }

    /// The window size the atlas was rasterized for.
    pub fn window(&self) -> UVec2 {
        self.window
    }

    pub fn atlas(&self) -> &GlyphAtlas {
        &self.atlas
    }

    pub fn is_realized(&self) -> bool {
        self.handle.is_some()
    }

    fn pixel_height(&self, window: UVec2) -> f32 {
        let vsh = self.virtual_screen.resolve_height(window);
        if window.y == 0 || vsh <= 0.0 {
            return self.height.min(MAX_RASTER_PX);
        }
        (self.height * window.y as f32 / vsh).clamp(1.0, MAX_RASTER_PX)
    }

    fn units_per_pixel(&self) -> f32 {
        self.height / self.pixel_height(self.window)
    }

    fn rasterize(&self, window: UVec2) -> GlyphAtlas {
        let px = self.pixel_height(window);
        let glyphs: Vec<RasterGlyph> = GLYPHS
            .map(|ch| {
                let (metrics, coverage) = self.face.rasterize(ch, px);
                RasterGlyph {
                    ch,
                    width: metrics.width as u32,
                    height: metrics.height as u32,
                    xmin: metrics.xmin,
                    ymin: metrics.ymin,
                    advance: metrics.advance_width,
                    coverage,
                }
            })
            .collect();
        let ascent = self
            .face
            .horizontal_line_metrics(px)
            .map_or(px, |m| m.ascent);
        log::debug!("font {:?}: rasterized at {px:.1}px", self.name);
        GlyphAtlas::pack(&glyphs, ascent, px)
    }

    /// Rebuilds the atlas for a new window size. Any upload is released.
    pub fn rerasterize(&mut self, window: UVec2, backend: &mut dyn RenderBackend) {
        self.release(backend);
        self.window = window;
        self.atlas = self.rasterize(window);
    }

    pub fn realize(&mut self, backend: &mut dyn RenderBackend) -> Result<TextureHandle, VideoError> {
        if let Some(handle) = self.handle {
            return Ok(handle);
        }
        let handle = backend.create_texture(&format!("font {}", self.name), self.atlas.image(), false)?;
        self.handle = Some(handle);
        Ok(handle)
    }

    pub fn release(&mut self, backend: &mut dyn RenderBackend) {
        if let Some(handle) = self.handle.take() {
            backend.destroy_texture(handle);
        }
    }

    /// Draws `text` with its anchor at `position`, in the current 2D view.
    ///
    /// A failed atlas upload skips the draw with a warning.
    pub fn render_text(
        &mut self,
        video: &mut Video,
        text: &str,
        position: Vec2,
        color: Color,
        justify: Justify,
    ) -> Result<(), VideoError> {
        if !video.is_rendering() {
            log::warn!("text drawn outside a frame");
            return Err(VideoError::NotRendering);
        }
        let window = video.window_size();
        if window != self.window && window.y > 0 {
            self.rerasterize(window, video.backend_mut());
        }
        let handle = match self.realize(video.backend_mut()) {
            Ok(handle) => handle,
            Err(e) => {
                log::warn!("font {:?} skipped: {e}", self.name);
                return Ok(());
            }
        };

        let mesh = TextMesh(self.atlas.layout(
            text,
            position,
            self.units_per_pixel(),
            self.height,
            color,
            justify,
        ));
        video.bind_texture(Some((
            handle,
            SamplerState {
                bilinear: true,
                mipmapping: false,
                anisotropy: 1,
                repeat: false,
            },
        )));
        let result = video.render(&mesh);
        video.unbind_texture();
        result
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn glyph(ch: char, width: u32, height: u32, advance: f32) -> RasterGlyph {
        RasterGlyph {
            ch,
            width,
            height,
            xmin: 0,
            ymin: 0,
            advance,
            coverage: vec![200; (width * height) as usize],
        }
    }

    fn atlas() -> GlyphAtlas {
        GlyphAtlas::pack(
            &[glyph(' ', 0, 0, 4.0), glyph('A', 6, 10, 8.0), glyph('?', 5, 10, 6.0)],
            10.0,
            12.0,
        )
    }

    // ── virtual screen ────────────────────────────────────────────────────

    #[test]
    fn virtual_screen_defaults_to_window() {
        let vs = VirtualScreen::default();
        assert_relative_eq!(vs.resolve_height(UVec2::new(800, 600)), 600.0);
    }

    #[test]
    fn width_only_scales_by_window_aspect() {
        let vs = VirtualScreen {
            width: Some(400.0),
            height: None,
        };
        assert_relative_eq!(vs.resolve_height(UVec2::new(800, 600)), 300.0);
    }

    #[test]
    fn height_only_is_taken_as_is() {
        let vs = VirtualScreen {
            width: None,
            height: Some(480.0),
        };
        assert_relative_eq!(vs.resolve_height(UVec2::new(1920, 1080)), 480.0);
    }

    #[test]
    fn both_given_keeps_the_larger_height() {
        let wide = VirtualScreen {
            width: Some(1600.0),
            height: Some(600.0),
        };
        // 1600/800 > 600/600: width wins, 2 * 600.
        assert_relative_eq!(wide.resolve_height(UVec2::new(800, 600)), 1200.0);

        let tall = VirtualScreen {
            width: Some(800.0),
            height: Some(900.0),
        };
        assert_relative_eq!(tall.resolve_height(UVec2::new(800, 600)), 900.0);
    }

    // ── atlas ─────────────────────────────────────────────────────────────

    #[test]
    fn atlas_holds_every_glyph_with_padding() {
        let atlas = atlas();
        assert!(atlas.contains('A') && atlas.contains(' '));
        assert_eq!(atlas.image().width(), ATLAS_WIDTH);
        assert_eq!(atlas.image().height(), 10 + 2 * GLYPH_PADDING);
        assert_eq!(atlas.image().get_pixel(GLYPH_PADDING, GLYPH_PADDING).0, [255, 255, 255, 200]);
        assert_eq!(atlas.image().get_pixel(0, 0).0[3], 0);
    }

    #[test]
    fn rows_wrap_at_atlas_width() {
        let wide: Vec<RasterGlyph> = ('a'..='e').map(|c| glyph(c, 200, 4, 200.0)).collect();
        let atlas = GlyphAtlas::pack(&wide, 4.0, 4.0);
        // Two glyphs per 512 px row: three rows.
        assert_eq!(atlas.image().height(), 3 * (4 + GLYPH_PADDING) + GLYPH_PADDING);
    }

    #[test]
    fn oversized_glyph_widens_atlas() {
        let atlas = GlyphAtlas::pack(&[glyph('W', 600, 2, 600.0)], 2.0, 2.0);
        assert_eq!(atlas.image().width(), 600 + 2 * GLYPH_PADDING);
    }

    #[test]
    fn unknown_characters_fall_back_to_question_mark() {
        let atlas = atlas();
        assert_relative_eq!(atlas.line_width("A\u{e9}"), 8.0 + 6.0);
    }

    // ── layout ────────────────────────────────────────────────────────────

    #[test]
    fn spaces_advance_without_geometry() {
        let v = atlas().layout("A A", Vec2::ZERO, 1.0, 12.0, Color::white(), Justify::Left);
        assert_eq!(v.len(), 12);
        assert_relative_eq!(v[6].position.x, 12.0);
    }

    #[test]
    fn glyph_sits_on_the_baseline() {
        let v = atlas().layout("A", Vec2::new(5.0, 20.0), 1.0, 12.0, Color::white(), Justify::Left);
        // ascent 10, glyph 10 tall with ymin 0: top edge on the line top.
        assert_relative_eq!(v[0].position.y, 20.0);
        assert_relative_eq!(v[1].position.y, 30.0);
        assert_relative_eq!(v[0].position.x, 5.0);
    }

    #[test]
    fn justification_moves_the_line() {
        let atlas = atlas();
        let x = |justify| atlas.layout("AA", Vec2::new(100.0, 0.0), 0.5, 6.0, Color::white(), justify)[0].position.x;
        assert_relative_eq!(x(Justify::Left), 100.0);
        assert_relative_eq!(x(Justify::Center), 96.0);
        assert_relative_eq!(x(Justify::Right), 92.0);
    }

    #[test]
    fn newlines_step_down_by_line_step() {
        let v = atlas().layout("A\nA", Vec2::ZERO, 1.0, 15.0, Color::white(), Justify::Left);
        assert_eq!(v.len(), 12);
        assert_relative_eq!(v[6].position.y, 15.0);
        assert_relative_eq!(v[6].position.x, 0.0);
    }

    #[test]
    fn uvs_address_the_glyph_cell() {
        let atlas = atlas();
        let v = atlas.layout("A", Vec2::ZERO, 1.0, 12.0, Color::white(), Justify::Left);
        let (w, h) = (atlas.image().width() as f32, atlas.image().height() as f32);
        assert_relative_eq!(v[0].uv.x, GLYPH_PADDING as f32 / w);
        assert_relative_eq!(v[2].uv.y, (GLYPH_PADDING + 10) as f32 / h);
    }

    // ── faces ─────────────────────────────────────────────────────────────

    #[test]
    fn garbage_bytes_are_rejected() {
        let err = Font::from_bytes("junk", b"not a font", 12.0, VirtualScreen::default(), UVec2::new(800, 600))
            .unwrap_err();
        assert!(err.to_string().starts_with("junk"));
    }

    #[test]
    fn non_positive_height_is_rejected() {
        assert!(Font::from_bytes("zero", &[], 0.0, VirtualScreen::default(), UVec2::new(800, 600)).is_err());
    }
}
