use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use glam::UVec2;

use crate::coords::{Color, PixelRect};

use super::contract::{
    BufferHandle, Device, DeviceError, DeviceInfo, DeviceParams, DeviceStats, DrawCall,
    FrameStatus, Geometry, MipLevel, PipelineState, TextureHandle, Topology,
};
use super::uniforms::{GpuVertex, SceneUniforms};

/// A texture as seen by the headless device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureRecord {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub mip_levels: usize,
}

/// One recorded draw of the current (or last) frame.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawRecord {
    pub topology: Topology,
    pub vertices: Vec<GpuVertex>,
    pub uniforms: SceneUniforms,
    pub texture: Option<TextureHandle>,
    pub pipeline: PipelineState,
    pub viewport: PixelRect,
}

#[derive(Debug)]
struct HeadlessState {
    session: Option<DeviceParams>,
    next_handle: u64,
    textures: HashMap<u64, TextureRecord>,
    buffers: HashMap<u64, Vec<GpuVertex>>,
    in_frame: bool,
    clear_color: Color,
    draws: Vec<DrawRecord>,
    stats: DeviceStats,
    open_attempts: Vec<DeviceParams>,

    supported_samples: Vec<u32>,
    max_texture_size: u32,
    texture_budget: Option<usize>,
    lose_on_next_frame: bool,
    failing_opens: u32,
}

impl Default for HeadlessState {
    fn default() -> Self {
        Self {
            session: None,
            next_handle: 1,
            textures: HashMap::new(),
            buffers: HashMap::new(),
            in_frame: false,
            clear_color: Color::black(),
            draws: Vec::new(),
            stats: DeviceStats::default(),
            open_attempts: Vec::new(),
            supported_samples: vec![1, 2, 4],
            max_texture_size: 8192,
            texture_budget: None,
            lose_on_next_frame: false,
            failing_opens: 0,
        }
    }
}

impl HeadlessState {
    fn handle(&mut self) -> u64 {
        let h = self.next_handle;
        self.next_handle += 1;
        h
    }

    fn refresh_counts(&mut self) {
        self.stats.live_textures = self.textures.len();
        self.stats.live_buffers = self.buffers.len();
    }
}

/// Device that keeps resources in memory and records draws instead of
/// rasterizing them.
///
/// Used for offscreen runs and tests. A [`HeadlessProbe`] obtained from
/// [`probe`](Self::probe) shares the device's state, so the device can be
/// boxed into a backend while tests keep inspecting it and injecting faults.
#[derive(Debug, Default)]
pub struct HeadlessDevice {
    state: Rc<RefCell<HeadlessState>>,
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn probe(&self) -> HeadlessProbe {
        HeadlessProbe {
            state: Rc::clone(&self.state),
        }
    }
}

impl Device for HeadlessDevice {
    fn open(&mut self, params: &DeviceParams) -> Result<DeviceInfo, DeviceError> {
        let mut s = self.state.borrow_mut();
        s.open_attempts.push(*params);

        if s.failing_opens > 0 {
            s.failing_opens -= 1;
            return Err(DeviceError::Unavailable("headless open failure injected".into()));
        }
        if !s.supported_samples.contains(&params.sample_count) {
            return Err(DeviceError::Unsupported(format!(
                "{} samples per pixel",
                params.sample_count
            )));
        }

        s.textures.clear();
        s.buffers.clear();
        s.session = Some(*params);
        s.stats.sessions_opened += 1;
        s.refresh_counts();
        log::debug!("headless: session opened at {}x{}", params.size.x, params.size.y);

        Ok(DeviceInfo {
            name: "headless".to_string(),
            max_texture_size: s.max_texture_size,
            max_anisotropy: 16,
        })
    }

    fn close(&mut self) {
        let mut s = self.state.borrow_mut();
        s.session = None;
        s.in_frame = false;
        s.textures.clear();
        s.buffers.clear();
        s.refresh_counts();
    }

    fn is_open(&self) -> bool {
        self.state.borrow().session.is_some()
    }

    fn resize(&mut self, size: UVec2) -> Result<(), DeviceError> {
        let mut s = self.state.borrow_mut();
        let session = s.session.as_mut().ok_or(DeviceError::NotOpen)?;
        session.size = size;
        Ok(())
    }

    fn create_texture(&mut self, label: &str, levels: &[MipLevel]) -> Result<TextureHandle, DeviceError> {
        let mut s = self.state.borrow_mut();
        if s.session.is_none() {
            return Err(DeviceError::NotOpen);
        }
        let Some(base) = levels.first() else {
            return Err(DeviceError::Unsupported("texture without pixel data".into()));
        };
        if base.width == 0 || base.height == 0 {
            return Err(DeviceError::Unsupported("empty texture".into()));
        }
        if base.width.max(base.height) > s.max_texture_size {
            return Err(DeviceError::Unsupported(format!(
                "{}x{} exceeds {}",
                base.width, base.height, s.max_texture_size
            )));
        }
        if levels
            .iter()
            .any(|l| l.rgba.len() != l.width as usize * l.height as usize * 4)
        {
            return Err(DeviceError::Unsupported("pixel data size mismatch".into()));
        }
        if s.texture_budget.is_some_and(|max| s.textures.len() >= max) {
            return Err(DeviceError::OutOfMemory);
        }

        let h = s.handle();
        s.textures.insert(
            h,
            TextureRecord {
                label: label.to_string(),
                width: base.width,
                height: base.height,
                mip_levels: levels.len(),
            },
        );
        s.refresh_counts();
        Ok(TextureHandle(h))
    }

    fn destroy_texture(&mut self, handle: TextureHandle) {
        let mut s = self.state.borrow_mut();
        s.textures.remove(&handle.0);
        s.refresh_counts();
    }

    fn create_buffer(&mut self, _label: &str, vertices: &[GpuVertex]) -> Result<BufferHandle, DeviceError> {
        let mut s = self.state.borrow_mut();
        if s.session.is_none() {
            return Err(DeviceError::NotOpen);
        }
        let h = s.handle();
        s.buffers.insert(h, vertices.to_vec());
        s.refresh_counts();
        Ok(BufferHandle(h))
    }

    fn destroy_buffer(&mut self, handle: BufferHandle) {
        let mut s = self.state.borrow_mut();
        s.buffers.remove(&handle.0);
        s.refresh_counts();
    }

    fn begin_frame(&mut self, clear: Color) -> FrameStatus {
        let mut s = self.state.borrow_mut();
        if s.session.is_none() || s.lose_on_next_frame {
            s.lose_on_next_frame = false;
            return FrameStatus::Lost;
        }
        if s.session.is_some_and(|p| p.size.x == 0 || p.size.y == 0) {
            return FrameStatus::Skipped;
        }
        s.in_frame = true;
        s.clear_color = clear;
        s.draws.clear();
        s.stats.frames += 1;
        FrameStatus::Ready
    }

    fn draw(&mut self, call: &DrawCall<'_>) {
        let mut s = self.state.borrow_mut();
        if !s.in_frame {
            log::warn!("headless: draw outside of a frame ignored");
            return;
        }
        let vertices = match call.geometry {
            Geometry::Immediate(v) => v.to_vec(),
            Geometry::Buffer { handle, first, count } => {
                let Some(buffer) = s.buffers.get(&handle.0) else {
                    log::warn!("headless: draw from unknown buffer {handle:?}");
                    return;
                };
                let start = (first as usize).min(buffer.len());
                let end = (start + count as usize).min(buffer.len());
                buffer[start..end].to_vec()
            }
        };
        if let Some((texture, _)) = call.texture {
            if !s.textures.contains_key(&texture.0) {
                log::warn!("headless: draw with unknown texture {texture:?}");
            }
        }

        s.stats.draw_calls += 1;
        s.draws.push(DrawRecord {
            topology: call.topology,
            vertices,
            uniforms: call.uniforms,
            texture: call.texture.map(|(t, _)| t),
            pipeline: call.pipeline,
            viewport: call.viewport,
        });
    }

    fn end_frame(&mut self) {
        self.state.borrow_mut().in_frame = false;
    }

    fn stats(&self) -> DeviceStats {
        self.state.borrow().stats
    }
}

/// Shared view into a [`HeadlessDevice`] for inspection and fault injection.
#[derive(Debug, Clone)]
pub struct HeadlessProbe {
    state: Rc<RefCell<HeadlessState>>,
}

impl HeadlessProbe {
    pub fn is_open(&self) -> bool {
        self.state.borrow().session.is_some()
    }

    /// Parameters of the open session.
    pub fn session(&self) -> Option<DeviceParams> {
        self.state.borrow().session
    }

    /// Every `open` request so far, including rejected ones.
    pub fn open_attempts(&self) -> Vec<DeviceParams> {
        self.state.borrow().open_attempts.clone()
    }

    pub fn texture(&self, handle: TextureHandle) -> Option<TextureRecord> {
        self.state.borrow().textures.get(&handle.0).cloned()
    }

    pub fn buffer(&self, handle: BufferHandle) -> Option<Vec<GpuVertex>> {
        self.state.borrow().buffers.get(&handle.0).cloned()
    }

    pub fn stats(&self) -> DeviceStats {
        self.state.borrow().stats
    }

    /// Draws of the current frame, or of the last one once it ended.
    pub fn draws(&self) -> Vec<DrawRecord> {
        self.state.borrow().draws.clone()
    }

    pub fn clear_color(&self) -> Color {
        self.state.borrow().clear_color
    }

    // ── fault injection ───────────────────────────────────────────────────

    pub fn set_supported_samples(&self, samples: &[u32]) {
        self.state.borrow_mut().supported_samples = samples.to_vec();
    }

    pub fn set_max_texture_size(&self, size: u32) {
        self.state.borrow_mut().max_texture_size = size;
    }

    /// Limits the number of live textures; creation beyond it reports
    /// [`DeviceError::OutOfMemory`].
    pub fn set_texture_budget(&self, max: Option<usize>) {
        self.state.borrow_mut().texture_budget = max;
    }

    /// Makes the next `begin_frame` report [`FrameStatus::Lost`].
    pub fn lose_device(&self) {
        self.state.borrow_mut().lose_on_next_frame = true;
    }

    /// Makes the next `count` calls to `open` fail.
    pub fn fail_opens(&self, count: u32) {
        self.state.borrow_mut().failing_opens = count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(w: u32, h: u32) -> MipLevel {
        MipLevel {
            width: w,
            height: h,
            rgba: vec![255; (w * h * 4) as usize],
        }
    }

    fn open_device() -> (HeadlessDevice, HeadlessProbe) {
        let mut dev = HeadlessDevice::new();
        let probe = dev.probe();
        dev.open(&DeviceParams::default()).unwrap();
        (dev, probe)
    }

    // ── sessions ──────────────────────────────────────────────────────────

    #[test]
    fn close_releases_every_resource() {
        let (mut dev, probe) = open_device();
        dev.create_texture("a", &[level(4, 4)]).unwrap();
        dev.create_buffer("b", &[GpuVertex::default(); 3]).unwrap();
        assert_eq!(probe.stats().live_textures, 1);
        assert_eq!(probe.stats().live_buffers, 1);

        dev.close();
        assert!(!probe.is_open());
        assert_eq!(probe.stats().live_textures, 0);
        assert_eq!(probe.stats().live_buffers, 0);
    }

    #[test]
    fn unsupported_sample_count_is_rejected() {
        let mut dev = HeadlessDevice::new();
        let probe = dev.probe();
        probe.set_supported_samples(&[1]);
        let params = DeviceParams {
            sample_count: 4,
            ..DeviceParams::default()
        };
        assert!(matches!(dev.open(&params), Err(DeviceError::Unsupported(_))));
        assert!(!dev.is_open());
        assert_eq!(probe.open_attempts().len(), 1);
    }

    #[test]
    fn injected_open_failures() {
        let mut dev = HeadlessDevice::new();
        dev.probe().fail_opens(1);
        assert!(matches!(dev.open(&DeviceParams::default()), Err(DeviceError::Unavailable(_))));
        assert!(dev.open(&DeviceParams::default()).is_ok());
    }

    // ── resources ─────────────────────────────────────────────────────────

    #[test]
    fn texture_validation() {
        let (mut dev, probe) = open_device();
        probe.set_max_texture_size(64);
        assert!(matches!(dev.create_texture("big", &[level(128, 4)]), Err(DeviceError::Unsupported(_))));
        assert!(dev.create_texture("none", &[]).is_err());

        let bad = MipLevel {
            width: 2,
            height: 2,
            rgba: vec![0; 3],
        };
        assert!(dev.create_texture("bad", &[bad]).is_err());

        let ok = dev.create_texture("ok", &[level(8, 4), level(4, 2)]).unwrap();
        let record = probe.texture(ok).unwrap();
        assert_eq!((record.width, record.height, record.mip_levels), (8, 4, 2));
    }

    #[test]
    fn texture_budget_reports_out_of_memory() {
        let (mut dev, probe) = open_device();
        probe.set_texture_budget(Some(1));
        dev.create_texture("a", &[level(1, 1)]).unwrap();
        assert_eq!(dev.create_texture("b", &[level(1, 1)]), Err(DeviceError::OutOfMemory));
    }

    #[test]
    fn creation_requires_open_session() {
        let mut dev = HeadlessDevice::new();
        assert_eq!(dev.create_texture("a", &[level(1, 1)]), Err(DeviceError::NotOpen));
        assert_eq!(dev.create_buffer("b", &[]), Err(DeviceError::NotOpen));
    }

    // ── frames ────────────────────────────────────────────────────────────

    #[test]
    fn frame_records_draws() {
        let (mut dev, probe) = open_device();
        let buffer = dev.create_buffer("b", &[GpuVertex::default(); 6]).unwrap();

        assert_eq!(dev.begin_frame(Color::white()), FrameStatus::Ready);
        dev.draw(&DrawCall {
            geometry: Geometry::Buffer { handle: buffer, first: 3, count: 3 },
            topology: Topology::Triangles,
            uniforms: SceneUniforms::default(),
            texture: None,
            pipeline: PipelineState::default(),
            viewport: PixelRect::from_size(800, 600),
        });
        dev.end_frame();

        let draws = probe.draws();
        assert_eq!(draws.len(), 1);
        assert_eq!(draws[0].vertices.len(), 3);
        assert_eq!(probe.clear_color(), Color::white());
        assert_eq!(probe.stats().draw_calls, 1);
    }

    #[test]
    fn draw_outside_frame_is_ignored() {
        let (mut dev, probe) = open_device();
        dev.draw(&DrawCall {
            geometry: Geometry::Immediate(&[GpuVertex::default()]),
            topology: Topology::Points,
            uniforms: SceneUniforms::default(),
            texture: None,
            pipeline: PipelineState::default(),
            viewport: PixelRect::from_size(1, 1),
        });
        assert!(probe.draws().is_empty());
    }

    #[test]
    fn injected_loss_is_reported_once() {
        let (mut dev, probe) = open_device();
        probe.lose_device();
        assert_eq!(dev.begin_frame(Color::black()), FrameStatus::Lost);
        assert_eq!(dev.begin_frame(Color::black()), FrameStatus::Ready);
    }

    #[test]
    fn closed_device_reports_lost() {
        let mut dev = HeadlessDevice::new();
        assert_eq!(dev.begin_frame(Color::black()), FrameStatus::Lost);
    }

    #[test]
    fn zero_size_skips_frames() {
        let (mut dev, _probe) = open_device();
        dev.resize(UVec2::ZERO).unwrap();
        assert_eq!(dev.begin_frame(Color::black()), FrameStatus::Skipped);
    }
}
