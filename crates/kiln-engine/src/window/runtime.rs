use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use glam::UVec2;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Fullscreen, Window, WindowId};

use crate::core::{run_frame, AppControl, Game};
use crate::device::{WgpuDevice, WgpuDeviceConfig};
use crate::registry;
use crate::resources::{Colors, Fonts, Sounds, Textures, VertexBuffers};
use crate::time::FrameClock;
use crate::video::{ObserverId, Video, VideoApi, VideoConfig, DEFAULT_VIDEO_CONFIG};

/// Window/runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub title: String,

    /// `<Zenilib>` video settings; missing or broken files fall back to the
    /// failsafe defaults.
    pub video_config: PathBuf,

    /// Adapter preferences. The backend set is narrowed to GL when the
    /// video API is OpenGL.
    pub device: WgpuDeviceConfig,

    pub fullscreen_key: Option<KeyCode>,
    pub exit_key: Option<KeyCode>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            title: "kiln".to_string(),
            video_config: PathBuf::from(DEFAULT_VIDEO_CONFIG),
            device: WgpuDeviceConfig::default(),
            fullscreen_key: Some(KeyCode::F11),
            exit_key: Some(KeyCode::Escape),
        }
    }
}

/// Device configuration for `api` on top of the caller's preferences.
pub fn device_config(base: &WgpuDeviceConfig, api: VideoApi) -> WgpuDeviceConfig {
    let mut config = base.clone();
    if api == VideoApi::OpenGl {
        config.backends = wgpu::Backends::GL;
    }
    config
}

/// Entry point for the runtime.
pub struct Runtime;

impl Runtime {
    /// Opens the window and the video device, registers the resource
    /// managers, builds the game with `factory` and drives it until the
    /// window closes or the game exits.
    ///
    /// A fatal error (window, device, game construction or a failed frame)
    /// ends the loop and is returned here.
    pub fn run<G, F>(config: RuntimeConfig, factory: F) -> Result<()>
    where
        G: Game,
        F: FnOnce(&mut Video) -> Result<G>,
    {
        let video_config = VideoConfig::load_or_default(&config.video_config);
        let event_loop = EventLoop::new().context("failed to create winit EventLoop")?;
        let mut state = AppState {
            config,
            video_config,
            factory: Some(factory),
            running: None,
            failure: None,
        };

        event_loop
            .run_app(&mut state)
            .context("winit event loop terminated with error")?;

        if let Some(running) = state.running.take() {
            running.shutdown();
        }
        match state.failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Everything that exists while the window is open. Field order is drop
/// order: the game goes before the video device, the device before the
/// window its surface was created on.
struct Running<G> {
    game: G,
    observers: Vec<ObserverId>,
    video: Video,
    clock: FrameClock,
    window: Arc<Window>,
}

impl<G: Game> Running<G> {
    fn sync_fullscreen(&self) {
        let fullscreen = self.video.is_fullscreen().then_some(Fullscreen::Borderless(None));
        self.window.set_fullscreen(fullscreen);
    }

    /// Releases the managers' GPU resources while the device is still open,
    /// then tears the registry down.
    fn shutdown(self) {
        let Running {
            game,
            observers,
            mut video,
            window,
            ..
        } = self;
        drop(game);
        video.backend_mut().collect_retired();
        for id in observers {
            video.remove_observer(id);
        }
        if let Some(textures) = registry::try_get::<Textures>() {
            textures.borrow_mut().clear(&mut video);
        }
        if let Some(fonts) = registry::try_get::<Fonts>() {
            fonts.borrow_mut().clear(&mut video);
        }
        registry::shutdown_all();
        drop(video);
        drop(window);
        log::info!("runtime shut down");
    }
}

/// Fetches every resource manager, loading its default manifest, and
/// subscribes the GPU-backed ones to the device lifecycle.
fn attach_managers(video: &mut Video) -> Result<Vec<ObserverId>> {
    let textures = registry::get::<Textures>().context("failed to initialize textures")?;
    textures
        .borrow_mut()
        .set_texturing_mode(video.texture_settings(), video)
        .context("failed to apply texture settings")?;

    let fonts = registry::get::<Fonts>().context("failed to initialize fonts")?;
    fonts.borrow_mut().set_window(video.window_size());

    let buffers = registry::get::<VertexBuffers>()?;
    registry::get::<Colors>().context("failed to initialize colors")?;
    registry::get::<Sounds>().context("failed to initialize sounds")?;

    Ok(vec![
        video.lend_observer(&textures),
        video.lend_observer(&buffers),
        video.lend_observer(&fonts),
    ])
}

fn physical_size(window: &Window) -> UVec2 {
    let size = window.inner_size();
    UVec2::new(size.width, size.height)
}

fn pressed_key(event: &KeyEvent) -> Option<KeyCode> {
    match (event.state, event.repeat, event.physical_key) {
        (ElementState::Pressed, false, PhysicalKey::Code(code)) => Some(code),
        _ => None,
    }
}

struct AppState<G, F> {
    config: RuntimeConfig,
    video_config: VideoConfig,
    factory: Option<F>,
    running: Option<Running<G>>,
    failure: Option<anyhow::Error>,
}

impl<G, F> AppState<G, F>
where
    G: Game,
    F: FnOnce(&mut Video) -> Result<G>,
{
    fn start(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let factory = self.factory.take().context("game factory already consumed")?;
        let mode = &self.video_config;

        let attrs = Window::default_attributes()
            .with_title(self.config.title.clone())
            .with_inner_size(PhysicalSize::new(mode.resolution.x, mode.resolution.y))
            .with_fullscreen(mode.fullscreen.then_some(Fullscreen::Borderless(None)));
        let window = Arc::new(
            event_loop
                .create_window(attrs)
                .context("failed to create window")?,
        );

        let device = WgpuDevice::new(Arc::clone(&window), device_config(&self.config.device, mode.api))
            .context("failed to create wgpu device")?;
        let mut video = Video::create(mode, Box::new(device))
            .with_context(|| format!("failed to initialize {} video", mode.api))?;
        video
            .handle_resize(physical_size(&window))
            .context("failed to match the window size")?;
        log::info!(
            "{} video at {}x{}",
            video.api(),
            video.window_size().x,
            video.window_size().y
        );

        let observers = attach_managers(&mut video)?;
        let game = factory(&mut video).context("failed to create game")?;

        window.request_redraw();
        self.running = Some(Running {
            game,
            observers,
            video,
            clock: FrameClock::new(),
            window,
        });
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("{error:#}");
        self.failure.get_or_insert(error);
        event_loop.exit();
    }

    fn handle_event(&mut self, event: &WindowEvent) -> Result<AppControl> {
        let Some(running) = self.running.as_mut() else {
            return Ok(AppControl::Continue);
        };

        if running.game.on_window_event(event, &mut running.video) == AppControl::Exit {
            return Ok(AppControl::Exit);
        }

        match event {
            WindowEvent::CloseRequested => return Ok(AppControl::Exit),

            WindowEvent::Resized(size) => {
                running
                    .video
                    .handle_resize(UVec2::new(size.width, size.height))
                    .context("failed to rebuild the device after a resize")?;
                running.window.request_redraw();
            }

            WindowEvent::ScaleFactorChanged { .. } => {
                let size = physical_size(&running.window);
                running
                    .video
                    .handle_resize(size)
                    .context("failed to rebuild the device after a scale change")?;
            }

            WindowEvent::Focused(focused) => {
                running
                    .video
                    .handle_focus_change(*focused)
                    .context("failed to restore the device after regaining focus")?;
                if *focused {
                    running.clock.reset();
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                let key = pressed_key(event);
                if key.is_some() && key == self.config.exit_key {
                    return Ok(AppControl::Exit);
                }
                if key.is_some() && key == self.config.fullscreen_key {
                    running
                        .video
                        .toggle_fullscreen()
                        .context("failed to switch fullscreen")?;
                    running.sync_fullscreen();
                }
            }

            WindowEvent::RedrawRequested => {
                let control = run_frame(&mut running.game, &mut running.clock, &mut running.video)?;
                if control == AppControl::Exit {
                    return Ok(AppControl::Exit);
                }
            }

            _ => {}
        }
        Ok(AppControl::Continue)
    }
}

impl<G, F> ApplicationHandler for AppState<G, F>
where
    G: Game,
    F: FnOnce(&mut Video) -> Result<G>,
{
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.running.is_some() || self.failure.is_some() {
            return;
        }
        if let Err(e) = self.start(event_loop) {
            self.fail(event_loop, e.context("failed to start"));
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        event_loop.set_control_flow(ControlFlow::Wait);

        // Continuous redraw: a game animates every frame.
        if let Some(running) = &self.running {
            running.window.request_redraw();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        if self
            .running
            .as_ref()
            .is_none_or(|running| running.window.id() != window_id)
        {
            return;
        }

        match self.handle_event(&event) {
            Ok(AppControl::Continue) => {}
            Ok(AppControl::Exit) => {
                log::info!("exit requested");
                event_loop.exit();
            }
            Err(e) => self.fail(event_loop, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opengl_is_restricted_to_the_gl_backend() {
        let base = WgpuDeviceConfig::default();
        assert_eq!(device_config(&base, VideoApi::OpenGl).backends, wgpu::Backends::GL);
        assert_eq!(device_config(&base, VideoApi::Dx9).backends, base.backends);
    }

    #[test]
    fn default_keys_and_config_path() {
        let config = RuntimeConfig::default();
        assert_eq!(config.fullscreen_key, Some(KeyCode::F11));
        assert_eq!(config.exit_key, Some(KeyCode::Escape));
        assert_eq!(config.video_config, PathBuf::from("config/video.xml"));
    }
}
