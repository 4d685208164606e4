use anyhow::Context;
use winit::event::WindowEvent;

use crate::time::{FrameClock, FrameTime};
use crate::video::Video;

/// Directive returned by game callbacks.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AppControl {
    Continue,
    Exit,
}

/// The application driven by the runtime.
///
/// Each frame the runtime calls [`perform_logic`](Self::perform_logic) and
/// then, if the device produced a frame, [`render`](Self::render) between
/// `begin_render` and `end_render`.
pub trait Game {
    /// Window events, before the runtime's own handling.
    fn on_window_event(&mut self, event: &WindowEvent, video: &mut Video) -> AppControl {
        let _ = (event, video);
        AppControl::Continue
    }

    fn perform_logic(&mut self, time: FrameTime) -> AppControl;

    fn render(&mut self, video: &mut Video) -> anyhow::Result<()>;
}

/// Runs one loop iteration: logic, then a rendered frame.
///
/// A frame the device skips (zero-size window, device rebuilt) still runs
/// the logic. The frame is ended even when `render` fails.
pub fn run_frame<G: Game + ?Sized>(
    game: &mut G,
    clock: &mut FrameClock,
    video: &mut Video,
) -> anyhow::Result<AppControl> {
    let time = clock.tick();
    if game.perform_logic(time) == AppControl::Exit {
        return Ok(AppControl::Exit);
    }

    if !video.begin_render().context("failed to begin frame")? {
        return Ok(AppControl::Continue);
    }
    let rendered = game.render(video);
    let ended = video.end_render();
    rendered.with_context(|| format!("frame {} failed to render", time.frame_index))?;
    ended.context("failed to end frame")?;
    Ok(AppControl::Continue)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::Color;
    use crate::device::{HeadlessDevice, HeadlessProbe};
    use crate::video::{Triangle, Vertex, VideoConfig};

    #[derive(Default)]
    struct Counter {
        logic: u32,
        renders: u32,
        exit_after: Option<u32>,
        fail_render: bool,
    }

    impl Game for Counter {
        fn perform_logic(&mut self, time: FrameTime) -> AppControl {
            assert_eq!(time.frame_index, u64::from(self.logic));
            self.logic += 1;
            match self.exit_after {
                Some(n) if self.logic >= n => AppControl::Exit,
                _ => AppControl::Continue,
            }
        }

        fn render(&mut self, video: &mut Video) -> anyhow::Result<()> {
            self.renders += 1;
            video.render(&Triangle::new([
                Vertex::at_2d(0.0, 0.0, Color::white()),
                Vertex::at_2d(1.0, 0.0, Color::white()),
                Vertex::at_2d(0.0, 1.0, Color::white()),
            ]))?;
            if self.fail_render {
                anyhow::bail!("scripted failure");
            }
            Ok(())
        }
    }

    fn video() -> (Video, HeadlessProbe) {
        let device = HeadlessDevice::new();
        let probe = device.probe();
        (Video::create(&VideoConfig::default(), Box::new(device)).unwrap(), probe)
    }

    #[test]
    fn logic_then_render_once_per_frame() {
        let (mut video, probe) = video();
        let mut clock = FrameClock::new();
        let mut game = Counter::default();

        for _ in 0..3 {
            assert_eq!(run_frame(&mut game, &mut clock, &mut video).unwrap(), AppControl::Continue);
        }
        assert_eq!((game.logic, game.renders), (3, 3));
        assert_eq!(probe.stats().frames, 3);
        assert_eq!(probe.stats().draw_calls, 3);
        assert!(!video.is_rendering());
    }

    #[test]
    fn exit_from_logic_skips_the_frame() {
        let (mut video, probe) = video();
        let mut game = Counter {
            exit_after: Some(1),
            ..Counter::default()
        };
        let control = run_frame(&mut game, &mut FrameClock::new(), &mut video).unwrap();
        assert_eq!(control, AppControl::Exit);
        assert_eq!(game.renders, 0);
        assert_eq!(probe.stats().frames, 0);
    }

    #[test]
    fn failed_render_still_ends_the_frame() {
        let (mut video, _probe) = video();
        let mut clock = FrameClock::new();
        let mut game = Counter {
            fail_render: true,
            ..Counter::default()
        };
        assert!(run_frame(&mut game, &mut clock, &mut video).is_err());
        assert!(!video.is_rendering());

        game.fail_render = false;
        assert!(run_frame(&mut game, &mut clock, &mut video).is_ok());
    }

    #[test]
    fn skipped_frames_still_run_logic() {
        let (mut video, probe) = video();
        let mut game = Counter::default();
        probe.lose_device();

        run_frame(&mut game, &mut FrameClock::new(), &mut video).unwrap();
        assert_eq!((game.logic, game.renders), (1, 0));
        assert!(probe.is_open());
    }
}
