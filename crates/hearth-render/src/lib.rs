// SPDX-License-Identifier: CEPL-1.0
mod config;
mod error;

use tracing::{error, warn};

pub use config::{RenderConfig, VsyncMode};
pub use error::{ErrorKind, FrameError, FrameResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub fn is_zero(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Per-tick data handed from the game loop to the renderer.
#[derive(Clone, Copy, Debug, Default)]
pub struct RenderPacket {
    pub delta_time: f32,
}

/// A rendering backend driven by the application loop.
pub trait Renderer {
    /// Records the new framebuffer size. The backend reconciles it on the
    /// next `begin_frame`; this call never touches GPU objects.
    fn resize(&mut self, size: RenderSize);

    /// Returns `Ok(true)` when a frame is open for recording, `Ok(false)`
    /// when this tick is skipped (resize pending, minimized).
    fn begin_frame(&mut self, delta_time: f32) -> FrameResult<bool>;

    fn end_frame(&mut self, delta_time: f32) -> FrameResult<()>;

    /// Number of frames that completed end to end.
    fn frame_number(&self) -> u64;

    fn set_clear_color(&mut self, rgba: [f32; 4]);
    fn set_vsync(&mut self, _on: bool) {}

    fn shutdown(&mut self);

    /// Runs one frame. Retryable failures are logged and reported as a
    /// skipped frame; fatal ones are returned and should end the loop.
    fn draw_frame(&mut self, packet: &RenderPacket) -> FrameResult<bool> {
        match self.begin_frame(packet.delta_time) {
            Ok(true) => {}
            Ok(false) => return Ok(false),
            Err(e) if e.is_retryable() => {
                warn!("frame skipped: {e}");
                return Ok(false);
            }
            Err(e) => {
                error!("begin_frame failed: {e}");
                return Err(e);
            }
        }

        if let Err(e) = self.end_frame(packet.delta_time) {
            error!("end_frame failed, renderer cannot continue: {e}");
            return Err(e);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[derive(Default)]
    struct Scripted {
        begin: Vec<FrameResult<bool>>,
        end_fails: bool,
        ends: u32,
        frames: u64,
    }

    impl Renderer for Scripted {
        fn resize(&mut self, _size: RenderSize) {}
        fn begin_frame(&mut self, _dt: f32) -> FrameResult<bool> {
            self.begin.remove(0)
        }
        fn end_frame(&mut self, _dt: f32) -> FrameResult<()> {
            self.ends += 1;
            if self.end_fails {
                return Err(FrameError::fatal(anyhow!("device lost")));
            }
            self.frames += 1;
            Ok(())
        }
        fn frame_number(&self) -> u64 {
            self.frames
        }
        fn set_clear_color(&mut self, _rgba: [f32; 4]) {}
        fn shutdown(&mut self) {}
    }

    #[test]
    fn retryable_begin_failure_skips_without_ending() {
        let mut r = Scripted {
            begin: vec![Err(FrameError::Timeout { timeout_ns: 1 })],
            ..Default::default()
        };
        let drawn = r.draw_frame(&RenderPacket { delta_time: 0.016 }).unwrap();
        assert!(!drawn);
        assert_eq!(r.ends, 0);
        assert_eq!(r.frame_number(), 0);
    }

    #[test]
    fn end_failure_escalates() {
        let mut r = Scripted {
            begin: vec![Ok(true)],
            end_fails: true,
            ..Default::default()
        };
        let err = r
            .draw_frame(&RenderPacket { delta_time: 0.016 })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Fatal);
        assert_eq!(r.frame_number(), 0);
    }

    #[test]
    fn completed_frame_is_counted() {
        let mut r = Scripted {
            begin: vec![Ok(false), Ok(true)],
            ..Default::default()
        };
        let packet = RenderPacket { delta_time: 0.016 };
        assert!(!r.draw_frame(&packet).unwrap());
        assert!(r.draw_frame(&packet).unwrap());
        assert_eq!(r.frame_number(), 1);
    }

    #[test]
    fn zero_dimension_is_zero_size() {
        assert!(RenderSize { width: 0, height: 600 }.is_zero());
        assert!(!RenderSize { width: 1, height: 1 }.is_zero());
    }
}
