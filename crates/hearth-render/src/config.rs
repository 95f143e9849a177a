// SPDX-License-Identifier: CEPL-1.0
use serde::Deserialize;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VsyncMode {
    Fifo,
    #[default]
    Mailbox,
}

/// Renderer settings read from the `[render]` table of `hearth.toml`.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub clear_color: [f32; 4],
    pub depth_clear: f32,
    pub stencil_clear: u32,
    pub vsync: bool,
    pub vsync_mode: VsyncMode,
    /// Upper bound for fence waits and image acquisition.
    pub frame_timeout_ms: u64,
    pub discrete_gpu_only: bool,
    pub sampler_anisotropy: bool,
    pub require_compute: bool,
    /// Only honoured in debug builds.
    pub validation: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        RenderConfig {
            clear_color: [0.02, 0.02, 0.04, 1.0],
            depth_clear: 1.0,
            stencil_clear: 0,
            vsync: true,
            vsync_mode: VsyncMode::Mailbox,
            frame_timeout_ms: 1000,
            discrete_gpu_only: false,
            sampler_anisotropy: true,
            require_compute: false,
            validation: cfg!(debug_assertions),
        }
    }
}

impl RenderConfig {
    pub fn frame_timeout_ns(&self) -> u64 {
        self.frame_timeout_ms.saturating_mul(1_000_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_table_keeps_defaults() {
        let cfg: RenderConfig = toml::from_str(
            r#"
            clear_color = [1.0, 0.0, 0.0, 1.0]
            vsync_mode = "fifo"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.clear_color, [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(cfg.vsync_mode, VsyncMode::Fifo);
        assert_eq!(cfg.frame_timeout_ms, 1000);
        assert!(cfg.vsync);
    }

    #[test]
    fn timeout_saturates() {
        let cfg = RenderConfig {
            frame_timeout_ms: u64::MAX,
            ..Default::default()
        };
        assert_eq!(cfg.frame_timeout_ns(), u64::MAX);
    }
}
