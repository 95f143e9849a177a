// SPDX-License-Identifier: CEPL-1.0
use thiserror::Error;

/// How the frame loop should react to a [`FrameError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unrecoverable. The owning loop shuts down.
    Fatal,
    /// Swapchain image could not be acquired; skip and retry next tick.
    AcquireFailed,
    /// A frame fence did not signal in time; skip and retry next tick.
    Timeout,
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("timed out after {timeout_ns} ns waiting on the frame fence")]
    Timeout { timeout_ns: u64 },

    #[error("swapchain image acquisition failed: {reason}")]
    AcquireFailed { reason: String },

    #[error("{0:#}")]
    Fatal(anyhow::Error),
}

impl FrameError {
    pub fn fatal(err: impl Into<anyhow::Error>) -> Self {
        FrameError::Fatal(err.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            FrameError::Timeout { .. } => ErrorKind::Timeout,
            FrameError::AcquireFailed { .. } => ErrorKind::AcquireFailed,
            FrameError::Fatal(_) => ErrorKind::Fatal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() != ErrorKind::Fatal
    }
}

impl From<anyhow::Error> for FrameError {
    fn from(err: anyhow::Error) -> Self {
        FrameError::Fatal(err)
    }
}

pub type FrameResult<T> = std::result::Result<T, FrameError>;

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn kinds_map_to_retry_policy() {
        assert!(FrameError::Timeout { timeout_ns: 5 }.is_retryable());
        assert!(FrameError::AcquireFailed {
            reason: "out of date".into()
        }
        .is_retryable());
        assert!(!FrameError::fatal(anyhow!("device lost")).is_retryable());
    }

    #[test]
    fn fatal_keeps_context_chain() {
        let err = anyhow!("ERROR_DEVICE_LOST").context("queue_submit");
        let msg = FrameError::from(err).to_string();
        assert!(msg.contains("queue_submit"));
        assert!(msg.contains("ERROR_DEVICE_LOST"));
    }
}
