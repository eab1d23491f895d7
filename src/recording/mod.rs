// Recording modules

pub mod circular;
pub mod file_writer;
pub mod readback;
pub mod session;
pub mod stage;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use circular::{BufferError, BufferPlan, CircularFrameBuffer};
pub use file_writer::{VideoFileSummary, VideoFileWriter};
pub use readback::{CaptureTarget, PixelSource, ReadbackError, ReadbackPipeline, TestPatternSource};
pub use session::{RecordingSession, StopSummary};
pub use worker::EncodingWorker;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::encoding::EncoderError;
use crate::webm::WebmError;

/// Session lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No parameters yet
    Uninitialized,
    /// Parameters validated, capture resources prepared
    Initialized,
    /// Capturing frames
    Recording,
    /// Flushing and writing the file
    Stopping,
    /// File written; may be initialized again
    Stopped,
}

impl SessionState {
    pub fn can_init(&self) -> bool {
        matches!(
            self,
            SessionState::Uninitialized | SessionState::Initialized | SessionState::Stopped
        )
    }
}

/// Error type for recording sessions
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Cannot {action} while {state:?}")]
    InvalidState {
        action: &'static str,
        state: SessionState,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Resource(#[from] ReadbackError),

    #[error(transparent)]
    Buffer(#[from] BufferError),

    #[error("Encoder error: {0}")]
    Encoder(#[from] EncoderError),

    #[error("Container error: {0}")]
    Container(#[from] WebmError),

    #[error("Worker error: {0}")]
    Worker(String),
}

pub type Result<T> = std::result::Result<T, SessionError>;
