use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Capture subsystem error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Fatal error, cannot recover: {0}")]
    Fatal(String),
}

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Capture source closed")]
    SourceClosed,

    #[error("Capture read failed: {0}")]
    ReadFailed(String),

    #[error("Buffer overflow, dropped {count} samples")]
    Overflow { count: usize },

    #[error("Fatal capture error: {0}")]
    Fatal(String),
}

impl CaptureError {
    /// Whether the source is unusable. Overflow drops samples but keeps
    /// running; a closed source has simply reached end of stream.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CaptureError::ReadFailed(_) | CaptureError::Fatal(_))
    }
}

impl PipelineError {
    /// Only capture failures and configuration errors stop the pipeline;
    /// stage-level failures are absorbed by the stage wrappers and never
    /// reach this type.
    pub fn is_fatal(&self) -> bool {
        match self {
            PipelineError::Capture(c) => c.is_fatal(),
            PipelineError::Config(_) | PipelineError::Fatal(_) => true,
        }
    }
}
