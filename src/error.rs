// SIDFlow Render Error Types

use thiserror::Error;

use crate::engine::EngineId;

#[derive(Error, Debug)]
pub enum SidflowError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Source not found: {0}")]
    SourceNotFound(String),

    #[error("Engine {engine} failed: {message}")]
    EngineFailed { engine: EngineId, message: String },

    #[error("Engine {engine} exceeded its {seconds}s time limit and was killed")]
    EngineTimeout { engine: EngineId, seconds: u64 },

    #[error("Engine {0} is not available")]
    EngineUnavailable(EngineId),

    #[error("Engine {engine} produced no usable output at {path}")]
    MissingOutput { engine: EngineId, path: String },

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Songlength error: {0}")]
    Songlength(String),

    #[error("{0}")]
    Other(String),
}

impl SidflowError {
    /// Whether trying the next engine in the order can help.
    /// Engine-side problems are recoverable; problems with the source,
    /// the cache, or transcoding are not.
    pub fn is_engine_recoverable(&self) -> bool {
        matches!(
            self,
            SidflowError::EngineFailed { .. }
                | SidflowError::EngineTimeout { .. }
                | SidflowError::EngineUnavailable(_)
                | SidflowError::MissingOutput { .. }
                | SidflowError::Wav(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SidflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_errors_are_recoverable() {
        let err = SidflowError::EngineFailed {
            engine: EngineId::SidplayfpCli,
            message: "exit status 1".to_string(),
        };
        assert!(err.is_engine_recoverable());
        assert!(SidflowError::EngineUnavailable(EngineId::Ultimate64).is_engine_recoverable());
    }

    #[test]
    fn test_source_and_encode_errors_are_terminal() {
        assert!(!SidflowError::SourceNotFound("/x.sid".to_string()).is_engine_recoverable());
        assert!(!SidflowError::Encode("ffmpeg exited 1".to_string()).is_engine_recoverable());
    }

    #[test]
    fn test_timeout_message_names_engine() {
        let err = SidflowError::EngineTimeout { engine: EngineId::SidplayfpCli, seconds: 12 };
        assert_eq!(
            err.to_string(),
            "Engine sidplayfp-cli exceeded its 12s time limit and was killed"
        );
    }
}
