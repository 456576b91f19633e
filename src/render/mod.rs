// Render module
//
// One request renders one source file (one sub-tune) into every requested
// format under the request's output directory.

pub mod duration;
pub mod encode;
pub mod orchestrator;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::output_file_name;
use crate::constants::{FORMAT_FLAC, FORMAT_M4A, FORMAT_WAV};
use crate::engine::EngineId;
use crate::error::{Result, SidflowError};

pub use orchestrator::RenderOrchestrator;

/// Output container/codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Wav,
    Flac,
    M4a,
}

impl AudioFormat {
    pub const ALL: [AudioFormat; 3] = [AudioFormat::Wav, AudioFormat::Flac, AudioFormat::M4a];

    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Wav => FORMAT_WAV,
            AudioFormat::Flac => FORMAT_FLAC,
            AudioFormat::M4a => FORMAT_M4A,
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for AudioFormat {
    type Err = SidflowError;

    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim().to_lowercase();
        AudioFormat::ALL
            .into_iter()
            .find(|f| f.extension() == name)
            .ok_or_else(|| {
                SidflowError::Config(format!(
                    "Unknown format '{}' (expected one of: wav, flac, m4a)",
                    s
                ))
            })
    }
}

/// Keep the first occurrence of each format.
pub fn dedup_formats(formats: &[AudioFormat]) -> Vec<AudioFormat> {
    let mut out = Vec::with_capacity(formats.len());
    for format in formats {
        if !out.contains(format) {
            out.push(*format);
        }
    }
    out
}

/// Immutable per-file render job.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    pub source_path: PathBuf,
    pub output_dir: PathBuf,
    pub formats: Vec<AudioFormat>,
    pub engine: Option<EngineId>,
    /// 1-based sub-tune.
    pub song_index: Option<u32>,
    /// Bypasses the duration policy when set.
    pub target_duration_ms: Option<u64>,
    pub max_render_seconds: Option<f64>,
}

impl RenderRequest {
    pub fn new(source_path: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_path: source_path.into(),
            output_dir: output_dir.into(),
            formats: vec![AudioFormat::Wav],
            engine: None,
            song_index: None,
            target_duration_ms: None,
            max_render_seconds: None,
        }
    }

    pub fn with_formats(mut self, formats: &[AudioFormat]) -> Self {
        self.formats = dedup_formats(formats);
        self
    }

    pub fn with_engine(mut self, engine: Option<EngineId>) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_song_index(mut self, song_index: Option<u32>) -> Self {
        self.song_index = song_index;
        self
    }

    pub fn with_target_duration_ms(mut self, target: Option<u64>) -> Self {
        self.target_duration_ms = target;
        self
    }

    pub fn with_max_render_seconds(mut self, cap: Option<f64>) -> Self {
        self.max_render_seconds = cap;
        self
    }

    /// Final cache path for one format.
    pub fn output_path(&self, format: AudioFormat) -> PathBuf {
        self.output_dir
            .join(output_file_name(&self.source_path, self.song_index, format))
    }

    /// Final cache paths for every requested format, in request order.
    pub fn output_paths(&self) -> Vec<PathBuf> {
        self.formats.iter().map(|f| self.output_path(*f)).collect()
    }
}

/// One engine that did not produce output.
#[derive(Debug)]
pub struct AttemptFailure {
    pub engine: EngineId,
    pub error: SidflowError,
    /// Whether the next engine in the order was worth trying.
    pub retriable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderSuccess {
    pub source_path: PathBuf,
    pub song_index: Option<u32>,
    pub output_paths: Vec<PathBuf>,
    pub bytes_written: u64,
    pub elapsed: Duration,
    pub engine: EngineId,
    pub target_duration_ms: u64,
}

#[derive(Debug)]
pub struct RenderFailure {
    pub source_path: PathBuf,
    pub song_index: Option<u32>,
    /// The last engine tried.
    pub engine: EngineId,
    pub error: SidflowError,
    pub retriable: bool,
    pub elapsed: Duration,
    /// Earlier failed attempts in order; the last one is `engine`/`error`.
    pub attempts: Vec<AttemptFailure>,
}

#[derive(Debug)]
pub enum RenderOutcome {
    Rendered(RenderSuccess),
    Failed(RenderFailure),
}

impl RenderOutcome {
    pub fn source_path(&self) -> &Path {
        match self {
            RenderOutcome::Rendered(s) => &s.source_path,
            RenderOutcome::Failed(f) => &f.source_path,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RenderOutcome::Rendered(_))
    }

    pub fn engine(&self) -> EngineId {
        match self {
            RenderOutcome::Rendered(s) => s.engine,
            RenderOutcome::Failed(f) => f.engine,
        }
    }
}
