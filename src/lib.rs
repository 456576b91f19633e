// SIDFlow render pipeline - Library Entry Point
//
// Turns a collection of SID tunes into cached audio files: engine fallback,
// duration policy, deterministic cache layout and a bounded worker pool with
// a progress stream.

pub mod cache;
pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod jobs;
pub mod options;
pub mod render;
pub mod songlength;
pub mod tools;

pub use cache::RenderCache;
pub use config::{RenderConfig, RenderPolicy};
pub use engine::{EngineId, EngineRegistry, RenderEngine};
pub use error::{Result, SidflowError};
pub use jobs::{build_wav_cache, BuildMetrics, BuildOptions, BuildReport, CancelFlag};
pub use render::{AudioFormat, RenderOrchestrator, RenderOutcome, RenderRequest};
