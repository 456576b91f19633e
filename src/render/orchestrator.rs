// Render orchestrator
//
// Resolves engine order and target duration once per request, tries engines
// in order until one produces a WAV, then derives the other formats and
// commits everything into the cache. First success wins.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::cache::{commit_all, discard, staging_path};
use crate::config::RenderPolicy;
use crate::constants::WAV_HEADER_BYTES;
use crate::engine::order::resolve_engine_order;
use crate::engine::sidplay_args::TimeLimitEncoding;
use crate::engine::{CliParams, EngineId, EngineJob, EngineParams, EngineRegistry};
use crate::error::{Result, SidflowError};
use crate::songlength::LengthLookup;
use crate::tools;
use super::duration::{DurationPolicy, RenderTiming};
use super::encode::FormatEncoder;
use super::{AttemptFailure, AudioFormat, RenderFailure, RenderOutcome, RenderRequest, RenderSuccess};

pub struct RenderOrchestrator {
    engines: EngineRegistry,
    preferred: Vec<EngineId>,
    duration: DurationPolicy,
    time_limit: TimeLimitEncoding,
    lengths: Option<Arc<dyn LengthLookup>>,
    encoder: FormatEncoder,
}

impl RenderOrchestrator {
    pub fn new(engines: EngineRegistry) -> Self {
        Self {
            engines,
            preferred: Vec::new(),
            duration: DurationPolicy::default(),
            time_limit: TimeLimitEncoding::default(),
            lengths: None,
            encoder: FormatEncoder::new(tools::ffmpeg_path(None)),
        }
    }

    pub fn with_preferred(mut self, preferred: Vec<EngineId>) -> Self {
        self.preferred = preferred;
        self
    }

    pub fn with_policy(mut self, policy: &RenderPolicy) -> Self {
        self.duration = policy.duration;
        self.time_limit = policy.time_limit;
        self
    }

    pub fn with_lengths(mut self, lengths: Arc<dyn LengthLookup>) -> Self {
        self.lengths = Some(lengths);
        self
    }

    pub fn with_encoder(mut self, encoder: FormatEncoder) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn engines(&self) -> &EngineRegistry {
        &self.engines
    }

    /// Durations for a request, from the override, archive length and cap.
    pub fn timing_for(&self, request: &RenderRequest) -> RenderTiming {
        let known = self
            .lengths
            .as_ref()
            .and_then(|l| l.lookup_length(&request.source_path, request.song_index));
        self.duration
            .resolve(request.target_duration_ms, known, request.max_render_seconds)
    }

    fn params_for(&self, engine: EngineId, timing: &RenderTiming) -> EngineParams {
        match engine {
            EngineId::Wasm => EngineParams::Wasm,
            EngineId::Ultimate64 => EngineParams::Ultimate64,
            EngineId::SidplayfpCli => EngineParams::SidplayfpCli(CliParams {
                tokens: self.time_limit.encode(timing.cli_duration_ms),
                time_limit_seconds: self.time_limit.seconds(timing.cli_duration_ms),
            }),
        }
    }

    /// Render one request. Never returns early with a partial artifact at a
    /// final cache path.
    pub fn render(&self, request: &RenderRequest) -> RenderOutcome {
        let started = Instant::now();
        let order = resolve_engine_order(request.engine, &self.preferred);

        if !request.source_path.is_file() {
            return RenderOutcome::Failed(RenderFailure {
                source_path: request.source_path.clone(),
                song_index: request.song_index,
                engine: order[0],
                error: SidflowError::SourceNotFound(request.source_path.display().to_string()),
                retriable: false,
                elapsed: started.elapsed(),
                attempts: Vec::new(),
            });
        }

        if request.formats.is_empty() {
            return RenderOutcome::Failed(RenderFailure {
                source_path: request.source_path.clone(),
                song_index: request.song_index,
                engine: order[0],
                error: SidflowError::Config("no output formats requested".to_string()),
                retriable: false,
                elapsed: started.elapsed(),
                attempts: Vec::new(),
            });
        }

        let timing = self.timing_for(request);
        let wav_final = request.output_path(AudioFormat::Wav);
        let mut attempts: Vec<AttemptFailure> = Vec::new();

        log::debug!(
            "Rendering {} (song {:?}) for {} ms via {:?}",
            request.source_path.display(),
            request.song_index,
            timing.target_duration_ms,
            order
        );

        for engine_id in order {
            let staging_wav = staging_path(&wav_final);

            let result = self
                .run_engine(engine_id, request, &timing, &staging_wav)
                .and_then(|()| self.finish(request, &staging_wav));

            match result {
                Ok((output_paths, bytes_written)) => {
                    log::info!(
                        "Rendered {} with {} ({} bytes, {} format(s))",
                        request.source_path.display(),
                        engine_id,
                        bytes_written,
                        output_paths.len()
                    );
                    return RenderOutcome::Rendered(RenderSuccess {
                        source_path: request.source_path.clone(),
                        song_index: request.song_index,
                        output_paths,
                        bytes_written,
                        elapsed: started.elapsed(),
                        engine: engine_id,
                        target_duration_ms: timing.target_duration_ms,
                    });
                }
                Err(error) => {
                    discard(&[staging_wav]);
                    let retriable = error.is_engine_recoverable();
                    log::warn!(
                        "Engine {} failed for {}: {}",
                        engine_id,
                        request.source_path.display(),
                        error
                    );
                    attempts.push(AttemptFailure { engine: engine_id, error, retriable });
                    if !retriable {
                        break;
                    }
                }
            }
        }

        // The order always holds at least the fallback engine, so at least one attempt exists.
        let last = match attempts.pop() {
            Some(last) => last,
            None => AttemptFailure {
                engine: EngineId::FALLBACK,
                error: SidflowError::Other("no engine attempted".to_string()),
                retriable: false,
            },
        };

        log::error!(
            "All engines failed for {}; last was {}: {}",
            request.source_path.display(),
            last.engine,
            last.error
        );

        RenderOutcome::Failed(RenderFailure {
            source_path: request.source_path.clone(),
            song_index: request.song_index,
            engine: last.engine,
            error: last.error,
            retriable: last.retriable,
            elapsed: started.elapsed(),
            attempts,
        })
    }

    /// Invoke one engine and check that it left a usable WAV behind.
    fn run_engine(
        &self,
        engine_id: EngineId,
        request: &RenderRequest,
        timing: &RenderTiming,
        staging_wav: &Path,
    ) -> Result<()> {
        let engine = self
            .engines
            .get(engine_id)
            .ok_or(SidflowError::EngineUnavailable(engine_id))?;

        let params = self.params_for(engine_id, timing);
        let job = EngineJob {
            source_path: &request.source_path,
            wav_path: staging_wav,
            song_index: request.song_index,
            target_duration_ms: timing.target_duration_ms,
            params: &params,
        };

        // A panicking engine counts as a failed attempt; the next one still runs.
        catch_unwind(AssertUnwindSafe(|| engine.render(&job))).map_err(|payload| {
            SidflowError::EngineFailed {
                engine: engine_id,
                message: format!("engine panicked: {}", panic_message(payload.as_ref())),
            }
        })??;

        match std::fs::metadata(staging_wav) {
            Ok(meta) if meta.len() > WAV_HEADER_BYTES => Ok(()),
            _ => Err(SidflowError::MissingOutput {
                engine: engine_id,
                path: staging_wav.display().to_string(),
            }),
        }
    }

    /// Derive every requested format from the staged WAV, then commit them.
    fn finish(&self, request: &RenderRequest, staging_wav: &Path) -> Result<(Vec<PathBuf>, u64)> {
        let mut staged: Vec<(PathBuf, PathBuf)> = Vec::with_capacity(request.formats.len());

        for format in &request.formats {
            let final_path = request.output_path(*format);
            if *format == AudioFormat::Wav {
                staged.push((staging_wav.to_path_buf(), final_path));
                continue;
            }

            let staging = staging_path(&final_path);
            if let Err(e) = self.encoder.encode(staging_wav, *format, &staging) {
                let mut leftovers: Vec<PathBuf> = staged
                    .iter()
                    .map(|(s, _)| s.clone())
                    .filter(|s| s != staging_wav)
                    .collect();
                leftovers.push(staging);
                discard(&leftovers);
                return Err(e);
            }
            staged.push((staging, final_path));
        }

        let (output_paths, bytes_written) = commit_all(&staged)?;

        if !request.formats.contains(&AudioFormat::Wav) {
            discard(&[staging_wav.to_path_buf()]);
        }

        Ok((output_paths, bytes_written))
    }
}

/// Text of a panic payload, when it carries one.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl fmt::Debug for RenderOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderOrchestrator")
            .field("engines", &self.engines)
            .field("preferred", &self.preferred)
            .field("duration", &self.duration)
            .field("time_limit", &self.time_limit)
            .field("encoder", &self.encoder)
            .finish()
    }
}
