// In-process emulator engine
//
// Adapts a `SidEmulator` (boolean success + queryable last error) to the
// engine contract. A fresh emulator instance is created per render, so
// workers never share emulator state.

use std::fmt;
use std::sync::Arc;

use hound::{SampleFormat, WavSpec, WavWriter};

use crate::constants::EMULATOR_CHUNK_FRAMES;
use crate::error::{Result, SidflowError};
use super::{params_mismatch, EngineId, EngineJob, EngineParams, EngineRun, RenderEngine};

/// A software SID emulator.
pub trait SidEmulator: Send {
    fn sample_rate(&self) -> u32;

    fn channels(&self) -> u16;

    /// Load a SID image and select a 1-based sub-tune.
    fn load(&mut self, sid_data: &[u8], song_index: u32) -> bool;

    /// Fill `out` with interleaved samples.
    fn render(&mut self, out: &mut [i16]) -> bool;

    /// Description of the most recent failed call.
    fn last_error(&self) -> Option<String>;
}

type EmulatorFactory = dyn Fn() -> Box<dyn SidEmulator> + Send + Sync;

/// The guaranteed-available in-process engine.
#[derive(Clone)]
pub struct EmulatorEngine {
    factory: Arc<EmulatorFactory>,
}

impl EmulatorEngine {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Box<dyn SidEmulator> + Send + Sync + 'static,
    {
        Self { factory: Arc::new(factory) }
    }

    fn failure(&self, emulator: &dyn SidEmulator, what: &str) -> SidflowError {
        SidflowError::EngineFailed {
            engine: self.id(),
            message: match emulator.last_error() {
                Some(detail) => format!("{}: {}", what, detail),
                None => what.to_string(),
            },
        }
    }
}

impl fmt::Debug for EmulatorEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmulatorEngine").finish_non_exhaustive()
    }
}

/// Frames needed for a duration, rounded up. `None` on overflow.
pub(crate) fn frames_for_duration(duration_ms: u64, sample_rate: u32) -> Option<u64> {
    duration_ms
        .checked_mul(sample_rate as u64)
        .map(|samples| samples.div_ceil(1000))
}

impl RenderEngine for EmulatorEngine {
    fn id(&self) -> EngineId {
        EngineId::Wasm
    }

    fn render(&self, job: &EngineJob<'_>) -> Result<EngineRun> {
        if !matches!(job.params, EngineParams::Wasm) {
            return Err(params_mismatch(self.id(), job.params));
        }

        let sid_data = std::fs::read(job.source_path)?;
        let mut emulator = (self.factory)();

        if !emulator.load(&sid_data, job.song_index.unwrap_or(1)) {
            return Err(self.failure(emulator.as_ref(), "load failed"));
        }

        let channels = emulator.channels().max(1);
        let spec = WavSpec {
            channels,
            sample_rate: emulator.sample_rate(),
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };

        let Some(mut remaining) = frames_for_duration(job.target_duration_ms, spec.sample_rate) else {
            return Err(SidflowError::EngineFailed {
                engine: self.id(),
                message: format!(
                    "{} ms at {} Hz is too long to render",
                    job.target_duration_ms, spec.sample_rate
                ),
            });
        };

        if let Some(parent) = job.wav_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut writer = WavWriter::create(job.wav_path, spec)?;
        let mut buffer = vec![0i16; EMULATOR_CHUNK_FRAMES * channels as usize];

        while remaining > 0 {
            let frames = remaining.min(EMULATOR_CHUNK_FRAMES as u64) as usize;
            let chunk = &mut buffer[..frames * channels as usize];
            if !emulator.render(chunk) {
                return Err(self.failure(emulator.as_ref(), "render failed"));
            }
            for sample in chunk.iter() {
                writer.write_sample(*sample)?;
            }
            remaining -= frames as u64;
        }

        writer.finalize()?;
        Ok(EngineRun::default())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Barrier;

    /// Emulates a square-wave tune. Images starting with `BAD` fail to load.
    pub struct ToneEmulator {
        phase: u32,
        last_error: Option<String>,
        gate: Option<Arc<Barrier>>,
    }

    impl ToneEmulator {
        pub fn new() -> Self {
            Self { phase: 0, last_error: None, gate: None }
        }

        /// Every load waits on `gate`, forcing renders to overlap.
        pub fn gated(gate: Arc<Barrier>) -> Self {
            Self { gate: Some(gate), ..Self::new() }
        }
    }

    impl SidEmulator for ToneEmulator {
        fn sample_rate(&self) -> u32 {
            8_000
        }

        fn channels(&self) -> u16 {
            1
        }

        fn load(&mut self, sid_data: &[u8], _song_index: u32) -> bool {
            if let Some(gate) = &self.gate {
                gate.wait();
            }
            if sid_data.starts_with(b"BAD") {
                self.last_error = Some("not a PSID/RSID image".to_string());
                return false;
            }
            true
        }

        fn render(&mut self, out: &mut [i16]) -> bool {
            for sample in out.iter_mut() {
                self.phase = self.phase.wrapping_add(1);
                *sample = if (self.phase / 20) % 2 == 0 { 8_000 } else { -8_000 };
            }
            true
        }

        fn last_error(&self) -> Option<String> {
            self.last_error.clone()
        }
    }

    pub fn tone_engine() -> EmulatorEngine {
        EmulatorEngine::new(|| Box::new(ToneEmulator::new()))
    }
}
