// Hardware-backed engine (Ultimate64 capture)
//
// The device plays the tune on real hardware and returns captured PCM.
// There is one physical device, so captures are serialized.

use std::fmt;
use std::sync::{Arc, Mutex};

use hound::{SampleFormat, WavSpec, WavWriter};

use crate::error::{Result, SidflowError};
use super::{params_mismatch, EngineId, EngineJob, EngineParams, EngineRun, RenderEngine};

/// PCM captured from the device.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedAudio {
    pub sample_rate: u32,
    pub channels: u16,
    /// Interleaved 16-bit samples.
    pub samples: Vec<i16>,
}

/// A hardware player able to capture a tune's output.
pub trait HardwareDevice: Send + Sync {
    fn capture(
        &self,
        sid_data: &[u8],
        song_index: u32,
        duration_ms: u64,
    ) -> std::result::Result<CapturedAudio, String>;
}

#[derive(Clone)]
pub struct Ultimate64Engine {
    device: Arc<dyn HardwareDevice>,
    lock: Arc<Mutex<()>>,
}

impl Ultimate64Engine {
    pub fn new(device: Arc<dyn HardwareDevice>) -> Self {
        Self { device, lock: Arc::new(Mutex::new(())) }
    }
}

impl fmt::Debug for Ultimate64Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ultimate64Engine").finish_non_exhaustive()
    }
}

impl RenderEngine for Ultimate64Engine {
    fn id(&self) -> EngineId {
        EngineId::Ultimate64
    }

    fn render(&self, job: &EngineJob<'_>) -> Result<EngineRun> {
        if !matches!(job.params, EngineParams::Ultimate64) {
            return Err(params_mismatch(self.id(), job.params));
        }

        let sid_data = std::fs::read(job.source_path)?;

        let captured = {
            let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
            self.device
                .capture(&sid_data, job.song_index.unwrap_or(1), job.target_duration_ms)
                .map_err(|message| SidflowError::EngineFailed { engine: self.id(), message })?
        };

        if captured.samples.is_empty() || captured.channels == 0 {
            return Err(SidflowError::EngineFailed {
                engine: self.id(),
                message: "device returned no audio".to_string(),
            });
        }

        if let Some(parent) = job.wav_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let spec = WavSpec {
            channels: captured.channels,
            sample_rate: captured.sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(job.wav_path, spec)?;
        for sample in &captured.samples {
            writer.write_sample(*sample)?;
        }
        writer.finalize()?;

        Ok(EngineRun::default())
    }
}
