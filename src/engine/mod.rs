// Render engine module
//
// An engine turns one SID file into a WAV file at a staging path chosen by
// the orchestrator. Three kinds exist:
// - wasm: in-process emulator (guaranteed last resort)
// - sidplayfp-cli: external sidplayfp process
// - ultimate64: hardware-backed capture

pub mod order;
pub mod sidplay_args;
pub mod sidplayfp;
pub mod emulator;
pub mod ultimate64;

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::constants::{ENGINE_SIDPLAYFP_CLI, ENGINE_ULTIMATE64, ENGINE_WASM};
use crate::error::{Result, SidflowError};

/// Engine identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EngineId {
    #[serde(rename = "wasm")]
    Wasm,
    #[serde(rename = "sidplayfp-cli")]
    SidplayfpCli,
    #[serde(rename = "ultimate64")]
    Ultimate64,
}

impl EngineId {
    pub const ALL: [EngineId; 3] = [EngineId::Wasm, EngineId::SidplayfpCli, EngineId::Ultimate64];

    /// The engine that is always appended to an engine order.
    pub const FALLBACK: EngineId = EngineId::Wasm;

    pub fn as_str(&self) -> &'static str {
        match self {
            EngineId::Wasm => ENGINE_WASM,
            EngineId::SidplayfpCli => ENGINE_SIDPLAYFP_CLI,
            EngineId::Ultimate64 => ENGINE_ULTIMATE64,
        }
    }
}

impl fmt::Display for EngineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineId {
    type Err = SidflowError;

    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim().to_lowercase();
        EngineId::ALL
            .into_iter()
            .find(|id| id.as_str() == name)
            .ok_or_else(|| {
                SidflowError::Config(format!(
                    "Unknown engine '{}' (expected one of: {})",
                    s,
                    EngineId::ALL.map(|id| id.as_str()).join(", ")
                ))
            })
    }
}

/// Settings for the sidplayfp process, built per attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliParams {
    /// Encoded time-limit token list (`-t<seconds>`).
    pub tokens: Vec<String>,
    /// Seconds encoded in `tokens`; bounds the watchdog.
    pub time_limit_seconds: u64,
}

/// Per-attempt engine parameters, one variant per engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineParams {
    Wasm,
    SidplayfpCli(CliParams),
    Ultimate64,
}

impl EngineParams {
    pub fn engine(&self) -> EngineId {
        match self {
            EngineParams::Wasm => EngineId::Wasm,
            EngineParams::SidplayfpCli(_) => EngineId::SidplayfpCli,
            EngineParams::Ultimate64 => EngineId::Ultimate64,
        }
    }
}

/// Everything an engine needs for one render attempt.
#[derive(Debug)]
pub struct EngineJob<'a> {
    pub source_path: &'a Path,
    /// Staging WAV path the engine must write.
    pub wav_path: &'a Path,
    /// 1-based sub-tune; `None` means the file's default tune.
    pub song_index: Option<u32>,
    pub target_duration_ms: u64,
    pub params: &'a EngineParams,
}

/// What an engine reports after a successful call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineRun {
    /// Process exit code for process-backed engines.
    pub exit_code: Option<i32>,
}

/// A concrete renderer.
///
/// Implementations must write only to `job.wav_path` and must never touch
/// the source file. Any error is treated as a failure of this engine only.
pub trait RenderEngine: Send + Sync {
    fn id(&self) -> EngineId;

    fn render(&self, job: &EngineJob<'_>) -> Result<EngineRun>;
}

/// Reject params built for a different engine.
pub(crate) fn params_mismatch(expected: EngineId, params: &EngineParams) -> SidflowError {
    SidflowError::EngineFailed {
        engine: expected,
        message: format!("received parameters for engine {}", params.engine()),
    }
}

/// Registered engines, keyed by id.
#[derive(Clone, Default)]
pub struct EngineRegistry {
    engines: HashMap<EngineId, Arc<dyn RenderEngine>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an engine under its own id, replacing any previous one.
    pub fn register(&mut self, engine: Arc<dyn RenderEngine>) {
        self.engines.insert(engine.id(), engine);
    }

    pub fn with(mut self, engine: Arc<dyn RenderEngine>) -> Self {
        self.register(engine);
        self
    }

    pub fn get(&self, id: EngineId) -> Option<&Arc<dyn RenderEngine>> {
        self.engines.get(&id)
    }

    pub fn contains(&self, id: EngineId) -> bool {
        self.engines.contains_key(&id)
    }

    pub fn ids(&self) -> Vec<EngineId> {
        EngineId::ALL.into_iter().filter(|id| self.contains(*id)).collect()
    }
}

impl fmt::Debug for EngineRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineRegistry").field("engines", &self.ids()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullEngine(EngineId);

    impl RenderEngine for NullEngine {
        fn id(&self) -> EngineId {
            self.0
        }

        fn render(&self, _job: &EngineJob<'_>) -> Result<EngineRun> {
            Ok(EngineRun::default())
        }
    }

    #[test]
    fn test_engine_id_round_trip_names() {
        assert_eq!("wasm".parse::<EngineId>().unwrap(), EngineId::Wasm);
        assert_eq!("sidplayfp-cli".parse::<EngineId>().unwrap(), EngineId::SidplayfpCli);
        assert_eq!(" Ultimate64 ".parse::<EngineId>().unwrap(), EngineId::Ultimate64);
        assert_eq!(EngineId::SidplayfpCli.to_string(), "sidplayfp-cli");
    }

    #[test]
    fn test_unknown_engine_is_config_error() {
        let err = "resid".parse::<EngineId>().unwrap_err();
        assert!(matches!(err, SidflowError::Config(_)));
        assert!(err.to_string().contains("resid"));
    }

    #[test]
    fn test_engine_id_serde_uses_wire_names() {
        let json = serde_json::to_string(&EngineId::SidplayfpCli).unwrap();
        assert_eq!(json, "\"sidplayfp-cli\"");
    }

    #[test]
    fn test_registry_lists_registered_engines_in_canonical_order() {
        let registry = EngineRegistry::new()
            .with(Arc::new(NullEngine(EngineId::Ultimate64)))
            .with(Arc::new(NullEngine(EngineId::Wasm)));
        assert_eq!(registry.ids(), vec![EngineId::Wasm, EngineId::Ultimate64]);
        assert!(!registry.contains(EngineId::SidplayfpCli));
    }

    #[test]
    fn test_params_know_their_engine() {
        let params = EngineParams::SidplayfpCli(CliParams {
            tokens: vec!["-t12".to_string()],
            time_limit_seconds: 12,
        });
        assert_eq!(params.engine(), EngineId::SidplayfpCli);
        assert_eq!(EngineParams::Wasm.engine(), EngineId::Wasm);
    }
}
