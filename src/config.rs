// Render configuration
//
// Loaded once per run from JSON (camelCase keys). Lookup order:
// 1) explicit --config path
// 2) $SIDFLOW_CONFIG
// 3) ./.sidflow.json
// 4) <platform config dir>/sidflow.json
// A missing file in the implicit locations means defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::constants::{
    CLI_KILL_GRACE_MS, CONFIG_ENV_VAR, CONFIG_FILENAME, CONFIG_LOCAL_FILENAME,
    DEFAULT_FORMATS, DEFAULT_SID_PATH, DEFAULT_WAV_CACHE_PATH,
};
use crate::engine::sidplay_args::TimeLimitEncoding;
use crate::engine::EngineId;
use crate::error::{Result, SidflowError};
use crate::render::duration::DurationPolicy;
use crate::render::{dedup_formats, AudioFormat};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ConfigFile {
    sid_path: Option<PathBuf>,
    wav_cache_path: Option<PathBuf>,
    threads: Option<usize>,
    preferred_engines: Option<Vec<String>>,
    default_formats: Option<Vec<String>>,
    max_render_sec: Option<f64>,
    songlengths_path: Option<PathBuf>,
    sidplay_path: Option<PathBuf>,
    ffmpeg_path: Option<PathBuf>,
    sidplay_args: Option<Vec<String>>,
    render_policy: Option<PolicyFile>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct PolicyFile {
    preview_default_ms: Option<u64>,
    min_render_floor_ms: Option<u64>,
    cli_safety_margin_sec: Option<u64>,
    cli_fallback_sec: Option<u64>,
    cli_kill_grace_ms: Option<u64>,
}

/// Timing constants for duration policy and the external engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderPolicy {
    pub duration: DurationPolicy,
    pub time_limit: TimeLimitEncoding,
    pub kill_grace: Duration,
}

impl Default for RenderPolicy {
    fn default() -> Self {
        Self {
            duration: DurationPolicy::default(),
            time_limit: TimeLimitEncoding::default(),
            kill_grace: Duration::from_millis(CLI_KILL_GRACE_MS),
        }
    }
}

/// Validated, immutable run configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderConfig {
    pub sid_path: PathBuf,
    pub wav_cache_path: PathBuf,
    /// 0 = available parallelism.
    pub threads: usize,
    pub preferred_engines: Vec<EngineId>,
    pub default_formats: Vec<AudioFormat>,
    pub max_render_sec: Option<f64>,
    pub songlengths_path: Option<PathBuf>,
    pub sidplay_path: Option<PathBuf>,
    pub ffmpeg_path: Option<PathBuf>,
    pub sidplay_args: Vec<String>,
    pub policy: RenderPolicy,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            sid_path: PathBuf::from(DEFAULT_SID_PATH),
            wav_cache_path: PathBuf::from(DEFAULT_WAV_CACHE_PATH),
            threads: 0,
            preferred_engines: Vec::new(),
            default_formats: DEFAULT_FORMATS
                .iter()
                .filter_map(|f| f.parse().ok())
                .collect(),
            max_render_sec: None,
            songlengths_path: None,
            sidplay_path: None,
            ffmpeg_path: None,
            sidplay_args: Vec::new(),
            policy: RenderPolicy::default(),
        }
    }
}

impl RenderConfig {
    /// Find and load the configuration.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV_VAR) {
            return Self::from_file(Path::new(&env_path));
        }

        let local = PathBuf::from(CONFIG_LOCAL_FILENAME);
        if local.is_file() {
            return Self::from_file(&local);
        }

        if let Some(dirs) = directories::ProjectDirs::from("", "", "sidflow") {
            let candidate = dirs.config_dir().join(CONFIG_FILENAME);
            if candidate.is_file() {
                return Self::from_file(&candidate);
            }
        }

        log::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            SidflowError::Config(format!("Cannot read config {}: {}", path.display(), e))
        })?;
        let base_dir = path.parent().unwrap_or(Path::new("."));
        let config = Self::from_json_str(&text, base_dir)?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse and validate JSON, resolving relative paths against `base_dir`.
    pub fn from_json_str(text: &str, base_dir: &Path) -> Result<Self> {
        let file: ConfigFile = serde_json::from_str(text)
            .map_err(|e| SidflowError::Config(format!("Invalid config JSON: {}", e)))?;
        let defaults = Self::default();
        let resolve = |p: PathBuf| if p.is_relative() { base_dir.join(p) } else { p };

        let preferred_engines = file
            .preferred_engines
            .unwrap_or_default()
            .iter()
            .map(|name| name.parse::<EngineId>())
            .collect::<Result<Vec<_>>>()?;

        let default_formats = match file.default_formats {
            Some(names) => {
                let formats = names
                    .iter()
                    .map(|name| name.parse::<AudioFormat>())
                    .collect::<Result<Vec<_>>>()?;
                if formats.is_empty() {
                    return Err(SidflowError::Config("defaultFormats must not be empty".to_string()));
                }
                dedup_formats(&formats)
            }
            None => defaults.default_formats.clone(),
        };

        if let Some(cap) = file.max_render_sec {
            if !cap.is_finite() || cap <= 0.0 {
                return Err(SidflowError::Config(format!(
                    "maxRenderSec must be a positive number, got {}",
                    cap
                )));
            }
        }

        let policy_file = file.render_policy.unwrap_or_default();
        let base_policy = RenderPolicy::default();
        let policy = RenderPolicy {
            duration: DurationPolicy {
                preview_default_ms: policy_file
                    .preview_default_ms
                    .unwrap_or(base_policy.duration.preview_default_ms),
                min_render_floor_ms: policy_file
                    .min_render_floor_ms
                    .unwrap_or(base_policy.duration.min_render_floor_ms),
            },
            time_limit: TimeLimitEncoding {
                safety_margin_seconds: policy_file
                    .cli_safety_margin_sec
                    .unwrap_or(base_policy.time_limit.safety_margin_seconds),
                fallback_seconds: policy_file
                    .cli_fallback_sec
                    .unwrap_or(base_policy.time_limit.fallback_seconds),
            },
            kill_grace: policy_file
                .cli_kill_grace_ms
                .map(Duration::from_millis)
                .unwrap_or(base_policy.kill_grace),
        };

        Ok(Self {
            sid_path: resolve(file.sid_path.unwrap_or(defaults.sid_path)),
            wav_cache_path: resolve(file.wav_cache_path.unwrap_or(defaults.wav_cache_path)),
            threads: file.threads.unwrap_or(defaults.threads),
            preferred_engines,
            default_formats,
            max_render_sec: file.max_render_sec,
            songlengths_path: file.songlengths_path.map(resolve),
            sidplay_path: file.sidplay_path.map(resolve),
            ffmpeg_path: file.ffmpeg_path.map(resolve),
            sidplay_args: file.sidplay_args.unwrap_or_default(),
            policy,
        })
    }

    /// Worker count with `0` resolved to the machine's parallelism.
    pub fn effective_threads(&self) -> usize {
        if self.threads > 0 {
            return self.threads;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    /// Explicit songlengths path, or the HVSC default under the SID root.
    pub fn songlengths_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.songlengths_path {
            return Some(path.clone());
        }
        let candidate = self.sid_path.join("DOCUMENTS").join("Songlengths.md5");
        candidate.is_file().then_some(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_object_is_defaults() {
        let config = RenderConfig::from_json_str("{}", Path::new("/etc/sidflow")).unwrap();
        assert_eq!(config.default_formats, vec![AudioFormat::Wav]);
        assert!(config.preferred_engines.is_empty());
        assert_eq!(config.max_render_sec, None);
        assert_eq!(config.policy, RenderPolicy::default());
        assert_eq!(config.sid_path, PathBuf::from("/etc/sidflow/./workspace/hvsc"));
    }

    #[test]
    fn test_full_config() {
        let json = r#"{
            "sidPath": "/data/C64Music",
            "wavCachePath": "cache",
            "threads": 4,
            "preferredEngines": ["sidplayfp-cli", "ultimate64"],
            "defaultFormats": ["wav", "flac", "wav"],
            "maxRenderSec": 45.5,
            "sidplayArgs": ["-f48000"],
            "renderPolicy": { "previewDefaultMs": 8000, "cliSafetyMarginSec": 3, "cliKillGraceMs": 250 }
        }"#;
        let config = RenderConfig::from_json_str(json, Path::new("/srv")).unwrap();

        assert_eq!(config.sid_path, PathBuf::from("/data/C64Music"));
        assert_eq!(config.wav_cache_path, PathBuf::from("/srv/cache"));
        assert_eq!(config.effective_threads(), 4);
        assert_eq!(config.preferred_engines, vec![EngineId::SidplayfpCli, EngineId::Ultimate64]);
        assert_eq!(config.default_formats, vec![AudioFormat::Wav, AudioFormat::Flac]);
        assert_eq!(config.max_render_sec, Some(45.5));
        assert_eq!(config.sidplay_args, vec!["-f48000".to_string()]);
        assert_eq!(config.policy.duration.preview_default_ms, 8_000);
        assert_eq!(config.policy.duration.min_render_floor_ms, 20_000);
        assert_eq!(config.policy.time_limit.safety_margin_seconds, 3);
        assert_eq!(config.policy.time_limit.fallback_seconds, 600);
        assert_eq!(config.policy.kill_grace, Duration::from_millis(250));
    }

    #[test]
    fn test_rejects_unknown_engine_and_format() {
        let err = RenderConfig::from_json_str(r#"{"preferredEngines": ["resid"]}"#, Path::new(".")).unwrap_err();
        assert!(err.to_string().contains("resid"));
        let err = RenderConfig::from_json_str(r#"{"defaultFormats": ["ogg"]}"#, Path::new(".")).unwrap_err();
        assert!(err.to_string().contains("ogg"));
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(RenderConfig::from_json_str(r#"{"defaultFormats": []}"#, Path::new(".")).is_err());
        assert!(RenderConfig::from_json_str(r#"{"maxRenderSec": 0}"#, Path::new(".")).is_err());
        assert!(RenderConfig::from_json_str(r#"{"maxRenderSec": -3}"#, Path::new(".")).is_err());
        assert!(RenderConfig::from_json_str(r#"{"thread": 2}"#, Path::new(".")).is_err());
    }

    #[test]
    fn test_explicit_file_resolves_relative_to_its_directory() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("sidflow.json");
        std::fs::write(&path, r#"{"sidPath": "hvsc", "songlengthsPath": "hvsc/DOCUMENTS/Songlengths.md5"}"#).unwrap();

        let config = RenderConfig::load(Some(&path)).unwrap();
        assert_eq!(config.sid_path, tmp.path().join("hvsc"));
        assert_eq!(
            config.songlengths_file(),
            Some(tmp.path().join("hvsc/DOCUMENTS/Songlengths.md5"))
        );
    }

    #[test]
    fn test_missing_explicit_file_is_config_error() {
        let err = RenderConfig::load(Some(Path::new("/nonexistent/sidflow.json"))).unwrap_err();
        assert!(matches!(err, SidflowError::Config(_)));
    }
}
