// SIDFlow Render Constants
// Defaults only. Every duration/timing value here can be overridden via the
// `renderPolicy` section of the config file.

// Duration policy
pub const PREVIEW_DEFAULT_MS: u64 = 10_000;
pub const MIN_RENDER_FLOOR_MS: u64 = 20_000;
pub const MAX_RENDER_DURATION_MS: u64 = 3_600_000;

// External engine time limit
pub const CLI_SAFETY_MARGIN_SECONDS: u64 = 2;
pub const CLI_FALLBACK_SECONDS: u64 = 600;
pub const CLI_KILL_GRACE_MS: u64 = 5_000;
pub const CLI_POLL_INTERVAL_MS: u64 = 50;
pub const CLI_STDERR_DRAIN_MS: u64 = 1_000;

// Engine identifiers
pub const ENGINE_WASM: &str = "wasm";
pub const ENGINE_SIDPLAYFP_CLI: &str = "sidplayfp-cli";
pub const ENGINE_ULTIMATE64: &str = "ultimate64";

// Formats
pub const FORMAT_WAV: &str = "wav";
pub const FORMAT_FLAC: &str = "flac";
pub const FORMAT_M4A: &str = "m4a";
pub const DEFAULT_FORMATS: [&str; 1] = [FORMAT_WAV];
pub const M4A_BITRATE: &str = "256k";

// WAV output
pub const WAV_HEADER_BYTES: u64 = 44;
pub const EMULATOR_CHUNK_FRAMES: usize = 4_096;

// Source files
pub const SID_EXTENSION: &str = "sid";
pub const EXTERNAL_SOURCES_FOLDER: &str = "_external";
pub const SONG_SEPARATOR: char = '@';
pub const STAGING_MARKER: &str = "tmp";

// Config
pub const CONFIG_ENV_VAR: &str = "SIDFLOW_CONFIG";
pub const CONFIG_LOCAL_FILENAME: &str = ".sidflow.json";
pub const CONFIG_FILENAME: &str = "sidflow.json";
pub const DEFAULT_SID_PATH: &str = "./workspace/hvsc";
pub const DEFAULT_WAV_CACHE_PATH: &str = "./workspace/audio-cache";

// Progress
pub const PROGRESS_CHANNEL_CAPACITY: usize = 1_024;
