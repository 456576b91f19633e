// External tool resolver for sidplayfp and ffmpeg
//
// Resolution order:
// 1) Explicit path from config (sidplayPath / ffmpegPath)
// 2) Environment variable override (SIDFLOW_SIDPLAYFP_PATH, SIDFLOW_FFMPEG_PATH)
// 3) Binary next to the executable, or in its bin/ subdirectory
// 4) PATH fallback

use std::env;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Get the directory containing the current executable
fn exe_dir() -> Option<PathBuf> {
    env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|d| d.to_path_buf()))
}

/// Resolve a tool path, preferring an explicitly configured location.
fn resolve_tool(configured: Option<&Path>, env_key: &str, default_name: &str) -> PathBuf {
    if let Some(p) = configured {
        return p.to_path_buf();
    }

    if let Ok(v) = env::var(env_key) {
        let p = PathBuf::from(&v);
        if p.exists() {
            return p;
        }
    }

    let mut filename = default_name.to_string();
    if cfg!(windows) && !filename.to_lowercase().ends_with(".exe") {
        filename.push_str(".exe");
    }

    if let Some(dir) = exe_dir() {
        let candidate = dir.join(&filename);
        if candidate.exists() {
            return candidate;
        }

        let bin_candidate = dir.join("bin").join(&filename);
        if bin_candidate.exists() {
            return bin_candidate;
        }
    }

    PathBuf::from(default_name)
}

/// Get path to the sidplayfp binary
pub fn sidplayfp_path(configured: Option<&Path>) -> PathBuf {
    resolve_tool(configured, "SIDFLOW_SIDPLAYFP_PATH", "sidplayfp")
}

/// Get path to the ffmpeg binary
pub fn ffmpeg_path(configured: Option<&Path>) -> PathBuf {
    resolve_tool(configured, "SIDFLOW_FFMPEG_PATH", "ffmpeg")
}

/// Check if a resolved tool can actually be launched.
/// sidplayfp has no cheap version flag that exits 0 everywhere, so a
/// successful spawn is enough.
pub fn is_tool_available(path: &Path) -> bool {
    if path.is_file() {
        return true;
    }

    Command::new(path)
        .arg("--help")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok()
}
