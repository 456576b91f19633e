// Command-line surface
//
// Flags are captured as raw strings by clap and validated here, so every
// problem is reported in one pass instead of stopping at the first.

use std::path::PathBuf;

use clap::error::ErrorKind;
use clap::Parser;

use crate::constants::MAX_RENDER_DURATION_MS;
use crate::engine::EngineId;
use crate::render::{dedup_formats, AudioFormat};

#[derive(Parser, Debug)]
#[command(name = "sidflow-render")]
#[command(about = "Render SID tunes into a cached audio library", long_about = None)]
#[command(version)]
struct RawArgs {
    /// Config file (defaults to $SIDFLOW_CONFIG, ./.sidflow.json, then the user config dir)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Engine to try first (wasm, sidplayfp-cli, ultimate64)
    #[arg(long, value_name = "NAME")]
    engine: Option<String>,

    /// Comma-separated output formats (wav, flac, m4a)
    #[arg(long, value_name = "LIST")]
    formats: Option<String>,

    /// Render exactly this many seconds, ignoring the duration policy
    #[arg(long = "target-duration", value_name = "SECONDS")]
    target_duration: Option<String>,

    /// Render only this file; append #N to pick a sub-tune. Repeatable.
    #[arg(long = "sid", value_name = "PATH[#SONG]")]
    sid: Vec<String>,

    /// Worker threads (overrides the config file)
    #[arg(long, value_name = "N")]
    threads: Option<String>,

    /// Re-render files that are already cached
    #[arg(long)]
    force_rebuild: bool,
}

/// A `--sid` selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidSelection {
    pub path: PathBuf,
    /// 1-based sub-tune.
    pub song_index: Option<u32>,
}

/// Validated CLI options. Fields left `None` fall back to configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderOptions {
    pub config_path: Option<PathBuf>,
    pub engine: Option<EngineId>,
    pub formats: Option<Vec<AudioFormat>>,
    pub target_duration_ms: Option<u64>,
    pub sids: Vec<SidSelection>,
    pub threads: Option<usize>,
    pub force_rebuild: bool,
}

/// Result of parsing the command line. Never fails; problems are listed in `errors`.
#[derive(Debug, Clone, Default)]
pub struct ParsedRenderArgs {
    pub options: RenderOptions,
    pub errors: Vec<String>,
    pub help_requested: bool,
    /// Rendered help or version text, when requested.
    pub message: Option<String>,
}

impl ParsedRenderArgs {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Parse CLI arguments (including the program name at position 0).
pub fn parse_render_args<I, T>(args: I) -> ParsedRenderArgs
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let raw = match RawArgs::try_parse_from(args) {
        Ok(raw) => raw,
        Err(e) => {
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ParsedRenderArgs {
                    help_requested: e.kind() == ErrorKind::DisplayHelp,
                    message: Some(e.to_string()),
                    ..ParsedRenderArgs::default()
                },
                _ => ParsedRenderArgs {
                    errors: vec![first_line(&e.to_string())],
                    ..ParsedRenderArgs::default()
                },
            };
        }
    };

    let mut errors = Vec::new();
    let mut options = RenderOptions {
        config_path: raw.config,
        force_rebuild: raw.force_rebuild,
        ..RenderOptions::default()
    };

    if let Some(name) = raw.engine {
        match name.parse::<EngineId>() {
            Ok(engine) => options.engine = Some(engine),
            Err(e) => errors.push(format!("--engine: {}", e)),
        }
    }

    if let Some(list) = raw.formats {
        match parse_format_list(&list) {
            Ok(formats) => options.formats = Some(formats),
            Err(e) => errors.push(format!("--formats: {}", e)),
        }
    }

    if let Some(value) = raw.target_duration {
        match parse_seconds_ms(&value) {
            Some(ms) => options.target_duration_ms = Some(ms),
            None => errors.push(format!(
                "--target-duration: expected a positive number of seconds up to {}, got '{}'",
                MAX_RENDER_DURATION_MS / 1000,
                value
            )),
        }
    }

    for spec in raw.sid {
        match parse_sid_selection(&spec) {
            Ok(selection) => options.sids.push(selection),
            Err(e) => errors.push(format!("--sid: {}", e)),
        }
    }

    if let Some(value) = raw.threads {
        match value.trim().parse::<usize>() {
            Ok(n) if n > 0 => options.threads = Some(n),
            _ => errors.push(format!("--threads: expected a positive integer, got '{}'", value)),
        }
    }

    ParsedRenderArgs { options, errors, help_requested: false, message: None }
}

/// Parse `wav,flac` style lists. Duplicates are dropped; empty lists are rejected.
pub fn parse_format_list(list: &str) -> Result<Vec<AudioFormat>, String> {
    let mut formats = Vec::new();
    let mut unknown = Vec::new();
    for name in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match name.parse::<AudioFormat>() {
            Ok(format) => formats.push(format),
            Err(_) => unknown.push(name.to_string()),
        }
    }

    if !unknown.is_empty() {
        return Err(format!(
            "unknown format(s) {} (expected wav, flac, m4a)",
            unknown.join(", ")
        ));
    }
    if formats.is_empty() {
        return Err("no formats given".to_string());
    }
    Ok(dedup_formats(&formats))
}

/// Parse `path` or `path#song`.
pub fn parse_sid_selection(spec: &str) -> Result<SidSelection, String> {
    let (path, song) = match spec.rsplit_once('#') {
        Some((path, song)) => (path, Some(song)),
        None => (spec, None),
    };

    if path.trim().is_empty() {
        return Err(format!("missing path in '{}'", spec));
    }

    let song_index = match song {
        Some(song) => match song.trim().parse::<u32>() {
            Ok(index) if index >= 1 => Some(index),
            _ => return Err(format!("song index in '{}' must be a positive integer", spec)),
        },
        None => None,
    };

    Ok(SidSelection { path: PathBuf::from(path), song_index })
}

fn parse_seconds_ms(value: &str) -> Option<u64> {
    let seconds: f64 = value.trim().parse().ok()?;
    if !seconds.is_finite() || seconds <= 0.0 {
        return None;
    }
    let ms = (seconds * 1000.0).round();
    if ms > MAX_RENDER_DURATION_MS as f64 {
        return None;
    }
    Some(ms as u64)
}

fn first_line(text: &str) -> String {
    text.lines()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("invalid arguments")
        .trim()
        .trim_start_matches("error: ")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> ParsedRenderArgs {
        let mut argv = vec!["sidflow-render"];
        argv.extend_from_slice(args);
        parse_render_args(argv)
    }

    #[test]
    fn test_no_args_is_all_defaults() {
        let parsed = parse(&[]);
        assert!(parsed.is_ok());
        assert!(!parsed.help_requested);
        assert_eq!(parsed.options, RenderOptions::default());
    }

    #[test]
    fn test_full_command_line() {
        let parsed = parse(&[
            "--engine", "sidplayfp-cli",
            "--formats", "flac, wav,flac",
            "--target-duration", "12.5",
            "--sid", "/hvsc/A/one.sid",
            "--sid", "/hvsc/B/two.sid#3",
            "--threads", "4",
            "--force-rebuild",
        ]);
        assert!(parsed.is_ok(), "{:?}", parsed.errors);

        let options = parsed.options;
        assert_eq!(options.engine, Some(EngineId::SidplayfpCli));
        assert_eq!(options.formats, Some(vec![AudioFormat::Flac, AudioFormat::Wav]));
        assert_eq!(options.target_duration_ms, Some(12_500));
        assert_eq!(
            options.sids,
            vec![
                SidSelection { path: PathBuf::from("/hvsc/A/one.sid"), song_index: None },
                SidSelection { path: PathBuf::from("/hvsc/B/two.sid"), song_index: Some(3) },
            ]
        );
        assert_eq!(options.threads, Some(4));
        assert!(options.force_rebuild);
    }

    #[test]
    fn test_errors_are_collected() {
        let parsed = parse(&[
            "--engine", "resid",
            "--formats", "wav,mp3",
            "--target-duration", "0",
            "--sid", "tune.sid#0",
            "--threads", "zero",
        ]);
        assert_eq!(parsed.errors.len(), 5, "{:?}", parsed.errors);
        assert!(parsed.errors[0].starts_with("--engine"));
        assert!(parsed.errors[1].contains("mp3"));
        assert!(parsed.errors[2].starts_with("--target-duration"));
        assert!(parsed.errors[3].starts_with("--sid"));
        assert!(parsed.errors[4].starts_with("--threads"));
    }

    #[test]
    fn test_target_duration_is_bounded() {
        let parsed = parse(&["--target-duration", "1e15"]);
        assert!(!parsed.is_ok());
        assert!(parsed.errors[0].starts_with("--target-duration"));
        assert_eq!(parsed.options.target_duration_ms, None);

        assert!(!parse(&["--target-duration", "inf"]).is_ok());
        assert_eq!(parse(&["--target-duration", "3600"]).options.target_duration_ms, Some(3_600_000));
        assert!(!parse(&["--target-duration", "3600.5"]).is_ok());
    }

    #[test]
    fn test_help_is_not_an_error() {
        let parsed = parse(&["--help"]);
        assert!(parsed.help_requested);
        assert!(parsed.is_ok());
        assert!(parsed.message.unwrap().contains("--target-duration"));
    }

    #[test]
    fn test_unknown_flag_is_reported() {
        let parsed = parse(&["--bogus"]);
        assert!(!parsed.is_ok());
        assert!(parsed.errors[0].contains("--bogus"));
    }

    #[test]
    fn test_sid_selection_parsing() {
        assert_eq!(
            parse_sid_selection("dir/x.sid#2").unwrap(),
            SidSelection { path: PathBuf::from("dir/x.sid"), song_index: Some(2) }
        );
        assert!(parse_sid_selection("#2").is_err());
        assert!(parse_sid_selection("x.sid#two").is_err());
    }

    #[test]
    fn test_empty_format_list_rejected() {
        assert!(parse_format_list(" , ").is_err());
    }
}
