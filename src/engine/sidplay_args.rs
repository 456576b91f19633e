// sidplayfp argument builder
//
// One function per flag so the time-limit encoding can be tested without
// spawning anything.

use std::ffi::OsString;
use std::path::Path;

use crate::constants::{CLI_FALLBACK_SECONDS, CLI_SAFETY_MARGIN_SECONDS};

/// How target durations become a `-t` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeLimitEncoding {
    pub safety_margin_seconds: u64,
    pub fallback_seconds: u64,
}

impl Default for TimeLimitEncoding {
    fn default() -> Self {
        Self {
            safety_margin_seconds: CLI_SAFETY_MARGIN_SECONDS,
            fallback_seconds: CLI_FALLBACK_SECONDS,
        }
    }
}

impl TimeLimitEncoding {
    /// `ceil(ms / 1000) + margin`, or the fixed fallback when no target is known.
    pub fn seconds(&self, target_duration_ms: Option<u64>) -> u64 {
        match target_duration_ms {
            Some(ms) => ms.div_ceil(1000).saturating_add(self.safety_margin_seconds),
            None => self.fallback_seconds,
        }
    }

    /// The complete token list for a target duration.
    pub fn encode(&self, target_duration_ms: Option<u64>) -> Vec<String> {
        vec![time_limit_flag(self.seconds(target_duration_ms))]
    }
}

/// `-t<seconds>`
pub fn time_limit_flag(seconds: u64) -> String {
    format!("-t{}", seconds)
}

/// `-o<song>` (sidplayfp track selection, 1-based)
pub fn song_flag(song_index: u32) -> String {
    format!("-o{}", song_index)
}

/// `-w<path>` (write WAV to path instead of playing)
pub fn wav_output_flag(path: &Path) -> OsString {
    let mut flag = OsString::from("-w");
    flag.push(path.as_os_str());
    flag
}

/// Ordered sidplayfp invocation arguments.
#[derive(Debug, Clone, Default)]
pub struct SidplayArgs {
    args: Vec<OsString>,
}

impl SidplayArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Operator-supplied passthrough tokens, placed first.
    pub fn extra<S: AsRef<str>>(mut self, extra: &[S]) -> Self {
        self.args.extend(extra.iter().map(|s| OsString::from(s.as_ref())));
        self
    }

    /// Pre-encoded tokens such as the time limit.
    pub fn tokens(mut self, tokens: &[String]) -> Self {
        self.args.extend(tokens.iter().map(OsString::from));
        self
    }

    pub fn song(mut self, song_index: Option<u32>) -> Self {
        if let Some(index) = song_index {
            self.args.push(song_flag(index).into());
        }
        self
    }

    pub fn wav_output(mut self, path: &Path) -> Self {
        self.args.push(wav_output_flag(path));
        self
    }

    /// The SID file; must be the last argument.
    pub fn source(mut self, path: &Path) -> Self {
        self.args.push(path.as_os_str().to_owned());
        self
    }

    pub fn build(self) -> Vec<OsString> {
        self.args
    }
}
