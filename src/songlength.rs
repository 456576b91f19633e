// HVSC song-length database
//
// Parses Songlengths.md5: each `; /path/to/File.sid` comment names the file
// described by the following `<md5>=<durations>` line. Durations are
// `m:ss[.mmm]` tokens, one per sub-tune, optionally followed by `(X)` markers.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};

use regex::Regex;

use crate::error::{Result, SidflowError};

/// Read-only archive length lookup.
pub trait LengthLookup: Send + Sync {
    /// Known length of a sub-tune (1-based, default 1) in milliseconds.
    fn lookup_length(&self, source_path: &Path, song_index: Option<u32>) -> Option<u64>;
}

/// Parsed song-length database for one collection root.
#[derive(Debug, Clone, Default)]
pub struct SongLengthDb {
    sid_root: PathBuf,
    entries: HashMap<String, Vec<u64>>,
}

impl SongLengthDb {
    /// Load and parse a Songlengths.md5 file.
    pub fn load(sid_root: &Path, db_path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(db_path).map_err(|e| {
            SidflowError::Songlength(format!("Failed to read {}: {}", db_path.display(), e))
        })?;
        Ok(Self::parse(sid_root, &text))
    }

    pub fn parse(sid_root: &Path, text: &str) -> Self {
        let duration_re = Regex::new(r"^(\d+):(\d{1,2})(?:\.(\d{1,3}))?").expect("static regex");
        let mut entries = HashMap::new();
        let mut pending_path: Option<String> = None;

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('[') {
                continue;
            }

            if let Some(comment) = line.strip_prefix(';') {
                let path = comment.trim();
                pending_path = path.starts_with('/').then(|| path.to_string());
                continue;
            }

            let Some((_md5, durations)) = line.split_once('=') else {
                continue;
            };
            let Some(path) = pending_path.take() else {
                continue;
            };

            let lengths: Vec<u64> = durations
                .split_whitespace()
                .filter_map(|token| parse_duration_ms(&duration_re, token))
                .collect();

            if lengths.is_empty() {
                log::debug!("Songlengths entry for {} has no parsable durations", path);
                continue;
            }
            entries.insert(path, lengths);
        }

        Self { sid_root: sid_root.to_path_buf(), entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Lengths of every sub-tune, keyed by archive path (`/DIR/File.sid`).
    pub fn lengths(&self, archive_path: &str) -> Option<&[u64]> {
        self.entries.get(archive_path).map(|v| v.as_slice())
    }

    fn archive_key(&self, source_path: &Path) -> Option<String> {
        let relative = source_path.strip_prefix(&self.sid_root).ok()?;
        let mut key = String::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => {
                    key.push('/');
                    key.push_str(&part.to_string_lossy());
                }
                _ => return None,
            }
        }
        (!key.is_empty()).then_some(key)
    }
}

impl LengthLookup for SongLengthDb {
    fn lookup_length(&self, source_path: &Path, song_index: Option<u32>) -> Option<u64> {
        let key = self.archive_key(source_path)?;
        let index = song_index.unwrap_or(1).checked_sub(1)? as usize;
        self.lengths(&key)?.get(index).copied()
    }
}

fn parse_duration_ms(re: &Regex, token: &str) -> Option<u64> {
    let caps = re.captures(token)?;
    let minutes: u64 = caps.get(1)?.as_str().parse().ok()?;
    let seconds: u64 = caps.get(2)?.as_str().parse().ok()?;
    let millis = match caps.get(3) {
        Some(frac) => {
            let digits = frac.as_str();
            let value: u64 = digits.parse().ok()?;
            value * 10u64.pow(3 - digits.len() as u32)
        }
        None => 0,
    };
    Some((minutes * 60 + seconds) * 1000 + millis)
}

/// Caller-owned cache of loaded databases, keyed by collection root.
#[derive(Debug, Default)]
pub struct SongLengthCache {
    loaded: Mutex<HashMap<PathBuf, Arc<SongLengthDb>>>,
}

impl SongLengthCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the database for `sid_root`, loading `db_path` on first use.
    pub fn get_or_load(&self, sid_root: &Path, db_path: &Path) -> Result<Arc<SongLengthDb>> {
        let mut loaded = self.loaded.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(db) = loaded.get(sid_root) {
            return Ok(Arc::clone(db));
        }

        let db = Arc::new(SongLengthDb::load(sid_root, db_path)?);
        log::info!("Loaded {} song-length entries from {}", db.len(), db_path.display());
        loaded.insert(sid_root.to_path_buf(), Arc::clone(&db));
        Ok(db)
    }

    pub fn clear(&self) {
        self.loaded.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn len(&self) -> usize {
        self.loaded.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
