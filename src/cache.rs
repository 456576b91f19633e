// Render cache layout and freshness
//
// Output paths mirror the source tree under the cache root. Writes always go
// to a hidden staging sibling and are renamed into place, so anything at a
// final path is complete.

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::constants::{EXTERNAL_SOURCES_FOLDER, SID_EXTENSION, SONG_SEPARATOR, STAGING_MARKER};
use crate::error::{Result, SidflowError};
use crate::render::AudioFormat;

/// Escape the characters that carry meaning in cache file names.
fn escape_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '%' => out.push_str("%25"),
            c if c == SONG_SEPARATOR => out.push_str("%40"),
            c => out.push(c),
        }
    }
    out
}

/// File stem used for cache entries. `.sid` is dropped; any other name is
/// kept whole and marked with a trailing separator, so `x.prg` and
/// `x.prg.sid` stay distinct.
fn cache_stem(source_path: &Path) -> String {
    let file_name = source_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "unnamed".to_string());

    let sid_stem = if source_path.extension() == Some(OsStr::new(SID_EXTENSION)) {
        source_path.file_stem().map(|s| s.to_string_lossy().to_string())
    } else {
        None
    };

    match sid_stem {
        Some(stem) => escape_name(&stem),
        None => format!("{}{}", escape_name(&file_name), SONG_SEPARATOR),
    }
}

/// Cache file name for a source, sub-tune and format.
///
/// Stems are escaped so the only unescaped `@` is one this function adds:
/// `x.sid#2` becomes `x@2`, which no plain source name can produce.
pub fn output_file_name(source_path: &Path, song_index: Option<u32>, format: AudioFormat) -> String {
    let stem = cache_stem(source_path);
    match song_index {
        Some(index) => format!("{}{}{}.{}", stem, SONG_SEPARATOR, index, format.extension()),
        None => format!("{}.{}", stem, format.extension()),
    }
}

/// Directory that holds the cache entries for a source.
pub fn output_dir_for(source_path: &Path, sid_root: &Path, output_root: &Path) -> PathBuf {
    match source_path.strip_prefix(sid_root) {
        Ok(relative) => match relative.parent() {
            Some(parent) => output_root.join(parent),
            None => output_root.to_path_buf(),
        },
        Err(_) => {
            let hash = blake3::hash(source_path.to_string_lossy().as_bytes());
            output_root
                .join(EXTERNAL_SOURCES_FOLDER)
                .join(&hash.to_hex()[..16])
        }
    }
}

/// Deterministic WAV cache path for a source file.
pub fn resolve_output_path(source_path: &Path, sid_root: &Path, output_root: &Path) -> PathBuf {
    output_dir_for(source_path, sid_root, output_root)
        .join(output_file_name(source_path, None, AudioFormat::Wav))
}

/// Existence-only freshness. Archives are immutable once ingested, so no
/// timestamps are compared.
pub fn is_fresh(output_path: &Path, force_rebuild: bool) -> bool {
    !force_rebuild && output_path.is_file()
}

/// Hidden, uniquely named sibling used while writing `final_path`.
pub fn staging_path(final_path: &Path) -> PathBuf {
    let stem = final_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let ext = final_path
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_default();
    let token = Uuid::new_v4().simple().to_string();

    let name = format!(".{}.{}.{}.{}", stem, &token[..12], STAGING_MARKER, ext);
    match final_path.parent() {
        Some(parent) => parent.join(name),
        None => PathBuf::from(name),
    }
}

/// Whether a file name belongs to a staging file.
pub fn is_staging_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    name.starts_with('.') && name.contains(&format!(".{}.", STAGING_MARKER))
}

/// Atomically move a finished staging file to its final path.
pub fn commit(staging: &Path, final_path: &Path) -> Result<u64> {
    let size = fs::metadata(staging)
        .map_err(|e| SidflowError::Other(format!(
            "Staging file {} missing: {}",
            staging.display(),
            e
        )))?
        .len();

    if let Some(parent) = final_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::rename(staging, final_path)?;
    Ok(size)
}

/// Commit a set of `(staging, final)` pairs as one unit.
///
/// If any rename fails, finals already committed by this call are removed
/// and the remaining staging files discarded, so a failed unit leaves no
/// partial set behind. Returns the final paths and total bytes.
pub fn commit_all(staged: &[(PathBuf, PathBuf)]) -> Result<(Vec<PathBuf>, u64)> {
    let mut committed: Vec<PathBuf> = Vec::with_capacity(staged.len());
    let mut bytes_written = 0;

    for (i, (staging, final_path)) in staged.iter().enumerate() {
        match commit(staging, final_path) {
            Ok(size) => {
                bytes_written += size;
                committed.push(final_path.clone());
            }
            Err(e) => {
                log::warn!(
                    "Commit of {} failed, rolling back {} committed file(s): {}",
                    final_path.display(),
                    committed.len(),
                    e
                );
                discard(&committed);
                let leftovers: Vec<PathBuf> = staged[i..].iter().map(|(s, _)| s.clone()).collect();
                discard(&leftovers);
                return Err(e);
            }
        }
    }

    Ok((committed, bytes_written))
}

/// Best-effort removal of files left by a failed attempt.
pub fn discard(paths: &[PathBuf]) {
    for path in paths {
        if path.is_file() {
            if let Err(e) = fs::remove_file(path) {
                log::warn!("Failed to remove {}: {}", path.display(), e);
            }
        }
    }
}

/// Cache rooted at an output directory, mirroring a collection root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderCache {
    sid_root: PathBuf,
    output_root: PathBuf,
}

impl RenderCache {
    pub fn new(sid_root: impl Into<PathBuf>, output_root: impl Into<PathBuf>) -> Self {
        Self {
            sid_root: sid_root.into(),
            output_root: output_root.into(),
        }
    }

    pub fn sid_root(&self) -> &Path {
        &self.sid_root
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    pub fn output_dir(&self, source_path: &Path) -> PathBuf {
        output_dir_for(source_path, &self.sid_root, &self.output_root)
    }

    pub fn resolve_output_path(&self, source_path: &Path) -> PathBuf {
        resolve_output_path(source_path, &self.sid_root, &self.output_root)
    }

    pub fn output_paths(&self, source_path: &Path, song_index: Option<u32>, formats: &[AudioFormat]) -> Vec<PathBuf> {
        let dir = self.output_dir(source_path);
        formats
            .iter()
            .map(|f| dir.join(output_file_name(source_path, song_index, *f)))
            .collect()
    }

    /// Fresh only when every requested format is present.
    pub fn is_fresh(
        &self,
        source_path: &Path,
        song_index: Option<u32>,
        formats: &[AudioFormat],
        force_rebuild: bool,
    ) -> bool {
        !formats.is_empty()
            && self
                .output_paths(source_path, song_index, formats)
                .iter()
                .all(|p| is_fresh(p, force_rebuild))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_mirrors_relative_path() {
        let path = resolve_output_path(
            Path::new("/hvsc/MUSICIANS/H/Hubbard_Rob/Commando.sid"),
            Path::new("/hvsc"),
            Path::new("/cache"),
        );
        assert_eq!(path, PathBuf::from("/cache/MUSICIANS/H/Hubbard_Rob/Commando.wav"));
    }

    #[test]
    fn test_same_source_same_path() {
        let a = resolve_output_path(Path::new("/hvsc/a/x.sid"), Path::new("/hvsc"), Path::new("/c"));
        let b = resolve_output_path(Path::new("/hvsc/a/x.sid"), Path::new("/hvsc"), Path::new("/c"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_distinct_sources_do_not_collide() {
        let root = Path::new("/hvsc");
        let out = Path::new("/c");
        let paths = [
            resolve_output_path(Path::new("/hvsc/a/x.sid"), root, out),
            resolve_output_path(Path::new("/hvsc/b/x.sid"), root, out),
            resolve_output_path(Path::new("/hvsc/a/x.SID"), root, out),
            resolve_output_path(Path::new("/hvsc/a/x.prg"), root, out),
            resolve_output_path(Path::new("/elsewhere/a/x.sid"), root, out),
            resolve_output_path(Path::new("/other/a/x.sid"), root, out),
            resolve_output_path(Path::new("/hvsc/a/x.prg.sid"), root, out),
            resolve_output_path(Path::new("/hvsc/a/x"), root, out),
        ];
        for (i, a) in paths.iter().enumerate() {
            for b in &paths[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_song_index_never_collides_with_a_sibling_file() {
        let cache = RenderCache::new("/hvsc", "/cache");
        let wav = [AudioFormat::Wav];
        let paths = [
            cache.output_paths(Path::new("/hvsc/A/x.sid"), Some(2), &wav),
            cache.output_paths(Path::new("/hvsc/A/x-2.sid"), None, &wav),
            cache.output_paths(Path::new("/hvsc/A/x@2.sid"), None, &wav),
            cache.output_paths(Path::new("/hvsc/A/x%402.sid"), None, &wav),
            cache.output_paths(Path::new("/hvsc/A/x"), Some(2), &wav),
            cache.output_paths(Path::new("/hvsc/A/x@"), Some(2), &wav),
            cache.output_paths(Path::new("/hvsc/A/x@.sid"), Some(2), &wav),
            cache.output_paths(Path::new("/hvsc/A/x.sid"), Some(22), &wav),
            cache.output_paths(Path::new("/hvsc/A/x@2.sid"), Some(2), &wav),
        ];
        for (i, a) in paths.iter().enumerate() {
            for b in &paths[i + 1..] {
                assert_ne!(a, b);
            }
        }
        assert_eq!(paths[0], vec![PathBuf::from("/cache/A/x@2.wav")]);
        assert_eq!(paths[1], vec![PathBuf::from("/cache/A/x-2.wav")]);
    }

    #[test]
    fn test_external_sources_are_hashed() {
        let path = resolve_output_path(Path::new("/tmp/x.sid"), Path::new("/hvsc"), Path::new("/c"));
        let parent = path.parent().unwrap();
        assert_eq!(parent.parent().unwrap(), Path::new("/c/_external"));
        assert_eq!(parent.file_name().unwrap().len(), 16);
        assert_eq!(path.file_name().unwrap(), "x.wav");
    }

    #[test]
    fn test_song_index_suffix() {
        assert_eq!(output_file_name(Path::new("/h/Tune.sid"), Some(3), AudioFormat::Flac), "Tune@3.flac");
        assert_eq!(output_file_name(Path::new("/h/Tune.sid"), None, AudioFormat::Wav), "Tune.wav");
        assert_eq!(output_file_name(Path::new("/h/Tune.prg"), None, AudioFormat::Wav), "Tune.prg@.wav");
        assert_eq!(output_file_name(Path::new("/h/50%@C64.sid"), Some(1), AudioFormat::Wav), "50%25%40C64@1.wav");
    }

    #[test]
    fn test_freshness_is_existence_only() {
        let tmp = TempDir::new().unwrap();
        let output = tmp.path().join("x.wav");
        assert!(!is_fresh(&output, false));
        std::fs::write(&output, b"RIFF").unwrap();
        assert!(is_fresh(&output, false));
        assert!(!is_fresh(&output, true));
    }

    #[test]
    fn test_cache_requires_every_format() {
        let tmp = TempDir::new().unwrap();
        let cache = RenderCache::new(tmp.path().join("hvsc"), tmp.path().join("cache"));
        let source = tmp.path().join("hvsc/A/t.sid");
        let formats = [AudioFormat::Wav, AudioFormat::Flac];

        let paths = cache.output_paths(&source, None, &formats);
        std::fs::create_dir_all(paths[0].parent().unwrap()).unwrap();
        std::fs::write(&paths[0], b"RIFF").unwrap();
        assert!(!cache.is_fresh(&source, None, &formats, false));

        std::fs::write(&paths[1], b"fLaC").unwrap();
        assert!(cache.is_fresh(&source, None, &formats, false));
        assert!(!cache.is_fresh(&source, None, &formats, true));
    }

    #[test]
    fn test_staging_is_hidden_sibling_and_committed_atomically() {
        let tmp = TempDir::new().unwrap();
        let final_path = tmp.path().join("sub").join("Tune.wav");
        let staging = staging_path(&final_path);

        assert_eq!(staging.parent(), final_path.parent());
        assert!(is_staging_file(&staging));
        assert!(!is_staging_file(&final_path));
        assert_eq!(staging.extension().unwrap(), "wav");
        assert_ne!(staging_path(&final_path), staging);

        std::fs::create_dir_all(staging.parent().unwrap()).unwrap();
        std::fs::write(&staging, vec![0u8; 100]).unwrap();
        let size = commit(&staging, &final_path).unwrap();
        assert_eq!(size, 100);
        assert!(final_path.exists());
        assert!(!staging.exists());
    }

    #[test]
    fn test_failed_commit_rolls_back_the_whole_set() {
        let tmp = TempDir::new().unwrap();
        let wav_final = tmp.path().join("Tune.wav");
        let flac_final = tmp.path().join("Tune.flac");
        let wav_staging = staging_path(&wav_final);
        let flac_staging = staging_path(&flac_final);
        std::fs::write(&wav_staging, vec![0u8; 100]).unwrap();
        std::fs::write(&flac_staging, vec![0u8; 50]).unwrap();

        // A directory squatting on the second final path makes its rename fail.
        std::fs::create_dir_all(flac_final.join("occupied")).unwrap();

        let result = commit_all(&[
            (wav_staging.clone(), wav_final.clone()),
            (flac_staging.clone(), flac_final.clone()),
        ]);

        assert!(result.is_err());
        assert!(!wav_final.exists());
        assert!(!wav_staging.exists());
        assert!(!flac_staging.exists());
        assert!(flac_final.join("occupied").is_dir());
    }

    #[test]
    fn test_commit_all_reports_paths_and_bytes() {
        let tmp = TempDir::new().unwrap();
        let wav_final = tmp.path().join("out/Tune.wav");
        let flac_final = tmp.path().join("out/Tune.flac");
        let wav_staging = tmp.path().join(".Tune.a.tmp.wav");
        let flac_staging = tmp.path().join(".Tune.b.tmp.flac");
        std::fs::write(&wav_staging, vec![0u8; 100]).unwrap();
        std::fs::write(&flac_staging, vec![0u8; 50]).unwrap();

        let (paths, bytes) = commit_all(&[
            (wav_staging, wav_final.clone()),
            (flac_staging, flac_final.clone()),
        ])
        .unwrap();

        assert_eq!(paths, vec![wav_final, flac_final]);
        assert_eq!(bytes, 150);
    }
}
