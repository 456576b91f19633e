// WAV transcoding via ffmpeg

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::constants::M4A_BITRATE;
use crate::error::{Result, SidflowError};
use super::AudioFormat;

/// Turns engine WAV output into the other cache formats.
#[derive(Debug, Clone)]
pub struct FormatEncoder {
    ffmpeg: PathBuf,
}

impl FormatEncoder {
    pub fn new(ffmpeg: PathBuf) -> Self {
        Self { ffmpeg }
    }

    /// Build the ffmpeg argument list for one conversion.
    pub fn build_args(wav_path: &Path, format: AudioFormat, output_path: &Path) -> Result<Vec<String>> {
        let mut args: Vec<String> = vec![
            "-y".into(),
            "-hide_banner".into(),
            "-loglevel".into(), "error".into(),
            "-i".into(), path_str(wav_path)?,
        ];

        match format {
            AudioFormat::Wav => {
                return Err(SidflowError::Encode("WAV is produced directly by engines".to_string()));
            }
            AudioFormat::Flac => {
                args.extend_from_slice(&["-c:a".into(), "flac".into()]);
            }
            AudioFormat::M4a => {
                args.extend_from_slice(&[
                    "-c:a".into(), "aac".into(),
                    "-b:a".into(), M4A_BITRATE.into(),
                    "-movflags".into(), "+faststart".into(),
                ]);
            }
        }

        args.push(path_str(output_path)?);
        Ok(args)
    }

    /// Encode `wav_path` into `output_path`. The caller owns staging and
    /// cleanup of `output_path`.
    pub fn encode(&self, wav_path: &Path, format: AudioFormat, output_path: &Path) -> Result<()> {
        let args = Self::build_args(wav_path, format, output_path)?;

        let output = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| SidflowError::Encode(format!("Failed to run ffmpeg: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SidflowError::Encode(format!(
                "ffmpeg {} encode failed: {}",
                format,
                stderr.trim()
            )));
        }

        match std::fs::metadata(output_path) {
            Ok(meta) if meta.len() > 0 => Ok(()),
            _ => Err(SidflowError::Encode(format!(
                "ffmpeg produced no {} output",
                format
            ))),
        }
    }
}

fn path_str(path: &Path) -> Result<String> {
    path.to_str()
        .map(|s| s.to_string())
        .ok_or_else(|| SidflowError::InvalidPath(path.to_string_lossy().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flac_args() {
        let args = FormatEncoder::build_args(
            Path::new("/c/.a.x.tmp.wav"),
            AudioFormat::Flac,
            Path::new("/c/.a.y.tmp.flac"),
        )
        .unwrap();
        assert_eq!(
            args,
            vec!["-y", "-hide_banner", "-loglevel", "error", "-i", "/c/.a.x.tmp.wav", "-c:a", "flac", "/c/.a.y.tmp.flac"]
        );
    }

    #[test]
    fn test_m4a_args_set_bitrate() {
        let args = FormatEncoder::build_args(Path::new("in.wav"), AudioFormat::M4a, Path::new("out.m4a")).unwrap();
        assert!(args.windows(2).any(|w| w[0] == "-b:a" && w[1] == M4A_BITRATE));
        assert_eq!(args.last().unwrap(), "out.m4a");
    }

    #[test]
    fn test_wav_is_not_transcoded() {
        let err = FormatEncoder::build_args(Path::new("in.wav"), AudioFormat::Wav, Path::new("out.wav")).unwrap_err();
        assert!(matches!(err, SidflowError::Encode(_)));
    }

    #[test]
    fn test_missing_ffmpeg_is_encode_error() {
        let encoder = FormatEncoder::new(PathBuf::from("/nonexistent/ffmpeg"));
        let err = encoder
            .encode(Path::new("in.wav"), AudioFormat::Flac, Path::new("out.flac"))
            .unwrap_err();
        assert!(!err.is_engine_recoverable());
    }
}
