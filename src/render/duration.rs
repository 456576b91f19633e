// Render duration policy

use crate::constants::{MAX_RENDER_DURATION_MS, MIN_RENDER_FLOOR_MS, PREVIEW_DEFAULT_MS};

/// Constants behind the duration policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurationPolicy {
    /// Used when no render cap is configured.
    pub preview_default_ms: u64,
    /// Lower bound once a cap is configured.
    pub min_render_floor_ms: u64,
}

impl Default for DurationPolicy {
    fn default() -> Self {
        Self {
            preview_default_ms: PREVIEW_DEFAULT_MS,
            min_render_floor_ms: MIN_RENDER_FLOOR_MS,
        }
    }
}

impl DurationPolicy {
    /// Target render duration from the archive's known length and the
    /// configured cap.
    ///
    /// Without a cap this is always the preview default. With a cap, the
    /// known length is used when shorter than the cap, and the result never
    /// drops below the floor.
    pub fn target_duration_ms(&self, known_duration_ms: Option<u64>, max_render_seconds: Option<f64>) -> u64 {
        let Some(cap_seconds) = max_render_seconds else {
            return self.preview_default_ms;
        };

        let cap_ms = seconds_to_ms(cap_seconds);
        let candidate = match known_duration_ms {
            Some(known) if known < cap_ms => known,
            _ => cap_ms,
        };

        candidate.max(self.min_render_floor_ms)
    }

    /// Resolve both the duration every engine renders and the duration the
    /// external engine's time limit is encoded from.
    ///
    /// The external engine only gets a concrete limit from an explicit
    /// override or a known archive length. A cap alone bounds the render but
    /// says nothing about the tune, so the fixed fallback limit applies.
    /// Every duration is clamped to `MAX_RENDER_DURATION_MS`.
    pub fn resolve(
        &self,
        override_ms: Option<u64>,
        known_duration_ms: Option<u64>,
        max_render_seconds: Option<f64>,
    ) -> RenderTiming {
        if let Some(ms) = override_ms {
            let ms = ms.min(MAX_RENDER_DURATION_MS);
            return RenderTiming { target_duration_ms: ms, cli_duration_ms: Some(ms) };
        }

        let target = self
            .target_duration_ms(known_duration_ms, max_render_seconds)
            .min(MAX_RENDER_DURATION_MS);

        RenderTiming {
            target_duration_ms: target,
            cli_duration_ms: known_duration_ms.map(|_| target),
        }
    }
}

/// Durations computed once per request and shared by every engine attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderTiming {
    pub target_duration_ms: u64,
    pub cli_duration_ms: Option<u64>,
}

/// Target duration with the default policy constants.
pub fn compute_target_duration_ms(known_duration_ms: Option<u64>, max_render_seconds: Option<f64>) -> u64 {
    DurationPolicy::default().target_duration_ms(known_duration_ms, max_render_seconds)
}

/// Seconds to whole milliseconds, clamped to `MAX_RENDER_DURATION_MS`.
/// Non-finite and non-positive values map to zero.
fn seconds_to_ms(seconds: f64) -> u64 {
    if !seconds.is_finite() || seconds <= 0.0 {
        return 0;
    }
    let ms = (seconds * 1000.0).round();
    if ms >= MAX_RENDER_DURATION_MS as f64 {
        MAX_RENDER_DURATION_MS
    } else {
        ms as u64
    }
}
