//! Incremental per-message state tracking
//!
//! For every live message id the store keeps a `MessageState` updated on
//! each frame: per-byte change trends with a sticky pattern classification,
//! bit-flip and bit-entropy counters, decay colors for visualization, and a
//! smoothed frequency estimate. Suppressed bits (user-muted or covered by
//! DBC-defined signals) are removed from the change detector before any of
//! this runs.

use once_cell::sync::Lazy;

/// Trend weight gain for a repeated constant-step change
const TREND_INC: u8 = 10;
/// Trend weight loss for a strict sign-flipping toggle
const TOGGLE_DECAY: u8 = 16;
/// Trend weight loss for an unclassified (jittery) change
const JITTER_DECAY: u8 = 8;

/// Weight ceiling below which a toggling byte classifies as Toggle
const LIMIT_TOGGLE: u8 = 100;
/// Weight floor above which a byte classifies as Increasing/Decreasing
const LIMIT_TREND: u8 = 160;
/// Weight floor above which an unclassified byte counts as noisy
const LIMIT_NOISY: u8 = 60;

/// Average per-bit entropy above which a byte counts as noisy
const ENTROPY_NOISY: f64 = 0.85;
/// Samples required before the entropy estimate is trusted
const ENTROPY_MIN_SAMPLES: u32 = 16;

/// Seconds within which a changed byte counts as "recently changed" for
/// suppression
const SUPPRESS_WINDOW: f64 = 2.0;

/// Binary entropy by `round(255 * p)`, precomputed once
static ENTROPY_LUT: Lazy<[f64; 256]> = Lazy::new(|| {
    let mut lut = [0.0f64; 256];
    for (i, slot) in lut.iter_mut().enumerate() {
        let p = i as f64 / 255.0;
        if p > 0.0 && p < 1.0 {
            *slot = -p * p.log2() - (1.0 - p) * (1.0 - p).log2();
        }
    }
    lut
});

/// Sticky classification of a byte's change behavior
///
/// A sample that matches no rule keeps the previous pattern; one mismatched
/// sample never reverts a byte to `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataPattern {
    #[default]
    None,
    Increasing,
    Decreasing,
    Toggle,
    RandomlyNoisy,
}

/// Visualization color with premultiplied-nothing plain alpha
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const TRANSPARENT: Rgba = Rgba { r: 0, g: 0, b: 0, a: 0 };
    /// Rising bytes
    pub const CYAN: Rgba = Rgba { r: 0, g: 0xBF, b: 0xFF, a: 0xFF };
    /// Falling bytes
    pub const RED: Rgba = Rgba { r: 0xDC, g: 0x14, b: 0x3C, a: 0xFF };

    pub fn with_alpha(self, a: u8) -> Rgba {
        Rgba { a, ..self }
    }
}

/// Per-byte change statistics
#[derive(Debug, Clone, PartialEq)]
pub struct ByteTrend {
    /// Time of the most recent (unsuppressed) change
    pub last_change_ts: f64,
    /// Signed delta of the most recent change
    pub last_delta: i32,
    /// Trend weight, saturating in [0, 255]
    pub weight: u8,
    /// Sticky classification
    pub pattern: DataPattern,
    /// User-muted byte; removed from the change detector
    pub suppressed: bool,
    /// Flip count per bit since the last counter reset
    pub bit_flips: [u32; 8],
    /// Samples with the bit set, for the entropy estimate
    pub bit_highs: [u32; 8],
    /// Total samples feeding `bit_highs`
    pub samples: u32,
}

impl Default for ByteTrend {
    fn default() -> Self {
        Self {
            last_change_ts: f64::NEG_INFINITY,
            last_delta: 0,
            weight: 0,
            pattern: DataPattern::None,
            suppressed: false,
            bit_flips: [0; 8],
            bit_highs: [0; 8],
            samples: 0,
        }
    }
}

impl ByteTrend {
    /// Average per-bit Shannon entropy; 0 until enough samples accumulate
    pub fn avg_entropy(&self) -> f64 {
        if self.samples < ENTROPY_MIN_SAMPLES {
            return 0.0;
        }
        let total = self.samples as f64;
        let sum: f64 = self
            .bit_highs
            .iter()
            .map(|&highs| {
                let idx = (255.0 * highs as f64 / total).round() as usize;
                ENTROPY_LUT[idx.min(255)]
            })
            .sum();
        sum / 8.0
    }
}

/// Mutable live state for one message id
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageState {
    /// Stream time of the last frame, seconds
    pub ts: f64,
    /// Frames seen (or, after a seek, frames at or before the target)
    pub count: u64,
    /// Smoothed arrival frequency in Hz
    pub freq: f64,
    /// Raw payload of the last frame
    pub dat: Vec<u8>,
    /// Per-byte decay colors
    pub colors: Vec<Rgba>,
    /// Per-byte change statistics
    pub trends: Vec<ByteTrend>,
    /// Seen recently enough to count as live
    pub active: bool,
}

impl MessageState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one frame into the tracker
    ///
    /// `mask` is the ignore-bitmask per byte (DBC-covered bits when that
    /// suppression is enabled); user-suppressed bytes extend it to 0xFF.
    /// `speed` is the playback speed, scaling stream time to perceived
    /// arrival rate.
    pub fn compute(&mut self, sec: f64, data: &[u8], speed: f64, mask: &[u8]) {
        if self.dat.len() != data.len() {
            // New message shape: byte tracking restarts, count/freq carry on
            self.dat = data.to_vec();
            self.trends = vec![ByteTrend::default(); data.len()];
            self.colors = vec![Rgba::TRANSPARENT; data.len()];
            self.count += 1;
            self.ts = sec;
            self.active = true;
            return;
        }

        self.count += 1;
        self.update_frequency(sec, speed);

        for i in 0..data.len() {
            let trend = &mut self.trends[i];
            let ignore =
                mask.get(i).copied().unwrap_or(0) | if trend.suppressed { 0xFF } else { 0 };
            // Ignored bits drop out of both the change detector and the delta
            let last = self.dat[i] & !ignore;
            let cur = data[i] & !ignore;
            let changed = last ^ cur;

            if changed != 0 {
                let delta = cur as i32 - last as i32;
                let toggling = trend.last_delta != 0 && delta == -trend.last_delta;

                if delta == trend.last_delta {
                    trend.weight = trend.weight.saturating_add(2 * TREND_INC);
                } else if delta.signum() == trend.last_delta.signum() {
                    trend.weight = trend.weight.saturating_add(TREND_INC);
                } else if toggling {
                    trend.weight = trend.weight.saturating_sub(TOGGLE_DECAY);
                } else {
                    trend.weight = trend.weight.saturating_sub(JITTER_DECAY);
                }

                for bit in 0..8 {
                    if changed & (1 << bit) != 0 {
                        trend.bit_flips[bit] += 1;
                    }
                }

                // First match wins; no match keeps the prior pattern
                let entropy = trend.avg_entropy();
                if toggling && trend.weight < LIMIT_TOGGLE {
                    trend.pattern = DataPattern::Toggle;
                } else if trend.weight > LIMIT_TREND {
                    trend.pattern = if delta > 0 {
                        DataPattern::Increasing
                    } else {
                        DataPattern::Decreasing
                    };
                } else if entropy > ENTROPY_NOISY || trend.weight > LIMIT_NOISY {
                    trend.pattern = DataPattern::RandomlyNoisy;
                }

                trend.last_delta = delta;
                trend.last_change_ts = sec;
                self.colors[i] = if delta > 0 { Rgba::CYAN } else { Rgba::RED };
            }

            // Entropy sampling over unmasked bits
            trend.samples += 1;
            for bit in 0..8 {
                if ignore & (1 << bit) == 0 && data[i] & (1 << bit) != 0 {
                    trend.bit_highs[bit] += 1;
                }
            }
        }

        self.decay_colors(sec);
        self.dat.copy_from_slice(data);
        self.ts = sec;
        self.active = true;
    }

    /// EMA frequency estimate with adaptive smoothing: heavy (0.1) for
    /// sub-100ms inter-arrivals, fast (0.6) otherwise; the first sample
    /// seeds the estimate directly
    fn update_frequency(&mut self, sec: f64, speed: f64) {
        let dt = (sec - self.ts).max(1e-6);
        let inst = speed / dt;
        if self.freq == 0.0 {
            self.freq = inst;
        } else {
            let alpha = if dt < 0.1 { 0.1 } else { 0.6 };
            self.freq = alpha * inst + (1.0 - alpha) * self.freq;
        }
    }

    /// Fade byte colors toward transparent based on time since change
    fn decay_colors(&mut self, sec: f64) {
        let decay_limit = (2.0 / self.freq.max(1e-9)).clamp(0.4, 2.5);
        for (color, trend) in self.colors.iter_mut().zip(&self.trends) {
            let elapsed = sec - trend.last_change_ts;
            if elapsed >= decay_limit || trend.suppressed {
                *color = Rgba::TRANSPARENT;
            } else {
                // ~5% alpha at the decay boundary
                let alpha = 230.0 * (-elapsed / (decay_limit / 3.0)).exp();
                *color = color.with_alpha(alpha as u8);
            }
        }
    }

    /// Mute every byte that changed within the last 2 seconds; returns how
    /// many bytes are muted afterwards. Flip counters reset so a later
    /// unmute starts clean.
    pub fn suppress_recent_changes(&mut self, current_sec: f64) -> usize {
        let mut muted = 0;
        for trend in &mut self.trends {
            if current_sec - trend.last_change_ts < SUPPRESS_WINDOW {
                trend.suppressed = true;
            }
            trend.bit_flips = [0; 8];
            muted += trend.suppressed as usize;
        }
        muted
    }

    /// Unmute all bytes
    pub fn clear_suppression(&mut self) {
        for trend in &mut self.trends {
            trend.suppressed = false;
        }
    }

    /// Reset bit counters under newly-masked bits so stale statistics do
    /// not leak through a mask change
    pub fn apply_mask(&mut self, mask: &[u8]) {
        for (i, trend) in self.trends.iter_mut().enumerate() {
            let mask_byte = mask.get(i).copied().unwrap_or(0);
            for bit in 0..8 {
                if mask_byte & (1 << bit) != 0 {
                    trend.bit_flips[bit] = 0;
                    trend.bit_highs[bit] = 0;
                }
            }
        }
    }
}
