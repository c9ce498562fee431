pub mod audio;
pub mod codec;
pub mod error;
pub mod modulation;
pub mod receiver;
pub mod transmitter;

pub use audio::*;
pub use codec::*;
pub use error::*;
pub use modulation::*;
pub use receiver::*;
pub use transmitter::*;

use std::time::Duration;

pub const SAMPLE_RATE: u32 = 22050;
pub const DEFAULT_FREQUENCY_HZ: u32 = 800;
pub const DEFAULT_WPM: u32 = 20;
pub const DEFAULT_AMPLITUDE: f32 = 1.0;

/// Tone parameters shared by every generated mark.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToneSpec {
    pub frequency_hz: u32,
    pub sample_rate: u32,
    /// Fraction of full scale, in (0, 1].
    pub amplitude: f32,
}

impl ToneSpec {
    /// Whole samples in one sine period, the unit tones are truncated to.
    pub fn period_samples(&self) -> usize {
        (self.sample_rate / self.frequency_hz).max(1) as usize
    }
}

impl Default for ToneSpec {
    fn default() -> Self {
        Self {
            frequency_hz: DEFAULT_FREQUENCY_HZ,
            sample_rate: SAMPLE_RATE,
            amplitude: DEFAULT_AMPLITUDE,
        }
    }
}

/// Morse timing derived from a words-per-minute speed (PARIS standard).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimingSpec {
    pub wpm: u32,
}

impl TimingSpec {
    pub fn dot_ms(&self) -> f32 {
        1200.0 / self.wpm as f32
    }

    pub fn dash_ms(&self) -> f32 {
        3.0 * self.dot_ms()
    }
}

impl Default for TimingSpec {
    fn default() -> Self {
        Self { wpm: DEFAULT_WPM }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub tone: ToneSpec,
    pub timing: TimingSpec,
    pub capture: AudioFormat,
    pub playback_timeout: Option<Duration>,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.timing.wpm == 0 {
            return Err(MorseError::InvalidConfig("speed must be at least 1 WPM".into()));
        }
        if self.tone.sample_rate == 0 {
            return Err(MorseError::InvalidConfig("sample rate must be positive".into()));
        }
        if self.tone.frequency_hz == 0 || self.tone.frequency_hz > self.tone.sample_rate / 2 {
            return Err(MorseError::InvalidConfig(format!(
                "tone frequency {} Hz must be between 1 Hz and {} Hz",
                self.tone.frequency_hz,
                self.tone.sample_rate / 2
            )));
        }
        if !(self.tone.amplitude > 0.0 && self.tone.amplitude <= 1.0) {
            return Err(MorseError::InvalidConfig(format!(
                "amplitude {} outside (0, 1]",
                self.tone.amplitude
            )));
        }
        if self.capture.sample_rate == 0 || self.capture.channels == 0 {
            return Err(MorseError::InvalidConfig("capture format is empty".into()));
        }
        Ok(())
    }

    pub fn playback_format(&self) -> AudioFormat {
        AudioFormat::playback(self.tone.sample_rate)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tone: ToneSpec::default(),
            timing: TimingSpec::default(),
            capture: AudioFormat::capture_default(),
            playback_timeout: None,
        }
    }
}
