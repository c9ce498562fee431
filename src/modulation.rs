use crate::codec::MorseSymbol;
use crate::error::Result;
use crate::{Config, TimingSpec, ToneSpec};
use log::{debug, error};
use std::f64::consts::PI;

/// Generates signed 8-bit PCM for marks and spaces.
#[derive(Debug, Clone, Copy)]
pub struct ToneGenerator {
    spec: ToneSpec,
}

impl ToneGenerator {
    pub fn new(spec: ToneSpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> &ToneSpec {
        &self.spec
    }

    pub fn sample_count(&self, duration_ms: f32) -> usize {
        (self.spec.sample_rate as f64 * duration_ms as f64 / 1000.0).round() as usize
    }

    /// Tone length, cut down to whole sine periods so the mark ends at a zero crossing.
    pub fn tone_len(&self, duration_ms: f32) -> usize {
        let len = self.sample_count(duration_ms);
        len - len % self.spec.period_samples()
    }

    pub fn silence_len(&self, duration_ms: f32) -> usize {
        self.sample_count(duration_ms)
    }

    /// Streams a tone into `out`. Phase starts at zero on every call.
    pub fn tone_into<E: Extend<i8>>(&self, duration_ms: f32, out: &mut E) {
        let len = self.tone_len(duration_ms);
        let delta = 2.0 * PI * self.spec.frequency_hz as f64 / self.spec.sample_rate as f64;
        let scale = self.spec.amplitude as f64 * i8::MAX as f64;

        out.extend((0..len).map(|n| (scale * (delta * n as f64).sin()) as i8));
    }

    pub fn silence_into<E: Extend<i8>>(&self, duration_ms: f32, out: &mut E) {
        let len = self.silence_len(duration_ms);
        out.extend(std::iter::repeat(0i8).take(len));
    }

    pub fn tone(&self, duration_ms: f32) -> Vec<i8> {
        let mut samples = Vec::with_capacity(self.sample_count(duration_ms));
        self.tone_into(duration_ms, &mut samples);
        samples
    }

    pub fn silence(&self, duration_ms: f32) -> Vec<i8> {
        let mut samples = Vec::with_capacity(self.sample_count(duration_ms));
        self.silence_into(duration_ms, &mut samples);
        samples
    }
}

/// Renders a symbol string from [`crate::MorseCodec`] into one PCM buffer.
pub struct SignalEncoder {
    generator: ToneGenerator,
    timing: TimingSpec,
}

impl SignalEncoder {
    pub fn new(config: &Config) -> Self {
        Self {
            generator: ToneGenerator::new(config.tone),
            timing: config.timing,
        }
    }

    pub fn generator(&self) -> &ToneGenerator {
        &self.generator
    }

    pub fn render(&self, symbols: &str) -> Result<Vec<i8>> {
        let capacity = (4.0
            * self.timing.dot_ms()
            * symbols.len() as f32
            * self.generator.spec().sample_rate as f32
            / 1000.0) as usize;
        let mut pcm = Vec::with_capacity(capacity);

        for c in symbols.chars() {
            let symbol = MorseSymbol::try_from(c).map_err(|e| {
                error!("Encoder received {:?}, codec and encoder disagree on symbols", c);
                e
            })?;
            self.emit(symbol, &mut pcm);
        }

        debug!(
            "Rendered {} symbols into {} samples (capacity hint {})",
            symbols.len(),
            pcm.len(),
            capacity
        );

        Ok(pcm)
    }

    fn emit(&self, symbol: MorseSymbol, pcm: &mut Vec<i8>) {
        let dot = self.timing.dot_ms();
        if symbol.tone_units() > 0 {
            self.generator.tone_into(symbol.tone_units() as f32 * dot, pcm);
        }
        self.generator.silence_into(symbol.silence_units() as f32 * dot, pcm);
    }

    pub fn symbol_len(&self, symbol: MorseSymbol) -> usize {
        let dot = self.timing.dot_ms();
        let tone = match symbol.tone_units() {
            0 => 0,
            units => self.generator.tone_len(units as f32 * dot),
        };
        tone + self.generator.silence_len(symbol.silence_units() as f32 * dot)
    }

    /// Exact number of samples [`render`](Self::render) will produce.
    pub fn expected_len(&self, symbols: &str) -> Result<usize> {
        symbols.chars().try_fold(0usize, |acc, c| -> Result<usize> {
            Ok(acc + self.symbol_len(MorseSymbol::try_from(c)?))
        })
    }

    pub fn duration_ms(&self, symbols: &str) -> Result<f32> {
        let samples = self.expected_len(symbols)?;
        Ok(samples as f32 * 1000.0 / self.generator.spec().sample_rate as f32)
    }
}
