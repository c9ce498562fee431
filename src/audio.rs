use crate::error::{MorseError, Result};
use crate::receiver::{CaptureLine, CaptureProvider};
use crate::transmitter::{CompletionObserver, PlaybackLine, PlaybackProvider};
use crate::SAMPLE_RATE;
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, StreamConfig};
use log::{debug, error, warn};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Capture lines buffer this much audio; blocks are a fraction of it.
const DEVICE_BUFFER_MS: usize = 500;
/// A read that sees no audio for this long is treated as end of stream.
const READ_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleWidth {
    Eight,
    Sixteen,
}

impl SampleWidth {
    pub fn bytes(self) -> usize {
        match self {
            SampleWidth::Eight => 1,
            SampleWidth::Sixteen => 2,
        }
    }

    pub fn bits(self) -> u16 {
        8 * self.bytes() as u16
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    Little,
    Big,
}

/// Signed PCM stream layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub width: SampleWidth,
    pub channels: u16,
    pub endianness: Endianness,
}

impl AudioFormat {
    /// 8-bit signed mono, the layout of every rendered Morse buffer.
    pub fn playback(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            width: SampleWidth::Eight,
            channels: 1,
            endianness: Endianness::Little,
        }
    }

    pub fn capture_default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            width: SampleWidth::Eight,
            channels: 2,
            endianness: Endianness::Little,
        }
    }

    pub fn frame_bytes(&self) -> usize {
        self.width.bytes() * self.channels as usize
    }

    pub fn bytes_per_second(&self) -> usize {
        self.frame_bytes() * self.sample_rate as usize
    }

    /// Appends one normalized sample in this format's byte layout.
    pub fn encode_sample(&self, sample: f32, out: &mut Vec<u8>) {
        let sample = sample.clamp(-1.0, 1.0);
        match self.width {
            SampleWidth::Eight => out.push((sample * i8::MAX as f32) as i8 as u8),
            SampleWidth::Sixteen => {
                let value = (sample * i16::MAX as f32) as i16;
                let mut buf = [0u8; 2];
                match self.endianness {
                    Endianness::Little => LittleEndian::write_i16(&mut buf, value),
                    Endianness::Big => BigEndian::write_i16(&mut buf, value),
                }
                out.extend_from_slice(&buf);
            }
        }
    }

    fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            channels: self.channels,
            sample_rate: cpal::SampleRate(self.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        }
    }
}

/// Raw bytes from one capture read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioBlock {
    bytes: Vec<u8>,
}

impl AudioBlock {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Decodes the raw bytes into signed samples, channels left interleaved.
    /// A trailing partial sample is ignored.
    pub fn samples(&self, format: &AudioFormat) -> Vec<i16> {
        match format.width {
            SampleWidth::Eight => self.bytes.iter().map(|&b| b as i8 as i16).collect(),
            SampleWidth::Sixteen => {
                let count = self.bytes.len() / 2;
                let mut samples = vec![0i16; count];
                let src = &self.bytes[..count * 2];
                match format.endianness {
                    Endianness::Little => LittleEndian::read_i16_into(src, &mut samples),
                    Endianness::Big => BigEndian::read_i16_into(src, &mut samples),
                }
                samples
            }
        }
    }
}

fn audio_device_error<E: std::fmt::Display>(e: E) -> MorseError {
    MorseError::ResourceUnavailable(e.to_string())
}

type ObserverSlot = Arc<Mutex<Option<CompletionObserver>>>;

fn notify(slot: &ObserverSlot, outcome: Result<()>) {
    let observer = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
    if let Some(observer) = observer {
        observer(outcome);
    }
}

/// Plays buffers on the default output device.
#[derive(Debug, Default)]
pub struct CpalPlayback;

impl CpalPlayback {
    pub fn new() -> Self {
        Self
    }
}

impl PlaybackProvider for CpalPlayback {
    fn open(&mut self, format: &AudioFormat, pcm: Arc<[i8]>) -> Result<Box<dyn PlaybackLine>> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| MorseError::ResourceUnavailable("No output device found".into()))?;

        debug!(
            "Opened output device {} for {} samples",
            device.name().unwrap_or_else(|_| "<unknown>".into()),
            pcm.len()
        );

        Ok(Box::new(CpalPlaybackLine {
            device,
            config: format.stream_config(),
            pcm,
            observer: Arc::new(Mutex::new(None)),
            stream: None,
        }))
    }
}

struct CpalPlaybackLine {
    device: Device,
    config: StreamConfig,
    pcm: Arc<[i8]>,
    observer: ObserverSlot,
    stream: Option<cpal::Stream>,
}

impl PlaybackLine for CpalPlaybackLine {
    fn on_stopped(&mut self, observer: CompletionObserver) {
        *self.observer.lock().unwrap_or_else(PoisonError::into_inner) = Some(observer);
    }

    fn start(&mut self) -> Result<()> {
        let pcm = Arc::clone(&self.pcm);
        let done = Arc::clone(&self.observer);
        let failed = Arc::clone(&self.observer);
        let channels = self.config.channels.max(1) as usize;
        let mut position = 0usize;

        let stream = self
            .device
            .build_output_stream(
                &self.config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    // The previous callback handed the last samples to the device.
                    let drained = position >= pcm.len();

                    for frame in data.chunks_mut(channels) {
                        let value = match pcm.get(position) {
                            Some(&sample) => {
                                position += 1;
                                sample as f32 / 128.0
                            }
                            None => 0.0,
                        };
                        frame.iter_mut().for_each(|s| *s = value);
                    }

                    if drained {
                        notify(&done, Ok(()));
                    }
                },
                move |err| {
                    error!("Audio output error: {}", err);
                    notify(&failed, Err(MorseError::IoFailure(err.to_string())));
                },
                None,
            )
            .map_err(audio_device_error)?;

        stream
            .play()
            .map_err(|e| MorseError::IoFailure(e.to_string()))?;
        self.stream = Some(stream);

        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stream) = &self.stream {
            if let Err(e) = stream.pause() {
                warn!("Failed to pause output stream: {}", e);
            }
        }
    }

    fn close(&mut self) {
        if self.stream.take().is_some() {
            debug!("Output stream released");
        }
        self.observer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: the stream is created and played on the thread that owns the
/// [`crate::Receiver`], carried untouched through the capture thread, and
/// dropped by the owner again after that thread has been joined.
struct SendableStream(cpal::Stream);

unsafe impl Send for SendableStream {}

/// Records from the default input device.
#[derive(Debug, Default)]
pub struct CpalCapture;

impl CpalCapture {
    pub fn new() -> Self {
        Self
    }
}

impl CaptureProvider for CpalCapture {
    fn open(&mut self, format: &AudioFormat) -> Result<Box<dyn CaptureLine>> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| MorseError::ResourceUnavailable("No input device found".into()))?;

        let (tx, rx) = crossbeam_channel::unbounded::<Vec<u8>>();
        let layout = *format;

        let stream = device
            .build_input_stream(
                &format.stream_config(),
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let mut bytes = Vec::with_capacity(data.len() * layout.width.bytes());
                    for &sample in data {
                        layout.encode_sample(sample, &mut bytes);
                    }
                    // The line may already be closed.
                    let _ = tx.send(bytes);
                },
                |err| error!("Audio input error: {}", err),
                None,
            )
            .map_err(audio_device_error)?;

        debug!(
            "Opened input device {} ({} Hz, {}-bit, {} ch)",
            device.name().unwrap_or_else(|_| "<unknown>".into()),
            format.sample_rate,
            format.width.bits(),
            format.channels
        );

        Ok(Box::new(CpalCaptureLine {
            stream: Some(SendableStream(stream)),
            chunks: rx,
            pending: VecDeque::new(),
            buffer_size: format.bytes_per_second() * DEVICE_BUFFER_MS / 1000,
        }))
    }
}

struct CpalCaptureLine {
    stream: Option<SendableStream>,
    chunks: crossbeam_channel::Receiver<Vec<u8>>,
    pending: VecDeque<u8>,
    buffer_size: usize,
}

impl CaptureLine for CpalCaptureLine {
    fn start(&mut self) -> Result<()> {
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| MorseError::IoFailure("capture line is closed".into()))?;
        stream
            .0
            .play()
            .map_err(|e| MorseError::IoFailure(e.to_string()))
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.stream.is_none() {
            return Err(MorseError::IoFailure("capture line is closed".into()));
        }

        while self.pending.len() < buf.len() {
            match self.chunks.recv_timeout(READ_TIMEOUT) {
                Ok(chunk) => self.pending.extend(chunk),
                Err(e) => {
                    debug!("Input stream went quiet: {}", e);
                    break;
                }
            }
        }

        let count = buf.len().min(self.pending.len());
        for (dst, src) in buf.iter_mut().zip(self.pending.drain(..count)) {
            *dst = src;
        }
        Ok(count)
    }

    fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn close(&mut self) {
        if self.stream.take().is_some() {
            debug!("Input stream released");
        }
        self.pending.clear();
    }
}

impl Drop for CpalCaptureLine {
    fn drop(&mut self) {
        self.close();
    }
}

pub fn list_audio_devices() -> Vec<String> {
    let host = cpal::default_host();
    let mut devices = Vec::new();

    if let Ok(output_devices) = host.output_devices() {
        for device in output_devices {
            if let Ok(name) = device.name() {
                devices.push(format!("Output: {}", name));
            }
        }
    }

    if let Ok(input_devices) = host.input_devices() {
        for device in input_devices {
            if let Ok(name) = device.name() {
                devices.push(format!("Input: {}", name));
            }
        }
    }

    devices
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_layout() {
        assert_eq!(AudioFormat::playback(SAMPLE_RATE).frame_bytes(), 1);
        assert_eq!(AudioFormat::capture_default().frame_bytes(), 2);

        let format = AudioFormat {
            width: SampleWidth::Sixteen,
            channels: 1,
            endianness: Endianness::Big,
            ..AudioFormat::capture_default()
        };
        assert_eq!(format.frame_bytes(), 2);
        assert_eq!(format.bytes_per_second(), 44100);
    }

    #[test]
    fn test_block_samples_eight_bit() {
        let block = AudioBlock::new(vec![0x00, 0x7f, 0x80, 0xff]);
        let samples = block.samples(&AudioFormat::capture_default());
        assert_eq!(samples, vec![0, 127, -128, -1]);
    }

    #[test]
    fn test_block_samples_sixteen_bit() {
        let block = AudioBlock::new(vec![0x01, 0x00, 0xff, 0xfe, 0x7f]);

        let big = AudioFormat {
            width: SampleWidth::Sixteen,
            endianness: Endianness::Big,
            ..AudioFormat::capture_default()
        };
        assert_eq!(block.samples(&big), vec![256, -2]);

        let little = AudioFormat {
            endianness: Endianness::Little,
            ..big
        };
        assert_eq!(block.samples(&little), vec![1, -257]);
    }

    #[test]
    fn test_encode_sample() {
        let format = AudioFormat {
            width: SampleWidth::Sixteen,
            endianness: Endianness::Big,
            ..AudioFormat::capture_default()
        };
        let mut bytes = Vec::new();
        format.encode_sample(1.0, &mut bytes);
        format.encode_sample(-2.0, &mut bytes);
        assert_eq!(bytes, vec![0x7f, 0xff, 0x80, 0x01]);

        let block = AudioBlock::new(bytes);
        assert_eq!(block.samples(&format), vec![i16::MAX, -i16::MAX]);

        let mut bytes = Vec::new();
        AudioFormat::capture_default().encode_sample(0.5, &mut bytes);
        assert_eq!(bytes, vec![63]);
    }
}
