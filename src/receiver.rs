use crate::audio::{AudioBlock, AudioFormat};
use crate::error::{MorseError, Result};
use crate::Config;
use crossbeam_channel::{select, Receiver as ChannelReceiver, Sender as ChannelSender};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

/// Each read asks for this fraction of the device buffer.
const BLOCK_FRACTION: usize = 3;

/// An opened capture resource.
pub trait CaptureLine: Send {
    fn start(&mut self) -> Result<()>;

    /// Blocks until `buf` is full or the stream ends. Fewer bytes than
    /// requested means end of stream.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Size of the device-side buffer in bytes.
    fn buffer_size(&self) -> usize;

    /// Releases the device. Calling it again is a no-op.
    fn close(&mut self);
}

pub trait CaptureProvider {
    fn open(&mut self, format: &AudioFormat) -> Result<Box<dyn CaptureLine>>;
}

/// Cooperative cancellation shared by the capture and consumer loops.
///
/// Signalling drops the only sender of a rendezvous channel, which wakes
/// every `select!` waiting on [`StopSignal::watch`].
#[derive(Clone)]
pub struct StopSignal {
    inner: Arc<StopInner>,
}

struct StopInner {
    stopped: AtomicBool,
    trigger: Mutex<Option<ChannelSender<()>>>,
    watch: ChannelReceiver<()>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (trigger, watch) = crossbeam_channel::bounded(0);
        Self {
            inner: Arc::new(StopInner {
                stopped: AtomicBool::new(false),
                trigger: Mutex::new(Some(trigger)),
                watch,
            }),
        }
    }

    pub fn signal(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        let trigger = self
            .inner
            .trigger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(trigger);
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    pub fn watch(&self) -> &ChannelReceiver<()> {
        &self.inner.watch
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// FIFO of captured blocks, single producer to single consumer.
pub fn block_queue() -> (BlockSender, BlockReceiver) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (BlockSender { tx }, BlockReceiver { rx })
}

pub struct BlockSender {
    tx: ChannelSender<AudioBlock>,
}

impl BlockSender {
    /// Returns false once the consumer is gone.
    pub fn push(&self, block: AudioBlock) -> bool {
        self.tx.send(block).is_ok()
    }
}

pub struct BlockReceiver {
    rx: ChannelReceiver<AudioBlock>,
}

impl BlockReceiver {
    /// Waits for the next block. `None` once stopped, or once the producer
    /// is gone and every queued block has been taken.
    pub fn pop(&self, stop: &StopSignal) -> Option<AudioBlock> {
        if stop.is_stopped() {
            return None;
        }
        select! {
            recv(self.rx) -> block => block.ok(),
            recv(stop.watch()) -> _ => None,
        }
    }

    pub fn iter<'a>(&'a self, stop: &'a StopSignal) -> Blocks<'a> {
        Blocks { queue: self, stop }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

pub struct Blocks<'a> {
    queue: &'a BlockReceiver,
    stop: &'a StopSignal,
}

impl Iterator for Blocks<'_> {
    type Item = AudioBlock;

    fn next(&mut self) -> Option<AudioBlock> {
        self.queue.pop(self.stop)
    }
}

/// Population variance of the samples: mean of squares minus squared mean.
pub fn signal_power(samples: &[i16]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let (sum, sum_sq) = samples.iter().fold((0i64, 0i64), |(sum, sum_sq), &s| {
        let s = s as i64;
        (sum + s, sum_sq + s * s)
    });
    let n = samples.len() as f64;
    let mean = sum as f64 / n;
    (sum_sq as f64 / n - mean * mean).max(0.0)
}

/// Receives each block's signal power on the consumer thread.
pub type PowerObserver = Box<dyn FnMut(f64) + Send>;

struct CaptureOutcome {
    line: Box<dyn CaptureLine>,
    error: Option<MorseError>,
}

struct Session {
    stop: StopSignal,
    capture: JoinHandle<CaptureOutcome>,
    consumer: JoinHandle<u64>,
}

/// Continuous microphone capture reporting a power figure per block.
pub struct Receiver {
    provider: Box<dyn CaptureProvider>,
    format: AudioFormat,
    session: Option<Session>,
}

impl Receiver {
    pub fn new<P: CaptureProvider + 'static>(provider: P, config: &Config) -> Self {
        Self {
            provider: Box::new(provider),
            format: config.capture,
            session: None,
        }
    }

    pub fn format(&self) -> &AudioFormat {
        &self.format
    }

    /// Opens the capture device and spawns the capture and consumer threads.
    /// A session that is still running is stopped first.
    pub fn start(&mut self, observer: PowerObserver) -> Result<()> {
        if let Err(e) = self.stop() {
            warn!("Previous capture ended with an error: {}", e);
        }

        let mut line = self.provider.open(&self.format)?;
        if let Err(e) = line.start() {
            line.close();
            return Err(e);
        }

        let block_len = block_len(line.buffer_size(), &self.format);
        let stop = StopSignal::new();
        let (sender, receiver) = block_queue();

        let capture = thread::Builder::new()
            .name("morse-capture".into())
            .spawn({
                let stop = stop.clone();
                move || capture_loop(line, sender, &stop, block_len)
            })?;

        let format = self.format;
        let consumer = thread::Builder::new().name("morse-power".into()).spawn({
            let stop = stop.clone();
            move || consume_loop(receiver, &stop, &format, observer)
        });

        let consumer = match consumer {
            Ok(handle) => handle,
            Err(e) => {
                stop.signal();
                if let Ok(mut outcome) = capture.join() {
                    outcome.line.close();
                }
                return Err(e.into());
            }
        };

        info!(
            "Capture started ({} Hz, {}-bit, {} ch, {} byte blocks)",
            self.format.sample_rate,
            self.format.width.bits(),
            self.format.channels,
            block_len
        );
        self.session = Some(Session {
            stop,
            capture,
            consumer,
        });
        Ok(())
    }

    /// True while either loop is still running.
    pub fn is_running(&self) -> bool {
        self.session
            .as_ref()
            .map_or(false, |s| !s.capture.is_finished() || !s.consumer.is_finished())
    }

    /// Signals both loops, joins them, then closes the capture line.
    /// Returns the error that ended capture, if any. No-op when idle.
    pub fn stop(&mut self) -> Result<()> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };

        session.stop.signal();
        let outcome = session.capture.join();
        let consumed = session.consumer.join();

        let error = match outcome {
            Ok(CaptureOutcome { mut line, error }) => {
                line.close();
                error
            }
            Err(_) => Some(MorseError::IoFailure("capture thread panicked".into())),
        };

        match consumed {
            Ok(blocks) => info!("Capture stopped after {} blocks", blocks),
            Err(_) => error!("Power consumer thread panicked"),
        }

        match error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Capture ended with an error: {}", e);
        }
    }
}

fn block_len(buffer_size: usize, format: &AudioFormat) -> usize {
    let frame = format.frame_bytes();
    let len = buffer_size / BLOCK_FRACTION;
    (len - len % frame).max(frame)
}

fn capture_loop(
    mut line: Box<dyn CaptureLine>,
    blocks: BlockSender,
    stop: &StopSignal,
    block_len: usize,
) -> CaptureOutcome {
    let mut buf = vec![0u8; block_len];
    let mut error = None;
    let mut captured = 0u64;

    while !stop.is_stopped() {
        match line.read(&mut buf) {
            Ok(count) => {
                if count > 0 {
                    if !blocks.push(AudioBlock::new(buf[..count].to_vec())) {
                        break;
                    }
                    captured += 1;
                }
                if count < buf.len() {
                    debug!("Short read ({} of {} bytes), end of stream", count, buf.len());
                    break;
                }
            }
            Err(e) => {
                error!("Capture read failed: {}", e);
                error = Some(e);
                break;
            }
        }
    }

    debug!("Capture loop exiting after {} blocks", captured);
    CaptureOutcome { line, error }
}

fn consume_loop(
    blocks: BlockReceiver,
    stop: &StopSignal,
    format: &AudioFormat,
    mut observer: PowerObserver,
) -> u64 {
    let mut consumed = 0u64;
    for block in blocks.iter(stop) {
        let power = signal_power(&block.samples(format));
        info!("Signal power: {:.1}", power);
        observer(power);
        consumed += 1;
    }
    consumed
}
