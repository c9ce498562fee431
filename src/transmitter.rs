use crate::audio::AudioFormat;
use crate::error::{MorseError, Result};
use crate::Config;
use crossbeam_channel::RecvTimeoutError;
use log::{debug, error, info};
use std::sync::Arc;
use std::time::Duration;

/// Called once when a playback line stops, with the reason it stopped.
pub type CompletionObserver = Box<dyn FnOnce(Result<()>) + Send>;

/// An opened playback resource holding one buffer.
pub trait PlaybackLine {
    /// Registers the observer fired when playback stops. Must precede [`start`](Self::start).
    fn on_stopped(&mut self, observer: CompletionObserver);

    fn start(&mut self) -> Result<()>;

    fn stop(&mut self);

    /// Releases the device. Calling it again is a no-op.
    fn close(&mut self);
}

pub trait PlaybackProvider {
    fn open(&mut self, format: &AudioFormat, pcm: Arc<[i8]>) -> Result<Box<dyn PlaybackLine>>;
}

/// Plays rendered Morse buffers, one at a time, blocking until each finishes.
pub struct Transmitter {
    provider: Box<dyn PlaybackProvider>,
    format: AudioFormat,
    timeout: Option<Duration>,
    line: Option<Box<dyn PlaybackLine>>,
}

impl Transmitter {
    pub fn new<P: PlaybackProvider + 'static>(provider: P, config: &Config) -> Self {
        Self {
            provider: Box::new(provider),
            format: config.playback_format(),
            timeout: config.playback_timeout,
            line: None,
        }
    }

    pub fn format(&self) -> &AudioFormat {
        &self.format
    }

    /// Plays `pcm` and returns once the device reports playback stopped.
    /// An empty buffer returns immediately without touching the device.
    pub fn transmit(&mut self, pcm: &[i8]) -> Result<()> {
        if pcm.is_empty() {
            debug!("Nothing to transmit");
            return Ok(());
        }

        self.release();

        let mut line = self.provider.open(&self.format, Arc::from(pcm))?;

        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        line.on_stopped(Box::new(move |outcome| {
            // The transmitter may have given up waiting already.
            let _ = done_tx.send(outcome);
        }));

        let line = self.line.insert(line);
        info!("Start data transmitting ({} samples)...", pcm.len());

        let result = line
            .start()
            .and_then(|()| wait_for_completion(&done_rx, self.timeout));

        self.release();

        match &result {
            Ok(()) => info!("Data has been transmitted."),
            Err(e) => error!("Can't play sound: {}", e),
        }
        result
    }

    fn release(&mut self) {
        if let Some(mut line) = self.line.take() {
            line.stop();
            line.close();
        }
    }
}

impl Drop for Transmitter {
    fn drop(&mut self) {
        self.release();
    }
}

fn wait_for_completion(
    done: &crossbeam_channel::Receiver<Result<()>>,
    timeout: Option<Duration>,
) -> Result<()> {
    match timeout {
        None => done.recv().map_err(|_| MorseError::InterruptedWait)?,
        Some(limit) => match done.recv_timeout(limit) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => Err(MorseError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(MorseError::InterruptedWait),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[derive(Debug, Clone, Copy)]
    enum Behaviour {
        Complete,
        FailStart,
        Abandon,
        DeviceError,
        Hang,
    }

    #[derive(Default, Clone)]
    struct Counters {
        opens: Arc<AtomicUsize>,
        starts: Arc<AtomicUsize>,
        closes: Arc<AtomicUsize>,
        samples: Arc<AtomicUsize>,
    }

    struct MockProvider {
        counters: Counters,
        behaviour: Behaviour,
        unavailable: bool,
    }

    impl MockProvider {
        fn new(behaviour: Behaviour) -> (Self, Counters) {
            let counters = Counters::default();
            let provider = Self {
                counters: counters.clone(),
                behaviour,
                unavailable: false,
            };
            (provider, counters)
        }
    }

    impl PlaybackProvider for MockProvider {
        fn open(&mut self, format: &AudioFormat, pcm: Arc<[i8]>) -> Result<Box<dyn PlaybackLine>> {
            assert_eq!(format.channels, 1);
            if self.unavailable {
                return Err(MorseError::ResourceUnavailable("mock device busy".into()));
            }
            self.counters.opens.fetch_add(1, Ordering::SeqCst);
            self.counters.samples.fetch_add(pcm.len(), Ordering::SeqCst);
            Ok(Box::new(MockLine {
                counters: self.counters.clone(),
                behaviour: self.behaviour,
                observer: None,
                closed: false,
            }))
        }
    }

    struct MockLine {
        counters: Counters,
        behaviour: Behaviour,
        observer: Option<CompletionObserver>,
        closed: bool,
    }

    impl PlaybackLine for MockLine {
        fn on_stopped(&mut self, observer: CompletionObserver) {
            self.observer = Some(observer);
        }

        fn start(&mut self) -> Result<()> {
            self.counters.starts.fetch_add(1, Ordering::SeqCst);
            let observer = self
                .observer
                .take()
                .expect("observer registered before start");

            match self.behaviour {
                Behaviour::Complete => {
                    thread::spawn(move || {
                        thread::sleep(Duration::from_millis(10));
                        observer(Ok(()));
                    });
                }
                Behaviour::DeviceError => {
                    thread::spawn(move || observer(Err(MorseError::IoFailure("underrun".into()))));
                }
                Behaviour::FailStart => {
                    return Err(MorseError::IoFailure("cannot start".into()));
                }
                Behaviour::Abandon => drop(observer),
                Behaviour::Hang => self.observer = Some(observer),
            }
            Ok(())
        }

        fn stop(&mut self) {}

        fn close(&mut self) {
            if !self.closed {
                self.closed = true;
                self.counters.closes.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn test_transmit_blocks_until_complete() {
        let (provider, counters) = MockProvider::new(Behaviour::Complete);
        let mut transmitter = Transmitter::new(provider, &Config::default());

        transmitter.transmit(&[1, 2, 3]).unwrap();

        assert_eq!(counters.opens.load(Ordering::SeqCst), 1);
        assert_eq!(counters.starts.load(Ordering::SeqCst), 1);
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
        assert_eq!(counters.samples.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_empty_buffer_skips_device() {
        let (provider, counters) = MockProvider::new(Behaviour::Complete);
        let mut transmitter = Transmitter::new(provider, &Config::default());

        transmitter.transmit(&[]).unwrap();

        assert_eq!(counters.opens.load(Ordering::SeqCst), 0);
        assert_eq!(counters.closes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_transmitter_is_reusable() {
        let (provider, counters) = MockProvider::new(Behaviour::Complete);
        let mut transmitter = Transmitter::new(provider, &Config::default());

        transmitter.transmit(&[1; 64]).unwrap();
        transmitter.transmit(&[2; 32]).unwrap();

        assert_eq!(counters.opens.load(Ordering::SeqCst), 2);
        assert_eq!(counters.closes.load(Ordering::SeqCst), 2);
        assert_eq!(counters.samples.load(Ordering::SeqCst), 96);
    }

    #[test]
    fn test_start_failure_releases_line() {
        let (provider, counters) = MockProvider::new(Behaviour::FailStart);
        let mut transmitter = Transmitter::new(provider, &Config::default());

        let result = transmitter.transmit(&[1, 2, 3]);
        assert!(matches!(result, Err(MorseError::IoFailure(_))));
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_device_error_is_surfaced() {
        let (provider, counters) = MockProvider::new(Behaviour::DeviceError);
        let mut transmitter = Transmitter::new(provider, &Config::default());

        let result = transmitter.transmit(&[1, 2, 3]);
        assert!(matches!(result, Err(MorseError::IoFailure(_))));
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_abandoned_wait_is_interrupted() {
        let (provider, counters) = MockProvider::new(Behaviour::Abandon);
        let mut transmitter = Transmitter::new(provider, &Config::default());

        let result = transmitter.transmit(&[1, 2, 3]);
        assert!(matches!(result, Err(MorseError::InterruptedWait)));
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_timeout() {
        let (provider, counters) = MockProvider::new(Behaviour::Hang);
        let config = Config {
            playback_timeout: Some(Duration::from_millis(50)),
            ..Config::default()
        };
        let mut transmitter = Transmitter::new(provider, &config);

        let result = transmitter.transmit(&[1, 2, 3]);
        assert!(matches!(result, Err(MorseError::Timeout)));
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unavailable_device() {
        let (mut provider, counters) = MockProvider::new(Behaviour::Complete);
        provider.unavailable = true;
        let mut transmitter = Transmitter::new(provider, &Config::default());

        let result = transmitter.transmit(&[1, 2, 3]);
        assert!(matches!(result, Err(MorseError::ResourceUnavailable(_))));
        assert_eq!(counters.opens.load(Ordering::SeqCst), 0);
    }
}
