use anyhow::{bail, Result};
use clap::Parser;
use morse_tone_core::{
    audio::{list_audio_devices, AudioFormat, CpalCapture, CpalPlayback, Endianness, SampleWidth},
    codec::{MorseCodec, SymbolTable},
    modulation::SignalEncoder,
    receiver::Receiver,
    transmitter::Transmitter,
    Config, TimingSpec, ToneSpec, SAMPLE_RATE,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const USAGE: &str =
    "Usage: add a text line to send, use \"your text\" to send the line with spaces";

#[derive(Parser)]
#[command(name = "morse-tone")]
#[command(about = "Play text as Morse code through the speakers", long_about = None)]
#[command(version)]
struct Cli {
    /// Words to send, joined with single spaces
    words: Vec<String>,

    /// Speed in words per minute
    #[arg(long, default_value = "20")]
    wpm: u32,

    /// Tone frequency in Hz
    #[arg(long, default_value = "800")]
    frequency: u32,

    /// Volume level (0.0 - 1.0)
    #[arg(long, default_value = "1.0")]
    volume: f32,

    /// Symbol table file, one `<char><code>` pair per line
    #[arg(long)]
    table: Option<PathBuf>,

    /// Give up waiting for playback after this many seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Print the Morse code without playing it
    #[arg(long)]
    dry_run: bool,

    /// Capture from the microphone for this many seconds, printing signal power
    #[arg(long, value_name = "SECONDS")]
    listen: Option<u64>,

    /// Capture sample width in bits (8 or 16)
    #[arg(long, default_value = "8")]
    bits: u16,

    /// Capture channels (1 or 2)
    #[arg(long, default_value = "2")]
    channels: u16,

    /// Capture big-endian samples
    #[arg(long)]
    big_endian: bool,

    /// List available audio devices
    #[arg(long)]
    devices: bool,
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    if cli.devices {
        println!("Available audio devices:");
        for device in list_audio_devices() {
            println!("  {}", device);
        }
        return Ok(());
    }

    let config = build_config(&cli)?;
    config.validate()?;

    if let Some(seconds) = cli.listen {
        return listen(&config, seconds);
    }

    if cli.words.is_empty() {
        println!("{}", USAGE);
        return Ok(());
    }

    let table = match &cli.table {
        Some(path) => SymbolTable::load(path)?,
        None => SymbolTable::standard()?,
    };
    let codec = MorseCodec::new(Arc::new(table));

    let morse = codec.encode(&cli.words.join(" "));
    println!("Morse code: {}", morse);

    send(&morse, &config, cli.dry_run)
}

fn build_config(cli: &Cli) -> Result<Config> {
    let width = match cli.bits {
        8 => SampleWidth::Eight,
        16 => SampleWidth::Sixteen,
        other => bail!("unsupported capture width: {} bits", other),
    };
    if !matches!(cli.channels, 1 | 2) {
        bail!("unsupported capture channel count: {}", cli.channels);
    }

    Ok(Config {
        tone: ToneSpec {
            frequency_hz: cli.frequency,
            sample_rate: SAMPLE_RATE,
            amplitude: cli.volume,
        },
        timing: TimingSpec { wpm: cli.wpm },
        capture: AudioFormat {
            sample_rate: SAMPLE_RATE,
            width,
            channels: cli.channels,
            endianness: if cli.big_endian {
                Endianness::Big
            } else {
                Endianness::Little
            },
        },
        playback_timeout: cli.timeout.map(Duration::from_secs),
    })
}

fn send(morse: &str, config: &Config, dry_run: bool) -> Result<()> {
    let encoder = SignalEncoder::new(config);
    let samples = encoder.render(morse)?;
    eprintln!(
        "Audio duration: {:.1} ms ({} samples)",
        samples.len() as f32 * 1000.0 / config.tone.sample_rate as f32,
        samples.len()
    );

    if dry_run {
        return Ok(());
    }

    let mut transmitter = Transmitter::new(CpalPlayback::new(), config);

    eprintln!("Transmitting...");
    transmitter.transmit(&samples)?;
    eprintln!("Transmission complete!");

    Ok(())
}

fn listen(config: &Config, seconds: u64) -> Result<()> {
    eprintln!("Listening for {} seconds...", seconds);

    let mut receiver = Receiver::new(CpalCapture::new(), config);
    receiver.start(Box::new(|power| println!("{:.1}", power)))?;

    std::thread::sleep(Duration::from_secs(seconds));

    receiver.stop()?;
    eprintln!("Capture stopped");

    Ok(())
}
