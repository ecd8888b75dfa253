mod loopback;
mod rendezvous;
mod wav;

use clap::{Parser, Subcommand};
use lclink_core::framing::byte_to_char;
use lclink_core::sim::{ScaledClock, SimBench, RECEIVER_PRODUCT, SENDER_PRODUCT};
use lclink_core::sweep::{sweep, SweepPlan};
use lclink_core::{CancelToken, DeviceSession, Encoder, FrameDecoder, LinkConfig, LinkError};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "lclink")]
#[command(about = "Liquid-crystal optical link over DAQ analog I/O")]
struct Cli {
    /// JSON configuration file (defaults apply to missing fields)
    #[arg(short, long, global = true, value_name = "CONFIG.JSON")]
    config: Option<PathBuf>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode a message to a WAV file of drive voltages, one buffer per character
    Encode {
        #[arg(value_name = "MESSAGE")]
        message: String,

        /// Output WAV file (32-bit float volts)
        #[arg(value_name = "OUTPUT.WAV")]
        output: PathBuf,
    },

    /// Decode a captured WAV file
    Decode {
        /// Input WAV file
        #[arg(value_name = "INPUT.WAV")]
        input: PathBuf,

        /// Shift of the slot grid against the capture, in samples
        #[arg(short, long, allow_hyphen_values = true)]
        alignment: Option<i64>,
    },

    /// Send a message through the simulated bench and decode it
    Loopback {
        #[arg(value_name = "MESSAGE")]
        message: String,

        /// Bench clock speed-up factor
        #[arg(short, long, default_value = "1.0")]
        speedup: f64,
    },

    /// Play an amplitude staircase and capture the response
    Sweep {
        /// Output WAV file for the captured buffer
        #[arg(value_name = "OUTPUT.WAV")]
        output: PathBuf,

        /// Staircase stops below this amplitude (V)
        #[arg(long, default_value = "5.0")]
        a_max: f64,

        /// Amplitude step (V)
        #[arg(long, default_value = "0.5")]
        step: f64,

        /// Bench clock speed-up factor
        #[arg(short, long, default_value = "1.0")]
        speedup: f64,
    },

    /// Print the effective configuration as JSON
    Config,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn load_config(path: Option<&Path>) -> Result<LinkConfig, Box<dyn Error>> {
    let config = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            let config: LinkConfig = serde_json::from_str(&text)?;
            log::info!("Loaded configuration from {}", path.display());
            config
        }
        None => LinkConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let config = load_config(cli.config.as_deref())?;

    let result = run_command(cli.command, &config).await;
    if let Err(e) = &result {
        match e.downcast_ref::<LinkError>() {
            Some(link) if link.is_device_fault() => {
                log::error!("DAQ fault, scans stopped and boards released: {}", link)
            }
            _ => log::error!("{}", e),
        }
    }
    result
}

async fn run_command(command: Commands, config: &LinkConfig) -> Result<(), Box<dyn Error>> {
    match command {
        Commands::Encode { message, output } => encode_command(config, &message, &output)?,
        Commands::Decode { input, alignment } => decode_command(config, &input, alignment)?,
        Commands::Loopback { message, speedup } => loopback_command(config, &message, speedup).await?,
        Commands::Sweep {
            output,
            a_max,
            step,
            speedup,
        } => sweep_command(config, &output, SweepPlan { a_max, step }, speedup).await?,
        Commands::Config => println!("{}", serde_json::to_string_pretty(config)?),
    }
    Ok(())
}

fn encode_command(config: &LinkConfig, message: &str, output: &Path) -> Result<(), Box<dyn Error>> {
    let encoder = Encoder::new(config)?;
    let waves = encoder.encode_message(message)?;
    let samples: Vec<f64> = waves.iter().flat_map(|w| w.samples().iter().copied()).collect();
    println!(
        "Encoded {} characters to {} samples",
        waves.len(),
        samples.len()
    );

    wav::write_volts(output, &samples, config.output.sample_rate)?;
    println!("Wrote {}", output.display());
    Ok(())
}

fn decode_command(config: &LinkConfig, input: &Path, alignment: Option<i64>) -> Result<(), Box<dyn Error>> {
    let (samples, rate) = wav::read_volts(input)?;
    println!("Read {} samples at {} Hz", samples.len(), rate);

    let mut config = config.clone();
    if rate != config.input.sample_rate {
        log::warn!(
            "Capture rate {} Hz differs from configured input rate {} Hz; using the capture's",
            rate,
            config.input.sample_rate
        );
        config.input.sample_rate = rate;
    }
    if let Some(alignment) = alignment {
        config.input.alignment = alignment;
    }

    let mut decoder = FrameDecoder::new(&config)?;
    let bytes = decoder.decode_buffer(&samples)?;
    if decoder.dropped() > 0 {
        log::warn!("{} dead-zone decisions dropped", decoder.dropped());
    }
    let text: String = bytes.iter().map(|&b| byte_to_char(b)).collect();
    println!("Decoded {} characters", bytes.len());
    println!("{}", text);
    Ok(())
}

/// Cancel `cancel` on Ctrl-C until the returned handle is aborted.
fn cancel_on_interrupt(cancel: CancelToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, stopping scans");
            cancel.cancel();
        }
    })
}

async fn loopback_command(config: &LinkConfig, message: &str, speedup: f64) -> Result<(), Box<dyn Error>> {
    let cancel = CancelToken::new();
    let interrupt = cancel_on_interrupt(cancel.clone());
    let outcome = loopback::run(config, message, speedup, cancel).await;
    interrupt.abort();

    let outcome = outcome?;
    if outcome.sent.late_writes > 0 {
        log::warn!("{} late buffer writes", outcome.sent.late_writes);
    }
    println!(
        "Sent {} characters, received {} ({:?}, {} overruns)",
        outcome.sent.chars_sent,
        outcome.received.bytes.len(),
        outcome.received.stop,
        outcome.received.overruns
    );
    println!("{}", outcome.received.text);
    Ok(())
}

async fn sweep_command(
    config: &LinkConfig,
    output: &Path,
    plan: SweepPlan,
    speedup: f64,
) -> Result<(), Box<dyn Error>> {
    let cancel = CancelToken::new();
    let interrupt = cancel_on_interrupt(cancel.clone());

    let bench = SimBench::loopback(Arc::new(ScaledClock::new(speedup)));
    let sweep_config = config.clone();
    let sweep_cancel = cancel.clone();
    let capture = tokio::task::spawn_blocking(move || {
        let mut tx = DeviceSession::open(&bench, SENDER_PRODUCT)?;
        let mut rx = DeviceSession::open(&bench, RECEIVER_PRODUCT)?;
        sweep(tx.device_mut(), rx.device_mut(), &sweep_config, &plan, &sweep_cancel)
    })
    .await;
    interrupt.abort();

    let capture = capture??;
    wav::write_volts(output, &capture.response, config.input.sample_rate)?;
    println!(
        "Captured {} samples ({} V drive peak) to {}",
        capture.response.len(),
        capture.drive.iter().fold(0.0f64, |m, v| m.max(v.abs())),
        output.display()
    );
    Ok(())
}
