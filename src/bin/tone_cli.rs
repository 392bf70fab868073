use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::runtime::Runtime;

use tone_engine::config::AppConfig;
use tone_engine::engine::backend::platform_backend;
use tone_engine::engine::{
    AudioBackend, EngineController, SimulatedBackend, SimulatedDevice, SystemTimeSource,
};

fn main() -> ExitCode {
    let cli = Cli::parse();
    tone_engine::init_logging();
    match cli.execute() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("tone_cli error: {err:?}");
            ExitCode::from(1)
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "tone_cli", about = "Tone engine diagnostics CLI")]
struct Cli {
    /// Engine configuration file (JSON). Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

impl Cli {
    fn execute(self) -> Result<()> {
        let config = match &self.config {
            Some(path) => {
                if !path.exists() {
                    bail!("config file {} does not exist", path.display());
                }
                AppConfig::load_from_file(path)
            }
            None => AppConfig::load_platform(),
        };
        let runtime = Runtime::new().context("failed to build tokio runtime")?;

        match self.command {
            Command::Probe => runtime.block_on(probe_command(config)),
            Command::Tone(args) => runtime.block_on(tone_command(config, args)),
            Command::Passthrough(args) => runtime.block_on(passthrough_command(config, args)),
            Command::Simulate(args) => runtime.block_on(simulate_command(config, args)),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Open the default device, print the negotiated parameters, close it.
    Probe,
    /// Play a sine tone on the default output device.
    Tone(ToneArgs),
    /// Route the microphone to the output through the ping-pong effect.
    Passthrough(PassthroughArgs),
    /// Run the engine against the simulated backend and print its status.
    Simulate(SimulateArgs),
}

#[derive(Args, Debug, Clone)]
struct ToneArgs {
    /// Tone frequency in Hz (clamped to 20..20000).
    #[arg(long, default_value_t = 440.0)]
    frequency: f32,
    /// Tone volume (clamped to 0..1).
    #[arg(long, default_value_t = 0.5)]
    volume: f32,
    /// How long to play (seconds).
    #[arg(long, default_value_t = 2.0)]
    seconds: f32,
}

#[derive(Args, Debug, Clone)]
struct PassthroughArgs {
    /// How long to run (seconds).
    #[arg(long, default_value_t = 5.0)]
    seconds: f32,
    /// Bypass the ping-pong effect.
    #[arg(long, default_value_t = false)]
    no_effect: bool,
}

#[derive(Args, Debug, Clone)]
struct SimulateArgs {
    /// How long to run (seconds).
    #[arg(long, default_value_t = 1.0)]
    seconds: f32,
    /// Sample rate the simulated device negotiates.
    #[arg(long)]
    sample_rate: Option<u32>,
    /// Callback size the simulated device negotiates.
    #[arg(long)]
    buffer_frames: Option<u32>,
    /// Play a tone at this frequency while running.
    #[arg(long)]
    tone: Option<f32>,
    /// Raise a device fault halfway through the run.
    #[arg(long, default_value_t = false)]
    inject_fault: bool,
}

fn hardware_controller(config: AppConfig) -> EngineController {
    EngineController::with_backend(
        config,
        platform_backend(),
        Arc::new(SystemTimeSource::default()),
    )
}

fn run_duration(seconds: f32) -> Result<Duration> {
    match Duration::try_from_secs_f32(seconds) {
        Ok(duration) => Ok(duration),
        Err(err) => bail!("invalid duration {seconds} seconds: {err}"),
    }
}

/// Sleep for `duration` or until Ctrl-C, whichever comes first.
async fn hold(duration: Duration) {
    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        _ = tokio::signal::ctrl_c() => {
            println!("interrupted");
        }
    }
}

async fn probe_command(config: AppConfig) -> Result<()> {
    let controller = hardware_controller(config);
    let info = controller.start().await.context("failed to open device")?;
    println!("{}", serde_json::to_string_pretty(&info)?);
    controller.stop().await.context("failed to close device")?;
    Ok(())
}

async fn tone_command(config: AppConfig, args: ToneArgs) -> Result<()> {
    let duration = run_duration(args.seconds)?;
    let controller = hardware_controller(config);
    let info = controller.start().await.context("failed to open device")?;
    println!(
        "playing on {} ({} Hz, {} ch)",
        info.device_name, info.sample_rate_hz, info.output_channels
    );

    let frequency = controller.set_tone_frequency(args.frequency)?;
    let volume = controller.set_tone_volume(args.volume)?;
    controller.start_tone()?;
    println!("tone {frequency:.1} Hz at volume {volume:.2}");

    hold(duration).await;

    controller.stop_tone()?;
    controller.stop().await?;
    Ok(())
}

async fn passthrough_command(config: AppConfig, args: PassthroughArgs) -> Result<()> {
    let duration = run_duration(args.seconds)?;
    let controller = hardware_controller(config);
    controller.set_effect_enabled(!args.no_effect);

    let info = controller.start().await.context("failed to open device")?;
    if info.input_channels == 0 {
        controller.stop().await?;
        bail!("no capture device available on {}", info.device_name);
    }
    println!(
        "passthrough on {} ({} Hz), effect {}",
        info.device_name,
        info.sample_rate_hz,
        if args.no_effect { "off" } else { "on" }
    );

    hold(duration).await;

    let status = controller.query_status();
    controller.stop().await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

async fn simulate_command(config: AppConfig, args: SimulateArgs) -> Result<()> {
    let duration = run_duration(args.seconds)?;
    let backend = Arc::new(SimulatedBackend::with_device(SimulatedDevice {
        sample_rate: args.sample_rate,
        buffer_frames: args.buffer_frames,
        ..SimulatedDevice::default()
    }));
    let controller = EngineController::with_backend(
        config,
        Arc::clone(&backend) as Arc<dyn AudioBackend>,
        Arc::new(SystemTimeSource::default()),
    );
    let mut events = controller.subscribe_events();

    controller.start().await?;
    if let Some(frequency) = args.tone {
        controller.set_tone_frequency(frequency)?;
        controller.start_tone()?;
    }

    if args.inject_fault {
        hold(duration / 2).await;
        backend.inject_fault();
        hold(duration / 2).await;
    } else {
        hold(duration).await;
    }

    let status = controller.query_status();
    println!("{}", serde_json::to_string_pretty(&status)?);
    println!("last buffer peak: {:.3}", backend.last_peak());

    controller.stop().await?;

    while let Ok(event) = events.try_recv() {
        println!("{}", serde_json::to_string(&event)?);
    }
    Ok(())
}
