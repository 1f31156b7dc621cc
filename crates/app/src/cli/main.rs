//! Minstrel CLI: headless DSP unit demos

use anyhow::Context;
use clap::{Parser, Subcommand};
use minstrel_core::domain::units::{self, GainMeterControl, PeakMeterControl};
use minstrel_core::domain::{EngineConfig, MeterSnapshot};
use minstrel_infra::audio::{AudioThread, Engine, ToneBank, ToneSource};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_BANK: &str = r#"
[[events]]
id = "beep"
frequency_hz = 440.0
amplitude = 0.5
"#;

#[derive(Parser)]
#[command(name = "minstrel")]
#[command(about = "Real-time DSP units with lock-free parameter exchange", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Engine configuration (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// How long to run
    #[arg(short, long, global = true, default_value_t = 2.0)]
    seconds: f32,

    /// Print the final report as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Play a tone through a gain unit and watch its RMS
    Gain {
        /// Tone bank (TOML); a 440 Hz beep when omitted
        #[arg(short, long)]
        bank: Option<PathBuf>,

        /// Event to play
        #[arg(short, long, default_value = "beep")]
        event: String,

        /// Initial gain
        #[arg(short, long, default_value_t = 0.5)]
        gain: f32,

        /// Gain change per second, clamped to the unit's range
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        ramp: f32,
    },
    /// Meter a synthetic input tone
    Input {
        /// Input tone frequency
        #[arg(short, long, default_value_t = 1_000.0)]
        frequency: f32,

        /// Input tone level (0..1)
        #[arg(short, long, default_value_t = 0.25)]
        level: f32,
    },
}

#[derive(Debug, Serialize)]
struct Report {
    demo: &'static str,
    ticks: u64,
    buffers: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    gain: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rms: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    input_level: Option<f32>,
    meters: MeterSnapshot,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match &cli.config {
        Some(path) => EngineConfig::load_from_file(path)
            .await
            .with_context(|| format!("loading {}", path.display()))?,
        None => EngineConfig::default(),
    };
    let run_for = Duration::from_secs_f32(cli.seconds.max(0.0));

    info!("Minstrel starting");

    let report = match cli.command {
        Command::Gain {
            bank,
            event,
            gain,
            ramp,
        } => run_gain(config, run_for, bank, &event, gain, ramp).await?,
        Command::Input { frequency, level } => run_input(config, run_for, frequency, level).await?,
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

async fn run_gain(
    config: EngineConfig,
    run_for: Duration,
    bank_path: Option<PathBuf>,
    event_id: &str,
    gain: f32,
    ramp: f32,
) -> anyhow::Result<Report> {
    let (mut bank, source) = ToneBank::new(config.sample_rate);
    if bank_path.is_none() {
        bank.load_bank_str(DEFAULT_BANK)?;
    }

    let (mut engine, mixer) = Engine::new(config, Box::new(bank))?;
    if let Some(path) = &bank_path {
        engine.load_bank(path)?;
    }

    let event = engine.event_handle(event_id)?;
    let unit = engine.create_dsp_unit(units::gain_meter(gain))?;
    engine.attach_to_event(Some(unit), event)?;
    engine.start_event(event)?;

    let ramp_per_tick = ramp * engine.config().tick_period().as_secs_f32();
    let thread = start_audio(&engine, mixer, source)?;

    drive(&mut engine, run_for, |engine, tick| {
        let control = engine.control_mut::<GainMeterControl>(unit)?;
        control.adjust_gain(ramp_per_tick);
        if tick % 50 == 0 {
            info!("gain {:.2}  rms {:.4}", control.gain, control.rms);
        }
        Ok(())
    })
    .await?;

    engine.stop_event(event)?;
    let buffers = thread.buffers_rendered();
    thread.stop()?;

    let control = engine.control::<GainMeterControl>(unit)?;
    Ok(Report {
        demo: "gain",
        ticks: engine.ticks(),
        buffers,
        gain: Some(control.gain),
        rms: Some(control.rms),
        input_level: None,
        meters: engine.meters(),
    })
}

async fn run_input(
    config: EngineConfig,
    run_for: Duration,
    frequency: f32,
    level: f32,
) -> anyhow::Result<Report> {
    let (bank, source) = ToneBank::new(config.sample_rate);
    bank.input().set(frequency, level);

    let (mut engine, mixer) = Engine::new(config, Box::new(bank))?;
    let unit = engine.create_dsp_unit(units::peak_meter())?;
    engine.attach_to_input(Some(unit))?;

    let thread = start_audio(&engine, mixer, source)?;

    drive(&mut engine, run_for, |engine, tick| {
        if tick % 50 == 0 {
            let level = engine.control::<PeakMeterControl>(unit)?.level;
            info!("input level {:.4}", level);
        }
        Ok(())
    })
    .await?;

    let buffers = thread.buffers_rendered();
    thread.stop()?;

    Ok(Report {
        demo: "input",
        ticks: engine.ticks(),
        buffers,
        gain: None,
        rms: None,
        input_level: Some(engine.control::<PeakMeterControl>(unit)?.level),
        meters: engine.meters(),
    })
}

fn start_audio(
    engine: &Engine,
    mixer: minstrel_infra::audio::Mixer,
    source: ToneSource,
) -> anyhow::Result<AudioThread<ToneSource>> {
    let period = engine.config().output_format().buffer_period();
    Ok(AudioThread::spawn(mixer, source, period)?)
}

/// Tick the engine at its configured rate until `run_for` has elapsed
async fn drive<F>(engine: &mut Engine, run_for: Duration, mut on_tick: F) -> anyhow::Result<()>
where
    F: FnMut(&mut Engine, u64) -> minstrel_infra::audio::engine::Result<()>,
{
    let mut interval = tokio::time::interval(engine.config().tick_period());
    let deadline = Instant::now() + run_for;

    while Instant::now() < deadline {
        interval.tick().await;
        engine.update();
        let tick = engine.ticks();
        on_tick(engine, tick)?;
    }
    Ok(())
}

fn print_report(report: &Report) {
    println!("demo:     {}", report.demo);
    println!("ticks:    {}", report.ticks);
    println!("buffers:  {}", report.buffers);
    if let Some(gain) = report.gain {
        println!("gain:     {gain:.3}");
    }
    if let Some(rms) = report.rms {
        println!("rms:      {rms:.4}");
    }
    if let Some(level) = report.input_level {
        println!("input:    {level:.4}");
    }
    println!(
        "meters:   {} frames, peak L {:.3} R {:.3}{}",
        report.meters.frames_mixed,
        report.meters.peak_left,
        report.meters.peak_right,
        if report.meters.clipped { ", clipped" } else { "" }
    );
}
