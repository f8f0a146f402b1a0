use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use promptwave_audio::{CpalDevice, MemoryDevice, OutputDevice, OverflowPolicy};
use promptwave_lib::console::{ConsoleCommand, HELP};
use promptwave_lib::loggerbridge::Logger;
use promptwave_lib::presets::{self, Preset, PRESETS};
use promptwave_lib::replay::WavReplay;
use promptwave_lib::settings::{OutputBackend, Settings};
use promptwave_session::{GenerationPrompt, SessionController};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(name = "promptwave")]
#[command(about = "Stream prompt-generated music to your speakers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a session and control it from the keyboard
    Play(PlayArgs),
    /// Print the effective settings as JSON
    Config(SettingsArgs),
    /// List audio output devices
    Devices,
    /// List the ready-made prompts usable with --preset
    Presets,
}

#[derive(Args, Debug)]
struct PlayArgs {
    /// Music prompt; repeat for several. Append `:<weight>` to weight one
    #[arg(
        short,
        long = "prompt",
        required_unless_present = "preset",
        value_parser = parse_prompt
    )]
    prompts: Vec<GenerationPrompt>,

    /// Start from a ready-made prompt (see `promptwave presets`)
    #[arg(long, value_parser = parse_preset)]
    preset: Option<&'static Preset>,

    /// WAV file streamed in place of a remote generator
    #[arg(short, long)]
    source: PathBuf,

    /// Print status updates as JSON lines
    #[arg(long)]
    json_status: bool,

    #[command(flatten)]
    settings: SettingsArgs,
}

#[derive(Args, Debug)]
struct SettingsArgs {
    /// JSON settings file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Tempo in beats per minute (60-200)
    #[arg(long)]
    bpm: Option<u16>,

    /// Sampling temperature (0.0-3.0)
    #[arg(long)]
    temperature: Option<f32>,

    /// Initial volume (0.0-1.0)
    #[arg(long)]
    volume: Option<f32>,

    /// Output backend
    #[arg(long, value_enum)]
    output: Option<OutputArg>,

    /// Output device name, or part of it
    #[arg(long)]
    device: Option<String>,

    /// Chunk length in milliseconds
    #[arg(long)]
    chunk_ms: Option<u32>,

    /// Maximum number of queued chunks
    #[arg(long)]
    max_queued: Option<usize>,

    /// Refuse new chunks at the queue limit instead of dropping the oldest
    #[arg(long)]
    reject_overflow: bool,

    /// Hold already-scheduled audio while paused
    #[arg(long)]
    suspend_on_pause: bool,

    /// Start the source over when it ends
    #[arg(long = "loop")]
    looping: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum OutputArg {
    Device,
    Null,
}

impl SettingsArgs {
    /// Settings file first, then command-line overrides
    fn resolve(&self) -> Result<Settings> {
        let mut settings = match &self.config {
            Some(path) => Settings::load(path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?,
            None => Settings::default(),
        };

        if let Some(bpm) = self.bpm {
            settings.generation.bpm = bpm;
        }
        if let Some(temperature) = self.temperature {
            settings.generation.temperature = temperature;
        }
        if let Some(volume) = self.volume {
            settings.controller.initial_volume = volume;
        }
        if let Some(output) = self.output {
            settings.output.backend = match output {
                OutputArg::Device => OutputBackend::Device,
                OutputArg::Null => OutputBackend::Null,
            };
        }
        if let Some(device) = &self.device {
            settings.output.device = Some(device.clone());
        }
        if let Some(chunk_ms) = self.chunk_ms {
            settings.replay.chunk_millis = chunk_ms;
        }
        if let Some(max) = self.max_queued {
            settings.controller.max_queued_blocks = Some(max);
        }
        if self.reject_overflow {
            settings.controller.overflow = OverflowPolicy::Reject;
        }
        if self.suspend_on_pause {
            settings.controller.suspend_output_on_pause = true;
        }
        if self.looping {
            settings.replay.looping = true;
        }

        settings.validate()?;
        Ok(settings)
    }
}

/// `text` or `text:weight`
fn parse_prompt(arg: &str) -> std::result::Result<GenerationPrompt, String> {
    let prompt = match arg.rsplit_once(':') {
        Some((text, weight)) => match weight.trim().parse::<f32>() {
            Ok(weight) => GenerationPrompt::new(text.trim()).with_weight(weight),
            Err(_) => GenerationPrompt::new(arg.trim()),
        },
        None => GenerationPrompt::new(arg.trim()),
    };
    prompt.validate().map_err(|e| e.to_string())?;
    Ok(prompt)
}

fn parse_preset(arg: &str) -> std::result::Result<&'static Preset, String> {
    presets::find(arg).ok_or_else(|| format!("Unknown preset '{}'", arg))
}

impl PlayArgs {
    /// The preset's prompt first, then any given with --prompt
    fn all_prompts(&self) -> Vec<GenerationPrompt> {
        self.preset
            .map(|preset| GenerationPrompt::new(preset.prompt))
            .into_iter()
            .chain(self.prompts.iter().cloned())
            .collect()
    }
}

fn output_device(settings: &Settings) -> Arc<dyn OutputDevice> {
    match settings.output.backend {
        OutputBackend::Null => Arc::new(MemoryDevice::wall_clock()),
        OutputBackend::Device => match &settings.output.device {
            Some(name) => Arc::new(CpalDevice::matching(name.clone())),
            None => Arc::new(CpalDevice::default_output()),
        },
    }
}

async fn play(args: PlayArgs) -> Result<()> {
    let settings = args.settings.resolve()?;
    let replay = &settings.replay;
    let source = WavReplay::open(&args.source, replay.chunk_millis, replay.looping)
        .with_context(|| format!("Failed to load {}", args.source.display()))?;
    log::info!(
        "Loaded {} ({:.1}s, {} chunks)",
        args.source.display(),
        source.duration(),
        source.chunk_count()
    );

    let controller = SessionController::new(
        Arc::new(source),
        output_device(&settings),
        settings.controller.clone(),
    );
    let prompts = args.all_prompts();
    let logger = Logger { json: args.json_status };
    let forwarding = logger.clone().forward(controller.subscribe());

    let started = controller
        .start_with_prompts(prompts.clone(), settings.generation)
        .await;
    if started.is_ok() {
        logger.log(HELP.to_string(), "info".to_string());
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read from stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };

        let command = match line.parse::<ConsoleCommand>() {
            Ok(command) => command,
            Err(message) => {
                logger.log(message, "warning".to_string());
                continue;
            }
        };

        // Failures are already published as status events
        let _ = match command {
            ConsoleCommand::Start => {
                controller
                    .start_with_prompts(prompts.clone(), settings.generation)
                    .await
            }
            ConsoleCommand::Pause => controller.pause().await,
            ConsoleCommand::Resume => controller.resume().await,
            ConsoleCommand::Stop => controller.stop().await,
            ConsoleCommand::Volume(level) => controller.set_volume(level),
            ConsoleCommand::Status => {
                let snapshot = controller.snapshot();
                logger.log(
                    format!(
                        "{} | volume {:.0}% | {} chunks ({:.2}s) queued",
                        snapshot.state,
                        snapshot.volume * 100.0,
                        snapshot.queued_blocks,
                        snapshot.queued_seconds
                    ),
                    "info".to_string(),
                );
                Ok(())
            }
            ConsoleCommand::Help => {
                logger.log(HELP.to_string(), "info".to_string());
                Ok(())
            }
            ConsoleCommand::Quit => break,
        };
    }

    let stopped = controller.stop().await;
    forwarding.abort();
    stopped.context("Failed to shut down cleanly")?;
    Ok(())
}

fn list_devices() -> Result<()> {
    let names = CpalDevice::list_output_names().context("Failed to enumerate output devices")?;
    if names.is_empty() {
        eprintln!("No output devices found");
    }
    for name in names {
        println!("{}", name);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Command::Play(args) => play(args).await,
        Command::Config(args) => {
            println!("{}", args.resolve()?.to_json()?);
            Ok(())
        }
        Command::Devices => list_devices(),
        Command::Presets => {
            for preset in PRESETS {
                println!("{:<18} {}", preset.name, preset.prompt);
            }
            Ok(())
        }
    }
}
