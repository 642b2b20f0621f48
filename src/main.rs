//! fxrack - real-time audio effect rack host

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use fxrack::audio::plugin::{deserialize_chain_state, PluginChain, PluginInfo, PluginRegistry};
use fxrack::audio::{list_input_devices, list_output_devices, AudioDevice, AudioEngine, AudioError, OfflineProcessor};
use fxrack::config::{load_config, ConfigError, EngineConfig};

#[derive(Parser)]
#[command(name = "fxrack")]
#[command(about = "Real-time audio effect rack host")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true, env = "FXRACK_CONFIG")]
    config: Option<PathBuf>,
}

/// Chain construction options shared by `run` and `process`
#[derive(clap::Args)]
struct ChainArgs {
    /// Plugin to append, by `format:id` or id (repeatable)
    #[arg(short, long = "plugin")]
    plugins: Vec<String>,

    /// Set a control: PLUGIN_INDEX:PORT=VALUE (repeatable)
    #[arg(long = "set", value_parser = parse_param)]
    params: Vec<ParamAssignment>,

    /// Chain preset (JSON) loaded before any --plugin
    #[arg(long)]
    preset: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List available audio devices
    Devices {
        #[command(subcommand)]
        action: DevicesAction,
    },

    /// List available plugins
    Plugins,

    /// Monitor live input through the chain
    Run {
        #[command(flatten)]
        chain: ChainArgs,

        /// Sample rate in Hz
        #[arg(long)]
        sample_rate: Option<u32>,

        /// Frames per callback (0 = derive from the device)
        #[arg(long)]
        buffer_frames: Option<u32>,

        /// Input device name (use 'devices list' to see available devices)
        #[arg(long)]
        input_device: Option<String>,

        /// Output device name (use 'devices list' to see available devices)
        #[arg(long)]
        output_device: Option<String>,

        /// Play a WAV file instead of the live input
        #[arg(long)]
        wav: Option<PathBuf>,

        /// Send WAV playback through the chain
        #[arg(long)]
        wav_through_chain: bool,

        /// Record the raw input here
        #[arg(long, requires = "record_processed")]
        record_raw: Option<PathBuf>,

        /// Record the processed output here
        #[arg(long, requires = "record_raw")]
        record_processed: Option<PathBuf>,

        /// Save the chain state here on exit
        #[arg(long)]
        save_preset: Option<PathBuf>,

        /// Seconds to run
        #[arg(long, default_value = "10")]
        duration: u64,
    },

    /// Render a WAV file through the chain
    Process {
        /// Input WAV file
        input: PathBuf,

        /// Output WAV file (16-bit stereo)
        output: PathBuf,

        #[command(flatten)]
        chain: ChainArgs,
    },
}

#[derive(Subcommand)]
enum DevicesAction {
    /// List all devices
    List,
}

#[derive(Debug, Clone, Copy)]
struct ParamAssignment {
    plugin: usize,
    port: u32,
    value: f32,
}

fn parse_param(s: &str) -> Result<ParamAssignment, String> {
    let (target, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected PLUGIN:PORT=VALUE, got '{}'", s))?;
    let (plugin, port) = target
        .split_once(':')
        .ok_or_else(|| format!("expected PLUGIN:PORT before '=', got '{}'", target))?;
    Ok(ParamAssignment {
        plugin: plugin.trim().parse().map_err(|e| format!("plugin index: {}", e))?,
        port: port.trim().parse().map_err(|e| format!("port: {}", e))?,
        value: value.trim().parse().map_err(|e| format!("value: {}", e))?,
    })
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    let config = resolve_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Devices { action } => match action {
            DevicesAction::List => list_devices(),
        },
        Commands::Plugins => list_plugins(&PluginRegistry::with_builtins()),
        Commands::Run {
            chain,
            sample_rate,
            buffer_frames,
            input_device,
            output_device,
            wav,
            wav_through_chain,
            record_raw,
            record_processed,
            save_preset,
            duration,
        } => {
            let mut config = config;
            if let Some(rate) = sample_rate {
                config.sample_rate = rate;
            }
            if let Some(frames) = buffer_frames {
                config.buffer_frames = frames;
            }
            if input_device.is_some() {
                config.input_device_id = input_device;
            }
            if output_device.is_some() {
                config.output_device_id = output_device;
            }
            config.validate()?;

            let recording = record_raw.zip(record_processed);
            run(
                config,
                &chain,
                RunOptions {
                    wav,
                    wav_through_chain,
                    recording,
                    save_preset,
                    duration: Duration::from_secs(duration),
                },
            )?;
        }
        Commands::Process {
            input,
            output,
            chain,
        } => process(&config, &input, &output, &chain)?,
    }

    Ok(())
}

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

/// Explicit config files must exist; the default one is optional
fn resolve_config(path: Option<&Path>) -> Result<EngineConfig> {
    match load_config(path) {
        Ok(config) => Ok(config),
        Err(ConfigError::NotFound(_) | ConfigError::NoConfigDir) if path.is_none() => {
            Ok(EngineConfig::default())
        }
        Err(e) => Err(e.into()),
    }
}

fn print_devices(title: &str, devices: Result<Vec<AudioDevice>, AudioError>) {
    println!("{}:", title);
    match devices {
        Ok(devices) => {
            for device in devices {
                let default_marker = if device.is_default { " (default)" } else { "" };
                println!("  - {}{}", device.name, default_marker);
                if device.min_buffer_frames > 0 {
                    println!("      min buffer: {} frames", device.min_buffer_frames);
                }
            }
        }
        Err(e) => {
            println!("  Error: {}", e);
        }
    }
}

fn list_devices() {
    print_devices("Input devices", list_input_devices());
    println!();
    print_devices("Output devices", list_output_devices());
}

fn list_plugins(registry: &PluginRegistry) {
    for plugin in registry.plugins() {
        print_plugin(&plugin);
    }
}

fn print_plugin(plugin: &PluginInfo) {
    println!("{}  {}", plugin.full_id(), plugin.name);
    for port in plugin.control_inputs() {
        println!(
            "    port {:>2} {:<12} default {:>8.2}  range {:.2}..{:.2}",
            port.index, port.symbol, port.default_value, port.min, port.max
        );
    }
}

/// Populate `chain` from a preset, `--plugin` entries, and `--set` values
fn build_chain(chain: &PluginChain, registry: &PluginRegistry, args: &ChainArgs) -> Result<()> {
    if let Some(path) = &args.preset {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read preset {}", path.display()))?;
        let state = deserialize_chain_state(&json)?;
        let restored = chain.rebuild_from_state(registry, &state);
        info!("Loaded preset {} ({} plugins)", path.display(), restored);
    }

    for id in &args.plugins {
        let Some(plugin) = registry.create(id) else {
            bail!("Unknown plugin '{}' (see 'fxrack plugins')", id);
        };
        chain.add_plugin(plugin, None);
    }

    for param in &args.params {
        if !chain.set_parameter(param.plugin, param.port, param.value) {
            bail!("No port {} on plugin {}", param.port, param.plugin);
        }
    }
    Ok(())
}

struct RunOptions {
    wav: Option<PathBuf>,
    wav_through_chain: bool,
    recording: Option<(PathBuf, PathBuf)>,
    save_preset: Option<PathBuf>,
    duration: Duration,
}

fn run(config: EngineConfig, chain_args: &ChainArgs, options: RunOptions) -> Result<()> {
    let registry = PluginRegistry::with_builtins();
    let mut engine = AudioEngine::new(config);
    build_chain(engine.chain(), &registry, chain_args)?;
    engine.set_wav_bypass_chain(!options.wav_through_chain);

    engine.start_default()?;
    if let Some(info) = engine.stream_info() {
        println!(
            "Running at {} Hz, block {} frames ({} -> {})",
            info.sample_rate,
            info.block_frames,
            info.input_device.as_deref().unwrap_or("no input"),
            info.output_device
        );
    }

    if let Some(path) = &options.wav {
        let seconds = engine.load_wav(path)?;
        engine.wav_play();
        println!("Playing {} ({:.1}s)", path.display(), seconds);
    }

    if let Some((raw, processed)) = &options.recording {
        engine.start_recording(raw, processed)?;
        println!("Recording to {} and {}", raw.display(), processed.display());
    }

    let started = Instant::now();
    while started.elapsed() < options.duration {
        std::thread::sleep(Duration::from_secs(1));
        if !engine.is_running() {
            warn!("Audio stream stopped unexpectedly");
            break;
        }
        println!(
            "in {:>6.1} dB{}  out {:>6.1} dB{}  cpu {:>3.0}%  latency {:>5.1} ms  xruns {}",
            to_db(engine.input_level()),
            if engine.is_input_clipping() { " CLIP" } else { "     " },
            to_db(engine.output_level()),
            if engine.is_output_clipping() { " CLIP" } else { "     " },
            engine.cpu_load() * 100.0,
            engine.latency_ms(),
            engine.xrun_count()
        );
        engine.reset_clipping();
    }

    if engine.is_recording() {
        let info = engine.stop_recording()?;
        println!(
            "Recorded {:.2}s ({} frames, {} samples dropped)",
            info.duration_secs, info.frames, info.dropped_samples
        );
    }

    if let Some(path) = &options.save_preset {
        let json = engine.save_chain_state_json()?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write preset {}", path.display()))?;
        println!("Saved preset to {}", path.display());
    }

    engine.stop();
    Ok(())
}

fn process(config: &EngineConfig, input: &Path, output: &Path, chain_args: &ChainArgs) -> Result<()> {
    let registry = PluginRegistry::with_builtins();
    let chain = Arc::new(PluginChain::new());
    build_chain(&chain, &registry, chain_args)?;

    let processor = OfflineProcessor::new(chain).with_block_frames(config.offline_block_frames);
    let mut last_decile = 0;
    processor.process_file(input, output, |progress| {
        let decile = (progress * 10.0) as u32;
        if decile > last_decile {
            last_decile = decile;
            println!("{:>3}%", decile * 10);
        }
    })?;

    println!("Wrote {}", output.display());
    Ok(())
}

fn to_db(level: f32) -> f32 {
    if level <= 0.0 {
        -96.0
    } else {
        (20.0 * level.log10()).max(-96.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_param() {
        let p = parse_param("1:4=-6.5").unwrap();
        assert_eq!(p.plugin, 1);
        assert_eq!(p.port, 4);
        assert_eq!(p.value, -6.5);

        assert!(parse_param("1:4").is_err());
        assert!(parse_param("x:4=1").is_err());
    }

    #[test]
    fn test_to_db() {
        assert_eq!(to_db(0.0), -96.0);
        assert!((to_db(1.0)).abs() < 1e-6);
        assert!((to_db(0.5) + 6.02).abs() < 0.01);
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "fxrack", "run", "--plugin", "gain", "--set", "0:4=3", "--duration", "2",
        ])
        .unwrap();
        match cli.command {
            Commands::Run { chain, duration, .. } => {
                assert_eq!(chain.plugins, vec!["gain".to_string()]);
                assert_eq!(chain.params.len(), 1);
                assert_eq!(duration, 2);
            }
            _ => panic!("expected run"),
        }
    }
}
