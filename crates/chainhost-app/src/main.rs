//! chainhost - route audio devices through plugin chains
//!
//! Main application entry point.

mod console;

use std::cell::RefCell;
use std::io::BufRead;
use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chainhost_audio::builtin::{self, BuiltinProvider};
use chainhost_audio::engine::device_names;
use chainhost_audio::{AudioConfig, AudioEngine, AudioGraph};
use chainhost_comms::{EngineEvent, EventReceiver};
use chainhost_core::{block_sizes, sample_rates};
use chainhost_patch::{PatchBay, Settings, keys};
use chainhost_plugin::KnownPluginList;

use crate::console::{Command, Flow};

/// Node-graph audio plugin host
#[derive(Parser, Debug)]
#[command(name = "chainhost")]
#[command(about = "Route audio devices through a graph of plugins", long_about = None)]
struct Args {
    /// Settings file holding the saved graph and plugin list
    #[arg(short, long, default_value = "chainhost-settings.json")]
    settings: PathBuf,

    /// Sample rate to open the devices at
    #[arg(short = 'r', long, default_value_t = sample_rates::SR_44100)]
    sample_rate: u32,

    /// Processing block size
    #[arg(short, long, default_value_t = block_sizes::BLOCK_512)]
    block_size: usize,

    /// Input device name (default device if omitted)
    #[arg(long)]
    input_device: Option<String>,

    /// Output device name (default device if omitted)
    #[arg(long)]
    output_device: Option<String>,

    /// Edit the graph without opening audio devices
    #[arg(long)]
    no_audio: bool,

    /// Print the available devices and exit
    #[arg(long)]
    list_devices: bool,
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chainhost=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    check_args(&args)?;

    if args.list_devices {
        return list_devices();
    }

    tracing::info!("Starting chainhost...");

    let settings = Settings::open(&args.settings)
        .with_context(|| format!("Failed to open settings {}", args.settings.display()))?;
    let settings = Rc::new(RefCell::new(settings));

    let known = known_plugins(&settings.borrow());
    tracing::info!("{} plugins available", known.len());

    let config = AudioConfig {
        sample_rate: args.sample_rate,
        block_size: args.block_size,
        ..AudioConfig::default()
    };
    tracing::info!("Audio config: {:?}", config);

    let (mut graph, processor) = AudioGraph::new(config);
    graph.install_io_endpoints();

    let mut bay = PatchBay::new(graph, BuiltinProvider).with_known_plugins(known);
    restore_graph(&mut bay, &settings.borrow());
    bay.restore_plugin_bypass(&settings.borrow());

    // Autosave on every edit
    let autosave = Rc::clone(&settings);
    bay.set_on_graph_changed(move |bay| {
        let mut settings = autosave.borrow_mut();
        if let Err(e) = bay.store_in_settings(&mut settings) {
            tracing::warn!("Could not serialize graph: {}", e);
        }
        if let Err(e) = settings.save_if_needed() {
            tracing::warn!("Could not save settings: {}", e);
        }
    });

    let mut engine = None;
    let mut events = None;
    if args.no_audio {
        tracing::info!("Audio disabled, editing only");
    } else {
        let (audio, receiver) = AudioEngine::new(config);
        let mut audio = audio.with_devices(args.input_device, args.output_device);
        audio.start(processor)?;
        tracing::info!("Audio engine started");
        engine = Some(audio);
        events = Some(receiver);
    }

    run_console(&mut bay, events.as_ref())?;

    tracing::info!("chainhost shutting down");

    {
        let mut settings = settings.borrow_mut();
        bay.store_in_settings(&mut settings)?;
        bay.save_plugin_states(&mut settings);
        settings.save_if_needed()?;
    }

    if let Some(mut engine) = engine {
        engine.stop()?;
    }

    Ok(())
}

fn check_args(args: &Args) -> Result<()> {
    if args.block_size == 0 {
        bail!("Block size must be at least one frame");
    }
    if args.sample_rate == 0 {
        bail!("Sample rate must be positive");
    }
    Ok(())
}

fn list_devices() -> Result<()> {
    let names = device_names().context("Failed to enumerate audio devices")?;
    println!("Input devices:");
    for name in &names.inputs {
        println!("  {name}");
    }
    println!("Output devices:");
    for name in &names.outputs {
        println!("  {name}");
    }
    Ok(())
}

/// Plugin list from settings, falling back to the built-in processors
fn known_plugins(settings: &Settings) -> KnownPluginList {
    let mut known = match settings.get_as::<KnownPluginList>(keys::PLUGIN_LIST) {
        Ok(Some(list)) => list,
        Ok(None) => builtin::descriptors().into_iter().collect(),
        Err(e) => {
            tracing::warn!("Ignoring stored plugin list: {}", e);
            builtin::descriptors().into_iter().collect()
        }
    };

    let removed = known.retain_stereo_capable();
    if removed > 0 {
        tracing::info!("Skipped {} plugins without stereo in and out", removed);
    }
    known
}

/// Restore the saved graph, or lay out a direct input-to-output chain
fn restore_graph(bay: &mut PatchBay, settings: &Settings) {
    match bay.restore_from_settings(settings) {
        Ok(Some(report)) => {
            for (id, reason) in &report.dropped_nodes {
                tracing::warn!("Saved node {} not restored: {}", id, reason);
            }
            if !report.dropped_wires.is_empty() {
                tracing::warn!("{} saved wires not restored", report.dropped_wires.len());
            }
            return;
        }
        Ok(None) => tracing::info!("No saved graph, creating default chain"),
        Err(e) => tracing::warn!("Saved graph unreadable, creating default chain: {}", e),
    }

    let input = bay.add_input("Audio Input");
    let output = bay.add_output("Audio Output");
    if let Err(e) = bay.connect(input, output) {
        tracing::warn!("Could not wire default chain: {}", e);
    }
}

fn run_console(bay: &mut PatchBay, events: Option<&EventReceiver>) -> Result<()> {
    println!("{}", console::HELP);

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();

    for line in stdin.lock().lines() {
        let line = line.context("Failed to read command")?;

        if let Some(events) = events {
            drain_events(bay, events);
        }

        if line.trim().is_empty() {
            continue;
        }

        let outcome = line
            .parse::<Command>()
            .and_then(|command| console::execute(bay, command, &mut stdout));
        match outcome {
            Ok(Flow::Continue) => {}
            Ok(Flow::Quit) => break,
            Err(e) => println!("error: {e:#}"),
        }
    }

    Ok(())
}

fn drain_events(bay: &mut PatchBay, events: &EventReceiver) {
    for event in events.try_iter() {
        match event {
            EngineEvent::Started {
                sample_rate,
                block_size,
            } => bay.set_audio_config(sample_rate, block_size),
            EngineEvent::Stopped => tracing::info!("Audio stopped"),
            EngineEvent::StreamError(message) => {
                tracing::error!("Audio device error: {}", message);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_block_size_is_refused() {
        let args = Args::parse_from(["chainhost", "--block-size", "0", "--no-audio"]);
        assert!(check_args(&args).is_err());

        let args = Args::parse_from(["chainhost", "-r", "0"]);
        assert!(check_args(&args).is_err());

        let args = Args::parse_from(["chainhost", "-b", "256"]);
        assert!(check_args(&args).is_ok());
    }
}
