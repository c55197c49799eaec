//! surfacelink - control surface engine
//!
//! Drives chained MIDI control surfaces (HUI, Mackie Control, pad grids)
//! from a YAML configuration.

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use surfacelink::chain::ExtendedSurface;
use surfacelink::config::watcher::{reload_scope, ReloadScope};
use surfacelink::config::{AppConfig, ConfigWatcher};
use surfacelink::echo::{self, EchoMapper};
use surfacelink::protocol::ProtocolFamily;
use surfacelink::sniffer;
use surfacelink::surface::{ScheduledTask, Surface, TokioScheduler};
use surfacelink::transport::{self, InputPort, MidiSink};

/// surfacelink - drive MIDI control surfaces
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// List available MIDI ports
    #[arg(long)]
    list_ports: bool,

    /// Run in sniffer mode
    #[arg(long)]
    sniffer: bool,

    /// Protocol family used to decode sniffed input
    #[arg(long, default_value = "mcu")]
    protocol: ProtocolFamily,

    /// Input port pattern for the sniffer
    #[arg(long, default_value = "")]
    port: String,

    /// Echo input back to the surface (toggle LEDs, move rings and faders)
    #[arg(long)]
    echo: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    init_logging(&args.log_level)?;

    if args.list_ports {
        return sniffer::list_ports_formatted();
    }

    if args.sniffer {
        return sniffer::run_cli_sniffer(&args.port, args.protocol).await;
    }

    info!("Starting surfacelink v{}", env!("CARGO_PKG_VERSION"));

    let (mut watcher, config) = ConfigWatcher::new(args.config.clone()).await?;
    info!("Configuration loaded from {}", args.config);

    let (input_tx, mut input_rx) = mpsc::unbounded_channel();
    let (timer_tx, mut timer_rx) = mpsc::unbounded_channel();

    let (mut chain, _inputs) = build_chain(&config, input_tx, timer_tx)?;
    chain.attach_all();
    info!("{} unit(s) attached", chain.len());

    let mut echo = args.echo.then(|| {
        let status = config.surfaces.iter().min_by_key(|s| s.index_offset).map(|s| {
            let (first, width) = echo::status_field(s.protocol);
            (s.index_offset + first, width)
        });
        info!("Echo mode enabled");
        EchoMapper::new(status)
    });

    let mut current = config;
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            Some((unit, bytes)) = input_rx.recv() => {
                let events = chain.receive(unit, &bytes);
                for event in &events {
                    debug!("Unit {}: {}", unit, event);
                    if let Some(echo) = echo.as_mut() {
                        echo.apply(event, &mut chain);
                    }
                }
            }
            Some((unit, task)) = timer_rx.recv() => {
                let events = chain.on_timer(unit, task);
                for event in &events {
                    debug!("Unit {}: {}", unit, event);
                    if let Some(echo) = echo.as_mut() {
                        echo.apply(event, &mut chain);
                    }
                }
            }
            Some(new_config) = watcher.next_config() => {
                match reload_scope(&current, &new_config) {
                    ReloadScope::Unchanged => debug!("Config reloaded without changes"),
                    ReloadScope::Timing => {
                        chain.update_options(&new_config.timing.surface_options());
                        info!("Timing updated");
                    }
                    ReloadScope::Restart => {
                        warn!("Surface definitions changed; restart to apply them");
                        // Keep running units; apply what can be applied live
                        chain.update_options(&new_config.timing.surface_options());
                    }
                }
                current = new_config;
            }
            _ = &mut shutdown => break,
        }
    }

    chain.close_all();
    info!("All units closed");

    Ok(())
}

/// One surface per configured unit, each with its own ports and scheduler
fn build_chain(
    config: &AppConfig,
    input_tx: mpsc::UnboundedSender<(usize, Vec<u8>)>,
    timer_tx: mpsc::UnboundedSender<(usize, ScheduledTask)>,
) -> Result<(ExtendedSurface, Vec<InputPort>)> {
    let options = config.timing.surface_options();
    let mut chain = ExtendedSurface::new();
    let mut inputs = Vec::new();

    for (idx, unit) in config.surfaces.iter().enumerate() {
        let sink = MidiSink::connect(&unit.output_port)
            .with_context(|| format!("Surface '{}': output port", unit.name))?;
        debug!("Surface '{}' writes to {}", unit.name, sink.port_name());
        let scheduler = TokioScheduler::new(timer_tx.clone(), idx);
        let surface = Surface::from_family(
            unit.name.clone(),
            unit.protocol,
            &unit.protocol_options(),
            Box::new(sink),
            Box::new(scheduler),
            options.clone(),
        );
        let number = chain.push(unit.index_offset, surface)?;
        debug_assert_eq!(number, idx);

        let input = transport::connect_input(&unit.input_port, idx, input_tx.clone())
            .with_context(|| format!("Surface '{}': input port", unit.name))?;
        info!("Unit {} '{}' ({}) at offset {}", idx, unit.name, unit.protocol, unit.index_offset);
        inputs.push(input);
    }

    Ok((chain, inputs))
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .init();

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for CTRL+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
