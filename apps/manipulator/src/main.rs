use std::{io::BufRead, sync::Arc, time::Duration};

mod bridge;
mod config;
mod renderer;

use anyhow::{bail, Result};
use bridge::TriggerCommand;
use bus::{BusConnection, BusSettings, StatusPublisher, StatusSink};
use clap::Parser;
use pcp::{ClientIdentity, PortId};
use renderer::AutoRenderer;
use tokio::sync::mpsc;
use tracing::info;
use transfer::TransferOrchestrator;

#[derive(Parser, Debug)]
struct Args {
    #[arg(long)]
    broker_host: Option<String>,
    #[arg(long)]
    broker_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();

    let mut settings = config::load_settings();
    if let Some(host) = args.broker_host {
        settings.broker_host = host;
    }
    if let Some(port) = args.broker_port {
        settings.broker_port = port;
    }

    let ports = settings
        .ports
        .iter()
        .map(PortId::new)
        .collect::<Result<Vec<_>, _>>()?;
    if ports.len() < 2 {
        bail!("at least two ports must be configured (source and destination)");
    }
    let default_source = ports[0].clone();
    let default_dest = ports[1].clone();

    let bus = BusConnection::new(BusSettings {
        broker_host: settings.broker_host.clone(),
        broker_port: settings.broker_port,
        client_id_prefix: settings.client_id_prefix.clone(),
        ports: ports.clone(),
    });
    let sink: Arc<dyn StatusSink> = bus.clone();

    let (signal_tx, signal_rx) = mpsc::channel(16);
    let orchestrator = Arc::new(TransferOrchestrator::new(
        AutoRenderer::new(signal_tx),
        StatusPublisher::new(Arc::clone(&sink)),
        signal_rx,
        settings.phase_timeout_ms.map(Duration::from_millis),
    ));
    let publisher = StatusPublisher::new(sink);

    let (cmd_tx, cmd_rx) = crossbeam_channel::bounded::<TriggerCommand>(16);
    std::thread::spawn(move || read_stdin_triggers(cmd_tx));
    let (trigger_tx, mut triggers) = mpsc::channel::<TriggerCommand>(16);
    tokio::task::spawn_blocking(move || {
        while let Ok(cmd) = cmd_rx.recv() {
            if trigger_tx.blocking_send(cmd).is_err() {
                break;
            }
        }
    });

    info!(
        broker = %format!("{}:{}", settings.broker_host, settings.broker_port),
        ?ports,
        "manipulator control loop ready"
    );
    println!("{}", bridge::USAGE);

    // The current consumer identity lives here and is passed explicitly
    // into every publish; no global state.
    let mut identity = ClientIdentity::default();
    while let Some(cmd) = triggers.recv().await {
        match cmd {
            TriggerCommand::Start { source, dest } => {
                let orchestrator = Arc::clone(&orchestrator);
                let consumer = identity;
                tokio::spawn(async move {
                    orchestrator.start_transfer(&source, &dest, consumer).await;
                });
            }
            TriggerCommand::Status { port, state } => {
                publisher.publish_status(&port, state, identity).await;
            }
            TriggerCommand::ToggleIdentity => {
                identity = identity.toggled();
                info!(identity = %identity, "consumer identity switched");
            }
            TriggerCommand::ToggleBus => bus.toggle().await,
            TriggerCommand::Reset => orchestrator.reset(&default_source, &default_dest).await,
            TriggerCommand::Quit => break,
        }
    }

    info!("manipulator shutting down");
    Ok(())
}

fn read_stdin_triggers(cmd_tx: crossbeam_channel::Sender<TriggerCommand>) {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match bridge::parse_trigger(line) {
            Ok(cmd) => {
                let quit = cmd == TriggerCommand::Quit;
                let mut status = String::new();
                bridge::dispatch_trigger(&cmd_tx, cmd, &mut status);
                if !status.is_empty() {
                    eprintln!("{status}");
                }
                if quit {
                    return;
                }
            }
            Err(usage) => eprintln!("{usage}"),
        }
    }
    // EOF ends the session like an explicit quit.
    let mut status = String::new();
    bridge::dispatch_trigger(&cmd_tx, TriggerCommand::Quit, &mut status);
}
