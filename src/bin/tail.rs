//! hookwatch-tail: follow the live event stream from a terminal
//!
//! Connects through the reconnecting [`Connector`], prints the initial
//! snapshot and then one line per pushed event.

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use hookwatch::client::{ConnectionState, Connector, ConnectorConfig};
use hookwatch::protocol::ServerMessage;
use hookwatch::types::{EventFilter, HookEventType, StoredEvent};
use hookwatch::ClientMessage;

#[derive(Parser)]
#[command(name = "hookwatch-tail")]
#[command(about = "Follow agent hook events as they arrive", long_about = None)]
#[command(version)]
struct Cli {
    /// Hub endpoint
    #[arg(long, env = "HOOKWATCH_URL", default_value = "ws://127.0.0.1:4000/stream")]
    url: String,

    /// Only receive these event types (repeatable)
    #[arg(short = 't', long = "event-type")]
    event_types: Vec<String>,

    /// Run one filtered query for this source app before following
    #[arg(long)]
    source_app: Option<String>,

    /// Reconnect attempts before giving up
    #[arg(long, default_value_t = 10)]
    max_attempts: u32,

    /// Print raw JSON instead of a summary line
    #[arg(long)]
    json: bool,

    /// Log level (RUST_LOG overrides)
    #[arg(short, long, default_value = "warn")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("hookwatch={}", cli.log_level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let event_types = cli
        .event_types
        .iter()
        .map(|raw| raw.parse::<HookEventType>())
        .collect::<Result<Vec<_>, _>>()?;

    let config = ConnectorConfig {
        max_attempts: cli.max_attempts,
        ..ConnectorConfig::new(&cli.url)
    };
    let (connector, mut inbound) = Connector::new(config);
    if !event_types.is_empty() {
        connector.subscribe(event_types);
    }
    if let Some(app) = &cli.source_app {
        connector.send(ClientMessage::Filter(EventFilter::new().source_app(app.as_str())))?;
    }
    connector.connect()?;
    let mut states = connector.state_changes();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                match state {
                    ConnectionState::Open => info!(url = %cli.url, "connected"),
                    ConnectionState::Disconnected { will_retry: false } => {
                        warn!("connector gave up");
                        break;
                    }
                    _ => {}
                }
            }
            message = inbound.recv() => {
                let Some(message) = message else { break };
                print_message(&message, cli.json);
            }
        }
    }

    connector.close().await;
    Ok(())
}

fn print_message(message: &ServerMessage, json: bool) {
    if json {
        match message.to_json() {
            Ok(line) => println!("{line}"),
            Err(e) => warn!(error = %e, "failed to encode message"),
        }
        return;
    }
    match message {
        ServerMessage::Initial(snapshot) => {
            println!(
                "-- snapshot: {} recent of {} total",
                snapshot.events.len(),
                snapshot.stats.total_events
            );
            // oldest first so the terminal reads top to bottom
            for event in snapshot.events.iter().rev() {
                print_event(event);
            }
        }
        ServerMessage::Event(event) => print_event(event),
        ServerMessage::Filter(events) => {
            println!("-- filter: {} matching", events.len());
            for event in events.iter().rev() {
                print_event(event);
            }
        }
        ServerMessage::Error { message } => eprintln!("server error: {message}"),
        ServerMessage::Pong => {}
    }
}

fn print_event(event: &StoredEvent) {
    let summary = event.summary.as_deref().unwrap_or("");
    println!(
        "#{:<6} {} {:<16} {:<12} {:<16} {}",
        event.id,
        event.timestamp,
        event.source_app,
        event.session_id,
        event.event_type.as_str(),
        summary
    );
}
