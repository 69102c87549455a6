//! Watch a controller's event stream
//!
//! Connects to the controller, prints every routed event and restarts the
//! stream when the connection is lost.
//!
//! ```text
//! cargo run -p isy-sdk-stream --example watch_events -- \
//!     --address 192.168.1.20 --username admin --password admin
//! ```

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use isy_stream::{EventHandler, EventMessage, EventStream, StreamConfig, TlsVersion};

#[derive(Parser, Debug)]
#[command(about = "Print events pushed by an ISY controller")]
struct Args {
    /// Controller host name or IP address
    #[arg(long)]
    address: String,

    #[arg(long, default_value_t = 443)]
    port: u16,

    #[arg(long, default_value = "admin")]
    username: String,

    #[arg(long, default_value = "admin")]
    password: String,

    /// TLS profile: 1.2 or 1.3
    #[arg(long, default_value = "1.2")]
    tls: TlsVersion,

    /// Seconds between liveness checks
    #[arg(long, default_value_t = 5)]
    poll_secs: u64,

    /// Also report climate events
    #[arg(long)]
    weather: bool,

    /// Give up on the stream after this many reconnects
    #[arg(long, default_value_t = 5)]
    max_reconnects: u32,
}

struct Printer;

impl EventHandler for Printer {
    fn on_node_update(&self, message: &EventMessage) {
        println!(
            "node {} -> {}",
            message.node().unwrap_or_default(),
            message.action().unwrap_or_default()
        );
    }

    fn on_climate_update(&self, message: &EventMessage) {
        println!("climate update: {}", message.action().unwrap_or_default());
    }

    fn on_variable_update(&self, message: &EventMessage) {
        println!("variable update: {:?}", message.document());
    }

    fn on_program_update(&self, message: &EventMessage) {
        println!("program update: {}", message.action().unwrap_or_default());
    }

    fn on_programs_refresh_all(&self) {
        println!("programs changed, refresh all");
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "isy_stream=info".into()),
        )
        .init();

    let args = Args::parse();
    let config = StreamConfig::new(args.address, args.username, args.password)
        .with_port(args.port)
        .with_tls_version(args.tls)
        .with_poll_interval(Duration::from_secs(args.poll_secs))
        .with_weather(args.weather);

    let (lost_tx, lost_rx) = mpsc::channel();
    let stream = EventStream::new(config, Arc::new(Printer))?.with_connection_lost(move || {
        let _ = lost_tx.send(());
    });

    stream.start()?;
    println!("Watching events, press Ctrl+C to exit");

    let mut reconnects = 0;
    while lost_rx.recv().is_ok() {
        if stream.running() {
            continue;
        }
        if reconnects == args.max_reconnects {
            eprintln!("Connection lost {} times, giving up", reconnects + 1);
            break;
        }
        reconnects += 1;
        std::thread::sleep(Duration::from_secs(2));
        println!("Reconnecting (attempt {})", reconnects);
        if let Err(e) = stream.start() {
            eprintln!("Reconnect failed: {}", e);
        }
    }

    stream.stop();
    Ok(())
}
