use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::prelude::*;

use remote_pad::{
    Channel, ChannelContext, Envelope, Multiplexer, Sample, Settings, Subscription, WsTransport,
    resolve,
};

/// Producer queue depth per channel. Full queues drop samples.
const PRODUCER_QUEUE: usize = 64;

#[derive(Parser)]
#[command(name = "pad")]
#[command(about = "Stream motion and touch input to a remote host over WebSocket")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ./pad.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a host and print the endpoint of every channel
    Resolve(ResolveArgs),

    /// Connect to a host and stream JSON samples read from stdin
    Stream(StreamArgs),
}

#[derive(Parser)]
struct ResolveArgs {
    /// IPv4 address of the receiving machine
    host: String,
}

#[derive(Parser)]
struct StreamArgs {
    /// IPv4 address of the receiving machine
    host: String,

    /// Channel in the foreground at start
    #[arg(short, long)]
    foreground: Option<Channel>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.unwrap_or_else(|| PathBuf::from("pad.toml"));
    let settings = Settings::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    match cli.command {
        Commands::Resolve(args) => resolve_command(&settings, &args.host),
        Commands::Stream(args) => stream_command(settings, args).await,
    }
}

fn init_logging(debug: bool) {
    let default_directive = if debug {
        "pad=debug,remote_pad=debug,info"
    } else {
        "pad=info,remote_pad=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

fn resolve_command(settings: &Settings, host: &str) -> Result<()> {
    let endpoints = resolve(host, &settings.endpoint)
        .map_err(|e| anyhow::anyhow!("{}: {e}", e.user_message()))?;
    for endpoint in endpoints.iter() {
        println!("{:<6} {}", endpoint.channel(), endpoint);
    }
    Ok(())
}

/// One line of stdin input.
enum Line {
    Sample(Sample),
    Foreground(Option<Channel>),
}

fn parse_line(line: &str) -> Result<Line> {
    let value: serde_json::Value = serde_json::from_str(line).context("invalid JSON")?;
    if let Some(foreground) = value.get("foreground") {
        let channel = serde_json::from_value(foreground.clone())
            .context("foreground must be \"motion\", \"touch\" or null")?;
        return Ok(Line::Foreground(channel));
    }
    let envelope = Envelope::decode(line)?;
    Ok(Line::Sample(envelope.data))
}

async fn stream_command(settings: Settings, args: StreamArgs) -> Result<()> {
    init_logging(args.debug);

    let transport = Arc::new(WsTransport::new(&settings.connection));
    let context = Arc::new(ChannelContext::new(settings.clone(), transport));
    let endpoints = context
        .set_host(&args.host)
        .map_err(|e| anyhow::anyhow!("{}: {e}", e.user_message()))?;
    context.set_foreground(args.foreground);
    info!(host = %endpoints.host(), foreground = ?args.foreground, "streaming from stdin");

    let mux = Arc::new(Multiplexer::new(context.clone(), &settings.stream));
    let mut producers: HashMap<Channel, (mpsc::Sender<Sample>, Subscription)> = HashMap::new();
    for channel in Channel::ALL {
        let (tx, rx) = mpsc::channel(PRODUCER_QUEUE);
        producers.insert(channel, (tx, mux.attach(channel, rx)));
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal, cleaning up...");
                break;
            }
            line = lines.next_line() => line.context("failed to read stdin")?,
        };
        let Some(line) = line else {
            debug!("stdin closed");
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match parse_line(line) {
            Ok(Line::Foreground(channel)) => context.set_foreground(channel),
            Ok(Line::Sample(sample)) => {
                let channel = sample.channel();
                if let Some((tx, _)) = producers.get(&channel) {
                    if tx.try_send(sample).is_err() {
                        debug!(channel = %channel, "producer queue full, dropping sample");
                    }
                }
            }
            Err(e) => warn!(error = %format!("{e:#}"), "skipping input line"),
        }
    }

    for (_, (_, subscription)) in producers.drain() {
        subscription.unsubscribe();
    }
    for status in context.status() {
        info!(
            channel = %status.channel,
            state = %status.state,
            received = context
                .manager(status.channel)
                .map(|m| m.messages_received())
                .unwrap_or_default(),
            "{}",
            status.status
        );
    }
    context.teardown();

    for stats in mux.all_stats() {
        info!(
            channel = %stats.channel,
            forwarded = stats.forwarded,
            rate_limited = stats.rate_limited,
            not_foreground = stats.not_foreground,
            not_connected = stats.not_connected,
            dropped = stats.dropped,
            "offer statistics"
        );
    }
    Ok(())
}
