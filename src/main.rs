use std::sync::Arc;

use clap::Parser;
use ping_session::{
    AddressStyle, AppConfig, ChannelHandler, PingEvent, PingSession, short_error_string,
};

/// Ping a host and print every packet-level event.
#[derive(Parser, Debug)]
#[command(name = "ping-session", version, about, long_about = None)]
struct Cli {
    /// Host name or address (defaults to the saved target)
    host: Option<String>,

    /// Only use an IPv4 address
    #[arg(short = '4')]
    ipv4: bool,

    /// Only use an IPv6 address
    #[arg(short = '6')]
    ipv6: bool,

    /// Milliseconds between echo requests
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Payload bytes per echo request
    #[arg(short = 's', long)]
    size: Option<usize>,

    /// Stop after this many echo requests
    #[arg(short = 'c', long)]
    count: Option<u64>,

    /// Save the effective settings as the new defaults
    #[arg(long)]
    save: bool,
}

fn stamp() -> String {
    chrono::Local::now().format("%H:%M:%S%.3f").to_string()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let mut config = AppConfig::load();
    if let Some(host) = cli.host {
        config.target = host;
    }
    if cli.ipv4 || cli.ipv6 {
        config.address_style = AddressStyle::from_flags(cli.ipv4, cli.ipv6);
    }
    if let Some(interval_ms) = cli.interval_ms {
        config.interval_ms = interval_ms;
    }
    if let Some(size) = cli.size {
        config.payload_size = size;
    }
    if cli.save {
        let path = config.save()?;
        log::info!("saved settings to {}", path.display());
    }

    let mut options = config.session_options();
    if let Some(count) = cli.count {
        options = options.with_count(count);
    }
    let interval = options.interval;

    let (handler, mut events) = ChannelHandler::new();
    let session = PingSession::with_options(config.host_target(), options, Arc::new(handler));
    session.start()?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut sent: u64 = 0;
    // -c 0 sends nothing, so there is nothing to wait for
    let mut finish_at = (cli.count == Some(0)).then(tokio::time::Instant::now);
    loop {
        let event = tokio::select! {
            _ = &mut ctrl_c => {
                println!("{} stop", stamp());
                break;
            }
            _ = sleep_until(finish_at) => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let counted = matches!(event, PingEvent::PacketSent { .. } | PingEvent::SendFailed { .. });
        match &event {
            PingEvent::Started(address) => println!("{} pinging {address}", stamp()),
            PingEvent::Failed(error) => {
                println!("{} failed: {}", stamp(), short_error_string(error));
                return Err(error.clone().into());
            }
            PingEvent::PacketSent { sequence, .. } => println!("{} #{sequence} sent", stamp()),
            PingEvent::SendFailed { sequence, error } => println!(
                "{} #{sequence} send failed: {}",
                stamp(),
                short_error_string(error)
            ),
            PingEvent::ReplyReceived { sequence, size } => {
                println!("{} #{sequence} received, size={size}", stamp())
            }
            PingEvent::UnexpectedPacket { size } => {
                println!("{} unexpected packet, size={size}", stamp())
            }
        }

        if counted {
            sent += 1;
            if cli.count == Some(sent) {
                // one more interval for the last reply to come in
                finish_at = Some(tokio::time::Instant::now() + interval);
            }
        }
    }

    session.stop();
    Ok(())
}

async fn sleep_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
