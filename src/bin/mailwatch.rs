#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! Watch an IMAP mailbox and POST every new message to a webhook

use clap::Parser;
use mailwatch::{
    CommandExecutor, DrainCoordinator, EVENT_CHANNEL_CAPACITY, Monitor,
    MonitorConfig, Transport, WebhookSender, run_dispatcher,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mailwatch")]
#[command(
    about = "Watch an IMAP mailbox and deliver new messages to a webhook"
)]
struct Args {
    /// JSON config file (environment variables fill anything it omits)
    #[arg(long)]
    config: Option<PathBuf>,

    /// IMAP server hostname
    #[arg(long)]
    host: Option<String>,

    /// IMAP server port
    #[arg(long)]
    port: Option<u16>,

    /// Mailbox to watch
    #[arg(long)]
    mailbox: Option<String>,

    /// Connect in the clear and upgrade with STARTTLS
    #[arg(long)]
    starttls: bool,

    /// Skip TLS certificate verification
    #[arg(long)]
    insecure: bool,

    /// Webhook endpoint URL
    #[arg(long)]
    webhook_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let mut config = MonitorConfig::load(args.config.as_deref())?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(mailbox) = args.mailbox {
        config.mailbox = mailbox;
    }
    if args.starttls {
        config.starttls = true;
    }
    if args.insecure {
        config.insecure_skip_verify = true;
    }
    if let Some(url) = args.webhook_url {
        config.webhook_url = url;
    }
    config.validate()?;

    let config = Arc::new(config);
    let transport = Arc::new(Transport::new(Arc::clone(&config)));
    let executor = Arc::new(CommandExecutor::new(
        Arc::clone(&transport),
        config.command_timeout,
    ));
    let drain = DrainCoordinator::new();
    let sender = WebhookSender::new(&config)?;
    let (events_tx, events_rx) =
        tokio::sync::mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let token = CancellationToken::new();

    let ctrlc_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested");
            ctrlc_token.cancel();
        }
    });

    let monitor = Monitor::new(
        Arc::clone(&config),
        Arc::clone(&transport),
        Arc::clone(&executor),
        drain.clone(),
        events_tx,
        token.clone(),
    );
    let monitor_task = tokio::spawn(async move { monitor.run().await });
    let dispatcher_task = tokio::spawn(run_dispatcher(
        events_rx,
        executor,
        drain,
        sender,
        Arc::clone(&config),
        token,
    ));

    let (monitor_result, dispatcher_result) =
        tokio::join!(monitor_task, dispatcher_task);
    monitor_result?;
    dispatcher_result?;

    transport.close().await;
    Ok(())
}
