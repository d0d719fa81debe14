use anyhow::{Context, Result};
use clap::Parser;
use client_core::ChatSession;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod render;

use config::{load_settings, Settings};
use render::{connection_banner, render_event};

#[derive(Parser, Debug)]
#[command(about = "Terminal client for the multi-agent chat backend")]
struct Args {
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    ws_path: Option<String>,
    #[arg(long)]
    image_origin: Option<String>,
    /// End a turn with an error if no reply arrives in time (0 disables).
    #[arg(long)]
    response_timeout_secs: Option<u64>,
    #[arg(long)]
    max_retries: Option<u32>,
}

impl Args {
    fn apply(self, settings: &mut Settings) {
        if let Some(v) = self.server_url {
            settings.server_url = v;
        }
        if let Some(v) = self.ws_path {
            settings.ws_path = v;
        }
        if let Some(v) = self.image_origin {
            settings.image_origin = Some(v);
        }
        if let Some(v) = self.response_timeout_secs {
            settings.response_timeout_secs = Some(v);
        }
        if let Some(v) = self.max_retries {
            settings.reconnect_max_retries = Some(v);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    let mut settings = load_settings()?;
    args.apply(&mut settings);
    let image_origin = settings.image_origin_url()?;

    let session = ChatSession::connect(settings.client_options())
        .with_context(|| format!("failed to start chat session for {}", settings.server_url))?;
    info!(server_url = %settings.server_url, "chat client started");

    println!("Agentic-System | Multi-Agentic System (HR · IT · ImageGen)");
    println!("Ask about HR policies, IT support, or generate images. /clear drops the draft, /quit exits.");
    let snapshot = session.snapshot();
    println!(
        "{}",
        connection_banner(snapshot.connection_status, snapshot.pending_error.as_deref())
    );

    let mut events = session.subscribe_events();
    let renderer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(block) = render_event(&event, &image_origin) {
                        println!("{block}");
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "renderer fell behind session events");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                match line.trim() {
                    "/quit" => break,
                    "/clear" => session.clear_draft().await?,
                    _ => {
                        session.set_draft(line.as_str()).await?;
                        session.submit_draft().await?;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.close().await?;
    renderer.abort();
    Ok(())
}
