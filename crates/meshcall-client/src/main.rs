use std::sync::Arc;

use anyhow::Result;
use meshcall_client::call::{CallController, CallHandle, CallOptions, WebRtcTransportFactory};
use meshcall_client::config::ClientConfig;
use meshcall_client::media::{HeadlessDevices, LocalStreamReader};
use meshcall_client::network::WebSocketSignaling;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "meshcall=debug,meshcall_client=debug,meshcall_media=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Meshcall client...");

    let config = ClientConfig::load_with_room(std::env::args().nth(1))?;

    let (signaling, signaling_rx) = WebSocketSignaling::connect(&config.signaling_url).await?;
    let factory = WebRtcTransportFactory::new(&config.ice_servers)?;

    let (mut controller, handle) = CallController::new(
        CallOptions::from(&config),
        Arc::new(signaling),
        signaling_rx,
        Arc::new(HeadlessDevices),
        Arc::new(factory),
    );
    controller.start().await?;

    tokio::spawn(read_commands(handle.clone()));
    tokio::spawn(report_local_stream(controller.local_stream()));

    let ctrl_c = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, ending call");
            ctrl_c.end_call();
        }
    });

    controller.run().await;
    Ok(())
}

/// Log what is being sent each time the local stream is replaced
async fn report_local_stream(mut reader: LocalStreamReader) {
    loop {
        let stream = reader.current();
        let tracks: Vec<String> = stream
            .tracks()
            .iter()
            .map(|t| format!("{} {:?}{}", t.kind(), t.source(), if t.is_enabled() { "" } else { " (off)" }))
            .collect();
        tracing::info!("Sending {}: {}", stream.id(), tracks.join(", "));

        if !reader.changed().await {
            break;
        }
    }
}

/// `/video`, `/audio`, `/screen` and `/quit`; any other line is chat
async fn read_commands(handle: CallHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::error!("Failed to read stdin: {}", e);
                break;
            }
        };

        let delivered = match line.trim() {
            "" => continue,
            "/video" => handle.toggle_video(),
            "/audio" => handle.toggle_audio(),
            "/screen" => handle.toggle_screen_share(),
            "/quit" => handle.end_call(),
            text => handle.send_chat(text),
        };

        if !delivered {
            break;
        }
    }
}
