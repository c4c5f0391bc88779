//! Walks through one session against a running server: upgrade with a
//! query string, ping, text, close.

use anyhow::{bail, Result};
use clap::Parser;
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "client", about = "WebSocket endpoint demo client")]
struct Args {
    /// Endpoint to connect to
    #[arg(long, default_value = "ws://127.0.0.1:8080/ws?token=demo")]
    url: String,

    /// Text message to send
    #[arg(long, default_value = "hi")]
    text: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let (mut ws, response) = connect_async(args.url.as_str()).await?;
    info!(status = %response.status(), "connected");

    ws.send(Message::Ping(vec![0x01, 0x02])).await?;
    ws.send(Message::Text(args.text.clone())).await?;

    let mut replies = 0;
    while replies < 2 {
        match ws.next().await {
            Some(Ok(message)) => {
                info!(?message, "received");
                replies += 1;
            }
            Some(Err(e)) => return Err(e.into()),
            None => bail!("server closed the connection early"),
        }
    }

    ws.close(None).await?;
    while let Some(message) = ws.next().await {
        info!(?message, "after close");
    }
    info!("session closed");
    Ok(())
}
