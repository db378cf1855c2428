use anyhow::{Context, Result};
use futures::SinkExt;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::cli::PublishArgs;
use crate::livetail::LiveMessage;

/// Send one publish command over the bridge's WebSocket. The bridge does not
/// acknowledge commands, so success means the frame was delivered.
pub async fn execute_publish(args: PublishArgs) -> Result<()> {
    let (mut ws_stream, _) = connect_async(args.url.as_str())
        .await
        .with_context(|| format!("Failed to connect to {}", args.url))?;

    let frame = LiveMessage::new(args.topic.as_str(), args.payload.as_str()).to_json();
    ws_stream.send(Message::Text(frame)).await?;
    ws_stream.close(None).await?;

    eprintln!("Sent {} to {}", args.topic, args.url);
    Ok(())
}
