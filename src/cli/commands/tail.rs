use anyhow::Result;
use futures::StreamExt;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::cli::TailArgs;
use crate::livetail::LiveMessage;

pub async fn execute_tail(args: TailArgs) -> Result<()> {
    eprintln!("Connecting to {}...", args.url);

    let (ws_stream, _) = connect_async(args.url.as_str()).await?;
    let (_, mut read) = ws_stream.split();

    eprintln!("Connected. Streaming live messages...");
    eprintln!("Press Ctrl+C to stop.\n");

    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if let Some(line) = format_message(&text, args.prefix.as_deref()) {
                    println!("{}", line);
                }
            }
            Ok(Message::Close(_)) => {
                eprintln!("Connection closed by server");
                break;
            }
            Err(e) => {
                eprintln!("WebSocket error: {}", e);
                break;
            }
            _ => {}
        }
    }

    Ok(())
}

/// `topic payload`, or the raw frame if it is not a live message.
fn format_message(text: &str, prefix: Option<&str>) -> Option<String> {
    match serde_json::from_str::<LiveMessage>(text) {
        Ok(message) => {
            if prefix.is_some_and(|p| !message.topic.starts_with(p)) {
                return None;
            }
            Some(format!("{} {}", message.topic, message.payload))
        }
        Err(_) => Some(text.to_string()),
    }
}
