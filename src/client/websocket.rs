//! WebSocket transport for server-backed extensions.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::error::ConnectError;
use super::transport::{Transport, TransportEvent};

/// Open a WebSocket and pump frames between it and a [`Transport`].
pub async fn connect(url: &str) -> Result<Transport, ConnectError> {
    let (ws, _) = connect_async(url).await?;
    tracing::debug!(url, "WebSocket connected");

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (mut sink, mut stream) = ws.split();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                outgoing = out_rx.recv() => match outgoing {
                    Some(frame) => {
                        if let Err(e) = sink.send(Message::Text(frame)).await {
                            let _ = in_tx.send(TransportEvent::Error(e.to_string()));
                            break;
                        }
                    }
                    None => {
                        // Transport dropped.
                        let _ = sink.send(Message::Close(None)).await;
                        return;
                    }
                },
                incoming = stream.next() => match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if in_tx.send(TransportEvent::Message(text)).is_err() {
                            return;
                        }
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        let event = match String::from_utf8(bytes) {
                            Ok(text) => TransportEvent::Message(text),
                            Err(e) => TransportEvent::Error(format!("Invalid UTF-8 frame: {}", e)),
                        };
                        if in_tx.send(event).is_err() {
                            return;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        let _ = in_tx.send(TransportEvent::Error(e.to_string()));
                        break;
                    }
                },
            }
        }
        let _ = in_tx.send(TransportEvent::Closed);
    });

    Ok(Transport::new(out_tx, in_rx))
}
