//! Two-party channels carrying [`Envelope`]s.
//!
//! [`pair`] connects two ends in process. [`StreamChannel`] carries
//! newline-delimited JSON over any byte stream (pipes, sockets, stdio).

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, Lines};
use tokio::sync::{mpsc, Mutex};

use super::message::Envelope;
use super::{HandshakeError, HandshakeResult};

/// Sends envelopes to the other party.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send(&self, envelope: Envelope) -> HandshakeResult<()>;
}

/// Receives envelopes from the other party. `None` means the channel closed.
#[async_trait]
pub trait MessageSource: Send {
    async fn recv(&mut self) -> HandshakeResult<Option<Envelope>>;
}

/// Sending half of an in-process channel.
#[derive(Debug, Clone)]
pub struct InProcessSink {
    tx: mpsc::UnboundedSender<Envelope>,
}

/// Receiving half of an in-process channel.
#[derive(Debug)]
pub struct InProcessSource {
    rx: mpsc::UnboundedReceiver<Envelope>,
}

/// Two connected ends. What one end sends, the other receives.
pub fn pair() -> ((InProcessSink, InProcessSource), (InProcessSink, InProcessSource)) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    (
        (InProcessSink { tx: a_tx }, InProcessSource { rx: b_rx }),
        (InProcessSink { tx: b_tx }, InProcessSource { rx: a_rx }),
    )
}

#[async_trait]
impl MessageSink for InProcessSink {
    async fn send(&self, envelope: Envelope) -> HandshakeResult<()> {
        self.tx.send(envelope).map_err(|_| HandshakeError::Closed)
    }
}

#[async_trait]
impl MessageSource for InProcessSource {
    async fn recv(&mut self) -> HandshakeResult<Option<Envelope>> {
        Ok(self.rx.recv().await)
    }
}

/// Newline-delimited JSON envelopes over a byte stream.
pub struct StreamChannel;

impl StreamChannel {
    /// Split a reader/writer pair into a sink and a source.
    pub fn new<R, W>(reader: R, writer: W) -> (StreamSink<W>, StreamSource<R>)
    where
        R: AsyncBufRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        (
            StreamSink {
                writer: Mutex::new(writer),
            },
            StreamSource {
                lines: reader.lines(),
            },
        )
    }
}

pub struct StreamSink<W> {
    writer: Mutex<W>,
}

pub struct StreamSource<R> {
    lines: Lines<R>,
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> MessageSink for StreamSink<W> {
    async fn send(&self, envelope: Envelope) -> HandshakeResult<()> {
        let mut line = serde_json::to_string(&envelope)?;
        line.push('\n');
        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> MessageSource for StreamSource<R> {
    async fn recv(&mut self) -> HandshakeResult<Option<Envelope>> {
        while let Some(line) = self.lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(envelope) => return Ok(Some(envelope)),
                // Not every line on a shared stream is for us.
                Err(e) => tracing::debug!("Ignoring undecodable message: {}", e),
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::message::{Message, Role};
    use tokio::io::BufReader;

    #[tokio::test]
    async fn test_pair_is_crossed() {
        let ((a_sink, mut a_source), (b_sink, mut b_source)) = pair();
        a_sink.send(Envelope::new(Role::Client, Message::Ping)).await.unwrap();
        b_sink.send(Envelope::new(Role::Page, Message::GetSettings)).await.unwrap();

        assert_eq!(
            b_source.recv().await.unwrap(),
            Some(Envelope::new(Role::Client, Message::Ping))
        );
        assert_eq!(
            a_source.recv().await.unwrap(),
            Some(Envelope::new(Role::Page, Message::GetSettings))
        );

        drop(a_sink);
        assert_eq!(b_source.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_stream_channel_round_trip() {
        let (client_io, page_io) = tokio::io::duplex(1024);
        let (client_read, client_write) = tokio::io::split(client_io);
        let (page_read, page_write) = tokio::io::split(page_io);

        let (client_sink, _client_source) = StreamChannel::new(BufReader::new(client_read), client_write);
        let (_page_sink, mut page_source) = StreamChannel::new(BufReader::new(page_read), page_write);

        client_sink
            .send(Envelope::new(
                Role::Client,
                Message::Settings {
                    settings: "{\"a\": 1}".to_string(),
                },
            ))
            .await
            .unwrap();

        assert_eq!(
            page_source.recv().await.unwrap(),
            Some(Envelope::new(
                Role::Client,
                Message::Settings {
                    settings: "{\"a\": 1}".to_string()
                }
            ))
        );
    }

    #[tokio::test]
    async fn test_stream_source_skips_noise() {
        let input: &[u8] = b"hello\n\n{\"source\":\"Page\",\"type\":\"Ping\"}\n";
        let (_, mut source) = StreamChannel::new(BufReader::new(input), tokio::io::sink());
        assert_eq!(
            source.recv().await.unwrap(),
            Some(Envelope::new(Role::Page, Message::Ping))
        );
        assert_eq!(source.recv().await.unwrap(), None);
    }
}
