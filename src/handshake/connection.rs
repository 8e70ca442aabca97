//! Presence handshake and typed connections.
//!
//! Both ends send a `Ping` as soon as they start, then wait for any message
//! from the other role. The first one they see is answered with one more
//! `Ping`, so a peer that started late still hears from us, and the connection
//! is ready. Neither end needs to know which one started first.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::channel::{MessageSink, MessageSource};
use super::message::{Envelope, Message, Role};
use super::{HandshakeError, HandshakeResult};
use crate::settings::UpdateExtensionSettingsArgs;

/// A connection whose peer has answered.
pub struct Connection {
    me: Role,
    sink: Box<dyn MessageSink>,
    inbound: mpsc::UnboundedReceiver<Message>,
    pump: JoinHandle<()>,
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

impl Connection {
    pub fn role(&self) -> Role {
        self.me
    }

    pub async fn send(&self, message: Message) -> HandshakeResult<()> {
        self.sink.send(Envelope::new(self.me, message)).await
    }

    /// The next message from the peer. Pings are not delivered.
    pub async fn next(&mut self) -> Option<Message> {
        self.inbound.recv().await
    }
}

/// Announce ourselves as `me` and wait until the peer is present.
pub async fn connect<S, R>(me: Role, sink: S, mut source: R) -> HandshakeResult<Connection>
where
    S: MessageSink + 'static,
    R: MessageSource + 'static,
{
    let peer = me.other();
    sink.send(Envelope::new(me, Message::Ping)).await?;

    let first = loop {
        match source.recv().await? {
            Some(envelope) if envelope.source == peer => break envelope.message,
            Some(_) => continue,
            None => return Err(HandshakeError::Closed),
        }
    };
    sink.send(Envelope::new(me, Message::Ping)).await?;
    tracing::debug!(?me, ?peer, "Handshake complete");

    let (tx, inbound) = mpsc::unbounded_channel();
    if first != Message::Ping {
        let _ = tx.send(first);
    }

    let pump = tokio::spawn(async move {
        loop {
            match source.recv().await {
                Ok(Some(envelope)) if envelope.source == peer => {
                    if envelope.message == Message::Ping {
                        continue;
                    }
                    if tx.send(envelope.message).is_err() {
                        break;
                    }
                }
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(?peer, "Connection failed: {}", e);
                    break;
                }
            }
        }
    });

    Ok(Connection {
        me,
        sink: Box::new(sink),
        inbound,
        pump,
    })
}

/// A request from the page.
#[derive(Debug, Clone, PartialEq)]
pub enum PageRequest {
    EditSettings(UpdateExtensionSettingsArgs),
    GetSettings,
}

/// The client's view of the page.
pub struct PageConnection {
    connection: Connection,
}

impl PageConnection {
    /// Tell the page about the latest settings.
    pub async fn send_settings(&self, settings: impl Into<String>) -> HandshakeResult<()> {
        self.connection
            .send(Message::Settings {
                settings: settings.into(),
            })
            .await
    }

    /// The next request from the page, or `None` once it's gone.
    pub async fn next_request(&mut self) -> Option<PageRequest> {
        loop {
            match self.connection.next().await? {
                Message::EditSettings { edit } => return Some(PageRequest::EditSettings(edit)),
                Message::GetSettings => return Some(PageRequest::GetSettings),
                other => tracing::warn!(message = ?other, "Ignoring unexpected message from page"),
            }
        }
    }
}

/// The page's view of the client.
pub struct ClientConnection {
    connection: Connection,
}

impl ClientConnection {
    /// Ask the client to change a setting.
    pub async fn edit_settings(&self, edit: UpdateExtensionSettingsArgs) -> HandshakeResult<()> {
        self.connection.send(Message::EditSettings { edit }).await
    }

    /// Ask the client for its settings. The answer arrives via [`Self::next_settings`].
    pub async fn get_settings(&self) -> HandshakeResult<()> {
        self.connection.send(Message::GetSettings).await
    }

    /// The next settings text from the client, or `None` once it's gone.
    pub async fn next_settings(&mut self) -> Option<String> {
        loop {
            match self.connection.next().await? {
                Message::Settings { settings } => return Some(settings),
                other => tracing::warn!(message = ?other, "Ignoring unexpected message from client"),
            }
        }
    }
}

/// Connect to the page. Called by the client.
pub async fn connect_to_page<S, R>(sink: S, source: R) -> HandshakeResult<PageConnection>
where
    S: MessageSink + 'static,
    R: MessageSource + 'static,
{
    Ok(PageConnection {
        connection: connect(Role::Client, sink, source).await?,
    })
}

/// Connect to the client. Called by the page.
pub async fn connect_to_client<S, R>(sink: S, source: R) -> HandshakeResult<ClientConnection>
where
    S: MessageSink + 'static,
    R: MessageSource + 'static,
{
    Ok(ClientConnection {
        connection: connect(Role::Page, sink, source).await?,
    })
}
