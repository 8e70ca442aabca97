//! Messages exchanged between the client and the page.

use serde::{Deserialize, Serialize};

use crate::settings::UpdateExtensionSettingsArgs;

/// One end of a client/page connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Client,
    Page,
}

impl Role {
    pub fn other(self) -> Role {
        match self {
            Role::Client => Role::Page,
            Role::Page => Role::Client,
        }
    }
}

/// A message between the client and page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// Announces presence. Sent on start and once in reply to the peer.
    Ping,

    /// Page to client: change a setting.
    EditSettings { edit: UpdateExtensionSettingsArgs },

    /// Page to client: send the latest settings.
    GetSettings,

    /// Client to page: the latest settings text.
    Settings { settings: String },
}

/// A message tagged with the role that sent it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub source: Role,

    #[serde(flatten)]
    pub message: Message,
}

impl Envelope {
    pub fn new(source: Role, message: Message) -> Self {
        Self { source, message }
    }
}
