//! JSON-RPC session with a running extension.
//!
//! The client sends `initialize`, waits for the answer, then confirms with
//! `initialized`. Afterwards the extension may log and show messages and ask
//! for configuration changes, either directly or through the
//! `updateConfiguration` client command. Anything else it requests is refused.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::error::InitializationError;
use super::transport::{Transport, TransportEvent};
use crate::settings::{ConfigurationUpdateParams, EditError};

pub const METHOD_INITIALIZE: &str = "initialize";
pub const METHOD_INITIALIZED: &str = "initialized";
pub const METHOD_SHUTDOWN: &str = "shutdown";
pub const METHOD_EXIT: &str = "exit";
pub const METHOD_LOG_MESSAGE: &str = "window/logMessage";
pub const METHOD_SHOW_MESSAGE: &str = "window/showMessage";
pub const METHOD_SHOW_MESSAGE_REQUEST: &str = "window/showMessageRequest";
pub const METHOD_CONFIGURATION_UPDATE: &str = "configuration/update";
pub const METHOD_EXECUTE_COMMAND: &str = "workspace/executeCommand";
pub const COMMAND_UPDATE_CONFIGURATION: &str = "updateConfiguration";

const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;

/// Error member of a JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: i64,
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A decoded JSON-RPC frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Request {
        id: Value,
        method: String,
        params: Value,
    },
    Notification {
        method: String,
        params: Value,
    },
    Response {
        id: Value,
        result: Result<Value, ResponseError>,
    },
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(default)]
    id: Option<Value>,

    #[serde(default)]
    method: Option<String>,

    #[serde(default)]
    params: Option<Value>,

    #[serde(default)]
    result: Option<Value>,

    #[serde(default)]
    error: Option<ResponseError>,
}

impl Frame {
    pub fn parse(text: &str) -> Result<Self, String> {
        let raw: RawFrame =
            serde_json::from_str(text).map_err(|e| format!("Malformed message: {}", e))?;

        match (raw.method, raw.id) {
            (Some(method), Some(id)) => Ok(Frame::Request {
                id,
                method,
                params: raw.params.unwrap_or(Value::Null),
            }),
            (Some(method), None) => Ok(Frame::Notification {
                method,
                params: raw.params.unwrap_or(Value::Null),
            }),
            (None, Some(id)) => Ok(Frame::Response {
                id,
                result: match raw.error {
                    Some(error) => Err(error),
                    None => Ok(raw.result.unwrap_or(Value::Null)),
                },
            }),
            (None, None) => Err("Message is neither a request nor a response".to_string()),
        }
    }

    pub fn request(id: u64, method: &str, params: Value) -> String {
        json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}).to_string()
    }

    pub fn notification(method: &str, params: Value) -> String {
        json!({"jsonrpc": "2.0", "method": method, "params": params}).to_string()
    }

    pub fn response(id: &Value, result: Result<Value, ResponseError>) -> String {
        match result {
            Ok(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
            Err(error) => json!({"jsonrpc": "2.0", "id": id, "error": error}),
        }
        .to_string()
    }
}

/// Parameters of the `initialize` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub root: Option<String>,
    pub initialization_options: Option<Map<String, Value>>,
}

/// Parameters of `window/logMessage`.
#[derive(Debug, Deserialize)]
struct LogMessageParams {
    #[serde(rename = "type", default)]
    kind: Option<u8>,
    message: String,
}

/// Parameters of `window/showMessage` and `window/showMessageRequest`.
#[derive(Debug, Deserialize)]
struct ShowMessageParams {
    #[serde(rename = "type", default)]
    kind: Option<u8>,
    message: String,

    #[serde(default)]
    actions: Vec<MessageAction>,
}

#[derive(Debug, Deserialize)]
struct MessageAction {
    title: String,
}

/// Parameters of `workspace/executeCommand`.
#[derive(Debug, Deserialize)]
struct ExecuteCommandParams {
    command: String,

    #[serde(default)]
    arguments: Vec<Value>,
}

/// Something an active session needs the client to act on.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The extension wants a setting changed.
    ConfigurationUpdate {
        id: Value,
        params: ConfigurationUpdateParams,
    },

    /// Something went wrong; the session may continue.
    RuntimeError(String),

    Closed,
}

/// One connection to one extension.
pub struct Session {
    extension_id: String,
    transport: Transport,
    next_id: u64,
}

impl Session {
    pub fn new(extension_id: impl Into<String>, transport: Transport) -> Self {
        Self {
            extension_id: extension_id.into(),
            transport,
            next_id: 1,
        }
    }

    fn send_request(&mut self, method: &str, params: Value) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.transport.send(Frame::request(id, method, params));
        id
    }

    fn send_notification(&self, method: &str, params: Value) {
        self.transport.send(Frame::notification(method, params));
    }

    /// Answer a request from the extension.
    pub fn respond(&self, id: &Value, result: Result<Value, ResponseError>) {
        self.transport.send(Frame::response(id, result));
    }

    fn reject(&self, id: &Value, code: i64, message: String) {
        self.respond(
            id,
            Err(ResponseError {
                code,
                message,
                data: None,
            }),
        );
    }

    /// Run the `initialize` handshake.
    pub async fn initialize(&mut self, params: InitializeParams) -> Result<(), InitializationError> {
        let params = serde_json::to_value(&params).unwrap_or(Value::Null);
        let id = self.send_request(METHOD_INITIALIZE, params);

        loop {
            match self.transport.recv().await {
                TransportEvent::Message(text) => match Frame::parse(&text) {
                    Ok(Frame::Response { id: rid, result }) if rid == json!(id) => {
                        return match result {
                            Ok(_) => {
                                self.send_notification(METHOD_INITIALIZED, json!({}));
                                Ok(())
                            }
                            Err(error) => Err(InitializationError::Response {
                                code: error.code,
                                retry: error
                                    .data
                                    .as_ref()
                                    .and_then(|d| d.get("retry"))
                                    .and_then(Value::as_bool)
                                    .unwrap_or(false),
                                message: error.message,
                            }),
                        };
                    }
                    Ok(frame) => {
                        // Configuration updates aren't accepted before initialization.
                        if let Some(event) = self.handle(frame) {
                            tracing::debug!(
                                extension = %self.extension_id,
                                ?event,
                                "Ignoring message received during initialization"
                            );
                        }
                    }
                    Err(e) => tracing::warn!(extension = %self.extension_id, "{}", e),
                },
                TransportEvent::Error(e) => return Err(InitializationError::Connect(e)),
                TransportEvent::Closed => return Err(InitializationError::Closed),
            }
        }
    }

    /// Wait for the next event that needs the client's attention.
    ///
    /// Log messages and unsupported requests are handled here.
    pub async fn next_event(&mut self) -> SessionEvent {
        loop {
            match self.transport.recv().await {
                TransportEvent::Message(text) => match Frame::parse(&text) {
                    Ok(frame) => {
                        if let Some(event) = self.handle(frame) {
                            return event;
                        }
                    }
                    Err(e) => return SessionEvent::RuntimeError(e),
                },
                TransportEvent::Error(e) => return SessionEvent::RuntimeError(e),
                TransportEvent::Closed => return SessionEvent::Closed,
            }
        }
    }

    fn handle(&mut self, frame: Frame) -> Option<SessionEvent> {
        match frame {
            Frame::Notification { method, params } if method == METHOD_LOG_MESSAGE => {
                match serde_json::from_value::<LogMessageParams>(params) {
                    Ok(log) => log_message(&self.extension_id, log),
                    Err(e) => tracing::debug!(extension = %self.extension_id, "Bad log message: {}", e),
                }
                None
            }
            Frame::Notification { method, params } if method == METHOD_SHOW_MESSAGE => {
                match serde_json::from_value::<ShowMessageParams>(params) {
                    Ok(shown) => show_message(&self.extension_id, &shown),
                    Err(e) => tracing::debug!(extension = %self.extension_id, "Bad message: {}", e),
                }
                None
            }
            Frame::Notification { method, .. } => {
                tracing::debug!(extension = %self.extension_id, %method, "Unhandled notification");
                None
            }
            Frame::Request { id, method, params } if method == METHOD_CONFIGURATION_UPDATE => {
                match serde_json::from_value::<ConfigurationUpdateParams>(params) {
                    Ok(params) => Some(SessionEvent::ConfigurationUpdate { id, params }),
                    Err(e) => {
                        self.reject(&id, INVALID_PARAMS, e.to_string());
                        None
                    }
                }
            }
            Frame::Request { id, method, params } if method == METHOD_SHOW_MESSAGE_REQUEST => {
                match serde_json::from_value::<ShowMessageParams>(params) {
                    Ok(shown) => {
                        show_message(&self.extension_id, &shown);
                        // No one here can pick an action.
                        self.respond(&id, Ok(Value::Null));
                    }
                    Err(e) => self.reject(&id, INVALID_PARAMS, e.to_string()),
                }
                None
            }
            Frame::Request { id, method, params } if method == METHOD_EXECUTE_COMMAND => {
                let update = serde_json::from_value::<ExecuteCommandParams>(params)
                    .map_err(|e| EditError::InvalidCommandArgs(e.to_string()))
                    .and_then(|call| {
                        if call.command == COMMAND_UPDATE_CONFIGURATION {
                            ConfigurationUpdateParams::from_command_args(&call.arguments).map(Some)
                        } else {
                            self.reject(&id, METHOD_NOT_FOUND, format!("Unknown command: {}", call.command));
                            Ok(None)
                        }
                    });
                match update {
                    Ok(Some(params)) => Some(SessionEvent::ConfigurationUpdate { id, params }),
                    Ok(None) => None,
                    Err(e) => {
                        self.reject(&id, INVALID_PARAMS, e.to_string());
                        None
                    }
                }
            }
            Frame::Request { id, method, .. } => {
                self.reject(&id, METHOD_NOT_FOUND, format!("Method not found: {}", method));
                None
            }
            Frame::Response { id, .. } => {
                tracing::debug!(extension = %self.extension_id, %id, "Unexpected response");
                None
            }
        }
    }

    /// Ask the extension to shut down and drop the transport.
    ///
    /// Best effort: the answer isn't awaited.
    pub fn shutdown(mut self) {
        self.send_request(METHOD_SHUTDOWN, Value::Null);
        self.send_notification(METHOD_EXIT, Value::Null);
    }
}

fn log_message(extension_id: &str, log: LogMessageParams) {
    // 1 = error, 2 = warning, 3 = info, 4 = log
    match log.kind {
        Some(1) => tracing::error!(extension = %extension_id, "{}", log.message),
        Some(2) => tracing::warn!(extension = %extension_id, "{}", log.message),
        _ => tracing::info!(extension = %extension_id, "{}", log.message),
    }
}

fn show_message(extension_id: &str, shown: &ShowMessageParams) {
    let actions: Vec<&str> = shown.actions.iter().map(|a| a.title.as_str()).collect();
    match shown.kind {
        Some(1) => tracing::error!(extension = %extension_id, ?actions, "From extension: {}", shown.message),
        Some(2) => tracing::warn!(extension = %extension_id, ?actions, "From extension: {}", shown.message),
        _ => tracing::info!(extension = %extension_id, ?actions, "From extension: {}", shown.message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::transport::TransportPeer;
    use crate::settings::PathSegment;
    use pretty_assertions::assert_eq;

    fn session() -> (Session, TransportPeer) {
        let (transport, peer) = Transport::in_process();
        (Session::new("acme/go", transport), peer)
    }

    fn params() -> InitializeParams {
        InitializeParams {
            root: Some("git://repo".to_string()),
            initialization_options: None,
        }
    }

    async fn next_frame(peer: &mut TransportPeer) -> Frame {
        Frame::parse(&peer.rx.recv().await.unwrap()).unwrap()
    }

    fn reply(peer: &TransportPeer, text: String) {
        peer.tx.send(TransportEvent::Message(text)).unwrap();
    }

    #[test]
    fn test_parse_frames() {
        assert!(matches!(
            Frame::parse(r#"{"jsonrpc":"2.0","id":1,"method":"m"}"#),
            Ok(Frame::Request { .. })
        ));
        assert!(matches!(
            Frame::parse(r#"{"jsonrpc":"2.0","method":"m","params":{}}"#),
            Ok(Frame::Notification { .. })
        ));
        assert_eq!(
            Frame::parse(r#"{"jsonrpc":"2.0","id":1,"error":{"code":-1,"message":"x"}}"#),
            Ok(Frame::Response {
                id: json!(1),
                result: Err(ResponseError {
                    code: -1,
                    message: "x".to_string(),
                    data: None
                })
            })
        );
        assert!(Frame::parse("{}").is_err());
        assert!(Frame::parse("nope").is_err());
    }

    #[tokio::test]
    async fn test_initialize_success() {
        let (mut session, mut peer) = session();
        let ext = tokio::spawn(async move {
            let Frame::Request { id, method, params } = next_frame(&mut peer).await else {
                panic!("expected request");
            };
            assert_eq!(method, METHOD_INITIALIZE);
            assert_eq!(params["root"], json!("git://repo"));
            reply(&peer, Frame::response(&id, Ok(json!({}))));
            next_frame(&mut peer).await
        });

        session.initialize(params()).await.unwrap();
        let confirmed = ext.await.unwrap();
        assert!(matches!(confirmed, Frame::Notification { method, .. } if method == METHOD_INITIALIZED));
    }

    #[tokio::test]
    async fn test_initialize_error_with_retry_hint() {
        let (mut session, mut peer) = session();
        tokio::spawn(async move {
            if let Frame::Request { id, .. } = next_frame(&mut peer).await {
                reply(
                    &peer,
                    Frame::response(
                        &id,
                        Err(ResponseError {
                            code: -32000,
                            message: "not ready".to_string(),
                            data: Some(json!({"retry": true})),
                        }),
                    ),
                );
            }
            // Keep the peer alive until the session is done with it.
            let _ = peer.rx.recv().await;
        });

        assert_eq!(
            session.initialize(params()).await,
            Err(InitializationError::Response {
                code: -32000,
                message: "not ready".to_string(),
                retry: true,
            })
        );
    }

    #[tokio::test]
    async fn test_initialize_closed() {
        let (mut session, peer) = session();
        drop(peer);
        assert_eq!(
            session.initialize(params()).await,
            Err(InitializationError::Closed)
        );
    }

    #[tokio::test]
    async fn test_active_events() {
        let (mut session, mut peer) = session();

        reply(&peer, Frame::notification(METHOD_LOG_MESSAGE, json!({"type": 3, "message": "hi"})));
        reply(&peer, Frame::request(7, "unknown/method", Value::Null));
        reply(
            &peer,
            Frame::request(
                8,
                METHOD_CONFIGURATION_UPDATE,
                json!({"path": ["a", 0], "value": 1}),
            ),
        );
        reply(&peer, "garbage".to_string());
        peer.tx.send(TransportEvent::Closed).unwrap();

        assert_eq!(
            session.next_event().await,
            SessionEvent::ConfigurationUpdate {
                id: json!(8),
                params: ConfigurationUpdateParams {
                    path: vec![PathSegment::Key("a".into()), PathSegment::Index(0)],
                    value: json!(1),
                },
            }
        );
        assert!(matches!(session.next_event().await, SessionEvent::RuntimeError(_)));
        assert_eq!(session.next_event().await, SessionEvent::Closed);

        let Frame::Response { id, result } = next_frame(&mut peer).await else {
            panic!("expected response");
        };
        assert_eq!(id, json!(7));
        assert_eq!(result.unwrap_err().code, METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_update_configuration_command() {
        let (mut session, mut peer) = session();

        reply(
            &peer,
            Frame::request(
                3,
                METHOD_EXECUTE_COMMAND,
                json!({"command": "updateConfiguration", "arguments": [["a"], "{\"b\": 2}", null, "json"]}),
            ),
        );
        reply(
            &peer,
            Frame::request(
                4,
                METHOD_EXECUTE_COMMAND,
                json!({"command": "updateConfiguration", "arguments": ["a"]}),
            ),
        );
        reply(
            &peer,
            Frame::request(5, METHOD_EXECUTE_COMMAND, json!({"command": "open", "arguments": []})),
        );
        peer.tx.send(TransportEvent::Closed).unwrap();

        assert_eq!(
            session.next_event().await,
            SessionEvent::ConfigurationUpdate {
                id: json!(3),
                params: ConfigurationUpdateParams {
                    path: vec![PathSegment::Key("a".into())],
                    value: json!({"b": 2}),
                },
            }
        );
        assert_eq!(session.next_event().await, SessionEvent::Closed);

        let Frame::Response { id, result } = next_frame(&mut peer).await else {
            panic!("expected response");
        };
        assert_eq!(id, json!(4));
        assert_eq!(result.unwrap_err().code, INVALID_PARAMS);

        let Frame::Response { id, result } = next_frame(&mut peer).await else {
            panic!("expected response");
        };
        assert_eq!(id, json!(5));
        assert_eq!(result.unwrap_err().code, METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_show_message_request_answers_null() {
        let (mut session, mut peer) = session();

        reply(&peer, Frame::notification(METHOD_SHOW_MESSAGE, json!({"type": 2, "message": "careful"})));
        reply(
            &peer,
            Frame::request(
                9,
                METHOD_SHOW_MESSAGE_REQUEST,
                json!({"type": 3, "message": "pick", "actions": [{"title": "yes"}]}),
            ),
        );
        peer.tx.send(TransportEvent::Closed).unwrap();

        assert_eq!(session.next_event().await, SessionEvent::Closed);
        assert_eq!(
            next_frame(&mut peer).await,
            Frame::Response {
                id: json!(9),
                result: Ok(Value::Null),
            }
        );
    }

    #[tokio::test]
    async fn test_shutdown_sends_shutdown_and_exit() {
        let (session, mut peer) = session();
        session.shutdown();
        assert!(matches!(next_frame(&mut peer).await, Frame::Request { method, .. } if method == METHOD_SHUTDOWN));
        assert!(matches!(next_frame(&mut peer).await, Frame::Notification { method, .. } if method == METHOD_EXIT));
        assert!(peer.rx.recv().await.is_none());
    }
}
