//! WebSocket transport and JSON-RPC demux.
//!
//! Exactly one UI connection is live at a time; a newer connection replaces
//! an older one. Outbound messages sent before a connection exists are
//! queued and flushed once the socket is attached.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use log::{error, info, warn};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::error::CommandError;
use super::protocol::{RpcMessage, RpcRequest};

/// Narrow seam between the transport and the orchestrator: dispatch one
/// RPC method call (either a literal command id, or the `execute_command`
/// wrapper) to a result value or a structured command error.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, method: &str, params: Value) -> Result<Value, CommandError>;
}

struct OutboundInner {
    sender: Option<mpsc::UnboundedSender<Message>>,
    queue: VecDeque<Message>,
    connected: bool,
}

/// Holds the single live connection's outbound channel, and queues messages
/// sent while no connection exists.
pub struct OutboundHub {
    inner: Mutex<OutboundInner>,
}

impl Default for OutboundHub {
    fn default() -> Self {
        Self::new()
    }
}

impl OutboundHub {
    pub fn new() -> Self {
        Self { inner: Mutex::new(OutboundInner { sender: None, queue: VecDeque::new(), connected: false }) }
    }

    /// Attach a sender as the single live connection, flushing anything
    /// queued while no connection existed. Any transport implementation
    /// (not just the WebSocket one in this module) can drive outbound
    /// delivery through this.
    pub fn attach(&self, sender: mpsc::UnboundedSender<Message>) {
        let mut inner = self.inner.lock();
        inner.sender = Some(sender.clone());
        inner.connected = true;
        while let Some(msg) = inner.queue.pop_front() {
            let _ = sender.send(msg);
        }
    }

    pub fn detach(&self) {
        let mut inner = self.inner.lock();
        inner.sender = None;
        inner.connected = false;
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock().connected
    }

    pub fn send(&self, message: &RpcMessage) {
        let Ok(text) = serde_json::to_string(message) else {
            error!("failed to serialize outbound RPC message");
            return;
        };
        let frame = Message::Text(text);
        let mut inner = self.inner.lock();
        match &inner.sender {
            Some(sender) if sender.send(frame.clone()).is_ok() => {}
            _ => inner.queue.push_back(frame),
        }
    }
}

/// Runs the accept loop for the local JSON-RPC WebSocket.
pub struct RpcServer {
    hub: Arc<OutboundHub>,
    executor: Arc<dyn CommandExecutor>,
    current: Mutex<Option<(JoinHandle<()>, JoinHandle<()>)>>,
}

impl RpcServer {
    pub fn new(hub: Arc<OutboundHub>, executor: Arc<dyn CommandExecutor>) -> Self {
        Self { hub, executor, current: Mutex::new(None) }
    }

    /// Bind and accept connections forever. Each new connection replaces
    /// whatever connection (if any) was previously live.
    pub async fn serve(&self, port: u16) -> anyhow::Result<()> {
        let listener = TcpListener::bind(("127.0.0.1", port)).await?;
        info!("JSON-RPC WebSocket listening on 127.0.0.1:{port}");

        loop {
            let (stream, peer) = listener.accept().await?;
            info!("accepted connection from {peer}");
            self.replace_connection(stream).await;
        }
    }

    async fn replace_connection(&self, stream: tokio::net::TcpStream) {
        let ws = match tokio_tungstenite::accept_async(stream).await {
            Ok(ws) => ws,
            Err(err) => {
                warn!("WebSocket handshake failed: {err}");
                return;
            }
        };

        if let Some((read_task, write_task)) = self.current.lock().take() {
            read_task.abort();
            write_task.abort();
            self.hub.detach();
        }

        let (mut sink, mut stream) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        self.hub.attach(tx);

        let write_task = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if sink.send(message).await.is_err() {
                    break;
                }
            }
        });

        let hub = self.hub.clone();
        let executor = self.executor.clone();
        let read_task = tokio::spawn(async move {
            while let Some(Ok(message)) = stream.next().await {
                if let Message::Text(text) = message {
                    handle_inbound(&hub, &executor, &text).await;
                }
            }
            hub.detach();
        });

        *self.current.lock() = Some((read_task, write_task));
    }
}

async fn handle_inbound(hub: &OutboundHub, executor: &Arc<dyn CommandExecutor>, text: &str) {
    let request: RpcRequest = match serde_json::from_str(text) {
        Ok(request) => request,
        Err(err) => {
            warn!("malformed JSON-RPC request: {err}");
            return;
        }
    };

    let is_notification = request.is_notification();
    let id = request.id.clone().unwrap_or(Value::Null);
    let (method, params) = resolve_method_and_params(&request);

    let result = executor.execute(&method, params).await;
    if is_notification {
        return;
    }

    let message = match result {
        Ok(value) => RpcMessage::success(id, value),
        Err(err) => RpcMessage::failure(id, err.rpc_code(), err.to_string(), err.rpc_data()),
    };
    hub.send(&message);
}

/// `execute_command` is unwrapped to its named command; any other method
/// name is treated as the command id directly.
fn resolve_method_and_params(request: &RpcRequest) -> (String, Value) {
    let params = request.params_object();
    if request.method == "execute_command" {
        let command = params.get("command").and_then(Value::as_str).unwrap_or_default().to_string();
        let args = params.get("args").cloned().unwrap_or(Value::Object(Default::default()));
        (command, args)
    } else {
        (request.method.clone(), params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoExecutor;

    #[async_trait]
    impl CommandExecutor for EchoExecutor {
        async fn execute(&self, method: &str, params: Value) -> Result<Value, CommandError> {
            Ok(serde_json::json!({ "method": method, "params": params }))
        }
    }

    #[test]
    fn execute_command_is_unwrapped_to_its_named_command() {
        let request = RpcRequest {
            jsonrpc: Some("2.0".into()),
            method: "execute_command".into(),
            params: Some(serde_json::json!({ "command": "chat.send", "args": { "message": "hi" } })),
            id: Some(serde_json::json!("1")),
        };
        let (method, params) = resolve_method_and_params(&request);
        assert_eq!(method, "chat.send");
        assert_eq!(params, serde_json::json!({ "message": "hi" }));
    }

    #[test]
    fn direct_method_name_is_used_as_the_command_id() {
        let request = RpcRequest {
            jsonrpc: Some("2.0".into()),
            method: "system.info".into(),
            params: None,
            id: Some(serde_json::json!(1)),
        };
        let (method, params) = resolve_method_and_params(&request);
        assert_eq!(method, "system.info");
        assert_eq!(params, serde_json::json!({}));
    }

    #[tokio::test]
    async fn outbound_messages_queue_until_a_connection_attaches() {
        let hub = OutboundHub::new();
        assert!(!hub.is_connected());
        hub.send(&RpcMessage::trigger_event("NOTIFY", "window", Value::Null, 0.0));

        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.attach(tx);
        assert!(hub.is_connected());
        let queued = rx.recv().await;
        assert!(queued.is_some());
    }

    #[tokio::test]
    async fn executor_is_invoked_for_a_request_with_an_id() {
        let executor: Arc<dyn CommandExecutor> = Arc::new(EchoExecutor);
        let result = executor.execute("system.info", Value::Null).await.unwrap();
        assert_eq!(result["method"], "system.info");
    }
}
