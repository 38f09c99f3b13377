use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::McpConfig;
use crate::error::{McpError, Result};
use crate::protocol::models::*;
use crate::transports::HttpTransport;

/// Transport trait for MCP communication
#[async_trait]
pub trait McpTransport: Send + Sync {
    async fn connect(&mut self) -> Result<()>;
    async fn disconnect(&mut self) -> Result<()>;
    async fn send(&self, message: String) -> Result<()>;
    async fn receive(&self) -> Result<Option<String>>;
    fn is_connected(&self) -> bool;
}

/// Pending request waiting for response
struct PendingRequest {
    sender: oneshot::Sender<JsonRpcResponse>,
}

type PendingMap = Arc<RwLock<HashMap<u64, PendingRequest>>>;

/// MCP protocol client
pub struct McpProtocolClient {
    transport: Arc<RwLock<Box<dyn McpTransport>>>,
    next_id: AtomicU64,
    pending_requests: PendingMap,
    message_handler: Option<tokio::task::JoinHandle<()>>,
}

impl McpProtocolClient {
    pub fn new(transport: Box<dyn McpTransport>) -> Self {
        Self {
            transport: Arc::new(RwLock::new(transport)),
            next_id: AtomicU64::new(1),
            pending_requests: Arc::new(RwLock::new(HashMap::new())),
            message_handler: None,
        }
    }

    /// Connect over streamable HTTP and complete the initialize handshake.
    pub async fn connect_http(config: &McpConfig) -> Result<Self> {
        let transport = HttpTransport::new(config.clone())?;
        let mut client = Self::new(Box::new(transport));
        client.connect().await?;
        let init = client.initialize(config.request_timeout_ms).await?;
        info!(
            "Connected to MCP server {} {} at {}",
            init.server_info.name, init.server_info.version, config.url
        );
        Ok(client)
    }

    pub async fn connect(&mut self) -> Result<()> {
        let mut transport = self.transport.write().await;
        transport.connect().await?;
        drop(transport);

        self.start_message_handler();
        Ok(())
    }

    pub async fn disconnect(&mut self) -> Result<()> {
        if let Some(handler) = self.message_handler.take() {
            handler.abort();
        }

        let mut transport = self.transport.write().await;
        transport.disconnect().await
    }

    fn start_message_handler(&mut self) {
        let transport = self.transport.clone();
        let pending_requests = self.pending_requests.clone();

        let handler = tokio::spawn(async move {
            loop {
                let received = {
                    let transport = transport.read().await;
                    if !transport.is_connected() {
                        break;
                    }
                    transport.receive().await
                };

                match received {
                    Ok(Some(message)) => {
                        debug!("Received message: {}", message);
                        if let Err(e) = Self::handle_message(&message, &pending_requests).await {
                            warn!("Failed to handle message: {}", e);
                        }
                    }
                    Ok(None) => {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                    Err(e) => {
                        error!("Transport error: {}", e);
                        break;
                    }
                }
            }
        });

        self.message_handler = Some(handler);
    }

    async fn handle_message(message: &str, pending_requests: &PendingMap) -> Result<()> {
        if let Ok(response) = serde_json::from_str::<JsonRpcResponse>(message) {
            let mut pending = pending_requests.write().await;
            if let Some(request) = pending.remove(&response.id) {
                let _ = request.sender.send(response);
            }
            return Ok(());
        }

        if let Ok(notification) = serde_json::from_str::<JsonRpcNotification>(message) {
            debug!("Ignoring server notification {}", notification.method);
            return Ok(());
        }

        Err(McpError::Protocol("Unknown message type".to_string()))
    }

    async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout_ms: u64,
    ) -> Result<JsonRpcResponse> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let request = JsonRpcRequest::new(id, method, params);
        let request_json = serde_json::to_string(&request)?;

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending_requests.write().await;
            pending.insert(id, PendingRequest { sender: tx });
        }

        let exchange = async {
            let transport = self.transport.read().await;
            transport.send(request_json).await?;
            drop(transport);
            rx.await.map_err(|_| McpError::Disconnected)
        };

        match tokio::time::timeout(Duration::from_millis(timeout_ms), exchange).await {
            Ok(Ok(response)) => {
                if let Some(error) = response.error {
                    Err(McpError::Rpc {
                        code: error.code,
                        message: error.message,
                    })
                } else {
                    Ok(response)
                }
            }
            Ok(Err(e)) => {
                self.pending_requests.write().await.remove(&id);
                Err(e)
            }
            Err(_) => {
                self.pending_requests.write().await.remove(&id);
                Err(McpError::Timeout(format!(
                    "Request {} ({}) timed out after {}ms",
                    id, method, timeout_ms
                )))
            }
        }
    }

    pub async fn initialize(&self, timeout_ms: u64) -> Result<McpInitializeResult> {
        let params = serde_json::to_value(McpInitializeRequest::default())?;

        let response = self
            .send_request("initialize", Some(params), timeout_ms)
            .await?;

        let result: McpInitializeResult = serde_json::from_value(
            response
                .result
                .ok_or_else(|| McpError::Protocol("Missing result".to_string()))?,
        )?;

        let initialized = JsonRpcNotification {
            jsonrpc: "2.0".to_string(),
            method: "notifications/initialized".to_string(),
            params: None,
        };
        let transport = self.transport.read().await;
        transport.send(serde_json::to_string(&initialized)?).await?;

        Ok(result)
    }

    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        timeout_ms: u64,
    ) -> Result<McpToolCallResult> {
        let request = McpToolCallRequest {
            name: name.to_string(),
            arguments: Some(arguments),
        };
        let params = serde_json::to_value(request)?;

        let response = self
            .send_request("tools/call", Some(params), timeout_ms)
            .await?;

        let result: McpToolCallResult = serde_json::from_value(
            response
                .result
                .ok_or_else(|| McpError::Protocol("Missing result".to_string()))?,
        )?;
        Ok(result)
    }

    pub async fn ping(&self, timeout_ms: u64) -> Result<()> {
        self.send_request("ping", None, timeout_ms).await?;
        Ok(())
    }
}

impl Drop for McpProtocolClient {
    fn drop(&mut self) {
        if let Some(handler) = self.message_handler.take() {
            handler.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicBool;
    use tokio::sync::{mpsc, Mutex};

    /// Answers every request with a canned result, echoing the request id.
    struct EchoTransport {
        connected: AtomicBool,
        tx: mpsc::Sender<String>,
        rx: Mutex<mpsc::Receiver<String>>,
        result: Value,
        silent: bool,
    }

    impl EchoTransport {
        fn new(result: Value, silent: bool) -> Self {
            let (tx, rx) = mpsc::channel(16);
            Self {
                connected: AtomicBool::new(false),
                tx,
                rx: Mutex::new(rx),
                result,
                silent,
            }
        }
    }

    #[async_trait]
    impl McpTransport for EchoTransport {
        async fn connect(&mut self) -> Result<()> {
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn disconnect(&mut self) -> Result<()> {
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn send(&self, message: String) -> Result<()> {
            let request: Value = serde_json::from_str(&message)?;
            if self.silent || request.get("id").is_none() {
                return Ok(());
            }
            let response = json!({"jsonrpc": "2.0", "id": request["id"], "result": self.result});
            self.tx
                .send(response.to_string())
                .await
                .map_err(|_| McpError::Disconnected)
        }

        async fn receive(&self) -> Result<Option<String>> {
            let mut rx = self.rx.lock().await;
            match tokio::time::timeout(Duration::from_millis(20), rx.recv()).await {
                Ok(message) => Ok(message),
                Err(_) => Ok(None),
            }
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn test_call_tool_matches_response_by_id() {
        let transport = EchoTransport::new(
            json!({"content": [{"type": "text", "text": "ok"}], "isError": false}),
            false,
        );
        let mut client = McpProtocolClient::new(Box::new(transport));
        client.connect().await.unwrap();

        let result = client
            .call_tool("execute_sql_query", json!({"query": "SELECT 1"}), 1000)
            .await
            .unwrap();
        assert_eq!(result.text(), "ok");
        assert!(client.pending_requests.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_unanswered_request_times_out() {
        let transport = EchoTransport::new(json!({}), true);
        let mut client = McpProtocolClient::new(Box::new(transport));
        client.connect().await.unwrap();

        let err = client.ping(50).await.unwrap_err();
        assert!(matches!(err, McpError::Timeout(_)));
        assert!(client.pending_requests.read().await.is_empty());
    }
}
