use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::config::{HeaderConfig, McpConfig};
use crate::error::{McpError, Result};
use crate::protocol::client::McpTransport;

const SESSION_HEADER: &str = "mcp-session-id";

/// Streamable HTTP transport: every message is a POST, and the reply comes
/// back either as a JSON body or as a short SSE stream on the same response.
pub struct HttpTransport {
    config: McpConfig,
    client: Client,
    headers: HeaderMap,
    connected: AtomicBool,
    session_id: Mutex<Option<String>>,
    message_tx: mpsc::Sender<String>,
    message_rx: Mutex<mpsc::Receiver<String>>,
}

impl HttpTransport {
    pub fn new(config: McpConfig) -> Result<Self> {
        let headers = build_headers(&config.headers)?;
        let (message_tx, message_rx) = mpsc::channel(100);
        Ok(Self {
            config,
            client: Client::new(),
            headers,
            connected: AtomicBool::new(false),
            session_id: Mutex::new(None),
            message_tx,
            message_rx: Mutex::new(message_rx),
        })
    }

    async fn forward(&self, data: String) -> Result<()> {
        if data.trim().is_empty() {
            return Ok(());
        }
        self.message_tx
            .send(data)
            .await
            .map_err(|_| McpError::Disconnected)
    }
}

fn build_headers(extra: &[HeaderConfig]) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("application/json, text/event-stream"),
    );
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    for HeaderConfig { name, value } in extra {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| McpError::InvalidConfig(format!("Invalid header name: {}", e)))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|e| McpError::InvalidConfig(format!("Invalid header value: {}", e)))?;
        headers.insert(header_name, header_value);
    }

    Ok(headers)
}

#[async_trait]
impl McpTransport for HttpTransport {
    async fn connect(&mut self) -> Result<()> {
        info!("Using MCP streamable HTTP endpoint: {}", self.config.url);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        info!("Disconnecting MCP HTTP transport");
        self.connected.store(false, Ordering::SeqCst);
        *self.session_id.lock().await = None;
        Ok(())
    }

    async fn send(&self, message: String) -> Result<()> {
        if !self.is_connected() {
            return Err(McpError::Disconnected);
        }

        let mut request = self
            .client
            .post(&self.config.url)
            .headers(self.headers.clone())
            .body(message);
        if let Some(session) = self.session_id.lock().await.clone() {
            request = request.header(SESSION_HEADER, session);
        }

        let response = request.send().await?;
        let status = response.status();

        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.lock().await = Some(session.to_string());
        }

        if status == StatusCode::ACCEPTED {
            return Ok(());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(McpError::Transport(format!(
                "POST failed: {} - {}",
                status, body
            )));
        }

        let is_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.starts_with("text/event-stream"))
            .unwrap_or(false);

        if is_stream {
            let mut stream = response.bytes_stream().eventsource();
            while let Some(event) = stream.next().await {
                match event {
                    Ok(event) if event.event == "message" || event.event.is_empty() => {
                        self.forward(event.data).await?;
                    }
                    Ok(event) => debug!("Skipping SSE event: {}", event.event),
                    Err(e) => {
                        warn!("SSE stream error: {}", e);
                        break;
                    }
                }
            }
        } else {
            let body = response.text().await?;
            self.forward(body).await?;
        }

        Ok(())
    }

    async fn receive(&self) -> Result<Option<String>> {
        if !self.is_connected() {
            return Err(McpError::Disconnected);
        }

        let mut rx = self.message_rx.lock().await;
        match tokio::time::timeout(Duration::from_millis(100), rx.recv()).await {
            Ok(Some(message)) => Ok(Some(message)),
            Ok(None) => {
                warn!("HTTP message channel closed");
                Err(McpError::Disconnected)
            }
            Err(_) => Ok(None),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
