use std::collections::HashMap;
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use eventsource_stream::{Event, Eventsource};
use futures_util::{Stream, StreamExt};
use reqwest::header::ACCEPT;
use reqwest::{Client, Url};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::error::McpError;
use super::jsonrpc::{IncomingMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

/// Waiters keyed by request id. `None` once the event stream has ended.
type Pending = Arc<Mutex<Option<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>>;

/// HTTP+SSE transport for remote MCP servers.
///
/// Protocol:
/// 1. GET `{url}` establishes the SSE stream; the first `endpoint` event carries
///    the URL (usually relative) that requests must be POSTed to.
/// 2. POST `{endpoint}` with a JSON-RPC body; the server answers `202 Accepted`
///    and pushes the response as a `message` event on the SSE stream.
///
/// A background task owns the stream and hands each response to the request
/// waiting on its id.
pub struct SseTransport {
    client: Client,
    message_url: Url,
    pending: Pending,
    id_counter: AtomicU64,
    timeout: Duration,
    reader: JoinHandle<()>,
}

impl SseTransport {
    pub async fn connect(sse_url: &str, timeout: Duration) -> Result<Self, McpError> {
        let base = Url::parse(sse_url).map_err(|e| McpError::InvalidUrl {
            url: sse_url.to_string(),
            reason: e.to_string(),
        })?;
        let client = Client::new();

        debug!("MCP SSE → GET {}", base);
        let response = tokio::time::timeout(
            timeout,
            client
                .get(base.clone())
                .header(ACCEPT, "text/event-stream")
                .send(),
        )
        .await
        .map_err(|_| McpError::Timeout {
            method: "sse".into(),
            timeout,
        })??
        .error_for_status()?;
        let mut events = Box::pin(response.bytes_stream().eventsource());

        let announced = tokio::time::timeout(timeout, async {
            while let Some(item) = events.next().await {
                let event = item.map_err(|e| McpError::Protocol {
                    method: "sse".into(),
                    reason: e.to_string(),
                })?;
                if event.event == "endpoint" {
                    return resolve_endpoint(&base, &event.data);
                }
                debug!("MCP SSE ← '{}' event before endpoint, skipping", event.event);
            }
            Err(McpError::MissingEndpoint)
        })
        .await
        .map_err(|_| McpError::Timeout {
            method: "endpoint".into(),
            timeout,
        })?;
        let message_url = announced?;
        debug!("MCP SSE message endpoint: {}", message_url);

        let pending: Pending = Arc::new(Mutex::new(Some(HashMap::new())));
        let reader = tokio::spawn(read_events(events, Arc::clone(&pending)));

        Ok(Self {
            client,
            message_url,
            pending,
            id_counter: AtomicU64::new(1),
            timeout,
            reader,
        })
    }

    pub fn message_url(&self) -> &Url {
        &self.message_url
    }

    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let id = self.id_counter.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        match self.pending.lock().await.as_mut() {
            Some(waiters) => {
                waiters.insert(id, tx);
            }
            None => return Err(McpError::ConnectionClosed { id }),
        }

        let req = JsonRpcRequest::new(id, method, params);
        debug!("MCP SSE → POST {} {}", self.message_url, method);
        if let Err(e) = self.post(&req).await {
            self.forget(id).await;
            return Err(e);
        }

        let resp = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(_)) => return Err(McpError::ConnectionClosed { id }),
            Err(_) => {
                self.forget(id).await;
                return Err(McpError::Timeout {
                    method: method.to_string(),
                    timeout: self.timeout,
                });
            }
        };

        if let Some(err) = resp.error {
            return Err(McpError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        Ok(resp.result.unwrap_or(Value::Null))
    }

    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let notif = JsonRpcNotification::new(method, params);
        debug!("MCP SSE notify → {}", method);
        self.post(&notif).await
    }

    async fn post<T: Serialize>(&self, body: &T) -> Result<(), McpError> {
        self.client
            .post(self.message_url.clone())
            .json(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn forget(&self, id: u64) {
        if let Some(waiters) = self.pending.lock().await.as_mut() {
            waiters.remove(&id);
        }
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

fn resolve_endpoint(base: &Url, data: &str) -> Result<Url, McpError> {
    let target = data.trim();
    base.join(target).map_err(|e| McpError::InvalidUrl {
        url: target.to_string(),
        reason: e.to_string(),
    })
}

async fn read_events<S, E>(mut events: S, pending: Pending)
where
    S: Stream<Item = Result<Event, E>> + Unpin,
    E: Display,
{
    while let Some(item) = events.next().await {
        let event = match item {
            Ok(event) => event,
            Err(e) => {
                warn!("MCP SSE stream error: {}", e);
                break;
            }
        };
        if !event.event.is_empty() && event.event != "message" {
            debug!("MCP SSE ← ignoring '{}' event", event.event);
            continue;
        }
        debug!("MCP SSE ← {}", event.data);

        match IncomingMessage::parse(&event.data) {
            Some(IncomingMessage::Response(resp)) => {
                let Some(id) = resp.id else { continue };
                let waiter = pending
                    .lock()
                    .await
                    .as_mut()
                    .and_then(|waiters| waiters.remove(&id));
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(resp);
                    }
                    None => debug!("MCP SSE ← response for unknown id={}", id),
                }
            }
            Some(IncomingMessage::ServerMessage { method }) => {
                debug!("MCP SSE ← server message '{}' ignored", method);
            }
            None => {}
        }
    }

    // Dropping the senders wakes every waiter with ConnectionClosed.
    pending.lock().await.take();
    debug!("MCP SSE stream closed");
}
