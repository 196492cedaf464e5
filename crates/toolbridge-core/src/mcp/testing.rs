//! In-process MCP endpoint speaking the HTTP+SSE transport, for tests.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Bytes, Frame, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;

type Body = UnsyncBoxBody<Bytes, Infallible>;

#[derive(Default)]
struct State {
    stream: Option<mpsc::UnboundedSender<Bytes>>,
    methods: Vec<String>,
    client_info: Option<Value>,
}

pub(crate) struct MockSseServer {
    addr: SocketAddr,
    state: Arc<Mutex<State>>,
}

impl MockSseServer {
    pub(crate) async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(State::default()));
        let shared = Arc::clone(&state);

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = Arc::clone(&shared);
                tokio::spawn(async move {
                    let svc = service_fn(move |req| handle(req, Arc::clone(&state)));
                    http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), svc)
                        .await
                        .ok();
                });
            }
        });

        Self { addr, state }
    }

    pub(crate) fn sse_url(&self) -> String {
        format!("http://{}/sse", self.addr)
    }

    /// JSON-RPC methods received so far, in arrival order.
    pub(crate) async fn methods(&self) -> Vec<String> {
        self.state.lock().await.methods.clone()
    }

    pub(crate) async fn client_info(&self) -> Option<Value> {
        self.state.lock().await.client_info.clone()
    }

    /// Ends the SSE stream; later requests get no response.
    pub(crate) async fn close_stream(&self) {
        self.state.lock().await.stream.take();
    }
}

fn sse_event(event: &str, data: &str) -> Bytes {
    Bytes::from(format!("event: {event}\ndata: {data}\n\n"))
}

fn text(status: StatusCode, body: &'static str) -> Response<Body> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::from(body)).boxed_unsync())
        .unwrap()
}

async fn handle(
    req: Request<Incoming>,
    state: Arc<Mutex<State>>,
) -> Result<Response<Body>, Infallible> {
    let path = req.uri().path().to_string();
    match (req.method().clone(), path.as_str()) {
        (Method::GET, "/sse") => {
            let (tx, rx) = mpsc::unbounded_channel();
            tx.send(sse_event("endpoint", "/messages?sessionId=test"))
                .unwrap();
            state.lock().await.stream = Some(tx);

            let frames =
                UnboundedReceiverStream::new(rx).map(|b| Ok::<_, Infallible>(Frame::data(b)));
            Ok(Response::builder()
                .header("content-type", "text/event-stream")
                .body(StreamBody::new(frames).boxed_unsync())
                .unwrap())
        }
        (Method::POST, "/messages") => {
            let bytes = req
                .into_body()
                .collect()
                .await
                .map(|b| b.to_bytes())
                .unwrap_or_default();
            let msg: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
            let method = msg["method"].as_str().unwrap_or_default().to_string();

            let mut st = state.lock().await;
            st.methods.push(method.clone());
            if method == "initialize" {
                st.client_info = Some(msg["params"]["clientInfo"].clone());
            }
            if let Some(id) = msg.get("id").filter(|id| !id.is_null()) {
                let reply = respond(id.clone(), &method, &msg["params"]);
                if let Some(tx) = &st.stream {
                    let _ = tx.send(sse_event("message", &reply.to_string()));
                }
            }
            Ok(text(StatusCode::ACCEPTED, "Accepted"))
        }
        _ => Ok(text(StatusCode::NOT_FOUND, "not found")),
    }
}

fn respond(id: Value, method: &str, params: &Value) -> Value {
    let result = match method {
        "initialize" => json!({
            "protocolVersion": "2024-11-05",
            "capabilities": { "tools": {}, "resources": {}, "prompts": {} },
            "serverInfo": { "name": "mock-endpoint", "version": "0.0.1" }
        }),
        "tools/list" => json!({
            "tools": [
                {
                    "name": "echo",
                    "description": "Echo the given text",
                    "inputSchema": {
                        "type": "object",
                        "properties": { "text": { "type": "string" } },
                        "required": ["text"]
                    }
                },
                {
                    "name": "fail",
                    "description": "Always reports an error",
                    "inputSchema": { "type": "object", "properties": {} }
                }
            ]
        }),
        "resources/list" => json!({
            "resources": [
                { "uri": "memo://readme", "name": "readme", "mimeType": "text/plain" }
            ]
        }),
        "prompts/list" => json!({
            "prompts": [
                {
                    "name": "summarize",
                    "description": "Summarize a topic",
                    "arguments": [{ "name": "topic", "required": true }]
                }
            ]
        }),
        "tools/call" => match params["name"].as_str() {
            Some("echo") => json!({
                "content": [{ "type": "text", "text": params["arguments"]["text"] }]
            }),
            Some("fail") => json!({
                "content": [{ "type": "text", "text": "tool failed" }],
                "isError": true
            }),
            other => {
                return json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": { "code": -32602, "message": format!("Unknown tool: {}", other.unwrap_or("")) }
                })
            }
        },
        _ => {
            return json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": -32601, "message": "Method not found" }
            })
        }
    };
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}
