use super::provider::{ContentBlock, LlmProvider, LlmReply, Message, Role, TokenUsage};
use crate::tools::tool::ToolDef;
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::debug;

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        max_tokens: u32,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            max_tokens,
        }
    }
}

fn build_anthropic_messages(messages: &[Message]) -> (Option<String>, Vec<Value>) {
    let mut system_parts = Vec::new();
    let mut msgs = Vec::new();

    for m in messages {
        match m.role {
            Role::System => system_parts.push(m.content.clone()),
            Role::User => msgs.push(json!({ "role": "user", "content": m.content })),
            Role::Assistant => msgs.push(json!({ "role": "assistant", "content": m.content })),
        }
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n"))
    };

    (system, msgs)
}

fn build_anthropic_tools(tools: &[ToolDef]) -> Vec<Value> {
    tools
        .iter()
        .map(|t| {
            json!({
                "name": t.name,
                "description": t.description,
                "input_schema": t.parameters
            })
        })
        .collect()
}

/// A content block still receiving deltas.
enum PartialBlock {
    Text(String),
    ToolUse {
        id: String,
        name: String,
        input_json: String,
    },
}

impl PartialBlock {
    fn finish(self) -> ContentBlock {
        match self {
            Self::Text(text) => ContentBlock::Text { text },
            Self::ToolUse {
                id,
                name,
                input_json,
            } => {
                let input = if input_json.trim().is_empty() {
                    json!({})
                } else {
                    serde_json::from_str(&input_json).unwrap_or_else(|_| json!({}))
                };
                ContentBlock::ToolUse { id, name, input }
            }
        }
    }
}

/// Folds Messages API stream events into a reply.
#[derive(Default)]
struct ReplyAccumulator {
    blocks: BTreeMap<usize, PartialBlock>,
    usage: TokenUsage,
    stop_reason: Option<String>,
}

impl ReplyAccumulator {
    fn apply(&mut self, ev: &Value) -> Result<()> {
        let idx = ev["index"].as_u64().unwrap_or(0) as usize;

        match ev["type"].as_str().unwrap_or("") {
            "message_start" => {
                self.usage.input_tokens =
                    ev["message"]["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32;
            }
            "content_block_start" => {
                let block = &ev["content_block"];
                let partial = match block["type"].as_str() {
                    Some("tool_use") => PartialBlock::ToolUse {
                        id: block["id"].as_str().unwrap_or("").to_string(),
                        name: block["name"].as_str().unwrap_or("").to_string(),
                        input_json: String::new(),
                    },
                    Some("text") => {
                        PartialBlock::Text(block["text"].as_str().unwrap_or("").to_string())
                    }
                    // thinking and other block kinds carry nothing we print
                    other => {
                        debug!("ignoring {:?} content block", other);
                        return Ok(());
                    }
                };
                self.blocks.insert(idx, partial);
            }
            "content_block_delta" => {
                let delta = &ev["delta"];
                match (self.blocks.get_mut(&idx), delta["type"].as_str()) {
                    (Some(PartialBlock::Text(text)), Some("text_delta")) => {
                        text.push_str(delta["text"].as_str().unwrap_or(""));
                    }
                    (Some(PartialBlock::ToolUse { input_json, .. }), Some("input_json_delta")) => {
                        input_json.push_str(delta["partial_json"].as_str().unwrap_or(""));
                    }
                    _ => {}
                }
            }
            "message_delta" => {
                if let Some(reason) = ev["delta"]["stop_reason"].as_str() {
                    self.stop_reason = Some(reason.to_string());
                }
                if let Some(out) = ev["usage"]["output_tokens"].as_u64() {
                    self.usage.output_tokens = out as u32;
                }
            }
            "error" => {
                bail!(
                    "completion stream error: {}",
                    ev["error"]["message"].as_str().unwrap_or("unknown error")
                );
            }
            // content_block_stop, message_stop, ping
            _ => {}
        }
        Ok(())
    }

    fn finish(self) -> LlmReply {
        LlmReply {
            blocks: self.blocks.into_values().map(PartialBlock::finish).collect(),
            usage: self.usage,
            stop_reason: self.stop_reason,
        }
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    async fn complete(&self, messages: &[Message], tools: &[ToolDef]) -> Result<LlmReply> {
        let (system, msgs) = build_anthropic_messages(messages);
        let tools_val = build_anthropic_tools(tools);

        let mut body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": msgs,
            "stream": true
        });

        if let Some(sys) = system {
            body["system"] = json!(sys);
        }
        if !tools_val.is_empty() {
            body["tools"] = json!(tools_val);
        }

        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        debug!("completion request: {} messages, {} tools", msgs_len(&body), tools.len());
        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("completion request failed ({}): {}", status, text);
        }

        let mut events = Box::pin(resp.bytes_stream().eventsource());
        let mut acc = ReplyAccumulator::default();
        while let Some(item) = events.next().await {
            let event = item.map_err(|e| anyhow!("completion stream broke: {e}"))?;
            let ev: Value = match serde_json::from_str(&event.data) {
                Ok(v) => v,
                Err(_) => continue,
            };
            acc.apply(&ev)?;
        }

        let reply = acc.finish();
        debug!(
            "completion reply: {} block(s), stop_reason={:?}, usage={:?}",
            reply.blocks.len(),
            reply.stop_reason,
            reply.usage
        );
        Ok(reply)
    }
}

fn msgs_len(body: &Value) -> usize {
    body["messages"].as_array().map_or(0, Vec::len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::{BodyExt, Full};
    use hyper::body::Bytes;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use std::convert::Infallible;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    /// Serves one request, answers with `status` and `body`, and forwards the
    /// request headers and JSON body to the returned receiver.
    async fn serve_once(
        status: StatusCode,
        body: &'static str,
    ) -> (SocketAddr, mpsc::UnboundedReceiver<(hyper::HeaderMap, Value)>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let handler = move |req: Request<hyper::body::Incoming>| {
                let tx = tx.clone();
                async move {
                    let headers = req.headers().clone();
                    let bytes = req.into_body().collect().await.unwrap().to_bytes();
                    let json: Value = serde_json::from_slice(&bytes).unwrap();
                    tx.send((headers, json)).unwrap();
                    let mut resp = Response::new(Full::new(Bytes::from(body)));
                    *resp.status_mut() = status;
                    resp.headers_mut()
                        .insert("content-type", "text/event-stream".parse().unwrap());
                    Ok::<_, Infallible>(resp)
                }
            };
            http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service_fn(handler))
                .await
                .ok();
        });

        (addr, rx)
    }

    const TOOL_USE_STREAM: &str = "event: message_start\n\
data: {\"type\":\"message_start\",\"message\":{\"usage\":{\"input_tokens\":42,\"output_tokens\":1}}}\n\n\
event: content_block_start\n\
data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n\
event: content_block_delta\n\
data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Let me \"}}\n\n\
event: content_block_delta\n\
data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"look.\"}}\n\n\
event: content_block_stop\n\
data: {\"type\":\"content_block_stop\",\"index\":0}\n\n\
event: content_block_start\n\
data: {\"type\":\"content_block_start\",\"index\":1,\"content_block\":{\"type\":\"tool_use\",\"id\":\"toolu_01\",\"name\":\"notes__search\",\"input\":{}}}\n\n\
event: content_block_delta\n\
data: {\"type\":\"content_block_delta\",\"index\":1,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"{\\\"q\\\": \"}}\n\n\
event: content_block_delta\n\
data: {\"type\":\"content_block_delta\",\"index\":1,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"\\\"rust\\\"}\"}}\n\n\
event: content_block_stop\n\
data: {\"type\":\"content_block_stop\",\"index\":1}\n\n\
event: ping\n\
data: {\"type\":\"ping\"}\n\n\
event: message_delta\n\
data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"tool_use\"},\"usage\":{\"output_tokens\":17}}\n\n\
event: message_stop\n\
data: {\"type\":\"message_stop\"}\n\n";

    fn provider(addr: SocketAddr) -> AnthropicProvider {
        AnthropicProvider::new(format!("http://{addr}"), "sk-test", "claude-test", 512)
    }

    #[tokio::test]
    async fn parses_text_and_tool_use_blocks() {
        let (addr, mut rx) = serve_once(StatusCode::OK, TOOL_USE_STREAM).await;
        let tools = vec![ToolDef {
            name: "notes__search".into(),
            description: "Search notes".into(),
            parameters: json!({ "type": "object" }),
        }];
        let messages = vec![Message::system("be brief"), Message::user("find rust notes")];

        let reply = provider(addr).complete(&messages, &tools).await.unwrap();

        assert_eq!(reply.text(), "Let me look.");
        let uses: Vec<_> = reply.tool_uses().collect();
        assert_eq!(uses, vec![("toolu_01", "notes__search", &json!({ "q": "rust" }))]);
        assert_eq!(reply.stop_reason.as_deref(), Some("tool_use"));
        assert_eq!(reply.usage, TokenUsage { input_tokens: 42, output_tokens: 17 });

        let (headers, body) = rx.recv().await.unwrap();
        assert_eq!(headers["x-api-key"], "sk-test");
        assert_eq!(headers["anthropic-version"], ANTHROPIC_VERSION);
        assert_eq!(body["model"], "claude-test");
        assert_eq!(body["max_tokens"], 512);
        assert_eq!(body["system"], "be brief");
        assert_eq!(body["messages"], json!([{ "role": "user", "content": "find rust notes" }]));
        assert_eq!(body["tools"][0]["input_schema"], json!({ "type": "object" }));
        assert_eq!(body["stream"], true);
    }

    #[tokio::test]
    async fn omits_tools_when_catalog_is_empty() {
        let (addr, mut rx) = serve_once(StatusCode::OK, TOOL_USE_STREAM).await;
        provider(addr)
            .complete(&[Message::user("hi")], &[])
            .await
            .unwrap();
        let (_, body) = rx.recv().await.unwrap();
        assert!(body.get("tools").is_none());
        assert!(body.get("system").is_none());
    }

    #[tokio::test]
    async fn http_errors_carry_the_response_body() {
        let (addr, _rx) = serve_once(
            StatusCode::UNAUTHORIZED,
            r#"{"type":"error","error":{"type":"authentication_error","message":"invalid x-api-key"}}"#,
        )
        .await;
        let err = provider(addr)
            .complete(&[Message::user("hi")], &[])
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("401"));
        assert!(msg.contains("invalid x-api-key"));
    }

    #[tokio::test]
    async fn stream_error_event_fails_the_call() {
        let (addr, _rx) = serve_once(
            StatusCode::OK,
            "event: error\ndata: {\"type\":\"error\",\"error\":{\"type\":\"overloaded_error\",\"message\":\"Overloaded\"}}\n\n",
        )
        .await;
        let err = provider(addr)
            .complete(&[Message::user("hi")], &[])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Overloaded"));
    }

    #[tokio::test]
    async fn non_text_blocks_are_left_out_of_the_reply() {
        let (addr, _rx) = serve_once(
            StatusCode::OK,
            "event: content_block_start\n\
data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"thinking\",\"thinking\":\"\"}}\n\n\
event: content_block_delta\n\
data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"thinking_delta\",\"thinking\":\"hmm\"}}\n\n\
event: content_block_start\n\
data: {\"type\":\"content_block_start\",\"index\":1,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n\
event: content_block_delta\n\
data: {\"type\":\"content_block_delta\",\"index\":1,\"delta\":{\"type\":\"text_delta\",\"text\":\"Answer.\"}}\n\n",
        )
        .await;
        let reply = provider(addr)
            .complete(&[Message::user("hi")], &[])
            .await
            .unwrap();
        assert_eq!(reply.blocks.len(), 1);
        assert_eq!(reply.text(), "Answer.");
    }

    #[test]
    fn malformed_tool_input_falls_back_to_empty_object() {
        let block = PartialBlock::ToolUse {
            id: "t".into(),
            name: "a__b".into(),
            input_json: "{\"q\": ".into(),
        };
        assert!(matches!(block.finish(), ContentBlock::ToolUse { input, .. } if input == json!({})));
    }
}
