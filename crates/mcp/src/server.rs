// MCP server: newline-delimited JSON-RPC over stdio

use crate::protocol::{
    CallToolParams, InitializeParams, InitializeResult, JsonRpcError, JsonRpcRequest,
    JsonRpcResponse, ListChangedCapability, ListResourcesResult, ListToolsResult,
    ReadResourceParams, ReadResourceResult, ResourceContents, ResourceSchema, ServerCapabilities,
    ServerInfo, DEFAULT_PROTOCOL_VERSION,
};
use crate::tools::{CommandTool, ToolRegistry};
use anyhow::{Context, Result};
use cliwrap_core::{CliInvoker, CoreError};
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};

pub struct McpServer {
    invoker: Arc<CliInvoker>,
    registry: ToolRegistry,
}

impl McpServer {
    /// Create a server exposing every tool and resource of the invoker's config
    pub fn new(invoker: Arc<CliInvoker>) -> Self {
        let mut registry = ToolRegistry::new();
        for tool in CommandTool::from_config(&invoker) {
            registry.register(Arc::new(tool));
        }
        Self::with_registry(invoker, registry)
    }

    pub fn with_registry(invoker: Arc<CliInvoker>, registry: ToolRegistry) -> Self {
        Self { invoker, registry }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Serve on stdin/stdout until stdin closes
    pub async fn start(self: Arc<Self>) -> Result<()> {
        tracing::info!(
            "MCP server '{}' ready ({} tools, {} resources)",
            self.invoker.config().name,
            self.registry.len(),
            self.invoker.config().resources.len()
        );
        self.serve(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Serve one JSON-RPC message per line.
    ///
    /// Each request runs on its own task; responses are written as they
    /// complete, so they may be out of order. Returns once the reader is
    /// exhausted and every in-flight request has been answered.
    pub async fn serve<R, W>(self: Arc<Self>, reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let mut lines = FramedRead::new(reader, LinesCodec::new());
        let mut sink = FramedWrite::new(writer, LinesCodec::new());
        let (tx, mut rx) = mpsc::unbounded_channel::<JsonRpcResponse>();

        let writer_task = tokio::spawn(async move {
            while let Some(response) = rx.recv().await {
                let line = serde_json::to_string(&response)?;
                sink.send(line).await?;
            }
            anyhow::Ok(())
        });

        while let Some(line) = lines.next().await {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    tracing::error!("Failed to read request: {}", e);
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            let server = Arc::clone(&self);
            let tx = tx.clone();
            tokio::spawn(async move {
                if let Some(response) = server.handle_line(&line).await {
                    if tx.send(response).is_err() {
                        tracing::warn!("Response writer closed, dropping response");
                    }
                }
            });
        }

        drop(tx);
        writer_task.await.context("Response writer panicked")??;
        tracing::info!("Input closed, MCP server stopping");
        Ok(())
    }

    /// Handle a raw message line. Notifications produce no response.
    pub async fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        match serde_json::from_str::<JsonRpcRequest>(line) {
            Ok(request) => self.handle_request(request).await,
            Err(e) => {
                tracing::warn!("Unparseable message: {}", e);
                Some(JsonRpcResponse::error(Value::Null, JsonRpcError::parse_error(e)))
            }
        }
    }

    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let result = if request.jsonrpc != "2.0" {
            Err(JsonRpcError::invalid_request(format!(
                "Invalid JSON-RPC version: expected 2.0, got {}",
                request.jsonrpc
            )))
        } else {
            self.dispatch(&request.method, request.params).await
        };

        match (request.id, result) {
            (Some(id), Ok(value)) => Some(JsonRpcResponse::success(id, value)),
            (Some(id), Err(error)) => Some(JsonRpcResponse::error(id, error)),
            (None, Ok(_)) => None,
            (None, Err(error)) => {
                tracing::debug!("Notification {} failed: {}", request.method, error.message);
                None
            }
        }
    }

    async fn dispatch(&self, method: &str, params: Option<Value>) -> Result<Value, JsonRpcError> {
        tracing::debug!("Dispatching {}", method);

        match method {
            "initialize" => self.handle_initialize(params),
            "notifications/initialized" | "initialized" | "ping" => Ok(serde_json::json!({})),
            "tools/list" => to_result(&ListToolsResult {
                tools: self.registry.list_schemas(),
            }),
            "tools/call" => self.handle_call_tool(params).await,
            "resources/list" => self.handle_list_resources(),
            "resources/read" => self.handle_read_resource(params).await,
            _ => Err(JsonRpcError::method_not_found(method)),
        }
    }

    fn handle_initialize(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params: InitializeParams = match params {
            Some(params) => parse_params(Some(params))?,
            None => InitializeParams::default(),
        };

        if let Some(client) = &params.client_info {
            tracing::info!("Client connected: {} {}", client.name, client.version);
        }

        to_result(&InitializeResult {
            protocol_version: params
                .protocol_version
                .unwrap_or_else(|| DEFAULT_PROTOCOL_VERSION.to_string()),
            capabilities: ServerCapabilities {
                tools: ListChangedCapability { list_changed: false },
                resources: ListChangedCapability { list_changed: false },
            },
            server_info: ServerInfo {
                name: self.invoker.config().name.clone(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        })
    }

    async fn handle_call_tool(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params: CallToolParams = parse_params(params)?;

        let tool = self
            .registry
            .get(&params.name)
            .ok_or_else(|| lookup_error(&CoreError::ToolNotFound(params.name.clone())))?;

        let result = tool
            .execute(params.arguments.unwrap_or(Value::Null))
            .await
            .map_err(|e| match e.downcast_ref::<CoreError>() {
                Some(core) => lookup_error(core),
                None => JsonRpcError::invalid_params(format!("{:#}", e)),
            })?;

        to_result(&result)
    }

    fn handle_list_resources(&self) -> Result<Value, JsonRpcError> {
        let resources = self
            .invoker
            .config()
            .resources
            .iter()
            .map(|r| ResourceSchema {
                uri: r.uri.clone(),
                name: r.name.clone(),
                description: r.description.clone(),
                mime_type: r.mime_type.clone(),
            })
            .collect();

        to_result(&ListResourcesResult { resources })
    }

    async fn handle_read_resource(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params: ReadResourceParams = parse_params(params)?;

        let resource = self
            .invoker
            .config()
            .resource(&params.uri)
            .map_err(|e| lookup_error(&e))?;

        let text = self.invoker.fetch(resource).await;

        to_result(&ReadResourceResult {
            contents: vec![ResourceContents {
                uri: resource.uri.clone(),
                mime_type: resource.mime_type.clone(),
                text,
            }],
        })
    }
}

/// Lookup failures are the caller's fault; anything else is ours
fn lookup_error(error: &CoreError) -> JsonRpcError {
    if error.is_not_found() {
        JsonRpcError::invalid_params(error.to_string())
    } else {
        JsonRpcError::internal_error(error.to_string())
    }
}

fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, JsonRpcError> {
    let params = params.ok_or_else(|| JsonRpcError::invalid_params("Missing params"))?;
    serde_json::from_value(params)
        .map_err(|e| JsonRpcError::invalid_params(format!("Invalid params: {}", e)))
}

fn to_result<T: Serialize>(value: &T) -> Result<Value, JsonRpcError> {
    serde_json::to_value(value).map_err(|e| JsonRpcError::internal_error(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cliwrap_core::{CliConfig, ParameterConfig, ResourceConfig, ToolConfig};
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    fn server() -> McpServer {
        let mut config = CliConfig::new("echo-cli", "echo", "Echo as MCP server");

        let mut say = ToolConfig::new("say", "Echo a message", "echo {message}");
        say.parameters.insert(
            "message".to_string(),
            ParameterConfig {
                param_type: "string".to_string(),
                description: "Message to echo".to_string(),
                default: None,
                required: true,
            },
        );
        config.tools.push(say);
        config
            .tools
            .push(ToolConfig::new("warn", "Write to both streams", "echo out; echo err >&2"));
        let mut slow = ToolConfig::new("slow", "Too slow", "sleep 5");
        slow.timeout = Some(1);
        config.tools.push(slow);

        config.resources.push(ResourceConfig {
            uri: "echo://greeting".to_string(),
            name: "Greeting".to_string(),
            description: "A greeting".to_string(),
            command: "echo hi there".to_string(),
            mime_type: Some("text/plain".to_string()),
        });

        McpServer::new(Arc::new(CliInvoker::new(Arc::new(config))))
    }

    async fn call(server: &McpServer, method: &str, params: Value) -> JsonRpcResponse {
        server
            .handle_request(JsonRpcRequest::new(1, method, params))
            .await
            .unwrap()
    }

    fn tool_text(response: &JsonRpcResponse) -> String {
        response.result.as_ref().unwrap()["content"][0]["text"]
            .as_str()
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn test_initialize() {
        let response = call(
            &server(),
            "initialize",
            json!({
                "protocolVersion": "2025-03-26",
                "capabilities": {},
                "clientInfo": {"name": "test-client", "version": "1.0"}
            }),
        )
        .await;

        let result = response.result.unwrap();
        assert_eq!(result["protocolVersion"], "2025-03-26");
        assert_eq!(result["serverInfo"]["name"], "echo-cli");
        assert!(result["capabilities"]["tools"].is_object());
        assert!(result["capabilities"]["resources"].is_object());
    }

    #[tokio::test]
    async fn test_list_tools() {
        let response = call(&server(), "tools/list", json!({})).await;
        let tools = &response.result.unwrap()["tools"];

        assert_eq!(tools.as_array().unwrap().len(), 3);
        assert_eq!(tools[0]["name"], "say");
        assert_eq!(tools[0]["inputSchema"]["required"], json!(["message"]));
        assert_eq!(
            tools[0]["inputSchema"]["properties"]["message"]["type"],
            "string"
        );
    }

    #[tokio::test]
    async fn test_call_tool() {
        let response = call(
            &server(),
            "tools/call",
            json!({"name": "say", "arguments": {"message": "hello"}}),
        )
        .await;

        assert_eq!(tool_text(&response).trim(), "hello");
        assert!(response.result.unwrap().get("isError").is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_call_tool_appends_stderr() {
        let response = call(&server(), "tools/call", json!({"name": "warn"})).await;

        assert_eq!(tool_text(&response), "out\n\n\nStderr:\nerr\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_call_tool_timeout_is_error_content() {
        let response = call(&server(), "tools/call", json!({"name": "slow", "arguments": {}})).await;

        assert!(tool_text(&response).starts_with("Error: Command timed out"));
        assert_eq!(response.result.unwrap()["isError"], true);
    }

    #[tokio::test]
    async fn test_call_unknown_tool() {
        let response = call(&server(), "tools/call", json!({"name": "nope"})).await;
        let error = response.error.unwrap();

        assert_eq!(error.code, JsonRpcError::INVALID_PARAMS);
        assert!(error.message.contains("Tool not found: nope"));
    }

    #[tokio::test]
    async fn test_call_tool_missing_from_invoker_config() {
        let invoker = Arc::new(CliInvoker::new(Arc::new(CliConfig::new("empty", "true", "No tools"))));
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(CommandTool::new(
            invoker.clone(),
            ToolConfig::new("ghost", "Not in config", "echo boo"),
        )));
        let server = McpServer::with_registry(invoker, registry);

        let response = call(&server, "tools/call", json!({"name": "ghost"})).await;
        let error = response.error.unwrap();

        assert_eq!(error.code, JsonRpcError::INVALID_PARAMS);
        assert_eq!(error.message, "Tool not found: ghost");
    }

    #[tokio::test]
    async fn test_resources() {
        let server = server();

        let listed = call(&server, "resources/list", json!({})).await.result.unwrap();
        assert_eq!(
            listed["resources"][0],
            json!({
                "uri": "echo://greeting",
                "name": "Greeting",
                "description": "A greeting",
                "mimeType": "text/plain"
            })
        );

        let read = call(&server, "resources/read", json!({"uri": "echo://greeting"}))
            .await
            .result
            .unwrap();
        assert_eq!(read["contents"][0]["text"].as_str().unwrap().trim(), "hi there");
        assert_eq!(read["contents"][0]["uri"], "echo://greeting");

        let missing = call(&server, "resources/read", json!({"uri": "echo://none"})).await;
        assert_eq!(missing.error.unwrap().code, JsonRpcError::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_protocol_errors() {
        let server = server();

        let response = server.handle_line("{not json").await.unwrap();
        assert_eq!(response.error.unwrap().code, JsonRpcError::PARSE_ERROR);
        assert_eq!(response.id, Value::Null);

        let response = call(&server, "no/such/method", json!({})).await;
        assert_eq!(response.error.unwrap().code, JsonRpcError::METHOD_NOT_FOUND);

        let response = server
            .handle_line(r#"{"jsonrpc": "1.0", "id": 7, "method": "ping"}"#)
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, JsonRpcError::INVALID_REQUEST);

        let response = call(&server, "tools/call", json!({"arguments": {}})).await;
        assert_eq!(response.error.unwrap().code, JsonRpcError::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_notifications_get_no_response() {
        let response = server()
            .handle_line(r#"{"jsonrpc": "2.0", "method": "notifications/initialized"}"#)
            .await;
        assert!(response.is_none());
    }

    #[tokio::test]
    async fn test_serve_over_stream() {
        let (client, server_io) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server_io);
        let (client_read, mut client_write) = tokio::io::split(client);

        let handle = tokio::spawn(Arc::new(server()).serve(server_read, server_write));

        let input = [
            r#"{"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}"#,
            "",
            r#"{"jsonrpc": "2.0", "method": "notifications/initialized"}"#,
            r#"{"jsonrpc": "2.0", "id": 2, "method": "tools/list"}"#,
            r#"{"jsonrpc": "2.0", "id": 3, "method": "tools/call", "params": {"name": "say", "arguments": {"message": "over the wire"}}}"#,
        ]
        .join("\n");
        client_write.write_all(input.as_bytes()).await.unwrap();
        client_write.write_all(b"\n").await.unwrap();
        client_write.shutdown().await.unwrap();

        handle.await.unwrap().unwrap();

        let mut responses = Vec::new();
        let mut lines = BufReader::new(client_read).lines();
        while let Some(line) = lines.next_line().await.unwrap() {
            responses.push(serde_json::from_str::<JsonRpcResponse>(&line).unwrap());
        }
        responses.sort_by_key(|r| r.id.as_i64());

        let ids: Vec<_> = responses.iter().map(|r| r.id.as_i64().unwrap()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(tool_text(&responses[2]).trim(), "over the wire");
    }
}
