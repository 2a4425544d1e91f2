//! Stdio server for the MCP tool gateway

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use super::error::McpError;
use super::protocol::{
    InitializeResult, JsonRpcError, JsonRpcRequest, JsonRpcResponse, ToolsListResult,
};
use super::tools::ToolGateway;

/// Serves one client over line-delimited JSON-RPC.
///
/// Requests are handled one at a time in arrival order.
pub struct McpServer {
    gateway: ToolGateway,
    initialized: bool,
    request_count: u64,
}

impl McpServer {
    pub fn new(gateway: ToolGateway) -> Self {
        Self {
            gateway,
            initialized: false,
            request_count: 0,
        }
    }

    /// Run on the process stdin/stdout until stdin closes.
    pub async fn run_stdio(&mut self) -> Result<()> {
        let stdin = BufReader::new(tokio::io::stdin());
        let stdout = tokio::io::stdout();
        self.run(stdin, stdout).await
    }

    pub async fn run<R, W>(&mut self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();

        tracing::info!(profile = ?self.gateway.profile(), "MCP server running on stdio");

        while let Some(line) = lines.next_line().await.context("Failed to read request")? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            self.request_count += 1;
            let req_id = self.request_count;
            tracing::debug!(req_id, raw = %line, "Received raw JSON-RPC request");

            let request: JsonRpcRequest = match serde_json::from_str(line) {
                Ok(req) => req,
                Err(e) => {
                    tracing::error!(req_id, error = %e, "Failed to parse JSON-RPC request");
                    let response = JsonRpcResponse::error(
                        Value::Null,
                        JsonRpcError::new(JsonRpcError::PARSE_ERROR, e.to_string()),
                    );
                    write_response(&mut writer, &response).await?;
                    continue;
                }
            };

            if request.jsonrpc != "2.0" {
                tracing::error!(req_id, got_version = %request.jsonrpc, "Invalid JSON-RPC version");
                let response = JsonRpcResponse::error(
                    request.id,
                    JsonRpcError::with_data(
                        JsonRpcError::INVALID_REQUEST,
                        "Invalid JSON-RPC version",
                        serde_json::json!({"expected": "2.0", "got": request.jsonrpc}),
                    ),
                );
                write_response(&mut writer, &response).await?;
                continue;
            }

            tracing::info!(req_id, method = %request.method, "Incoming JSON-RPC request");

            if let Some(response) = self.handle_request(request).await {
                write_response(&mut writer, &response).await?;
            }
        }

        tracing::info!("MCP server shutting down");
        Ok(())
    }

    async fn handle_request(&mut self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let is_notification = request.id.is_null();
        let result = match request.method.as_str() {
            "initialize" => self.handle_initialize(),
            "initialized" | "notifications/initialized" => Ok(serde_json::json!({})),
            "ping" => Ok(serde_json::json!({})),
            "tools/list" => self.handle_tools_list(),
            "tools/call" => self.handle_tools_call(&request.params).await,
            _ => Err(McpError::MethodNotFound(request.method.clone())),
        };

        if is_notification {
            if let Err(e) = result {
                tracing::warn!(method = %request.method, error = %e, "Notification handling failed");
            }
            return None;
        }

        Some(match result {
            Ok(value) => JsonRpcResponse::success(request.id, value),
            Err(e) => JsonRpcResponse::error(request.id, e.into()),
        })
    }

    fn handle_initialize(&mut self) -> Result<Value, McpError> {
        self.initialized = true;
        tracing::info!("MCP client initialized");
        serde_json::to_value(InitializeResult::default()).map_err(|e| McpError::Internal(e.to_string()))
    }

    fn handle_tools_list(&self) -> Result<Value, McpError> {
        let result = ToolsListResult {
            tools: self.gateway.list_tools(),
        };
        serde_json::to_value(result).map_err(|e| McpError::Internal(e.to_string()))
    }

    async fn handle_tools_call(&self, params: &Value) -> Result<Value, McpError> {
        let name = params["name"]
            .as_str()
            .ok_or_else(|| McpError::InvalidParams("Missing 'name' parameter".into()))?;
        let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);

        if !self.initialized {
            tracing::warn!(tool = %name, "Tool called before initialize");
        }

        tracing::debug!(tool = %name, arguments = %arguments, "Tool call arguments");
        let result = self.gateway.call_tool(name, &arguments).await;
        serde_json::to_value(result).map_err(|e| McpError::Internal(e.to_string()))
    }
}

async fn write_response<W>(writer: &mut W, response: &JsonRpcResponse) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let json = serde_json::to_string(response).context("Failed to serialize response")?;
    tracing::debug!(raw = %json, "Sending raw JSON-RPC response");
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await.context("Failed to flush stdout")?;
    Ok(())
}
