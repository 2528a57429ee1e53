//! Request routing for the tool server

use serde_json::{json, Value};
use tracing::{debug, warn};

use super::protocol::{
    error_codes, tool_definitions, McpRequest, McpResponse, ServerCapabilities, ServerInfo,
    ToolCall, PROTOCOL_VERSION,
};
use crate::{
    core::{ScanRequest, ScanResponse, SessionId, TOOL_INFO, TOOL_SCAN},
    service::ScanService,
};

/// Routes requests to the scan service; clones share the same service
#[derive(Clone)]
pub struct McpHandler {
    service: ScanService,
    session: SessionId,
    server_info: ServerInfo,
}

impl McpHandler {
    pub fn new(service: ScanService, session: SessionId) -> Self {
        let identity = service.identity();
        let server_info = ServerInfo {
            name: identity.name.clone(),
            version: identity.version.clone(),
        };
        Self {
            service,
            session,
            server_info,
        }
    }

    pub fn service(&self) -> &ScanService {
        &self.service
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }

    /// Handle one message; notifications yield no response
    pub async fn handle(&self, request: McpRequest) -> Option<McpResponse> {
        if request.is_notification() {
            debug!("Notification received: {}", request.method);
            return None;
        }

        let response = match request.method.as_str() {
            "initialize" => self.handle_initialize(&request),
            "tools/list" => self.handle_tools_list(&request),
            "tools/call" => self.handle_tools_call(&request).await,
            "ping" => McpResponse::success(request.id.clone(), json!({})),
            _ => McpResponse::error(
                request.id.clone(),
                error_codes::METHOD_NOT_FOUND,
                format!("Method not found: {}", request.method),
            ),
        };
        Some(response)
    }

    fn handle_initialize(&self, request: &McpRequest) -> McpResponse {
        McpResponse::success(
            request.id.clone(),
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "serverInfo": self.server_info,
                "capabilities": ServerCapabilities::default()
            }),
        )
    }

    fn handle_tools_list(&self, request: &McpRequest) -> McpResponse {
        let tools = tool_definitions(&self.service.engine().default_flags);
        McpResponse::success(request.id.clone(), json!({ "tools": tools }))
    }

    async fn handle_tools_call(&self, request: &McpRequest) -> McpResponse {
        let call = match request
            .params
            .clone()
            .map(serde_json::from_value::<ToolCall>)
        {
            Some(Ok(call)) => call,
            Some(Err(e)) => {
                return McpResponse::error(
                    request.id.clone(),
                    error_codes::INVALID_PARAMS,
                    format!("Invalid tool call: {}", e),
                )
            }
            None => {
                return McpResponse::error(
                    request.id.clone(),
                    error_codes::INVALID_PARAMS,
                    "Missing params",
                )
            }
        };

        let response = match call.name.as_str() {
            TOOL_SCAN => match scan_request(call.arguments) {
                Ok(scan) => self.service.handle(scan, &self.session).await,
                Err(message) => {
                    warn!("[{}] Rejected {} arguments: {}", self.session, TOOL_SCAN, message);
                    return McpResponse::error(
                        request.id.clone(),
                        error_codes::INVALID_PARAMS,
                        message,
                    );
                }
            },
            TOOL_INFO => self.service.info(&self.session),
            other => {
                return McpResponse::error(
                    request.id.clone(),
                    error_codes::METHOD_NOT_FOUND,
                    format!("Tool not found: {}", other),
                )
            }
        };

        tool_result(request.id.clone(), &response)
    }
}

fn scan_request(arguments: Value) -> Result<ScanRequest, String> {
    serde_json::from_value(arguments)
        .map_err(|e| format!("Invalid arguments for {}: {}", TOOL_SCAN, e))
}

fn tool_result(id: Option<Value>, response: &ScanResponse) -> McpResponse {
    match serde_json::to_value(response) {
        Ok(result) => McpResponse::success(id, result),
        Err(e) => McpResponse::error(
            id,
            error_codes::INTERNAL_ERROR,
            format!("Failed to encode response: {}", e),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        command::EngineInvocation,
        config::AppConfig,
        core::{CommandRunner, ExecutionOutcome},
        engine::EngineSettings,
    };
    use async_trait::async_trait;
    use std::sync::Arc;

    struct EchoRunner;

    #[async_trait]
    impl CommandRunner for EchoRunner {
        async fn execute(&self, invocation: &EngineInvocation) -> ExecutionOutcome {
            ExecutionOutcome::Success {
                stdout: invocation.args().join(" "),
                stderr: String::new(),
            }
        }
    }

    fn handler() -> McpHandler {
        let engine = EngineSettings::with_executable(&AppConfig::default(), "/usr/bin/nmap");
        let service = ScanService::new(Arc::new(engine)).with_runner(Arc::new(EchoRunner));
        McpHandler::new(service, SessionId::new("test-session"))
    }

    fn call(name: &str, arguments: Value) -> McpRequest {
        McpRequest::new("tools/call")
            .with_id(3)
            .with_params(json!({ "name": name, "arguments": arguments }))
    }

    #[tokio::test]
    async fn test_initialize_reports_server_info() {
        let response = handler()
            .handle(McpRequest::new("initialize").with_id(1))
            .await
            .unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(result["serverInfo"]["name"], "NmapService");
        assert_eq!(result["capabilities"]["tools"]["listChanged"], false);
    }

    #[tokio::test]
    async fn test_notification_gets_no_reply() {
        let mut request = McpRequest::new("notifications/initialized");
        request.id = None;
        assert!(handler().handle(request).await.is_none());
    }

    #[tokio::test]
    async fn test_scan_call_returns_text_content() {
        let response = handler()
            .handle(call(
                "nmapScan",
                json!({ "target": "scanme.example", "flags": "-sn", "outputFormat": "grepable" }),
            ))
            .await
            .unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["content"][0]["type"], "text");
        assert_eq!(
            result["content"][0]["text"],
            "Nmap Scan Results for scanme.example (grepable format)\n\n--datadir /usr/share/nmap -oG - -sn scanme.example"
        );
    }

    #[tokio::test]
    async fn test_invalid_target_is_content_not_protocol_error() {
        let response = handler()
            .handle(call("nmapScan", json!({ "target": "bad host; rm -rf /" })))
            .await
            .unwrap();
        assert!(response.error.is_none());
        let text = response.result.unwrap()["content"][0]["text"].clone();
        assert!(text.as_str().unwrap().contains("Invalid target format"));
    }

    #[tokio::test]
    async fn test_missing_target_is_invalid_params() {
        let response = handler()
            .handle(call("nmapScan", json!({ "flags": "-sV" })))
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, error_codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let response = handler()
            .handle(call("portKnock", json!({})))
            .await
            .unwrap();
        let error = response.error.unwrap();
        assert_eq!(error.code, error_codes::METHOD_NOT_FOUND);
        assert_eq!(error.message, "Tool not found: portKnock");
    }

    #[tokio::test]
    async fn test_get_info_carries_session() {
        let response = handler().handle(call("getInfo", json!({}))).await.unwrap();
        let text = response.result.unwrap()["content"][0]["text"].clone();
        assert!(text.as_str().unwrap().ends_with("- Session ID: test-session"));
    }
}
