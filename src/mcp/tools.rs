//! Tool registry and dispatch
//!
//! Tools are declared statically with their JSON schema. Incoming arguments
//! are validated by deserialising them into the typed argument structs below;
//! the handlers then delegate to the [`DeliveryAdapter`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use super::error::ToolError;
use super::protocol::{CallToolResult, ToolDescriptor};
use crate::app::{Config, NotifyChannel};
use crate::delivery::popup::default_popup_timeout_ms;
use crate::delivery::waybar::default_duration_seconds;
use crate::delivery::{
    BarMessageOptions, DeliveryAdapter, OverlayRequest, PolybarMessageOptions, PopupOptions,
    Severity, Urgency,
};

pub const NOTIFY_USER: &str = "notify_user";
pub const CLEAR_WAYBAR_MESSAGE: &str = "clear_waybar_message";
pub const DISPLAY_POLYBAR_MESSAGE: &str = "display_polybar_message";
pub const SHOW_POPUP_NOTIFICATION: &str = "show_popup_notification";
pub const SHOW_OVERLAY: &str = "show_overlay";
pub const OVERLAY_STATUS: &str = "overlay_status";

/// 公開するツールセット（バー／シェル環境ごと）
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ToolProfile {
    #[default]
    Waybar,
    Polybar,
    Quickshell,
    All,
}

impl ToolProfile {
    pub fn tool_names(&self) -> &'static [&'static str] {
        match self {
            ToolProfile::Waybar => &[NOTIFY_USER, CLEAR_WAYBAR_MESSAGE],
            ToolProfile::Polybar => &[DISPLAY_POLYBAR_MESSAGE, SHOW_POPUP_NOTIFICATION],
            ToolProfile::Quickshell => &[SHOW_OVERLAY, OVERLAY_STATUS],
            ToolProfile::All => &[
                NOTIFY_USER,
                CLEAR_WAYBAR_MESSAGE,
                DISPLAY_POLYBAR_MESSAGE,
                SHOW_POPUP_NOTIFICATION,
                SHOW_OVERLAY,
                OVERLAY_STATUS,
            ],
        }
    }

    pub fn includes(&self, tool: &str) -> bool {
        self.tool_names().contains(&tool)
    }
}

/// Every tool this server knows, in registration order.
pub fn tool_definitions() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor {
            name: NOTIFY_USER.to_string(),
            description:
                "Notify the user via Waybar and/or popup (notify-send/dunst) with a single call."
                    .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "message": { "type": "string", "description": "Message body to display" },
                    "title": {
                        "type": "string",
                        "description": "Popup notification title (defaults to message)"
                    },
                    "channels": {
                        "type": "array",
                        "items": { "type": "string", "enum": ["waybar", "popup"] },
                        "description": "Destinations to notify; defaults to [\"waybar\",\"popup\"]"
                    },
                    "urgency": {
                        "type": "string",
                        "enum": ["low", "normal", "critical"],
                        "description": "Popup urgency (default: normal)"
                    },
                    "timeoutMs": {
                        "type": "integer",
                        "minimum": 0,
                        "description": "Popup timeout in milliseconds (default: 5000)"
                    },
                    "icon": { "type": "string", "description": "Popup icon name or path" },
                    "waybar": {
                        "type": "object",
                        "description": "Waybar-specific options",
                        "properties": {
                            "severity": {
                                "type": "string",
                                "enum": ["info", "warn", "crit"],
                                "description": "Waybar accent/severity"
                            },
                            "pulse": { "type": "boolean", "description": "Enable pulse animation" },
                            "durationSeconds": {
                                "type": "integer",
                                "minimum": 0,
                                "description": "Seconds before auto-clear (default: 8)"
                            },
                            "text": {
                                "type": "string",
                                "description": "Waybar text override (default: bell + message)"
                            },
                            "tooltip": {
                                "type": "string",
                                "description": "Waybar tooltip override (default: message)"
                            }
                        }
                    }
                },
                "required": ["message"]
            }),
        },
        ToolDescriptor {
            name: CLEAR_WAYBAR_MESSAGE.to_string(),
            description: "Clear the Waybar notification and restore the ready state.".to_string(),
            input_schema: json!({ "type": "object", "properties": {} }),
        },
        ToolDescriptor {
            name: DISPLAY_POLYBAR_MESSAGE.to_string(),
            description: "Display a temporary message in Polybar.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "message": { "type": "string", "description": "Message to display" },
                    "duration": {
                        "type": "integer",
                        "minimum": 0,
                        "description": "Seconds before the message is cleared (default: 5)"
                    },
                    "color": { "type": "string", "description": "Foreground color (default: #ffffff)" },
                    "background": {
                        "type": "string",
                        "description": "Background color (default: #000000)"
                    }
                },
                "required": ["message"]
            }),
        },
        ToolDescriptor {
            name: SHOW_POPUP_NOTIFICATION.to_string(),
            description: "Show a desktop popup notification (notify-send, falling back to dunstify)."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "title": { "type": "string", "description": "Notification title" },
                    "message": { "type": "string", "description": "Notification body" },
                    "urgency": {
                        "type": "string",
                        "enum": ["low", "normal", "critical"],
                        "description": "Urgency (default: normal)"
                    },
                    "timeout": {
                        "type": "integer",
                        "minimum": 0,
                        "description": "Timeout in milliseconds (default: 5000)"
                    },
                    "icon": { "type": "string", "description": "Icon name or path" }
                },
                "required": ["title", "message"]
            }),
        },
        ToolDescriptor {
            name: SHOW_OVERLAY.to_string(),
            description: "Show a popup overlay through the Quickshell IPC notification target."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "title": { "type": "string", "description": "Overlay title" },
                    "body": { "type": "string", "description": "Overlay body text" },
                    "severity": {
                        "type": "string",
                        "enum": ["info", "warn", "crit"],
                        "description": "Accent/severity (default: info)"
                    },
                    "timeoutSeconds": {
                        "type": "integer",
                        "minimum": 0,
                        "description": "Seconds the overlay stays visible (default: 6)"
                    },
                    "pattern": { "type": "string", "description": "Animation pattern" },
                    "image": { "type": "string", "description": "Image identifier or path" },
                    "workspace": { "type": "string", "description": "Workspace to show the overlay on" },
                    "app": { "type": "string", "description": "Originating application name" },
                    "color": { "type": "string", "description": "Accent color" },
                    "transition": { "type": "string", "description": "Enter/exit transition" }
                },
                "required": ["title"]
            }),
        },
        ToolDescriptor {
            name: OVERLAY_STATUS.to_string(),
            description: "Report whether the Quickshell overlay IPC target is available.".to_string(),
            input_schema: json!({ "type": "object", "properties": {} }),
        },
    ]
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NotifyUserArgs {
    message: String,
    title: Option<String>,
    channels: Option<Vec<NotifyChannel>>,
    urgency: Option<Urgency>,
    timeout_ms: Option<u64>,
    icon: Option<String>,
    waybar: Option<WaybarArgs>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WaybarArgs {
    severity: Option<Severity>,
    pulse: Option<bool>,
    duration_seconds: Option<u64>,
    text: Option<String>,
    tooltip: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PolybarArgs {
    message: String,
    duration: Option<u64>,
    color: Option<String>,
    background: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PopupArgs {
    title: String,
    message: String,
    urgency: Option<Urgency>,
    timeout: Option<u64>,
    icon: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OverlayArgs {
    title: String,
    body: Option<String>,
    severity: Option<Severity>,
    timeout_seconds: Option<u64>,
    pattern: Option<String>,
    image: Option<String>,
    workspace: Option<String>,
    app: Option<String>,
    color: Option<String>,
    transition: Option<String>,
}

/// `null` or missing arguments are treated as `{}`.
fn parse_args<T: DeserializeOwned>(tool: &str, args: &Value) -> Result<T, ToolError> {
    let value = if args.is_null() {
        json!({})
    } else {
        args.clone()
    };
    serde_json::from_value(value).map_err(|e| ToolError::InvalidArguments {
        tool: tool.to_string(),
        reason: e.to_string(),
    })
}

/// Maps tool calls to delivery operations.
pub struct ToolGateway {
    profile: ToolProfile,
    default_channels: Vec<NotifyChannel>,
    adapter: Arc<DeliveryAdapter>,
}

impl ToolGateway {
    pub fn new(config: &Config, adapter: Arc<DeliveryAdapter>) -> Self {
        Self {
            profile: config.server.profile,
            default_channels: config.server.default_channels.clone(),
            adapter,
        }
    }

    pub fn with_profile(mut self, profile: ToolProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn profile(&self) -> ToolProfile {
        self.profile
    }

    pub fn adapter(&self) -> &Arc<DeliveryAdapter> {
        &self.adapter
    }

    pub fn list_tools(&self) -> Vec<ToolDescriptor> {
        tool_definitions()
            .into_iter()
            .filter(|t| self.profile.includes(&t.name))
            .collect()
    }

    /// Invoke a tool. Never fails: every error becomes an `isError` result.
    pub async fn call_tool(&self, name: &str, args: &Value) -> CallToolResult {
        match self.dispatch(name, args).await {
            Ok(status) => {
                tracing::info!(tool = %name, "Tool call succeeded");
                CallToolResult::text(status)
            }
            Err(e) => {
                tracing::warn!(tool = %name, error = %e, "Tool call failed");
                CallToolResult::error(e)
            }
        }
    }

    async fn dispatch(&self, name: &str, args: &Value) -> Result<String, ToolError> {
        if !self.profile.includes(name) {
            return Err(ToolError::UnknownTool(name.to_string()));
        }

        match name {
            NOTIFY_USER => self.notify_user(parse_args(name, args)?).await,
            CLEAR_WAYBAR_MESSAGE => Ok(self.adapter.waybar.clear().await?),
            DISPLAY_POLYBAR_MESSAGE => {
                let args: PolybarArgs = parse_args(name, args)?;
                let defaults = self.adapter.polybar.default_options();
                let options = PolybarMessageOptions {
                    duration_seconds: args.duration.unwrap_or(defaults.duration_seconds),
                    color: args.color.unwrap_or(defaults.color),
                    background: args.background.unwrap_or(defaults.background),
                };
                Ok(self.adapter.polybar.display(&args.message, &options).await?)
            }
            SHOW_POPUP_NOTIFICATION => {
                let args: PopupArgs = parse_args(name, args)?;
                let options = PopupOptions {
                    urgency: args.urgency.unwrap_or_default(),
                    timeout_ms: args.timeout.unwrap_or_else(default_popup_timeout_ms),
                    icon: args.icon,
                };
                Ok(self
                    .adapter
                    .popup
                    .show(&args.title, &args.message, &options)
                    .await?)
            }
            SHOW_OVERLAY => {
                let args: OverlayArgs = parse_args(name, args)?;
                let request = OverlayRequest {
                    title: args.title,
                    body: args.body.unwrap_or_default(),
                    severity: args.severity.unwrap_or_default(),
                    timeout_seconds: args
                        .timeout_seconds
                        .unwrap_or_else(|| self.adapter.overlay.default_timeout_seconds()),
                    pattern: args.pattern,
                    image: args.image,
                    workspace: args.workspace,
                    app: args.app,
                    color: args.color,
                    transition: args.transition,
                };
                Ok(self.adapter.overlay.send(&request).await?)
            }
            OVERLAY_STATUS => Ok(if self.adapter.overlay.is_ready().await {
                "Overlay ready".to_string()
            } else {
                "Overlay not ready".to_string()
            }),
            _ => Err(ToolError::UnknownTool(name.to_string())),
        }
    }

    async fn notify_user(&self, args: NotifyUserArgs) -> Result<String, ToolError> {
        let targets = args
            .channels
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| self.default_channels.clone());

        let mut parts = Vec::new();
        let mut failures = Vec::new();

        if targets.contains(&NotifyChannel::Waybar) {
            let waybar = args.waybar.unwrap_or_default();
            let options = BarMessageOptions {
                text: waybar.text,
                tooltip: waybar.tooltip,
                severity: waybar.severity.unwrap_or_default(),
                pulse: waybar.pulse.unwrap_or(false),
                duration_seconds: waybar
                    .duration_seconds
                    .unwrap_or_else(default_duration_seconds),
            };
            match self.adapter.waybar.display(&args.message, &options).await {
                Ok(status) => parts.push(format!("Waybar: {}", status)),
                Err(e) => {
                    parts.push(format!("Waybar: failed: {:#}", e));
                    failures.push(format!("Waybar: {:#}", e));
                }
            }
        }

        if targets.contains(&NotifyChannel::Popup) {
            let title = args.title.as_deref().unwrap_or(&args.message);
            let options = PopupOptions {
                urgency: args.urgency.unwrap_or_default(),
                timeout_ms: args.timeout_ms.unwrap_or_else(default_popup_timeout_ms),
                icon: args.icon,
            };
            match self.adapter.popup.show(title, &args.message, &options).await {
                Ok(status) => parts.push(format!("Popup: {}", status)),
                Err(e) => {
                    parts.push(format!("Popup: failed: {:#}", e));
                    failures.push(format!("Popup: {:#}", e));
                }
            }
        }

        if parts.is_empty() {
            return Err(ToolError::Delivery(anyhow::anyhow!(
                "No notification channel selected"
            )));
        }
        if failures.len() == parts.len() {
            return Err(ToolError::Delivery(anyhow::anyhow!(
                "{}",
                failures.join(" | ")
            )));
        }
        Ok(parts.join(" | "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::testing::FakeRunner;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.waybar.state_path = dir.path().join("waybar/message.json");
        config.waybar.mode_path = dir.path().join("waybar/mode.json");
        config.waybar.stamp_path = Some(dir.path().join("waybar/stamp"));
        config.polybar.message_path = dir.path().join("polybar-message");
        config.polybar.pipe_path = dir.path().join("polybar-pipe");
        config.overlay.fallback_paths = Vec::new();
        config
    }

    fn gateway(dir: &TempDir, runner: Arc<FakeRunner>, profile: ToolProfile) -> ToolGateway {
        runner.touch_on("-RTMIN+8", &dir.path().join("waybar/stamp"));
        let config = test_config(dir);
        let adapter = Arc::new(DeliveryAdapter::new(&config, runner));
        ToolGateway::new(&config, adapter).with_profile(profile)
    }

    #[test]
    fn test_all_tools_have_object_schemas() {
        for tool in tool_definitions() {
            assert!(!tool.description.is_empty(), "{} has no description", tool.name);
            assert_eq!(tool.input_schema["type"], "object", "{}", tool.name);
            assert!(tool.input_schema["properties"].is_object(), "{}", tool.name);
        }
    }

    #[test]
    fn test_profiles_cover_every_tool() {
        let all: Vec<String> = tool_definitions().into_iter().map(|t| t.name).collect();
        assert_eq!(all.len(), ToolProfile::All.tool_names().len());
        for name in &all {
            assert!(ToolProfile::All.includes(name));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_tools_respects_profile() {
        let dir = TempDir::new().unwrap();
        let gw = gateway(&dir, Arc::new(FakeRunner::new()), ToolProfile::Quickshell);
        let names: Vec<String> = gw.list_tools().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec![SHOW_OVERLAY, OVERLAY_STATUS]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_tool() {
        let dir = TempDir::new().unwrap();
        let gw = gateway(&dir, Arc::new(FakeRunner::new()), ToolProfile::All);
        let result = gw.call_tool("nonexistent", &json!({})).await;
        assert!(result.is_error());
        assert_eq!(result.text_content(), "Error: Unknown tool: nonexistent");
    }

    #[tokio::test(start_paused = true)]
    async fn test_tool_outside_profile_is_unknown() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::new());
        let gw = gateway(&dir, runner.clone(), ToolProfile::Waybar);
        let result = gw.call_tool(SHOW_OVERLAY, &json!({"title": "x"})).await;
        assert_eq!(result.text_content(), "Error: Unknown tool: show_overlay");
        assert!(runner.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_validation_error_is_reported() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::new());
        let gw = gateway(&dir, runner.clone(), ToolProfile::Waybar);

        let result = gw.call_tool(NOTIFY_USER, &Value::Null).await;
        assert!(result.is_error());
        assert!(result
            .text_content()
            .starts_with("Error: Invalid arguments for notify_user: missing field `message`"));

        let result = gw
            .call_tool(NOTIFY_USER, &json!({"message": "hi", "urgency": "extreme"}))
            .await;
        assert!(result.is_error());
        assert!(result.text_content().contains("unknown variant `extreme`"));

        let result = gw
            .call_tool(NOTIFY_USER, &json!({"message": "hi", "timeoutMs": -1}))
            .await;
        assert!(result.is_error());
        assert!(runner.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_notify_user_default_channels() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::new());
        let gw = gateway(&dir, runner.clone(), ToolProfile::Waybar);

        let result = gw
            .call_tool(
                NOTIFY_USER,
                &json!({
                    "message": "Tests passed",
                    "waybar": {"severity": "crit", "pulse": true, "durationSeconds": 3}
                }),
            )
            .await;
        assert!(!result.is_error());
        assert_eq!(
            result.text_content(),
            "Waybar: Waybar message queued (severity: crit, duration: 3s, pulse: on) | \
             Popup: Notification sent via notify-send with urgency: normal, timeout: 5000ms"
        );

        let state = gw.adapter().waybar.read_state().unwrap();
        assert_eq!(state.class, "active crit pulse");

        // title defaults to the message
        let popup = &runner.calls_for("notify-send")[0];
        assert_eq!(popup[popup.len() - 2], "Tests passed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_notify_user_deduplicates_channels() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::new());
        let gw = gateway(&dir, runner.clone(), ToolProfile::Waybar);

        let result = gw
            .call_tool(
                NOTIFY_USER,
                &json!({"message": "hi", "channels": ["popup", "popup"], "title": "T"}),
            )
            .await;
        assert!(result.text_content().starts_with("Popup: "));
        assert_eq!(runner.calls_for("notify-send").len(), 1);
        assert!(runner.calls_for("pkill").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_notify_user_partial_failure_is_reported() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::new());
        runner.missing("notify-send");
        runner.fail_with("dunstify", 1, "no dunst");
        let gw = gateway(&dir, runner.clone(), ToolProfile::Waybar);

        let result = gw.call_tool(NOTIFY_USER, &json!({"message": "hi"})).await;
        assert!(!result.is_error());
        let text = result.text_content();
        assert!(text.starts_with("Waybar: Waybar message queued"));
        assert!(text.contains(" | Popup: failed: Both notify-send and dunstify failed."));
    }

    #[tokio::test(start_paused = true)]
    async fn test_notify_user_total_failure_is_error() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::new());
        runner.missing("notify-send");
        runner.missing("dunstify");
        let gw = gateway(&dir, runner, ToolProfile::Waybar);

        let result = gw
            .call_tool(NOTIFY_USER, &json!({"message": "hi", "channels": ["popup"]}))
            .await;
        assert!(result.is_error());
        assert!(result
            .text_content()
            .starts_with("Error: Popup: Both notify-send and dunstify failed."));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_waybar_message() {
        let dir = TempDir::new().unwrap();
        let gw = gateway(&dir, Arc::new(FakeRunner::new()), ToolProfile::Waybar);
        gw.call_tool(NOTIFY_USER, &json!({"message": "hi", "channels": ["waybar"]}))
            .await;

        let result = gw.call_tool(CLEAR_WAYBAR_MESSAGE, &json!({})).await;
        assert_eq!(result.text_content(), "Waybar message cleared");
        assert_eq!(gw.adapter().waybar.read_state().unwrap().text, "ready");
    }

    #[tokio::test(start_paused = true)]
    async fn test_polybar_tools() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::new());
        let gw = gateway(&dir, runner.clone(), ToolProfile::Polybar);

        let result = gw
            .call_tool(DISPLAY_POLYBAR_MESSAGE, &json!({"message": "hi", "duration": 2}))
            .await;
        assert_eq!(
            result.text_content(),
            "Message sent to polybar via polybar-msg (duration: 2s)"
        );

        let result = gw
            .call_tool(
                SHOW_POPUP_NOTIFICATION,
                &json!({"title": "T", "message": "M", "urgency": "critical", "timeout": 0}),
            )
            .await;
        assert_eq!(
            result.text_content(),
            "Notification sent via notify-send with urgency: critical, timeout: 0ms"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlay_tools() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::new());
        runner.missing("qs");
        let gw = gateway(&dir, runner, ToolProfile::Quickshell);

        let result = gw
            .call_tool(SHOW_OVERLAY, &json!({"title": "Build", "severity": "crit"}))
            .await;
        assert!(result.is_error());
        let text = result.text_content();
        assert!(text.contains("No such file or directory"));
        assert!(text.contains("ipc call notifications show Build  crit 6"));

        let result = gw.call_tool(OVERLAY_STATUS, &Value::Null).await;
        assert!(!result.is_error());
        assert_eq!(result.text_content(), "Overlay not ready");
    }
}
