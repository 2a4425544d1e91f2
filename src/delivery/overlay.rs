//! Quickshell IPC overlay channel

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use super::waybar::Severity;
use super::CommandRunner;

/// Quickshell連携設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlayConfig {
    /// qs バイナリの明示パス（`MCP_NOTIFY_QS_BIN` で上書き可）
    #[serde(default)]
    pub binary: Option<PathBuf>,
    /// 明示パスがない場合に探すインストール先
    #[serde(default = "default_fallback_paths")]
    pub fallback_paths: Vec<PathBuf>,
    /// `-p` に渡すシェル定義ファイル
    #[serde(default = "default_shell_path")]
    pub shell_path: PathBuf,
    /// IPC ターゲット名
    #[serde(default = "default_target")]
    pub target: String,
    /// 呼び出す関数名
    #[serde(default = "default_function")]
    pub function: String,
    /// 既定の画像（`MCP_NOTIFY_DEFAULT_IMAGE` で上書き可）
    #[serde(default)]
    pub default_image: Option<String>,
    /// 関数が transition 引数を取るか（10引数版）
    #[serde(default = "default_with_transition")]
    pub with_transition: bool,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn home_dir() -> PathBuf {
    directories::BaseDirs::new()
        .map(|d| d.home_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("/tmp"))
}

fn default_fallback_paths() -> Vec<PathBuf> {
    vec![
        home_dir().join(".local/bin/qs"),
        PathBuf::from("/usr/local/bin/qs"),
        PathBuf::from("/usr/bin/qs"),
        PathBuf::from("/usr/bin/quickshell"),
    ]
}

fn default_shell_path() -> PathBuf {
    home_dir().join(".config/quickshell/notify/shell.qml")
}

fn default_target() -> String {
    "notifications".to_string()
}

fn default_function() -> String {
    "show".to_string()
}

fn default_with_transition() -> bool {
    true
}

fn default_timeout_seconds() -> u64 {
    6
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            binary: None,
            fallback_paths: default_fallback_paths(),
            shell_path: default_shell_path(),
            target: default_target(),
            function: default_function(),
            default_image: None,
            with_transition: default_with_transition(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

/// Fields of one overlay popup. `None` is sent as an empty string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverlayRequest {
    pub title: String,
    pub body: String,
    pub severity: Severity,
    pub timeout_seconds: u64,
    pub pattern: Option<String>,
    pub image: Option<String>,
    pub workspace: Option<String>,
    pub app: Option<String>,
    pub color: Option<String>,
    pub transition: Option<String>,
}

pub struct OverlayChannel {
    config: OverlayConfig,
    runner: Arc<dyn CommandRunner>,
}

impl OverlayChannel {
    pub fn new(config: OverlayConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self { config, runner }
    }

    pub fn default_timeout_seconds(&self) -> u64 {
        self.config.timeout_seconds
    }

    /// 明示パス → 既知のインストール先 → PATH 上の `qs` の順で解決
    ///
    /// PATH 上に存在しない場合の失敗は実行時のエラーとして報告される。
    pub fn resolve_binary(&self) -> PathBuf {
        if let Some(binary) = &self.config.binary {
            if binary.is_file() {
                return binary.clone();
            }
            tracing::warn!("Configured quickshell binary not found: {}", binary.display());
        }
        self.config
            .fallback_paths
            .iter()
            .find(|p| p.is_file())
            .cloned()
            .unwrap_or_else(|| PathBuf::from("qs"))
    }

    fn base_args(&self) -> Vec<String> {
        vec![
            "-p".to_string(),
            self.config.shell_path.to_string_lossy().to_string(),
            "ipc".to_string(),
        ]
    }

    /// 関数の引数は固定長。未指定は省略せず空文字で渡す
    pub fn call_args(&self, request: &OverlayRequest) -> Vec<String> {
        let mut args = self.base_args();
        args.extend([
            "call".to_string(),
            self.config.target.clone(),
            self.config.function.clone(),
        ]);

        let image = request
            .image
            .clone()
            .or_else(|| self.config.default_image.clone());
        args.extend([
            request.title.clone(),
            request.body.clone(),
            request.severity.as_str().to_string(),
            request.timeout_seconds.to_string(),
            request.pattern.clone().unwrap_or_default(),
            image.unwrap_or_default(),
            request.workspace.clone().unwrap_or_default(),
            request.app.clone().unwrap_or_default(),
            request.color.clone().unwrap_or_default(),
        ]);
        if self.config.with_transition {
            args.push(request.transition.clone().unwrap_or_default());
        }
        args
    }

    /// Send an overlay popup through the Quickshell IPC target.
    pub async fn send(&self, request: &OverlayRequest) -> Result<String> {
        let binary = self.resolve_binary();
        let program = binary.to_string_lossy().to_string();
        let args = self.call_args(request);

        let output = self.runner.run(&program, &args).await.map_err(|e| {
            anyhow::anyhow!(
                "Failed to run {} {}: {}",
                program,
                args.join(" "),
                e
            )
        })?;

        if !output.success() {
            anyhow::bail!(
                "{} ipc call exited with code {}\nstderr: {}\nstdout: {}",
                program,
                output.code_display(),
                output.stderr,
                output.stdout
            );
        }

        tracing::info!(
            target_name = %self.config.target,
            severity = request.severity.as_str(),
            "Overlay sent"
        );
        Ok(format!(
            "Overlay sent via {} ipc ({}.{}, severity: {}, timeout: {}s)",
            program,
            self.config.target,
            self.config.function,
            request.severity.as_str(),
            request.timeout_seconds
        ))
    }

    /// IPC ターゲット一覧に対象が含まれていれば準備完了。失敗時は false
    pub async fn is_ready(&self) -> bool {
        let program = self.resolve_binary().to_string_lossy().to_string();
        let mut args = self.base_args();
        args.push("show".to_string());

        match self.runner.run(&program, &args).await {
            Ok(output) if output.success() => output.stdout.contains(&self.config.target),
            Ok(output) => {
                tracing::debug!("{} ipc show exited with {}", program, output.code_display());
                false
            }
            Err(e) => {
                tracing::debug!("Failed to run {} ipc show: {}", program, e);
                false
            }
        }
    }
}
