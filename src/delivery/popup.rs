//! Popup notifications through notify-send with a dunstify fallback

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{run_checked, CommandRunner};

/// ポップアップの緊急度
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    #[default]
    Normal,
    Critical,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::Low => "low",
            Urgency::Normal => "normal",
            Urgency::Critical => "critical",
        }
    }
}

/// ポップアップ表示オプション
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopupOptions {
    pub urgency: Urgency,
    /// 表示時間（ミリ秒）。0 はデーモン側の慣例どおり「自動で消えない」
    pub timeout_ms: u64,
    pub icon: Option<String>,
}

impl Default for PopupOptions {
    fn default() -> Self {
        Self {
            urgency: Urgency::Normal,
            timeout_ms: default_popup_timeout_ms(),
            icon: None,
        }
    }
}

pub fn default_popup_timeout_ms() -> u64 {
    5000
}

/// ポップアップデーモンの種類（試行順に並べる）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PopupBackend {
    NotifySend,
    Dunstify,
}

impl PopupBackend {
    pub fn program(&self) -> &'static str {
        match self {
            PopupBackend::NotifySend => "notify-send",
            PopupBackend::Dunstify => "dunstify",
        }
    }

    /// notify-send は `--flag=value`、dunstify は短いフラグ + 値の別トークン
    pub fn args(
        &self,
        app_name: &str,
        title: &str,
        message: &str,
        options: &PopupOptions,
    ) -> Vec<String> {
        let mut args = Vec::new();
        match self {
            PopupBackend::NotifySend => {
                args.push(format!("--urgency={}", options.urgency.as_str()));
                args.push(format!("--expire-time={}", options.timeout_ms));
                if let Some(icon) = &options.icon {
                    args.push(format!("--icon={}", icon));
                }
                args.push(format!("--app-name={}", app_name));
            }
            PopupBackend::Dunstify => {
                args.extend(["-u".to_string(), options.urgency.as_str().to_string()]);
                args.extend(["-t".to_string(), options.timeout_ms.to_string()]);
                if let Some(icon) = &options.icon {
                    args.extend(["-I".to_string(), icon.clone()]);
                }
            }
        }
        args.push(title.to_string());
        args.push(message.to_string());
        args
    }
}

/// ポップアップ通知設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopupConfig {
    /// notify-send に渡すアプリ名
    #[serde(default = "default_app_name")]
    pub app_name: String,
    /// 試行するバックエンド（先頭から順に）
    #[serde(default = "default_backends")]
    pub backends: Vec<PopupBackend>,
}

fn default_app_name() -> String {
    "MCP Notify".to_string()
}

fn default_backends() -> Vec<PopupBackend> {
    vec![PopupBackend::NotifySend, PopupBackend::Dunstify]
}

impl Default for PopupConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            backends: default_backends(),
        }
    }
}

pub struct PopupChannel {
    config: PopupConfig,
    runner: Arc<dyn CommandRunner>,
}

impl PopupChannel {
    pub fn new(config: PopupConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self { config, runner }
    }

    /// Show a popup, falling back through the configured daemons in order.
    ///
    /// Fails only when every backend failed; the error names each failure.
    pub async fn show(&self, title: &str, message: &str, options: &PopupOptions) -> Result<String> {
        let mut failures: Vec<(PopupBackend, String)> = Vec::new();

        for backend in &self.config.backends {
            let args = backend.args(&self.config.app_name, title, message, options);
            match run_checked(self.runner.as_ref(), backend.program(), &args).await {
                Ok(_) => {
                    tracing::info!(
                        backend = backend.program(),
                        urgency = options.urgency.as_str(),
                        "Popup notification sent"
                    );
                    return Ok(format!(
                        "Notification sent via {} with urgency: {}, timeout: {}ms",
                        backend.program(),
                        options.urgency.as_str(),
                        options.timeout_ms
                    ));
                }
                Err(e) => {
                    tracing::warn!("{} failed: {:#}", backend.program(), e);
                    failures.push((*backend, format!("{:#}", e)));
                }
            }
        }

        if failures.is_empty() {
            anyhow::bail!("No popup backend configured");
        }

        let names: Vec<&str> = failures.iter().map(|(b, _)| b.program()).collect();
        let details: Vec<String> = failures
            .iter()
            .map(|(b, e)| format!("{} error: {}", b.program(), e))
            .collect();
        let prefix = match names.len() {
            1 => names[0].to_string(),
            2 => format!("Both {} and {}", names[0], names[1]),
            _ => format!("All of {}", names.join(", ")),
        };
        anyhow::bail!("{} failed. {}", prefix, details.join(", "))
    }
}
