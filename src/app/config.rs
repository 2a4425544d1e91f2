use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::delivery::overlay::OverlayConfig;
use crate::delivery::polybar::PolybarConfig;
use crate::delivery::popup::PopupConfig;
use crate::delivery::waybar::WaybarConfig;
use crate::mcp::ToolProfile;

/// 既定の通知先一覧（カンマ区切り）
pub const ENV_DEFAULT_CHANNELS: &str = "MCP_NOTIFY_DEFAULT_CHANNELS";
/// Quickshell バイナリの明示パス
pub const ENV_QS_BIN: &str = "MCP_NOTIFY_QS_BIN";
/// オーバーレイの既定画像
pub const ENV_DEFAULT_IMAGE: &str = "MCP_NOTIFY_DEFAULT_IMAGE";

/// `notify_user` の通知先
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum NotifyChannel {
    Waybar,
    Popup,
}

impl FromStr for NotifyChannel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "waybar" => Ok(NotifyChannel::Waybar),
            "popup" => Ok(NotifyChannel::Popup),
            _ => anyhow::bail!("Unknown notification channel: {}", s),
        }
    }
}

fn default_channels() -> Vec<NotifyChannel> {
    vec![NotifyChannel::Waybar, NotifyChannel::Popup]
}

/// カンマ区切りの通知先を解析（不正な値は無視、空なら既定値）
pub fn parse_channels(raw: &str) -> Vec<NotifyChannel> {
    let parsed: Vec<NotifyChannel> = raw
        .split(',')
        .map(str::trim)
        .filter_map(|s| s.parse().ok())
        .collect();
    if parsed.is_empty() {
        default_channels()
    } else {
        parsed
    }
}

/// サーバー設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 公開するツールセット
    #[serde(default)]
    pub profile: ToolProfile,
    /// `channels` 未指定時の通知先
    #[serde(default = "default_channels")]
    pub default_channels: Vec<NotifyChannel>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            profile: ToolProfile::default(),
            default_channels: default_channels(),
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    /// ポップアップ通知設定
    #[serde(default)]
    pub popup: PopupConfig,
    /// Waybar連携設定
    #[serde(default)]
    pub waybar: WaybarConfig,
    /// Polybar連携設定
    #[serde(default)]
    pub polybar: PolybarConfig,
    /// Quickshell連携設定
    #[serde(default)]
    pub overlay: OverlayConfig,
}

impl Config {
    /// 設定ファイルから読み込み、環境変数で上書きする
    ///
    /// 既定パスにファイルがない場合はデフォルトを作成して保存する。
    /// 明示パスが存在しない場合はエラー。
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from(path)?,
            None => {
                let config_path = Self::config_path()?;
                if config_path.exists() {
                    Self::load_from(&config_path)?
                } else {
                    // 初回起動時はデフォルト設定をファイルに保存
                    let config = Self::default();
                    if let Err(e) = config.save_to(&config_path) {
                        tracing::warn!("Failed to save default config: {}", e);
                    }
                    config
                }
            }
        };
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config {}: {}", path.display(), e))?;
        toml::from_str(&content).map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))
    }

    /// 設定ファイルパスを取得
    pub fn config_path() -> Result<PathBuf> {
        // ~/.config/desktop-notify-mcp/config.toml を使用
        let base_dirs = directories::BaseDirs::new()
            .ok_or_else(|| anyhow::anyhow!("Failed to determine home directory"))?;
        Ok(base_dirs
            .home_dir()
            .join(".config/desktop-notify-mcp/config.toml"))
    }

    /// 指定パスへ保存
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    /// Apply the documented environment overrides.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_DEFAULT_CHANNELS) {
            self.server.default_channels = parse_channels(&raw);
        }
        if let Some(bin) = lookup(ENV_QS_BIN).filter(|s| !s.trim().is_empty()) {
            self.overlay.binary = Some(PathBuf::from(bin));
        }
        if let Some(image) = lookup(ENV_DEFAULT_IMAGE).filter(|s| !s.trim().is_empty()) {
            self.overlay.default_image = Some(image);
        }
    }
}
