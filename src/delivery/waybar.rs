//! Waybar custom-module channel
//!
//! The module reads a small JSON state file and is asked to redraw with a
//! real-time signal. A separate stamp file, touched by the module's exec
//! script whenever it redraws, tells us whether the signal actually took
//! effect. An optional "mode" file switches the bar to its notification
//! profile while a message is visible.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use super::revert::RevertSlot;
use super::CommandRunner;

/// バーの強調表示レベル
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Info,
    Warn,
    Crit,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warn => "warn",
            Severity::Crit => "crit",
        }
    }
}

/// バーの表示モード（mode ファイルの内容）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BarMode {
    #[default]
    Default,
    Mcp,
}

impl BarMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BarMode::Default => "default",
            BarMode::Mcp => "mcp",
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ModeFile {
    mode: BarMode,
}

/// Options for a single bar message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarMessageOptions {
    pub text: Option<String>,
    pub tooltip: Option<String>,
    pub severity: Severity,
    pub pulse: bool,
    /// 0 は即時リバート
    pub duration_seconds: u64,
}

pub fn default_duration_seconds() -> u64 {
    8
}

impl Default for BarMessageOptions {
    fn default() -> Self {
        Self {
            text: None,
            tooltip: None,
            severity: Severity::Info,
            pulse: false,
            duration_seconds: default_duration_seconds(),
        }
    }
}

/// Waybar モジュールが読む表示内容
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarDisplayState {
    pub text: String,
    pub tooltip: String,
    pub class: String,
}

impl BarDisplayState {
    /// 待機中の表示
    pub fn ready() -> Self {
        Self {
            text: "ready".to_string(),
            tooltip: "Waiting for notifications".to_string(),
            class: String::new(),
        }
    }

    pub fn for_message(message: &str, options: &BarMessageOptions) -> Self {
        let mut classes = vec!["active", options.severity.as_str()];
        if options.pulse {
            classes.push("pulse");
        }
        Self {
            text: options
                .text
                .clone()
                .unwrap_or_else(|| format!("🔔 {}", message)),
            tooltip: options
                .tooltip
                .clone()
                .unwrap_or_else(|| message.to_string()),
            class: classes.join(" "),
        }
    }
}

/// Waybar連携設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaybarConfig {
    /// シグナル送信先のプロセス名
    #[serde(default = "default_process_name")]
    pub process_name: String,
    /// 表示内容の JSON ファイル
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,
    /// モード JSON ファイル
    #[serde(default = "default_mode_path")]
    pub mode_path: PathBuf,
    /// 再描画確認用のスタンプファイル（空文字で確認しない。存在しなければ確認を省略）
    #[serde(default = "default_stamp_path")]
    pub stamp_path: Option<PathBuf>,
    /// モジュール再描画シグナル
    #[serde(default = "default_refresh_signal")]
    pub refresh_signal: String,
    /// モード切り替えシグナル
    #[serde(default = "default_mode_signal")]
    pub mode_signal: String,
    /// 設定全体のリロードシグナル
    #[serde(default = "default_reload_signal")]
    pub reload_signal: String,
    /// メッセージ表示中に mcp モードへ切り替えるか
    #[serde(default = "default_mode_toggle")]
    pub mode_toggle: bool,
    /// シグナル送信後スタンプを確認するまでの待ち時間
    #[serde(default = "default_stamp_wait_ms")]
    pub stamp_wait_ms: u64,
}

fn cache_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "desktop-notify-mcp")
        .map(|d| d.cache_dir().to_path_buf())
        .unwrap_or_else(|| std::env::temp_dir().join("desktop-notify-mcp"))
        .join("waybar")
}

fn default_process_name() -> String {
    "waybar".to_string()
}

fn default_state_path() -> PathBuf {
    cache_dir().join("message.json")
}

fn default_mode_path() -> PathBuf {
    cache_dir().join("mode.json")
}

fn default_stamp_path() -> Option<PathBuf> {
    Some(cache_dir().join("stamp"))
}

fn default_refresh_signal() -> String {
    "RTMIN+8".to_string()
}

fn default_mode_signal() -> String {
    "RTMIN+9".to_string()
}

fn default_reload_signal() -> String {
    "USR2".to_string()
}

fn default_mode_toggle() -> bool {
    true
}

fn default_stamp_wait_ms() -> u64 {
    250
}

impl Default for WaybarConfig {
    fn default() -> Self {
        Self {
            process_name: default_process_name(),
            state_path: default_state_path(),
            mode_path: default_mode_path(),
            stamp_path: default_stamp_path(),
            refresh_signal: default_refresh_signal(),
            mode_signal: default_mode_signal(),
            reload_signal: default_reload_signal(),
            mode_toggle: default_mode_toggle(),
            stamp_wait_ms: default_stamp_wait_ms(),
        }
    }
}

impl WaybarConfig {
    fn stamp_path(&self) -> Option<&Path> {
        self.stamp_path
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    let content = serde_json::to_string(value)?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// State shared with the revert task.
struct WaybarInner {
    config: WaybarConfig,
    runner: Arc<dyn CommandRunner>,
    mode: Mutex<BarMode>,
    /// 表示・クリア・リバートを直列化する。リバートは途中で中断されない
    ops: tokio::sync::Mutex<()>,
}

impl WaybarInner {
    fn current_mode(&self) -> BarMode {
        *self.mode.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn track_mode(&self, mode: BarMode) {
        *self.mode.lock().unwrap_or_else(PoisonError::into_inner) = mode;
    }

    /// `pkill -<signal> -x <process>`。プロセスが存在してシグナルが届いた場合 true
    async fn signal(&self, signal: &str) -> bool {
        let args = vec![
            format!("-{}", signal),
            "-x".to_string(),
            self.config.process_name.clone(),
        ];
        match self.runner.run("pkill", &args).await {
            Ok(output) if output.success() => true,
            Ok(output) => {
                tracing::debug!(
                    "pkill -{} {} exited with {}",
                    signal,
                    self.config.process_name,
                    output.code_display()
                );
                false
            }
            Err(e) => {
                tracing::warn!("Failed to execute pkill: {}", e);
                false
            }
        }
    }

    /// Persist `mode` and signal the bar; the tracked mode only follows a delivered signal.
    async fn set_mode(&self, mode: BarMode) -> bool {
        if let Err(e) = write_json(&self.config.mode_path, &ModeFile { mode }) {
            tracing::warn!("Failed to write waybar mode file: {:#}", e);
            return false;
        }
        if self.signal(&self.config.mode_signal).await {
            self.track_mode(mode);
            true
        } else {
            false
        }
    }

    async fn revert(&self) -> Result<()> {
        write_json(&self.config.state_path, &BarDisplayState::ready())?;
        if !self.signal(&self.config.refresh_signal).await {
            tracing::warn!("Waybar refresh signal not delivered during revert");
        }
        if self.config.mode_toggle
            && self.current_mode() != BarMode::Default
            && !self.set_mode(BarMode::Default).await
        {
            anyhow::bail!("failed to switch waybar back to default mode");
        }
        Ok(())
    }
}

pub struct WaybarChannel {
    inner: Arc<WaybarInner>,
    revert: RevertSlot,
}

impl WaybarChannel {
    pub fn new(config: WaybarConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            inner: Arc::new(WaybarInner {
                config,
                runner,
                mode: Mutex::new(BarMode::Default),
                ops: tokio::sync::Mutex::new(()),
            }),
            revert: RevertSlot::new("waybar"),
        }
    }

    pub fn mode(&self) -> BarMode {
        self.inner.current_mode()
    }

    pub fn has_pending_revert(&self) -> bool {
        self.revert.is_pending()
    }

    /// 現在の表示内容をファイルから読み込む
    pub fn read_state(&self) -> Result<BarDisplayState> {
        let path = &self.inner.config.state_path;
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content).context("Failed to parse waybar state")
    }

    /// Persist the mode file and signal the bar. Returns whether the signal was delivered.
    pub async fn set_mode(&self, mode: BarMode) -> bool {
        let _ops = self.inner.ops.lock().await;
        self.inner.set_mode(mode).await
    }

    /// Show `message` on the bar and arm the revert.
    ///
    /// Signal problems never fail the call; they are appended to the
    /// returned status as warnings. Only an unwritable state file is an error.
    pub async fn display(&self, message: &str, options: &BarMessageOptions) -> Result<String> {
        let inner = &self.inner;
        let config = &inner.config;

        // 古いリバートが表示の途中で発火しないよう、書き込み前に取り消す
        let _ops = inner.ops.lock().await;
        self.revert.cancel();

        let state = BarDisplayState::for_message(message, options);
        write_json(&config.state_path, &state).context("Failed to write waybar state")?;

        let stamp_path = config.stamp_path();
        let stamp_before = stamp_path.and_then(modified);

        let delivered = inner.signal(&config.refresh_signal).await;

        let refreshed = match stamp_path {
            Some(path) if delivered => {
                tokio::time::sleep(Duration::from_millis(config.stamp_wait_ms)).await;
                match (stamp_before, modified(path)) {
                    (Some(before), Some(after)) => after > before,
                    (None, Some(_)) => true,
                    (Some(_), None) => false,
                    // モジュール側がスタンプを作らない構成
                    (None, None) => {
                        tracing::debug!(
                            "Waybar stamp {} does not exist, skipping redraw check",
                            path.display()
                        );
                        true
                    }
                }
            }
            _ => true,
        };

        let mut mode_ok = true;
        if config.mode_toggle && inner.current_mode() != BarMode::Mcp {
            mode_ok = inner.set_mode(BarMode::Mcp).await;
        }

        let mut reload_sent = None;
        if delivered && !refreshed {
            tracing::warn!(
                "Waybar did not refresh after SIG{}, sending SIG{}",
                config.refresh_signal,
                config.reload_signal
            );
            let ok = inner.signal(&config.reload_signal).await;
            if ok {
                // 設定全体のリロードで mode ファイルも読み直される
                mode_ok = true;
                if config.mode_toggle {
                    inner.track_mode(BarMode::Mcp);
                }
            }
            reload_sent = Some(ok);
        }

        let task_inner = self.inner.clone();
        self.revert
            .schedule(Duration::from_secs(options.duration_seconds), async move {
                let _ops = task_inner.ops.lock().await;
                if let Err(e) = task_inner.revert().await {
                    tracing::warn!("Error clearing waybar message: {:#}", e);
                }
            });

        tracing::info!(
            severity = options.severity.as_str(),
            duration = options.duration_seconds,
            delivered,
            refreshed,
            mode_ok,
            "Waybar message displayed"
        );

        let mut status = format!(
            "Waybar message queued (severity: {}, duration: {}s, pulse: {})",
            options.severity.as_str(),
            options.duration_seconds,
            if options.pulse { "on" } else { "off" }
        );
        if !delivered {
            status.push_str(&format!(
                " (warning: SIG{} not delivered, is {} running?)",
                config.refresh_signal, config.process_name
            ));
        }
        match reload_sent {
            Some(true) => status.push_str(&format!(
                " (warning: module did not refresh after SIG{}, sent SIG{} reload)",
                config.refresh_signal, config.reload_signal
            )),
            Some(false) => status.push_str(&format!(
                " (warning: module did not refresh after SIG{} and SIG{} reload failed)",
                config.refresh_signal, config.reload_signal
            )),
            None => {}
        }
        if !mode_ok {
            status.push_str(" (warning: failed to switch waybar to notification mode)");
        }
        Ok(status)
    }

    /// Cancel the pending revert and restore the ready payload now.
    pub async fn clear(&self) -> Result<String> {
        let _ops = self.inner.ops.lock().await;
        self.revert.cancel();
        self.inner.revert().await?;
        Ok("Waybar message cleared".to_string())
    }

    pub async fn wait_pending(&self) {
        self.revert.wait().await;
    }
}
