//! Delivery adapters for the notification backends
//!
//! Every backend (popup daemon, Waybar module, Polybar module, Quickshell IPC)
//! is reached only through external commands. The [`CommandRunner`] trait is
//! the seam between the adapters and the operating system so that the
//! fallback and revert logic can be exercised without a desktop session.

pub mod overlay;
pub mod polybar;
pub mod popup;
pub mod revert;
pub mod waybar;

#[cfg(test)]
pub(crate) mod testing;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::app::Config;

pub use overlay::{OverlayChannel, OverlayRequest};
pub use polybar::{PolybarChannel, PolybarMessageOptions};
pub use popup::{PopupChannel, PopupOptions, Urgency};
pub use waybar::{BarDisplayState, BarMessageOptions, BarMode, Severity, WaybarChannel};

/// 外部コマンドの実行結果
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// 終了コード（シグナルで終了した場合は None）
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// 表示用の終了コード
    pub fn code_display(&self) -> String {
        self.code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string())
    }
}

/// 外部コマンド実行の共通インターフェース
///
/// `Err` は起動自体に失敗した場合（バイナリが存在しない等）のみ。
/// 非ゼロ終了は `CommandOutput::code` で表現する。
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String]) -> std::io::Result<CommandOutput>;
}

/// tokio::process による実装
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[String]) -> std::io::Result<CommandOutput> {
        let output = tokio::process::Command::new(program)
            .args(args)
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// Run a command and turn spawn failures and non-zero exits into errors.
pub(crate) async fn run_checked(
    runner: &dyn CommandRunner,
    program: &str,
    args: &[String],
) -> Result<CommandOutput> {
    let output = runner
        .run(program, args)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to execute {}: {}", program, e))?;

    if !output.success() {
        let stderr = output.stderr.trim();
        if stderr.is_empty() {
            anyhow::bail!("{} exited with status {}", program, output.code_display());
        }
        anyhow::bail!(
            "{} exited with status {}: {}",
            program,
            output.code_display(),
            stderr
        );
    }

    Ok(output)
}

/// Owns one instance of every channel for the lifetime of the process.
pub struct DeliveryAdapter {
    pub popup: PopupChannel,
    pub waybar: WaybarChannel,
    pub polybar: PolybarChannel,
    pub overlay: OverlayChannel,
}

impl DeliveryAdapter {
    pub fn new(config: &Config, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            popup: PopupChannel::new(config.popup.clone(), runner.clone()),
            waybar: WaybarChannel::new(config.waybar.clone(), runner.clone()),
            polybar: PolybarChannel::new(config.polybar.clone(), runner.clone()),
            overlay: OverlayChannel::new(config.overlay.clone(), runner),
        }
    }

    pub fn with_system_runner(config: &Config) -> Self {
        Self::new(config, Arc::new(SystemRunner))
    }

    /// 保留中の後片付けタイマーが全て終わるまで待つ（CLI の一発実行用）
    pub async fn wait_pending(&self) {
        self.waybar.wait_pending().await;
        self.polybar.wait_pending().await;
    }
}
