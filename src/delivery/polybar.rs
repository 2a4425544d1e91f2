//! Polybar channel
//!
//! Tries a polybar-msg hook first, then the pipe/file pair a custom module can
//! poll, then the X root window name as a last resort.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

use super::revert::RevertSlot;
use super::{run_checked, CommandRunner};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolybarMessageOptions {
    pub duration_seconds: u64,
    pub color: String,
    pub background: String,
}

/// Polybar連携設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolybarConfig {
    /// polybar-msg hook 対象のモジュール名
    #[serde(default = "default_module_name")]
    pub module_name: String,
    /// モジュールが読むメッセージファイル
    #[serde(default = "default_message_path")]
    pub message_path: PathBuf,
    /// 名前付きパイプ（存在する場合のみ書き込む）
    #[serde(default = "default_pipe_path")]
    pub pipe_path: PathBuf,
    #[serde(default = "default_duration_seconds")]
    pub duration_seconds: u64,
    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default = "default_background")]
    pub background: String,
}

fn default_module_name() -> String {
    "polybar-notification-mcp".to_string()
}

fn default_message_path() -> PathBuf {
    PathBuf::from("/tmp/polybar-mcp-message")
}

fn default_pipe_path() -> PathBuf {
    PathBuf::from("/tmp/polybar-mcp-pipe")
}

fn default_duration_seconds() -> u64 {
    5
}

fn default_color() -> String {
    "#ffffff".to_string()
}

fn default_background() -> String {
    "#000000".to_string()
}

impl Default for PolybarConfig {
    fn default() -> Self {
        Self {
            module_name: default_module_name(),
            message_path: default_message_path(),
            pipe_path: default_pipe_path(),
            duration_seconds: default_duration_seconds(),
            color: default_color(),
            background: default_background(),
        }
    }
}

impl PolybarConfig {
    /// 設定値をデフォルトにしたオプション
    pub fn default_options(&self) -> PolybarMessageOptions {
        PolybarMessageOptions {
            duration_seconds: self.duration_seconds,
            color: self.color.clone(),
            background: self.background.clone(),
        }
    }
}

/// Record written to the pipe/file pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolybarRecord {
    pub message: String,
    pub color: String,
    pub background: String,
    pub duration: u64,
    pub timestamp: i64,
}

impl PolybarRecord {
    fn new(message: &str, options: &PolybarMessageOptions, duration: u64) -> Self {
        Self {
            message: message.to_string(),
            color: options.color.clone(),
            background: options.background.clone(),
            duration,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// 試行順の配信方法
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PolybarMethod {
    Hook,
    Files,
    RootName,
}

impl PolybarMethod {
    fn writes_message_file(self) -> bool {
        matches!(self, PolybarMethod::Hook | PolybarMethod::Files)
    }
}

const METHODS: [PolybarMethod; 3] = [
    PolybarMethod::Hook,
    PolybarMethod::Files,
    PolybarMethod::RootName,
];

fn write_message_file(path: &Path, content: &str) -> Result<()> {
    std::fs::write(path, format!("{}\n", content))
        .with_context(|| format!("Failed to write {}", path.display()))
}

/// Best-effort write to the pipe. A FIFO without a reader is skipped instead of blocking.
async fn write_pipe(path: &Path, content: &str) {
    let file_type = match std::fs::metadata(path) {
        Ok(meta) => meta.file_type(),
        Err(_) => return,
    };
    let line = format!("{}\n", content);

    let result = if file_type.is_fifo() {
        match tokio::net::unix::pipe::OpenOptions::new().open_sender(path) {
            Ok(mut sender) => sender.write_all(line.as_bytes()).await,
            Err(e) => Err(e),
        }
    } else if file_type.is_file() {
        std::fs::write(path, line)
    } else {
        return;
    };

    if let Err(e) = result {
        tracing::debug!("Skipped polybar pipe {}: {}", path.display(), e);
    }
}

struct PolybarInner {
    config: PolybarConfig,
    runner: Arc<dyn CommandRunner>,
    /// 表示中のメッセージを出した方法。表示とリバートはこのロックで直列化する
    shown: tokio::sync::Mutex<Option<(PolybarMethod, PolybarMessageOptions)>>,
}

impl PolybarInner {
    fn hook_args(&self, hook: u8) -> Vec<String> {
        vec![
            "hook".to_string(),
            self.config.module_name.clone(),
            hook.to_string(),
        ]
    }

    async fn deliver(
        &self,
        method: PolybarMethod,
        message: &str,
        options: &PolybarMessageOptions,
    ) -> Result<String> {
        match method {
            PolybarMethod::Hook => {
                run_checked(self.runner.as_ref(), "polybar-msg", &self.hook_args(1)).await?;
                let content = serde_json::json!({ "message": message }).to_string();
                write_message_file(&self.config.message_path, &content)?;
                Ok(format!(
                    "Message sent to polybar via polybar-msg (duration: {}s)",
                    options.duration_seconds
                ))
            }
            PolybarMethod::Files => {
                let record = PolybarRecord::new(message, options, options.duration_seconds);
                let content = serde_json::to_string(&record)?;
                write_pipe(&self.config.pipe_path, &content).await;
                write_message_file(&self.config.message_path, &content)?;
                Ok("Message written to polybar communication files".to_string())
            }
            PolybarMethod::RootName => {
                let name = format!("{} [{}]", message, chrono::Local::now().format("%H:%M:%S"));
                run_checked(
                    self.runner.as_ref(),
                    "xsetroot",
                    &["-name".to_string(), name],
                )
                .await?;
                Ok(format!(
                    "Message set via xsetroot (duration: {}s)",
                    options.duration_seconds
                ))
            }
        }
    }

    /// Undo what `method` displayed. The message file is left alone when
    /// `keep_message_file` is set because a newer message already owns it.
    async fn revert(
        &self,
        method: PolybarMethod,
        options: &PolybarMessageOptions,
        keep_message_file: bool,
    ) -> Result<()> {
        match method {
            PolybarMethod::Hook => {
                if !keep_message_file {
                    let content = serde_json::json!({ "message": "" }).to_string();
                    write_message_file(&self.config.message_path, &content)?;
                }
                run_checked(self.runner.as_ref(), "polybar-msg", &self.hook_args(2)).await?;
            }
            PolybarMethod::Files => {
                let record = PolybarRecord::new("", options, 0);
                let content = serde_json::to_string(&record)?;
                write_pipe(&self.config.pipe_path, &content).await;
                if !keep_message_file {
                    write_message_file(&self.config.message_path, &content)?;
                }
            }
            PolybarMethod::RootName => {
                run_checked(
                    self.runner.as_ref(),
                    "xsetroot",
                    &["-name".to_string(), String::new()],
                )
                .await?;
            }
        }
        Ok(())
    }
}

pub struct PolybarChannel {
    inner: Arc<PolybarInner>,
    revert: RevertSlot,
}

impl PolybarChannel {
    pub fn new(config: PolybarConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            inner: Arc::new(PolybarInner {
                config,
                runner,
                shown: tokio::sync::Mutex::new(None),
            }),
            revert: RevertSlot::new("polybar"),
        }
    }

    pub fn default_options(&self) -> PolybarMessageOptions {
        self.inner.config.default_options()
    }

    /// Display `message`, trying each delivery method in order, and arm the cleanup.
    ///
    /// When the previous message went out through a different method, its
    /// leftovers are cleaned up right away since the new cleanup will not
    /// touch them. If every method fails, the previous message and its
    /// pending cleanup stay as they were.
    pub async fn display(&self, message: &str, options: &PolybarMessageOptions) -> Result<String> {
        let mut shown = self.inner.shown.lock().await;
        let mut last_error = None;

        for method in METHODS {
            match self.inner.deliver(method, message, options).await {
                Ok(status) => {
                    tracing::info!(?method, "Polybar message displayed");
                    self.revert.cancel();

                    if let Some((previous, previous_options)) = shown.take() {
                        if previous != method {
                            let keep = method.writes_message_file();
                            if let Err(e) =
                                self.inner.revert(previous, &previous_options, keep).await
                            {
                                tracing::warn!(
                                    ?previous,
                                    "Error cleaning up superseded polybar message: {:#}",
                                    e
                                );
                            }
                        }
                    }
                    *shown = Some((method, options.clone()));

                    let inner = self.inner.clone();
                    self.revert.schedule(
                        Duration::from_secs(options.duration_seconds),
                        async move {
                            let mut shown = inner.shown.lock().await;
                            if let Some((method, options)) = shown.take() {
                                if let Err(e) = inner.revert(method, &options, false).await {
                                    tracing::warn!("Error cleaning up polybar message: {:#}", e);
                                }
                            }
                        },
                    );
                    return Ok(status);
                }
                Err(e) => {
                    tracing::warn!(?method, "Polybar method failed: {:#}", e);
                    last_error = Some(e);
                }
            }
        }

        let last = last_error
            .map(|e| format!("{:#}", e))
            .unwrap_or_default();
        anyhow::bail!(
            "Failed to display polybar message: All polybar methods failed. Last error: {}",
            last
        )
    }

    pub fn has_pending_revert(&self) -> bool {
        self.revert.is_pending()
    }

    pub async fn wait_pending(&self) {
        self.revert.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::FakeRunner;
    use super::*;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> PolybarConfig {
        PolybarConfig {
            message_path: dir.path().join("message"),
            pipe_path: dir.path().join("pipe"),
            ..PolybarConfig::default()
        }
    }

    fn read_json(path: &Path) -> serde_json::Value {
        serde_json::from_str(std::fs::read_to_string(path).unwrap().trim()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_hook_delivery_and_cleanup() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::new());
        let channel = PolybarChannel::new(config(&dir), runner.clone());

        let status = channel
            .display("it's done", &channel.default_options())
            .await
            .unwrap();
        assert_eq!(status, "Message sent to polybar via polybar-msg (duration: 5s)");
        assert_eq!(read_json(&dir.path().join("message"))["message"], "it's done");
        assert_eq!(
            runner.calls_for("polybar-msg"),
            vec![vec!["hook", "polybar-notification-mcp", "1"]]
        );

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(read_json(&dir.path().join("message"))["message"], "");
        assert_eq!(runner.calls_for("polybar-msg")[1][2], "2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_falls_back_to_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("pipe"), "").unwrap();
        let runner = Arc::new(FakeRunner::new());
        runner.missing("polybar-msg");
        let channel = PolybarChannel::new(config(&dir), runner.clone());

        let options = PolybarMessageOptions {
            duration_seconds: 2,
            color: "#ff0000".to_string(),
            background: "#222222".to_string(),
        };
        let status = channel.display("hello", &options).await.unwrap();
        assert_eq!(status, "Message written to polybar communication files");

        for name in ["message", "pipe"] {
            let record = read_json(&dir.path().join(name));
            assert_eq!(record["message"], "hello");
            assert_eq!(record["color"], "#ff0000");
            assert_eq!(record["duration"], 2);
        }

        tokio::time::sleep(Duration::from_secs(3)).await;
        let record = read_json(&dir.path().join("message"));
        assert_eq!(record["message"], "");
        assert_eq!(record["duration"], 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_falls_back_to_xsetroot() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::new());
        runner.fail_with("polybar-msg", 1, "no polybar");
        // a directory cannot be written as a file
        let cfg = PolybarConfig {
            message_path: dir.path().to_path_buf(),
            ..config(&dir)
        };
        let channel = PolybarChannel::new(cfg, runner.clone());

        let status = channel.display("hi", &channel.default_options()).await.unwrap();
        assert_eq!(status, "Message set via xsetroot (duration: 5s)");
        let calls = runner.calls_for("xsetroot");
        assert_eq!(calls[0][0], "-name");
        assert!(calls[0][1].starts_with("hi ["));

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(runner.calls_for("xsetroot")[1], vec!["-name", ""]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hook_after_files_clears_stale_pipe() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("pipe"), "").unwrap();
        let runner = Arc::new(FakeRunner::new());
        runner.missing("polybar-msg");
        let channel = PolybarChannel::new(config(&dir), runner.clone());

        let status = channel.display("A", &channel.default_options()).await.unwrap();
        assert_eq!(status, "Message written to polybar communication files");
        assert_eq!(read_json(&dir.path().join("pipe"))["message"], "A");

        runner.clear_rules();
        let status = channel.display("B", &channel.default_options()).await.unwrap();
        assert_eq!(status, "Message sent to polybar via polybar-msg (duration: 5s)");
        assert_eq!(read_json(&dir.path().join("pipe"))["message"], "");
        assert_eq!(read_json(&dir.path().join("message"))["message"], "B");

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(read_json(&dir.path().join("message"))["message"], "");
        assert_eq!(
            runner.calls_for("polybar-msg").last().unwrap(),
            &vec!["hook", "polybar-notification-mcp", "2"]
        );
        assert!(!channel.has_pending_revert());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hook_after_xsetroot_resets_root_name() {
        let dir = TempDir::new().unwrap();
        let blocked = dir.path().join("message");
        std::fs::create_dir(&blocked).unwrap();
        let runner = Arc::new(FakeRunner::new());
        runner.fail_with("polybar-msg", 1, "no polybar");
        let channel = PolybarChannel::new(config(&dir), runner.clone());

        let status = channel.display("A", &channel.default_options()).await.unwrap();
        assert_eq!(status, "Message set via xsetroot (duration: 5s)");

        std::fs::remove_dir(&blocked).unwrap();
        runner.clear_rules();
        channel.display("B", &channel.default_options()).await.unwrap();
        assert_eq!(runner.calls_for("xsetroot")[1], vec!["-name", ""]);
        assert_eq!(read_json(&dir.path().join("message"))["message"], "B");

        // only the hook cleanup runs when the timer fires
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(runner.calls_for("xsetroot").len(), 2);
        assert_eq!(read_json(&dir.path().join("message"))["message"], "");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_display_keeps_previous_cleanup() {
        let dir = TempDir::new().unwrap();
        let message = dir.path().join("message");
        let runner = Arc::new(FakeRunner::new());
        let channel = PolybarChannel::new(config(&dir), runner.clone());

        channel.display("A", &channel.default_options()).await.unwrap();

        runner.missing("polybar-msg");
        runner.fail_with("xsetroot", 1, "unable to open display");
        std::fs::remove_file(&message).unwrap();
        std::fs::create_dir(&message).unwrap();
        assert!(channel.display("B", &channel.default_options()).await.is_err());
        assert!(channel.has_pending_revert());

        std::fs::remove_dir(&message).unwrap();
        runner.clear_rules();
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(read_json(&message)["message"], "");
        assert_eq!(
            runner.calls_for("polybar-msg").last().unwrap(),
            &vec!["hook", "polybar-notification-mcp", "2"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_methods_fail() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::new());
        runner.missing("polybar-msg");
        runner.fail_with("xsetroot", 1, "unable to open display");
        let cfg = PolybarConfig {
            message_path: dir.path().to_path_buf(),
            ..config(&dir)
        };
        let channel = PolybarChannel::new(cfg, runner);

        let err = channel
            .display("hi", &channel.default_options())
            .await
            .unwrap_err()
            .to_string();
        assert!(err.starts_with("Failed to display polybar message: All polybar methods failed."));
        assert!(err.contains("unable to open display"));
        assert!(!channel.has_pending_revert());
    }
}
