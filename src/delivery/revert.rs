//! Cancellable deferred cleanup shared by the bar channels

use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

/// 1チャンネルにつき高々1つの保留中リバートを保持するスロット
///
/// 新しいリバートを予約すると、前のリバートは実行されずに破棄される。
/// 古い（長い）表示時間のリバートが新しいメッセージを消してしまうのを防ぐ。
pub struct RevertSlot {
    channel: &'static str,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl RevertSlot {
    pub fn new(channel: &'static str) -> Self {
        Self {
            channel,
            pending: Mutex::new(None),
        }
    }

    /// Cancel any pending revert and arm `task` to run after `delay`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule<F>(&self, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = pending.take() {
            if !previous.is_finished() {
                tracing::debug!("{}: superseding pending revert", self.channel);
            }
            previous.abort();
        }

        let channel = self.channel;
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            tracing::debug!("{}: revert timer fired", channel);
            task.await;
        }));
    }

    /// 保留中のリバートを取り消す。取り消した場合 true
    pub fn cancel(&self) -> bool {
        let handle = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match handle {
            Some(handle) if !handle.is_finished() => {
                handle.abort();
                true
            }
            _ => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Wait for the pending revert (if any) to run to completion.
    pub async fn wait(&self) {
        let handle = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    tracing::warn!("{}: revert task failed: {}", self.channel, e);
                }
            }
        }
    }
}

impl Drop for RevertSlot {
    fn drop(&mut self) {
        if let Some(handle) = self
            .pending
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}
