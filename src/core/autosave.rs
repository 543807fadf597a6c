//! Debounced background saving of the open chat.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::history::{ChatContext, ChatHistoryManager};

pub const DEFAULT_AUTOSAVE_DELAY: Duration = Duration::from_millis(500);

/// Supplies the settings stored next to each snapshot at save time.
pub type ContextSource = Arc<dyn Fn() -> ChatContext + Send + Sync>;

/// Saves the chat once the buffer has been quiet for `delay`. Each change
/// restarts the timer, so a burst of streamed tokens produces one write.
pub struct Autosave {
    manager: Arc<ChatHistoryManager>,
    context: ContextSource,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl Autosave {
    pub fn spawn(
        manager: Arc<ChatHistoryManager>,
        context: ContextSource,
        delay: Duration,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let changes = manager.buffer().subscribe();
        let task = tokio::spawn(run(
            Arc::clone(&manager),
            Arc::clone(&context),
            changes,
            delay,
            shutdown.clone(),
        ));
        Self {
            manager,
            context,
            shutdown,
            task,
        }
    }

    /// Save immediately, regardless of any pending timer.
    pub fn flush(&self) {
        self.manager.save_current_chat(&(self.context)());
    }

    /// Stop the timer task and write a final snapshot.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(err) = self.task.await {
            warn!("autosave task ended abnormally: {err}");
        }
        self.manager.save_current_chat(&(self.context)());
    }
}

async fn run(
    manager: Arc<ChatHistoryManager>,
    context: ContextSource,
    mut changes: watch::Receiver<u64>,
    delay: Duration,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            changed = changes.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                changed = changes.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                _ = tokio::time::sleep(delay) => {
                    debug!("autosaving chat");
                    manager.save_current_chat(&context());
                    break;
                }
            }
        }
    }
}
