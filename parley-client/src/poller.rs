//! Periodic polling of room state.
//!
//! The server never pushes history or directory changes on its own; a
//! client that wants to stay current asks for them on a fixed cadence. The
//! poller only sends. Replies arrive on the connection like any other.

use crate::connection::CommandSender;
use parley_protocol::Command;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Delay before the first poll.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(1);

/// Interval between polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(400);

/// Commands sent on every tick, in order.
const POLL_COMMANDS: [Command; 3] = [
    Command::RequestText,
    Command::RequestUsers,
    Command::RequestChatRooms,
];

/// Poller configuration.
#[derive(Debug, Clone, Copy)]
pub struct PollerConfig {
    pub initial_delay: Duration,
    pub interval: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            initial_delay: DEFAULT_INITIAL_DELAY,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Handle to a running poll task. Dropping it stops the task.
pub struct Poller {
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl Poller {
    /// Starts polling through `sender`.
    pub fn spawn(sender: CommandSender, config: PollerConfig) -> Self {
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(poll_loop(sender, config, stop_rx));
        Self {
            stop: Some(stop_tx),
            task: Some(task),
        }
    }

    /// Returns whether the poll task is still running.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stops polling and waits for the task to finish.
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn poll_loop(sender: CommandSender, config: PollerConfig, mut stop: oneshot::Receiver<()>) {
    tokio::select! {
        _ = tokio::time::sleep(config.initial_delay) => {}
        _ = &mut stop => return,
    }

    let mut interval = tokio::time::interval(config.interval);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                for command in &POLL_COMMANDS {
                    if let Err(e) = sender.send(command).await {
                        tracing::debug!("Poller stopping: {}", e);
                        return;
                    }
                }
            }
            _ = &mut stop => {
                tracing::debug!("Poller stopped");
                return;
            }
        }
    }
}
