//! Ordered outbound command queue.
//!
//! The control loop never waits on the trainer: it pushes commands here and a
//! single worker task writes them one at a time, each write waiting for the
//! trainer's acknowledgement.

use crate::ride::session::SessionEvent;
use crate::sensors::ftms::{encode_command, ControlCommand};
use crate::sensors::transport::TrainerTransport;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, Notify};

/// FIFO of pending control commands.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    pending: Mutex<VecDeque<ControlCommand>>,
    notify: Notify,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn pending(&self) -> MutexGuard<'_, VecDeque<ControlCommand>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a command.
    ///
    /// A simulation update replaces one still waiting at the tail, so the
    /// trainer never works through stale grades.
    pub fn push(&self, command: ControlCommand) {
        {
            let mut pending = self.pending();
            let replaces_tail = matches!(command, ControlCommand::SetSimulationParameters { .. })
                && matches!(
                    pending.back(),
                    Some(ControlCommand::SetSimulationParameters { .. })
                );
            if replaces_tail {
                pending.pop_back();
                tracing::trace!("Replacing pending SIM command");
            }
            pending.push_back(command);
        }
        self.notify.notify_one();
    }

    pub fn push_all(&self, commands: impl IntoIterator<Item = ControlCommand>) {
        for command in commands {
            self.push(command);
        }
    }

    /// Drop everything not yet written.
    pub fn clear(&self) {
        self.pending().clear();
    }

    pub fn len(&self) -> usize {
        self.pending().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending().is_empty()
    }

    fn pop(&self) -> Option<ControlCommand> {
        self.pending().pop_front()
    }

    /// Wait for the next command.
    pub async fn next(&self) -> ControlCommand {
        loop {
            if let Some(command) = self.pop() {
                return command;
            }
            self.notify.notified().await;
        }
    }
}

/// Drain the queue into the transport until the task is aborted.
///
/// A failed write drops the command and reports it; the next periodic
/// command supersedes it.
pub async fn run_worker(
    queue: Arc<OutboundQueue>,
    transport: Arc<dyn TrainerTransport>,
    events: mpsc::Sender<SessionEvent>,
) {
    loop {
        let command = queue.next().await;
        let frame = encode_command(&command);

        match transport.write(&frame).await {
            Ok(()) => tracing::debug!("Sent {:?}", command),
            Err(e) => {
                tracing::warn!("Dropping {:?}: {}", command, e);
                let event = SessionEvent::CommandFailed {
                    command,
                    error: e.to_string(),
                };
                if events.send(event).await.is_err() {
                    return;
                }
            }
        }
    }
}
