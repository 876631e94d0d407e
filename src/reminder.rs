//! Reminder scheduler.
//!
//! One deferred, cancellable delivery per open requisition, keyed by its
//! message handle. Arming an already-armed key replaces the pending timer
//! silently; cancelling an absent or already-fired key is a logged no-op.
//! Reminders live only in this process: on shutdown they are abandoned.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::gateway::Gateway;
use crate::requisition::{MessageHandle, ParticipantId};

/// What a fired reminder delivers.
#[derive(Debug, Clone)]
pub struct Reminder {
    pub requester: ParticipantId,
    pub text: String,
}

struct Entry {
    generation: u64,
    token: CancellationToken,
    task: JoinHandle<()>,
}

pub struct ReminderScheduler {
    gateway: Arc<dyn Gateway>,
    tasks: Arc<Mutex<HashMap<MessageHandle, Entry>>>,
    generation: std::sync::atomic::AtomicU64,
}

impl ReminderScheduler {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self {
            gateway,
            tasks: Arc::new(Mutex::new(HashMap::new())),
            generation: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Schedule one delivery of `reminder` after `delay`, replacing any
    /// timer already armed for this key.
    pub fn arm(&self, key: MessageHandle, delay: Duration, reminder: Reminder) {
        let generation = self
            .generation
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let token = CancellationToken::new();

        let task = tokio::spawn({
            let token = token.clone();
            let tasks = Arc::clone(&self.tasks);
            let gateway = Arc::clone(&self.gateway);
            async move {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }

                // Fired: drop our own entry so a later cancel is a no-op,
                // unless a re-arm already took the slot.
                {
                    let mut tasks = tasks.lock().unwrap_or_else(|e| e.into_inner());
                    if tasks
                        .get(&key)
                        .is_some_and(|entry| entry.generation == generation)
                    {
                        tasks.remove(&key);
                    }
                }

                if let Err(e) = gateway.send_direct(reminder.requester, &reminder.text).await {
                    warn!(%key, error = %e, "failed to deliver reminder");
                }
            }
        });

        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = tasks.insert(
            key,
            Entry {
                generation,
                token,
                task,
            },
        ) {
            debug!(%key, "replaced armed reminder");
            previous.token.cancel();
        }
    }

    /// Stop a pending delivery. Cancelling an absent or already-fired key
    /// is a logged no-op, never an error.
    pub fn cancel(&self, key: MessageHandle) {
        let entry = {
            let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            tasks.remove(&key)
        };
        match entry {
            Some(entry) => {
                entry.token.cancel();
                info!(%key, "cancelled reminder");
            }
            None => info!(%key, "no armed reminder to cancel"),
        }
    }

    /// Abandon all armed reminders without delivering them.
    pub fn shutdown(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        for (key, entry) in tasks.drain() {
            debug!(%key, "abandoning armed reminder");
            entry.token.cancel();
            entry.task.abort();
        }
    }

    #[cfg(test)]
    fn armed_count(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }
}
