//! Announcement retry timers: one cancellable one-shot per session id.

use crate::application::runtime::MixerEvent;
use crate::foundation::SessionId;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::trace;

/// Schedules the 10-second announce re-checks. Timers live in memory only;
/// after a restart `resume_tasks` recreates them through `start_task`.
pub struct RetryScheduler {
    events: UnboundedSender<MixerEvent>,
    pending: HashMap<SessionId, JoinHandle<()>>,
}

impl RetryScheduler {
    pub fn new(events: UnboundedSender<MixerEvent>) -> Self {
        Self { events, pending: HashMap::new() }
    }

    /// Arm the timer for `id`, replacing any outstanding one. At most one
    /// timer per session id exists at any moment.
    pub fn schedule(&mut self, id: SessionId, delay: Duration) {
        if let Some(previous) = self.pending.remove(&id) {
            previous.abort();
        }
        let events = self.events.clone();
        trace!(session_id = %id, delay_secs = delay.as_secs(), "announce re-check scheduled");
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(MixerEvent::RetryTick(id));
        });
        self.pending.insert(id, handle);
    }

    pub fn clear(&mut self, id: SessionId) {
        if let Some(handle) = self.pending.remove(&id) {
            handle.abort();
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, handle) in self.pending.drain() {
            handle.abort();
        }
    }

    pub fn is_scheduled(&self, id: SessionId) -> bool {
        self.pending.contains_key(&id)
    }
}

impl Drop for RetryScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
