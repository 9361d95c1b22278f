//! TypingSignal: debounced typing indicators over the realtime link.
//!
//! `start_typing` sends `typing_start` and arms one timer per conversation.
//! If nothing re-arms it before `typing_timeout`, the timer sends
//! `typing_stop` by itself. Re-arming replaces the previous timer.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parley_types::frame::RealtimeFrame;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::realtime::{RealtimeConnection, RealtimeConnector};

struct Timer {
    generation: u64,
    handle: JoinHandle<()>,
}

pub struct TypingSignal<C: RealtimeConnector> {
    connection: RealtimeConnection<C>,
    timeout: Duration,
    timers: Arc<DashMap<String, Timer>>,
    generation: AtomicU64,
}

impl<C: RealtimeConnector> TypingSignal<C> {
    pub fn new(connection: RealtimeConnection<C>, timeout: Duration) -> Self {
        Self {
            connection,
            timeout,
            timers: Arc::new(DashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Announce typing in `conversation_id`. No-op unless the link is open.
    pub async fn start_typing(&self, conversation_id: &str) {
        if !self.connection.is_open() {
            return;
        }
        if let Err(err) = self
            .connection
            .send(&RealtimeFrame::typing_start(conversation_id))
            .await
        {
            debug!(conversation_id, error = %err, "typing_start not sent");
            return;
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        // The entry guard is held until the timer is stored, so the timer
        // task cannot look for itself before it is in the map.
        let entry = self.timers.entry(conversation_id.to_string());
        let handle = tokio::spawn(expire(
            self.connection.clone(),
            Arc::clone(&self.timers),
            conversation_id.to_string(),
            generation,
            self.timeout,
        ));
        let timer = Timer { generation, handle };
        match entry {
            Entry::Occupied(mut occupied) => {
                let previous = occupied.insert(timer);
                previous.handle.abort();
            }
            Entry::Vacant(vacant) => {
                vacant.insert(timer);
            }
        }
    }

    /// Send `typing_stop` now and disarm the timer.
    pub async fn stop_typing(&self, conversation_id: &str) {
        if let Some((_, timer)) = self.timers.remove(conversation_id) {
            timer.handle.abort();
        }
        if !self.connection.is_open() {
            return;
        }
        if let Err(err) = self
            .connection
            .send(&RealtimeFrame::typing_stop(conversation_id))
            .await
        {
            debug!(conversation_id, error = %err, "typing_stop not sent");
        }
    }

    /// Disarm every timer without sending anything.
    pub fn cancel_all(&self) {
        let mut cancelled = 0usize;
        self.timers.retain(|_, timer| {
            timer.handle.abort();
            cancelled += 1;
            false
        });
        if cancelled > 0 {
            debug!(cancelled, "Typing timers cancelled");
        }
    }

    pub fn armed_count(&self) -> usize {
        self.timers.len()
    }

    pub fn is_armed(&self, conversation_id: &str) -> bool {
        self.timers.contains_key(conversation_id)
    }
}

async fn expire<C: RealtimeConnector>(
    connection: RealtimeConnection<C>,
    timers: Arc<DashMap<String, Timer>>,
    conversation_id: String,
    generation: u64,
    timeout: Duration,
) {
    tokio::time::sleep(timeout).await;
    let ours = timers
        .remove_if(&conversation_id, |_, timer| timer.generation == generation)
        .is_some();
    if !ours {
        return;
    }
    if let Err(err) = connection
        .send(&RealtimeFrame::typing_stop(conversation_id.as_str()))
        .await
    {
        debug!(conversation_id = %conversation_id, error = %err, "Automatic typing_stop not sent");
    }
}

impl<C: RealtimeConnector> Drop for TypingSignal<C> {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
