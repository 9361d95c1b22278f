//! MessageLog: the ordered, optimistic conversation log.
//!
//! Local records are keyed by correlation id and server records by server
//! message id. Every mutation is published as a [`LogChange`] while the log
//! lock is held, so subscribers see changes in the order they were applied.
//!
//! Each `clear()` starts a new generation. Work that began under an older
//! generation (a REST send still in flight at logout) can no longer touch
//! the log.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use parley_types::chat::{LogChange, LogRecord, MessageStatus, OutboundMessage, ServerMessage};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::event::EventBus;

#[derive(Default)]
struct LogState {
    records: Vec<LogRecord>,
    server_ids: HashSet<String>,
    generation: u64,
}

impl LogState {
    fn outbound(&self, correlation_id: Uuid) -> Option<&OutboundMessage> {
        self.records.iter().find_map(|record| match record {
            LogRecord::Outbound(message) if message.correlation_id == correlation_id => {
                Some(message)
            }
            _ => None,
        })
    }

    fn outbound_mut(&mut self, correlation_id: Uuid) -> Option<&mut OutboundMessage> {
        self.records.iter_mut().find_map(|record| match record {
            LogRecord::Outbound(message) if message.correlation_id == correlation_id => {
                Some(message)
            }
            _ => None,
        })
    }

    fn position(&self, correlation_id: Uuid) -> Option<usize> {
        self.records
            .iter()
            .position(|record| record.correlation_id() == Some(correlation_id))
    }

    /// Append server messages whose ids are not yet present.
    fn append_unseen(&mut self, messages: Vec<ServerMessage>) -> Vec<ServerMessage> {
        let mut appended = Vec::with_capacity(messages.len());
        for message in messages {
            if self.server_ids.insert(message.id.clone()) {
                self.records.push(LogRecord::Confirmed(message.clone()));
                appended.push(message);
            }
        }
        appended
    }
}

/// How a REST confirmation was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Settlement {
    /// The outstanding record was replaced by the server's messages.
    Reconciled,
    /// The record was already acknowledged; this many messages were new.
    Merged(usize),
    /// A realtime echo removed the record first; nothing changed.
    Superseded,
    /// The log was cleared after the send began; nothing changed.
    Stale,
}

pub struct MessageLog {
    state: Mutex<LogState>,
    changes: EventBus<LogChange>,
}

impl MessageLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(LogState::default()),
            changes: EventBus::new(capacity),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogChange> {
        self.changes.subscribe()
    }

    pub fn snapshot(&self) -> Vec<LogRecord> {
        self.lock().records.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }

    pub fn find(&self, correlation_id: Uuid) -> Option<OutboundMessage> {
        let state = self.lock();
        state.outbound(correlation_id).cloned()
    }

    pub fn status(&self, correlation_id: Uuid) -> Option<MessageStatus> {
        let state = self.lock();
        state.outbound(correlation_id).map(|m| m.status)
    }

    pub fn contains_server_id(&self, id: &str) -> bool {
        self.lock().server_ids.contains(id)
    }

    /// Bumped by every [`clear`](Self::clear).
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Record a freshly created local message and return the generation it
    /// belongs to.
    pub fn push_pending(&self, message: OutboundMessage) -> u64 {
        let mut state = self.lock();
        let record = LogRecord::Outbound(message);
        state.records.push(record.clone());
        self.changes.publish(LogChange::Added { record });
        state.generation
    }

    /// Move a local record forward. Backward or sideways moves are refused.
    pub fn set_status(&self, correlation_id: Uuid, next: MessageStatus) -> bool {
        let mut state = self.lock();
        let Some(message) = state.outbound_mut(correlation_id) else {
            return false;
        };
        if !message.status.can_transition_to(next) {
            let from = message.status;
            debug!(%correlation_id, %from, to = %next, "Refusing status transition");
            return false;
        }
        message.status = next;
        self.changes.publish(LogChange::StatusChanged {
            correlation_id,
            status: next,
        });
        true
    }

    /// Mark a local record `Failed` with a reason.
    pub fn fail(&self, correlation_id: Uuid, reason: &str) -> bool {
        let mut state = self.lock();
        let Some(message) = state.outbound_mut(correlation_id) else {
            return false;
        };
        if !message.status.can_transition_to(MessageStatus::Failed) {
            return false;
        }
        message.status = MessageStatus::Failed;
        message.failure = Some(reason.to_string());
        self.changes.publish(LogChange::StatusChanged {
            correlation_id,
            status: MessageStatus::Failed,
        });
        true
    }

    /// Realtime confirmation: the local record stays and becomes
    /// `Acknowledged`; `replies` are appended after it as separate records.
    /// `echoed` is the server's copy of the local message, remembered so it
    /// is never appended as a duplicate.
    pub fn acknowledge(
        &self,
        correlation_id: Uuid,
        echoed: Option<&ServerMessage>,
        replies: Vec<ServerMessage>,
    ) -> bool {
        let mut state = self.lock();
        let Some(message) = state.outbound_mut(correlation_id) else {
            return false;
        };
        if !message.status.can_transition_to(MessageStatus::Acknowledged) {
            return false;
        }
        message.status = MessageStatus::Acknowledged;
        if let Some(echoed) = echoed {
            state.server_ids.insert(echoed.id.clone());
        }
        self.changes.publish(LogChange::StatusChanged {
            correlation_id,
            status: MessageStatus::Acknowledged,
        });
        for reply in state.append_unseen(replies) {
            self.changes.publish(LogChange::Added {
                record: LogRecord::Confirmed(reply),
            });
        }
        true
    }

    /// REST confirmation: remove exactly the outstanding record with this
    /// correlation id and append the server's messages in server order.
    ///
    /// Returns false (and changes nothing) if no outstanding record matches.
    pub fn reconcile(&self, correlation_id: Uuid, confirmed: Vec<ServerMessage>) -> bool {
        let mut state = self.lock();
        self.reconcile_locked(&mut state, correlation_id, confirmed)
    }

    /// Apply the REST response for a send that began under `generation`.
    ///
    /// Checked and applied under one lock, so a concurrent `clear()` either
    /// wipes the result or makes it [`Settlement::Stale`].
    pub(crate) fn settle(
        &self,
        generation: u64,
        correlation_id: Uuid,
        confirmed: Vec<ServerMessage>,
    ) -> Settlement {
        let mut state = self.lock();
        if state.generation != generation {
            return Settlement::Stale;
        }
        match state.outbound(correlation_id).map(|m| m.status) {
            Some(MessageStatus::Acknowledged) => {
                Settlement::Merged(self.append_locked(&mut state, confirmed))
            }
            Some(status) if status.is_outstanding() => {
                self.reconcile_locked(&mut state, correlation_id, confirmed);
                Settlement::Reconciled
            }
            _ => Settlement::Superseded,
        }
    }

    fn reconcile_locked(
        &self,
        state: &mut LogState,
        correlation_id: Uuid,
        confirmed: Vec<ServerMessage>,
    ) -> bool {
        let Some(index) = state.position(correlation_id) else {
            return false;
        };
        let outstanding = matches!(
            &state.records[index],
            LogRecord::Outbound(message) if message.status.is_outstanding()
        );
        if !outstanding {
            return false;
        }
        state.records.remove(index);
        let confirmed = state.append_unseen(confirmed);
        self.changes.publish(LogChange::Reconciled {
            correlation_id,
            confirmed,
        });
        true
    }

    /// Append server messages that arrived without a matching local record.
    /// Returns how many were new.
    pub fn append_confirmed(&self, messages: Vec<ServerMessage>) -> usize {
        let mut state = self.lock();
        self.append_locked(&mut state, messages)
    }

    fn append_locked(&self, state: &mut LogState, messages: Vec<ServerMessage>) -> usize {
        let appended = state.append_unseen(messages);
        let count = appended.len();
        for message in appended {
            self.changes.publish(LogChange::Added {
                record: LogRecord::Confirmed(message),
            });
        }
        count
    }

    /// Remove a `Failed` record, returning it.
    pub fn remove_failed(&self, correlation_id: Uuid) -> Option<OutboundMessage> {
        let mut state = self.lock();
        let index = state.position(correlation_id)?;
        let failed = matches!(
            &state.records[index],
            LogRecord::Outbound(message) if message.status == MessageStatus::Failed
        );
        if !failed {
            return None;
        }
        let LogRecord::Outbound(message) = state.records.remove(index) else {
            return None;
        };
        self.changes.publish(LogChange::Removed { correlation_id });
        Some(message)
    }

    /// Drop every record and start a new generation, e.g. when the
    /// session ends.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.records.clear();
        state.server_ids.clear();
        state.generation += 1;
        self.changes.publish(LogChange::Cleared);
    }
}

impl std::fmt::Debug for MessageLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageLog")
            .field("records", &self.len())
            .finish()
    }
}
