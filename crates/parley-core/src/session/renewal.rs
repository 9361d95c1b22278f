//! Singleflight gate for credential renewal.
//!
//! The first caller that needs a renewal becomes the leader and performs the
//! refresh call; everyone arriving while it is in flight becomes a follower
//! and waits on a `watch` channel for the leader's outcome. The slot is a
//! plain `std::sync::Mutex` held only to join or finish a flight, never
//! across an `.await`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use parley_types::ClientError;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// New access token, or the error every waiter receives.
pub(crate) type RenewalOutcome = Result<String, ClientError>;

struct Flight {
    id: u64,
    tx: watch::Sender<Option<RenewalOutcome>>,
    cancel: CancellationToken,
}

#[derive(Default)]
pub(crate) struct RenewalGate {
    slot: Mutex<Option<Flight>>,
    next_id: AtomicU64,
}

pub(crate) enum Joined<'a> {
    Leader(RenewalTicket<'a>),
    Follower(RenewalWaiter),
}

impl RenewalGate {
    fn lock(&self) -> MutexGuard<'_, Option<Flight>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Join the in-flight renewal, or start one.
    pub(crate) fn join(&self) -> Joined<'_> {
        let mut slot = self.lock();
        if let Some(flight) = slot.as_ref() {
            return Joined::Follower(RenewalWaiter {
                rx: flight.tx.subscribe(),
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, _rx) = watch::channel(None);
        let cancel = CancellationToken::new();
        *slot = Some(Flight {
            id,
            tx,
            cancel: cancel.clone(),
        });
        Joined::Leader(RenewalTicket {
            gate: self,
            id,
            cancel,
            finished: false,
        })
    }

    pub(crate) fn in_flight(&self) -> bool {
        self.lock().is_some()
    }

    /// Fail the in-flight renewal's waiters with `error` and cancel its leader.
    ///
    /// Returns whether a renewal was in flight.
    pub(crate) fn abort(&self, error: ClientError) -> bool {
        let flight = self.lock().take();
        match flight {
            Some(flight) => {
                flight.cancel.cancel();
                flight.tx.send_replace(Some(Err(error)));
                true
            }
            None => false,
        }
    }

    fn finish(&self, id: u64, outcome: RenewalOutcome) -> bool {
        let flight = {
            let mut slot = self.lock();
            match slot.as_ref() {
                Some(flight) if flight.id == id => slot.take(),
                _ => None,
            }
        };
        match flight {
            Some(flight) => {
                flight.tx.send_replace(Some(outcome));
                true
            }
            None => false,
        }
    }
}

/// Held by the leader of a renewal. Dropping it unfinished releases the
/// followers with an error.
pub(crate) struct RenewalTicket<'a> {
    gate: &'a RenewalGate,
    id: u64,
    cancel: CancellationToken,
    finished: bool,
}

impl RenewalTicket<'_> {
    /// Cancelled when the flight is aborted by logout.
    pub(crate) fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Publish the outcome to every follower.
    ///
    /// Returns false if the flight was aborted first; the followers then
    /// already hold the abort error.
    pub(crate) fn complete(mut self, outcome: RenewalOutcome) -> bool {
        self.finished = true;
        self.gate.finish(self.id, outcome)
    }
}

impl Drop for RenewalTicket<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.gate.finish(self.id, Err(abandoned()));
        }
    }
}

pub(crate) struct RenewalWaiter {
    rx: watch::Receiver<Option<RenewalOutcome>>,
}

impl RenewalWaiter {
    pub(crate) async fn outcome(mut self) -> RenewalOutcome {
        let outcome = match self.rx.wait_for(Option::is_some).await {
            Ok(value) => (*value).clone(),
            Err(_) => None,
        };
        outcome.unwrap_or_else(|| Err(abandoned()))
    }
}

fn abandoned() -> ClientError {
    ClientError::Auth("credential renewal was abandoned".to_string())
}
