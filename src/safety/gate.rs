/// FIFO admission gate for account mutations
///
/// A counting gate with tickets: callers are admitted strictly in arrival
/// order and at most `capacity` hold a permit at once. Owned by the identity
/// manager; nothing else in the crate can reach it.
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
struct GateState {
    in_use: usize,
    capacity: usize,
    next_ticket: u64,
    next_to_admit: u64,
}

#[derive(Debug)]
pub(crate) struct AdmissionGate {
    state: Mutex<GateState>,
    turn: Condvar,
}

/// Held while a mutation runs; releases the slot on drop
#[derive(Debug)]
pub(crate) struct GatePermit<'a> {
    gate: &'a AdmissionGate,
}

impl AdmissionGate {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(GateState {
                in_use: 0,
                capacity: capacity.max(1),
                next_ticket: 0,
                next_to_admit: 0,
            }),
            turn: Condvar::new(),
        }
    }

    // Counters are updated atomically under the lock, so a poisoned guard is still consistent
    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until this caller's ticket comes up and a slot is free
    pub(crate) fn acquire(&self) -> GatePermit<'_> {
        let mut state = self.lock();
        let ticket = state.next_ticket;
        state.next_ticket += 1;

        while ticket != state.next_to_admit || state.in_use >= state.capacity {
            state = self.turn.wait(state).unwrap_or_else(PoisonError::into_inner);
        }

        state.next_to_admit += 1;
        state.in_use += 1;
        drop(state);
        // The next ticket holder may fit in a remaining slot
        self.turn.notify_all();

        GatePermit { gate: self }
    }

    fn release(&self) {
        let mut state = self.lock();
        state.in_use = state.in_use.saturating_sub(1);
        drop(state);
        self.turn.notify_all();
    }

    #[cfg(test)]
    fn in_use(&self) -> usize {
        self.lock().in_use
    }
}

impl Drop for GatePermit<'_> {
    fn drop(&mut self) {
        self.gate.release();
    }
}
