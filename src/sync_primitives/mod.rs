//! Write mutex
//!
//! A FIFO in-process mutex. Plain `std::sync::Mutex` does not guarantee that
//! waiters are woken in arrival order, but the single-writer contract in the
//! top-level crate documentation requires it: two `write_record` callers must
//! commit in the order they queued, so their sequence numbers, data-file
//! offsets, and WAL positions stay consistent with each other. A ticket lock
//! (a counter protected by `Mutex` + `Condvar`) gives that ordering explicitly.


use std::sync::{Condvar, Mutex};

/// Internal ticket-dispenser state.
struct TicketState {
    next_ticket: u64,
    now_serving: u64,
}

/// A fair, FIFO-ordered mutex.
///
/// Callers call [`TicketMutex::lock`] and receive a [`TicketGuard`]; guards are
/// released (and the next waiter woken) on drop.
pub struct TicketMutex {
    state: Mutex<TicketState>,
    condvar: Condvar,
}

impl Default for TicketMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl TicketMutex {
    /// A fresh, unlocked mutex.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TicketState {
                next_ticket: 0,
                now_serving: 0,
            }),
            condvar: Condvar::new(),
        }
    }

    /// Blocks until this caller is at the front of the FIFO queue, then returns a
    /// guard that releases the mutex (and wakes the next waiter) on drop.
    pub fn lock(&self) -> TicketGuard<'_> {
        let mut state = self.state.lock().expect("ticket mutex poisoned");
        let my_ticket = state.next_ticket;
        state.next_ticket += 1;
        while state.now_serving != my_ticket {
            state = self.condvar.wait(state).expect("ticket mutex poisoned");
        }
        drop(state);
        TicketGuard { mutex: self }
    }
}

/// RAII guard returned by [`TicketMutex::lock`]. Advances the ticket counter and
/// wakes every waiter (only the one now being served proceeds) on drop.
pub struct TicketGuard<'a> {
    mutex: &'a TicketMutex,
}

impl Drop for TicketGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.mutex.state.lock().expect("ticket mutex poisoned");
        state.now_serving += 1;
        self.mutex.condvar.notify_all();
    }
}
