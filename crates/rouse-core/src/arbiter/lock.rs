//! Single-flight guard with bounded hold time
//!
//! At most one acquisition holds the guard. Each hold gets a fresh ticket so
//! a late release from an earlier hold cannot free a newer one. A hold older
//! than the timeout is treated as abandoned and can be taken over, so a stuck
//! acquisition never blocks every future wake event.
//!
//! The guard measures age with the caller-supplied `now`, the same clock the
//! arbiter uses for early-delivery checks.

use chrono::NaiveDateTime;

/// Proof of holding the guard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlightTicket(u64);

#[derive(Debug, Clone, Copy)]
struct Hold {
    ticket: FlightTicket,
    since: NaiveDateTime,
}

#[derive(Debug)]
pub struct SingleFlight {
    hold: Option<Hold>,
    timeout: chrono::Duration,
    next_ticket: u64,
}

impl SingleFlight {
    pub fn new(timeout: chrono::Duration) -> Self {
        Self {
            hold: None,
            timeout,
            next_ticket: 1,
        }
    }

    /// Take the guard, or `None` while a live hold exists
    pub fn try_acquire(&mut self, now: NaiveDateTime) -> Option<FlightTicket> {
        if let Some(hold) = self.hold {
            if !self.expired(hold, now) {
                return None;
            }
            log::warn!(
                "[SingleFlight] Hold {:?} exceeded {}ms, taking over",
                hold.ticket,
                self.timeout.num_milliseconds()
            );
        }

        let ticket = FlightTicket(self.next_ticket);
        self.next_ticket += 1;
        self.hold = Some(Hold { ticket, since: now });
        Some(ticket)
    }

    /// Release a hold. Stale tickets are ignored and return false.
    pub fn release(&mut self, ticket: FlightTicket) -> bool {
        match self.hold {
            Some(hold) if hold.ticket == ticket => {
                self.hold = None;
                true
            }
            _ => false,
        }
    }

    /// Whether `ticket` is still the current hold (expired or not)
    pub fn owns(&self, ticket: FlightTicket) -> bool {
        self.hold.map(|h| h.ticket == ticket).unwrap_or(false)
    }

    /// Whether a live (unexpired) hold exists at `now`
    pub fn is_held(&self, now: NaiveDateTime) -> bool {
        self.hold.map(|h| !self.expired(h, now)).unwrap_or(false)
    }

    fn expired(&self, hold: Hold, now: NaiveDateTime) -> bool {
        now - hold.since >= self.timeout
    }
}
