//! Owned background tasks and the tickets that identify them.

use std::fmt;
use std::future::Future;
use tokio::task::JoinHandle;

/// Aborts its task when dropped.
///
/// Every timer, poll loop and connection task the controller starts lives in
/// one of these, so releasing the owner releases the task on every path.
#[derive(Debug)]
pub struct TaskGuard {
    handle: JoinHandle<()>,
}

impl TaskGuard {
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        TaskGuard {
            handle: tokio::spawn(future),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn abort(&self) {
        self.handle.abort();
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Identity of one owned resource. Events carrying a ticket that is no longer
/// held by the controller are stale and get dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket(u64);

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Issues tickets that are never reused within one controller.
#[derive(Debug, Default)]
pub struct TicketCounter {
    next: u64,
}

impl TicketCounter {
    pub fn issue(&mut self) -> Ticket {
        self.next += 1;
        Ticket(self.next)
    }
}

/// A resource paired with the ticket it was issued under.
#[derive(Debug)]
pub struct Owned<T> {
    pub ticket: Ticket,
    pub resource: T,
}

impl<T> Owned<T> {
    pub fn new(ticket: Ticket, resource: T) -> Self {
        Owned { ticket, resource }
    }
}

/// True if `slot` currently holds the resource issued under `ticket`.
pub fn holds<T>(slot: &Option<Owned<T>>, ticket: Ticket) -> bool {
    slot.as_ref().is_some_and(|owned| owned.ticket == ticket)
}
