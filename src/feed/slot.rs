use std::future::Future;
use tokio::task::JoinHandle;

/// Identifies one operation started in a [`RequestSlot`].
///
/// The operation carries its ticket into its completion event; the owner
/// asks the slot whether the ticket is still current before applying it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotTicket {
    generation: u64,
}

impl SlotTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Holds at most one in-flight operation for one logical channel.
///
/// Starting an operation aborts the task of the previous one and advances
/// the generation, so a completion event that was already queued when the
/// previous operation was superseded no longer matches.
#[derive(Debug, Default)]
pub struct RequestSlot {
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

impl RequestSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel whatever the slot holds and spawn `operation`.
    ///
    /// `operation` receives the ticket for this run and must report its
    /// result tagged with it. Requires a running tokio runtime.
    pub fn start<F, Fut>(&mut self, operation: F) -> SlotTicket
    where
        F: FnOnce(SlotTicket) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            tracing::debug!(generation = self.generation, "Aborted superseded request");
        }
        self.generation = self.generation.wrapping_add(1);
        let ticket = SlotTicket {
            generation: self.generation,
        };
        self.handle = Some(tokio::spawn(operation(ticket)));
        ticket
    }

    /// Cancel the held operation, if any. Returns whether one was held.
    pub fn cancel(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) => {
                handle.abort();
                self.generation = self.generation.wrapping_add(1);
                tracing::debug!(generation = self.generation, "Cancelled in-flight request");
                true
            }
            None => false,
        }
    }

    /// Whether `ticket` names the operation the slot currently holds.
    pub fn is_current(&self, ticket: SlotTicket) -> bool {
        self.handle.is_some() && ticket.generation == self.generation
    }

    /// Mark the operation named by `ticket` as completed.
    ///
    /// Returns `false` for a superseded or already-finished ticket, in
    /// which case its result must be discarded.
    pub fn finish(&mut self, ticket: SlotTicket) -> bool {
        if !self.is_current(ticket) {
            return false;
        }
        self.handle = None;
        true
    }

    /// Whether an operation has been started and not yet finished.
    pub fn in_flight(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for RequestSlot {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
