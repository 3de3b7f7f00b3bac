//! The single message-driven actor every persona runs as.
//!
//! Each persona owns exactly one inbox, drained by one task; all of a
//! persona's mutable bookkeeping (`Accumulator`, `SyncLog`s, timers, churn
//! guard) is private to that task. `KeyedDb`, `CacheHandler`, and
//! `Dispatcher` are the only collaborators shared across personas, and they
//! are `Arc`-wrapped with their own internal synchronisation — this is the
//! whole of the single-actor-per-persona redesign: no other mutex is
//! reachable from outside the owning task.

use tokio::sync::mpsc;
use vault_types::Envelope;

/// A persona's message-handling core. `handle_message` runs sequentially —
/// one message at a time, never reentered — so it may freely mutate its own
/// state without additional locking.
pub trait PersonaService: Send + 'static {
    type Message: Send;

    fn handle_message(&mut self, envelope: Envelope<Self::Message>);
}

/// Wraps a [`PersonaService`] in its own inbox and task loop.
pub struct PersonaActor<P: PersonaService> {
    service: P,
    inbox: mpsc::UnboundedReceiver<Envelope<P::Message>>,
}

impl<P: PersonaService> PersonaActor<P> {
    /// Builds an actor around `service`, returning it paired with the
    /// sender half other components use to post inbound messages.
    pub fn new(service: P) -> (Self, mpsc::UnboundedSender<Envelope<P::Message>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { service, inbox: rx }, tx)
    }

    /// Drains the inbox until every sender half is dropped.
    pub async fn run(mut self) {
        while let Some(envelope) = self.inbox.recv().await {
            self.service.handle_message(envelope);
        }
    }

    /// Exposes the inner service for tests that want to drive it directly
    /// without going through the channel.
    pub fn into_inner(self) -> P {
        self.service
    }
}
