//! Typed outbound sends: every persona hands the dispatcher a message id,
//! an `Authority`, and a serde payload; the dispatcher owns serialisation
//! and sender-group tagging, and never blocks under a caller's lock.

use std::sync::Arc;

use serde::Serialize;
use tracing::{instrument, warn};
use vault_types::{Authority, Envelope, MessageId};

use crate::error::DispatchError;
use crate::router::{GroupSender, Router};

pub struct Dispatcher {
    router: Arc<dyn Router>,
    sender: GroupSender,
}

impl Dispatcher {
    pub fn new(router: Arc<dyn Router>, sender: GroupSender) -> Self {
        Self { router, sender }
    }

    /// Serialises `payload` with `postcard` and hands it to the router,
    /// tagged with this persona's `GroupSender`.
    #[instrument(skip(self, payload), fields(message_id = id.0))]
    pub fn dispatch<T: Serialize>(
        &self,
        id: MessageId,
        receiver: Authority,
        payload: &T,
    ) -> Result<(), DispatchError> {
        let envelope = Envelope::new(id, self.sender.as_authority(), self.sender.self_id, receiver, payload);
        let bytes = postcard::to_allocvec(&envelope).map_err(DispatchError::Encode)?;
        self.router.send(receiver, bytes.into()).map_err(|e| {
            warn!(error = %e, "dispatch send failed");
            e
        })
    }

    pub fn sender(&self) -> GroupSender {
        self.sender
    }
}
