//! The message envelope and authority model.

use serde::{Deserialize, Serialize};

use crate::ids::{GroupId, NodeId};

/// A stable, process-wide unique identifier carried by every inbound/outbound
/// message. Used by the [`Accumulator`](../vault_sync) to dedupe and by the
/// [`DeadlineTimer`](../vault_sync) to route late responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(pub u64);

impl MessageId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

/// Identifies who sent or who should receive a message: a single peer, or a
/// close group speaking with one voice.
///
/// Invariant: any request participating in accumulation must originate as
/// `Authority::Group` whose id matches the logical subject of the request —
/// a lone node cannot forge group consensus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Authority {
    Single(NodeId),
    Group(GroupId),
    /// A partially-joined client relaying through a single peer. Carries
    /// the relay node for sender validation but is never a group authority.
    Relay(NodeId),
}

impl Authority {
    pub fn group_id(&self) -> Option<GroupId> {
        match self {
            Authority::Group(id) => Some(*id),
            _ => None,
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self, Authority::Group(_))
    }
}

/// A typed inter-persona message: stable id, sender/receiver authority, the
/// physical peer that actually transmitted this copy, and an opaque
/// payload.
///
/// `sender` is the logical authority the message claims to speak for (a
/// single node, or a group as a whole); `origin` is the specific peer that
/// relayed this particular copy, which is what accumulation dedupes on —
/// a close group's quorum send produces several copies with the same
/// `sender` but distinct `origin`s.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub id: MessageId,
    pub sender: Authority,
    pub origin: NodeId,
    pub receiver: Authority,
    pub payload: T,
}

impl<T> Envelope<T> {
    pub fn new(id: MessageId, sender: Authority, origin: NodeId, receiver: Authority, payload: T) -> Self {
        Self { id, sender, origin, receiver, payload }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Envelope<U> {
        Envelope {
            id: self.id,
            sender: self.sender,
            origin: self.origin,
            receiver: self.receiver,
            payload: f(self.payload),
        }
    }
}
