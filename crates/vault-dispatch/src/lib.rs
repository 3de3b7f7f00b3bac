//! Outbound dispatch: the `Router` trait consumed from the routing layer,
//! a typed `Dispatcher` built on top of it, and two in-process test doubles.

mod dispatcher;
mod error;
mod local;
mod router;

pub use dispatcher::Dispatcher;
pub use error::DispatchError;
pub use local::{LocalRouter, SimNode, SimRouter};
pub use router::{GroupSender, Router};
