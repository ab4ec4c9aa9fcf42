//! Transport engine seam.
//!
//! The client cores never speak the wire protocol themselves. They hand
//! decoded [`Request`]s to a [`Transport`] and receive [`Event`]s back through
//! the [`EventSender`] given to [`Transport::open`]. Broker discovery,
//! framing, compression, TLS/SASL and leader routing all live behind this
//! trait.
//!
//! [`mock::MockCluster`] is an in-memory engine that implements the same
//! contract, used by the test suite and benchmarks.
//!
//! [`Event`]: crate::event::Event

pub mod mock;
mod request;
mod response;

pub use request::*;
pub use response::*;

use crate::config::ClientConfig;
use crate::error::Result;
use crate::event::EventSender;

/// A handle to a transport engine, one per client instance.
///
/// Implementations must not invoke application code: everything they report
/// goes through the event sender, to be dispatched by the client's `poll`.
pub trait Transport: Send + Sync {
    /// Start the engine. Responses and engine events are pushed to `events`.
    fn open(&self, config: &ClientConfig, events: EventSender) -> Result<()>;

    /// Queue a request. Must not block on the network.
    fn submit(&self, request: Request) -> Result<()>;

    /// Stop the engine. Outstanding requests may be dropped without a response.
    fn close(&self);
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn open(&self, config: &ClientConfig, events: EventSender) -> Result<()> {
        (**self).open(config, events)
    }

    fn submit(&self, request: Request) -> Result<()> {
        (**self).submit(request)
    }

    fn close(&self) {
        (**self).close()
    }
}
