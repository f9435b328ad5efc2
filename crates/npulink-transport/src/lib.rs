//! Message transport abstraction.
//!
//! The channel between the host and the core subsystem is a single,
//! ordered, message-oriented link with a bounded outgoing buffer:
//! - [`Transport::try_send`] queues one message or reports that the buffer
//!   is momentarily full
//! - inbound messages are pushed to an [`InboundHandler`]
//!
//! This is the lowest layer of npulink. [`MemoryTransport`] is an in-process
//! implementation used for tests and simulation.

pub mod error;
pub mod memory;
pub mod traits;

pub use error::{Result, TransportError};
pub use memory::{
    memory_pair, memory_pair_with_max, CoreEndpoint, MemoryTransport, DEFAULT_CAPACITY,
    DEFAULT_MAX_MESSAGE,
};
pub use traits::{InboundHandler, Transport};
