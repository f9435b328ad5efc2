//! Host-side transaction engine for an NPU core-subsystem link.
//!
//! A [`Device`] owns the link to one core subsystem and multiplexes every
//! request over it:
//! - each outgoing request is registered under a unique transaction id and
//!   the caller blocks until the matching response, a timeout, or teardown
//! - senders park while the transport's outgoing buffer is full and are
//!   woken as inbound traffic frees space
//! - inferences hold their buffers and network until the core subsystem
//!   answers, and can be cancelled while in flight
//!
//! Buffers and networks live in DMA memory obtained from a
//! [`DmaAllocator`]; unrecoverable link failures go to a [`FaultReporter`].

pub mod buffer;
pub mod cancel;
pub mod capabilities;
pub(crate) mod completion;
pub mod config;
pub mod device;
mod dispatch;
pub mod dma;
pub mod error;
pub mod fault;
pub mod inference;
pub mod network;
pub mod network_info;
pub mod registry;
mod sender;
pub mod version;

#[cfg(test)]
mod test_support;

pub use buffer::Buffer;
pub use cancel::CancelStatus;
pub use capabilities::{Capabilities, DriverVersion, HardwareConfig, HardwareId};
pub use config::{EngineConfig, DEFAULT_MAX_TRANSACTIONS};
pub use device::Device;
pub use dma::{DmaAllocator, DmaError, DmaRegion, HostDmaAllocator};
pub use error::{EngineError, Result};
pub use fault::{FaultReporter, LogFaultReporter};
pub use inference::{Inference, InferenceResult, InferenceStatus, PmuConfig};
pub use network::Network;
pub use network_info::NetworkInfo;
pub use registry::TransactionId;
pub use version::PROTOCOL_VERSION;
