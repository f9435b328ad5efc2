//! Host-side transaction engine for NPU core subsystems.
//!
//! npulink drives an accelerator's core subsystem over a message link: it
//! checks the protocol version, queries capabilities, describes networks,
//! and runs and cancels inferences over DMA buffers shared with the core.
//!
//! # Crate Structure
//!
//! - [`transport`]: message transport abstraction and an in-memory channel
//! - [`wire`]: fixed-layout message encoding and decoding
//! - [`engine`]: transaction registry, device, buffers, networks, inferences

/// Re-export transport types.
pub mod transport {
    pub use npulink_transport::*;
}

/// Re-export wire protocol types.
pub mod wire {
    pub use npulink_wire::*;
}

/// Re-export engine types.
pub mod engine {
    pub use npulink_engine::*;
}

pub use npulink_engine::{
    Buffer, CancelStatus, Capabilities, Device, EngineConfig, EngineError, Inference,
    InferenceResult, InferenceStatus, Network, NetworkInfo, PmuConfig,
};
