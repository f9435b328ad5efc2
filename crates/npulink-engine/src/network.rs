use std::sync::Arc;

use npulink_wire::{BufferDesc, NetworkRef};
use tracing::debug;

use crate::device::Device;
use crate::dma::DmaMemory;
use crate::error::{EngineError, Result};

enum Model {
    /// Model data uploaded into DMA memory.
    Data(DmaMemory),
    /// Model built into the core subsystem, by catalog index.
    Index(u32),
}

/// Reference-counted handle to a loaded model.
///
/// Cloning takes a reference. Inferences keep their network alive until they
/// are destroyed.
#[derive(Clone)]
pub struct Network {
    model: Arc<Model>,
}

impl Network {
    /// The representation sent to the core subsystem.
    pub fn network_ref(&self) -> NetworkRef {
        match &*self.model {
            Model::Data(memory) => NetworkRef::Buffer(BufferDesc {
                ptr: memory.addr(),
                // Creation rejects data that does not fit in u32.
                size: memory.len() as u32,
            }),
            Model::Index(index) => NetworkRef::Index(*index),
        }
    }

    /// Catalog index, for index-backed networks.
    pub fn index(&self) -> Option<u32> {
        match &*self.model {
            Model::Index(index) => Some(*index),
            Model::Data(_) => None,
        }
    }

    /// Size of the uploaded model data, for data-backed networks.
    pub fn data_size(&self) -> Option<usize> {
        match &*self.model {
            Model::Data(memory) => Some(memory.len()),
            Model::Index(_) => None,
        }
    }

    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.model)
    }
}

impl std::fmt::Debug for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Network")
            .field("model", &self.network_ref())
            .field("refs", &self.ref_count())
            .finish()
    }
}

impl Device {
    /// Load a network by copying `data` into fresh DMA memory.
    pub fn create_network(&self, data: &[u8]) -> Result<Network> {
        if data.is_empty() {
            return Err(EngineError::InvalidArgument(
                "network data must not be empty".into(),
            ));
        }
        if u32::try_from(data.len()).is_err() {
            return Err(EngineError::InvalidArgument(
                "network data exceeds 32-bit size".into(),
            ));
        }
        let memory = DmaMemory::allocate(self.dma(), data.len())?;
        memory.write(0, data);
        debug!(size = data.len(), addr = memory.addr(), "network created from data");
        Ok(Network {
            model: Arc::new(Model::Data(memory)),
        })
    }

    /// Refer to a network built into the core subsystem.
    pub fn create_network_from_index(&self, index: u32) -> Network {
        debug!(index, "network created from index");
        Network {
            model: Arc::new(Model::Index(index)),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::offline_device;

    use super::*;

    #[test]
    fn data_network_is_copied_to_dma() {
        let (device, _) = offline_device();
        let network = device.create_network(b"tflite model").unwrap();
        match network.network_ref() {
            NetworkRef::Buffer(desc) => assert_eq!(desc.size, 12),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(network.data_size(), Some(12));
        assert_eq!(network.index(), None);
    }

    #[test]
    fn empty_data_rejected() {
        let (device, _) = offline_device();
        assert!(matches!(
            device.create_network(&[]),
            Err(EngineError::InvalidArgument(_))
        ));
    }

    #[test]
    fn index_network() {
        let (device, _) = offline_device();
        let network = device.create_network_from_index(7);
        assert_eq!(network.network_ref(), NetworkRef::Index(7));
        assert_eq!(network.index(), Some(7));
    }
}
