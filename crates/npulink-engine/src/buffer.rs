use std::sync::Arc;

use npulink_wire::BufferDesc;
use tracing::debug;

use crate::device::Device;
use crate::dma::DmaMemory;
use crate::error::{EngineError, Result};

/// Reference-counted DMA buffer shared with the core subsystem.
///
/// Cloning takes a reference; dropping releases one. The memory is zeroed
/// and freed when the last reference goes, which may be long after the
/// creating handle is dropped if an inference still uses the buffer.
#[derive(Clone)]
pub struct Buffer {
    memory: Arc<DmaMemory>,
}

impl Buffer {
    pub(crate) fn new(memory: DmaMemory) -> Self {
        Self {
            memory: Arc::new(memory),
        }
    }

    /// Size in bytes.
    pub fn size(&self) -> usize {
        self.memory.len()
    }

    /// Address of the buffer as seen by the core subsystem.
    pub fn dma_addr(&self) -> u32 {
        self.memory.addr()
    }

    /// Copy bytes out of the buffer starting at `offset`.
    pub fn read(&self, offset: usize, dst: &mut [u8]) -> Result<()> {
        if self.memory.read(offset, dst) {
            Ok(())
        } else {
            Err(self.out_of_range(offset, dst.len()))
        }
    }

    /// Copy bytes into the buffer starting at `offset`.
    pub fn write(&self, offset: usize, src: &[u8]) -> Result<()> {
        if self.memory.write(offset, src) {
            Ok(())
        } else {
            Err(self.out_of_range(offset, src.len()))
        }
    }

    /// The whole buffer contents.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.size()];
        self.memory.read(0, &mut out);
        out
    }

    /// Number of live references, including in-flight inferences.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.memory)
    }

    pub(crate) fn desc(&self) -> Result<BufferDesc> {
        let size = u32::try_from(self.size())
            .map_err(|_| EngineError::InvalidArgument("buffer exceeds 32-bit size".into()))?;
        Ok(BufferDesc {
            ptr: self.dma_addr(),
            size,
        })
    }

    fn out_of_range(&self, offset: usize, len: usize) -> EngineError {
        EngineError::InvalidArgument(format!(
            "range {offset}+{len} outside buffer of {} bytes",
            self.size()
        ))
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("dma_addr", &format_args!("{:#x}", self.dma_addr()))
            .field("size", &self.size())
            .field("refs", &self.ref_count())
            .finish()
    }
}

impl Device {
    /// Allocate a zero-filled buffer of `size` bytes.
    pub fn create_buffer(&self, size: usize) -> Result<Buffer> {
        if size == 0 {
            return Err(EngineError::InvalidArgument(
                "buffer size must be non-zero".into(),
            ));
        }
        let memory = DmaMemory::allocate(self.dma(), size)?;
        debug!(size, addr = memory.addr(), "buffer created");
        Ok(Buffer::new(memory))
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::offline_device;

    use super::*;

    #[test]
    fn create_buffer_rejects_zero_size() {
        let (device, _) = offline_device();
        let buffer = device.create_buffer(4096).unwrap();
        assert_eq!(buffer.size(), 4096);

        let err = device.create_buffer(0).unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(_)));
    }

    #[test]
    fn read_write_round_trip_and_bounds() {
        let (device, _) = offline_device();
        let buffer = device.create_buffer(8).unwrap();
        buffer.write(2, &[1, 2, 3]).unwrap();
        assert_eq!(buffer.to_vec(), vec![0, 0, 1, 2, 3, 0, 0, 0]);

        let mut out = [0u8; 2];
        buffer.read(3, &mut out).unwrap();
        assert_eq!(out, [2, 3]);

        assert!(buffer.write(7, &[0, 0]).is_err());
    }

    #[test]
    fn clone_shares_memory() {
        let (device, _) = offline_device();
        let buffer = device.create_buffer(4).unwrap();
        let other = buffer.clone();
        assert_eq!(buffer.ref_count(), 2);
        other.write(0, b"abcd").unwrap();
        assert_eq!(buffer.to_vec(), b"abcd");
        drop(other);
        assert_eq!(buffer.ref_count(), 1);
    }
}
