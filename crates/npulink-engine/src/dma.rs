//! DMA memory shared with the core subsystem.
//!
//! Allocation itself is external; the engine consumes a [`DmaAllocator`].
//! [`HostDmaAllocator`] backs regions with ordinary heap memory and hands out
//! synthetic device addresses, which is enough for simulation and tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

/// Errors reported by a DMA allocator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DmaError {
    /// Not enough device-addressable memory.
    #[error("out of dma memory ({requested} bytes requested)")]
    OutOfMemory { requested: usize },

    /// The region would not fit the 32-bit device address space.
    #[error("region of {0} bytes does not fit the device address space")]
    TooLarge(usize),
}

/// A region of device-addressable memory.
#[derive(Debug)]
pub struct DmaRegion {
    addr: u32,
    data: Box<[u8]>,
}

impl DmaRegion {
    pub fn new(addr: u32, data: Box<[u8]>) -> Self {
        Self { addr, data }
    }

    /// Address of the region as seen by the core subsystem.
    pub fn addr(&self) -> u32 {
        self.addr
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

/// Allocate/free interface for DMA memory.
pub trait DmaAllocator: Send + Sync {
    fn allocate(&self, size: usize) -> Result<DmaRegion, DmaError>;

    /// Return a region. Its contents have already been zeroed.
    fn free(&self, region: DmaRegion);
}

/// Free device address ranges, keyed by start address and coalesced on
/// release.
#[derive(Debug)]
struct AddressSpace {
    /// Start of the never-used tail.
    next: u64,
    end: u64,
    free: BTreeMap<u64, u64>,
}

impl AddressSpace {
    fn new(base: u32, len: u32) -> Self {
        let next = u64::from(base);
        Self {
            next,
            end: (next + u64::from(len)).min(1 << 32),
            free: BTreeMap::new(),
        }
    }

    /// First fit from the free list, then from the untouched tail.
    fn take(&mut self, span: u64) -> Option<u64> {
        let fit = self
            .free
            .iter()
            .find(|(_, len)| **len >= span)
            .map(|(&addr, &len)| (addr, len));
        if let Some((addr, len)) = fit {
            self.free.remove(&addr);
            if len > span {
                self.free.insert(addr + span, len - span);
            }
            return Some(addr);
        }
        if self.end - self.next < span {
            return None;
        }
        let addr = self.next;
        self.next += span;
        Some(addr)
    }

    fn give_back(&mut self, mut addr: u64, mut span: u64) {
        if let Some((&prev, &len)) = self.free.range(..addr).next_back() {
            if prev + len == addr {
                self.free.remove(&prev);
                addr = prev;
                span += len;
            }
        }
        if let Some(len) = self.free.remove(&(addr + span)) {
            span += len;
        }
        if addr + span == self.next {
            self.next = addr;
        } else {
            self.free.insert(addr, span);
        }
    }
}

/// Heap-backed allocator over a window of synthetic device addresses.
///
/// Live regions never share an address; freed address ranges are reused.
#[derive(Debug)]
pub struct HostDmaAllocator {
    space: Mutex<AddressSpace>,
    live: AtomicUsize,
    limit: usize,
}

const HOST_DMA_BASE: u32 = 0x6000_0000;
const HOST_DMA_ALIGN: u32 = 0x1000;

/// Address range reserved for a region of `size` bytes.
fn span_of(size: usize) -> Option<u64> {
    u32::try_from(size)
        .ok()
        .and_then(|s| s.checked_next_multiple_of(HOST_DMA_ALIGN))
        .map(|s| u64::from(s.max(HOST_DMA_ALIGN)))
}

impl HostDmaAllocator {
    pub fn new() -> Self {
        Self::with_limit(usize::MAX)
    }

    /// Allocator that fails once `limit` bytes are live.
    pub fn with_limit(limit: usize) -> Self {
        Self::with_address_space(HOST_DMA_BASE, u32::MAX - HOST_DMA_BASE + 1, limit)
    }

    /// Allocator handing out addresses from `base` up to `base + len`.
    pub fn with_address_space(base: u32, len: u32, limit: usize) -> Self {
        Self {
            space: Mutex::new(AddressSpace::new(base, len)),
            live: AtomicUsize::new(0),
            limit,
        }
    }

    /// Bytes currently allocated.
    pub fn live_bytes(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }
}

impl Default for HostDmaAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl DmaAllocator for HostDmaAllocator {
    fn allocate(&self, size: usize) -> Result<DmaRegion, DmaError> {
        let span = span_of(size).ok_or(DmaError::TooLarge(size))?;

        let live = self.live.fetch_add(size, Ordering::AcqRel);
        if live.saturating_add(size) > self.limit {
            self.live.fetch_sub(size, Ordering::AcqRel);
            return Err(DmaError::OutOfMemory { requested: size });
        }

        let Some(addr) = self.space.lock().take(span) else {
            self.live.fetch_sub(size, Ordering::AcqRel);
            return Err(DmaError::OutOfMemory { requested: size });
        };
        // The window ends at or below 2^32.
        let addr = addr as u32;
        Ok(DmaRegion::new(addr, vec![0u8; size].into_boxed_slice()))
    }

    fn free(&self, region: DmaRegion) {
        if let Some(span) = span_of(region.len()) {
            self.space.lock().give_back(u64::from(region.addr()), span);
        }
        self.live.fetch_sub(region.len(), Ordering::AcqRel);
    }
}

/// Owned DMA memory, returned zeroed to its allocator on drop.
pub(crate) struct DmaMemory {
    addr: u32,
    data: Mutex<Box<[u8]>>,
    allocator: Arc<dyn DmaAllocator>,
}

impl DmaMemory {
    pub(crate) fn allocate(
        allocator: &Arc<dyn DmaAllocator>,
        size: usize,
    ) -> Result<Self, DmaError> {
        let region = allocator.allocate(size)?;
        Ok(Self {
            addr: region.addr,
            data: Mutex::new(region.data),
            allocator: Arc::clone(allocator),
        })
    }

    pub(crate) fn addr(&self) -> u32 {
        self.addr
    }

    pub(crate) fn len(&self) -> usize {
        self.data.lock().len()
    }

    pub(crate) fn read(&self, offset: usize, dst: &mut [u8]) -> bool {
        let data = self.data.lock();
        match offset.checked_add(dst.len()) {
            Some(end) if end <= data.len() => {
                dst.copy_from_slice(&data[offset..end]);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn write(&self, offset: usize, src: &[u8]) -> bool {
        let mut data = self.data.lock();
        match offset.checked_add(src.len()) {
            Some(end) if end <= data.len() => {
                data[offset..end].copy_from_slice(src);
                true
            }
            _ => false,
        }
    }
}

impl Drop for DmaMemory {
    fn drop(&mut self) {
        let data = self.data.get_mut();
        data.fill(0);
        debug!(addr = self.addr, len = data.len(), "freeing dma memory");
        let region = DmaRegion::new(self.addr, std::mem::take(data));
        self.allocator.free(region);
    }
}

impl std::fmt::Debug for DmaMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DmaMemory")
            .field("addr", &format_args!("{:#x}", self.addr))
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recording {
        inner: HostDmaAllocator,
        freed: Mutex<Vec<Vec<u8>>>,
    }

    impl DmaAllocator for Recording {
        fn allocate(&self, size: usize) -> Result<DmaRegion, DmaError> {
            self.inner.allocate(size)
        }

        fn free(&self, region: DmaRegion) {
            self.freed.lock().push(region.as_slice().to_vec());
            self.inner.free(region);
        }
    }

    #[test]
    fn memory_is_zeroed_before_free() {
        let recording = Arc::new(Recording::default());
        let allocator: Arc<dyn DmaAllocator> = recording.clone();

        let memory = DmaMemory::allocate(&allocator, 16).unwrap();
        assert!(memory.write(4, b"secret"));
        assert_eq!(recording.inner.live_bytes(), 16);
        drop(memory);

        let freed = recording.freed.lock();
        assert_eq!(freed.len(), 1);
        assert!(freed[0].iter().all(|&b| b == 0));
        assert_eq!(recording.inner.live_bytes(), 0);
    }

    #[test]
    fn out_of_bounds_access_rejected() {
        let allocator: Arc<dyn DmaAllocator> = Arc::new(HostDmaAllocator::new());
        let memory = DmaMemory::allocate(&allocator, 8).unwrap();
        assert!(!memory.write(6, b"abc"));
        assert!(!memory.write(usize::MAX, b"a"));
        let mut buf = [0u8; 9];
        assert!(!memory.read(0, &mut buf));
    }

    #[test]
    fn addresses_do_not_overlap() {
        let allocator = HostDmaAllocator::new();
        let a = allocator.allocate(5000).unwrap();
        let b = allocator.allocate(1).unwrap();
        assert!(b.addr() >= a.addr() + 5000);
    }

    #[test]
    fn exhausted_window_fails_instead_of_reusing_live_addresses() {
        let allocator = HostDmaAllocator::with_address_space(0x1000, 3 * 0x1000, usize::MAX);
        let held = allocator.allocate(1).unwrap();
        let a = allocator.allocate(1).unwrap();
        let b = allocator.allocate(1).unwrap();
        assert_eq!(
            allocator.allocate(1).unwrap_err(),
            DmaError::OutOfMemory { requested: 1 }
        );
        assert_eq!(allocator.live_bytes(), 3);

        // Freed ranges come back; the held region is never handed out again.
        allocator.free(a);
        allocator.free(b);
        for _ in 0..10_000 {
            let region = allocator.allocate(1).unwrap();
            assert_ne!(region.addr(), held.addr());
            allocator.free(region);
        }
        let large = allocator.allocate(2 * 0x1000).unwrap();
        assert_eq!(large.addr(), held.addr() + 0x1000);
    }

    #[test]
    fn top_of_address_space_is_usable() {
        let allocator = HostDmaAllocator::with_address_space(u32::MAX - 0xfff, 0x1000, usize::MAX);
        let region = allocator.allocate(0x1000).unwrap();
        assert_eq!(region.addr(), u32::MAX - 0xfff);
        assert!(allocator.allocate(1).is_err());
        allocator.free(region);
        assert!(allocator.allocate(1).is_ok());
    }

    #[test]
    fn limit_enforced() {
        let allocator = HostDmaAllocator::with_limit(100);
        assert!(allocator.allocate(64).is_ok());
        assert_eq!(
            allocator.allocate(64).unwrap_err(),
            DmaError::OutOfMemory { requested: 64 }
        );
    }
}
