//! Translation of `(offset, context)` pairs into host-addressable guest
//! addresses. Actual guest memory reads are supplied by an external
//! collaborator through [`GuestMemory`].

use easyerr::Error;

use crate::address::Address;

/// The DMA context a command-stream offset is relative to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryContext {
    Local,
    FrameBuffer,
    Main,
    HostBuffer,
    ReportLocal,
    ReportMain,
    SemaphoreRsx,
    SemaphoreMain,
    Device,
}

/// Reads of actual guest memory words and IO-space translation, supplied by
/// the embedder. Never implemented by this crate.
pub trait GuestMemory {
    /// Translate an IO-space offset into a host-mapped guest address.
    /// Returns `None` if the offset is not currently mapped.
    fn io_translate(&self, offset: u32) -> Option<u32>;

    /// Read a big-endian 32-bit word at an already-translated address.
    fn read32(&self, addr: Address) -> u32;

    /// Write a big-endian 32-bit word at an already-translated address.
    fn write32(&self, addr: Address, value: u32);
}

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("offset {offset:?} in context {context:?} is not mapped")]
    UnmappedGuestMemory {
        offset: Address,
        context: MemoryContext,
    },
    #[error("context dma id {id} does not name a known memory region")]
    InvalidLocation { id: u32 },
    #[error("context dma id {id} has no modeled translation")]
    UnimplementedContextDma { id: u32 },
}

const LOCAL_BASE: u32 = 0xC000_0000;
const REPORT_LOCAL_BASE: u32 = 0x4030_1400;
const REPORT_MAIN_BASE: u32 = 0x0e00_0000;
const SEMAPHORE_BASE: u32 = 0x4030_0000;
const DEVICE_BASE: u32 = 0x4000_0000;

/// Translates `(offset, context)` pairs to host-addressable guest addresses.
pub struct MemoryBridge<'a, M: GuestMemory> {
    io: &'a M,
}

impl<'a, M: GuestMemory> MemoryBridge<'a, M> {
    pub fn new(io: &'a M) -> Self {
        Self { io }
    }

    pub fn phys_addr(&self, offset: u32, context: MemoryContext) -> Result<Address, TranslateError> {
        match context {
            MemoryContext::Local | MemoryContext::FrameBuffer => {
                Ok(Address(LOCAL_BASE.wrapping_add(offset)))
            }
            MemoryContext::Main | MemoryContext::HostBuffer => self
                .io
                .io_translate(offset)
                .map(Address)
                .ok_or(TranslateError::UnmappedGuestMemory {
                    offset: Address(offset),
                    context,
                }),
            MemoryContext::ReportLocal => Ok(Address(REPORT_LOCAL_BASE.wrapping_add(offset))),
            MemoryContext::ReportMain => self
                .io
                .io_translate(REPORT_MAIN_BASE.wrapping_add(offset))
                .map(Address)
                .ok_or(TranslateError::UnmappedGuestMemory {
                    offset: Address(offset),
                    context,
                }),
            MemoryContext::SemaphoreRsx | MemoryContext::SemaphoreMain => {
                Ok(Address(SEMAPHORE_BASE.wrapping_add(offset)))
            }
            MemoryContext::Device => Ok(Address(DEVICE_BASE.wrapping_add(offset))),
        }
    }

    /// Read a 32-bit word from a `(offset, context)` pair in one step.
    pub fn read32(&self, offset: u32, context: MemoryContext) -> Result<u32, TranslateError> {
        let addr = self.phys_addr(offset, context)?;
        Ok(self.io.read32(addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    struct FlatMemory {
        words: RefCell<HashMap<u32, u32>>,
        io_map: HashMap<u32, u32>,
    }

    impl GuestMemory for FlatMemory {
        fn io_translate(&self, offset: u32) -> Option<u32> {
            self.io_map.get(&offset).copied()
        }

        fn read32(&self, addr: Address) -> u32 {
            self.words.borrow().get(&addr.value()).copied().unwrap_or(0)
        }

        fn write32(&self, addr: Address, value: u32) {
            self.words.borrow_mut().insert(addr.value(), value);
        }
    }

    #[test]
    fn local_is_fixed_offset() {
        let mem = FlatMemory { words: RefCell::new(HashMap::new()), io_map: HashMap::new() };
        let bridge = MemoryBridge::new(&mem);
        let addr = bridge.phys_addr(0x1000, MemoryContext::Local).unwrap();
        assert_eq!(addr.value(), LOCAL_BASE + 0x1000);
    }

    #[test]
    fn unmapped_main_fails() {
        let mem = FlatMemory { words: RefCell::new(HashMap::new()), io_map: HashMap::new() };
        let bridge = MemoryBridge::new(&mem);
        let err = bridge.phys_addr(0x4000, MemoryContext::Main).unwrap_err();
        assert!(matches!(err, TranslateError::UnmappedGuestMemory { .. }));
    }

    #[test]
    fn mapped_main_translates() {
        let mut io_map = HashMap::new();
        io_map.insert(0x4000, 0x1_0000_0000u32 as u32);
        let mem = FlatMemory { words: RefCell::new(HashMap::new()), io_map };
        let bridge = MemoryBridge::new(&mem);
        let addr = bridge.phys_addr(0x4000, MemoryContext::Main).unwrap();
        assert_eq!(addr.value(), 0x1_0000_0000u32 as u32);
    }
}
