//! C2: DMA Buffer Pool.
//!
//! Provides physically contiguous, non-cacheable 4 KiB pages, allocated in
//! one mailbox request and handed out in monotonic order. Grounded on
//! `examples/original_source/src/main.cpp`'s `allocMemoryPool`/`getRealMemPage`
//! (single mailbox allocation, `mem_lock` for the bus address, `mapmem` over
//! `/dev/mem` for the virtual address, pages served from a running
//! `pool_cnt` counter) and on the `hs-probe-bsp` convention of wrapping a
//! single owned resource (there: a peripheral `Instance`; here: a mailbox
//! allocation) behind a small struct with `new`/teardown methods.

use memmap2::{MmapOptions, MmapRaw};

use crate::error::{Error, Result};
use crate::mailbox::{bus_to_phys, Mailbox};

const PAGE_SIZE: usize = 4096;

/// One page handed out by the pool: what the DMA engine dereferences
/// (`bus_address`) and what the CPU dereferences (`virtual_address`).
#[derive(Copy, Clone, Debug)]
pub struct PoolPage {
    pub index: usize,
    pub bus_address: u32,
    pub virtual_address: *mut u8,
}

trait Backing {
    fn virtual_base(&self) -> *mut u8;
    fn teardown(&mut self);
}

struct MailboxBacking {
    mailbox: Mailbox,
    handle: u32,
    mmap: Option<MmapRaw>,
    torn_down: bool,
}

impl Backing for MailboxBacking {
    fn virtual_base(&self) -> *mut u8 {
        self.mmap.as_ref().expect("mmap present while not torn down").as_ptr() as *mut u8
    }

    fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.mmap = None; // MmapRaw::drop() munmaps
        let _ = self.mailbox.mem_unlock(self.handle);
        let _ = self.mailbox.mem_free(self.handle);
        self.torn_down = true;
    }
}

impl Drop for MailboxBacking {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Backing used by tests: a plain heap buffer standing in for GPU memory.
/// Bus addresses are synthetic (no hardware ever dereferences them), so
/// tests can exercise the CB-building and tuning-table logic without a
/// mailbox device or root privileges.
struct FakeBacking {
    buf: Vec<u8>,
}

impl Backing for FakeBacking {
    fn virtual_base(&self) -> *mut u8 {
        self.buf.as_ptr() as *mut u8
    }

    fn teardown(&mut self) {}
}

/// An ordered sequence of physically contiguous pages.
pub struct DmaPool {
    backing: Box<dyn Backing>,
    bus_base: u32,
    capacity: usize,
    used: usize,
}

impl DmaPool {
    /// Allocates `n_pages * 4 KiB` from the VideoCore mailbox, aligned to
    /// 4 KiB, tagged with the processor-specific `mem_flag`; locks it for a
    /// bus address and maps the corresponding physical region (spec §4.2).
    pub fn create(n_pages: usize, mem_flag: u32) -> Result<Self> {
        let mailbox = Mailbox::open()?;
        let size = (n_pages * PAGE_SIZE) as u32;
        let handle = mailbox.mem_alloc(size, PAGE_SIZE as u32, mem_flag)?;
        let bus_address = mailbox.mem_lock(handle)?;

        let phys = bus_to_phys(bus_address);
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open("/dev/mem")
            .map_err(|e| Error::hardware(format!("opening /dev/mem for dma pool: {e}")))?;
        let mmap = MmapOptions::new()
            .offset(phys as u64)
            .len(n_pages * PAGE_SIZE)
            .map_raw(&file)
            .map_err(|e| Error::hardware(format!("mmap of dma pool failed: {e}")))?;

        Ok(DmaPool {
            backing: Box::new(MailboxBacking {
                mailbox,
                handle,
                mmap: Some(mmap),
                torn_down: false,
            }),
            bus_base: bus_address,
            capacity: n_pages,
            used: 0,
        })
    }

    /// Builds a pool over a plain heap buffer, for unit tests that don't
    /// have a mailbox device or `/dev/mem` access.
    pub fn fake(n_pages: usize) -> Self {
        const FAKE_BUS_BASE: u32 = 0x1000_0000;
        DmaPool {
            backing: Box::new(FakeBacking { buf: vec![0u8; n_pages * PAGE_SIZE] }),
            bus_base: FAKE_BUS_BASE,
            capacity: n_pages,
            used: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn used(&self) -> usize {
        self.used
    }

    /// Hands out the next 4 KiB page in the pool.
    pub fn next_page(&mut self) -> Result<PoolPage> {
        if self.used >= self.capacity {
            return Err(Error::hardware("dma pool exhausted"));
        }
        let index = self.used;
        self.used += 1;
        let offset = index * PAGE_SIZE;
        let bus_address = self.bus_base + offset as u32;
        let virtual_address = unsafe { self.backing.virtual_base().add(offset) };
        Ok(PoolPage { index, bus_address, virtual_address })
    }

    /// Unmaps, unlocks, and frees the pool's backing allocation, in that
    /// order. Idempotent (spec §8 property 10).
    pub fn teardown(&mut self) {
        self.backing.teardown();
    }
}

impl Drop for DmaPool {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_pool_issues_linear_addresses() {
        let mut pool = DmaPool::fake(4);
        let p0 = pool.next_page().unwrap();
        let p1 = pool.next_page().unwrap();
        let p2 = pool.next_page().unwrap();
        assert_eq!(p1.bus_address, p0.bus_address + 4096);
        assert_eq!(p2.bus_address, p0.bus_address + 2 * 4096);
        assert_eq!(unsafe { p1.virtual_address.offset_from(p0.virtual_address) }, 4096);
        assert_eq!(p0.index, 0);
        assert_eq!(p2.index, 2);
    }

    #[test]
    fn pool_exhaustion_is_an_error() {
        let mut pool = DmaPool::fake(1);
        pool.next_page().unwrap();
        assert!(pool.next_page().is_err());
    }

    #[test]
    fn teardown_is_idempotent() {
        let mut pool = DmaPool::fake(1);
        pool.teardown();
        pool.teardown();
    }
}
