//! DMA Program Builder (C3), mechanical half: the circular control-block
//! chain and the PWM/DMA/clock bring-up sequence.
//!
//! Grounded on `examples/original_source/src/main.cpp`'s `setupDMA` (CB ring
//! construction, one CB page allocated at a time, 128 CBs per 4 KiB page)
//! and on `hs-probe-bsp/src/dma.rs`'s pattern of a single owning struct that
//! configures a peripheral once at construction and exposes narrow run-time
//! accessors afterward.

use std::sync::atomic::{fence, Ordering};
use std::thread;
use std::time::Duration;

use rf_hal::peripheral::RegisterIo;
use rf_hal::registers::{
    ControlBlock, CM_PWMCTL, CM_PWMDIV, CM_SRC_PLLD, DMA0_CONBLK_AD, DMA0_CS, DMA0_TI, PASSWORD,
    PWM_CTL, PWM_DMAC, PWM_FIF1, PWM_RNG1, PWM_RNG2, PWM_STA,
};
use rf_hal::{DmaPool, PoolPage};

use crate::error::Result;
use crate::tuning::TuningTable;

const CBS_PER_PAGE: usize = 4096 / ControlBlock::SIZE_BYTES; // 128
pub const RING_LEN: usize = 1024;
const CB_PAGES: usize = RING_LEN / CBS_PER_PAGE; // 8
const POOL_PAGES: usize = 1025;
/// Offset within the tuning-word page of a filler word used by every
/// FIFO-feed CB; its value is irrelevant (the FIFO write's only job is to
/// consume PWM cycles), so any in-range word works.
const FIFO_FILLER_OFFSET: u32 = 2048;

/// Seam the symbol engine (C4) patches through: advancing one CB at a time,
/// waiting for the DMA read pointer to move off the slot about to be
/// rewritten. Implemented by the real [`DmaProgram`] and by a fake for
/// tests that don't have a DMA engine actually draining the ring.
pub trait DmaCursor {
    fn cb_bus(&self, index: usize) -> u32;
    fn patch_source(&mut self, index: usize, bus_addr: u32);
    fn patch_length(&mut self, index: usize, len: u32);
}

/// Owns the DMA buffer pool, the 1024-entry CB ring built over it, and the
/// tuning-word page. Constructed once per process lifetime (spec §4.3).
pub struct DmaProgram {
    _pool: DmaPool,
    const_page: PoolPage,
    cb_virtual: [*mut ControlBlock; RING_LEN],
    cb_bus: [u32; RING_LEN],
}

// The raw pointers alias mailbox/heap memory the DMA engine (or nothing, in
// the fake case) also touches; they are never read/written except through
// volatile accesses, so moving the owning struct across threads is sound as
// long as the caller upholds the single-threaded-cooperative model (spec §5).
unsafe impl Send for DmaProgram {}

impl DmaProgram {
    pub fn create(mem_flag: u32) -> Result<Self> {
        let pool = DmaPool::create(POOL_PAGES, mem_flag)?;
        Self::from_pool(pool)
    }

    /// Builds the ring over a heap-backed fake pool, for unit tests.
    pub fn fake() -> Self {
        let pool = DmaPool::fake(POOL_PAGES);
        Self::from_pool(pool).expect("fake pool never fails to build the CB ring")
    }

    fn from_pool(mut pool: DmaPool) -> Result<Self> {
        let const_page = pool.next_page()?;

        let mut cb_virtual = [std::ptr::null_mut(); RING_LEN];
        let mut cb_bus = [0u32; RING_LEN];
        let mut index = 0;
        for _ in 0..CB_PAGES {
            let page = pool.next_page()?;
            for slot in 0..CBS_PER_PAGE {
                let virt = unsafe { (page.virtual_address as *mut ControlBlock).add(slot) };
                let bus = page.bus_address + (slot * ControlBlock::SIZE_BYTES) as u32;
                cb_virtual[index] = virt;
                cb_bus[index] = bus;
                index += 1;
            }
        }
        debug_assert_eq!(index, RING_LEN);

        for i in 0..RING_LEN {
            let next_bus = cb_bus[(i + 1) % RING_LEN];
            let cb = if i % 2 == 0 {
                ControlBlock {
                    ti: ControlBlock::ti_fifo_feed(),
                    source_ad: const_page.bus_address + FIFO_FILLER_OFFSET,
                    dest_ad: PWM_FIF1,
                    txfr_len: 4,
                    stride: 0,
                    nextconbk: next_bus,
                    reserved1: 0,
                    reserved2: 0,
                }
            } else {
                ControlBlock {
                    ti: ControlBlock::ti_divider_write(),
                    source_ad: const_page.bus_address, // patched per-symbol
                    dest_ad: rf_hal::registers::CM_GP0DIV,
                    txfr_len: 4,
                    stride: 4,
                    nextconbk: next_bus,
                    reserved1: 0,
                    reserved2: 0,
                }
            };
            unsafe { std::ptr::write_volatile(cb_virtual[i], cb) };
        }
        fence(Ordering::SeqCst);

        Ok(DmaProgram { _pool: pool, const_page, cb_virtual, cb_bus })
    }

    pub fn const_page_bus(&self) -> u32 {
        self.const_page.bus_address
    }

    /// Writes a freshly rebuilt tuning table into the const page (spec
    /// §4.3 step 5 has already happened; this just moves the bytes).
    pub fn load_tuning_table(&self, table: &TuningTable) {
        let base = self.const_page.virtual_address as *mut u32;
        for (i, word) in table.words.iter().enumerate() {
            unsafe { std::ptr::write_volatile(base.add(i), *word) };
        }
        fence(Ordering::SeqCst);
    }

    /// Brings up the PWM clock, PWM peripheral, and DMA channel 0 so the
    /// ring self-runs forever (spec §4.3 steps 3-4). Call once per process
    /// lifetime, after the ring and tuning table are built.
    pub fn start<R: RegisterIo + ?Sized>(&self, io: &R) {
        const STEP_DELAY: Duration = Duration::from_micros(1000);

        io.write(CM_PWMCTL, (PASSWORD << 24) | CM_SRC_PLLD | (1 << 5)); // SRC=PLLD, KILL, disabled
        thread::sleep(STEP_DELAY);
        io.write(CM_PWMDIV, (PASSWORD << 24) | (2 << 12)); // divider 2 -> 250 MHz nominal
        io.write(CM_PWMCTL, (PASSWORD << 24) | CM_SRC_PLLD | (1 << 4)); // SRC=PLLD, ENAB
        thread::sleep(STEP_DELAY);

        io.write(PWM_CTL, 0);
        thread::sleep(STEP_DELAY);
        io.write(PWM_STA, 0xFFFF_FFFF); // clear error flags
        thread::sleep(STEP_DELAY);
        io.write(PWM_RNG1, 32);
        io.write(PWM_RNG2, 32);
        io.write(PWM_CTL, 0xFFFF_FFFF); // enable ch1+ch2 fifo/serializer/repeat
        thread::sleep(STEP_DELAY);
        io.write(PWM_DMAC, (1 << 31) | 0x0707);

        fence(Ordering::SeqCst);
        io.write(DMA0_CS, 1 << 31); // reset
        io.write(DMA0_CONBLK_AD, 0);
        io.write(DMA0_TI, 0);
        io.write(DMA0_CONBLK_AD, self.cb_bus[0]);
        io.write(DMA0_CS, (1 << 0) | (255 << 16)); // enable, priority=255
        fence(Ordering::SeqCst);
    }
}

impl DmaCursor for DmaProgram {
    fn cb_bus(&self, index: usize) -> u32 {
        self.cb_bus[index % RING_LEN]
    }

    fn patch_source(&mut self, index: usize, bus_addr: u32) {
        let index = index % RING_LEN;
        unsafe {
            std::ptr::addr_of_mut!((*self.cb_virtual[index]).source_ad).write_volatile(bus_addr);
        }
    }

    fn patch_length(&mut self, index: usize, len: u32) {
        let index = index % RING_LEN;
        unsafe {
            std::ptr::addr_of_mut!((*self.cb_virtual[index]).txfr_len).write_volatile(len);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_alternates_fifo_feed_and_divider_write() {
        let program = DmaProgram::fake();
        for i in 0..RING_LEN {
            let cb = unsafe { std::ptr::read_volatile(program.cb_virtual[i]) };
            if i % 2 == 0 {
                assert_eq!(cb.dest_ad, PWM_FIF1);
            } else {
                assert_eq!(cb.dest_ad, rf_hal::registers::CM_GP0DIV);
            }
        }
    }

    #[test]
    fn ring_links_are_circular() {
        let program = DmaProgram::fake();
        for i in 0..RING_LEN {
            let cb = unsafe { std::ptr::read_volatile(program.cb_virtual[i]) };
            assert_eq!(cb.nextconbk, program.cb_bus((i + 1) % RING_LEN));
        }
    }

    #[test]
    fn patch_source_and_length_round_trip() {
        let mut program = DmaProgram::fake();
        program.patch_source(3, 0xDEAD_BEEF);
        program.patch_length(2, 777);
        let cb3 = unsafe { std::ptr::read_volatile(program.cb_virtual[3]) };
        let cb2 = unsafe { std::ptr::read_volatile(program.cb_virtual[2]) };
        assert_eq!(cb3.source_ad, 0xDEAD_BEEF);
        assert_eq!(cb2.txfr_len, 777);
    }
}
