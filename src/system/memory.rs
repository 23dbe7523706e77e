//! RAM layout as placed by the linker, plus heap and stack usage accounting.
//!
//! The stack grows down from `stack.end`. [`Memory::paint_stack`] fills the
//! unused part of the stack region with [`STACK_PAINT`] once at boot; from then
//! on [`Memory::stack_used`] scans upward from `stack.start` for the first word
//! that no longer holds the pattern. Everything above that word has been
//! touched at some point, so the figure is a high-water mark, not the current
//! depth. A frame that happens to store `STACK_PAINT` itself at the deepest
//! point makes the result slightly low.

use core::sync::atomic::{AtomicUsize, Ordering};

use super::SystemError;

/// Fill pattern for unused stack.
pub const STACK_PAINT: u32 = 0xCDCD_CDCD;

const WORD: usize = core::mem::size_of::<u32>();

/// Half-open address range `[start, end)`.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Region {
    pub start: usize,
    pub end: usize,
}

impl Region {
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub const fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub const fn contains(&self, addr: usize) -> bool {
        self.start <= addr && addr < self.end
    }
}

/// Linker-defined RAM regions.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemoryLayout {
    pub stack: Region,
    pub heap: Region,
    pub bss: Region,
    pub data: Region,
    /// Flash address the `.data` image is copied from.
    pub data_rom: usize,
}

#[cfg(target_os = "none")]
mod linker {
    extern "C" {
        pub static __stack_start: u8;
        pub static __stack_end: u8;
        pub static __heap_start: u8;
        pub static __heap_end: u8;
        pub static __bss_start: u8;
        pub static __bss_end: u8;
        pub static __data_start: u8;
        pub static __data_end: u8;
        pub static __data_rom_start: u8;
    }
}

impl MemoryLayout {
    /// Layout from the `__{stack,heap,bss,data}_{start,end}` and
    /// `__data_rom_start` symbols of the linker script.
    ///
    /// # Safety
    ///
    /// The linker script must define all nine symbols, with each region
    /// word-aligned and the stack and heap regions reserved for this crate's
    /// accounting.
    #[cfg(target_os = "none")]
    pub unsafe fn from_linker() -> Self {
        use core::ptr::addr_of;
        use linker::*;

        // SAFETY: only the addresses of the symbols are taken, never their contents.
        unsafe {
            Self {
                stack: Region::new(addr_of!(__stack_start) as usize, addr_of!(__stack_end) as usize),
                heap: Region::new(addr_of!(__heap_start) as usize, addr_of!(__heap_end) as usize),
                bss: Region::new(addr_of!(__bss_start) as usize, addr_of!(__bss_end) as usize),
                data: Region::new(addr_of!(__data_start) as usize, addr_of!(__data_end) as usize),
                data_rom: addr_of!(__data_rom_start) as usize,
            }
        }
    }
}

/// Heap break cursor and usage queries over a [`MemoryLayout`].
pub struct Memory {
    layout: MemoryLayout,
    brk: AtomicUsize,
}

impl Memory {
    /// # Safety
    ///
    /// The stack region of `layout` must be word-aligned RAM that stays
    /// readable for the lifetime of the returned value; [`Memory::stack_used`]
    /// reads it directly.
    pub const unsafe fn new(layout: MemoryLayout) -> Self {
        Self {
            brk: AtomicUsize::new(layout.heap.start),
            layout,
        }
    }

    pub fn layout(&self) -> &MemoryLayout {
        &self.layout
    }

    /// Current end of the allocated heap.
    pub fn heap_break(&self) -> usize {
        self.brk.load(Ordering::Relaxed)
    }

    /// Move the heap break up by `incr` bytes and return the previous break,
    /// i.e. the start of the new block. The break never passes the end of the
    /// heap region.
    pub fn increase_heap(&self, incr: usize) -> Result<usize, SystemError> {
        let end = self.layout.heap.end;
        self.brk
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |brk| {
                brk.checked_add(incr).filter(|&next| next <= end)
            })
            .map_err(|brk| {
                warn!("heap exhausted: {} bytes requested, {} left", incr, end.saturating_sub(brk));
                SystemError::HeapExhausted
            })
    }

    pub fn mem_used(&self) -> usize {
        self.heap_break() - self.layout.heap.start
    }

    pub fn mem_free(&self) -> usize {
        self.layout.heap.end.saturating_sub(self.heap_break())
    }

    pub fn bss_used(&self) -> usize {
        self.layout.bss.len()
    }

    pub fn data_used(&self) -> usize {
        self.layout.data.len()
    }

    /// Fill the stack region from its start up to `sp` with [`STACK_PAINT`].
    ///
    /// # Safety
    ///
    /// Nothing may live in the stack region below `sp`, so `sp` must be at or
    /// below the current stack pointer, and the caller must not be preempted
    /// by anything using stack below it while painting.
    pub unsafe fn paint_stack(&self, sp: usize) {
        let stack = self.layout.stack;
        let top = sp.clamp(stack.start, stack.end) & !(WORD - 1);
        let mut addr = stack.start;
        while addr < top {
            // SAFETY: `addr` is a word inside the unused part of the stack region.
            unsafe { core::ptr::write_volatile(addr as *mut u32, STACK_PAINT) };
            addr += WORD;
        }
        debug!("painted {} bytes of stack", top - stack.start);
    }

    /// Deepest stack use seen since [`Memory::paint_stack`].
    pub fn stack_used(&self) -> usize {
        let stack = self.layout.stack;
        let mut addr = stack.start;
        while addr < stack.end {
            // SAFETY: the stack region is readable per `Memory::new`.
            if unsafe { core::ptr::read_volatile(addr as *const u32) } != STACK_PAINT {
                break;
            }
            addr += WORD;
        }
        stack.end - addr
    }

    pub fn stack_free(&self) -> usize {
        self.layout.stack.len() - self.stack_used()
    }
}
