//! Word-sized memory-mapped register access.
//!
//! Every access goes through [`RegisterBlock::read`] / [`RegisterBlock::write`].
//! The hardware implementation ([`Mmio`]) performs a volatile access fenced on
//! both sides, so the compiler neither caches nor reorders register traffic
//! relative to surrounding code. The clock controller and the system control
//! block are both driven through this trait, which is also what lets the host
//! tests substitute a simulated register file.

use core::ptr;
use core::sync::atomic::{compiler_fence, Ordering};

/// A block of 32-bit registers addressed by byte offset from its base.
pub trait RegisterBlock {
    /// Read the register at `offset`.
    fn read(&self, offset: usize) -> u32;

    /// Write `value` to the register at `offset`.
    fn write(&self, offset: usize, value: u32);

    /// Read-modify-write of a single register.
    fn modify(&self, offset: usize, f: impl FnOnce(u32) -> u32) {
        let value = self.read(offset);
        self.write(offset, f(value));
    }

    fn set_bits(&self, offset: usize, mask: u32) {
        self.modify(offset, |v| v | mask);
    }

    fn clear_bits(&self, offset: usize, mask: u32) {
        self.modify(offset, |v| v & !mask);
    }

    /// Returns `true` if any bit of `mask` is set.
    fn bits_set(&self, offset: usize, mask: u32) -> bool {
        self.read(offset) & mask != 0
    }

    /// Extract the field `(reg & mask) >> shift`.
    fn read_field(&self, offset: usize, field: Field) -> u32 {
        field.get(self.read(offset))
    }

    /// Replace the field in place, leaving the other bits untouched.
    fn write_field(&self, offset: usize, field: Field, value: u32) {
        self.modify(offset, |v| field.set(v, value));
    }
}

/// A contiguous bit field inside a register.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Field {
    pub shift: u32,
    pub width: u32,
}

impl Field {
    pub const fn new(shift: u32, width: u32) -> Self {
        Self { shift, width }
    }

    /// Mask of the field in register position.
    pub const fn mask(self) -> u32 {
        (u32::MAX >> (32 - self.width)) << self.shift
    }

    pub const fn get(self, reg: u32) -> u32 {
        (reg & self.mask()) >> self.shift
    }

    /// `reg` with the field replaced by `value`; excess high bits of `value` are dropped.
    pub const fn set(self, reg: u32, value: u32) -> u32 {
        (reg & !self.mask()) | ((value << self.shift) & self.mask())
    }
}

/// Register block living at a fixed physical address.
#[derive(Clone, Copy, Debug)]
pub struct Mmio {
    base: usize,
}

impl Mmio {
    /// # Safety
    ///
    /// `base` must be the address of a peripheral register block that stays
    /// mapped for the lifetime of the returned value, and every offset later
    /// passed to `read`/`write` must name a word-aligned register inside it.
    pub const unsafe fn new(base: usize) -> Self {
        Self { base }
    }

    pub const fn base(&self) -> usize {
        self.base
    }
}

impl RegisterBlock for Mmio {
    #[inline(always)]
    fn read(&self, offset: usize) -> u32 {
        compiler_fence(Ordering::SeqCst);
        // SAFETY: address validity is the contract of `Mmio::new`.
        let value = unsafe { ptr::read_volatile((self.base + offset) as *const u32) };
        compiler_fence(Ordering::SeqCst);
        value
    }

    #[inline(always)]
    fn write(&self, offset: usize, value: u32) {
        compiler_fence(Ordering::SeqCst);
        // SAFETY: address validity is the contract of `Mmio::new`.
        unsafe { ptr::write_volatile((self.base + offset) as *mut u32, value) };
        compiler_fence(Ordering::SeqCst);
    }
}

impl<T: RegisterBlock + ?Sized> RegisterBlock for &T {
    fn read(&self, offset: usize) -> u32 {
        (**self).read(offset)
    }

    fn write(&self, offset: usize, value: u32) {
        (**self).write(offset, value)
    }
}
