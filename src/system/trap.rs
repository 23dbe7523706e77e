//! Processor exceptions and the system control block (SCB) registers used to
//! classify them.

use crate::fmt::Hex;
use crate::mmio::{Field, RegisterBlock};

pub const SCB_BASE: usize = 0xE000_ED00;

pub(crate) const ICSR: usize = 0x04;
pub(crate) const CFSR: usize = 0x28;
pub(crate) const HFSR: usize = 0x2C;
pub(crate) const MMFAR: usize = 0x34;
pub(crate) const BFAR: usize = 0x38;
/// Bytes covered by the registers above.
pub const SCB_SIZE: usize = 0x40;

pub(crate) const ICSR_VECTACTIVE: Field = Field::new(0, 9);

/// First vector number of the external interrupts.
pub const IRQ_VECTOR_OFFSET: u32 = 16;

/// Fault and system exception sources, numbered by vector.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum TrapIndex {
    Nmi = 2,
    HardFault = 3,
    MemManage = 4,
    BusFault = 5,
    UsageFault = 6,
    SvCall = 11,
    PendSv = 14,
}

impl TrapIndex {
    /// Decode an `ICSR.VECTACTIVE` value.
    pub const fn from_vector(vector: u32) -> Option<Self> {
        Some(match vector {
            2 => Self::Nmi,
            3 => Self::HardFault,
            4 => Self::MemManage,
            5 => Self::BusFault,
            6 => Self::UsageFault,
            11 => Self::SvCall,
            14 => Self::PendSv,
            _ => return None,
        })
    }

    pub const fn vector(self) -> u32 {
        self as u32
    }

    /// `true` for the configurable and hard faults, which come with CFSR/HFSR state.
    pub const fn is_fault(self) -> bool {
        matches!(
            self,
            Self::HardFault | Self::MemManage | Self::BusFault | Self::UsageFault
        )
    }
}

/// What the active vector number refers to.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActiveVector {
    /// Thread mode.
    None,
    Trap(TrapIndex),
    /// Peripheral interrupt, numbered from 0.
    Interrupt(u16),
    /// SysTick, DebugMonitor and the reserved vectors.
    Other(u32),
}

impl ActiveVector {
    pub const fn decode(vector: u32) -> Self {
        if vector == 0 {
            return Self::None;
        }
        if vector >= IRQ_VECTOR_OFFSET {
            return Self::Interrupt((vector - IRQ_VECTOR_OFFSET) as u16);
        }
        match TrapIndex::from_vector(vector) {
            Some(trap) => Self::Trap(trap),
            None => Self::Other(vector),
        }
    }
}

/// Registers the core pushes on exception entry.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct ExceptionFrame {
    pub r0: u32,
    pub r1: u32,
    pub r2: u32,
    pub r3: u32,
    pub r12: u32,
    pub lr: u32,
    pub pc: u32,
    pub xpsr: u32,
}

impl ExceptionFrame {
    /// Read the frame stacked at `sp`.
    ///
    /// # Safety
    ///
    /// `sp` must point to eight readable, word-aligned words, i.e. the stack
    /// pointer that was active when the exception was taken.
    pub unsafe fn from_stack(sp: *const u32) -> Self {
        // SAFETY: guaranteed by the caller; `ExceptionFrame` is eight `u32`s in stacking order.
        unsafe { core::ptr::read_volatile(sp.cast::<ExceptionFrame>()) }
    }
}

#[cfg(all(feature = "rt", target_os = "none"))]
impl From<&cortex_m_rt::ExceptionFrame> for ExceptionFrame {
    fn from(ef: &cortex_m_rt::ExceptionFrame) -> Self {
        Self {
            r0: ef.r0(),
            r1: ef.r1(),
            r2: ef.r2(),
            r3: ef.r3(),
            r12: ef.r12(),
            lr: ef.lr(),
            pc: ef.pc(),
            xpsr: ef.xpsr(),
        }
    }
}

const CFSR_MMARVALID: u32 = 1 << 7;
const CFSR_BFARVALID: u32 = 1 << 15;
const HFSR_VECTTBL: u32 = 1 << 1;
const HFSR_FORCED: u32 = 1 << 30;

const CFSR_CAUSES: [(u32, &str); 17] = [
    (1 << 0, "instruction access violation"),
    (1 << 1, "data access violation"),
    (1 << 3, "memmanage fault on unstacking"),
    (1 << 4, "memmanage fault on stacking"),
    (1 << 5, "memmanage fault during fp lazy state preservation"),
    (1 << 8, "instruction bus error"),
    (1 << 9, "precise data bus error"),
    (1 << 10, "imprecise data bus error"),
    (1 << 11, "bus fault on unstacking"),
    (1 << 12, "bus fault on stacking"),
    (1 << 13, "bus fault during fp lazy state preservation"),
    (1 << 16, "undefined instruction"),
    (1 << 17, "invalid state"),
    (1 << 18, "invalid pc load"),
    (1 << 19, "no coprocessor"),
    (1 << 24, "unaligned access"),
    (1 << 25, "divide by zero"),
];

/// Snapshot of the fault status and address registers.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FaultStatus {
    pub cfsr: u32,
    pub hfsr: u32,
    pub mmfar: u32,
    pub bfar: u32,
}

impl FaultStatus {
    pub fn read(scb: &impl RegisterBlock) -> Self {
        Self {
            cfsr: scb.read(CFSR),
            hfsr: scb.read(HFSR),
            mmfar: scb.read(MMFAR),
            bfar: scb.read(BFAR),
        }
    }

    /// Faulting data address of a memmanage fault, if the core captured one.
    pub fn mem_manage_address(&self) -> Option<u32> {
        (self.cfsr & CFSR_MMARVALID != 0).then_some(self.mmfar)
    }

    /// Faulting data address of a precise bus fault, if the core captured one.
    pub fn bus_fault_address(&self) -> Option<u32> {
        (self.cfsr & CFSR_BFARVALID != 0).then_some(self.bfar)
    }

    /// Hard fault escalated from a configurable fault.
    pub fn forced(&self) -> bool {
        self.hfsr & HFSR_FORCED != 0
    }

    /// Hard fault raised while reading the vector table.
    pub fn vector_table_read(&self) -> bool {
        self.hfsr & HFSR_VECTTBL != 0
    }

    /// Human-readable names of the CFSR bits that are set.
    pub fn causes(&self) -> impl Iterator<Item = &'static str> + '_ {
        CFSR_CAUSES
            .iter()
            .filter(|(mask, _)| self.cfsr & mask != 0)
            .map(|(_, name)| *name)
    }

    /// The status bits are write-one-to-clear.
    pub fn clear(&self, scb: &impl RegisterBlock) {
        scb.write(CFSR, self.cfsr);
        scb.write(HFSR, self.hfsr);
    }

    pub(crate) fn log(&self) {
        error!("cfsr {} hfsr {}", Hex(self.cfsr), Hex(self.hfsr));
        for cause in self.causes() {
            error!("  {}", cause);
        }
        if self.forced() {
            error!("  escalated to hard fault");
        }
        if self.vector_table_read() {
            error!("  vector table read");
        }
        if let Some(addr) = self.mem_manage_address() {
            error!("  mmfar {}", Hex(addr));
        }
        if let Some(addr) = self.bus_fault_address() {
            error!("  bfar {}", Hex(addr));
        }
    }
}
