//! The system core: trap and interrupt dispatch, the event queue, memory
//! accounting and the tick counter.
//!
//! A [`System`] is built once at boot, then [`published`](System::publish) so
//! the exception entry points can reach it through [`instance`]. The handle
//! stays valid until the next reset. Board specifics (debug console wiring,
//! interrupt routing) come in through the [`Platform`] trait.

use core::cell::Cell;

use critical_section::Mutex;

use crate::clocks::{ClockConfig, ClockControl, ClockError};
use crate::cpu;
use crate::fmt::Hex;
use crate::mmio::{Mmio, RegisterBlock};

pub mod event;
pub mod memory;
pub mod tick;
pub mod trap;

pub use event::{Component, Event, EventQueue};
pub use memory::{Memory, MemoryLayout, Region, STACK_PAINT};
pub use tick::{sys_tick, ticks};
pub use trap::{ActiveVector, ExceptionFrame, FaultStatus, TrapIndex};

/// Capacity of the system event queue.
pub const EVENT_QUEUE_DEPTH: usize = 16;

/// Busy-wait cycles after a trap so the last console byte can leave the UART.
pub const TRAP_FLUSH_DELAY: u32 = 10_000;

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemError {
    /// A system handle has already been published.
    AlreadyInitialized,
    /// The heap break would pass the end of the heap region.
    HeapExhausted,
    Clock(ClockError),
}

impl From<ClockError> for SystemError {
    fn from(e: ClockError) -> Self {
        SystemError::Clock(e)
    }
}

/// Board-level hooks the system core calls into.
pub trait Platform: Sync {
    /// Stop DMA and interrupt driven traffic on the debug console so trap
    /// reporting can write to it synchronously.
    fn detach_debug_io(&self);

    /// Board-specific trap handling, run after the trap has been logged and
    /// before the flush delay and clock reset.
    fn on_trap(&self, _trap: TrapIndex) {}

    /// Route peripheral interrupt `irq` (0 = first external vector) to its driver.
    fn handle_interrupt(&self, irq: u16);
}

/// What the exception entry points and interrupt-context producers need
/// from the published system.
pub trait Dispatch: Sync {
    fn handle_trap(&self, trap: TrapIndex, frame: Option<&ExceptionFrame>);

    fn handle_interrupt(&self, irq: u16);

    fn post_event(&self, event: Event) -> Result<(), Event>;
}

/// Snapshot of clock and memory figures.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SystemInfo {
    pub sys_clk: u32,
    pub ahb_clk: u32,
    pub apb1_clk: u32,
    pub apb2_clk: u32,
    pub heap_free: usize,
    pub heap_used: usize,
    pub bss_used: usize,
    pub data_used: usize,
    pub stack_free: usize,
    pub stack_used: usize,
    pub ticks: u32,
}

pub struct System<'h, P: Platform, R: RegisterBlock = Mmio> {
    platform: P,
    clocks: ClockControl<'h, R>,
    scb: R,
    memory: Memory,
    events: EventQueue<EVENT_QUEUE_DEPTH>,
}

#[cfg(target_os = "none")]
impl<'h, P: Platform> System<'h, P, Mmio> {
    /// System over the on-chip RCC and SCB, with the memory layout taken
    /// from the linker script.
    ///
    /// # Safety
    ///
    /// Only one `System` may exist, and the linker script must satisfy
    /// [`MemoryLayout::from_linker`].
    pub unsafe fn steal(platform: P, config: &ClockConfig) -> Self {
        unsafe {
            Self::new(
                platform,
                ClockControl::steal(config),
                Mmio::new(trap::SCB_BASE),
                Memory::new(MemoryLayout::from_linker()),
            )
        }
    }
}

impl<'h, P: Platform, R: RegisterBlock> System<'h, P, R> {
    pub const fn new(platform: P, clocks: ClockControl<'h, R>, scb: R, memory: Memory) -> Self {
        Self {
            platform,
            clocks,
            scb,
            memory,
            events: EventQueue::new(),
        }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn clocks(&self) -> &ClockControl<'h, R> {
        &self.clocks
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn events(&self) -> &EventQueue<EVENT_QUEUE_DEPTH> {
        &self.events
    }

    /// Report why the chip reset, then bring the system clock up to
    /// `config.sys_clk` if one is requested.
    pub fn boot(&self, config: &ClockConfig) -> Result<(), SystemError> {
        let reason = self.clocks.reset_reason();
        info!("reset reason {}", Hex(reason.bits()));
        self.clocks.clear_reset_flags();

        if let Some(freq) = config.sys_clk {
            self.clocks.set_system_clock(freq)?;
        }
        self.log_info();
        Ok(())
    }

    /// Fill the unused stack below the current frame with [`STACK_PAINT`].
    ///
    /// # Safety
    ///
    /// Must run in thread mode at boot with interrupts disabled, before
    /// anything has used the stack region below the current frame.
    pub unsafe fn paint_stack(&self) {
        // Leave a little room for the frames of `paint_stack` itself.
        let sp = cpu::stack_pointer().saturating_sub(64);
        unsafe { self.memory.paint_stack(sp) }
    }

    /// Vector currently being serviced, from `ICSR.VECTACTIVE`.
    pub fn active_vector(&self) -> ActiveVector {
        ActiveVector::decode(self.scb.read_field(trap::ICSR, trap::ICSR_VECTACTIVE))
    }

    /// Handle whatever trap is active, for vectors shared between several
    /// fault sources.
    pub fn dispatch_active_trap(&self, frame: Option<&ExceptionFrame>) {
        match self.active_vector() {
            ActiveVector::Trap(trap) => self.trap(trap, frame),
            other => warn!("no trap active ({:?})", other),
        }
    }

    /// Route the active peripheral interrupt to the platform.
    pub fn dispatch_active_interrupt(&self) {
        match self.active_vector() {
            ActiveVector::Interrupt(irq) => self.platform.handle_interrupt(irq),
            other => warn!("no interrupt active ({:?})", other),
        }
    }

    /// Common trap path: detach the debug console, report the trap, give the
    /// board its hook, let the console drain, then put the clock tree back on
    /// the internal oscillator.
    pub fn trap(&self, trap: TrapIndex, frame: Option<&ExceptionFrame>) {
        self.platform.detach_debug_io();

        error!("trap {:?}", trap);
        if let Some(frame) = frame {
            error!(
                "r0 {} r1 {} r2 {} r3 {}",
                Hex(frame.r0),
                Hex(frame.r1),
                Hex(frame.r2),
                Hex(frame.r3)
            );
            error!(
                "r12 {} lr {} pc {} xpsr {}",
                Hex(frame.r12),
                Hex(frame.lr),
                Hex(frame.pc),
                Hex(frame.xpsr)
            );
        }
        if trap.is_fault() {
            let status = FaultStatus::read(&self.scb);
            status.log();
            status.clear(&self.scb);
        }

        self.platform.on_trap(trap);

        cpu::busy_delay(TRAP_FLUSH_DELAY);
        self.clocks.reset_clock();
    }

    pub fn info(&self) -> SystemInfo {
        let mem = &self.memory;
        SystemInfo {
            sys_clk: self.clocks.system_clock(),
            ahb_clk: self.clocks.ahb_clock(),
            apb1_clk: self.clocks.apb1_clock(),
            apb2_clk: self.clocks.apb2_clock(),
            heap_free: mem.mem_free(),
            heap_used: mem.mem_used(),
            bss_used: mem.bss_used(),
            data_used: mem.data_used(),
            stack_free: mem.stack_free(),
            stack_used: mem.stack_used(),
            ticks: ticks(),
        }
    }

    pub fn log_info(&self) {
        let i = self.info();
        info!(
            "clock: system {} MHz, ahb {} MHz, apb1 {} MHz, apb2 {} MHz",
            i.sys_clk / 1_000_000,
            i.ahb_clk / 1_000_000,
            i.apb1_clk / 1_000_000,
            i.apb2_clk / 1_000_000
        );
        info!(
            "ram: {}k heap free, {}k heap used, {}k bss, {}k data",
            kib(i.heap_free),
            kib(i.heap_used),
            kib(i.bss_used),
            kib(i.data_used)
        );
        info!("stack: {}k free, {}k max used", kib(i.stack_free), kib(i.stack_used));
    }
}

/// Bytes to KiB, rounded to nearest.
fn kib(bytes: usize) -> usize {
    (bytes + 512) / 1024
}

impl<'h, P: Platform, R: RegisterBlock + Sync> Dispatch for System<'h, P, R> {
    fn handle_trap(&self, trap: TrapIndex, frame: Option<&ExceptionFrame>) {
        self.trap(trap, frame);
    }

    fn handle_interrupt(&self, irq: u16) {
        self.platform.handle_interrupt(irq);
    }

    fn post_event(&self, event: Event) -> Result<(), Event> {
        self.events.post(event)
    }
}

static INSTANCE: Mutex<Cell<Option<&'static dyn Dispatch>>> = Mutex::new(Cell::new(None));

impl<P: Platform + 'static, R: RegisterBlock + Sync + 'static> System<'static, P, R> {
    /// Make this system reachable through [`instance`]. Works once per boot.
    pub fn publish(&'static self) -> Result<(), SystemError> {
        critical_section::with(|cs| {
            let slot = INSTANCE.borrow(cs);
            if slot.get().is_some() {
                return Err(SystemError::AlreadyInitialized);
            }
            slot.set(Some(self));
            Ok(())
        })
    }
}

/// The published system, if boot got that far.
pub fn instance() -> Option<&'static dyn Dispatch> {
    critical_section::with(|cs| INSTANCE.borrow(cs).get())
}

/// Post `event` to the published system's queue. Hands the event back if
/// the queue is full or nothing has been published yet.
pub fn post_event(event: Event) -> Result<(), Event> {
    match instance() {
        Some(system) => system.post_event(event),
        None => Err(event),
    }
}

#[cfg(all(feature = "rt", target_os = "none"))]
mod rt {
    use cortex_m_rt::exception;

    use super::{instance, tick, ExceptionFrame, TrapIndex};
    use crate::cpu;

    #[exception]
    unsafe fn HardFault(ef: &cortex_m_rt::ExceptionFrame) -> ! {
        let frame = ExceptionFrame::from(ef);
        if let Some(system) = instance() {
            system.handle_trap(TrapIndex::HardFault, Some(&frame));
        }
        cpu::system_reset()
    }

    #[exception]
    unsafe fn DefaultHandler(irqn: i16) {
        let Some(system) = instance() else {
            return;
        };
        match u16::try_from(irqn) {
            Ok(irq) => system.handle_interrupt(irq),
            Err(_) => {
                let vector = (i32::from(irqn) + 16) as u32;
                match TrapIndex::from_vector(vector) {
                    Some(trap) => system.handle_trap(trap, None),
                    None => warn!("unhandled exception {}", vector),
                }
            }
        }
    }

    #[exception]
    fn SysTick() {
        tick::sys_tick();
    }
}
