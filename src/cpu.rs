//! The few core instructions the system layer needs, with host stand-ins so
//! the rest of the crate builds and tests off-target.

cfg_if::cfg_if! {
    if #[cfg(all(target_arch = "arm", target_os = "none"))] {
        /// Spin for roughly `cycles` core clock cycles.
        #[inline]
        pub(crate) fn busy_delay(cycles: u32) {
            cortex_m::asm::delay(cycles);
        }

        /// Sleep until the next interrupt unless `ready` already holds.
        ///
        /// `ready` is checked with interrupts masked and `wfi` still wakes on
        /// an interrupt that became pending in between, so a wake-up posted
        /// right after the check is not lost.
        pub(crate) fn sleep_unless(ready: impl Fn() -> bool) {
            let primask = cortex_m::register::primask::read();
            cortex_m::interrupt::disable();
            if !ready() {
                cortex_m::asm::wfi();
            }
            if primask.is_active() {
                // SAFETY: restores the mask state found on entry.
                unsafe { cortex_m::interrupt::enable() };
            }
        }

        #[inline]
        pub(crate) fn stack_pointer() -> usize {
            cortex_m::register::msp::read() as usize
        }

        pub(crate) fn system_reset() -> ! {
            cortex_m::peripheral::SCB::sys_reset()
        }
    } else {
        pub(crate) fn busy_delay(cycles: u32) {
            for _ in 0..cycles {
                core::hint::spin_loop();
            }
        }

        pub(crate) fn sleep_unless(ready: impl Fn() -> bool) {
            if !ready() {
                core::hint::spin_loop();
            }
        }

        #[inline(never)]
        pub(crate) fn stack_pointer() -> usize {
            let marker = 0u32;
            core::ptr::addr_of!(marker) as usize
        }

        #[allow(dead_code)]
        pub(crate) fn system_reset() -> ! {
            loop {
                core::hint::spin_loop();
            }
        }
    }
}
