//! Clock tree control for the reset and clock controller (RCC).
//!
//! [`ClockControl`] owns the HSI, HSE and main PLL. It never caches a
//! frequency: every query re-derives the value from the live register state
//! plus the two fixed inputs, [`HSI_FREQ`] and the board crystal frequency
//! given at construction.
//!
//! ```text
//!             ┌─────┐
//!   hsi ────▶│00   │          ┌──────┐ ahb   ┌──────┐ apb1
//!   hse ────▶│01   │─sysclk─▶│ HPRE │──┬───▶│PPRE1 │──────▶
//!   pll ────▶│10   │          └──────┘  │    └──────┘
//!             └─────┘                    │    ┌──────┐ apb2
//!                ▲                       └───▶│PPRE2 │──────▶
//!                │                            └──────┘
//!           CFGR.SW / CFGR.SWS
//! ```
//!
//! Hardware waits come in two kinds. The HSE start-up wait is bounded by
//! the `hse_startup_polls` budget of
//! [`ClockConfig`], because a missing or slow crystal is a
//! plausible board fault. The PLL lock wait and both clock-switch waits are
//! unbounded: under correct wiring they always complete, and if they do not
//! the system hangs inside [`ClockControl::set_system_clock`] or
//! [`ClockControl::reset_clock`].

use core::cell::RefCell;
use core::ptr;

use critical_section::Mutex;

use crate::mmio::{Mmio, RegisterBlock};

pub mod config;
mod periph;
pub mod regs;

pub use config::{ClockConfig, HSE_STARTUP_POLLS, HSI_FREQ};
pub use periph::{Bus, Peripheral};

/// Number of change handler slots.
pub const MAX_CHANGE_HANDLERS: usize = 8;

/// Hook for peripherals that must quiesce around a system clock change.
///
/// Both callbacks run synchronously, one handler after another, in the
/// context that called [`ClockControl::set_system_clock`] (normally the main
/// loop at boot, never assumed to be an interrupt).
pub trait ChangeHandler: Sync {
    /// Called before anything is touched. The change may still fail after
    /// this, in which case no matching [`changed`](ChangeHandler::changed)
    /// follows.
    fn prepare_change(&self, new_freq: u32);

    /// Called once the new system clock is live.
    fn changed(&self, new_freq: u32);
}

/// Clock domain selector for [`ClockControl::frequency`].
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Clock {
    System,
    Ahb,
    Apb1,
    Apb2,
}

/// Active system clock source, as reported by `CFGR.SWS`.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClockSource {
    Hsi,
    Hse,
    Pll,
}

impl ClockSource {
    const fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            0 => Some(Self::Hsi),
            1 => Some(Self::Hse),
            2 => Some(Self::Pll),
            _ => None,
        }
    }

    const fn bits(self) -> u32 {
        self as u32
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockError {
    /// The external oscillator did not report ready within the poll budget.
    HseTimeout,
    /// All change handler slots are taken.
    NoFreeHandlerSlot,
    /// The handler passed to `remove_change_handler` is not registered.
    HandlerNotRegistered,
}

/// PLL input divider and multiplier.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PllConfig {
    /// `PLLM`, 2..=63
    pub div: u32,
    /// `PLLN`, 192..=432
    pub mul: u32,
}

impl PllConfig {
    /// Lowest achievable VCO output, used when nothing fits the target.
    pub const FALLBACK: Self = Self {
        div: config::pll::M_MAX,
        mul: config::pll::N_MIN,
    };

    /// VCO output produced from `input` by this configuration.
    pub const fn vco_freq(&self, input: u32) -> u32 {
        input / self.div * self.mul
    }
}

/// Search the `PLLM`/`PLLN` space for the VCO output closest to `vco_target`.
///
/// Returns `Ok` with the exact pair if one exists, otherwise the closest pair
/// found. When no divider puts the VCO input inside its 1..2 MHz window with
/// a multiplier in range, returns `Err(PllConfig::FALLBACK)`, which is still a
/// valid register setting.
///
/// Both frequencies are scaled down by 10 so `target * div` stays inside
/// `u32` for every target the PLL can produce. Among pairs with equal error
/// the smallest divider wins.
pub fn find_pll_config(hse_freq: u32, vco_target: u32) -> Result<PllConfig, PllConfig> {
    use config::pll::*;

    const SCALE: u32 = 10;
    let input = hse_freq / SCALE;
    let target = vco_target / SCALE;

    if input == 0 {
        return Err(PllConfig::FALLBACK);
    }

    let mut best: Option<(PllConfig, u32)> = None;
    for div in M_MIN..=M_MAX {
        let vco_in = input / div;
        if !(VCO_IN_MIN / SCALE..=VCO_IN_MAX / SCALE).contains(&vco_in) {
            continue;
        }
        let Some(mul) = target.checked_mul(div).map(|t| t / input) else {
            continue;
        };
        if !(N_MIN..=N_MAX).contains(&mul) {
            continue;
        }
        let candidate = PllConfig { div, mul };
        let delta = target.abs_diff(candidate.vco_freq(input));
        if best.map_or(true, |(_, best_delta)| delta < best_delta) {
            if delta == 0 {
                return Ok(candidate);
            }
            best = Some((candidate, delta));
        }
    }

    best.map(|(pll, _)| pll).ok_or(PllConfig::FALLBACK)
}

/// Cause(s) of the last reset, from `RCC_CSR`.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResetReason(u32);

impl ResetReason {
    pub const LOW_POWER: Self = Self(regs::CSR_LPWRRSTF);
    pub const WINDOW_WATCHDOG: Self = Self(regs::CSR_WWDGRSTF);
    pub const INDEPENDENT_WATCHDOG: Self = Self(regs::CSR_IWDGRSTF);
    pub const SOFTWARE: Self = Self(regs::CSR_SFTRSTF);
    pub const POWER_ON: Self = Self(regs::CSR_PORRSTF);
    pub const PIN: Self = Self(regs::CSR_PINRSTF);
    pub const BROWN_OUT: Self = Self(regs::CSR_BORRSTF);

    const ALL: u32 = regs::CSR_LPWRRSTF
        | regs::CSR_WWDGRSTF
        | regs::CSR_IWDGRSTF
        | regs::CSR_SFTRSTF
        | regs::CSR_PORRSTF
        | regs::CSR_PINRSTF
        | regs::CSR_BORRSTF;

    pub const fn from_csr(csr: u32) -> Self {
        Self(csr & Self::ALL)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub const fn bits(self) -> u32 {
        self.0
    }
}

type HandlerSlots<'h> = [Option<&'h dyn ChangeHandler>; MAX_CHANGE_HANDLERS];

/// Owner of the clock tree.
pub struct ClockControl<'h, R: RegisterBlock = Mmio> {
    regs: R,
    hse_freq: u32,
    hse_startup_polls: u32,
    handlers: Mutex<RefCell<HandlerSlots<'h>>>,
}

impl<'h> ClockControl<'h, Mmio> {
    /// Clock control over the on-chip RCC.
    ///
    /// # Safety
    ///
    /// Only one `ClockControl` may drive the RCC at a time.
    pub unsafe fn steal(config: &ClockConfig) -> Self {
        Self::new(unsafe { Mmio::new(regs::RCC_BASE) }, config)
    }
}

impl<'h, R: RegisterBlock> ClockControl<'h, R> {
    pub const fn new(regs: R, config: &ClockConfig) -> Self {
        Self {
            regs,
            hse_freq: config.hse_freq,
            hse_startup_polls: config.hse_startup_polls,
            handlers: Mutex::new(RefCell::new([None; MAX_CHANGE_HANDLERS])),
        }
    }

    /// Board crystal frequency given at construction.
    pub fn hse_freq(&self) -> u32 {
        self.hse_freq
    }

    /// Install `handler` in the first free slot.
    pub fn add_change_handler(&self, handler: &'h dyn ChangeHandler) -> Result<(), ClockError> {
        critical_section::with(|cs| {
            let mut slots = self.handlers.borrow_ref_mut(cs);
            let slot = slots
                .iter_mut()
                .find(|s| s.is_none())
                .ok_or(ClockError::NoFreeHandlerSlot)?;
            *slot = Some(handler);
            Ok(())
        })
    }

    /// Clear the slot holding exactly `handler` (same object, not merely equal).
    pub fn remove_change_handler(&self, handler: &'h dyn ChangeHandler) -> Result<(), ClockError> {
        critical_section::with(|cs| {
            let mut slots = self.handlers.borrow_ref_mut(cs);
            let slot = slots
                .iter_mut()
                .find(|s| s.is_some_and(|h| ptr::addr_eq(ptr::from_ref(h), ptr::from_ref(handler))))
                .ok_or(ClockError::HandlerNotRegistered)?;
            *slot = None;
            Ok(())
        })
    }

    /// Snapshot the slots so callbacks run outside the critical section.
    fn handlers(&self) -> HandlerSlots<'h> {
        critical_section::with(|cs| *self.handlers.borrow_ref(cs))
    }

    /// Put the clock tree back into its power-on state: HSI as system clock,
    /// PLLs at their reset configuration, clock interrupts cleared.
    ///
    /// Never fails; the HSI is assumed to always start. The switch-back wait
    /// is unbounded.
    pub fn reset_clock(&self) {
        let r = &self.regs;
        r.write(regs::CR, regs::reset_clock::CR);
        r.write(regs::CFGR, regs::reset_clock::CFGR);
        while r.read_field(regs::CFGR, regs::CFGR_SWS) != ClockSource::Hsi.bits() {}
        r.write(regs::PLLCFGR, regs::reset_clock::PLLCFGR);
        r.write(regs::CIR, regs::reset_clock::CIR);
        r.write(regs::PLLI2SCFGR, regs::reset_clock::PLLI2SCFGR);
        debug!("clock tree reset to hsi");
    }

    /// [`reset_clock`](Self::reset_clock), then return every peripheral
    /// reset, clock enable and low-power enable register to its reset value.
    pub fn reset(&self) {
        self.reset_clock();
        for (offset, value) in regs::PERIPHERAL_RESET_SEQUENCE {
            self.regs.write(offset, value);
        }
    }

    /// Run the core from the PLL, fed by the HSE, at `freq`.
    ///
    /// Every registered handler gets `prepare_change(freq)` first, whether or
    /// not the change then succeeds. On [`ClockError::HseTimeout`] the HSE is
    /// switched back off, the previous clock source stays active and no
    /// `changed` callback is made. Retrying is up to the caller.
    ///
    /// Bus prescalers are fixed: AHB /1, APB1 /4, APB2 /2.
    pub fn set_system_clock(&self, freq: u32) -> Result<(), ClockError> {
        let handlers = self.handlers();
        for handler in handlers.iter().flatten() {
            handler.prepare_change(freq);
        }

        let r = &self.regs;
        // Never reprogram the PLL while it may be clocking the core.
        if r.bits_set(regs::CR, regs::CR_HSEON) || self.source() == Some(ClockSource::Pll) {
            self.reset_clock();
        }

        r.set_bits(regs::CR, regs::CR_HSEON);
        let mut polls = self.hse_startup_polls;
        while !r.bits_set(regs::CR, regs::CR_HSERDY) {
            polls = polls.saturating_sub(1);
            if polls == 0 {
                r.clear_bits(regs::CR, regs::CR_HSEON);
                warn!("hse not ready after {} polls, staying on current clock", self.hse_startup_polls);
                return Err(ClockError::HseTimeout);
            }
        }

        r.set_bits(regs::APB1ENR, regs::APB1ENR_PWREN);
        r.write_field(regs::CFGR, regs::CFGR_HPRE, config::bus::HPRE_DIV1);
        r.write_field(regs::CFGR, regs::CFGR_PPRE2, config::bus::PPRE2_DIV2);
        r.write_field(regs::CFGR, regs::CFGR_PPRE1, config::bus::PPRE1_DIV4);

        let pll = match self.pll_config(freq.saturating_mul(2)) {
            Ok(pll) => pll,
            Err(fallback) => {
                warn!("no pll setting reaches {} Hz, using lowest output", freq);
                fallback
            }
        };

        // M and N always go out in the same write.
        r.modify(regs::PLLCFGR, |v| {
            let v = regs::PLLCFGR_PLLM.set(v, pll.div);
            let v = regs::PLLCFGR_PLLN.set(v, pll.mul);
            let v = regs::PLLCFGR_PLLP.set(v, config::pll::P_DIV2);
            let v = regs::PLLCFGR_PLLQ.set(v, config::pll::Q_DIV);
            v | regs::PLLCFGR_PLLSRC
        });

        r.set_bits(regs::CR, regs::CR_PLLON);
        while !r.bits_set(regs::CR, regs::CR_PLLRDY) {}

        r.write_field(regs::CFGR, regs::CFGR_SW, ClockSource::Pll.bits());
        while r.read_field(regs::CFGR, regs::CFGR_SWS) != ClockSource::Pll.bits() {}

        info!("sysclk {} Hz (pllm {}, plln {})", freq, pll.div, pll.mul);

        for handler in handlers.iter().flatten() {
            handler.changed(freq);
        }
        Ok(())
    }

    /// PLL search against this board's crystal. See [`find_pll_config`].
    pub fn pll_config(&self, vco_target: u32) -> Result<PllConfig, PllConfig> {
        find_pll_config(self.hse_freq, vco_target)
    }

    /// Current system clock source, `None` for the reserved encoding.
    pub fn source(&self) -> Option<ClockSource> {
        ClockSource::from_bits(self.regs.read_field(regs::CFGR, regs::CFGR_SWS))
    }

    pub fn system_clock(&self) -> u32 {
        let r = &self.regs;
        match self.source() {
            Some(ClockSource::Hsi) => HSI_FREQ,
            Some(ClockSource::Hse) => self.hse_freq,
            Some(ClockSource::Pll) => {
                let cfg = r.read(regs::PLLCFGR);
                let input = if cfg & regs::PLLCFGR_PLLSRC != 0 {
                    self.hse_freq
                } else {
                    HSI_FREQ
                };
                let div = u64::from(regs::PLLCFGR_PLLM.get(cfg));
                if div == 0 {
                    return 0;
                }
                let mul = u64::from(regs::PLLCFGR_PLLN.get(cfg));
                let p = u64::from(config::pll::P_TABLE[regs::PLLCFGR_PLLP.get(cfg) as usize]);
                // Settings left by a bootloader may put the VCO outside its window.
                u32::try_from(u64::from(input) / div * mul / p).unwrap_or(u32::MAX)
            }
            None => 0,
        }
    }

    pub fn ahb_clock(&self) -> u32 {
        let hpre = self.regs.read_field(regs::CFGR, regs::CFGR_HPRE);
        self.system_clock() >> hpre.saturating_sub(7)
    }

    // NOTE: APB1 is derived from the PPRE2 field, not PPRE1, so with the
    // fixed policy it reports AHB / 2 while the hardware runs it at AHB / 4.
    // Kept as is until the drivers relying on this value are audited.
    pub fn apb1_clock(&self) -> u32 {
        let ppre = self.regs.read_field(regs::CFGR, regs::CFGR_PPRE2);
        self.ahb_clock() >> ppre.saturating_sub(3)
    }

    pub fn apb2_clock(&self) -> u32 {
        let ppre = self.regs.read_field(regs::CFGR, regs::CFGR_PPRE2);
        self.ahb_clock() >> ppre.saturating_sub(3)
    }

    pub fn frequency(&self, clock: Clock) -> u32 {
        match clock {
            Clock::System => self.system_clock(),
            Clock::Ahb => self.ahb_clock(),
            Clock::Apb1 => self.apb1_clock(),
            Clock::Apb2 => self.apb2_clock(),
        }
    }

    /// Kernel clock of `peripheral`, i.e. the frequency of its bus.
    pub fn peripheral_frequency(&self, peripheral: Peripheral) -> u32 {
        self.frequency(peripheral.bus().clock())
    }

    /// Ungate the clock of `peripheral`.
    pub fn enable(&self, peripheral: Peripheral) {
        let gate = peripheral.gate();
        critical_section::with(|_| self.regs.set_bits(gate.enr, gate.mask));
    }

    pub fn disable(&self, peripheral: Peripheral) {
        let gate = peripheral.gate();
        critical_section::with(|_| self.regs.clear_bits(gate.enr, gate.mask));
    }

    pub fn is_enabled(&self, peripheral: Peripheral) -> bool {
        let gate = peripheral.gate();
        self.regs.bits_set(gate.enr, gate.mask)
    }

    /// Pulse the reset line of `peripheral`.
    pub fn reset_peripheral(&self, peripheral: Peripheral) {
        let gate = peripheral.gate();
        critical_section::with(|_| {
            self.regs.set_bits(gate.rstr, gate.mask);
            self.regs.clear_bits(gate.rstr, gate.mask);
        });
    }

    /// Enable and reset `peripheral`, returning its kernel clock.
    pub fn enable_and_reset(&self, peripheral: Peripheral) -> u32 {
        self.enable(peripheral);
        self.reset_peripheral(peripheral);
        self.peripheral_frequency(peripheral)
    }

    pub fn reset_reason(&self) -> ResetReason {
        ResetReason::from_csr(self.regs.read(regs::CSR))
    }

    /// Clear the sticky reset flags so the next boot reports only its own cause.
    pub fn clear_reset_flags(&self) {
        self.regs.set_bits(regs::CSR, regs::CSR_RMVF);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use core::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::mmio::testing::SimRegs;

    /// Status bits follow their control bits, like a board with a working crystal.
    pub(crate) fn healthy(regs: &mut [u32], word: usize) {
        follow(regs, word, true);
    }

    /// The crystal never starts.
    pub(crate) fn dead_crystal(regs: &mut [u32], word: usize) {
        follow(regs, word, false);
    }

    fn follow(regs: &mut [u32], word: usize, hse_works: bool) {
        match word * 4 {
            regs::CR => {
                let cr = regs[word];
                let mut status = 0;
                if cr & regs::CR_HSION != 0 {
                    status |= regs::CR_HSIRDY;
                }
                if hse_works && cr & regs::CR_HSEON != 0 {
                    status |= regs::CR_HSERDY;
                }
                if cr & regs::CR_PLLON != 0 {
                    status |= regs::CR_PLLRDY;
                }
                let mask = regs::CR_HSIRDY | regs::CR_HSERDY | regs::CR_PLLRDY;
                regs[word] = (cr & !mask) | status;
            }
            regs::CFGR => {
                let sw = regs::CFGR_SW.get(regs[word]);
                regs[word] = regs::CFGR_SWS.set(regs[word], sw);
            }
            _ => {}
        }
    }

    pub(crate) fn sim(hook: fn(&mut [u32], usize)) -> SimRegs {
        SimRegs::new(regs::BLOCK_SIZE / 4, hook)
    }

    #[derive(Default)]
    struct Recorder {
        prepared: AtomicU32,
        changed: AtomicU32,
    }

    impl ChangeHandler for Recorder {
        fn prepare_change(&self, new_freq: u32) {
            self.prepared.store(new_freq, Ordering::SeqCst);
        }

        fn changed(&self, new_freq: u32) {
            self.changed.store(new_freq, Ordering::SeqCst);
        }
    }

    #[test]
    fn pll_search_exact_for_8mhz_crystal() {
        // 8 / 5 = 1.6 MHz x 210 is the first exact pair, ahead of 8 x 336.
        assert_eq!(find_pll_config(8_000_000, 336_000_000), Ok(PllConfig { div: 5, mul: 210 }));
    }

    #[test]
    fn pll_search_prefers_smallest_divider_on_ties() {
        // 16 MHz: 10 x 210 and 16 x 336 are both exact.
        assert_eq!(find_pll_config(16_000_000, 336_000_000), Ok(PllConfig { div: 10, mul: 210 }));
    }

    #[test]
    fn pll_search_keeps_first_divider_on_equal_error() {
        // 3 MHz: 2 x 192 and 3 x 288 both land 10 kHz short of the target.
        let pll = find_pll_config(3_000_000, 288_010_000).unwrap();
        assert_eq!(pll, PllConfig { div: 2, mul: 192 });
        assert_eq!(pll.vco_freq(3_000_000), 288_000_000);
        assert_eq!(PllConfig { div: 3, mul: 288 }.vco_freq(3_000_000), 288_000_000);
    }

    #[test]
    fn pll_search_results_stay_in_range() {
        for hse in [4_000_000, 8_000_000, 12_000_000, 16_000_000, 25_000_000, 26_000_000] {
            for sys in (24_000_000..=216_000_000).step_by(3_000_000) {
                match find_pll_config(hse, sys * 2) {
                    Ok(pll) => {
                        assert!((2..=63).contains(&pll.div), "{hse} {sys} {pll:?}");
                        assert!((192..=432).contains(&pll.mul), "{hse} {sys} {pll:?}");
                        let vco_in = hse / pll.div;
                        assert!((1_000_000..=2_000_000).contains(&vco_in), "{hse} {sys} {pll:?}");
                    }
                    Err(pll) => assert_eq!(pll, PllConfig { div: 63, mul: 192 }),
                }
            }
        }
    }

    #[test]
    fn pll_search_approximate_match_is_ok() {
        // 25 MHz / 25 = 1 MHz steps cannot hit 333.3 MHz exactly.
        let pll = find_pll_config(25_000_000, 333_333_333).unwrap();
        assert_ne!(pll.vco_freq(25_000_000), 333_333_333);
        assert!(pll.vco_freq(25_000_000).abs_diff(333_333_333) < 1_000_000);
    }

    #[test]
    fn pll_search_without_candidates_falls_back() {
        // VCO out of reach for any multiplier.
        assert_eq!(find_pll_config(8_000_000, 50_000_000), Err(PllConfig { div: 63, mul: 192 }));
        // Crystal too slow for the VCO input window.
        assert_eq!(find_pll_config(1_500_000, 336_000_000), Err(PllConfig::FALLBACK));
        assert_eq!(find_pll_config(0, 336_000_000), Err(PllConfig::FALLBACK));
    }

    #[test]
    fn set_system_clock_168mhz() {
        let regs = sim(healthy);
        let clocks = ClockControl::new(&regs, &ClockConfig::default());
        clocks.reset_clock();

        clocks.set_system_clock(168_000_000).unwrap();

        assert_eq!(clocks.source(), Some(ClockSource::Pll));
        assert_eq!(clocks.system_clock(), 168_000_000);
        assert_eq!(clocks.ahb_clock(), 168_000_000);
        assert_eq!(clocks.apb2_clock(), 84_000_000);
        // APB1 follows the PPRE2 field.
        assert_eq!(clocks.apb1_clock(), 84_000_000);

        let cfg = regs.peek(regs::PLLCFGR);
        assert_eq!(regs::PLLCFGR_PLLM.get(cfg), 5);
        assert_eq!(regs::PLLCFGR_PLLN.get(cfg), 210);
        assert_eq!(regs::PLLCFGR_PLLQ.get(cfg), 7);
        assert_ne!(cfg & regs::PLLCFGR_PLLSRC, 0);
        assert!(regs.bits_set(regs::APB1ENR, regs::APB1ENR_PWREN));
    }

    #[test]
    fn pll_divider_and_multiplier_written_together() {
        let regs = sim(healthy);
        let clocks = ClockControl::new(&regs, &ClockConfig::default());
        clocks.reset_clock();
        regs.clear_writes();

        clocks.set_system_clock(168_000_000).unwrap();

        let pll_writes: std::vec::Vec<_> = regs.writes().into_iter().filter(|(o, _)| *o == regs::PLLCFGR).collect();
        assert_eq!(pll_writes.len(), 1);
        assert_eq!(regs::PLLCFGR_PLLM.get(pll_writes[0].1), 5);
        assert_eq!(regs::PLLCFGR_PLLN.get(pll_writes[0].1), 210);
        assert_eq!(clocks.system_clock(), 168_000_000);
    }

    #[test]
    fn reconfiguring_from_pll_resets_first() {
        let regs = sim(healthy);
        let clocks = ClockControl::new(&regs, &ClockConfig::default());
        clocks.set_system_clock(168_000_000).unwrap();
        regs.clear_writes();

        clocks.set_system_clock(120_000_000).unwrap();

        let writes = regs.writes();
        assert_eq!(writes[0], (regs::CR, regs::reset_clock::CR));
        let first_pll = writes.iter().position(|(o, _)| *o == regs::PLLCFGR).unwrap();
        assert_eq!(writes[first_pll].1, regs::reset_clock::PLLCFGR);
        assert_eq!(clocks.system_clock(), 120_000_000);
    }

    #[test]
    fn reset_clock_returns_to_hsi() {
        let regs = sim(healthy);
        let clocks = ClockControl::new(&regs, &ClockConfig::default());
        clocks.set_system_clock(168_000_000).unwrap();

        clocks.reset_clock();

        assert_eq!(clocks.source(), Some(ClockSource::Hsi));
        assert_eq!(clocks.system_clock(), HSI_FREQ);
        assert_eq!(regs.peek(regs::PLLCFGR), regs::reset_clock::PLLCFGR);
        assert_eq!(regs.peek(regs::PLLI2SCFGR), regs::reset_clock::PLLI2SCFGR);
        assert_eq!(regs.peek(regs::CIR), 0);
    }

    #[test]
    fn reset_writes_fixed_patterns_in_order() {
        let regs = sim(healthy);
        let clocks = ClockControl::new(&regs, &ClockConfig::default());
        clocks.enable(Peripheral::Usart2);
        regs.clear_writes();

        clocks.reset();

        let writes = regs.writes();
        let (clock_part, periph_part) = writes.split_at(writes.len() - regs::PERIPHERAL_RESET_SEQUENCE.len());
        assert_eq!(clock_part[0], (regs::CR, regs::reset_clock::CR));
        assert_eq!(periph_part, &regs::PERIPHERAL_RESET_SEQUENCE[..]);
        assert_eq!(regs.peek(regs::AHB1ENR), 0x0010_0000);
        assert!(!clocks.is_enabled(Peripheral::Usart2));
    }

    #[test]
    fn dead_crystal_fails_without_switching() {
        let recorder = Recorder::default();
        let regs = sim(dead_crystal);
        let clocks = ClockControl::new(&regs, &ClockConfig::default().hse_startup_polls(16));
        clocks.reset_clock();
        clocks.add_change_handler(&recorder).unwrap();

        assert_eq!(clocks.set_system_clock(168_000_000), Err(ClockError::HseTimeout));

        assert_eq!(clocks.source(), Some(ClockSource::Hsi));
        assert_eq!(clocks.system_clock(), HSI_FREQ);
        assert!(!regs.bits_set(regs::CR, regs::CR_HSEON));
        assert_eq!(recorder.prepared.load(Ordering::SeqCst), 168_000_000);
        assert_eq!(recorder.changed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn handlers_see_both_phases() {
        let recorder = Recorder::default();
        let regs = sim(healthy);
        let clocks = ClockControl::new(&regs, &ClockConfig::default());
        clocks.add_change_handler(&recorder).unwrap();

        clocks.set_system_clock(168_000_000).unwrap();

        assert_eq!(recorder.prepared.load(Ordering::SeqCst), 168_000_000);
        assert_eq!(recorder.changed.load(Ordering::SeqCst), 168_000_000);
    }

    #[test]
    fn handler_slots_are_bounded() {
        let handlers: [Recorder; MAX_CHANGE_HANDLERS + 1] = Default::default();
        let regs = sim(healthy);
        let clocks = ClockControl::new(&regs, &ClockConfig::default());

        for h in &handlers[..MAX_CHANGE_HANDLERS] {
            clocks.add_change_handler(h).unwrap();
        }
        let extra = &handlers[MAX_CHANGE_HANDLERS];
        assert_eq!(clocks.add_change_handler(extra), Err(ClockError::NoFreeHandlerSlot));

        clocks.remove_change_handler(&handlers[3]).unwrap();
        assert_eq!(clocks.add_change_handler(extra), Ok(()));
        assert_eq!(clocks.add_change_handler(&handlers[3]), Err(ClockError::NoFreeHandlerSlot));
    }

    #[test]
    fn remove_requires_same_handler() {
        let registered = Recorder::default();
        let stranger = Recorder::default();
        let regs = sim(healthy);
        let clocks = ClockControl::new(&regs, &ClockConfig::default());
        clocks.add_change_handler(&registered).unwrap();

        assert_eq!(clocks.remove_change_handler(&stranger), Err(ClockError::HandlerNotRegistered));
        assert_eq!(clocks.remove_change_handler(&registered), Ok(()));
        assert_eq!(clocks.remove_change_handler(&registered), Err(ClockError::HandlerNotRegistered));
    }

    #[test]
    fn system_clock_from_out_of_window_pll_setting() {
        // 25 MHz / 2 x 432 / 2, as a bootloader might leave it.
        let regs = sim(healthy);
        let clocks = ClockControl::new(&regs, &ClockConfig::new(25_000_000));
        let cfg = regs::PLLCFGR_PLLM.set(0, 2);
        let cfg = regs::PLLCFGR_PLLN.set(cfg, 432);
        regs.poke(regs::PLLCFGR, cfg | regs::PLLCFGR_PLLSRC);
        regs.write_field(regs::CFGR, regs::CFGR_SW, ClockSource::Pll.bits());

        assert_eq!(clocks.system_clock(), 2_700_000_000);

        // 200 MHz / 2 x 432 / 2 is past u32::MAX and saturates.
        let clocks = ClockControl::new(&regs, &ClockConfig::new(200_000_000));
        assert_eq!(clocks.system_clock(), u32::MAX);
    }

    #[test]
    fn prescaler_decoding() {
        let regs = sim(healthy);
        let clocks = ClockControl::new(&regs, &ClockConfig::default());
        clocks.reset_clock();
        regs.write_field(regs::CFGR, regs::CFGR_HPRE, 7);
        assert_eq!(clocks.ahb_clock(), HSI_FREQ);
        regs.write_field(regs::CFGR, regs::CFGR_HPRE, 9);
        assert_eq!(clocks.ahb_clock(), HSI_FREQ / 4);
        regs.write_field(regs::CFGR, regs::CFGR_PPRE2, 6);
        assert_eq!(clocks.apb2_clock(), HSI_FREQ / 4 / 8);
        assert_eq!(clocks.frequency(Clock::Apb2), clocks.apb2_clock());
    }

    #[test]
    fn peripheral_gating() {
        let regs = sim(healthy);
        let clocks = ClockControl::new(&regs, &ClockConfig::default());
        clocks.set_system_clock(168_000_000).unwrap();

        assert!(!clocks.is_enabled(Peripheral::Spi1));
        assert_eq!(clocks.enable_and_reset(Peripheral::Spi1), 84_000_000);
        assert!(clocks.is_enabled(Peripheral::Spi1));
        assert_eq!(regs.peek(regs::APB2RSTR) & (1 << 12), 0);
        clocks.disable(Peripheral::Spi1);
        assert!(!clocks.is_enabled(Peripheral::Spi1));
        assert_eq!(clocks.peripheral_frequency(Peripheral::Dma1), 168_000_000);
    }

    #[test]
    fn reset_reason_decoding() {
        let regs = sim(healthy);
        let clocks = ClockControl::new(&regs, &ClockConfig::default());
        regs.poke(regs::CSR, regs::CSR_PORRSTF | regs::CSR_PINRSTF | 0x3);

        let reason = clocks.reset_reason();
        assert!(reason.contains(ResetReason::POWER_ON));
        assert!(reason.contains(ResetReason::PIN));
        assert!(!reason.contains(ResetReason::SOFTWARE));
        assert_eq!(reason.bits(), regs::CSR_PORRSTF | regs::CSR_PINRSTF);

        clocks.clear_reset_flags();
        assert!(regs.bits_set(regs::CSR, regs::CSR_RMVF));
    }
}
