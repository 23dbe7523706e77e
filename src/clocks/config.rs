/// Board clock configuration consumed at boot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClockConfig {
    /// Frequency of the crystal on `OSC_IN`/`OSC_OUT`. Fixed for the board.
    pub hse_freq: u32,
    /// System clock requested at boot. `None` leaves the chip running on
    /// the internal oscillator.
    pub sys_clk: Option<u32>,
    /// Number of polls of `HSERDY` before giving up on the crystal.
    pub hse_startup_polls: u32,
}

impl ClockConfig {
    pub const fn new(hse_freq: u32) -> Self {
        Self {
            hse_freq,
            sys_clk: None,
            hse_startup_polls: HSE_STARTUP_POLLS,
        }
    }

    pub const fn sys_clk(mut self, freq: u32) -> Self {
        self.sys_clk = Some(freq);
        self
    }

    pub const fn hse_startup_polls(mut self, polls: u32) -> Self {
        self.hse_startup_polls = polls;
        self
    }
}

impl Default for ClockConfig {
    /// 8 MHz crystal, 168 MHz core.
    fn default() -> Self {
        Self::new(8_000_000).sys_clk(168_000_000)
    }
}

/// Default `HSERDY` poll budget.
pub const HSE_STARTUP_POLLS: u32 = 0x0500;

/// Frequency of the internal RC oscillator.
pub const HSI_FREQ: u32 = 16_000_000;

/// ```text
///                    ┌─────┐
///      hsi ────────▶│0    │  ┌──────┐ vco_in  ┌──────┐ vco_out ┌──────┐
///                    │     │─▶│ / M  │────────▶│ x N  │───┬────▶│ / P  │──▶ pll_clk
///      hse ────────▶│1    │  └──────┘ 1..2MHz └──────┘   │     └──────┘
///                    └─────┘   2..=63           192..=432  │     ┌──────┐
///                       ▲                                  └────▶│ / Q  │──▶ pll48_clk
///                       │                                        └──────┘
///                 PLLCFGR.PLLSRC
/// ```
pub mod pll {
    pub const M_MIN: u32 = 2;
    pub const M_MAX: u32 = 63;
    pub const N_MIN: u32 = 192;
    pub const N_MAX: u32 = 432;

    /// VCO input window.
    pub const VCO_IN_MIN: u32 = 1_000_000;
    pub const VCO_IN_MAX: u32 = 2_000_000;

    /// `PLLP` encoding for the system clock output. The search targets
    /// `2 * sys_clk`, so this must stay at /2.
    pub const P_DIV2: u32 = 0;
    /// `PLLP` field value to divider.
    pub const P_TABLE: [u32; 4] = [2, 4, 6, 8];
    /// `PLLQ` divider for the 48 MHz domain (336 MHz / 7).
    pub const Q_DIV: u32 = 7;
}

/// Fixed bus prescaler policy applied by `set_system_clock`.
pub mod bus {
    /// AHB = SYSCLK
    pub const HPRE_DIV1: u32 = 0;
    /// APB1 = AHB / 4
    pub const PPRE1_DIV4: u32 = 5;
    /// APB2 = AHB / 2
    pub const PPRE2_DIV2: u32 = 4;
}
