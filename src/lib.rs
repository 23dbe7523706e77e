#![cfg_attr(not(test), no_std)]
//! Clock tree control and trap/event dispatch for STM32F4 firmware.
//!
//! - [`clocks`]: HSI/HSE/PLL management, bus frequencies, peripheral clock
//!   gates and change notification for drivers.
//! - [`system`]: the boot-time singleton routing traps and interrupts, the
//!   interrupt to main-loop event queue, memory accounting and the tick counter.
//! - [`command`]: the interface console commands implement.
//!
//! ## Feature flags
#![doc = document_features::document_features!(feature_label = r#"<span class="stab portability"><code>{feature}</code></span>"#)]

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

mod cpu;

pub mod clocks;
pub mod command;
pub mod mmio;
pub mod system;

pub use clocks::{ClockConfig, ClockControl, ClockError};
pub use system::{Platform, System, SystemError};
