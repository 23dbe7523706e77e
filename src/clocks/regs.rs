//! Reset and clock control (RCC) register map.
//!
//! Offsets are from [`RCC_BASE`]. Only the fields the clock manager touches
//! are named; everything else is written as a whole-register reset pattern.

use crate::mmio::Field;

pub const RCC_BASE: usize = 0x4002_3800;

pub const CR: usize = 0x00;
pub const PLLCFGR: usize = 0x04;
pub const CFGR: usize = 0x08;
pub const CIR: usize = 0x0C;
pub const AHB1RSTR: usize = 0x10;
pub const AHB2RSTR: usize = 0x14;
pub const AHB3RSTR: usize = 0x18;
pub const APB1RSTR: usize = 0x20;
pub const APB2RSTR: usize = 0x24;
pub const AHB1ENR: usize = 0x30;
pub const AHB2ENR: usize = 0x34;
pub const AHB3ENR: usize = 0x38;
pub const APB1ENR: usize = 0x40;
pub const APB2ENR: usize = 0x44;
pub const AHB1LPENR: usize = 0x50;
pub const AHB2LPENR: usize = 0x54;
pub const AHB3LPENR: usize = 0x58;
pub const APB1LPENR: usize = 0x60;
pub const APB2LPENR: usize = 0x64;
pub const BDCR: usize = 0x70;
pub const CSR: usize = 0x74;
pub const SSCGR: usize = 0x80;
pub const PLLI2SCFGR: usize = 0x84;

/// Size of the block in bytes (one past `PLLI2SCFGR`).
pub const BLOCK_SIZE: usize = 0x88;

// CR
pub const CR_HSION: u32 = 1 << 0;
pub const CR_HSIRDY: u32 = 1 << 1;
pub const CR_HSEON: u32 = 1 << 16;
pub const CR_HSERDY: u32 = 1 << 17;
pub const CR_PLLON: u32 = 1 << 24;
pub const CR_PLLRDY: u32 = 1 << 25;

// PLLCFGR
pub const PLLCFGR_PLLM: Field = Field::new(0, 6);
pub const PLLCFGR_PLLN: Field = Field::new(6, 9);
/// 0 = /2, 1 = /4, 2 = /6, 3 = /8
pub const PLLCFGR_PLLP: Field = Field::new(16, 2);
pub const PLLCFGR_PLLSRC: u32 = 1 << 22;
pub const PLLCFGR_PLLQ: Field = Field::new(24, 4);

// CFGR
/// 0 = HSI, 1 = HSE, 2 = PLL
pub const CFGR_SW: Field = Field::new(0, 2);
pub const CFGR_SWS: Field = Field::new(2, 2);
/// 0-7 = /1, 8 = /2, 9 = /4 ... 15 = /512
pub const CFGR_HPRE: Field = Field::new(4, 4);
/// 0-3 = /1, 4 = /2, 5 = /4, 6 = /8, 7 = /16
pub const CFGR_PPRE1: Field = Field::new(10, 3);
pub const CFGR_PPRE2: Field = Field::new(13, 3);

// APB1ENR
pub const APB1ENR_PWREN: u32 = 1 << 28;

// CSR reset flags
pub const CSR_RMVF: u32 = 1 << 24;
pub const CSR_BORRSTF: u32 = 1 << 25;
pub const CSR_PINRSTF: u32 = 1 << 26;
pub const CSR_PORRSTF: u32 = 1 << 27;
pub const CSR_SFTRSTF: u32 = 1 << 28;
pub const CSR_IWDGRSTF: u32 = 1 << 29;
pub const CSR_WWDGRSTF: u32 = 1 << 30;
pub const CSR_LPWRRSTF: u32 = 1 << 31;

/// Power-on values restored by `reset_clock()`.
pub mod reset_clock {
    /// HSION with the factory trim midpoint (HSITRIM = 16).
    pub const CR: u32 = 0x0000_0081;
    /// HSI selected, all prescalers /1.
    pub const CFGR: u32 = 0x0000_0000;
    pub const PLLCFGR: u32 = 0x2400_3010;
    pub const CIR: u32 = 0x0000_0000;
    pub const PLLI2SCFGR: u32 = 0x2000_3000;
}

/// Values written by `reset()` after `reset_clock()`, in write order.
pub const PERIPHERAL_RESET_SEQUENCE: [(usize, u32); 18] = [
    (AHB1RSTR, 0x0000_0000),
    (AHB2RSTR, 0x0000_0000),
    (AHB3RSTR, 0x0000_0000),
    (APB1RSTR, 0x0000_0000),
    (APB2RSTR, 0x0000_0000),
    // CCMDATARAMEN (bit 20) is never gated.
    (AHB1ENR, 0x0010_0000),
    (AHB2ENR, 0x0000_0000),
    (AHB3ENR, 0x0000_0000),
    (APB1ENR, 0x0000_0000),
    (APB2ENR, 0x0000_0000),
    (AHB1LPENR, 0x7e67_91ff),
    (AHB2LPENR, 0x0000_00f1),
    (AHB3LPENR, 0x0000_0001),
    (APB1LPENR, 0x36fe_c9ff),
    (APB2LPENR, 0x0007_5f33),
    (BDCR, 0x0000_0000),
    (CSR, 0x0e00_0000),
    (SSCGR, 0x0000_0000),
];
