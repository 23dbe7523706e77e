use paste::paste;

use super::{regs, Clock};

/// Bus a peripheral's clock gate lives on.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Bus {
    Ahb1,
    Ahb2,
    Ahb3,
    Apb1,
    Apb2,
}

impl Bus {
    /// Clock domain feeding peripherals on this bus.
    pub const fn clock(self) -> Clock {
        match self {
            Bus::Ahb1 | Bus::Ahb2 | Bus::Ahb3 => Clock::Ahb,
            Bus::Apb1 => Clock::Apb1,
            Bus::Apb2 => Clock::Apb2,
        }
    }
}

/// Location of a peripheral's enable and reset bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Gate {
    pub bus: Bus,
    pub enr: usize,
    pub rstr: usize,
    pub mask: u32,
}

macro_rules! peripherals {
    ($($peripheral:ident => $bus:ident[$bit:expr]),* $(,)?) => {
        paste! {
            /// Peripherals with a clock gate in the RCC.
            #[cfg_attr(feature = "defmt", derive(defmt::Format))]
            #[derive(Clone, Copy, Debug, PartialEq, Eq)]
            pub enum Peripheral {
                $($peripheral,)*
            }

            impl Peripheral {
                pub(crate) const fn gate(self) -> Gate {
                    match self {
                        $(
                            Peripheral::$peripheral => Gate {
                                bus: Bus::[<$bus:camel>],
                                enr: regs::[<$bus:upper ENR>],
                                rstr: regs::[<$bus:upper RSTR>],
                                mask: 1 << $bit,
                            },
                        )*
                    }
                }
            }
        }
    };
}

peripherals! {
    GpioA => ahb1[0],
    GpioB => ahb1[1],
    GpioC => ahb1[2],
    GpioD => ahb1[3],
    GpioE => ahb1[4],
    GpioF => ahb1[5],
    GpioG => ahb1[6],
    GpioH => ahb1[7],
    GpioI => ahb1[8],
    Crc => ahb1[12],
    Dma1 => ahb1[21],
    Dma2 => ahb1[22],
    Rng => ahb2[6],
    OtgFs => ahb2[7],
    Fsmc => ahb3[0],
    Tim2 => apb1[0],
    Tim3 => apb1[1],
    Tim4 => apb1[2],
    Tim5 => apb1[3],
    Tim6 => apb1[4],
    Tim7 => apb1[5],
    Tim12 => apb1[6],
    Tim13 => apb1[7],
    Tim14 => apb1[8],
    Wwdg => apb1[11],
    Spi2 => apb1[14],
    Spi3 => apb1[15],
    Usart2 => apb1[17],
    Usart3 => apb1[18],
    Uart4 => apb1[19],
    Uart5 => apb1[20],
    I2c1 => apb1[21],
    I2c2 => apb1[22],
    I2c3 => apb1[23],
    Can1 => apb1[25],
    Can2 => apb1[26],
    Pwr => apb1[28],
    Dac => apb1[29],
    Tim1 => apb2[0],
    Tim8 => apb2[1],
    Usart1 => apb2[4],
    Usart6 => apb2[5],
    Adc1 => apb2[8],
    Adc2 => apb2[9],
    Adc3 => apb2[10],
    Sdio => apb2[11],
    Spi1 => apb2[12],
    SysCfg => apb2[14],
    Tim9 => apb2[16],
    Tim10 => apb2[17],
    Tim11 => apb2[18],
}

impl Peripheral {
    pub const fn bus(self) -> Bus {
        self.gate().bus
    }
}
