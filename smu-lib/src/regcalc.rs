//! Register values for the firmware's timer, SPI and UART peripherals.
//!
//! Closed-form calculators for a PIC24 running at a 16 MHz instruction
//! clock. Out-of-range requests are clamped to the nearest setting the
//! peripheral can produce.

use std::str::FromStr;

use strum_macros::Display;

use crate::error::SmuError;

/// Instruction clock frequency.
pub const FCY: f64 = 16e6;
/// Instruction cycle time.
pub const TCY: f64 = 1.0 / FCY;

const SPI_MODE_BITS: [u16; 4] = [0x0100, 0x0000, 0x0140, 0x0040];

fn to_register(value: f64) -> u16 {
    value.clamp(0.0, f64::from(u16::MAX)) as u16
}

/// A named register and its value, e.g. `("PRx", 0x7A11)`.
pub type Register = (&'static str, u16);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerConfig {
    pub txcon: u16,
    pub prx: u16,
}

impl TimerConfig {
    pub fn registers(&self) -> [Register; 2] {
        [("TxCON", self.txcon), ("PRx", self.prx)]
    }
}

/// Timer control and period registers for a period in seconds.
pub fn timer_config(period_s: f64) -> TimerConfig {
    let period = period_s.min(256.0 * 65536.0 * TCY);
    let (txcon, prescale) = if period > 64.0 * 65536.0 * TCY {
        (0x0030, 256.0)
    } else if period > 8.0 * 65536.0 * TCY {
        (0x0020, 64.0)
    } else if period > 65536.0 * TCY {
        (0x0010, 8.0)
    } else {
        (0x0000, 1.0)
    };
    let prx = (period * (FCY / prescale)).trunc() - 1.0;
    TimerConfig {
        txcon,
        prx: to_register(prx),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpiConfig {
    pub spixcon1: u16,
    pub spixcon2: u16,
    pub spixstat: u16,
}

impl SpiConfig {
    pub fn registers(&self) -> [Register; 3] {
        [
            ("SPIxCON1", self.spixcon1),
            ("SPIxCON2", self.spixcon2),
            ("SPIxSTAT", self.spixstat),
        ]
    }
}

/// Master-mode SPI registers for the clock closest to `freq_hz`.
///
/// `mode` is the usual SPI mode 0 to 3 (clock polarity and phase); only the
/// low two bits are used.
pub fn spi_config(freq_hz: f64, mode: u8) -> SpiConfig {
    let freq = freq_hz.clamp(FCY / 512.0, FCY / 2.0);
    let (primary, prescale) = if freq <= FCY / 128.0 {
        (0u16, 64.0)
    } else if freq <= FCY / 32.0 {
        (1, 16.0)
    } else if freq <= FCY / 8.0 {
        (2, 4.0)
    } else {
        (3, 1.0)
    };

    let divider = (0.5 + FCY / (freq * prescale)).trunc() as u16;
    let secondary = 8u16.saturating_sub(divider) << 2;
    SpiConfig {
        spixcon1: 0x0020 | SPI_MODE_BITS[usize::from(mode & 0x03)] | primary | secondary,
        spixcon2: 0,
        spixstat: 0x8000,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
pub enum Parity {
    #[default]
    #[strum(to_string = "n")]
    None,
    #[strum(to_string = "e")]
    Even,
    #[strum(to_string = "o")]
    Odd,
}

impl Parity {
    fn mode_bits(self) -> u16 {
        match self {
            Parity::None => 0x0000,
            Parity::Even => 0x0002,
            Parity::Odd => 0x0004,
        }
    }
}

impl FromStr for Parity {
    type Err = SmuError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "n" | "none" => Ok(Parity::None),
            "e" | "even" => Ok(Parity::Even),
            "o" | "odd" => Ok(Parity::Odd),
            _ => Err(SmuError::Protocol(format!("unknown parity {s:?}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
pub enum StopBits {
    #[default]
    #[strum(to_string = "1")]
    One,
    #[strum(to_string = "2")]
    Two,
}

impl FromStr for StopBits {
    type Err = SmuError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1" => Ok(StopBits::One),
            "2" => Ok(StopBits::Two),
            _ => Err(SmuError::Protocol(format!("unsupported stop bits {s:?}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UartConfig {
    pub uxmode: u16,
    pub uxbrg: u16,
}

impl UartConfig {
    pub fn registers(&self) -> [Register; 2] {
        [("UxMODE", self.uxmode), ("UxBRG", self.uxbrg)]
    }
}

/// UART mode and baud rate generator registers.
///
/// The high-speed baud generator (BRGH) is used unless the rate is too low
/// for its 16-bit divider.
pub fn uart_config(baud: f64, parity: Parity, stop_bits: StopBits, flow_control: bool) -> UartConfig {
    let baud = baud.clamp(FCY / (16.0 * 65536.0), FCY / 4.0);
    let mut uxmode = if flow_control { 0x0200 } else { 0 };

    let brg = if baud <= FCY / (4.0 * 65536.0) {
        (0.5 + (FCY / 16.0) / baud).trunc() - 1.0
    } else {
        uxmode |= 0x0008;
        (0.5 + (FCY / 4.0) / baud).trunc() - 1.0
    };

    uxmode |= parity.mode_bits();
    if stop_bits == StopBits::Two {
        uxmode |= 0x0001;
    }
    UartConfig {
        uxmode,
        uxbrg: to_register(brg),
    }
}
