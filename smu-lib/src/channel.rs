//! Selectors for the instrument's outputs and inputs.
//!
//! Each selector displays as the name fragment the firmware's command table
//! uses, e.g. `Led::Led2` -> `LED2`, `Sampling::Average` -> `AVG`.

use strum_macros::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Led {
    #[strum(to_string = "LED1")]
    Led1,
    #[strum(to_string = "LED2")]
    Led2,
    #[strum(to_string = "LED3")]
    Led3,
}

/// Single-ended outputs of the 10-bit DAC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Dac10Output {
    #[strum(to_string = "DAC1")]
    Dac1,
    #[strum(to_string = "DAC2")]
    Dac2,
}

/// Raw outputs of the quad 16-bit DAC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Dac16Output {
    #[strum(to_string = "DAC0")]
    Dac0,
    #[strum(to_string = "DAC1")]
    Dac1,
    #[strum(to_string = "DAC2")]
    Dac2,
    #[strum(to_string = "DAC3")]
    Dac3,
}

/// One of the two differential channels (DAC16 pairs, ADC16, ADC24).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Channel {
    #[strum(to_string = "CH1")]
    Ch1,
    #[strum(to_string = "CH2")]
    Ch2,
}

/// Which reading an ADC query returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
pub enum Sampling {
    /// Latest calibrated sample.
    #[default]
    #[strum(to_string = "")]
    Latest,
    /// Running average of calibrated samples.
    #[strum(to_string = "AVG")]
    Average,
    /// Uncalibrated converter output.
    #[strum(to_string = "RAW")]
    Raw,
}

/// Digital output port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Port {
    D,
    E,
}

impl Port {
    /// Number of individually addressable bits (`RD0`..`RD6`).
    pub const BITS: u8 = 7;
}
