//! Framing parameters of a serial line.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SoniaError};

/// Number of data bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ByteSize {
    /// 5 data bits.
    Five,
    /// 6 data bits.
    Six,
    /// 7 data bits.
    Seven,
    /// 8 data bits.
    #[default]
    Eight,
}

impl ByteSize {
    /// Number of data bits.
    pub const fn bits(self) -> u8 {
        match self {
            ByteSize::Five => 5,
            ByteSize::Six => 6,
            ByteSize::Seven => 7,
            ByteSize::Eight => 8,
        }
    }
}

impl TryFrom<u8> for ByteSize {
    type Error = SoniaError;

    fn try_from(bits: u8) -> Result<Self> {
        match bits {
            5 => Ok(ByteSize::Five),
            6 => Ok(ByteSize::Six),
            7 => Ok(ByteSize::Seven),
            8 => Ok(ByteSize::Eight),
            other => Err(SoniaError::invalid(format!(
                "invalid byte size {other}, expected 5 to 8"
            ))),
        }
    }
}

impl From<ByteSize> for u8 {
    fn from(size: ByteSize) -> Self {
        size.bits()
    }
}

/// Parity bit mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    /// No parity bit.
    #[default]
    None,
    /// Odd parity.
    Odd,
    /// Even parity.
    Even,
    /// Parity bit always set.
    Mark,
    /// Parity bit always clear.
    Space,
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopBits {
    /// One stop bit.
    #[default]
    One,
    /// One and a half stop bits.
    OnePointFive,
    /// Two stop bits.
    Two,
}

impl StopBits {
    /// Duration of the stop condition, in bit times.
    pub fn bit_times(self) -> f64 {
        match self {
            StopBits::One => 1.0,
            StopBits::OnePointFive => 1.5,
            StopBits::Two => 2.0,
        }
    }
}

/// Flow control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowControl {
    /// No flow control.
    #[default]
    None,
    /// XON/XOFF.
    Software,
    /// RTS/CTS.
    Hardware,
}

/// Complete framing of a serial line. Defaults to 9600 8N1 without flow control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    /// Line speed in bits per second.
    pub baudrate: u32,
    /// Data bits per character.
    pub bytesize: ByteSize,
    /// Parity mode.
    pub parity: Parity,
    /// Stop bits.
    pub stopbits: StopBits,
    /// Flow control mode.
    pub flowcontrol: FlowControl,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baudrate: 9600,
            bytesize: ByteSize::default(),
            parity: Parity::default(),
            stopbits: StopBits::default(),
            flowcontrol: FlowControl::default(),
        }
    }
}

impl SerialSettings {
    /// Reject values no backend can express.
    pub fn validate(&self) -> Result<()> {
        if self.baudrate == 0 {
            return Err(SoniaError::invalid("baud rate must be positive"));
        }
        Ok(())
    }

    /// Transmission time of one character in nanoseconds: start bit, data bits,
    /// parity bit and stop bits at the configured baud rate.
    pub fn byte_time_ns(&self) -> u64 {
        if self.baudrate == 0 {
            return 0;
        }
        let parity_bits = if self.parity == Parity::None { 0.0 } else { 1.0 };
        let bits = 1.0 + f64::from(self.bytesize.bits()) + parity_bits + self.stopbits.bit_times();
        (1e9 * bits / f64::from(self.baudrate)) as u64
    }
}

impl fmt::Display for SerialSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parity = match self.parity {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
            Parity::Mark => 'M',
            Parity::Space => 'S',
        };
        let stop = match self.stopbits {
            StopBits::One => "1",
            StopBits::OnePointFive => "1.5",
            StopBits::Two => "2",
        };
        write!(
            f,
            "{} {}{}{}",
            self.baudrate,
            self.bytesize.bits(),
            parity,
            stop
        )
    }
}
