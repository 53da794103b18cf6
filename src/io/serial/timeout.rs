//! Timeout policy for serial reads and writes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Read and write timeouts of a serial port, in milliseconds.
///
/// The total budget of an N-byte read is
/// `read_timeout_constant + read_timeout_multiplier * N`, and likewise for writes.
/// The inter-byte timeout bounds the gap between two received bytes once the first
/// one has arrived: `0` disables it and [`Timeout::MAX`] means it never trips.
///
/// The default value is all zeros: reads and writes return whatever can be
/// transferred immediately.
///
/// # Example
///
/// ```
/// use sonia_common::io::serial::Timeout;
///
/// let timeout = Timeout::simple(250);
/// assert_eq!(timeout.total_read_ms(1), 250);
/// assert_eq!(timeout.total_read_ms(4096), 250);
/// assert!(timeout.inter_byte().is_none());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeout {
    /// Maximum gap between two received bytes.
    pub inter_byte_timeout: u32,
    /// Fixed part of the total read budget.
    pub read_timeout_constant: u32,
    /// Per-requested-byte part of the total read budget.
    pub read_timeout_multiplier: u32,
    /// Fixed part of the total write budget.
    pub write_timeout_constant: u32,
    /// Per-byte part of the total write budget.
    pub write_timeout_multiplier: u32,
}

impl Timeout {
    /// Sentinel meaning "no limit" for [`Timeout::inter_byte_timeout`].
    pub const MAX: u32 = u32::MAX;

    /// Build a timeout from all five components.
    pub const fn new(
        inter_byte_timeout: u32,
        read_timeout_constant: u32,
        read_timeout_multiplier: u32,
        write_timeout_constant: u32,
        write_timeout_multiplier: u32,
    ) -> Self {
        Self {
            inter_byte_timeout,
            read_timeout_constant,
            read_timeout_multiplier,
            write_timeout_constant,
            write_timeout_multiplier,
        }
    }

    /// A flat `millis` budget for reads and writes of any size, with no
    /// inter-byte limit.
    pub const fn simple(millis: u32) -> Self {
        Self::new(Self::MAX, millis, 0, millis, 0)
    }

    /// Total read budget for `size` bytes.
    pub fn total_read_ms(&self, size: usize) -> u64 {
        total(self.read_timeout_constant, self.read_timeout_multiplier, size)
    }

    /// Total write budget for `size` bytes.
    pub fn total_write_ms(&self, size: usize) -> u64 {
        total(self.write_timeout_constant, self.write_timeout_multiplier, size)
    }

    /// The inter-byte limit, or `None` when it is disabled or unlimited.
    pub fn inter_byte(&self) -> Option<Duration> {
        match self.inter_byte_timeout {
            0 | Self::MAX => None,
            millis => Some(Duration::from_millis(u64::from(millis))),
        }
    }
}

fn total(constant: u32, multiplier: u32, size: usize) -> u64 {
    let size = u64::try_from(size).unwrap_or(u64::MAX);
    u64::from(constant).saturating_add(u64::from(multiplier).saturating_mul(size))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiplier_scales_with_size() {
        let timeout = Timeout::new(0, 10, 2, 5, 3);
        assert_eq!(timeout.total_read_ms(0), 10);
        assert_eq!(timeout.total_read_ms(100), 210);
        assert_eq!(timeout.total_write_ms(100), 305);
    }

    #[test]
    fn totals_saturate() {
        let timeout = Timeout::new(0, u32::MAX, u32::MAX, 0, 0);
        assert_eq!(timeout.total_read_ms(usize::MAX), u64::MAX);
    }

    #[test]
    fn inter_byte_sentinels() {
        assert_eq!(Timeout::default().inter_byte(), None);
        assert_eq!(Timeout::simple(10).inter_byte(), None);
        assert_eq!(
            Timeout::new(20, 0, 0, 0, 0).inter_byte(),
            Some(Duration::from_millis(20))
        );
    }

    #[test]
    fn partial_config_keeps_defaults() {
        let timeout: Timeout = toml::from_str("read_timeout_constant = 100").unwrap();
        assert_eq!(timeout.read_timeout_constant, 100);
        assert_eq!(timeout.inter_byte_timeout, 0);
    }
}
