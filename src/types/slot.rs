//! Periodic polling slots.

use std::fmt;

use crate::error::Error;
use crate::types::device::TargetPort;

/// Number of periodic configuration slots a device supports.
pub const SLOT_COUNT: usize = 8;

/// Index of a periodic configuration slot, always within `1..=8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotIndex(u8);

impl SlotIndex {
    /// First slot.
    pub const FIRST: Self = Self(1);

    /// Last slot.
    pub const LAST: Self = Self(SLOT_COUNT as u8);

    /// Creates a slot index, returning `None` outside `1..=8`.
    #[must_use]
    pub const fn new(index: u8) -> Option<Self> {
        if index >= 1 && index as usize <= SLOT_COUNT {
            Some(Self(index))
        } else {
            None
        }
    }

    /// Returns the raw index.
    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }

    /// Iterates over all slots in order.
    pub fn all() -> impl Iterator<Item = Self> {
        (1..=SLOT_COUNT as u8).map(Self)
    }
}

impl TryFrom<u8> for SlotIndex {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| Error::InvalidArgument {
            reason: format!("slot index must be 1..={SLOT_COUNT}, got {value}"),
        })
    }
}

impl fmt::Display for SlotIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One periodic polling job: read `register_count` input registers starting
/// at `register_address` every `interval_secs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigurationSlot {
    /// Slot on the device.
    pub index: SlotIndex,
    /// First input register.
    pub register_address: u16,
    /// Number of registers.
    pub register_count: u16,
    /// Polling interval in seconds.
    pub interval_secs: u32,
    /// Serial port the slave sits on.
    pub target_port: TargetPort,
}

/// Register ranges of the measurement device, in slot order.
///
/// Slot 1 holds the two-register voltage reading.
pub const DEVICE_REGISTER_MAP: [(u16, u16); SLOT_COUNT] = [
    (0x0000, 2),
    (0x0006, 2),
    (0x000b, 18),
    (0x0024, 2),
    (0x0046, 2),
    (0x0048, 8),
    (0x0056, 2),
    (0x0156, 4),
];

/// Builds the full slot table for the measurement device.
#[must_use]
pub fn slot_table(interval_secs: u32, target_port: TargetPort) -> Vec<ConfigurationSlot> {
    SlotIndex::all()
        .zip(DEVICE_REGISTER_MAP)
        .map(|(index, (register_address, register_count))| ConfigurationSlot {
            index,
            register_address,
            register_count,
            interval_secs,
            target_port,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_bounds() {
        assert!(SlotIndex::new(0).is_none());
        assert!(SlotIndex::new(9).is_none());
        assert_eq!(SlotIndex::new(8), Some(SlotIndex::LAST));
        assert_eq!(SlotIndex::all().count(), SLOT_COUNT);
    }

    #[test]
    fn test_slot_table() {
        let table = slot_table(120, TargetPort::Port1);
        assert_eq!(table.len(), 8);
        assert_eq!(table[0].index, SlotIndex::FIRST);
        assert_eq!(table[2].register_address, 0x0b);
        assert_eq!(table[2].register_count, 18);
        assert_eq!(table[7].register_address, 0x156);
        assert!(table.iter().all(|s| s.interval_secs == 120));
        assert!(
            table
                .windows(2)
                .all(|w| w[1].index.get() == w[0].index.get() + 1)
        );
    }
}
