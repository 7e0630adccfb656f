//! Data types for device configuration and measurements.
//!
//! This module contains the core data structures used throughout the library:
//! - Device, antenna and serial port settings
//! - Periodic configuration slots
//! - Float reconstruction from register pairs

pub mod device;
pub mod measurement;
pub mod slot;

pub use device::{AntennaConfig, DeviceMode, Parity, PortConfig, StopBits, TargetPort};
pub use measurement::{registers_to_bytes, registers_to_f32, word_swapped_f32};
pub use slot::{ConfigurationSlot, DEVICE_REGISTER_MAP, SLOT_COUNT, SlotIndex, slot_table};
