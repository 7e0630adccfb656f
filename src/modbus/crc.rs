//! CRC-16/MODBUS.

const POLY: u16 = 0xA001;

/// Computes the Modbus RTU checksum (init 0xFFFF, reflected poly 0xA001).
#[must_use]
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ POLY;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}
