//! Checksums used by the S-record format and the flashing protocols

use crc::{Crc, CRC_16_MODBUS, CRC_32_BZIP2};

/// CRC-32/BZIP2: poly 0x04C11DB7, init 0xFFFFFFFF, no reflection, xorout 0xFFFFFFFF
const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_BZIP2);

/// CRC-16/MODBUS: poly 0x8005 reflected, init 0xFFFF
const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Whole-image checksum sent to the ECU's integrity check routine.
pub fn crc32_bzip2(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}

/// Checksum compared against a CCP `BUILD_CHKSUM` result.
pub fn crc16_modbus(data: &[u8]) -> u16 {
    CRC16.checksum(data)
}

/// One's-complement sum used as the trailing byte of each S-record line.
///
/// `bytes` is the length byte followed by the address and data bytes.
pub fn record_checksum(bytes: &[u8]) -> u8 {
    let sum = bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    0xFF - sum
}
