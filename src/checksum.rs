//! CRC-16 checksum over frame bodies.
//!
//! The 16-bit checksum in the frame header is CRC-16/ARC (polynomial
//! 0x8005, reflected, zero init). It operates on raw bytes, so the result
//! is identical across platforms regardless of host endianness.

use crc::{Crc, CRC_16_ARC};

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_ARC);

/// Computes the CRC-16 checksum over `data`.
pub fn compute(data: &[u8]) -> u16 {
    CRC16.checksum(data)
}
