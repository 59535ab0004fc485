//! CRC-8 after Maxim/Dallas (1-Wire), processed LSB first.
//!
//! The controller verifies this value on every LINE command. It is the
//! reflected form of polynomial 0x31, hence the 0x8C feedback constant.

use log::*;

/// feedback constant for the reflected Maxim polynomial
const FEEDBACK: u8 = 0x8C;

/// Fold `data` into a running accumulator
///
/// Each byte is shifted through eight rounds, least significant bit first.
/// Passing the result of one call as `crc` of the next gives the same value
/// as a single call over the concatenated data.
pub fn update(mut crc: u8, data: &[u8]) -> u8 {
    for &byte in data {
        let mut n = byte;
        for _ in 0..8 {
            let bit = (crc ^ n) & 1;
            crc >>= 1;
            if bit != 0 {
                crc ^= FEEDBACK;
            }
            n >>= 1;
        }
    }
    crc
}

/// Checksum of `data` with the accumulator starting at zero
pub fn crc8(data: &[u8]) -> u8 {
    let crc = update(0, data);
    trace!("crc8 over {} bytes: 0x{:02x}", data.len(), crc);
    crc
}
