//! CRC-16/CCITT-FALSE frame checksum.
//!
//! Polynomial 0x1021, initial value 0xFFFF, MSB-first, no reflection and no
//! final XOR. The same function stamps outbound frames and verifies inbound
//! ones.

const POLYNOMIAL: u16 = 0x1021;
const INIT: u16 = 0xFFFF;

/// Checksum over a single contiguous span.
#[inline]
pub fn crc16(data: &[u8]) -> u16 {
    crc16_update(INIT, data)
}

/// Checksum over several spans treated as one message.
///
/// Lets the decoder verify a frame that wraps inside the ring without
/// copying it out first.
pub fn crc16_chunks<'a, I>(chunks: I) -> u16
where
    I: IntoIterator<Item = &'a [u8]>,
{
    chunks.into_iter().fold(INIT, crc16_update)
}

fn crc16_update(mut crc: u16, data: &[u8]) -> u16 {
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ POLYNOMIAL;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}
