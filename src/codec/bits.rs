//! Bit and byte level integer access.
//!
//! Bit positions are counted from the start of the payload. Under big-endian
//! order bit 0 is the most significant bit of byte 0; under little-endian order
//! it is the least significant bit of byte 0. Multi-fragment fields are
//! concatenated with the first fragment as the most significant part.

use crate::domain::schema::{BitFragment, ByteOrder, MAX_INTEGER_BITS};
use crate::error::{CodecError, CodecResult};

fn bit_position(index: usize, order: ByteOrder) -> (usize, u8) {
    let byte = index / 8;
    let shift = match order {
        ByteOrder::Big => 7 - (index % 8) as u8,
        ByteOrder::Little => (index % 8) as u8,
    };
    (byte, shift)
}

fn check_width(bits: usize) -> CodecResult<()> {
    if bits > MAX_INTEGER_BITS {
        return Err(CodecError::IntegerTooWide {
            bits,
            max: MAX_INTEGER_BITS,
        });
    }
    Ok(())
}

/// Read `length` bits starting at bit `offset`.
pub fn extract_bits(payload: &[u8], offset: usize, length: usize, order: ByteOrder) -> CodecResult<u64> {
    check_width(length)?;
    let needed = (offset + length).div_ceil(8);
    if payload.len() < needed {
        return Err(CodecError::PayloadTooShort {
            needed,
            actual: payload.len(),
        });
    }

    let mut value = 0u64;
    for k in 0..length {
        let (byte, shift) = bit_position(offset + k, order);
        let bit = u64::from((payload[byte] >> shift) & 1);
        match order {
            ByteOrder::Big => value = (value << 1) | bit,
            ByteOrder::Little => value |= bit << k,
        }
    }
    Ok(value)
}

/// Read and concatenate several fragments, first fragment most significant.
pub fn extract_fragments(payload: &[u8], fragments: &[BitFragment], order: ByteOrder) -> CodecResult<u64> {
    check_width(total_bits(fragments))?;
    fragments.iter().try_fold(0u64, |acc, f| {
        let part = extract_bits(payload, f.offset, f.length, order)?;
        Ok((acc << f.length) | part)
    })
}

/// Write the low `length` bits of `value` starting at bit `offset`.
pub fn insert_bits(buf: &mut [u8], offset: usize, length: usize, order: ByteOrder, value: u64) {
    for k in 0..length {
        let bit = match order {
            ByteOrder::Big => (value >> (length - 1 - k)) & 1,
            ByteOrder::Little => (value >> k) & 1,
        };
        let (byte, shift) = bit_position(offset + k, order);
        if let Some(slot) = buf.get_mut(byte) {
            if bit == 1 {
                *slot |= 1 << shift;
            } else {
                *slot &= !(1 << shift);
            }
        }
    }
}

/// Split `value` across fragments, first fragment most significant.
pub fn insert_fragments(buf: &mut [u8], fragments: &[BitFragment], order: ByteOrder, value: u64) {
    let mut remaining = total_bits(fragments);
    for f in fragments {
        remaining -= f.length;
        let part = (value >> remaining) & mask(f.length);
        insert_bits(buf, f.offset, f.length, order, part);
    }
}

pub fn total_bits(fragments: &[BitFragment]) -> usize {
    fragments.iter().map(|f| f.length).sum()
}

fn mask(bits: usize) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// Interpret the low `bits` of `raw` as a two's complement number.
pub fn sign_extend(raw: u64, bits: usize) -> i64 {
    if bits == 0 || bits >= 64 {
        return raw as i64;
    }
    let shift = 64 - bits;
    ((raw << shift) as i64) >> shift
}

/// Read a whole-byte integer.
pub fn read_int(bytes: &[u8], order: ByteOrder, signed: bool) -> CodecResult<i64> {
    let bits = bytes.len() * 8;
    check_width(bits)?;
    let raw = match order {
        ByteOrder::Big => bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)),
        ByteOrder::Little => bytes.iter().rev().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)),
    };
    Ok(if signed { sign_extend(raw, bits) } else { raw as i64 })
}

/// Check that `value` fits a field of `bits` bits.
pub fn check_range(value: i64, bits: usize, signed: bool) -> CodecResult<u64> {
    check_width(bits)?;
    let wide = i128::from(value);
    let (min, max) = if bits == 0 {
        (0, 0)
    } else if signed {
        (-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1)
    } else {
        (0, (1i128 << bits) - 1)
    };
    if wide < min || wide > max {
        return Err(CodecError::OutOfRange { value: wide, bits });
    }
    Ok((value as u64) & mask(bits))
}

/// Encode an integer into exactly `width` bytes.
pub fn write_int(value: i64, width: usize, order: ByteOrder, signed: bool) -> CodecResult<Vec<u8>> {
    let raw = check_range(value, width * 8, signed)?;
    let mut out: Vec<u8> = (0..width).map(|i| (raw >> (8 * i)) as u8).collect();
    if order == ByteOrder::Big {
        out.reverse();
    }
    Ok(out)
}

/// Smallest byte count that can carry `value`.
pub fn minimal_width(value: i64, signed: bool) -> usize {
    (1..=MAX_INTEGER_BITS / 8)
        .find(|w| check_range(value, w * 8, signed).is_ok())
        .unwrap_or(MAX_INTEGER_BITS / 8)
}
