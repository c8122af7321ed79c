//! Bit manipulation and memory access helpers shared by the VDP units

use std::ops::RangeInclusive;

pub trait GetBit: Copy {
    #[must_use]
    fn bit(self, i: u8) -> bool;

    #[must_use]
    fn bits(self, range: RangeInclusive<u8>) -> Self;
}

pub trait DepositBits: Copy {
    /// Replace the bits in `range` with the low bits of `value`.
    #[must_use]
    fn with_bits(self, range: RangeInclusive<u8>, value: Self) -> Self;

    #[must_use]
    fn with_bit(self, i: u8, value: bool) -> Self;
}

// Avoids the shift overflow when the range covers the full width
macro_rules! low_mask {
    ($t:ty, $len:expr) => {
        (<$t>::MAX >> (<$t>::BITS - u32::from($len)))
    };
}

macro_rules! impl_bit_ops {
    ($t:ty) => {
        impl GetBit for $t {
            #[inline(always)]
            fn bit(self, i: u8) -> bool {
                debug_assert!(i < (<$t>::BITS as u8));
                self & (1 << i) != 0
            }

            #[inline(always)]
            fn bits(self, range: RangeInclusive<u8>) -> Self {
                let start = *range.start();
                let end = *range.end();
                debug_assert!(end < (<$t>::BITS as u8));

                (self >> start) & low_mask!($t, end - start + 1)
            }
        }

        impl DepositBits for $t {
            #[inline(always)]
            fn with_bits(self, range: RangeInclusive<u8>, value: Self) -> Self {
                let start = *range.start();
                let end = *range.end();
                debug_assert!(end < (<$t>::BITS as u8));

                let mask = low_mask!($t, end - start + 1) << start;
                (self & !mask) | ((value << start) & mask)
            }

            #[inline(always)]
            fn with_bit(self, i: u8, value: bool) -> Self {
                let mask: $t = 1 << i;
                (self & !mask) | ((<$t>::from(value) << i) & mask)
            }
        }
    };
}

impl_bit_ops!(u8);
impl_bit_ops!(u16);
impl_bit_ops!(u32);
impl_bit_ops!(u64);

pub trait U16Ext {
    fn lsb(self) -> u8;

    fn msb(self) -> u8;

    fn set_lsb(&mut self, value: u8);

    fn set_msb(&mut self, value: u8);
}

impl U16Ext for u16 {
    #[inline(always)]
    fn lsb(self) -> u8 {
        self as u8
    }

    #[inline(always)]
    fn msb(self) -> u8 {
        (self >> 8) as u8
    }

    #[inline(always)]
    fn set_lsb(&mut self, value: u8) {
        *self = (*self & 0xFF00) | u16::from(value);
    }

    #[inline(always)]
    fn set_msb(&mut self, value: u8) {
        *self = (*self & 0x00FF) | (u16::from(value) << 8);
    }
}

pub trait U32Ext {
    fn high_word(self) -> u16;

    fn low_word(self) -> u16;

    fn set_high_word(&mut self, value: u16);

    fn set_low_word(&mut self, value: u16);
}

impl U32Ext for u32 {
    #[inline(always)]
    fn high_word(self) -> u16 {
        (self >> 16) as u16
    }

    #[inline(always)]
    fn low_word(self) -> u16 {
        self as u16
    }

    #[inline(always)]
    fn set_high_word(&mut self, value: u16) {
        *self = (*self & 0x0000_FFFF) | (u32::from(value) << 16);
    }

    #[inline(always)]
    fn set_low_word(&mut self, value: u16) {
        *self = (*self & 0xFFFF_0000) | u32::from(value);
    }
}

/// Sign extend the low `bits` bits of `value`.
#[inline(always)]
#[must_use]
pub fn sign_extend(value: u32, bits: u8) -> i32 {
    debug_assert!(bits > 0 && bits <= 32);
    let shift = 32 - u32::from(bits);
    ((value << shift) as i32) >> shift
}

/// Big-endian word read. `address` is masked to the slice length, which must be a power of two.
#[inline(always)]
#[must_use]
pub fn read_u16(memory: &[u8], address: usize) -> u16 {
    let mask = memory.len() - 1;
    let address = address & mask & !1;
    u16::from_be_bytes([memory[address], memory[address + 1]])
}

#[inline(always)]
pub fn write_u16(memory: &mut [u8], address: usize, value: u16) {
    let mask = memory.len() - 1;
    let address = address & mask & !1;
    let [msb, lsb] = value.to_be_bytes();
    memory[address] = msb;
    memory[address + 1] = lsb;
}

#[inline(always)]
#[must_use]
pub fn read_u32(memory: &[u8], address: usize) -> u32 {
    let high = read_u16(memory, address);
    let low = read_u16(memory, address.wrapping_add(2));
    (u32::from(high) << 16) | u32::from(low)
}

/// Swap the two bytes of every word in the slice. Slices of odd length leave the last byte alone.
pub fn byte_swap_words(memory: &mut [u8]) {
    for chunk in memory.chunks_exact_mut(2) {
        chunk.swap(0, 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_and_deposit() {
        let value: u16 = 0b1010_1100_0011_0101;
        assert_eq!(value.bits(4..=7), 0b0011);
        assert_eq!(value.bits(0..=15), value);
        assert!(value.bit(15));
        assert!(!value.bit(14));

        let deposited = value.with_bits(4..=7, 0b1111_1001);
        assert_eq!(deposited, 0b1010_1100_1001_0101);
        assert_eq!(0_u32.with_bits(0..=31, 0x1234_5678), 0x1234_5678);
        assert_eq!(0xFF_u8.with_bit(0, false), 0xFE);
    }

    #[test]
    fn sign_extension() {
        assert_eq!(sign_extend(0x7FF, 11), -1);
        assert_eq!(sign_extend(0x3FF, 11), 1023);
        assert_eq!(sign_extend(0x1000, 13), -4096);
        assert_eq!(sign_extend(0xFFFF_FFFF, 32), -1);
    }

    #[test]
    fn big_endian_access() {
        let mut memory = [0_u8; 8];
        write_u16(&mut memory, 2, 0xABCD);
        assert_eq!(memory[2..4], [0xAB, 0xCD]);
        assert_eq!(read_u16(&memory, 3), 0xABCD);
        assert_eq!(read_u16(&memory, 10), 0xABCD);

        write_u16(&mut memory, 4, 0x1234);
        assert_eq!(read_u32(&memory, 2), 0xABCD_1234);

        byte_swap_words(&mut memory);
        assert_eq!(read_u16(&memory, 2), 0xCDAB);
    }
}
