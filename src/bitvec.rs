//! Fixed-length bit vector used for existence maps and bitmap record sets.
//!
//! The vector is byte-aligned and MSB-first: bit 0 is the 0x80 bit of byte 0.
//! Counting, inversion, and bit reversal go through 256-entry lookup tables
//! derived once at first use; bulk `count` calls in particular are on the
//! hot path of segment flushes and must not walk individual bits.
//!
//! Indexing accepts negative positions counted from the end, in keeping with
//! the record-set code this module serves.

use lazy_static::lazy_static;

use crate::error::{FalxError, Result};

lazy_static! {
    /// For each byte value, the ordered positions (0..8, MSB first) of its
    /// set bits.
    static ref BITS_SET: Vec<Vec<u8>> = (0u16..256)
        .map(|i| (0u8..8).filter(|j| i & (128 >> j) != 0).collect())
        .collect();

    /// For each byte value, its population count.
    static ref BITS_COUNT: [u8; 256] = {
        let mut t = [0u8; 256];
        for (i, slot) in t.iter_mut().enumerate() {
            *slot = BITS_SET[i].len() as u8;
        }
        t
    };

    /// For each byte value, the byte with its bit order reversed.
    static ref REVERSED_BITS: [u8; 256] = {
        let mut t = [0u8; 256];
        for (i, slot) in t.iter_mut().enumerate() {
            *slot = BITS_SET[i]
                .iter()
                .map(|&j| 128u8 >> (8 - j - 1))
                .sum();
        }
        t
    };

    /// For each byte value, its complement.
    static ref INVERTED_BITS: [u8; 256] = {
        let mut t = [0u8; 256];
        for (i, slot) in t.iter_mut().enumerate() {
            *slot = !(i as u8);
        }
        t
    };
}

/// A fixed-length, byte-aligned sequence of bits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitVector {
    ba: Vec<u8>,
}

impl BitVector {
    /// Create an all-zero vector holding at least `bits` bits, rounded up to
    /// a whole number of bytes.
    pub fn new(bits: usize) -> Self {
        BitVector {
            ba: vec![0u8; bits.div_ceil(8)],
        }
    }

    /// Create a vector from its serialized bytes.
    pub fn from_bytes(buf: &[u8]) -> Self {
        BitVector { ba: buf.to_vec() }
    }

    /// Serialize the vector; `from_bytes` round-trips exactly.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.ba.clone()
    }

    /// Length in bits.
    pub fn len(&self) -> usize {
        self.ba.len() * 8
    }

    /// True when the vector holds no bits at all.
    pub fn is_empty(&self) -> bool {
        self.ba.is_empty()
    }

    /// Map a possibly negative index into `[0, len)`.
    fn resolve(&self, index: isize) -> Result<usize> {
        let length = self.len();
        let resolved = if index < 0 {
            index + length as isize
        } else {
            index
        };
        if resolved < 0 || resolved >= length as isize {
            return Err(FalxError::BitIndex { index, length });
        }
        Ok(resolved as usize)
    }

    /// Read the bit at `index`; negative indices count from the end.
    pub fn get(&self, index: isize) -> Result<bool> {
        let i = self.resolve(index)?;
        Ok(self.ba[i / 8] & (128 >> (i % 8)) != 0)
    }

    /// Write the bit at `index`; negative indices count from the end.
    pub fn set(&mut self, index: isize, value: bool) -> Result<()> {
        let i = self.resolve(index)?;
        let mask = 128u8 >> (i % 8);
        if value {
            self.ba[i / 8] |= mask;
        } else {
            self.ba[i / 8] &= !mask;
        }
        Ok(())
    }

    /// Set every bit to `value`.
    pub fn set_all(&mut self, value: bool) {
        let fill = if value { 0xff } else { 0x00 };
        self.ba.fill(fill);
    }

    /// Number of set bits, one table lookup per byte.
    pub fn count(&self) -> usize {
        self.ba.iter().map(|&b| BITS_COUNT[b as usize] as usize).sum()
    }

    /// True when every bit is set.
    pub fn all(&self) -> bool {
        self.ba.iter().all(|&b| b == 0xff)
    }

    /// True when any bit is set.
    pub fn any(&self) -> bool {
        self.ba.iter().any(|&b| b != 0)
    }

    fn check_length(&self, other: &BitVector) -> Result<()> {
        if self.len() != other.len() {
            return Err(FalxError::BitLength {
                left: self.len(),
                right: other.len(),
            });
        }
        Ok(())
    }

    /// Bitwise AND into a new vector; lengths must match.
    pub fn and(&self, other: &BitVector) -> Result<BitVector> {
        self.check_length(other)?;
        Ok(BitVector {
            ba: self
                .ba
                .iter()
                .zip(other.ba.iter())
                .map(|(&a, &b)| a & b)
                .collect(),
        })
    }

    /// Bitwise OR into a new vector; lengths must match.
    pub fn or(&self, other: &BitVector) -> Result<BitVector> {
        self.check_length(other)?;
        Ok(BitVector {
            ba: self
                .ba
                .iter()
                .zip(other.ba.iter())
                .map(|(&a, &b)| a | b)
                .collect(),
        })
    }

    /// Bitwise XOR into a new vector; lengths must match.
    pub fn xor(&self, other: &BitVector) -> Result<BitVector> {
        self.check_length(other)?;
        Ok(BitVector {
            ba: self
                .ba
                .iter()
                .zip(other.ba.iter())
                .map(|(&a, &b)| a ^ b)
                .collect(),
        })
    }

    /// In-place bitwise AND; lengths must match.
    pub fn and_assign(&mut self, other: &BitVector) -> Result<()> {
        self.check_length(other)?;
        for (a, &b) in self.ba.iter_mut().zip(other.ba.iter()) {
            *a &= b;
        }
        Ok(())
    }

    /// In-place bitwise OR; lengths must match.
    pub fn or_assign(&mut self, other: &BitVector) -> Result<()> {
        self.check_length(other)?;
        for (a, &b) in self.ba.iter_mut().zip(other.ba.iter()) {
            *a |= b;
        }
        Ok(())
    }

    /// In-place bitwise XOR; lengths must match.
    pub fn xor_assign(&mut self, other: &BitVector) -> Result<()> {
        self.check_length(other)?;
        for (a, &b) in self.ba.iter_mut().zip(other.ba.iter()) {
            *a ^= b;
        }
        Ok(())
    }

    /// Complement every bit in place.
    pub fn invert(&mut self) {
        for b in self.ba.iter_mut() {
            *b = INVERTED_BITS[*b as usize];
        }
    }

    /// Reverse the bit order across the whole vector.
    pub fn reverse(&mut self) {
        self.ba.reverse();
        for b in self.ba.iter_mut() {
            *b = REVERSED_BITS[*b as usize];
        }
    }

    /// Ordered positions of all set bits.
    pub fn search(&self) -> Vec<usize> {
        let mut positions = Vec::new();
        for (byte_index, &b) in self.ba.iter().enumerate() {
            for &j in BITS_SET[b as usize].iter() {
                positions.push(byte_index * 8 + j as usize);
            }
        }
        positions
    }

    /// First position in `[start, stop]` (stop inclusive) holding `value`.
    ///
    /// The range endpoints may fall in the same byte or in different bytes;
    /// both shapes are handled, with whole middle bytes rejected by value
    /// before any bit is examined.
    pub fn index_of(&self, value: bool, start: usize, stop: usize) -> Result<usize> {
        let length = self.len();
        if start >= length || stop >= length || start > stop {
            return Err(FalxError::BitIndex {
                index: stop.max(start) as isize,
                length,
            });
        }
        let not_found = FalxError::BitNotFound { value, start, stop };
        let first_byte = start / 8;
        let last_byte = stop / 8;
        if first_byte == last_byte {
            for pos in start..=stop {
                if self.bit_at(pos) == value {
                    return Ok(pos);
                }
            }
            return Err(not_found);
        }
        // Trailing bits of the partial first byte.
        for pos in start..(first_byte + 1) * 8 {
            if self.bit_at(pos) == value {
                return Ok(pos);
            }
        }
        // Whole bytes between the endpoints.
        let reject = if value { 0x00 } else { 0xff };
        for byte_index in first_byte + 1..last_byte {
            if self.ba[byte_index] == reject {
                continue;
            }
            for pos in byte_index * 8..(byte_index + 1) * 8 {
                if self.bit_at(pos) == value {
                    return Ok(pos);
                }
            }
        }
        // Leading bits of the partial last byte.
        for pos in last_byte * 8..=stop {
            if self.bit_at(pos) == value {
                return Ok(pos);
            }
        }
        Err(not_found)
    }

    /// First position at or after `start` holding `value`, searching to the
    /// end of the vector.
    pub fn index_from(&self, value: bool, start: usize) -> Result<usize> {
        if self.ba.is_empty() {
            return Err(FalxError::BitIndex {
                index: start as isize,
                length: 0,
            });
        }
        self.index_of(value, start, self.len() - 1)
    }

    fn bit_at(&self, pos: usize) -> bool {
        self.ba[pos / 8] & (128 >> (pos % 8)) != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Byte patterns reused from the original regression suite.
    const TEN: &[u8] = b"\x08\x00\xff\x00\x0a\x00\x81\x00\xff\x02";
    const ALL: &[u8] = b"\xff\xff\xff\xff\xff\xff\xff\xff\xff\xff";

    #[test]
    fn table_derivation() {
        // Spot checks that the tables were derived, not hand-entered.
        assert_eq!(BITS_SET[0x03], vec![6, 7]);
        assert_eq!(BITS_SET[0x80], vec![0]);
        assert_eq!(BITS_COUNT[0xff], 8);
        assert_eq!(BITS_COUNT[0x0a], 2);
        assert_eq!(REVERSED_BITS[0x01], 0x80);
        assert_eq!(REVERSED_BITS[0x0a], 0x50);
        assert_eq!(INVERTED_BITS[0x03], 0xfc);
    }

    #[test]
    fn get_set_negative_indexing() {
        let mut v = BitVector::from_bytes(b"\x03");
        assert!(v.get(-9).is_err());
        assert!(v.get(8).is_err());
        assert!(!v.get(-8).unwrap());
        assert!(v.get(-2).unwrap());
        assert!(v.get(-1).unwrap());
        assert!(!v.get(0).unwrap());
        assert!(v.get(6).unwrap());
        assert!(v.get(7).unwrap());

        v.set(-8, true).unwrap();
        assert_eq!(v.to_bytes(), b"\x83");
        v.set(-8, false).unwrap();
        assert_eq!(v.to_bytes(), b"\x03");
        v.set(4, true).unwrap();
        assert_eq!(v.to_bytes(), b"\x0b");
        v.set(4, false).unwrap();
        v.set(7, false).unwrap();
        assert_eq!(v.to_bytes(), b"\x02");
        assert!(v.set(8, true).is_err());
        assert!(v.set(-9, true).is_err());
    }

    #[test]
    fn binary_ops() {
        let one = BitVector::from_bytes(b"\x03");
        let two = BitVector::from_bytes(b"\x05");
        assert_eq!(one.and(&two).unwrap().to_bytes(), b"\x01");
        assert_eq!(one.or(&two).unwrap().to_bytes(), b"\x07");
        assert_eq!(one.xor(&two).unwrap().to_bytes(), b"\x06");
        // Operands unchanged.
        assert_eq!(one.to_bytes(), b"\x03");
        assert_eq!(two.to_bytes(), b"\x05");

        let ten = BitVector::from_bytes(TEN);
        let all = BitVector::from_bytes(ALL);
        assert_eq!(ten.and(&all).unwrap().to_bytes(), TEN);
        assert_eq!(ten.or(&all).unwrap().to_bytes(), ALL);
        assert_eq!(
            ten.xor(&all).unwrap().to_bytes(),
            b"\xf7\xff\x00\xff\xf5\xff\x7e\xff\x00\xfd"
        );
    }

    #[test]
    fn in_place_ops() {
        let mut one = BitVector::from_bytes(b"\x03");
        let two = BitVector::from_bytes(b"\x05");
        one.and_assign(&two).unwrap();
        assert_eq!(one.to_bytes(), b"\x01");
        let mut one = BitVector::from_bytes(b"\x03");
        one.or_assign(&two).unwrap();
        assert_eq!(one.to_bytes(), b"\x07");
        let mut one = BitVector::from_bytes(b"\x03");
        one.xor_assign(&two).unwrap();
        assert_eq!(one.to_bytes(), b"\x06");
    }

    #[test]
    fn length_mismatch_fails_loudly() {
        let short = BitVector::from_bytes(b"\x03");
        let long = BitVector::from_bytes(TEN);
        assert!(matches!(
            short.or(&long),
            Err(FalxError::BitLength { left: 8, right: 80 })
        ));
        let mut short = short;
        assert!(short.xor_assign(&long).is_err());
    }

    #[test]
    fn invert_is_self_inverse() {
        let mut ten = BitVector::from_bytes(TEN);
        ten.invert();
        assert_eq!(ten.to_bytes(), b"\xf7\xff\x00\xff\xf5\xff\x7e\xff\x00\xfd");
        ten.invert();
        assert_eq!(ten.to_bytes(), TEN);
    }

    #[test]
    fn reverse_is_self_inverse() {
        let mut ten = BitVector::from_bytes(TEN);
        ten.reverse();
        assert_eq!(ten.to_bytes(), b"\x40\xff\x00\x81\x00\x50\x00\xff\x00\x10");
        ten.reverse();
        assert_eq!(ten.to_bytes(), TEN);
    }

    #[test]
    fn count_all_any() {
        let mut all = BitVector::from_bytes(ALL);
        let mut ten = BitVector::from_bytes(TEN);
        assert_eq!(all.count(), 80);
        assert_eq!(ten.count(), 22);
        assert!(all.all());
        assert!(all.any());
        assert!(!ten.all());
        assert!(ten.any());
        all.set(4, false).unwrap();
        assert_eq!(all.count(), 79);
        assert!(!all.all());
        ten.set(4, false).unwrap();
        assert_eq!(ten.count(), 21);
        ten.set(28, true).unwrap();
        assert_eq!(ten.count(), 22);
        let zero = BitVector::new(80);
        assert!(!zero.any());
        assert_eq!(zero.count(), 0);
    }

    #[test]
    fn search_positions() {
        let one = BitVector::from_bytes(b"\x03");
        let two = BitVector::from_bytes(b"\x05");
        let ten = BitVector::from_bytes(TEN);
        let all = BitVector::from_bytes(ALL);
        assert_eq!(one.search(), vec![6, 7]);
        assert_eq!(two.search(), vec![5, 7]);
        assert_eq!(
            ten.search(),
            vec![
                4, 16, 17, 18, 19, 20, 21, 22, 23, 36, 38, 48, 55, 64, 65, 66, 67, 68, 69,
                70, 71, 78
            ]
        );
        assert_eq!(all.search(), (0..80).collect::<Vec<_>>());
    }

    #[test]
    fn count_matches_search() {
        for pattern in [&b"\x03"[..], TEN, ALL, b"\x00\x00"] {
            let v = BitVector::from_bytes(pattern);
            assert_eq!(v.count(), v.search().len());
        }
    }

    #[test]
    fn get_agrees_with_search() {
        let ten = BitVector::from_bytes(TEN);
        let positions = ten.search();
        for i in 0..ten.len() {
            assert_eq!(ten.get(i as isize).unwrap(), positions.contains(&i));
        }
    }

    #[test]
    fn round_trip_bytes() {
        for pattern in [&b"\x03"[..], TEN, ALL] {
            let v = BitVector::from_bytes(pattern);
            assert_eq!(BitVector::from_bytes(&v.to_bytes()), v);
        }
    }

    #[test]
    fn index_walks_set_bits() {
        let ten = BitVector::from_bytes(TEN);
        let mut walked = Vec::new();
        let mut start = 0;
        while let Ok(pos) = ten.index_from(true, start) {
            walked.push(pos);
            start = pos + 1;
            if start >= ten.len() {
                break;
            }
        }
        assert_eq!(walked, ten.search());

        let six = BitVector::from_bytes(b"\x80\x00\x00\x00\x00\x01");
        assert_eq!(six.index_from(true, 0).unwrap(), 0);
        assert_eq!(six.index_from(true, 1).unwrap(), 47);
    }

    #[test]
    fn index_boundary_cases() {
        // The four start/stop shapes the original was patched for: same
        // byte with and without a hit, and cross-byte hits in the first and
        // last partial byte.
        let ten = BitVector::from_bytes(TEN);
        assert_eq!(ten.index_of(true, 49, 55).unwrap(), 55);
        assert!(matches!(
            ten.index_of(true, 49, 54),
            Err(FalxError::BitNotFound { .. })
        ));
        assert_eq!(ten.index_of(false, 38, 39).unwrap(), 39);
        assert!(ten.index_of(false, 38, 38).is_err());
        assert_eq!(ten.index_of(false, 16, 24).unwrap(), 24);
        assert!(ten.index_of(false, 16, 23).is_err());
        assert_eq!(ten.index_of(false, 16, 50).unwrap(), 24);
    }

    #[test]
    fn index_out_of_range() {
        let one = BitVector::from_bytes(b"\x03");
        assert!(one.index_of(true, 0, 8).is_err());
        assert!(one.index_of(true, 8, 8).is_err());
        assert!(one.index_of(true, 5, 3).is_err());

        let empty = BitVector::new(0);
        assert!(matches!(
            empty.index_from(true, 0),
            Err(FalxError::BitIndex { length: 0, .. })
        ));
    }

    #[test]
    fn set_all_fills() {
        let mut ten = BitVector::from_bytes(TEN);
        ten.set_all(true);
        assert_eq!(ten.to_bytes(), ALL);
        ten.set_all(false);
        assert_eq!(ten.to_bytes(), vec![0u8; 10]);
    }
}
