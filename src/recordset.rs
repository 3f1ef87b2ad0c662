//! Key record-sets: the record numbers sharing one index key in one segment.
//!
//! A set is stored in the cheapest of three forms for its population: a bare
//! offset, a sorted list of offsets, or a segment-length bitmap. Within one
//! segment a set only ever grows, so promotion is monotonic and there is no
//! demotion until a set is renormalized after a splice-time union.
//!
//! Offsets are positions within a segment, not global record numbers.

use byteorder::{BigEndian, ByteOrder};

use crate::bitvec::BitVector;
use crate::config::DatabaseConfig;
use crate::error::{FalxError, Result};

/// Encoded form of a record set, ready for an index table row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordSetPayload {
    /// Exactly one record: the offset itself is the row reference.
    Literal(u64),
    /// More than one record: bytes destined for the subsidiary record list
    /// table. Two-byte big-endian offsets for the list form, the segment
    /// bitmap for the bitmap form.
    Bytes(Vec<u8>),
}

/// The set of record-number offsets for one (key, segment) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordSet {
    /// Exactly one member.
    One(u64),
    /// More than one member, at most `upper_conversion_limit`.
    Many(Vec<u64>),
    /// A segment-length bitmap.
    Bitmap(BitVector),
}

impl RecordSet {
    /// Create a set holding a single offset.
    pub fn new(offset: u64) -> Self {
        RecordSet::One(offset)
    }

    /// Add an offset, promoting the representation when the list form
    /// outgrows the conversion limit (strictly greater than).
    pub fn add(&mut self, offset: u64, config: &DatabaseConfig) -> Result<()> {
        match self {
            RecordSet::One(existing) => {
                *self = RecordSet::Many(vec![*existing, offset]);
            }
            RecordSet::Many(list) => {
                list.push(offset);
                if list.len() as u64 > config.upper_conversion_limit {
                    let mut bitmap = BitVector::new(config.segment_size as usize);
                    for &member in list.iter() {
                        bitmap.set(member as isize, true)?;
                    }
                    *self = RecordSet::Bitmap(bitmap);
                }
            }
            RecordSet::Bitmap(bitmap) => {
                bitmap.set(offset as isize, true)?;
            }
        }
        Ok(())
    }

    /// Number of members.
    pub fn count(&self) -> u64 {
        match self {
            RecordSet::One(_) => 1,
            RecordSet::Many(list) => list.len() as u64,
            RecordSet::Bitmap(bitmap) => bitmap.count() as u64,
        }
    }

    /// Membership test.
    pub fn contains(&self, offset: u64) -> bool {
        match self {
            RecordSet::One(existing) => *existing == offset,
            RecordSet::Many(list) => list.contains(&offset),
            RecordSet::Bitmap(bitmap) => bitmap.get(offset as isize).unwrap_or(false),
        }
    }

    /// Sorted, deduplicated member offsets.
    pub fn offsets(&self) -> Vec<u64> {
        match self {
            RecordSet::One(offset) => vec![*offset],
            RecordSet::Many(list) => {
                let mut sorted = list.clone();
                sorted.sort_unstable();
                sorted.dedup();
                sorted
            }
            RecordSet::Bitmap(bitmap) => {
                bitmap.search().into_iter().map(|p| p as u64).collect()
            }
        }
    }

    /// Encode for an index table row: the member count plus either a
    /// literal offset or the subsidiary-table bytes.
    pub fn encode(&self) -> (u64, RecordSetPayload) {
        match self {
            RecordSet::One(offset) => (1, RecordSetPayload::Literal(*offset)),
            RecordSet::Many(list) => {
                let mut sorted = list.clone();
                sorted.sort_unstable();
                sorted.dedup();
                let mut bytes = vec![0u8; sorted.len() * 2];
                for (i, &offset) in sorted.iter().enumerate() {
                    BigEndian::write_u16(&mut bytes[i * 2..i * 2 + 2], offset as u16);
                }
                (sorted.len() as u64, RecordSetPayload::Bytes(bytes))
            }
            RecordSet::Bitmap(bitmap) => {
                (bitmap.count() as u64, RecordSetPayload::Bytes(bitmap.to_bytes()))
            }
        }
    }

    /// Decode a stored row back into a set.
    ///
    /// A payload exactly one segment-bitmap long is a bitmap; any other
    /// length is a sequence of two-byte offsets. Count 1 rows carry a
    /// literal instead of bytes.
    pub fn decode(count: u64, payload: &RecordSetPayload, config: &DatabaseConfig) -> Result<Self> {
        match payload {
            RecordSetPayload::Literal(offset) => {
                if count != 1 {
                    return Err(FalxError::corrupt(format!(
                        "literal reference with count {count}"
                    )));
                }
                Ok(RecordSet::One(*offset))
            }
            RecordSetPayload::Bytes(bytes) => {
                if bytes.len() == config.segment_size_bytes() {
                    Ok(RecordSet::Bitmap(BitVector::from_bytes(bytes)))
                } else if bytes.len() % 2 == 0 {
                    let list = bytes
                        .chunks_exact(2)
                        .map(|pair| BigEndian::read_u16(pair) as u64)
                        .collect();
                    Ok(RecordSet::Many(list))
                } else {
                    Err(FalxError::corrupt(format!(
                        "record list payload of odd length {}",
                        bytes.len()
                    )))
                }
            }
        }
    }

    /// A segment-length bitmap holding every member.
    pub fn to_bitmap(&self, config: &DatabaseConfig) -> Result<BitVector> {
        match self {
            RecordSet::Bitmap(bitmap) => Ok(bitmap.clone()),
            _ => {
                let mut bitmap = BitVector::new(config.segment_size as usize);
                for offset in self.offsets() {
                    bitmap.set(offset as isize, true)?;
                }
                Ok(bitmap)
            }
        }
    }

    /// Union with another set from the same segment.
    ///
    /// Both sides are pushed through bitmap form before the OR because
    /// either may flip representation mid-splice, then the result is
    /// renormalized for its final count.
    pub fn union(&self, other: &RecordSet, config: &DatabaseConfig) -> Result<RecordSet> {
        let mut bitmap = self.to_bitmap(config)?;
        bitmap.or_assign(&other.to_bitmap(config)?)?;
        RecordSet::Bitmap(bitmap).normalized(config)
    }

    /// The representation appropriate to the current member count: one
    /// member back to a bare offset, at most the conversion limit to a
    /// list, otherwise a bitmap.
    pub fn normalized(&self, config: &DatabaseConfig) -> Result<RecordSet> {
        let count = self.count();
        if count > config.upper_conversion_limit {
            return Ok(RecordSet::Bitmap(self.to_bitmap(config)?));
        }
        let offsets = self.offsets();
        if count == 1 {
            Ok(RecordSet::One(offsets[0]))
        } else {
            Ok(RecordSet::Many(offsets))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DatabaseConfig {
        let mut c = DatabaseConfig::with_segment_size(8);
        c.upper_conversion_limit = 3;
        c
    }

    #[test]
    fn promotion_one_to_many() {
        let config = config();
        let mut set = RecordSet::new(4);
        assert_eq!(set, RecordSet::One(4));
        set.add(6, &config).unwrap();
        assert_eq!(set, RecordSet::Many(vec![4, 6]));
    }

    #[test]
    fn promotion_boundary_is_strict() {
        // With limit 3, the third member leaves the set in list form; the
        // fourth promotes it.
        let config = config();
        let mut set = RecordSet::new(0);
        set.add(1, &config).unwrap();
        set.add(2, &config).unwrap();
        assert!(matches!(set, RecordSet::Many(_)));
        assert_eq!(set.count(), 3);
        set.add(3, &config).unwrap();
        assert!(matches!(set, RecordSet::Bitmap(_)));
        assert_eq!(set.count(), 4);
    }

    #[test]
    fn decoded_set_equals_added_offsets() {
        // Whatever form the set ends in, encode/decode preserves exactly
        // the members added.
        let config = config();
        for added in [vec![5], vec![2, 7], vec![0, 3, 5], vec![0, 1, 2, 3, 6, 7]] {
            let mut set = RecordSet::new(added[0]);
            for &offset in &added[1..] {
                set.add(offset, &config).unwrap();
            }
            let (count, payload) = set.encode();
            assert_eq!(count, added.len() as u64);
            let decoded = RecordSet::decode(count, &payload, &config).unwrap();
            assert_eq!(decoded.offsets(), added);
        }
    }

    #[test]
    fn list_payload_is_big_endian_pairs() {
        let config = config();
        let mut set = RecordSet::new(2);
        set.add(0, &config).unwrap();
        set.add(7, &config).unwrap();
        let (count, payload) = set.encode();
        assert_eq!(count, 3);
        assert_eq!(
            payload,
            RecordSetPayload::Bytes(vec![0x00, 0x00, 0x00, 0x02, 0x00, 0x07])
        );
    }

    #[test]
    fn bitmap_payload_is_segment_bytes() {
        let config = config();
        let mut set = RecordSet::new(0);
        for offset in [3, 5, 6, 7] {
            set.add(offset, &config).unwrap();
        }
        let (count, payload) = set.encode();
        assert_eq!(count, 5);
        assert_eq!(payload, RecordSetPayload::Bytes(vec![0b1001_0111]));
        let decoded = RecordSet::decode(count, &payload, &config).unwrap();
        assert!(matches!(decoded, RecordSet::Bitmap(_)));
        assert_eq!(decoded.offsets(), vec![0, 3, 5, 6, 7]);
    }

    #[test]
    fn union_across_threshold() {
        let config = config();
        // |A| = 2, |B| = 2, |A ∪ B| = 4 crosses the limit of 3.
        let mut a = RecordSet::new(0);
        a.add(1, &config).unwrap();
        let mut b = RecordSet::new(6);
        b.add(7, &config).unwrap();
        let union = a.union(&b, &config).unwrap();
        assert!(matches!(union, RecordSet::Bitmap(_)));
        assert_eq!(union.offsets(), vec![0, 1, 6, 7]);

        // Below the limit the union lands back in list form.
        let small = RecordSet::new(2).union(&RecordSet::new(5), &config).unwrap();
        assert_eq!(small, RecordSet::Many(vec![2, 5]));

        // Overlapping members collapse.
        let same = RecordSet::new(4).union(&RecordSet::new(4), &config).unwrap();
        assert_eq!(same, RecordSet::One(4));
    }

    #[test]
    fn normalized_picks_form_by_count() {
        let config = config();
        let mut bitmap = BitVector::new(8);
        bitmap.set(5, true).unwrap();
        let set = RecordSet::Bitmap(bitmap).normalized(&config).unwrap();
        assert_eq!(set, RecordSet::One(5));

        let mut bitmap = BitVector::new(8);
        for offset in [1, 4, 6] {
            bitmap.set(offset, true).unwrap();
        }
        let set = RecordSet::Bitmap(bitmap.clone()).normalized(&config).unwrap();
        assert_eq!(set, RecordSet::Many(vec![1, 4, 6]));

        bitmap.set(7, true).unwrap();
        let set = RecordSet::Bitmap(bitmap.clone()).normalized(&config).unwrap();
        assert_eq!(set, RecordSet::Bitmap(bitmap));
    }

    #[test]
    fn decode_rejects_inconsistent_rows() {
        let config = config();
        assert!(RecordSet::decode(2, &RecordSetPayload::Literal(3), &config).is_err());
        assert!(
            RecordSet::decode(2, &RecordSetPayload::Bytes(vec![0, 1, 2]), &config).is_err()
        );
    }
}
