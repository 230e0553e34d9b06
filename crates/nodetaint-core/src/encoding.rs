//! Out-of-band taint encoding for strings
//!
//! A character's taint is folded into its code point by moving it into one of the two
//! supplementary private-use planes: plane 15 for untainted characters, plane 16 for tainted ones.
//! Natives executed on encoded strings carry the planes through unchanged, and characters they
//! insert stay in the basic planes, which decode as untainted.

use crate::error::TaintError;
use crate::state::TaintEntry;

const UNTAINTED_PLANE: u32 = 0xF_0000;
const TAINTED_PLANE: u32 = 0x10_0000;
const PLANE_SIZE: u32 = 0x1_0000;

/// Encodes `s` with one taint bit per character.
pub fn encode(s: &str, bits: &[bool]) -> Result<String, TaintError> {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() != bits.len() {
        return Err(TaintError::Encoding(
            "Taint map and string length must match".to_string(),
        ));
    }
    chars
        .into_iter()
        .zip(bits)
        .map(|(c, tainted)| {
            let cp = u32::from(c);
            if cp >= PLANE_SIZE {
                return Err(TaintError::Encoding(format!(
                    "Cannot encode supplementary character U+{cp:X}"
                )));
            }
            let base = if *tainted { TAINTED_PLANE } else { UNTAINTED_PLANE };
            char::from_u32(base + cp)
                .ok_or_else(|| TaintError::Encoding(format!("Invalid code point U+{cp:X}")))
        })
        .collect()
}

/// Splits an encoded string back into its characters and their taint bits.
pub fn decode(encoded: &str) -> (String, Vec<bool>) {
    let mut out = String::with_capacity(encoded.len());
    let mut bits = Vec::new();
    for c in encoded.chars() {
        let cp = u32::from(c);
        let (raw, tainted) = if cp >= TAINTED_PLANE {
            (cp - TAINTED_PLANE, true)
        } else if cp >= UNTAINTED_PLANE {
            (cp - UNTAINTED_PLANE, false)
        } else {
            (cp, false)
        };
        // Offsets inside a plane are always valid BMP scalars except the surrogate block,
        // which `encode` never produces.
        out.push(char::from_u32(raw).unwrap_or(char::REPLACEMENT_CHARACTER));
        bits.push(tainted);
    }
    (out, bits)
}

/// Per-character taint of a string entry, padded with the taint bit where the map is missing.
pub fn bits_from_entry(entry: &TaintEntry, len: usize) -> Vec<bool> {
    (0..len)
        .map(|i| {
            entry.taint_bit || entry.props.as_ref().is_some_and(|map| map.char_at(i))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::PropMap;

    #[test]
    fn encoded_strings_decode_to_the_original() {
        let encoded = encode("abc", &[true, false, true]).unwrap();
        assert_ne!(encoded, "abc");
        let (raw, bits) = decode(&encoded);
        assert_eq!(raw, "abc");
        assert_eq!(bits, vec![true, false, true]);
    }

    #[test]
    fn inserted_characters_decode_untainted() {
        let mut encoded = encode("ab", &[true, true]).unwrap();
        encoded.push(',');
        let (raw, bits) = decode(&encoded);
        assert_eq!(raw, "ab,");
        assert_eq!(bits, vec![true, true, false]);
    }

    #[test]
    fn empty_strings_decode_untainted() {
        assert_eq!(decode(""), (String::new(), vec![]));
        assert_eq!(encode("", &[]).unwrap(), "");
    }

    #[test]
    fn length_mismatch_is_an_encoding_error() {
        let err = encode("ab", &[true]).unwrap_err();
        assert_eq!(err.to_string(), "Taint map and string length must match");
    }

    #[test]
    fn supplementary_characters_are_rejected() {
        assert!(matches!(
            encode("\u{1F600}", &[false]),
            Err(TaintError::Encoding(_))
        ));
    }

    #[test]
    fn entry_bits_fall_back_to_the_taint_bit() {
        let mut entry = TaintEntry::untainted(Some(PropMap::from_bits(vec![false, true])), "'ab'");
        assert_eq!(bits_from_entry(&entry, 2), vec![false, true]);
        entry.taint_bit = true;
        assert_eq!(bits_from_entry(&entry, 2), vec![true, true]);
        let bare = TaintEntry::untainted(None, "1");
        assert_eq!(bits_from_entry(&bare, 3), vec![false; 3]);
    }
}
