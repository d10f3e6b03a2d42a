//! # UTF-8 Validator (C2)
//!
//! A standalone, hand-rolled RFC 3629 validator. `core::str::from_utf8`
//! already rejects overlong encodings, surrogates, and code points above
//! U+10FFFF, but it gives no hook for the MQTT profile's optional U+0000
//! rejection (spec §4.2) and no way to distinguish "truncated" from
//! "malformed" for the granular error reporting spec §8's S5/S6 scenarios
//! expect. This module implements the byte-sequence walk directly instead of
//! deferring to the standard library, matching the teacher crate's general
//! preference for owning its own wire-level parsing.

/// Validates `bytes` as a strict RFC 3629 UTF-8 sequence.
///
/// Rejects:
/// - overlong encodings (leading byte 0xC0/0xC1; 0xE0 with first
///   continuation byte < 0xA0; 0xF0 with first continuation byte < 0x90),
/// - the surrogate range U+D800-U+DFFF,
/// - code points above U+10FFFF,
/// - truncated multi-byte sequences,
/// - invalid continuation bytes (not in 0x80..=0xBF).
///
/// `forbid_nul` additionally rejects the single byte 0x00, per the MQTT
/// profile's stricter-than-RFC-3629 rule (spec §4.2 Open Question OQ-1: the
/// reference implementation does not enforce this, so every call site in
/// this crate passes `false`; it is exposed for callers who want the
/// stricter behaviour).
pub fn is_valid_utf8(bytes: &[u8], forbid_nul: bool) -> bool {
    let mut i = 0;
    while i < bytes.len() {
        let b0 = bytes[i];
        if forbid_nul && b0 == 0x00 {
            return false;
        }
        if b0 < 0x80 {
            i += 1;
            continue;
        }
        let (len, min_cp, mut cp): (usize, u32, u32) = if b0 & 0xE0 == 0xC0 {
            if b0 == 0xC0 || b0 == 0xC1 {
                return false; // overlong 2-byte lead
            }
            (2, 0x80, (b0 & 0x1F) as u32)
        } else if b0 & 0xF0 == 0xE0 {
            (3, 0x800, (b0 & 0x0F) as u32)
        } else if b0 & 0xF8 == 0xF0 {
            if b0 > 0xF4 {
                return false; // beyond U+10FFFF range even before decoding
            }
            (4, 0x10000, (b0 & 0x07) as u32)
        } else {
            return false; // stray continuation byte or invalid lead
        };

        if i + len > bytes.len() {
            return false; // truncated sequence
        }

        for (k, &cont) in bytes[i + 1..i + len].iter().enumerate() {
            if cont & 0xC0 != 0x80 {
                return false; // invalid continuation byte
            }
            if k == 0 {
                // Reject overlong 3-/4-byte forms via the specific
                // minimum-continuation-byte checks named in spec §4.2.
                if len == 3 && b0 == 0xE0 && cont < 0xA0 {
                    return false;
                }
                if len == 4 && b0 == 0xF0 && cont < 0x90 {
                    return false;
                }
            }
            cp = (cp << 6) | (cont & 0x3F) as u32;
        }

        if cp < min_cp || cp > 0x10FFFF {
            return false;
        }
        if (0xD800..=0xDFFF).contains(&cp) {
            return false; // surrogate range
        }
        if forbid_nul && cp == 0x0000 {
            return false;
        }

        i += len;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ascii_and_multibyte() {
        assert!(is_valid_utf8(b"hello", false));
        assert!(is_valid_utf8("a/b".as_bytes(), false));
        assert!(is_valid_utf8("caf\u{00e9}".as_bytes(), false));
        assert!(is_valid_utf8("\u{10000}".as_bytes(), false));
    }

    #[test]
    fn rejects_overlong_two_byte() {
        assert!(!is_valid_utf8(&[0xC0, 0x80], false));
        assert!(!is_valid_utf8(&[0xC1, 0xBF], false));
    }

    #[test]
    fn rejects_overlong_three_byte() {
        assert!(!is_valid_utf8(&[0xE0, 0x9F, 0x80], false));
    }

    #[test]
    fn rejects_overlong_four_byte() {
        assert!(!is_valid_utf8(&[0xF0, 0x8F, 0xBF, 0xBF], false));
    }

    #[test]
    fn rejects_surrogate_range() {
        // U+D800 encoded as if it were a plain 3-byte sequence: ED A0 80.
        assert!(!is_valid_utf8(&[0xED, 0xA0, 0x80], false));
    }

    #[test]
    fn rejects_code_point_above_max() {
        assert!(!is_valid_utf8(&[0xF4, 0x90, 0x80, 0x80], false));
    }

    #[test]
    fn rejects_truncated_sequence() {
        assert!(!is_valid_utf8(&[0xE2, 0x82], false));
    }

    #[test]
    fn rejects_invalid_continuation() {
        assert!(!is_valid_utf8(&[0xC2, 0x20], false));
    }

    #[test]
    fn nul_allowed_by_default_forbidden_when_requested() {
        assert!(is_valid_utf8(&[0x00], false));
        assert!(!is_valid_utf8(&[0x00], true));
    }
}
