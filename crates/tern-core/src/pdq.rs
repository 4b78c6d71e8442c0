//! Perceptual-hash encoding helpers.
//!
//! The hashing service returns 256-bit perceptual hashes as 64-char hex
//! strings. Near-duplicate lookups need the expanded ASCII bit form: each hex
//! byte becomes 8 `'0'`/`'1'` characters, high bit first. The two conversions
//! are exact inverses.

use crate::error::{Error, Result};

/// Expand a hex-encoded hash into its ASCII binary representation.
pub fn hex_to_bits(input: &str) -> Result<String> {
    let bytes = hex::decode(input).map_err(|e| Error::InvalidHash(e.to_string()))?;

    let mut out = String::with_capacity(bytes.len() * 8);
    for b in bytes {
        for shift in (0..8).rev() {
            out.push(if (b >> shift) & 1 == 1 { '1' } else { '0' });
        }
    }
    Ok(out)
}

/// Collapse an ASCII binary representation back into hex.
pub fn bits_to_hex(input: &str) -> Result<String> {
    if input.len() % 8 != 0 {
        return Err(Error::InvalidHash(format!(
            "bit string length {} is not a multiple of 8",
            input.len()
        )));
    }

    let mut bytes = Vec::with_capacity(input.len() / 8);
    for chunk in input.as_bytes().chunks(8) {
        let mut b = 0u8;
        for &c in chunk {
            b <<= 1;
            match c {
                b'1' => b |= 1,
                b'0' => {}
                other => {
                    return Err(Error::InvalidHash(format!(
                        "unexpected character {:?} in bit string",
                        other as char
                    )))
                }
            }
        }
        bytes.push(b);
    }
    Ok(hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_high_bit_first() {
        assert_eq!(hex_to_bits("a0").unwrap(), "10100000");
        assert_eq!(hex_to_bits("ff").unwrap(), "11111111");
        assert_eq!(hex_to_bits("01").unwrap(), "00000001");
    }

    #[test]
    fn round_trips_single_byte() {
        let bits = hex_to_bits("a0").unwrap();
        assert_eq!(bits_to_hex(&bits).unwrap(), "a0");
    }

    #[test]
    fn round_trips_full_256_bit_hash() {
        let hash = "f8f8f0cee0f4a84f06370a22038f67f0b36e2ed596621e1d33e6b39c4e9c9b22";
        let bits = hex_to_bits(hash).unwrap();
        assert_eq!(bits.len(), 256);
        assert_eq!(bits_to_hex(&bits).unwrap(), hash);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(hex_to_bits("zz").is_err());
        assert!(bits_to_hex("1010").is_err());
        assert!(bits_to_hex("1010101x").is_err());
    }
}
