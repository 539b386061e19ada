// src/codec.rs
use ethers::types::{Bytes, U256};

use crate::error::EncodingError;

/// Big-endian encoding of `value`, left-padded with zeros to exactly `width` bytes.
pub fn encode_fixed_width(value: U256, width: usize) -> Result<Vec<u8>, EncodingError> {
    let significant = (value.bits() + 7) / 8;
    if width > 32 || significant > width {
        return Err(EncodingError::Overflow { width, value });
    }

    let mut word = [0u8; 32];
    value.to_big_endian(&mut word);
    Ok(word[32 - width..].to_vec())
}

/// Concatenates the parts in order. Part lengths are not checked.
pub fn concat<I, P>(parts: I) -> Bytes
where
    I: IntoIterator<Item = P>,
    P: AsRef<[u8]>,
{
    let mut out = Vec::new();
    for part in parts {
        out.extend_from_slice(part.as_ref());
    }
    Bytes::from(out)
}

/// Parses a `0x`-prefixed (or bare) hex string of even length.
pub fn parse_hex(input: &str) -> Result<Bytes, EncodingError> {
    let digits = input.strip_prefix("0x").unwrap_or(input);
    if digits.len() % 2 != 0 {
        return Err(EncodingError::OddLength(input.to_string()));
    }
    hex::decode(digits)
        .map(Bytes::from)
        .map_err(|e| EncodingError::InvalidHex(format!("{input}: {e}")))
}

pub fn to_hex(data: impl AsRef<[u8]>) -> String {
    format!("0x{}", hex::encode(data))
}

/// Hex-string concatenation, e.g. `["0x1234", "0x5678"]` -> `"0x12345678"`.
pub fn concat_hex<S: AsRef<str>>(parts: &[S]) -> Result<String, EncodingError> {
    let decoded = parts
        .iter()
        .map(|p| parse_hex(p.as_ref()))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(to_hex(concat(decoded)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_fixed_width_pads_left() {
        let encoded = encode_fixed_width(U256::from(0x493e0u64), 16).unwrap();
        assert_eq!(encoded.len(), 16);
        assert_eq!(&encoded[13..], &[0x04, 0x93, 0xe0]);
        assert!(encoded[..13].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_encode_fixed_width_zero() {
        assert_eq!(encode_fixed_width(U256::zero(), 6).unwrap(), vec![0u8; 6]);
        assert!(encode_fixed_width(U256::zero(), 0).unwrap().is_empty());
    }

    #[test]
    fn test_encode_fixed_width_overflow() {
        let max_u128 = U256::from(u128::MAX);
        assert!(encode_fixed_width(max_u128, 16).is_ok());
        let err = encode_fixed_width(max_u128 + 1, 16).unwrap_err();
        assert!(matches!(err, EncodingError::Overflow { width: 16, .. }));
        assert!(encode_fixed_width(U256::one(), 33).is_err());
    }

    #[test]
    fn test_concat_hex() {
        assert_eq!(concat_hex(&["0x1234", "0x5678"]).unwrap(), "0x12345678");
        assert_eq!(concat_hex::<&str>(&[]).unwrap(), "0x");
    }

    #[test]
    fn test_parse_hex_rejects_malformed() {
        assert!(matches!(parse_hex("0x123"), Err(EncodingError::OddLength(_))));
        assert!(matches!(parse_hex("0xzz"), Err(EncodingError::InvalidHex(_))));
        assert_eq!(parse_hex("0x").unwrap(), Bytes::new());
        assert_eq!(parse_hex("abcd").unwrap().to_vec(), vec![0xab, 0xcd]);
    }
}
