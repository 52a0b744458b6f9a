//! Packed ABI encoding, decoding and Keccak hashing.
//!
//! The keeper contracts derive every identifier with
//! `keccak256(abi.encodePacked(...))`, so this codec reproduces the packed
//! layout: addresses are 20 bytes, `bytes32` and `uint256` are 32 bytes
//! (integers big-endian) and dynamic `bytes` are written as-is.

use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::str::FromStr;
use strum::{Display, EnumString};
use thiserror::Error;

use crate::types::Address;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodingError {
    #[error("Unsupported ABI type: {0}")]
    UnsupportedType(String),
    #[error("Malformed hex string: {0}")]
    MalformedHex(String),
    #[error("Invalid length for {ty}: expected {expected} bytes, found {found}")]
    InvalidLength {
        ty: AbiType,
        expected: usize,
        found: usize,
    },
    #[error("Invalid integer: {0}")]
    InvalidInteger(String),
    #[error("Integer does not fit in 256 bits: {0}")]
    IntegerOverflow(String),
}

/// The primitive ABI types that appear in condition parameters.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AbiType {
    Address,
    Bytes32,
    Uint256,
    Bytes,
}

impl AbiType {
    /// Parse a type tag, failing with [`EncodingError::UnsupportedType`]
    /// instead of strum's parse error.
    pub fn parse(tag: &str) -> Result<Self, EncodingError> {
        AbiType::from_str(tag).map_err(|_| EncodingError::UnsupportedType(tag.to_string()))
    }

    /// Width of the packed encoding, `None` for dynamic types.
    pub fn packed_len(&self) -> Option<usize> {
        match self {
            AbiType::Address => Some(20),
            AbiType::Bytes32 | AbiType::Uint256 => Some(32),
            AbiType::Bytes => None,
        }
    }
}

/// A typed ABI value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbiValue {
    Address(Address),
    Bytes32([u8; 32]),
    /// Big-endian 256 bit unsigned integer.
    Uint256([u8; 32]),
    Bytes(Vec<u8>),
}

impl AbiValue {
    /// Parse the textual form of a value of type `ty`.
    ///
    /// Addresses, `bytes32` and `bytes` are hex strings (with or without
    /// `0x`). Integers are decimal, or hex when prefixed with `0x`.
    pub fn parse(ty: AbiType, value: &str) -> Result<Self, EncodingError> {
        Ok(match ty {
            AbiType::Address => AbiValue::Address(Address::from_str(value)?),
            AbiType::Bytes32 => AbiValue::Bytes32(fixed_bytes(ty, &hex_to_bytes(value)?)?),
            AbiType::Uint256 => AbiValue::Uint256(parse_uint256(value)?),
            AbiType::Bytes => AbiValue::Bytes(hex_to_bytes(value)?),
        })
    }

    pub fn abi_type(&self) -> AbiType {
        match self {
            AbiValue::Address(_) => AbiType::Address,
            AbiValue::Bytes32(_) => AbiType::Bytes32,
            AbiValue::Uint256(_) => AbiType::Uint256,
            AbiValue::Bytes(_) => AbiType::Bytes,
        }
    }

    /// Packed encoding of this value.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            AbiValue::Address(address) => address.as_bytes().to_vec(),
            AbiValue::Bytes32(bytes) | AbiValue::Uint256(bytes) => bytes.to_vec(),
            AbiValue::Bytes(bytes) => bytes.clone(),
        }
    }
}

/// Encode the textual `value` as the ABI type named by `type_tag`.
pub fn encode_param(type_tag: &str, value: &str) -> Result<Vec<u8>, EncodingError> {
    let ty = AbiType::parse(type_tag)?;
    Ok(AbiValue::parse(ty, value)?.encode())
}

/// Decode a packed value of type `ty`. Static types must have their exact
/// width.
pub fn decode_param(ty: AbiType, bytes: &[u8]) -> Result<AbiValue, EncodingError> {
    Ok(match ty {
        AbiType::Address => AbiValue::Address(Address::from_bytes(bytes)?),
        AbiType::Bytes32 => AbiValue::Bytes32(fixed_bytes(ty, bytes)?),
        AbiType::Uint256 => AbiValue::Uint256(fixed_bytes(ty, bytes)?),
        AbiType::Bytes => AbiValue::Bytes(bytes.to_vec()),
    })
}

/// Accumulates packed values before hashing them.
#[derive(Debug, Default, Clone)]
pub struct PackedEncoder(Vec<u8>);

impl PackedEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn address(mut self, address: &Address) -> Self {
        self.0.extend_from_slice(address.as_bytes());
        self
    }

    pub fn bytes32(mut self, bytes: &[u8; 32]) -> Self {
        self.0.extend_from_slice(bytes);
        self
    }

    pub fn uint256(mut self, value: u64) -> Self {
        self.0.extend_from_slice(&uint256_from_u128(u128::from(value)));
        self
    }

    pub fn value(mut self, value: &AbiValue) -> Self {
        self.0.extend(value.encode());
        self
    }

    /// Parse `value` as `type_tag` and append it.
    pub fn param(self, type_tag: &str, value: &str) -> Result<Self, EncodingError> {
        let ty = AbiType::parse(type_tag)?;
        Ok(self.value(&AbiValue::parse(ty, value)?))
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn keccak(self) -> [u8; 32] {
        keccak256(&self.0)
    }
}

/// Hash bytes using sha3 keccak256.
pub fn keccak256(bytes: impl AsRef<[u8]>) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

/// Decode a hex string, with or without `0x`.
pub fn hex_to_bytes(value: &str) -> Result<Vec<u8>, EncodingError> {
    hex::decode(remove_0x(value)).map_err(|_| EncodingError::MalformedHex(value.to_string()))
}

/// Lowercase `0x`-prefixed hex.
pub fn bytes_to_hex(bytes: impl AsRef<[u8]>) -> String {
    format!("0x{}", hex::encode(bytes))
}

pub fn add_0x(value: &str) -> String {
    if value.starts_with("0x") || value.starts_with("0X") {
        value.to_string()
    } else {
        format!("0x{value}")
    }
}

pub fn remove_0x(value: &str) -> &str {
    value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value)
}

pub fn uint256_from_u128(value: u128) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[16..].copy_from_slice(&value.to_be_bytes());
    out
}

/// Narrow a 256 bit integer to `u128`, `None` when it does not fit.
pub fn uint256_to_u128(value: &[u8; 32]) -> Option<u128> {
    if value[..16].iter().any(|b| *b != 0) {
        return None;
    }
    let mut low = [0u8; 16];
    low.copy_from_slice(&value[16..]);
    Some(u128::from_be_bytes(low))
}

fn parse_uint256(value: &str) -> Result<[u8; 32], EncodingError> {
    if value.starts_with("0x") || value.starts_with("0X") {
        if remove_0x(value).is_empty() {
            return Err(EncodingError::InvalidInteger(value.to_string()));
        }
        let digits = remove_0x(value).trim_start_matches('0');
        let padded = if digits.len() % 2 == 1 {
            format!("0{digits}")
        } else {
            digits.to_string()
        };
        let bytes = hex::decode(&padded).map_err(|_| EncodingError::MalformedHex(value.into()))?;
        if bytes.len() > 32 {
            return Err(EncodingError::IntegerOverflow(value.to_string()));
        }
        let mut out = [0u8; 32];
        out[32 - bytes.len()..].copy_from_slice(&bytes);
        return Ok(out);
    }

    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(EncodingError::InvalidInteger(value.to_string()));
    }

    // Schoolbook multiply-by-ten over the big-endian buffer.
    let mut out = [0u8; 32];
    for digit in value.bytes() {
        let mut carry = u32::from(digit - b'0');
        for byte in out.iter_mut().rev() {
            let acc = u32::from(*byte) * 10 + carry;
            *byte = (acc & 0xff) as u8;
            carry = acc >> 8;
        }
        if carry != 0 {
            return Err(EncodingError::IntegerOverflow(value.to_string()));
        }
    }
    Ok(out)
}

fn fixed_bytes(ty: AbiType, bytes: &[u8]) -> Result<[u8; 32], EncodingError> {
    bytes
        .try_into()
        .map_err(|_| EncodingError::InvalidLength {
            ty,
            expected: 32,
            found: bytes.len(),
        })
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::Rng;

    const UINT256_MAX: &str =
        "115792089237316195423570985008687907853269984665640564039457584007913129639935";

    #[test]
    fn keccak_matches_known_digest() {
        assert_eq!(
            bytes_to_hex(keccak256([])),
            "0xc5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn prefix_helpers_are_idempotent() {
        for value in ["abcd", "0xabcd", ""] {
            assert_eq!(add_0x(&add_0x(value)), add_0x(value));
            assert_eq!(remove_0x(remove_0x(value)), remove_0x(value));
            assert_eq!(remove_0x(&add_0x(value)), remove_0x(value));
        }
    }

    #[test]
    fn hex_round_trips() -> Result<(), EncodingError> {
        let mut rng = rand::thread_rng();
        for len in 0..64 {
            let bytes: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
            assert_eq!(hex_to_bytes(&bytes_to_hex(&bytes))?, bytes);
        }
        Ok(())
    }

    #[test]
    fn malformed_hex_is_rejected() {
        assert!(matches!(
            hex_to_bytes("0xzz"),
            Err(EncodingError::MalformedHex(_))
        ));
        assert!(matches!(
            hex_to_bytes("0xabc"),
            Err(EncodingError::MalformedHex(_))
        ));
    }

    #[test]
    fn unsupported_type_is_never_coerced() {
        assert_eq!(
            encode_param("string", "hello"),
            Err(EncodingError::UnsupportedType("string".into()))
        );
        assert!(AbiType::parse("uint8").is_err());
    }

    #[test]
    fn integers_are_big_endian() -> Result<(), EncodingError> {
        let ten = encode_param("uint256", "10")?;
        assert_eq!(ten.len(), 32);
        assert_eq!(ten[31], 10);
        assert!(ten[..31].iter().all(|b| *b == 0));

        let encoded = encode_param("uint256", "256")?;
        assert_eq!(&encoded[30..], &[1, 0]);
        assert_eq!(encode_param("uint256", "0x100")?, encoded);

        assert_eq!(encode_param("uint256", UINT256_MAX)?, vec![0xff; 32]);
        Ok(())
    }

    #[test]
    fn integers_beyond_256_bits_overflow() {
        let two_pow_256 =
            "115792089237316195423570985008687907853269984665640564039457584007913129639936";
        assert!(matches!(
            encode_param("uint256", two_pow_256),
            Err(EncodingError::IntegerOverflow(_))
        ));
        assert!(matches!(
            encode_param("uint256", "-1"),
            Err(EncodingError::InvalidInteger(_))
        ));
    }

    #[test]
    fn malformed_integers_are_never_coerced() -> Result<(), EncodingError> {
        for malformed in ["", "0x", "0X", " 10", "10 ", "0x 1"] {
            assert!(
                encode_param("uint256", malformed).is_err(),
                "{malformed:?} should be rejected"
            );
        }
        assert_eq!(encode_param("uint256", "0x0")?, vec![0; 32]);
        assert_eq!(encode_param("uint256", "0x000a")?, encode_param("uint256", "10")?);
        Ok(())
    }

    #[test]
    fn surrounding_whitespace_is_rejected() {
        let address = "0x00a329c0648769a73afac7f9381e08fb43dbea72";
        assert!(encode_param("address", &format!(" {address}")).is_err());
        assert!(encode_param("bytes32", &format!("{}\n", bytes_to_hex([7u8; 32]))).is_err());
    }

    #[test]
    fn packed_widths() -> Result<(), EncodingError> {
        let address = "0x00a329c0648769a73afac7f9381e08fb43dbea72";
        assert_eq!(encode_param("address", address)?.len(), 20);
        assert_eq!(encode_param("bytes32", &bytes_to_hex([7u8; 32]))?.len(), 32);
        assert_eq!(encode_param("bytes", "0x010203")?, vec![1, 2, 3]);
        assert!(matches!(
            encode_param("bytes32", "0x0102"),
            Err(EncodingError::InvalidLength { expected: 32, .. })
        ));
        Ok(())
    }

    #[test]
    fn decode_inverts_encode_for_every_type() -> Result<(), EncodingError> {
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let address: [u8; 20] = rng.gen();
            let word: [u8; 32] = rng.gen();
            let integer: u128 = rng.gen();
            let dynamic: Vec<u8> = (0..rng.gen_range(0..80)).map(|_| rng.gen()).collect();

            let values = [
                AbiValue::Address(Address::from(address)),
                AbiValue::Bytes32(word),
                AbiValue::Uint256(uint256_from_u128(integer)),
                AbiValue::Bytes(dynamic),
            ];
            for value in values {
                let decoded = decode_param(value.abi_type(), &value.encode())?;
                assert_eq!(decoded, value);
            }
        }
        Ok(())
    }

    #[test]
    fn decoding_checks_widths() {
        assert!(decode_param(AbiType::Address, &[0u8; 32]).is_err());
        assert!(decode_param(AbiType::Uint256, &[0u8; 20]).is_err());
    }

    #[test]
    fn u128_narrowing() {
        assert_eq!(uint256_to_u128(&uint256_from_u128(42)), Some(42));
        assert_eq!(uint256_to_u128(&[0xff; 32]), None);
    }
}
