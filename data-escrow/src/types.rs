//! Fixed-width chain values: addresses, agreement ids and condition ids.

use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr};
use uuid::Uuid;

use crate::encoding::{bytes_to_hex, hex_to_bytes, keccak256, AbiType, EncodingError};

/// A 20 byte account or contract address.
///
/// Displayed in EIP-55 mixed-case form. Equality is byte-wise, so two
/// spellings of the same address always compare equal.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; 20]);

impl Address {
    pub const ZERO: Address = Address([0; 20]);

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EncodingError> {
        let bytes: [u8; 20] = bytes.try_into().map_err(|_| EncodingError::InvalidLength {
            ty: AbiType::Address,
            expected: 20,
            found: bytes.len(),
        })?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 20]
    }

    /// The address left-padded to a 32 byte log topic.
    pub fn to_topic(&self) -> [u8; 32] {
        let mut topic = [0u8; 32];
        topic[12..].copy_from_slice(&self.0);
        topic
    }

    /// EIP-55 checksummed representation.
    pub fn to_checksum(&self) -> String {
        let lower = hex::encode(self.0);
        let hash = keccak256(lower.as_bytes());
        let mut out = String::with_capacity(42);
        out.push_str("0x");
        for (i, c) in lower.chars().enumerate() {
            let nibble = if i % 2 == 0 {
                hash[i / 2] >> 4
            } else {
                hash[i / 2] & 0x0f
            };
            if c.is_ascii_alphabetic() && nibble >= 8 {
                out.push(c.to_ascii_uppercase());
            } else {
                out.push(c);
            }
        }
        out
    }
}

impl From<[u8; 20]> for Address {
    fn from(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }
}

impl FromStr for Address {
    type Err = EncodingError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::from_bytes(&hex_to_bytes(value)?)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_checksum())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_checksum())
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Address::from_str(&value).map_err(D::Error::custom)
    }
}

/// Defines a 32 byte identifier rendered as `0x`-prefixed lowercase hex.
macro_rules! bytes32_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name([u8; 32]);

        impl $name {
            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            pub fn to_hex(&self) -> String {
                bytes_to_hex(self.0)
            }

            /// Hex without the `0x` prefix.
            pub fn to_bare_hex(&self) -> String {
                hex::encode(self.0)
            }
        }

        impl From<[u8; 32]> for $name {
            fn from(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }
        }

        impl FromStr for $name {
            type Err = EncodingError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                let bytes = hex_to_bytes(value)?;
                let bytes: [u8; 32] =
                    bytes
                        .as_slice()
                        .try_into()
                        .map_err(|_| EncodingError::InvalidLength {
                            ty: AbiType::Bytes32,
                            expected: 32,
                            found: bytes.len(),
                        })?;
                Ok(Self(bytes))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.to_hex())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let value = String::deserialize(deserializer)?;
                $name::from_str(&value).map_err(D::Error::custom)
            }
        }
    };
}

bytes32_id!(
    /// Correlation key of one purchase. Random, and unrelated to any chain
    /// state until the agreement is submitted.
    AgreementId
);

bytes32_id!(
    /// Identifier of one condition instance inside an agreement.
    ConditionId
);

impl AgreementId {
    /// Generate a fresh random agreement id from two v4 UUIDs.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        bytes[..16].copy_from_slice(Uuid::new_v4().as_bytes());
        bytes[16..].copy_from_slice(Uuid::new_v4().as_bytes());
        Self(bytes)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn checksum_matches_eip55_vectors() -> Result<(), EncodingError> {
        for expected in [
            "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed",
            "0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359",
            "0xdbF03B407c01E7cD3CBea99509d93f8DDDC8C6FB",
            "0xD1220A0cf47c7B9Be7A2E6BA89F429762e7b9aDb",
        ] {
            let address = Address::from_str(&expected.to_lowercase())?;
            assert_eq!(address.to_string(), expected);
        }
        Ok(())
    }

    #[test]
    fn address_parsing_is_case_insensitive() -> Result<(), EncodingError> {
        let upper = Address::from_str("0x5AAEB6053F3E94C9B9A09F33669435E7EF1BEAED")?;
        let mixed = Address::from_str("0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed")?;
        assert_eq!(upper, mixed);
        Ok(())
    }

    #[test]
    fn address_rejects_wrong_length() {
        assert!(Address::from_str("0x1234").is_err());
    }

    #[test]
    fn address_topic_is_left_padded() -> Result<(), EncodingError> {
        let address = Address::from_str("0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed")?;
        let topic = address.to_topic();
        assert!(topic[..12].iter().all(|b| *b == 0));
        assert_eq!(&topic[12..], address.as_bytes());
        Ok(())
    }

    #[test]
    fn generated_agreement_ids_are_64_hex_and_distinct() {
        let first = AgreementId::generate();
        let second = AgreementId::generate();
        assert_ne!(first, second);
        assert_eq!(first.to_bare_hex().len(), 64);
        assert_eq!(first.to_hex().len(), 66);
    }

    #[test]
    fn ids_parse_with_or_without_prefix() -> Result<(), EncodingError> {
        let bare = "aa11".repeat(16);
        let id = AgreementId::from_str(&bare)?;
        assert_eq!(AgreementId::from_str(&format!("0x{bare}"))?, id);
        assert_eq!(id.to_bare_hex(), bare);
        assert!(ConditionId::from_str("0xaa11").is_err());
        Ok(())
    }

    #[test]
    fn serde_uses_text_form() -> Result<(), serde_json::Error> {
        let id = ConditionId::from([3u8; 32]);
        let json = serde_json::to_string(&id)?;
        assert_eq!(json, format!("\"0x{}\"", "03".repeat(32)));
        assert_eq!(serde_json::from_str::<ConditionId>(&json)?, id);
        Ok(())
    }
}
