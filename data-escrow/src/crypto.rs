//! Ethereum-style signing for documents and agreements.
//!
//! Every signature produced here is a recoverable secp256k1 ECDSA signature
//! over the Ethereum signed-message digest of a 32 byte hash, so a verifier
//! only needs the hash and the signature to learn the signer's [`Address`].

use k256::{
    ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey},
    elliptic_curve::sec1::ToEncodedPoint,
    PublicKey,
};
use rand::{CryptoRng, RngCore};
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::{
    encoding::{hex_to_bytes, keccak256, EncodingError},
    types::Address,
};

const ETHEREUM_MESSAGE_PREFIX: &[u8] = b"\x19Ethereum Signed Message:\n32";

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid private key")]
    InvalidPrivateKey,
    #[error("Invalid signature encoding")]
    InvalidSignature,
    #[error("Invalid recovery id: {0}")]
    InvalidRecoveryId(u8),
    #[error("Signature error: {0}")]
    Signature(k256::ecdsa::Error),
    #[error(transparent)]
    Encoding(#[from] EncodingError),
}

/// Digest that Ethereum wallets actually sign for a 32 byte message.
pub fn ethereum_message_hash(hash: &[u8; 32]) -> [u8; 32] {
    let mut message = Vec::with_capacity(ETHEREUM_MESSAGE_PREFIX.len() + 32);
    message.extend_from_slice(ETHEREUM_MESSAGE_PREFIX);
    message.extend_from_slice(hash);
    keccak256(message)
}

/// Derive the account address of a public key.
pub fn public_key_address(key: &VerifyingKey) -> Address {
    let point = PublicKey::from(key).to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[12..]);
    Address::from(address)
}

/// A recoverable signature in Ethereum's `r ∥ s ∥ v` layout.
///
/// `v` is stored as the raw recovery id (0 or 1) and rendered as 27 or 28.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct RecoverableSignature {
    r: [u8; 32],
    s: [u8; 32],
    recovery_id: u8,
}

impl RecoverableSignature {
    fn new(signature: Signature, recovery_id: RecoveryId) -> Self {
        let (r, s) = signature.split_bytes();
        let mut r_bytes = [0u8; 32];
        let mut s_bytes = [0u8; 32];
        r_bytes.copy_from_slice(r.as_slice());
        s_bytes.copy_from_slice(s.as_slice());
        Self {
            r: r_bytes,
            s: s_bytes,
            recovery_id: recovery_id.to_byte(),
        }
    }

    /// Get `r` component of signature.
    pub fn r(&self) -> [u8; 32] {
        self.r
    }

    /// Get `s` component of signature.
    pub fn s(&self) -> [u8; 32] {
        self.s
    }

    /// Get `v` component of signature, in its Ethereum (27/28) form.
    pub fn v(&self) -> u8 {
        self.recovery_id + 27
    }

    pub fn to_bytes(&self) -> [u8; 65] {
        let mut bytes = [0u8; 65];
        bytes[..32].copy_from_slice(&self.r);
        bytes[32..64].copy_from_slice(&self.s);
        bytes[64] = self.v();
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != 65 {
            return Err(CryptoError::InvalidSignature);
        }
        let recovery_id = match bytes[64] {
            v @ (0 | 1) => v,
            v @ (27 | 28) => v - 27,
            other => return Err(CryptoError::InvalidRecoveryId(other)),
        };
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..64]);
        Ok(Self { r, s, recovery_id })
    }

    /// Recover the key that signed `prehash` directly.
    pub fn recover_verifying_key_prehash(
        &self,
        prehash: &[u8; 32],
    ) -> Result<VerifyingKey, CryptoError> {
        let mut bytes = [0u8; 64];
        bytes[..32].copy_from_slice(&self.r);
        bytes[32..].copy_from_slice(&self.s);
        let signature = Signature::from_slice(&bytes).map_err(CryptoError::Signature)?;
        let recovery_id = RecoveryId::from_byte(self.recovery_id)
            .ok_or(CryptoError::InvalidRecoveryId(self.recovery_id))?;
        VerifyingKey::recover_from_prehash(prehash, &signature, recovery_id)
            .map_err(CryptoError::Signature)
    }

    /// Recover the address that produced this signature with
    /// [`Credentials::sign_hash`].
    pub fn recover_signer(&self, hash: &[u8; 32]) -> Result<Address, CryptoError> {
        let key = self.recover_verifying_key_prehash(&ethereum_message_hash(hash))?;
        Ok(public_key_address(&key))
    }
}

impl fmt::Display for RecoverableSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.to_bytes()))
    }
}

impl fmt::Debug for RecoverableSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecoverableSignature({self})")
    }
}

impl FromStr for RecoverableSignature {
    type Err = CryptoError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::from_bytes(&hex_to_bytes(value)?)
    }
}

impl Serialize for RecoverableSignature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RecoverableSignature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        RecoverableSignature::from_str(&value).map_err(D::Error::custom)
    }
}

/// The signing identity of one account.
///
/// Shared read-only between concurrent purchase flows. The secret scalar is
/// zeroized when the last copy is dropped.
#[derive(Clone)]
pub struct Credentials {
    signing_key: SigningKey,
    address: Address,
}

impl Credentials {
    /// Generate a fresh random account.
    pub fn generate(rng: &mut (impl CryptoRng + RngCore)) -> Self {
        Self::from_signing_key(SigningKey::random(rng))
    }

    /// Load an account from a hex encoded 32 byte private key.
    pub fn from_private_key_hex(private_key: &str) -> Result<Self, CryptoError> {
        let bytes = Zeroizing::new(hex_to_bytes(private_key)?);
        let signing_key =
            SigningKey::from_slice(&bytes).map_err(|_| CryptoError::InvalidPrivateKey)?;
        Ok(Self::from_signing_key(signing_key))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let address = public_key_address(signing_key.verifying_key());
        Self {
            signing_key,
            address,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Sign a pre-hashed message returning a [`RecoverableSignature`].
    pub fn sign_prehash_recoverable(
        &self,
        prehash: &[u8; 32],
    ) -> Result<RecoverableSignature, CryptoError> {
        let (signature, recovery_id) = self
            .signing_key
            .sign_prehash_recoverable(prehash)
            .map_err(CryptoError::Signature)?;
        Ok(RecoverableSignature::new(signature, recovery_id))
    }

    /// Sign a 32 byte hash the way `eth_sign` does: over the prefixed digest.
    pub fn sign_hash(&self, hash: &[u8; 32]) -> Result<RecoverableSignature, CryptoError> {
        self.sign_prehash_recoverable(&ethereum_message_hash(hash))
    }

    /// Hash an arbitrary message and sign the hash with [`Self::sign_hash`].
    pub fn sign_message(
        &self,
        message: impl AsRef<[u8]>,
    ) -> Result<RecoverableSignature, CryptoError> {
        self.sign_hash(&keccak256(message))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("address", &self.address)
            .field("signing_key", &"***")
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn known_private_key_has_expected_address() -> anyhow::Result<()> {
        // Well-known development key (private key 0x...01).
        let credentials = Credentials::from_private_key_hex(&format!("0x{:0>64}", "1"))?;
        assert_eq!(
            credentials.address().to_string(),
            "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf"
        );
        Ok(())
    }

    #[test]
    fn signing_and_recovery_works() -> anyhow::Result<()> {
        let hash = keccak256("Hello World!");
        let credentials = Credentials::generate(&mut OsRng);
        let signature = credentials.sign_hash(&hash)?;

        assert_eq!(signature.recover_signer(&hash)?, credentials.address());
        assert!(signature.v() == 27 || signature.v() == 28);
        Ok(())
    }

    #[test]
    fn wrong_hash_recovers_other_address() -> anyhow::Result<()> {
        let credentials = Credentials::generate(&mut OsRng);
        let signature = credentials.sign_hash(&keccak256("Hello World!"))?;

        let recovered = signature.recover_signer(&keccak256("Goodbye World!"))?;
        assert_ne!(recovered, credentials.address());
        Ok(())
    }

    #[test]
    fn signature_text_form_round_trips() -> anyhow::Result<()> {
        let credentials = Credentials::generate(&mut OsRng);
        let signature = credentials.sign_message(b"agreement")?;

        let text = signature.to_string();
        assert_eq!(text.len(), 2 + 130);
        assert_eq!(text.parse::<RecoverableSignature>()?, signature);
        Ok(())
    }

    #[test]
    fn malformed_signatures_are_rejected() {
        assert!(RecoverableSignature::from_bytes(&[0u8; 64]).is_err());

        let mut bytes = [1u8; 65];
        bytes[64] = 5;
        assert!(matches!(
            RecoverableSignature::from_bytes(&bytes),
            Err(CryptoError::InvalidRecoveryId(5))
        ));
    }

    #[test]
    fn invalid_private_keys_are_rejected() {
        assert!(Credentials::from_private_key_hex(&"00".repeat(32)).is_err());
        assert!(Credentials::from_private_key_hex("0xzz").is_err());
    }

    #[test]
    fn debug_output_hides_the_key() {
        let credentials = Credentials::generate(&mut OsRng);
        let debug = format!("{credentials:?}");
        assert!(debug.contains("***"));
        assert!(debug.contains(&credentials.address().to_string()));
    }
}
