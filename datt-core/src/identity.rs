// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cryptographic identity material: secp256k1 key pairs, base58check addresses and DER-encoded
//! ECDSA signatures.
//!
//! An identity binds a username to a key pair derived from credentials. The address is always
//! derivable from the public key, which is what makes content self-certifying: address, public
//! key and signature attached to the same object can be checked against each other without any
//! third party.

use std::fmt;
use std::str::FromStr;

use bitcoin::bip32::{DerivationPath, Xpriv};
use bitcoin::secp256k1::{self, Message as SecpMessage, Secp256k1, SecretKey};
use bitcoin::{Network, NetworkKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hash::Hash;
use crate::serde::{deserialize_hex, serialize_hex};

/// Derivation path of the identity key below the master key of a signed-in user.
pub const IDENTITY_KEY_PATH: &str = "m/44'/0'/0'/0/0";

/// secp256k1 secret key. Signs 32-byte digests, producing deterministic (RFC 6979) low-S ECDSA
/// signatures.
///
/// Deliberately not serializable; the secret never appears in any record or wire frame.
#[derive(Clone)]
pub struct PrivateKey(SecretKey);

impl PrivateKey {
    /// Create a `PrivateKey` from raw bytes.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, IdentityError> {
        let secret_key =
            SecretKey::from_slice(bytes).map_err(|_| IdentityError::InvalidPrivateKey)?;
        Ok(Self(secret_key))
    }

    /// Derive the public half of this key.
    pub fn public_key(&self) -> PublicKey {
        let secp = Secp256k1::new();
        PublicKey(secp256k1::PublicKey::from_secret_key(&secp, &self.0))
    }

    /// Sign a 32-byte digest.
    pub fn sign(&self, digest: &Hash) -> Signature {
        let secp = Secp256k1::new();
        let message = SecpMessage::from_digest(*digest.as_bytes());
        Signature(secp.sign_ecdsa(&message, &self.0))
    }

    /// Raw bytes of the secret key.
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.0.secret_bytes()
    }
}

impl From<SecretKey> for PrivateKey {
    fn from(value: SecretKey) -> Self {
        Self(value)
    }
}

impl FromStr for PrivateKey {
    type Err = IdentityError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let bytes: [u8; 32] = hex::decode(value)?
            .as_slice()
            .try_into()
            .map_err(|_| IdentityError::InvalidPrivateKey)?;
        Self::from_bytes(&bytes)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(<redacted>)")
    }
}

/// Compressed secp256k1 public key (33 bytes, hex string form on the wire).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey(secp256k1::PublicKey);

impl PublicKey {
    /// Create a `PublicKey` from its compressed bytes representation.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IdentityError> {
        let public_key =
            secp256k1::PublicKey::from_slice(bytes).map_err(|_| IdentityError::InvalidPublicKey)?;
        Ok(Self(public_key))
    }

    /// Compressed bytes of the public key.
    pub fn to_bytes(&self) -> [u8; 33] {
        self.0.serialize()
    }

    /// Convert the public key to its hex string form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Derive the pay-to-pubkey-hash address of this key.
    pub fn address(&self) -> Address {
        let public_key = bitcoin::PublicKey::new(self.0);
        Address(bitcoin::Address::p2pkh(
            public_key.pubkey_hash(),
            Network::Bitcoin,
        ))
    }

    /// Check a signature over a 32-byte digest against this key.
    ///
    /// A structurally valid but non-matching signature yields `false`, it is not an error.
    pub fn verify(&self, digest: &Hash, signature: &Signature) -> bool {
        let secp = Secp256k1::new();
        let message = SecpMessage::from_digest(*digest.as_bytes());
        secp.verify_ecdsa(&message, &signature.0, &self.0).is_ok()
    }
}

impl From<secp256k1::PublicKey> for PublicKey {
    fn from(value: secp256k1::PublicKey) -> Self {
        Self(value)
    }
}

impl FromStr for PublicKey {
    type Err = IdentityError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::from_bytes(&hex::decode(value)?)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PublicKey").field(&self.to_hex()).finish()
    }
}

impl Serialize for PublicKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serialize_hex(&self.to_bytes(), serializer)
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let bytes = deserialize_hex(deserializer)?;
        Self::from_bytes(&bytes).map_err(|err| serde::de::Error::custom(err.to_string()))
    }
}

/// Base58check pay-to-pubkey-hash address.
///
/// An address alone does not imply knowledge of the matching public key; the reverse derivation
/// (public key to address) is what identity-binding checks rely on.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Address(bitcoin::Address);

impl FromStr for Address {
    type Err = IdentityError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let address = value
            .parse::<bitcoin::Address<bitcoin::address::NetworkUnchecked>>()?
            .require_network(Network::Bitcoin)?;
        Ok(Self(address))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Address").field(&self.0.to_string()).finish()
    }
}

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        value
            .parse()
            .map_err(|err: IdentityError| serde::de::Error::custom(err.to_string()))
    }
}

/// DER-encoded ECDSA signature (hex string form on the wire).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature(secp256k1::ecdsa::Signature);

impl Signature {
    /// Create a `Signature` from its DER bytes representation.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IdentityError> {
        let signature = secp256k1::ecdsa::Signature::from_der(bytes)
            .map_err(|_| IdentityError::InvalidSignature)?;
        Ok(Self(signature))
    }

    /// DER bytes of the signature.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.serialize_der().to_vec()
    }

    /// Convert the signature to its hex string form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }
}

impl FromStr for Signature {
    type Err = IdentityError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::from_bytes(&hex::decode(value)?)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Signature").field(&self.to_hex()).finish()
    }
}

impl Serialize for Signature {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serialize_hex(&self.to_bytes(), serializer)
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let bytes = deserialize_hex(deserializer)?;
        Self::from_bytes(&bytes).map_err(|err| serde::de::Error::custom(err.to_string()))
    }
}

/// A signed-in user: username plus the key material derived from their credentials.
///
/// Lives for the process session and is never mutated after creation.
#[derive(Debug, Clone)]
pub struct Identity {
    username: String,
    address: Address,
    public_key: PublicKey,
    private_key: PrivateKey,
}

impl Identity {
    /// Derive an identity from credentials.
    ///
    /// The credentials hash to a BIP-32 seed; the identity key sits at [`IDENTITY_KEY_PATH`]
    /// below the master key, so the same credentials always yield the same identity.
    pub fn from_credentials(username: &str, password: &str) -> Result<Self, IdentityError> {
        let seed = Hash::new(format!("{username}:{password}"));
        let master = Xpriv::new_master(NetworkKind::Main, seed.as_bytes())?;

        let secp = Secp256k1::new();
        let path = DerivationPath::from_str(IDENTITY_KEY_PATH)
            .expect("identity key path is a valid derivation path");
        let child = master.derive_priv(&secp, &path)?;

        let private_key = PrivateKey::from(child.private_key);
        let public_key = private_key.public_key();
        let address = public_key.address();

        Ok(Self {
            username: username.to_string(),
            address,
            public_key,
            private_key,
        })
    }

    /// Build an identity around an existing private key.
    pub fn from_private_key(username: &str, private_key: PrivateKey) -> Self {
        let public_key = private_key.public_key();
        let address = public_key.address();
        Self {
            username: username.to_string(),
            address,
            public_key,
            private_key,
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Sign arbitrary data: the data is hashed with SHA-256 and the digest signed.
    pub fn sign(&self, data: impl AsRef<[u8]>) -> Signature {
        self.private_key.sign(&Hash::new(data))
    }

    /// The announceable public form of this identity. The private key is not part of it.
    pub fn to_record(&self) -> IdentityRecord {
        IdentityRecord {
            username: self.username.clone(),
            address: self.address.clone(),
            public_key: self.public_key,
        }
    }
}

/// Public identity record broadcast to peers when announcing who we are.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub username: String,
    pub address: Address,
    pub public_key: PublicKey,
}

/// Error types for identity material.
#[derive(Error, Debug)]
pub enum IdentityError {
    /// Secret key bytes are out of range or of the wrong length.
    #[error("invalid secret key material")]
    InvalidPrivateKey,

    /// Public key bytes are not a valid compressed curve point.
    #[error("invalid public key encoding")]
    InvalidPublicKey,

    /// Signature bytes are not valid DER.
    #[error("invalid DER signature encoding")]
    InvalidSignature,

    /// Address string fails base58check or network validation.
    #[error("invalid address: {0}")]
    InvalidAddress(#[from] bitcoin::address::ParseError),

    /// Key material contains invalid hexadecimal characters.
    #[error("invalid hex encoding in key material")]
    InvalidHexEncoding(#[from] hex::FromHexError),

    /// BIP-32 derivation failed.
    #[error("key derivation failed: {0}")]
    Derivation(#[from] bitcoin::bip32::Error),
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use crate::hash::Hash;

    use super::{Address, Identity, IdentityError, PublicKey, Signature};

    #[test]
    fn derives_deterministic_identity_from_credentials() {
        let identity = Identity::from_credentials("username", "password").unwrap();

        assert_eq!(
            identity.public_key().to_hex(),
            "02eab18220b5b68893700f994201704b89d7b606e92fc1e227e86f52463ed6b06b"
        );
        assert_eq!(
            identity.address().to_string(),
            "18KWpWD4CDx4aFg4BprCVofBgshdJWmCB4"
        );

        let identity_again = Identity::from_credentials("username", "password").unwrap();
        assert_eq!(identity.public_key(), identity_again.public_key());
    }

    #[test]
    fn address_is_derivable_from_public_key() {
        let identity = Identity::from_credentials("auser", "apassword").unwrap();
        assert_eq!(&identity.public_key().address(), identity.address());
    }

    #[test]
    fn deterministic_signature_over_test_data() {
        let identity = Identity::from_credentials("username", "password").unwrap();
        let signature = identity.sign("test data");

        assert_eq!(
            signature.to_hex(),
            "304402203bef8c57c6a3c7b6058206dcf1f6be5dc0ebb8b0e10e1d6f244ec06854a426e5022070c367a3b3bc05552b75813003d44635959a27c504bff6e955bd6e91b945c9a0"
        );
        assert!(
            identity
                .public_key()
                .verify(&Hash::new("test data"), &signature)
        );
    }

    #[test]
    fn verify_rejects_foreign_signature_without_error() {
        let identity = Identity::from_credentials("username", "password").unwrap();
        let other = Identity::from_credentials("other_user", "other_password").unwrap();

        let digest = Hash::new("test data");
        assert!(!identity.public_key().verify(&digest, &other.sign("test data")));
        assert!(!identity.public_key().verify(&Hash::new("other data!"), &identity.sign("test data")));
    }

    #[test]
    fn invalid_public_key_material() {
        assert!(matches!(
            PublicKey::from_str("not a pub key, man"),
            Err(IdentityError::InvalidHexEncoding(_))
        ));
        // Valid hex, not a curve point.
        assert!(matches!(
            PublicKey::from_str("02ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff"),
            Err(IdentityError::InvalidPublicKey)
        ));
    }

    #[test]
    fn invalid_address_material() {
        assert!(Address::from_str("1RlyInvalidAddress").is_err());
        assert!(Address::from_str("18KWpWD4CDx4aFg4BprCVofBgshdJWmCB4").is_ok());
    }

    #[test]
    fn invalid_signature_material() {
        assert!(matches!(
            Signature::from_str("nope not a signature"),
            Err(IdentityError::InvalidHexEncoding(_))
        ));
        assert!(matches!(
            Signature::from_str("deadbeef"),
            Err(IdentityError::InvalidSignature)
        ));
    }

    #[test]
    fn signature_hex_round_trip() {
        let identity = Identity::from_credentials("username", "password").unwrap();
        let signature = identity.sign("test data");
        let parsed = Signature::from_str(&signature.to_hex()).unwrap();
        assert_eq!(signature, parsed);
    }

    #[test]
    fn identity_record_has_no_secret_material() {
        let identity = Identity::from_credentials("username", "password").unwrap();
        let json = serde_json::to_string(&identity.to_record()).unwrap();
        assert!(!json.contains(&hex::encode(identity.private_key.secret_bytes())));
        assert!(json.contains("username"));
    }
}
