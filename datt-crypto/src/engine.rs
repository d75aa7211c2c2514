// SPDX-License-Identifier: MIT OR Apache-2.0

use bip39::Mnemonic;
use bitcoin::NetworkKind;
use bitcoin::bip32::{DerivationPath, Xpriv, Xpub};
use bitcoin::secp256k1::Secp256k1;
use thiserror::Error;

use datt_core::{Address, Hash, PrivateKey, PublicKey, Signature};

use crate::pool::WorkerPool;

/// Entropy lengths BIP-39 accepts, in bytes.
const VALID_SEED_LENGTHS: [usize; 5] = [16, 20, 24, 28, 32];

/// Byte order of a digest passed to [`CryptoEngine::sign`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endian {
    Big,
    Little,
}

/// Mnemonic and master extended keys derived from a random seed.
#[derive(Debug, Clone)]
pub struct Xkeys {
    pub mnemonic: String,
    pub xprv: Xpriv,
    pub xpub: Xpub,
}

/// Extended keys and address of a child derived from an extended private key.
#[derive(Debug, Clone)]
pub struct ChildXkeys {
    pub xprv: Xpriv,
    pub xpub: Xpub,
    pub address: Address,
}

/// Asynchronous crypto operations, offloaded to a [`WorkerPool`] so the caller's task never
/// blocks on CPU-bound work.
///
/// Engines constructed with [`CryptoEngine::new`] share the process-wide default pool; an engine
/// built with [`CryptoEngine::with_pool`] uses only the pool it was given, which keeps tests and
/// tenants isolated from each other.
///
/// Arguments are checked before a task is queued: structurally invalid input fails the call
/// right away and never reaches a worker. Well-formed but non-matching material (a signature
/// that does not belong to a key) is not an error; verification resolves `false` instead.
#[derive(Clone, Debug)]
pub struct CryptoEngine {
    pool: WorkerPool,
}

impl CryptoEngine {
    /// Engine on the shared default pool.
    pub fn new() -> Self {
        Self {
            pool: WorkerPool::default_pool(),
        }
    }

    /// Engine on an explicitly provided pool. The default pool is never touched.
    pub fn with_pool(pool: WorkerPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// SHA-256 of the given bytes. Succeeds for any input, including empty.
    pub async fn sha256(&self, data: impl Into<Vec<u8>>) -> Result<Hash, CryptoEngineError> {
        let data = data.into();
        self.run(move || Hash::new(&data)).await
    }

    /// Derive a BIP-39 mnemonic and the master extended key pair from entropy.
    ///
    /// The seed must be 16–32 bytes in steps of 4; anything else is rejected before dispatch.
    pub async fn xkeys_from_seed(&self, seed: &[u8]) -> Result<Xkeys, CryptoEngineError> {
        if !VALID_SEED_LENGTHS.contains(&seed.len()) {
            return Err(CryptoEngineError::InvalidSeedLength(seed.len()));
        }

        let seed = seed.to_vec();
        self.run(move || {
            let mnemonic = Mnemonic::from_entropy(&seed)?;
            let xprv = Xpriv::new_master(NetworkKind::Main, &mnemonic.to_seed(""))?;
            let secp = Secp256k1::new();
            let xpub = Xpub::from_priv(&secp, &xprv);
            Ok(Xkeys {
                mnemonic: mnemonic.to_string(),
                xprv,
                xpub,
            })
        })
        .await?
    }

    /// Derive a child extended key pair and its address below the given extended private key.
    ///
    /// An unparseable derivation path is rejected before dispatch.
    pub async fn derive_xkeys_from_xprv(
        &self,
        xprv: Xpriv,
        path: &str,
    ) -> Result<ChildXkeys, CryptoEngineError> {
        let path: DerivationPath = path
            .parse()
            .map_err(|_| CryptoEngineError::InvalidDerivationPath(path.to_string()))?;

        self.run(move || {
            let secp = Secp256k1::new();
            let child_xprv = xprv.derive_priv(&secp, &path)?;
            let child_xpub = Xpub::from_priv(&secp, &child_xprv);
            let address = PublicKey::from(child_xpub.public_key).address();
            Ok(ChildXkeys {
                xprv: child_xprv,
                xpub: child_xpub,
                address,
            })
        })
        .await?
    }

    /// Derive the session identity for the given credentials.
    pub async fn derive_identity(
        &self,
        username: &str,
        password: &str,
    ) -> Result<datt_core::Identity, CryptoEngineError> {
        let (username, password) = (username.to_string(), password.to_string());
        Ok(self
            .run(move || datt_core::Identity::from_credentials(&username, &password))
            .await??)
    }

    /// ECDSA-sign a 32-byte digest.
    pub async fn sign(
        &self,
        digest: Hash,
        private_key: PrivateKey,
        endian: Endian,
    ) -> Result<Signature, CryptoEngineError> {
        let digest = oriented(digest, endian);
        self.run(move || private_key.sign(&digest)).await
    }

    /// Check a signature over a 32-byte digest against a public key.
    ///
    /// Resolves `false` for a non-matching signature, it does not error.
    pub async fn verify_signature(
        &self,
        digest: Hash,
        signature: Signature,
        public_key: PublicKey,
    ) -> Result<bool, CryptoEngineError> {
        self.run(move || public_key.verify(&digest, &signature))
            .await
    }

    async fn run<T, F>(&self, task: F) -> Result<T, CryptoEngineError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.pool
            .dispatch(task)
            .await
            .map_err(|_| CryptoEngineError::Canceled)
    }
}

impl Default for CryptoEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn oriented(digest: Hash, endian: Endian) -> Hash {
    match endian {
        Endian::Big => digest,
        Endian::Little => {
            let mut bytes = *digest.as_bytes();
            bytes.reverse();
            Hash::from_bytes(bytes)
        }
    }
}

/// Error types for engine operations.
#[derive(Error, Debug)]
pub enum CryptoEngineError {
    /// Seed entropy has a length BIP-39 does not accept.
    #[error("seed must be 16, 20, 24, 28 or 32 bytes, got {0}")]
    InvalidSeedLength(usize),

    /// Derivation path string is not a valid BIP-32 path.
    #[error("invalid derivation path '{0}'")]
    InvalidDerivationPath(String),

    /// Mnemonic derivation failed.
    #[error("mnemonic derivation failed: {0}")]
    Mnemonic(#[from] bip39::Error),

    /// BIP-32 key derivation failed.
    #[error("key derivation failed: {0}")]
    Derivation(#[from] bitcoin::bip32::Error),

    /// Identity derivation failed.
    #[error("identity derivation failed: {0}")]
    Identity(#[from] datt_core::IdentityError),

    /// The task's worker went away before the result was produced.
    #[error("crypto task was canceled before completing")]
    Canceled,
}
