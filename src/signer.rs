//! Bounded pools of stateful signer instances.
//!
//! A signer instance buffers bytes between `update` and `sign` and is not
//! safe to share, so the pool lends exclusive access: `borrow` removes an
//! instance (waiting up to a deadline when all are busy) and the returned
//! guard gives it back on every exit path. At any instant, borrowed plus
//! idle equals the configured parallelism.

use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use hmac::{Hmac, Mac};
use rsa::pkcs1v15::SigningKey as RsaSigningKey;
use rsa::traits::PublicKeyParts;
use sha2::{Sha256, Sha384, Sha512};
use signature::{SignatureEncoding, Signer};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::asn1::{oids, writer};
use crate::error::OperationError;
use crate::hash::{HashAlgo, SignAlgo};
use crate::x509::Spki;

#[derive(Error, Debug)]
pub enum SignerError {
    #[error("no idle signer available")]
    NoIdleSigner,
    #[error("signing failed: {0}")]
    Sign(String),
    #[error("keystore: {0}")]
    Keystore(String),
}

impl From<SignerError> for OperationError {
    fn from(err: SignerError) -> Self {
        OperationError::system_failure(err.to_string())
    }
}

/// Private key material a pool can be built from.
#[derive(Clone)]
pub enum KeyMaterial {
    Rsa(rsa::RsaPrivateKey),
    EcP256(p256::SecretKey),
    /// Symmetric MAC key bytes.
    Mac(Zeroizing<Vec<u8>>),
}

/// Named key entry in a keystore.
pub struct KeyEntry {
    pub name: String,
    pub material: KeyMaterial,
}

/// Minimal software keystore: a list of named key entries.
pub struct Keystore {
    entries: Vec<KeyEntry>,
}

impl Keystore {
    pub fn new(entries: Vec<KeyEntry>) -> Self {
        Self { entries }
    }

    /// The named entry, or the first one when no name is given.
    pub fn entry(&self, name: Option<&str>) -> Option<&KeyEntry> {
        match name {
            Some(name) => self.entries.iter().find(|e| e.name == name),
            None => self.entries.first(),
        }
    }
}

/// What the pool's instances compute.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PoolAlgorithm {
    Signature(SignAlgo),
    MacSha256,
}

impl PoolAlgorithm {
    pub fn sign_algo(self) -> Option<SignAlgo> {
        match self {
            PoolAlgorithm::Signature(algo) => Some(algo),
            PoolAlgorithm::MacSha256 => None,
        }
    }
}

enum Backend {
    RsaSha256(RsaSigningKey<Sha256>),
    RsaSha384(RsaSigningKey<Sha384>),
    RsaSha512(RsaSigningKey<Sha512>),
    EcdsaP256(p256::ecdsa::SigningKey),
    MacSha256(Zeroizing<Vec<u8>>),
}

/// One stateful signer. Owns an input buffer; never shared while borrowed.
pub struct SignerInstance {
    backend: Backend,
    buffer: Vec<u8>,
}

impl SignerInstance {
    fn new(backend: Backend) -> Self {
        Self { backend, buffer: Vec::new() }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Sign the buffered bytes and reset the buffer.
    pub fn sign(&mut self) -> Result<Vec<u8>, SignerError> {
        let message = std::mem::take(&mut self.buffer);
        match &self.backend {
            Backend::RsaSha256(key) => Ok(key.sign(&message).to_vec()),
            Backend::RsaSha384(key) => Ok(key.sign(&message).to_vec()),
            Backend::RsaSha512(key) => Ok(key.sign(&message).to_vec()),
            Backend::EcdsaP256(key) => {
                let sig: p256::ecdsa::Signature = key.sign(&message);
                Ok(sig.to_der().to_vec())
            }
            Backend::MacSha256(key) => {
                let mut mac = Hmac::<Sha256>::new_from_slice(key)
                    .map_err(|e| SignerError::Sign(e.to_string()))?;
                mac.update(&message);
                Ok(mac.finalize().into_bytes().to_vec())
            }
        }
    }

    /// One-shot convenience over `update` + `sign`.
    pub fn sign_message(&mut self, message: &[u8]) -> Result<Vec<u8>, SignerError> {
        self.buffer.clear();
        self.update(message);
        self.sign()
    }
}

/// Bounded pool of signer instances for one key and algorithm.
pub struct SignerPool {
    name: String,
    algorithm: PoolAlgorithm,
    size: usize,
    idle: Mutex<Vec<SignerInstance>>,
    available: Condvar,
    /// Public key of the signing key, absent for MAC pools.
    public_key: Option<Spki>,
    /// SHA-1 of the MAC key bytes, for the subject-key-identifier of
    /// symmetric keys.
    mac_key_sha1: Option<Vec<u8>>,
}

impl std::fmt::Debug for SignerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignerPool")
            .field("name", &self.name)
            .field("algorithm", &self.algorithm)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

impl SignerPool {
    /// Build `parallelism` instances from a keystore entry; `key_name`
    /// selects an entry, `None` takes the first.
    pub fn from_keystore(
        name: impl Into<String>,
        keystore: &Keystore,
        key_name: Option<&str>,
        algorithm: PoolAlgorithm,
        parallelism: usize,
    ) -> Result<Self, SignerError> {
        let entry = keystore
            .entry(key_name)
            .ok_or_else(|| SignerError::Keystore("no matching key entry".into()))?;
        Self::from_key(name, &entry.material, algorithm, parallelism)
    }

    pub fn from_key(
        name: impl Into<String>,
        material: &KeyMaterial,
        algorithm: PoolAlgorithm,
        parallelism: usize,
    ) -> Result<Self, SignerError> {
        if parallelism == 0 {
            return Err(SignerError::Keystore("parallelism must be positive".into()));
        }

        let mut instances = Vec::with_capacity(parallelism);
        for _ in 0..parallelism {
            instances.push(SignerInstance::new(build_backend(material, algorithm)?));
        }

        let public_key = public_key_of(material);
        let mac_key_sha1 = match material {
            KeyMaterial::Mac(key) => Some(HashAlgo::Sha1.hash(key)),
            _ => None,
        };

        Ok(Self {
            name: name.into(),
            algorithm,
            size: parallelism,
            idle: Mutex::new(instances),
            available: Condvar::new(),
            public_key,
            mac_key_sha1,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn algorithm(&self) -> PoolAlgorithm {
        self.algorithm
    }

    /// Configured parallelism N.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn public_key(&self) -> Option<&Spki> {
        self.public_key.as_ref()
    }

    pub fn mac_key_sha1(&self) -> Option<&[u8]> {
        self.mac_key_sha1.as_deref()
    }

    /// Borrow an instance, waiting up to `timeout` when all are busy.
    /// A zero timeout fails immediately with `NoIdleSigner`.
    pub fn borrow(&self, timeout: Duration) -> Result<SignerGuard<'_>, SignerError> {
        let deadline = Instant::now() + timeout;
        let mut idle = self.idle.lock().map_err(|_| SignerError::Sign("pool poisoned".into()))?;
        loop {
            if let Some(instance) = idle.pop() {
                return Ok(SignerGuard { pool: self, instance: Some(instance) });
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(SignerError::NoIdleSigner);
            }
            let (guard, result) = self
                .available
                .wait_timeout(idle, remaining)
                .map_err(|_| SignerError::Sign("pool poisoned".into()))?;
            idle = guard;
            if result.timed_out() && idle.is_empty() {
                return Err(SignerError::NoIdleSigner);
            }
        }
    }

    fn give_back(&self, instance: SignerInstance) {
        if let Ok(mut idle) = self.idle.lock() {
            idle.push(instance);
            self.available.notify_one();
        }
    }
}

/// Scoped loan of a signer instance; returns it to the pool on drop.
pub struct SignerGuard<'a> {
    pool: &'a SignerPool,
    instance: Option<SignerInstance>,
}

impl Deref for SignerGuard<'_> {
    type Target = SignerInstance;

    fn deref(&self) -> &SignerInstance {
        self.instance.as_ref().expect("instance present until drop")
    }
}

impl DerefMut for SignerGuard<'_> {
    fn deref_mut(&mut self) -> &mut SignerInstance {
        self.instance.as_mut().expect("instance present until drop")
    }
}

impl Drop for SignerGuard<'_> {
    fn drop(&mut self) {
        if let Some(instance) = self.instance.take() {
            self.pool.give_back(instance);
        }
    }
}

fn build_backend(material: &KeyMaterial, algorithm: PoolAlgorithm) -> Result<Backend, SignerError> {
    match (material, algorithm) {
        (KeyMaterial::Rsa(key), PoolAlgorithm::Signature(SignAlgo::RsaPkcs1Sha256)) => {
            Ok(Backend::RsaSha256(RsaSigningKey::new(key.clone())))
        }
        (KeyMaterial::Rsa(key), PoolAlgorithm::Signature(SignAlgo::RsaPkcs1Sha384)) => {
            Ok(Backend::RsaSha384(RsaSigningKey::new(key.clone())))
        }
        (KeyMaterial::Rsa(key), PoolAlgorithm::Signature(SignAlgo::RsaPkcs1Sha512)) => {
            Ok(Backend::RsaSha512(RsaSigningKey::new(key.clone())))
        }
        (KeyMaterial::EcP256(key), PoolAlgorithm::Signature(SignAlgo::EcdsaSha256)) => {
            Ok(Backend::EcdsaP256(p256::ecdsa::SigningKey::from(key.clone())))
        }
        (KeyMaterial::Mac(key), PoolAlgorithm::MacSha256) => {
            Ok(Backend::MacSha256(key.clone()))
        }
        _ => Err(SignerError::Keystore("key type does not match algorithm".into())),
    }
}

fn public_key_of(material: &KeyMaterial) -> Option<Spki> {
    match material {
        KeyMaterial::Rsa(key) => {
            let public = rsa::RsaPublicKey::from(key);
            let mut body = writer::integer_from_magnitude(&public.n().to_bytes_be());
            body.extend_from_slice(&writer::integer_from_magnitude(&public.e().to_bytes_be()));
            Some(Spki {
                algorithm: oids::RSA_ENCRYPTION.to_vec(),
                parameters: Some(writer::null()),
                key_bits: writer::sequence(&body),
            })
        }
        KeyMaterial::EcP256(key) => Some(Spki {
            algorithm: oids::EC_PUBLIC_KEY.to_vec(),
            parameters: Some(writer::oid(oids::SECP256R1)),
            key_bits: key.public_key().to_sec1_bytes().to_vec(),
        }),
        KeyMaterial::Mac(_) => None,
    }
}
