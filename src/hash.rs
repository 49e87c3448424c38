//! Named hash and signature algorithms.
//!
//! `HashAlgo` is the closed set of digest algorithms accepted in OCSP
//! `CertID` structures and used for fingerprints; each knows its output
//! length and object identifier. `SignAlgo` covers the signature
//! algorithms this CA can emit and verify, keyed by OID.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use digest::{Digest, ExtendableOutput, Update, XofReader};
use sha1::Sha1;
use sha2::{Sha224, Sha256, Sha384, Sha512};
use sha3::{Sha3_224, Sha3_256, Sha3_384, Sha3_512, Shake128, Shake256};
use sm3::Sm3;

use crate::asn1::{oids, writer};

/// Hash algorithms accepted for issuer hashes and fingerprints.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HashAlgo {
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
    Sha3_224,
    Sha3_256,
    Sha3_384,
    Sha3_512,
    Shake128,
    Shake256,
    Sm3,
}

impl HashAlgo {
    pub const ALL: [HashAlgo; 12] = [
        HashAlgo::Sha1,
        HashAlgo::Sha224,
        HashAlgo::Sha256,
        HashAlgo::Sha384,
        HashAlgo::Sha512,
        HashAlgo::Sha3_224,
        HashAlgo::Sha3_256,
        HashAlgo::Sha3_384,
        HashAlgo::Sha3_512,
        HashAlgo::Shake128,
        HashAlgo::Shake256,
        HashAlgo::Sm3,
    ];

    /// Digest output length in bytes. SHAKE outputs use the RFC 8702
    /// lengths (32 and 64).
    pub fn len(self) -> usize {
        match self {
            HashAlgo::Sha1 => 20,
            HashAlgo::Sha224 | HashAlgo::Sha3_224 => 28,
            HashAlgo::Sha256 | HashAlgo::Sha3_256 | HashAlgo::Shake128 | HashAlgo::Sm3 => 32,
            HashAlgo::Sha384 | HashAlgo::Sha3_384 => 48,
            HashAlgo::Sha512 | HashAlgo::Sha3_512 | HashAlgo::Shake256 => 64,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            HashAlgo::Sha1 => "SHA1",
            HashAlgo::Sha224 => "SHA224",
            HashAlgo::Sha256 => "SHA256",
            HashAlgo::Sha384 => "SHA384",
            HashAlgo::Sha512 => "SHA512",
            HashAlgo::Sha3_224 => "SHA3-224",
            HashAlgo::Sha3_256 => "SHA3-256",
            HashAlgo::Sha3_384 => "SHA3-384",
            HashAlgo::Sha3_512 => "SHA3-512",
            HashAlgo::Shake128 => "SHAKE128",
            HashAlgo::Shake256 => "SHAKE256",
            HashAlgo::Sm3 => "SM3",
        }
    }

    /// OID content octets.
    pub fn oid(self) -> &'static [u8] {
        match self {
            HashAlgo::Sha1 => oids::SHA1,
            HashAlgo::Sha224 => oids::SHA224,
            HashAlgo::Sha256 => oids::SHA256,
            HashAlgo::Sha384 => oids::SHA384,
            HashAlgo::Sha512 => oids::SHA512,
            HashAlgo::Sha3_224 => oids::SHA3_224,
            HashAlgo::Sha3_256 => oids::SHA3_256,
            HashAlgo::Sha3_384 => oids::SHA3_384,
            HashAlgo::Sha3_512 => oids::SHA3_512,
            HashAlgo::Shake128 => oids::SHAKE128,
            HashAlgo::Shake256 => oids::SHAKE256,
            HashAlgo::Sm3 => oids::SM3,
        }
    }

    /// Lookup by OID content octets.
    pub fn from_oid(oid: &[u8]) -> Option<Self> {
        Self::ALL.into_iter().find(|algo| algo.oid() == oid)
    }

    /// Lookup by name, case-insensitive, dashes and underscores ignored.
    pub fn from_name(name: &str) -> Option<Self> {
        let normalized: String = name
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_ascii_uppercase();
        Self::ALL.into_iter().find(|algo| {
            algo.name().replace('-', "") == normalized
        })
    }

    pub fn hash(self, data: &[u8]) -> Vec<u8> {
        match self {
            HashAlgo::Sha1 => Sha1::digest(data).to_vec(),
            HashAlgo::Sha224 => Sha224::digest(data).to_vec(),
            HashAlgo::Sha256 => Sha256::digest(data).to_vec(),
            HashAlgo::Sha384 => Sha384::digest(data).to_vec(),
            HashAlgo::Sha512 => Sha512::digest(data).to_vec(),
            HashAlgo::Sha3_224 => Sha3_224::digest(data).to_vec(),
            HashAlgo::Sha3_256 => Sha3_256::digest(data).to_vec(),
            HashAlgo::Sha3_384 => Sha3_384::digest(data).to_vec(),
            HashAlgo::Sha3_512 => Sha3_512::digest(data).to_vec(),
            HashAlgo::Shake128 => xof::<Shake128>(data, 32),
            HashAlgo::Shake256 => xof::<Shake256>(data, 64),
            HashAlgo::Sm3 => Sm3::digest(data).to_vec(),
        }
    }

    pub fn base64_hash(self, data: &[u8]) -> String {
        BASE64.encode(self.hash(data))
    }

    pub fn hex_hash(self, data: &[u8]) -> String {
        hex::encode(self.hash(data))
    }
}

fn xof<X: Update + ExtendableOutput + Default>(data: &[u8], out_len: usize) -> Vec<u8> {
    let mut hasher = X::default();
    hasher.update(data);
    let mut out = vec![0u8; out_len];
    hasher.finalize_xof().read(&mut out);
    out
}

/// Signature algorithms, keyed by OID.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SignAlgo {
    RsaPkcs1Sha256,
    RsaPkcs1Sha384,
    RsaPkcs1Sha512,
    EcdsaSha256,
    EcdsaSha384,
    Ed25519,
}

impl SignAlgo {
    pub fn oid(self) -> &'static [u8] {
        match self {
            SignAlgo::RsaPkcs1Sha256 => oids::RSA_WITH_SHA256,
            SignAlgo::RsaPkcs1Sha384 => oids::RSA_WITH_SHA384,
            SignAlgo::RsaPkcs1Sha512 => oids::RSA_WITH_SHA512,
            SignAlgo::EcdsaSha256 => oids::ECDSA_WITH_SHA256,
            SignAlgo::EcdsaSha384 => oids::ECDSA_WITH_SHA384,
            SignAlgo::Ed25519 => oids::ED25519,
        }
    }

    pub fn from_oid(oid: &[u8]) -> Option<Self> {
        [
            SignAlgo::RsaPkcs1Sha256,
            SignAlgo::RsaPkcs1Sha384,
            SignAlgo::RsaPkcs1Sha512,
            SignAlgo::EcdsaSha256,
            SignAlgo::EcdsaSha384,
            SignAlgo::Ed25519,
        ]
        .into_iter()
        .find(|algo| algo.oid() == oid)
    }

    pub fn name(self) -> &'static str {
        match self {
            SignAlgo::RsaPkcs1Sha256 => "SHA256withRSA",
            SignAlgo::RsaPkcs1Sha384 => "SHA384withRSA",
            SignAlgo::RsaPkcs1Sha512 => "SHA512withRSA",
            SignAlgo::EcdsaSha256 => "SHA256withECDSA",
            SignAlgo::EcdsaSha384 => "SHA384withECDSA",
            SignAlgo::Ed25519 => "Ed25519",
        }
    }

    /// The digest the algorithm applies to the to-be-signed bytes, if any.
    pub fn hash_algo(self) -> Option<HashAlgo> {
        match self {
            SignAlgo::RsaPkcs1Sha256 | SignAlgo::EcdsaSha256 => Some(HashAlgo::Sha256),
            SignAlgo::RsaPkcs1Sha384 | SignAlgo::EcdsaSha384 => Some(HashAlgo::Sha384),
            SignAlgo::RsaPkcs1Sha512 => Some(HashAlgo::Sha512),
            SignAlgo::Ed25519 => None,
        }
    }

    /// DER `AlgorithmIdentifier` for certificate and CRL emission.
    /// RSA variants carry an explicit NULL parameter per RFC 3279;
    /// ECDSA and Ed25519 omit parameters.
    pub fn algorithm_identifier(self) -> Vec<u8> {
        let mut body = writer::oid(self.oid());
        match self {
            SignAlgo::RsaPkcs1Sha256 | SignAlgo::RsaPkcs1Sha384 | SignAlgo::RsaPkcs1Sha512 => {
                body.extend_from_slice(&writer::null());
            }
            SignAlgo::EcdsaSha256 | SignAlgo::EcdsaSha384 | SignAlgo::Ed25519 => {}
        }
        writer::sequence(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lengths_match_algorithms() {
        assert_eq!(HashAlgo::Sha1.len(), 20);
        assert_eq!(HashAlgo::Sha256.len(), 32);
        assert_eq!(HashAlgo::Shake128.len(), 32);
        assert_eq!(HashAlgo::Shake256.len(), 64);
        assert_eq!(HashAlgo::Sm3.len(), 32);
        for algo in HashAlgo::ALL {
            assert_eq!(algo.hash(b"abc").len(), algo.len());
        }
    }

    #[test]
    fn sha256_known_vector() {
        let digest = HashAlgo::Sha256.hash(b"abc");
        assert_eq!(
            hex::encode(digest),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn oid_roundtrip() {
        for algo in HashAlgo::ALL {
            assert_eq!(HashAlgo::from_oid(algo.oid()), Some(algo));
        }
        assert_eq!(HashAlgo::from_oid(&[0x01, 0x02]), None);
    }

    #[test]
    fn name_lookup_ignores_case_and_dashes() {
        assert_eq!(HashAlgo::from_name("sha256"), Some(HashAlgo::Sha256));
        assert_eq!(HashAlgo::from_name("SHA-256"), Some(HashAlgo::Sha256));
        assert_eq!(HashAlgo::from_name("sha3-384"), Some(HashAlgo::Sha3_384));
        assert_eq!(HashAlgo::from_name("shake_128"), Some(HashAlgo::Shake128));
        assert_eq!(HashAlgo::from_name("md5"), None);
    }

    #[test]
    fn sign_algo_algorithm_identifier() {
        // SHA256withRSA carries NULL params
        let alg_id = SignAlgo::RsaPkcs1Sha256.algorithm_identifier();
        assert_eq!(alg_id[0], 0x30);
        assert!(alg_id.ends_with(&[0x05, 0x00]));
        // ECDSA omits params
        let alg_id = SignAlgo::EcdsaSha256.algorithm_identifier();
        assert!(!alg_id.ends_with(&[0x05, 0x00]));
    }
}
