//! PKCS#10 certification requests.
//!
//! Structural decoding of `CertificationRequest`, the attributes this CA
//! understands (`extensionRequest`, `challengePassword`, and the static-DH
//! proof-of-possession reference), proof-of-possession verification, and
//! RFC 3279 canonicalization of the requested public key.

use hmac::{Hmac, Mac};
use rsa::pkcs1v15::{Signature as RsaSignature, VerifyingKey as RsaVerifyingKey};
use rsa::BigUint;
use sha2::{Digest, Sha256, Sha384, Sha512};
use signature::Verifier;

use crate::asn1::{self, oids, tag, writer, DecodeError};
use crate::error::{OperationError, Result};
use crate::hash::SignAlgo;
use crate::types::SerialNumber;
use crate::x509::{Spki, X500Name};

/// Static-DH proof-of-possession reference carried in the CSR signature:
/// the key-agreement certificate of the verifying side plus the MAC value.
#[derive(Clone, Debug)]
pub struct DhSigStatic {
    pub issuer: X500Name,
    pub serial: SerialNumber,
    pub mac_value: Vec<u8>,
}

/// Resolves the CA-side key-agreement secret referenced by a static-DH POP.
pub trait DhPopKeyResolver: Send + Sync {
    fn resolve(&self, issuer: &X500Name, serial: &SerialNumber) -> Option<x25519_dalek::StaticSecret>;
}

/// A decoded certification request. The DER is retained; the signed bytes
/// are addressed by offset for POP verification.
#[derive(Clone, Debug)]
pub struct CertRequest {
    der: Vec<u8>,
    /// Byte range of the CertificationRequestInfo, the signed portion.
    cri_start: usize,
    cri_end: usize,
    subject: X500Name,
    spki: Spki,
    sig_algo_oid: Vec<u8>,
    signature: Vec<u8>,
    extension_request: Option<Vec<u8>>,
    challenge_password: Option<String>,
}

impl CertRequest {
    pub fn parse(der: Vec<u8>) -> std::result::Result<Self, DecodeError> {
        let outer = asn1::read_header_expect(&der, 0, tag::SEQUENCE)?;
        let cri = asn1::read_header_expect(&der, outer.content_offset, tag::SEQUENCE)?;

        let version_hdr = asn1::read_header_expect(&der, cri.content_offset, tag::INTEGER)?;
        if asn1::integer_u64(&der, &version_hdr)? != 0 {
            return Err(DecodeError::Malformed("CSR version"));
        }

        let subject_hdr = asn1::read_header_expect(&der, version_hdr.end(), tag::SEQUENCE)?;
        let subject = X500Name::parse(&der, subject_hdr.tag_offset)?;

        let spki_hdr = asn1::read_header_expect(&der, subject_hdr.end(), tag::SEQUENCE)?;
        let spki = Spki::parse(&der, spki_hdr.tag_offset)?;

        // attributes, [0] IMPLICIT SET OF Attribute
        let mut extension_request = None;
        let mut challenge_password = None;
        if spki_hdr.end() < cri.end() {
            let attrs = asn1::read_header(&der, spki_hdr.end())?;
            if attrs.tag != 0xA0 {
                return Err(DecodeError::Malformed("CSR attributes tag"));
            }
            let mut pos = attrs.content_offset;
            while pos < attrs.end() {
                let attr = asn1::read_header_expect(&der, pos, tag::SEQUENCE)?;
                let oid_hdr = asn1::read_header_expect(&der, attr.content_offset, tag::OID)?;
                let attr_oid = asn1::content(&der, &oid_hdr);
                let values = asn1::read_header_expect(&der, oid_hdr.end(), tag::SET)?;
                if attr_oid == oids::EXTENSION_REQUEST {
                    let exts = asn1::read_header_expect(&der, values.content_offset, tag::SEQUENCE)?;
                    extension_request = Some(der[exts.tag_offset..exts.end()].to_vec());
                } else if attr_oid == oids::CHALLENGE_PASSWORD {
                    let value = asn1::read_header(&der, values.content_offset)?;
                    let text = std::str::from_utf8(asn1::content(&der, &value))
                        .map_err(|_| DecodeError::Malformed("challengePassword"))?;
                    challenge_password = Some(text.to_string());
                }
                pos = attr.end();
            }
        }

        let sig_alg = asn1::read_header_expect(&der, cri.end(), tag::SEQUENCE)?;
        let sig_oid_hdr = asn1::read_header_expect(&der, sig_alg.content_offset, tag::OID)?;
        let sig_algo_oid = asn1::content(&der, &sig_oid_hdr).to_vec();

        let sig_hdr = asn1::read_header_expect(&der, sig_alg.end(), tag::BIT_STRING)?;
        let sig_bits = asn1::content(&der, &sig_hdr);
        if sig_bits.is_empty() || sig_bits[0] != 0 {
            return Err(DecodeError::Malformed("CSR signature"));
        }
        let signature = sig_bits[1..].to_vec();

        Ok(Self {
            cri_start: cri.tag_offset,
            cri_end: cri.end(),
            subject,
            spki,
            sig_algo_oid,
            signature,
            extension_request,
            challenge_password,
            der,
        })
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    pub fn subject(&self) -> &X500Name {
        &self.subject
    }

    pub fn spki(&self) -> &Spki {
        &self.spki
    }

    /// Raw DER of the requested `Extensions` SEQUENCE, if the CSR carried
    /// an extensionRequest attribute.
    pub fn extension_request(&self) -> Option<&[u8]> {
        self.extension_request.as_deref()
    }

    pub fn challenge_password(&self) -> Option<&str> {
        self.challenge_password.as_deref()
    }

    pub fn signature_algorithm_oid(&self) -> &[u8] {
        &self.sig_algo_oid
    }

    /// The signed bytes (CertificationRequestInfo).
    pub fn signed_bytes(&self) -> &[u8] {
        &self.der[self.cri_start..self.cri_end]
    }

    /// Verify proof of possession. Standard algorithms verify the CSR
    /// signature against the embedded public key; the static-DH algorithms
    /// resolve a key-agreement secret by (issuer, serial) and verify the
    /// MAC over the signed bytes. Any failure is `bad_pop`.
    pub fn verify_pop(&self, dh_resolver: Option<&dyn DhPopKeyResolver>) -> Result<()> {
        if self.sig_algo_oid == oids::DH_POP_X25519_SHA256 {
            return self.verify_dh_pop(dh_resolver);
        }
        if self.sig_algo_oid == oids::DH_POP_X448_SHA512 {
            return Err(OperationError::bad_pop("x448-sha512 POP is not supported"));
        }

        let algo = SignAlgo::from_oid(&self.sig_algo_oid)
            .ok_or_else(|| OperationError::bad_pop("unknown CSR signature algorithm"))?;
        let message = self.signed_bytes();

        let verified = match algo {
            SignAlgo::RsaPkcs1Sha256 => {
                let key = RsaVerifyingKey::<Sha256>::new(self.rsa_public_key()?);
                Ok(key.verify(message, &self.rsa_signature()?).is_ok())
            }
            SignAlgo::RsaPkcs1Sha384 => {
                let key = RsaVerifyingKey::<Sha384>::new(self.rsa_public_key()?);
                Ok(key.verify(message, &self.rsa_signature()?).is_ok())
            }
            SignAlgo::RsaPkcs1Sha512 => {
                let key = RsaVerifyingKey::<Sha512>::new(self.rsa_public_key()?);
                Ok(key.verify(message, &self.rsa_signature()?).is_ok())
            }
            SignAlgo::EcdsaSha256 => self.verify_p256(message),
            SignAlgo::EcdsaSha384 => {
                return Err(OperationError::bad_pop("ECDSA-P384 keys are not accepted"))
            }
            SignAlgo::Ed25519 => self.verify_ed25519(message),
        };

        match verified {
            Ok(true) => Ok(()),
            Ok(false) => Err(OperationError::bad_pop("CSR signature does not verify")),
            Err(err) => Err(err),
        }
    }

    fn rsa_signature(&self) -> Result<RsaSignature> {
        RsaSignature::try_from(self.signature.as_slice())
            .map_err(|_| OperationError::bad_pop("malformed RSA signature"))
    }

    fn verify_p256(&self, message: &[u8]) -> Result<bool> {
        let key = p256::ecdsa::VerifyingKey::from_sec1_bytes(&self.spki.key_bits)
            .map_err(|_| OperationError::bad_pop("malformed EC public key"))?;
        let signature = p256::ecdsa::Signature::from_der(&self.signature)
            .map_err(|_| OperationError::bad_pop("malformed ECDSA signature"))?;
        Ok(key.verify(message, &signature).is_ok())
    }

    fn verify_ed25519(&self, message: &[u8]) -> Result<bool> {
        let key_bytes: [u8; 32] = self
            .spki
            .key_bits
            .as_slice()
            .try_into()
            .map_err(|_| OperationError::bad_pop("malformed Ed25519 public key"))?;
        let key = ed25519_dalek::VerifyingKey::from_bytes(&key_bytes)
            .map_err(|_| OperationError::bad_pop("malformed Ed25519 public key"))?;
        let signature = ed25519_dalek::Signature::from_slice(&self.signature)
            .map_err(|_| OperationError::bad_pop("malformed Ed25519 signature"))?;
        Ok(key.verify(message, &signature).is_ok())
    }

    fn rsa_public_key(&self) -> Result<rsa::RsaPublicKey> {
        // RSAPublicKey ::= SEQUENCE { modulus INTEGER, publicExponent INTEGER }
        let bits = &self.spki.key_bits;
        let seq = asn1::read_header_expect(bits, 0, tag::SEQUENCE)
            .map_err(|_| OperationError::bad_pop("malformed RSA public key"))?;
        let n_hdr = asn1::read_header_expect(bits, seq.content_offset, tag::INTEGER)
            .map_err(|_| OperationError::bad_pop("malformed RSA modulus"))?;
        let n = asn1::integer_magnitude(bits, &n_hdr)
            .map_err(|_| OperationError::bad_pop("malformed RSA modulus"))?;
        let e_hdr = asn1::read_header_expect(bits, n_hdr.end(), tag::INTEGER)
            .map_err(|_| OperationError::bad_pop("malformed RSA exponent"))?;
        let e = asn1::integer_magnitude(bits, &e_hdr)
            .map_err(|_| OperationError::bad_pop("malformed RSA exponent"))?;
        rsa::RsaPublicKey::new(BigUint::from_bytes_be(n), BigUint::from_bytes_be(e))
            .map_err(|err| OperationError::bad_pop(format!("unusable RSA public key: {err}")))
    }

    /// Decode the DhSigStatic structure from the signature field.
    pub fn dh_sig_static(&self) -> Result<DhSigStatic> {
        let sig = &self.signature;
        let seq = asn1::read_header_expect(sig, 0, tag::SEQUENCE)
            .map_err(|_| OperationError::bad_pop("malformed DhSigStatic"))?;
        let ias = asn1::read_header_expect(sig, seq.content_offset, tag::SEQUENCE)
            .map_err(|_| OperationError::bad_pop("DhSigStatic without issuerAndSerial"))?;
        let issuer_hdr = asn1::read_header_expect(sig, ias.content_offset, tag::SEQUENCE)
            .map_err(|_| OperationError::bad_pop("malformed issuer"))?;
        let issuer = X500Name::parse(sig, issuer_hdr.tag_offset)
            .map_err(|_| OperationError::bad_pop("malformed issuer"))?;
        let serial_hdr = asn1::read_header_expect(sig, issuer_hdr.end(), tag::INTEGER)
            .map_err(|_| OperationError::bad_pop("malformed serial"))?;
        let serial = SerialNumber::from_bytes(
            asn1::integer_magnitude(sig, &serial_hdr)
                .map_err(|_| OperationError::bad_pop("malformed serial"))?,
        );
        let mac_hdr = asn1::read_header_expect(sig, ias.end(), tag::OCTET_STRING)
            .map_err(|_| OperationError::bad_pop("DhSigStatic without hashValue"))?;
        Ok(DhSigStatic {
            issuer,
            serial,
            mac_value: asn1::content(sig, &mac_hdr).to_vec(),
        })
    }

    fn verify_dh_pop(&self, resolver: Option<&dyn DhPopKeyResolver>) -> Result<()> {
        let resolver =
            resolver.ok_or_else(|| OperationError::bad_pop("no key-agreement key available"))?;
        if self.spki.algorithm != oids::X25519 {
            return Err(OperationError::bad_pop("x25519-sha256 POP requires an X25519 key"));
        }
        let peer_bytes: [u8; 32] = self
            .spki
            .key_bits
            .as_slice()
            .try_into()
            .map_err(|_| OperationError::bad_pop("malformed X25519 public key"))?;

        let dh = self.dh_sig_static()?;
        let secret = resolver
            .resolve(&dh.issuer, &dh.serial)
            .ok_or_else(|| OperationError::bad_pop("referenced key-agreement pair not found"))?;

        let shared = secret.diffie_hellman(&x25519_dalek::PublicKey::from(peer_bytes));
        let expected = dh_pop_mac(shared.as_bytes(), self.signed_bytes())
            .map_err(|err| OperationError::bad_pop(err))?;
        if expected == dh.mac_value {
            Ok(())
        } else {
            Err(OperationError::bad_pop("static DH MAC does not verify"))
        }
    }
}

/// MAC over the signed bytes, keyed by the digest of the shared secret.
pub(crate) fn dh_pop_mac(shared_secret: &[u8], message: &[u8]) -> std::result::Result<Vec<u8>, String> {
    let key = Sha256::digest(shared_secret);
    let mut mac = Hmac::<Sha256>::new_from_slice(&key).map_err(|e| e.to_string())?;
    Mac::update(&mut mac, message);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Canonicalize a requested SubjectPublicKeyInfo to RFC 3279 form:
/// RSA keys carry explicit NULL parameters, Edwards keys carry none, and
/// EC keys must name their curve.
pub fn canonicalize_spki(spki: &Spki) -> Result<Spki> {
    let mut out = spki.clone();
    if spki.algorithm == oids::RSA_ENCRYPTION {
        out.parameters = Some(writer::null());
    } else if spki.algorithm == oids::EC_PUBLIC_KEY {
        match &spki.parameters {
            Some(params) if params.first() == Some(&tag::OID) => {}
            _ => {
                return Err(OperationError::bad_cert_template(
                    "EC public key without named-curve parameters",
                ))
            }
        }
    } else if spki.algorithm == oids::ED25519 || spki.algorithm == oids::X25519 {
        out.parameters = None;
    }
    Ok(out)
}
