//! Structural X.509 certificate decoding.
//!
//! Certificates pass through this CA as DER blobs; this module exposes the
//! handful of fields the core needs (serial, names, validity, public key,
//! basic constraints) without building a full object model. Offsets come
//! from the [`crate::asn1`] reader; the original DER is retained verbatim.

pub mod name;

pub use name::{cut_text, AttributeTypeValue, Rdn, X500Name};

use chrono::NaiveDate;

use crate::asn1::{self, oids, tag, DecodeError};
use crate::asn1::writer;
use crate::hash::HashAlgo;
use crate::types::SerialNumber;

/// Decoded basicConstraints extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BasicConstraints {
    pub ca: bool,
    pub path_len: Option<u64>,
}

/// A SubjectPublicKeyInfo, kept close to its wire form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Spki {
    /// Algorithm OID content octets.
    pub algorithm: Vec<u8>,
    /// Raw DER of the algorithm parameters element, if present.
    pub parameters: Option<Vec<u8>>,
    /// BIT STRING content without the unused-bits octet.
    pub key_bits: Vec<u8>,
}

impl Spki {
    pub fn parse(encoded: &[u8], offset: usize) -> Result<Self, DecodeError> {
        let seq = asn1::read_header_expect(encoded, offset, tag::SEQUENCE)?;
        let alg_seq = asn1::read_header_expect(encoded, seq.content_offset, tag::SEQUENCE)?;
        let oid_hdr = asn1::read_header_expect(encoded, alg_seq.content_offset, tag::OID)?;
        let parameters = if oid_hdr.end() < alg_seq.end() {
            let params_hdr = asn1::read_header(encoded, oid_hdr.end())?;
            Some(encoded[params_hdr.tag_offset..params_hdr.end()].to_vec())
        } else {
            None
        };
        let bits_hdr = asn1::read_header_expect(encoded, alg_seq.end(), tag::BIT_STRING)?;
        let bits = asn1::content(encoded, &bits_hdr);
        if bits.is_empty() || bits[0] != 0 {
            return Err(DecodeError::Malformed("subjectPublicKey"));
        }
        Ok(Self {
            algorithm: asn1::content(encoded, &oid_hdr).to_vec(),
            parameters,
            key_bits: bits[1..].to_vec(),
        })
    }

    pub fn to_der(&self) -> Vec<u8> {
        let mut alg = writer::oid(&self.algorithm);
        if let Some(params) = &self.parameters {
            alg.extend_from_slice(params);
        }
        let mut body = writer::sequence(&alg);
        body.extend_from_slice(&writer::bit_string(&self.key_bits));
        writer::sequence(&body)
    }
}

/// A parsed certificate. The DER it was built from is authoritative;
/// the decoded fields are a read-only view.
#[derive(Clone, Debug)]
pub struct X509Cert {
    der: Vec<u8>,
    serial: SerialNumber,
    issuer: X500Name,
    subject: X500Name,
    subject_der: Vec<u8>,
    not_before: i64,
    not_after: i64,
    spki: Spki,
    spki_der: Vec<u8>,
    basic_constraints: Option<BasicConstraints>,
    subject_key_id: Option<Vec<u8>>,
}

impl X509Cert {
    pub fn parse(der: Vec<u8>) -> Result<Self, DecodeError> {
        let cert_seq = asn1::read_header_expect(&der, 0, tag::SEQUENCE)?;
        let tbs = asn1::read_header_expect(&der, cert_seq.content_offset, tag::SEQUENCE)?;

        let mut pos = tbs.content_offset;
        let first = asn1::read_header(&der, pos)?;
        // optional [0] EXPLICIT version
        if first.tag == 0xA0 {
            pos = first.end();
        }

        let serial_hdr = asn1::read_header_expect(&der, pos, tag::INTEGER)?;
        let serial = SerialNumber::from_bytes(asn1::integer_magnitude(&der, &serial_hdr)?);

        let sig_alg = asn1::read_header_expect(&der, serial_hdr.end(), tag::SEQUENCE)?;

        let issuer_hdr = asn1::read_header_expect(&der, sig_alg.end(), tag::SEQUENCE)?;
        let issuer = X500Name::parse(&der, issuer_hdr.tag_offset)?;

        let validity = asn1::read_header_expect(&der, issuer_hdr.end(), tag::SEQUENCE)?;
        let nb_hdr = asn1::read_header(&der, validity.content_offset)?;
        let not_before = parse_time(&der, &nb_hdr)?;
        let na_hdr = asn1::read_header(&der, nb_hdr.end())?;
        let not_after = parse_time(&der, &na_hdr)?;

        let subject_hdr = asn1::read_header_expect(&der, validity.end(), tag::SEQUENCE)?;
        let subject = X500Name::parse(&der, subject_hdr.tag_offset)?;
        let subject_der = der[subject_hdr.tag_offset..subject_hdr.end()].to_vec();

        let spki_hdr = asn1::read_header_expect(&der, subject_hdr.end(), tag::SEQUENCE)?;
        let spki = Spki::parse(&der, spki_hdr.tag_offset)?;
        let spki_der = der[spki_hdr.tag_offset..spki_hdr.end()].to_vec();

        // remaining optional fields up to [3] extensions
        let mut basic_constraints = None;
        let mut subject_key_id = None;
        let mut pos = spki_hdr.end();
        while pos < tbs.end() {
            let hdr = asn1::read_header(&der, pos)?;
            if hdr.tag == 0xA3 {
                let exts = asn1::read_header_expect(&der, hdr.content_offset, tag::SEQUENCE)?;
                let mut ext_pos = exts.content_offset;
                while ext_pos < exts.end() {
                    let ext = asn1::read_header_expect(&der, ext_pos, tag::SEQUENCE)?;
                    let oid_hdr = asn1::read_header_expect(&der, ext.content_offset, tag::OID)?;
                    let ext_oid = asn1::content(&der, &oid_hdr);
                    let mut value_pos = oid_hdr.end();
                    let mut value_hdr = asn1::read_header(&der, value_pos)?;
                    if value_hdr.tag == tag::BOOLEAN {
                        // critical flag
                        value_pos = value_hdr.end();
                        value_hdr = asn1::read_header(&der, value_pos)?;
                    }
                    if value_hdr.tag != tag::OCTET_STRING {
                        return Err(DecodeError::Malformed("extension value"));
                    }
                    let inner_offset = value_hdr.content_offset;
                    if ext_oid == oids::BASIC_CONSTRAINTS {
                        basic_constraints = Some(parse_basic_constraints(&der, inner_offset)?);
                    } else if ext_oid == oids::SUBJECT_KEY_ID {
                        let ski = asn1::read_header_expect(&der, inner_offset, tag::OCTET_STRING)?;
                        subject_key_id = Some(asn1::content(&der, &ski).to_vec());
                    }
                    ext_pos = ext.end();
                }
            }
            pos = hdr.end();
        }

        Ok(Self {
            der,
            serial,
            issuer,
            subject,
            subject_der,
            not_before,
            not_after,
            spki,
            spki_der,
            basic_constraints,
            subject_key_id,
        })
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    pub fn serial(&self) -> &SerialNumber {
        &self.serial
    }

    pub fn issuer(&self) -> &X500Name {
        &self.issuer
    }

    pub fn subject(&self) -> &X500Name {
        &self.subject
    }

    /// Raw DER of the subject `Name`, as hashed into OCSP issuer hashes.
    pub fn subject_der(&self) -> &[u8] {
        &self.subject_der
    }

    pub fn not_before(&self) -> i64 {
        self.not_before
    }

    pub fn not_after(&self) -> i64 {
        self.not_after
    }

    pub fn spki(&self) -> &Spki {
        &self.spki
    }

    pub fn spki_der(&self) -> &[u8] {
        &self.spki_der
    }

    /// Public key BIT STRING content, as hashed into OCSP issuer key hashes.
    pub fn spki_bits(&self) -> &[u8] {
        &self.spki.key_bits
    }

    pub fn basic_constraints(&self) -> Option<BasicConstraints> {
        self.basic_constraints
    }

    pub fn subject_key_id(&self) -> Option<&[u8]> {
        self.subject_key_id.as_deref()
    }

    /// End-entity means no CA basicConstraints.
    pub fn is_end_entity(&self) -> bool {
        !self.basic_constraints.map(|bc| bc.ca).unwrap_or(false)
    }

    pub fn is_self_signed(&self) -> bool {
        self.issuer == self.subject
    }

    /// Base64 SHA-1 fingerprint over the encoded certificate; the issuer
    /// filter and the store's SHA1 column use this form.
    pub fn sha1_fp_base64(&self) -> String {
        HashAlgo::Sha1.base64_hash(&self.der)
    }

    pub fn sha1_fp_hex(&self) -> String {
        HashAlgo::Sha1.hex_hash(&self.der)
    }
}

fn parse_basic_constraints(encoded: &[u8], offset: usize) -> Result<BasicConstraints, DecodeError> {
    let seq = asn1::read_header_expect(encoded, offset, tag::SEQUENCE)?;
    let mut ca = false;
    let mut path_len = None;
    let mut pos = seq.content_offset;
    if pos < seq.end() {
        let hdr = asn1::read_header(encoded, pos)?;
        if hdr.tag == tag::BOOLEAN {
            ca = asn1::content(encoded, &hdr).first().copied().unwrap_or(0) != 0;
            pos = hdr.end();
        }
    }
    if pos < seq.end() {
        let hdr = asn1::read_header_expect(encoded, pos, tag::INTEGER)?;
        path_len = Some(asn1::integer_u64(encoded, &hdr)?);
    }
    Ok(BasicConstraints { ca, path_len })
}

/// Decode an RFC 5280 `Time`: UTCTime with the 1950/2049 pivot, or
/// GeneralizedTime. Returns epoch seconds.
pub fn parse_time(encoded: &[u8], hdr: &asn1::Header) -> Result<i64, DecodeError> {
    let text = std::str::from_utf8(asn1::content(encoded, hdr))
        .map_err(|_| DecodeError::Malformed("time"))?;
    let (year, rest) = match hdr.tag {
        tag::UTC_TIME => {
            if text.len() != 13 || !text.ends_with('Z') {
                return Err(DecodeError::Malformed("UTCTime"));
            }
            let yy: i32 = text[..2].parse().map_err(|_| DecodeError::Malformed("UTCTime"))?;
            (if yy < 50 { 2000 + yy } else { 1900 + yy }, &text[2..12])
        }
        tag::GENERALIZED_TIME => {
            if text.len() != 15 || !text.ends_with('Z') {
                return Err(DecodeError::Malformed("GeneralizedTime"));
            }
            let yyyy: i32 = text[..4].parse().map_err(|_| DecodeError::Malformed("GeneralizedTime"))?;
            (yyyy, &text[4..14])
        }
        _ => return Err(DecodeError::UnexpectedTag { tag: hdr.tag, offset: hdr.tag_offset }),
    };

    let field = |range: std::ops::Range<usize>| -> Result<u32, DecodeError> {
        rest[range].parse().map_err(|_| DecodeError::Malformed("time digits"))
    };
    let date = NaiveDate::from_ymd_opt(year, field(0..2)?, field(2..4)?)
        .ok_or(DecodeError::Malformed("calendar date"))?;
    let time = date
        .and_hms_opt(field(4..6)?, field(6..8)?, field(8..10)?)
        .ok_or(DecodeError::Malformed("time of day"))?;
    Ok(time.and_utc().timestamp())
}
