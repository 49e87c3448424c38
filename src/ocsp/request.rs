//! Streaming OCSP request decoding.
//!
//! The parser walks tag/length headers over the request buffer without
//! building a tree; the only copies taken are the raw `CertID` bytes
//! (echoed into the response), the combined issuer-hash slice (matched
//! against the issuer table) and the nonce.

use crate::asn1::{self, oids, tag, DecodeError};
use crate::hash::HashAlgo;
use crate::types::SerialNumber;

/// One CertID from the request list.
#[derive(Clone, Debug)]
pub struct RequestCertId {
    /// The complete CertID element, tag through content end.
    pub raw: Vec<u8>,
    /// Declared hash algorithm; `None` when the OID is not one of ours.
    pub hash_algo: Option<HashAlgo>,
    /// `issuerNameHash || issuerKeyHash`, both as encoded OCTET STRINGs.
    pub issuer_hashes: Vec<u8>,
    pub serial: SerialNumber,
}

/// A decoded OCSP request.
#[derive(Clone, Debug)]
pub struct OcspRequest {
    pub version: u32,
    pub cert_ids: Vec<RequestCertId>,
    pub nonce: Option<Vec<u8>>,
    pub signed: bool,
    /// First certificate of the optional signature, when present.
    pub signer_cert_der: Option<Vec<u8>>,
    pub has_unknown_critical_extension: bool,
}

impl OcspRequest {
    pub fn parse(request: &[u8]) -> Result<Self, DecodeError> {
        let outer = asn1::read_header_expect(request, 0, tag::SEQUENCE)?;
        let tbs = asn1::read_header_expect(request, outer.content_offset, tag::SEQUENCE)?;
        let signed = tbs.end() < outer.end();
        let signer_cert_der = if signed { parse_signer_cert(request, tbs.end())? } else { None };

        let mut version = 0u32;
        let mut hdr = asn1::read_header(request, tbs.content_offset)?;

        if hdr.is_context_specific() {
            if hdr.tag_number() == 0 {
                let version_hdr = asn1::read_header(request, hdr.content_offset)?;
                if version_hdr.len != 1 {
                    return Err(DecodeError::Malformed("version too large"));
                }
                version = request[version_hdr.content_offset] as u32;
            }
            // skip tagged elements (version, requestorName) up to requestList
            while hdr.is_context_specific() {
                hdr = asn1::read_header(request, hdr.end())?;
            }
        }

        if hdr.tag != tag::SEQUENCE {
            return Err(DecodeError::UnexpectedTag { tag: hdr.tag, offset: hdr.tag_offset });
        }
        let request_list = hdr;

        let mut cert_ids = Vec::new();
        let mut single_pos = request_list.content_offset;
        while single_pos < request_list.end() {
            let single = asn1::read_header_expect(request, single_pos, tag::SEQUENCE)?;
            let cert_id = asn1::read_header_expect(request, single.content_offset, tag::SEQUENCE)?;

            let hash_alg = asn1::read_header_expect(request, cert_id.content_offset, tag::SEQUENCE)?;
            let hash_oid = asn1::read_header_expect(request, hash_alg.content_offset, tag::OID)?;
            let name_hash =
                asn1::read_header_expect(request, hash_alg.end(), tag::OCTET_STRING)?;
            let key_hash =
                asn1::read_header_expect(request, name_hash.end(), tag::OCTET_STRING)?;
            let serial_hdr = asn1::read_header_expect(request, key_hash.end(), tag::INTEGER)?;

            cert_ids.push(RequestCertId {
                raw: request[cert_id.tag_offset..cert_id.end()].to_vec(),
                hash_algo: HashAlgo::from_oid(asn1::content(request, &hash_oid)),
                issuer_hashes: request[name_hash.tag_offset..key_hash.end()].to_vec(),
                serial: SerialNumber::from_bytes(asn1::integer_magnitude(request, &serial_hdr)?),
            });

            single_pos = single.end();
        }

        // requestExtensions [2] EXPLICIT Extensions OPTIONAL
        let mut nonce = None;
        let mut has_unknown_critical_extension = false;
        let extensions_offset = request_list.end();
        if extensions_offset < tbs.end() {
            let tagged = asn1::read_header(request, extensions_offset)?;
            if !tagged.is_context_specific() || tagged.tag_number() != 2 {
                return Err(DecodeError::Malformed("invalid element after requestList"));
            }
            let extensions = asn1::read_header_expect(request, tagged.content_offset, tag::SEQUENCE)?;
            let mut ext_pos = extensions.content_offset;
            while ext_pos < extensions.end() {
                let ext = asn1::read_header_expect(request, ext_pos, tag::SEQUENCE)?;
                let oid_hdr = asn1::read_header_expect(request, ext.content_offset, tag::OID)?;
                let ext_oid = asn1::content(request, &oid_hdr);

                let mut value_pos = oid_hdr.end();
                let mut critical = false;
                let mut value_hdr = asn1::read_header(request, value_pos)?;
                if value_hdr.tag == tag::BOOLEAN {
                    critical =
                        asn1::content(request, &value_hdr).first().copied().unwrap_or(0) != 0;
                    value_pos = value_hdr.end();
                    value_hdr = asn1::read_header(request, value_pos)?;
                }
                if value_hdr.tag != tag::OCTET_STRING {
                    return Err(DecodeError::Malformed("extension value"));
                }

                if ext_oid == oids::OCSP_NONCE {
                    // extnValue wraps the Nonce OCTET STRING
                    let inner =
                        asn1::read_header_expect(request, value_hdr.content_offset, tag::OCTET_STRING)?;
                    nonce = Some(asn1::content(request, &inner).to_vec());
                } else if critical {
                    has_unknown_critical_extension = true;
                }
                ext_pos = ext.end();
            }
        }

        Ok(Self { version, cert_ids, nonce, signed, signer_cert_der, has_unknown_critical_extension })
    }
}

/// `optionalSignature [0] { algorithm, signature, certs [0] OPTIONAL }`;
/// only the first embedded certificate matters for validation.
fn parse_signer_cert(request: &[u8], offset: usize) -> Result<Option<Vec<u8>>, DecodeError> {
    let tagged = asn1::read_header(request, offset)?;
    if !tagged.is_context_specific() || tagged.tag_number() != 0 {
        return Err(DecodeError::Malformed("optionalSignature tag"));
    }
    let signature = asn1::read_header_expect(request, tagged.content_offset, tag::SEQUENCE)?;
    let alg = asn1::read_header_expect(request, signature.content_offset, tag::SEQUENCE)?;
    let bits = asn1::read_header_expect(request, alg.end(), tag::BIT_STRING)?;
    if bits.end() >= signature.end() {
        return Ok(None);
    }
    let certs_tag = asn1::read_header(request, bits.end())?;
    if !certs_tag.is_context_specific() || certs_tag.tag_number() != 0 {
        return Ok(None);
    }
    let certs = asn1::read_header_expect(request, certs_tag.content_offset, tag::SEQUENCE)?;
    if certs.len == 0 {
        return Ok(None);
    }
    let first = asn1::read_header_expect(request, certs.content_offset, tag::SEQUENCE)?;
    Ok(Some(request[first.tag_offset..first.end()].to_vec()))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::asn1::writer;

    /// Build an OCSP request for the crate's own tests.
    pub(crate) fn build_request(
        cert_ids: &[(HashAlgo, Vec<u8>, Vec<u8>, u64)],
        nonce: Option<&[u8]>,
        explicit_version: bool,
    ) -> Vec<u8> {
        let mut request_list = Vec::new();
        for (algo, name_hash, key_hash, serial) in cert_ids {
            let mut alg_id = writer::oid(algo.oid());
            alg_id.extend_from_slice(&writer::null());
            let mut cert_id = writer::sequence(&alg_id);
            cert_id.extend_from_slice(&writer::octet_string(name_hash));
            cert_id.extend_from_slice(&writer::octet_string(key_hash));
            cert_id.extend_from_slice(&writer::integer_u64(*serial));
            let single = writer::sequence(&writer::sequence(&cert_id));
            request_list.extend_from_slice(&single);
        }

        let mut tbs = Vec::new();
        if explicit_version {
            tbs.extend_from_slice(&writer::tlv(0xA0, &writer::integer_u64(0)));
        }
        tbs.extend_from_slice(&writer::sequence(&request_list));

        if let Some(nonce) = nonce {
            let mut ext = writer::oid(crate::asn1::oids::OCSP_NONCE);
            ext.extend_from_slice(&writer::octet_string(&writer::octet_string(nonce)));
            let extensions = writer::sequence(&writer::sequence(&ext));
            tbs.extend_from_slice(&writer::tlv(0xA2, &extensions));
        }

        writer::sequence(&writer::sequence(&tbs))
    }

    #[test]
    fn parses_minimal_request() {
        let name_hash = vec![0x11; 32];
        let key_hash = vec![0x22; 32];
        let der = build_request(
            &[(HashAlgo::Sha256, name_hash.clone(), key_hash.clone(), 0x2A)],
            None,
            false,
        );
        let request = OcspRequest::parse(&der).unwrap();
        assert_eq!(request.version, 0);
        assert!(!request.signed);
        assert_eq!(request.cert_ids.len(), 1);

        let cert_id = &request.cert_ids[0];
        assert_eq!(cert_id.hash_algo, Some(HashAlgo::Sha256));
        assert_eq!(cert_id.serial, SerialNumber::from_u64(0x2A));
        // combined slice is two OCTET STRING TLVs
        assert_eq!(cert_id.issuer_hashes.len(), (2 + 32) * 2);
        assert_eq!(cert_id.issuer_hashes[0], 0x04);
        assert_eq!(cert_id.issuer_hashes[1], 32);
    }

    #[test]
    fn parses_version_and_nonce() {
        let der = build_request(
            &[(HashAlgo::Sha1, vec![0x01; 20], vec![0x02; 20], 7)],
            Some(b"\x01\x02\x03\x04\x05\x06\x07\x08"),
            true,
        );
        let request = OcspRequest::parse(&der).unwrap();
        assert_eq!(request.version, 0);
        assert_eq!(request.nonce.as_deref(), Some(&b"\x01\x02\x03\x04\x05\x06\x07\x08"[..]));
    }

    #[test]
    fn parses_multiple_cert_ids_in_order() {
        let der = build_request(
            &[
                (HashAlgo::Sha256, vec![0x11; 32], vec![0x22; 32], 1),
                (HashAlgo::Sha256, vec![0x11; 32], vec![0x22; 32], 2),
                (HashAlgo::Sha1, vec![0x33; 20], vec![0x44; 20], 3),
            ],
            None,
            false,
        );
        let request = OcspRequest::parse(&der).unwrap();
        let serials: Vec<u64> = request
            .cert_ids
            .iter()
            .map(|c| {
                c.serial.as_bytes().iter().fold(0u64, |acc, b| (acc << 8) | *b as u64)
            })
            .collect();
        assert_eq!(serials, vec![1, 2, 3]);
    }

    #[test]
    fn unknown_hash_algorithm_is_not_an_error() {
        let mut alg_id = writer::oid(&[0x2A, 0x03, 0x04]);
        alg_id.extend_from_slice(&writer::null());
        let mut cert_id = writer::sequence(&alg_id);
        cert_id.extend_from_slice(&writer::octet_string(&[0u8; 20]));
        cert_id.extend_from_slice(&writer::octet_string(&[0u8; 20]));
        cert_id.extend_from_slice(&writer::integer_u64(1));
        let single = writer::sequence(&writer::sequence(&cert_id));
        let tbs = writer::sequence(&writer::sequence(&single));
        let der = writer::sequence(&tbs);

        let request = OcspRequest::parse(&der).unwrap();
        assert_eq!(request.cert_ids[0].hash_algo, None);
    }

    #[test]
    fn truncated_request_fails() {
        let der = build_request(&[(HashAlgo::Sha1, vec![0x01; 20], vec![0x02; 20], 7)], None, false);
        assert!(OcspRequest::parse(&der[..der.len() - 3]).is_err());
    }
}
