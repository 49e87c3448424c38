//! OCSP response encoding.
//!
//! Responses are sized before a single byte is written: every piece knows
//! its body length, the buffer is allocated once, and the writers fill it
//! front to back. The request's CertID bytes are echoed verbatim.

use crate::asn1::{oids, tag, writer};
use crate::types::CrlReason;

use super::OcspResponseStatus;

const GENERALIZED_TIME_LEN: usize = 17; // tag + len + "YYYYMMDDHHMMSSZ"

/// certStatus of one SingleResponse.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CertStatusValue {
    Good,
    Revoked { revocation_time: i64, reason: Option<CrlReason> },
    Unknown,
}

impl CertStatusValue {
    fn encoded_len(&self) -> usize {
        match self {
            // [0] / [2] IMPLICIT NULL
            CertStatusValue::Good | CertStatusValue::Unknown => 2,
            CertStatusValue::Revoked { reason, .. } => {
                let body = GENERALIZED_TIME_LEN + reason.map_or(0, |_| 2 + 3);
                writer::encoded_len(body)
            }
        }
    }

    fn write(&self, out: &mut [u8], offset: usize) -> usize {
        let mut idx = offset;
        match self {
            CertStatusValue::Good => {
                out[idx] = 0x80;
                out[idx + 1] = 0x00;
                idx += 2;
            }
            CertStatusValue::Unknown => {
                out[idx] = 0x82;
                out[idx + 1] = 0x00;
                idx += 2;
            }
            CertStatusValue::Revoked { revocation_time, reason } => {
                let body = GENERALIZED_TIME_LEN + reason.map_or(0, |_| 2 + 3);
                idx += writer::write_header(0xA1, body, out, idx);
                idx += write_slice(&writer::generalized_time(*revocation_time), out, idx);
                if let Some(reason) = reason {
                    idx += writer::write_header(0xA0, 3, out, idx);
                    idx += write_slice(&writer::enumerated(reason.code()), out, idx);
                }
            }
        }
        idx - offset
    }
}

/// One SingleResponse, carrying the raw CertID from the request.
#[derive(Clone, Debug)]
pub struct SingleResponse {
    pub cert_id_raw: Vec<u8>,
    pub status: CertStatusValue,
    pub this_update: i64,
    pub next_update: Option<i64>,
}

impl SingleResponse {
    fn body_len(&self) -> usize {
        self.cert_id_raw.len()
            + self.status.encoded_len()
            + GENERALIZED_TIME_LEN
            + self.next_update.map_or(0, |_| writer::encoded_len(GENERALIZED_TIME_LEN))
    }

    fn encoded_len(&self) -> usize {
        writer::encoded_len(self.body_len())
    }

    fn write(&self, out: &mut [u8], offset: usize) -> usize {
        let mut idx = offset;
        idx += writer::write_header(tag::SEQUENCE, self.body_len(), out, idx);
        idx += write_slice(&self.cert_id_raw, out, idx);
        idx += self.status.write(out, idx);
        idx += write_slice(&writer::generalized_time(self.this_update), out, idx);
        if let Some(next_update) = self.next_update {
            idx += writer::write_header(0xA0, GENERALIZED_TIME_LEN, out, idx);
            idx += write_slice(&writer::generalized_time(next_update), out, idx);
        }
        idx - offset
    }
}

/// Everything needed to emit a signed BasicOCSPResponse.
pub struct BasicResponse<'a> {
    /// SHA-1 of the responder public key bits (responderID byKey).
    pub responder_key_sha1: &'a [u8],
    pub produced_at: i64,
    pub singles: &'a [SingleResponse],
    pub nonce: Option<&'a [u8]>,
    pub signature_algorithm: &'a [u8],
    pub signature: &'a [u8],
    /// Responder certificate appended in the `certs` field, if any.
    pub responder_cert: Option<&'a [u8]>,
}

impl BasicResponse<'_> {
    /// DER of the ResponseData, which is what gets signed.
    pub fn encode_tbs(
        responder_key_sha1: &[u8],
        produced_at: i64,
        singles: &[SingleResponse],
        nonce: Option<&[u8]>,
    ) -> Vec<u8> {
        let body = tbs_body_len(responder_key_sha1, singles, nonce);
        let mut out = vec![0u8; writer::encoded_len(body)];
        let mut idx = writer::write_header(tag::SEQUENCE, body, &mut out, 0);

        // responderID byKey: [2] EXPLICIT KeyHash
        idx += writer::write_header(0xA2, writer::encoded_len(responder_key_sha1.len()), &mut out, idx);
        idx += writer::write_header(tag::OCTET_STRING, responder_key_sha1.len(), &mut out, idx);
        idx += write_slice(responder_key_sha1, &mut out, idx);

        idx += write_slice(&writer::generalized_time(produced_at), &mut out, idx);

        let singles_body: usize = singles.iter().map(SingleResponse::encoded_len).sum();
        idx += writer::write_header(tag::SEQUENCE, singles_body, &mut out, idx);
        for single in singles {
            idx += single.write(&mut out, idx);
        }

        if let Some(nonce) = nonce {
            let ext_body = nonce_extension_body_len(nonce);
            let exts_body = writer::encoded_len(ext_body);
            idx += writer::write_header(0xA1, writer::encoded_len(exts_body), &mut out, idx);
            idx += writer::write_header(tag::SEQUENCE, exts_body, &mut out, idx);
            idx += writer::write_header(tag::SEQUENCE, ext_body, &mut out, idx);
            idx += write_slice(&writer::oid(oids::OCSP_NONCE), &mut out, idx);
            idx += writer::write_header(
                tag::OCTET_STRING,
                writer::encoded_len(nonce.len()),
                &mut out,
                idx,
            );
            idx += writer::write_header(tag::OCTET_STRING, nonce.len(), &mut out, idx);
            idx += write_slice(nonce, &mut out, idx);
        }

        debug_assert_eq!(idx, out.len());
        out
    }

    /// Complete OCSPResponse with status `successful`.
    pub fn encode(&self) -> Vec<u8> {
        let tbs = Self::encode_tbs(
            self.responder_key_sha1,
            self.produced_at,
            self.singles,
            self.nonce,
        );

        let sig_bits_len = writer::encoded_len(self.signature.len() + 1);
        // basic response body: tbs + algId + signature bits + optional
        // [0] EXPLICIT SEQUENCE OF Certificate
        let basic_body = tbs.len()
            + self.signature_algorithm.len()
            + sig_bits_len
            + self
                .responder_cert
                .map_or(0, |cert| writer::encoded_len(writer::encoded_len(cert.len())));
        let basic_len = writer::encoded_len(basic_body);

        // responseBytes: SEQUENCE { OID, OCTET STRING(basic) }
        let oid_der = writer::oid(oids::OCSP_BASIC);
        let response_bytes_body = oid_der.len() + writer::encoded_len(basic_len);
        let response_bytes_len = writer::encoded_len(response_bytes_body);
        let outer_body = 3 + writer::encoded_len(response_bytes_len);
        let total = writer::encoded_len(outer_body);

        let mut out = vec![0u8; total];
        let mut idx = writer::write_header(tag::SEQUENCE, outer_body, &mut out, 0);
        idx += write_slice(&writer::enumerated(OcspResponseStatus::Successful.code()), &mut out, idx);
        idx += writer::write_header(0xA0, response_bytes_len, &mut out, idx);
        idx += writer::write_header(tag::SEQUENCE, response_bytes_body, &mut out, idx);
        idx += write_slice(&oid_der, &mut out, idx);
        idx += writer::write_header(tag::OCTET_STRING, basic_len, &mut out, idx);

        idx += writer::write_header(tag::SEQUENCE, basic_body, &mut out, idx);
        idx += write_slice(&tbs, &mut out, idx);
        idx += write_slice(self.signature_algorithm, &mut out, idx);
        idx += writer::write_header(tag::BIT_STRING, self.signature.len() + 1, &mut out, idx);
        out[idx] = 0;
        idx += 1;
        idx += write_slice(self.signature, &mut out, idx);
        if let Some(cert) = self.responder_cert {
            idx += writer::write_header(0xA0, writer::encoded_len(cert.len()), &mut out, idx);
            idx += writer::write_header(tag::SEQUENCE, cert.len(), &mut out, idx);
            idx += write_slice(cert, &mut out, idx);
        }

        debug_assert_eq!(idx, out.len());
        out
    }
}

fn tbs_body_len(responder_key_sha1: &[u8], singles: &[SingleResponse], nonce: Option<&[u8]>) -> usize {
    let responder_id = writer::encoded_len(writer::encoded_len(responder_key_sha1.len()));
    let singles_body: usize = singles.iter().map(SingleResponse::encoded_len).sum();
    let exts = nonce.map_or(0, |nonce| {
        let ext_body = nonce_extension_body_len(nonce);
        writer::encoded_len(writer::encoded_len(writer::encoded_len(ext_body)))
    });
    responder_id + GENERALIZED_TIME_LEN + writer::encoded_len(singles_body) + exts
}

fn nonce_extension_body_len(nonce: &[u8]) -> usize {
    let oid_len = writer::encoded_len(oids::OCSP_NONCE.len());
    let value_len = writer::encoded_len(writer::encoded_len(nonce.len()));
    oid_len + value_len
}

/// Unsigned response carrying only an error status.
pub fn encode_status_only(status: OcspResponseStatus) -> Vec<u8> {
    let mut out = vec![0u8; 5];
    let mut idx = writer::write_header(tag::SEQUENCE, 3, &mut out, 0);
    idx += write_slice(&writer::enumerated(status.code()), &mut out, idx);
    debug_assert_eq!(idx, out.len());
    out
}

fn write_slice(data: &[u8], out: &mut [u8], offset: usize) -> usize {
    out[offset..offset + data.len()].copy_from_slice(data);
    data.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asn1::{self, read_header};

    #[test]
    fn status_only_encoding() {
        let der = encode_status_only(OcspResponseStatus::MalformedRequest);
        assert_eq!(der, vec![0x30, 0x03, 0x0A, 0x01, 0x01]);
        let der = encode_status_only(OcspResponseStatus::Unauthorized);
        assert_eq!(der, vec![0x30, 0x03, 0x0A, 0x01, 0x06]);
    }

    #[test]
    fn single_response_sizes_match_written_bytes() {
        let cases = [
            CertStatusValue::Good,
            CertStatusValue::Unknown,
            CertStatusValue::Revoked { revocation_time: 1_700_000_000, reason: None },
            CertStatusValue::Revoked {
                revocation_time: 1_700_000_000,
                reason: Some(CrlReason::KeyCompromise),
            },
        ];
        for status in cases {
            let single = SingleResponse {
                cert_id_raw: vec![0x30, 0x03, 0x02, 0x01, 0x2A],
                status,
                this_update: 1_700_000_000,
                next_update: Some(1_700_086_400),
            };
            let mut out = vec![0u8; single.encoded_len()];
            let written = single.write(&mut out, 0);
            assert_eq!(written, out.len());
            let hdr = read_header(&out, 0).unwrap();
            assert_eq!(hdr.end(), out.len());
        }
    }

    #[test]
    fn full_response_structure() {
        let single = SingleResponse {
            cert_id_raw: vec![0x30, 0x03, 0x02, 0x01, 0x2A],
            status: CertStatusValue::Good,
            this_update: 1_700_000_000,
            next_update: None,
        };
        let key_sha1 = [0x5Au8; 20];
        let sig_alg = crate::hash::SignAlgo::RsaPkcs1Sha256.algorithm_identifier();
        let response = BasicResponse {
            responder_key_sha1: &key_sha1,
            produced_at: 1_700_000_000,
            singles: std::slice::from_ref(&single),
            nonce: Some(b"12345678"),
            signature_algorithm: &sig_alg,
            signature: &[0xAB; 256],
            responder_cert: None,
        }
        .encode();

        // OCSPResponse SEQUENCE wraps the whole buffer
        let outer = read_header(&response, 0).unwrap();
        assert_eq!(outer.end(), response.len());
        // responseStatus = successful
        let status = read_header(&response, outer.content_offset).unwrap();
        assert_eq!(status.tag, 0x0A);
        assert_eq!(asn1::content(&response, &status), &[0x00]);
        // responseBytes [0]
        let response_bytes = read_header(&response, status.end()).unwrap();
        assert_eq!(response_bytes.tag, 0xA0);
        assert_eq!(response_bytes.end(), response.len());
    }
}
