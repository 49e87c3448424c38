//! Certificate revocation lists: structural decoding and generation.
//!
//! The generator assembles a `TBSCertList` bottom-up with the DER writer,
//! signs it with the CA's CRL signer pool and persists the result. Full
//! CRLs enumerate every unexpired revoked certificate; delta CRLs carry
//! only the changes against a named base CRL, including `removeFromCRL`
//! entries for certificates unrevoked since the base.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::info;

use crate::asn1::{self, oids, tag, writer, DecodeError};
use crate::error::{OperationError, Result};
use crate::signer::SignerPool;
use crate::store::CertStore;
use crate::types::{CertRevInfoWithSerial, CrlReason, NameId, SerialNumber};
use crate::x509::{parse_time, X509Cert};

/// One decoded CRL entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CrlEntry {
    pub serial: SerialNumber,
    pub revocation_time: i64,
    pub reason: Option<CrlReason>,
}

/// Structural view of a DER CRL: the numbers, the window and the revoked
/// set. Signature checking is not this type's business.
#[derive(Clone, Debug)]
pub struct CrlInfo {
    pub crl_number: Option<u64>,
    pub base_crl_number: Option<u64>,
    pub this_update: i64,
    pub next_update: Option<i64>,
    pub entries: Vec<CrlEntry>,
    pub revoked_serials: Vec<SerialNumber>,
}

impl CrlInfo {
    pub fn parse(der: &[u8]) -> std::result::Result<Self, DecodeError> {
        let outer = asn1::read_header_expect(der, 0, tag::SEQUENCE)?;
        let tbs = asn1::read_header_expect(der, outer.content_offset, tag::SEQUENCE)?;

        let mut pos = tbs.content_offset;
        let first = asn1::read_header(der, pos)?;
        // optional version
        if first.tag == tag::INTEGER {
            pos = first.end();
        }
        // signature AlgorithmIdentifier
        let sig_alg = asn1::read_header_expect(der, pos, tag::SEQUENCE)?;
        // issuer
        let issuer = asn1::read_header_expect(der, sig_alg.end(), tag::SEQUENCE)?;

        let this_hdr = asn1::read_header(der, issuer.end())?;
        let this_update = parse_time(der, &this_hdr)?;

        let mut pos = this_hdr.end();
        let mut next_update = None;
        if pos < tbs.end() {
            let hdr = asn1::read_header(der, pos)?;
            if hdr.tag == tag::UTC_TIME || hdr.tag == tag::GENERALIZED_TIME {
                next_update = Some(parse_time(der, &hdr)?);
                pos = hdr.end();
            }
        }

        let mut entries = Vec::new();
        if pos < tbs.end() {
            let hdr = asn1::read_header(der, pos)?;
            if hdr.tag == tag::SEQUENCE {
                let mut entry_pos = hdr.content_offset;
                while entry_pos < hdr.end() {
                    let entry = asn1::read_header_expect(der, entry_pos, tag::SEQUENCE)?;
                    let serial_hdr =
                        asn1::read_header_expect(der, entry.content_offset, tag::INTEGER)?;
                    let serial = SerialNumber::from_bytes(asn1::integer_magnitude(der, &serial_hdr)?);
                    let time_hdr = asn1::read_header(der, serial_hdr.end())?;
                    let revocation_time = parse_time(der, &time_hdr)?;

                    let mut reason = None;
                    if time_hdr.end() < entry.end() {
                        let exts = asn1::read_header_expect(der, time_hdr.end(), tag::SEQUENCE)?;
                        reason = parse_entry_reason(der, &exts)?;
                    }
                    entries.push(CrlEntry { serial, revocation_time, reason });
                    entry_pos = entry.end();
                }
                pos = hdr.end();
            }
        }

        let mut crl_number = None;
        let mut base_crl_number = None;
        if pos < tbs.end() {
            let hdr = asn1::read_header(der, pos)?;
            if hdr.tag == 0xA0 {
                let exts = asn1::read_header_expect(der, hdr.content_offset, tag::SEQUENCE)?;
                let mut ext_pos = exts.content_offset;
                while ext_pos < exts.end() {
                    let ext = asn1::read_header_expect(der, ext_pos, tag::SEQUENCE)?;
                    let oid_hdr = asn1::read_header_expect(der, ext.content_offset, tag::OID)?;
                    let ext_oid = asn1::content(der, &oid_hdr);
                    let mut value_pos = oid_hdr.end();
                    let mut value_hdr = asn1::read_header(der, value_pos)?;
                    if value_hdr.tag == tag::BOOLEAN {
                        value_pos = value_hdr.end();
                        value_hdr = asn1::read_header(der, value_pos)?;
                    }
                    if value_hdr.tag != tag::OCTET_STRING {
                        return Err(DecodeError::Malformed("CRL extension value"));
                    }
                    let inner = asn1::read_header_expect(der, value_hdr.content_offset, tag::INTEGER);
                    if ext_oid == oids::CRL_NUMBER {
                        crl_number = Some(asn1::integer_u64(der, &inner?)?);
                    } else if ext_oid == oids::DELTA_CRL_INDICATOR {
                        base_crl_number = Some(asn1::integer_u64(der, &inner?)?);
                    }
                    ext_pos = ext.end();
                }
            }
        }

        let revoked_serials = entries.iter().map(|e| e.serial.clone()).collect();
        Ok(Self { crl_number, base_crl_number, this_update, next_update, entries, revoked_serials })
    }
}

fn parse_entry_reason(
    der: &[u8],
    exts: &asn1::Header,
) -> std::result::Result<Option<CrlReason>, DecodeError> {
    let mut pos = exts.content_offset;
    while pos < exts.end() {
        let ext = asn1::read_header_expect(der, pos, tag::SEQUENCE)?;
        let oid_hdr = asn1::read_header_expect(der, ext.content_offset, tag::OID)?;
        if asn1::content(der, &oid_hdr) == oids::CRL_REASON {
            let value_hdr = asn1::read_header_expect(der, oid_hdr.end(), tag::OCTET_STRING)?;
            let reason_hdr =
                asn1::read_header_expect(der, value_hdr.content_offset, tag::ENUMERATED)?;
            let code = asn1::content(der, &reason_hdr)
                .first()
                .copied()
                .ok_or(DecodeError::Malformed("reasonCode"))?;
            return Ok(CrlReason::from_code(code));
        }
        pos = ext.end();
    }
    Ok(None)
}

/// Generation parameters.
#[derive(Clone, Debug)]
pub struct CrlControl {
    /// nextUpdate = thisUpdate + this offset; none omits nextUpdate.
    pub next_update_seconds: Option<i64>,
    /// Full CRLs retained by `cleanup_crls` after each generation.
    pub keep_crls: usize,
    /// How long to wait for an idle CRL signer.
    pub signer_timeout: Duration,
}

impl Default for CrlControl {
    fn default() -> Self {
        Self {
            next_update_seconds: Some(86_400),
            keep_crls: 10,
            signer_timeout: Duration::from_secs(10),
        }
    }
}

/// Produces and persists CRLs for one CA.
pub struct CrlGenerator<'a> {
    ca: &'a NameId,
    ca_cert: &'a X509Cert,
    crl_signer: &'a SignerPool,
    control: CrlControl,
}

impl<'a> CrlGenerator<'a> {
    pub fn new(
        ca: &'a NameId,
        ca_cert: &'a X509Cert,
        crl_signer: &'a SignerPool,
        control: CrlControl,
    ) -> Self {
        Self { ca, ca_cert, crl_signer, control }
    }

    /// Generate, sign and persist a full CRL with the given thisUpdate.
    /// `stop` is honored until signing begins; a signed CRL is always
    /// persisted.
    pub fn generate_full(
        &self,
        store: &CertStore,
        this_update: i64,
        stop: &AtomicBool,
    ) -> Result<Vec<u8>> {
        let crl_number = store.get_max_crl_number(self.ca, false)? + 1;

        let mut entries = Vec::new();
        let mut start_id = 1i64;
        let page = 1000;
        loop {
            if stop.load(Ordering::Relaxed) {
                return Err(OperationError::crl_failure("CRL generation stopped"));
            }
            let batch = store.get_revoked_certs(self.ca, this_update, start_id, page)?;
            let n = batch.len();
            for entry in batch {
                if entry.id >= start_id {
                    start_id = entry.id + 1;
                }
                entries.push(entry);
            }
            if n < page {
                break;
            }
        }

        let der = self.build_and_sign(entries, crl_number, None, this_update, stop)?;
        store.add_crl(self.ca, &der)?;
        let dropped = store.cleanup_crls(self.ca, self.control.keep_crls)?;
        info!(
            ca = %self.ca.name,
            crl_number,
            dropped_crls = dropped,
            "full CRL generated"
        );
        Ok(der)
    }

    /// Generate, sign and persist a delta CRL against `base_crl_number`.
    pub fn generate_delta(
        &self,
        store: &CertStore,
        base_crl_number: u64,
        this_update: i64,
        stop: &AtomicBool,
    ) -> Result<Vec<u8>> {
        let crl_number = store.get_max_crl_number(self.ca, false)?.max(base_crl_number) + 1;
        let entries = store.get_certs_for_delta_crl(self.ca, base_crl_number, this_update)?;

        let der =
            self.build_and_sign(entries, crl_number, Some(base_crl_number), this_update, stop)?;
        store.add_crl(self.ca, &der)?;
        info!(ca = %self.ca.name, crl_number, base_crl_number, "delta CRL generated");
        Ok(der)
    }

    fn build_and_sign(
        &self,
        mut entries: Vec<CertRevInfoWithSerial>,
        crl_number: u64,
        base_crl_number: Option<u64>,
        this_update: i64,
        stop: &AtomicBool,
    ) -> Result<Vec<u8>> {
        let sign_algo = self
            .crl_signer
            .algorithm()
            .sign_algo()
            .ok_or_else(|| OperationError::crl_failure("CRL signer cannot produce signatures"))?;

        // deterministic entry order
        entries.sort();
        entries.dedup_by(|a, b| a.serial == b.serial);

        let mut tbs = Vec::new();
        tbs.extend_from_slice(&writer::integer_u64(1)); // v2
        tbs.extend_from_slice(&sign_algo.algorithm_identifier());
        tbs.extend_from_slice(self.ca_cert.subject_der());
        tbs.extend_from_slice(&writer::x509_time(this_update));
        if let Some(offset) = self.control.next_update_seconds {
            tbs.extend_from_slice(&writer::x509_time(this_update + offset));
        }

        if !entries.is_empty() {
            let mut revoked = Vec::new();
            for entry in &entries {
                revoked.extend_from_slice(&encode_entry(entry));
            }
            tbs.extend_from_slice(&writer::sequence(&revoked));
        }

        // crlExtensions [0] EXPLICIT
        let mut exts = Vec::new();
        exts.extend_from_slice(&encode_aki(self.ca_cert));
        exts.extend_from_slice(&encode_number_ext(oids::CRL_NUMBER, false, crl_number));
        if let Some(base) = base_crl_number {
            exts.extend_from_slice(&encode_number_ext(oids::DELTA_CRL_INDICATOR, true, base));
        }
        tbs.extend_from_slice(&writer::tlv(0xA0, &writer::sequence(&exts)));

        let tbs = writer::sequence(&tbs);

        if stop.load(Ordering::Relaxed) {
            return Err(OperationError::crl_failure("CRL generation stopped"));
        }

        // non-interruptible from here on
        let signature = {
            let mut signer = self
                .crl_signer
                .borrow(self.control.signer_timeout)
                .map_err(|err| OperationError::crl_failure(err.to_string()))?;
            signer
                .sign_message(&tbs)
                .map_err(|err| OperationError::crl_failure(err.to_string()))?
        };

        let mut crl = tbs;
        crl.extend_from_slice(&sign_algo.algorithm_identifier());
        crl.extend_from_slice(&writer::bit_string(&signature));
        Ok(writer::sequence(&crl))
    }
}

fn encode_entry(entry: &CertRevInfoWithSerial) -> Vec<u8> {
    let mut body = entry.serial.to_der();
    body.extend_from_slice(&writer::x509_time(entry.rev_info.revocation_time));

    let mut entry_exts = Vec::new();
    if entry.rev_info.reason != CrlReason::Unspecified {
        let value = writer::enumerated(entry.rev_info.reason.code());
        let mut ext = writer::oid(oids::CRL_REASON);
        ext.extend_from_slice(&writer::octet_string(&value));
        entry_exts.extend_from_slice(&writer::sequence(&ext));
    }
    if let Some(invalidity) = entry.rev_info.invalidity_time {
        let value = writer::generalized_time(invalidity);
        let mut ext = writer::oid(oids::INVALIDITY_DATE);
        ext.extend_from_slice(&writer::octet_string(&value));
        entry_exts.extend_from_slice(&writer::sequence(&ext));
    }
    if !entry_exts.is_empty() {
        body.extend_from_slice(&writer::sequence(&entry_exts));
    }
    writer::sequence(&body)
}

fn encode_number_ext(oid: &[u8], critical: bool, value: u64) -> Vec<u8> {
    let mut ext = writer::oid(oid);
    if critical {
        ext.extend_from_slice(&writer::boolean(true));
    }
    ext.extend_from_slice(&writer::octet_string(&writer::integer_u64(value)));
    writer::sequence(&ext)
}

fn encode_aki(ca_cert: &X509Cert) -> Vec<u8> {
    let key_id = match ca_cert.subject_key_id() {
        Some(ski) => ski.to_vec(),
        None => crate::hash::HashAlgo::Sha1.hash(ca_cert.spki_bits()),
    };
    let value = writer::sequence(&writer::tlv(0x80, &key_id));
    let mut ext = writer::oid(oids::AUTHORITY_KEY_ID);
    ext.extend_from_slice(&writer::octet_string(&value));
    writer::sequence(&ext)
}
