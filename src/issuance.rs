//! The certificate issuance pipeline.
//!
//! A pipeline of pure validators followed by one I/O step: decode the CSR,
//! verify proof of possession, canonicalize and vet the public key, derive
//! the granted subject and validity window, assemble extensions, sign with
//! a pool-borrowed signer, persist, and enqueue publication.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::OsRng;
use rand::RngCore;
use tracing::{debug, info, warn};

use crate::asn1::{self, tag, writer};
use crate::csr::{canonicalize_spki, CertRequest, DhPopKeyResolver};
use crate::error::{OperationError, Result};
use crate::profile::{CertLevel, ExtensionContext, Profile, ValidityMode};
use crate::signer::SignerPool;
use crate::store::{CertInfo, CertStore, CertWithRevInfo, StoredCert};
use crate::types::{CertRevocationInfo, CrlReason, NameId, RequestType, SerialNumber};
use crate::x509::{Spki, X509Cert};

/// A CA as the issuance pipeline sees it.
pub struct CaEntry {
    pub ident: NameId,
    pub cert: X509Cert,
    pub validity_mode: ValidityMode,
    pub signer: Arc<SignerPool>,
}

/// Downstream certificate consumer fed through the publish queue.
pub trait CertPublisher: Send + Sync {
    fn ident(&self) -> &NameId;
    /// Whether the publisher wants unrevoked certificates (some only
    /// mirror revocations).
    fn publishes_good_certs(&self) -> bool;
    /// Publish one certificate; `false` marks the attempt failed.
    fn certificate_added(&self, cert: &CertInfo) -> bool;
}

/// One enrollment, as delivered by a gateway.
pub struct EnrollRequest {
    pub csr_der: Vec<u8>,
    pub profile: String,
    pub requested_not_before: Option<i64>,
    pub requested_not_after: Option<i64>,
    pub requestor: NameId,
    pub user_id: Option<i32>,
    pub transaction_id: Option<Vec<u8>>,
    pub req_type: RequestType,
}

/// Issues certificates for one CA.
pub struct CertIssuer {
    ca: CaEntry,
    store: Arc<CertStore>,
    profiles: HashMap<String, (NameId, Arc<Profile>)>,
    publishers: Vec<Arc<dyn CertPublisher>>,
    dh_resolver: Option<Arc<dyn DhPopKeyResolver>>,
    signer_timeout: Duration,
    archive_requests: bool,
}

impl CertIssuer {
    pub fn new(ca: CaEntry, store: Arc<CertStore>) -> Self {
        Self {
            ca,
            store,
            profiles: HashMap::new(),
            publishers: Vec::new(),
            dh_resolver: None,
            signer_timeout: Duration::from_secs(10),
            archive_requests: false,
        }
    }

    pub fn add_profile(&mut self, ident: NameId, profile: Arc<Profile>) {
        self.profiles.insert(profile.name().to_string(), (ident, profile));
    }

    pub fn add_publisher(&mut self, publisher: Arc<dyn CertPublisher>) {
        self.publishers.push(publisher);
    }

    pub fn set_dh_resolver(&mut self, resolver: Arc<dyn DhPopKeyResolver>) {
        self.dh_resolver = Some(resolver);
    }

    pub fn set_archive_requests(&mut self, archive: bool) {
        self.archive_requests = archive;
    }

    pub fn ca(&self) -> &CaEntry {
        &self.ca
    }

    pub fn store(&self) -> &Arc<CertStore> {
        &self.store
    }

    pub fn publishers(&self) -> &[Arc<dyn CertPublisher>] {
        &self.publishers
    }

    /// Run the full pipeline for one enrollment.
    pub fn issue(&self, request: EnrollRequest) -> Result<StoredCert> {
        let csr = CertRequest::parse(request.csr_der.clone())
            .map_err(|err| OperationError::bad_request(format!("unreadable CSR: {err}")))?;

        csr.verify_pop(self.dh_resolver.as_deref())?;

        let public_key = canonicalize_spki(csr.spki())?;

        let (profile_ident, profile) = self
            .profiles
            .get(&request.profile.to_lowercase())
            .ok_or_else(|| {
                OperationError::bad_cert_template(format!("unknown profile {}", request.profile))
            })?;
        profile.validate_public_key(&public_key)?;
        self.check_sign_algo(profile)?;

        let granted_subject = profile.grant_subject(csr.subject());

        let now = chrono::Utc::now().timestamp();
        let (not_before, not_after) = self.validity_window(profile, now, &request)?;

        let serial = random_serial(profile.serial_bit_len());

        let extensions = self.assemble_extensions(
            profile,
            &public_key,
            Some(&self.ca.cert),
            csr.extension_request(),
        )?;

        let der = self.sign_certificate(
            &serial,
            self.ca.cert.subject_der(),
            not_before,
            not_after,
            &granted_subject.to_der(),
            &public_key,
            &extensions,
        )?;
        let cert = X509Cert::parse(der)
            .map_err(|err| OperationError::system_failure(format!("issued unreadable DER: {err}")))?;

        let cert_id = self.store.add_cert(
            &self.ca.ident,
            &cert,
            profile_ident,
            &request.requestor,
            request.user_id,
            request.req_type,
            request.transaction_id.as_deref(),
            Some(csr.subject()),
        )?;

        if self.archive_requests {
            let request_id = self.store.add_request(&request.csr_der)?;
            self.store.add_request_cert(request_id, cert_id)?;
        }

        for publisher in &self.publishers {
            if publisher.publishes_good_certs() {
                self.store.add_to_publish_queue(publisher.ident(), &self.ca.ident, cert_id)?;
            }
        }

        info!(
            ca = %self.ca.ident.name,
            profile = profile.name(),
            serial = %serial,
            subject = %cert.subject().to_text(),
            "certificate issued"
        );
        Ok(StoredCert { cert_id, cert })
    }

    /// Same pipeline with the caller as its own CA. The signer's public
    /// key must equal the CSR public key; the caller supplies the serial.
    pub fn issue_self_signed(
        &self,
        request: EnrollRequest,
        serial: SerialNumber,
    ) -> Result<StoredCert> {
        let csr = CertRequest::parse(request.csr_der.clone())
            .map_err(|err| OperationError::bad_request(format!("unreadable CSR: {err}")))?;
        csr.verify_pop(self.dh_resolver.as_deref())?;

        let public_key = canonicalize_spki(csr.spki())?;
        match self.ca.signer.public_key() {
            Some(signer_key) if *signer_key == public_key => {}
            _ => {
                return Err(OperationError::bad_request(
                    "signer public key differs from the CSR public key",
                ))
            }
        }

        let (profile_ident, profile) = self
            .profiles
            .get(&request.profile.to_lowercase())
            .ok_or_else(|| {
                OperationError::bad_cert_template(format!("unknown profile {}", request.profile))
            })?;
        if profile.level() != CertLevel::RootCa {
            return Err(OperationError::bad_cert_template(
                "self-signed issuance requires a root CA profile",
            ));
        }
        profile.validate_public_key(&public_key)?;
        self.check_sign_algo(profile)?;

        let granted_subject = profile.grant_subject(csr.subject());
        let now = chrono::Utc::now().timestamp();
        let (not_before, not_after) = self.validity_window(profile, now, &request)?;

        let extensions =
            self.assemble_extensions(profile, &public_key, None, csr.extension_request())?;

        let subject_der = granted_subject.to_der();
        let der = self.sign_certificate(
            &serial,
            &subject_der,
            not_before,
            not_after,
            &subject_der,
            &public_key,
            &extensions,
        )?;
        let cert = X509Cert::parse(der)
            .map_err(|err| OperationError::system_failure(format!("issued unreadable DER: {err}")))?;

        let cert_id = self.store.add_cert(
            &self.ca.ident,
            &cert,
            profile_ident,
            &request.requestor,
            request.user_id,
            request.req_type,
            request.transaction_id.as_deref(),
            Some(csr.subject()),
        )?;

        Ok(StoredCert { cert_id, cert })
    }

    /// Revoke and enqueue publication of the new state.
    pub fn revoke_cert(
        &self,
        serial: &SerialNumber,
        rev_info: CertRevocationInfo,
        force: bool,
    ) -> Result<Option<CertWithRevInfo>> {
        let result = self.store.revoke_cert(&self.ca.ident, serial, rev_info, force)?;
        if let Some(revoked) = &result {
            for publisher in &self.publishers {
                self.store.add_to_publish_queue(
                    publisher.ident(),
                    &self.ca.ident,
                    revoked.cert.cert_id,
                )?;
            }
        }
        Ok(result)
    }

    pub fn unrevoke_cert(&self, serial: &SerialNumber, force: bool) -> Result<Option<StoredCert>> {
        let result = self.store.unrevoke_cert(&self.ca.ident, serial, force)?;
        if let Some(cert) = &result {
            for publisher in &self.publishers {
                if publisher.publishes_good_certs() {
                    self.store.add_to_publish_queue(
                        publisher.ident(),
                        &self.ca.ident,
                        cert.cert_id,
                    )?;
                }
            }
        }
        Ok(result)
    }

    /// Sweep certificates left on hold longer than `max_hold_seconds` and
    /// advance them to `cessationOfOperation`. Returns how many advanced.
    pub fn revoke_suspended_certs(&self, max_hold_seconds: i64) -> Result<usize> {
        let latest_update = chrono::Utc::now().timestamp() - max_hold_seconds;
        let mut advanced = 0;
        loop {
            let serials =
                self.store.get_suspended_cert_serials(&self.ca.ident, latest_update, 100)?;
            if serials.is_empty() {
                return Ok(advanced);
            }
            for serial in serials {
                match self.store.revoke_suspended_cert(
                    &self.ca.ident,
                    &serial,
                    CrlReason::CessationOfOperation,
                ) {
                    Ok(Some(_)) => advanced += 1,
                    Ok(None) => {}
                    Err(err) => {
                        warn!(serial = %serial, "could not advance suspended certificate: {err}");
                    }
                }
            }
        }
    }

    fn check_sign_algo(&self, profile: &Profile) -> Result<()> {
        let algo = self
            .ca
            .signer
            .algorithm()
            .sign_algo()
            .ok_or_else(|| OperationError::system_failure("CA signer cannot produce signatures"))?;
        if profile.allows_sign_algo(algo) {
            Ok(())
        } else {
            Err(OperationError::bad_cert_template(format!(
                "profile {} does not allow signature algorithm {}",
                profile.name(),
                algo.name()
            )))
        }
    }

    fn validity_window(
        &self,
        profile: &Profile,
        now: i64,
        request: &EnrollRequest,
    ) -> Result<(i64, i64)> {
        let not_before = profile.not_before_policy().not_before(now, request.requested_not_before);
        let max_not_after = not_before + profile.validity().as_seconds();
        let mut not_after = match request.requested_not_after {
            Some(requested) => requested.min(max_not_after),
            None => max_not_after,
        };
        if not_after <= not_before {
            return Err(OperationError::bad_cert_template("notAfter precedes notBefore"));
        }

        let ca_not_after = self.ca.cert.not_after();
        if not_after > ca_not_after {
            not_after = match self.ca.validity_mode {
                ValidityMode::Strict => {
                    return Err(OperationError::bad_cert_template(format!(
                        "notAfter {not_after} exceeds the CA certificate's notAfter {ca_not_after}"
                    )))
                }
                ValidityMode::Lax => not_after,
                ValidityMode::Cutoff => ca_not_after,
            };
        }
        Ok((not_before, not_after))
    }

    fn assemble_extensions(
        &self,
        profile: &Profile,
        public_key: &Spki,
        issuer_cert: Option<&X509Cert>,
        requested: Option<&[u8]>,
    ) -> Result<Vec<u8>> {
        let ctx = ExtensionContext {
            level: profile.level(),
            public_key,
            issuer_cert,
            requested_extensions: requested,
        };

        let mut produced_oids: Vec<Vec<u8>> = Vec::new();
        let mut body = Vec::new();
        for producer in profile.extension_producers() {
            if let Some(ext) = producer.produce(&ctx)? {
                produced_oids.push(ext.oid.clone());
                body.extend_from_slice(&ext.to_der());
            }
        }

        // carry permitted extensions from the CSR unless already produced
        if let Some(requested) = requested {
            let exts = asn1::read_header_expect(requested, 0, tag::SEQUENCE)
                .map_err(|err| OperationError::bad_request(format!("bad extensionRequest: {err}")))?;
            let mut pos = exts.content_offset;
            while pos < exts.end() {
                let ext = asn1::read_header_expect(requested, pos, tag::SEQUENCE)
                    .map_err(|err| OperationError::bad_request(format!("bad extension: {err}")))?;
                let oid_hdr = asn1::read_header_expect(requested, ext.content_offset, tag::OID)
                    .map_err(|err| OperationError::bad_request(format!("bad extension: {err}")))?;
                let oid = asn1::content(requested, &oid_hdr);
                let permitted = profile
                    .permitted_request_extensions()
                    .iter()
                    .any(|p| p.as_slice() == oid);
                if permitted && !produced_oids.iter().any(|p| p.as_slice() == oid) {
                    body.extend_from_slice(&requested[ext.tag_offset..ext.end()]);
                } else {
                    debug!("dropping requested extension not permitted by profile");
                }
                pos = ext.end();
            }
        }

        Ok(writer::sequence(&body))
    }

    #[allow(clippy::too_many_arguments)]
    fn sign_certificate(
        &self,
        serial: &SerialNumber,
        issuer_der: &[u8],
        not_before: i64,
        not_after: i64,
        subject_der: &[u8],
        public_key: &Spki,
        extensions_der: &[u8],
    ) -> Result<Vec<u8>> {
        let sign_algo = self
            .ca
            .signer
            .algorithm()
            .sign_algo()
            .ok_or_else(|| OperationError::system_failure("CA signer cannot produce signatures"))?;

        let mut tbs = Vec::new();
        tbs.extend_from_slice(&writer::tlv(0xA0, &writer::integer_u64(2))); // v3
        tbs.extend_from_slice(&serial.to_der());
        tbs.extend_from_slice(&sign_algo.algorithm_identifier());
        tbs.extend_from_slice(issuer_der);
        let mut validity = writer::x509_time(not_before);
        validity.extend_from_slice(&writer::x509_time(not_after));
        tbs.extend_from_slice(&writer::sequence(&validity));
        tbs.extend_from_slice(subject_der);
        tbs.extend_from_slice(&public_key.to_der());
        tbs.extend_from_slice(&writer::tlv(0xA3, extensions_der));
        let tbs = writer::sequence(&tbs);

        let signature = {
            let mut signer = self
                .ca
                .signer
                .borrow(self.signer_timeout)
                .map_err(OperationError::from)?;
            signer.sign_message(&tbs).map_err(OperationError::from)?
        };

        let mut cert = tbs;
        cert.extend_from_slice(&sign_algo.algorithm_identifier());
        cert.extend_from_slice(&writer::bit_string(&signature));
        Ok(writer::sequence(&cert))
    }
}

/// Random serial of exactly `bit_len` bits (top bit forced, so the DER
/// magnitude length is stable).
pub fn random_serial(bit_len: usize) -> SerialNumber {
    let bit_len = bit_len.max(8);
    let n_bytes = bit_len.div_ceil(8);
    let mut bytes = vec![0u8; n_bytes];
    OsRng.fill_bytes(&mut bytes);
    let excess = n_bytes * 8 - bit_len;
    bytes[0] &= 0xFF >> excess;
    bytes[0] |= 0x80 >> excess;
    SerialNumber::from_bytes(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_serial_has_exact_bit_length() {
        for bits in [63usize, 127, 159] {
            for _ in 0..16 {
                let serial = random_serial(bits);
                assert_eq!(serial.bit_len(), bits);
            }
        }
    }

    #[test]
    fn random_serials_do_not_repeat() {
        let mut seen = std::collections::HashSet::new();
        for _ in 0..256 {
            assert!(seen.insert(random_serial(127)));
        }
    }
}
