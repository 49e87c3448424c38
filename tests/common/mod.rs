//! Shared fixtures for the integration tests: a real root CA over an
//! in-memory store, CSR building, and a structural reader for OCSP
//! responses.

#![allow(dead_code)]

use std::sync::{Arc, OnceLock};

use rsa::traits::PublicKeyParts;
use signature::{SignatureEncoding, Signer};

use vulcan_pki::asn1::{self, oids, tag, writer};
use vulcan_pki::hash::SignAlgo;
use vulcan_pki::issuance::{self, CaEntry, CertIssuer, EnrollRequest};
use vulcan_pki::profile::{
    key_usage, AuthorityKeyIdProducer, BasicConstraintsProducer, CertLevel, KeyPolicy,
    KeyUsageProducer, Profile, SubjectKeyIdProducer, Validity, ValidityMode,
};
use vulcan_pki::signer::{KeyMaterial, PoolAlgorithm, SignerPool};
use vulcan_pki::store::CertStore;
use vulcan_pki::types::{NameId, RequestType};
use vulcan_pki::uid::UniqueIdGenerator;
use vulcan_pki::x509::{Spki, X500Name, X509Cert};

/// RSA keygen is the slow part of these tests; share one CA key and one
/// subscriber key per process.
pub fn ca_key() -> &'static rsa::RsaPrivateKey {
    static KEY: OnceLock<rsa::RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap())
}

pub fn leaf_key() -> &'static rsa::RsaPrivateKey {
    static KEY: OnceLock<rsa::RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap())
}

pub fn rsa_spki(key: &rsa::RsaPrivateKey) -> Spki {
    let public = rsa::RsaPublicKey::from(key);
    let mut body = writer::integer_from_magnitude(&public.n().to_bytes_be());
    body.extend_from_slice(&writer::integer_from_magnitude(&public.e().to_bytes_be()));
    Spki {
        algorithm: oids::RSA_ENCRYPTION.to_vec(),
        parameters: Some(writer::null()),
        key_bits: writer::sequence(&body),
    }
}

/// PKCS#10 request signed with SHA256withRSA.
pub fn build_rsa_csr(subject: &str, key: &rsa::RsaPrivateKey) -> Vec<u8> {
    let name = X500Name::parse_text(subject).unwrap();

    let mut cri = writer::integer_u64(0);
    cri.extend_from_slice(&name.to_der());
    cri.extend_from_slice(&rsa_spki(key).to_der());
    cri.extend_from_slice(&writer::tlv(0xA0, &[]));
    let cri = writer::sequence(&cri);

    let signing = rsa::pkcs1v15::SigningKey::<sha2::Sha256>::new(key.clone());
    let signature = signing.sign(&cri).to_vec();

    let mut alg = writer::oid(oids::RSA_WITH_SHA256);
    alg.extend_from_slice(&writer::null());

    let mut csr = cri;
    csr.extend_from_slice(&writer::sequence(&alg));
    csr.extend_from_slice(&writer::bit_string(&signature));
    writer::sequence(&csr)
}

pub fn root_profile() -> Profile {
    Profile::new("rootca", CertLevel::RootCa, Validity::days(3650))
        .with_key_policy(KeyPolicy::Rsa { min_bits: 2048 })
        .with_extension(Box::new(BasicConstraintsProducer { path_len: None }))
        .with_extension(Box::new(KeyUsageProducer {
            bits: key_usage::KEY_CERT_SIGN | key_usage::CRL_SIGN,
        }))
        .with_extension(Box::new(SubjectKeyIdProducer))
}

pub fn tls_profile() -> Profile {
    Profile::new("tls", CertLevel::EndEntity, Validity::days(90))
        .with_key_policy(KeyPolicy::Rsa { min_bits: 2048 })
        .with_extension(Box::new(BasicConstraintsProducer { path_len: None }))
        .with_extension(Box::new(KeyUsageProducer {
            bits: key_usage::DIGITAL_SIGNATURE | key_usage::KEY_ENCIPHERMENT,
        }))
        .with_extension(Box::new(SubjectKeyIdProducer))
        .with_extension(Box::new(AuthorityKeyIdProducer))
        .permit_request_extension(oids::SUBJECT_ALT_NAME)
}

fn new_issuer(ca_cert: X509Cert, signer: Arc<SignerPool>, store: Arc<CertStore>) -> CertIssuer {
    let ca = CaEntry {
        ident: NameId::new(1, "test-root"),
        cert: ca_cert,
        validity_mode: ValidityMode::Cutoff,
        signer,
    };
    let mut issuer = CertIssuer::new(ca, store);
    issuer.add_profile(NameId::new(1, "rootca"), Arc::new(root_profile()));
    issuer.add_profile(NameId::new(2, "tls"), Arc::new(tls_profile()));
    issuer
}

/// A fully working root CA over a fresh in-memory store.
pub fn setup_ca() -> CertIssuer {
    let generator = Arc::new(UniqueIdGenerator::new(0, 1).unwrap());
    let store = Arc::new(CertStore::open_in_memory(generator).unwrap());

    let key = ca_key().clone();
    let signer = Arc::new(
        SignerPool::from_key(
            "test-root",
            &KeyMaterial::Rsa(key.clone()),
            PoolAlgorithm::Signature(SignAlgo::RsaPkcs1Sha256),
            2,
        )
        .unwrap(),
    );

    // stage one: a bootstrap entry good enough to issue the real root
    let bootstrap = bootstrap_cert(&signer);
    let staging = new_issuer(bootstrap, Arc::clone(&signer), Arc::clone(&store));
    let root = staging
        .issue_self_signed(
            EnrollRequest {
                csr_der: build_rsa_csr("CN=Vulcan Test Root,O=Vulcan,C=DE", &key),
                profile: "rootca".to_string(),
                requested_not_before: None,
                requested_not_after: None,
                requestor: NameId::new(1, "test"),
                user_id: None,
                transaction_id: None,
                req_type: RequestType::Ca,
            },
            issuance::random_serial(63),
        )
        .unwrap();

    new_issuer(root.cert, signer, store)
}

fn bootstrap_cert(signer: &Arc<SignerPool>) -> X509Cert {
    let subject = X500Name::parse_text("CN=Vulcan Test Root,O=Vulcan,C=DE").unwrap();
    let spki = signer.public_key().unwrap();
    let algo = SignAlgo::RsaPkcs1Sha256;
    let now = chrono::Utc::now().timestamp();

    let mut tbs = Vec::new();
    tbs.extend_from_slice(&writer::tlv(0xA0, &writer::integer_u64(2)));
    tbs.extend_from_slice(&writer::integer_u64(1));
    tbs.extend_from_slice(&algo.algorithm_identifier());
    tbs.extend_from_slice(&subject.to_der());
    let mut validity = writer::x509_time(now - 60);
    validity.extend_from_slice(&writer::x509_time(now + 50 * 365 * 86_400));
    tbs.extend_from_slice(&writer::sequence(&validity));
    tbs.extend_from_slice(&subject.to_der());
    tbs.extend_from_slice(&spki.to_der());
    let tbs = writer::sequence(&tbs);

    let signature = signer
        .borrow(std::time::Duration::from_secs(5))
        .unwrap()
        .sign_message(&tbs)
        .unwrap();
    let mut cert = tbs;
    cert.extend_from_slice(&algo.algorithm_identifier());
    cert.extend_from_slice(&writer::bit_string(&signature));
    X509Cert::parse(writer::sequence(&cert)).unwrap()
}

/// Enroll a TLS certificate for `subject` with the shared leaf key.
pub fn enroll(issuer: &CertIssuer, subject: &str) -> vulcan_pki::store::StoredCert {
    issuer
        .issue(EnrollRequest {
            csr_der: build_rsa_csr(subject, leaf_key()),
            profile: "tls".to_string(),
            requested_not_before: None,
            requested_not_after: None,
            requestor: NameId::new(1, "test"),
            user_id: None,
            transaction_id: None,
            req_type: RequestType::Ca,
        })
        .unwrap()
}

// ---------------------------------------------------------------------
// structural OCSP response reading

#[derive(Debug, PartialEq, Eq)]
pub enum ParsedStatus {
    Good,
    Revoked { revocation_time: i64, reason: Option<u8> },
    Unknown,
}

#[derive(Debug)]
pub struct ParsedSingle {
    pub cert_id_raw: Vec<u8>,
    pub status: ParsedStatus,
    pub this_update: i64,
}

#[derive(Debug)]
pub struct ParsedOcspResponse {
    pub status_code: u8,
    pub singles: Vec<ParsedSingle>,
    pub nonce: Option<Vec<u8>>,
}

pub fn parse_ocsp_response(der: &[u8]) -> ParsedOcspResponse {
    let outer = asn1::read_header_expect(der, 0, tag::SEQUENCE).unwrap();
    let status_hdr = asn1::read_header_expect(der, outer.content_offset, tag::ENUMERATED).unwrap();
    let status_code = asn1::content(der, &status_hdr)[0];
    if status_hdr.end() >= outer.end() {
        return ParsedOcspResponse { status_code, singles: Vec::new(), nonce: None };
    }

    let response_bytes_tag = asn1::read_header(der, status_hdr.end()).unwrap();
    assert_eq!(response_bytes_tag.tag, 0xA0);
    let response_bytes =
        asn1::read_header_expect(der, response_bytes_tag.content_offset, tag::SEQUENCE).unwrap();
    let oid_hdr = asn1::read_header_expect(der, response_bytes.content_offset, tag::OID).unwrap();
    assert_eq!(asn1::content(der, &oid_hdr), oids::OCSP_BASIC);
    let basic_octets = asn1::read_header_expect(der, oid_hdr.end(), tag::OCTET_STRING).unwrap();

    let basic = asn1::content(der, &basic_octets);
    let basic_seq = asn1::read_header_expect(basic, 0, tag::SEQUENCE).unwrap();
    let tbs = asn1::read_header_expect(basic, basic_seq.content_offset, tag::SEQUENCE).unwrap();

    // responderID (we always emit byKey)
    let responder_id = asn1::read_header(basic, tbs.content_offset).unwrap();
    assert_eq!(responder_id.tag, 0xA2);
    let produced_at =
        asn1::read_header_expect(basic, responder_id.end(), tag::GENERALIZED_TIME).unwrap();

    let responses = asn1::read_header_expect(basic, produced_at.end(), tag::SEQUENCE).unwrap();
    let mut singles = Vec::new();
    let mut pos = responses.content_offset;
    while pos < responses.end() {
        let single = asn1::read_header_expect(basic, pos, tag::SEQUENCE).unwrap();
        let cert_id = asn1::read_header_expect(basic, single.content_offset, tag::SEQUENCE).unwrap();
        let cert_id_raw = basic[cert_id.tag_offset..cert_id.end()].to_vec();

        let status_hdr = asn1::read_header(basic, cert_id.end()).unwrap();
        let status = match status_hdr.tag {
            0x80 => ParsedStatus::Good,
            0x82 => ParsedStatus::Unknown,
            0xA1 => {
                let time_hdr =
                    asn1::read_header_expect(basic, status_hdr.content_offset, tag::GENERALIZED_TIME)
                        .unwrap();
                let revocation_time = vulcan_pki::x509::parse_time(basic, &time_hdr).unwrap();
                let mut reason = None;
                if time_hdr.end() < status_hdr.end() {
                    let tagged = asn1::read_header(basic, time_hdr.end()).unwrap();
                    assert_eq!(tagged.tag, 0xA0);
                    let reason_hdr =
                        asn1::read_header_expect(basic, tagged.content_offset, tag::ENUMERATED)
                            .unwrap();
                    reason = Some(asn1::content(basic, &reason_hdr)[0]);
                }
                ParsedStatus::Revoked { revocation_time, reason }
            }
            other => panic!("unexpected certStatus tag 0x{other:02x}"),
        };

        let this_update_hdr =
            asn1::read_header_expect(basic, status_hdr.end(), tag::GENERALIZED_TIME).unwrap();
        let this_update = vulcan_pki::x509::parse_time(basic, &this_update_hdr).unwrap();

        singles.push(ParsedSingle { cert_id_raw, status, this_update });
        pos = single.end();
    }

    // responseExtensions [1]: only the nonce is interesting
    let mut nonce = None;
    if responses.end() < tbs.end() {
        let tagged = asn1::read_header(basic, responses.end()).unwrap();
        if tagged.tag == 0xA1 {
            let exts = asn1::read_header_expect(basic, tagged.content_offset, tag::SEQUENCE).unwrap();
            let mut ext_pos = exts.content_offset;
            while ext_pos < exts.end() {
                let ext = asn1::read_header_expect(basic, ext_pos, tag::SEQUENCE).unwrap();
                let ext_oid = asn1::read_header_expect(basic, ext.content_offset, tag::OID).unwrap();
                if asn1::content(basic, &ext_oid) == oids::OCSP_NONCE {
                    let value =
                        asn1::read_header_expect(basic, ext_oid.end(), tag::OCTET_STRING).unwrap();
                    let inner =
                        asn1::read_header_expect(basic, value.content_offset, tag::OCTET_STRING)
                            .unwrap();
                    nonce = Some(asn1::content(basic, &inner).to_vec());
                }
                ext_pos = ext.end();
            }
        }
    }

    ParsedOcspResponse { status_code, singles, nonce }
}
