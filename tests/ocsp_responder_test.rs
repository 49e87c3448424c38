//! OCSP responder behavior against a live CA and store.

mod common;

use std::sync::Arc;

use vulcan_pki::asn1::writer;
use vulcan_pki::hash::HashAlgo;
use vulcan_pki::issuance::CertIssuer;
use vulcan_pki::issuer::{IssuerEntry, IssuerStore};
use vulcan_pki::ocsp::{
    NonceConf, NonceOccurrence, OcspResponder, RequestOption, RequestOptionConf, ResponderConf,
};
use vulcan_pki::types::{CertRevocationInfo, CrlReason, SerialNumber};

use common::{enroll, parse_ocsp_response, setup_ca, ParsedStatus};

fn request_option(occurrence: NonceOccurrence) -> RequestOption {
    RequestOption::new(RequestOptionConf {
        supports_http_get: false,
        signature_required: false,
        validate_signature: false,
        max_request_list_count: 10,
        max_request_size: 4096,
        versions: vec!["v1".to_string()],
        nonce: NonceConf { occurrence, min_len: Some(4), max_len: Some(32) },
        hash_algorithms: Vec::new(),
    })
    .unwrap()
}

fn responder_for(issuer: &CertIssuer, occurrence: NonceOccurrence) -> OcspResponder {
    let entry = IssuerEntry::new(issuer.ca().ident.id, issuer.ca().cert.clone());
    let issuers = Arc::new(IssuerStore::new(vec![entry]));
    OcspResponder::new(
        request_option(occurrence),
        ResponderConf::default(),
        issuers,
        Arc::clone(issuer.store()),
        Arc::clone(&issuer.ca().signer),
        Some(issuer.ca().cert.clone()),
    )
    .unwrap()
}

/// Build an OCSP request for serials of the given CA certificate.
fn build_request(
    ca_cert: &vulcan_pki::x509::X509Cert,
    algo: HashAlgo,
    serials: &[&SerialNumber],
    nonce: Option<&[u8]>,
) -> Vec<u8> {
    let name_hash = algo.hash(ca_cert.subject_der());
    let key_hash = algo.hash(ca_cert.spki_bits());

    let mut request_list = Vec::new();
    for serial in serials {
        let mut alg_id = writer::oid(algo.oid());
        alg_id.extend_from_slice(&writer::null());
        let mut cert_id = writer::sequence(&alg_id);
        cert_id.extend_from_slice(&writer::octet_string(&name_hash));
        cert_id.extend_from_slice(&writer::octet_string(&key_hash));
        cert_id.extend_from_slice(&serial.to_der());
        request_list.extend_from_slice(&writer::sequence(&writer::sequence(&cert_id)));
    }

    let mut tbs = writer::sequence(&request_list);
    if let Some(nonce) = nonce {
        let mut ext = writer::oid(vulcan_pki::asn1::oids::OCSP_NONCE);
        ext.extend_from_slice(&writer::octet_string(&writer::octet_string(nonce)));
        let extensions = writer::sequence(&writer::sequence(&ext));
        tbs.extend_from_slice(&writer::tlv(0xA2, &extensions));
    }
    writer::sequence(&writer::sequence(&tbs))
}

#[test]
fn good_certificate_reports_good() {
    let issuer = setup_ca();
    let issued = enroll(&issuer, "CN=ocsp-good.example.org");
    let responder = responder_for(&issuer, NonceOccurrence::Optional);

    let request =
        build_request(&issuer.ca().cert, HashAlgo::Sha256, &[issued.cert.serial()], None);
    let response = parse_ocsp_response(&responder.answer(&request));

    assert_eq!(response.status_code, 0);
    assert_eq!(response.singles.len(), 1);
    assert_eq!(response.singles[0].status, ParsedStatus::Good);

    // the request's CertID bytes are echoed verbatim
    let request_parsed = vulcan_pki::ocsp::OcspRequest::parse(&request).unwrap();
    assert_eq!(response.singles[0].cert_id_raw, request_parsed.cert_ids[0].raw);
}

#[test]
fn revoked_certificate_reports_time_and_reason() {
    let issuer = setup_ca();
    let issued = enroll(&issuer, "CN=ocsp-revoked.example.org");
    let revocation_time = 1_700_000_000;
    issuer
        .revoke_cert(
            issued.cert.serial(),
            CertRevocationInfo::new(CrlReason::KeyCompromise, revocation_time, None),
            false,
        )
        .unwrap()
        .unwrap();

    let responder = responder_for(&issuer, NonceOccurrence::Optional);
    let request =
        build_request(&issuer.ca().cert, HashAlgo::Sha256, &[issued.cert.serial()], None);
    let response = parse_ocsp_response(&responder.answer(&request));

    assert_eq!(response.status_code, 0);
    assert_eq!(
        response.singles[0].status,
        ParsedStatus::Revoked {
            revocation_time,
            reason: Some(CrlReason::KeyCompromise.code())
        }
    );
}

#[test]
fn hold_reports_revoked_with_hold_reason() {
    let issuer = setup_ca();
    let issued = enroll(&issuer, "CN=ocsp-hold.example.org");
    issuer
        .revoke_cert(
            issued.cert.serial(),
            CertRevocationInfo::new(CrlReason::CertificateHold, 1_700_000_000, None),
            false,
        )
        .unwrap()
        .unwrap();

    let responder = responder_for(&issuer, NonceOccurrence::Optional);
    let request =
        build_request(&issuer.ca().cert, HashAlgo::Sha256, &[issued.cert.serial()], None);
    let response = parse_ocsp_response(&responder.answer(&request));

    assert_eq!(
        response.singles[0].status,
        ParsedStatus::Revoked {
            revocation_time: 1_700_000_000,
            reason: Some(CrlReason::CertificateHold.code())
        }
    );
}

#[test]
fn unknown_serial_reports_unknown() {
    let issuer = setup_ca();
    let responder = responder_for(&issuer, NonceOccurrence::Optional);

    let missing = SerialNumber::from_u64(0xDEAD_BEEF);
    let request = build_request(&issuer.ca().cert, HashAlgo::Sha256, &[&missing], None);
    let response = parse_ocsp_response(&responder.answer(&request));

    assert_eq!(response.status_code, 0);
    assert_eq!(response.singles[0].status, ParsedStatus::Unknown);
}

#[test]
fn responses_keep_the_request_order() {
    let issuer = setup_ca();
    let a = enroll(&issuer, "CN=order-a.example.org");
    let b = enroll(&issuer, "CN=order-b.example.org");
    issuer
        .revoke_cert(
            b.cert.serial(),
            CertRevocationInfo::new(CrlReason::Superseded, 1_700_000_000, None),
            false,
        )
        .unwrap()
        .unwrap();

    let responder = responder_for(&issuer, NonceOccurrence::Optional);
    let request = build_request(
        &issuer.ca().cert,
        HashAlgo::Sha256,
        &[b.cert.serial(), a.cert.serial()],
        None,
    );
    let response = parse_ocsp_response(&responder.answer(&request));

    assert_eq!(response.singles.len(), 2);
    assert!(matches!(response.singles[0].status, ParsedStatus::Revoked { .. }));
    assert_eq!(response.singles[1].status, ParsedStatus::Good);
}

#[test]
fn unknown_issuer_is_unauthorized() {
    let issuer = setup_ca();
    let issued = enroll(&issuer, "CN=wrong-issuer.example.org");
    let responder = responder_for(&issuer, NonceOccurrence::Optional);

    // issuer hashes computed over the wrong certificate
    let request = build_request(&issued.cert, HashAlgo::Sha256, &[issued.cert.serial()], None);
    let response = parse_ocsp_response(&responder.answer(&request));
    assert_eq!(response.status_code, 6); // unauthorized
}

#[test]
fn unknown_issuer_policy_yields_unknown_status() {
    let issuer = setup_ca();
    let issued = enroll(&issuer, "CN=policy-issuer.example.org");

    let entry = IssuerEntry::new(issuer.ca().ident.id, issuer.ca().cert.clone());
    let responder = OcspResponder::new(
        request_option(NonceOccurrence::Optional),
        ResponderConf { unknown_issuer_as_unknown: true, ..ResponderConf::default() },
        Arc::new(IssuerStore::new(vec![entry])),
        Arc::clone(issuer.store()),
        Arc::clone(&issuer.ca().signer),
        Some(issuer.ca().cert.clone()),
    )
    .unwrap();

    // issuer hashes computed over the wrong certificate
    let request = build_request(&issued.cert, HashAlgo::Sha256, &[issued.cert.serial()], None);
    let response = parse_ocsp_response(&responder.answer(&request));
    assert_eq!(response.status_code, 0);
    assert_eq!(response.singles[0].status, ParsedStatus::Unknown);
}

#[test]
fn issuer_matches_across_hash_algorithms() {
    let issuer = setup_ca();
    let issued = enroll(&issuer, "CN=multi-hash.example.org");
    let responder = responder_for(&issuer, NonceOccurrence::Optional);

    for algo in [HashAlgo::Sha1, HashAlgo::Sha256, HashAlgo::Sha3_256, HashAlgo::Sm3] {
        let request = build_request(&issuer.ca().cert, algo, &[issued.cert.serial()], None);
        let response = parse_ocsp_response(&responder.answer(&request));
        assert_eq!(response.status_code, 0, "no match for {algo:?}");
        assert_eq!(response.singles[0].status, ParsedStatus::Good);
    }
}

#[test]
fn nonce_is_echoed_when_permitted() {
    let issuer = setup_ca();
    let issued = enroll(&issuer, "CN=nonce.example.org");
    let responder = responder_for(&issuer, NonceOccurrence::Optional);

    let nonce = b"\x0A\x0B\x0C\x0D\x0E\x0F\x10\x11";
    let request =
        build_request(&issuer.ca().cert, HashAlgo::Sha256, &[issued.cert.serial()], Some(nonce));
    let response = parse_ocsp_response(&responder.answer(&request));

    assert_eq!(response.status_code, 0);
    assert_eq!(response.nonce.as_deref(), Some(&nonce[..]));
}

#[test]
fn nonce_policy_is_enforced() {
    let issuer = setup_ca();
    let issued = enroll(&issuer, "CN=nonce-policy.example.org");
    let ca_cert = issuer.ca().cert.clone();
    let serial = issued.cert.serial().clone();

    // required but absent
    let responder = responder_for(&issuer, NonceOccurrence::Required);
    let request = build_request(&ca_cert, HashAlgo::Sha256, &[&serial], None);
    let response = parse_ocsp_response(&responder.answer(&request));
    assert_eq!(response.status_code, 1); // malformedRequest

    // forbidden but present
    let responder = responder_for(&issuer, NonceOccurrence::Forbidden);
    let request = build_request(&ca_cert, HashAlgo::Sha256, &[&serial], Some(b"12345678"));
    let response = parse_ocsp_response(&responder.answer(&request));
    assert_eq!(response.status_code, 1);

    // too short
    let responder = responder_for(&issuer, NonceOccurrence::Optional);
    let request = build_request(&ca_cert, HashAlgo::Sha256, &[&serial], Some(b"ab"));
    let response = parse_ocsp_response(&responder.answer(&request));
    assert_eq!(response.status_code, 1);

    // ignored: accepted but not echoed
    let responder = responder_for(&issuer, NonceOccurrence::Ignore);
    let request = build_request(&ca_cert, HashAlgo::Sha256, &[&serial], Some(b"12345678"));
    let response = parse_ocsp_response(&responder.answer(&request));
    assert_eq!(response.status_code, 0);
    assert!(response.nonce.is_none());
}

#[test]
fn garbage_and_oversized_requests_are_malformed() {
    let issuer = setup_ca();
    let responder = responder_for(&issuer, NonceOccurrence::Optional);

    let response = parse_ocsp_response(&responder.answer(b"\x30\x03\x02\x01"));
    assert_eq!(response.status_code, 1);

    let oversized = vec![0u8; 8192];
    let response = parse_ocsp_response(&responder.answer(&oversized));
    assert_eq!(response.status_code, 1);
}

#[test]
fn repeated_queries_are_served_from_the_cache() {
    let issuer = setup_ca();
    let issued = enroll(&issuer, "CN=cache.example.org");
    let responder = responder_for(&issuer, NonceOccurrence::Optional);

    let request =
        build_request(&issuer.ca().cert, HashAlgo::Sha256, &[issued.cert.serial()], None);
    let first = responder.answer(&request);
    let second = responder.answer(&request);
    // byte-identical: thisUpdate and signature came from the cache
    assert_eq!(first, second);
}
