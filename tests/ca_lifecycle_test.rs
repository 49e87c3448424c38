//! End-to-end issuance, revocation and CRL generation against a real
//! root CA over an in-memory store.

mod common;

use std::sync::atomic::AtomicBool;

use vulcan_pki::crl::{CrlControl, CrlGenerator, CrlInfo};
use vulcan_pki::error::ErrorKind;
use vulcan_pki::types::{CertRevocationInfo, CrlReason};

use common::{enroll, setup_ca};

#[test]
fn issued_certificate_matches_the_request() {
    let issuer = setup_ca();
    let issued = enroll(&issuer, "CN=host1.example.org,O=Acme,C=DE");

    // RDN order preserved
    assert_eq!(issued.cert.subject().to_text(), "CN=host1.example.org,O=Acme,C=DE");
    // 90-day tls profile
    assert_eq!(issued.cert.not_after() - issued.cert.not_before(), 90 * 86_400);
    // end-entity basicConstraints
    let bc = issued.cert.basic_constraints().unwrap();
    assert!(!bc.ca);
    assert!(issued.cert.is_end_entity());
    // issued by our root
    assert_eq!(issued.cert.issuer(), issuer.ca().cert.subject());

    // row visible in the store
    let stored = issuer
        .store()
        .get_cert_with_rev_info(issuer.ca().ident.id, issued.cert.serial())
        .unwrap()
        .unwrap();
    assert_eq!(stored.cert.cert_id, issued.cert_id);
    assert!(stored.rev_info.is_none());
}

#[test]
fn bad_csr_is_rejected_at_the_boundary() {
    let issuer = setup_ca();
    let err = issuer
        .issue(vulcan_pki::issuance::EnrollRequest {
            csr_der: vec![0x30, 0x03, 0x02, 0x01, 0x00],
            profile: "tls".to_string(),
            requested_not_before: None,
            requested_not_after: None,
            requestor: vulcan_pki::types::NameId::new(1, "test"),
            user_id: None,
            transaction_id: None,
            req_type: vulcan_pki::types::RequestType::Ca,
        })
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::BadRequest);
}

#[test]
fn unknown_profile_is_a_template_error() {
    let issuer = setup_ca();
    let err = issuer
        .issue(vulcan_pki::issuance::EnrollRequest {
            csr_der: common::build_rsa_csr("CN=x", common::leaf_key()),
            profile: "no-such-profile".to_string(),
            requested_not_before: None,
            requested_not_after: None,
            requestor: vulcan_pki::types::NameId::new(1, "test"),
            user_id: None,
            transaction_id: None,
            req_type: vulcan_pki::types::RequestType::Ca,
        })
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::BadCertTemplate);
}

#[test]
fn revocation_round_trip_preserves_hold_times() {
    let issuer = setup_ca();
    let issued = enroll(&issuer, "CN=roundtrip.example.org");
    let serial = issued.cert.serial().clone();

    let hold_time = 1_700_000_000;
    issuer
        .revoke_cert(
            &serial,
            CertRevocationInfo::new(CrlReason::CertificateHold, hold_time, None),
            false,
        )
        .unwrap()
        .unwrap();

    let held = issuer
        .store()
        .get_cert_with_rev_info(issuer.ca().ident.id, &serial)
        .unwrap()
        .unwrap();
    assert_eq!(held.rev_info.unwrap().reason, CrlReason::CertificateHold);

    // advancing to keyCompromise keeps the hold's revocation time
    let revoked = issuer
        .revoke_cert(
            &serial,
            CertRevocationInfo::new(CrlReason::KeyCompromise, hold_time + 500, None),
            false,
        )
        .unwrap()
        .unwrap();
    let rev = revoked.rev_info.unwrap();
    assert_eq!(rev.reason, CrlReason::KeyCompromise);
    assert_eq!(rev.revocation_time, hold_time);
}

#[test]
fn double_hold_is_rejected_unless_forced() {
    let issuer = setup_ca();
    let issued = enroll(&issuer, "CN=doublehold.example.org");
    let serial = issued.cert.serial().clone();

    let hold = CertRevocationInfo::new(CrlReason::CertificateHold, 1_700_000_000, None);
    issuer.revoke_cert(&serial, hold, false).unwrap().unwrap();

    let err = issuer.revoke_cert(&serial, hold, false).unwrap_err();
    assert_eq!(err.kind, ErrorKind::CertRevoked);

    // force bypasses the same-reason guard
    let forced = issuer.revoke_cert(&serial, hold, true).unwrap().unwrap();
    assert_eq!(forced.rev_info.unwrap().reason, CrlReason::CertificateHold);
}

#[test]
fn unrevoke_requires_hold_or_force() {
    let issuer = setup_ca();
    let issued = enroll(&issuer, "CN=unrevoke.example.org");
    let serial = issued.cert.serial().clone();

    issuer
        .revoke_cert(
            &serial,
            CertRevocationInfo::new(CrlReason::KeyCompromise, 1_700_000_000, None),
            false,
        )
        .unwrap()
        .unwrap();

    let err = issuer.unrevoke_cert(&serial, false).unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotPermitted);

    assert!(issuer.unrevoke_cert(&serial, true).unwrap().is_some());
}

#[test]
fn full_crl_generation_is_idempotent() {
    let issuer = setup_ca();
    let ca = issuer.ca();

    let mut serials = Vec::new();
    for i in 0..3 {
        let issued = enroll(&issuer, &format!("CN=crl{i}.example.org"));
        serials.push(issued.cert.serial().clone());
    }
    for serial in &serials {
        issuer
            .revoke_cert(
                serial,
                CertRevocationInfo::new(CrlReason::Superseded, 1_700_000_000, None),
                false,
            )
            .unwrap()
            .unwrap();
    }

    let generator =
        CrlGenerator::new(&ca.ident, &ca.cert, ca.signer.as_ref(), CrlControl::default());
    let stop = AtomicBool::new(false);
    let this_update = chrono::Utc::now().timestamp();

    let crl1 = generator.generate_full(issuer.store(), this_update, &stop).unwrap();
    let crl2 = generator.generate_full(issuer.store(), this_update, &stop).unwrap();

    let info1 = CrlInfo::parse(&crl1).unwrap();
    let info2 = CrlInfo::parse(&crl2).unwrap();

    // same revoked set, ordered by serial ascending
    assert_eq!(info1.entries, info2.entries);
    assert_eq!(info1.entries.len(), 3);
    assert!(info1
        .entries
        .windows(2)
        .all(|w| w[0].serial < w[1].serial));
    for entry in &info1.entries {
        assert_eq!(entry.reason, Some(CrlReason::Superseded));
        assert_eq!(entry.revocation_time, 1_700_000_000);
    }

    // numbers differ by exactly one
    assert_eq!(info2.crl_number.unwrap(), info1.crl_number.unwrap() + 1);
    assert!(info1.base_crl_number.is_none());

    // latest CRL in the store is the second one
    let stored = issuer.store().get_encoded_crl(&ca.ident, None).unwrap().unwrap();
    assert_eq!(CrlInfo::parse(&stored).unwrap().crl_number, info2.crl_number);
}

#[test]
fn delta_crl_carries_exactly_the_changes() {
    let issuer = setup_ca();
    let ca = issuer.ca();

    // three revoked certificates go into the base CRL
    let mut serials = Vec::new();
    for i in 0..3 {
        let issued = enroll(&issuer, &format!("CN=delta{i}.example.org"));
        serials.push(issued.cert.serial().clone());
    }
    for serial in &serials {
        issuer
            .revoke_cert(
                serial,
                CertRevocationInfo::new(CrlReason::KeyCompromise, 1_700_000_000, None),
                false,
            )
            .unwrap()
            .unwrap();
    }

    let generator =
        CrlGenerator::new(&ca.ident, &ca.cert, ca.signer.as_ref(), CrlControl::default());
    let stop = AtomicBool::new(false);
    let base_this_update = chrono::Utc::now().timestamp();
    let base = generator.generate_full(issuer.store(), base_this_update, &stop).unwrap();
    let base_number = CrlInfo::parse(&base).unwrap().crl_number.unwrap();

    // change the world: one unrevocation, one fresh revocation
    issuer.unrevoke_cert(&serials[1], true).unwrap().unwrap();
    let fresh = enroll(&issuer, "CN=freshly-revoked.example.org");
    issuer
        .revoke_cert(
            fresh.cert.serial(),
            CertRevocationInfo::new(CrlReason::AffiliationChanged, 1_700_000_050, None),
            false,
        )
        .unwrap()
        .unwrap();

    let delta = generator
        .generate_delta(issuer.store(), base_number, chrono::Utc::now().timestamp(), &stop)
        .unwrap();
    let info = CrlInfo::parse(&delta).unwrap();

    assert_eq!(info.crl_number.unwrap(), base_number + 1);
    assert_eq!(info.base_crl_number, Some(base_number));

    assert_eq!(info.entries.len(), 2);
    let removed = info
        .entries
        .iter()
        .find(|e| e.serial == serials[1])
        .expect("unrevoked serial present");
    assert_eq!(removed.reason, Some(CrlReason::RemoveFromCrl));

    let added = info
        .entries
        .iter()
        .find(|e| &e.serial == fresh.cert.serial())
        .expect("fresh revocation present");
    assert_eq!(added.reason, Some(CrlReason::AffiliationChanged));
}

#[test]
fn crl_retention_keeps_newest_full_crls() {
    let issuer = setup_ca();
    let ca = issuer.ca();
    let control = CrlControl { keep_crls: 2, ..CrlControl::default() };
    let generator = CrlGenerator::new(&ca.ident, &ca.cert, ca.signer.as_ref(), control);
    let stop = AtomicBool::new(false);

    let this_update = chrono::Utc::now().timestamp();
    for _ in 0..4 {
        generator.generate_full(issuer.store(), this_update, &stop).unwrap();
    }

    // oldest two are gone, newest two remain
    let max = issuer.store().get_max_crl_number(&ca.ident, true).unwrap();
    assert_eq!(max, 4);
    assert!(issuer.store().get_encoded_crl(&ca.ident, Some(4)).unwrap().is_some());
    assert!(issuer.store().get_encoded_crl(&ca.ident, Some(3)).unwrap().is_some());
    assert!(issuer.store().get_encoded_crl(&ca.ident, Some(2)).unwrap().is_none());
    assert!(issuer.store().get_encoded_crl(&ca.ident, Some(1)).unwrap().is_none());
}

#[test]
fn suspended_certificates_can_be_swept() {
    let issuer = setup_ca();
    let issued = enroll(&issuer, "CN=sweep.example.org");
    let serial = issued.cert.serial().clone();

    issuer
        .revoke_cert(
            &serial,
            CertRevocationInfo::new(CrlReason::CertificateHold, 1_700_000_000, None),
            false,
        )
        .unwrap()
        .unwrap();

    // a hold older than the limit advances to cessationOfOperation
    let advanced = issuer.revoke_suspended_certs(-10).unwrap();
    assert_eq!(advanced, 1);

    let row = issuer
        .store()
        .get_cert_with_rev_info(issuer.ca().ident.id, &serial)
        .unwrap()
        .unwrap();
    assert_eq!(row.rev_info.unwrap().reason, CrlReason::CessationOfOperation);
}

#[test]
fn serials_are_unique_per_ca() {
    let issuer = setup_ca();
    let a = enroll(&issuer, "CN=a.example.org");
    let b = enroll(&issuer, "CN=b.example.org");
    assert_ne!(a.cert.serial(), b.cert.serial());
    assert_ne!(a.cert_id, b.cert_id);

    // ids are monotonic per shard
    assert!(b.cert_id > a.cert_id);
}
