//! OCSP issuer identities.
//!
//! For every known CA certificate the responder pre-computes, per hash
//! algorithm, the concatenation
//! `OCTET_STRING(H(subject_DER)) || OCTET_STRING(H(spki_bits))` and keeps
//! it verbatim. Matching an incoming CertID is then a single byte
//! comparison against the request's combined name/key hash slice.

use std::collections::{HashMap, HashSet};

use crate::hash::HashAlgo;
use crate::types::CertRevocationInfo;
use crate::x509::X509Cert;

/// One known issuer with its pre-encoded hash table.
pub struct IssuerEntry {
    id: i32,
    cert: X509Cert,
    not_before: i64,
    hashes: HashMap<HashAlgo, Vec<u8>>,
    revocation_info: Option<CertRevocationInfo>,
}

impl IssuerEntry {
    pub fn new(id: i32, cert: X509Cert) -> Self {
        let mut hashes = HashMap::with_capacity(HashAlgo::ALL.len());
        for algo in HashAlgo::ALL {
            let len = algo.len();
            let mut combined = Vec::with_capacity((2 + len) * 2);
            combined.push(0x04);
            combined.push(len as u8);
            combined.extend_from_slice(&algo.hash(cert.subject_der()));
            combined.push(0x04);
            combined.push(len as u8);
            combined.extend_from_slice(&algo.hash(cert.spki_bits()));
            hashes.insert(algo, combined);
        }
        let not_before = cert.not_before();
        Self { id, cert, not_before, hashes, revocation_info: None }
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn cert(&self) -> &X509Cert {
        &self.cert
    }

    pub fn not_before(&self) -> i64 {
        self.not_before
    }

    /// Pre-encoded `nameHash || keyHash` bytes for one algorithm.
    pub fn encoded_hash(&self, algo: HashAlgo) -> Option<&[u8]> {
        self.hashes.get(&algo).map(Vec::as_slice)
    }

    /// Byte-for-byte comparison against a request's combined hash slice.
    /// An algorithm this issuer has no entry for simply does not match.
    pub fn match_hash(&self, algo: HashAlgo, combined: &[u8]) -> bool {
        match self.hashes.get(&algo) {
            Some(expected) => expected.as_slice() == combined,
            None => false,
        }
    }

    pub fn set_revocation_info(&mut self, info: Option<CertRevocationInfo>) {
        self.revocation_info = info;
    }

    pub fn revocation_info(&self) -> Option<&CertRevocationInfo> {
        self.revocation_info.as_ref()
    }
}

/// All issuer entries known to a responder, keyed by the SHA-1
/// fingerprint of the encoded CA certificate.
pub struct IssuerStore {
    entries: HashMap<String, IssuerEntry>,
}

impl IssuerStore {
    pub fn new(entries: Vec<IssuerEntry>) -> Self {
        let entries = entries
            .into_iter()
            .map(|e| (e.cert.sha1_fp_base64(), e))
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The issuer whose pre-encoded hashes match a request's CertID.
    pub fn find_by_hash(&self, algo: HashAlgo, combined: &[u8]) -> Option<&IssuerEntry> {
        self.entries.values().find(|e| e.match_hash(algo, combined))
    }

    pub fn by_id(&self, id: i32) -> Option<&IssuerEntry> {
        self.entries.values().find(|e| e.id == id)
    }

    pub fn by_sha1_fp(&self, fp_base64: &str) -> Option<&IssuerEntry> {
        self.entries.get(fp_base64)
    }
}

/// Include/exclude filter over issuer certificates, by base64 SHA-1
/// fingerprint.
pub struct IssuerFilter {
    include_sha1_fps: Option<HashSet<String>>,
    exclude_sha1_fps: Option<HashSet<String>>,
}

impl IssuerFilter {
    pub fn new(includes: &[&X509Cert], excludes: &[&X509Cert]) -> Self {
        let to_set = |certs: &[&X509Cert]| {
            if certs.is_empty() {
                None
            } else {
                Some(certs.iter().map(|c| c.sha1_fp_base64()).collect())
            }
        };
        Self { include_sha1_fps: to_set(includes), exclude_sha1_fps: to_set(excludes) }
    }

    pub fn include_all(&self) -> bool {
        self.include_sha1_fps.is_none() && self.exclude_sha1_fps.is_none()
    }

    /// True iff the fingerprint is included (or the include set is empty)
    /// and not excluded.
    pub fn accepts(&self, sha1_fp: &str) -> bool {
        let included = match &self.include_sha1_fps {
            None => true,
            Some(set) => set.contains(sha1_fp),
        };
        if !included {
            return false;
        }
        match &self.exclude_sha1_fps {
            None => true,
            Some(set) => !set.contains(sha1_fp),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::fake_cert;

    #[test]
    fn entry_hash_layout_and_matching() {
        let cert = fake_cert(1, "CN=Issuer CA,O=Acme", 1_600_000_000, 2_000_000_000);
        let entry = IssuerEntry::new(7, cert.clone());

        for algo in HashAlgo::ALL {
            let encoded = entry.encoded_hash(algo).unwrap();
            // two OCTET STRINGs, single length byte each
            assert_eq!(encoded.len(), (2 + algo.len()) * 2);
            assert_eq!(encoded[0], 0x04);
            assert_eq!(encoded[1] as usize, algo.len());
            assert_eq!(encoded[2 + algo.len()], 0x04);

            // matches iff nameHash and keyHash come from this certificate
            let mut combined = vec![0x04, algo.len() as u8];
            combined.extend_from_slice(&algo.hash(cert.subject_der()));
            combined.push(0x04);
            combined.push(algo.len() as u8);
            combined.extend_from_slice(&algo.hash(cert.spki_bits()));
            assert!(entry.match_hash(algo, &combined));

            combined[3] ^= 0x01;
            assert!(!entry.match_hash(algo, &combined));
        }
    }

    #[test]
    fn store_finds_issuer_by_hash() {
        let cert_a = fake_cert(1, "CN=CA A", 1_600_000_000, 2_000_000_000);
        let cert_b = fake_cert(2, "CN=CA B", 1_600_000_000, 2_000_000_000);
        let store = IssuerStore::new(vec![
            IssuerEntry::new(1, cert_a.clone()),
            IssuerEntry::new(2, cert_b),
        ]);
        assert_eq!(store.len(), 2);

        let algo = HashAlgo::Sha256;
        let mut combined = vec![0x04, 32];
        combined.extend_from_slice(&algo.hash(cert_a.subject_der()));
        combined.push(0x04);
        combined.push(32);
        combined.extend_from_slice(&algo.hash(cert_a.spki_bits()));

        let found = store.find_by_hash(algo, &combined).unwrap();
        assert_eq!(found.id(), 1);

        combined[5] ^= 0xFF;
        assert!(store.find_by_hash(algo, &combined).is_none());
    }

    #[test]
    fn filter_semantics() {
        let filter = IssuerFilter { include_sha1_fps: None, exclude_sha1_fps: None };
        assert!(filter.include_all());
        assert!(filter.accepts("anything"));

        let filter = IssuerFilter {
            include_sha1_fps: Some(["a".to_string()].into_iter().collect()),
            exclude_sha1_fps: None,
        };
        assert!(filter.accepts("a"));
        assert!(!filter.accepts("b"));

        let filter = IssuerFilter {
            include_sha1_fps: None,
            exclude_sha1_fps: Some(["a".to_string()].into_iter().collect()),
        };
        assert!(!filter.accepts("a"));
        assert!(filter.accepts("b"));

        let filter = IssuerFilter {
            include_sha1_fps: Some(["a".to_string(), "b".to_string()].into_iter().collect()),
            exclude_sha1_fps: Some(["b".to_string()].into_iter().collect()),
        };
        assert!(filter.accepts("a"));
        assert!(!filter.accepts("b"));
        assert!(!filter.accepts("c"));
    }
}
