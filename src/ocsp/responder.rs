//! The OCSP responder.
//!
//! Turns request bytes into response bytes and never fails outright:
//! every failure mode maps to an RFC 6960 response status. Database
//! failures during a status lookup degrade to `tryLater`; an issuer this
//! responder does not serve yields `unauthorized`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{ErrorKind, OperationError, Result};
use crate::hash::HashAlgo;
use crate::issuer::IssuerStore;
use crate::signer::SignerPool;
use crate::store::CertStore;
use crate::x509::X509Cert;

use super::request::OcspRequest;
use super::response::{encode_status_only, BasicResponse, CertStatusValue, SingleResponse};
use super::OcspResponseStatus;

/// Nonce handling policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NonceOccurrence {
    Required,
    Optional,
    Forbidden,
    /// Accept but never echo.
    Ignore,
}

/// Certificate path validation model for signed requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ValidationModel {
    Pkix,
    Chain,
}

/// Raw request-option configuration, as deserialized.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestOptionConf {
    #[serde(default)]
    pub supports_http_get: bool,
    #[serde(default)]
    pub signature_required: bool,
    #[serde(default)]
    pub validate_signature: bool,
    pub max_request_list_count: usize,
    pub max_request_size: usize,
    #[serde(default = "default_versions")]
    pub versions: Vec<String>,
    pub nonce: NonceConf,
    #[serde(default)]
    pub hash_algorithms: Vec<String>,
}

fn default_versions() -> Vec<String> {
    vec!["v1".to_string()]
}

impl RequestOptionConf {
    /// Load from a JSON document, the format the server configuration
    /// embeds.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|err| OperationError::invalid_conf(err.to_string()))
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NonceConf {
    pub occurrence: NonceOccurrence,
    pub min_len: Option<usize>,
    pub max_len: Option<usize>,
}

/// Validated request options.
pub struct RequestOption {
    pub supports_http_get: bool,
    pub signature_required: bool,
    pub validate_signature: bool,
    pub max_request_list_count: usize,
    pub max_request_size: usize,
    pub nonce_occurrence: NonceOccurrence,
    pub nonce_min_len: usize,
    pub nonce_max_len: usize,
    hash_algos: Vec<HashAlgo>,
    pub validation_model: ValidationModel,
    trust_anchors: Vec<X509Cert>,
}

impl RequestOption {
    /// Validate a configuration; any violation is fatal at startup.
    pub fn new(conf: RequestOptionConf) -> Result<Self> {
        if conf.max_request_list_count < 1 {
            return Err(OperationError::invalid_conf(format!(
                "invalid maxRequestListCount {}",
                conf.max_request_list_count
            )));
        }
        if conf.max_request_size < 100 {
            return Err(OperationError::invalid_conf(format!(
                "invalid maxRequestSize {}",
                conf.max_request_size
            )));
        }
        for version in &conf.versions {
            if !version.eq_ignore_ascii_case("v1") {
                return Err(OperationError::invalid_conf(format!(
                    "invalid OCSP request version '{version}'"
                )));
            }
        }

        let nonce_min_len = conf.nonce.min_len.unwrap_or(4);
        let nonce_max_len = conf.nonce.max_len.unwrap_or(96);
        if nonce_min_len > nonce_max_len {
            return Err(OperationError::invalid_conf("nonceMinLen > nonceMaxLen"));
        }

        let hash_algos = if conf.hash_algorithms.is_empty() {
            HashAlgo::ALL.to_vec()
        } else {
            let mut algos = Vec::with_capacity(conf.hash_algorithms.len());
            for name in &conf.hash_algorithms {
                let algo = HashAlgo::from_name(name).ok_or_else(|| {
                    OperationError::invalid_conf(format!("hash algorithm {name} is unsupported"))
                })?;
                algos.push(algo);
            }
            algos
        };

        Ok(Self {
            supports_http_get: conf.supports_http_get,
            signature_required: conf.signature_required,
            validate_signature: conf.validate_signature,
            max_request_list_count: conf.max_request_list_count,
            max_request_size: conf.max_request_size,
            nonce_occurrence: conf.nonce.occurrence,
            nonce_min_len,
            nonce_max_len,
            hash_algos,
            validation_model: ValidationModel::Pkix,
            trust_anchors: Vec::new(),
        })
    }

    pub fn with_trust_anchors(mut self, model: ValidationModel, anchors: Vec<X509Cert>) -> Self {
        self.validation_model = model;
        self.trust_anchors = anchors;
        self
    }

    pub fn allows(&self, algo: HashAlgo) -> bool {
        self.hash_algos.contains(&algo)
    }
}

/// Responder behavior beyond request validation.
#[derive(Clone, Debug)]
pub struct ResponderConf {
    /// Report non-issued certificates as `good` instead of `unknown`.
    pub non_issued_is_good: bool,
    /// Answer queries for unknown issuers with per-certificate `unknown`
    /// instead of an `unauthorized` response.
    pub unknown_issuer_as_unknown: bool,
    /// nextUpdate = producedAt + this offset; none omits nextUpdate.
    pub next_update_seconds: Option<i64>,
    /// Upper bound on cached response age.
    pub max_cache_age: Duration,
    /// Budget for handling one request.
    pub deadline: Duration,
    /// Attach the responder certificate to responses.
    pub include_responder_cert: bool,
}

impl Default for ResponderConf {
    fn default() -> Self {
        Self {
            non_issued_is_good: false,
            unknown_issuer_as_unknown: false,
            next_update_seconds: Some(3_600),
            max_cache_age: Duration::from_secs(300),
            deadline: Duration::from_secs(10),
            include_responder_cert: true,
        }
    }
}

struct CachedResponse {
    bytes: Vec<u8>,
    expires_at: Instant,
}

/// Answers OCSP status queries from the certificate store.
pub struct OcspResponder {
    option: RequestOption,
    conf: ResponderConf,
    issuers: Arc<IssuerStore>,
    store: Arc<CertStore>,
    signer: Arc<SignerPool>,
    responder_cert: Option<X509Cert>,
    responder_key_sha1: Vec<u8>,
    cache: Mutex<HashMap<Vec<u8>, CachedResponse>>,
}

impl OcspResponder {
    pub fn new(
        option: RequestOption,
        conf: ResponderConf,
        issuers: Arc<IssuerStore>,
        store: Arc<CertStore>,
        signer: Arc<SignerPool>,
        responder_cert: Option<X509Cert>,
    ) -> Result<Self> {
        let responder_key_sha1 = match (&responder_cert, signer.public_key()) {
            (Some(cert), _) => HashAlgo::Sha1.hash(cert.spki_bits()),
            (None, Some(spki)) => HashAlgo::Sha1.hash(&spki.key_bits),
            (None, None) => {
                return Err(OperationError::invalid_conf(
                    "OCSP signer exposes no public key and no responder certificate is set",
                ))
            }
        };
        Ok(Self {
            option,
            conf,
            issuers,
            store,
            signer,
            responder_cert,
            responder_key_sha1,
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Handle one request. Always returns response bytes; failures are
    /// encoded as status-only responses.
    pub fn answer(&self, request_bytes: &[u8]) -> Vec<u8> {
        let started = Instant::now();
        match self.process(request_bytes, started) {
            Ok(bytes) => bytes,
            Err(status) => encode_status_only(status),
        }
    }

    fn process(
        &self,
        request_bytes: &[u8],
        started: Instant,
    ) -> std::result::Result<Vec<u8>, OcspResponseStatus> {
        if request_bytes.len() > self.option.max_request_size {
            debug!(size = request_bytes.len(), "request exceeds maxRequestSize");
            return Err(OcspResponseStatus::MalformedRequest);
        }

        let request = OcspRequest::parse(request_bytes).map_err(|err| {
            debug!("malformed request: {err}");
            OcspResponseStatus::MalformedRequest
        })?;

        if request.has_unknown_critical_extension {
            return Err(OcspResponseStatus::MalformedRequest);
        }
        if request.version != 0 {
            return Err(OcspResponseStatus::MalformedRequest);
        }
        if request.cert_ids.is_empty()
            || request.cert_ids.len() > self.option.max_request_list_count
        {
            return Err(OcspResponseStatus::MalformedRequest);
        }

        if self.option.signature_required && !request.signed {
            return Err(OcspResponseStatus::SigRequired);
        }
        if request.signed && self.option.validate_signature {
            self.validate_request_signature(&request)?;
        }

        let nonce = self.check_nonce(&request)?;

        if let Some(cached) = self.cache_lookup(request_bytes) {
            return Ok(cached);
        }

        let now = chrono::Utc::now().timestamp();
        let mut singles = Vec::with_capacity(request.cert_ids.len());
        for cert_id in &request.cert_ids {
            let issuer = cert_id
                .hash_algo
                .filter(|algo| self.option.allows(*algo))
                .and_then(|algo| self.issuers.find_by_hash(algo, &cert_id.issuer_hashes));

            let Some(issuer) = issuer else {
                debug!(serial = %cert_id.serial, "no issuer matches the request CertID");
                if self.conf.unknown_issuer_as_unknown {
                    singles.push(SingleResponse {
                        cert_id_raw: cert_id.raw.clone(),
                        status: CertStatusValue::Unknown,
                        this_update: now,
                        next_update: self.conf.next_update_seconds.map(|offset| now + offset),
                    });
                    continue;
                }
                return Err(OcspResponseStatus::Unauthorized);
            };

            let status = match self.store.get_cert_with_rev_info(issuer.id(), &cert_id.serial) {
                Ok(Some(row)) => match row.rev_info {
                    Some(rev) => CertStatusValue::Revoked {
                        revocation_time: rev.revocation_time,
                        reason: Some(rev.reason),
                    },
                    None => CertStatusValue::Good,
                },
                Ok(None) => {
                    if self.conf.non_issued_is_good {
                        CertStatusValue::Good
                    } else {
                        CertStatusValue::Unknown
                    }
                }
                Err(err) if err.kind == ErrorKind::DatabaseFailure => {
                    warn!("status lookup failed, degrading to tryLater: {err}");
                    return Err(OcspResponseStatus::TryLater);
                }
                Err(err) => {
                    warn!("status lookup failed: {err}");
                    return Err(OcspResponseStatus::InternalError);
                }
            };

            singles.push(SingleResponse {
                cert_id_raw: cert_id.raw.clone(),
                status,
                this_update: now,
                next_update: self.conf.next_update_seconds.map(|offset| now + offset),
            });
        }

        let remaining = self.conf.deadline.checked_sub(started.elapsed());
        let Some(remaining) = remaining else {
            return Err(OcspResponseStatus::TryLater);
        };

        let tbs = BasicResponse::encode_tbs(
            &self.responder_key_sha1,
            now,
            &singles,
            nonce.as_deref(),
        );
        let signature = {
            let mut signer = self.signer.borrow(remaining).map_err(|err| {
                warn!("no OCSP signer available: {err}");
                OcspResponseStatus::TryLater
            })?;
            signer.sign_message(&tbs).map_err(|err| {
                warn!("OCSP signing failed: {err}");
                OcspResponseStatus::InternalError
            })?
        };

        let sign_algo = self
            .signer
            .algorithm()
            .sign_algo()
            .ok_or(OcspResponseStatus::InternalError)?;
        let response = BasicResponse {
            responder_key_sha1: &self.responder_key_sha1,
            produced_at: now,
            singles: &singles,
            nonce: nonce.as_deref(),
            signature_algorithm: &sign_algo.algorithm_identifier(),
            signature: &signature,
            responder_cert: if self.conf.include_responder_cert {
                self.responder_cert.as_ref().map(|c| c.der())
            } else {
                None
            },
        }
        .encode();

        self.cache_store(request_bytes, &response, &singles);
        Ok(response)
    }

    /// Direct issuer-subject linkage against the configured anchors;
    /// deeper path building is out of scope for this responder.
    fn validate_request_signature(
        &self,
        request: &OcspRequest,
    ) -> std::result::Result<(), OcspResponseStatus> {
        if self.option.trust_anchors.is_empty() {
            return Err(OcspResponseStatus::Unauthorized);
        }
        let Some(cert_der) = &request.signer_cert_der else {
            return Err(OcspResponseStatus::Unauthorized);
        };
        let signer_cert = X509Cert::parse(cert_der.clone())
            .map_err(|_| OcspResponseStatus::MalformedRequest)?;
        let anchored = self.option.trust_anchors.iter().any(|anchor| {
            anchor.subject() == signer_cert.issuer() || anchor.der() == signer_cert.der()
        });
        if anchored {
            Ok(())
        } else {
            Err(OcspResponseStatus::Unauthorized)
        }
    }

    fn check_nonce(
        &self,
        request: &OcspRequest,
    ) -> std::result::Result<Option<Vec<u8>>, OcspResponseStatus> {
        match (&request.nonce, self.option.nonce_occurrence) {
            (None, NonceOccurrence::Required) => Err(OcspResponseStatus::MalformedRequest),
            (None, _) => Ok(None),
            (Some(_), NonceOccurrence::Forbidden) => Err(OcspResponseStatus::MalformedRequest),
            (Some(nonce), occurrence) => {
                if nonce.len() < self.option.nonce_min_len || nonce.len() > self.option.nonce_max_len
                {
                    return Err(OcspResponseStatus::MalformedRequest);
                }
                Ok(match occurrence {
                    NonceOccurrence::Ignore => None,
                    _ => Some(nonce.clone()),
                })
            }
        }
    }

    fn cache_key(&self, request_bytes: &[u8]) -> Vec<u8> {
        let mut key = HashAlgo::Sha256.hash(request_bytes);
        key.extend_from_slice(&self.responder_key_sha1);
        key
    }

    fn cache_lookup(&self, request_bytes: &[u8]) -> Option<Vec<u8>> {
        let key = self.cache_key(request_bytes);
        let cache = self.cache.lock().ok()?;
        let entry = cache.get(&key)?;
        if entry.expires_at > Instant::now() {
            Some(entry.bytes.clone())
        } else {
            None
        }
    }

    fn cache_store(&self, request_bytes: &[u8], response: &[u8], singles: &[SingleResponse]) {
        let now = chrono::Utc::now().timestamp();
        let mut ttl = self.conf.max_cache_age;
        for single in singles {
            if let Some(next_update) = single.next_update {
                let until = Duration::from_secs((next_update - now).max(0) as u64);
                ttl = ttl.min(until);
            }
        }
        if ttl.is_zero() {
            return;
        }
        let key = self.cache_key(request_bytes);
        if let Ok(mut cache) = self.cache.lock() {
            let deadline = Instant::now();
            cache.retain(|_, entry| entry.expires_at > deadline);
            cache.insert(key, CachedResponse {
                bytes: response.to_vec(),
                expires_at: deadline + ttl,
            });
        }
    }
}
