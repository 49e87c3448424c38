//! Certificate profiles.
//!
//! A profile drives what the issuance pipeline grants: the subject shape,
//! the validity window policy, the accepted public keys and the extension
//! set. Profiles are admin-managed; names are lower-cased and unique.

use serde::{Deserialize, Serialize};

use crate::asn1::{oids, writer};
use crate::error::{OperationError, Result};
use crate::hash::{HashAlgo, SignAlgo};
use crate::x509::{Spki, X500Name, X509Cert};

/// How a requested notAfter beyond the CA certificate's own lifetime is
/// handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ValidityMode {
    /// Reject the request.
    Strict,
    /// Honor the requested time.
    Lax,
    /// Clamp to the CA certificate's notAfter.
    Cutoff,
}

impl ValidityMode {
    pub fn from_name(text: &str) -> Option<Self> {
        match text.to_ascii_uppercase().as_str() {
            "STRICT" => Some(ValidityMode::Strict),
            "LAX" => Some(ValidityMode::Lax),
            "CUTOFF" => Some(ValidityMode::Cutoff),
            _ => None,
        }
    }
}

/// Certificate validity span in seconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Validity(i64);

impl Validity {
    pub fn seconds(total: i64) -> Self {
        Self(total)
    }

    pub fn days(days: i64) -> Self {
        Self(days * 86_400)
    }

    pub fn hours(hours: i64) -> Self {
        Self(hours * 3_600)
    }

    /// Parse `90d`, `12h` or `2y` style text.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let (number, unit) = text.split_at(text.len().checked_sub(1)?);
        let value: i64 = number.parse().ok()?;
        match unit {
            "y" | "Y" => Some(Self::days(value * 365)),
            "d" | "D" => Some(Self::days(value)),
            "h" | "H" => Some(Self::hours(value)),
            _ => None,
        }
    }

    pub fn as_seconds(self) -> i64 {
        self.0
    }
}

/// Policy for the granted notBefore, in epoch seconds.
///
/// Either a fixed offset from "now" (at least -600 seconds) or rounding up
/// to the next midnight in a timezone given as `UTC` or `+HH:MM`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotBeforePolicy {
    Offset(i64),
    Midnight { tz_offset_seconds: i64 },
}

impl NotBeforePolicy {
    pub const MIN_OFFSET: i64 = -600;

    pub fn offset(seconds: i64) -> Result<Self> {
        if seconds < Self::MIN_OFFSET {
            return Err(OperationError::invalid_conf(format!(
                "notBefore offset {seconds} below {}",
                Self::MIN_OFFSET
            )));
        }
        Ok(NotBeforePolicy::Offset(seconds))
    }

    pub fn midnight(timezone: &str) -> Result<Self> {
        let tz_offset_seconds = parse_tz_offset(timezone)
            .ok_or_else(|| OperationError::invalid_conf(format!("unknown timezone {timezone}")))?;
        Ok(NotBeforePolicy::Midnight { tz_offset_seconds })
    }

    /// Granted notBefore for a request at `now`, honoring the requested
    /// time only when it does not fall behind the allowed window.
    pub fn not_before(&self, now: i64, requested: Option<i64>) -> i64 {
        match (self, requested) {
            (NotBeforePolicy::Offset(offset), Some(requested)) => {
                let not_older_than = if *offset < 0 { now + offset } else { now };
                requested.max(not_older_than)
            }
            (NotBeforePolicy::Offset(offset), None) => now + offset,
            (NotBeforePolicy::Midnight { tz_offset_seconds }, requested) => {
                let base = match requested {
                    Some(requested) => requested.max(now),
                    None => now,
                };
                next_midnight(base, *tz_offset_seconds)
            }
        }
    }
}

impl Default for NotBeforePolicy {
    fn default() -> Self {
        NotBeforePolicy::Offset(0)
    }
}

fn parse_tz_offset(text: &str) -> Option<i64> {
    if text.eq_ignore_ascii_case("UTC") || text.eq_ignore_ascii_case("Z") {
        return Some(0);
    }
    let (sign, rest) = if let Some(rest) = text.strip_prefix('+') {
        (1i64, rest)
    } else if let Some(rest) = text.strip_prefix('-') {
        (-1i64, rest)
    } else {
        return None;
    };
    let (hours, minutes) = rest.split_once(':')?;
    let hours: i64 = hours.parse().ok()?;
    let minutes: i64 = minutes.parse().ok()?;
    if hours > 14 || minutes > 59 {
        return None;
    }
    Some(sign * (hours * 3600 + minutes * 60))
}

/// The next local midnight at or after `t` (a `t` exactly at midnight is
/// kept).
fn next_midnight(t: i64, tz_offset: i64) -> i64 {
    let local = t + tz_offset;
    let rounded = ((local + 86_400 - 1).div_euclid(86_400)) * 86_400;
    rounded - tz_offset
}

/// Hierarchy level a profile issues for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CertLevel {
    RootCa,
    SubCa,
    EndEntity,
}

/// Public key acceptance rules.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeyPolicy {
    Rsa { min_bits: usize },
    EcP256,
    Ed25519,
}

/// One produced certificate extension, inner value already DER.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtensionValue {
    pub oid: Vec<u8>,
    pub critical: bool,
    pub value: Vec<u8>,
}

impl ExtensionValue {
    /// Encode as an RFC 5280 `Extension` element.
    pub fn to_der(&self) -> Vec<u8> {
        let mut body = writer::oid(&self.oid);
        if self.critical {
            body.extend_from_slice(&writer::boolean(true));
        }
        body.extend_from_slice(&writer::octet_string(&self.value));
        writer::sequence(&body)
    }
}

/// Inputs available to extension producers.
pub struct ExtensionContext<'a> {
    pub level: CertLevel,
    pub public_key: &'a Spki,
    pub issuer_cert: Option<&'a X509Cert>,
    pub requested_extensions: Option<&'a [u8]>,
}

/// Produces zero or one extension for a certificate under assembly.
pub trait ExtensionProducer: Send + Sync {
    fn produce(&self, ctx: &ExtensionContext<'_>) -> Result<Option<ExtensionValue>>;
}

/// basicConstraints, critical, with `cA` derived from the profile level.
pub struct BasicConstraintsProducer {
    pub path_len: Option<u64>,
}

impl ExtensionProducer for BasicConstraintsProducer {
    fn produce(&self, ctx: &ExtensionContext<'_>) -> Result<Option<ExtensionValue>> {
        let is_ca = ctx.level != CertLevel::EndEntity;
        let mut body = Vec::new();
        if is_ca {
            body.extend_from_slice(&writer::boolean(true));
            if let Some(path_len) = self.path_len {
                body.extend_from_slice(&writer::integer_u64(path_len));
            }
        }
        Ok(Some(ExtensionValue {
            oid: oids::BASIC_CONSTRAINTS.to_vec(),
            critical: true,
            value: writer::sequence(&body),
        }))
    }
}

/// keyUsage bit names from RFC 5280 section 4.2.1.3.
pub mod key_usage {
    pub const DIGITAL_SIGNATURE: u16 = 1 << 15;
    pub const NON_REPUDIATION: u16 = 1 << 14;
    pub const KEY_ENCIPHERMENT: u16 = 1 << 13;
    pub const DATA_ENCIPHERMENT: u16 = 1 << 12;
    pub const KEY_AGREEMENT: u16 = 1 << 11;
    pub const KEY_CERT_SIGN: u16 = 1 << 10;
    pub const CRL_SIGN: u16 = 1 << 9;
}

/// keyUsage, critical.
pub struct KeyUsageProducer {
    pub bits: u16,
}

impl ExtensionProducer for KeyUsageProducer {
    fn produce(&self, _ctx: &ExtensionContext<'_>) -> Result<Option<ExtensionValue>> {
        if self.bits == 0 {
            return Ok(None);
        }
        let bytes = self.bits.to_be_bytes();
        let (content, trailing_zeros) = if bytes[1] == 0 {
            (vec![bytes[0]], bytes[0].trailing_zeros() as u8)
        } else {
            (bytes.to_vec(), bytes[1].trailing_zeros() as u8)
        };
        let mut body = Vec::with_capacity(content.len() + 1);
        body.push(trailing_zeros);
        body.extend_from_slice(&content);
        Ok(Some(ExtensionValue {
            oid: oids::KEY_USAGE.to_vec(),
            critical: true,
            value: writer::tlv(crate::asn1::tag::BIT_STRING, &body),
        }))
    }
}

/// extKeyUsage from a fixed OID list.
pub struct ExtKeyUsageProducer {
    pub purposes: Vec<Vec<u8>>,
}

impl ExtensionProducer for ExtKeyUsageProducer {
    fn produce(&self, _ctx: &ExtensionContext<'_>) -> Result<Option<ExtensionValue>> {
        if self.purposes.is_empty() {
            return Ok(None);
        }
        let mut body = Vec::new();
        for purpose in &self.purposes {
            body.extend_from_slice(&writer::oid(purpose));
        }
        Ok(Some(ExtensionValue {
            oid: oids::EXT_KEY_USAGE.to_vec(),
            critical: false,
            value: writer::sequence(&body),
        }))
    }
}

/// subjectKeyIdentifier: SHA-1 of the subject public key bits.
pub struct SubjectKeyIdProducer;

impl ExtensionProducer for SubjectKeyIdProducer {
    fn produce(&self, ctx: &ExtensionContext<'_>) -> Result<Option<ExtensionValue>> {
        let ski = HashAlgo::Sha1.hash(&ctx.public_key.key_bits);
        Ok(Some(ExtensionValue {
            oid: oids::SUBJECT_KEY_ID.to_vec(),
            critical: false,
            value: writer::octet_string(&ski),
        }))
    }
}

/// authorityKeyIdentifier from the issuer's subjectKeyIdentifier; for a
/// self-signed root the subject key serves as its own authority key.
pub struct AuthorityKeyIdProducer;

impl ExtensionProducer for AuthorityKeyIdProducer {
    fn produce(&self, ctx: &ExtensionContext<'_>) -> Result<Option<ExtensionValue>> {
        let key_id = match ctx.issuer_cert {
            Some(issuer) => match issuer.subject_key_id() {
                Some(ski) => ski.to_vec(),
                None => HashAlgo::Sha1.hash(issuer.spki_bits()),
            },
            None => HashAlgo::Sha1.hash(&ctx.public_key.key_bits),
        };
        // AuthorityKeyIdentifier ::= SEQUENCE { keyIdentifier [0] IMPLICIT }
        let body = writer::tlv(0x80, &key_id);
        Ok(Some(ExtensionValue {
            oid: oids::AUTHORITY_KEY_ID.to_vec(),
            critical: false,
            value: writer::sequence(&body),
        }))
    }
}

/// A certificate profile.
pub struct Profile {
    name: String,
    level: CertLevel,
    validity: Validity,
    not_before: NotBeforePolicy,
    subject_order: Vec<Vec<u8>>,
    key_policies: Vec<KeyPolicy>,
    allowed_sign_algos: Vec<SignAlgo>,
    extension_producers: Vec<Box<dyn ExtensionProducer>>,
    /// Extension OIDs the requester may carry over from the CSR.
    permitted_request_extensions: Vec<Vec<u8>>,
    /// Serial number width in bits; serials are random with this length.
    serial_bit_len: usize,
}

impl Profile {
    pub fn new(name: &str, level: CertLevel, validity: Validity) -> Self {
        Self {
            name: name.to_lowercase(),
            level,
            validity,
            not_before: NotBeforePolicy::default(),
            subject_order: Vec::new(),
            key_policies: Vec::new(),
            allowed_sign_algos: Vec::new(),
            extension_producers: Vec::new(),
            permitted_request_extensions: Vec::new(),
            serial_bit_len: 127,
        }
    }

    pub fn with_not_before(mut self, policy: NotBeforePolicy) -> Self {
        self.not_before = policy;
        self
    }

    pub fn with_subject_order(mut self, order: Vec<Vec<u8>>) -> Self {
        self.subject_order = order;
        self
    }

    pub fn with_key_policy(mut self, policy: KeyPolicy) -> Self {
        self.key_policies.push(policy);
        self
    }

    pub fn with_sign_algos(mut self, algos: Vec<SignAlgo>) -> Self {
        self.allowed_sign_algos = algos;
        self
    }

    pub fn with_extension(mut self, producer: Box<dyn ExtensionProducer>) -> Self {
        self.extension_producers.push(producer);
        self
    }

    pub fn permit_request_extension(mut self, oid: &[u8]) -> Self {
        self.permitted_request_extensions.push(oid.to_vec());
        self
    }

    pub fn with_serial_bit_len(mut self, bits: usize) -> Self {
        self.serial_bit_len = bits;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn level(&self) -> CertLevel {
        self.level
    }

    pub fn validity(&self) -> Validity {
        self.validity
    }

    pub fn not_before_policy(&self) -> &NotBeforePolicy {
        &self.not_before
    }

    pub fn serial_bit_len(&self) -> usize {
        self.serial_bit_len
    }

    pub fn extension_producers(&self) -> &[Box<dyn ExtensionProducer>] {
        &self.extension_producers
    }

    pub fn permitted_request_extensions(&self) -> &[Vec<u8>] {
        &self.permitted_request_extensions
    }

    /// Whether the CA may sign certificates under this profile with the
    /// given algorithm. An empty list allows all.
    pub fn allows_sign_algo(&self, algo: SignAlgo) -> bool {
        self.allowed_sign_algos.is_empty() || self.allowed_sign_algos.contains(&algo)
    }

    /// Check the requested public key against the profile's key policies.
    /// A profile without policies is a configuration defect.
    pub fn validate_public_key(&self, spki: &Spki) -> Result<()> {
        if self.key_policies.is_empty() {
            return Err(OperationError::system_failure(format!(
                "profile {} has no key policy",
                self.name
            )));
        }
        for policy in &self.key_policies {
            match policy {
                KeyPolicy::Rsa { min_bits } if spki.algorithm == oids::RSA_ENCRYPTION => {
                    let bits = rsa_modulus_bits(&spki.key_bits)?;
                    if bits < *min_bits {
                        return Err(OperationError::bad_cert_template(format!(
                            "RSA key of {bits} bits below minimum {min_bits}"
                        )));
                    }
                    return Ok(());
                }
                KeyPolicy::EcP256 if spki.algorithm == oids::EC_PUBLIC_KEY => {
                    match &spki.parameters {
                        Some(params) if params_name_p256(params) => return Ok(()),
                        _ => {
                            return Err(OperationError::bad_cert_template(
                                "EC key not on the P-256 curve",
                            ))
                        }
                    }
                }
                KeyPolicy::Ed25519 if spki.algorithm == oids::ED25519 => return Ok(()),
                _ => continue,
            }
        }
        Err(OperationError::bad_cert_template("public key algorithm not permitted by profile"))
    }

    /// Derive the granted subject from the requested one: profile RDN
    /// order applied, values untouched.
    pub fn grant_subject(&self, requested: &X500Name) -> X500Name {
        if self.subject_order.is_empty() {
            requested.clone()
        } else {
            requested.sorted_by(&self.subject_order)
        }
    }
}

fn params_name_p256(params: &[u8]) -> bool {
    params.first() == Some(&crate::asn1::tag::OID) && params.get(2..) == Some(oids::SECP256R1)
}

fn rsa_modulus_bits(key_bits: &[u8]) -> Result<usize> {
    use crate::asn1;
    let bad = |_| OperationError::bad_cert_template("malformed RSA public key");
    let seq = asn1::read_header_expect(key_bits, 0, crate::asn1::tag::SEQUENCE).map_err(bad)?;
    let n_hdr =
        asn1::read_header_expect(key_bits, seq.content_offset, crate::asn1::tag::INTEGER).map_err(bad)?;
    let n = asn1::integer_magnitude(key_bits, &n_hdr).map_err(bad)?;
    match n.first() {
        None => Ok(0),
        Some(first) => Ok((n.len() - 1) * 8 + (8 - first.leading_zeros() as usize)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validity_parse() {
        assert_eq!(Validity::parse("90d"), Some(Validity::days(90)));
        assert_eq!(Validity::parse("2y"), Some(Validity::days(730)));
        assert_eq!(Validity::parse("12h"), Some(Validity::hours(12)));
        assert_eq!(Validity::parse("90x"), None);
        assert_eq!(Validity::parse(""), None);
    }

    #[test]
    fn not_before_offset_bounds() {
        assert!(NotBeforePolicy::offset(-600).is_ok());
        assert!(NotBeforePolicy::offset(-601).is_err());

        let policy = NotBeforePolicy::offset(-300).unwrap();
        let now = 1_700_000_000;
        // requested in the past is pulled up to now + offset
        assert_eq!(policy.not_before(now, Some(now - 3_600)), now - 300);
        // requested in the future is honored
        assert_eq!(policy.not_before(now, Some(now + 50)), now + 50);
        assert_eq!(policy.not_before(now, None), now - 300);
    }

    #[test]
    fn not_before_midnight_rounds_up() {
        let policy = NotBeforePolicy::midnight("UTC").unwrap();
        // 2023-11-14T22:13:20Z -> 2023-11-15T00:00:00Z
        assert_eq!(policy.not_before(1_700_000_000, None), 1_700_006_400);
        // already at midnight stays put
        assert_eq!(policy.not_before(1_700_006_400, None), 1_700_006_400);

        // at +02:00 the local clock is already past midnight, so the next
        // local midnight lands a day later
        let plus2 = NotBeforePolicy::midnight("+02:00").unwrap();
        assert_eq!(plus2.not_before(1_700_000_000, None), 1_700_092_800 - 7_200);
    }

    #[test]
    fn midnight_timezone_parsing() {
        assert!(NotBeforePolicy::midnight("UTC").is_ok());
        assert!(NotBeforePolicy::midnight("+05:30").is_ok());
        assert!(NotBeforePolicy::midnight("-08:00").is_ok());
        assert!(NotBeforePolicy::midnight("Mars/Olympus").is_err());
    }

    #[test]
    fn profile_names_are_lowercased() {
        let profile = Profile::new("TLS", CertLevel::EndEntity, Validity::days(90));
        assert_eq!(profile.name(), "tls");
    }

    #[test]
    fn key_policy_rejects_small_rsa() {
        use crate::asn1::writer;
        let profile = Profile::new("tls", CertLevel::EndEntity, Validity::days(90))
            .with_key_policy(KeyPolicy::Rsa { min_bits: 2048 });

        let small_modulus = vec![0x80u8; 128]; // 1024 bits
        let mut body = writer::integer_from_magnitude(&small_modulus);
        body.extend_from_slice(&writer::integer_u64(65_537));
        let spki = Spki {
            algorithm: oids::RSA_ENCRYPTION.to_vec(),
            parameters: Some(writer::null()),
            key_bits: writer::sequence(&body),
        };
        let err = profile.validate_public_key(&spki).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::BadCertTemplate);
    }

    #[test]
    fn profile_without_key_policy_is_a_config_defect() {
        let profile = Profile::new("tls", CertLevel::EndEntity, Validity::days(90));
        let spki = Spki {
            algorithm: oids::RSA_ENCRYPTION.to_vec(),
            parameters: None,
            key_bits: vec![],
        };
        let err = profile.validate_public_key(&spki).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::SystemFailure);
    }

    #[test]
    fn key_usage_bit_string_encoding() {
        let producer = KeyUsageProducer { bits: key_usage::KEY_CERT_SIGN | key_usage::CRL_SIGN };
        let spki = Spki { algorithm: vec![], parameters: None, key_bits: vec![] };
        let ctx = ExtensionContext {
            level: CertLevel::RootCa,
            public_key: &spki,
            issuer_cert: None,
            requested_extensions: None,
        };
        let ext = producer.produce(&ctx).unwrap().unwrap();
        // keyCertSign|cRLSign = bits 5,6 -> 0x06, one trailing zero bit
        assert_eq!(ext.value, vec![0x03, 0x02, 0x01, 0x06]);
    }
}
