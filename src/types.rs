//! Core domain types shared across the CA modules.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::asn1::writer;

/// CRL revocation reason codes from RFC 5280 section 5.3.1.
/// Code 7 is unused by the standard.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CrlReason {
    Unspecified,
    KeyCompromise,
    CaCompromise,
    AffiliationChanged,
    Superseded,
    CessationOfOperation,
    CertificateHold,
    RemoveFromCrl,
    PrivilegeWithdrawn,
    AaCompromise,
}

impl CrlReason {
    pub fn code(self) -> u8 {
        match self {
            CrlReason::Unspecified => 0,
            CrlReason::KeyCompromise => 1,
            CrlReason::CaCompromise => 2,
            CrlReason::AffiliationChanged => 3,
            CrlReason::Superseded => 4,
            CrlReason::CessationOfOperation => 5,
            CrlReason::CertificateHold => 6,
            CrlReason::RemoveFromCrl => 8,
            CrlReason::PrivilegeWithdrawn => 9,
            CrlReason::AaCompromise => 10,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(CrlReason::Unspecified),
            1 => Some(CrlReason::KeyCompromise),
            2 => Some(CrlReason::CaCompromise),
            3 => Some(CrlReason::AffiliationChanged),
            4 => Some(CrlReason::Superseded),
            5 => Some(CrlReason::CessationOfOperation),
            6 => Some(CrlReason::CertificateHold),
            8 => Some(CrlReason::RemoveFromCrl),
            9 => Some(CrlReason::PrivilegeWithdrawn),
            10 => Some(CrlReason::AaCompromise),
            _ => None,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            CrlReason::Unspecified => "unspecified",
            CrlReason::KeyCompromise => "keyCompromise",
            CrlReason::CaCompromise => "cACompromise",
            CrlReason::AffiliationChanged => "affiliationChanged",
            CrlReason::Superseded => "superseded",
            CrlReason::CessationOfOperation => "cessationOfOperation",
            CrlReason::CertificateHold => "certificateHold",
            CrlReason::RemoveFromCrl => "removeFromCRL",
            CrlReason::PrivilegeWithdrawn => "privilegeWithdrawn",
            CrlReason::AaCompromise => "aACompromise",
        }
    }
}

/// Revocation state of one certificate. Times are epoch seconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CertRevocationInfo {
    pub reason: CrlReason,
    pub revocation_time: i64,
    pub invalidity_time: Option<i64>,
}

impl CertRevocationInfo {
    pub fn new(reason: CrlReason, revocation_time: i64, invalidity_time: Option<i64>) -> Self {
        Self { reason, revocation_time, invalidity_time }
    }
}

/// Id/name pair identifying a CA, profile, requestor or publisher row.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NameId {
    pub id: i32,
    pub name: String,
}

impl NameId {
    pub fn new(id: i32, name: impl Into<String>) -> Self {
        Self { id, name: name.into() }
    }
}

impl fmt::Display for NameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (id={})", self.name, self.id)
    }
}

/// Transport that delivered an enrollment request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestType {
    Ca,
    Cmp,
    Scep,
    Est,
    Acme,
    Rest,
}

impl RequestType {
    pub fn code(self) -> i32 {
        match self {
            RequestType::Ca => 0,
            RequestType::Cmp => 1,
            RequestType::Scep => 2,
            RequestType::Est => 3,
            RequestType::Acme => 4,
            RequestType::Rest => 5,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(RequestType::Ca),
            1 => Some(RequestType::Cmp),
            2 => Some(RequestType::Scep),
            3 => Some(RequestType::Est),
            4 => Some(RequestType::Acme),
            5 => Some(RequestType::Rest),
            _ => None,
        }
    }
}

/// Positive certificate serial number, stored as its big-endian magnitude.
///
/// Persisted form is lowercase hex without leading zeros, matching how
/// the store addresses rows by `(CA, serial)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SerialNumber(Vec<u8>);

impl SerialNumber {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut start = 0;
        while start + 1 < bytes.len() && bytes[start] == 0 {
            start += 1;
        }
        Self(bytes[start..].to_vec())
    }

    pub fn from_u64(value: u64) -> Self {
        Self::from_bytes(&value.to_be_bytes())
    }

    pub fn from_hex(text: &str) -> Option<Self> {
        let padded = if text.len() % 2 == 0 {
            text.to_ascii_lowercase()
        } else {
            format!("0{}", text.to_ascii_lowercase())
        };
        hex::decode(&padded).ok().map(|b| Self::from_bytes(&b))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Lowercase hex without leading zeros.
    pub fn to_hex(&self) -> String {
        let text = hex::encode(&self.0);
        let trimmed = text.trim_start_matches('0');
        if trimmed.is_empty() { "0".to_string() } else { trimmed.to_string() }
    }

    pub fn bit_len(&self) -> usize {
        match self.0.first() {
            None => 0,
            Some(&first) => (self.0.len() - 1) * 8 + (8 - first.leading_zeros() as usize),
        }
    }

    /// DER INTEGER encoding of this serial.
    pub fn to_der(&self) -> Vec<u8> {
        writer::integer_from_magnitude(&self.0)
    }
}

impl PartialOrd for SerialNumber {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SerialNumber {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.len().cmp(&other.0.len()).then_with(|| self.0.cmp(&other.0))
    }
}

impl fmt::Display for SerialNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

/// Row id plus serial, as returned by paginated store scans.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SerialWithId {
    pub id: i64,
    pub serial: SerialNumber,
}

/// Revocation info plus the serial it belongs to; ordered by serial for
/// deterministic CRL entry order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CertRevInfoWithSerial {
    pub id: i64,
    pub serial: SerialNumber,
    pub rev_info: CertRevocationInfo,
}

impl PartialOrd for CertRevInfoWithSerial {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CertRevInfoWithSerial {
    fn cmp(&self, other: &Self) -> Ordering {
        self.serial.cmp(&other.serial)
    }
}

/// Result of a `knows_cert_for_serial` probe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KnownCertResult {
    pub known: bool,
    pub user_id: Option<i32>,
}

impl KnownCertResult {
    pub const UNKNOWN: KnownCertResult = KnownCertResult { known: false, user_id: None };
}

/// Status of a certificate looked up by subject fingerprint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CertStatus {
    Unknown,
    Revoked,
    Good,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crl_reason_codes_roundtrip() {
        for reason in [
            CrlReason::Unspecified,
            CrlReason::KeyCompromise,
            CrlReason::CaCompromise,
            CrlReason::AffiliationChanged,
            CrlReason::Superseded,
            CrlReason::CessationOfOperation,
            CrlReason::CertificateHold,
            CrlReason::RemoveFromCrl,
            CrlReason::PrivilegeWithdrawn,
            CrlReason::AaCompromise,
        ] {
            assert_eq!(CrlReason::from_code(reason.code()), Some(reason));
        }
        assert_eq!(CrlReason::from_code(7), None);
    }

    #[test]
    fn serial_hex_roundtrip() {
        let serial = SerialNumber::from_u64(0x2A);
        assert_eq!(serial.to_hex(), "2a");
        assert_eq!(SerialNumber::from_hex("2a"), Some(serial));

        let serial = SerialNumber::from_hex("0123456789abcdef01").unwrap();
        assert_eq!(serial.to_hex(), "123456789abcdef01");
    }

    #[test]
    fn serial_ordering_by_magnitude() {
        let small = SerialNumber::from_u64(0xFF);
        let large = SerialNumber::from_u64(0x100);
        assert!(small < large);
        assert!(SerialNumber::from_u64(0x10) < SerialNumber::from_u64(0x11));
    }

    #[test]
    fn serial_der_encoding() {
        assert_eq!(SerialNumber::from_u64(0x2A).to_der(), vec![0x02, 0x01, 0x2A]);
        // high bit set needs a sign byte
        assert_eq!(SerialNumber::from_u64(0x80).to_der(), vec![0x02, 0x02, 0x00, 0x80]);
    }
}
