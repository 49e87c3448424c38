//! Error types for the library

use thiserror::Error;

/// Classification of an operation failure.
///
/// Callers match on the kind rather than on concrete error types; the
/// message carries the human-readable detail only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed input, rejected at the boundary.
    BadRequest,
    /// The certificate profile rejected the request semantics.
    BadCertTemplate,
    /// Proof-of-possession verification failed.
    BadPop,
    /// Revocation guard: certificate already revoked.
    CertRevoked,
    /// Revocation guard: certificate is not revoked.
    CertUnrevoked,
    /// Policy guard rejected the operation.
    NotPermitted,
    /// CRL assembly or signing failed.
    CrlFailure,
    /// Database backend failure.
    DatabaseFailure,
    /// Invariant violation inside the core.
    SystemFailure,
    /// Configuration rejected at startup.
    InvalidConf,
}

impl ErrorKind {
    pub fn description(self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::BadCertTemplate => "bad_cert_template",
            ErrorKind::BadPop => "bad_pop",
            ErrorKind::CertRevoked => "cert_revoked",
            ErrorKind::CertUnrevoked => "cert_unrevoked",
            ErrorKind::NotPermitted => "not_permitted",
            ErrorKind::CrlFailure => "crl_failure",
            ErrorKind::DatabaseFailure => "database_failure",
            ErrorKind::SystemFailure => "system_failure",
            ErrorKind::InvalidConf => "invalid_conf",
        }
    }
}

/// Failure of a CA core operation.
#[derive(Error, Debug)]
#[error("{}: {message}", kind.description())]
pub struct OperationError {
    pub kind: ErrorKind,
    pub message: String,
}

impl OperationError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    pub fn bad_cert_template(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadCertTemplate, message)
    }

    pub fn bad_pop(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadPop, message)
    }

    pub fn cert_revoked(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CertRevoked, message)
    }

    pub fn cert_unrevoked(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CertUnrevoked, message)
    }

    pub fn not_permitted(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotPermitted, message)
    }

    pub fn crl_failure(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CrlFailure, message)
    }

    pub fn database_failure(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DatabaseFailure, message)
    }

    pub fn system_failure(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SystemFailure, message)
    }

    pub fn invalid_conf(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidConf, message)
    }
}

impl From<rusqlite::Error> for OperationError {
    fn from(err: rusqlite::Error) -> Self {
        Self::database_failure(err.to_string())
    }
}

impl From<r2d2::Error> for OperationError {
    fn from(err: r2d2::Error) -> Self {
        Self::database_failure(err.to_string())
    }
}

impl From<crate::asn1::DecodeError> for OperationError {
    fn from(err: crate::asn1::DecodeError) -> Self {
        Self::bad_request(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, OperationError>;
